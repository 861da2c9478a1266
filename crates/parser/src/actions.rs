//! Stable action synthesis from interactive DOM elements (spec §4.4).

use scraper::{ElementRef, Html, Selector};
use serde_json::json;
use webx_core::{Action, ActionType, Form};

use crate::sha256_16;

const MAX_SCAN_NODES: usize = 150;
const MAX_ACTIONS: usize = 80;

pub fn synthesize(document: &Html, forms: &[Form]) -> Vec<Action> {
    let Ok(sel) = Selector::parse("a[href], button, input, select, textarea") else {
        return Vec::new();
    };

    let mut actions = Vec::new();
    let mut seen_ids = std::collections::HashSet::new();
    let mut scanned = 0usize;

    for el in document.select(&sel) {
        if scanned >= MAX_SCAN_NODES || actions.len() >= MAX_ACTIONS {
            break;
        }
        scanned += 1;

        if let Some(action) = action_for_element(el) {
            if seen_ids.insert(action.id.clone()) {
                actions.push(action);
            }
        }
    }

    for form in forms {
        if actions.len() >= MAX_ACTIONS {
            break;
        }
        let selector = form
            .action
            .as_ref()
            .map(|_| format!("form#{}", form.id))
            .unwrap_or_else(|| format!("form#{}", form.id));
        let id = sha256_16(&format!("submit:{selector}"));
        if seen_ids.insert(id.clone()) {
            actions.push(Action {
                id,
                action_type: ActionType::Submit,
                label: "Submit form".to_string(),
                selector,
                params: json!({"type": "object", "properties": {}}),
            });
        }
    }

    actions
}

fn action_for_element(el: ElementRef<'_>) -> Option<Action> {
    let tag = el.value().name();
    let selector = build_selector(el);

    match tag {
        "a" => {
            let href = el.value().attr("href")?;
            let label = text_or(el, href);
            let id = sha256_16(&format!("navigate:{selector}:{href}"));
            Some(Action {
                id,
                action_type: ActionType::Navigate,
                label,
                selector,
                params: json!({"type": "object", "properties": {"href": href}}),
            })
        }
        "button" => {
            let label = text_or(el, "Submit");
            let id = sha256_16(&format!("submit:{selector}"));
            Some(Action {
                id,
                action_type: ActionType::Submit,
                label,
                selector,
                params: json!({"type": "object", "properties": {}}),
            })
        }
        "input" => {
            let input_type = el.value().attr("type").unwrap_or("text");
            match input_type {
                "hidden" => None,
                "submit" | "button" => {
                    let label = el
                        .value()
                        .attr("value")
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "Submit".to_string());
                    let id = sha256_16(&format!("submit:{selector}"));
                    Some(Action {
                        id,
                        action_type: ActionType::Submit,
                        label,
                        selector,
                        params: json!({"type": "object", "properties": {}}),
                    })
                }
                _ => {
                    let name = el.value().attr("name").unwrap_or("field");
                    let label = el
                        .value()
                        .attr("placeholder")
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| name.to_string());
                    let required = el.value().attr("required").is_some();
                    let id = sha256_16(&format!("fill:{selector}:{name}"));
                    Some(Action {
                        id,
                        action_type: ActionType::Fill,
                        label,
                        selector,
                        params: fill_params(required),
                    })
                }
            }
        }
        "select" => {
            let name = el.value().attr("name").unwrap_or("select");
            let required = el.value().attr("required").is_some();
            let id = sha256_16(&format!("select:{selector}:{name}"));
            Some(Action {
                id,
                action_type: ActionType::Select,
                label: name.to_string(),
                selector,
                params: fill_params(required),
            })
        }
        "textarea" => {
            let name = el.value().attr("name").unwrap_or("textarea");
            let required = el.value().attr("required").is_some();
            let id = sha256_16(&format!("fill:{selector}:{name}"));
            Some(Action {
                id,
                action_type: ActionType::Fill,
                label: name.to_string(),
                selector,
                params: fill_params(required),
            })
        }
        _ => None,
    }
}

fn fill_params(required: bool) -> serde_json::Value {
    let required_list: Vec<&str> = if required { vec!["value"] } else { vec![] };
    json!({
        "type": "object",
        "properties": {"value": {"type": "string"}},
        "required": required_list,
    })
}

fn text_or(el: ElementRef<'_>, fallback: &str) -> String {
    let text = el.text().collect::<String>();
    let trimmed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed
    }
}

/// `#id` -> `tag[name="..."]` -> `tag[aria-label="..."]` -> `tag.class1.class2`
/// -> `tag:nth-of-type(n)`.
fn build_selector(el: ElementRef<'_>) -> String {
    let tag = el.value().name();

    if let Some(id) = el.value().attr("id") {
        if !id.is_empty() {
            return format!("#{}", escape_ident(id));
        }
    }
    if let Some(name) = el.value().attr("name") {
        if !name.is_empty() {
            return format!("{tag}[name=\"{}\"]", escape_attr_value(name));
        }
    }
    if let Some(label) = el.value().attr("aria-label") {
        if !label.is_empty() {
            return format!("{tag}[aria-label=\"{}\"]", escape_attr_value(label));
        }
    }
    if let Some(class) = el.value().attr("class") {
        let classes: Vec<&str> = class.split_whitespace().take(2).collect();
        if !classes.is_empty() {
            let escaped: Vec<String> = classes.iter().map(|c| escape_ident(c)).collect();
            return format!("{tag}.{}", escaped.join("."));
        }
    }
    format!("{tag}:nth-of-type({})", nth_of_type(el))
}

fn escape_ident(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

fn escape_attr_value(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn nth_of_type(el: ElementRef<'_>) -> usize {
    let tag = el.value().name();
    let Some(parent) = el.parent() else {
        return 1;
    };
    let mut index = 0;
    for sibling in parent.children() {
        if let Some(sibling_el) = ElementRef::wrap(sibling) {
            if sibling_el.value().name() == tag {
                index += 1;
                if sibling_el == el {
                    return index;
                }
            }
        }
    }
    index.max(1)
}
