//! Readability-style boilerplate removal and action synthesis (spec §4.3/4.4).

use scraper::{ElementRef, Html, Selector};
use url::Url;
use webx_core::{Action, Form, FormField, Link, PageMode};

use crate::actions;

const MIN_PARAGRAPH_LEN: usize = 40;
const LINK_TEXT_MAX_CHARS: usize = 160;

struct Caps {
    headings: usize,
    paragraphs: usize,
    links: usize,
    forms: usize,
}

fn caps_for(mode: PageMode) -> Caps {
    match mode {
        PageMode::Compact => Caps {
            headings: 12,
            paragraphs: 10,
            links: 25,
            forms: 5,
        },
        PageMode::Full => Caps {
            headings: 40,
            paragraphs: 35,
            links: 80,
            forms: 20,
        },
    }
}

pub struct Parsed {
    pub title: String,
    pub canonical_url: Option<String>,
    pub headings: Vec<String>,
    pub key_paragraphs: Vec<String>,
    pub links: Vec<Link>,
    pub forms: Vec<Form>,
    pub actions: Vec<Action>,
}

pub fn parse_document(html: &str, base_url: &Url, mode: PageMode) -> Parsed {
    let caps = caps_for(mode);
    let document = Html::parse_document(html);

    let title = select_first_text(&document, "title")
        .or_else(|| select_first_text(&document, "h1"))
        .unwrap_or_default();

    let canonical_url = select_one(&document, "link[rel=canonical]")
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| base_url.join(href).ok())
        .map(|u| u.to_string());

    let headings = extract_headings(&document, caps.headings);
    let key_paragraphs = extract_paragraphs(&document, caps.paragraphs);
    let links = extract_links(&document, base_url, caps.links);
    let forms = extract_forms(&document, caps.forms);
    let actions = actions::synthesize(&document, &forms);

    Parsed {
        title,
        canonical_url,
        headings,
        key_paragraphs,
        links,
        forms,
        actions,
    }
}

fn select_first_text(document: &Html, sel: &str) -> Option<String> {
    let selector = Selector::parse(sel).ok()?;
    let text = document
        .select(&selector)
        .next()
        .map(|el| normalize_ws(&el.text().collect::<String>()))?;
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn select_one<'a>(document: &'a Html, sel: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(sel).ok()?;
    document.select(&selector).next()
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_headings(document: &Html, cap: usize) -> Vec<String> {
    let mut out = Vec::new();
    for tag in ["h1", "h2", "h3"] {
        let Ok(sel) = Selector::parse(tag) else { continue };
        for el in document.select(&sel) {
            let text = normalize_ws(&el.text().collect::<String>());
            if !text.is_empty() {
                out.push(text);
            }
            if out.len() >= cap {
                return out;
            }
        }
    }
    out
}

/// Scores `<p>` candidates outside boilerplate containers (nav/header/footer/
/// aside/script/style/form), keeping dense non-trivial text blocks.
fn extract_paragraphs(document: &Html, cap: usize) -> Vec<String> {
    let Ok(sel) = Selector::parse("p") else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for el in document.select(&sel) {
        if is_within_boilerplate(el) {
            continue;
        }
        let text = normalize_ws(&el.text().collect::<String>());
        if text.len() > MIN_PARAGRAPH_LEN {
            out.push(text);
        }
        if out.len() >= cap {
            break;
        }
    }
    out
}

fn is_within_boilerplate(el: ElementRef<'_>) -> bool {
    let boilerplate_tags = ["nav", "header", "footer", "aside", "script", "style", "form"];
    let mut node = Some(el.parent());
    while let Some(Some(parent)) = node {
        if let Some(parent_el) = ElementRef::wrap(parent) {
            if boilerplate_tags.contains(&parent_el.value().name()) {
                return true;
            }
            node = Some(parent_el.parent());
        } else {
            break;
        }
    }
    false
}

fn extract_links(document: &Html, base_url: &Url, cap: usize) -> Vec<Link> {
    let Ok(sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let base_host = base_url.host_str().unwrap_or("");
    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for el in document.select(&sel) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        if href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
            || href.starts_with("data:")
        {
            continue;
        }
        let Ok(resolved) = base_url.join(href) else {
            continue;
        };
        let url_str = resolved.to_string();
        if !seen.insert(url_str.clone()) {
            continue;
        }
        let text = normalize_ws(&el.text().collect::<String>());
        if text.is_empty() {
            continue;
        }
        let text = truncate_chars(&text, LINK_TEXT_MAX_CHARS);

        let is_internal = resolved.host_str().unwrap_or("") == base_host;
        out.push(Link {
            url: url_str,
            text,
            rel: el.value().attr("rel").map(|s| s.to_string()),
            is_internal,
        });
        if out.len() >= cap {
            break;
        }
    }
    out
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

fn field_label(document: &Html, field_el: ElementRef<'_>) -> Option<String> {
    if let Some(aria) = field_el.value().attr("aria-label") {
        let aria = normalize_ws(aria);
        if !aria.is_empty() {
            return Some(aria);
        }
    }
    let id = field_el.value().attr("id")?;
    let Ok(label_sel) = Selector::parse("label") else {
        return None;
    };
    for label_el in document.select(&label_sel) {
        if label_el.value().attr("for") == Some(id) {
            let text = normalize_ws(&label_el.text().collect::<String>());
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn extract_forms(document: &Html, cap: usize) -> Vec<Form> {
    let Ok(sel) = Selector::parse("form") else {
        return Vec::new();
    };
    let input_sel = Selector::parse("input, select, textarea").unwrap();

    let mut out = Vec::new();
    for (idx, form_el) in document.select(&sel).enumerate() {
        let action = form_el.value().attr("action").map(|s| s.to_string());
        let method = form_el
            .value()
            .attr("method")
            .unwrap_or("get")
            .to_lowercase();
        let id = form_el
            .value()
            .attr("id")
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("form_{}", idx + 1));

        let mut fields = Vec::new();
        for field_el in form_el.select(&input_sel) {
            let tag = field_el.value().name();
            let field_type = if tag == "input" {
                field_el.value().attr("type").unwrap_or("text").to_string()
            } else {
                tag.to_string()
            };
            if field_type == "hidden" || field_type == "submit" || field_type == "button" {
                continue;
            }
            fields.push(FormField {
                name: field_el.value().attr("name").map(|s| s.to_string()),
                field_type,
                required: field_el.value().attr("required").is_some(),
                placeholder: field_el.value().attr("placeholder").map(|s| s.to_string()),
                label: field_label(document, field_el),
            });
        }

        out.push(Form {
            id,
            action,
            method,
            fields,
        });
        if out.len() >= cap {
            break;
        }
    }
    out
}
