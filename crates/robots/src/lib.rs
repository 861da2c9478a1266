//! robots.txt fetching/parsing and sitemap discovery (spec §4.2).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use url::Url;
use webx_core::CrawlError;

pub const CACHE_TTL: Duration = Duration::from_secs(6 * 60 * 60);
const FETCH_TIMEOUT: Duration = Duration::from_secs(8);
const MAX_SITEMAP_EXPANSIONS: usize = 12;
const MAX_SITEMAP_QUEUE: usize = 30;

#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    pub allow: Vec<String>,
    pub disallow: Vec<String>,
    pub crawl_delay_ms: Option<u64>,
    pub sitemaps: Vec<String>,
}

struct Group {
    agents: Vec<String>,
    allow: Vec<String>,
    disallow: Vec<String>,
    crawl_delay_ms: Option<u64>,
}

/// Parse a robots.txt body for `user_agent`. Unknown directives are ignored.
pub fn parse(body: &str, user_agent: &str) -> RobotsRules {
    let ua = user_agent.to_lowercase();
    let mut groups: Vec<Group> = Vec::new();
    let mut sitemaps = Vec::new();
    let mut current: Option<Group> = None;
    let mut seen_directive_since_agent = false;

    for raw_line in body.lines() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim().to_string();

        match key.as_str() {
            "user-agent" => {
                if seen_directive_since_agent || current.is_none() {
                    if let Some(g) = current.take() {
                        groups.push(g);
                    }
                    current = Some(Group {
                        agents: vec![value.to_lowercase()],
                        allow: Vec::new(),
                        disallow: Vec::new(),
                        crawl_delay_ms: None,
                    });
                } else if let Some(g) = current.as_mut() {
                    g.agents.push(value.to_lowercase());
                }
                seen_directive_since_agent = false;
            }
            "allow" => {
                if let Some(g) = current.as_mut() {
                    g.allow.push(value);
                    seen_directive_since_agent = true;
                }
            }
            "disallow" => {
                if let Some(g) = current.as_mut() {
                    g.disallow.push(value);
                    seen_directive_since_agent = true;
                }
            }
            "crawl-delay" => {
                if let Some(g) = current.as_mut() {
                    if let Ok(secs) = value.parse::<f64>() {
                        g.crawl_delay_ms = Some((secs * 1000.0) as u64);
                    }
                    seen_directive_since_agent = true;
                }
            }
            "sitemap" => {
                sitemaps.push(value);
            }
            _ => {}
        }
    }
    if let Some(g) = current.take() {
        groups.push(g);
    }

    // Prefer a group whose agent list names us specifically; fall back to `*`.
    // Per convention, once a named group matching our agent is found it is used
    // exclusively; wildcard groups are ignored rather than merged in.
    let exact = groups
        .iter()
        .find(|g| g.agents.iter().any(|a| a != "*" && ua.contains(a.as_str())));
    let chosen = exact.or_else(|| groups.iter().find(|g| g.agents.iter().any(|a| a == "*")));

    match chosen {
        Some(g) => RobotsRules {
            allow: g.allow.clone(),
            disallow: g.disallow.clone(),
            crawl_delay_ms: g.crawl_delay_ms,
            sitemaps,
        },
        None => RobotsRules {
            allow: Vec::new(),
            disallow: Vec::new(),
            crawl_delay_ms: None,
            sitemaps,
        },
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Fetches and parses `origin`'s robots.txt. A non-2xx response or transport
/// error is treated as "no rules" (crawl everything, no sitemaps).
pub async fn fetch(client: &reqwest::Client, origin: &Url, user_agent: &str) -> RobotsRules {
    let robots_url = match origin.join("/robots.txt") {
        Ok(u) => u,
        Err(_) => return RobotsRules::default(),
    };

    let resp = client
        .get(robots_url)
        .timeout(FETCH_TIMEOUT)
        .header("User-Agent", user_agent)
        .send()
        .await;

    match resp {
        Ok(r) if r.status().is_success() => match r.text().await {
            Ok(body) => parse(&body, user_agent),
            Err(_) => RobotsRules::default(),
        },
        _ => RobotsRules::default(),
    }
}

/// Longest-match-wins; ties favor allow. An empty disallow rule ("") never
/// blocks anything.
pub fn can_crawl(url: &Url, rules: &RobotsRules) -> bool {
    let path = url.path();
    let mut best_len: i64 = -1;
    let mut best_allow = true;

    for rule in &rules.disallow {
        if rule.is_empty() {
            continue;
        }
        if path_matches(path, rule) {
            let len = rule.len() as i64;
            if len > best_len {
                best_len = len;
                best_allow = false;
            }
        }
    }
    for rule in &rules.allow {
        if rule.is_empty() {
            continue;
        }
        if path_matches(path, rule) {
            let len = rule.len() as i64;
            if len >= best_len {
                best_len = len;
                best_allow = true;
            }
        }
    }

    best_allow
}

fn path_matches(path: &str, rule: &str) -> bool {
    match rule.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => path.starts_with(rule),
    }
}

/// Suggested per-fetch delay in ms. `robots` crawl-delay wins when present;
/// otherwise the configured base, nudged up when recent latency is high and
/// adaptive delay is enabled.
pub fn suggested_delay(
    base_delay_ms: u64,
    rules: &RobotsRules,
    avg_latency_ms: u64,
    adaptive: bool,
) -> u64 {
    let crawl_delay = rules.crawl_delay_ms.unwrap_or(0);
    let adaptive_component = if adaptive && avg_latency_ms > 0 {
        (avg_latency_ms as f64 * 1.4).round() as u64
    } else {
        0
    };
    base_delay_ms.max(crawl_delay).max(adaptive_component)
}

/// Expands sitemap indexes breadth-first, capped at 12 expansions / 30 URLs
/// in flight, returning at most `limit` page URLs.
pub async fn discover_sitemap_urls(
    client: &reqwest::Client,
    rules: &RobotsRules,
    origin: &Url,
    limit: usize,
) -> Vec<String> {
    let mut queue: Vec<String> = if rules.sitemaps.is_empty() {
        match origin.join("/sitemap.xml") {
            Ok(u) => vec![u.to_string()],
            Err(_) => Vec::new(),
        }
    } else {
        rules.sitemaps.clone()
    };
    queue.truncate(MAX_SITEMAP_QUEUE);

    let mut expansions = 0usize;
    let mut found = Vec::new();
    let mut visited = std::collections::HashSet::new();

    while let Some(sitemap_url) = queue.pop() {
        if !visited.insert(sitemap_url.clone()) {
            continue;
        }
        if expansions >= MAX_SITEMAP_EXPANSIONS || found.len() >= limit {
            break;
        }
        expansions += 1;

        let Ok(resp) = client
            .get(&sitemap_url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
        else {
            continue;
        };
        let Ok(body) = resp.text().await else {
            continue;
        };

        let is_index = body.contains("<sitemapindex");
        for loc in extract_locs(&body) {
            if is_index {
                if queue.len() < MAX_SITEMAP_QUEUE {
                    queue.push(loc);
                }
            } else {
                found.push(loc);
                if found.len() >= limit {
                    break;
                }
            }
        }
    }

    found.truncate(limit);
    found
}

fn extract_locs(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find("<loc>") {
        let after = &rest[start + 5..];
        let Some(end) = after.find("</loc>") else {
            break;
        };
        out.push(after[..end].trim().to_string());
        rest = &after[end + 6..];
    }
    out
}

/// TTL-bounded per-origin robots cache.
#[derive(Default)]
pub struct RobotsCache {
    entries: HashMap<String, (RobotsRules, Instant)>,
}

impl RobotsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, origin: &str) -> Option<&RobotsRules> {
        self.entries
            .get(origin)
            .filter(|(_, fetched_at)| fetched_at.elapsed() < CACHE_TTL)
            .map(|(rules, _)| rules)
    }

    pub fn insert(&mut self, origin: String, rules: RobotsRules) {
        self.entries.insert(origin, (rules, Instant::now()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_match_wins_ties_to_allow() {
        let rules = RobotsRules {
            allow: vec!["/docs/public".to_string()],
            disallow: vec!["/docs".to_string()],
            crawl_delay_ms: None,
            sitemaps: vec![],
        };
        let allowed = Url::parse("https://example.com/docs/public/page").unwrap();
        let blocked = Url::parse("https://example.com/docs/private").unwrap();
        assert!(can_crawl(&allowed, &rules));
        assert!(!can_crawl(&blocked, &rules));
    }

    #[test]
    fn empty_disallow_rule_allows_everything() {
        let rules = RobotsRules {
            allow: vec![],
            disallow: vec!["".to_string()],
            crawl_delay_ms: None,
            sitemaps: vec![],
        };
        let url = Url::parse("https://example.com/anything").unwrap();
        assert!(can_crawl(&url, &rules));
    }

    #[test]
    fn parses_exact_agent_group_over_wildcard() {
        let body = "User-agent: *\nDisallow: /\n\nUser-agent: webx-crawler\nDisallow: /private\nAllow: /\n";
        let rules = parse(body, "webx-crawler/0.1");
        let url = Url::parse("https://example.com/public").unwrap();
        assert!(can_crawl(&url, &rules));
    }

    #[test]
    fn falls_back_to_wildcard_group() {
        let body = "User-agent: *\nDisallow: /admin\n";
        let rules = parse(body, "webx-crawler/0.1");
        let blocked = Url::parse("https://example.com/admin/panel").unwrap();
        let allowed = Url::parse("https://example.com/docs").unwrap();
        assert!(!can_crawl(&blocked, &rules));
        assert!(can_crawl(&allowed, &rules));
    }

    #[test]
    fn extracts_locs_from_sitemap_body() {
        let body = "<urlset><url><loc>https://example.com/a</loc></url><url><loc>https://example.com/b</loc></url></urlset>";
        let locs = extract_locs(body);
        assert_eq!(locs, vec!["https://example.com/a", "https://example.com/b"]);
    }

    #[test]
    fn cache_respects_ttl() {
        let mut cache = RobotsCache::new();
        cache.insert("https://example.com".to_string(), RobotsRules::default());
        assert!(cache.get("https://example.com").is_some());
        assert!(cache.get("https://other.com").is_none());
    }
}
