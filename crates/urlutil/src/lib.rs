//! URL normalization, crawlability/nuisance classification, and discovered-link
//! scoring (spec §4.1).

use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use url::Url;

/// Query keys stripped unconditionally, in addition to any `utm_*` key.
const TRACKING_KEYS: &[&str] = &[
    "fbclid", "gclid", "igshid", "mc_cid", "mc_eid", "ref", "ref_src", "source", "spm",
];

const NON_CRAWLABLE_EXTENSIONS: &[&str] = &[
    // images
    "jpg", "jpeg", "png", "gif", "bmp", "svg", "webp", "ico", "tiff",
    // archives
    "zip", "tar", "gz", "tgz", "rar", "7z", "bz2",
    // media
    "mp3", "mp4", "avi", "mov", "wmv", "flv", "wav", "ogg", "webm",
    // stylesheet / script
    "css", "js",
    // documents / feeds explicitly called out by spec
    "pdf", "json", "xml", "rss", "atom",
];

const NUISANCE_EXACT_PATHS: &[&str] = &["/robots.txt", "/sitemap.xml", "/ads.txt"];

const NUISANCE_SUBSTRINGS: &[&str] = &[
    "/wp-json/",
    "/api/",
    "/graphql",
    "/cdn-cgi/",
    "/cart",
    "/checkout",
    "/login",
    "/signin",
    "/account",
    "/admin",
];

const SEED_KEYWORD_STOPWORDS: &[&str] = &["www", "http", "https", "index", "html", "php"];

static TOPIC_RE: Lazy<regex_lite::Regex> = Lazy::new(|| {
    regex_lite::Regex::new(r"(?i)(docs|guide|blog|article|help|support|reference)").unwrap()
});

/// Normalize a URL per spec §4.1. Returns `None` for non-http(s) or unparseable input.
pub fn normalize(input: &str, base: Option<&Url>) -> Option<Url> {
    let parsed = match base {
        Some(b) => b.join(input).ok()?,
        None => Url::parse(input).ok()?,
    };
    normalize_url(&parsed)
}

/// Normalize an already-parsed URL.
pub fn normalize_url(url: &Url) -> Option<Url> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }

    let mut out = url.clone();

    // Lowercase host.
    if let Some(host) = url.host_str() {
        let lower = host.to_lowercase();
        let _ = out.set_host(Some(&lower));
    }

    out.set_fragment(None);

    // Drop default ports.
    let default_port = match out.scheme() {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    };
    if out.port() == default_port {
        let _ = out.set_port(None);
    }

    // Collapse repeated slashes in path, strip trailing slash except root.
    let collapsed = collapse_slashes(out.path());
    let trimmed = if collapsed.len() > 1 && collapsed.ends_with('/') {
        collapsed.trim_end_matches('/').to_string()
    } else {
        collapsed
    };
    out.set_path(&trimmed);

    // Filter and sort query params.
    let kept = filtered_sorted_query(url.query_pairs());
    if kept.is_empty() {
        out.set_query(None);
    } else {
        let qs = kept
            .into_iter()
            .map(|(k, v)| format!("{}={}", urlencode(&k), urlencode(&v)))
            .collect::<Vec<_>>()
            .join("&");
        out.set_query(Some(&qs));
    }

    Some(out)
}

fn collapse_slashes(path: &str) -> String {
    let mut result = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        result.push(c);
    }
    if result.is_empty() {
        "/".to_string()
    } else {
        result
    }
}

fn is_tracking_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    lower.starts_with("utm_") || TRACKING_KEYS.contains(&lower.as_str())
}

fn filtered_sorted_query<'a>(
    pairs: url::form_urlencoded::Parse<'a>,
) -> Vec<(String, String)> {
    // BTreeMap groups by key (sorted) while a Vec of values per key preserves
    // the original relative order of repeated keys ("stable value order").
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (k, v) in pairs {
        if is_tracking_key(&k) {
            continue;
        }
        grouped
            .entry(k.into_owned())
            .or_default()
            .push(v.into_owned());
    }
    let mut out = Vec::new();
    for (k, values) in grouped {
        for v in values {
            out.push((k.clone(), v));
        }
    }
    out
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// http(s) AND path does not end in a known binary/asset extension.
pub fn is_likely_crawlable(url: &Url) -> bool {
    if url.scheme() != "http" && url.scheme() != "https" {
        return false;
    }
    let path = url.path().to_lowercase();
    match path.rsplit_once('.') {
        Some((_, ext)) => !NON_CRAWLABLE_EXTENSIONS.contains(&ext),
        None => true,
    }
}

/// Parses `url_str`; a url that fails to parse is nuisance by definition.
pub fn is_nuisance_str(url_str: &str) -> bool {
    match Url::parse(url_str) {
        Ok(u) => is_nuisance(&u),
        Err(_) => true,
    }
}

pub fn is_nuisance(url: &Url) -> bool {
    let path = url.path();
    if NUISANCE_EXACT_PATHS.contains(&path) {
        return true;
    }
    NUISANCE_SUBSTRINGS.iter().any(|s| path.contains(s))
}

/// Tokenize host+path of every seed URL; keep tokens length >= 3, drop stopwords, cap 30.
pub fn extract_seed_keywords(seed_urls: &[String]) -> Vec<String> {
    let mut keywords = Vec::new();
    let mut seen = std::collections::HashSet::new();
    'outer: for seed in seed_urls {
        let Ok(url) = Url::parse(seed) else { continue };
        let haystack = format!(
            "{}{}",
            url.host_str().unwrap_or(""),
            url.path()
        );
        for token in tokenize(&haystack) {
            if token.len() < 3 {
                continue;
            }
            if SEED_KEYWORD_STOPWORDS.contains(&token.as_str()) {
                continue;
            }
            if seen.insert(token.clone()) {
                keywords.push(token);
                if keywords.len() >= 30 {
                    break 'outer;
                }
            }
        }
    }
    keywords
}

fn tokenize(s: &str) -> Vec<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

pub struct ScoreContext<'a> {
    pub seed_host: &'a str,
    pub seed_keywords: &'a [String],
}

/// Score a discovered link in `[1, 150]` per spec §4.1.
pub fn score_discovered_url(url: &Url, next_depth: u32, ctx: &ScoreContext<'_>) -> i64 {
    let mut score: i64 = 100;

    let host = url.host_str().unwrap_or("");
    if host != ctx.seed_host {
        score -= 25;
    }

    let path_segments = url
        .path_segments()
        .map(|segs| segs.filter(|s| !s.is_empty()).count())
        .unwrap_or(0);
    score -= 3 * path_segments as i64;

    score -= 7 * next_depth as i64;

    if url.query().is_some() {
        score -= 8;
    }

    let haystack = format!("{}{}", host, url.path()).to_lowercase();
    let mut keyword_bonus = 0i64;
    for kw in ctx.seed_keywords {
        if haystack.contains(kw.as_str()) {
            keyword_bonus += 4;
        }
    }
    score += keyword_bonus.min(20);

    if TOPIC_RE.is_match(url.path()) {
        score += 6;
    }

    score.clamp(1, 150)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_tracking_and_sorts_query() {
        let out = normalize(
            "https://Example.com/docs/page/?utm_source=x&b=2&a=1#section",
            None,
        )
        .unwrap();
        assert_eq!(out.as_str(), "https://example.com/docs/page?a=1&b=2");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize("https://Example.com/a//b/?z=1&utm_x=1", None).unwrap();
        let twice = normalize_url(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_rejects_non_http() {
        assert!(normalize("ftp://example.com/file", None).is_none());
    }

    #[test]
    fn normalize_drops_default_port_and_root_slash() {
        let out = normalize("https://example.com:443/", None).unwrap();
        assert_eq!(out.as_str(), "https://example.com/");
    }

    #[test]
    fn crawlable_rejects_binary_extensions() {
        assert!(!is_likely_crawlable(
            &Url::parse("https://example.com/file.pdf").unwrap()
        ));
        assert!(is_likely_crawlable(
            &Url::parse("https://example.com/docs/guide").unwrap()
        ));
    }

    #[test]
    fn nuisance_detects_known_paths() {
        assert!(is_nuisance(&Url::parse("https://example.com/robots.txt").unwrap()));
        assert!(is_nuisance(&Url::parse("https://example.com/api/v1/x").unwrap()));
        assert!(!is_nuisance(&Url::parse("https://example.com/docs").unwrap()));
    }

    #[test]
    fn nuisance_unparseable_is_nuisance() {
        assert!(is_nuisance_str("not a url"));
    }

    #[test]
    fn seed_keywords_extract_and_cap() {
        let kws = extract_seed_keywords(&["https://example.com/docs/platform".to_string()]);
        assert!(kws.contains(&"docs".to_string()));
        assert!(kws.contains(&"platform".to_string()));
        assert!(kws.len() <= 30);
    }

    #[test]
    fn score_favors_seed_keywords_and_host() {
        let seed_keywords = extract_seed_keywords(&["https://example.com/docs/platform".to_string()]);
        let ctx = ScoreContext {
            seed_host: "example.com",
            seed_keywords: &seed_keywords,
        };
        let good = Url::parse("https://example.com/docs/platform/setup").unwrap();
        let bad = Url::parse("https://example.com/random/path").unwrap();
        let good_score = score_discovered_url(&good, 1, &ctx);
        let bad_score = score_discovered_url(&bad, 1, &ctx);
        assert!(good_score > bad_score);
    }

    #[test]
    fn score_is_always_in_range() {
        let ctx = ScoreContext {
            seed_host: "example.com",
            seed_keywords: &[],
        };
        for depth in 0..20 {
            let url = Url::parse("https://other.com/a/b/c/d?x=1").unwrap();
            let score = score_discovered_url(&url, depth, &ctx);
            assert!((1..=150).contains(&score));
        }
    }
}
