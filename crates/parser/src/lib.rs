pub mod actions;
pub mod extract;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use webx_core::{CrawlError, FetchResponse, Page, PageMode, PageSource};

pub const EXTRACTOR_VERSION: &str = "v1";

/// Builds a [`Page`] from a fetched response. The only fallible step is
/// decoding the body; extraction itself is best-effort over whatever HTML
/// came back.
pub fn extract_page(resp: &FetchResponse, mode: PageMode) -> Result<Page, CrawlError> {
    let body = String::from_utf8(resp.body.clone())
        .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned());

    let parsed = extract::parse_document(&body, &resp.final_url, mode);

    let content_hash = sha256_16(&format!(
        "{}\n{}",
        parsed.title,
        parsed.key_paragraphs.join("\n")
    ));
    let url = resp.final_url.to_string();
    let fetched_at = fmt_timestamp(resp.fetched_at);
    let id = sha256_16(&format!("{url}:{content_hash}:{fetched_at}"));

    Ok(Page {
        id,
        url,
        canonical_url: parsed.canonical_url,
        title: parsed.title,
        fetched_at,
        content_hash,
        extractor_version: EXTRACTOR_VERSION.to_string(),
        mode,
        source: PageSource::Static,
        headings: parsed.headings,
        key_paragraphs: parsed.key_paragraphs,
        links: parsed.links,
        forms: parsed.forms,
        actions: parsed.actions,
    })
}

fn fmt_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn sha256_16(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let hex = format!("{digest:x}");
    hex[..16].to_string()
}
