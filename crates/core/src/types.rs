use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use crate::error::CrawlError;

/// Every page fetcher (static HTTP today; a browser-session executor would be a
/// second implementor) implements this.
#[async_trait]
pub trait PageFetcher: Send + Sync + 'static {
    fn name(&self) -> &str;
    async fn fetch(&self, url: &Url, config: &FetchConfig) -> Result<FetchResponse, CrawlError>;
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub max_body_size: usize,
    pub follow_redirects: bool,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
            follow_redirects: true,
            user_agent: "webx-crawler/0.1 (+https://example.invalid/bot)".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: Url,
    pub final_url: Url,
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
    pub response_time_ms: u64,
}

/// Extraction mode: compact trims every list for cheap downstream consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageMode {
    Compact,
    Full,
}

impl Default for PageMode {
    fn default() -> Self {
        PageMode::Compact
    }
}

impl std::fmt::Display for PageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageMode::Compact => write!(f, "compact"),
            PageMode::Full => write!(f, "full"),
        }
    }
}

impl std::str::FromStr for PageMode {
    type Err = CrawlError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compact" => Ok(PageMode::Compact),
            "full" => Ok(PageMode::Full),
            other => Err(CrawlError::Validation(format!("unknown mode: {other}"))),
        }
    }
}

/// Where a page's HTML came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSource {
    Static,
    Playwright,
}

impl std::fmt::Display for PageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageSource::Static => write!(f, "static"),
            PageSource::Playwright => write!(f, "playwright"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub url: String,
    pub text: String,
    pub rel: Option<String>,
    #[serde(rename = "isInternal")]
    pub is_internal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormField {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub field_type: String,
    pub required: bool,
    pub placeholder: Option<String>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Form {
    pub id: String,
    pub action: Option<String>,
    pub method: String,
    pub fields: Vec<FormField>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Click,
    Fill,
    Select,
    Submit,
    Navigate,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionType::Click => "click",
            ActionType::Fill => "fill",
            ActionType::Select => "select",
            ActionType::Submit => "submit",
            ActionType::Navigate => "navigate",
        };
        write!(f, "{s}")
    }
}

/// A handle an agent can execute against a rendered page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub label: String,
    pub selector: String,
    /// JSON-schema-shaped, always `{"type": "object", ...}`.
    pub params: serde_json::Value,
}

/// A structured snapshot of a URL at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub url: String,
    #[serde(rename = "canonicalUrl")]
    pub canonical_url: Option<String>,
    pub title: String,
    #[serde(rename = "fetchedAt")]
    pub fetched_at: String,
    #[serde(rename = "contentHash")]
    pub content_hash: String,
    #[serde(rename = "extractorVersion")]
    pub extractor_version: String,
    pub mode: PageMode,
    pub source: PageSource,
    pub headings: Vec<String>,
    #[serde(rename = "keyParagraphs")]
    pub key_paragraphs: Vec<String>,
    pub links: Vec<Link>,
    pub forms: Vec<Form>,
    pub actions: Vec<Action>,
}

/// One `queryPages` hit: a page plus its relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageMatch {
    #[serde(flatten)]
    pub page: Page,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Finished,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = CrawlError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "finished" => Ok(JobStatus::Finished),
            "failed" => Ok(JobStatus::Failed),
            other => Err(CrawlError::Storage(format!("unknown job status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl std::fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueueItemStatus::Pending => "pending",
            QueueItemStatus::Processing => "processing",
            QueueItemStatus::Done => "done",
            QueueItemStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for QueueItemStatus {
    type Err = CrawlError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueItemStatus::Pending),
            "processing" => Ok(QueueItemStatus::Processing),
            "done" => Ok(QueueItemStatus::Done),
            "failed" => Ok(QueueItemStatus::Failed),
            other => Err(CrawlError::Storage(format!("unknown queue status: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawlJob {
    pub id: String,
    pub status: JobStatus,
    pub seed_urls: Vec<String>,
    pub options: CrawlOptions,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone)]
pub struct CrawlQueueItem {
    pub id: String,
    pub job_id: String,
    pub url: String,
    pub depth: u32,
    pub priority: i64,
    pub next_fetch_at: chrono::DateTime<chrono::Utc>,
    pub domain: String,
    pub status: QueueItemStatus,
    pub retries: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlJobStats {
    pub queued: i64,
    pub processing: i64,
    pub done: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJobStatus {
    pub id: String,
    pub status: JobStatus,
    pub stats: CrawlJobStats,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Runtime options for a crawl job. See spec §6.2 for field bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlOptions {
    #[serde(rename = "maxPages", default = "defaults::max_pages")]
    pub max_pages: u32,
    #[serde(rename = "maxDepth", default = "defaults::max_depth")]
    pub max_depth: u32,
    #[serde(default)]
    pub mode: PageMode,
    #[serde(rename = "allowDomains", default)]
    pub allow_domains: Option<Vec<String>>,
    #[serde(rename = "denyDomains", default)]
    pub deny_domains: Option<Vec<String>>,
    #[serde(rename = "respectRobots", default = "defaults::respect_robots")]
    pub respect_robots: bool,
    #[serde(rename = "perDomainDelayMs", default = "defaults::per_domain_delay_ms")]
    pub per_domain_delay_ms: u64,
    #[serde(rename = "seedFromSitemaps", default = "defaults::seed_from_sitemaps")]
    pub seed_from_sitemaps: bool,
    #[serde(rename = "maxSitemapUrls", default = "defaults::max_sitemap_urls")]
    pub max_sitemap_urls: usize,
    #[serde(rename = "adaptiveDelay", default = "defaults::adaptive_delay")]
    pub adaptive_delay: bool,
}

mod defaults {
    pub fn max_pages() -> u32 {
        100
    }
    pub fn max_depth() -> u32 {
        2
    }
    pub fn respect_robots() -> bool {
        true
    }
    pub fn per_domain_delay_ms() -> u64 {
        500
    }
    pub fn seed_from_sitemaps() -> bool {
        true
    }
    pub fn max_sitemap_urls() -> usize {
        200
    }
    pub fn adaptive_delay() -> bool {
        true
    }
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_pages: defaults::max_pages(),
            max_depth: defaults::max_depth(),
            mode: PageMode::Compact,
            allow_domains: None,
            deny_domains: None,
            respect_robots: defaults::respect_robots(),
            per_domain_delay_ms: defaults::per_domain_delay_ms(),
            seed_from_sitemaps: defaults::seed_from_sitemaps(),
            max_sitemap_urls: defaults::max_sitemap_urls(),
            adaptive_delay: defaults::adaptive_delay(),
        }
    }
}

impl CrawlOptions {
    /// Clamp every bounded field to the range in spec §6.2.
    pub fn clamped(mut self) -> Self {
        self.max_pages = self.max_pages.clamp(1, 10_000);
        self.max_depth = self.max_depth.clamp(0, 10);
        self
    }
}

/// Running mean latency per host, sample cap 50 (in-memory only, per spec §3).
#[derive(Debug, Clone, Copy, Default)]
pub struct DomainPerformance {
    pub avg_latency_ms: u64,
    pub samples: u32,
}

impl DomainPerformance {
    pub const SAMPLE_CAP: u32 = 50;

    pub fn record(&mut self, latency_ms: u64) {
        let n = self.samples as u64;
        self.avg_latency_ms =
            ((self.avg_latency_ms * n + latency_ms) as f64 / (n as f64 + 1.0)).round() as u64;
        self.samples = (self.samples + 1).min(Self::SAMPLE_CAP);
    }
}
