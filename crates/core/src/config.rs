use serde::Deserialize;

use crate::types::CrawlOptions;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub crawler: CrawlOptions,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    pub data_dir: String,
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_body_size_mb")]
    pub max_body_size_mb: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub db_path: String,
}

fn default_poll_ms() -> u64 {
    1000
}

fn default_user_agent() -> String {
    "webx-crawler/0.1 (+https://example.invalid/bot)".to_string()
}

fn default_max_body_size_mb() -> usize {
    10
}
