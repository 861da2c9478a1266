//! Static HTTP fetcher (spec §4.5): one [`PageFetcher`] implementor backed by
//! `reqwest`, following redirects and reporting timing the way a browser
//! executor would for its own fetches.

use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use url::Url;
use webx_core::{CrawlError, FetchConfig, FetchResponse, PageFetcher};

pub struct StaticFetcher {
    client: reqwest::Client,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::limited(10))
                .build()
                .expect("reqwest client builds with default TLS backend"),
        }
    }
}

impl Default for StaticFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(&self, url: &Url, config: &FetchConfig) -> Result<FetchResponse, CrawlError> {
        let started = Instant::now();

        let request = self
            .client
            .get(url.clone())
            .timeout(config.timeout)
            .header("User-Agent", &config.user_agent);

        let response = request
            .send()
            .await
            .map_err(|e| CrawlError::Network(e.to_string()))?;

        let status = response.status();
        let final_url = response.url().clone();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string().to_lowercase(), v.to_str().unwrap_or("").to_string()))
            .collect::<std::collections::HashMap<_, _>>();
        let content_type = headers.get("content-type").cloned();

        if !status.is_success() {
            return Err(CrawlError::FetchError {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("unknown").to_string(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| CrawlError::Network(e.to_string()))?;

        if body.len() > config.max_body_size {
            return Err(CrawlError::BodyTooLarge {
                size: body.len(),
                max: config.max_body_size,
            });
        }

        let response_time_ms = started.elapsed().as_millis() as u64;

        Ok(FetchResponse {
            url: url.clone(),
            final_url: Url::parse(final_url.as_str()).unwrap_or_else(|_| url.clone()),
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body: body.to_vec(),
            content_type,
            fetched_at: Utc::now(),
            response_time_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fetcher_reports_static_name() {
        let fetcher = StaticFetcher::new();
        assert_eq!(fetcher.name(), "static");
    }
}
