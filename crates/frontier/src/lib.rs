//! In-memory, per-process scheduler state (spec §3/§4.7): last-fetch times,
//! adaptive latency tracking, job initialization markers, and the robots /
//! sitemap caches. The durable queue itself lives in `webx-storage`.

use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use webx_core::DomainPerformance;
use webx_robots::{RobotsCache, RobotsRules};

const SITEMAP_CACHE_TTL: std::time::Duration = webx_robots::CACHE_TTL;

#[derive(Default)]
pub struct Frontier {
    domain_last_fetch: DashMap<String, DateTime<Utc>>,
    domain_performance: DashMap<String, DomainPerformance>,
    initialized_jobs: DashSet<String>,
    robots_cache: Mutex<RobotsCache>,
    sitemap_cache: DashMap<String, (Vec<String>, Instant)>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fetch(&self, domain: &str) {
        self.domain_last_fetch.insert(domain.to_string(), Utc::now());
    }

    pub fn last_fetch(&self, domain: &str) -> Option<DateTime<Utc>> {
        self.domain_last_fetch.get(domain).map(|v| *v)
    }

    pub fn record_latency(&self, domain: &str, latency_ms: u64) {
        self.domain_performance
            .entry(domain.to_string())
            .or_default()
            .record(latency_ms);
    }

    pub fn performance(&self, domain: &str) -> DomainPerformance {
        self.domain_performance
            .get(domain)
            .map(|v| *v)
            .unwrap_or_default()
    }

    /// Returns `true` if this job had not previously been marked initialized.
    pub fn mark_initialized(&self, job_id: &str) -> bool {
        self.initialized_jobs.insert(job_id.to_string())
    }

    pub fn is_initialized(&self, job_id: &str) -> bool {
        self.initialized_jobs.contains(job_id)
    }

    pub fn cached_robots(&self, origin: &str) -> Option<RobotsRules> {
        let cache = self.robots_cache.lock().expect("robots cache mutex poisoned");
        cache.get(origin).cloned()
    }

    pub fn cache_robots(&self, origin: String, rules: RobotsRules) {
        let mut cache = self.robots_cache.lock().expect("robots cache mutex poisoned");
        cache.insert(origin, rules);
    }

    pub fn cached_sitemap_urls(&self, origin: &str) -> Option<Vec<String>> {
        self.sitemap_cache
            .get(origin)
            .filter(|(_, fetched_at)| fetched_at.elapsed() < SITEMAP_CACHE_TTL)
            .map(|entry| entry.0.clone())
    }

    pub fn cache_sitemap_urls(&self, origin: String, urls: Vec<String>) {
        self.sitemap_cache.insert(origin, (urls, Instant::now()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_domain_performance_ema() {
        let frontier = Frontier::new();
        frontier.record_latency("example.com", 100);
        frontier.record_latency("example.com", 200);
        let perf = frontier.performance("example.com");
        assert_eq!(perf.samples, 2);
        assert!(perf.avg_latency_ms > 100 && perf.avg_latency_ms <= 200);
    }

    #[test]
    fn mark_initialized_is_one_shot() {
        let frontier = Frontier::new();
        assert!(frontier.mark_initialized("job-1"));
        assert!(!frontier.mark_initialized("job-1"));
        assert!(frontier.is_initialized("job-1"));
    }

    #[test]
    fn sitemap_cache_round_trips() {
        let frontier = Frontier::new();
        assert!(frontier.cached_sitemap_urls("https://example.com").is_none());
        frontier.cache_sitemap_urls(
            "https://example.com".to_string(),
            vec!["https://example.com/a".to_string()],
        );
        assert_eq!(
            frontier.cached_sitemap_urls("https://example.com"),
            Some(vec!["https://example.com/a".to_string()])
        );
    }
}
