//! The crawl engine: owns the per-tick job state machine described in spec
//! §4.7. One call to [`CrawlEngine::process_job_once`] claims at most one
//! queue item and drives it through fetch, extract, save, and link discovery.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use url::Url;
use webx_core::{CrawlError, CrawlJobStatus, CrawlOptions, JobStatus, Page, PageFetcher, FetchConfig};
use webx_frontier::Frontier;
use webx_robots::RobotsRules;
use webx_storage::Store;

const MAX_FAILED_BEFORE_JOB_FAILS: i64 = 25;
const MAX_CLAIM_ATTEMPTS_PER_TICK: usize = 5;

pub struct CrawlEngine {
    store: Store,
    frontier: Frontier,
    fetcher: Arc<dyn PageFetcher>,
    http_client: reqwest::Client,
    user_agent: String,
}

impl CrawlEngine {
    pub fn new(store: Store, fetcher: Arc<dyn PageFetcher>, user_agent: String) -> Self {
        Self {
            store,
            frontier: Frontier::new(),
            fetcher,
            http_client: reqwest::Client::new(),
            user_agent,
        }
    }

    pub async fn start(
        &self,
        seed_urls: Vec<String>,
        options: Option<CrawlOptions>,
    ) -> Result<String, CrawlError> {
        let options = options.unwrap_or_default().clamped();
        let job_id = self.store.create_crawl_job(&seed_urls, &options).await?;

        for (index, seed) in seed_urls.iter().enumerate() {
            let Some(normalized) = webx_urlutil::normalize(seed, None) else {
                continue;
            };
            let domain = normalized.host_str().unwrap_or("").to_string();
            let priority = 140 - index as i64;
            self.store
                .enqueue_url(&job_id, normalized.as_str(), 0, priority, &domain)
                .await?;
        }

        info!(job_id = %job_id, seeds = seed_urls.len(), "crawl job started");
        Ok(job_id)
    }

    pub async fn status(&self, job_id: &str) -> Result<Option<CrawlJobStatus>, CrawlError> {
        self.store.get_crawl_job_status(job_id).await
    }

    pub async fn next(&self, job_id: &str, limit: usize) -> Result<Vec<Page>, CrawlError> {
        self.store.get_crawl_pages(job_id, limit).await
    }

    /// Advances every active job by one tick.
    pub async fn process_active_jobs_once(&self) -> Result<(), CrawlError> {
        let jobs = self.store.list_active_crawl_jobs().await?;
        for job in jobs {
            if let Err(e) = self.process_job_once(&job.id, &job.options).await {
                warn!(job_id = %job.id, error = %e, "tick failed for job");
            }
        }
        Ok(())
    }

    /// Runs one step of the job state machine: claim, fetch, extract,
    /// persist, discover links, then re-evaluate job completion.
    pub async fn process_job_once(
        &self,
        job_id: &str,
        options: &CrawlOptions,
    ) -> Result<(), CrawlError> {
        let Some(job) = self.store.get_crawl_job(job_id).await? else {
            return Ok(());
        };

        let status = self.store.get_crawl_job_status(job_id).await?;
        if let Some(status) = &status {
            if status.stats.done as u32 >= options.max_pages {
                if status.status == JobStatus::Running || status.status == JobStatus::Pending {
                    self.store
                        .set_crawl_job_status(job_id, JobStatus::Finished, Some(Utc::now()))
                        .await?;
                }
                return Ok(());
            }
        }

        if self.frontier.mark_initialized(job_id) {
            self.store
                .set_crawl_job_status(job_id, JobStatus::Running, None)
                .await?;
            self.seed_from_sitemaps(job_id, &job.seed_urls, options).await?;
        }

        let seed_hosts = seed_hosts(&job.seed_urls);

        let mut item = None;
        for _ in 0..MAX_CLAIM_ATTEMPTS_PER_TICK {
            let Some(candidate) = self.store.claim_next_queue_item(job_id).await? else {
                break;
            };

            let url = match Url::parse(&candidate.url) {
                Ok(u) => u,
                Err(_) => {
                    self.store.complete_queue_item(&candidate.id).await?;
                    continue;
                }
            };
            let origin = format!("{}://{}", url.scheme(), url.host_str().unwrap_or(""));
            let rules = self.robots_for(&origin).await;

            if options.respect_robots && !webx_robots::can_crawl(&url, &rules) {
                self.store.complete_queue_item(&candidate.id).await?;
                continue;
            }

            if !should_queue(&url, options, &seed_hosts) {
                self.store.complete_queue_item(&candidate.id).await?;
                continue;
            }

            let delay_ms = self.delay_for(&candidate.domain, options, &rules);
            if let Some(last) = self.frontier.last_fetch(&candidate.domain) {
                let elapsed_ms = (Utc::now() - last).num_milliseconds().max(0) as u64;
                if elapsed_ms < delay_ms {
                    let retry_at = last + chrono::Duration::milliseconds(delay_ms as i64);
                    self.store.defer_queue_item(&candidate.id, retry_at).await?;
                    continue;
                }
            }

            item = Some(candidate);
            break;
        }

        let Some(item) = item else {
            return self.reconcile_job_status(job_id).await;
        };

        let fetch_config = FetchConfig {
            user_agent: self.user_agent.clone(),
            ..FetchConfig::default()
        };

        let url = Url::parse(&item.url).map_err(|e| CrawlError::InvalidUrl(e.to_string()))?;
        self.frontier.record_fetch(&item.domain);

        let fetched = self.fetcher.fetch(&url, &fetch_config).await;
        let response = match fetched {
            Ok(r) => r,
            Err(e) => {
                self.store.fail_queue_item(&item.id, &e.to_string()).await?;
                return self.reconcile_job_status(job_id).await;
            }
        };
        self.frontier
            .record_latency(&item.domain, response.response_time_ms);

        let page = match webx_parser::extract_page(&response, options.mode) {
            Ok(p) => p,
            Err(e) => {
                self.store.fail_queue_item(&item.id, &e.to_string()).await?;
                return self.reconcile_job_status(job_id).await;
            }
        };

        let previous = self.store.get_latest_page_by_url(&item.url).await?;
        let unchanged = previous
            .as_ref()
            .is_some_and(|p| p.content_hash == page.content_hash);

        self.store.save_page(&page, Some(job_id), item.depth).await?;

        // Even when content is unchanged we still discover from the freshly
        // extracted link set: a stale store entry shouldn't stop forward
        // progress on a crawl.
        let _ = unchanged;
        self.discover_links(job_id, &page, &item, &job.seed_urls, &seed_hosts, options)
            .await?;

        self.store.complete_queue_item(&item.id).await?;
        self.reconcile_job_status(job_id).await
    }

    async fn discover_links(
        &self,
        job_id: &str,
        page: &Page,
        item: &webx_core::CrawlQueueItem,
        job_seed_urls: &[String],
        seed_hosts: &HashSet<String>,
        options: &CrawlOptions,
    ) -> Result<(), CrawlError> {
        if item.depth >= options.max_depth {
            return Ok(());
        }

        let seed_host = job_seed_urls
            .first()
            .and_then(|s| Url::parse(s).ok())
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_default();
        let seed_keywords = webx_urlutil::extract_seed_keywords(job_seed_urls);
        let next_depth = item.depth + 1;

        for link in &page.links {
            let Some(normalized) = webx_urlutil::normalize(&link.url, None) else {
                continue;
            };
            if !should_queue(&normalized, options, seed_hosts) {
                continue;
            }

            let domain = normalized.host_str().unwrap_or("").to_string();
            let ctx = webx_urlutil::ScoreContext {
                seed_host: &seed_host,
                seed_keywords: &seed_keywords,
            };
            let priority = webx_urlutil::score_discovered_url(&normalized, next_depth, &ctx);

            self.store
                .enqueue_url(job_id, normalized.as_str(), next_depth, priority, &domain)
                .await?;
        }
        Ok(())
    }

    /// One-shot per job: seeds the queue from each seed origin's sitemap
    /// (spec §4.7 worker-tick step 2), capped at `options.max_sitemap_urls`.
    async fn seed_from_sitemaps(
        &self,
        job_id: &str,
        seed_urls: &[String],
        options: &CrawlOptions,
    ) -> Result<(), CrawlError> {
        if !options.seed_from_sitemaps {
            return Ok(());
        }

        for origin in unique_origins(seed_urls) {
            let Ok(origin_url) = Url::parse(&origin) else {
                continue;
            };
            let rules = self.robots_for(&origin).await;
            let urls = webx_robots::discover_sitemap_urls(
                &self.http_client,
                &rules,
                &origin_url,
                options.max_sitemap_urls,
            )
            .await;

            for url in urls {
                let Some(normalized) = webx_urlutil::normalize(&url, None) else {
                    continue;
                };
                if !webx_urlutil::is_likely_crawlable(&normalized)
                    || webx_urlutil::is_nuisance(&normalized)
                {
                    continue;
                }
                let domain = normalized.host_str().unwrap_or("").to_string();
                self.store
                    .enqueue_url(job_id, normalized.as_str(), 0, 110, &domain)
                    .await?;
            }
        }
        Ok(())
    }

    async fn robots_for(&self, origin: &str) -> RobotsRules {
        if let Some(cached) = self.frontier.cached_robots(origin) {
            return cached;
        }
        let Ok(origin_url) = Url::parse(origin) else {
            return RobotsRules::default();
        };
        let rules = webx_robots::fetch(&self.http_client, &origin_url, &self.user_agent).await;
        self.frontier.cache_robots(origin.to_string(), rules.clone());
        rules
    }

    fn delay_for(&self, domain: &str, options: &CrawlOptions, rules: &RobotsRules) -> u64 {
        let perf = self.frontier.performance(domain);
        webx_robots::suggested_delay(
            options.per_domain_delay_ms,
            rules,
            perf.avg_latency_ms,
            options.adaptive_delay,
        )
    }

    /// `finished` once nothing is left pending/processing; `failed` once more
    /// than 25 items have failed and nothing has completed successfully.
    async fn reconcile_job_status(&self, job_id: &str) -> Result<(), CrawlError> {
        let Some(status) = self.store.get_crawl_job_status(job_id).await? else {
            return Ok(());
        };
        if status.status != JobStatus::Running {
            return Ok(());
        }

        let stats = &status.stats;
        if stats.failed > MAX_FAILED_BEFORE_JOB_FAILS && stats.done == 0 {
            self.store
                .set_crawl_job_status(job_id, JobStatus::Failed, Some(Utc::now()))
                .await?;
        } else if stats.queued == 0 && stats.processing == 0 {
            self.store
                .set_crawl_job_status(job_id, JobStatus::Finished, Some(Utc::now()))
                .await?;
        }
        Ok(())
    }
}

/// crawlable AND not nuisance AND (host in `allowDomains` if set, else host in
/// the job's seed hosts) AND host not in `denyDomains` (spec §4.7 `shouldQueue`).
fn should_queue(url: &Url, options: &CrawlOptions, seed_hosts: &HashSet<String>) -> bool {
    if !webx_urlutil::is_likely_crawlable(url) || webx_urlutil::is_nuisance(url) {
        return false;
    }
    let domain = url.host_str().unwrap_or("").to_string();
    match &options.allow_domains {
        Some(allow) => {
            if !allow.iter().any(|d| d == &domain) {
                return false;
            }
        }
        None => {
            if !seed_hosts.contains(&domain) {
                return false;
            }
        }
    }
    if let Some(deny) = &options.deny_domains {
        if deny.iter().any(|d| d == &domain) {
            return false;
        }
    }
    true
}

fn seed_hosts(seed_urls: &[String]) -> HashSet<String> {
    seed_urls
        .iter()
        .filter_map(|s| Url::parse(s).ok())
        .filter_map(|u| u.host_str().map(|h| h.to_string()))
        .collect()
}

fn unique_origins(seed_urls: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for s in seed_urls {
        if let Ok(u) = Url::parse(s) {
            let origin = format!("{}://{}", u.scheme(), u.host_str().unwrap_or(""));
            if seen.insert(origin.clone()) {
                out.push(origin);
            }
        }
    }
    out
}
