use std::str::FromStr;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::info;

use webx_core::{
    CrawlError, CrawlJob, CrawlJobStats, CrawlJobStatus, CrawlOptions, CrawlQueueItem, JobStatus,
    Link, Page, PageMatch, PageMode, PageSource, QueueItemStatus,
};

const RETRY_DELAY_MS: i64 = 1500;
const MAX_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn new(db_path: &str) -> Result<Self, CrawlError> {
        Self::with_pool_size(db_path, 10).await
    }

    pub async fn with_pool_size(db_path: &str, max_connections: u32) -> Result<Self, CrawlError> {
        let options = SqliteConnectOptions::from_str(db_path)
            .map_err(|e| CrawlError::Storage(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;

        info!(max_connections, "connected to sqlite store");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), CrawlError> {
        sqlx::raw_sql(include_str!("../migrations/001_init.sql"))
            .execute(&self.pool)
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;
        info!("storage migrations complete");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Saves a page and atomically replaces its link set.
    pub async fn save_page(
        &self,
        page: &Page,
        job_id: Option<&str>,
        depth: u32,
    ) -> Result<(), CrawlError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;

        let page_json = serde_json::to_string(page).unwrap_or_default();

        sqlx::query(
            r#"INSERT INTO pages (id, url, canonical_url, title, fetched_at, content_hash, extractor_version, mode, source, page_json, job_id, depth)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
               ON CONFLICT (id) DO UPDATE SET
                   canonical_url = excluded.canonical_url,
                   title = excluded.title,
                   fetched_at = excluded.fetched_at,
                   content_hash = excluded.content_hash,
                   page_json = excluded.page_json"#,
        )
        .bind(&page.id)
        .bind(&page.url)
        .bind(&page.canonical_url)
        .bind(&page.title)
        .bind(&page.fetched_at)
        .bind(&page.content_hash)
        .bind(&page.extractor_version)
        .bind(page.mode.to_string())
        .bind(page.source.to_string())
        .bind(&page_json)
        .bind(job_id)
        .bind(depth as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| CrawlError::Storage(e.to_string()))?;

        sqlx::query("DELETE FROM links WHERE from_page_id = ?1")
            .bind(&page.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;

        for link in &page.links {
            sqlx::query(
                "INSERT OR IGNORE INTO links (from_page_id, to_url, text, rel, is_internal) VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&page.id)
            .bind(&link.url)
            .bind(&link.text)
            .bind(&link.rel)
            .bind(link.is_internal)
            .execute(&mut *tx)
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;
        }

        tx.commit().await.map_err(|e| CrawlError::Storage(e.to_string()))?;
        Ok(())
    }

    pub async fn get_page_by_id(&self, id: &str) -> Result<Option<Page>, CrawlError> {
        let row = sqlx::query("SELECT * FROM pages WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;
        match row {
            Some(r) => Ok(Some(self.hydrate_page(&r).await?)),
            None => Ok(None),
        }
    }

    pub async fn get_latest_page_by_url(&self, url: &str) -> Result<Option<Page>, CrawlError> {
        let row = sqlx::query("SELECT * FROM pages WHERE url = ?1 ORDER BY fetched_at DESC LIMIT 1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;
        match row {
            Some(r) => Ok(Some(self.hydrate_page(&r).await?)),
            None => Ok(None),
        }
    }

    /// Searches `title` and the full serialized page body, newest first, and
    /// scores each hit by its rank in the result set (spec §4.6 `queryPages`).
    pub async fn query_pages(&self, query: &str, limit: usize) -> Result<Vec<PageMatch>, CrawlError> {
        let pattern = format!("%{}%", query.to_lowercase());
        let rows = sqlx::query(
            r#"SELECT * FROM pages
               WHERE lower(title) LIKE ?1 OR lower(page_json) LIKE ?1
               ORDER BY fetched_at DESC
               LIMIT ?2"#,
        )
        .bind(&pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CrawlError::Storage(e.to_string()))?;

        let mut matches = Vec::with_capacity(rows.len());
        for (rank, row) in rows.iter().enumerate() {
            let page = self.hydrate_page(row).await?;
            let score = (1.0 - 0.05 * rank as f64).max(0.0);
            matches.push(PageMatch { page, score });
        }
        Ok(matches)
    }

    /// Builds a `Page` from a `pages` row's `page_json` plus its authoritative
    /// `links` rows.
    async fn hydrate_page(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Page, CrawlError> {
        let id: String = row.try_get("id").map_err(|e| CrawlError::Storage(e.to_string()))?;
        let page_json: String = row.try_get("page_json").unwrap_or_default();
        let mut page: Page = serde_json::from_str(&page_json).map_err(|e| CrawlError::Storage(e.to_string()))?;
        page.links = self.get_page_links(&id).await?;
        Ok(page)
    }

    pub async fn get_page_links(&self, page_id: &str) -> Result<Vec<Link>, CrawlError> {
        let rows = sqlx::query("SELECT to_url, text, rel, is_internal FROM links WHERE from_page_id = ?1")
            .bind(page_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|r| Link {
                url: r.try_get("to_url").unwrap_or_default(),
                text: r.try_get("text").unwrap_or_default(),
                rel: r.try_get("rel").ok(),
                is_internal: r.try_get("is_internal").unwrap_or(false),
            })
            .collect())
    }

    pub async fn create_crawl_job(
        &self,
        seed_urls: &[String],
        options: &CrawlOptions,
    ) -> Result<String, CrawlError> {
        let now = Utc::now();
        let id = job_id(seed_urls, now);
        let seed_json = serde_json::to_string(seed_urls).unwrap_or_default();
        let options_json = serde_json::to_string(options).unwrap_or_default();

        sqlx::query(
            "INSERT INTO crawl_jobs (id, status, seed_urls_json, options_json, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&id)
        .bind(JobStatus::Pending.to_string())
        .bind(&seed_json)
        .bind(&options_json)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| CrawlError::Storage(e.to_string()))?;

        Ok(id)
    }

    pub async fn set_crawl_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<(), CrawlError> {
        sqlx::query("UPDATE crawl_jobs SET status = ?1, finished_at = ?2 WHERE id = ?3")
            .bind(status.to_string())
            .bind(finished_at.map(|d| d.to_rfc3339()))
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;
        Ok(())
    }

    pub async fn get_crawl_job(&self, job_id: &str) -> Result<Option<CrawlJob>, CrawlError> {
        let row = sqlx::query("SELECT * FROM crawl_jobs WHERE id = ?1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;
        row.map(|r| self.row_to_job(&r)).transpose()
    }

    pub async fn list_active_crawl_jobs(&self) -> Result<Vec<CrawlJob>, CrawlError> {
        let rows = sqlx::query("SELECT * FROM crawl_jobs WHERE status IN ('pending', 'running')")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;
        rows.iter().map(|r| self.row_to_job(r)).collect()
    }

    fn row_to_job(&self, row: &sqlx::sqlite::SqliteRow) -> Result<CrawlJob, CrawlError> {
        let status_str: String = row.try_get("status").map_err(|e| CrawlError::Storage(e.to_string()))?;
        let seed_urls: Vec<String> = serde_json::from_str(
            row.try_get::<String, _>("seed_urls_json").unwrap_or_default().as_str(),
        )
        .unwrap_or_default();
        let options: CrawlOptions = serde_json::from_str(
            row.try_get::<String, _>("options_json").unwrap_or_default().as_str(),
        )
        .unwrap_or_default();
        let created_at: String = row.try_get("created_at").unwrap_or_default();
        let finished_at: Option<String> = row.try_get("finished_at").ok();

        Ok(CrawlJob {
            id: row.try_get("id").map_err(|e| CrawlError::Storage(e.to_string()))?,
            status: status_str.parse().unwrap_or(JobStatus::Pending),
            seed_urls,
            options,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            finished_at: finished_at
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|d| d.with_timezone(&Utc)),
        })
    }

    pub async fn get_crawl_job_status(&self, job_id: &str) -> Result<Option<CrawlJobStatus>, CrawlError> {
        let Some(job) = self.get_crawl_job(job_id).await? else {
            return Ok(None);
        };

        let rows = sqlx::query(
            "SELECT status, COUNT(*) as n FROM crawl_queue WHERE job_id = ?1 GROUP BY status",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CrawlError::Storage(e.to_string()))?;

        let mut stats = CrawlJobStats::default();
        for row in rows {
            let status: String = row.try_get("status").unwrap_or_default();
            let n: i64 = row.try_get("n").unwrap_or(0);
            match status.as_str() {
                "pending" => stats.queued = n,
                "processing" => stats.processing = n,
                "done" => stats.done = n,
                "failed" => stats.failed = n,
                _ => {}
            }
        }

        Ok(Some(CrawlJobStatus {
            id: job.id,
            status: job.status,
            stats,
            created_at: job.created_at,
            finished_at: job.finished_at,
        }))
    }

    pub async fn get_crawl_pages(&self, job_id: &str, limit: usize) -> Result<Vec<Page>, CrawlError> {
        let rows = sqlx::query("SELECT * FROM pages WHERE job_id = ?1 ORDER BY fetched_at DESC LIMIT ?2")
            .bind(job_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;
        let mut pages = Vec::with_capacity(rows.len());
        for row in &rows {
            pages.push(self.hydrate_page(row).await?);
        }
        Ok(pages)
    }

    /// INSERT OR IGNORE on the `(job_id, url)` unique index; a URL already
    /// queued for this job is silently skipped.
    pub async fn enqueue_url(
        &self,
        job_id: &str,
        url: &str,
        depth: u32,
        priority: i64,
        domain: &str,
    ) -> Result<(), CrawlError> {
        let id = sha256_16(&format!("{job_id}:{url}"));
        sqlx::query(
            "INSERT OR IGNORE INTO crawl_queue (id, job_id, url, depth, priority, next_fetch_at, domain, status, retries)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', 0)",
        )
        .bind(id)
        .bind(job_id)
        .bind(url)
        .bind(depth as i64)
        .bind(priority)
        .bind(Utc::now().to_rfc3339())
        .bind(domain)
        .execute(&self.pool)
        .await
        .map_err(|e| CrawlError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Claims the highest-priority, shallowest, earliest-eligible pending item
    /// for `job_id`. The update is guarded by `status = 'pending'` so a second
    /// caller racing on the same row claims nothing; this crate assumes a
    /// single poller per job rather than building out `SKIP LOCKED` semantics.
    pub async fn claim_next_queue_item(
        &self,
        job_id: &str,
    ) -> Result<Option<CrawlQueueItem>, CrawlError> {
        let now = Utc::now().to_rfc3339();
        let candidate = sqlx::query(
            r#"SELECT id FROM crawl_queue
               WHERE job_id = ?1 AND status = 'pending' AND next_fetch_at <= ?2
               ORDER BY priority DESC, depth ASC, next_fetch_at ASC
               LIMIT 1"#,
        )
        .bind(job_id)
        .bind(&now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CrawlError::Storage(e.to_string()))?;

        let Some(row) = candidate else { return Ok(None) };
        let id: String = row.try_get("id").map_err(|e| CrawlError::Storage(e.to_string()))?;

        let result = sqlx::query("UPDATE crawl_queue SET status = 'processing' WHERE id = ?1 AND status = 'pending'")
            .bind(&id)
            .execute(&self.pool)
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;

        if result.rows_affected() != 1 {
            return Ok(None);
        }

        let row = sqlx::query("SELECT * FROM crawl_queue WHERE id = ?1")
            .bind(&id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;
        Ok(Some(self.row_to_queue_item(&row)?))
    }

    fn row_to_queue_item(&self, row: &sqlx::sqlite::SqliteRow) -> Result<CrawlQueueItem, CrawlError> {
        let status_str: String = row.try_get("status").map_err(|e| CrawlError::Storage(e.to_string()))?;
        let next_fetch_at: String = row.try_get("next_fetch_at").unwrap_or_default();
        Ok(CrawlQueueItem {
            id: row.try_get("id").map_err(|e| CrawlError::Storage(e.to_string()))?,
            job_id: row.try_get("job_id").map_err(|e| CrawlError::Storage(e.to_string()))?,
            url: row.try_get("url").map_err(|e| CrawlError::Storage(e.to_string()))?,
            depth: row.try_get::<i64, _>("depth").unwrap_or(0) as u32,
            priority: row.try_get("priority").unwrap_or(0),
            next_fetch_at: DateTime::parse_from_rfc3339(&next_fetch_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            domain: row.try_get("domain").unwrap_or_default(),
            status: status_str.parse().unwrap_or(QueueItemStatus::Pending),
            retries: row.try_get::<i64, _>("retries").unwrap_or(0) as u32,
            last_error: row.try_get("last_error").ok(),
        })
    }

    /// Puts a claimed item back to `pending` without counting it as a retry
    /// attempt; used when a politeness check defers a fetch to a later tick.
    pub async fn defer_queue_item(
        &self,
        item_id: &str,
        next_fetch_at: DateTime<Utc>,
    ) -> Result<(), CrawlError> {
        sqlx::query("UPDATE crawl_queue SET status = 'pending', next_fetch_at = ?1 WHERE id = ?2")
            .bind(next_fetch_at.to_rfc3339())
            .bind(item_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;
        Ok(())
    }

    pub async fn complete_queue_item(&self, item_id: &str) -> Result<(), CrawlError> {
        sqlx::query("UPDATE crawl_queue SET status = 'done' WHERE id = ?1")
            .bind(item_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Retries with linear backoff (`retries * retryDelayMs`); after
    /// `MAX_RETRIES` the item is marked permanently failed.
    pub async fn fail_queue_item(&self, item_id: &str, error: &str) -> Result<(), CrawlError> {
        let row = sqlx::query("SELECT retries FROM crawl_queue WHERE id = ?1")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;
        let Some(row) = row else { return Ok(()) };
        let retries: i64 = row.try_get("retries").unwrap_or(0);
        let next_retries = retries + 1;

        if next_retries as u32 >= MAX_RETRIES {
            sqlx::query("UPDATE crawl_queue SET status = 'failed', retries = ?1, last_error = ?2 WHERE id = ?3")
                .bind(next_retries)
                .bind(error)
                .bind(item_id)
                .execute(&self.pool)
                .await
                .map_err(|e| CrawlError::Storage(e.to_string()))?;
        } else {
            let backoff_ms = next_retries * RETRY_DELAY_MS;
            let next_fetch_at = Utc::now() + chrono::Duration::milliseconds(backoff_ms);
            sqlx::query(
                "UPDATE crawl_queue SET status = 'pending', retries = ?1, last_error = ?2, next_fetch_at = ?3 WHERE id = ?4",
            )
            .bind(next_retries)
            .bind(error)
            .bind(next_fetch_at.to_rfc3339())
            .bind(item_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;
        }
        Ok(())
    }
}

fn job_id(seed_urls: &[String], now: DateTime<Utc>) -> String {
    sha256_16(&format!("{}-{}", seed_urls.join(","), now.to_rfc3339()))
}

fn sha256_16(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    format!("{digest:x}")[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_page(id: &str, url: &str) -> Page {
        Page {
            id: id.to_string(),
            url: url.to_string(),
            canonical_url: None,
            title: "Example title".to_string(),
            fetched_at: Utc::now().to_rfc3339(),
            content_hash: "deadbeefdeadbeef".to_string(),
            extractor_version: "v1".to_string(),
            mode: PageMode::Compact,
            source: PageSource::Static,
            headings: vec!["Heading".to_string()],
            key_paragraphs: vec!["Some paragraph text over forty characters long.".to_string()],
            links: vec![Link {
                url: "https://example.com/next".to_string(),
                text: "Next".to_string(),
                rel: None,
                is_internal: true,
            }],
            forms: vec![],
            actions: vec![],
        }
    }

    async fn open_store() -> Store {
        let store = Store::new("sqlite::memory:").await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn save_and_get_page_round_trips_links() {
        let store = open_store().await;
        let page = sample_page("page-1", "https://example.com/");
        store.save_page(&page, None, 0).await.unwrap();

        let loaded = store.get_page_by_id("page-1").await.unwrap().unwrap();
        assert_eq!(loaded.title, "Example title");
        assert_eq!(loaded.links.len(), 1);
        assert_eq!(loaded.links[0].url, "https://example.com/next");
    }

    #[tokio::test]
    async fn repeated_start_creates_distinct_job_ids() {
        let store = open_store().await;
        let options = CrawlOptions::default();
        let seeds = vec!["https://example.com/".to_string()];
        let a = store.create_crawl_job(&seeds, &options).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let b = store.create_crawl_job(&seeds, &options).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_per_job_and_url() {
        let store = open_store().await;
        let job_id = store
            .create_crawl_job(&["https://example.com/".to_string()], &CrawlOptions::default())
            .await
            .unwrap();
        store
            .enqueue_url(&job_id, "https://example.com/a", 0, 100, "example.com")
            .await
            .unwrap();
        store
            .enqueue_url(&job_id, "https://example.com/a", 0, 100, "example.com")
            .await
            .unwrap();

        let status = store.get_crawl_job_status(&job_id).await.unwrap().unwrap();
        assert_eq!(status.stats.queued, 1);
    }

    #[tokio::test]
    async fn claim_orders_by_priority_then_depth() {
        let store = open_store().await;
        let job_id = store
            .create_crawl_job(&["https://example.com/".to_string()], &CrawlOptions::default())
            .await
            .unwrap();
        store
            .enqueue_url(&job_id, "https://example.com/low", 0, 10, "example.com")
            .await
            .unwrap();
        store
            .enqueue_url(&job_id, "https://example.com/high", 1, 90, "example.com")
            .await
            .unwrap();

        let claimed = store.claim_next_queue_item(&job_id).await.unwrap().unwrap();
        assert_eq!(claimed.url, "https://example.com/high");
    }

    #[tokio::test]
    async fn fails_permanently_after_max_retries() {
        let store = open_store().await;
        let job_id = store
            .create_crawl_job(&["https://example.com/".to_string()], &CrawlOptions::default())
            .await
            .unwrap();
        store
            .enqueue_url(&job_id, "https://example.com/flaky", 0, 50, "example.com")
            .await
            .unwrap();

        let mut item = store.claim_next_queue_item(&job_id).await.unwrap().unwrap();
        for _ in 0..MAX_RETRIES {
            store.fail_queue_item(&item.id, "timed out").await.unwrap();
            sqlx::query("UPDATE crawl_queue SET next_fetch_at = ?1 WHERE id = ?2")
                .bind(Utc::now().to_rfc3339())
                .bind(&item.id)
                .execute(store.pool())
                .await
                .unwrap();
            if let Some(next) = store.claim_next_queue_item(&job_id).await.unwrap() {
                item = next;
            } else {
                break;
            }
        }

        let status = store.get_crawl_job_status(&job_id).await.unwrap().unwrap();
        assert_eq!(status.stats.failed, 1);
    }
}
