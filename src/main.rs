mod cli;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use webx_core::config::AppConfig;
use webx_core::{CrawlOptions, JobStatus, PageMode};
use webx_engine::CrawlEngine;
use webx_fetch::StaticFetcher;
use webx_storage::Store;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        warn!(path = %cli.config, "config file not found, using defaults");
        include_str!("../config/default.toml").to_string()
    });
    let config: AppConfig = toml::from_str(&config_str)?;

    let store = Store::new(&config.storage.db_path).await?;
    store.migrate().await?;

    let fetcher = Arc::new(StaticFetcher::new());
    let engine = CrawlEngine::new(store, fetcher, config.general.user_agent.clone());

    match cli.command {
        Commands::Crawl {
            seeds,
            max_depth,
            max_pages,
            mode,
        } => {
            let mut options = config.crawler.clone();
            if let Some(d) = max_depth {
                options.max_depth = d;
            }
            if let Some(p) = max_pages {
                options.max_pages = p;
            }
            if let Some(m) = mode {
                options.mode = m.parse::<PageMode>().unwrap_or(PageMode::Compact);
            }
            run_crawl_to_completion(&engine, seeds, options, config.general.poll_ms).await?;
        }
        Commands::Status { job_id } => {
            print_status(&engine, &job_id).await?;
        }
        Commands::Pages { job_id, limit } => {
            let pages = engine.next(&job_id, limit).await?;
            println!("{}", serde_json::to_string_pretty(&pages)?);
        }
    }

    Ok(())
}

async fn run_crawl_to_completion(
    engine: &CrawlEngine,
    seeds: Vec<String>,
    options: CrawlOptions,
    poll_ms: u64,
) -> Result<()> {
    let options = options.clamped();
    let job_id = engine.start(seeds, Some(options.clone())).await?;
    println!("job: {job_id}");

    loop {
        engine.process_job_once(&job_id, &options).await?;
        let Some(status) = engine.status(&job_id).await? else {
            break;
        };
        info!(
            job_id = %job_id,
            status = %status.status,
            queued = status.stats.queued,
            done = status.stats.done,
            failed = status.stats.failed,
            "tick"
        );
        if matches!(status.status, JobStatus::Finished | JobStatus::Failed) {
            println!("final status: {}", status.status);
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(poll_ms)).await;
    }

    print_status(engine, &job_id).await
}

async fn print_status(engine: &CrawlEngine, job_id: &str) -> Result<()> {
    match engine.status(job_id).await? {
        Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
        None => println!("no such job: {job_id}"),
    }
    Ok(())
}
