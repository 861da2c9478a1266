use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "webx", about = "Local web-automation crawl engine")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a crawl job from one or more seed URLs
    Crawl {
        /// Seed URLs (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        seeds: Vec<String>,

        /// Maximum crawl depth
        #[arg(long)]
        max_depth: Option<u32>,

        /// Maximum pages to fetch
        #[arg(long)]
        max_pages: Option<u32>,

        /// Extraction mode: compact or full
        #[arg(long)]
        mode: Option<String>,
    },
    /// Show a crawl job's status
    Status {
        /// Job id returned by `crawl`
        job_id: String,
    },
    /// List extracted pages for a job
    Pages {
        /// Job id returned by `crawl`
        job_id: String,

        /// Max pages to print
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}
