use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::client::jsearch::JSearchConfig;
use crate::enrich::EmbedderConfig;
use crate::ingest::IngestConfig;
use crate::scraper::schedule::ScheduleConfig;
use crate::usage::UsageLimits;

#[derive(Parser, Debug, Clone)]
#[command(name = "jobintel", about = "Budget-aware job posting ingestion service")]
pub struct Config {
    /// Database connection URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Run database migrations on startup
    #[arg(long, env = "RUN_MIGRATIONS", default_value = "true")]
    pub run_migrations: bool,

    /// Directory for durable usage and keyword state
    #[arg(long, env = "DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Search provider API key
    #[arg(long, env = "JSEARCH_API_KEY")]
    pub api_key: String,

    /// Search provider base URL
    #[arg(
        long,
        env = "JSEARCH_BASE_URL",
        default_value = "https://api.openwebninja.com/jsearch"
    )]
    pub base_url: String,

    /// Minimum milliseconds between outbound provider calls
    #[arg(long, env = "REQUEST_INTERVAL_MS", default_value = "1000")]
    pub request_interval_ms: u64,

    /// Base backoff in milliseconds for provider retries
    #[arg(long, env = "RETRY_BACKOFF_MS", default_value = "2000")]
    pub retry_backoff_ms: u64,

    /// Attempts per provider call before giving up
    #[arg(long, env = "RETRY_MAX_ATTEMPTS", default_value = "3")]
    pub retry_max_attempts: u32,

    /// Provider request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    /// Monthly provider request budget
    #[arg(long, env = "MONTHLY_BUDGET", default_value = "200")]
    pub monthly_budget: u32,

    /// Warn once this many requests are used in a month
    #[arg(long, env = "USAGE_WARNING_THRESHOLD", default_value = "160")]
    pub usage_warning_threshold: u32,

    /// Refuse outbound calls once this many requests are used
    #[arg(long, env = "USAGE_HARD_STOP_THRESHOLD", default_value = "180")]
    pub usage_hard_stop_threshold: u32,

    /// Days a fetched keyword stays fresh
    #[arg(long, env = "KEYWORD_REFRESH_DAYS", default_value = "7")]
    pub keyword_refresh_days: i64,

    /// Ingestion worker count
    #[arg(long, env = "INGEST_WORKERS", default_value = "4")]
    pub ingest_workers: usize,

    /// Attempts per ingestion task before dead-lettering
    #[arg(long, env = "INGEST_MAX_ATTEMPTS", default_value = "3")]
    pub ingest_max_attempts: u32,

    /// Base backoff in milliseconds between ingestion attempts
    #[arg(long, env = "INGEST_BACKOFF_MS", default_value = "2000")]
    pub ingest_backoff_ms: u64,

    /// Run the cron scheduler in serve mode
    #[arg(long, env = "SCHEDULER_ENABLED", default_value = "true")]
    pub scheduler_enabled: bool,

    /// Cron expression for scheduled full scrapes
    #[arg(long, env = "FULL_SCRAPE_CRON", default_value = "0 0 */6 * * *")]
    pub full_scrape_cron: String,

    /// Cron expression for scheduled subset scrapes
    #[arg(long, env = "SUBSET_SCRAPE_CRON", default_value = "0 0 */3 * * *")]
    pub subset_scrape_cron: String,

    /// Cron expression for run history cleanup
    #[arg(long, env = "CLEANUP_CRON", default_value = "0 0 2 * * *")]
    pub cleanup_cron: String,

    /// Days of finished run history to keep
    #[arg(long, env = "RUN_RETENTION_DAYS", default_value = "30")]
    pub run_retention_days: i64,

    /// Embeddings API base URL
    #[arg(
        long,
        env = "EMBEDDINGS_BASE_URL",
        default_value = "https://api.openai.com/v1"
    )]
    pub embeddings_base_url: String,

    /// Embeddings API key
    #[arg(long, env = "EMBEDDINGS_API_KEY")]
    pub embeddings_api_key: String,

    /// Embeddings model name
    #[arg(
        long,
        env = "EMBEDDINGS_MODEL",
        default_value = "text-embedding-3-small"
    )]
    pub embeddings_model: String,

    /// Matching service endpoint; matching is skipped when unset
    #[arg(long, env = "MATCHER_URL")]
    pub matcher_url: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the web server (default when no subcommand given)
    Serve {
        /// Listen address
        #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
        listen_addr: String,
    },
    /// Run one scrape to completion, drain the queue, and exit
    Scrape {
        /// Use the subset spec list instead of the full one
        #[arg(long)]
        subset: bool,
    },
    /// Probe the provider and the database, then exit
    Health,
}

impl Config {
    /// Resolve the command, defaulting to Serve if none specified.
    pub fn resolved_command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve {
            listen_addr: std::env::var("LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        })
    }

    pub fn client_config(&self) -> JSearchConfig {
        JSearchConfig {
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            min_interval: Duration::from_millis(self.request_interval_ms),
            backoff_base: Duration::from_millis(self.retry_backoff_ms),
            max_attempts: self.retry_max_attempts,
            timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn usage_limits(&self) -> UsageLimits {
        UsageLimits {
            budget: self.monthly_budget,
            warning_threshold: self.usage_warning_threshold,
            hard_stop_threshold: self.usage_hard_stop_threshold,
        }
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            workers: self.ingest_workers,
            max_attempts: self.ingest_max_attempts,
            backoff_base: Duration::from_millis(self.ingest_backoff_ms),
        }
    }

    pub fn schedule_config(&self) -> ScheduleConfig {
        ScheduleConfig {
            full_cron: self.full_scrape_cron.clone(),
            subset_cron: self.subset_scrape_cron.clone(),
            cleanup_cron: self.cleanup_cron.clone(),
            run_retention_days: self.run_retention_days,
        }
    }

    pub fn embedder_config(&self) -> EmbedderConfig {
        EmbedderConfig {
            base_url: self.embeddings_base_url.clone(),
            api_key: self.embeddings_api_key.clone(),
            model: self.embeddings_model.clone(),
        }
    }
}
