use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    /// Path to the per-provider scraper key pools YAML file.
    pub keys_path: PathBuf,
    pub aggregator_base_url: String,
    pub rapidapi_base_url: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub scraper_request_timeout_secs: u64,
    pub scraper_max_per_key_retries: u32,
    pub scraper_page_size: u32,
    pub scraper_inter_request_delay_ms: u64,
    pub refresh_batch_size: usize,
    pub refresh_max_concurrent_handles: usize,
    pub refresh_wall_clock_budget_secs: u64,
    pub snapshot_window_days: i64,
    /// Accrual values for days strictly before this date are masked to zero.
    pub accrual_cutoff: Option<NaiveDate>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("keys_path", &self.keys_path)
            .field("database_url", &"[redacted]")
            .field("aggregator_base_url", &self.aggregator_base_url)
            .field("rapidapi_base_url", &self.rapidapi_base_url)
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field(
                "scraper_request_timeout_secs",
                &self.scraper_request_timeout_secs,
            )
            .field(
                "scraper_max_per_key_retries",
                &self.scraper_max_per_key_retries,
            )
            .field("scraper_page_size", &self.scraper_page_size)
            .field(
                "scraper_inter_request_delay_ms",
                &self.scraper_inter_request_delay_ms,
            )
            .field("refresh_batch_size", &self.refresh_batch_size)
            .field(
                "refresh_max_concurrent_handles",
                &self.refresh_max_concurrent_handles,
            )
            .field(
                "refresh_wall_clock_budget_secs",
                &self.refresh_wall_clock_budget_secs,
            )
            .field("snapshot_window_days", &self.snapshot_window_days)
            .field("accrual_cutoff", &self.accrual_cutoff)
            .finish()
    }
}
