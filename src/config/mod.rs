use crate::calendar::DEFAULT_WINDOW_DAYS;
use crate::parser::FramePolicy;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub parser: FramePolicy,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Provider endpoint and HTTP client settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetcherConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_file_extension")]
    pub file_extension: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Business days fetched per run.
    #[serde(default = "default_window_days")]
    pub window_days: usize,
}

/// Every path the pipeline reads or writes
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// One sheet per (file, source sheet).
    #[serde(default = "default_partitioned_export")]
    pub partitioned_export: PathBuf,

    /// All records on a single sheet.
    #[serde(default = "default_flat_export")]
    pub flat_export: PathBuf,

    #[serde(default = "default_series_export")]
    pub series_export: PathBuf,

    #[serde(default = "default_failure_log")]
    pub failure_log: PathBuf,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Simultaneous downloads.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://www.anbima.com.br/informacoes/merc-sec-debentures/arqs/".to_string()
}
fn default_file_extension() -> String {
    ".xls".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_request_delay_ms() -> u64 {
    250
}
fn default_user_agent() -> String {
    "debenture-rates/0.1 (daily secondary-market price consolidation)".to_string()
}
fn default_window_days() -> usize {
    DEFAULT_WINDOW_DAYS
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("Daily Prices")
}
fn default_partitioned_export() -> PathBuf {
    PathBuf::from("consolidated_data.xlsx")
}
fn default_flat_export() -> PathBuf {
    PathBuf::from("consolidated_data_single_sheet.xlsx")
}
fn default_series_export() -> PathBuf {
    PathBuf::from("indicative_rate_series.csv")
}
fn default_failure_log() -> PathBuf {
    PathBuf::from("log.txt")
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/debentures.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_concurrency() -> usize {
    1
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            file_extension: default_file_extension(),
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            user_agent: default_user_agent(),
            window_days: default_window_days(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            partitioned_export: default_partitioned_export(),
            flat_export: default_flat_export(),
            series_export: default_series_export(),
            failure_log: default_failure_log(),
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("DEBENTURES").separator("__"))
            .build()?;

        Ok(cfg.try_deserialize()?)
    }

    /// Every path rooted under `dir`; used by tests and ad-hoc runs.
    pub fn rooted_at(dir: &std::path::Path) -> Self {
        let mut cfg = Self::default();
        let s = &mut cfg.storage;
        s.cache_dir = dir.join(&s.cache_dir);
        s.partitioned_export = dir.join(&s.partitioned_export);
        s.flat_export = dir.join(&s.flat_export);
        s.series_export = dir.join(&s.series_export);
        s.failure_log = dir.join(&s.failure_log);
        s.db_path = dir.join(&s.db_path);
        cfg
    }
}
