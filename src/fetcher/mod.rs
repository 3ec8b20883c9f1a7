//! Daily file download into the local cache.
//!
//! Each date is attempted exactly once per run. A failed date is logged to
//! the failure log and left out of the report's `fetched` list; it never
//! aborts the other downloads.

pub mod failure_log;
pub mod http_client;
pub mod naming;

use crate::config::AppConfig;
use crate::error::FetchError;
use crate::models::SourceFile;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use url::Url;

use self::failure_log::FailureLog;
use self::naming::FileNaming;

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable transport: returns the body of a 200 response or why it failed.
#[async_trait]
pub trait DailyFileSource: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError>;
}

// ── Report ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct FetchFailure {
    pub date: NaiveDate,
    pub url: Url,
    pub error: FetchError,
}

#[derive(Debug, Default)]
pub struct FetchReport {
    /// Successfully cached files, in request order.
    pub fetched: Vec<SourceFile>,
    pub failures: Vec<FetchFailure>,
}

// ── Fetcher ───────────────────────────────────────────────────────────────────

pub struct FileFetcher {
    source: Arc<dyn DailyFileSource>,
    naming: FileNaming,
    cache_dir: PathBuf,
    failure_log: Arc<FailureLog>,
    concurrency: usize,
}

impl FileFetcher {
    pub fn new(config: &AppConfig, source: Arc<dyn DailyFileSource>) -> Result<Self> {
        Ok(Self {
            source,
            naming: FileNaming::new(&config.fetcher.base_url, &config.fetcher.file_extension)?,
            cache_dir: config.storage.cache_dir.clone(),
            failure_log: Arc::new(FailureLog::new(&config.storage.failure_log)),
            concurrency: config.pipeline.concurrency.max(1),
        })
    }

    /// Download every date into the cache, overwriting earlier copies.
    pub async fn fetch_all(&self, dates: &[NaiveDate]) -> Result<FetchReport> {
        // Every URL is built up front so no task is spawned for a run that fails.
        let targets = dates
            .iter()
            .map(|&date| Ok((date, self.naming.remote_url(date)?)))
            .collect::<Result<Vec<(NaiveDate, Url)>>>()?;

        std::fs::create_dir_all(&self.cache_dir)
            .with_context(|| format!("Could not create cache dir {:?}", self.cache_dir))?;

        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::new();

        for (date, url) in targets {
            let path = self.cache_dir.join(self.naming.cache_file_name(date));
            let source = Arc::clone(&self.source);
            let log = Arc::clone(&self.failure_log);
            let sem = Arc::clone(&sem);
            let task_url = url.clone();

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire().await?;

                let outcome = match source.fetch(&task_url).await {
                    Ok(bytes) => std::fs::write(&path, &bytes)
                        .map(|_| (path, bytes.len()))
                        .map_err(|e| FetchError::Cache(e.to_string())),
                    Err(e) => Err(e),
                };

                if let Err(e) = &outcome {
                    log.append(&task_url, e).await?;
                }

                Ok::<_, anyhow::Error>(outcome)
            });

            handles.push((date, url, handle));
        }

        let mut report = FetchReport::default();
        for (date, url, handle) in handles {
            match handle.await {
                Ok(Ok(Ok((path, size)))) => {
                    info!("{}: saved {:?} ({} bytes)", date, path, size);
                    report.fetched.push(SourceFile { date, path });
                }
                Ok(Ok(Err(e))) => {
                    warn!("{}: {}", date, FailureLog::line(&url, &e));
                    report.failures.push(FetchFailure { date, url, error: e });
                }
                Ok(Err(e)) => {
                    error!("{}: fetch bookkeeping failed: {:#}", date, e);
                    report.failures.push(FetchFailure {
                        date,
                        url,
                        error: FetchError::Transport(format!("{e:#}")),
                    });
                }
                Err(e) => {
                    error!("Task panic for {}: {}", date, e);
                    report.failures.push(FetchFailure {
                        date,
                        url,
                        error: FetchError::Transport(e.to_string()),
                    });
                }
            }
        }

        info!(
            "Fetched {} of {} files ({} failures logged to {:?})",
            report.fetched.len(),
            dates.len(),
            report.failures.len(),
            self.failure_log.path()
        );
        Ok(report)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
