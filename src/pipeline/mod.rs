//! Pipeline orchestrator: ties fetcher → parser → consolidation → exports.
//!
//! ## Run modes
//!
//! `run()`, daily mode:
//!   1. Resolve the last N business days before `today`
//!   2. Download each day's workbook into the cache (failures go to the log)
//!   3. Parse, classify and consolidate the files fetched in this run
//!   4. Write both workbook exports and the rate series
//!   5. Upsert into DuckDB and log the run there
//!
//! `rebuild_from_cache()`: steps 3 to 5 over every workbook already cached,
//!   without touching the network.
//!
//! When no file contributes a single valid sheet the run stops with
//! [`PipelineError::NothingToProcess`] and nothing is exported. Step 5 never
//! fails a run: a storage error is logged and kept in [`PipelineStats`].

use crate::aggregate::{AggregatedSeries, mean_indicative_rates, write_series_csv};
use crate::calendar::DateWindowResolver;
use crate::config::AppConfig;
use crate::consolidate::export::write_exports;
use crate::consolidate::{ConsolidatedDataset, FileConsolidator};
use crate::error::PipelineError;
use crate::fetcher::http_client::HttpClient;
use crate::fetcher::{DailyFileSource, FetchReport, FileFetcher};
use crate::loader::discover_cached_files;
use crate::models::SourceFile;
use crate::parser::SheetParser;
use crate::storage::{Repository, RunTotals};
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

pub struct Pipeline {
    config: AppConfig,
    source: Arc<dyn DailyFileSource>,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Result<Self> {
        let client = HttpClient::new(&config.fetcher).context("Failed to build HTTP client")?;
        Ok(Self::with_source(config, Arc::new(client)))
    }

    pub fn with_source(config: AppConfig, source: Arc<dyn DailyFileSource>) -> Self {
        Self { config, source }
    }

    /// Steps 1 and 2 only.
    pub async fn fetch(&self, today: NaiveDate) -> Result<FetchReport> {
        let dates = DateWindowResolver::new(self.config.fetcher.window_days).resolve(today);
        info!(
            "=== Fetching {} business days before {}: {:?} ===",
            dates.len(),
            today,
            dates
        );

        let fetcher = FileFetcher::new(&self.config, Arc::clone(&self.source))?;
        fetcher.fetch_all(&dates).await
    }

    pub async fn run(&self, today: NaiveDate) -> Result<PipelineStats> {
        let started_at = Utc::now().naive_utc();
        let report = self.fetch(today).await?;
        let failures = report.failures.len();
        let mut totals = RunTotals {
            dates_requested: report.fetched.len() + failures,
            files_fetched: report.fetched.len(),
            records_loaded: 0,
        };

        let mut stats = match self.process(&report.fetched) {
            Ok(stats) => stats,
            Err(e) => {
                let run = (started_at, &totals, Some(format!("{e:#}")));
                if let Err(store_err) = self.store(None, Some(run)) {
                    warn!("Run not logged in DuckDB: {:#}", store_err);
                }
                return Err(e);
            }
        };

        totals.records_loaded = stats.records;
        let note = (failures > 0).then(|| format!("{failures} fetch failures"));
        self.store_into(&mut stats, Some((started_at, &totals, note)));

        stats.dates_requested = totals.dates_requested;
        stats.files_fetched = totals.files_fetched;
        stats.fetch_failures = failures;
        Ok(stats)
    }

    /// Re-consolidate everything already in the cache directory.
    pub fn rebuild_from_cache(&self) -> Result<PipelineStats> {
        let files = discover_cached_files(
            &self.config.storage.cache_dir,
            &self.config.fetcher.file_extension,
        )?;
        info!("Found {} cached files in {:?}", files.len(), self.config.storage.cache_dir);

        let mut stats = self.process(&files)?;
        stats.files_fetched = files.len();
        self.store_into(&mut stats, None);
        Ok(stats)
    }

    /// Steps 3 and 4 over `files`.
    fn process(&self, files: &[SourceFile]) -> Result<PipelineStats> {
        info!("=== Consolidating {} files ===", files.len());
        let consolidator = FileConsolidator::new(SheetParser::new(self.config.parser));
        let consolidation = consolidator.consolidate(files);
        let dataset = consolidation.dataset;

        if dataset.has_no_sheets() {
            warn!("No file contained the required columns; nothing exported");
            return Err(PipelineError::NothingToProcess.into());
        }

        let storage = &self.config.storage;
        write_exports(&dataset, &storage.partitioned_export, &storage.flat_export)?;

        let series = mean_indicative_rates(dataset.records(), None);
        write_series_csv(&series, &storage.series_export)?;

        let stats = PipelineStats {
            sheets_parsed: consolidation.report.sheets_parsed,
            sheets_rejected: consolidation.report.rejected.len(),
            files_skipped: consolidation.report.files_skipped,
            records: dataset.len(),
            duplicates_dropped: dataset.duplicates_dropped(),
            dataset,
            series,
            ..Default::default()
        };

        info!(
            "=== Done: {} records | {} sheets | {} rejected | {} duplicates ===",
            stats.records, stats.sheets_parsed, stats.sheets_rejected, stats.duplicates_dropped
        );
        Ok(stats)
    }

    /// Step 5 for a processed dataset; failures are recorded on `stats`.
    fn store_into(&self, stats: &mut PipelineStats, run: Option<RunLog<'_>>) {
        match self.store(Some(&stats.dataset), run) {
            Ok(stored) => stats.records_stored = stored,
            Err(e) => {
                warn!("DuckDB not updated, exports are intact: {:#}", e);
                stats.storage_error = Some(format!("{e:#}"));
            }
        }
    }

    fn store(&self, dataset: Option<&ConsolidatedDataset>, run: Option<RunLog<'_>>) -> Result<usize> {
        let db_path = &self.config.storage.db_path;
        let repo = Repository::open(db_path).context("Failed to open DuckDB")?;
        if self.config.storage.run_migrations {
            repo.run_migrations()?;
        }

        let stored = match dataset {
            Some(dataset) => repo.upsert_dataset(dataset)?,
            None => 0,
        };
        info!("{} records upserted into {:?}", stored, db_path);

        if let Some((started_at, totals, error)) = run {
            repo.record_fetch_run(started_at, totals, error.as_deref())?;
        }
        Ok(stored)
    }
}

/// Start time, totals and failure note of a daily run.
type RunLog<'a> = (NaiveDateTime, &'a RunTotals, Option<String>);

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub dates_requested: usize,
    pub files_fetched: usize,
    pub fetch_failures: usize,
    pub files_skipped: usize,
    pub sheets_parsed: usize,
    pub sheets_rejected: usize,
    pub records: usize,
    pub duplicates_dropped: usize,
    pub records_stored: usize,
    /// Why DuckDB could not be updated, when it could not.
    pub storage_error: Option<String>,
    pub dataset: ConsolidatedDataset,
    pub series: AggregatedSeries,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidate::export::load_records;
    use crate::fetcher::tests::StubSource;
    use crate::models::IndexCategory;
    use crate::parser::REQUIRED_COLUMNS;
    use rust_xlsxwriter::Workbook;
    use std::path::Path;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    /// A provider-shaped workbook: each sheet has 7 preamble rows, the header,
    /// a separator, the rows, a separator and a footnote.
    fn provider_workbook(sheets: &[(&str, Vec<(&str, f64)>)]) -> Vec<u8> {
        let mut wb = Workbook::new();
        for (name, rows) in sheets {
            let ws = wb.add_worksheet();
            ws.set_name(*name).unwrap();
            ws.write_string(0, 0, "ANBIMA - Mercado Secundário de Debêntures").unwrap();
            for (col, header) in REQUIRED_COLUMNS.iter().enumerate() {
                ws.write_string(7, col as u16, *header).unwrap();
            }
            let mut row = 9u32;
            for (code, rate) in rows.iter() {
                ws.write_string(row, 0, *code).unwrap();
                ws.write_string(row, 1, format!("Debenture {code}")).unwrap();
                ws.write_number(row, 2, 1000.25).unwrap();
                ws.write_string(row, 3, "--").unwrap();
                ws.write_number(row, 4, 6.0).unwrap();
                ws.write_number(row, 5, *rate).unwrap();
                row += 1;
            }
            // `row` stays empty: the second blank-code row ends the data.
            ws.write_string(row + 1, 1, "(*) Fonte: ANBIMA").unwrap();
        }
        wb.save_to_buffer().unwrap()
    }

    fn config(dir: &Path) -> AppConfig {
        let mut config = AppConfig::rooted_at(dir);
        config.fetcher.base_url = "https://example.com/arqs/".into();
        config
    }

    fn source() -> StubSource {
        let mut source = StubSource::default();
        source.bodies.insert(
            "https://example.com/arqs/d24jan05.xls".into(),
            provider_workbook(&[
                ("IPCA_SPREAD", vec![("AAAA11", 6.0), ("BBBB12", 8.0)]),
                ("DI_PERCENTUAL", vec![("CCCC13", 105.0)]),
                ("VENCIDOS_ANTECIPADAMENTE", vec![("OLD001", 99.0)]),
            ]),
        );
        source.bodies.insert(
            "https://example.com/arqs/d24jan04.xls".into(),
            provider_workbook(&[("IPCA_SPREAD", vec![("AAAA11", 5.0)])]),
        );
        source
    }

    #[tokio::test]
    async fn test_daily_run_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let pipeline = Pipeline::with_source(cfg.clone(), Arc::new(source()));

        // Monday: window is Fri 5 .. Mon 1; only the 5th and 4th exist.
        let stats = pipeline.run(d(8)).await.unwrap();

        assert_eq!(stats.dates_requested, 5);
        assert_eq!(stats.files_fetched, 2);
        assert_eq!(stats.fetch_failures, 3);
        assert_eq!(stats.sheets_parsed, 4);
        assert_eq!(stats.records, 5);
        assert_eq!(stats.records_stored, 5);
        assert_eq!(stats.storage_error, None);

        let log = std::fs::read_to_string(&cfg.storage.failure_log).unwrap();
        assert_eq!(log.lines().count(), 3);
        assert!(log.contains("d24jan03.xls - Código de Status: 404"));

        assert_eq!(stats.series.mean(IndexCategory::IpcaSpread, d(5)), Some(7.0));
        assert_eq!(stats.series.mean(IndexCategory::IpcaSpread, d(4)), Some(5.0));
        assert_eq!(stats.series.mean(IndexCategory::DiPercent, d(5)), Some(105.0));
        assert!(stats.series.points(IndexCategory::MaturedEarly).is_empty());

        let flat = load_records(&cfg.storage.flat_export).unwrap();
        let partitioned = load_records(&cfg.storage.partitioned_export).unwrap();
        assert_eq!(flat.len(), 5);
        assert_eq!(flat, partitioned);
        assert!(flat.iter().all(|r| r.buy_rate.is_none() && r.sell_rate == Some(6.0)));

        let repo = Repository::open(&cfg.storage.db_path).unwrap();
        assert_eq!(repo.record_count().unwrap(), 5);
        assert_eq!(repo.last_run_status().unwrap().as_deref(), Some("error"));
        assert!(cfg.storage.series_export.exists());
    }

    #[tokio::test]
    async fn test_nothing_fetched_is_terminal_and_exports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let pipeline = Pipeline::with_source(cfg.clone(), Arc::new(StubSource::default()));

        let err = pipeline.run(d(8)).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::NothingToProcess)
        ));
        assert!(!cfg.storage.partitioned_export.exists());
        assert!(!cfg.storage.flat_export.exists());

        let log = std::fs::read_to_string(&cfg.storage.failure_log).unwrap();
        assert_eq!(log.lines().count(), 5);

        let repo = Repository::open(&cfg.storage.db_path).unwrap();
        assert_eq!(repo.last_run_status().unwrap().as_deref(), Some("error"));
        assert_eq!(repo.record_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unusable_database_does_not_stop_exports() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        // A directory where the database file should be cannot be opened.
        std::fs::create_dir_all(&cfg.storage.db_path).unwrap();
        let pipeline = Pipeline::with_source(cfg.clone(), Arc::new(source()));

        let stats = pipeline.run(d(8)).await.unwrap();

        assert_eq!(stats.records, 5);
        assert_eq!(stats.records_stored, 0);
        assert!(stats.storage_error.is_some());
        assert_eq!(load_records(&cfg.storage.flat_export).unwrap().len(), 5);
        assert_eq!(load_records(&cfg.storage.partitioned_export).unwrap().len(), 5);
        assert!(cfg.storage.series_export.exists());
    }

    #[tokio::test]
    async fn test_rebuild_from_cache_uses_cached_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        Pipeline::with_source(cfg.clone(), Arc::new(source()))
            .fetch(d(8))
            .await
            .unwrap();

        let offline = Pipeline::with_source(cfg.clone(), Arc::new(StubSource::default()));
        let stats = offline.rebuild_from_cache().unwrap();
        assert_eq!(stats.files_fetched, 2);
        assert_eq!(stats.records, 5);
        assert_eq!(
            stats.dataset.dates().into_iter().collect::<Vec<_>>(),
            vec![d(4), d(5)]
        );
    }
}
