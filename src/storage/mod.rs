use crate::consolidate::ConsolidatedDataset;
use crate::models::IndexCategory;
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use duckdb::{Connection, params};
use std::path::Path;
use tracing::info;

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS fetch_run_ids START 1;

CREATE TABLE IF NOT EXISTS debenture_prices (
    security_code   VARCHAR  NOT NULL,
    date            DATE     NOT NULL,
    index_category  VARCHAR  NOT NULL,
    name            VARCHAR  NOT NULL DEFAULT '',
    unit_price      DOUBLE,
    buy_rate        DOUBLE,
    sell_rate       DOUBLE,
    indicative_rate DOUBLE,
    source_sheet    VARCHAR  NOT NULL,
    loaded_at       TIMESTAMP NOT NULL,
    PRIMARY KEY (security_code, date, index_category)
);

CREATE TABLE IF NOT EXISTS fetch_runs (
    id               INTEGER PRIMARY KEY DEFAULT nextval('fetch_run_ids'),
    started_at       TIMESTAMP NOT NULL,
    finished_at      TIMESTAMP,
    status           VARCHAR NOT NULL DEFAULT 'running',
    dates_requested  INTEGER DEFAULT 0,
    files_fetched    INTEGER DEFAULT 0,
    records_loaded   INTEGER DEFAULT 0,
    error_msg        VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_prices_date     ON debenture_prices (date);
CREATE INDEX IF NOT EXISTS idx_prices_category ON debenture_prices (index_category);
"#;

/// Per-run bookkeeping written to `fetch_runs` when a run ends.
#[derive(Debug, Clone, Default)]
pub struct RunTotals {
    pub dates_requested: usize,
    pub files_fetched: usize,
    pub records_loaded: usize,
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute_batch(INDEXES).context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Prices ────────────────────────────────────────────────────────────────

    /// Upsert every record of the dataset. Re-running with the same data is a no-op.
    pub fn upsert_dataset(&self, dataset: &ConsolidatedDataset) -> Result<usize> {
        if dataset.len() == 0 {
            return Ok(0);
        }

        let now = Utc::now().naive_utc();
        let tx = self.conn.unchecked_transaction()?;
        let sql = r#"
            INSERT INTO debenture_prices
                (security_code, date, index_category, name, unit_price, buy_rate,
                 sell_rate, indicative_rate, source_sheet, loaded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (security_code, date, index_category) DO UPDATE SET
                name            = excluded.name,
                unit_price      = excluded.unit_price,
                buy_rate        = excluded.buy_rate,
                sell_rate       = excluded.sell_rate,
                indicative_rate = excluded.indicative_rate,
                source_sheet    = excluded.source_sheet,
                loaded_at       = excluded.loaded_at
        "#;

        let mut n = 0usize;
        for partition in dataset.partitions() {
            for r in &partition.records {
                tx.execute(sql, params![
                    r.security_code, r.date, r.index_category.label(), r.name,
                    r.unit_price, r.buy_rate, r.sell_rate, r.indicative_rate,
                    partition.key.sheet, now,
                ]).with_context(|| format!("upsert {} {}", r.security_code, r.date))?;
                n += 1;
            }
        }

        tx.commit()?;
        Ok(n)
    }

    pub fn record_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM debenture_prices")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn date_range(&self) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        let mut s = self.conn.prepare("SELECT MIN(date), MAX(date) FROM debenture_prices")?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    /// Record count per index category, in category order.
    pub fn category_counts(&self) -> Result<Vec<(IndexCategory, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT index_category, COUNT(*) FROM debenture_prices GROUP BY index_category",
        )?;
        let mut counts: Vec<(IndexCategory, i64)> = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
            .filter_map(|r| r.ok())
            .map(|(label, n)| (IndexCategory::from_label(&label).unwrap_or(IndexCategory::Unknown), n))
            .collect();
        counts.sort();
        Ok(counts)
    }

    pub fn list_dates(&self) -> Result<Vec<NaiveDate>> {
        let mut stmt = self.conn.prepare("SELECT DISTINCT date FROM debenture_prices ORDER BY date")?;
        let dates: Vec<NaiveDate> = stmt
            .query_map([], |r| r.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(dates)
    }

    // ── Run log ───────────────────────────────────────────────────────────────

    /// Log a finished run; `error` set means the run is stored as failed.
    pub fn record_fetch_run(
        &self,
        started_at: NaiveDateTime,
        totals: &RunTotals,
        error: Option<&str>,
    ) -> Result<i64> {
        let id: i64 = self.conn.query_row(
            r#"INSERT INTO fetch_runs
               (started_at, finished_at, status, dates_requested, files_fetched, records_loaded, error_msg)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               RETURNING id"#,
            params![
                started_at,
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                totals.dates_requested as i64,
                totals.files_fetched as i64,
                totals.records_loaded as i64,
                error,
            ],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn last_run_status(&self) -> Result<Option<String>> {
        let mut s = self.conn.prepare("SELECT status FROM fetch_runs ORDER BY id DESC LIMIT 1")?;
        Ok(s.query_row([], |r| r.get(0)).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CanonicalRecord, SheetKey};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn dataset(rate: f64) -> ConsolidatedDataset {
        let mut ds = ConsolidatedDataset::new();
        let rec = |code: &str, day: u32, cat| CanonicalRecord {
            security_code: code.into(),
            name: format!("Debenture {code}"),
            unit_price: Some(1000.0),
            buy_rate: None,
            sell_rate: None,
            indicative_rate: Some(rate),
            date: d(day),
            index_category: cat,
        };
        ds.insert_sheet(
            SheetKey::new(d(4), "IPCA_SPREAD"),
            vec![rec("AAAA11", 4, IndexCategory::IpcaSpread), rec("BBBB12", 4, IndexCategory::IpcaSpread)],
        );
        ds.insert_sheet(
            SheetKey::new(d(5), "DI_SPREAD"),
            vec![rec("AAAA11", 5, IndexCategory::DiSpread)],
        );
        ds
    }

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let repo = repo();
        assert_eq!(repo.upsert_dataset(&dataset(6.0)).unwrap(), 3);
        assert_eq!(repo.upsert_dataset(&dataset(7.0)).unwrap(), 3);
        assert_eq!(repo.record_count().unwrap(), 3);

        let rate: f64 = repo
            .conn
            .query_row(
                "SELECT indicative_rate FROM debenture_prices WHERE security_code = 'AAAA11' AND date = ?",
                params![d(5)],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(rate, 7.0);
    }

    #[test]
    fn test_summaries() {
        let repo = repo();
        repo.upsert_dataset(&dataset(6.0)).unwrap();

        assert_eq!(repo.date_range().unwrap(), (Some(d(4)), Some(d(5))));
        assert_eq!(repo.list_dates().unwrap(), vec![d(4), d(5)]);
        assert_eq!(
            repo.category_counts().unwrap(),
            vec![(IndexCategory::IpcaSpread, 2), (IndexCategory::DiSpread, 1)]
        );
    }

    #[test]
    fn test_fetch_run_log() {
        let repo = repo();
        let started = Utc::now().naive_utc();
        let totals = RunTotals { dates_requested: 5, files_fetched: 5, records_loaded: 120 };

        let first = repo.record_fetch_run(started, &totals, None).unwrap();
        assert_eq!(repo.last_run_status().unwrap().as_deref(), Some("success"));

        let second = repo.record_fetch_run(started, &totals, Some("2 fetch failures")).unwrap();
        assert!(second > first);
        assert_eq!(repo.last_run_status().unwrap().as_deref(), Some("error"));
    }

    #[test]
    fn test_migrations_can_rerun() {
        let repo = repo();
        repo.run_migrations().unwrap();
        assert_eq!(repo.record_count().unwrap(), 0);
    }
}
