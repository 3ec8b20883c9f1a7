//! Consolidation: every accepted sheet of every cached file → one dataset.
//!
//! Records are grouped in partitions keyed by (file date, sheet name), in the
//! order files and sheets were read. A record whose
//! `(security_code, date, index_category)` is already present is dropped,
//! so the dataset never holds two records with the same identity.

pub mod export;

use crate::error::SheetError;
use crate::loader::extract_date_from_filename;
use crate::models::{CanonicalRecord, RawSheet, RecordKey, SheetKey, SourceFile};
use crate::parser::workbook::read_workbook;
use crate::parser::{SheetParser, classify_sheet};
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

// ── Dataset ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub key: SheetKey,
    pub records: Vec<CanonicalRecord>,
}

#[derive(Debug, Default, Clone)]
pub struct ConsolidatedDataset {
    partitions: Vec<Partition>,
    index: HashMap<SheetKey, usize>,
    keys: HashSet<RecordKey>,
    duplicates_dropped: usize,
}

impl ConsolidatedDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sheet's records; returns how many were kept.
    ///
    /// An accepted sheet always gets a partition, even when it holds no rows.
    pub fn insert_sheet(&mut self, key: SheetKey, records: Vec<CanonicalRecord>) -> usize {
        let slot = match self.index.get(&key) {
            Some(&i) => i,
            None => {
                self.partitions.push(Partition {
                    key: key.clone(),
                    records: Vec::new(),
                });
                self.index.insert(key.clone(), self.partitions.len() - 1);
                self.partitions.len() - 1
            }
        };

        let mut kept = 0;
        for record in records {
            if self.keys.insert(record.key()) {
                self.partitions[slot].records.push(record);
                kept += 1;
            } else {
                warn!(
                    "Duplicate {} / {} / {} in {}; keeping the first occurrence",
                    record.security_code,
                    record.date,
                    record.index_category,
                    key.partition_name()
                );
                self.duplicates_dropped += 1;
            }
        }
        kept
    }

    /// Rebuild a dataset from flat records, one partition per (date, category).
    pub fn from_records(records: impl IntoIterator<Item = CanonicalRecord>) -> Self {
        let mut grouped: Vec<(SheetKey, Vec<CanonicalRecord>)> = Vec::new();
        for record in records {
            let key = SheetKey::new(record.date, record.index_category.label());
            match grouped.iter_mut().find(|(k, _)| *k == key) {
                Some((_, rows)) => rows.push(record),
                None => grouped.push((key, vec![record])),
            }
        }

        let mut dataset = Self::new();
        for (key, rows) in grouped {
            dataset.insert_sheet(key, rows);
        }
        dataset
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// All records, partition by partition.
    pub fn records(&self) -> impl Iterator<Item = &CanonicalRecord> {
        self.partitions.iter().flat_map(|p| p.records.iter())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when no sheet was accepted at all. A dataset whose accepted
    /// sheets are all empty still has sheets, even with `len() == 0`.
    pub fn has_no_sheets(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn duplicates_dropped(&self) -> usize {
        self.duplicates_dropped
    }

    pub fn dates(&self) -> BTreeSet<NaiveDate> {
        self.records().map(|r| r.date).collect()
    }

    /// Records whose date is in `dates`; `None` keeps everything.
    pub fn filter_dates<'a>(
        &'a self,
        dates: Option<&'a BTreeSet<NaiveDate>>,
    ) -> impl Iterator<Item = &'a CanonicalRecord> + 'a {
        self.records()
            .filter(move |r| dates.is_none_or(|set| set.contains(&r.date)))
    }
}

// ── Consolidator ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedSheet {
    pub key: SheetKey,
    pub error: SheetError,
}

#[derive(Debug, Default)]
pub struct ConsolidationReport {
    pub files_read: usize,
    pub files_skipped: usize,
    pub sheets_parsed: usize,
    pub rejected: Vec<RejectedSheet>,
}

#[derive(Debug)]
pub struct Consolidation {
    pub dataset: ConsolidatedDataset,
    pub report: ConsolidationReport,
}

pub struct FileConsolidator {
    parser: SheetParser,
}

impl FileConsolidator {
    pub fn new(parser: SheetParser) -> Self {
        Self { parser }
    }

    /// Parse and merge every file. Unreadable files and rejected sheets are
    /// logged and skipped; they never abort the others.
    pub fn consolidate(&self, files: &[SourceFile]) -> Consolidation {
        let mut dataset = ConsolidatedDataset::new();
        let mut report = ConsolidationReport::default();

        for file in files {
            let Some(date) = extract_date_from_filename(&file.path) else {
                warn!("Skipping {:?}: file name does not encode a date", file.path);
                report.files_skipped += 1;
                continue;
            };

            match read_workbook(&file.path) {
                Ok(sheets) => {
                    report.files_read += 1;
                    self.add_sheets(&mut dataset, &mut report, date, &sheets);
                }
                Err(e) => {
                    warn!("Skipping {:?}: {:#}", file.path, e);
                    report.files_skipped += 1;
                }
            }
        }

        info!(
            "Consolidated {} records from {} sheets of {} files ({} sheets rejected, {} duplicates dropped)",
            dataset.len(),
            report.sheets_parsed,
            report.files_read,
            report.rejected.len(),
            dataset.duplicates_dropped()
        );

        Consolidation { dataset, report }
    }

    /// Parse, classify and stamp the sheets of one file dated `date`.
    pub fn add_sheets(
        &self,
        dataset: &mut ConsolidatedDataset,
        report: &mut ConsolidationReport,
        date: NaiveDate,
        sheets: &[RawSheet],
    ) {
        for sheet in sheets {
            let key = SheetKey::new(date, sheet.name.clone());
            match self.parser.parse(sheet) {
                Ok(parsed) => {
                    let category = classify_sheet(&parsed.name);
                    let records: Vec<CanonicalRecord> = parsed
                        .rows
                        .into_iter()
                        .map(|row| row.into_record(date, category))
                        .collect();
                    let kept = dataset.insert_sheet(key.clone(), records);
                    debug!("{}: {} records ({})", key.partition_name(), kept, category);
                    report.sheets_parsed += 1;
                }
                Err(error) => {
                    warn!("Sheet {} rejected: {}", key.partition_name(), error);
                    report.rejected.push(RejectedSheet { key, error });
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::IndexCategory;
    use crate::parser::REQUIRED_COLUMNS;

    pub(crate) fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    /// Provider-shaped sheet: preamble, header, separator, rows, separator, footnote.
    pub(crate) fn provider_sheet(name: &str, rows: &[(&str, &str)]) -> RawSheet {
        let mut grid: Vec<Vec<String>> = (0..7).map(|i| vec![format!("preamble {i}")]).collect();
        grid.push(REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect());
        grid.push(vec![]);
        for (code, rate) in rows {
            grid.push(vec![
                code.to_string(),
                format!("Debenture {code}"),
                "1000.5".into(),
                "6.1".into(),
                "6.0".into(),
                rate.to_string(),
            ]);
        }
        grid.push(vec![]);
        grid.push(vec!["Fonte: ANBIMA".into()]);
        RawSheet::new(name, grid)
    }

    fn consolidate(files: &[(NaiveDate, Vec<RawSheet>)]) -> (ConsolidatedDataset, ConsolidationReport) {
        let consolidator = FileConsolidator::new(SheetParser::default());
        let mut dataset = ConsolidatedDataset::new();
        let mut report = ConsolidationReport::default();
        for (date, sheets) in files {
            consolidator.add_sheets(&mut dataset, &mut report, *date, sheets);
        }
        (dataset, report)
    }

    #[test]
    fn test_records_are_stamped_with_file_date_and_category() {
        let (dataset, report) = consolidate(&[(
            d(2024, 1, 5),
            vec![
                provider_sheet("IPCA_SPREAD", &[("AAAA11", "6.5")]),
                provider_sheet("DI_PERCENTUAL", &[("BBBB12", "105.0"), ("CCCC13", "")]),
            ],
        )]);

        assert_eq!(report.sheets_parsed, 2);
        assert_eq!(dataset.len(), 3);
        let stamped: Vec<(&str, NaiveDate, IndexCategory)> = dataset
            .records()
            .map(|r| (r.security_code.as_str(), r.date, r.index_category))
            .collect();
        assert_eq!(
            stamped,
            vec![
                ("AAAA11", d(2024, 1, 5), IndexCategory::IpcaSpread),
                ("BBBB12", d(2024, 1, 5), IndexCategory::DiPercent),
                ("CCCC13", d(2024, 1, 5), IndexCategory::DiPercent),
            ]
        );
    }

    #[test]
    fn test_rejected_sheet_is_isolated() {
        let resumo = RawSheet::new("Resumo", vec![vec!["x".into()]; 10]);
        let (dataset, report) = consolidate(&[(
            d(2024, 1, 5),
            vec![resumo, provider_sheet("DI_SPREAD", &[("AAAA11", "1.2")])],
        )]);

        assert_eq!(dataset.partitions().len(), 1);
        assert_eq!(dataset.len(), 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].key.sheet, "Resumo");
    }

    #[test]
    fn test_duplicate_identity_is_dropped() {
        let (dataset, _) = consolidate(&[(
            d(2024, 1, 5),
            vec![
                provider_sheet("DI_SPREAD", &[("AAAA11", "1.2")]),
                provider_sheet("DI_SPREAD_2", &[("AAAA11", "1.3"), ("BBBB12", "1.4")]),
            ],
        )]);

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.duplicates_dropped(), 1);
        let kept: HashSet<RecordKey> = dataset.records().map(|r| r.key()).collect();
        assert_eq!(kept.len(), dataset.records().count());
        assert_eq!(dataset.records().next().unwrap().indicative_rate, Some(1.2));
    }

    #[test]
    fn test_same_code_on_different_dates_is_kept() {
        let (dataset, _) = consolidate(&[
            (d(2024, 1, 4), vec![provider_sheet("IPCA_SPREAD", &[("AAAA11", "6.4")])]),
            (d(2024, 1, 5), vec![provider_sheet("IPCA_SPREAD", &[("AAAA11", "6.5")])]),
        ]);
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.dates(), BTreeSet::from([d(2024, 1, 4), d(2024, 1, 5)]));
    }

    #[test]
    fn test_no_accepted_sheet_means_no_sheets() {
        let (dataset, report) = consolidate(&[(d(2024, 1, 5), vec![RawSheet::new("x", vec![])])]);
        assert!(dataset.has_no_sheets());
        assert_eq!(report.rejected.len(), 1);
    }

    #[test]
    fn test_sheet_without_rows_still_counts_as_a_sheet() {
        let (dataset, report) = consolidate(&[(d(2024, 1, 5), vec![provider_sheet("IPCA_SPREAD", &[])])]);
        assert_eq!(report.sheets_parsed, 1);
        assert_eq!(dataset.len(), 0);
        assert!(!dataset.has_no_sheets());
        assert_eq!(dataset.partitions().len(), 1);
    }

    #[test]
    fn test_filter_dates() {
        let (dataset, _) = consolidate(&[
            (d(2024, 1, 4), vec![provider_sheet("IPCA_SPREAD", &[("AAAA11", "6.4")])]),
            (d(2024, 1, 5), vec![provider_sheet("IPCA_SPREAD", &[("AAAA11", "6.5")])]),
        ]);
        let only = BTreeSet::from([d(2024, 1, 5)]);
        let filtered: Vec<_> = dataset.filter_dates(Some(&only)).collect();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].date, d(2024, 1, 5));
        assert_eq!(dataset.filter_dates(None).count(), 2);
    }

    #[test]
    fn test_from_records_groups_by_date_and_category() {
        let (dataset, _) = consolidate(&[(
            d(2024, 1, 5),
            vec![
                provider_sheet("IPCA_SPREAD", &[("AAAA11", "6.5")]),
                provider_sheet("DI_SPREAD", &[("BBBB12", "1.1")]),
            ],
        )]);
        let rebuilt = ConsolidatedDataset::from_records(dataset.records().cloned());
        assert_eq!(rebuilt.len(), 2);
        assert_eq!(rebuilt.partitions()[0].key.sheet, "IPCA +");
        assert_eq!(rebuilt.partitions()[1].key.sheet, "DI +");
    }

    #[test]
    fn test_consolidate_skips_unreadable_and_undated_files() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("20240105.xls");
        let undated = dir.path().join("latest.xls");
        std::fs::write(&garbage, b"not a workbook").unwrap();
        std::fs::write(&undated, b"").unwrap();

        let result = FileConsolidator::new(SheetParser::default()).consolidate(&[
            SourceFile { date: d(2024, 1, 5), path: garbage },
            SourceFile { date: d(2024, 1, 5), path: undated },
        ]);
        assert!(result.dataset.has_no_sheets());
        assert_eq!(result.report.files_skipped, 2);
        assert_eq!(result.report.files_read, 0);
    }
}
