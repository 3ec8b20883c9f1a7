//! Workbook exports of the consolidated dataset.
//!
//! The partitioned workbook keeps one sheet per (file, source sheet) for
//! traceability in BI tools; the flat workbook holds everything on one sheet.
//! Both are written from the same dataset, so they agree record for record.

use super::ConsolidatedDataset;
use crate::models::{CanonicalRecord, IndexCategory, RawSheet};
use crate::parser::cleaner::{normalise_header, parse_decimal};
use crate::parser::workbook::read_workbook;
use crate::parser::{
    COL_BUY_RATE, COL_CODE, COL_INDICATIVE_RATE, COL_NAME, COL_SELL_RATE, COL_UNIT_PRICE,
};
use crate::utils::unique_sheet_names;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_xlsxwriter::{Workbook, Worksheet, XlsxError};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const COL_DATE: &str = "Date";
pub const COL_INDEX: &str = "Indexador";

pub const EXPORT_COLUMNS: [&str; 8] = [
    COL_CODE,
    COL_NAME,
    COL_UNIT_PRICE,
    COL_BUY_RATE,
    COL_SELL_RATE,
    COL_INDICATIVE_RATE,
    COL_DATE,
    COL_INDEX,
];

pub const FLAT_SHEET_NAME: &str = "Consolidated";

/// Write both workbooks, or neither.
///
/// Each workbook is first saved next to its target with a `.tmp` suffix.
/// Only when both are staged are the previous exports moved aside and the
/// staged files moved in; a failure at any step restores what was there.
pub fn write_exports(dataset: &ConsolidatedDataset, partitioned: &Path, flat: &Path) -> Result<()> {
    let staged_partitioned = stage(&mut partitioned_workbook(dataset)?, partitioned)?;
    let staged_flat = match stage(&mut flat_workbook(dataset)?, flat) {
        Ok(path) => path,
        Err(e) => {
            std::fs::remove_file(&staged_partitioned).ok();
            return Err(e);
        }
    };

    commit(&[(staged_partitioned, partitioned), (staged_flat, flat)])?;
    info!(
        "Exports: {} sheets, {} records → {:?} and {:?}",
        dataset.partitions().len(),
        dataset.len(),
        partitioned,
        flat
    );
    Ok(())
}

/// One sheet per partition, named `yyyymmdd_<sheet>` within the 31-char limit.
fn partitioned_workbook(dataset: &ConsolidatedDataset) -> Result<Workbook> {
    let names = unique_sheet_names(dataset.partitions().iter().map(|p| p.key.partition_name()));

    let mut workbook = Workbook::new();
    for (partition, name) in dataset.partitions().iter().zip(names) {
        let worksheet = workbook.add_worksheet();
        worksheet
            .set_name(&name)
            .with_context(|| format!("Invalid sheet name '{name}'"))?;
        write_records(worksheet, partition.records.iter())
            .with_context(|| format!("Failed to write sheet '{name}'"))?;
    }
    Ok(workbook)
}

/// Every record on a single `Consolidated` sheet.
fn flat_workbook(dataset: &ConsolidatedDataset) -> Result<Workbook> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(FLAT_SHEET_NAME)?;
    write_records(worksheet, dataset.records()).context("Failed to write flat sheet")?;
    Ok(workbook)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

fn stage(workbook: &mut Workbook, path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create dir {:?}", parent))?;
    }
    let staged = sibling(path, ".tmp");
    if let Err(e) = workbook.save(&staged) {
        std::fs::remove_file(&staged).ok();
        return Err(e).with_context(|| format!("Failed to save workbook {:?}", staged));
    }
    Ok(staged)
}

/// Swap every staged file into place, rolling back on the first failure.
fn commit(files: &[(PathBuf, &Path)]) -> Result<()> {
    let discard = |files: &[(PathBuf, &Path)]| {
        for (staged, _) in files {
            std::fs::remove_file(staged).ok();
        }
    };

    // Move the previous exports aside; a locked target fails here.
    let mut backups: Vec<(PathBuf, &Path)> = Vec::new();
    for (_, target) in files {
        if !target.exists() {
            continue;
        }
        let backup = sibling(target, ".bak");
        if let Err(e) = std::fs::rename(target, &backup) {
            for (backup, target) in &backups {
                std::fs::rename(backup, target).ok();
            }
            discard(files);
            return Err(e).with_context(|| format!("Export {:?} is not replaceable", target));
        }
        backups.push((backup, *target));
    }

    for (i, (staged, target)) in files.iter().enumerate() {
        if let Err(e) = std::fs::rename(staged, target) {
            for (_, placed) in &files[..i] {
                std::fs::remove_file(placed).ok();
            }
            for (backup, target) in &backups {
                std::fs::rename(backup, target).ok();
            }
            discard(files);
            return Err(e).with_context(|| format!("Failed to move {:?} into place", staged));
        }
    }

    for (backup, _) in &backups {
        if let Err(e) = std::fs::remove_file(backup) {
            warn!("Could not remove {:?}: {}", backup, e);
        }
    }
    Ok(())
}

fn write_records<'a>(
    worksheet: &mut Worksheet,
    records: impl Iterator<Item = &'a CanonicalRecord>,
) -> Result<(), XlsxError> {
    for (col, name) in EXPORT_COLUMNS.iter().enumerate() {
        worksheet.write_string(0, col as u16, *name)?;
    }

    for (i, r) in records.enumerate() {
        let row = i as u32 + 1;
        worksheet.write_string(row, 0, &r.security_code)?;
        worksheet.write_string(row, 1, &r.name)?;
        for (col, value) in [r.unit_price, r.buy_rate, r.sell_rate, r.indicative_rate]
            .into_iter()
            .enumerate()
        {
            if let Some(v) = value {
                worksheet.write_number(row, col as u16 + 2, v)?;
            }
        }
        worksheet.write_string(row, 6, r.date.format("%Y%m%d").to_string())?;
        worksheet.write_string(row, 7, r.index_category.label())?;
    }
    Ok(())
}

// ── Records CSV ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct RecordRow<'a> {
    #[serde(rename = "Código")]
    code: &'a str,
    #[serde(rename = "Nome")]
    name: &'a str,
    #[serde(rename = "PU")]
    unit_price: Option<f64>,
    #[serde(rename = "Taxa de Compra")]
    buy_rate: Option<f64>,
    #[serde(rename = "Taxa de Venda")]
    sell_rate: Option<f64>,
    #[serde(rename = "Taxa Indicativa")]
    indicative_rate: Option<f64>,
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Indexador")]
    indexador: IndexCategory,
}

/// Records as CSV, in the workbook column layout; returns the row count.
pub fn write_records_csv<'a>(
    records: impl Iterator<Item = &'a CanonicalRecord>,
    path: &Path,
) -> Result<usize> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create records CSV {:?}", path))?;

    let mut n = 0;
    for r in records {
        writer.serialize(RecordRow {
            code: &r.security_code,
            name: &r.name,
            unit_price: r.unit_price,
            buy_rate: r.buy_rate,
            sell_rate: r.sell_rate,
            indicative_rate: r.indicative_rate,
            date: r.date.format("%Y%m%d").to_string(),
            indexador: r.index_category,
        })?;
        n += 1;
    }
    writer.flush()?;

    info!("Records CSV: {} rows → {:?}", n, path);
    Ok(n)
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load every sheet of an exported workbook back into records, in order.
pub fn load_records(path: &Path) -> Result<Vec<CanonicalRecord>> {
    let sheets = read_workbook(path)?;
    let mut records = Vec::new();
    for sheet in &sheets {
        records.extend(sheet_records(sheet));
    }
    info!("Loaded {} records from {} sheets of {:?}", records.len(), sheets.len(), path);
    Ok(records)
}

fn sheet_records(sheet: &RawSheet) -> Vec<CanonicalRecord> {
    let Some(header) = sheet.rows.first() else {
        return Vec::new();
    };
    let headers: Vec<String> = header.iter().map(|h| normalise_header(h)).collect();
    let positions: Vec<Option<usize>> = EXPORT_COLUMNS
        .iter()
        .map(|c| headers.iter().position(|h| h == *c))
        .collect();
    let Some(cols) = positions.iter().copied().collect::<Option<Vec<usize>>>() else {
        warn!("Sheet '{}' is not a consolidated export; skipping", sheet.name);
        return Vec::new();
    };

    let mut out = Vec::new();
    for row in sheet.rows.iter().skip(1) {
        let cell = |i: usize| RawSheet::cell(row, cols[i]).trim();
        if cell(0).is_empty() {
            continue;
        }
        let Ok(date) = NaiveDate::parse_from_str(cell(6), "%Y%m%d") else {
            warn!("Sheet '{}': row {} has no valid date; skipping", sheet.name, cell(0));
            continue;
        };
        out.push(CanonicalRecord {
            security_code: cell(0).to_string(),
            name: cell(1).to_string(),
            unit_price: parse_decimal(cell(2)),
            buy_rate: parse_decimal(cell(3)),
            sell_rate: parse_decimal(cell(4)),
            indicative_rate: parse_decimal(cell(5)),
            date,
            index_category: IndexCategory::from_label(cell(7)).unwrap_or(IndexCategory::Unknown),
        });
    }
    out
}
