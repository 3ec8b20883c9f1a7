//! Workbook → raw sheets.
//!
//! The provider publishes legacy `.xls` files, but the format is sniffed from
//! the bytes so an `.xlsx` served under the same name still opens.

use crate::models::RawSheet;
use anyhow::{Context, Result};
use calamine::{Data, Range, Reader, open_workbook_auto_from_rs};
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, warn};

/// Read every sheet of the workbook at `path`.
pub fn read_workbook(path: &Path) -> Result<Vec<RawSheet>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    read_workbook_bytes(bytes).with_context(|| format!("Failed to open workbook {:?}", path))
}

pub fn read_workbook_bytes(bytes: Vec<u8>) -> Result<Vec<RawSheet>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        match workbook.worksheet_range(&name) {
            Ok(range) => sheets.push(RawSheet::new(name, range_to_rows(&range))),
            Err(e) => warn!("Skipping unreadable sheet '{}': {}", name, e),
        }
    }

    debug!("Workbook has {} readable sheets", sheets.len());
    Ok(sheets)
}

/// Materialise a range as text rows anchored at the sheet's first row/column.
fn range_to_rows(range: &Range<Data>) -> Vec<Vec<String>> {
    let Some((start_row, start_col)) = range.start() else {
        return Vec::new();
    };

    let mut rows: Vec<Vec<String>> = vec![Vec::new(); start_row as usize];
    for cells in range.rows() {
        let mut row = vec![String::new(); start_col as usize];
        row.extend(cells.iter().map(cell_text));
        rows.push(row);
    }
    rows
}

pub fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::Error(_) => String::new(),
        other => other.to_string(),
    }
}
