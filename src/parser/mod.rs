//! Sheet parsing: raw provider sheets → cleaned priced rows.
//!
//! Every sheet of a daily file carries a vendor preamble, a header row, the
//! quoted securities, and trailing footnotes. Which rows are data is decided
//! by a [`FramePolicy`] so a layout change is a configuration change.

pub mod classifier;
pub mod cleaner;
pub mod workbook;

use crate::error::SheetError;
use crate::models::{ParsedSheet, PricedRow, RawSheet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use self::cleaner::{is_blank_code, is_sentinel_code, normalise_code, normalise_header, parse_decimal};

pub use self::classifier::classify_sheet;

pub const COL_CODE: &str = "Código";
pub const COL_NAME: &str = "Nome";
pub const COL_UNIT_PRICE: &str = "PU";
pub const COL_BUY_RATE: &str = "Taxa de Compra";
pub const COL_SELL_RATE: &str = "Taxa de Venda";
pub const COL_INDICATIVE_RATE: &str = "Taxa Indicativa";

pub const REQUIRED_COLUMNS: [&str; 6] = [
    COL_CODE,
    COL_NAME,
    COL_UNIT_PRICE,
    COL_BUY_RATE,
    COL_SELL_RATE,
    COL_INDICATIVE_RATE,
];

// ── Frame policy ──────────────────────────────────────────────────────────────

/// Where the data block of a sheet starts and ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct FramePolicy {
    /// Preamble rows above the header row.
    #[serde(default = "default_header_skip")]
    pub header_skip: usize,

    /// The n-th blank-code row marks the start of trailing noise (0 disables).
    #[serde(default = "default_sentinel_occurrence")]
    pub sentinel_occurrence: usize,

    /// Rows dropped from the top of the block after truncation.
    #[serde(default = "default_leading_rows_dropped")]
    pub leading_rows_dropped: usize,
}

fn default_header_skip() -> usize {
    7
}
fn default_sentinel_occurrence() -> usize {
    2
}
fn default_leading_rows_dropped() -> usize {
    1
}

impl Default for FramePolicy {
    fn default() -> Self {
        Self {
            header_skip: default_header_skip(),
            sentinel_occurrence: default_sentinel_occurrence(),
            leading_rows_dropped: default_leading_rows_dropped(),
        }
    }
}

// ── Column positions ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct ColumnMap {
    code: usize,
    name: usize,
    unit_price: usize,
    buy_rate: usize,
    sell_rate: usize,
    indicative_rate: usize,
}

impl ColumnMap {
    fn locate(sheet: &str, header: &[String]) -> Result<Self, SheetError> {
        let headers: Vec<String> = header.iter().map(|h| normalise_header(h)).collect();
        let find = |name: &str| headers.iter().position(|h| h == name);

        let missing: Vec<String> = REQUIRED_COLUMNS
            .into_iter()
            .filter(|&c| find(c).is_none())
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(SheetError::MissingColumns {
                sheet: sheet.to_string(),
                missing,
            });
        }

        let pos = |name: &str| find(name).unwrap_or_default();
        Ok(Self {
            code: pos(COL_CODE),
            name: pos(COL_NAME),
            unit_price: pos(COL_UNIT_PRICE),
            buy_rate: pos(COL_BUY_RATE),
            sell_rate: pos(COL_SELL_RATE),
            indicative_rate: pos(COL_INDICATIVE_RATE),
        })
    }

    fn to_row(self, row: &[String]) -> PricedRow {
        let cell = |col: usize| RawSheet::cell(row, col);
        PricedRow {
            security_code: normalise_code(cell(self.code)),
            name: cell(self.name).trim().to_string(),
            unit_price: parse_decimal(cell(self.unit_price)),
            buy_rate: parse_decimal(cell(self.buy_rate)),
            sell_rate: parse_decimal(cell(self.sell_rate)),
            indicative_rate: parse_decimal(cell(self.indicative_rate)),
        }
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct SheetParser {
    policy: FramePolicy,
}

impl SheetParser {
    pub fn new(policy: FramePolicy) -> Self {
        Self { policy }
    }

    /// Parse one sheet. A sheet without the required header is rejected as a
    /// whole; individual bad cells only degrade to `None`.
    pub fn parse(&self, sheet: &RawSheet) -> Result<ParsedSheet, SheetError> {
        let skip = self.policy.header_skip;
        let header = sheet.rows.get(skip).ok_or_else(|| SheetError::MissingHeader {
            sheet: sheet.name.clone(),
            skip,
        })?;
        let columns = ColumnMap::locate(&sheet.name, header)?;

        let body = &sheet.rows[skip + 1..];
        let body = self.truncate_at_sentinel(body, columns.code);

        let rows: Vec<PricedRow> = body
            .iter()
            .skip(self.policy.leading_rows_dropped)
            .filter(|row| !is_blank_code(row, columns.code))
            .map(|row| columns.to_row(row))
            .collect();

        debug!(
            "{}: {} of {} body rows kept",
            sheet.name,
            rows.len(),
            sheet.rows.len().saturating_sub(skip + 1)
        );

        Ok(ParsedSheet {
            name: sheet.name.clone(),
            rows,
        })
    }

    /// Cut the body at the configured blank-code occurrence, if it exists.
    fn truncate_at_sentinel<'a>(&self, body: &'a [Vec<String>], code_col: usize) -> &'a [Vec<String>] {
        let nth = self.policy.sentinel_occurrence;
        if nth == 0 {
            return body;
        }

        let cut = body
            .iter()
            .enumerate()
            .filter(|(_, row)| is_sentinel_code(row, code_col))
            .nth(nth - 1)
            .map(|(i, _)| i);

        match cut {
            Some(i) => &body[..i],
            None => body,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
