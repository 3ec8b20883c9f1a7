use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ── Index category ────────────────────────────────────────────────────────────

/// Rate-indexing scheme a debenture is pegged to, decoded from the sheet name.
///
/// Variant order is the output order of aggregated series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IndexCategory {
    #[serde(rename = "IPCA +")]
    IpcaSpread,
    #[serde(rename = "% do DI")]
    DiPercent,
    #[serde(rename = "DI +")]
    DiSpread,
    #[serde(rename = "Vencidos Antecipadamente")]
    MaturedEarly,
    #[serde(rename = "Desconhecido")]
    Unknown,
}

impl IndexCategory {
    pub const ALL: [IndexCategory; 5] = [
        IndexCategory::IpcaSpread,
        IndexCategory::DiPercent,
        IndexCategory::DiSpread,
        IndexCategory::MaturedEarly,
        IndexCategory::Unknown,
    ];

    /// Label written to the `Indexador` column of the exports.
    pub fn label(self) -> &'static str {
        match self {
            IndexCategory::IpcaSpread => "IPCA +",
            IndexCategory::DiPercent => "% do DI",
            IndexCategory::DiSpread => "DI +",
            IndexCategory::MaturedEarly => "Vencidos Antecipadamente",
            IndexCategory::Unknown => "Desconhecido",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL.into_iter().find(|c| c.label() == label)
    }

    /// Matured-early securities never enter the rate averages.
    pub fn is_aggregated(self) -> bool {
        self != IndexCategory::MaturedEarly
    }
}

impl fmt::Display for IndexCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Raw sheet ─────────────────────────────────────────────────────────────────

/// One sheet of one workbook as a grid of cell text.
///
/// Row 0 is the sheet's first physical row, so fixed offsets count from the
/// top of the sheet even when the leading rows are empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSheet {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

impl RawSheet {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    /// Cell text, or "" when the row is shorter than `col`.
    pub fn cell(row: &[String], col: usize) -> &str {
        row.get(col).map(|s| s.as_str()).unwrap_or("")
    }
}

// ── Parsed rows ───────────────────────────────────────────────────────────────

/// A cleaned sheet row, before date and category are stamped on it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricedRow {
    pub security_code: String,
    pub name: String,
    pub unit_price: Option<f64>,
    pub buy_rate: Option<f64>,
    pub sell_rate: Option<f64>,
    pub indicative_rate: Option<f64>,
}

impl PricedRow {
    pub fn into_record(self, date: NaiveDate, index_category: IndexCategory) -> CanonicalRecord {
        CanonicalRecord {
            security_code: self.security_code,
            name: self.name,
            unit_price: self.unit_price,
            buy_rate: self.buy_rate,
            sell_rate: self.sell_rate,
            indicative_rate: self.indicative_rate,
            date,
            index_category,
        }
    }
}

/// Output of the sheet parser for one accepted sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSheet {
    pub name: String,
    pub rows: Vec<PricedRow>,
}

// ── Canonical record ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub security_code: String,
    pub name: String,
    pub unit_price: Option<f64>,
    pub buy_rate: Option<f64>,
    pub sell_rate: Option<f64>,
    pub indicative_rate: Option<f64>,
    pub date: NaiveDate,
    pub index_category: IndexCategory,
}

impl CanonicalRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            security_code: self.security_code.clone(),
            date: self.date,
            index_category: self.index_category,
        }
    }
}

/// Identity of a record across the consolidated dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub security_code: String,
    pub date: NaiveDate,
    pub index_category: IndexCategory,
}

/// Identity of one partition: the file's date plus the source sheet name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SheetKey {
    pub date: NaiveDate,
    pub sheet: String,
}

impl SheetKey {
    pub fn new(date: NaiveDate, sheet: impl Into<String>) -> Self {
        Self {
            date,
            sheet: sheet.into(),
        }
    }

    /// `yyyymmdd_<sheet>`, before any spreadsheet length limit is applied.
    pub fn partition_name(&self) -> String {
        format!("{}_{}", self.date.format("%Y%m%d"), self.sheet)
    }
}

// ── Source files ──────────────────────────────────────────────────────────────

/// A workbook in the local cache together with the date its name encodes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceFile {
    pub date: NaiveDate,
    pub path: PathBuf,
}
