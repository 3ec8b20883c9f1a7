use crate::models::RawSheet;
use regex::Regex;
use std::sync::LazyLock;

// ── Cell parsers ──────────────────────────────────────────────────────────────

/// Placeholders the provider uses for "no quote".
const NULL_MARKERS: [&str; 6] = ["-", "--", "—", "N/D", "ND", "N/A"];

/// pt-BR number: optional dot-grouped thousands, comma decimal separator.
static PT_BR_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?(\d{1,3}(\.\d{3})*|\d+)(,\d+)?$").expect("valid pt-BR number pattern")
});

/// Parse a numeric cell permissively; anything malformed becomes `None`.
/// "6.1234" → 6.1234 | "1.234,56" → 1234.56 | "--" → None
pub fn parse_decimal(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || NULL_MARKERS.iter().any(|m| s.eq_ignore_ascii_case(m)) {
        return None;
    }

    if let Ok(v) = s.parse::<f64>() {
        return v.is_finite().then_some(v);
    }

    if !PT_BR_NUMBER.is_match(s) {
        return None;
    }
    let cleaned = s.replace('.', "").replace(',', ".");
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn normalise_code(s: &str) -> String {
    s.trim().to_string()
}

pub fn normalise_header(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whitespace-only codes count as blank: such rows are never records.
pub fn is_blank_code(row: &[String], code_col: usize) -> bool {
    RawSheet::cell(row, code_col).trim().is_empty()
}

/// Only a truly empty code cell marks the end of the data block.
pub fn is_sentinel_code(row: &[String], code_col: usize) -> bool {
    RawSheet::cell(row, code_col).is_empty()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
