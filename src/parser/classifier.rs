use crate::models::IndexCategory;

/// Sheet-name fragments in priority order; the first match wins.
const PATTERNS: [(&str, IndexCategory); 4] = [
    ("ipca_spread", IndexCategory::IpcaSpread),
    ("di_percentual", IndexCategory::DiPercent),
    ("di_spread", IndexCategory::DiSpread),
    ("vencidos_antecipadamente", IndexCategory::MaturedEarly),
];

/// Decode the rate index a sheet belongs to from its name.
pub fn classify_sheet(label: &str) -> IndexCategory {
    let label = label.to_lowercase();
    PATTERNS
        .iter()
        .find(|(pattern, _)| label.contains(pattern))
        .map(|(_, category)| *category)
        .unwrap_or(IndexCategory::Unknown)
}
