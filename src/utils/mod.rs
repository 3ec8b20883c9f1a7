use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::info;

/// Logs how long a labelled step took when it goes out of scope.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!("Finished: {} (took {:.2?})", self.label, self.elapsed());
    }
}

// ── Sheet names ───────────────────────────────────────────────────────────────

/// Spreadsheet limit on sheet-name length, in characters.
pub const MAX_SHEET_NAME: usize = 31;

const FORBIDDEN_SHEET_CHARS: [char; 7] = ['[', ']', ':', '*', '?', '/', '\\'];

/// First `max` characters of `s` (not bytes).
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Turn arbitrary names into valid, distinct sheet names, preserving order.
///
/// Names are sanitised and truncated to [`MAX_SHEET_NAME`]; a truncation
/// collision gets a `~N` suffix.
pub fn unique_sheet_names<S: AsRef<str>>(names: impl IntoIterator<Item = S>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    for name in names {
        let clean: String = name
            .as_ref()
            .chars()
            .map(|c| if FORBIDDEN_SHEET_CHARS.contains(&c) { '_' } else { c })
            .collect();
        let clean = clean.trim_matches('\'').to_string();
        let clean = if clean.is_empty() { "Sheet".to_string() } else { clean };

        let mut candidate = truncate_chars(&clean, MAX_SHEET_NAME);
        let mut n = 2;
        // Sheet names compare case-insensitively.
        while seen.contains(&candidate.to_lowercase()) {
            let suffix = format!("~{n}");
            candidate = format!(
                "{}{}",
                truncate_chars(&clean, MAX_SHEET_NAME - suffix.chars().count()),
                suffix
            );
            n += 1;
        }

        seen.insert(candidate.to_lowercase());
        out.push(candidate);
    }

    out
}
