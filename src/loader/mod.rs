//! Cache discovery for re-consolidating previously downloaded files.

use crate::models::SourceFile;
use anyhow::Result;
use chrono::NaiveDate;
use std::path::Path;
use tracing::debug;

/// Extract the business date from a `yyyymmdd.<ext>` cache file name.
pub fn extract_date_from_filename(path: &Path) -> Option<NaiveDate> {
    let stem = path.file_stem()?.to_str()?;
    if stem.len() != 8 || !stem.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(stem, "%Y%m%d").ok()
}

/// Every cached workbook with the given extension, oldest first.
pub fn discover_cached_files(dir: &Path, extension: &str) -> Result<Vec<SourceFile>> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let wanted = extension.trim_start_matches('.');
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let matches_ext = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case(wanted))
            .unwrap_or(false);
        if !path.is_file() || !matches_ext {
            continue;
        }
        match extract_date_from_filename(&path) {
            Some(date) => files.push(SourceFile { date, path }),
            None => debug!("Ignoring {:?}: name is not a yyyymmdd date", path),
        }
    }

    files.sort();
    Ok(files)
}
