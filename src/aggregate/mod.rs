//! Mean indicative rate per (date, index category), for the chart layer.
//!
//! Matured-early securities are left out, and null rates do not count
//! towards the mean. Series come out grouped by category (in
//! [`IndexCategory`] order), each one chronological.

use crate::models::{CanonicalRecord, IndexCategory};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub mean_rate: f64,
}

/// One chart's worth of data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySeries {
    pub indexador: IndexCategory,
    pub points: Vec<SeriesPoint>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedSeries {
    series: BTreeMap<IndexCategory, BTreeMap<NaiveDate, f64>>,
}

impl AggregatedSeries {
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn categories(&self) -> impl Iterator<Item = IndexCategory> + '_ {
        self.series.keys().copied()
    }

    pub fn mean(&self, category: IndexCategory, date: NaiveDate) -> Option<f64> {
        self.series.get(&category)?.get(&date).copied()
    }

    /// Points of one category, oldest first.
    pub fn points(&self, category: IndexCategory) -> Vec<SeriesPoint> {
        self.series
            .get(&category)
            .map(|by_date| {
                by_date
                    .iter()
                    .map(|(&date, &mean_rate)| SeriesPoint { date, mean_rate })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn to_series(&self) -> Vec<CategorySeries> {
        self.categories()
            .map(|indexador| CategorySeries {
                indexador,
                points: self.points(indexador),
            })
            .collect()
    }
}

/// Average the indicative rate of `records`, optionally restricted to `dates`.
pub fn mean_indicative_rates<'a>(
    records: impl IntoIterator<Item = &'a CanonicalRecord>,
    dates: Option<&BTreeSet<NaiveDate>>,
) -> AggregatedSeries {
    let mut sums: BTreeMap<IndexCategory, BTreeMap<NaiveDate, (f64, usize)>> = BTreeMap::new();

    for r in records {
        if !r.index_category.is_aggregated() {
            continue;
        }
        if dates.is_some_and(|set| !set.contains(&r.date)) {
            continue;
        }
        let Some(rate) = r.indicative_rate else {
            continue;
        };
        let slot = sums
            .entry(r.index_category)
            .or_default()
            .entry(r.date)
            .or_insert((0.0, 0));
        slot.0 += rate;
        slot.1 += 1;
    }

    let series = sums
        .into_iter()
        .map(|(category, by_date)| {
            let means = by_date
                .into_iter()
                .map(|(date, (sum, n))| (date, sum / n as f64))
                .collect();
            (category, means)
        })
        .collect();

    AggregatedSeries { series }
}

// ── Exports ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SeriesRow {
    #[serde(rename = "Indexador")]
    indexador: IndexCategory,
    #[serde(rename = "Date")]
    date: NaiveDate,
    #[serde(rename = "Taxa Indicativa Média")]
    mean_rate: f64,
}

pub fn write_series_csv(series: &AggregatedSeries, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create series CSV {:?}", path))?;

    for s in series.to_series() {
        for p in s.points {
            writer.serialize(SeriesRow {
                indexador: s.indexador,
                date: p.date,
                mean_rate: p.mean_rate,
            })?;
        }
    }
    writer.flush()?;

    info!("Series CSV → {:?}", path);
    Ok(())
}

pub fn write_series_json(series: &AggregatedSeries, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&series.to_series())?;
    std::fs::write(path, json).with_context(|| format!("Failed to write series JSON {:?}", path))?;
    info!("Series JSON → {:?}", path);
    Ok(())
}
