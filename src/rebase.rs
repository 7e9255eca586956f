//! Per-entity index rebasing
//!
//! Rebasing scales a single-value-per-entity-per-year series so the base
//! year equals 100. The same procedure serves price indices and exchange
//! rates; only the input table differs. Each entity is rebased in an
//! explicit loop against its own base-year value, which keeps the
//! missing-base-year edge case visible per entity.

use crate::error::{DeflateError, Result};
use crate::source::SeriesRow;
use hashbrown::HashMap;

/// What a rebased series indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeflatorKind {
    Price,
    Exchange,
}

/// A rebased single-indicator series: base-year value is 100 for every
/// entity present at the base year.
#[derive(Debug, Clone)]
pub struct DeflatorSeries {
    pub kind: DeflatorKind,
    pub base_year: i32,
    pub rows: Vec<SeriesRow>,
}

impl DeflatorSeries {
    /// Rebase `series` to `base_year`
    pub fn rebased(kind: DeflatorKind, series: &[SeriesRow], base_year: i32) -> Result<Self> {
        Ok(Self {
            kind,
            base_year,
            rows: rebase(series, base_year)?,
        })
    }

    /// Identity series: 100 for every (year, entity) of the input shape.
    /// Used when source and target currency coincide.
    pub fn identity(kind: DeflatorKind, series: &[SeriesRow], base_year: i32) -> Self {
        Self {
            kind,
            base_year,
            rows: series
                .iter()
                .map(|r| SeriesRow {
                    year: r.year,
                    entity_code: r.entity_code.clone(),
                    iso3: r.iso3.clone(),
                    value: Some(100.0),
                })
                .collect(),
        }
    }
}

/// Rebase a series so that each entity's base-year value becomes 100.
///
/// Entities with no usable base-year value keep nulls for every year (never
/// dropped, never zero-filled). If no entity at all has a usable base-year
/// value the request is unanswerable and fails with `MissingData`.
pub fn rebase(series: &[SeriesRow], base_year: i32) -> Result<Vec<SeriesRow>> {
    let mut base_values: HashMap<&str, f64> = HashMap::new();
    for row in series {
        if row.year == base_year {
            if let Some(value) = row.value {
                if value != 0.0 {
                    base_values.insert(row.entity_code.as_str(), value);
                }
            }
        }
    }
    if base_values.is_empty() {
        return Err(DeflateError::MissingData(format!(
            "no data for base year {}",
            base_year
        )));
    }

    let rows = series
        .iter()
        .map(|row| {
            let value = match (row.value, base_values.get(row.entity_code.as_str())) {
                (Some(v), Some(base)) => Some(round6(100.0 * v / base)),
                _ => None,
            };
            SeriesRow {
                year: row.year,
                entity_code: row.entity_code.clone(),
                iso3: row.iso3.clone(),
                value,
            }
        })
        .collect();
    Ok(rows)
}

/// Round to 6 decimal places
pub(crate) fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}
