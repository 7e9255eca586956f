//! Deflation pipeline: combine, merge with fallback, apply
//!
//! Combines the rebased price index, the rebased exchange-rate index, and
//! the raw bilateral exchange rate into one deflator per (year, entity),
//! merges that against a user [`Frame`], and applies it by division.
//! Coverage gaps in agency data are the steady state across long spans of
//! years and jurisdictions, so missing deflators become null targets plus a
//! deduplicated log block, never an error; malformed configuration fails
//! before any merge.

use crate::error::{DeflateError, Result};
use crate::exchange::ExchangeTable;
use crate::frame::{Cell, Frame};
use crate::rebase::{round6, DeflatorSeries};
use chrono::Datelike;
use hashbrown::HashMap;

/// Which canonical key user entity values join against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKey {
    /// The source's native entity code
    Code,
    /// The normalized ISO3 code
    Iso3,
}

/// Columns of the user table the pipeline reads and writes
#[derive(Debug, Clone)]
pub struct ApplyColumns {
    pub id_column: String,
    pub year_column: String,
    pub value_column: String,
    pub target_column: String,
    /// chrono format for date-like year cells; plain integer years always
    /// parse. Defaults to `%Y-%m-%d`.
    pub year_format: Option<String>,
}

/// Outcome of a deflator lookup for one (year, entity)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeflatorLookup {
    Direct(f64),
    /// Served by the source's aggregate/bucket entity
    Aggregate(f64),
    Missing,
}

/// One combined deflator row before keying
struct CombinedRow {
    year: i32,
    entity_code: String,
    iso3: Option<String>,
    deflator: f64,
}

/// The merge-and-apply engine for one computed configuration
pub struct DeflationPipeline {
    /// (year, join key) -> deflator
    combined: HashMap<(i32, String), f64>,
    /// Aggregate entity code and its per-year deflators, when the source
    /// defines a fallback bucket
    aggregate: Option<(String, HashMap<i32, f64>)>,
}

impl DeflationPipeline {
    /// Build the combined per-(year, entity) deflator for deflation.
    ///
    /// Given rebased price value `P`, rebased exchange value `E`, and raw
    /// bilateral rate `X`:
    /// constant-from-current: `(P * E) / (100 * 100 * X)`;
    /// current-from-constant: `E / (P * X)`.
    pub fn for_deflation(
        price: &DeflatorSeries,
        exchange_deflator: &DeflatorSeries,
        rates: &ExchangeTable,
        to_current: bool,
        key: EntityKey,
        aggregate_entity: Option<&str>,
    ) -> Self {
        let exchange_values = series_lookup(exchange_deflator);
        let rate_values = rates_lookup(rates);

        let mut rows = Vec::new();
        for row in &price.rows {
            let code_key = (row.year, row.entity_code.to_uppercase());
            let (p, e, x) = match (
                row.value,
                exchange_values.get(&code_key),
                rate_values.get(&code_key),
            ) {
                (Some(p), Some(&e), Some(&x)) => (p, e, x),
                _ => continue,
            };
            if x == 0.0 || p == 0.0 {
                continue;
            }
            let deflator = if to_current {
                e / (p * x)
            } else {
                (p * e) / (100.0 * 100.0 * x)
            };
            if !deflator.is_finite() || deflator == 0.0 {
                continue;
            }
            rows.push(CombinedRow {
                year: row.year,
                entity_code: row.entity_code.clone(),
                iso3: row.iso3.clone(),
                deflator,
            });
        }
        Self::from_rows(rows, key, aggregate_entity)
    }

    /// Build the combined table for pure currency conversion: the deflator
    /// is the reciprocal of the bilateral rate, so dividing by it multiplies
    /// by the rate.
    pub fn for_exchange(
        rates: &ExchangeTable,
        key: EntityKey,
        aggregate_entity: Option<&str>,
    ) -> Self {
        let mut rows = Vec::new();
        for row in &rates.rows {
            let rate = match row.value {
                Some(rate) if rate != 0.0 && rate.is_finite() => rate,
                _ => continue,
            };
            rows.push(CombinedRow {
                year: row.year,
                entity_code: row.entity_code.clone(),
                iso3: row.iso3.clone(),
                deflator: 1.0 / rate,
            });
        }
        Self::from_rows(rows, key, aggregate_entity)
    }

    fn from_rows(rows: Vec<CombinedRow>, key: EntityKey, aggregate_entity: Option<&str>) -> Self {
        let aggregate_code = aggregate_entity.map(|code| code.to_uppercase());
        let mut combined = HashMap::new();
        let mut aggregate_values: HashMap<i32, f64> = HashMap::new();

        for row in &rows {
            if let Some(code) = &aggregate_code {
                if row.entity_code.eq_ignore_ascii_case(code) {
                    aggregate_values.insert(row.year, row.deflator);
                }
            }
            let join_key = match key {
                EntityKey::Code => Some(row.entity_code.to_uppercase()),
                EntityKey::Iso3 => row.iso3.as_deref().map(|iso3| iso3.to_uppercase()),
            };
            if let Some(join_key) = join_key {
                combined.insert((row.year, join_key), row.deflator);
            }
        }

        let aggregate = aggregate_code.map(|code| (code, aggregate_values));
        Self { combined, aggregate }
    }

    pub fn len(&self) -> usize {
        self.combined.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combined.is_empty()
    }

    /// Look up the deflator for one (year, entity), consulting the
    /// aggregate bucket when the specific entity is absent.
    pub fn deflator_for(&self, year: i32, entity: &str) -> DeflatorLookup {
        let key = (year, entity.to_uppercase());
        if let Some(&deflator) = self.combined.get(&key) {
            return DeflatorLookup::Direct(deflator);
        }
        if let Some((_, by_year)) = &self.aggregate {
            if let Some(&deflator) = by_year.get(&year) {
                return DeflatorLookup::Aggregate(deflator);
            }
        }
        DeflatorLookup::Missing
    }

    /// Merge the user frame against the combined deflator and apply
    /// `target = value / deflator` (rounded to 6 decimals).
    ///
    /// Returns a new frame: the input's columns in order plus the appended
    /// or overwritten target column. The input frame is never mutated and
    /// the row count is preserved. Rows without deflator coverage get a
    /// null target and are reported once as a deduplicated log block.
    pub fn apply(&self, frame: &Frame, columns: &ApplyColumns) -> Result<Frame> {
        let id_idx = frame.column_index(&columns.id_column, "id_column")?;
        let year_idx = frame.column_index(&columns.year_column, "year_column")?;
        let value_idx = frame.column_index(&columns.value_column, "value_column")?;
        if let Some(fmt) = &columns.year_format {
            validate_year_format(fmt)?;
        }

        let mut targets = Vec::with_capacity(frame.n_rows());
        let mut unmatched: Vec<(String, i32)> = Vec::new();
        let mut substituted: Vec<(String, i32)> = Vec::new();

        for row in 0..frame.n_rows() {
            let entity = frame.cell(row, id_idx).and_then(parse_entity);
            let year = frame
                .cell(row, year_idx)
                .and_then(|cell| parse_year(cell, columns.year_format.as_deref()));
            let value = frame.cell(row, value_idx).and_then(|cell| cell.as_f64());

            let (entity, year) = match (entity, year) {
                (Some(entity), Some(year)) => (entity, year),
                _ => {
                    targets.push(Cell::Null);
                    continue;
                }
            };

            let deflator = match self.deflator_for(year, &entity) {
                DeflatorLookup::Direct(d) => d,
                DeflatorLookup::Aggregate(d) => {
                    substituted.push((entity, year));
                    d
                }
                DeflatorLookup::Missing => {
                    unmatched.push((entity, year));
                    targets.push(Cell::Null);
                    continue;
                }
            };

            match value {
                Some(value) => targets.push(Cell::Float(round6(value / deflator))),
                None => targets.push(Cell::Null),
            }
        }

        log_gaps(&mut unmatched, &mut substituted, self.aggregate.as_ref());

        let mut output = frame.clone();
        output.set_column(&columns.target_column, targets);
        Ok(output)
    }
}

/// Deduplicated diagnostics for coverage gaps and fallback substitutions
fn log_gaps(
    unmatched: &mut Vec<(String, i32)>,
    substituted: &mut Vec<(String, i32)>,
    aggregate: Option<&(String, HashMap<i32, f64>)>,
) {
    if !substituted.is_empty() {
        substituted.sort();
        substituted.dedup();
        let code = aggregate.map(|(code, _)| code.as_str()).unwrap_or("-");
        let pairs: Vec<String> = substituted
            .iter()
            .map(|(entity, year)| format!("{} ({})", entity, year))
            .collect();
        log::info!(
            "substituted aggregate '{}' deflator for: {}",
            code,
            pairs.join(", ")
        );
    }
    if !unmatched.is_empty() {
        unmatched.sort();
        unmatched.dedup();
        let pairs: Vec<String> = unmatched
            .iter()
            .map(|(entity, year)| format!("{} ({})", entity, year))
            .collect();
        log::warn!(
            "no deflator data for {} row(s): {}",
            pairs.len(),
            pairs.join(", ")
        );
    }
}

fn series_lookup(series: &DeflatorSeries) -> HashMap<(i32, String), f64> {
    let mut map = HashMap::new();
    for row in &series.rows {
        if let Some(value) = row.value {
            map.insert((row.year, row.entity_code.to_uppercase()), value);
        }
    }
    map
}

fn rates_lookup(rates: &ExchangeTable) -> HashMap<(i32, String), f64> {
    let mut map = HashMap::new();
    for row in &rates.rows {
        if let Some(value) = row.value {
            map.insert((row.year, row.entity_code.to_uppercase()), value);
        }
    }
    map
}

/// Normalize a user entity cell to the canonical join form
fn parse_entity(cell: &Cell) -> Option<String> {
    match cell {
        Cell::Str(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_uppercase())
            }
        }
        Cell::Int(v) => Some(v.to_string()),
        _ => None,
    }
}

/// Normalize a user year cell: integer years directly, date-like strings
/// through the configured format.
fn parse_year(cell: &Cell, format: Option<&str>) -> Option<i32> {
    match cell {
        Cell::Int(v) => i32::try_from(*v).ok(),
        Cell::Float(v) if v.fract() == 0.0 => Some(*v as i32),
        Cell::Str(s) => {
            let trimmed = s.trim();
            if let Ok(year) = trimmed.parse::<i32>() {
                return Some(year);
            }
            let fmt = format.unwrap_or("%Y-%m-%d");
            chrono::NaiveDate::parse_from_str(trimmed, fmt)
                .ok()
                .map(|date| date.year())
        }
        _ => None,
    }
}

/// Reject malformed strftime formats before any merge
fn validate_year_format(fmt: &str) -> Result<()> {
    use chrono::format::{Item, StrftimeItems};
    if StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error)) {
        return Err(DeflateError::configuration(
            "year_format",
            format!("invalid date format '{}'", fmt),
        ));
    }
    Ok(())
}
