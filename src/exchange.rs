//! Exchange-rate triangulation
//!
//! Agency tables quote every entity's local currency against a single
//! reference currency. [`ExchangeTable::bilateral`] derives the rate between
//! any two currencies by triangulating through the reference: each output
//! row holds units of the target currency per one unit of the source
//! currency, so converting a value is a multiplication (and the engine's
//! divide-based apply uses the reciprocal). The special token
//! [`crate::source::LCU`] requests each entity's own local currency.

use crate::error::{DeflateError, Result};
use crate::rebase::{DeflatorKind, DeflatorSeries};
use crate::source::{SeriesRow, LCU};
use hashbrown::HashMap;

/// Per-source exchange-rate table. Rows hold the quoted rate: local
/// currency units per one reference-currency unit. The reference currency's
/// own rate is 1 for every year (implicitly, even when the table has no row
/// for it).
#[derive(Debug, Clone)]
pub struct ExchangeTable {
    pub source_name: String,
    /// Entity code of the reference currency
    pub reference: String,
    pub rows: Vec<SeriesRow>,
}

/// How one side of a currency pair resolves against the table
enum CurrencyRates {
    /// The reference currency itself: rate 1 every year
    Reference,
    /// Each entity's own local currency: the row's quoted rate
    Local,
    /// A concrete currency: its per-year quoted rates
    Quoted(HashMap<i32, f64>),
}

impl ExchangeTable {
    pub fn new(source_name: &str, reference: &str, rows: Vec<SeriesRow>) -> Self {
        Self {
            source_name: source_name.to_string(),
            reference: reference.to_string(),
            rows,
        }
    }

    /// Triangulate the bilateral rate between two currencies.
    ///
    /// Output rows hold target units per one source unit for each
    /// (year, entity). A year where either leg's quoted rate is zero or
    /// missing yields null (propagated, never defaulted). Identical source
    /// and target skip triangulation entirely: the rate is 1 everywhere.
    pub fn bilateral(&self, source_currency: &str, target_currency: &str) -> Result<Self> {
        if source_currency.eq_ignore_ascii_case(target_currency) {
            let rows = self
                .rows
                .iter()
                .map(|row| SeriesRow {
                    year: row.year,
                    entity_code: row.entity_code.clone(),
                    iso3: row.iso3.clone(),
                    value: Some(1.0),
                })
                .collect();
            return Ok(Self::new(&self.source_name, &self.reference, rows));
        }

        let source_rates = self.resolve(source_currency, "source_currency")?;
        let target_rates = self.resolve(target_currency, "target_currency")?;

        let rows = self
            .rows
            .iter()
            .map(|row| {
                let numer = Self::rate_at(&target_rates, row);
                let denom = Self::rate_at(&source_rates, row);
                let value = match (numer, denom) {
                    (Some(n), Some(d)) if d != 0.0 => Some(n / d),
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

        Ok(Self::new(&self.source_name, &self.reference, rows))
    }

    /// Rebase this table's rate series to `base_year`, isolating the rate's
    /// own drift from its absolute level.
    pub fn deflator(&self, base_year: i32) -> Result<DeflatorSeries> {
        DeflatorSeries::rebased(DeflatorKind::Exchange, &self.rows, base_year)
    }

    fn resolve(&self, currency: &str, parameter: &str) -> Result<CurrencyRates> {
        if currency.eq_ignore_ascii_case(LCU) {
            return Ok(CurrencyRates::Local);
        }
        if currency.eq_ignore_ascii_case(&self.reference) {
            return Ok(CurrencyRates::Reference);
        }

        let mut rates = HashMap::new();
        let mut known = false;
        for row in &self.rows {
            let matches = row.entity_code.eq_ignore_ascii_case(currency)
                || row
                    .iso3
                    .as_deref()
                    .map(|iso3| iso3.eq_ignore_ascii_case(currency))
                    .unwrap_or(false);
            if matches {
                known = true;
                if let Some(value) = row.value {
                    rates.insert(row.year, value);
                }
            }
        }
        if !known {
            return Err(DeflateError::configuration(
                parameter,
                format!(
                    "unknown currency code '{}' for source '{}'",
                    currency, self.source_name
                ),
            ));
        }
        Ok(CurrencyRates::Quoted(rates))
    }

    fn rate_at(rates: &CurrencyRates, row: &SeriesRow) -> Option<f64> {
        match rates {
            CurrencyRates::Reference => Some(1.0),
            CurrencyRates::Local => row.value,
            CurrencyRates::Quoted(by_year) => by_year.get(&row.year).copied(),
        }
    }
}
