//! Canonical data sources
//!
//! External readers hand the engine a [`CanonicalTable`] with a fixed record
//! schema: the join key (year, entity_code, iso3) plus named indicator
//! fields. Concrete agencies (IMF, World Bank, DAC, user plugins) are
//! variants behind the [`Source`] capability trait, selected through a
//! runtime [`SourceRegistry`] rather than inheritance. Per-source
//! configuration lives in the data-driven [`SourceSpec`] table.

use crate::config::EngineConfig;
use crate::error::{DeflateError, Result};
use crate::exchange::ExchangeTable;
use std::fmt;

/// Special currency token: "each entity's own local currency unit".
pub const LCU: &str = "LCU";

/// Price-index families published by the supported agencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriceKind {
    /// GDP deflator
    Gdp,
    /// Consumer price index
    Cpi,
}

impl PriceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceKind::Gdp => "gdp",
            PriceKind::Cpi => "cpi",
        }
    }

    /// Parse a user-supplied kind name
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "gdp" => Ok(PriceKind::Gdp),
            "cpi" => Ok(PriceKind::Cpi),
            _ => Err(DeflateError::configuration(
                "price_kind",
                format!("unknown price kind '{}' (known kinds: gdp, cpi)", s),
            )),
        }
    }
}

impl fmt::Display for PriceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The unit record flowing through the engine: join key plus named
/// indicator values. Indicators a source does not publish stay `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRow {
    pub year: i32,
    pub entity_code: String,
    pub iso3: Option<String>,
    pub gdp_deflator: Option<f64>,
    pub cpi: Option<f64>,
    /// Local currency units per one reference-currency unit
    pub exchange_rate: Option<f64>,
}

impl CanonicalRow {
    pub fn new(year: i32, entity_code: impl Into<String>, iso3: Option<&str>) -> Self {
        Self {
            year,
            entity_code: entity_code.into(),
            iso3: iso3.map(|s| s.to_string()),
            gdp_deflator: None,
            cpi: None,
            exchange_rate: None,
        }
    }

    pub fn with_gdp_deflator(mut self, value: f64) -> Self {
        self.gdp_deflator = Some(value);
        self
    }

    pub fn with_cpi(mut self, value: f64) -> Self {
        self.cpi = Some(value);
        self
    }

    pub fn with_exchange_rate(mut self, value: f64) -> Self {
        self.exchange_rate = Some(value);
        self
    }

    fn price_value(&self, kind: PriceKind) -> Option<f64> {
        match kind {
            PriceKind::Gdp => self.gdp_deflator,
            PriceKind::Cpi => self.cpi,
        }
    }
}

/// A validated set of canonical rows for one source
#[derive(Debug, Clone, Default)]
pub struct CanonicalTable {
    pub rows: Vec<CanonicalRow>,
}

impl CanonicalTable {
    pub fn new(rows: Vec<CanonicalRow>) -> Self {
        Self { rows }
    }
}

/// One row of a single-indicator projection: the join key plus one value
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRow {
    pub year: i32,
    pub entity_code: String,
    pub iso3: Option<String>,
    pub value: Option<f64>,
}

/// Per-source configuration: reference currency, fallback aggregate,
/// published price kinds, cache ttl. One entry per supported agency; user
/// plugins supply their own.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub name: String,
    /// Entity code of the currency all exchange rates are quoted against
    pub reference_currency: String,
    /// Aggregate/bucket entity used as a deflator fallback, when the source
    /// defines one
    pub aggregate_entity: Option<String>,
    pub price_kinds: Vec<PriceKind>,
    pub ttl_days: i64,
}

impl SourceSpec {
    /// IMF World Economic Outlook
    pub fn imf() -> Self {
        Self {
            name: "imf".to_string(),
            reference_currency: "USA".to_string(),
            aggregate_entity: None,
            price_kinds: vec![PriceKind::Gdp, PriceKind::Cpi],
            ttl_days: 30,
        }
    }

    /// World Bank development indicators
    pub fn world_bank() -> Self {
        Self {
            name: "world_bank".to_string(),
            reference_currency: "USA".to_string(),
            aggregate_entity: None,
            price_kinds: vec![PriceKind::Gdp, PriceKind::Cpi],
            ttl_days: 30,
        }
    }

    /// OECD DAC deflators. Entities missing from the table fall back to the
    /// "DAC members total" aggregate.
    pub fn dac() -> Self {
        Self {
            name: "dac".to_string(),
            reference_currency: "USA".to_string(),
            aggregate_entity: Some("DAC".to_string()),
            price_kinds: vec![PriceKind::Gdp],
            ttl_days: 30,
        }
    }

    /// Look up a built-in spec by name
    pub fn builtin(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "imf" => Ok(Self::imf()),
            "world_bank" | "wb" => Ok(Self::world_bank()),
            "dac" | "oecd_dac" => Ok(Self::dac()),
            _ => Err(DeflateError::configuration(
                "source",
                format!(
                    "unknown source '{}' (built-in sources: imf, world_bank, dac)",
                    name
                ),
            )),
        }
    }
}

/// Capability interface every concrete source exposes
pub trait Source: Send + Sync {
    fn spec(&self) -> &SourceSpec;

    /// The (year, entity_code, iso3, value) projection for one price kind.
    /// Unknown or unpublished kinds are a configuration error naming the
    /// kinds this source carries.
    fn price_index(&self, kind: PriceKind) -> Result<Vec<SeriesRow>>;

    /// The (year, entity_code, iso3, rate) projection of the source's
    /// local-currency-per-reference exchange indicator.
    fn reference_currency_rate(&self) -> Result<ExchangeTable>;
}

/// Reader contract: external collaborators produce a canonical table,
/// using the dataset cache internally. `update` forces a refresh.
pub type Reader = Box<dyn Fn(bool) -> Result<CanonicalTable> + Send + Sync>;

/// A canonical source: a validated table plus its spec
pub struct CanonicalSource {
    spec: SourceSpec,
    table: CanonicalTable,
}

impl CanonicalSource {
    /// Invoke the reader and validate the resulting table
    pub fn load(spec: SourceSpec, reader: &Reader, update: bool, validate: bool) -> Result<Self> {
        let table = reader(update)?;
        if validate {
            validate_table(&table, &spec.name)?;
        }
        Ok(Self { spec, table })
    }

    /// Wrap an already-materialized table (validated)
    pub fn from_table(spec: SourceSpec, table: CanonicalTable) -> Result<Self> {
        validate_table(&table, &spec.name)?;
        Ok(Self { spec, table })
    }

    fn kinds_with_data(&self) -> Vec<PriceKind> {
        [PriceKind::Gdp, PriceKind::Cpi]
            .iter()
            .copied()
            .filter(|kind| self.table.rows.iter().any(|r| r.price_value(*kind).is_some()))
            .collect()
    }
}

impl fmt::Debug for CanonicalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanonicalSource")
            .field("spec", &self.spec)
            .field("rows", &self.table.rows.len())
            .finish()
    }
}

impl Source for CanonicalSource {
    fn spec(&self) -> &SourceSpec {
        &self.spec
    }

    fn price_index(&self, kind: PriceKind) -> Result<Vec<SeriesRow>> {
        let available = self.kinds_with_data();
        if !available.contains(&kind) {
            let names: Vec<&str> = available.iter().map(|k| k.as_str()).collect();
            return Err(DeflateError::configuration(
                "price_kind",
                format!(
                    "source '{}' has no '{}' price index (available: {})",
                    self.spec.name,
                    kind,
                    names.join(", ")
                ),
            ));
        }
        Ok(self
            .table
            .rows
            .iter()
            .map(|r| SeriesRow {
                year: r.year,
                entity_code: r.entity_code.clone(),
                iso3: r.iso3.clone(),
                value: r.price_value(kind),
            })
            .collect())
    }

    fn reference_currency_rate(&self) -> Result<ExchangeTable> {
        if !self.table.rows.iter().any(|r| r.exchange_rate.is_some()) {
            return Err(DeflateError::data_source(
                &self.spec.name,
                "source carries no exchange-rate indicator",
            ));
        }
        let rows = self
            .table
            .rows
            .iter()
            .map(|r| SeriesRow {
                year: r.year,
                entity_code: r.entity_code.clone(),
                iso3: r.iso3.clone(),
                value: r.exchange_rate,
            })
            .collect();
        Ok(ExchangeTable::new(
            &self.spec.name,
            &self.spec.reference_currency,
            rows,
        ))
    }
}

/// Structural validation at the reader boundary. The fixed record schema
/// already rules out column collisions, so validation checks shape: a
/// non-empty table, well-formed key fields, and at least one populated
/// indicator.
pub fn validate_table(table: &CanonicalTable, name: &str) -> Result<()> {
    if table.rows.is_empty() {
        return Err(DeflateError::data_source(name, "canonical table is empty"));
    }
    for row in &table.rows {
        if row.entity_code.is_empty() {
            return Err(DeflateError::data_source(
                name,
                format!("row for year {} has an empty entity code", row.year),
            ));
        }
        if !(1900..=2100).contains(&row.year) {
            return Err(DeflateError::data_source(
                name,
                format!("year {} out of range", row.year),
            ));
        }
    }
    let any_indicator = table
        .rows
        .iter()
        .any(|r| r.gdp_deflator.is_some() || r.cpi.is_some() || r.exchange_rate.is_some());
    if !any_indicator {
        return Err(DeflateError::data_source(
            name,
            "no indicator carries any data",
        ));
    }
    Ok(())
}

/// Constructor stored per source name
pub type SourceCtor = Box<dyn Fn(&EngineConfig, bool) -> Result<Box<dyn Source>> + Send + Sync>;

/// Runtime registry mapping source names to constructors
#[derive(Default)]
pub struct SourceRegistry {
    ctors: hashbrown::HashMap<String, SourceCtor>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            ctors: hashbrown::HashMap::new(),
        }
    }

    /// Register a constructor under a source name. Later registrations
    /// replace earlier ones.
    pub fn register(&mut self, name: impl Into<String>, ctor: SourceCtor) {
        self.ctors.insert(name.into(), ctor);
    }

    /// Register a canonical reader plus its spec; the constructor loads and
    /// validates per the engine configuration.
    pub fn register_reader(&mut self, spec: SourceSpec, reader: Reader) {
        let name = spec.name.clone();
        self.register(
            name,
            Box::new(move |config: &EngineConfig, update: bool| {
                let source = CanonicalSource::load(spec.clone(), &reader, update, config.validate)?;
                Ok(Box::new(source) as Box<dyn Source>)
            }),
        );
    }

    /// Instantiate a registered source
    pub fn create(&self, name: &str, config: &EngineConfig, update: bool) -> Result<Box<dyn Source>> {
        match self.ctors.get(name) {
            Some(ctor) => ctor(config, update),
            None => {
                let mut known: Vec<&str> = self.ctors.keys().map(|s| s.as_str()).collect();
                known.sort_unstable();
                Err(DeflateError::configuration(
                    "source",
                    format!(
                        "source '{}' is not registered (registered: {})",
                        name,
                        known.join(", ")
                    ),
                ))
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ctors.contains_key(name)
    }

    /// Registered source names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.ctors.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> CanonicalTable {
        CanonicalTable::new(vec![
            CanonicalRow::new(2021, "USA", Some("USA"))
                .with_gdp_deflator(95.0)
                .with_exchange_rate(1.0),
            CanonicalRow::new(2022, "USA", Some("USA"))
                .with_gdp_deflator(100.0)
                .with_exchange_rate(1.0),
            CanonicalRow::new(2022, "FRA", Some("FRA"))
                .with_gdp_deflator(102.0)
                .with_exchange_rate(0.95),
        ])
    }

    #[test]
    fn test_validate_empty_table() {
        let err = validate_table(&CanonicalTable::default(), "imf").unwrap_err();
        assert!(matches!(err, DeflateError::DataSource { .. }));
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_validate_rejects_blank_entity() {
        let table = CanonicalTable::new(vec![CanonicalRow::new(2020, "", None).with_cpi(1.0)]);
        assert!(validate_table(&table, "imf").is_err());
    }

    #[test]
    fn test_validate_requires_some_indicator() {
        let table = CanonicalTable::new(vec![CanonicalRow::new(2020, "USA", Some("USA"))]);
        let err = validate_table(&table, "imf").unwrap_err();
        assert!(err.to_string().contains("no indicator"));
    }

    #[test]
    fn test_price_index_projection() {
        let source = CanonicalSource::from_table(SourceSpec::imf(), sample_table()).unwrap();
        let series = source.price_index(PriceKind::Gdp).unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series[0].value, Some(95.0));
    }

    #[test]
    fn test_price_index_unknown_kind_lists_available() {
        let source = CanonicalSource::from_table(SourceSpec::imf(), sample_table()).unwrap();
        let err = source.price_index(PriceKind::Cpi).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("cpi"));
        assert!(message.contains("available: gdp"));
    }

    #[test]
    fn test_reference_rate_requires_indicator() {
        let table = CanonicalTable::new(vec![
            CanonicalRow::new(2020, "USA", Some("USA")).with_gdp_deflator(90.0)
        ]);
        let source = CanonicalSource::from_table(SourceSpec::imf(), table).unwrap();
        assert!(source.reference_currency_rate().is_err());
    }

    #[test]
    fn test_registry_create_and_unknown() {
        let mut registry = SourceRegistry::new();
        registry.register_reader(
            SourceSpec::imf(),
            Box::new(|_| Ok(sample_table())),
        );
        let config = EngineConfig::default();

        let source = registry.create("imf", &config, false).unwrap();
        assert_eq!(source.spec().name, "imf");

        let err = registry.create("nope", &config, false).err().unwrap();
        assert!(err.to_string().contains("registered: imf"));
    }

    #[test]
    fn test_builtin_specs() {
        assert_eq!(SourceSpec::builtin("wb").unwrap().name, "world_bank");
        assert_eq!(
            SourceSpec::builtin("dac").unwrap().aggregate_entity,
            Some("DAC".to_string())
        );
        assert!(SourceSpec::builtin("xxx").is_err());
    }

    #[test]
    fn test_price_kind_parse() {
        assert_eq!(PriceKind::parse("GDP").unwrap(), PriceKind::Gdp);
        assert!(PriceKind::parse("deflator").is_err());
    }
}
