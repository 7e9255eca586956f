//! User-facing entry points
//!
//! A [`Session`] carries the engine configuration and the source registry;
//! `deflate` and `exchange` are pure over their input frame and return a new
//! frame with the target column appended. Both are thin orchestration over
//! [`compute_deflator`], the single generic entry point driven by each
//! source's [`crate::source::SourceSpec`].

use crate::cache::DatasetCache;
use crate::config::EngineConfig;
use crate::error::{DeflateError, Result};
use crate::frame::Frame;
use crate::pipeline::{ApplyColumns, DeflationPipeline, EntityKey};
use crate::rebase::{DeflatorKind, DeflatorSeries};
use crate::source::{PriceKind, Reader, Source, SourceRegistry, SourceSpec};

/// Parameters for a deflation request
#[derive(Debug, Clone)]
pub struct DeflateParams {
    /// Registered source name (e.g. "imf", "world_bank", "dac")
    pub source: String,
    pub price_kind: PriceKind,
    /// Year at which the combined deflator indexes to 1
    pub base_year: i32,
    pub source_currency: String,
    pub target_currency: String,
    pub id_column: String,
    /// Join user ids on ISO3 instead of the source's native entity code
    pub use_iso3: bool,
    pub year_column: String,
    pub year_format: Option<String>,
    pub value_column: String,
    pub target_column: String,
    /// Convert constant to current prices instead of current to constant
    pub to_current: bool,
    /// Force a refresh of the underlying datasets
    pub update: bool,
}

impl DeflateParams {
    pub fn new(source: impl Into<String>, base_year: i32) -> Self {
        Self {
            source: source.into(),
            price_kind: PriceKind::Gdp,
            base_year,
            source_currency: "USA".to_string(),
            target_currency: "USA".to_string(),
            id_column: "iso3".to_string(),
            use_iso3: true,
            year_column: "year".to_string(),
            year_format: None,
            value_column: "value".to_string(),
            target_column: "value_constant".to_string(),
            to_current: false,
            update: false,
        }
    }

    pub fn price_kind(mut self, kind: PriceKind) -> Self {
        self.price_kind = kind;
        self
    }

    pub fn currencies(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.source_currency = source.into();
        self.target_currency = target.into();
        self
    }

    pub fn columns(
        mut self,
        id: impl Into<String>,
        year: impl Into<String>,
        value: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.id_column = id.into();
        self.year_column = year.into();
        self.value_column = value.into();
        self.target_column = target.into();
        self
    }

    pub fn year_format(mut self, format: impl Into<String>) -> Self {
        self.year_format = Some(format.into());
        self
    }

    pub fn by_entity_code(mut self) -> Self {
        self.use_iso3 = false;
        self
    }

    pub fn to_current(mut self, to_current: bool) -> Self {
        self.to_current = to_current;
        self
    }

    pub fn update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }
}

/// Parameters for a pure currency-conversion request
#[derive(Debug, Clone)]
pub struct ExchangeParams {
    pub source: String,
    pub source_currency: String,
    pub target_currency: String,
    pub id_column: String,
    pub use_iso3: bool,
    pub year_column: String,
    pub year_format: Option<String>,
    pub value_column: String,
    pub target_column: String,
    pub update: bool,
}

impl ExchangeParams {
    pub fn new(
        source: impl Into<String>,
        source_currency: impl Into<String>,
        target_currency: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            source_currency: source_currency.into(),
            target_currency: target_currency.into(),
            id_column: "iso3".to_string(),
            use_iso3: true,
            year_column: "year".to_string(),
            year_format: None,
            value_column: "value".to_string(),
            target_column: "value_converted".to_string(),
            update: false,
        }
    }

    pub fn columns(
        mut self,
        id: impl Into<String>,
        year: impl Into<String>,
        value: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.id_column = id.into();
        self.year_column = year.into();
        self.value_column = value.into();
        self.target_column = target.into();
        self
    }

    pub fn by_entity_code(mut self) -> Self {
        self.use_iso3 = false;
        self
    }
}

/// Build the combined deflator pipeline for one configuration tuple.
///
/// This is the data-driven core shared by every (source, indicator)
/// combination: price index rebased to the base year, exchange rate
/// triangulated then rebased, and the three factors combined according to
/// the source's spec (aggregate fallback included).
pub fn compute_deflator(
    source: &dyn Source,
    price_kind: PriceKind,
    base_year: i32,
    source_currency: &str,
    target_currency: &str,
    to_current: bool,
    key: EntityKey,
) -> Result<DeflationPipeline> {
    let price_series = source.price_index(price_kind)?;
    let price = DeflatorSeries::rebased(DeflatorKind::Price, &price_series, base_year)?;

    let quoted = source.reference_currency_rate()?;
    let bilateral = quoted.bilateral(source_currency, target_currency)?;
    let exchange_deflator = if source_currency.eq_ignore_ascii_case(target_currency) {
        DeflatorSeries::identity(DeflatorKind::Exchange, &bilateral.rows, base_year)
    } else {
        bilateral.deflator(base_year)?
    };

    let spec = source.spec();
    let pipeline = DeflationPipeline::for_deflation(
        &price,
        &exchange_deflator,
        &bilateral,
        to_current,
        key,
        spec.aggregate_entity.as_deref(),
    );
    log::debug!(
        "combined deflator for source '{}': {} rows (base {}, {} -> {}, to_current={})",
        spec.name,
        pipeline.len(),
        base_year,
        source_currency,
        target_currency,
        to_current
    );
    Ok(pipeline)
}

/// Engine session: explicit configuration plus the runtime source registry
pub struct Session {
    config: EngineConfig,
    registry: SourceRegistry,
}

impl Session {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: SourceRegistry::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SourceRegistry {
        &mut self.registry
    }

    /// Register a canonical reader under its spec's name
    pub fn register_source(&mut self, spec: SourceSpec, reader: Reader) {
        self.registry.register_reader(spec, reader);
    }

    /// Open the dataset cache at this session's resolved root
    pub fn cache(&self) -> Result<DatasetCache> {
        DatasetCache::new(self.config.resolve_cache_root()?)
    }

    /// Convert values between current and constant prices (and currencies).
    /// Returns a new frame; `data` is never mutated.
    pub fn deflate(&self, data: &Frame, params: &DeflateParams) -> Result<Frame> {
        let columns = ApplyColumns {
            id_column: params.id_column.clone(),
            year_column: params.year_column.clone(),
            value_column: params.value_column.clone(),
            target_column: params.target_column.clone(),
            year_format: params.year_format.clone(),
        };
        validate_request(data, &columns, Some(params.base_year))?;

        let source = self
            .registry
            .create(&params.source, &self.config, params.update)?;
        let key = entity_key(params.use_iso3);
        let pipeline = compute_deflator(
            source.as_ref(),
            params.price_kind,
            params.base_year,
            &params.source_currency,
            &params.target_currency,
            params.to_current,
            key,
        )?;
        pipeline.apply(data, &columns)
    }

    /// Convert values between currencies, with no price-index component.
    /// Returns a new frame; `data` is never mutated.
    pub fn exchange(&self, data: &Frame, params: &ExchangeParams) -> Result<Frame> {
        let columns = ApplyColumns {
            id_column: params.id_column.clone(),
            year_column: params.year_column.clone(),
            value_column: params.value_column.clone(),
            target_column: params.target_column.clone(),
            year_format: params.year_format.clone(),
        };
        validate_request(data, &columns, None)?;

        let source = self
            .registry
            .create(&params.source, &self.config, params.update)?;
        let quoted = source.reference_currency_rate()?;
        let bilateral = quoted.bilateral(&params.source_currency, &params.target_currency)?;

        let spec = source.spec();
        let pipeline = DeflationPipeline::for_exchange(
            &bilateral,
            entity_key(params.use_iso3),
            spec.aggregate_entity.as_deref(),
        );
        pipeline.apply(data, &columns)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

fn entity_key(use_iso3: bool) -> EntityKey {
    if use_iso3 {
        EntityKey::Iso3
    } else {
        EntityKey::Code
    }
}

/// Reject malformed requests before any data is loaded or merged
fn validate_request(data: &Frame, columns: &ApplyColumns, base_year: Option<i32>) -> Result<()> {
    data.column_index(&columns.id_column, "id_column")?;
    data.column_index(&columns.year_column, "year_column")?;
    data.column_index(&columns.value_column, "value_column")?;
    if columns.target_column.is_empty() {
        return Err(DeflateError::configuration(
            "target_column",
            "target column name must not be empty",
        ));
    }
    if let Some(year) = base_year {
        if !(1900..=2100).contains(&year) {
            return Err(DeflateError::configuration(
                "base_year",
                format!("{} is not a plausible calendar year", year),
            ));
        }
    }
    Ok(())
}
