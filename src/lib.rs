//! # rusty_deflator
//!
//! Convert monetary values between current and constant prices, and between
//! currencies, using published macroeconomic indicators (GDP/CPI deflators,
//! exchange rates) from multiple statistical agencies.
//!
//! The engine caches remote datasets on disk with TTL and version
//! invalidation, triangulates exchange rates between arbitrary currency
//! pairs from rates quoted against one reference currency, rebases price
//! and exchange indices to a common base year, and combines them into a
//! single per-entity, per-year deflator applied to user values.
//!
//! ## Example
//!
//! ```rust
//! use rusty_deflator::prelude::*;
//! use rusty_deflator::source::{CanonicalRow, CanonicalTable, SourceSpec};
//!
//! let mut session = Session::default();
//! session.register_source(
//!     SourceSpec::imf(),
//!     Box::new(|_update| {
//!         Ok(CanonicalTable::new(vec![
//!             CanonicalRow::new(2022, "USA", Some("USA"))
//!                 .with_gdp_deflator(100.0)
//!                 .with_exchange_rate(1.0),
//!         ]))
//!     }),
//! );
//!
//! let mut data = Frame::with_columns(&["iso3", "year", "value"]);
//! data.push_row(vec![
//!     Cell::Str("USA".to_string()),
//!     Cell::Int(2022),
//!     Cell::Float(100.0),
//! ])
//! .unwrap();
//!
//! let params = DeflateParams::new("imf", 2022);
//! let output = session.deflate(&data, &params).unwrap();
//! assert_eq!(output.n_rows(), 1);
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod exchange;
#[cfg(feature = "http")]
pub mod fetch;
pub mod frame;
pub mod pipeline;
pub mod rebase;
pub mod source;

pub mod prelude {
    //! Commonly used types
    pub use crate::api::{compute_deflator, DeflateParams, ExchangeParams, Session};
    pub use crate::cache::{CacheEntry, DatasetCache};
    pub use crate::config::EngineConfig;
    pub use crate::error::{DeflateError, Result};
    pub use crate::exchange::ExchangeTable;
    pub use crate::frame::{Cell, Frame};
    pub use crate::pipeline::{DeflationPipeline, EntityKey};
    pub use crate::rebase::{DeflatorKind, DeflatorSeries};
    pub use crate::source::{PriceKind, Source, SourceRegistry, SourceSpec, LCU};
}
