//! charteto-core — shared model and wire-contract rules for the Charteto
//! metrics exporter.
//!
//! The collector accepts a narrow vocabulary: names must start with a
//! letter and fit in 200 characters, units must come from a fixed list,
//! and every point is either a `COUNT` or a `GAUGE`. This crate owns those
//! rules so the meter registry and the exporter agree on them.
//!
//! # Layout
//!
//! ```text
//! types     → MeterId, Tag, Statistic, Measurement, DataPoint
//! naming    → ChartetoNaming (name / tag key / tag value sanitizer)
//! metadata  → sanitize_base_unit(), sanitize_type()
//! config    → ChartetoConfig + validation
//! ```

pub mod config;
pub mod error;
pub mod metadata;
pub mod naming;
pub mod types;

pub use config::ChartetoConfig;
pub use error::{ConfigError, ConfigResult};
pub use metadata::{sanitize_base_unit, sanitize_type};
pub use naming::{ChartetoNaming, DotNaming, NamingConvention};
pub use types::*;
