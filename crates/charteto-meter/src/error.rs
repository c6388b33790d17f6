//! Meter registration errors.

use thiserror::Error;

pub type MeterResult<T> = Result<T, MeterError>;

#[derive(Debug, Error)]
pub enum MeterError {
    /// The identity is already registered as a different kind of meter.
    #[error("meter '{name}' is already registered as a {existing}, not a {requested}")]
    KindMismatch {
        name: String,
        existing: &'static str,
        requested: &'static str,
    },
}
