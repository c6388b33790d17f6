//! Exporter error types.

use std::time::Duration;

use thiserror::Error;

use charteto_meter::MeterError;

/// Errors raised while delivering one request to the collector.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{phase} timed out after {after:?}")]
    Timeout { phase: &'static str, after: Duration },

    #[error("tls error: {0}")]
    Tls(String),

    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    #[error("invalid request: {0}")]
    Request(#[from] http::Error),

    #[error("failed to read response body: {0}")]
    Body(String),
}

/// Errors surfaced by the exporter.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Send(#[from] SendError),

    #[error("failed to serialize batch: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("meter registration failed: {0}")]
    Meter(#[from] MeterError),

    #[error("the exporter must be started from within a tokio runtime")]
    NoRuntime,
}

pub type ExportResult<T> = Result<T, ExportError>;
