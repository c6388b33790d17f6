//! charteto-export — pushes meters to the Charteto collector.
//!
//! # Architecture
//!
//! ```text
//! ChartetoMeterRegistry (every step)
//!   └── Publisher::publish(meters)
//!         ├── batch::partition(meters, batch_size)
//!         └── per batch:
//!               Expander::expand_isolated(meter) → DataPoints
//!               batch::serialize(batch_id, points) → JSON body
//!               HttpSender::post(endpoint, headers, body) → BatchOutcome
//! ```
//!
//! A publish cycle never returns an error to its caller: per-batch results
//! are collected in a [`PublishReport`] and failures are logged.

pub mod batch;
pub mod error;
pub mod expand;
pub mod publisher;
pub mod registry;
pub mod sender;

#[cfg(test)]
mod testing;

pub use batch::{Batch, partition, serialize};
pub use error::{ExportError, ExportResult, SendError};
pub use expand::Expander;
pub use publisher::{BatchOutcome, BatchReport, PublishReport, Publisher};
pub use registry::{ChartetoMeterRegistry, ChartetoMeterRegistryBuilder};
pub use sender::{BoxFuture, HttpResponse, HttpSender, HyperSender};
