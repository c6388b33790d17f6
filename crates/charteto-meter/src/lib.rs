//! charteto-meter — in-process instrumentation for the Charteto exporter.
//!
//! Application threads record into meters through lock-free atomics; the
//! exporter reads them concurrently once per step. Reads are best-effort
//! snapshots: two statistics of the same meter may be read a few updates
//! apart.
//!
//! # Architecture
//!
//! ```text
//! MeterRegistry
//!   ├── counter() / gauge() / timer() / summary() ...  ← application threads
//!   ├── meters() → Vec<Meter> snapshot                 ← exporter, once per step
//!   └── Clock (system or mock)
//! ```

pub mod clock;
pub mod error;
pub mod meter;
pub mod registry;

mod atomic;

pub use clock::{Clock, MockClock, SystemClock};
pub use error::{MeterError, MeterResult};
pub use meter::{
    Counter, CustomMeter, DistributionSummary, FunctionCounter, FunctionTimer, Gauge,
    LongTaskSample, LongTaskTimer, Meter, Timer,
};
pub use registry::MeterRegistry;
