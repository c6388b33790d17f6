//! Scheduled exporter — a meter registry that pushes itself to Charteto.
//!
//! # Architecture
//!
//! ```text
//! ChartetoMeterRegistry ──derefs to──► MeterRegistry ◄── application threads
//!        │
//!        ├── start() ─► background task
//!        │                 loop { sleep to next step boundary → publish }
//!        │                 on shutdown: final publish, exit
//!        ├── publish() ─► single-flight cycle in its own task
//!        └── stop()   ─► watch signal, await task
//! ```

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use charteto_core::{ChartetoConfig, MeterId, Tag};
use charteto_meter::{Clock, Counter, MeterRegistry, SystemClock};

use crate::error::{ExportError, ExportResult};
use crate::publisher::{PublishReport, Publisher};
use crate::sender::{HttpSender, HyperSender};

/// Counter of batches per publish result, tagged `result=success|failure`.
pub const BATCHES_METRIC: &str = "charteto.exporter.batches";

/// A [`MeterRegistry`] that publishes its meters to Charteto every step.
pub struct ChartetoMeterRegistry {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

struct Shared {
    config: ChartetoConfig,
    registry: MeterRegistry,
    publisher: Publisher,
    in_flight: AtomicBool,
    batches_sent: Arc<Counter>,
    batches_failed: Arc<Counter>,
}

/// Handle to the background publish task.
struct Worker {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl ChartetoMeterRegistry {
    /// Registry on the system clock posting through [`HyperSender`].
    pub fn new(config: ChartetoConfig) -> ExportResult<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: ChartetoConfig) -> ChartetoMeterRegistryBuilder {
        ChartetoMeterRegistryBuilder {
            config,
            clock: None,
            sender: None,
            common_tags: Vec::new(),
        }
    }

    pub fn config(&self) -> &ChartetoConfig {
        &self.shared.config
    }

    /// Start publishing every step in the background.
    ///
    /// Does nothing when publishing is disabled or already running. Must be
    /// called from within a Tokio runtime.
    pub fn start(&self) -> ExportResult<()> {
        let config = &self.shared.config;
        if config.enabled && config.api_key.is_none() {
            info!("an api key must be configured in order for metrics to be sent to charteto");
        }
        if !config.enabled {
            info!("charteto publishing is disabled");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ExportError::NoRuntime)?;
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            debug!("charteto exporter already running");
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = runtime.spawn(run_publish_loop(Arc::clone(&self.shared), shutdown_rx));
        *worker = Some(Worker {
            handle,
            shutdown_tx,
        });

        info!(
            endpoint = %self.shared.publisher.endpoint(),
            step_secs = config.step.as_secs_f64(),
            "charteto exporter started"
        );
        Ok(())
    }

    /// Stop scheduling, publish once more and wait for the task to finish.
    /// An in-flight request is allowed to complete.
    pub async fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = worker else {
            return;
        };

        let _ = worker.shutdown_tx.send(true);
        if let Err(e) = worker.handle.await {
            warn!(error = %e, "charteto exporter task ended abnormally");
        }
        info!("charteto exporter stopped");
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Run one publish cycle now.
    ///
    /// Returns `None` when another cycle is still in flight or the cycle
    /// panicked; both are logged. Must be called from within a Tokio
    /// runtime.
    pub async fn publish(&self) -> Option<PublishReport> {
        self.shared.publish_isolated().await
    }
}

impl Deref for ChartetoMeterRegistry {
    type Target = MeterRegistry;

    fn deref(&self) -> &MeterRegistry {
        &self.shared.registry
    }
}

impl Drop for ChartetoMeterRegistry {
    fn drop(&mut self) {
        // The task flushes once more on its own.
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            let _ = worker.shutdown_tx.send(true);
        }
    }
}

impl std::fmt::Debug for ChartetoMeterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChartetoMeterRegistry")
            .field("publisher", &self.shared.publisher)
            .field("meters", &self.shared.registry.len())
            .field("running", &self.is_running())
            .finish()
    }
}

// ── Builder ────────────────────────────────────────────────────────

/// Overrides for the clock, the transport and common tags.
pub struct ChartetoMeterRegistryBuilder {
    config: ChartetoConfig,
    clock: Option<Arc<dyn Clock>>,
    sender: Option<Arc<dyn HttpSender>>,
    common_tags: Vec<Tag>,
}

impl ChartetoMeterRegistryBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn sender(mut self, sender: Arc<dyn HttpSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Tags added to every meter, including the exporter's own.
    pub fn common_tags<I>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = Tag>,
    {
        self.common_tags.extend(tags);
        self
    }

    pub fn build(self) -> ExportResult<ChartetoMeterRegistry> {
        let sender: Arc<dyn HttpSender> = match self.sender {
            Some(sender) => sender,
            None => Arc::new(HyperSender::from_config(&self.config)?),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock::new()),
        };

        let registry =
            MeterRegistry::new(clock, self.config.step).with_common_tags(self.common_tags);
        let batches_sent =
            registry.counter(MeterId::named(BATCHES_METRIC).with_tag("result", "success"))?;
        let batches_failed =
            registry.counter(MeterId::named(BATCHES_METRIC).with_tag("result", "failure"))?;

        Ok(ChartetoMeterRegistry {
            shared: Arc::new(Shared {
                publisher: Publisher::new(&self.config, sender),
                config: self.config,
                registry,
                in_flight: AtomicBool::new(false),
                batches_sent,
                batches_failed,
            }),
            worker: Mutex::new(None),
        })
    }
}

// ── Publish cycle ──────────────────────────────────────────────────

impl Shared {
    async fn publish(&self) -> Option<PublishReport> {
        let Some(_flight) = InFlight::acquire(&self.in_flight) else {
            debug!("previous charteto publish still in flight, skipping this cycle");
            return None;
        };

        let report = self
            .publisher
            .publish(self.registry.meters(), self.registry.clock().as_ref())
            .await;
        self.batches_sent.increment_by(report.sent() as f64);
        self.batches_failed.increment_by(report.failed() as f64);
        Some(report)
    }

    /// Run a cycle in its own task so a panic anywhere in it is contained.
    async fn publish_isolated(self: &Arc<Self>) -> Option<PublishReport> {
        let shared = Arc::clone(self);
        match tokio::spawn(async move { shared.publish().await }).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "charteto publish cycle failed unexpectedly");
                None
            }
        }
    }
}

/// Clears the in-flight flag on drop, including during unwinding.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn run_publish_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let delay = until_next_step(shared.registry.clock().wall_time_millis(), shared.config.step);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                shared.publish_isolated().await;
            }
            _ = shutdown.changed() => {
                debug!("charteto exporter shutting down, publishing remaining metrics");
                shared.publish_isolated().await;
                break;
            }
        }
    }
}

/// Time until the next wall-clock multiple of `step`.
fn until_next_step(now_millis: i64, step: Duration) -> Duration {
    let step_millis = i64::try_from(step.as_millis()).unwrap_or(i64::MAX).max(1);
    let remaining = step_millis - now_millis.rem_euclid(step_millis);
    Duration::from_millis(remaining as u64)
}
