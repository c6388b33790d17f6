//! Meter registry — owns every meter and hands out snapshots.
//!
//! Registration is idempotent: asking for a meter whose identity is already
//! registered returns the existing instance. Meters are kept in registration
//! order so successive snapshots partition the same way.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tracing::debug;

use charteto_core::{Measurement, MeterId, MeterType, Tag};

use crate::clock::{Clock, SystemClock};
use crate::error::{MeterError, MeterResult};
use crate::meter::{
    Counter, CustomMeter, DistributionSummary, FunctionCounter, FunctionTimer, Gauge,
    LongTaskTimer, Meter, Timer,
};

/// Base unit attached to every timer-like meter.
pub const BASE_TIME_UNIT: &str = "seconds";

#[derive(Default)]
struct Inner {
    meters: Vec<Meter>,
    /// identity → position in `meters`.
    index: HashMap<MeterId, usize>,
}

/// Thread-safe store of meters.
pub struct MeterRegistry {
    clock: Arc<dyn Clock>,
    step: Duration,
    common_tags: Vec<Tag>,
    inner: RwLock<Inner>,
}

impl MeterRegistry {
    /// Create a registry. `step` bounds the window of max statistics.
    pub fn new(clock: Arc<dyn Clock>, step: Duration) -> Self {
        Self {
            clock,
            step,
            common_tags: Vec::new(),
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Registry on the system clock.
    pub fn with_step(step: Duration) -> Self {
        Self::new(Arc::new(SystemClock::new()), step)
    }

    /// Tags added to every meter registered afterwards. A meter's own tag
    /// wins over a common tag with the same key.
    pub fn with_common_tags<I>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = Tag>,
    {
        self.common_tags.extend(tags);
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    // ── Registration ───────────────────────────────────────────────

    pub fn counter(&self, id: impl Into<MeterId>) -> MeterResult<Arc<Counter>> {
        self.get_or_register(
            id.into(),
            MeterType::Counter,
            "counter",
            |m| match m {
                Meter::Counter(c) => Some(Arc::clone(c)),
                _ => None,
            },
            |id| {
                let c = Arc::new(Counter::new(id));
                (Arc::clone(&c), Meter::Counter(c))
            },
        )
    }

    pub fn gauge<F>(&self, id: impl Into<MeterId>, value_fn: F) -> MeterResult<Arc<Gauge>>
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        self.get_or_register(
            id.into(),
            MeterType::Gauge,
            "gauge",
            |m| match m {
                Meter::Gauge(g) => Some(Arc::clone(g)),
                _ => None,
            },
            |id| {
                let g = Arc::new(Gauge::new(id, Box::new(value_fn)));
                (Arc::clone(&g), Meter::Gauge(g))
            },
        )
    }

    pub fn timer(&self, id: impl Into<MeterId>) -> MeterResult<Arc<Timer>> {
        let clock = Arc::clone(&self.clock);
        let step = self.step;
        self.get_or_register(
            time_unit(id.into()),
            MeterType::Timer,
            "timer",
            |m| match m {
                Meter::Timer(t) => Some(Arc::clone(t)),
                _ => None,
            },
            |id| {
                let t = Arc::new(Timer::new(id, clock, step));
                (Arc::clone(&t), Meter::Timer(t))
            },
        )
    }

    pub fn summary(&self, id: impl Into<MeterId>) -> MeterResult<Arc<DistributionSummary>> {
        self.summary_scaled(id, 1.0)
    }

    /// Distribution summary whose recorded amounts are multiplied by
    /// `scale` (e.g. `1.0 / 1024.0` to record bytes as kibibytes).
    pub fn summary_scaled(
        &self,
        id: impl Into<MeterId>,
        scale: f64,
    ) -> MeterResult<Arc<DistributionSummary>> {
        let clock = Arc::clone(&self.clock);
        let step = self.step;
        self.get_or_register(
            id.into(),
            MeterType::DistributionSummary,
            "distribution summary",
            |m| match m {
                Meter::Summary(s) => Some(Arc::clone(s)),
                _ => None,
            },
            |id| {
                let s = Arc::new(DistributionSummary::new(id, clock, step, scale));
                (Arc::clone(&s), Meter::Summary(s))
            },
        )
    }

    pub fn long_task_timer(&self, id: impl Into<MeterId>) -> MeterResult<Arc<LongTaskTimer>> {
        let clock = Arc::clone(&self.clock);
        self.get_or_register(
            time_unit(id.into()),
            MeterType::LongTaskTimer,
            "long task timer",
            |m| match m {
                Meter::LongTaskTimer(t) => Some(Arc::clone(t)),
                _ => None,
            },
            |id| {
                let t = Arc::new(LongTaskTimer::new(id, clock));
                (Arc::clone(&t), Meter::LongTaskTimer(t))
            },
        )
    }

    pub fn function_counter<F>(
        &self,
        id: impl Into<MeterId>,
        count_fn: F,
    ) -> MeterResult<Arc<FunctionCounter>>
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        self.get_or_register(
            id.into(),
            MeterType::Counter,
            "function counter",
            |m| match m {
                Meter::FunctionCounter(c) => Some(Arc::clone(c)),
                _ => None,
            },
            |id| {
                let c = Arc::new(FunctionCounter::new(id, Box::new(count_fn)));
                (Arc::clone(&c), Meter::FunctionCounter(c))
            },
        )
    }

    pub fn function_timer<C, T>(
        &self,
        id: impl Into<MeterId>,
        count_fn: C,
        total_time_fn: T,
    ) -> MeterResult<Arc<FunctionTimer>>
    where
        C: Fn() -> u64 + Send + Sync + 'static,
        T: Fn() -> Duration + Send + Sync + 'static,
    {
        self.get_or_register(
            time_unit(id.into()),
            MeterType::Timer,
            "function timer",
            |m| match m {
                Meter::FunctionTimer(t) => Some(Arc::clone(t)),
                _ => None,
            },
            |id| {
                let t = Arc::new(FunctionTimer::new(
                    id,
                    Box::new(count_fn),
                    Box::new(total_time_fn),
                ));
                (Arc::clone(&t), Meter::FunctionTimer(t))
            },
        )
    }

    pub fn custom<F>(&self, id: impl Into<MeterId>, measure_fn: F) -> MeterResult<Arc<CustomMeter>>
    where
        F: Fn() -> Vec<Measurement> + Send + Sync + 'static,
    {
        self.get_or_register(
            id.into(),
            MeterType::Other,
            "custom meter",
            |m| match m {
                Meter::Other(c) => Some(Arc::clone(c)),
                _ => None,
            },
            |id| {
                let c = Arc::new(CustomMeter::new(id, Box::new(measure_fn)));
                (Arc::clone(&c), Meter::Other(c))
            },
        )
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Snapshot of all meters in registration order.
    pub fn meters(&self) -> Vec<Meter> {
        self.read().meters.clone()
    }

    pub fn get(&self, id: &MeterId) -> Option<Meter> {
        let inner = self.read();
        inner.index.get(id).map(|&i| inner.meters[i].clone())
    }

    pub fn len(&self) -> usize {
        self.read().meters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove a meter. Handles held elsewhere keep working but are no longer
    /// exported.
    pub fn remove(&self, id: &MeterId) -> Option<Meter> {
        let mut inner = self.write();
        let pos = inner.index.remove(id)?;
        let meter = inner.meters.remove(pos);
        for slot in inner.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        debug!(name = %id.name(), "meter removed");
        Some(meter)
    }

    // ── Internals ──────────────────────────────────────────────────

    fn get_or_register<T>(
        &self,
        id: MeterId,
        meter_type: MeterType,
        requested: &'static str,
        select: impl Fn(&Meter) -> Option<Arc<T>>,
        create: impl FnOnce(MeterId) -> (Arc<T>, Meter),
    ) -> MeterResult<Arc<T>> {
        let id = self.apply_common_tags(id).typed(meter_type);
        let existing = |meter: &Meter| {
            select(meter).ok_or_else(|| MeterError::KindMismatch {
                name: id.name().to_string(),
                existing: meter.kind_name(),
                requested,
            })
        };

        if let Some(meter) = self.get(&id) {
            return existing(&meter);
        }

        let mut inner = self.write();
        // Another thread may have registered it between the two locks.
        if let Some(&pos) = inner.index.get(&id) {
            return existing(&inner.meters[pos]);
        }

        let (handle, meter) = create(id.clone());
        debug!(name = %id.name(), kind = requested, "meter registered");
        let pos = inner.meters.len();
        inner.meters.push(meter);
        inner.index.insert(id, pos);
        Ok(handle)
    }

    fn apply_common_tags(&self, mut id: MeterId) -> MeterId {
        for tag in &self.common_tags {
            if id.tag(&tag.key).is_none() {
                id = id.with_tag(tag.key.clone(), tag.value.clone());
            }
        }
        id
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn time_unit(id: MeterId) -> MeterId {
    if id.base_unit().is_some() {
        id
    } else {
        id.with_base_unit(BASE_TIME_UNIT)
    }
}

impl std::fmt::Debug for MeterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeterRegistry")
            .field("step", &self.step)
            .field("meters", &self.len())
            .finish()
    }
}
