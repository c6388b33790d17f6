//! Meter implementations.
//!
//! Every meter is safe to record into from any thread while the exporter
//! reads it. Counters, timers and summaries use atomics only; the long task
//! timer keeps a small mutex-protected table of running tasks.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use charteto_core::{Measurement, MeterId, MeterType, Statistic};

use crate::atomic::{AtomicF64, StepMax};
use crate::clock::Clock;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

type ValueFn = Box<dyn Fn() -> f64 + Send + Sync>;

// ── Counter ────────────────────────────────────────────────────────

/// Monotonically increasing count.
#[derive(Debug)]
pub struct Counter {
    id: MeterId,
    count: AtomicF64,
}

impl Counter {
    pub(crate) fn new(id: MeterId) -> Self {
        Self {
            id,
            count: AtomicF64::new(0.0),
        }
    }

    pub fn id(&self) -> &MeterId {
        &self.id
    }

    pub fn increment(&self) {
        self.increment_by(1.0);
    }

    /// Add `amount`. Negative and non-finite amounts are ignored.
    pub fn increment_by(&self, amount: f64) {
        if amount.is_finite() && amount > 0.0 {
            self.count.add(amount);
        }
    }

    pub fn count(&self) -> f64 {
        self.count.load()
    }

    pub fn measure(&self) -> Vec<Measurement> {
        vec![Measurement::new(Statistic::Count, self.count())]
    }
}

// ── Gauge ──────────────────────────────────────────────────────────

/// Instantaneous value sampled from a closure at read time.
pub struct Gauge {
    id: MeterId,
    value_fn: ValueFn,
}

impl Gauge {
    pub(crate) fn new(id: MeterId, value_fn: ValueFn) -> Self {
        Self { id, value_fn }
    }

    pub fn id(&self) -> &MeterId {
        &self.id
    }

    pub fn value(&self) -> f64 {
        (self.value_fn)()
    }

    pub fn measure(&self) -> Vec<Measurement> {
        vec![Measurement::new(Statistic::Value, self.value())]
    }
}

impl fmt::Debug for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gauge").field("id", &self.id).finish_non_exhaustive()
    }
}

// ── Timer ──────────────────────────────────────────────────────────

/// Counts events and their durations. Reports in seconds.
#[derive(Debug)]
pub struct Timer {
    id: MeterId,
    clock: Arc<dyn Clock>,
    count: AtomicU64,
    total_nanos: AtomicU64,
    max_nanos: StepMax,
}

impl Timer {
    pub(crate) fn new(id: MeterId, clock: Arc<dyn Clock>, step: Duration) -> Self {
        let now = clock.monotonic_nanos();
        Self {
            id,
            clock,
            count: AtomicU64::new(0),
            total_nanos: AtomicU64::new(0),
            max_nanos: StepMax::new(step, now),
        }
    }

    pub fn id(&self) -> &MeterId {
        &self.id
    }

    pub fn record(&self, duration: Duration) {
        let nanos = duration.as_nanos() as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_nanos
            .record(nanos as f64, self.clock.monotonic_nanos());
    }

    /// Run `f` and record how long it took.
    pub fn time<T>(&self, f: impl FnOnce() -> T) -> T {
        let start = self.clock.monotonic_nanos();
        let result = f();
        let elapsed = self.clock.monotonic_nanos().saturating_sub(start);
        self.record(Duration::from_nanos(elapsed));
        result
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn total_time(&self) -> Duration {
        Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed))
    }

    pub fn total_time_secs(&self) -> f64 {
        self.total_nanos.load(Ordering::Relaxed) as f64 / NANOS_PER_SEC
    }

    pub fn mean_secs(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.total_time_secs() / count as f64
        }
    }

    /// Longest recording in the recent step window.
    pub fn max_secs(&self) -> f64 {
        self.max_nanos.poll(self.clock.monotonic_nanos()) / NANOS_PER_SEC
    }

    pub fn measure(&self) -> Vec<Measurement> {
        vec![
            Measurement::new(Statistic::Count, self.count() as f64),
            Measurement::new(Statistic::TotalTime, self.total_time_secs()),
            Measurement::new(Statistic::Max, self.max_secs()),
        ]
    }
}

// ── DistributionSummary ────────────────────────────────────────────

/// Tracks the distribution of recorded amounts (sizes, counts, ...).
#[derive(Debug)]
pub struct DistributionSummary {
    id: MeterId,
    clock: Arc<dyn Clock>,
    scale: f64,
    count: AtomicU64,
    total: AtomicF64,
    max: StepMax,
}

impl DistributionSummary {
    pub(crate) fn new(id: MeterId, clock: Arc<dyn Clock>, step: Duration, scale: f64) -> Self {
        let now = clock.monotonic_nanos();
        Self {
            id,
            clock,
            scale,
            count: AtomicU64::new(0),
            total: AtomicF64::new(0.0),
            max: StepMax::new(step, now),
        }
    }

    pub fn id(&self) -> &MeterId {
        &self.id
    }

    /// Record one amount, multiplied by the summary's scale. Negative and
    /// non-finite amounts are ignored.
    pub fn record(&self, amount: f64) {
        if !amount.is_finite() || amount < 0.0 {
            return;
        }
        let scaled = amount * self.scale;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total.add(scaled);
        self.max.record(scaled, self.clock.monotonic_nanos());
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn total_amount(&self) -> f64 {
        self.total.load()
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.total_amount() / count as f64
        }
    }

    pub fn max(&self) -> f64 {
        self.max.poll(self.clock.monotonic_nanos())
    }

    pub fn measure(&self) -> Vec<Measurement> {
        vec![
            Measurement::new(Statistic::Count, self.count() as f64),
            Measurement::new(Statistic::Total, self.total_amount()),
            Measurement::new(Statistic::Max, self.max()),
        ]
    }
}

// ── LongTaskTimer ──────────────────────────────────────────────────

/// Tracks tasks that are still running.
#[derive(Debug)]
pub struct LongTaskTimer {
    id: MeterId,
    clock: Arc<dyn Clock>,
    next_task: AtomicU64,
    /// task id → start time (monotonic nanos).
    active: Mutex<HashMap<u64, u64>>,
}

impl LongTaskTimer {
    pub(crate) fn new(id: MeterId, clock: Arc<dyn Clock>) -> Self {
        Self {
            id,
            clock,
            next_task: AtomicU64::new(0),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &MeterId {
        &self.id
    }

    /// Begin timing a task. The task ends when the sample is stopped or
    /// dropped.
    pub fn start(self: &Arc<Self>) -> LongTaskSample {
        let task = self.next_task.fetch_add(1, Ordering::Relaxed);
        let started = self.clock.monotonic_nanos();
        self.tasks().insert(task, started);
        LongTaskSample {
            timer: Arc::clone(self),
            task,
            started,
        }
    }

    pub fn active_tasks(&self) -> usize {
        self.tasks().len()
    }

    /// Combined running time of all active tasks, in seconds.
    pub fn duration_secs(&self) -> f64 {
        let now = self.clock.monotonic_nanos();
        self.tasks()
            .values()
            .map(|start| now.saturating_sub(*start) as f64)
            .sum::<f64>()
            / NANOS_PER_SEC
    }

    /// Running time of the oldest active task, in seconds.
    pub fn max_secs(&self) -> f64 {
        let now = self.clock.monotonic_nanos();
        self.tasks()
            .values()
            .map(|start| now.saturating_sub(*start))
            .max()
            .unwrap_or(0) as f64
            / NANOS_PER_SEC
    }

    pub fn measure(&self) -> Vec<Measurement> {
        vec![
            Measurement::new(Statistic::ActiveTasks, self.active_tasks() as f64),
            Measurement::new(Statistic::Duration, self.duration_secs()),
            Measurement::new(Statistic::Max, self.max_secs()),
        ]
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, HashMap<u64, u64>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A running task of a [`LongTaskTimer`].
#[derive(Debug)]
pub struct LongTaskSample {
    timer: Arc<LongTaskTimer>,
    task: u64,
    started: u64,
}

impl LongTaskSample {
    /// How long this task has been running.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(
            self.timer
                .clock
                .monotonic_nanos()
                .saturating_sub(self.started),
        )
    }

    /// End the task and return its total running time.
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl Drop for LongTaskSample {
    fn drop(&mut self) {
        self.timer.tasks().remove(&self.task);
    }
}

// ── Function-backed meters ─────────────────────────────────────────

/// Counter whose value is read from a closure, e.g. a pool's total
/// acquisitions.
pub struct FunctionCounter {
    id: MeterId,
    count_fn: ValueFn,
}

impl FunctionCounter {
    pub(crate) fn new(id: MeterId, count_fn: ValueFn) -> Self {
        Self { id, count_fn }
    }

    pub fn id(&self) -> &MeterId {
        &self.id
    }

    pub fn count(&self) -> f64 {
        (self.count_fn)()
    }

    pub fn measure(&self) -> Vec<Measurement> {
        vec![Measurement::new(Statistic::Count, self.count())]
    }
}

impl fmt::Debug for FunctionCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionCounter")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Timer whose count and total time are read from closures. No max is
/// available for this kind.
pub struct FunctionTimer {
    id: MeterId,
    count_fn: Box<dyn Fn() -> u64 + Send + Sync>,
    total_time_fn: Box<dyn Fn() -> Duration + Send + Sync>,
}

impl FunctionTimer {
    pub(crate) fn new(
        id: MeterId,
        count_fn: Box<dyn Fn() -> u64 + Send + Sync>,
        total_time_fn: Box<dyn Fn() -> Duration + Send + Sync>,
    ) -> Self {
        Self {
            id,
            count_fn,
            total_time_fn,
        }
    }

    pub fn id(&self) -> &MeterId {
        &self.id
    }

    pub fn count(&self) -> u64 {
        (self.count_fn)()
    }

    pub fn total_time_secs(&self) -> f64 {
        (self.total_time_fn)().as_secs_f64()
    }

    pub fn mean_secs(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.total_time_secs() / count as f64
        }
    }

    pub fn measure(&self) -> Vec<Measurement> {
        vec![
            Measurement::new(Statistic::Count, self.count() as f64),
            Measurement::new(Statistic::TotalTime, self.total_time_secs()),
        ]
    }
}

impl fmt::Debug for FunctionTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTimer")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Meter with caller-defined measurements.
pub struct CustomMeter {
    id: MeterId,
    measure_fn: Box<dyn Fn() -> Vec<Measurement> + Send + Sync>,
}

impl CustomMeter {
    pub(crate) fn new(
        id: MeterId,
        measure_fn: Box<dyn Fn() -> Vec<Measurement> + Send + Sync>,
    ) -> Self {
        Self { id, measure_fn }
    }

    pub fn id(&self) -> &MeterId {
        &self.id
    }

    pub fn measure(&self) -> Vec<Measurement> {
        (self.measure_fn)()
    }
}

impl fmt::Debug for CustomMeter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomMeter")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

// ── Meter ──────────────────────────────────────────────────────────

/// Any registered meter. The set of kinds is closed.
#[derive(Debug, Clone)]
pub enum Meter {
    Counter(Arc<Counter>),
    Gauge(Arc<Gauge>),
    Timer(Arc<Timer>),
    Summary(Arc<DistributionSummary>),
    LongTaskTimer(Arc<LongTaskTimer>),
    FunctionCounter(Arc<FunctionCounter>),
    FunctionTimer(Arc<FunctionTimer>),
    Other(Arc<CustomMeter>),
}

impl Meter {
    pub fn id(&self) -> &MeterId {
        match self {
            Meter::Counter(m) => m.id(),
            Meter::Gauge(m) => m.id(),
            Meter::Timer(m) => m.id(),
            Meter::Summary(m) => m.id(),
            Meter::LongTaskTimer(m) => m.id(),
            Meter::FunctionCounter(m) => m.id(),
            Meter::FunctionTimer(m) => m.id(),
            Meter::Other(m) => m.id(),
        }
    }

    /// Raw measurements, one per statistic the meter tracks.
    pub fn measure(&self) -> Vec<Measurement> {
        match self {
            Meter::Counter(m) => m.measure(),
            Meter::Gauge(m) => m.measure(),
            Meter::Timer(m) => m.measure(),
            Meter::Summary(m) => m.measure(),
            Meter::LongTaskTimer(m) => m.measure(),
            Meter::FunctionCounter(m) => m.measure(),
            Meter::FunctionTimer(m) => m.measure(),
            Meter::Other(m) => m.measure(),
        }
    }

    pub fn meter_type(&self) -> MeterType {
        match self {
            Meter::Counter(_) | Meter::FunctionCounter(_) => MeterType::Counter,
            Meter::Gauge(_) => MeterType::Gauge,
            Meter::Timer(_) | Meter::FunctionTimer(_) => MeterType::Timer,
            Meter::Summary(_) => MeterType::DistributionSummary,
            Meter::LongTaskTimer(_) => MeterType::LongTaskTimer,
            Meter::Other(_) => MeterType::Other,
        }
    }

    /// Kind name, distinguishing function-backed meters.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Meter::Counter(_) => "counter",
            Meter::Gauge(_) => "gauge",
            Meter::Timer(_) => "timer",
            Meter::Summary(_) => "distribution summary",
            Meter::LongTaskTimer(_) => "long task timer",
            Meter::FunctionCounter(_) => "function counter",
            Meter::FunctionTimer(_) => "function timer",
            Meter::Other(_) => "custom meter",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    const STEP: Duration = Duration::from_secs(10);

    fn id(name: &str, meter_type: MeterType) -> MeterId {
        MeterId::new(name, meter_type)
    }

    fn clock() -> Arc<MockClock> {
        Arc::new(MockClock::new(1_000))
    }

    #[test]
    fn counter_accumulates() {
        let counter = Counter::new(id("jobs", MeterType::Counter));
        counter.increment();
        counter.increment_by(41.0);
        assert_eq!(counter.count(), 42.0);
        assert_eq!(counter.measure(), vec![Measurement::new(Statistic::Count, 42.0)]);
    }

    #[test]
    fn counter_ignores_negative_and_nan() {
        let counter = Counter::new(id("jobs", MeterType::Counter));
        counter.increment_by(-5.0);
        counter.increment_by(f64::NAN);
        assert_eq!(counter.count(), 0.0);
    }

    #[test]
    fn gauge_reads_closure() {
        let gauge = Gauge::new(id("queue.depth", MeterType::Gauge), Box::new(|| 123.0));
        assert_eq!(gauge.measure(), vec![Measurement::new(Statistic::Value, 123.0)]);
    }

    #[test]
    fn timer_tracks_count_total_and_max() {
        let clock = clock();
        let timer = Timer::new(id("http.latency", MeterType::Timer), clock.clone(), STEP);

        timer.record(Duration::from_secs(2));
        timer.record(Duration::from_secs(1));

        assert_eq!(timer.count(), 2);
        assert_eq!(timer.total_time(), Duration::from_secs(3));
        assert_eq!(timer.mean_secs(), 1.5);
        assert_eq!(timer.max_secs(), 2.0);
    }

    #[test]
    fn timer_time_uses_clock() {
        let clock = clock();
        let timer = Timer::new(id("work", MeterType::Timer), clock.clone(), STEP);

        let value = timer.time(|| {
            clock.advance(Duration::from_millis(250));
            7
        });

        assert_eq!(value, 7);
        assert_eq!(timer.count(), 1);
        assert_eq!(timer.total_time(), Duration::from_millis(250));
    }

    #[test]
    fn timer_max_decays_across_steps() {
        let clock = clock();
        let timer = Timer::new(id("work", MeterType::Timer), clock.clone(), STEP);
        timer.record(Duration::from_secs(4));

        clock.advance(STEP * 3);
        assert_eq!(timer.max_secs(), 0.0);
        // Cumulative statistics do not decay.
        assert_eq!(timer.count(), 1);
    }

    #[test]
    fn empty_timer_mean_is_zero() {
        let timer = Timer::new(id("idle", MeterType::Timer), clock(), STEP);
        assert_eq!(timer.mean_secs(), 0.0);
    }

    #[test]
    fn summary_applies_scale_and_ignores_negative() {
        let summary = DistributionSummary::new(
            id("payload.size", MeterType::DistributionSummary),
            clock(),
            STEP,
            2.0,
        );
        summary.record(10.0);
        summary.record(20.0);
        summary.record(-1.0);

        assert_eq!(summary.count(), 2);
        assert_eq!(summary.total_amount(), 60.0);
        assert_eq!(summary.mean(), 30.0);
        assert_eq!(summary.max(), 40.0);
    }

    #[test]
    fn long_task_timer_tracks_active_tasks() {
        let clock = clock();
        let ltt = Arc::new(LongTaskTimer::new(
            id("batch.import", MeterType::LongTaskTimer),
            clock.clone(),
        ));

        let first = ltt.start();
        clock.advance(Duration::from_secs(3));
        let second = ltt.start();
        clock.advance(Duration::from_secs(1));

        assert_eq!(ltt.active_tasks(), 2);
        assert_eq!(ltt.duration_secs(), 5.0);
        assert_eq!(ltt.max_secs(), 4.0);

        assert_eq!(first.stop(), Duration::from_secs(4));
        assert_eq!(ltt.active_tasks(), 1);

        drop(second);
        assert_eq!(ltt.active_tasks(), 0);
        assert_eq!(ltt.max_secs(), 0.0);
    }

    #[test]
    fn function_timer_mean() {
        let ft = FunctionTimer::new(
            id("cache.loads", MeterType::Timer),
            Box::new(|| 4),
            Box::new(|| Duration::from_secs(2)),
        );
        assert_eq!(ft.mean_secs(), 0.5);
        assert_eq!(
            ft.measure(),
            vec![
                Measurement::new(Statistic::Count, 4.0),
                Measurement::new(Statistic::TotalTime, 2.0),
            ]
        );
    }

    #[test]
    fn meter_enum_dispatches() {
        let meter = Meter::Counter(Arc::new(Counter::new(id("c", MeterType::Counter))));
        assert_eq!(meter.id().name(), "c");
        assert_eq!(meter.meter_type(), MeterType::Counter);
        assert_eq!(meter.kind_name(), "counter");
        assert_eq!(meter.measure().len(), 1);
    }
}
