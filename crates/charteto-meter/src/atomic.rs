//! Atomic building blocks shared by the meter implementations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// An `f64` stored in an `AtomicU64`.
#[derive(Debug, Default)]
pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub(crate) fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub(crate) fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub(crate) fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn add(&self, delta: f64) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            });
    }

    pub(crate) fn fetch_max(&self, value: f64) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                (value > f64::from_bits(bits)).then_some(value.to_bits())
            });
    }
}

/// Maximum over a sliding window of one to two steps.
///
/// Samples go into the current window. When a step boundary passes, the
/// current window becomes the previous one; reads report the larger of the
/// two so a publish right after rotation still sees the last step's max.
#[derive(Debug)]
pub(crate) struct StepMax {
    current: AtomicF64,
    previous: AtomicF64,
    window_start_nanos: AtomicU64,
    step_nanos: u64,
}

impl StepMax {
    pub(crate) fn new(step: Duration, now_nanos: u64) -> Self {
        Self {
            current: AtomicF64::new(0.0),
            previous: AtomicF64::new(0.0),
            window_start_nanos: AtomicU64::new(now_nanos),
            step_nanos: (step.as_nanos() as u64).max(1),
        }
    }

    pub(crate) fn record(&self, value: f64, now_nanos: u64) {
        self.rotate(now_nanos);
        self.current.fetch_max(value);
    }

    pub(crate) fn poll(&self, now_nanos: u64) -> f64 {
        self.rotate(now_nanos);
        self.current.load().max(self.previous.load())
    }

    fn rotate(&self, now_nanos: u64) {
        let start = self.window_start_nanos.load(Ordering::Acquire);
        let elapsed = now_nanos.saturating_sub(start);
        if elapsed < self.step_nanos {
            return;
        }

        let new_start = now_nanos - elapsed % self.step_nanos;
        if self
            .window_start_nanos
            .compare_exchange(start, new_start, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Another thread rotated first.
            return;
        }

        if elapsed >= 2 * self.step_nanos {
            self.previous.store(0.0);
        } else {
            self.previous.store(self.current.load());
        }
        self.current.store(0.0);
    }
}
