//! Measurement expansion — one live meter into flat, sanitized data points.
//!
//! Timers and summaries are reported as four suffixed metrics
//! (`.sum`, `.count`, `.avg`, `.max`), function timers as three. Every other
//! kind yields one point per measurement, tagged with its statistic.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::warn;

use charteto_core::metadata::OCCURRENCE_UNIT;
use charteto_core::naming::SanitizedName;
use charteto_core::{
    ChartetoNaming, DataPoint, DotNaming, Measurement, MeterId, MetricIdentity, NamingConvention,
    Statistic, sanitize_base_unit,
};
use charteto_meter::Meter;

/// Tag key carrying the statistic of a per-measurement point.
pub const STATISTIC_TAG: &str = "statistic";

/// `(name suffix, statistic, value, unit override)`.
type Derived = (&'static str, Statistic, f64, Option<&'static str>);

/// Turns meters into data points using one naming convention.
#[derive(Debug)]
pub struct Expander<'a, D = DotNaming> {
    naming: &'a ChartetoNaming<D>,
    host_tag: Option<&'a str>,
}

impl<'a, D: NamingConvention> Expander<'a, D> {
    /// `host_tag` names the tag whose value is also reported as the host.
    pub fn new(naming: &'a ChartetoNaming<D>, host_tag: Option<&'a str>) -> Self {
        Self { naming, host_tag }
    }

    /// Expand one meter. All points share `timestamp_millis`; non-finite
    /// values are dropped.
    pub fn expand(&self, meter: &Meter, timestamp_millis: i64) -> Vec<DataPoint> {
        match meter {
            Meter::Timer(t) => self.derived(
                t.id(),
                timestamp_millis,
                [
                    ("sum", Statistic::TotalTime, t.total_time_secs(), None),
                    ("count", Statistic::Count, t.count() as f64, Some(OCCURRENCE_UNIT)),
                    ("avg", Statistic::Value, t.mean_secs(), None),
                    ("max", Statistic::Max, t.max_secs(), None),
                ],
            ),
            Meter::Summary(s) => self.derived(
                s.id(),
                timestamp_millis,
                [
                    ("sum", Statistic::Total, s.total_amount(), None),
                    ("count", Statistic::Count, s.count() as f64, Some(OCCURRENCE_UNIT)),
                    ("avg", Statistic::Value, s.mean(), None),
                    ("max", Statistic::Max, s.max(), None),
                ],
            ),
            Meter::FunctionTimer(t) => self.derived(
                t.id(),
                timestamp_millis,
                [
                    ("count", Statistic::Count, t.count() as f64, Some(OCCURRENCE_UNIT)),
                    ("avg", Statistic::Value, t.mean_secs(), None),
                    ("sum", Statistic::TotalTime, t.total_time_secs(), None),
                ],
            ),
            Meter::Counter(_)
            | Meter::Gauge(_)
            | Meter::LongTaskTimer(_)
            | Meter::FunctionCounter(_)
            | Meter::Other(_) => self.per_statistic(meter.id(), &meter.measure(), timestamp_millis),
        }
    }

    /// Like [`expand`](Self::expand), but a panic raised while reading the
    /// meter (typically from a user-supplied closure) is logged and yields
    /// `None` instead of unwinding into the caller.
    pub fn expand_isolated(&self, meter: &Meter, timestamp_millis: i64) -> Option<Vec<DataPoint>> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.expand(meter, timestamp_millis))) {
            Ok(points) => Some(points),
            Err(payload) => {
                warn!(
                    meter = %meter.id().name(),
                    kind = meter.kind_name(),
                    panic = panic_message(&*payload),
                    "reading meter panicked, skipping it this cycle"
                );
                None
            }
        }
    }

    fn derived<const N: usize>(
        &self,
        id: &MeterId,
        timestamp_millis: i64,
        stats: [Derived; N],
    ) -> Vec<DataPoint> {
        stats
            .into_iter()
            .filter_map(|(suffix, statistic, value, unit)| {
                let name = self.naming.sanitize_suffixed_name(
                    id.name(),
                    suffix,
                    id.meter_type(),
                    id.base_unit(),
                );
                self.point(id, name, statistic, value, unit, timestamp_millis)
            })
            .collect()
    }

    fn per_statistic(
        &self,
        id: &MeterId,
        measurements: &[Measurement],
        timestamp_millis: i64,
    ) -> Vec<DataPoint> {
        measurements
            .iter()
            .filter_map(|m| {
                let id = id.clone().with_tag(STATISTIC_TAG, m.statistic.tag_value());
                let name = self
                    .naming
                    .sanitize_name(id.name(), id.meter_type(), id.base_unit());
                self.point(&id, name, m.statistic, m.value, None, timestamp_millis)
            })
            .collect()
    }

    fn point(
        &self,
        id: &MeterId,
        name: SanitizedName,
        statistic: Statistic,
        value: f64,
        unit_override: Option<&str>,
        timestamp_millis: i64,
    ) -> Option<DataPoint> {
        if !value.is_finite() {
            return None;
        }

        let identity = MetricIdentity {
            name,
            tags: id
                .tags()
                .iter()
                .map(|t| {
                    (
                        self.naming.sanitize_tag_key(&t.key),
                        self.naming.sanitize_tag_value(&t.value),
                    )
                })
                .collect(),
            unit: sanitize_base_unit(id.base_unit(), unit_override),
            host: self
                .host_tag
                .and_then(|key| id.tag(key))
                .map(|value| self.naming.sanitize_tag_value(value)),
        };

        Some(DataPoint {
            identity,
            statistic,
            value,
            timestamp_millis,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
