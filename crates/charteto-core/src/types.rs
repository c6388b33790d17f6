//! Domain types shared by the meter registry and the exporter.
//!
//! `MeterId` and `Measurement` describe live instrumentation. `DataPoint`
//! is the sanitized, timestamped form that is serialized onto the wire; it
//! can only be built from sanitized name and tag types.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;

use crate::metadata::sanitize_type;
use crate::naming::{SanitizedName, SanitizedTagKey, SanitizedTagValue};

// ── Statistic ──────────────────────────────────────────────────────

/// The aspect of a meter a measurement reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Statistic {
    Count,
    Total,
    TotalTime,
    Value,
    Max,
    ActiveTasks,
    Duration,
    Unknown,
}

impl Statistic {
    pub const ALL: [Statistic; 8] = [
        Statistic::Count,
        Statistic::Total,
        Statistic::TotalTime,
        Statistic::Value,
        Statistic::Max,
        Statistic::ActiveTasks,
        Statistic::Duration,
        Statistic::Unknown,
    ];

    /// Lowercase form used for the `statistic` tag.
    pub fn tag_value(self) -> &'static str {
        match self {
            Statistic::Count => "count",
            Statistic::Total => "total",
            Statistic::TotalTime => "total_time",
            Statistic::Value => "value",
            Statistic::Max => "max",
            Statistic::ActiveTasks => "active_tasks",
            Statistic::Duration => "duration",
            Statistic::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag_value())
    }
}

// ── MeterType ──────────────────────────────────────────────────────

/// The kind of meter an identity was registered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeterType {
    Counter,
    Gauge,
    Timer,
    DistributionSummary,
    LongTaskTimer,
    Other,
}

impl MeterType {
    pub fn as_str(self) -> &'static str {
        match self {
            MeterType::Counter => "counter",
            MeterType::Gauge => "gauge",
            MeterType::Timer => "timer",
            MeterType::DistributionSummary => "distribution_summary",
            MeterType::LongTaskTimer => "long_task_timer",
            MeterType::Other => "other",
        }
    }
}

impl fmt::Display for MeterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── MetricType ─────────────────────────────────────────────────────

/// The two point types the collector understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricType {
    Count,
    Gauge,
}

impl MetricType {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricType::Count => "COUNT",
            MetricType::Gauge => "GAUGE",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Tag ────────────────────────────────────────────────────────────

/// A raw key/value pair attached to a meter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

// ── MeterId ────────────────────────────────────────────────────────

/// Identity of a live meter: name, tags and optional base unit.
///
/// Tags form an ordered set keyed by tag key: adding a tag whose key is
/// already present replaces the old value. Two ids are equal when their
/// names and tags are equal; the base unit and meter type are descriptive.
#[derive(Debug, Clone)]
pub struct MeterId {
    name: String,
    tags: Vec<Tag>,
    base_unit: Option<String>,
    meter_type: MeterType,
}

impl MeterId {
    pub fn new(name: impl Into<String>, meter_type: MeterType) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
            base_unit: None,
            meter_type,
        }
    }

    /// Id of a meter whose type is settled at registration.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, MeterType::Other)
    }

    /// Add or replace a single tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert_tag(Tag::new(key, value));
        self
    }

    /// Add or replace several tags.
    pub fn with_tags<I>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = Tag>,
    {
        for tag in tags {
            self.insert_tag(tag);
        }
        self
    }

    pub fn with_base_unit(mut self, base_unit: impl Into<String>) -> Self {
        self.base_unit = Some(base_unit.into());
        self
    }

    /// Re-label an id with the meter type it is being registered as.
    pub fn typed(mut self, meter_type: MeterType) -> Self {
        self.meter_type = meter_type;
        self
    }

    /// Same tags and unit, different name.
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Value of the tag with the given key, if present.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .binary_search_by(|t| t.key.as_str().cmp(key))
            .ok()
            .map(|i| self.tags[i].value.as_str())
    }

    pub fn base_unit(&self) -> Option<&str> {
        self.base_unit.as_deref()
    }

    pub fn meter_type(&self) -> MeterType {
        self.meter_type
    }

    fn insert_tag(&mut self, tag: Tag) {
        match self.tags.binary_search_by(|t| t.key.cmp(&tag.key)) {
            Ok(i) => self.tags[i] = tag,
            Err(i) => self.tags.insert(i, tag),
        }
    }
}

impl From<&str> for MeterId {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

impl From<String> for MeterId {
    fn from(name: String) -> Self {
        Self::named(name)
    }
}

impl PartialEq for MeterId {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.tags == other.tags
    }
}

impl Eq for MeterId {}

impl Hash for MeterId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.tags.hash(state);
    }
}

// ── Measurement ────────────────────────────────────────────────────

/// One raw `(statistic, value)` sample read from a meter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub statistic: Statistic,
    pub value: f64,
}

impl Measurement {
    pub fn new(statistic: Statistic, value: f64) -> Self {
        Self { statistic, value }
    }
}

// ── DataPoint ──────────────────────────────────────────────────────

/// Sanitized identity of one exported metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricIdentity {
    pub name: SanitizedName,
    pub tags: Vec<(SanitizedTagKey, SanitizedTagValue)>,
    /// Whitelisted unit, or `None` when the raw unit was not recognised.
    pub unit: Option<&'static str>,
    /// Value of the configured host tag, when the meter carries one.
    pub host: Option<SanitizedTagValue>,
}

/// One normalized, timestamped value ready for serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub identity: MetricIdentity,
    pub statistic: Statistic,
    pub value: f64,
    pub timestamp_millis: i64,
}

impl DataPoint {
    /// Wire type derived from the statistic.
    pub fn metric_type(&self) -> MetricType {
        sanitize_type(self.statistic)
    }
}
