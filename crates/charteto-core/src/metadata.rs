//! Unit and type vocabulary accepted by the collector.
//!
//! Units outside the whitelist are dropped rather than forwarded. Plural
//! spellings of whitelisted units (`seconds`, `requests`, `indices`) are
//! folded back to their singular form.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use crate::types::{MetricType, Statistic};

const UNIT_WHITELIST: &[&str] = &[
    "bit", "byte", "kibibyte", "mebibyte", "gibibyte", "tebibyte", "pebibyte", "exbibyte",
    "microsecond", "millisecond", "second", "minute", "hour", "day", "week", "nanosecond",
    "fraction", "percent", "percent_nano", "apdex", "connection", "request", "packet", "segment",
    "response", "message", "payload", "timeout", "datagram", "route", "session", "process",
    "core", "thread", "host", "node", "fault", "service", "instance", "cpu", "file", "inode",
    "sector", "block", "buffer", "error", "read", "write", "occurrence", "event", "time", "unit",
    "operation", "item", "task", "worker", "resource", "email", "sample", "stage", "monitor",
    "location", "check", "attempt", "device", "update", "method", "job", "container", "table",
    "index", "lock", "transaction", "query", "row", "key", "command", "offset", "record",
    "object", "cursor", "assertion", "scan", "document", "shard", "flush", "merge", "refresh",
    "fetch", "column", "commit", "wait", "ticket", "question", "hit", "miss", "eviction", "get",
    "set", "dollar", "cent", "page", "split", "hertz", "kilohertz", "megahertz", "gigahertz",
    "entry",
];

static UNITS: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| UNIT_WHITELIST.iter().copied().collect());

static PLURALIZED_UNITS: LazyLock<HashMap<String, &'static str>> = LazyLock::new(|| {
    let mut plurals: HashMap<String, &'static str> = UNIT_WHITELIST
        .iter()
        .map(|unit| (format!("{unit}s"), *unit))
        .collect();
    plurals.insert("indices".to_string(), "index");
    plurals.insert("indexes".to_string(), "index");
    plurals
});

/// Unit used for occurrence counts of timers and summaries.
pub const OCCURRENCE_UNIT: &str = "occurrence";

/// Map a free-form unit onto the collector's unit vocabulary.
///
/// `override_unit` wins over `base_unit` when present. The chosen unit is
/// returned as-is if whitelisted, singularized if it is a known plural, and
/// dropped otherwise.
pub fn sanitize_base_unit(
    base_unit: Option<&str>,
    override_unit: Option<&str>,
) -> Option<&'static str> {
    let unit = override_unit.or(base_unit)?;
    UNITS
        .get(unit)
        .copied()
        .or_else(|| PLURALIZED_UNITS.get(unit).copied())
}

/// Classify a statistic as a `COUNT` or a `GAUGE` point.
pub fn sanitize_type(statistic: Statistic) -> MetricType {
    match statistic {
        Statistic::Count | Statistic::Total | Statistic::TotalTime => MetricType::Count,
        Statistic::Value
        | Statistic::Max
        | Statistic::ActiveTasks
        | Statistic::Duration
        | Statistic::Unknown => MetricType::Gauge,
    }
}
