//! Batching and the wire envelope.
//!
//! ```json
//! {"batchId":"<uuid>","metrics":[
//!   {"name":"jvm.threads","type":"GAUGE","points":[[1700000000000,42.0]],
//!    "unit":"thread","host":"web-1","tags":{"statistic":"value"}}
//! ]}
//! ```
//!
//! `unit`, `host` and `tags` are omitted when empty.

use serde::{Serialize, Serializer};
use uuid::Uuid;

use charteto_core::naming::{SanitizedName, SanitizedTagKey, SanitizedTagValue};
use charteto_core::{DataPoint, MetricType};
use charteto_meter::Meter;

/// A contiguous group of meters sent in one request.
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: String,
    pub meters: Vec<Meter>,
}

/// Split `meters` into contiguous batches of at most `max_batch_size`
/// meters, each with a fresh id. Every meter appears in exactly one batch.
pub fn partition(meters: Vec<Meter>, max_batch_size: usize) -> Vec<Batch> {
    let size = max_batch_size.max(1);
    let mut batches = Vec::with_capacity(meters.len().div_ceil(size));
    let mut meters = meters.into_iter().peekable();

    while meters.peek().is_some() {
        batches.push(Batch {
            id: Uuid::new_v4().to_string(),
            meters: meters.by_ref().take(size).collect(),
        });
    }
    batches
}

/// Serialize expanded points into the request body.
pub fn serialize(batch_id: &str, points: &[DataPoint]) -> serde_json::Result<Vec<u8>> {
    let envelope = Envelope {
        batch_id,
        metrics: points.iter().map(MetricEntry::from).collect(),
    };
    serde_json::to_vec(&envelope)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a> {
    batch_id: &'a str,
    metrics: Vec<MetricEntry<'a>>,
}

#[derive(Serialize)]
struct MetricEntry<'a> {
    name: &'a SanitizedName,
    #[serde(rename = "type")]
    metric_type: MetricType,
    points: [(i64, f64); 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<&'a SanitizedTagValue>,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    tags: Tags<'a>,
}

impl<'a> From<&'a DataPoint> for MetricEntry<'a> {
    fn from(point: &'a DataPoint) -> Self {
        Self {
            name: &point.identity.name,
            metric_type: point.metric_type(),
            points: [(point.timestamp_millis, point.value)],
            unit: point.identity.unit,
            host: point.identity.host.as_ref(),
            tags: Tags(&point.identity.tags),
        }
    }
}

/// Tags as a JSON object, in tag-key order.
struct Tags<'a>(&'a [(SanitizedTagKey, SanitizedTagValue)]);

impl Tags<'_> {
    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Tags<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, v)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::expand::Expander;
    use charteto_core::{ChartetoNaming, MeterId};
    use charteto_meter::{MeterRegistry, MockClock};
    use serde_json::Value;

    const TS: i64 = 1_700_000_000_000;

    fn registry_with(n: usize) -> MeterRegistry {
        let registry = MeterRegistry::new(Arc::new(MockClock::new(TS)), Duration::from_secs(10));
        for i in 0..n {
            registry.counter(format!("meter.{i}")).unwrap();
        }
        registry
    }

    fn points(registry: &MeterRegistry) -> Vec<DataPoint> {
        let naming = ChartetoNaming::new();
        let expander = Expander::new(&naming, Some("instance"));
        registry
            .meters()
            .iter()
            .flat_map(|m| expander.expand(m, TS))
            .collect()
    }

    #[test]
    fn partition_respects_batch_size() {
        let registry = registry_with(7);
        let batches = partition(registry.meters(), 3);

        let sizes: Vec<usize> = batches.iter().map(|b| b.meters.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn partition_keeps_every_meter_once_in_order() {
        let registry = registry_with(5);
        let batches = partition(registry.meters(), 2);

        let names: Vec<String> = batches
            .iter()
            .flat_map(|b| b.meters.iter().map(|m| m.id().name().to_string()))
            .collect();
        assert_eq!(names, vec!["meter.0", "meter.1", "meter.2", "meter.3", "meter.4"]);
    }

    #[test]
    fn partition_assigns_unique_ids() {
        let registry = registry_with(4);
        let batches = partition(registry.meters(), 1);
        let mut ids: Vec<&str> = batches.iter().map(|b| b.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn partition_of_nothing_is_empty() {
        assert!(partition(Vec::new(), 10).is_empty());
    }

    #[test]
    fn zero_batch_size_is_treated_as_one() {
        let registry = registry_with(2);
        assert_eq!(partition(registry.meters(), 0).len(), 2);
    }

    #[test]
    fn serialize_envelope_shape() {
        let registry = MeterRegistry::new(Arc::new(MockClock::new(TS)), Duration::from_secs(10));
        registry
            .counter(
                MeterId::named("http.requests")
                    .with_tag("region", "us")
                    .with_tag("instance", "web-1")
                    .with_base_unit("requests"),
            )
            .unwrap()
            .increment_by(42.0);

        let body = serialize("b-1", &points(&registry)).unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["batchId"], "b-1");
        let metric = &json["metrics"][0];
        assert_eq!(metric["name"], "http.requests");
        assert_eq!(metric["type"], "COUNT");
        assert_eq!(metric["points"][0][0], TS);
        assert_eq!(metric["points"][0][1], 42.0);
        assert_eq!(metric["unit"], "request");
        assert_eq!(metric["host"], "web-1");
        assert_eq!(metric["tags"]["region"], "us");
        assert_eq!(metric["tags"]["statistic"], "count");
    }

    #[test]
    fn empty_optional_fields_are_omitted() {
        let registry = MeterRegistry::new(Arc::new(MockClock::new(TS)), Duration::from_secs(10));
        registry.timer("bare").unwrap();

        let body = serialize("b-2", &points(&registry)).unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();

        // Timer points carry no tags and no host.
        for metric in json["metrics"].as_array().unwrap() {
            let obj = metric.as_object().unwrap();
            assert!(!obj.contains_key("tags"));
            assert!(!obj.contains_key("host"));
        }
    }

    #[test]
    fn float_values_keep_a_decimal_point() {
        let registry = registry_with(1);
        let body = serialize("b-3", &points(&registry)).unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains(&format!("[[{TS},0.0]]")), "{text}");
    }

    #[test]
    fn empty_batch_has_empty_metrics_array() {
        let body = serialize("b-4", &[]).unwrap();
        assert_eq!(body, br#"{"batchId":"b-4","metrics":[]}"#);
    }
}
