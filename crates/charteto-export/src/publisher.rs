//! Publisher — runs one publish cycle and reports per-batch outcomes.
//!
//! A cycle never fails as a whole. Each batch is expanded, serialized and
//! posted independently; a rejected or undeliverable batch is logged and
//! the next batch is still sent. Nothing is retried.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, error, trace, warn};

use charteto_core::{ChartetoConfig, ChartetoNaming};
use charteto_meter::{Clock, Meter};

use crate::batch::{self, Batch};
use crate::error::ExportError;
use crate::expand::Expander;
use crate::sender::HttpSender;

pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const JSON_ACCEPT: &str = "application/json";

/// What happened to one batch.
#[derive(Debug)]
pub enum BatchOutcome {
    /// The collector answered with a status below 400.
    Sent { status: u16 },
    /// The collector answered with a status of 400 or above.
    Rejected { status: u16, body: String },
    /// The batch never got a response (serialization or transport failure).
    Failed(ExportError),
}

/// One batch of a publish cycle.
#[derive(Debug)]
pub struct BatchReport {
    pub batch_id: String,
    /// Meters in the batch, including skipped ones.
    pub meters: usize,
    /// Data points serialized into the request body.
    pub points: usize,
    /// Meters that panicked while being read and were left out.
    pub skipped_meters: usize,
    pub outcome: BatchOutcome,
}

impl BatchReport {
    pub fn is_sent(&self) -> bool {
        matches!(self.outcome, BatchOutcome::Sent { .. })
    }
}

/// Result of one publish cycle.
#[derive(Debug, Default)]
pub struct PublishReport {
    pub batches: Vec<BatchReport>,
}

impl PublishReport {
    pub fn sent(&self) -> usize {
        self.batches.iter().filter(|b| b.is_sent()).count()
    }

    pub fn failed(&self) -> usize {
        self.batches.len() - self.sent()
    }

    /// True when every batch was delivered (vacuously true for no batches).
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn meters_sent(&self) -> usize {
        self.batches
            .iter()
            .filter(|b| b.is_sent())
            .map(|b| b.meters - b.skipped_meters)
            .sum()
    }
}

/// Sends registry snapshots to the collector endpoint.
pub struct Publisher {
    sender: Arc<dyn HttpSender>,
    endpoint: String,
    headers: HeaderMap,
    batch_size: usize,
    host_tag: Option<String>,
    naming: ChartetoNaming,
}

impl Publisher {
    pub fn new(config: &ChartetoConfig, sender: Arc<dyn HttpSender>) -> Self {
        Self {
            sender,
            endpoint: config.metrics_endpoint(),
            headers: request_headers(config.api_key.as_deref()),
            batch_size: config.batch_size,
            host_tag: config.host_tag.clone(),
            naming: ChartetoNaming::new(),
        }
    }

    /// Full URL batches are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Publish `meters` in batches. Never fails; see [`PublishReport`].
    pub async fn publish(&self, meters: Vec<Meter>, clock: &dyn Clock) -> PublishReport {
        let mut report = PublishReport::default();
        for batch in batch::partition(meters, self.batch_size) {
            report.batches.push(self.send_batch(batch, clock).await);
        }
        report
    }

    async fn send_batch(&self, batch: Batch, clock: &dyn Clock) -> BatchReport {
        let expander = Expander::new(&self.naming, self.host_tag.as_deref());
        let mut points = Vec::new();
        let mut skipped_meters = 0;
        for meter in &batch.meters {
            // One timestamp per meter, shared by all of its points.
            let timestamp = clock.wall_time_millis();
            match expander.expand_isolated(meter, timestamp) {
                Some(p) => points.extend(p),
                None => skipped_meters += 1,
            }
        }

        let outcome = match batch::serialize(&batch.id, &points) {
            Ok(body) => self.post(&batch, body).await,
            Err(e) => {
                warn!(batch_id = %batch.id, error = %e, "failed to serialize metrics batch");
                BatchOutcome::Failed(e.into())
            }
        };

        BatchReport {
            meters: batch.meters.len(),
            points: points.len(),
            skipped_meters,
            outcome,
            batch_id: batch.id,
        }
    }

    async fn post(&self, batch: &Batch, body: Vec<u8>) -> BatchOutcome {
        trace!(
            batch_id = %batch.id,
            body = %String::from_utf8_lossy(&body),
            "sending metrics batch to charteto"
        );

        match self
            .sender
            .post(&self.endpoint, self.headers.clone(), Bytes::from(body))
            .await
        {
            Ok(response) if response.is_success() => {
                debug!(
                    batch_id = %batch.id,
                    meters = batch.meters.len(),
                    status = response.status,
                    "sent metrics batch to charteto"
                );
                BatchOutcome::Sent {
                    status: response.status,
                }
            }
            Ok(response) => {
                error!(
                    batch_id = %batch.id,
                    endpoint = %self.endpoint,
                    meters = batch.meters.len(),
                    status = response.status,
                    body = %response.body,
                    "failed to send metrics batch"
                );
                BatchOutcome::Rejected {
                    status: response.status,
                    body: response.body,
                }
            }
            Err(e) => {
                warn!(
                    batch_id = %batch.id,
                    endpoint = %self.endpoint,
                    meters = batch.meters.len(),
                    error = %e,
                    "failed to send metrics batch to charteto"
                );
                BatchOutcome::Failed(e.into())
            }
        }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("endpoint", &self.endpoint)
            .field("batch_size", &self.batch_size)
            .field("host_tag", &self.host_tag)
            .finish_non_exhaustive()
    }
}

fn request_headers(api_key: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    headers.insert(ACCEPT, HeaderValue::from_static(JSON_ACCEPT));

    if let Some(key) = api_key {
        match HeaderValue::from_str(key) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(API_KEY_HEADER, value);
            }
            Err(_) => warn!("api key contains characters not allowed in a header, sending without it"),
        }
    }
    headers
}
