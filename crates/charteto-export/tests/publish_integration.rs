//! End-to-end publishing against a local HTTP/1 collector.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http::HeaderMap;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::watch;

use charteto_core::{ChartetoConfig, MeterId};
use charteto_export::{BatchOutcome, ChartetoMeterRegistry};

// ── Capture server ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Captured {
    path: String,
    headers: HeaderMap,
    body: Value,
}

struct CaptureServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Captured>>>,
    shutdown: watch::Sender<bool>,
}

impl CaptureServer {
    /// Answer with `statuses` in order, then 200.
    async fn start(statuses: &[u16]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(Mutex::new(statuses.iter().copied().collect::<VecDeque<u16>>()));
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let captured = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        let captured = Arc::clone(&captured);
                        let script = Arc::clone(&script);

                        tokio::spawn(async move {
                            let svc = service_fn(move |req: Request<Incoming>| {
                                let captured = Arc::clone(&captured);
                                let script = Arc::clone(&script);
                                async move {
                                    let (parts, body) = req.into_parts();
                                    let bytes = body.collect().await?.to_bytes();
                                    captured.lock().unwrap().push(Captured {
                                        path: parts.uri.path().to_string(),
                                        headers: parts.headers,
                                        body: serde_json::from_slice(&bytes).unwrap_or(Value::Null),
                                    });

                                    let status = script.lock().unwrap().pop_front().unwrap_or(200);
                                    Ok::<_, hyper::Error>(
                                        Response::builder()
                                            .status(status)
                                            .body(Full::new(Bytes::from(format!("status {status}"))))
                                            .unwrap(),
                                    )
                                }
                            });
                            let _ = http1::Builder::new()
                                .serve_connection(TokioIo::new(stream), svc)
                                .await;
                        });
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        Self {
            addr,
            requests,
            shutdown,
        }
    }

    fn uri(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn requests(&self) -> Vec<Captured> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for CaptureServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn config_for(server: &CaptureServer, extra: &[(&str, &str)]) -> ChartetoConfig {
    let mut props: HashMap<String, String> = HashMap::from([
        ("charteto.apiKey".to_string(), "test-key".to_string()),
        ("charteto.uri".to_string(), server.uri()),
    ]);
    for (k, v) in extra {
        props.insert(k.to_string(), v.to_string());
    }
    ChartetoConfig::from_properties(&props).unwrap()
}

/// All metric entries across all captured requests.
fn metrics(requests: &[Captured]) -> Vec<Value> {
    requests
        .iter()
        .flat_map(|r| r.body["metrics"].as_array().cloned().unwrap_or_default())
        .collect()
}

fn find<'a>(metrics: &'a [Value], name: &str) -> Vec<&'a Value> {
    metrics.iter().filter(|m| m["name"] == name).collect()
}

// ── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn counter_reaches_the_collector() {
    let server = CaptureServer::start(&[]).await;
    let registry = ChartetoMeterRegistry::new(config_for(&server, &[])).unwrap();
    registry
        .counter(MeterId::named("http/requests").with_tag("region", "us"))
        .unwrap()
        .increment_by(42.0);

    let report = registry.publish().await.unwrap();
    assert!(report.is_success(), "{report:?}");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.path, "/api/v1/metrics");
    assert_eq!(request.headers["x-api-key"], "test-key");
    assert_eq!(
        request.headers["content-type"],
        "application/json; charset=utf-8"
    );
    assert_eq!(request.headers["accept"], "application/json");
    assert!(request.body["batchId"].as_str().is_some_and(|id| !id.is_empty()));

    let metrics = metrics(&requests);
    let entries = find(&metrics, "http_requests");
    assert_eq!(entries.len(), 1);
    let entry = entries[0];
    assert!(!entry["name"].as_str().unwrap().contains('/'));
    assert_eq!(entry["type"], "COUNT");
    assert_eq!(entry["points"][0][1], 42.0);
    assert_eq!(entry["tags"]["region"], "us");
}

#[tokio::test]
async fn timer_is_sent_as_four_points_with_one_timestamp() {
    let server = CaptureServer::start(&[]).await;
    let registry = ChartetoMeterRegistry::new(config_for(&server, &[])).unwrap();
    registry
        .timer("job.duration")
        .unwrap()
        .record(Duration::from_secs(2));

    registry.publish().await.unwrap();

    let metrics = metrics(&server.requests());
    let timer: Vec<&Value> = metrics
        .iter()
        .filter(|m| m["name"].as_str().is_some_and(|n| n.starts_with("job.duration.")))
        .collect();
    assert_eq!(timer.len(), 4);

    let ts = &timer[0]["points"][0][0];
    assert!(timer.iter().all(|m| &m["points"][0][0] == ts));

    let value = |name: &str| find(&metrics, name)[0]["points"][0][1].as_f64().unwrap();
    assert_eq!(value("job.duration.sum"), 2.0);
    assert_eq!(value("job.duration.count"), 1.0);
    assert_eq!(value("job.duration.avg"), 2.0);
    assert_eq!(value("job.duration.max"), 2.0);
    assert_eq!(find(&metrics, "job.duration.count")[0]["unit"], "occurrence");
    assert_eq!(find(&metrics, "job.duration.sum")[0]["type"], "COUNT");
    assert_eq!(find(&metrics, "job.duration.max")[0]["type"], "GAUGE");
}

#[tokio::test]
async fn rejected_batch_does_not_block_the_next_one() {
    let server = CaptureServer::start(&[500]).await;
    let registry =
        ChartetoMeterRegistry::new(config_for(&server, &[("charteto.batchSize", "1")])).unwrap();
    registry.counter("jobs").unwrap().increment();

    // The registry's own two counters plus `jobs`: three single-meter batches.
    let report = registry.publish().await.unwrap();
    assert_eq!(report.batches.len(), 3);
    assert_eq!(server.requests().len(), 3);

    assert!(matches!(
        report.batches[0].outcome,
        BatchOutcome::Rejected { status: 500, ref body } if body == "status 500"
    ));
    assert!(report.batches[1].is_sent());
    assert!(report.batches[2].is_sent());
}

#[tokio::test]
async fn panicking_gauge_does_not_abort_publish() {
    let server = CaptureServer::start(&[]).await;
    let registry = ChartetoMeterRegistry::new(config_for(&server, &[])).unwrap();
    registry.gauge("broken", || panic!("gauge source gone")).unwrap();
    registry.counter("healthy").unwrap().increment();

    let report = registry.publish().await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.batches[0].skipped_meters, 1);

    let metrics = metrics(&server.requests());
    assert!(find(&metrics, "broken").is_empty());
    assert_eq!(find(&metrics, "healthy").len(), 1);
}

#[tokio::test]
async fn unreachable_collector_is_reported_not_raised() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let config = ChartetoConfig {
        api_key: Some("test-key".to_string()),
        uri: format!("http://{addr}"),
        connect_timeout: Duration::from_millis(200),
        ..ChartetoConfig::default()
    };
    let registry = ChartetoMeterRegistry::new(config).unwrap();
    registry.counter("jobs").unwrap();

    let report = registry.publish().await.unwrap();
    assert_eq!(report.sent(), 0);
    assert!(matches!(report.batches[0].outcome, BatchOutcome::Failed(_)));
}

#[tokio::test]
async fn scheduled_exporter_publishes_until_stopped() {
    let server = CaptureServer::start(&[]).await;
    let registry =
        ChartetoMeterRegistry::new(config_for(&server, &[("charteto.step", "100ms")])).unwrap();
    registry.counter("ticks").unwrap().increment();

    registry.start().unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;
    registry.stop().await;

    let seen = server.requests().len();
    assert!(seen >= 3, "expected scheduled cycles plus a final flush, got {seen}");

    // Nothing is sent once stopped.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.requests().len(), seen);
}

#[tokio::test]
async fn success_and_failure_are_counted() {
    let server = CaptureServer::start(&[503]).await;
    let registry = ChartetoMeterRegistry::new(config_for(&server, &[])).unwrap();

    registry.publish().await.unwrap();
    registry.publish().await.unwrap();

    // The second request carries the counts from the first cycle.
    let requests = server.requests();
    let second = metrics(&requests[1..]);
    let failures: Vec<&Value> = find(&second, "charteto.exporter.batches")
        .into_iter()
        .filter(|m| m["tags"]["result"] == "failure")
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["points"][0][1], 1.0);
}
