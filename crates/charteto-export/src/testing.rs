//! In-memory sender used by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::Bytes;
use http::HeaderMap;

use crate::error::SendError;
use crate::sender::{BoxFuture, HttpResponse, HttpSender};

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

/// Records every request and answers with scripted statuses (200 once the
/// script runs out). A status of 0 simulates a connection failure.
#[derive(Debug, Default)]
pub(crate) struct RecordingSender {
    requests: Mutex<Vec<RecordedRequest>>,
    script: Mutex<VecDeque<u16>>,
}

impl RecordingSender {
    pub fn with_statuses(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self {
            requests: Mutex::default(),
            script: Mutex::new(statuses.into_iter().collect()),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl HttpSender for RecordingSender {
    fn post<'a>(
        &'a self,
        url: &'a str,
        headers: HeaderMap,
        body: Bytes,
    ) -> BoxFuture<'a, Result<HttpResponse, SendError>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(RecordedRequest {
                url: url.to_string(),
                headers,
                body: serde_json::from_slice(&body).unwrap(),
            });
            let status = self.script.lock().unwrap().pop_front().unwrap_or(200);
            if status == 0 {
                return Err(SendError::Connect {
                    addr: url.to_string(),
                    source: std::io::ErrorKind::ConnectionRefused.into(),
                });
            }
            Ok(HttpResponse {
                status,
                body: format!("status {status}"),
            })
        })
    }
}
