//! HTTP transport.
//!
//! The publisher only needs `post(url, headers, body)`. [`HyperSender`]
//! opens one HTTP/1.1 connection per request over plain TCP or rustls,
//! which is plenty for one request per batch per step.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HOST, USER_AGENT};
use http::{HeaderMap, HeaderValue, Method, Request, Uri};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use charteto_core::ChartetoConfig;

use crate::error::SendError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const CLIENT_NAME: &str = concat!("charteto-export/", env!("CARGO_PKG_VERSION"));

/// Largest response body read back from the collector.
pub const MAX_RESPONSE_BODY: usize = 64 * 1024;

/// Status and body of a collector response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    /// Anything below 400 counts as delivered.
    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

/// Capability to POST a body to a URL.
pub trait HttpSender: Send + Sync {
    fn post<'a>(
        &'a self,
        url: &'a str,
        headers: HeaderMap,
        body: Bytes,
    ) -> BoxFuture<'a, Result<HttpResponse, SendError>>;
}

// ── HyperSender ────────────────────────────────────────────────────

/// `hyper` HTTP/1.1 client with rustls for `https` URLs.
#[derive(Clone)]
pub struct HyperSender {
    connect_timeout: Duration,
    read_timeout: Duration,
    tls: TlsConnector,
}

impl HyperSender {
    /// Build a sender trusting the Mozilla root certificate store.
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self, SendError> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()
        .map_err(|e| SendError::Tls(format!("protocol versions: {e}")))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        Ok(Self::with_tls_config(
            connect_timeout,
            read_timeout,
            Arc::new(config),
        ))
    }

    /// Timeouts taken from the exporter configuration.
    pub fn from_config(config: &ChartetoConfig) -> Result<Self, SendError> {
        Self::new(config.connect_timeout, config.read_timeout)
    }

    /// Build a sender around a pre-configured rustls client config.
    pub fn with_tls_config(
        connect_timeout: Duration,
        read_timeout: Duration,
        tls: Arc<rustls::ClientConfig>,
    ) -> Self {
        Self {
            connect_timeout,
            read_timeout,
            tls: TlsConnector::from(tls),
        }
    }

    async fn send(
        &self,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<HttpResponse, SendError> {
        let target = Target::parse(url)?;

        let stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((target.host.as_str(), target.port)),
        )
        .await
        .map_err(|_| SendError::Timeout {
            phase: "connect",
            after: self.connect_timeout,
        })?
        .map_err(|source| SendError::Connect {
            addr: format!("{}:{}", target.host, target.port),
            source,
        })?;
        let _ = stream.set_nodelay(true);

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(target.path_and_query.as_str())
            .header(HOST, target.authority.as_str())
            .header(USER_AGENT, HeaderValue::from_static(CLIENT_NAME));
        if let Some(h) = builder.headers_mut() {
            h.extend(headers);
        }
        let request = builder.body(Full::new(body))?;

        let response = async {
            if target.tls {
                let server_name = rustls::pki_types::ServerName::try_from(target.host.clone())
                    .map_err(|e| SendError::Tls(format!("invalid server name '{}': {e}", target.host)))?;
                let stream = self
                    .tls
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| SendError::Tls(e.to_string()))?;
                exchange(stream, request).await
            } else {
                exchange(stream, request).await
            }
        };

        tokio::time::timeout(self.read_timeout, response)
            .await
            .map_err(|_| SendError::Timeout {
                phase: "response",
                after: self.read_timeout,
            })?
    }
}

impl HttpSender for HyperSender {
    fn post<'a>(
        &'a self,
        url: &'a str,
        headers: HeaderMap,
        body: Bytes,
    ) -> BoxFuture<'a, Result<HttpResponse, SendError>> {
        Box::pin(self.send(url, headers, body))
    }
}

impl std::fmt::Debug for HyperSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperSender")
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

/// Send one request over an established stream and read the full response.
async fn exchange<S>(stream: S, request: Request<Full<Bytes>>) -> Result<HttpResponse, SendError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "collector connection closed with error");
        }
    });

    let response = sender.send_request(request).await?;
    let status = response.status().as_u16();
    let body = match Limited::new(response.into_body(), MAX_RESPONSE_BODY)
        .collect()
        .await
    {
        Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
        Err(e) if e.is::<LengthLimitError>() => {
            format!("<response body exceeds {MAX_RESPONSE_BODY} bytes>")
        }
        Err(e) => {
            return Err(match e.downcast::<hyper::Error>() {
                Ok(e) => SendError::Http(*e),
                Err(e) => SendError::Body(e.to_string()),
            });
        }
    };

    Ok(HttpResponse { status, body })
}

/// Connection details extracted from a URL.
#[derive(Debug, PartialEq, Eq)]
struct Target {
    tls: bool,
    host: String,
    port: u16,
    authority: String,
    path_and_query: String,
}

impl Target {
    fn parse(url: &str) -> Result<Self, SendError> {
        let invalid = |reason: &str| SendError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let uri: Uri = url.parse().map_err(|e: http::uri::InvalidUri| invalid(&e.to_string()))?;
        let tls = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            Some(_) => return Err(invalid("unsupported scheme")),
            None => return Err(invalid("missing scheme")),
        };
        let authority = uri.authority().ok_or_else(|| invalid("missing host"))?;
        let host = authority
            .host()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        Ok(Self {
            tls,
            port: authority.port_u16().unwrap_or(if tls { 443 } else { 80 }),
            authority: authority.as_str().to_string(),
            path_and_query: uri
                .path_and_query()
                .map(|p| p.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
            host,
        })
    }
}
