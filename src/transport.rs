use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{HeaderMap, Method, Request, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use tokio::time::timeout;

use crate::config::ExecutorConfig;
use crate::error::{BoxError, Error, TransportErrorKind};
use crate::response::Response;
use crate::util::classify_transport_error;

/// One fully resolved HTTP exchange handed to a [`Transport`].
#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub timeout: Duration,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport failure ({kind}): {source}")]
    Network {
        kind: TransportErrorKind,
        #[source]
        source: BoxError,
    },
    #[error("transport timed out after {}ms", .timeout.as_millis())]
    Timeout { timeout: Duration },
    #[error("response body too large ({actual_bytes} bytes > {limit_bytes} bytes)")]
    BodyTooLarge {
        limit_bytes: usize,
        actual_bytes: usize,
    },
}

impl TransportError {
    pub fn network(
        kind: TransportErrorKind,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Network {
            kind,
            source: source.into(),
        }
    }
}

/// Performs the network I/O for an executor.
///
/// Implementations report failures to connect or read as
/// [`TransportError::Network`] and must give up with
/// [`TransportError::Timeout`] once `request.timeout` has elapsed.
pub trait Transport: Send + Sync {
    fn send(&self, request: TransportRequest) -> BoxFuture<'_, Result<Response, TransportError>>;
}

type HyperClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Pooled HTTP/1.1 + HTTP/2 transport over rustls.
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient,
    max_response_body_bytes: usize,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HyperTransport")
            .field("max_response_body_bytes", &self.max_response_body_bytes)
            .finish()
    }
}

impl HyperTransport {
    pub fn new() -> Result<Self, Error> {
        Self::from_config(&ExecutorConfig::default())
    }

    pub fn from_config(config: &ExecutorConfig) -> Result<Self, Error> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(config.connect_timeout));

        let https = HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())
            .map_err(|source| Error::TransportInit {
                message: source.to_string(),
            })?
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http);
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build(https);

        Ok(Self {
            client,
            max_response_body_bytes: config.max_response_body_bytes.max(1),
        })
    }

    async fn exchange(&self, request: Request<Full<Bytes>>) -> Result<Response, TransportError> {
        let response = self.client.request(request).await.map_err(|source| {
            let kind = classify_transport_error(&source);
            TransportError::network(kind, source)
        })?;
        let (parts, body) = response.into_parts();
        let body = read_all_body_limited(body, self.max_response_body_bytes).await?;
        Ok(Response::new(parts.status, parts.headers, body))
    }

    async fn send_request(&self, request: TransportRequest) -> Result<Response, TransportError> {
        let TransportRequest {
            method,
            url,
            headers,
            body,
            timeout: request_timeout,
        } = request;
        let uri: Uri = url
            .parse()
            .map_err(|source| TransportError::network(TransportErrorKind::Other, source))?;
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(request_headers) = builder.headers_mut() {
            *request_headers = headers;
        }
        let http_request = builder
            .body(Full::new(body))
            .map_err(|source| TransportError::network(TransportErrorKind::Other, source))?;

        match timeout(request_timeout, self.exchange(http_request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                timeout: request_timeout,
            }),
        }
    }
}

impl Transport for HyperTransport {
    fn send(&self, request: TransportRequest) -> BoxFuture<'_, Result<Response, TransportError>> {
        Box::pin(self.send_request(request))
    }
}

async fn read_all_body_limited(
    mut body: Incoming,
    max_bytes: usize,
) -> Result<Bytes, TransportError> {
    let mut collected = Vec::new();
    let mut total_len = 0_usize;

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|source| TransportError::network(TransportErrorKind::Read, source))?;
        if let Some(data) = frame.data_ref() {
            total_len = total_len.saturating_add(data.len());
            if total_len > max_bytes {
                return Err(TransportError::BodyTooLarge {
                    limit_bytes: max_bytes,
                    actual_bytes: total_len,
                });
            }
            collected.extend_from_slice(data);
        }
    }

    Ok(Bytes::from(collected))
}
