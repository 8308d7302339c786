use std::sync::Arc;
use std::time::{Duration, Instant};

use http::Method;
use http::header::{HeaderMap, HeaderValue, USER_AGENT};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::config::ExecutorConfig;
use crate::descriptor::RequestDescriptor;
use crate::error::Error;
use crate::metrics::{ExecutorMetrics, ExecutorMetricsSnapshot};
use crate::observe::{AttemptContext, ExecutionObserver};
use crate::response::Response;
use crate::retry::{FailureKind, GiveUpReason, RetryDecision};
use crate::status::{StatusVerdict, validate};
use crate::transport::{HyperTransport, Transport, TransportError, TransportRequest};
use crate::util::{build_header_map, redact_url_for_logs};

/// Where one execution currently stands.
///
/// Every execution starts in `Attempting(1)` and ends in `Succeeded` or
/// `Failed`. `Delaying` always leads to `Attempting(attempt + 1)` unless the
/// execution is cancelled while waiting.
#[derive(Debug)]
pub enum ExecutionState {
    Attempting(usize),
    Delaying { attempt: usize, delay: Duration },
    Succeeded(Response),
    Failed(Error),
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Failed(_))
    }
}

/// Runs request descriptors against a [`Transport`].
///
/// Cloning is cheap; clones share the transport, observer and metrics.
#[derive(Clone)]
pub struct Executor {
    transport: Arc<dyn Transport>,
    config: ExecutorConfig,
    user_agent: Option<HeaderValue>,
    observer: Option<Arc<dyn ExecutionObserver>>,
    metrics: ExecutorMetrics,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Executor")
            .field("config", &self.config)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

pub struct ExecutorBuilder {
    transport: Arc<dyn Transport>,
    config: ExecutorConfig,
    observer: Option<Arc<dyn ExecutionObserver>>,
}

impl ExecutorBuilder {
    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Executor {
        let user_agent = HeaderValue::from_str(&self.config.client_name).ok();
        Executor {
            transport: self.transport,
            config: self.config,
            user_agent,
            observer: self.observer,
            metrics: ExecutorMetrics::default(),
        }
    }
}

struct PreparedRequest {
    method: Method,
    url: String,
    redacted_uri: String,
    headers: HeaderMap,
    timeout: Duration,
    max_attempts: usize,
    name: String,
}

impl PreparedRequest {
    fn context(&self, attempt: usize) -> AttemptContext {
        AttemptContext::new(
            self.method.clone(),
            self.redacted_uri.clone(),
            attempt,
            self.max_attempts,
            self.name.clone(),
        )
    }

    fn cancelled(&self, attempt: usize) -> Error {
        Error::Cancelled {
            attempt,
            method: self.method.clone(),
            uri: self.redacted_uri.clone(),
        }
    }

    fn timed_out(&self, timeout: Duration) -> Error {
        Error::Timeout {
            timeout_ms: timeout.as_millis(),
            method: self.method.clone(),
            uri: self.redacted_uri.clone(),
        }
    }
}

impl Executor {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::builder(transport).build()
    }

    pub fn builder(transport: impl Transport + 'static) -> ExecutorBuilder {
        ExecutorBuilder {
            transport: Arc::new(transport),
            config: ExecutorConfig::default(),
            observer: None,
        }
    }

    /// Executor over a pooled [`HyperTransport`] built from `config`.
    pub fn with_hyper_transport(config: ExecutorConfig) -> Result<Self, Error> {
        let transport = HyperTransport::from_config(&config)?;
        Ok(Self::builder(transport).config(config).build())
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn metrics_snapshot(&self) -> ExecutorMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn execute(&self, descriptor: &RequestDescriptor) -> Result<Response, Error> {
        self.execute_with_cancellation(descriptor, &CancellationToken::new())
            .await
    }

    /// Like [`Executor::execute`], but gives up with [`Error::Cancelled`] as
    /// soon as `cancel` fires, whether a credential fetch, a send or a retry
    /// delay is pending.
    pub async fn execute_with_cancellation(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Response, Error> {
        let started = Instant::now();
        let _in_flight = self.metrics.begin_execution();
        let result = self.run(descriptor, cancel).await;
        self.metrics
            .record_execution_completed(&result, started.elapsed());
        result
    }

    pub async fn get(
        &self,
        descriptor: &RequestDescriptor,
        resource: impl Into<String>,
    ) -> Result<Response, Error> {
        self.execute(&descriptor.method(Method::GET).resource(resource))
            .await
    }

    pub async fn post(
        &self,
        descriptor: &RequestDescriptor,
        resource: impl Into<String>,
    ) -> Result<Response, Error> {
        self.execute(&descriptor.method(Method::POST).resource(resource))
            .await
    }

    pub async fn put(
        &self,
        descriptor: &RequestDescriptor,
        resource: impl Into<String>,
    ) -> Result<Response, Error> {
        self.execute(&descriptor.method(Method::PUT).resource(resource))
            .await
    }

    pub async fn patch(
        &self,
        descriptor: &RequestDescriptor,
        resource: impl Into<String>,
    ) -> Result<Response, Error> {
        self.execute(&descriptor.method(Method::PATCH).resource(resource))
            .await
    }

    pub async fn delete(
        &self,
        descriptor: &RequestDescriptor,
        resource: impl Into<String>,
    ) -> Result<Response, Error> {
        self.execute(&descriptor.method(Method::DELETE).resource(resource))
            .await
    }

    fn prepare(&self, descriptor: &RequestDescriptor) -> Result<PreparedRequest, Error> {
        let url = descriptor.resolve_url()?;
        let headers = build_header_map(descriptor.outgoing_headers())?;
        Ok(PreparedRequest {
            method: descriptor.method_ref().clone(),
            redacted_uri: redact_url_for_logs(&url),
            url,
            headers,
            timeout: descriptor
                .timeout_ref()
                .unwrap_or(self.config.request_timeout),
            max_attempts: descriptor.retry_strategy_ref().max_attempts(),
            name: descriptor.request_name(),
        })
    }

    async fn run(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Response, Error> {
        let prepared = self.prepare(descriptor)?;
        let mut attempt = 1_usize;
        let mut state = ExecutionState::Attempting(attempt);

        loop {
            state = match state {
                ExecutionState::Attempting(current) => {
                    attempt = current;
                    let span = info_span!(
                        "reqkit.execute",
                        client = %self.config.client_name,
                        method = %prepared.method,
                        uri = %prepared.redacted_uri,
                        attempt = current,
                        max_attempts = prepared.max_attempts,
                        name = %prepared.name
                    );
                    self.run_attempt(descriptor, &prepared, current, cancel)
                        .instrument(span)
                        .await
                }
                ExecutionState::Delaying { attempt, delay } => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => ExecutionState::Failed(prepared.cancelled(attempt)),
                        _ = tokio::time::sleep(delay) => ExecutionState::Attempting(attempt + 1),
                    }
                }
                ExecutionState::Succeeded(response) => {
                    let result = Ok(response);
                    self.notify_completed(&prepared, attempt, &result);
                    return result;
                }
                ExecutionState::Failed(error) => {
                    let result = Err(error);
                    self.notify_completed(&prepared, attempt, &result);
                    return result;
                }
            };
        }
    }

    async fn run_attempt(
        &self,
        descriptor: &RequestDescriptor,
        prepared: &PreparedRequest,
        attempt: usize,
        cancel: &CancellationToken,
    ) -> ExecutionState {
        let context = prepared.context(attempt);
        self.metrics.record_attempt();
        if let Some(observer) = &self.observer {
            observer.on_attempt_start(&context);
        }

        let authenticated = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ExecutionState::Failed(prepared.cancelled(attempt)),
            result = descriptor.authentication_strategy_ref().attach(descriptor) => result,
        };
        let authenticated = match authenticated {
            Ok(authenticated) => authenticated,
            Err(source) => {
                let error = Error::Authentication {
                    attempt,
                    method: prepared.method.clone(),
                    uri: prepared.redacted_uri.clone(),
                    source,
                };
                return self.after_failure(descriptor, &context, FailureKind::Authentication, error);
            }
        };
        let headers = match self.attempt_headers(&authenticated, prepared) {
            Ok(headers) => headers,
            Err(error) => return ExecutionState::Failed(error),
        };

        let request = TransportRequest {
            method: prepared.method.clone(),
            url: prepared.url.clone(),
            headers,
            body: authenticated.content().clone(),
            timeout: prepared.timeout,
        };
        debug!("sending request");
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ExecutionState::Failed(prepared.cancelled(attempt)),
            result = tokio::time::timeout(prepared.timeout, self.transport.send(request)) => result,
        };

        let response = match sent {
            Ok(Ok(response)) => response,
            Ok(Err(TransportError::Network { kind, source })) => {
                let error = Error::Transport {
                    kind,
                    method: prepared.method.clone(),
                    uri: prepared.redacted_uri.clone(),
                    source,
                };
                return self.after_failure(descriptor, &context, FailureKind::Network(kind), error);
            }
            Ok(Err(TransportError::Timeout { timeout })) => {
                let error = prepared.timed_out(timeout);
                return self.after_failure(descriptor, &context, FailureKind::Timeout, error);
            }
            Err(_elapsed) => {
                let error = prepared.timed_out(prepared.timeout);
                return self.after_failure(descriptor, &context, FailureKind::Timeout, error);
            }
            Ok(Err(TransportError::BodyTooLarge {
                limit_bytes,
                actual_bytes,
            })) => {
                return ExecutionState::Failed(Error::ResponseBodyTooLarge {
                    limit_bytes,
                    actual_bytes,
                    method: prepared.method.clone(),
                    uri: prepared.redacted_uri.clone(),
                });
            }
        };

        let status = response.status().as_u16();
        match validate(status, descriptor.allowed_status_codes()) {
            StatusVerdict::Accept => {
                debug!(status, "request completed");
                ExecutionState::Succeeded(response)
            }
            StatusVerdict::Reject => {
                debug!(status, "response status rejected");
                ExecutionState::Failed(Error::UnexpectedStatus {
                    status,
                    method: prepared.method.clone(),
                    uri: prepared.redacted_uri.clone(),
                    response: Box::new(response),
                })
            }
        }
    }

    fn attempt_headers(
        &self,
        authenticated: &RequestDescriptor,
        prepared: &PreparedRequest,
    ) -> Result<HeaderMap, Error> {
        let mut headers = if authenticated.authentication_strategy_ref().is_none() {
            prepared.headers.clone()
        } else {
            build_header_map(authenticated.outgoing_headers())?
        };
        if let Some(user_agent) = &self.user_agent
            && !headers.contains_key(USER_AGENT)
        {
            headers.insert(USER_AGENT, user_agent.clone());
        }
        Ok(headers)
    }

    fn after_failure(
        &self,
        descriptor: &RequestDescriptor,
        context: &AttemptContext,
        failure: FailureKind,
        error: Error,
    ) -> ExecutionState {
        let attempt = context.attempt();
        match descriptor.retry_strategy_ref().on_failure(attempt, failure) {
            RetryDecision::Retry { delay } => {
                warn!(
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying request"
                );
                self.metrics.record_retry();
                if let Some(observer) = &self.observer {
                    observer.on_retry_scheduled(context, &error, delay);
                }
                ExecutionState::Delaying { attempt, delay }
            }
            RetryDecision::GiveUp(GiveUpReason::Exhausted) => {
                ExecutionState::Failed(Error::RetriesExhausted {
                    attempts: attempt,
                    method: context.method().clone(),
                    uri: context.uri().to_owned(),
                    last: Box::new(error),
                })
            }
            RetryDecision::GiveUp(GiveUpReason::NotRetryable) => ExecutionState::Failed(error),
        }
    }

    fn notify_completed(
        &self,
        prepared: &PreparedRequest,
        attempt: usize,
        result: &Result<Response, Error>,
    ) {
        if let Some(observer) = &self.observer {
            observer.on_completed(&prepared.context(attempt), result);
        }
    }
}
