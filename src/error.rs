use http::Method;
use thiserror::Error;

use crate::response::Response;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// Failure reported by a credential provider.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProviderError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Error)]
pub enum AuthenticationError {
    #[error("credential provider failed: {source}")]
    Provider {
        #[source]
        source: ProviderError,
    },
    #[error("credential for header {name} is not a valid header value")]
    InvalidCredential { name: &'static str },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidUrl,
    InvalidResource,
    MissingRouteValue,
    InvalidHeaderName,
    InvalidHeaderValue,
    SerializeJson,
    SerializeForm,
    SerializeValues,
    Authentication,
    Transport,
    Timeout,
    UnexpectedStatus,
    ResponseBodyTooLarge,
    RetriesExhausted,
    Cancelled,
    TransportInit,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUrl => "invalid_url",
            Self::InvalidResource => "invalid_resource",
            Self::MissingRouteValue => "missing_route_value",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::SerializeJson => "serialize_json",
            Self::SerializeForm => "serialize_form",
            Self::SerializeValues => "serialize_values",
            Self::Authentication => "authentication",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::UnexpectedStatus => "unexpected_status",
            Self::ResponseBodyTooLarge => "response_body_too_large",
            Self::RetriesExhausted => "retries_exhausted",
            Self::Cancelled => "cancelled",
            Self::TransportInit => "transport_init",
        }
    }

    /// Codes raised while building the request, before anything is sent.
    pub const fn is_configuration(self) -> bool {
        matches!(
            self,
            Self::InvalidUrl
                | Self::InvalidResource
                | Self::MissingRouteValue
                | Self::InvalidHeaderName
                | Self::InvalidHeaderValue
                | Self::SerializeJson
                | Self::SerializeForm
                | Self::SerializeValues
        )
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request url: {url}")]
    InvalidUrl { url: String },
    #[error("invalid resource template {resource}: {message}")]
    InvalidResource { resource: String, message: String },
    #[error("resource template {resource} references missing route value {key}")]
    MissingRouteValue { resource: String, key: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to serialize request json: {source}")]
    SerializeJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize request form: {source}")]
    SerializeForm {
        #[source]
        source: serde_urlencoded::ser::Error,
    },
    #[error("failed to flatten values into pairs: {source}")]
    SerializeValues {
        #[source]
        source: serde_urlencoded::ser::Error,
    },
    #[error("authentication failed on attempt {attempt} for {method} {uri}: {source}")]
    Authentication {
        attempt: usize,
        method: Method,
        uri: String,
        #[source]
        source: AuthenticationError,
    },
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("http request timed out after {timeout_ms}ms for {method} {uri}")]
    Timeout {
        timeout_ms: u128,
        method: Method,
        uri: String,
    },
    #[error("unexpected http status {status} for {method} {uri}")]
    UnexpectedStatus {
        status: u16,
        method: Method,
        uri: String,
        response: Box<Response>,
    },
    #[error(
        "response body too large ({actual_bytes} bytes > {limit_bytes} bytes) for {method} {uri}"
    )]
    ResponseBodyTooLarge {
        limit_bytes: usize,
        actual_bytes: usize,
        method: Method,
        uri: String,
    },
    #[error("retries exhausted after {attempts} attempts for {method} {uri}: {last}")]
    RetriesExhausted {
        attempts: usize,
        method: Method,
        uri: String,
        #[source]
        last: Box<Error>,
    },
    #[error("request cancelled on attempt {attempt} for {method} {uri}")]
    Cancelled {
        attempt: usize,
        method: Method,
        uri: String,
    },
    #[error("failed to initialize http transport: {message}")]
    TransportInit { message: String },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUrl { .. } => ErrorCode::InvalidUrl,
            Self::InvalidResource { .. } => ErrorCode::InvalidResource,
            Self::MissingRouteValue { .. } => ErrorCode::MissingRouteValue,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::SerializeJson { .. } => ErrorCode::SerializeJson,
            Self::SerializeForm { .. } => ErrorCode::SerializeForm,
            Self::SerializeValues { .. } => ErrorCode::SerializeValues,
            Self::Authentication { .. } => ErrorCode::Authentication,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::UnexpectedStatus { .. } => ErrorCode::UnexpectedStatus,
            Self::ResponseBodyTooLarge { .. } => ErrorCode::ResponseBodyTooLarge,
            Self::RetriesExhausted { .. } => ErrorCode::RetriesExhausted,
            Self::Cancelled { .. } => ErrorCode::Cancelled,
            Self::TransportInit { .. } => ErrorCode::TransportInit,
        }
    }

    pub const fn is_configuration(&self) -> bool {
        self.code().is_configuration()
    }

    /// The response carried by an unexpected-status failure, looking through
    /// a retries-exhausted wrapper.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::UnexpectedStatus { response, .. } => Some(response),
            Self::RetriesExhausted { last, .. } => last.response(),
            _ => None,
        }
    }

    /// The failure that ended the final attempt.
    pub fn last_failure(&self) -> &Error {
        match self {
            Self::RetriesExhausted { last, .. } => last,
            other => other,
        }
    }
}
