//! `reqkit` describes HTTP calls as immutable values and runs them with
//! pluggable authentication and retry strategies.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use reqkit::prelude::{
//!     AuthenticationToken, Executor, ExecutorConfig, ProviderError, RequestDescriptor,
//! };
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Item {
//!     id: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = Executor::with_hyper_transport(
//!         ExecutorConfig::default().with_client_name("my-sdk"),
//!     )?;
//!
//!     let api = RequestDescriptor::new()
//!         .base_url("https://api.example.com/v1")
//!         .bearer_token_authentication(|| async {
//!             Ok::<_, ProviderError>(AuthenticationToken::new("secret"))
//!         })
//!         .retry(3, false)
//!         .timeout(Duration::from_secs(5));
//!
//!     let response = executor
//!         .get(&api.route_value("id", "42").name("get-item"), "items/{id}")
//!         .await?;
//!     let item: Item = response.json()?;
//!
//!     println!("fetched id={}", item.id);
//!     Ok(())
//! }
//! ```
//!
//! # Behavior
//!
//! - Descriptors never change; every setter returns a new one.
//! - Only transport failures are retried. A rejected status code fails
//!   immediately and carries the response.
//! - Timeouts are retried only when the retry strategy opts in.

mod auth;
mod config;
mod descriptor;
mod error;
mod executor;
mod metrics;
mod observe;
mod response;
mod retry;
mod route;
mod status;
mod tags;
mod transport;
mod util;

pub use crate::auth::{
    AuthenticationStrategy, AuthenticationToken, CachedCredentialProvider, CredentialProvider,
};
pub use crate::config::ExecutorConfig;
pub use crate::descriptor::RequestDescriptor;
pub use crate::error::{
    AuthenticationError, Error, ErrorCode, ProviderError, TransportErrorKind,
};
pub use crate::executor::{ExecutionState, Executor, ExecutorBuilder};
pub use crate::metrics::ExecutorMetricsSnapshot;
pub use crate::observe::{AttemptContext, ExecutionObserver};
pub use crate::response::Response;
pub use crate::retry::{ExponentialBackoff, FailureKind, GiveUpReason, RetryDecision, RetryStrategy};
pub use crate::status::{
    AllowedStatusCodes, NO_STATUS, StatusVerdict, is_conventional_success, validate,
};
pub use crate::tags::{TagValue, Tags};
pub use crate::transport::{HyperTransport, Transport, TransportError, TransportRequest};

pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        AllowedStatusCodes, AuthenticationStrategy, AuthenticationToken, CachedCredentialProvider,
        CancellationToken, CredentialProvider, Error, ErrorCode, ExecutionObserver, Executor,
        ExecutorConfig, ExponentialBackoff, ProviderError, RequestDescriptor, Response,
        RetryStrategy, Transport,
    };
}
