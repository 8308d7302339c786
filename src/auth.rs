use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::future::BoxFuture;
use http::HeaderValue;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::descriptor::RequestDescriptor;
use crate::error::{AuthenticationError, ProviderError};

pub(crate) const AUTHORIZATION_HEADER: &str = "authorization";
pub(crate) const COOKIE_HEADER: &str = "cookie";

/// Credential returned by a [`CredentialProvider`].
#[derive(Clone, PartialEq, Eq)]
pub struct AuthenticationToken {
    value: String,
    expires_in: Option<Duration>,
}

impl AuthenticationToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_in: None,
        }
    }

    /// Lifetime counted from the moment the provider returned the token.
    pub fn expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn lifetime(&self) -> Option<Duration> {
        self.expires_in
    }
}

impl std::fmt::Debug for AuthenticationToken {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AuthenticationToken")
            .field("value", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

impl From<String> for AuthenticationToken {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for AuthenticationToken {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

pub trait CredentialProvider: Send + Sync {
    fn fetch(&self) -> BoxFuture<'_, Result<AuthenticationToken, ProviderError>>;
}

impl<F, Fut> CredentialProvider for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<AuthenticationToken, ProviderError>> + Send + 'static,
{
    fn fetch(&self) -> BoxFuture<'_, Result<AuthenticationToken, ProviderError>> {
        Box::pin(self())
    }
}

/// How credentials are attached to each attempt.
///
/// Strategies are applied once per attempt, so providers are asked again on
/// every retry. Wrap a provider in [`CachedCredentialProvider`] to reuse
/// tokens.
#[derive(Clone, Default)]
pub enum AuthenticationStrategy {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    BearerToken(Arc<dyn CredentialProvider>),
    Cookie(Arc<dyn CredentialProvider>),
}

impl std::fmt::Debug for AuthenticationStrategy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => formatter.write_str("None"),
            Self::Basic { username, .. } => formatter
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::BearerToken(_) => formatter.write_str("BearerToken(..)"),
            Self::Cookie(_) => formatter.write_str("Cookie(..)"),
        }
    }
}

impl AuthenticationStrategy {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn bearer_token(provider: impl CredentialProvider + 'static) -> Self {
        Self::BearerToken(Arc::new(provider))
    }

    pub fn cookie(provider: impl CredentialProvider + 'static) -> Self {
        Self::Cookie(Arc::new(provider))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub async fn attach(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<RequestDescriptor, AuthenticationError> {
        match self {
            Self::None => Ok(descriptor.clone()),
            Self::Basic { username, password } => {
                let encoded = STANDARD.encode(format!("{username}:{password}"));
                let value = credential_value(AUTHORIZATION_HEADER, format!("Basic {encoded}"))?;
                Ok(descriptor.header(AUTHORIZATION_HEADER, value))
            }
            Self::BearerToken(provider) => {
                let token = fetch_token(provider.as_ref()).await?;
                let value =
                    credential_value(AUTHORIZATION_HEADER, format!("Bearer {}", token.value()))?;
                Ok(descriptor.header(AUTHORIZATION_HEADER, value))
            }
            Self::Cookie(provider) => {
                let token = fetch_token(provider.as_ref()).await?;
                let value = credential_value(COOKIE_HEADER, token.value().to_owned())?;
                Ok(descriptor.header(COOKIE_HEADER, value))
            }
        }
    }
}

async fn fetch_token(
    provider: &dyn CredentialProvider,
) -> Result<AuthenticationToken, AuthenticationError> {
    provider
        .fetch()
        .await
        .map_err(|source| AuthenticationError::Provider { source })
}

fn credential_value(name: &'static str, value: String) -> Result<String, AuthenticationError> {
    match HeaderValue::from_str(&value) {
        Ok(_) => Ok(value),
        Err(_) => Err(AuthenticationError::InvalidCredential { name }),
    }
}

struct CachedToken {
    token: AuthenticationToken,
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| now < expires_at)
    }
}

/// Reuses tokens from an inner provider until they expire.
///
/// At most one fetch is in flight at a time: concurrent callers queue on the
/// cache lock and pick up the token the first caller stored.
pub struct CachedCredentialProvider {
    inner: Arc<dyn CredentialProvider>,
    ttl: Option<Duration>,
    cached: Mutex<Option<CachedToken>>,
}

impl CachedCredentialProvider {
    pub fn new(inner: impl CredentialProvider + 'static) -> Self {
        Self::from_arc(Arc::new(inner))
    }

    pub fn from_arc(inner: Arc<dyn CredentialProvider>) -> Self {
        Self {
            inner,
            ttl: None,
            cached: Mutex::new(None),
        }
    }

    /// Upper bound on how long any token is reused, whatever it reports.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }

    fn expiry_for(&self, token: &AuthenticationToken, fetched_at: Instant) -> Option<Instant> {
        let lifetime = match (token.lifetime(), self.ttl) {
            (Some(lifetime), Some(ttl)) => Some(lifetime.min(ttl)),
            (lifetime, ttl) => lifetime.or(ttl),
        };
        lifetime.map(|lifetime| fetched_at + lifetime)
    }

    async fn fetch_cached(&self) -> Result<AuthenticationToken, ProviderError> {
        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref()
            && entry.is_fresh(Instant::now())
        {
            return Ok(entry.token.clone());
        }

        debug!("refreshing cached credential");
        let token = self.inner.fetch().await?;
        let expires_at = self.expiry_for(&token, Instant::now());
        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });
        Ok(token)
    }
}

impl CredentialProvider for CachedCredentialProvider {
    fn fetch(&self) -> BoxFuture<'_, Result<AuthenticationToken, ProviderError>> {
        Box::pin(self.fetch_cached())
    }
}
