use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::Method;
use serde::Serialize;

use crate::auth::{AuthenticationStrategy, COOKIE_HEADER, CredentialProvider};
use crate::error::Error;
use crate::retry::{ExponentialBackoff, RetryStrategy};
use crate::route::resolve_url;
use crate::status::AllowedStatusCodes;
use crate::tags::{NAME_TAG, TagValue, Tags};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";
const TEXT_MEDIA_TYPE: &str = "text/plain";
const AUTHENTICATION_HEADER: &str = "authentication";

type StringMap = Arc<BTreeMap<String, String>>;

/// Everything needed to perform one HTTP call.
///
/// Every setter borrows `self` and returns a new descriptor, leaving the
/// receiver untouched. Maps are shared between descriptors and only the map
/// being changed is copied. Header names are stored lowercased. Accessors
/// carry a `_ref` suffix where the plain name is taken by a setter.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    authentication_strategy: AuthenticationStrategy,
    retry_strategy: RetryStrategy,
    base_url: String,
    method: Method,
    resource: String,
    headers: StringMap,
    route_values: StringMap,
    query_values: StringMap,
    tags: Tags,
    content: Bytes,
    content_type: Option<String>,
    content_encoding: Option<String>,
    timeout: Option<Duration>,
    allowed_status_codes: AllowedStatusCodes,
}

impl Default for RequestDescriptor {
    fn default() -> Self {
        Self {
            authentication_strategy: AuthenticationStrategy::None,
            retry_strategy: RetryStrategy::None,
            base_url: String::new(),
            method: Method::GET,
            resource: String::new(),
            headers: StringMap::default(),
            route_values: StringMap::default(),
            query_values: StringMap::default(),
            tags: Tags::default(),
            content: Bytes::new(),
            content_type: None,
            content_encoding: None,
            timeout: None,
            allowed_status_codes: AllowedStatusCodes::default(),
        }
    }
}

fn with_entry(map: &StringMap, key: String, value: String) -> StringMap {
    let mut next = map.clone();
    Arc::make_mut(&mut next).insert(key, value);
    next
}

fn with_entries<K, V, I>(map: &StringMap, entries: I, normalize_key: fn(String) -> String) -> StringMap
where
    K: Into<String>,
    V: Into<String>,
    I: IntoIterator<Item = (K, V)>,
{
    let mut next = map.clone();
    let target = Arc::make_mut(&mut next);
    for (key, value) in entries {
        target.insert(normalize_key(key.into()), value.into());
    }
    next
}

fn keep_key(key: String) -> String {
    key
}

fn header_key(key: String) -> String {
    key.to_ascii_lowercase()
}

fn serialize_pairs<T>(values: &T) -> Result<Vec<(String, String)>, Error>
where
    T: Serialize + ?Sized,
{
    let encoded =
        serde_urlencoded::to_string(values).map_err(|source| Error::SerializeValues { source })?;
    Ok(url::form_urlencoded::parse(encoded.as_bytes())
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect())
}

impl RequestDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    // Strategies

    pub fn authentication_strategy(&self, strategy: AuthenticationStrategy) -> Self {
        Self {
            authentication_strategy: strategy,
            ..self.clone()
        }
    }

    pub fn basic_authentication(
        &self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.authentication_strategy(AuthenticationStrategy::basic(username, password))
    }

    pub fn bearer_token_authentication(&self, provider: impl CredentialProvider + 'static) -> Self {
        self.authentication_strategy(AuthenticationStrategy::bearer_token(provider))
    }

    pub fn cookie_authentication(&self, provider: impl CredentialProvider + 'static) -> Self {
        self.authentication_strategy(AuthenticationStrategy::cookie(provider))
    }

    pub fn retry_strategy(&self, strategy: RetryStrategy) -> Self {
        Self {
            retry_strategy: strategy,
            ..self.clone()
        }
    }

    /// Exponential backoff with the default one second base delay.
    pub fn retry(&self, max_retries: usize, retry_on_timeout: bool) -> Self {
        self.retry_strategy(RetryStrategy::ExponentialBackoff(ExponentialBackoff::new(
            max_retries,
            retry_on_timeout,
        )))
    }

    // Request line

    pub fn base_url(&self, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..self.clone()
        }
    }

    pub fn method(&self, method: Method) -> Self {
        Self {
            method,
            ..self.clone()
        }
    }

    pub fn resource(&self, resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            ..self.clone()
        }
    }

    pub fn route_value(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            route_values: with_entry(&self.route_values, key.into(), value.into()),
            ..self.clone()
        }
    }

    pub fn route_values<K, V, I>(&self, values: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            route_values: with_entries(&self.route_values, values, keep_key),
            ..self.clone()
        }
    }

    /// Merges the fields of a serializable struct or map as route values.
    pub fn route_values_from<T>(&self, values: &T) -> Result<Self, Error>
    where
        T: Serialize + ?Sized,
    {
        Ok(self.route_values(serialize_pairs(values)?))
    }

    pub fn query_value(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            query_values: with_entry(&self.query_values, key.into(), value.into()),
            ..self.clone()
        }
    }

    pub fn query_values<K, V, I>(&self, values: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            query_values: with_entries(&self.query_values, values, keep_key),
            ..self.clone()
        }
    }

    /// Merges the fields of a serializable struct or map as query values.
    pub fn query_values_from<T>(&self, values: &T) -> Result<Self, Error>
    where
        T: Serialize + ?Sized,
    {
        Ok(self.query_values(serialize_pairs(values)?))
    }

    // Headers

    pub fn header(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            headers: with_entry(&self.headers, header_key(name.into()), value.into()),
            ..self.clone()
        }
    }

    pub fn headers<K, V, I>(&self, headers: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            headers: with_entries(&self.headers, headers, header_key),
            ..self.clone()
        }
    }

    /// Merges the fields of a serializable struct or map as headers.
    pub fn headers_from<T>(&self, headers: &T) -> Result<Self, Error>
    where
        T: Serialize + ?Sized,
    {
        Ok(self.headers(serialize_pairs(headers)?))
    }

    /// Sets the `Authentication` header verbatim. Credential strategies write
    /// `Authorization` instead.
    pub fn authentication(&self, value: impl Into<String>) -> Self {
        self.header(AUTHENTICATION_HEADER, value)
    }

    pub fn cookie(&self, value: impl Into<String>) -> Self {
        self.header(COOKIE_HEADER, value)
    }

    pub fn timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout.max(Duration::from_millis(1))),
            ..self.clone()
        }
    }

    // Body

    pub fn content_type(&self, content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            ..self.clone()
        }
    }

    pub fn content_encoding(&self, content_encoding: impl Into<String>) -> Self {
        Self {
            content_encoding: Some(content_encoding.into()),
            ..self.clone()
        }
    }

    pub fn body(&self, content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            ..self.clone()
        }
    }

    /// UTF-8 text body; `media_type` defaults to `text/plain`.
    pub fn text_body(&self, text: impl Into<String>, media_type: Option<&str>) -> Self {
        let media_type = media_type.unwrap_or(TEXT_MEDIA_TYPE);
        self.body(text.into())
            .content_type(format!("{media_type}; charset=utf-8"))
    }

    pub fn json_body<T>(&self, payload: &T) -> Result<Self, Error>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(payload).map_err(|source| Error::SerializeJson { source })?;
        Ok(self.body(body).content_type(JSON_CONTENT_TYPE))
    }

    pub fn form_body<K, V, I>(&self, fields: I) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (name, value) in fields {
            serializer.append_pair(name.as_ref(), value.as_ref());
        }
        self.body(serializer.finish()).content_type(FORM_CONTENT_TYPE)
    }

    /// Form body from any serializable struct or map.
    pub fn form_body_from<T>(&self, payload: &T) -> Result<Self, Error>
    where
        T: Serialize + ?Sized,
    {
        let encoded =
            serde_urlencoded::to_string(payload).map_err(|source| Error::SerializeForm { source })?;
        Ok(self.body(encoded).content_type(FORM_CONTENT_TYPE))
    }

    // Status codes

    pub fn allow(&self, codes: impl IntoIterator<Item = u16>) -> Self {
        Self {
            allowed_status_codes: self.allowed_status_codes.allow(codes),
            ..self.clone()
        }
    }

    pub fn allow_not_found(&self) -> Self {
        self.allow([404])
    }

    pub fn allow_any_status_code(&self) -> Self {
        Self {
            allowed_status_codes: self.allowed_status_codes.allow_any(),
            ..self.clone()
        }
    }

    // Tags

    pub fn tag<T>(&self, key: impl Into<String>, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            tags: self.tags.with(key, TagValue::new(value)),
            ..self.clone()
        }
    }

    pub fn tags<K, I>(&self, tags: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, TagValue)>,
    {
        Self {
            tags: self.tags.with_all(tags),
            ..self.clone()
        }
    }

    /// Typed tag lookup; yields `T::default()` when the key is missing or
    /// holds another type.
    pub fn tag_or_default<T>(&self, key: &str) -> T
    where
        T: Any + Clone + Default,
    {
        self.tags.get_or_default(key)
    }

    /// Display name used in logs.
    pub fn name(&self, name: impl Into<String>) -> Self {
        self.tag(NAME_TAG, name.into())
    }

    pub fn request_name(&self) -> String {
        self.tag_or_default::<String>(NAME_TAG)
    }

    // Accessors

    pub fn authentication_strategy_ref(&self) -> &AuthenticationStrategy {
        &self.authentication_strategy
    }

    pub fn retry_strategy_ref(&self) -> &RetryStrategy {
        &self.retry_strategy
    }

    pub fn base_url_ref(&self) -> &str {
        &self.base_url
    }

    pub fn method_ref(&self) -> &Method {
        &self.method
    }

    pub fn resource_ref(&self) -> &str {
        &self.resource
    }

    pub fn headers_ref(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn route_values_ref(&self) -> &BTreeMap<String, String> {
        &self.route_values
    }

    pub fn query_values_ref(&self) -> &BTreeMap<String, String> {
        &self.query_values
    }

    pub fn tags_ref(&self) -> &Tags {
        &self.tags
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn content_type_ref(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_encoding_ref(&self) -> Option<&str> {
        self.content_encoding.as_deref()
    }

    pub fn timeout_ref(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn allowed_status_codes(&self) -> &AllowedStatusCodes {
        &self.allowed_status_codes
    }

    /// Substitutes route values into the resource, joins it to the base URL
    /// and appends the query values.
    pub fn resolve_url(&self) -> Result<String, Error> {
        resolve_url(
            &self.base_url,
            &self.resource,
            &self.route_values,
            &self.query_values,
        )
    }

    /// All headers to send, content headers included.
    pub(crate) fn outgoing_headers(&self) -> impl Iterator<Item = (&str, &str)> {
        let content_headers = [
            ("content-type", self.content_type.as_deref()),
            ("content-encoding", self.content_encoding.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|value| (name, value)));
        self.headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .chain(content_headers)
    }
}
