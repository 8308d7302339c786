use std::collections::BTreeMap;

use crate::error::Error;
use crate::util::{append_query_pairs, is_absolute_http_url, join_base_path};

/// Replaces every `{key}` in `resource` with the percent-encoded route value.
pub(crate) fn expand_resource(
    resource: &str,
    route_values: &BTreeMap<String, String>,
) -> Result<String, Error> {
    let mut expanded = String::with_capacity(resource.len());
    let mut rest = resource;

    while let Some(open) = rest.find(['{', '}']) {
        if rest.as_bytes()[open] == b'}' {
            return Err(invalid_resource(resource, "unmatched '}'"));
        }
        expanded.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];
        let Some(close) = after_open.find('}') else {
            return Err(invalid_resource(resource, "unterminated '{'"));
        };
        let key = &after_open[..close];
        if key.is_empty() || key.contains('{') {
            return Err(invalid_resource(resource, "empty or nested placeholder"));
        }
        let Some(value) = route_values.get(key) else {
            return Err(Error::MissingRouteValue {
                resource: resource.to_owned(),
                key: key.to_owned(),
            });
        };
        expanded.push_str(&urlencoding::encode(value));
        rest = &after_open[close + 1..];
    }
    expanded.push_str(rest);

    Ok(expanded)
}

fn invalid_resource(resource: &str, message: &str) -> Error {
    Error::InvalidResource {
        resource: resource.to_owned(),
        message: message.to_owned(),
    }
}

/// Builds the final request URL from base, resource template, route and query values.
pub(crate) fn resolve_url(
    base_url: &str,
    resource: &str,
    route_values: &BTreeMap<String, String>,
    query_values: &BTreeMap<String, String>,
) -> Result<String, Error> {
    let expanded = expand_resource(resource, route_values)?;
    let joined = if is_absolute_http_url(&expanded) {
        expanded
    } else {
        // A resource joined after a query or fragment would land inside it.
        if base_url.contains(['?', '#']) {
            return Err(Error::InvalidUrl {
                url: base_url.to_owned(),
            });
        }
        join_base_path(base_url, &expanded)
    };
    let query_pairs: Vec<(String, String)> = query_values
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    let url_text = append_query_pairs(&joined, &query_pairs);
    validate_url(&url_text)?;
    Ok(url_text)
}

fn validate_url(url_text: &str) -> Result<(), Error> {
    let invalid = || Error::InvalidUrl {
        url: url_text.to_owned(),
    };
    let parsed = url::Url::parse(url_text).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(invalid());
    }
    url_text.parse::<http::Uri>().map_err(|_| invalid())?;
    Ok(())
}
