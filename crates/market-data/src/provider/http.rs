//! HTTP plumbing shared by the concrete providers.
//!
//! Maps transport failures and upstream status codes onto
//! [`ProviderErrorCode`] so every provider reports them the same way.

use std::time::Duration;

use log::debug;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use crate::errors::{ProviderError, ProviderErrorCode};

/// Client timeout for every upstream request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest body excerpt carried in an error message.
const MAX_BODY_EXCERPT: usize = 200;

pub(crate) fn build_client() -> Client {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Send `request` and return the body of a 2xx response.
///
/// `subject` names what was asked for (a symbol, "symbols") and shows up in
/// `SYMBOL_NOT_FOUND` messages.
pub(crate) async fn fetch_text(
    provider: &str,
    request: RequestBuilder,
    subject: &str,
) -> Result<String, ProviderError> {
    let response = request.send().await.map_err(|e| transport_error(provider, &e))?;
    let status = response.status();

    if !status.is_success() {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();
        debug!("[{}] HTTP {} for {}", provider, status, subject);
        return Err(classify_status(provider, status, retry_after, subject, &body));
    }

    response
        .text()
        .await
        .map_err(|e| ProviderError::network(provider, format!("Failed to read response: {}", e)))
}

/// Decode a JSON body, reporting undecodable payloads as data quality errors.
pub(crate) fn parse_json<T: DeserializeOwned>(provider: &str, body: &str) -> Result<T, ProviderError> {
    serde_json::from_str(body).map_err(|e| {
        ProviderError::data_quality(provider, format!("Failed to parse response: {}", e))
    })
}

fn transport_error(provider: &str, error: &reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::network(provider, "Request timed out")
    } else {
        ProviderError::network(provider, format!("Request failed: {}", error))
    }
}

/// `Retry-After` in delay-seconds form. HTTP-date values are ignored.
pub(crate) fn parse_retry_after(value: &str) -> Option<u64> {
    value.trim().parse().ok()
}

/// Error for a non-2xx upstream response.
pub(crate) fn classify_status(
    provider: &str,
    status: StatusCode,
    retry_after: Option<u64>,
    subject: &str,
    body: &str,
) -> ProviderError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::rate_limited(provider, retry_after),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::new(
            ProviderErrorCode::AuthenticationError,
            provider,
            format!("HTTP {}: invalid or missing API key", status.as_u16()),
        ),
        StatusCode::NOT_FOUND => ProviderError::symbol_not_found(provider, subject),
        s if s.is_server_error() => ProviderError::unavailable(
            provider,
            format!("HTTP {} - {}", s.as_u16(), excerpt(body)),
        ),
        s => ProviderError::internal(provider, format!("HTTP {} - {}", s.as_u16(), excerpt(body))),
    }
}

fn excerpt(body: &str) -> &str {
    match body.char_indices().nth(MAX_BODY_EXCERPT) {
        Some((end, _)) => &body[..end],
        None => body,
    }
}
