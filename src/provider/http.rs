//! Shared HTTP client, SSE parsing, and upstream error extraction.

use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};

use crate::error::KilnError;

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Get (or create) the shared reqwest client.
///
/// No client-level timeout: streaming calls are bounded by the ingest adapter's
/// chunk and call timeouts instead.
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    })
}

/// Build default headers for a Bearer-token API. An empty key sends no auth header.
pub fn bearer_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if !api_key.is_empty() {
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
            headers.insert(AUTHORIZATION, val);
        }
    }
    headers
}

/// A parsed SSE `data:` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseData<'a> {
    Json(&'a str),
    Done,
}

/// Parse an SSE line. Comments, blank lines and non-data fields yield `None`.
pub fn parse_sse_data(line: &str) -> Option<SseData<'_>> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(SseData::Done);
    }
    if data.is_empty() {
        return None;
    }
    Some(SseData::Json(data))
}

/// Convert a non-success response into a [`KilnError`], draining the body.
///
/// The body is read to completion so the pooled connection is released before
/// any retry. Only the provider's `error.message` is kept; raw bodies are not.
pub async fn error_from_response(resp: reqwest::Response) -> KilnError {
    let status = resp.status().as_u16();
    let header_hint = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_retry_after_header(v, Utc::now()));
    let body = match resp.bytes().await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::debug!(error = %e, "Failed to drain upstream error body");
            String::new()
        }
    };
    status_to_error(status, &body, header_hint)
}

/// Map an upstream status and body to an error.
///
/// An `overloaded_error` body is treated as overloaded (529) whatever the status.
pub fn status_to_error(status: u16, body: &str, header_hint_ms: Option<u64>) -> KilnError {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let error_obj = parsed.as_ref().and_then(|v| v.get("error"));

    let overloaded = error_obj
        .and_then(|e| e.get("type"))
        .and_then(|t| t.as_str())
        .is_some_and(|t| t == "overloaded_error");
    let body_hint = error_obj
        .and_then(|e| e.get("retry_after"))
        .and_then(|r| r.as_f64())
        .filter(|s| *s >= 0.0)
        .map(|s| (s * 1000.0) as u64);
    let message = error_obj
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("upstream returned status {status}"));

    KilnError::Upstream {
        status: if overloaded { 529 } else { status },
        message,
        retry_after_ms: header_hint_ms.or(body_hint),
    }
}

/// Parse a `Retry-After` header: delta-seconds or an HTTP date.
pub fn parse_retry_after_header(value: &str, now: DateTime<Utc>) -> Option<u64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<f64>() {
        return (secs >= 0.0).then(|| (secs * 1000.0) as u64);
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.with_timezone(&Utc) - now;
    Some(wait.num_milliseconds().max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sse_data_lines_are_classified() {
        assert_eq!(parse_sse_data("data: {\"a\":1}"), Some(SseData::Json("{\"a\":1}")));
        assert_eq!(parse_sse_data("data:[DONE]"), Some(SseData::Done));
        assert_eq!(parse_sse_data("event: ping"), None);
        assert_eq!(parse_sse_data("data: "), None);
    }

    #[test]
    fn retry_after_accepts_seconds_and_http_dates() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert_eq!(parse_retry_after_header("2", now), Some(2_000));
        assert_eq!(
            parse_retry_after_header("Mon, 01 Jan 2024 00:00:05 GMT", now),
            Some(5_000)
        );
        assert_eq!(parse_retry_after_header("later", now), None);
    }

    #[test]
    fn overloaded_body_is_transient_even_with_500() {
        let body = r#"{"error":{"type":"overloaded_error","message":"busy"}}"#;

        let err = status_to_error(500, body, None);

        assert!(err.is_transient_upstream());
    }

    #[test]
    fn body_retry_hint_is_used_when_header_absent() {
        let body = r#"{"error":{"message":"slow down","retry_after":1.5}}"#;

        let err = status_to_error(429, body, None);

        assert_eq!(err.retry_after_ms(), Some(1_500));
    }

    #[test]
    fn raw_non_json_body_is_not_carried_into_the_message() {
        let err = status_to_error(500, "<html>Traceback at /srv/app.py line 3</html>", None);

        let KilnError::Upstream { message, .. } = err else {
            panic!("expected upstream error");
        };
        assert_eq!(message, "upstream returned status 500");
    }
}
