//! Error-to-response mapping and shared response plumbing

use crate::quota::QuotaUsage;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use phrasefind_common::human_time::format_retry_after;
use phrasefind_common::Error;
use serde_json::json;
use tracing::error;

/// Wrapper turning the common error taxonomy into HTTP responses.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            Error::InvalidInput(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            Error::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            Error::RateLimited {
                retry_after_seconds,
            } => retry_limited_response(
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests",
                retry_after_seconds,
            ),
            Error::QuotaExceeded {
                retry_after_seconds,
            } => retry_limited_response(
                StatusCode::FORBIDDEN,
                "Free analysis limit reached",
                retry_after_seconds,
            ),
            Error::UpstreamUnavailable(message) => {
                error!(error = %message, "Upstream unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "error": "Analysis service is temporarily unavailable" })),
                )
                    .into_response()
            }
            Error::UpstreamAuth(message) => {
                error!(error = %message, "Upstream configuration error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Service configuration error" })),
                )
                    .into_response()
            }
            other => {
                error!(error = %other, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

/// Shared body + `Retry-After` header for 429/403 denials.
fn retry_limited_response(status: StatusCode, message: &str, retry_after_seconds: i64) -> Response {
    let mut response = (
        status,
        Json(json!({
            "error": message,
            "retryAfterSeconds": retry_after_seconds,
            "retryAfterFormatted": format_retry_after(retry_after_seconds),
        })),
    )
        .into_response();

    if let Ok(value) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

/// Paywall usage headers attached to every gated response.
pub fn quota_headers(usage: &QuotaUsage) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Ok(value) = HeaderValue::from_str(&usage.used.to_string()) {
        headers.insert("X-Paywall-Requests-Used", value);
    }
    let limit = match usage.limit {
        Some(limit) => limit.to_string(),
        None => "unlimited".to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&limit) {
        headers.insert("X-Paywall-Requests-Limit", value);
    }
    let has_sub = if usage.has_subscription {
        HeaderValue::from_static("true")
    } else {
        HeaderValue::from_static("false")
    };
    headers.insert("X-Paywall-Has-Subscription", has_sub);

    headers
}

/// Best-effort client IP: first `X-Forwarded-For` hop, else the socket
/// peer address.
pub fn client_ip(headers: &HeaderMap, peer: std::net::SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| peer.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_headers_free_tier() {
        let usage = QuotaUsage {
            used: 2,
            limit: Some(3),
            has_subscription: false,
        };
        let headers = quota_headers(&usage);
        assert_eq!(headers["X-Paywall-Requests-Used"], "2");
        assert_eq!(headers["X-Paywall-Requests-Limit"], "3");
        assert_eq!(headers["X-Paywall-Has-Subscription"], "false");
    }

    #[test]
    fn test_quota_headers_subscriber() {
        let usage = QuotaUsage {
            used: 0,
            limit: None,
            has_subscription: true,
        };
        let headers = quota_headers(&usage);
        assert_eq!(headers["X-Paywall-Requests-Limit"], "unlimited");
        assert_eq!(headers["X-Paywall-Has-Subscription"], "true");
    }

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("10.0.0.1, 192.168.0.1"),
        );
        let peer: std::net::SocketAddr = "127.0.0.1:9999".parse().unwrap();
        assert_eq!(client_ip(&headers, peer), "10.0.0.1");
        assert_eq!(client_ip(&HeaderMap::new(), peer), "127.0.0.1");
    }
}
