//! Response shapes shared by the HTTP surfaces.
//!
//! The 429 produced here is a contract with the registration front end:
//! header names, body field names and the message text must not drift.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::security::rate_limit::{RateLimitDecision, RateLimitRule};

pub const RETRY_AFTER: &str = "retry-after";
pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitDetails {
    retry_after: u64,
    limit: u32,
    window: u64,
}

#[derive(Debug, Serialize)]
struct ErrorBody<D> {
    code: &'static str,
    message: String,
    details: D,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope<D> {
    error: ErrorBody<D>,
    timestamp: String,
    path: String,
}

/// `X-RateLimit-*` headers describing the client's current window.
pub fn rate_limit_headers(rule: &RateLimitRule, decision: &RateLimitDecision) -> [(&'static str, String); 3] {
    [
        (X_RATELIMIT_LIMIT, rule.max_requests.to_string()),
        (X_RATELIMIT_REMAINING, decision.remaining.to_string()),
        (X_RATELIMIT_RESET, decision.reset_time.timestamp_millis().to_string()),
    ]
}

/// The 429 returned when a client has exhausted its window.
pub fn rate_limited_response(
    rule: &RateLimitRule,
    decision: &RateLimitDecision,
    path: &str,
    now: DateTime<Utc>,
) -> Response {
    let retry_after = decision.retry_after.unwrap_or(0);

    let body = ErrorEnvelope {
        error: ErrorBody {
            code: RATE_LIMIT_EXCEEDED,
            message: format!("Rate limit exceeded. Try again in {} seconds.", retry_after),
            details: RateLimitDetails {
                retry_after,
                limit: rule.max_requests,
                window: rule.window_secs(),
            },
        },
        timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        path: path.to_string(),
    };

    let [limit, remaining, reset] = rate_limit_headers(rule, decision);
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(RETRY_AFTER, retry_after.to_string()), limit, remaining, reset],
        Json(body),
    )
        .into_response()
}

/// A JSON error for the service's own endpoints.
pub fn error_response(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": {
                "code": code,
                "message": message.into(),
            },
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use chrono::{Duration, TimeZone};

    #[tokio::test]
    async fn test_rate_limited_response_contract() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let rule = RateLimitRule::new(5, 900_000);
        let decision = RateLimitDecision {
            allowed: false,
            remaining: 0,
            reset_time: now + Duration::seconds(42),
            retry_after: Some(42),
        };

        let response = rate_limited_response(&rule, &decision, "/api/auth/login", now);

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers["retry-after"], "42");
        assert_eq!(headers["x-ratelimit-limit"], "5");
        assert_eq!(headers["x-ratelimit-remaining"], "0");
        assert_eq!(
            headers["x-ratelimit-reset"],
            (now + Duration::seconds(42)).timestamp_millis().to_string().as_str()
        );

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "error": {
                    "code": "RATE_LIMIT_EXCEEDED",
                    "message": "Rate limit exceeded. Try again in 42 seconds.",
                    "details": { "retryAfter": 42, "limit": 5, "window": 900 }
                },
                "timestamp": "2024-03-01T08:00:00.000Z",
                "path": "/api/auth/login"
            })
        );
    }
}
