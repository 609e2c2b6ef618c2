//! Per-client-IP request budgets.
//!
//! Each function builds a fresh limiter with its own key store. Limiters are attached
//! to routers in `main`, so every budget is owned by the router it guards.

use axum::http::{HeaderValue, Response, StatusCode, header};
use axum::response::IntoResponse;
use axum::Json;
use tower_governor::{
    GovernorError, GovernorLayer, governor::GovernorConfigBuilder,
    key_extractor::SmartIpKeyExtractor,
};

type RateLimitLayer =
    GovernorLayer<SmartIpKeyExtractor, governor::middleware::NoOpMiddleware, axum::body::Body>;

fn layer(replenish_ms: u64, burst: u32) -> RateLimitLayer {
    GovernorLayer::new(
        GovernorConfigBuilder::default()
            .per_millisecond(replenish_ms)
            .burst_size(burst)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .expect("invalid governor config"),
    )
    .error_handler(json_error_handler)
}

/// POST /v1/auth/register: 5 requests per hour per IP.
pub fn register_layer() -> RateLimitLayer {
    layer(720_000, 5)
}

/// Read endpoints: 120 requests/minute per IP.
pub fn read_layer() -> RateLimitLayer {
    layer(500, 30)
}

/// Write endpoints: 60 requests/minute per IP.
pub fn write_layer() -> RateLimitLayer {
    layer(1_000, 20)
}

/// POST /v1/deltas/{id}/explain: 10 requests/minute per IP. The only route that
/// reaches the language model.
pub fn explain_layer() -> RateLimitLayer {
    layer(6_000, 10)
}

/// JSON error in ApiError format with a Retry-After header.
fn json_error_handler(err: GovernorError) -> Response<axum::body::Body> {
    let (status, retry_after, message) = match err {
        GovernorError::TooManyRequests { wait_time, .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            Some(wait_time),
            format!("Too many requests. Retry after {wait_time} seconds."),
        ),
        GovernorError::UnableToExtractKey => (
            StatusCode::INTERNAL_SERVER_ERROR,
            None,
            "Unable to determine client identity for rate limiting".to_string(),
        ),
        GovernorError::Other { code, msg, .. } => (code, None, msg.unwrap_or_default()),
    };

    let body = serde_json::json!({
        "error": covrabl_core::error::codes::RATE_LIMITED,
        "message": message,
        "request_id": uuid::Uuid::now_v7().to_string(),
    });

    let mut response = (status, Json(body)).into_response();
    if let Some(seconds) = retry_after {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_many_requests_sets_retry_after() {
        let response = json_error_handler(GovernorError::TooManyRequests {
            wait_time: 7,
            headers: None,
        });
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER),
            Some(&HeaderValue::from(7u64))
        );
    }

    #[test]
    fn missing_key_is_server_error_without_retry() {
        let response = json_error_handler(GovernorError::UnableToExtractKey);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }
}
