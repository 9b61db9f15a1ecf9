// ChurchCMS backend — shared API error type + health endpoints

use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// API error type
// ---------------------------------------------------------------------------

/// Centralized API error for all handlers.
/// Logs full details server-side, returns sanitized JSON to the client.
///
/// Response format:
/// ```json
/// {
///   "error": {
///     "code": "NOT_FOUND",
///     "message": "Human-readable description",
///     "details": { ... }       // optional, null when absent
///   }
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not authenticated: {0}")]
    Unauthorized(String),

    #[error("Upstream API error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl ApiError {
    /// Machine-readable error code string for each variant.
    fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Upstream(_) => "UPSTREAM_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
            ApiError::Unavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Sanitized message safe to return to clients. Internal and upstream
    /// variants return generic text; the rest pass the message through.
    fn sanitized_message(&self) -> String {
        match self {
            ApiError::BadRequest(m)
            | ApiError::NotFound(m)
            | ApiError::Unauthorized(m)
            | ApiError::Unavailable(m) => m.clone(),
            ApiError::Upstream(_) => "Upstream service error".to_string(),
            ApiError::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// Attach structured details (e.g. the known-currency list on a
    /// conversion miss).
    pub fn with_details(self, details: Value) -> ApiErrorWithDetails {
        ApiErrorWithDetails {
            error: self,
            details: Some(details),
        }
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        ApiErrorWithDetails {
            error: self,
            details: None,
        }
        .into_response()
    }
}

/// ApiError with optional structured details attached.
pub struct ApiErrorWithDetails {
    pub error: ApiError,
    pub details: Option<Value>,
}

impl From<ApiError> for ApiErrorWithDetails {
    fn from(error: ApiError) -> Self {
        Self {
            error,
            details: None,
        }
    }
}

impl axum::response::IntoResponse for ApiErrorWithDetails {
    fn into_response(self) -> axum::response::Response {
        let status = self.error.status_code();

        tracing::error!(
            code = self.error.error_code(),
            "API error ({}): {}",
            status.as_u16(),
            self.error
        );

        let body = json!({
            "error": {
                "code": self.error.error_code(),
                "message": self.error.sanitized_message(),
                "details": self.details,
            }
        });
        (status, Json(body)).into_response()
    }
}

/// Map a database error onto the API surface without leaking SQL detail.
pub fn db_error(e: sqlx::Error) -> ApiError {
    ApiError::Internal(e.to_string())
}

// ---------------------------------------------------------------------------
// Health endpoints
// ---------------------------------------------------------------------------

const DB_PING_TIMEOUT: Duration = Duration::from_secs(5);

async fn db_ping(state: &AppState) -> bool {
    let result = tokio::time::timeout(
        DB_PING_TIMEOUT,
        sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&state.db),
    )
    .await;

    match result {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::error!("health: DB ping failed: {}", e);
            false
        }
        Err(_) => {
            tracing::error!(
                "health: DB ping timed out after {}s",
                DB_PING_TIMEOUT.as_secs()
            );
            false
        }
    }
}

/// GET /api/health
#[utoipa::path(get, path = "/api/health", tag = "health",
    responses((status = 200, description = "Service status", body = Value))
)]
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "app": "ChurchCMS",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    }))
}

/// GET /api/health/ready — 503 until the database answers.
#[utoipa::path(get, path = "/api/health/ready", tag = "health",
    responses(
        (status = 200, description = "Ready", body = Value),
        (status = 503, description = "Database unreachable")
    )
)]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    if db_ping(&state).await {
        (StatusCode::OK, Json(json!({ "ready": true })))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "ready": false })))
    }
}

/// GET /api/health/detailed — db status, audit-insert failure counter, and
/// rate-cache freshness for external monitoring.
#[utoipa::path(get, path = "/api/health/detailed", tag = "health",
    responses((status = 200, description = "Detailed service status", body = Value))
)]
pub async fn health_detailed(State(state): State<AppState>) -> Json<Value> {
    let db_ok = db_ping(&state).await;

    let (cached_codes, last_updated): (i64, Option<DateTime<Utc>>) =
        sqlx::query_as("SELECT COUNT(*), MAX(last_updated) FROM ch_exchange_rates")
            .fetch_one(&state.db)
            .await
            .unwrap_or((0, None));

    Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "app": "ChurchCMS",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "database": db_ok,
        "audit_insert_failures": state.audit_failures.load(Ordering::Relaxed),
        "exchange_rates": {
            "cached_codes": cached_codes,
            "last_updated": last_updated,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_status() {
        let cases = [
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ApiError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (ApiError::Upstream("x".into()), StatusCode::BAD_GATEWAY),
            (ApiError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (ApiError::Unavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(err.status_code(), status);
        }
    }

    #[test]
    fn internal_errors_are_sanitized() {
        let err = ApiError::Internal("connection refused to db:5432".into());
        assert_eq!(err.sanitized_message(), "Internal server error");

        let err = ApiError::NotFound("Book 7 not found".into());
        assert_eq!(err.sanitized_message(), "Book 7 not found");
    }
}
