// ChurchCMS backend — admin authentication & request context middleware
//
// Bearer tokens issued at login, stored server-side, checked in constant
// time. The context middleware runs on every route — authenticated or not —
// so failed logins still carry client provenance into the audit trail.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::audit::{self, AuditAction};
use crate::context::{self, RequestContext};
use crate::handlers::ApiError;
use crate::models::LoginRequest;
use crate::state::AppState;

// ── Credentials ─────────────────────────────────────────────────────

/// Hex-encoded sha256 digest of a password.
pub fn password_digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

fn digests_match(stored: &str, presented: &str) -> bool {
    stored.as_bytes().ct_eq(presented.as_bytes()).into()
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.to_string())
}

async fn lookup_token(pool: &PgPool, token: &str) -> Option<String> {
    let token: Uuid = token.parse().ok()?;
    sqlx::query_scalar("SELECT username FROM ch_admin_tokens WHERE token = $1")
        .bind(token)
        .fetch_optional(pool)
        .await
        .ok()
        .flatten()
}

// ── Middleware ──────────────────────────────────────────────────────

/// Resolve the caller's identity and run the rest of the chain inside its
/// request-context scope. Applied to every route.
pub async fn context_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);

    let headers = request.headers();
    let ip_address = context::client_ip(headers, peer);
    let user_agent = context::user_agent(headers);

    let actor = match bearer_token(headers) {
        Some(token) => lookup_token(&state.db, &token).await,
        None => None,
    };

    let ctx = RequestContext {
        actor,
        ip_address,
        user_agent,
    };
    context::scope(ctx, next.run(request)).await
}

/// Guard for admin routes: 401 unless the request context carries an
/// authenticated actor. Denials are not audited — only failed logins are.
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    match context::current().and_then(|c| c.actor) {
        Some(_) => Ok(next.run(request).await),
        None => Err(ApiError::Unauthorized("admin token required".into())),
    }
}

// ── Handlers ────────────────────────────────────────────────────────

/// POST /api/auth/login
#[utoipa::path(post, path = "/api/auth/login", tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Bearer token issued", body = Value),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<Value>, ApiError> {
    let stored: Option<String> =
        sqlx::query_scalar("SELECT password_sha256 FROM ch_admin_users WHERE username = $1")
            .bind(&body.username)
            .fetch_optional(&state.db)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;

    let presented = password_digest(&body.password);
    let ok = stored.is_some_and(|s| digests_match(&s, &presented));

    if !ok {
        tracing::warn!(username = %body.username, "failed admin login");
        audit::record_auth_event(
            &state.db,
            &state.audit_failures,
            AuditAction::PermissionDenied,
            None,
            &format!("Failed login attempt: {}", body.username),
        )
        .await;
        return Err(ApiError::Unauthorized("invalid username or password".into()));
    }

    let token = Uuid::new_v4();
    sqlx::query("INSERT INTO ch_admin_tokens (token, username) VALUES ($1, $2)")
        .bind(token)
        .bind(&body.username)
        .execute(&state.db)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    audit::record_auth_event(
        &state.db,
        &state.audit_failures,
        AuditAction::Login,
        Some(&body.username),
        &format!("Login: {}", body.username),
    )
    .await;

    Ok(Json(json!({ "token": token, "username": body.username })))
}

/// POST /api/auth/logout — invalidate the presented token.
#[utoipa::path(post, path = "/api/auth/logout", tag = "auth",
    responses(
        (status = 200, description = "Token invalidated", body = Value),
        (status = 401, description = "No valid token presented")
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let token = bearer_token(&headers)
        .and_then(|t| t.parse::<Uuid>().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;

    let username: Option<String> =
        sqlx::query_scalar("DELETE FROM ch_admin_tokens WHERE token = $1 RETURNING username")
            .bind(token)
            .fetch_optional(&state.db)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;

    let Some(username) = username else {
        return Err(ApiError::Unauthorized("unknown token".into()));
    };

    audit::record_auth_event(
        &state.db,
        &state.audit_failures,
        AuditAction::Logout,
        Some(&username),
        &format!("Logout: {username}"),
    )
    .await;

    Ok(Json(json!({ "logged_out": true, "username": username })))
}
