// ChurchCMS backend — audit trail
//! Records who changed what, when, and from where.
//!
//! Entity changes arrive through the change bus; login/logout/denied
//! events are recorded explicitly by the auth layer. Insert failures are
//! logged, counted, and swallowed — auditing must never break the request
//! that triggered it. Rows are immutable once written and have no write
//! API; the admin endpoint below is read-only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::context;
use crate::events::{ChangeAction, ChangeEvent, ChangeObserver};
use crate::handlers::{db_error, ApiError};
use crate::models::AuditLogEntry;
use crate::state::AppState;

// ── Actions ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Login,
    Logout,
    PermissionDenied,
}

impl AuditAction {
    pub const ALL: [AuditAction; 6] = [
        AuditAction::Create,
        AuditAction::Update,
        AuditAction::Delete,
        AuditAction::Login,
        AuditAction::Logout,
        AuditAction::PermissionDenied,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Login => "LOGIN",
            AuditAction::Logout => "LOGOUT",
            AuditAction::PermissionDenied => "PERMISSION_DENIED",
        }
    }

    pub fn parse(tag: &str) -> Option<AuditAction> {
        AuditAction::ALL.into_iter().find(|a| a.as_str() == tag)
    }
}

impl From<ChangeAction> for AuditAction {
    fn from(action: ChangeAction) -> Self {
        match action {
            ChangeAction::Created => AuditAction::Create,
            ChangeAction::Updated => AuditAction::Update,
            ChangeAction::Deleted => AuditAction::Delete,
        }
    }
}

// ── Recorder ────────────────────────────────────────────────────────

struct AuditRow<'a> {
    username: Option<&'a str>,
    action: AuditAction,
    entity_kind: &'a str,
    entity_id: Option<i64>,
    entity_label: &'a str,
}

/// Insert one audit row. Failures are logged and counted, never returned:
/// an audit malfunction must not abort or roll back the caller's write.
async fn insert_row(pool: &PgPool, failures: &AtomicU64, row: AuditRow<'_>) {
    let ctx = context::current();
    let (ip, user_agent) = match &ctx {
        Some(c) => (c.ip_address.clone(), c.user_agent.clone()),
        None => (None, String::new()),
    };

    let result = sqlx::query(
        "INSERT INTO ch_audit_log (username, action, entity_kind, entity_id, entity_label, ip_address, user_agent) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(row.username)
    .bind(row.action.as_str())
    .bind(row.entity_kind)
    .bind(row.entity_id)
    .bind(row.entity_label)
    .bind(ip)
    .bind(user_agent)
    .execute(pool)
    .await;

    if let Err(e) = result {
        failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(action = row.action.as_str(), "audit insert failed: {}", e);
    }
}

/// Record LOGIN / LOGOUT / PERMISSION_DENIED. Unlike entity changes this
/// path accepts an absent actor: failed logins are recorded with client
/// provenance and a NULL username.
pub async fn record_auth_event(
    pool: &PgPool,
    failures: &AtomicU64,
    action: AuditAction,
    actor: Option<&str>,
    label: &str,
) {
    insert_row(
        pool,
        failures,
        AuditRow {
            username: actor,
            action,
            entity_kind: "AdminUser",
            entity_id: None,
            entity_label: label,
        },
    )
    .await;
}

/// Change-bus subscriber that turns entity writes into audit rows.
pub struct AuditRecorder {
    pool: PgPool,
    failures: Arc<AtomicU64>,
}

impl AuditRecorder {
    pub fn new(pool: PgPool, failures: Arc<AtomicU64>) -> Self {
        Self { pool, failures }
    }
}

#[async_trait]
impl ChangeObserver for AuditRecorder {
    fn name(&self) -> &'static str {
        "audit"
    }

    async fn on_change(&self, event: &ChangeEvent) -> anyhow::Result<()> {
        // Only writes by an authenticated actor are audited; anonymous and
        // system-internal writes pass through silently.
        let Some(actor) = context::current().and_then(|c| c.actor) else {
            return Ok(());
        };

        insert_row(
            &self.pool,
            &self.failures,
            AuditRow {
                username: Some(&actor),
                action: event.action.into(),
                entity_kind: event.kind.as_str(),
                entity_id: Some(event.entity_id),
                entity_label: &event.label,
            },
        )
        .await;

        Ok(())
    }
}

// ── Read side ───────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct AuditLogQuery {
    pub username: Option<String>,
    pub action: Option<String>,
    pub entity: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

/// GET /api/admin/audit-log — filtered, newest first.
#[utoipa::path(get, path = "/api/admin/audit-log", tag = "admin",
    responses(
        (status = 200, description = "Audit log entries", body = Value),
        (status = 401, description = "Admin token required")
    )
)]
pub async fn list_audit_log(
    State(state): State<AppState>,
    Query(q): Query<AuditLogQuery>,
) -> Result<Json<Value>, ApiError> {
    if let Some(action) = q.action.as_deref() {
        if AuditAction::parse(action).is_none() {
            return Err(ApiError::BadRequest(format!(
                "Unknown action '{}'. Valid: {:?}",
                action,
                AuditAction::ALL.map(|a| a.as_str())
            )));
        }
    }

    let limit = q.limit.unwrap_or(100).clamp(1, 500);

    let entries = sqlx::query_as::<_, AuditLogEntry>(
        "SELECT id, username, action, entity_kind, entity_id, entity_label, ip_address, user_agent, created_at \
         FROM ch_audit_log \
         WHERE ($1::text IS NULL OR username = $1) \
           AND ($2::text IS NULL OR action = $2) \
           AND ($3::text IS NULL OR entity_kind = $3) \
           AND ($4::timestamptz IS NULL OR created_at >= $4) \
           AND ($5::timestamptz IS NULL OR created_at <= $5) \
         ORDER BY created_at DESC, id DESC \
         LIMIT $6",
    )
    .bind(&q.username)
    .bind(&q.action)
    .bind(&q.entity)
    .bind(q.from)
    .bind(q.to)
    .bind(limit)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    let count = entries.len();
    Ok(Json(json!({ "entries": entries, "count": count })))
}
