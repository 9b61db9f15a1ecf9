// ChurchCMS backend — image provenance log
//! One row per uploaded image across the site, pointing back at the
//! owning entity through a weak (kind, id) pair.
//!
//! Rows are created only when an owner is first persisted with an image —
//! replacing the image on a later edit is deliberately not tracked. They
//! are removed either when the owner is deleted (same change notification)
//! or by the operator-run orphan sweep.

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::events::{ChangeAction, ChangeEvent, ChangeObserver, EntityKind};
use crate::handlers::{db_error, ApiError};
use crate::models::ImageLogEntry;
use crate::state::AppState;

// ── Registry ────────────────────────────────────────────────────────

/// The fixed set of image-bearing entity kinds. Kinds outside this list
/// (Book) are never tracked even when they carry an image column.
pub const IMAGE_TRACKED: [EntityKind; 5] = [
    EntityKind::HomeBanner,
    EntityKind::Sermon,
    EntityKind::Event,
    EntityKind::Branch,
    EntityKind::Merchandise,
];

pub fn is_tracked(kind: EntityKind) -> bool {
    IMAGE_TRACKED.contains(&kind)
}

/// Human label for the section an image came from. Kinds without a mapping
/// fall back to their own tag.
pub fn section_label(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::HomeBanner => "Home Banner",
        EntityKind::Sermon => "Sermon",
        EntityKind::Event => "Event",
        EntityKind::Branch => "Branch Location",
        other => other.as_str(),
    }
}

// ── Tracker ─────────────────────────────────────────────────────────

/// Change-bus subscriber that maintains the image log.
pub struct ImageTracker {
    pool: PgPool,
}

impl ImageTracker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChangeObserver for ImageTracker {
    fn name(&self) -> &'static str {
        "image_log"
    }

    // Errors bubble to the bus, which logs and swallows them — image
    // tracking can never fail the write it observed.
    async fn on_change(&self, event: &ChangeEvent) -> anyhow::Result<()> {
        if !is_tracked(event.kind) {
            return Ok(());
        }

        match event.action {
            ChangeAction::Created => {
                let Some(image) = &event.image else {
                    return Ok(());
                };
                sqlx::query(
                    "INSERT INTO ch_image_log (image_path, owner_kind, owner_id, section_label, file_size_bytes) \
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(&image.path)
                .bind(event.kind.as_str())
                .bind(event.entity_id)
                .bind(section_label(event.kind))
                .bind(image.size_bytes)
                .execute(&self.pool)
                .await?;
            }
            // Only first creation is logged; image replacement on edit is
            // out of scope.
            ChangeAction::Updated => {}
            ChangeAction::Deleted => {
                let removed = sqlx::query(
                    "DELETE FROM ch_image_log WHERE owner_kind = $1 AND owner_id = $2",
                )
                .bind(event.kind.as_str())
                .bind(event.entity_id)
                .execute(&self.pool)
                .await?
                .rows_affected();
                if removed > 0 {
                    tracing::info!(
                        kind = event.kind.as_str(),
                        owner_id = event.entity_id,
                        removed,
                        "removed image log entries with their owner"
                    );
                }
            }
        }

        Ok(())
    }
}

// ── Orphan reconciliation ───────────────────────────────────────────

/// Whether an entity of `kind` with the given id still exists.
pub async fn owner_exists(pool: &PgPool, kind: EntityKind, id: i64) -> sqlx::Result<bool> {
    let sql = match kind {
        EntityKind::HomeBanner => "SELECT EXISTS(SELECT 1 FROM ch_home_banners WHERE id = $1)",
        EntityKind::Sermon => "SELECT EXISTS(SELECT 1 FROM ch_sermons WHERE id = $1)",
        EntityKind::Event => "SELECT EXISTS(SELECT 1 FROM ch_events WHERE id = $1)",
        EntityKind::Branch => "SELECT EXISTS(SELECT 1 FROM ch_branches WHERE id = $1)",
        EntityKind::Merchandise => "SELECT EXISTS(SELECT 1 FROM ch_merchandise WHERE id = $1)",
        EntityKind::Book => "SELECT EXISTS(SELECT 1 FROM ch_books WHERE id = $1)",
    };
    sqlx::query_scalar(sql).bind(id).fetch_one(pool).await
}

/// Delete image-log entries whose owner no longer exists and return the
/// deletion count. Walks every record of each given kind, so it is
/// O(records) and strictly an offline maintenance operation — never called
/// on the request path. Running it twice back to back deletes nothing the
/// second time.
pub async fn reconcile_orphans(pool: &PgPool, kinds: &[EntityKind]) -> anyhow::Result<u64> {
    let mut deleted = 0u64;

    for &kind in kinds {
        let records: Vec<(i64, i64)> =
            sqlx::query_as("SELECT id, owner_id FROM ch_image_log WHERE owner_kind = $1")
                .bind(kind.as_str())
                .fetch_all(pool)
                .await?;

        for (log_id, owner_id) in records {
            if owner_exists(pool, kind, owner_id).await? {
                continue;
            }
            tracing::info!(
                kind = kind.as_str(),
                owner_id,
                "deleting orphaned image log entry"
            );
            sqlx::query("DELETE FROM ch_image_log WHERE id = $1")
                .bind(log_id)
                .execute(pool)
                .await?;
            deleted += 1;
        }
    }

    Ok(deleted)
}

// ── Read side ───────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ImageLogQuery {
    pub section: Option<String>,
    pub limit: Option<i64>,
}

/// GET /api/admin/image-logs — newest first, optionally by section label.
#[utoipa::path(get, path = "/api/admin/image-logs", tag = "admin",
    responses(
        (status = 200, description = "Image log entries", body = Value),
        (status = 401, description = "Admin token required")
    )
)]
pub async fn list_image_logs(
    State(state): State<AppState>,
    Query(q): Query<ImageLogQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = q.limit.unwrap_or(100).clamp(1, 500);

    let entries = sqlx::query_as::<_, ImageLogEntry>(
        "SELECT id, image_path, owner_kind, owner_id, section_label, file_size_bytes, created_at \
         FROM ch_image_log \
         WHERE ($1::text IS NULL OR section_label = $1) \
         ORDER BY created_at DESC, id DESC \
         LIMIT $2",
    )
    .bind(&q.section)
    .bind(limit)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    let count = entries.len();
    Ok(Json(json!({ "entries": entries, "count": count })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn books_are_never_tracked() {
        assert!(!is_tracked(EntityKind::Book));
        for kind in IMAGE_TRACKED {
            assert!(is_tracked(kind));
        }
    }

    #[test]
    fn unmapped_kinds_fall_back_to_their_tag() {
        assert_eq!(section_label(EntityKind::HomeBanner), "Home Banner");
        assert_eq!(section_label(EntityKind::Branch), "Branch Location");
        // Merchandise has no explicit label — the kind tag is used as-is.
        assert_eq!(section_label(EntityKind::Merchandise), "Merchandise");
    }
}
