// ChurchCMS backend — content entity CRUD
//
// Public reads, admin-guarded writes. Every successful write publishes a
// ChangeEvent on the bus with a label snapshot; deletes capture the row
// with DELETE … RETURNING so the label and image identity survive into the
// event after the row is gone. The handlers never talk to the audit or
// image-log tables directly.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::events::{ChangeEvent, EntityKind, ImageField};
use crate::handlers::{db_error, ApiError};
use crate::models::{
    Book, Branch, BranchPatch, ChurchEvent, ChurchEventPatch, HomeBanner, HomeBannerPatch,
    Merchandise, NewBranch, NewChurchEvent, NewHomeBanner, NewPricedItem, NewSermon,
    PricedItemPatch, Sermon, SermonPatch,
};
use crate::state::AppState;

pub const EVENT_CATEGORIES: [&str; 5] =
    ["General", "Conference", "Outreach", "Worship Night", "Other"];

fn invalid_category(category: &str) -> ApiError {
    ApiError::BadRequest(format!(
        "Invalid category '{}'. Valid: {:?}",
        category, EVENT_CATEGORIES
    ))
}

// ---------------------------------------------------------------------------
// Home banners
// ---------------------------------------------------------------------------

/// GET /api/banners — all banners in display order.
#[utoipa::path(get, path = "/api/banners", tag = "content",
    responses((status = 200, description = "Home banners", body = Value))
)]
pub async fn list_banners(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let banners = sqlx::query_as::<_, HomeBanner>(
        "SELECT * FROM ch_home_banners ORDER BY display_order ASC, id ASC",
    )
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    let count = banners.len();
    Ok(Json(json!({ "banners": banners, "count": count })))
}

/// POST /api/admin/banners
#[utoipa::path(post, path = "/api/admin/banners", tag = "content",
    request_body = NewHomeBanner,
    responses((status = 201, description = "Banner created", body = HomeBanner))
)]
pub async fn create_banner(
    State(state): State<AppState>,
    Json(body): Json<NewHomeBanner>,
) -> Result<(StatusCode, Json<HomeBanner>), ApiError> {
    let row = sqlx::query_as::<_, HomeBanner>(
        "INSERT INTO ch_home_banners \
             (title, subtitle, image, image_size_bytes, button_text, button_link, is_active, display_order) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(&body.title)
    .bind(&body.subtitle)
    .bind(&body.image)
    .bind(body.image_size_bytes)
    .bind(&body.button_text)
    .bind(&body.button_link)
    .bind(body.is_active)
    .bind(body.display_order)
    .fetch_one(&state.db)
    .await
    .map_err(db_error)?;

    state
        .bus
        .publish(ChangeEvent::created(
            EntityKind::HomeBanner,
            row.id,
            &row.title,
            ImageField::from_row(&row.image, row.image_size_bytes),
        ))
        .await;

    Ok((StatusCode::CREATED, Json(row)))
}

/// PATCH /api/admin/banners/{id}
#[utoipa::path(patch, path = "/api/admin/banners/{id}", tag = "content",
    params(("id" = i64, Path, description = "Banner id")),
    responses((status = 200, description = "Banner updated", body = HomeBanner))
)]
pub async fn update_banner(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<HomeBannerPatch>,
) -> Result<Json<HomeBanner>, ApiError> {
    let row = sqlx::query_as::<_, HomeBanner>(
        "UPDATE ch_home_banners SET \
             title = COALESCE($2, title), \
             subtitle = COALESCE($3, subtitle), \
             image = COALESCE($4, image), \
             image_size_bytes = COALESCE($5, image_size_bytes), \
             button_text = COALESCE($6, button_text), \
             button_link = COALESCE($7, button_link), \
             is_active = COALESCE($8, is_active), \
             display_order = COALESCE($9, display_order), \
             updated_at = now() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .bind(&body.title)
    .bind(&body.subtitle)
    .bind(&body.image)
    .bind(body.image_size_bytes)
    .bind(&body.button_text)
    .bind(&body.button_link)
    .bind(body.is_active)
    .bind(body.display_order)
    .fetch_optional(&state.db)
    .await
    .map_err(db_error)?
    .ok_or_else(|| ApiError::NotFound(format!("Banner {id} not found")))?;

    state
        .bus
        .publish(ChangeEvent::updated(EntityKind::HomeBanner, row.id, &row.title))
        .await;

    Ok(Json(row))
}

/// DELETE /api/admin/banners/{id}
#[utoipa::path(delete, path = "/api/admin/banners/{id}", tag = "content",
    params(("id" = i64, Path, description = "Banner id")),
    responses((status = 200, description = "Banner deleted", body = Value))
)]
pub async fn delete_banner(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let row = sqlx::query_as::<_, HomeBanner>(
        "DELETE FROM ch_home_banners WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(db_error)?
    .ok_or_else(|| ApiError::NotFound(format!("Banner {id} not found")))?;

    state
        .bus
        .publish(ChangeEvent::deleted(EntityKind::HomeBanner, row.id, &row.title))
        .await;

    Ok(Json(json!({ "deleted": true, "id": id })))
}

// ---------------------------------------------------------------------------
// Sermons
// ---------------------------------------------------------------------------

/// GET /api/sermons — newest first.
#[utoipa::path(get, path = "/api/sermons", tag = "content",
    responses((status = 200, description = "Sermon archive", body = Value))
)]
pub async fn list_sermons(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let sermons = sqlx::query_as::<_, Sermon>(
        "SELECT * FROM ch_sermons ORDER BY preached_on DESC NULLS LAST, id DESC",
    )
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    let count = sermons.len();
    Ok(Json(json!({ "sermons": sermons, "count": count })))
}

/// POST /api/admin/sermons
#[utoipa::path(post, path = "/api/admin/sermons", tag = "content",
    request_body = NewSermon,
    responses((status = 201, description = "Sermon created", body = Sermon))
)]
pub async fn create_sermon(
    State(state): State<AppState>,
    Json(body): Json<NewSermon>,
) -> Result<(StatusCode, Json<Sermon>), ApiError> {
    let row = sqlx::query_as::<_, Sermon>(
        "INSERT INTO ch_sermons \
             (title, description, speaker, video_url, thumbnail, thumbnail_size_bytes, preached_on) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(&body.title)
    .bind(&body.description)
    .bind(&body.speaker)
    .bind(&body.video_url)
    .bind(&body.thumbnail)
    .bind(body.thumbnail_size_bytes)
    .bind(body.preached_on)
    .fetch_one(&state.db)
    .await
    .map_err(db_error)?;

    state
        .bus
        .publish(ChangeEvent::created(
            EntityKind::Sermon,
            row.id,
            &row.title,
            ImageField::from_row(&row.thumbnail, row.thumbnail_size_bytes),
        ))
        .await;

    Ok((StatusCode::CREATED, Json(row)))
}

/// PATCH /api/admin/sermons/{id}
#[utoipa::path(patch, path = "/api/admin/sermons/{id}", tag = "content",
    params(("id" = i64, Path, description = "Sermon id")),
    responses((status = 200, description = "Sermon updated", body = Sermon))
)]
pub async fn update_sermon(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<SermonPatch>,
) -> Result<Json<Sermon>, ApiError> {
    let row = sqlx::query_as::<_, Sermon>(
        "UPDATE ch_sermons SET \
             title = COALESCE($2, title), \
             description = COALESCE($3, description), \
             speaker = COALESCE($4, speaker), \
             video_url = COALESCE($5, video_url), \
             thumbnail = COALESCE($6, thumbnail), \
             thumbnail_size_bytes = COALESCE($7, thumbnail_size_bytes), \
             preached_on = COALESCE($8, preached_on), \
             updated_at = now() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .bind(&body.title)
    .bind(&body.description)
    .bind(&body.speaker)
    .bind(&body.video_url)
    .bind(&body.thumbnail)
    .bind(body.thumbnail_size_bytes)
    .bind(body.preached_on)
    .fetch_optional(&state.db)
    .await
    .map_err(db_error)?
    .ok_or_else(|| ApiError::NotFound(format!("Sermon {id} not found")))?;

    state
        .bus
        .publish(ChangeEvent::updated(EntityKind::Sermon, row.id, &row.title))
        .await;

    Ok(Json(row))
}

/// DELETE /api/admin/sermons/{id}
#[utoipa::path(delete, path = "/api/admin/sermons/{id}", tag = "content",
    params(("id" = i64, Path, description = "Sermon id")),
    responses((status = 200, description = "Sermon deleted", body = Value))
)]
pub async fn delete_sermon(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let row = sqlx::query_as::<_, Sermon>("DELETE FROM ch_sermons WHERE id = $1 RETURNING *")
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::NotFound(format!("Sermon {id} not found")))?;

    state
        .bus
        .publish(ChangeEvent::deleted(EntityKind::Sermon, row.id, &row.title))
        .await;

    Ok(Json(json!({ "deleted": true, "id": id })))
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// GET /api/events — soonest first.
#[utoipa::path(get, path = "/api/events", tag = "content",
    responses((status = 200, description = "Church events", body = Value))
)]
pub async fn list_events(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let events = sqlx::query_as::<_, ChurchEvent>(
        "SELECT * FROM ch_events ORDER BY starts_at ASC NULLS LAST, id ASC",
    )
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    let count = events.len();
    Ok(Json(json!({ "events": events, "count": count })))
}

/// POST /api/admin/events
#[utoipa::path(post, path = "/api/admin/events", tag = "content",
    request_body = NewChurchEvent,
    responses((status = 201, description = "Event created", body = ChurchEvent))
)]
pub async fn create_event(
    State(state): State<AppState>,
    Json(body): Json<NewChurchEvent>,
) -> Result<(StatusCode, Json<ChurchEvent>), ApiError> {
    if !EVENT_CATEGORIES.contains(&body.category.as_str()) {
        return Err(invalid_category(&body.category));
    }

    let row = sqlx::query_as::<_, ChurchEvent>(
        "INSERT INTO ch_events \
             (title, description, category, image, image_size_bytes, location, starts_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(&body.title)
    .bind(&body.description)
    .bind(&body.category)
    .bind(&body.image)
    .bind(body.image_size_bytes)
    .bind(&body.location)
    .bind(body.starts_at)
    .fetch_one(&state.db)
    .await
    .map_err(db_error)?;

    state
        .bus
        .publish(ChangeEvent::created(
            EntityKind::Event,
            row.id,
            &row.title,
            ImageField::from_row(&row.image, row.image_size_bytes),
        ))
        .await;

    Ok((StatusCode::CREATED, Json(row)))
}

/// PATCH /api/admin/events/{id}
#[utoipa::path(patch, path = "/api/admin/events/{id}", tag = "content",
    params(("id" = i64, Path, description = "Event id")),
    responses((status = 200, description = "Event updated", body = ChurchEvent))
)]
pub async fn update_event(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ChurchEventPatch>,
) -> Result<Json<ChurchEvent>, ApiError> {
    if let Some(category) = body.category.as_deref() {
        if !EVENT_CATEGORIES.contains(&category) {
            return Err(invalid_category(category));
        }
    }

    let row = sqlx::query_as::<_, ChurchEvent>(
        "UPDATE ch_events SET \
             title = COALESCE($2, title), \
             description = COALESCE($3, description), \
             category = COALESCE($4, category), \
             image = COALESCE($5, image), \
             image_size_bytes = COALESCE($6, image_size_bytes), \
             location = COALESCE($7, location), \
             starts_at = COALESCE($8, starts_at), \
             updated_at = now() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .bind(&body.title)
    .bind(&body.description)
    .bind(&body.category)
    .bind(&body.image)
    .bind(body.image_size_bytes)
    .bind(&body.location)
    .bind(body.starts_at)
    .fetch_optional(&state.db)
    .await
    .map_err(db_error)?
    .ok_or_else(|| ApiError::NotFound(format!("Event {id} not found")))?;

    state
        .bus
        .publish(ChangeEvent::updated(EntityKind::Event, row.id, &row.title))
        .await;

    Ok(Json(row))
}

/// DELETE /api/admin/events/{id}
#[utoipa::path(delete, path = "/api/admin/events/{id}", tag = "content",
    params(("id" = i64, Path, description = "Event id")),
    responses((status = 200, description = "Event deleted", body = Value))
)]
pub async fn delete_event(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let row = sqlx::query_as::<_, ChurchEvent>("DELETE FROM ch_events WHERE id = $1 RETURNING *")
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::NotFound(format!("Event {id} not found")))?;

    state
        .bus
        .publish(ChangeEvent::deleted(EntityKind::Event, row.id, &row.title))
        .await;

    Ok(Json(json!({ "deleted": true, "id": id })))
}

// ---------------------------------------------------------------------------
// Branches
// ---------------------------------------------------------------------------

/// GET /api/branches
#[utoipa::path(get, path = "/api/branches", tag = "content",
    responses((status = 200, description = "Branch locations", body = Value))
)]
pub async fn list_branches(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let branches =
        sqlx::query_as::<_, Branch>("SELECT * FROM ch_branches ORDER BY name ASC, id ASC")
            .fetch_all(&state.db)
            .await
            .map_err(db_error)?;

    let count = branches.len();
    Ok(Json(json!({ "branches": branches, "count": count })))
}

/// POST /api/admin/branches
#[utoipa::path(post, path = "/api/admin/branches", tag = "content",
    request_body = NewBranch,
    responses((status = 201, description = "Branch created", body = Branch))
)]
pub async fn create_branch(
    State(state): State<AppState>,
    Json(body): Json<NewBranch>,
) -> Result<(StatusCode, Json<Branch>), ApiError> {
    let row = sqlx::query_as::<_, Branch>(
        "INSERT INTO ch_branches (name, location, phone, email, image, image_size_bytes) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(&body.name)
    .bind(&body.location)
    .bind(&body.phone)
    .bind(&body.email)
    .bind(&body.image)
    .bind(body.image_size_bytes)
    .fetch_one(&state.db)
    .await
    .map_err(db_error)?;

    state
        .bus
        .publish(ChangeEvent::created(
            EntityKind::Branch,
            row.id,
            &row.name,
            ImageField::from_row(&row.image, row.image_size_bytes),
        ))
        .await;

    Ok((StatusCode::CREATED, Json(row)))
}

/// PATCH /api/admin/branches/{id}
#[utoipa::path(patch, path = "/api/admin/branches/{id}", tag = "content",
    params(("id" = i64, Path, description = "Branch id")),
    responses((status = 200, description = "Branch updated", body = Branch))
)]
pub async fn update_branch(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<BranchPatch>,
) -> Result<Json<Branch>, ApiError> {
    let row = sqlx::query_as::<_, Branch>(
        "UPDATE ch_branches SET \
             name = COALESCE($2, name), \
             location = COALESCE($3, location), \
             phone = COALESCE($4, phone), \
             email = COALESCE($5, email), \
             image = COALESCE($6, image), \
             image_size_bytes = COALESCE($7, image_size_bytes), \
             updated_at = now() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .bind(&body.name)
    .bind(&body.location)
    .bind(&body.phone)
    .bind(&body.email)
    .bind(&body.image)
    .bind(body.image_size_bytes)
    .fetch_optional(&state.db)
    .await
    .map_err(db_error)?
    .ok_or_else(|| ApiError::NotFound(format!("Branch {id} not found")))?;

    state
        .bus
        .publish(ChangeEvent::updated(EntityKind::Branch, row.id, &row.name))
        .await;

    Ok(Json(row))
}

/// DELETE /api/admin/branches/{id}
#[utoipa::path(delete, path = "/api/admin/branches/{id}", tag = "content",
    params(("id" = i64, Path, description = "Branch id")),
    responses((status = 200, description = "Branch deleted", body = Value))
)]
pub async fn delete_branch(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let row = sqlx::query_as::<_, Branch>("DELETE FROM ch_branches WHERE id = $1 RETURNING *")
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::NotFound(format!("Branch {id} not found")))?;

    state
        .bus
        .publish(ChangeEvent::deleted(EntityKind::Branch, row.id, &row.name))
        .await;

    Ok(Json(json!({ "deleted": true, "id": id })))
}

// ---------------------------------------------------------------------------
// Merchandise
// ---------------------------------------------------------------------------

/// GET /api/merchandise — available items first.
#[utoipa::path(get, path = "/api/merchandise", tag = "content",
    responses((status = 200, description = "Merchandise catalogue", body = Value))
)]
pub async fn list_merchandise(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let items = sqlx::query_as::<_, Merchandise>(
        "SELECT * FROM ch_merchandise ORDER BY is_available DESC, name ASC, id ASC",
    )
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    let count = items.len();
    Ok(Json(json!({ "merchandise": items, "count": count })))
}

/// POST /api/admin/merchandise
#[utoipa::path(post, path = "/api/admin/merchandise", tag = "content",
    request_body = NewPricedItem,
    responses((status = 201, description = "Item created", body = Merchandise))
)]
pub async fn create_merchandise(
    State(state): State<AppState>,
    Json(body): Json<NewPricedItem>,
) -> Result<(StatusCode, Json<Merchandise>), ApiError> {
    let row = sqlx::query_as::<_, Merchandise>(
        "INSERT INTO ch_merchandise \
             (name, price, description, image, image_size_bytes, buy_link, is_available) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(&body.name)
    .bind(body.price)
    .bind(&body.description)
    .bind(&body.image)
    .bind(body.image_size_bytes)
    .bind(&body.buy_link)
    .bind(body.is_available)
    .fetch_one(&state.db)
    .await
    .map_err(db_error)?;

    state
        .bus
        .publish(ChangeEvent::created(
            EntityKind::Merchandise,
            row.id,
            &row.name,
            ImageField::from_row(&row.image, row.image_size_bytes),
        ))
        .await;

    Ok((StatusCode::CREATED, Json(row)))
}

/// PATCH /api/admin/merchandise/{id}
#[utoipa::path(patch, path = "/api/admin/merchandise/{id}", tag = "content",
    params(("id" = i64, Path, description = "Merchandise id")),
    responses((status = 200, description = "Item updated", body = Merchandise))
)]
pub async fn update_merchandise(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<PricedItemPatch>,
) -> Result<Json<Merchandise>, ApiError> {
    let row = sqlx::query_as::<_, Merchandise>(
        "UPDATE ch_merchandise SET \
             name = COALESCE($2, name), \
             price = COALESCE($3, price), \
             description = COALESCE($4, description), \
             image = COALESCE($5, image), \
             image_size_bytes = COALESCE($6, image_size_bytes), \
             buy_link = COALESCE($7, buy_link), \
             is_available = COALESCE($8, is_available), \
             updated_at = now() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .bind(&body.name)
    .bind(body.price)
    .bind(&body.description)
    .bind(&body.image)
    .bind(body.image_size_bytes)
    .bind(&body.buy_link)
    .bind(body.is_available)
    .fetch_optional(&state.db)
    .await
    .map_err(db_error)?
    .ok_or_else(|| ApiError::NotFound(format!("Merchandise {id} not found")))?;

    state
        .bus
        .publish(ChangeEvent::updated(EntityKind::Merchandise, row.id, &row.name))
        .await;

    Ok(Json(row))
}

/// DELETE /api/admin/merchandise/{id}
#[utoipa::path(delete, path = "/api/admin/merchandise/{id}", tag = "content",
    params(("id" = i64, Path, description = "Merchandise id")),
    responses((status = 200, description = "Item deleted", body = Value))
)]
pub async fn delete_merchandise(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let row =
        sqlx::query_as::<_, Merchandise>("DELETE FROM ch_merchandise WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&state.db)
            .await
            .map_err(db_error)?
            .ok_or_else(|| ApiError::NotFound(format!("Merchandise {id} not found")))?;

    state
        .bus
        .publish(ChangeEvent::deleted(EntityKind::Merchandise, row.id, &row.name))
        .await;

    Ok(Json(json!({ "deleted": true, "id": id })))
}

// ---------------------------------------------------------------------------
// Books
// ---------------------------------------------------------------------------

/// GET /api/books — available titles first.
#[utoipa::path(get, path = "/api/books", tag = "content",
    responses((status = 200, description = "Books for sale", body = Value))
)]
pub async fn list_books(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let books = sqlx::query_as::<_, Book>(
        "SELECT * FROM ch_books ORDER BY is_available DESC, name ASC, id ASC",
    )
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    let count = books.len();
    Ok(Json(json!({ "books": books, "count": count })))
}

/// POST /api/admin/books
#[utoipa::path(post, path = "/api/admin/books", tag = "content",
    request_body = NewPricedItem,
    responses((status = 201, description = "Book created", body = Book))
)]
pub async fn create_book(
    State(state): State<AppState>,
    Json(body): Json<NewPricedItem>,
) -> Result<(StatusCode, Json<Book>), ApiError> {
    let row = sqlx::query_as::<_, Book>(
        "INSERT INTO ch_books \
             (name, price, description, image, image_size_bytes, buy_link, is_available) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(&body.name)
    .bind(body.price)
    .bind(&body.description)
    .bind(&body.image)
    .bind(body.image_size_bytes)
    .bind(&body.buy_link)
    .bind(body.is_available)
    .fetch_one(&state.db)
    .await
    .map_err(db_error)?;

    state
        .bus
        .publish(ChangeEvent::created(
            EntityKind::Book,
            row.id,
            &row.name,
            ImageField::from_row(&row.image, row.image_size_bytes),
        ))
        .await;

    Ok((StatusCode::CREATED, Json(row)))
}

/// PATCH /api/admin/books/{id}
#[utoipa::path(patch, path = "/api/admin/books/{id}", tag = "content",
    params(("id" = i64, Path, description = "Book id")),
    responses((status = 200, description = "Book updated", body = Book))
)]
pub async fn update_book(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<PricedItemPatch>,
) -> Result<Json<Book>, ApiError> {
    let row = sqlx::query_as::<_, Book>(
        "UPDATE ch_books SET \
             name = COALESCE($2, name), \
             price = COALESCE($3, price), \
             description = COALESCE($4, description), \
             image = COALESCE($5, image), \
             image_size_bytes = COALESCE($6, image_size_bytes), \
             buy_link = COALESCE($7, buy_link), \
             is_available = COALESCE($8, is_available), \
             updated_at = now() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .bind(&body.name)
    .bind(body.price)
    .bind(&body.description)
    .bind(&body.image)
    .bind(body.image_size_bytes)
    .bind(&body.buy_link)
    .bind(body.is_available)
    .fetch_optional(&state.db)
    .await
    .map_err(db_error)?
    .ok_or_else(|| ApiError::NotFound(format!("Book {id} not found")))?;

    state
        .bus
        .publish(ChangeEvent::updated(EntityKind::Book, row.id, &row.name))
        .await;

    Ok(Json(row))
}

/// DELETE /api/admin/books/{id}
#[utoipa::path(delete, path = "/api/admin/books/{id}", tag = "content",
    params(("id" = i64, Path, description = "Book id")),
    responses((status = 200, description = "Book deleted", body = Value))
)]
pub async fn delete_book(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let row = sqlx::query_as::<_, Book>("DELETE FROM ch_books WHERE id = $1 RETURNING *")
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::NotFound(format!("Book {id} not found")))?;

    state
        .bus
        .publish(ChangeEvent::deleted(EntityKind::Book, row.id, &row.name))
        .await;

    Ok(Json(json!({ "deleted": true, "id": id })))
}
