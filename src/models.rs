use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ---------------------------------------------------------------------------
// Home banners
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct HomeBanner {
    pub id: i64,
    pub title: String,
    pub subtitle: Option<String>,
    pub image: Option<String>,
    pub image_size_bytes: Option<i64>,
    pub button_text: Option<String>,
    pub button_link: Option<String>,
    pub is_active: bool,
    pub display_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewHomeBanner {
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub image_size_bytes: Option<i64>,
    #[serde(default)]
    pub button_text: Option<String>,
    #[serde(default)]
    pub button_link: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub display_order: i32,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct HomeBannerPatch {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub image: Option<String>,
    pub image_size_bytes: Option<i64>,
    pub button_text: Option<String>,
    pub button_link: Option<String>,
    pub is_active: Option<bool>,
    pub display_order: Option<i32>,
}

// ---------------------------------------------------------------------------
// Sermons
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Sermon {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub speaker: String,
    pub video_url: Option<String>,
    pub thumbnail: Option<String>,
    pub thumbnail_size_bytes: Option<i64>,
    pub preached_on: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewSermon {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub speaker: String,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub thumbnail_size_bytes: Option<i64>,
    #[serde(default)]
    pub preached_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct SermonPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub speaker: Option<String>,
    pub video_url: Option<String>,
    pub thumbnail: Option<String>,
    pub thumbnail_size_bytes: Option<i64>,
    pub preached_on: Option<NaiveDate>,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct ChurchEvent {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub category: String,
    pub image: Option<String>,
    pub image_size_bytes: Option<i64>,
    pub location: String,
    pub starts_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewChurchEvent {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub image_size_bytes: Option<i64>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ChurchEventPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub image: Option<String>,
    pub image_size_bytes: Option<i64>,
    pub location: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Branches
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Branch {
    pub id: i64,
    pub name: String,
    pub location: String,
    pub phone: String,
    pub email: String,
    pub image: Option<String>,
    pub image_size_bytes: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewBranch {
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub image_size_bytes: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct BranchPatch {
    pub name: Option<String>,
    pub location: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub image: Option<String>,
    pub image_size_bytes: Option<i64>,
}

// ---------------------------------------------------------------------------
// Merchandise & books (priced items)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Merchandise {
    pub id: i64,
    pub name: String,
    pub price: Decimal,
    pub description: String,
    pub image: Option<String>,
    pub image_size_bytes: Option<i64>,
    pub buy_link: Option<String>,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Book {
    pub id: i64,
    pub name: String,
    pub price: Decimal,
    pub description: String,
    pub image: Option<String>,
    pub image_size_bytes: Option<i64>,
    pub buy_link: Option<String>,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Shared create-request shape for merchandise and books.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewPricedItem {
    pub name: String,
    pub price: Decimal,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub image_size_bytes: Option<i64>,
    #[serde(default)]
    pub buy_link: Option<String>,
    #[serde(default = "default_true")]
    pub is_available: bool,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct PricedItemPatch {
    pub name: Option<String>,
    pub price: Option<Decimal>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub image_size_bytes: Option<i64>,
    pub buy_link: Option<String>,
    pub is_available: Option<bool>,
}

// ---------------------------------------------------------------------------
// Audit log & image log (read models)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct AuditLogEntry {
    pub id: i64,
    pub username: Option<String>,
    pub action: String,
    pub entity_kind: String,
    pub entity_id: Option<i64>,
    pub entity_label: String,
    pub ip_address: Option<String>,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct ImageLogEntry {
    pub id: i64,
    pub image_path: String,
    pub owner_kind: String,
    pub owner_id: i64,
    pub section_label: String,
    pub file_size_bytes: Option<i64>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_category() -> String {
    "General".to_string()
}
