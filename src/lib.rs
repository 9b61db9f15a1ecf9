pub mod audit;
pub mod auth;
pub mod content;
pub mod context;
pub mod events;
pub mod handlers;
pub mod image_log;
pub mod models;
pub mod rates;
pub mod scheduler;
pub mod state;

use axum::middleware;
use axum::routing::{get, patch, post};
use axum::Router;
use utoipa::OpenApi;

use state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "ChurchCMS Backend",
        description = "Content management backend for the church website: banners, sermons, \
                       events, branches, merchandise and books, with an audit trail, image \
                       provenance log, and cached currency conversion."
    ),
    paths(
        handlers::health,
        handlers::readiness,
        handlers::health_detailed,
        auth::login,
        auth::logout,
        content::list_banners,
        content::create_banner,
        content::update_banner,
        content::delete_banner,
        content::list_sermons,
        content::create_sermon,
        content::update_sermon,
        content::delete_sermon,
        content::list_events,
        content::create_event,
        content::update_event,
        content::delete_event,
        content::list_branches,
        content::create_branch,
        content::update_branch,
        content::delete_branch,
        content::list_merchandise,
        content::create_merchandise,
        content::update_merchandise,
        content::delete_merchandise,
        content::list_books,
        content::create_book,
        content::update_book,
        content::delete_book,
        rates::list_currencies,
        rates::book_price,
        rates::merchandise_price,
        rates::refresh_rates,
        audit::list_audit_log,
        image_log::list_image_logs,
    ),
    components(schemas(
        models::HomeBanner,
        models::NewHomeBanner,
        models::HomeBannerPatch,
        models::Sermon,
        models::NewSermon,
        models::SermonPatch,
        models::ChurchEvent,
        models::NewChurchEvent,
        models::ChurchEventPatch,
        models::Branch,
        models::NewBranch,
        models::BranchPatch,
        models::Merchandise,
        models::Book,
        models::NewPricedItem,
        models::PricedItemPatch,
        models::AuditLogEntry,
        models::ImageLogEntry,
        models::LoginRequest,
    ))
)]
pub struct ApiDoc;

/// Build the application router with the given state.
/// Extracted from `main()` so integration tests can construct the app
/// without binding to a network port.
pub fn create_router(state: AppState) -> Router {
    // Admin surface: content writes, audit/image-log views, manual rate
    // refresh. Guarded by the context-carrier actor check.
    let admin = Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/admin/banners", post(content::create_banner))
        .route(
            "/api/admin/banners/{id}",
            patch(content::update_banner).delete(content::delete_banner),
        )
        .route("/api/admin/sermons", post(content::create_sermon))
        .route(
            "/api/admin/sermons/{id}",
            patch(content::update_sermon).delete(content::delete_sermon),
        )
        .route("/api/admin/events", post(content::create_event))
        .route(
            "/api/admin/events/{id}",
            patch(content::update_event).delete(content::delete_event),
        )
        .route("/api/admin/branches", post(content::create_branch))
        .route(
            "/api/admin/branches/{id}",
            patch(content::update_branch).delete(content::delete_branch),
        )
        .route("/api/admin/merchandise", post(content::create_merchandise))
        .route(
            "/api/admin/merchandise/{id}",
            patch(content::update_merchandise).delete(content::delete_merchandise),
        )
        .route("/api/admin/books", post(content::create_book))
        .route(
            "/api/admin/books/{id}",
            patch(content::update_book).delete(content::delete_book),
        )
        .route("/api/admin/audit-log", get(audit::list_audit_log))
        .route("/api/admin/image-logs", get(image_log::list_image_logs))
        .route("/api/admin/rates/refresh", post(rates::refresh_rates))
        .route_layer(middleware::from_fn(auth::require_admin));

    Router::new()
        // Health
        .route("/api/health", get(handlers::health))
        .route("/api/health/ready", get(handlers::readiness))
        .route("/api/health/detailed", get(handlers::health_detailed))
        // Auth
        .route("/api/auth/login", post(auth::login))
        // Public content reads
        .route("/api/banners", get(content::list_banners))
        .route("/api/sermons", get(content::list_sermons))
        .route("/api/events", get(content::list_events))
        .route("/api/branches", get(content::list_branches))
        .route("/api/merchandise", get(content::list_merchandise))
        .route("/api/books", get(content::list_books))
        // Price conversion
        .route("/api/books/{id}/price", get(rates::book_price))
        .route("/api/merchandise/{id}/price", get(rates::merchandise_price))
        .route("/api/currencies", get(rates::list_currencies))
        // Admin surface
        .merge(admin)
        // Every route runs inside its request-context scope
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::context_middleware,
        ))
        .with_state(state)
}
