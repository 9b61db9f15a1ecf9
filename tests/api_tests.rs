use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::str::FromStr;
use tower::ServiceExt;
use uuid::Uuid;

use church_backend::auth;
use church_backend::events::EntityKind;
use church_backend::image_log;
use church_backend::state::AppState;

/// Helper: build a fresh AppState backed by a test Postgres database.
/// Returns None when DATABASE_URL is not set (CI without DB).
async fn try_test_state() -> Option<AppState> {
    dotenvy::dotenv().ok();
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => return None,
    };
    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    Some(AppState::new(pool).await)
}

/// Convenience macro: skip the test when DATABASE_URL is absent.
macro_rules! require_db {
    () => {
        match try_test_state().await {
            Some(s) => s,
            None => {
                eprintln!("Skipping: DATABASE_URL not set");
                return;
            }
        }
    };
}

/// Helper: build a router from a test state.
fn app(state: AppState) -> axum::Router {
    church_backend::create_router(state)
}

/// Helper: collect a response body into a serde_json::Value.
async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send_json(
    state: &AppState,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Value,
) -> axum::response::Response {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    app(state.clone())
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap()
}

async fn get(state: &AppState, uri: &str, token: Option<&str>) -> axum::response::Response {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    app(state.clone())
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

/// Helper: create a uniquely-named admin account and log it in.
/// Returns (username, bearer token).
async fn login_admin(state: &AppState) -> (String, String) {
    let username = format!("admin-{}", Uuid::new_v4());
    sqlx::query("INSERT INTO ch_admin_users (username, password_sha256) VALUES ($1, $2)")
        .bind(&username)
        .bind(auth::password_digest("wolfpack"))
        .execute(&state.db)
        .await
        .expect("Failed to seed test admin");

    let response = send_json(
        state,
        "POST",
        "/api/auth/login",
        None,
        json!({ "username": username, "password": "wolfpack" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let token = body["token"].as_str().expect("login returns token").to_string();
    (username, token)
}

async fn audit_count(state: &AppState, username: &str, action: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM ch_audit_log WHERE username = $1 AND action = $2")
        .bind(username)
        .bind(action)
        .fetch_one(&state.db)
        .await
        .unwrap()
}

async fn image_log_count(state: &AppState, kind: EntityKind, owner_id: i64) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM ch_image_log WHERE owner_kind = $1 AND owner_id = $2")
        .bind(kind.as_str())
        .bind(owner_id)
        .fetch_one(&state.db)
        .await
        .unwrap()
}

// ═══════════════════════════════════════════════════════════════════════════
//  Health
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn health_returns_200_with_fields() {
    let state = require_db!();
    let response = get(&state, "/api/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["app"], "ChurchCMS");
    assert!(body["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn detailed_health_reports_audit_failures_counter() {
    let state = require_db!();
    let response = get(&state, "/api/health/detailed", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert!(body["audit_insert_failures"].is_u64());
    assert!(body["exchange_rates"]["cached_codes"].is_i64() || body["exchange_rates"]["cached_codes"].is_u64());
}

// ═══════════════════════════════════════════════════════════════════════════
//  Auth & audit trail
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn failed_login_records_one_permission_denied_with_no_actor() {
    let state = require_db!();
    let ghost = format!("ghost-{}", Uuid::new_v4());

    let response = send_json(
        &state,
        "POST",
        "/api/auth/login",
        None,
        json!({ "username": ghost, "password": "nope" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let label = format!("Failed login attempt: {ghost}");
    let rows: Vec<(Option<String>, String)> = sqlx::query_as(
        "SELECT username, action FROM ch_audit_log WHERE entity_label = $1",
    )
    .bind(&label)
    .fetch_all(&state.db)
    .await
    .unwrap();

    assert_eq!(rows.len(), 1, "exactly one event per failed login");
    assert_eq!(rows[0].0, None, "failed logins have no actor");
    assert_eq!(rows[0].1, "PERMISSION_DENIED");
}

#[tokio::test]
async fn login_and_logout_are_audited() {
    let state = require_db!();
    let (username, token) = login_admin(&state).await;
    assert_eq!(audit_count(&state, &username, "LOGIN").await, 1);

    let response = send_json(&state, "POST", "/api/auth/logout", Some(&token), json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(audit_count(&state, &username, "LOGOUT").await, 1);
}

#[tokio::test]
async fn each_authenticated_write_produces_one_audit_event() {
    let state = require_db!();
    let (username, token) = login_admin(&state).await;

    let response = send_json(
        &state,
        "POST",
        "/api/admin/banners",
        Some(&token),
        json!({ "title": "Easter Service" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let banner = body_json(response).await;
    let id = banner["id"].as_i64().unwrap();

    let response = send_json(
        &state,
        "PATCH",
        &format!("/api/admin/banners/{id}"),
        Some(&token),
        json!({ "subtitle": "He is risen" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(audit_count(&state, &username, "CREATE").await, 1);
    assert_eq!(audit_count(&state, &username, "UPDATE").await, 1);

    let (kind, entity_id, label): (String, i64, String) = sqlx::query_as(
        "SELECT entity_kind, entity_id, entity_label FROM ch_audit_log \
         WHERE username = $1 AND action = 'CREATE'",
    )
    .bind(&username)
    .fetch_one(&state.db)
    .await
    .unwrap();
    assert_eq!(kind, "HomeBanner");
    assert_eq!(entity_id, id);
    assert_eq!(label, "Easter Service");
}

#[tokio::test]
async fn anonymous_writes_are_rejected_and_never_audited() {
    let state = require_db!();
    let marker = format!("Anon banner {}", Uuid::new_v4());

    let response = send_json(
        &state,
        "POST",
        "/api/admin/banners",
        None,
        json!({ "title": marker }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM ch_audit_log WHERE entity_label = $1")
            .bind(&marker)
            .fetch_one(&state.db)
            .await
            .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn audit_log_endpoint_filters_and_requires_admin() {
    let state = require_db!();

    let response = get(&state, "/api/admin/audit-log", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (username, token) = login_admin(&state).await;
    let uri = format!("/api/admin/audit-log?username={username}&action=LOGIN");
    let response = get(&state, &uri, Some(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["entries"][0]["action"], "LOGIN");
    assert_eq!(body["entries"][0]["username"], username.as_str());

    let response = get(&state, "/api/admin/audit-log?action=BOGUS", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ═══════════════════════════════════════════════════════════════════════════
//  Image provenance
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn banner_created_with_image_gets_one_provenance_row() {
    let state = require_db!();
    let (_, token) = login_admin(&state).await;

    let response = send_json(
        &state,
        "POST",
        "/api/admin/banners",
        Some(&token),
        json!({ "title": "Carols", "image": "banners/carols.jpg", "image_size_bytes": 48211 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = body_json(response).await["id"].as_i64().unwrap();

    let (section, size): (String, Option<i64>) = sqlx::query_as(
        "SELECT section_label, file_size_bytes FROM ch_image_log \
         WHERE owner_kind = 'HomeBanner' AND owner_id = $1",
    )
    .bind(id)
    .fetch_one(&state.db)
    .await
    .unwrap();
    assert_eq!(section, "Home Banner");
    assert_eq!(size, Some(48211));
}

#[tokio::test]
async fn banner_created_without_image_gets_no_provenance_row() {
    let state = require_db!();
    let (_, token) = login_admin(&state).await;

    let response = send_json(
        &state,
        "POST",
        "/api/admin/banners",
        Some(&token),
        json!({ "title": "Plain banner" }),
    )
    .await;
    let id = body_json(response).await["id"].as_i64().unwrap();

    assert_eq!(image_log_count(&state, EntityKind::HomeBanner, id).await, 0);
}

#[tokio::test]
async fn image_replacement_on_edit_is_not_tracked() {
    let state = require_db!();
    let (_, token) = login_admin(&state).await;

    let response = send_json(
        &state,
        "POST",
        "/api/admin/banners",
        Some(&token),
        json!({ "title": "Summer camp", "image": "banners/camp-v1.jpg" }),
    )
    .await;
    let id = body_json(response).await["id"].as_i64().unwrap();
    assert_eq!(image_log_count(&state, EntityKind::HomeBanner, id).await, 1);

    let response = send_json(
        &state,
        "PATCH",
        &format!("/api/admin/banners/{id}"),
        Some(&token),
        json!({ "image": "banners/camp-v2.jpg" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Still the single row from creation
    assert_eq!(image_log_count(&state, EntityKind::HomeBanner, id).await, 1);
}

#[tokio::test]
async fn deleting_an_owner_removes_only_its_image_rows() {
    let state = require_db!();
    let (username, token) = login_admin(&state).await;

    let a = body_json(
        send_json(
            &state,
            "POST",
            "/api/admin/banners",
            Some(&token),
            json!({ "title": "Banner A", "image": "banners/a.jpg" }),
        )
        .await,
    )
    .await["id"]
        .as_i64()
        .unwrap();

    let b = body_json(
        send_json(
            &state,
            "POST",
            "/api/admin/banners",
            Some(&token),
            json!({ "title": "Banner B", "image": "banners/b.jpg" }),
        )
        .await,
    )
    .await["id"]
        .as_i64()
        .unwrap();

    let response = send_json(
        &state,
        "DELETE",
        &format!("/api/admin/banners/{a}"),
        Some(&token),
        json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(image_log_count(&state, EntityKind::HomeBanner, a).await, 0);
    assert_eq!(image_log_count(&state, EntityKind::HomeBanner, b).await, 1);
    assert_eq!(audit_count(&state, &username, "DELETE").await, 1);
}

#[tokio::test]
async fn merchandise_section_label_falls_back_to_kind_tag() {
    let state = require_db!();
    let (_, token) = login_admin(&state).await;

    let response = send_json(
        &state,
        "POST",
        "/api/admin/merchandise",
        Some(&token),
        json!({ "name": "Choir Hoodie", "price": "35.00", "image": "merch/hoodie.jpg" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = body_json(response).await["id"].as_i64().unwrap();

    let section: String = sqlx::query_scalar(
        "SELECT section_label FROM ch_image_log WHERE owner_kind = 'Merchandise' AND owner_id = $1",
    )
    .bind(id)
    .fetch_one(&state.db)
    .await
    .unwrap();
    assert_eq!(section, "Merchandise");
}

#[tokio::test]
async fn books_are_outside_the_image_registry() {
    let state = require_db!();
    let (_, token) = login_admin(&state).await;

    let response = send_json(
        &state,
        "POST",
        "/api/admin/books",
        Some(&token),
        json!({ "name": "Daily Devotional", "price": "12.00", "image": "books/devotional.jpg" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = body_json(response).await["id"].as_i64().unwrap();

    assert_eq!(image_log_count(&state, EntityKind::Book, id).await, 0);
}

#[tokio::test]
async fn orphan_reconciliation_is_idempotent() {
    let state = require_db!();
    let (_, token) = login_admin(&state).await;

    // A branch created through the API, then deleted behind the API's back,
    // leaves its provenance row orphaned.
    let response = send_json(
        &state,
        "POST",
        "/api/admin/branches",
        Some(&token),
        json!({ "name": "East Campus", "image": "branches/east.jpg" }),
    )
    .await;
    let id = body_json(response).await["id"].as_i64().unwrap();
    assert_eq!(image_log_count(&state, EntityKind::Branch, id).await, 1);

    sqlx::query("DELETE FROM ch_branches WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await
        .unwrap();

    let first = image_log::reconcile_orphans(&state.db, &[EntityKind::Branch])
        .await
        .unwrap();
    assert!(first >= 1);
    assert_eq!(image_log_count(&state, EntityKind::Branch, id).await, 0);

    let second = image_log::reconcile_orphans(&state.db, &[EntityKind::Branch])
        .await
        .unwrap();
    assert_eq!(second, 0, "second run must delete nothing");
}

#[tokio::test]
async fn image_log_endpoint_filters_by_section() {
    let state = require_db!();
    let (_, token) = login_admin(&state).await;

    send_json(
        &state,
        "POST",
        "/api/admin/sermons",
        Some(&token),
        json!({ "title": "On Grace", "speaker": "Rev. Mensah", "thumbnail": "sermons/grace.jpg" }),
    )
    .await;

    let response = get(&state, "/api/admin/image-logs?section=Sermon&limit=5", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["count"].as_i64().unwrap() >= 1);
    for entry in body["entries"].as_array().unwrap() {
        assert_eq!(entry["section_label"], "Sermon");
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  Price conversion
// ═══════════════════════════════════════════════════════════════════════════

async fn seed_book(state: &AppState, price: &str) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO ch_books (name, price) VALUES ($1, $2) RETURNING id",
    )
    .bind(format!("Book {}", Uuid::new_v4()))
    .bind(Decimal::from_str(price).unwrap())
    .fetch_one(&state.db)
    .await
    .unwrap()
}

async fn seed_rate(state: &AppState, code: &str, rate: &str) {
    sqlx::query(
        "INSERT INTO ch_exchange_rates (currency_code, currency_name, rate) VALUES ($1, $2, $3) \
         ON CONFLICT (currency_code) DO UPDATE SET rate = EXCLUDED.rate, last_updated = now()",
    )
    .bind(code)
    .bind(church_backend::rates::currency_name(code))
    .bind(Decimal::from_str(rate).unwrap())
    .execute(&state.db)
    .await
    .unwrap();
}

#[tokio::test]
async fn usd_conversion_is_the_identity() {
    let state = require_db!();
    let id = seed_book(&state, "19.99").await;

    let response = get(&state, &format!("/api/books/{id}/price"), None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["currency_code"], "USD");
    assert_eq!(body["original_price"], "19.99");
    assert_eq!(body["converted_price"], "19.99");
}

#[tokio::test]
async fn cached_rate_converts_and_rounds_to_cents() {
    let state = require_db!();
    seed_rate(&state, "GHS", "12.5").await;
    let id = seed_book(&state, "10.00").await;

    let response = get(&state, &format!("/api/books/{id}/price?currency=ghs"), None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["converted_price"], "125.00");
    assert_eq!(body["currency_code"], "GHS");
    assert_eq!(body["currency"], "Ghana Cedi");
}

#[tokio::test]
async fn unknown_currency_is_a_structured_404_with_known_codes() {
    let state = require_db!();
    seed_rate(&state, "GHS", "12.5").await;
    let id = seed_book(&state, "10.00").await;

    let response = get(&state, &format!("/api/books/{id}/price?currency=ZZZ"), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");
    let available = body["error"]["details"]["available_currencies"]
        .as_array()
        .expect("error carries the known-code list");
    assert!(available.iter().any(|c| c == "GHS"));
}

#[tokio::test]
async fn merchandise_price_converts_too() {
    let state = require_db!();
    seed_rate(&state, "EUR", "0.9").await;

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO ch_merchandise (name, price) VALUES ($1, $2) RETURNING id",
    )
    .bind(format!("Mug {}", Uuid::new_v4()))
    .bind(Decimal::from_str("20.00").unwrap())
    .fetch_one(&state.db)
    .await
    .unwrap();

    let response = get(&state, &format!("/api/merchandise/{id}/price?currency=EUR"), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["converted_price"], "18.00");
}

/// Serve a fixed JSON payload on an ephemeral local port, standing in for
/// the external exchange-rate feed.
async fn spawn_feed(payload: Value) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = axum::Router::new().route(
        "/",
        axum::routing::get(move || {
            let payload = payload.clone();
            async move { axum::Json(payload) }
        }),
    );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

#[tokio::test]
async fn refresh_upserts_names_and_rejects_malformed_codes() {
    let state = require_db!();

    let url = spawn_feed(json!({
        "rates": {
            "XXA": 2.25,
            "XXB": "bogus",
            "XXC": -1.0,
        }
    }))
    .await;

    let first = church_backend::rates::refresh_from(&state.client, &state.db, &url)
        .await
        .unwrap();
    assert_eq!(first.rejected, 2, "string and negative rates are rejected per-code");

    let (name, rate): (String, Decimal) = sqlx::query_as(
        "SELECT currency_name, rate FROM ch_exchange_rates WHERE currency_code = 'XXA'",
    )
    .fetch_one(&state.db)
    .await
    .unwrap();
    assert_eq!(name, "XXA Currency", "unknown codes get the fallback name");
    assert_eq!(rate, Decimal::from_str("2.25").unwrap());

    // The rejected codes never made it into the cache
    let bad: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM ch_exchange_rates WHERE currency_code IN ('XXB', 'XXC')",
    )
    .fetch_one(&state.db)
    .await
    .unwrap();
    assert_eq!(bad, 0);

    // Second pass over the same feed updates in place instead of appending
    let second = church_backend::rates::refresh_from(&state.client, &state.db, &url)
        .await
        .unwrap();
    assert_eq!(second.created, 0);
    assert!(second.updated >= 1);
}

#[tokio::test]
async fn concurrent_upserts_converge_to_one_full_row() {
    let state = require_db!();

    tokio::join!(
        seed_rate(&state, "XCV", "5.0"),
        seed_rate(&state, "XCV", "7.0"),
    );

    let rates: Vec<Decimal> =
        sqlx::query_scalar("SELECT rate FROM ch_exchange_rates WHERE currency_code = 'XCV'")
            .fetch_all(&state.db)
            .await
            .unwrap();

    assert_eq!(rates.len(), 1, "upsert is keyed on code, never an append");
    let five = Decimal::from_str("5.0").unwrap();
    let seven = Decimal::from_str("7.0").unwrap();
    assert!(rates[0] == five || rates[0] == seven);
}

#[tokio::test]
async fn currencies_endpoint_lists_known_codes() {
    let state = require_db!();
    seed_rate(&state, "GHS", "12.5").await;

    let response = get(&state, "/api/currencies", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    let codes: Vec<&str> = body["currencies"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|c| c["currency_code"].as_str())
        .collect();
    assert!(codes.contains(&"GHS"));
}
