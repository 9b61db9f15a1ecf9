// ChurchCMS backend — exchange-rate cache & price conversion
//
// A background job (see scheduler.rs) fetches the full USD-based rate
// table once a day and upserts it per currency code. Request handlers only
// ever read the cached rows — conversion never touches the network. The
// feed is untrusted input: malformed values are rejected per-code without
// aborting the refresh, and unknown codes are accepted and stored.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::handlers::{db_error, ApiError, ApiErrorWithDetails};
use crate::state::AppState;

pub const DEFAULT_FEED_URL: &str = "https://api.exchangerate-api.com/v4/latest/USD";
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

// ── Currency names ──────────────────────────────────────────────────

/// Display name for a currency code. Codes outside the table fall back to
/// "<code> Currency".
pub fn currency_name(code: &str) -> String {
    let name = match code {
        "USD" => "US Dollar",
        "GHS" => "Ghana Cedi",
        "CUP" => "Cuban Peso",
        "EUR" => "Euro",
        "GBP" => "British Pound",
        "JPY" => "Japanese Yen",
        "INR" => "Indian Rupee",
        "AUD" => "Australian Dollar",
        "CAD" => "Canadian Dollar",
        "CHF" => "Swiss Franc",
        "CNY" => "Chinese Yuan",
        "SEK" => "Swedish Krona",
        "NZD" => "New Zealand Dollar",
        "ZAR" => "South African Rand",
        "BRL" => "Brazilian Real",
        "MXN" => "Mexican Peso",
        "SGD" => "Singapore Dollar",
        "HKD" => "Hong Kong Dollar",
        "NOK" => "Norwegian Krone",
        "KRW" => "South Korean Won",
        "TRY" => "Turkish Lira",
        "RUB" => "Russian Ruble",
        "AED" => "UAE Dirham",
        "KES" => "Kenyan Shilling",
        "NGN" => "Nigerian Naira",
        other => return format!("{other} Currency"),
    };
    name.to_string()
}

// ── Refresh ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize)]
pub struct RefreshSummary {
    pub created: u64,
    pub updated: u64,
    pub rejected: u64,
}

/// Validate one rate value from the feed. Rejects anything that is not a
/// finite positive number small enough for the NUMERIC(12,6) column.
fn parse_rate(value: &Value) -> Option<Decimal> {
    let rate = value.as_f64()?;
    if !rate.is_finite() || rate <= 0.0 || rate >= 1_000_000.0 {
        return None;
    }
    Decimal::from_f64(rate).map(|d| d.round_dp(6))
}

/// Fetch the configured feed (RATE_SOURCE_URL, defaulting to the public
/// exchangerate-api endpoint) and upsert the full table.
pub async fn refresh(client: &reqwest::Client, pool: &PgPool) -> anyhow::Result<RefreshSummary> {
    let url = std::env::var("RATE_SOURCE_URL").unwrap_or_else(|_| DEFAULT_FEED_URL.to_string());
    refresh_from(client, pool, &url).await
}

/// Fetch one rate table from `url` and upsert it one code at a time. Each
/// code is a single atomic write, so readers never observe a partial row;
/// they may see a mix of old and new codes mid-refresh, which is fine —
/// every row is independently a recent-enough snapshot.
pub async fn refresh_from(
    client: &reqwest::Client,
    pool: &PgPool,
    url: &str,
) -> anyhow::Result<RefreshSummary> {
    let response = client
        .get(url)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await?
        .error_for_status()?;

    let body: Value = response.json().await?;
    let Some(rates) = body.get("rates").and_then(|r| r.as_object()) else {
        anyhow::bail!("no rates object in feed response");
    };
    if rates.is_empty() {
        anyhow::bail!("feed returned an empty rate table");
    }

    let mut summary = RefreshSummary::default();

    for (code, value) in rates {
        let Some(rate) = parse_rate(value) else {
            summary.rejected += 1;
            tracing::warn!(code = %code, "rejecting malformed rate value {}", value);
            continue;
        };

        let inserted: bool = sqlx::query_scalar(
            "INSERT INTO ch_exchange_rates (currency_code, currency_name, rate, last_updated) \
             VALUES ($1, $2, $3, now()) \
             ON CONFLICT (currency_code) DO UPDATE \
                 SET rate = EXCLUDED.rate, currency_name = EXCLUDED.currency_name, last_updated = now() \
             RETURNING (xmax = 0)",
        )
        .bind(code)
        .bind(currency_name(code))
        .bind(rate)
        .fetch_one(pool)
        .await?;

        if inserted {
            summary.created += 1;
        } else {
            summary.updated += 1;
        }
    }

    tracing::info!(
        created = summary.created,
        updated = summary.updated,
        rejected = summary.rejected,
        "exchange rates refreshed"
    );

    Ok(summary)
}

// ── Conversion ──────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum RateError {
    #[error("currency {code} not found in cache")]
    UnknownCurrency { code: String, available: Vec<String> },

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Serialize)]
pub struct Conversion {
    pub converted: Decimal,
    pub currency_code: String,
    pub currency_name: String,
    pub rate: Decimal,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Multiply and round to cents, away from zero on midpoints.
fn convert_amount(amount: Decimal, rate: Decimal) -> Decimal {
    (amount * rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// All currency codes currently present in the cache.
pub async fn known_codes(pool: &PgPool) -> sqlx::Result<Vec<String>> {
    sqlx::query_scalar("SELECT currency_code FROM ch_exchange_rates ORDER BY currency_code")
        .fetch_all(pool)
        .await
}

/// Convert a USD amount into `code`. USD is the identity conversion and
/// works regardless of cache state; any other code must have a cached
/// snapshot, otherwise the error carries the currently-known code list so
/// callers can degrade gracefully.
pub async fn convert(pool: &PgPool, amount: Decimal, code: &str) -> Result<Conversion, RateError> {
    let code = code.to_uppercase();

    if code == "USD" {
        return Ok(Conversion {
            converted: convert_amount(amount, Decimal::ONE),
            currency_code: code,
            currency_name: currency_name("USD"),
            rate: Decimal::ONE,
            last_updated: None,
        });
    }

    let row: Option<(String, Decimal, DateTime<Utc>)> = sqlx::query_as(
        "SELECT currency_name, rate, last_updated FROM ch_exchange_rates WHERE currency_code = $1",
    )
    .bind(&code)
    .fetch_optional(pool)
    .await?;

    match row {
        Some((name, rate, last_updated)) => Ok(Conversion {
            converted: convert_amount(amount, rate),
            currency_code: code,
            currency_name: name,
            rate,
            last_updated: Some(last_updated),
        }),
        None => {
            let available = known_codes(pool).await?;
            Err(RateError::UnknownCurrency { code, available })
        }
    }
}

// ── HTTP handlers ───────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct PriceQuery {
    pub currency: Option<String>,
}

fn conversion_error(e: RateError) -> ApiErrorWithDetails {
    match e {
        RateError::UnknownCurrency { code, available } => {
            ApiError::NotFound(format!("Currency {code} not found"))
                .with_details(json!({ "available_currencies": available }))
        }
        RateError::Db(e) => db_error(e).into(),
    }
}

/// GET /api/currencies — all codes available for conversion.
#[utoipa::path(get, path = "/api/currencies", tag = "rates",
    responses((status = 200, description = "Known currencies", body = Value))
)]
pub async fn list_currencies(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let currencies: Vec<(String, String)> = sqlx::query_as(
        "SELECT currency_code, currency_name FROM ch_exchange_rates ORDER BY currency_code",
    )
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    let list: Vec<Value> = currencies
        .into_iter()
        .map(|(code, name)| json!({ "currency_code": code, "currency_name": name }))
        .collect();

    Ok(Json(json!({
        "success": true,
        "count": list.len(),
        "currencies": list,
    })))
}

/// GET /api/books/{id}/price?currency=GHS
#[utoipa::path(get, path = "/api/books/{id}/price", tag = "rates",
    params(("id" = i64, Path, description = "Book id")),
    responses(
        (status = 200, description = "Converted price", body = Value),
        (status = 404, description = "Unknown book or currency")
    )
)]
pub async fn book_price(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(q): Query<PriceQuery>,
) -> Result<Json<Value>, ApiErrorWithDetails> {
    let row: Option<(String, Decimal)> =
        sqlx::query_as("SELECT name, price FROM ch_books WHERE id = $1")
            .bind(id)
            .fetch_optional(&state.db)
            .await
            .map_err(|e| ApiErrorWithDetails::from(db_error(e)))?;

    let Some((name, price)) = row else {
        return Err(ApiError::NotFound(format!("Book {id} not found")).into());
    };

    let code = q.currency.as_deref().unwrap_or("USD");
    let conversion = convert(&state.db, price, code)
        .await
        .map_err(conversion_error)?;

    Ok(Json(json!({
        "success": true,
        "book_id": id,
        "name": name,
        "original_price": price,
        "converted_price": conversion.converted,
        "currency": conversion.currency_name,
        "currency_code": conversion.currency_code,
        "exchange_rate": conversion.rate,
        "last_updated": conversion.last_updated,
    })))
}

/// GET /api/merchandise/{id}/price?currency=GHS
#[utoipa::path(get, path = "/api/merchandise/{id}/price", tag = "rates",
    params(("id" = i64, Path, description = "Merchandise id")),
    responses(
        (status = 200, description = "Converted price", body = Value),
        (status = 404, description = "Unknown item or currency")
    )
)]
pub async fn merchandise_price(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(q): Query<PriceQuery>,
) -> Result<Json<Value>, ApiErrorWithDetails> {
    let row: Option<(String, Decimal)> =
        sqlx::query_as("SELECT name, price FROM ch_merchandise WHERE id = $1")
            .bind(id)
            .fetch_optional(&state.db)
            .await
            .map_err(|e| ApiErrorWithDetails::from(db_error(e)))?;

    let Some((name, price)) = row else {
        return Err(ApiError::NotFound(format!("Merchandise {id} not found")).into());
    };

    let code = q.currency.as_deref().unwrap_or("USD");
    let conversion = convert(&state.db, price, code)
        .await
        .map_err(conversion_error)?;

    Ok(Json(json!({
        "success": true,
        "merchandise_id": id,
        "name": name,
        "original_price": price,
        "converted_price": conversion.converted,
        "currency": conversion.currency_name,
        "currency_code": conversion.currency_code,
        "exchange_rate": conversion.rate,
        "last_updated": conversion.last_updated,
    })))
}

/// POST /api/admin/rates/refresh — trigger one refresh on demand.
#[utoipa::path(post, path = "/api/admin/rates/refresh", tag = "admin",
    responses(
        (status = 200, description = "Refresh summary", body = Value),
        (status = 502, description = "Feed unreachable or malformed")
    )
)]
pub async fn refresh_rates(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    match refresh(&state.client, &state.db).await {
        Ok(summary) => Ok(Json(json!({
            "refreshed": true,
            "created": summary.created,
            "updated": summary.updated,
            "rejected": summary.rejected,
        }))),
        Err(e) => Err(ApiError::Upstream(format!("exchange-rate refresh failed: {e:#}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    // ── parse_rate ──────────────────────────────────────────────────

    #[test]
    fn parse_rate_accepts_positive_numbers() {
        assert_eq!(parse_rate(&json!(12.5)), Some(dec("12.5")));
        assert_eq!(parse_rate(&json!(1)), Some(dec("1")));
    }

    #[test]
    fn parse_rate_rounds_to_six_decimals() {
        let rate = parse_rate(&json!(0.123456789)).unwrap();
        assert_eq!(rate, dec("0.123457"));
    }

    #[test]
    fn parse_rate_rejects_malformed_values() {
        assert_eq!(parse_rate(&json!("12.5")), None);
        assert_eq!(parse_rate(&json!(null)), None);
        assert_eq!(parse_rate(&json!(0)), None);
        assert_eq!(parse_rate(&json!(-3.2)), None);
        assert_eq!(parse_rate(&json!(5_000_000.0)), None);
        assert_eq!(parse_rate(&json!({"nested": true})), None);
    }

    // ── currency_name ───────────────────────────────────────────────

    #[test]
    fn known_codes_have_display_names() {
        assert_eq!(currency_name("GHS"), "Ghana Cedi");
        assert_eq!(currency_name("USD"), "US Dollar");
    }

    #[test]
    fn unknown_codes_fall_back_to_generic_name() {
        assert_eq!(currency_name("ZZZ"), "ZZZ Currency");
    }

    // ── convert_amount ──────────────────────────────────────────────

    #[test]
    fn conversion_multiplies_and_rounds_to_cents() {
        assert_eq!(convert_amount(dec("10.00"), dec("12.5")), dec("125.00"));
        assert_eq!(convert_amount(dec("19.99"), dec("3.333")), dec("66.63"));
    }

    #[test]
    fn midpoints_round_away_from_zero() {
        assert_eq!(convert_amount(dec("0.05"), dec("2.5")), dec("0.13"));
    }

    #[test]
    fn usd_rate_is_identity() {
        assert_eq!(convert_amount(dec("100.00"), Decimal::ONE), dec("100.00"));
    }
}
