// Operator entry point: fetch the exchange-rate feed once and upsert the
// cached table. Same code path as the scheduled daily job; used for
// initial seeding and for manual refreshes when the scheduler is disabled.

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL required")?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .context("Failed to connect to Postgres")?;

    let client = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(5))
        .build()?;

    let summary = church_backend::rates::refresh(&client, &pool).await?;
    println!(
        "Exchange rates updated: {} created, {} updated, {} rejected",
        summary.created, summary.updated, summary.rejected
    );

    Ok(())
}
