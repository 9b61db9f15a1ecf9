// Operator entry point: delete image-log entries whose owning entity no
// longer exists. Walks every record per tracked kind, so it runs here and
// not on any request path. Safe to re-run; a second pass deletes nothing.
//
// Usage: cleanup_image_logs [KIND...]
// With no arguments every tracked kind is checked.

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use church_backend::events::EntityKind;
use church_backend::image_log::{self, IMAGE_TRACKED};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let kinds: Vec<EntityKind> = {
        let args: Vec<String> = std::env::args().skip(1).collect();
        if args.is_empty() {
            IMAGE_TRACKED.to_vec()
        } else {
            args.iter()
                .map(|tag| {
                    EntityKind::parse(tag)
                        .with_context(|| format!("unknown entity kind '{tag}'"))
                })
                .collect::<anyhow::Result<_>>()?
        }
    };

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL required")?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .context("Failed to connect to Postgres")?;

    let deleted = image_log::reconcile_orphans(&pool, &kinds).await?;
    println!("Successfully deleted {deleted} orphaned image log entries");

    Ok(())
}
