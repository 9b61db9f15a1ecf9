// ChurchCMS backend — application state

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use sqlx::PgPool;

use crate::audit::AuditRecorder;
use crate::auth;
use crate::events::ChangeBus;
use crate::image_log::ImageTracker;

/// Central application state. Clone-friendly — PgPool and Arc are both Clone.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// Pooled HTTP client for the exchange-rate feed.
    pub client: Client,
    /// Change-notification bus with the audit recorder and image tracker
    /// subscribed. Content handlers publish here after every write.
    pub bus: Arc<ChangeBus>,
    /// Count of audit rows that failed to insert (surfaced via
    /// /api/health/detailed; audit failures are otherwise invisible).
    pub audit_failures: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl AppState {
    pub async fn new(db: PgPool) -> Self {
        let audit_failures = Arc::new(AtomicU64::new(0));

        let mut bus = ChangeBus::new();
        bus.subscribe(Arc::new(AuditRecorder::new(
            db.clone(),
            audit_failures.clone(),
        )));
        bus.subscribe(Arc::new(ImageTracker::new(db.clone())));

        let state = Self {
            db,
            client: Client::builder()
                .pool_max_idle_per_host(10)
                .timeout(Duration::from_secs(30))
                .connect_timeout(Duration::from_secs(5))
                .build()
                .expect("Failed to build HTTP client"),
            bus: Arc::new(bus),
            audit_failures,
            start_time: Instant::now(),
        };

        state.seed_admin_user().await;
        state
    }

    /// Create the admin account from ADMIN_USERNAME / ADMIN_PASSWORD when
    /// configured and not already present.
    async fn seed_admin_user(&self) {
        let (Ok(username), Ok(password)) = (
            std::env::var("ADMIN_USERNAME"),
            std::env::var("ADMIN_PASSWORD"),
        ) else {
            tracing::info!("ADMIN_USERNAME/ADMIN_PASSWORD not set — no admin account seeded");
            return;
        };
        if username.is_empty() || password.is_empty() {
            return;
        }

        let result = sqlx::query(
            "INSERT INTO ch_admin_users (username, password_sha256) VALUES ($1, $2) \
             ON CONFLICT (username) DO NOTHING",
        )
        .bind(&username)
        .bind(auth::password_digest(&password))
        .execute(&self.db)
        .await;

        match result {
            Ok(r) if r.rows_affected() > 0 => {
                tracing::info!(username = %username, "seeded admin account")
            }
            Ok(_) => {}
            Err(e) => tracing::error!("failed to seed admin account: {}", e),
        }
    }
}
