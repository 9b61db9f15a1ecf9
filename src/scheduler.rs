// ChurchCMS backend — in-process background scheduler
//
// One daily job per id. Re-registering an id cancels the previous task, so
// there is never more than one live timer per schedule. Jobs run on their
// own task — a slow rate fetch never blocks request handling — and the
// whole scheduler is cancelled and joined before the process exits.

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// A firing that was missed (the process slept through its target time)
/// still runs if noticed within this window; anything later is skipped and
/// the job waits for the next day's schedule.
const MISFIRE_GRACE_SECS: i64 = 15 * 60;

struct JobHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
pub struct Scheduler {
    jobs: Mutex<HashMap<String, JobHandle>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job that fires once a day at `fire_at` (UTC).
    /// Registering an id that already exists replaces the previous job
    /// rather than duplicating it.
    pub async fn register_daily<F, Fut>(&self, id: &str, fire_at: NaiveTime, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let task = tokio::spawn(run_daily(id.to_string(), fire_at, token.clone(), job));

        let mut jobs = self.jobs.lock().await;
        if let Some(previous) = jobs.insert(
            id.to_string(),
            JobHandle { token, task },
        ) {
            tracing::info!(job = id, "replacing previously scheduled job");
            previous.token.cancel();
        }
        tracing::info!(job = id, fire_at = %fire_at, "daily job scheduled");
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Cancel every job and wait for its task to finish. Called after the
    /// HTTP server drains, so no timer task outlives the process.
    pub async fn shutdown(&self) {
        let mut jobs = self.jobs.lock().await;
        for (id, handle) in jobs.drain() {
            handle.token.cancel();
            if let Err(e) = handle.task.await {
                if !e.is_cancelled() {
                    tracing::warn!(job = %id, "scheduler task ended abnormally: {e}");
                }
            }
        }
        tracing::info!("scheduler stopped");
    }
}

/// Next occurrence of `fire_at` strictly after `now`.
fn next_fire(now: DateTime<Utc>, fire_at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(fire_at).and_utc();
    if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    }
}

async fn run_daily<F, Fut>(id: String, fire_at: NaiveTime, token: CancellationToken, job: F)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    loop {
        let now = Utc::now();
        let target = next_fire(now, fire_at);
        let wait = (target - now).to_std().unwrap_or_default();

        tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!(job = %id, "scheduled job cancelled");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        let lateness = (Utc::now() - target).num_seconds();
        if lateness > MISFIRE_GRACE_SECS {
            tracing::warn!(
                job = %id,
                lateness_secs = lateness,
                "missed firing outside the grace window, skipping this cycle"
            );
            continue;
        }

        job().await;
    }
}

/// Wire up the daily exchange-rate refresh. Never fatal: a malformed
/// RATE_REFRESH_TIME or RATE_REFRESH_DISABLED=1 logs a warning and leaves
/// automatic refresh off while the rest of the system keeps serving (the
/// manual refresh endpoint and operator binary still work).
pub async fn setup_rate_refresh(scheduler: &Scheduler, state: &AppState) {
    if std::env::var("RATE_REFRESH_DISABLED").as_deref() == Ok("1") {
        tracing::warn!("automatic exchange-rate refresh disabled; rates will need manual updates");
        return;
    }

    let raw = std::env::var("RATE_REFRESH_TIME").unwrap_or_else(|_| "00:00".to_string());
    let fire_at = match NaiveTime::parse_from_str(&raw, "%H:%M") {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(
                "invalid RATE_REFRESH_TIME '{raw}' ({e}); automatic exchange-rate refresh disabled"
            );
            return;
        }
    };

    let state = state.clone();
    scheduler
        .register_daily("update_exchange_rates", fire_at, move || {
            let state = state.clone();
            async move {
                match crate::rates::refresh(&state.client, &state.db).await {
                    Ok(summary) => tracing::info!(
                        created = summary.created,
                        updated = summary.updated,
                        rejected = summary.rejected,
                        "scheduled exchange-rate refresh complete"
                    ),
                    // Abandon this cycle; the next firing retries naturally.
                    Err(e) => tracing::warn!("scheduled exchange-rate refresh failed: {e:#}"),
                }
            }
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn next_fire_later_today_when_target_is_ahead() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        let next = next_fire(now, at(23, 30));
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 1, 23, 30, 0).unwrap());
    }

    #[test]
    fn next_fire_rolls_to_tomorrow_when_target_has_passed() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        let next = next_fire(now, at(0, 0));
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn next_fire_exactly_now_rolls_to_tomorrow() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let next = next_fire(now, at(12, 0));
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn reregistering_an_id_keeps_a_single_job() {
        let scheduler = Scheduler::new();

        scheduler
            .register_daily("job", at(0, 0), || async {})
            .await;
        scheduler
            .register_daily("job", at(6, 0), || async {})
            .await;

        assert_eq!(scheduler.job_count().await, 1);
        scheduler.shutdown().await;
        assert_eq!(scheduler.job_count().await, 0);
    }

    #[tokio::test]
    async fn shutdown_joins_all_jobs() {
        let scheduler = Scheduler::new();
        scheduler
            .register_daily("a", at(1, 0), || async {})
            .await;
        scheduler
            .register_daily("b", at(2, 0), || async {})
            .await;

        assert_eq!(scheduler.job_count().await, 2);
        scheduler.shutdown().await;
        assert_eq!(scheduler.job_count().await, 0);
    }
}
