//! Cron Engine (component G): parses 5/6-field cron expressions, computes
//! next-fire times in the configured timezone, and triggers registered
//! jobs as one-shot callbacks that reschedule themselves after firing.
//!
//! Grounded on the per-job `JoinHandle` timer and idempotent
//! register-replaces-prior-timer pattern in the reference cron scheduler,
//! generalized from fixed intervals to arbitrary cron expressions via the
//! `cron` crate (as used for `Schedule::from_str`/`.after()` elsewhere in
//! the retrieval pack). Missed-firing catch-up during downtime is an
//! explicit non-goal; each job owns a single sleep-until-next-fire loop.

use crate::error::{CronError, Result};
use chrono::{DateTime, TimeZone};
use chrono_tz::Tz;
use cron::Schedule;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Normalize a 5- or 6-field cron expression into the 6-field
/// seconds-first form the `cron` crate expects, then parse it.
pub fn parse_cron_expr(expr: &str) -> Result<Schedule> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let normalized = match fields.len() {
        5 => format!("0 {expr}"),
        6 => expr.to_string(),
        n => {
            return Err(CronError::InvalidExpr {
                expr: expr.to_string(),
                reason: format!("expected 5 or 6 fields, got {n}"),
            }
            .into());
        }
    };

    Schedule::from_str(&normalized).map_err(|e| {
        CronError::InvalidExpr {
            expr: expr.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Compute the next fire time strictly after `after`, in `tz`.
pub fn next_fire_after(schedule: &Schedule, after: DateTime<Tz>, tz: Tz) -> Option<DateTime<Tz>> {
    schedule.after(&after).next().map(|dt| dt.with_timezone(&tz))
}

pub type JobFn = Arc<dyn Fn() -> futures::future::BoxFuture<'static, ()> + Send + Sync>;

/// Engine managing one sleep-until-next-fire task per registered logical
/// key. Re-registering a key aborts and replaces its prior timer.
pub struct CronEngine {
    timers: RwLock<HashMap<String, JoinHandle<()>>>,
    tz: Tz,
}

impl CronEngine {
    pub fn new(tz: Tz) -> Self {
        Self {
            timers: RwLock::new(HashMap::new()),
            tz,
        }
    }

    /// Validate `cron_expr`, then register or replace the timer for `key`.
    /// `on_fire` is invoked (without awaiting) every time the schedule
    /// fires; the engine itself recomputes and re-sleeps after each fire.
    pub async fn register(&self, key: &str, cron_expr: &str, on_fire: JobFn) -> Result<()> {
        let schedule = parse_cron_expr(cron_expr)?;
        let tz = self.tz;

        let key_owned = key.to_string();
        let handle = tokio::spawn(async move {
            let mut cursor = chrono::Utc::now().with_timezone(&tz);
            loop {
                let Some(next) = next_fire_after(&schedule, cursor, tz) else {
                    tracing::warn!(key = %key_owned, "cron schedule has no further fire times");
                    return;
                };

                let now = chrono::Utc::now().with_timezone(&tz);
                let sleep_for = (next - now)
                    .to_std()
                    .unwrap_or(std::time::Duration::from_secs(0));
                tokio::time::sleep(sleep_for).await;

                tracing::debug!(key = %key_owned, fire_time = %next, "cron fired");
                (on_fire)().await;

                cursor = next;
            }
        });

        let mut timers = self.timers.write().await;
        if let Some(prior) = timers.insert(key.to_string(), handle) {
            prior.abort();
        }
        Ok(())
    }

    /// §4.2 `runTaskNow`: enqueue a one-shot fire under `key` (the
    /// `immediate:<task_id>:<unix>` keyspace), never touching any repeating
    /// job's timer. The key is visible via `is_registered` while the fire is
    /// in flight and removes itself once `on_fire` completes, so immediate
    /// fires don't accumulate in the timers map.
    pub async fn fire_once(self: &Arc<Self>, key: &str, on_fire: JobFn) {
        let key_owned = key.to_string();
        let engine = Arc::clone(self);
        let key_for_cleanup = key_owned.clone();
        let handle = tokio::spawn(async move {
            (on_fire)().await;
            engine.timers.write().await.remove(&key_for_cleanup);
        });
        self.timers.write().await.insert(key_owned, handle);
    }

    /// Deregister a key if present; no error if absent.
    pub async fn unregister(&self, key: &str) {
        if let Some(handle) = self.timers.write().await.remove(key) {
            handle.abort();
        }
    }

    pub async fn is_registered(&self, key: &str) -> bool {
        self.timers.read().await.contains_key(key)
    }

    /// Stop the Cron Engine. Per spec §5: in-flight runner invocations are
    /// not cancelled by this (they are spawned via `on_fire`, independent
    /// of the timer task); only the scheduling loops stop.
    pub async fn shutdown(&self) {
        let mut timers = self.timers.write().await;
        for (key, handle) in timers.drain() {
            handle.abort();
            tracing::debug!(key, "cron timer stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_five_and_six_field_expressions() {
        assert!(parse_cron_expr("* * * * *").is_ok());
        assert!(parse_cron_expr("*/15 * * * * *").is_ok());
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(parse_cron_expr("* * *").is_err());
        assert!(parse_cron_expr("* * * * * * *").is_err());
    }

    #[test]
    fn six_field_seconds_every_15_fires_four_times_a_minute() {
        let schedule = parse_cron_expr("*/15 * * * * *").unwrap();
        let tz = chrono_tz::UTC;
        let start = tz.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let fires: Vec<_> = schedule.after(&start).take(4).collect();
        assert_eq!(fires.len(), 4);
        let seconds: Vec<u32> = fires.iter().map(|dt| dt.timestamp() as u32 % 60).collect();
        assert_eq!(seconds, vec![0, 15, 30, 45]);
    }

    #[tokio::test]
    async fn re_registering_same_key_replaces_prior_timer() {
        let engine = CronEngine::new(chrono_tz::UTC);
        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let fired_a = fired.clone();
        engine
            .register(
                "task:1",
                "* * * * * *",
                Arc::new(move || {
                    let fired_a = fired_a.clone();
                    Box::pin(async move {
                        fired_a.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    })
                }),
            )
            .await
            .unwrap();
        assert!(engine.is_registered("task:1").await);

        engine
            .register(
                "task:1",
                "* * * * * *",
                Arc::new(|| Box::pin(async move {})),
            )
            .await
            .unwrap();
        assert_eq!(engine.timers.read().await.len(), 1);

        engine.unregister("task:1").await;
        assert!(!engine.is_registered("task:1").await);
    }
}
