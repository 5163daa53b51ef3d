//! Dispatcher (component H): the unified registry over the three workload
//! kinds, driving Cron Engine registration and invoking the matching
//! runner on each firing.
//!
//! Grounded on the tagged-variant design note in spec §9 ("model as an
//! enum + associated data; the Dispatcher holds a map from logical key to
//! a closure"), and on the reference cron scheduler's pattern of closing
//! over an `Arc`-shared runner inside the registered callback.

use crate::cron_engine::CronEngine;
use crate::error::Result;
use crate::executor::Executor;
use crate::probe::ProbeRunner;
use crate::store::Store;
use crate::subscription::SubscriptionRunner;
use crate::JobKey;
use std::sync::Arc;

/// The three schedulable workload kinds, per §4.2.
enum Job {
    Task(String),
    Probe(String),
    Subscription(String),
}

/// Unified registry of task/probe/subscription jobs. Owns no state of its
/// own beyond the Cron Engine's timers; the source of truth for entities
/// is always the Store.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    cron: Arc<CronEngine>,
    executor: Arc<Executor>,
    probe: Arc<ProbeRunner>,
    subscription: Arc<SubscriptionRunner>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        cron: Arc<CronEngine>,
        executor: Arc<Executor>,
        probe: Arc<ProbeRunner>,
        subscription: Arc<SubscriptionRunner>,
    ) -> Self {
        Self {
            store,
            cron,
            executor,
            probe,
            subscription,
        }
    }

    /// Hydrate from Store: schedule every active, non-placeholder task,
    /// every active probe with a cron_expr, and every active subscription.
    /// Idempotent — re-running replaces prior registrations with the same
    /// logical key, which is the same key each entity always gets.
    pub async fn start(&self) -> Result<()> {
        for task in self.store.list_tasks(true).await? {
            if task.is_schedulable() {
                self.add_task(&task.id, &task.cron_expr).await;
            }
        }
        for probe in self.store.list_probes(true).await? {
            if !probe.cron_expr.is_empty() {
                self.add_probe(&probe.id, &probe.cron_expr).await;
            }
        }
        for sub in self.store.list_subscriptions(true).await? {
            self.add_subscription(&sub.id, &sub.cron_expr).await;
        }
        Ok(())
    }

    /// Stop the Cron Engine. In-flight runner invocations are independent
    /// tasks spawned outside the timer loop and are not cancelled; the
    /// caller is responsible for draining them.
    pub async fn shutdown(&self) {
        self.cron.shutdown().await;
    }

    pub async fn add_task(&self, task_id: &str, cron_expr: &str) {
        self.register(JobKey::Task(task_id.to_string()), cron_expr, Job::Task(task_id.to_string()))
            .await;
    }

    pub async fn add_probe(&self, probe_id: &str, cron_expr: &str) {
        self.register(
            JobKey::Probe(probe_id.to_string()),
            cron_expr,
            Job::Probe(probe_id.to_string()),
        )
        .await;
    }

    pub async fn add_subscription(&self, subscription_id: &str, cron_expr: &str) {
        self.register(
            JobKey::Subscription(subscription_id.to_string()),
            cron_expr,
            Job::Subscription(subscription_id.to_string()),
        )
        .await;
    }

    pub async fn remove_task(&self, task_id: &str) {
        self.cron.unregister(&JobKey::Task(task_id.to_string()).to_string()).await;
    }

    pub async fn remove_probe(&self, probe_id: &str) {
        self.cron
            .unregister(&JobKey::Probe(probe_id.to_string()).to_string())
            .await;
    }

    pub async fn remove_subscription(&self, subscription_id: &str) {
        self.cron
            .unregister(&JobKey::Subscription(subscription_id.to_string()).to_string())
            .await;
    }

    /// §4.2 `runTaskNow`: enqueues a one-shot fire under a unique
    /// `immediate:<task_id>:<unix>` key, per §4.1's keyspace. Never touches
    /// the task's own repeating registration.
    pub async fn run_task_now(&self, task_id: &str) -> Result<()> {
        if self.store.get_task(task_id).await?.is_none() {
            return Err(crate::error::StoreError::TaskNotFound(task_id.to_string()).into());
        }

        let unix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let key = JobKey::Immediate(task_id.to_string(), unix).to_string();

        let executor = Arc::clone(&self.executor);
        let task_id_owned = task_id.to_string();
        let on_fire: crate::cron_engine::JobFn = Arc::new(move || {
            let executor = Arc::clone(&executor);
            let task_id_owned = task_id_owned.clone();
            Box::pin(async move {
                if let Err(e) = executor.run(&task_id_owned).await {
                    tracing::warn!(task_id = %task_id_owned, error = %e, "immediate task run failed");
                }
            })
        });
        self.cron.fire_once(&key, on_fire).await;
        Ok(())
    }

    /// §4.2 `stopTask`: delegate straight to the Executor, which owns the
    /// running-process registry.
    pub async fn stop_task(&self, task_id: &str, force: bool) -> Result<bool> {
        self.executor.stop(task_id, force).await
    }

    async fn register(&self, key: JobKey, cron_expr: &str, job: Job) {
        let key_str = key.to_string();
        let executor = Arc::clone(&self.executor);
        let probe = Arc::clone(&self.probe);
        let subscription = Arc::clone(&self.subscription);

        let on_fire: crate::cron_engine::JobFn = match job {
            Job::Task(id) => Arc::new(move || {
                let executor = Arc::clone(&executor);
                let id = id.clone();
                Box::pin(async move {
                    if let Err(e) = executor.run(&id).await {
                        tracing::warn!(task_id = %id, error = %e, "task firing failed");
                    }
                })
            }),
            Job::Probe(id) => Arc::new(move || {
                let probe = Arc::clone(&probe);
                let id = id.clone();
                Box::pin(async move {
                    if let Err(e) = probe.run(&id).await {
                        tracing::warn!(probe_id = %id, error = %e, "probe firing failed");
                    }
                })
            }),
            Job::Subscription(id) => Arc::new(move || {
                let subscription = Arc::clone(&subscription);
                let id = id.clone();
                Box::pin(async move {
                    if let Err(e) = subscription.run(&id).await {
                        tracing::warn!(subscription_id = %id, error = %e, "subscription firing failed");
                    }
                })
            }),
        };

        // Parse errors are recorded, not raised: addTask/addProbe/
        // addSubscription never fail the caller.
        if let Err(e) = self.cron.register(&key_str, cron_expr, on_fire).await {
            tracing::warn!(key = %key_str, cron_expr, error = %e, "invalid cron expression, not scheduled");
        }
    }
}
