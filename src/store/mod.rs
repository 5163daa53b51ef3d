//! Store (component B): transactional persistence of tasks, execution logs,
//! subscriptions, subscription files, config, and environment variables.
//!
//! `Store` is a trait so test doubles can substitute the real SQLite-backed
//! implementation, per the "global singletons" design note in spec §9.

pub mod models;
pub mod sqlite;

pub use models::*;
pub use sqlite::SqliteStore;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

#[async_trait]
pub trait Store: Send + Sync {
    // -- Tasks --------------------------------------------------------
    async fn create_task(&self, input: CreateTaskInput) -> Result<Task>;
    async fn get_task(&self, id: &str) -> Result<Option<Task>>;
    /// All non-placeholder tasks, regardless of `active`, unless
    /// `active_only` is set.
    async fn list_tasks(&self, active_only: bool) -> Result<Vec<Task>>;
    async fn set_task_active(&self, id: &str, active: bool) -> Result<()>;
    async fn delete_task(&self, id: &str) -> Result<()>;

    // -- TaskLog --------------------------------------------------------
    async fn start_task_log(&self, task: &Task, start_time: chrono::NaiveDateTime)
    -> Result<TaskLog>;
    async fn complete_task_log(
        &self,
        log_id: &str,
        status: TaskLogStatus,
        end_time: chrono::NaiveDateTime,
        output: &str,
        error_output: &str,
        exit_code: Option<i32>,
    ) -> Result<()>;
    async fn get_task_log(&self, log_id: &str) -> Result<Option<TaskLog>>;
    /// The most recent `running` TaskLog for a task, used by `stopTask`.
    async fn latest_running_task_log(&self, task_id: &str) -> Result<Option<TaskLog>>;

    // -- Subscriptions ----------------------------------------------------
    async fn get_subscription(&self, id: &str) -> Result<Option<Subscription>>;
    async fn list_subscriptions(&self, active_only: bool) -> Result<Vec<Subscription>>;
    async fn set_subscription_last_sync(
        &self,
        id: &str,
        at: chrono::NaiveDateTime,
    ) -> Result<()>;

    async fn subscription_files(
        &self,
        subscription_id: &str,
    ) -> Result<HashMap<String, SubscriptionFile>>;
    async fn upsert_subscription_file(&self, file: SubscriptionFile) -> Result<()>;
    async fn delete_subscription_file(&self, subscription_id: &str, path: &str) -> Result<()>;

    async fn create_subscription_log(&self, log: SubscriptionLog) -> Result<()>;

    // -- Probes (ApiDebugConfig) -------------------------------------------
    async fn get_probe(&self, id: &str) -> Result<Option<ApiDebugConfig>>;
    async fn list_probes(&self, active_only: bool) -> Result<Vec<ApiDebugConfig>>;
    async fn create_probe_log(&self, log: ApiDebugLog) -> Result<()>;

    // -- EnvVar / Config ---------------------------------------------------
    async fn list_env_vars(&self) -> Result<Vec<EnvVar>>;
    async fn get_config_value(&self, key: &str) -> Result<Option<String>>;

    // -- Notification policy ----------------------------------------------
    async fn get_task_notification_config(
        &self,
        task_id: &str,
    ) -> Result<Option<TaskNotificationConfig>>;
}
