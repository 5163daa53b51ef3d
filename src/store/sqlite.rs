//! SQLite-backed `Store` implementation.

use super::models::*;
use super::Store;
use crate::error::{Result, StoreError};
use anyhow::Context as _;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create tables if they do not already exist.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                script_path TEXT NOT NULL,
                script_kind TEXT NOT NULL,
                cron_expr TEXT NOT NULL,
                env_overrides TEXT NOT NULL DEFAULT '{}',
                group_name TEXT NOT NULL DEFAULT '默认',
                active INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create tasks table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_logs (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                task_name TEXT NOT NULL,
                status TEXT NOT NULL,
                start_time TIMESTAMP NOT NULL,
                end_time TIMESTAMP,
                output TEXT NOT NULL DEFAULT '',
                error_output TEXT NOT NULL DEFAULT '',
                exit_code INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create task_logs table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_task_logs_task_id ON task_logs(task_id, start_time)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                git_url TEXT NOT NULL,
                save_dir TEXT NOT NULL,
                file_extensions TEXT NOT NULL DEFAULT '[]',
                exclude_patterns TEXT NOT NULL DEFAULT '[]',
                include_folders INTEGER NOT NULL DEFAULT 1,
                include_subfolders INTEGER NOT NULL DEFAULT 1,
                use_proxy INTEGER NOT NULL DEFAULT 0,
                sync_delete_removed INTEGER NOT NULL DEFAULT 0,
                cron_expr TEXT NOT NULL,
                notify_enabled INTEGER NOT NULL DEFAULT 0,
                notify_channel TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                last_sync_time TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create subscriptions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscription_files (
                subscription_id TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_md5 TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                PRIMARY KEY (subscription_id, file_path)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create subscription_files table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscription_logs (
                id TEXT PRIMARY KEY,
                subscription_id TEXT NOT NULL,
                status TEXT NOT NULL,
                message TEXT NOT NULL DEFAULT '',
                files_updated INTEGER NOT NULL DEFAULT 0,
                files_added INTEGER NOT NULL DEFAULT 0,
                start_time TIMESTAMP NOT NULL,
                end_time TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create subscription_logs table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS api_debug_configs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                method TEXT NOT NULL,
                url TEXT NOT NULL,
                headers TEXT NOT NULL DEFAULT '{}',
                payload TEXT NOT NULL DEFAULT '',
                notify_enabled INTEGER NOT NULL DEFAULT 0,
                notify_channel TEXT,
                notify_condition TEXT NOT NULL DEFAULT 'error',
                cron_expr TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create api_debug_configs table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS api_debug_logs (
                id TEXT PRIMARY KEY,
                config_id TEXT NOT NULL,
                config_name TEXT NOT NULL DEFAULT '',
                method TEXT NOT NULL DEFAULT '',
                url TEXT NOT NULL DEFAULT '',
                request_headers TEXT NOT NULL DEFAULT '{}',
                request_payload TEXT NOT NULL DEFAULT '',
                status_code INTEGER,
                response_headers TEXT NOT NULL DEFAULT '{}',
                response_body TEXT NOT NULL DEFAULT '',
                error_message TEXT,
                response_time_ms INTEGER NOT NULL DEFAULT 0,
                start_time TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create api_debug_logs table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS env_vars (
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create env_vars table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create config table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_notification_configs (
                task_id TEXT PRIMARY KEY,
                channel TEXT,
                error_only INTEGER NOT NULL DEFAULT 0,
                keywords TEXT NOT NULL DEFAULT '[]'
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create task_notification_configs table")?;

        Ok(())
    }
}

fn task_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Task> {
    let env_overrides_json: String = row
        .try_get("env_overrides")
        .context("failed to read env_overrides")?;
    let script_kind: String = row
        .try_get("script_kind")
        .context("failed to read script_kind")?;
    Ok(Task {
        id: row.try_get("id").context("failed to read id")?,
        name: row.try_get("name").context("failed to read name")?,
        description: row
            .try_get("description")
            .context("failed to read description")?,
        script_path: row
            .try_get("script_path")
            .context("failed to read script_path")?,
        script_kind: script_kind.parse().context("invalid script_kind")?,
        cron_expr: row
            .try_get("cron_expr")
            .context("failed to read cron_expr")?,
        env_overrides: serde_json::from_str(&env_overrides_json)
            .context("failed to parse env_overrides")?,
        group_name: row
            .try_get("group_name")
            .context("failed to read group_name")?,
        active: row.try_get::<i64, _>("active").context("failed to read active")? != 0,
    })
}

fn task_log_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<TaskLog> {
    let status: String = row.try_get("status").context("failed to read status")?;
    Ok(TaskLog {
        id: row.try_get("id").context("failed to read id")?,
        task_id: row.try_get("task_id").context("failed to read task_id")?,
        task_name: row
            .try_get("task_name")
            .context("failed to read task_name")?,
        status: status.parse().context("invalid task log status")?,
        start_time: row
            .try_get("start_time")
            .context("failed to read start_time")?,
        end_time: row.try_get("end_time").context("failed to read end_time")?,
        output: row.try_get("output").context("failed to read output")?,
        error_output: row
            .try_get("error_output")
            .context("failed to read error_output")?,
        exit_code: row
            .try_get::<Option<i64>, _>("exit_code")
            .context("failed to read exit_code")?
            .map(|v| v as i32),
    })
}

fn subscription_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Subscription> {
    let extensions_json: String = row
        .try_get("file_extensions")
        .context("failed to read file_extensions")?;
    let exclude_json: String = row
        .try_get("exclude_patterns")
        .context("failed to read exclude_patterns")?;
    Ok(Subscription {
        id: row.try_get("id").context("failed to read id")?,
        name: row.try_get("name").context("failed to read name")?,
        description: row
            .try_get("description")
            .context("failed to read description")?,
        git_url: row.try_get("git_url").context("failed to read git_url")?,
        save_dir: row.try_get("save_dir").context("failed to read save_dir")?,
        file_extensions: serde_json::from_str(&extensions_json)
            .context("failed to parse file_extensions")?,
        exclude_patterns: serde_json::from_str(&exclude_json)
            .context("failed to parse exclude_patterns")?,
        include_folders: row
            .try_get::<i64, _>("include_folders")
            .context("failed to read include_folders")?
            != 0,
        include_subfolders: row
            .try_get::<i64, _>("include_subfolders")
            .context("failed to read include_subfolders")?
            != 0,
        use_proxy: row.try_get::<i64, _>("use_proxy").context("failed to read use_proxy")? != 0,
        sync_delete_removed: row
            .try_get::<i64, _>("sync_delete_removed")
            .context("failed to read sync_delete_removed")?
            != 0,
        cron_expr: row
            .try_get("cron_expr")
            .context("failed to read cron_expr")?,
        notify_enabled: row
            .try_get::<i64, _>("notify_enabled")
            .context("failed to read notify_enabled")?
            != 0,
        notify_channel: row
            .try_get("notify_channel")
            .context("failed to read notify_channel")?,
        active: row.try_get::<i64, _>("active").context("failed to read active")? != 0,
        last_sync_time: row
            .try_get("last_sync_time")
            .context("failed to read last_sync_time")?,
    })
}

fn probe_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ApiDebugConfig> {
    let headers_json: String = row.try_get("headers").context("failed to read headers")?;
    let condition: String = row
        .try_get("notify_condition")
        .context("failed to read notify_condition")?;
    Ok(ApiDebugConfig {
        id: row.try_get("id").context("failed to read id")?,
        name: row.try_get("name").context("failed to read name")?,
        method: row.try_get("method").context("failed to read method")?,
        url: row.try_get("url").context("failed to read url")?,
        headers: serde_json::from_str(&headers_json).context("failed to parse headers")?,
        payload: row.try_get("payload").context("failed to read payload")?,
        notify_enabled: row
            .try_get::<i64, _>("notify_enabled")
            .context("failed to read notify_enabled")?
            != 0,
        notify_channel: row
            .try_get("notify_channel")
            .context("failed to read notify_channel")?,
        notify_condition: condition.parse().context("invalid notify_condition")?,
        cron_expr: row
            .try_get("cron_expr")
            .context("failed to read cron_expr")?,
        active: row.try_get::<i64, _>("active").context("failed to read active")? != 0,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_task(&self, input: CreateTaskInput) -> Result<Task> {
        let id = uuid::Uuid::new_v4().to_string();
        let env_json = serde_json::to_string(&input.env_overrides)
            .context("failed to serialize env_overrides")?;
        sqlx::query(
            "INSERT INTO tasks (id, name, description, script_path, script_kind, cron_expr, env_overrides, group_name, active) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.script_path)
        .bind(input.script_kind.as_str())
        .bind(&input.cron_expr)
        .bind(&env_json)
        .bind(&input.group_name)
        .bind(input.active as i64)
        .execute(&self.pool)
        .await
        .context("failed to insert task")?;

        self.get_task(&id)
            .await?
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()).into())
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to query task")?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn list_tasks(&self, active_only: bool) -> Result<Vec<Task>> {
        let sql = if active_only {
            "SELECT * FROM tasks WHERE active = 1 ORDER BY name"
        } else {
            "SELECT * FROM tasks ORDER BY name"
        };
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .context("failed to list tasks")?;
        rows.iter().map(task_from_row).collect()
    }

    async fn set_task_active(&self, id: &str, active: bool) -> Result<()> {
        sqlx::query("UPDATE tasks SET active = ? WHERE id = ?")
            .bind(active as i64)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to update task active flag")?;
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to delete task")?;
        Ok(())
    }

    async fn start_task_log(
        &self,
        task: &Task,
        start_time: chrono::NaiveDateTime,
    ) -> Result<TaskLog> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO task_logs (id, task_id, task_name, status, start_time, output, error_output) \
             VALUES (?, ?, ?, 'running', ?, '', '')",
        )
        .bind(&id)
        .bind(&task.id)
        .bind(&task.name)
        .bind(start_time)
        .execute(&self.pool)
        .await
        .context("failed to insert task log")?;

        Ok(TaskLog {
            id,
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            status: TaskLogStatus::Running,
            start_time,
            end_time: None,
            output: String::new(),
            error_output: String::new(),
            exit_code: None,
        })
    }

    async fn complete_task_log(
        &self,
        log_id: &str,
        status: TaskLogStatus,
        end_time: chrono::NaiveDateTime,
        output: &str,
        error_output: &str,
        exit_code: Option<i32>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE task_logs SET status = ?, end_time = ?, output = ?, error_output = ?, exit_code = ? \
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(end_time)
        .bind(output)
        .bind(error_output)
        .bind(exit_code.map(|v| v as i64))
        .bind(log_id)
        .execute(&self.pool)
        .await
        .context("failed to complete task log")?;
        Ok(())
    }

    async fn get_task_log(&self, log_id: &str) -> Result<Option<TaskLog>> {
        let row = sqlx::query("SELECT * FROM task_logs WHERE id = ?")
            .bind(log_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to query task log")?;
        row.as_ref().map(task_log_from_row).transpose()
    }

    async fn latest_running_task_log(&self, task_id: &str) -> Result<Option<TaskLog>> {
        let row = sqlx::query(
            "SELECT * FROM task_logs WHERE task_id = ? AND status = 'running' \
             ORDER BY start_time DESC LIMIT 1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to query latest running task log")?;
        row.as_ref().map(task_log_from_row).transpose()
    }

    async fn get_subscription(&self, id: &str) -> Result<Option<Subscription>> {
        let row = sqlx::query("SELECT * FROM subscriptions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to query subscription")?;
        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn list_subscriptions(&self, active_only: bool) -> Result<Vec<Subscription>> {
        let sql = if active_only {
            "SELECT * FROM subscriptions WHERE active = 1 ORDER BY name"
        } else {
            "SELECT * FROM subscriptions ORDER BY name"
        };
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .context("failed to list subscriptions")?;
        rows.iter().map(subscription_from_row).collect()
    }

    async fn set_subscription_last_sync(&self, id: &str, at: chrono::NaiveDateTime) -> Result<()> {
        sqlx::query("UPDATE subscriptions SET last_sync_time = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to update subscription last_sync_time")?;
        Ok(())
    }

    async fn subscription_files(
        &self,
        subscription_id: &str,
    ) -> Result<HashMap<String, SubscriptionFile>> {
        let rows = sqlx::query("SELECT * FROM subscription_files WHERE subscription_id = ?")
            .bind(subscription_id)
            .fetch_all(&self.pool)
            .await
            .context("failed to list subscription files")?;
        let mut out = HashMap::with_capacity(rows.len());
        for row in &rows {
            let file = SubscriptionFile {
                subscription_id: row
                    .try_get("subscription_id")
                    .context("failed to read subscription_id")?,
                file_path: row
                    .try_get("file_path")
                    .context("failed to read file_path")?,
                file_md5: row
                    .try_get("file_md5")
                    .context("failed to read file_md5")?,
                file_size: row
                    .try_get("file_size")
                    .context("failed to read file_size")?,
            };
            out.insert(file.file_path.clone(), file);
        }
        Ok(out)
    }

    async fn upsert_subscription_file(&self, file: SubscriptionFile) -> Result<()> {
        sqlx::query(
            "INSERT INTO subscription_files (subscription_id, file_path, file_md5, file_size) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(subscription_id, file_path) DO UPDATE SET file_md5 = excluded.file_md5, file_size = excluded.file_size",
        )
        .bind(&file.subscription_id)
        .bind(&file.file_path)
        .bind(&file.file_md5)
        .bind(file.file_size)
        .execute(&self.pool)
        .await
        .context("failed to upsert subscription file")?;
        Ok(())
    }

    async fn delete_subscription_file(&self, subscription_id: &str, path: &str) -> Result<()> {
        sqlx::query("DELETE FROM subscription_files WHERE subscription_id = ? AND file_path = ?")
            .bind(subscription_id)
            .bind(path)
            .execute(&self.pool)
            .await
            .context("failed to delete subscription file")?;
        Ok(())
    }

    async fn create_subscription_log(&self, log: SubscriptionLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO subscription_logs (id, subscription_id, status, message, files_updated, files_added, start_time, end_time) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&log.id)
        .bind(&log.subscription_id)
        .bind(log.status.as_str())
        .bind(&log.message)
        .bind(log.files_updated)
        .bind(log.files_added)
        .bind(log.start_time)
        .bind(log.end_time)
        .execute(&self.pool)
        .await
        .context("failed to insert subscription log")?;
        Ok(())
    }

    async fn get_probe(&self, id: &str) -> Result<Option<ApiDebugConfig>> {
        let row = sqlx::query("SELECT * FROM api_debug_configs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to query probe")?;
        row.as_ref().map(probe_from_row).transpose()
    }

    async fn list_probes(&self, active_only: bool) -> Result<Vec<ApiDebugConfig>> {
        let sql = if active_only {
            "SELECT * FROM api_debug_configs WHERE active = 1 ORDER BY name"
        } else {
            "SELECT * FROM api_debug_configs ORDER BY name"
        };
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .context("failed to list probes")?;
        rows.iter().map(probe_from_row).collect()
    }

    async fn create_probe_log(&self, log: ApiDebugLog) -> Result<()> {
        let request_headers_json = serde_json::to_string(&log.request_headers)
            .context("failed to serialize request headers")?;
        let response_headers_json = serde_json::to_string(&log.response_headers)
            .context("failed to serialize response headers")?;
        sqlx::query(
            "INSERT INTO api_debug_logs (id, config_id, config_name, method, url, request_headers, request_payload, status_code, response_headers, response_body, error_message, response_time_ms, start_time) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&log.id)
        .bind(&log.config_id)
        .bind(&log.config_name)
        .bind(&log.method)
        .bind(&log.url)
        .bind(&request_headers_json)
        .bind(&log.request_payload)
        .bind(log.status_code.map(|v| v as i64))
        .bind(&response_headers_json)
        .bind(&log.response_body)
        .bind(&log.error_message)
        .bind(log.response_time_ms)
        .bind(log.start_time)
        .execute(&self.pool)
        .await
        .context("failed to insert probe log")?;
        Ok(())
    }

    async fn list_env_vars(&self) -> Result<Vec<EnvVar>> {
        let rows = sqlx::query("SELECT * FROM env_vars")
            .fetch_all(&self.pool)
            .await
            .context("failed to list env vars")?;
        rows.iter()
            .map(|row| {
                Ok(EnvVar {
                    name: row.try_get("name").context("failed to read name")?,
                    value: row.try_get("value").context("failed to read value")?,
                })
            })
            .collect()
    }

    async fn get_config_value(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("failed to query config")?;
        row.map(|r| r.try_get("value").context("failed to read value"))
            .transpose()
            .map_err(Into::into)
    }

    async fn get_task_notification_config(
        &self,
        task_id: &str,
    ) -> Result<Option<TaskNotificationConfig>> {
        let row = sqlx::query("SELECT * FROM task_notification_configs WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to query task notification config")?;
        row.map(|row| {
            let keywords_json: String = row
                .try_get("keywords")
                .context("failed to read keywords")?;
            Ok(TaskNotificationConfig {
                task_id: row.try_get("task_id").context("failed to read task_id")?,
                channel: row.try_get("channel").context("failed to read channel")?,
                error_only: row
                    .try_get::<i64, _>("error_only")
                    .context("failed to read error_only")?
                    != 0,
                keywords: serde_json::from_str(&keywords_json)
                    .context("failed to parse keywords")?,
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::HashMap;

    async fn setup_store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect in-memory sqlite");
        let store = SqliteStore::new(pool);
        store.initialize().await.expect("initialize schema");
        store
    }

    #[tokio::test]
    async fn create_and_fetch_task_round_trips() {
        let store = setup_store().await;
        let task = store
            .create_task(CreateTaskInput {
                name: "hello".into(),
                description: "".into(),
                script_path: "hello.py".into(),
                script_kind: ScriptKind::Python,
                cron_expr: "* * * * *".into(),
                env_overrides: HashMap::new(),
                group_name: "默认".into(),
                active: true,
            })
            .await
            .expect("create task");

        let fetched = store
            .get_task(&task.id)
            .await
            .expect("get task")
            .expect("task exists");
        assert_eq!(fetched.name, "hello");
        assert!(fetched.is_schedulable());
    }

    #[tokio::test]
    async fn placeholder_task_is_not_schedulable() {
        let store = setup_store().await;
        let task = store
            .create_task(CreateTaskInput {
                name: "__GROUP_PLACEHOLDER_dev".into(),
                description: "".into(),
                script_path: "".into(),
                script_kind: ScriptKind::Python,
                cron_expr: "* * * * *".into(),
                env_overrides: HashMap::new(),
                group_name: "dev".into(),
                active: false,
            })
            .await
            .expect("create placeholder");

        assert!(task.is_placeholder());
        assert!(!task.is_schedulable());

        let active_tasks = store.list_tasks(true).await.expect("list tasks");
        assert!(active_tasks.iter().all(|t| t.id != task.id));
    }

    #[tokio::test]
    async fn task_log_running_invariant() {
        let store = setup_store().await;
        let task = store
            .create_task(CreateTaskInput {
                name: "t".into(),
                description: "".into(),
                script_path: "t.py".into(),
                script_kind: ScriptKind::Python,
                cron_expr: "* * * * *".into(),
                env_overrides: HashMap::new(),
                group_name: "默认".into(),
                active: true,
            })
            .await
            .unwrap();

        let start = chrono::Utc::now().naive_utc();
        let log = store.start_task_log(&task, start).await.unwrap();
        assert_eq!(log.status, TaskLogStatus::Running);
        assert!(log.end_time.is_none());

        let end = start + chrono::Duration::seconds(1);
        store
            .complete_task_log(&log.id, TaskLogStatus::Success, end, "hi\n", "", Some(0))
            .await
            .unwrap();

        let completed = store.get_task_log(&log.id).await.unwrap().unwrap();
        assert_eq!(completed.status, TaskLogStatus::Success);
        assert!(completed.end_time.is_some());
    }

    #[tokio::test]
    async fn subscription_file_upsert_is_idempotent() {
        let store = setup_store().await;
        let file = SubscriptionFile {
            subscription_id: "s1".into(),
            file_path: "a.py".into(),
            file_md5: "abc".into(),
            file_size: 1,
        };
        store.upsert_subscription_file(file.clone()).await.unwrap();
        store.upsert_subscription_file(file).await.unwrap();

        let files = store.subscription_files("s1").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files["a.py"].file_md5, "abc");
    }
}
