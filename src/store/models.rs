//! Persisted entities, per spec §3.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Script interpreter kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    Python,
    Nodejs,
}

impl ScriptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptKind::Python => "python",
            ScriptKind::Nodejs => "nodejs",
        }
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ScriptKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "python" => Ok(ScriptKind::Python),
            "nodejs" => Ok(ScriptKind::Nodejs),
            other => anyhow::bail!("unknown script kind: {other}"),
        }
    }
}

/// A scheduled script execution unit (§3 Task).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub description: String,
    pub script_path: String,
    pub script_kind: ScriptKind,
    pub cron_expr: String,
    pub env_overrides: HashMap<String, String>,
    pub group_name: String,
    pub active: bool,
}

impl Task {
    /// A GroupPlaceholder is a Task whose name begins with the reserved
    /// prefix; it exists only to keep a group visible with zero real tasks.
    pub fn is_placeholder(&self) -> bool {
        self.name.starts_with(crate::GROUP_PLACEHOLDER_PREFIX)
    }

    /// §4.2 start(): eligible for Cron Engine registration.
    pub fn is_schedulable(&self) -> bool {
        self.active && !self.is_placeholder()
    }
}

/// Execution status of a TaskLog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskLogStatus {
    Running,
    Success,
    Failed,
    Stopped,
}

impl TaskLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskLogStatus::Running => "running",
            TaskLogStatus::Success => "success",
            TaskLogStatus::Failed => "failed",
            TaskLogStatus::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskLogStatus::Running)
    }
}

impl fmt::Display for TaskLogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskLogStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(TaskLogStatus::Running),
            "success" => Ok(TaskLogStatus::Success),
            "failed" => Ok(TaskLogStatus::Failed),
            "stopped" => Ok(TaskLogStatus::Stopped),
            other => anyhow::bail!("unknown task log status: {other}"),
        }
    }
}

/// One execution record (§3 TaskLog).
///
/// Invariant: `status = running ⇔ end_time is null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLog {
    pub id: String,
    pub task_id: String,
    pub task_name: String,
    pub status: TaskLogStatus,
    pub start_time: chrono::NaiveDateTime,
    pub end_time: Option<chrono::NaiveDateTime>,
    pub output: String,
    pub error_output: String,
    pub exit_code: Option<i32>,
}

/// Input to create a Task.
#[derive(Debug, Clone)]
pub struct CreateTaskInput {
    pub name: String,
    pub description: String,
    pub script_path: String,
    pub script_kind: ScriptKind,
    pub cron_expr: String,
    pub env_overrides: HashMap<String, String>,
    pub group_name: String,
    pub active: bool,
}

/// A scheduled git-sync (§3 Subscription).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub name: String,
    pub description: String,
    pub git_url: String,
    pub save_dir: String,
    pub file_extensions: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub include_folders: bool,
    pub include_subfolders: bool,
    pub use_proxy: bool,
    pub sync_delete_removed: bool,
    pub cron_expr: String,
    pub notify_enabled: bool,
    pub notify_channel: Option<String>,
    pub active: bool,
    pub last_sync_time: Option<chrono::NaiveDateTime>,
}

/// (subscription_id, path_relative_to_save_dir, content_md5, size); insertion
/// unique on (subscription_id, path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionFile {
    pub subscription_id: String,
    pub file_path: String,
    pub file_md5: String,
    pub file_size: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionLogStatus {
    Running,
    Success,
    Error,
}

impl SubscriptionLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionLogStatus::Running => "running",
            SubscriptionLogStatus::Success => "success",
            SubscriptionLogStatus::Error => "error",
        }
    }
}

impl fmt::Display for SubscriptionLogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionLog {
    pub id: String,
    pub subscription_id: String,
    pub status: SubscriptionLogStatus,
    pub message: String,
    pub files_updated: i64,
    pub files_added: i64,
    pub start_time: chrono::NaiveDateTime,
    pub end_time: Option<chrono::NaiveDateTime>,
}

/// Notification condition for an ApiDebugConfig (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyCondition {
    Always,
    Success,
    Error,
}

impl NotifyCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyCondition::Always => "always",
            NotifyCondition::Success => "success",
            NotifyCondition::Error => "error",
        }
    }
}

impl fmt::Display for NotifyCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NotifyCondition {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(NotifyCondition::Always),
            "success" => Ok(NotifyCondition::Success),
            "error" => Ok(NotifyCondition::Error),
            other => anyhow::bail!("unknown notify condition: {other}"),
        }
    }
}

/// An HTTP probe definition (§3 ApiDebugConfig).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiDebugConfig {
    pub id: String,
    pub name: String,
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub payload: String,
    pub notify_enabled: bool,
    pub notify_channel: Option<String>,
    pub notify_condition: NotifyCondition,
    pub cron_expr: String,
    pub active: bool,
}

/// One probe invocation (§3 ApiDebugLog). Carries both the request snapshot
/// (method/url/headers/payload as actually sent, after variable expansion)
/// and the response snapshot, mirroring the original's paired columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiDebugLog {
    pub id: String,
    pub config_id: String,
    pub config_name: String,
    pub method: String,
    pub url: String,
    pub request_headers: HashMap<String, String>,
    pub request_payload: String,
    pub status_code: Option<u16>,
    pub response_headers: HashMap<String, String>,
    pub response_body: String,
    pub error_message: Option<String>,
    pub response_time_ms: i64,
    pub start_time: chrono::NaiveDateTime,
}

/// Per-task notification policy (§7), read by the core but written by an
/// out-of-scope collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNotificationConfig {
    pub task_id: String,
    pub channel: Option<String>,
    pub error_only: bool,
    pub keywords: Vec<String>,
}

/// A global name→value env pair, merged into every script's environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}
