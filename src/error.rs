//! Top-level error types for jobforge.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cron(#[from] CronError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Notifier(#[from] NotifierError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Store (persistence) errors. §7 *StoreFailure*: propagated to the caller;
/// runners record what they can and abort the current firing.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("probe not found: {0}")]
    ProbeNotFound(String),

    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// §7 *ConfigParse*: invalid cron, invalid timezone, malformed stored config.
#[derive(Debug, thiserror::Error)]
pub enum CronError {
    #[error("invalid cron expression {expr:?}: {reason}")]
    InvalidExpr { expr: String, reason: String },

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}

/// §7 *ScriptLaunch* / *ScriptRuntime*.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("script not found: {0}")]
    ScriptNotFound(String),

    #[error("failed to spawn process: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("path escapes scripts root: {0}")]
    PathEscape(String),
}

/// §7 *ProbeFailure*.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("request timed out")]
    Timeout,
}

/// §7 *GitFailure*.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git exited with status {0}")]
    NonZeroExit(i32),

    #[error("git operation timed out")]
    Timeout,

    #[error("repo path escapes scripts root: {0}")]
    PathEscape(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// §7 *NotifierFailure*: swallowed with a log line; never fails a run. This
/// variant exists so the notifier trait has something to return, not so
/// callers propagate it.
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("notifier send failed: {0}")]
    SendFailed(String),
}
