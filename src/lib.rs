//! jobforge: a cron-driven execution platform for scheduled scripts, HTTP
//! probes, and git subscriptions.

pub mod api;
pub mod clock;
pub mod config;
pub mod cron_engine;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod expand;
pub mod hub;
pub mod log_cache;
pub mod notifier;
pub mod notify_policy;
mod pathutil;
pub mod probe;
pub mod store;
pub mod subscription;

pub use error::{Error, Result};

/// Placeholder task name prefix. A Task whose name begins with this is a
/// `GroupPlaceholder`: never scheduled, never listed.
pub const GROUP_PLACEHOLDER_PREFIX: &str = "__GROUP_PLACEHOLDER_";

/// Logical registration key for the Cron Engine, per spec §4.1.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobKey {
    Task(String),
    Probe(String),
    Subscription(String),
    Immediate(String, i64),
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKey::Task(id) => write!(f, "task:{id}"),
            JobKey::Probe(id) => write!(f, "probe:{id}"),
            JobKey::Subscription(id) => write!(f, "sub:{id}"),
            JobKey::Immediate(id, unix) => write!(f, "immediate:{id}:{unix}"),
        }
    }
}
