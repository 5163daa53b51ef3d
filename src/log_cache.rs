//! Log Cache (component E): in-memory ring of stdout/stderr lines per
//! running task, retained 5 minutes past completion so late-joining
//! observers can replay output (§4.7, scenario S6).

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    Stdout,
    Stderr,
}

impl OutputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputType::Stdout => "stdout",
            OutputType::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CachedLine {
    pub line: String,
    pub output_type: OutputType,
}

struct CacheEntry {
    log_id: String,
    lines: Vec<CachedLine>,
}

pub struct LogCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl Default for LogCache {
    fn default() -> Self {
        Self::new()
    }
}

impl LogCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Initialize an empty entry for a task that just started running.
    pub async fn start(&self, task_id: &str, log_id: &str) {
        self.entries.write().await.insert(
            task_id.to_string(),
            CacheEntry {
                log_id: log_id.to_string(),
                lines: Vec::new(),
            },
        );
    }

    /// Append one decoded output line, preserving read-scheduling order
    /// across stdout/stderr (spec §5: "no ordering is guaranteed between
    /// them" beyond the order lines are actually read in).
    pub async fn append(&self, task_id: &str, line: String, output_type: OutputType) {
        if let Some(entry) = self.entries.write().await.get_mut(task_id) {
            entry.lines.push(CachedLine { line, output_type });
        }
    }

    /// Snapshot of cached lines in original order, for Hub replay to a
    /// late-joining observer. `None` if the task has no cache entry (never
    /// ran, or already evicted).
    pub async fn replay(&self, task_id: &str) -> Option<(String, Vec<CachedLine>)> {
        let entries = self.entries.read().await;
        let entry = entries.get(task_id)?;
        Some((entry.log_id.clone(), entry.lines.clone()))
    }

    /// Remove an entry immediately (manual clearing).
    pub async fn clear(&self, task_id: &str) {
        self.entries.write().await.remove(task_id);
    }

    /// Schedule eviction of this task's entry after `retention`, to run once
    /// the task has reached a terminal state. Spawns a background task;
    /// does not block the caller.
    pub fn schedule_eviction(self: &Arc<Self>, task_id: String, retention: Duration) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            cache.clear(&task_id).await;
            tracing::debug!(task_id, "log cache entry evicted");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replay_preserves_append_order() {
        let cache = LogCache::new();
        cache.start("t1", "log-1").await;
        cache.append("t1", "line one".into(), OutputType::Stdout).await;
        cache.append("t1", "line two".into(), OutputType::Stderr).await;
        cache.append("t1", "line three".into(), OutputType::Stdout).await;

        let (log_id, lines) = cache.replay("t1").await.expect("entry present");
        assert_eq!(log_id, "log-1");
        let rendered: Vec<&str> = lines.iter().map(|l| l.line.as_str()).collect();
        assert_eq!(rendered, vec!["line one", "line two", "line three"]);
    }

    #[tokio::test]
    async fn eviction_removes_entry_after_retention() {
        let cache = Arc::new(LogCache::new());
        cache.start("t1", "log-1").await;
        cache.schedule_eviction("t1".to_string(), Duration::from_millis(20));

        assert!(cache.replay("t1").await.is_some());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.replay("t1").await.is_none());
    }

    #[tokio::test]
    async fn unknown_task_replay_is_none() {
        let cache = LogCache::new();
        assert!(cache.replay("missing").await.is_none());
    }
}
