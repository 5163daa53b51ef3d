//! Subscription Runner (component J): clones/pulls a git repo, filters by
//! extension+exclude globs, diffs content hashes, per §4.5.
//!
//! Grounded on `app/routers/subscriptions.py`: `should_exclude_path`'s
//! three-rule glob match (full relative path, each path component,
//! basename), `scan_file_changes`'s walk-and-diff, and the
//! read-only-tolerant recursive delete used for cleanup.

use crate::clock::Clock;
use crate::config::{Config, LiveConfig};
use crate::error::{GitError, Result};
use crate::hub::{self, SharedHub};
use crate::notifier::Notifier;
use crate::store::{Store, Subscription, SubscriptionFile, SubscriptionLog, SubscriptionLogStatus};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::json;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

const GIT_TIMEOUT: Duration = Duration::from_secs(300);
const NOTIFY_LIST_LIMIT: usize = 10;

pub struct SubscriptionRunner {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    hub: SharedHub,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
    live: Arc<LiveConfig>,
}

struct SyncOutcome {
    files_added: Vec<String>,
    files_updated: Vec<String>,
    files_deleted: Vec<String>,
}

impl SubscriptionRunner {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        hub: SharedHub,
        clock: Arc<dyn Clock>,
        config: Arc<Config>,
        live: Arc<LiveConfig>,
    ) -> Self {
        Self {
            store,
            notifier,
            hub,
            clock,
            config,
            live,
        }
    }

    pub async fn run(&self, subscription_id: &str) -> Result<()> {
        let Some(sub) = self.store.get_subscription(subscription_id).await? else {
            tracing::warn!(subscription_id, "subscription not found, skipping firing");
            return Ok(());
        };

        let start_time = self.clock.now().naive_local();
        let repo_dir = self.resolve_repo_dir(&sub)?;

        let result = self.sync(&sub, &repo_dir).await;

        let (status, message, outcome) = match result {
            Ok(outcome) => (SubscriptionLogStatus::Success, String::new(), outcome),
            Err(e) => (
                SubscriptionLogStatus::Error,
                e.to_string(),
                SyncOutcome {
                    files_added: vec![],
                    files_updated: vec![],
                    files_deleted: vec![],
                },
            ),
        };

        let end_time = self.clock.now().naive_local();
        let log = SubscriptionLog {
            id: uuid::Uuid::new_v4().to_string(),
            subscription_id: sub.id.clone(),
            status,
            message: message.clone(),
            files_updated: outcome.files_updated.len() as i64,
            files_added: outcome.files_added.len() as i64,
            start_time,
            end_time: Some(end_time),
        };
        self.store.create_subscription_log(log.clone()).await?;
        if status == SubscriptionLogStatus::Success {
            self.store
                .set_subscription_last_sync(&sub.id, end_time)
                .await?;
        }

        self.hub
            .send_to(
                hub::GLOBAL_ROOM,
                &json!({
                    "type": "subscription_sync_complete",
                    "subscription_id": sub.id,
                    "status": status.as_str(),
                    "files_updated": log.files_updated,
                    "files_added": log.files_added,
                    "message": message,
                }),
            )
            .await;

        let has_changes = !outcome.files_added.is_empty()
            || !outcome.files_updated.is_empty()
            || !outcome.files_deleted.is_empty();
        if sub.notify_enabled && has_changes {
            self.notify(&sub, &outcome).await;
        }

        Ok(())
    }

    /// Resolves `save_dir` against the scripts root and verifies containment
    /// lexically (`crate::pathutil::join_contained`), so a `save_dir` like
    /// `"../../etc"` is rejected even before the directory exists — the
    /// normal case for a subscription's first sync, when a parent-only
    /// `canonicalize()` check would otherwise have nothing to check against.
    fn resolve_repo_dir(&self, sub: &Subscription) -> Result<PathBuf> {
        crate::pathutil::join_contained(&self.config.scripts_root, &sub.save_dir)
            .ok_or_else(|| GitError::PathEscape(sub.save_dir.clone()).into())
    }

    async fn sync(&self, sub: &Subscription, repo_dir: &Path) -> Result<SyncOutcome> {
        let mut envs: Vec<(String, String)> = Vec::new();
        let (proxy_host, proxy_port, proxy_enabled) = self.live.proxy();
        if sub.use_proxy && proxy_enabled {
            if let (Some(host), Some(port)) = (proxy_host, proxy_port) {
                let proxy_url = format!("http://{host}:{port}");
                envs.push(("http_proxy".into(), proxy_url.clone()));
                envs.push(("https_proxy".into(), proxy_url));
            }
        }

        if repo_dir.join(".git").exists() {
            let branch = current_branch(repo_dir).await.unwrap_or_else(|| "main".to_string());
            run_git(repo_dir, &["pull", "origin", &branch], &envs).await?;
        } else {
            if repo_dir.exists() {
                remove_dir_tolerant(repo_dir)?;
            }
            tokio::fs::create_dir_all(repo_dir).await?;
            run_git(repo_dir, &["clone", &sub.git_url, "."], &envs).await?;
        }

        self.cleanup_excluded(sub, repo_dir)?;
        self.diff_and_record(sub, repo_dir).await
    }

    /// §4.5 step 4: recursively delete top-level entries matching any
    /// exclude pattern.
    fn cleanup_excluded(&self, sub: &Subscription, repo_dir: &Path) -> Result<()> {
        let matcher = build_matcher(&sub.exclude_patterns)?;
        let read_dir = match std::fs::read_dir(repo_dir) {
            Ok(r) => r,
            Err(_) => return Ok(()),
        };
        for entry in read_dir.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == ".git" {
                continue;
            }
            if matches_exclude(&matcher, &name, &name) {
                let path = entry.path();
                if path.is_dir() {
                    let _ = remove_dir_tolerant(&path);
                } else {
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
        Ok(())
    }

    /// §4.5 steps 5-6: walk, diff against stored md5s, apply the
    /// optional deletion pass.
    async fn diff_and_record(&self, sub: &Subscription, repo_dir: &Path) -> Result<SyncOutcome> {
        let matcher = build_matcher(&sub.exclude_patterns)?;
        let existing = self.store.subscription_files(&sub.id).await?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut added = Vec::new();
        let mut updated = Vec::new();

        let mut stack = vec![repo_dir.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                let relative = match path.strip_prefix(repo_dir) {
                    Ok(r) => r,
                    Err(_) => continue,
                };
                if relative.starts_with(".git") {
                    continue;
                }
                let relative_str = relative.to_string_lossy().replace('\\', "/");
                let basename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();

                if file_type.is_dir() {
                    if sub.include_subfolders && !matches_exclude(&matcher, &relative_str, &basename)
                    {
                        stack.push(path);
                    }
                    continue;
                }

                if matches_exclude(&matcher, &relative_str, &basename) {
                    continue;
                }
                if !sub.file_extensions.is_empty() {
                    let ext = path
                        .extension()
                        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
                        .unwrap_or_default();
                    if !sub.file_extensions.iter().any(|allowed| allowed.to_lowercase() == ext) {
                        continue;
                    }
                }

                let Ok(bytes) = std::fs::read(&path) else {
                    continue;
                };
                let digest = format!("{:x}", md5::compute(&bytes));
                seen.insert(relative_str.clone());

                match existing.get(&relative_str) {
                    None => {
                        self.store
                            .upsert_subscription_file(SubscriptionFile {
                                subscription_id: sub.id.clone(),
                                file_path: relative_str.clone(),
                                file_md5: digest,
                                file_size: bytes.len() as i64,
                            })
                            .await?;
                        added.push(relative_str);
                    }
                    Some(prior) if prior.file_md5 != digest => {
                        self.store
                            .upsert_subscription_file(SubscriptionFile {
                                subscription_id: sub.id.clone(),
                                file_path: relative_str.clone(),
                                file_md5: digest,
                                file_size: bytes.len() as i64,
                            })
                            .await?;
                        updated.push(relative_str);
                    }
                    Some(_) => {}
                }
            }
        }

        let mut deleted = Vec::new();
        if sub.sync_delete_removed {
            for path in existing.keys() {
                if !seen.contains(path) {
                    let local = repo_dir.join(path);
                    let _ = std::fs::remove_file(&local);
                    self.store
                        .delete_subscription_file(&sub.id, path)
                        .await?;
                    deleted.push(path.clone());
                }
            }
        }

        Ok(SyncOutcome {
            files_added: added,
            files_updated: updated,
            files_deleted: deleted,
        })
    }

    async fn notify(&self, sub: &Subscription, outcome: &SyncOutcome) {
        let Some(channel) = &sub.notify_channel else {
            return;
        };
        let mut body = String::new();
        append_bucket(&mut body, "added", &outcome.files_added);
        append_bucket(&mut body, "updated", &outcome.files_updated);
        append_bucket(&mut body, "deleted", &outcome.files_deleted);

        let title = format!("subscription {} synced", sub.name);
        if let Err(e) = self.notifier.send(channel, &title, &body).await {
            tracing::warn!(subscription_id = %sub.id, error = %e, "notifier send failed");
        }
    }
}

fn append_bucket(body: &mut String, label: &str, names: &[String]) {
    if names.is_empty() {
        return;
    }
    body.push_str(label);
    body.push_str(":\n");
    for name in names.iter().take(NOTIFY_LIST_LIMIT) {
        body.push_str("  ");
        body.push_str(name);
        body.push('\n');
    }
    if names.len() > NOTIFY_LIST_LIMIT {
        body.push_str(&format!("  … and {} more\n", names.len() - NOTIFY_LIST_LIMIT));
    }
}

/// Exclude-pattern matcher. Beyond plain glob matching, a `dir/**` pattern
/// is treated as also excluding the `dir` entry itself (not just its
/// contents), so top-level cleanup removes the whole folder in one pass.
struct ExcludeMatcher {
    globset: GlobSet,
    dir_prefixes: Vec<String>,
}

fn build_matcher(patterns: &[String]) -> Result<ExcludeMatcher> {
    let mut builder = GlobSetBuilder::new();
    let mut dir_prefixes = Vec::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| anyhow::anyhow!("invalid exclude pattern {pattern:?}: {e}"))?;
        builder.add(glob);
        if let Some(prefix) = pattern.strip_suffix("/**") {
            dir_prefixes.push(prefix.to_string());
        }
    }
    let globset = builder
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build exclude matcher: {e}"))?;
    Ok(ExcludeMatcher {
        globset,
        dir_prefixes,
    })
}

/// Three-rule match: full relative path, each path component, basename.
fn matches_exclude(matcher: &ExcludeMatcher, relative_path: &str, basename: &str) -> bool {
    if matcher.globset.is_match(relative_path) || matcher.globset.is_match(basename) {
        return true;
    }
    if relative_path
        .split('/')
        .any(|component| matcher.globset.is_match(component))
    {
        return true;
    }
    matcher
        .dir_prefixes
        .iter()
        .any(|prefix| prefix == relative_path || prefix == basename)
}

fn remove_dir_tolerant(path: &Path) -> Result<()> {
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let p = entry.path();
            if let Ok(metadata) = entry.metadata() {
                if metadata.permissions().readonly() {
                    let mut perms = metadata.permissions();
                    #[allow(clippy::permissions_set_readonly_false)]
                    perms.set_readonly(false);
                    let _ = std::fs::set_permissions(&p, perms);
                }
            }
            if p.is_dir() {
                let _ = remove_dir_tolerant(&p);
            } else {
                let _ = std::fs::remove_file(&p);
            }
        }
    }
    std::fs::remove_dir_all(path).or_else(|_| std::fs::remove_dir(path))?;
    Ok(())
}

async fn current_branch(repo_dir: &Path) -> Option<String> {
    let output = tokio::time::timeout(
        GIT_TIMEOUT,
        Command::new("git")
            .args(["rev-parse", "--abbrev-ref", "HEAD"])
            .current_dir(repo_dir)
            .output(),
    )
    .await
    .ok()?
    .ok()?;
    if !output.status.success() {
        return None;
    }
    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if branch.is_empty() || branch == "HEAD" {
        None
    } else {
        Some(branch)
    }
}

async fn run_git(repo_dir: &Path, args: &[&str], envs: &[(String, String)]) -> Result<()> {
    let mut cmd = Command::new("git");
    cmd.args(args).current_dir(repo_dir);
    for (k, v) in envs {
        cmd.env(k, v);
    }
    let output = tokio::time::timeout(GIT_TIMEOUT, cmd.output())
        .await
        .map_err(|_| GitError::Timeout)?
        .map_err(GitError::Io)?;
    if !output.status.success() {
        return Err(GitError::NonZeroExit(output.status.code().unwrap_or(-1)).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclude_matches_by_all_three_rules() {
        let matcher = build_matcher(&[
            "node_modules".to_string(),
            "*.pyc".to_string(),
            "docs/**".to_string(),
        ])
        .unwrap();

        assert!(matches_exclude(&matcher, "node_modules", "node_modules"));
        assert!(matches_exclude(&matcher, "src/node_modules/x.py", "x.py"));
        assert!(matches_exclude(&matcher, "a/b/c.pyc", "c.pyc"));
        assert!(matches_exclude(&matcher, "docs", "docs"));
        assert!(!matches_exclude(&matcher, "readme.md", "readme.md"));
    }

    async fn test_runner(dir: &tempfile::TempDir) -> (SubscriptionRunner, Arc<dyn Store>) {
        use crate::notifier::test_support::RecordingNotifier;
        use crate::store::SqliteStore;
        use sqlx::sqlite::SqlitePoolOptions;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let sqlite = SqliteStore::new(pool);
        sqlite.initialize().await.unwrap();
        let store: Arc<dyn Store> = Arc::new(sqlite);

        let config = Arc::new(Config {
            data_dir: dir.path().to_path_buf(),
            scripts_root: dir.path().to_path_buf(),
            timezone: "UTC".into(),
            python_command: "python3".into(),
            nodejs_command: "node".into(),
            proxy_host: None,
            proxy_port: None,
            proxy_enabled: false,
            log_cache_retention: std::time::Duration::from_secs(300),
            bind_addr: "127.0.0.1:0".into(),
        });
        let live = Arc::new(LiveConfig::new(&config));

        let runner = SubscriptionRunner::new(
            Arc::clone(&store),
            Arc::new(RecordingNotifier::default()),
            Arc::new(crate::hub::Hub::new()),
            Arc::new(crate::clock::TzClock::new(chrono_tz::UTC)),
            config,
            live,
        );
        (runner, store)
    }

    fn fixture_subscription() -> Subscription {
        Subscription {
            id: "sub1".into(),
            name: "test".into(),
            description: "".into(),
            git_url: "".into(),
            save_dir: "repo".into(),
            file_extensions: vec![],
            exclude_patterns: vec![],
            include_folders: true,
            include_subfolders: true,
            use_proxy: false,
            sync_delete_removed: true,
            cron_expr: "* * * * *".into(),
            notify_enabled: false,
            notify_channel: None,
            active: true,
            last_sync_time: None,
        }
    }

    #[tokio::test]
    async fn diff_and_record_covers_add_update_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, store) = test_runner(&dir).await;
        let sub = fixture_subscription();

        let repo_dir = dir.path().join("repo");
        std::fs::create_dir_all(&repo_dir).unwrap();
        std::fs::write(repo_dir.join("a.py"), b"one").unwrap();
        std::fs::write(repo_dir.join("b.py"), b"two").unwrap();

        let outcome = runner.diff_and_record(&sub, &repo_dir).await.unwrap();
        assert_eq!(outcome.files_added.len(), 2);
        assert!(outcome.files_updated.is_empty());
        assert!(outcome.files_deleted.is_empty());

        std::fs::write(repo_dir.join("b.py"), b"two-updated").unwrap();
        std::fs::remove_file(repo_dir.join("a.py")).unwrap();

        let outcome = runner.diff_and_record(&sub, &repo_dir).await.unwrap();
        assert!(outcome.files_added.is_empty());
        assert_eq!(outcome.files_updated, vec!["b.py".to_string()]);
        assert_eq!(outcome.files_deleted, vec!["a.py".to_string()]);

        let remaining = store.subscription_files("sub1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.contains_key("b.py"));
    }

    #[tokio::test]
    async fn cleanup_excluded_removes_matching_top_level_entries() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, _store) = test_runner(&dir).await;
        let mut sub = fixture_subscription();
        sub.exclude_patterns = vec!["node_modules".to_string()];

        let repo_dir = dir.path().join("repo");
        std::fs::create_dir_all(repo_dir.join("node_modules")).unwrap();
        std::fs::write(repo_dir.join("node_modules/dep.js"), b"x").unwrap();
        std::fs::write(repo_dir.join("keep.py"), b"y").unwrap();

        runner.cleanup_excluded(&sub, &repo_dir).unwrap();

        assert!(!repo_dir.join("node_modules").exists());
        assert!(repo_dir.join("keep.py").exists());
    }

    #[test]
    fn resolve_repo_dir_rejects_escape_before_directory_exists() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(Config {
            data_dir: dir.path().to_path_buf(),
            scripts_root: dir.path().to_path_buf(),
            timezone: "UTC".into(),
            python_command: "python3".into(),
            nodejs_command: "node".into(),
            proxy_host: None,
            proxy_port: None,
            proxy_enabled: false,
            log_cache_retention: std::time::Duration::from_secs(300),
            bind_addr: "127.0.0.1:0".into(),
        });
        let resolved = crate::pathutil::join_contained(&config.scripts_root, "../../etc");
        assert!(resolved.is_none());
    }
}
