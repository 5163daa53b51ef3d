//! Executor (component F): the process lifecycle for script tasks.
//!
//! Grounded on the spawn/pipe-drain pattern in the reference `exec()`
//! helper and the graceful→forceful kill protocol in the reference
//! `AcpProcess::kill` (SIGTERM, wait with timeout, escalate to SIGKILL),
//! generalized here from a single process to a whole process-tree by
//! placing the child in its own process group (`setsid`) and signaling the
//! group, mirroring the original `psutil`-based children-then-parent
//! termination sequence.

use crate::clock::Clock;
use crate::config::{Config, LiveConfig};
use crate::error::{ExecutorError, Result};
use crate::hub::{self, SharedHub};
use crate::log_cache::{LogCache, OutputType};
use crate::notifier::Notifier;
use crate::notify_policy;
use crate::store::{Store, Task, TaskLogStatus};
use serde_json::json;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, RwLock};

const GRACEFUL_WAIT: std::time::Duration = std::time::Duration::from_secs(5);
const STOPPED_SENTINEL: &str = "任务被用户停止";

#[derive(Debug, Clone)]
struct RunningEntry {
    pid: u32,
    log_id: String,
}

pub struct Executor {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    hub: SharedHub,
    log_cache: Arc<LogCache>,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
    live: Arc<LiveConfig>,
    running: RwLock<HashMap<String, RunningEntry>>,
}

impl Executor {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        hub: SharedHub,
        log_cache: Arc<LogCache>,
        clock: Arc<dyn Clock>,
        config: Arc<Config>,
        live: Arc<LiveConfig>,
    ) -> Self {
        Self {
            store,
            notifier,
            hub,
            log_cache,
            clock,
            config,
            live,
            running: RwLock::new(HashMap::new()),
        }
    }

    /// Run one Task to completion and record the outcome. Never propagates
    /// a runtime error for the task itself — launch/runtime failures are
    /// recorded as terminal log states, per §7.
    pub async fn run(&self, task_id: &str) -> Result<()> {
        let Some(task) = self.store.get_task(task_id).await? else {
            tracing::warn!(task_id, "task not found, skipping firing");
            return Ok(());
        };

        let start_time = self.clock.now().naive_local();
        let log = self.store.start_task_log(&task, start_time).await?;
        self.log_cache.start(&task.id, &log.id).await;
        self.hub
            .send_to(
                hub::GLOBAL_ROOM,
                &json!({
                    "type": "task_start",
                    "task_id": task.id,
                    "task_name": task.name,
                    "log_id": log.id,
                }),
            )
            .await;

        let script_path = match crate::pathutil::join_contained(&self.config.scripts_root, &task.script_path)
        {
            Some(p) => p,
            None => {
                let err = ExecutorError::PathEscape(task.script_path.clone());
                self.fail_launch(&task, &log.id, start_time, &err.to_string())
                    .await?;
                return Ok(());
            }
        };
        if !script_path.exists() {
            let err = ExecutorError::ScriptNotFound(script_path.display().to_string());
            self.fail_launch(&task, &log.id, start_time, &err.to_string())
                .await?;
            return Ok(());
        }

        let env = self.build_environment(&task).await?;
        let (command, args) = self.resolve_command(&task, &script_path);
        let working_dir = script_path
            .parent()
            .filter(|p| *p != self.config.scripts_root)
            .unwrap_or(&self.config.scripts_root);

        let mut cmd = Command::new(&command);
        cmd.args(&args)
            .current_dir(working_dir)
            .envs(&env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        place_in_own_process_group(&mut cmd);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                self.fail_launch(&task, &log.id, start_time, &e.to_string())
                    .await?;
                return Ok(());
            }
        };

        let pid = child.id().unwrap_or(0);
        self.running.write().await.insert(
            task.id.clone(),
            RunningEntry {
                pid,
                log_id: log.id.clone(),
            },
        );

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");
        let (line_tx, mut line_rx) = mpsc::channel::<(OutputType, String)>(256);

        let stdout_tx = line_tx.clone();
        let stdout_reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if stdout_tx.send((OutputType::Stdout, line)).await.is_err() {
                    break;
                }
            }
        });
        let stderr_reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line_tx.send((OutputType::Stderr, line)).await.is_err() {
                    break;
                }
            }
        });

        let task_id_owned = task.id.clone();
        let log_id_owned = log.id.clone();
        let hub = Arc::clone(&self.hub);
        let log_cache = Arc::clone(&self.log_cache);
        let sink = tokio::spawn(async move {
            let mut output = String::new();
            let mut error_output = String::new();
            let room = hub::task_room(&task_id_owned);
            while let Some((output_type, line)) = line_rx.recv().await {
                match output_type {
                    OutputType::Stdout => {
                        output.push_str(&line);
                        output.push('\n');
                    }
                    OutputType::Stderr => {
                        error_output.push_str(&line);
                        error_output.push('\n');
                    }
                }
                log_cache
                    .append(&task_id_owned, line.clone(), output_type)
                    .await;
                hub.send_to(
                    &room,
                    &json!({
                        "type": "task_output",
                        "task_id": task_id_owned,
                        "log_id": log_id_owned,
                        "output_line": line,
                        "output_type": output_type.as_str(),
                    }),
                )
                .await;
            }
            (output, error_output)
        });

        let exit_status = child.wait().await;
        let _ = stdout_reader.await;
        let _ = stderr_reader.await;
        let (output, error_output) = sink.await.unwrap_or_default();

        self.running.write().await.remove(&task.id);

        // A concurrent stopTask may already have written a terminal status;
        // don't clobber it (property 5: at most a race, never re-running).
        if let Some(existing) = self.store.get_task_log(&log.id).await? {
            if existing.status != TaskLogStatus::Running {
                return Ok(());
            }
        }

        let end_time = self.clock.now().naive_local();
        match exit_status {
            Ok(status) => {
                let exit_code = status.code().unwrap_or(-1);
                let final_status = if exit_code == 0 {
                    TaskLogStatus::Success
                } else {
                    TaskLogStatus::Failed
                };
                self.store
                    .complete_task_log(
                        &log.id,
                        final_status,
                        end_time,
                        &output,
                        &error_output,
                        Some(exit_code),
                    )
                    .await?;
                self.hub
                    .send_to(
                        hub::GLOBAL_ROOM,
                        &json!({
                            "type": "task_complete",
                            "task_id": task.id,
                            "task_name": task.name,
                            "log_id": log.id,
                            "status": final_status.as_str(),
                            "exit_code": exit_code,
                            "output": output,
                            "error_output": error_output,
                        }),
                    )
                    .await;
                self.notify(&task.id, &log.id).await;
            }
            Err(e) => {
                self.fail_launch(&task, &log.id, start_time, &e.to_string())
                    .await?;
            }
        }

        self.log_cache
            .schedule_eviction(task.id.clone(), self.live.log_cache_retention());

        Ok(())
    }

    async fn fail_launch(
        &self,
        task: &Task,
        log_id: &str,
        _start_time: chrono::NaiveDateTime,
        error: &str,
    ) -> Result<()> {
        let end_time = self.clock.now().naive_local();
        self.store
            .complete_task_log(log_id, TaskLogStatus::Failed, end_time, "", error, None)
            .await?;
        self.hub
            .send_to(
                hub::GLOBAL_ROOM,
                &json!({
                    "type": "task_error",
                    "task_id": task.id,
                    "task_name": task.name,
                    "log_id": log_id,
                    "error": error,
                }),
            )
            .await;
        self.notify(&task.id, log_id).await;
        self.log_cache
            .schedule_eviction(task.id.clone(), self.live.log_cache_retention());
        Ok(())
    }

    async fn notify(&self, task_id: &str, log_id: &str) {
        let config = match self.store.get_task_notification_config(task_id).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(task_id, error = %e, "failed to load notification config");
                return;
            }
        };
        let Ok(Some(log)) = self.store.get_task_log(log_id).await else {
            return;
        };
        let Some((channel, title, body)) = notify_policy::format_notification(config.as_ref(), &log)
        else {
            return;
        };
        if let Err(e) = self.notifier.send(&channel, &title, &body).await {
            tracing::warn!(task_id, error = %e, "notifier send failed");
        }
    }

    async fn build_environment(&self, task: &Task) -> Result<HashMap<String, String>> {
        let mut env: HashMap<String, String> = std::env::vars().collect();

        match task.script_kind {
            crate::store::ScriptKind::Python => {
                env.insert("PYTHONIOENCODING".into(), "utf-8".into());
                env.insert("LANG".into(), "zh_CN.UTF-8".into());
                env.insert("LC_ALL".into(), "zh_CN.UTF-8".into());
                env.insert("PYTHONUNBUFFERED".into(), "1".into());
            }
            crate::store::ScriptKind::Nodejs => {
                env.entry("NODE_PATH".to_string())
                    .or_insert_with(|| "/usr/local/lib/node_modules".to_string());
                let local_modules = self.config.scripts_root.join("node_modules");
                if local_modules.exists() {
                    let existing = env.get("NODE_PATH").cloned().unwrap_or_default();
                    let sep = if cfg!(windows) { ";" } else { ":" };
                    env.insert(
                        "NODE_PATH".into(),
                        format!("{existing}{sep}{}", local_modules.display()),
                    );
                }
            }
        }

        for var in self.store.list_env_vars().await? {
            env.insert(var.name, var.value);
        }
        for (k, v) in &task.env_overrides {
            env.insert(k.clone(), v.clone());
        }

        Ok(env)
    }

    fn resolve_command(
        &self,
        task: &Task,
        script_path: &std::path::Path,
    ) -> (String, Vec<String>) {
        let command = match task.script_kind {
            crate::store::ScriptKind::Python => self.live.python_command(),
            crate::store::ScriptKind::Nodejs => self.live.nodejs_command(),
        };
        (command, vec![script_path.display().to_string()])
    }

    /// §4.3 stopTask. Returns whether a process was found and signaled.
    pub async fn stop(&self, task_id: &str, force: bool) -> Result<bool> {
        let Some(entry) = self.running.read().await.get(task_id).cloned() else {
            return Ok(false);
        };

        if force {
            signal_process_group(entry.pid, Signal::Kill);
        } else {
            signal_process_group(entry.pid, Signal::Term);
            let deadline = tokio::time::Instant::now() + GRACEFUL_WAIT;
            loop {
                if !self.running.read().await.contains_key(task_id) {
                    break;
                }
                if tokio::time::Instant::now() >= deadline {
                    signal_process_group(entry.pid, Signal::Kill);
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }

        if let Some(log) = self.store.latest_running_task_log(task_id).await? {
            if log.id == entry.log_id {
                let end_time = self.clock.now().naive_local();
                self.store
                    .complete_task_log(
                        &log.id,
                        TaskLogStatus::Stopped,
                        end_time,
                        &log.output,
                        STOPPED_SENTINEL,
                        Some(-1),
                    )
                    .await?;
                self.hub
                    .send_to(
                        hub::GLOBAL_ROOM,
                        &json!({
                            "type": "task_complete",
                            "task_id": task_id,
                            "log_id": log.id,
                            "status": "stopped",
                            "exit_code": -1,
                            "output": log.output,
                            "error_output": STOPPED_SENTINEL,
                        }),
                    )
                    .await;
                self.notify(task_id, &log.id).await;
            }
        }

        self.running.write().await.remove(task_id);
        Ok(true)
    }

    pub async fn is_running(&self, task_id: &str) -> bool {
        self.running.read().await.contains_key(task_id)
    }
}

#[derive(Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn place_in_own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn place_in_own_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn signal_process_group(pid: u32, signal: Signal) {
    let sig = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    unsafe {
        libc::kill(-(pid as i32), sig);
    }
}

#[cfg(not(unix))]
fn signal_process_group(_pid: u32, _signal: Signal) {
    tracing::warn!("process-tree signaling is unix-only; skipping");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TzClock;
    use crate::notifier::test_support::RecordingNotifier;
    use crate::store::{CreateTaskInput, ScriptKind, SqliteStore};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> (Executor, Arc<dyn Store>, tempfile::TempDir) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteStore::new(pool);
        store.initialize().await.unwrap();
        let store: Arc<dyn Store> = Arc::new(store);

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
        let live = Arc::new(crate::config::LiveConfig::new(&config));

        let executor = Executor::new(
            Arc::clone(&store),
            Arc::new(RecordingNotifier::default()),
            Arc::new(crate::hub::Hub::new()),
            Arc::new(LogCache::new()),
            Arc::new(TzClock::new(chrono_tz::UTC)),
            config,
            live,
        );
        (executor, store, dir)
    }

    #[tokio::test]
    async fn missing_script_records_failed_task_error() {
        let (executor, store, _dir) = setup().await;
        let task = store
            .create_task(CreateTaskInput {
                name: "missing".into(),
                description: "".into(),
                script_path: "does_not_exist.py".into(),
                script_kind: ScriptKind::Python,
                cron_expr: "* * * * *".into(),
                env_overrides: HashMap::new(),
                group_name: "默认".into(),
                active: true,
            })
            .await
            .unwrap();

        executor.run(&task.id).await.unwrap();

        let latest = store.latest_running_task_log(&task.id).await.unwrap();
        assert!(latest.is_none(), "no running log should remain");
    }

    #[tokio::test]
    async fn stop_on_absent_task_returns_false() {
        let (executor, _store, _dir) = setup().await;
        assert!(!executor.stop("nope", false).await.unwrap());
    }
}
