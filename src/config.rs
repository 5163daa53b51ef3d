//! Configuration loading and validation.

use crate::error::Result;
use anyhow::Context as _;
use std::path::PathBuf;

/// jobforge configuration. Covers the §3 Config entity plus the handful of
/// process-level settings (data dir, bind address) that only a standalone
/// binary needs.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the SQLite database and default scripts root.
    pub data_dir: PathBuf,

    /// Directory user scripts and subscriptions live under. All script
    /// paths and subscription save_dirs are resolved relative to this and
    /// must not escape it.
    pub scripts_root: PathBuf,

    /// IANA timezone name used to resolve "now" for cron scheduling and
    /// timestamp formatting. Defaults to the original system's zone.
    pub timezone: String,

    /// Command used to launch python scripts.
    pub python_command: String,

    /// Command used to launch nodejs scripts.
    pub nodejs_command: String,

    /// HTTP/HTTPS proxy host, used by probes and subscriptions when enabled.
    pub proxy_host: Option<String>,
    pub proxy_port: Option<u16>,
    pub proxy_enabled: bool,

    /// How long Log Cache entries survive past task completion.
    pub log_cache_retention: std::time::Duration,

    /// Bind address for the LiveLog Hub's WebSocket surface.
    pub bind_addr: String,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults matching the system this was distilled from.
    pub fn load() -> Result<Self> {
        let data_dir = std::env::var("JOBFORGE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .map(|d| d.join("jobforge"))
                    .unwrap_or_else(|| PathBuf::from("./data"))
            });

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

        let scripts_root = std::env::var("JOBFORGE_SCRIPTS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("scripts"));
        std::fs::create_dir_all(&scripts_root)
            .with_context(|| format!("failed to create scripts root: {}", scripts_root.display()))?;

        let timezone =
            std::env::var("JOBFORGE_TIMEZONE").unwrap_or_else(|_| "Asia/Shanghai".to_string());
        if timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(crate::error::ConfigError::Invalid(format!(
                "unknown timezone: {timezone}"
            ))
            .into());
        }

        let python_command =
            std::env::var("JOBFORGE_PYTHON_COMMAND").unwrap_or_else(|_| "python".to_string());
        let nodejs_command =
            std::env::var("JOBFORGE_NODEJS_COMMAND").unwrap_or_else(|_| "node".to_string());

        let proxy_host = std::env::var("JOBFORGE_PROXY_HOST").ok();
        let proxy_port = std::env::var("JOBFORGE_PROXY_PORT")
            .ok()
            .and_then(|v| v.parse().ok());
        let proxy_enabled = std::env::var("JOBFORGE_PROXY_ENABLED")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let log_cache_retention = std::time::Duration::from_secs(
            std::env::var("JOBFORGE_LOG_CACHE_RETENTION_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
        );

        let bind_addr =
            std::env::var("JOBFORGE_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8088".to_string());

        Ok(Self {
            data_dir,
            scripts_root,
            timezone,
            python_command,
            nodejs_command,
            proxy_host,
            proxy_port,
            proxy_enabled,
            log_cache_retention,
            bind_addr,
        })
    }

    /// Get the SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("jobforge.db")
    }

    /// Resolved timezone, used by the Clock.
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone
            .parse()
            .expect("timezone validated during load()")
    }
}

#[derive(Debug, Clone)]
struct ConfigSnapshot {
    python_command: String,
    nodejs_command: String,
    proxy_host: Option<String>,
    proxy_port: Option<u16>,
    proxy_enabled: bool,
    log_cache_retention: std::time::Duration,
}

/// The §3 Config entity: a string-keyed bag owned by the Store. Writes
/// happen from out-of-scope handlers; the core only reads, via
/// `Store::get_config_value`. Seeded from the env-loaded bootstrap `Config`
/// so a fresh `config` table still yields sane defaults, then kept current
/// by `refresh()`, called once at startup and again on an interval so a
/// write becomes observable without restarting the process.
pub struct LiveConfig {
    snapshot: std::sync::RwLock<ConfigSnapshot>,
}

impl LiveConfig {
    pub fn new(defaults: &Config) -> Self {
        Self {
            snapshot: std::sync::RwLock::new(ConfigSnapshot {
                python_command: defaults.python_command.clone(),
                nodejs_command: defaults.nodejs_command.clone(),
                proxy_host: defaults.proxy_host.clone(),
                proxy_port: defaults.proxy_port,
                proxy_enabled: defaults.proxy_enabled,
                log_cache_retention: defaults.log_cache_retention,
            }),
        }
    }

    /// Re-read every Store-owned key. A key with no row (or one that fails
    /// to parse) leaves the current value in place rather than resetting it.
    pub async fn refresh(&self, store: &dyn crate::store::Store) -> Result<()> {
        let python_command = store.get_config_value("python_command").await?;
        let nodejs_command = store.get_config_value("nodejs_command").await?;
        let proxy_host = store.get_config_value("proxy_host").await?;
        let proxy_port = store.get_config_value("proxy_port").await?;
        let proxy_enabled = store.get_config_value("proxy_enabled").await?;
        let log_cache_retention = store.get_config_value("log_cache_retention_secs").await?;

        let mut snapshot = self
            .snapshot
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(v) = python_command.filter(|v| !v.is_empty()) {
            snapshot.python_command = v;
        }
        if let Some(v) = nodejs_command.filter(|v| !v.is_empty()) {
            snapshot.nodejs_command = v;
        }
        if let Some(v) = proxy_host {
            snapshot.proxy_host = Some(v);
        }
        if let Some(port) = proxy_port.and_then(|v| v.parse().ok()) {
            snapshot.proxy_port = Some(port);
        }
        if let Some(enabled) = proxy_enabled {
            snapshot.proxy_enabled = enabled == "1" || enabled.eq_ignore_ascii_case("true");
        }
        if let Some(secs) = log_cache_retention.and_then(|v| v.parse().ok()) {
            snapshot.log_cache_retention = std::time::Duration::from_secs(secs);
        }
        Ok(())
    }

    pub fn python_command(&self) -> String {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .python_command
            .clone()
    }

    pub fn nodejs_command(&self) -> String {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .nodejs_command
            .clone()
    }

    /// (host, port, enabled).
    pub fn proxy(&self) -> (Option<String>, Option<u16>, bool) {
        let s = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
        (s.proxy_host.clone(), s.proxy_port, s.proxy_enabled)
    }

    pub fn log_cache_retention(&self) -> std::time::Duration {
        self.snapshot.read().unwrap_or_else(|e| e.into_inner()).log_cache_retention
    }
}
