//! jobforge CLI entry point: the composition root that wires Clock, Store,
//! Notifier, Hub, Log Cache, Cron Engine, the three runners, the
//! Dispatcher, and the minimal HTTP surface together.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use jobforge::api::{self, ApiState};
use jobforge::clock::{Clock, TzClock};
use jobforge::config::{Config, LiveConfig};
use jobforge::cron_engine::CronEngine;
use jobforge::dispatcher::Dispatcher;
use jobforge::executor::Executor;
use jobforge::hub::Hub;
use jobforge::log_cache::LogCache;
use jobforge::notifier::{LoggingNotifier, Notifier};
use jobforge::probe::ProbeRunner;
use jobforge::store::{SqliteStore, Store};
use jobforge::subscription::SubscriptionRunner;

#[derive(Parser)]
#[command(name = "jobforge", version)]
#[command(about = "Cron-driven execution platform for scripts, HTTP probes, and git subscriptions")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Start the scheduler and HTTP surface in the foreground.
    Start,
    /// Trigger one task immediately and exit, without starting the scheduler.
    RunNow {
        /// Task id to run.
        task_id: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(async move {
        match cli.command.unwrap_or(Command::Start) {
            Command::Start => run().await,
            Command::RunNow { task_id } => run_now(&task_id).await,
        }
    })
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    use sqlx::sqlite::SqlitePoolOptions;
    let sqlite_path = config.sqlite_path();
    let url = format!("sqlite://{}?mode=rwc", sqlite_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .with_context(|| format!("failed to open database at {}", sqlite_path.display()))?;
    let store = SqliteStore::new(pool);
    store.initialize().await.context("failed to initialize schema")?;
    Ok(Arc::new(store))
}

/// How Store-owned `Config` keys (python/nodejs command, proxy, cache
/// retention) are kept current without a restart — timezone is resolved
/// once at startup instead, since hot-swapping it would mean re-registering
/// every live Cron Engine timer.
const CONFIG_REFRESH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

async fn run() -> anyhow::Result<()> {
    let config = Arc::new(Config::load().context("failed to load configuration")?);
    tracing::info!(data_dir = %config.data_dir.display(), "starting jobforge");

    let store = build_store(&config).await?;

    let live_config = Arc::new(LiveConfig::new(&config));
    live_config
        .refresh(&*store)
        .await
        .context("failed to load Store-backed configuration")?;
    let tz = store
        .get_config_value("timezone")
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| config.tz());

    let clock: Arc<dyn Clock> = Arc::new(TzClock::new(tz));
    let notifier: Arc<dyn Notifier> = Arc::new(LoggingNotifier);
    let hub = Arc::new(Hub::new());
    let log_cache = Arc::new(LogCache::new());
    let cron = Arc::new(CronEngine::new(tz));

    {
        let live_config = Arc::clone(&live_config);
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CONFIG_REFRESH_INTERVAL);
            interval.tick().await; // first tick fires immediately; we already refreshed above
            loop {
                interval.tick().await;
                if let Err(e) = live_config.refresh(&*store).await {
                    tracing::warn!(error = %e, "failed to refresh Store-backed configuration");
                }
            }
        });
    }

    let executor = Arc::new(Executor::new(
        Arc::clone(&store),
        Arc::clone(&notifier),
        Arc::clone(&hub),
        Arc::clone(&log_cache),
        Arc::clone(&clock),
        Arc::clone(&config),
        Arc::clone(&live_config),
    ));
    let probe = Arc::new(ProbeRunner::new(
        Arc::clone(&store),
        Arc::clone(&notifier),
        Arc::clone(&clock),
    ));
    let subscription = Arc::new(SubscriptionRunner::new(
        Arc::clone(&store),
        Arc::clone(&notifier),
        Arc::clone(&hub),
        Arc::clone(&clock),
        Arc::clone(&config),
        Arc::clone(&live_config),
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&store),
        Arc::clone(&cron),
        Arc::clone(&executor),
        Arc::clone(&probe),
        Arc::clone(&subscription),
    ));
    dispatcher.start().await.context("failed to hydrate dispatcher from store")?;

    let bind: SocketAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.bind_addr))?;
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let api_state = Arc::new(ApiState {
        hub: Arc::clone(&hub),
        log_cache: Arc::clone(&log_cache),
    });
    let http_handle = api::start_http_server(bind, api_state, shutdown_rx)
        .await
        .context("failed to start HTTP server")?;

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    dispatcher.shutdown().await;
    let _ = shutdown_tx.send(true);
    let _ = http_handle.await;

    Ok(())
}

/// `jobforge run-now <task_id>`: fire one task outside the scheduler loop,
/// without hydrating the Dispatcher or starting the HTTP surface.
async fn run_now(task_id: &str) -> anyhow::Result<()> {
    let config = Arc::new(Config::load().context("failed to load configuration")?);
    let store = build_store(&config).await?;

    let live_config = Arc::new(LiveConfig::new(&config));
    live_config
        .refresh(&*store)
        .await
        .context("failed to load Store-backed configuration")?;
    let tz = store
        .get_config_value("timezone")
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| config.tz());

    let clock: Arc<dyn Clock> = Arc::new(TzClock::new(tz));
    let notifier: Arc<dyn Notifier> = Arc::new(LoggingNotifier);
    let hub = Arc::new(Hub::new());
    let log_cache = Arc::new(LogCache::new());

    let executor = Executor::new(store, notifier, hub, log_cache, clock, config, live_config);
    executor.run(task_id).await.context("task run failed")?;
    Ok(())
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    let fmt_layer = tracing_subscriber::fmt::layer().with_ansi(false).compact();

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}
