use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::Parser;
use timetable_reconciler::{
    AppState, build_app,
    config::ReconcilerConfig,
    db::DbPool,
    jobs::{OrphanTimetableReconciler, ReconciliationScheduler},
    observability,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Config file used when `--config` is not given and the file exists.
const DEFAULT_CONFIG_FILE: &str = "reconciler.toml";

/// CLI arguments for the timetable reconciler
#[derive(Parser, Debug)]
#[command(version, about = "Orphaned timetable reconciler", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./reconciler.toml if it exists,
    /// otherwise built-in defaults)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the host process: daily schedule plus health and metrics (default)
    Serve,
    /// Run one reconciliation pass and exit
    ///
    /// Exits 0 on success and 1 on any failure.
    Reconcile {
        /// Print the full result as JSON instead of the deleted count
        #[arg(long)]
        json: bool,
    },
    /// Run database migrations and exit
    ///
    /// Useful for Kubernetes init containers or CI/CD pipelines.
    Migrate,
    /// Export the JSON schema for the configuration file
    Schema {
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Reconcile { json }) => {
            run_reconcile(args.config.as_deref(), json).await;
        }
        Some(Command::Migrate) => {
            run_migrate(args.config.as_deref()).await;
        }
        Some(Command::Schema { output }) => {
            #[cfg(feature = "json-schema")]
            run_schema_export(output);
            #[cfg(not(feature = "json-schema"))]
            {
                let _ = output;
                eprintln!("Error: JSON schema export requires the 'json-schema' feature");
                std::process::exit(1);
            }
        }
        Some(Command::Serve) | None => {
            run_server(args.config.as_deref()).await;
        }
    }
}

/// Pick the config file: the explicit path, else the default file if present.
fn resolve_config_path(explicit_path: Option<&str>) -> Option<PathBuf> {
    match explicit_path {
        Some(path) => Some(PathBuf::from(path)),
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            default.exists().then(|| default.to_path_buf())
        }
    }
}

/// Load configuration or exit with status 1.
fn load_config_or_exit(explicit_path: Option<&str>) -> (ReconcilerConfig, Option<PathBuf>) {
    let config_path = resolve_config_path(explicit_path);

    let result = match &config_path {
        Some(path) => ReconcilerConfig::from_file(path),
        None => ReconcilerConfig::from_str(""),
    };

    match result {
        Ok(config) => (config, config_path),
        Err(e) => {
            match &config_path {
                Some(path) => eprintln!("Failed to load config from {}: {}", path.display(), e),
                None => eprintln!("Failed to load default config: {}", e),
            }
            std::process::exit(1);
        }
    }
}

fn init_tracing_or_exit(config: &ReconcilerConfig) {
    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn connect_or_exit(config: &ReconcilerConfig) -> DbPool {
    if config.database.is_none() {
        eprintln!("Error: Database is not configured.");
        std::process::exit(1);
    }

    match DbPool::from_config(&config.database).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            eprintln!("Error: Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    }
}

/// Export the config JSON schema to a file or stdout
#[cfg(feature = "json-schema")]
fn run_schema_export(output: Option<String>) {
    let content = match ReconcilerConfig::json_schema_string() {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error: Failed to render schema: {}", e);
            std::process::exit(1);
        }
    };

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &content) {
                eprintln!("Error: Failed to write to {}: {}", path, e);
                std::process::exit(1);
            }
            eprintln!("Config JSON schema written to {}", path);
        }
        None => {
            println!("{}", content);
        }
    }
}

/// One-off reconciliation. Prints the deleted count (or JSON) on stdout.
async fn run_reconcile(explicit_config_path: Option<&str>, json: bool) {
    let (config, config_path) = load_config_or_exit(explicit_config_path);
    init_tracing_or_exit(&config);

    tracing::info!(
        config_file = ?config_path.as_ref().map(|p| p.display().to_string()),
        "Running orphaned timetable reconciliation"
    );

    let pool = connect_or_exit(&config).await;
    if config.database.run_migrations()
        && let Err(e) = pool.run_migrations().await
    {
        tracing::error!(error = %e, "Database migrations failed");
        eprintln!("Error: Database migrations failed: {}", e);
        std::process::exit(1);
    }

    let reconciler = OrphanTimetableReconciler::from_pool(&pool, config.reconciliation.timeout());
    let outcome = reconciler.reconcile().await;
    pool.close().await;

    match outcome {
        Ok(result) => {
            if json {
                match serde_json::to_string(&result) {
                    Ok(body) => println!("{}", body),
                    Err(e) => {
                        eprintln!("Error: Failed to serialize result: {}", e);
                        std::process::exit(1);
                    }
                }
            } else {
                println!("{}", result.deleted_count);
            }
            std::process::exit(0);
        }
        Err(e) => {
            tracing::error!(error = %e, "Orphaned timetable reconciliation failed");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_migrate(explicit_config_path: Option<&str>) {
    let (config, config_path) = load_config_or_exit(explicit_config_path);
    init_tracing_or_exit(&config);

    tracing::info!(
        config_file = ?config_path.as_ref().map(|p| p.display().to_string()),
        "Running database migrations"
    );

    let pool = connect_or_exit(&config).await;
    match pool.run_migrations().await {
        Ok(()) => {
            tracing::info!("Database migrations completed successfully");
            std::process::exit(0);
        }
        Err(e) => {
            tracing::error!(error = %e, "Database migrations failed");
            eprintln!("Error: Database migrations failed: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_server(explicit_config_path: Option<&str>) {
    let (config, config_path) = load_config_or_exit(explicit_config_path);
    init_tracing_or_exit(&config);

    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics: {e}");
    }

    tracing::info!(
        config_file = ?config_path.as_ref().map(|p| p.display().to_string()),
        "Starting timetable reconciler"
    );

    let state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize application state");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let task_tracker = state.task_tracker.clone();
    let shutdown = CancellationToken::new();

    match state.scheduler.clone() {
        Some(scheduler) => {
            start_reconciliation(
                scheduler,
                config.reconciliation.run_on_startup,
                &task_tracker,
                &shutdown,
            );
        }
        None => {
            tracing::warn!("No database configured, reconciliation will never run");
        }
    }

    let shutdown_timeout = config.server.shutdown_timeout();

    if !config.server.enabled {
        tracing::info!("HTTP listener disabled");
        shutdown_signal(task_tracker, shutdown, shutdown_timeout).await;
        return;
    }

    let app = build_app(&config, state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, address = %bind_addr, "Failed to bind to address");
            eprintln!("Error: Failed to bind to {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Health and metrics listening on http://{}", bind_addr);

    // Graceful shutdown: wait for SIGINT/SIGTERM, then wait for in-flight runs
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(task_tracker, shutdown, shutdown_timeout))
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

/// Optionally fire once now, then hand the scheduler its own tracked task.
fn start_reconciliation(
    scheduler: Arc<ReconciliationScheduler>,
    run_on_startup: bool,
    task_tracker: &TaskTracker,
    shutdown: &CancellationToken,
) {
    if run_on_startup {
        tracing::info!("Running orphaned timetable reconciliation on startup");
        scheduler.trigger(task_tracker);
    }

    // The schedule loop itself is not tracked; it stops on cancellation
    tokio::spawn(scheduler.run(task_tracker.clone(), shutdown.clone()));
}

async fn shutdown_signal(
    task_tracker: TaskTracker,
    shutdown: CancellationToken,
    timeout: Duration,
) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, waiting for in-flight reconciliation to complete...");

    // Stop scheduling and refuse new tracked tasks
    shutdown.cancel();
    task_tracker.close();

    match tokio::time::timeout(timeout, task_tracker.wait()).await {
        Ok(()) => tracing::info!("All background tasks completed"),
        Err(_) => {
            tracing::warn!("Timeout waiting for background tasks, some may not have completed")
        }
    }

    tracing::info!("Shutdown complete");
}
