use anyhow::Context;
use clap::Parser;
use console::Term;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use cyperf_monitor::api::{HttpBackend, MonitorBackend};
use cyperf_monitor::config::{CliArgs, Command, MonitorConfig, RunArgs};
use cyperf_monitor::handoff::{self, LastResult};
use cyperf_monitor::logs::{self, LogLevel, LogSource};
use cyperf_monitor::model::{short_id, Role};
use cyperf_monitor::run_config::{Countdown, RunOutcome, TestConfig};
use cyperf_monitor::session::{self, MonitorSession};
use cyperf_monitor::state::AppState;
use cyperf_monitor::server;

const CHART_WIDTH: usize = 40;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let config = MonitorConfig::from_args(&args);
    let _log_guard = init_tracing(&config);
    console::set_colors_enabled(config.use_color);

    info!("Starting cyperf-monitor v{}", env!("CARGO_PKG_VERSION"));
    info!("Backend: {}", config.api_url);

    let backend: Arc<dyn MonitorBackend> = Arc::new(
        HttpBackend::new(&config.api_url)
            .with_context(|| format!("invalid API URL {}", config.api_url))?,
    );

    match args.command {
        Command::Active => list_active(backend.as_ref()).await,
        Command::Watch { test_id, serve } => watch(backend, &config, test_id, serve).await,
        Command::Run(run) => run_test(backend.as_ref(), &config, &run).await,
        Command::Cancel { test_id } => {
            backend.cancel_test(&test_id).await?;
            println!("Cancel requested for test {}", short_id(&test_id));
            Ok(())
        }
        Command::Logs {
            role,
            test_id,
            clear,
        } => show_logs(backend.as_ref(), &config, role.map(Role::from), test_id, clear).await,
        Command::Report => report(&config),
        Command::Export { test_id, out } => export(backend.as_ref(), &test_id, out).await,
    }
}

/// Stderr logging, plus a daily rolling file when `--log-dir` is set.
fn init_tracing(config: &MonitorConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cyperf_monitor=info,tower_http=info".into());
    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.use_color);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "cyperf-monitor.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

async fn list_active(backend: &dyn MonitorBackend) -> anyhow::Result<()> {
    let tests = backend.active_tests().await?;
    if tests.is_empty() {
        println!("No active tests");
        return Ok(());
    }
    println!("{:<10} {:<12} {:<16} {:>8}", "ID", "TYPE", "STATUS", "PROGRESS");
    for test in &tests {
        println!(
            "{:<10} {:<12} {:<16} {:>7.0}%",
            test.short_id(),
            test.test_type().map(|t| t.label()).unwrap_or("-"),
            test.status,
            test.progress_percentage
        );
    }
    Ok(())
}

async fn watch(
    backend: Arc<dyn MonitorBackend>,
    config: &MonitorConfig,
    test_id: Option<String>,
    serve: Option<u16>,
) -> anyhow::Result<()> {
    let session = MonitorSession::new(backend, config.poll_interval);
    let event_loop = session::spawn_event_loop(session.clone());
    let mut views = session.subscribe_views();

    let follow_one = test_id.is_some();
    let refresher = match test_id {
        Some(id) => {
            session.select(&id).await;
            None
        }
        None => Some(session::spawn_active_refresh(session.clone())),
    };

    let server_task = match serve {
        Some(port) => {
            let state = Arc::new(AppState::new(session.clone(), config.api_url.clone()));
            let router = server::build_router(state);
            let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
                .await
                .with_context(|| format!("failed to bind dashboard feed on port {}", port))?;
            info!("Dashboard feed listening on http://127.0.0.1:{}", port);
            Some(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, router).await {
                    error!("Dashboard feed stopped: {}", e);
                }
            }))
        }
        None => None,
    };

    let term = Term::stdout();
    print!("{}", session.view().await.to_text(config.use_color, CHART_WIDTH));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            received = views.recv() => match received {
                Ok(view) => {
                    let _ = term.clear_screen();
                    print!("{}", view.to_text(config.use_color, CHART_WIDTH));
                    let done = view.finished || view.connection_lost.is_some();
                    if done && follow_one && server_task.is_none() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    session
        .logs
        .emit(LogSource::Monitor, LogLevel::Info, "Monitor shutting down")
        .await;
    session.shutdown().await;
    event_loop.abort();
    if let Some(task) = refresher {
        task.abort();
    }
    if let Some(task) = server_task {
        task.abort();
    }
    Ok(())
}

async fn run_test(
    backend: &dyn MonitorBackend,
    config: &MonitorConfig,
    args: &RunArgs,
) -> anyhow::Result<()> {
    let test_config = TestConfig::from_args(args);
    let warnings = test_config.validate().into_result()?;
    for warning in &warnings {
        warn!("{}", warning);
    }
    if args.validate_only {
        println!("Configuration is valid ({} warnings)", warnings.len());
        return Ok(());
    }

    info!(
        "Running {} test {} -> {} for {}s",
        test_config.test_type, test_config.client_ip, test_config.server_ip, test_config.duration
    );
    let countdown = Countdown::start(test_config.duration);
    let response = match backend.run_test_simple(&test_config).await {
        Ok(response) => {
            countdown.finish("Test completed successfully!");
            response
        }
        Err(e) => {
            countdown.finish("Test failed");
            return Err(anyhow::Error::new(e).context("Test execution failed"));
        }
    };

    let result = LastResult::new(test_config.test_type, test_config.duration, response);
    match handoff::save_last_result(&config.state_dir, &result) {
        Ok(path) => info!("Saved result to {:?}", path),
        Err(e) => warn!("Could not save result for later reports: {}", e),
    }
    print_result(&result, config.use_color);
    Ok(())
}

fn report(config: &MonitorConfig) -> anyhow::Result<()> {
    let result = handoff::load_last_result(&config.state_dir)
        .context("no previous test result; run a test first")?;
    println!("Result saved at {}", result.saved_at);
    print_result(&result, config.use_color);
    Ok(())
}

fn print_result(result: &LastResult, use_color: bool) {
    let outcome = RunOutcome::from_response(&result.response, Some(result.test_type));
    println!("Duration: {} seconds", result.duration);
    print!("{}", outcome.to_text(use_color));
}

async fn show_logs(
    backend: &dyn MonitorBackend,
    config: &MonitorConfig,
    role: Option<Role>,
    test_id: Option<String>,
    clear: bool,
) -> anyhow::Result<()> {
    if clear {
        logs::clear_logs(backend).await?;
        println!("Logs cleared");
        return Ok(());
    }

    match (role, test_id) {
        (Some(role), Some(id)) => {
            let parsed = logs::fetch_role_log(backend, role, &id).await?;
            print!("{}", parsed.to_text(config.use_color));
        }
        (Some(_), None) | (None, Some(_)) => {
            anyhow::bail!("--role and --test must be given together");
        }
        (None, None) => {
            let entries = logs::fetch_logs(backend).await?;
            let grouped = logs::group_backend_logs(&entries);
            print!("{}", grouped.to_text(config.use_color));
        }
    }
    Ok(())
}

async fn export(backend: &dyn MonitorBackend, test_id: &str, out: Option<PathBuf>) -> anyhow::Result<()> {
    let stats = backend.current_stats(test_id).await?;
    let history = stats
        .raw
        .pointer("/chart_data/stats_history")
        .cloned()
        .unwrap_or_else(|| {
            json!({
                "server": stats.update.server,
                "client": stats.update.client,
            })
        });
    let current = stats.raw.get("current_stats").cloned().unwrap_or(Value::Null);

    let target = out.unwrap_or_else(|| PathBuf::from(handoff::default_export_name(test_id)));
    let path = handoff::export_stats(&target, test_id, &current, &history)?;
    println!("Exported stats to {}", path.display());
    Ok(())
}
