use chrono::Utc;
use clap::{Parser, Subcommand};
use latency_telemetry_lib::error::AppError;
use latency_telemetry_lib::latency::consumer::run_stream_consumer;
use latency_telemetry_lib::latency::history::compute_statistics;
use latency_telemetry_lib::latency::producer::SyntheticLatencyProducer;
use latency_telemetry_lib::latency::report::{generate_report, render, report_file_name, ReportFormat};
use latency_telemetry_lib::latency::types::{ConsumerConfig, StreamConfigArgs};
use latency_telemetry_lib::observability::init_tracing;
use latency_telemetry_lib::state::{AppState, DashboardContext};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(version, about = "Streaming exchange latency telemetry")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the latency SSE stream plus health and info endpoints
    Serve {
        #[arg(long, env = "LATENCY_BIND_ADDR", default_value = "127.0.0.1:8080")]
        bind: String,

        /// Frame interval in milliseconds
        #[arg(long, env = "LATENCY_STREAM_INTERVAL_MS")]
        interval_ms: Option<u64>,

        /// Heartbeat interval in milliseconds
        #[arg(long, env = "LATENCY_HEARTBEAT_INTERVAL_MS")]
        heartbeat_ms: Option<u64>,
    },
    /// Subscribe to a running stream and keep the live feed and history
    Watch {
        #[arg(
            long,
            env = "LATENCY_STREAM_URL",
            default_value = "http://127.0.0.1:8080/api/latency/stream"
        )]
        url: String,

        #[arg(long, env = "LATENCY_RECONNECT_DELAY_MS")]
        reconnect_ms: Option<u64>,

        /// Stop after this many seconds instead of waiting for ctrl-c
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Write a report on exit (.json or .csv, or a directory)
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let _guard = init_tracing("latency_telemetry_lib");

    match cli.command {
        Command::Serve {
            bind,
            interval_ms,
            heartbeat_ms,
        } => serve(bind, interval_ms, heartbeat_ms).await,
        Command::Watch {
            url,
            reconnect_ms,
            duration_secs,
            report,
        } => watch(url, reconnect_ms, duration_secs, report).await,
    }
}

async fn serve(
    bind: String,
    interval_ms: Option<u64>,
    heartbeat_ms: Option<u64>,
) -> Result<(), AppError> {
    let stream_config = StreamConfigArgs {
        poll_interval_ms: interval_ms,
        heartbeat_interval_ms: heartbeat_ms,
    }
    .normalize()?;

    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState::new(
        stream_config,
        Arc::new(SyntheticLatencyProducer::default()),
        shutdown.clone(),
    ));

    tokio::spawn(cancel_on_ctrl_c(shutdown));

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    latency_telemetry_lib::serve(listener, state).await
}

async fn watch(
    url: String,
    reconnect_ms: Option<u64>,
    duration_secs: Option<u64>,
    report: Option<PathBuf>,
) -> Result<(), AppError> {
    let config = ConsumerConfig::new(url, reconnect_ms)?;
    let report_target = report.map(|path| resolve_report_path(&path)).transpose()?;
    let context = DashboardContext::default();
    let cancel_token = CancellationToken::new();

    let consumer = tokio::spawn(run_stream_consumer(
        config,
        context.clone(),
        cancel_token.clone(),
    ));

    match duration_secs {
        Some(seconds) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
                _ = ctrl_c_received(tokio::signal::ctrl_c()) => {}
            }
        }
        None => {
            ctrl_c_received(tokio::signal::ctrl_c()).await;
        }
    }
    cancel_token.cancel();

    match consumer.await {
        Ok(result) => result?,
        Err(error) => tracing::error!(%error, "stream consumer task failed"),
    }

    let feed = context.feed.read().snapshot();
    let history = context.history.read().points().to_vec();
    let stats = compute_statistics(&history);
    tracing::info!(
        status = ?feed.status,
        markers = feed.markers.len(),
        history_points = history.len(),
        min_ms = stats.min,
        max_ms = stats.max,
        avg_ms = stats.avg,
        "watch finished"
    );

    if let Some((path, format)) = report_target {
        let document = render(&generate_report(&feed, &history, Utc::now()), format)?;
        std::fs::write(&path, document)?;
        tracing::info!(path = %path.display(), "latency report written");
    }

    Ok(())
}

fn resolve_report_path(path: &Path) -> Result<(PathBuf, ReportFormat), AppError> {
    if path.is_dir() {
        let format = ReportFormat::Json;
        return Ok((path.join(report_file_name(Utc::now(), format)), format));
    }

    let format = ReportFormat::from_path(path)?;
    Ok((path.to_path_buf(), format))
}

async fn cancel_on_ctrl_c(shutdown: CancellationToken) {
    if ctrl_c_received(tokio::signal::ctrl_c()).await {
        tracing::info!("shutdown requested");
        shutdown.cancel();
    }
}

/// Awaits a ctrl-c listener. Returns false, after logging, when the handler
/// could not be installed.
async fn ctrl_c_received(signal: impl Future<Output = std::io::Result<()>>) -> bool {
    match signal.await {
        Ok(()) => true,
        Err(error) => {
            tracing::error!(%error, "failed to listen for ctrl-c");
            false
        }
    }
}
