use crate::latency::types::LatencySample;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub fn init_tracing(service_name: &str) -> WorkerGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{service_name}=info,info")));

    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_target(true)
        .try_init();

    guard
}

pub fn log_latency_event(service: &'static str, sample: &LatencySample, message: &'static str) {
    tracing::info!(
        service,
        exchange = %sample.exchange,
        provider = %sample.provider,
        latency_ms = sample.latency_ms,
        region = %sample.region,
        "{message}"
    );
}
