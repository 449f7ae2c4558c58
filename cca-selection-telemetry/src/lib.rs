use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const DEFAULT_LOG_LEVEL: &str =
    "info,cca_selection_backend=debug,hyper=info,h2=info,tokio_tungstenite=info,tungstenite=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_LEVEL.into())
}

/// Installs the process-wide subscriber. Calling it twice is a no-op.
pub fn setup_telemetry() {
    let stdout_log = tracing_subscriber::fmt::layer().with_target(true);

    let result = tracing_subscriber::registry()
        .with(stdout_log.with_filter(env_filter()))
        .try_init();

    if let Err(err) = result {
        tracing::debug!("telemetry already initialized: {err}");
    }
}

/// Compact variant for tests that writes through the test harness capture.
pub fn setup_test_telemetry() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_test_writer()
        .compact()
        .try_init();
}
