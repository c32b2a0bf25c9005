use crate::config::TracingConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Installs a process-global subscriber honoring `RUST_LOG` if set, falling back to the
/// configured level. Call once, at the top of `main`, before any background task starts.
pub fn init_tracing(config: &TracingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let registry = Registry::default().with(filter);

    if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }

    tracing::info!(service = %config.service_name, "tracing initialized");
}
