//! Observability infrastructure: tracing and metrics.
//!
//! Call [`init`] once at startup, before the directory is created, so the
//! pool and registry metrics are captured from the first allocation.

use crate::config::TunnelConfig;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod metrics;

/// Environment variable overriding the configured log filter.
pub const LOG_ENV: &str = "INTERCEPT_LOG";

/// Build the log filter: `INTERCEPT_LOG` if set, else the configured level.
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize the global observability infrastructure.
///
/// Installs the tracing subscriber and, when `metrics_port` is configured,
/// the Prometheus exporter. Must be called from within a Tokio runtime when
/// the exporter is enabled.
///
/// # Errors
/// Fails if a global subscriber or metrics recorder is already installed.
pub fn init(config: &TunnelConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(env_filter(&config.log_level))
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true))
        .try_init()?;

    match config.metrics_port {
        Some(port) => {
            PrometheusBuilder::new().with_http_listener(([0, 0, 0, 0], port)).install()?;
            metrics::register_core_metrics();
            tracing::info!("Observability initialized (metrics on port {})", port);
        }
        None => {
            tracing::info!("Observability initialized (metrics exporter disabled)");
        }
    }

    Ok(())
}

