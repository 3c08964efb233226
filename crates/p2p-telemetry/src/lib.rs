//! # P2P Telemetry
//!
//! Logging and metrics plumbing for nodes embedding the p2p router.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` fmt or JSON layer behind an `EnvFilter`
//! - **Metrics**: process-wide Prometheus registry and text export
//!
//! ## Usage
//!
//! ```rust,ignore
//! use p2p_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! let metrics = init_telemetry(&config)?;
//! let router = Router::new(router_config, transport, metrics)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `P2P_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter |
//! | `P2P_JSON_LOGS` | `false` (`true` in containers) | JSON log lines |
//! | `P2P_METRICS_NAMESPACE` | `node` | Prometheus namespace |
//! | `P2P_SERVICE_NAME` | `p2p-node` | Service name in logs |

mod config;
mod logging;
mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{encode_metrics, encode_registry, register_router_metrics, REGISTRY};

use p2p_router::RouterMetrics;
use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Install logging and register router metrics in the global registry.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<RouterMetrics, TelemetryError> {
    let metrics = register_router_metrics(&config.metrics_namespace)?;
    init_logging(config)?;
    Ok(metrics)
}
