//! Telemetry configuration from environment variables.

use std::env;

/// Logging and metrics settings.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the router's metrics namespace and logs
    pub service_name: String,

    /// Log filter directive (`info`, `p2p_router=debug`, ...)
    pub log_level: String,

    /// Emit JSON lines instead of human-readable output
    pub json_logs: bool,

    /// Whether to install a console layer at all
    pub console_output: bool,

    /// Prometheus namespace prefix (`<namespace>_p2p_<metric>`)
    pub metrics_namespace: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "p2p-node".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            console_output: true,
            metrics_namespace: "node".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `P2P_SERVICE_NAME`: Service name (default: p2p-node)
    /// - `P2P_LOG_LEVEL` or `RUST_LOG`: Log filter (default: info)
    /// - `P2P_JSON_LOGS`: JSON output (default: false, true in containers)
    /// - `P2P_CONSOLE_OUTPUT`: Console output (default: true)
    /// - `P2P_METRICS_NAMESPACE`: Prometheus namespace (default: node)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let is_container =
            var("KUBERNETES_SERVICE_HOST").is_some() || var("DOCKER_CONTAINER").is_some();

        Self {
            service_name: var("P2P_SERVICE_NAME").unwrap_or(defaults.service_name),

            log_level: var("P2P_LOG_LEVEL")
                .or_else(|| var("RUST_LOG"))
                .unwrap_or(defaults.log_level),

            json_logs: var("P2P_JSON_LOGS")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(is_container),

            console_output: var("P2P_CONSOLE_OUTPUT")
                .map(|v| !v.eq_ignore_ascii_case("false") && v != "0")
                .unwrap_or(defaults.console_output),

            metrics_namespace: var("P2P_METRICS_NAMESPACE").unwrap_or(defaults.metrics_namespace),
        }
    }
}
