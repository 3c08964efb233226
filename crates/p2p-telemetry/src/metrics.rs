//! Process-wide Prometheus registry and text export.
//!
//! All router metrics follow the naming convention: `<namespace>_p2p_<metric>`

use lazy_static::lazy_static;
use p2p_router::RouterMetrics;
use prometheus::{Encoder, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();
}

/// Register a router's collectors in the global registry.
///
/// Fails if a router with the same namespace is already registered.
pub fn register_router_metrics(namespace: &str) -> Result<RouterMetrics, TelemetryError> {
    RouterMetrics::prometheus(namespace, &REGISTRY)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Encode all metrics of the global registry as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    encode_registry(&REGISTRY)
}

/// Encode a caller-owned registry as Prometheus text format.
pub fn encode_registry(registry: &Registry) -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
