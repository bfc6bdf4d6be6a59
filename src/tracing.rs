//! Process-wide telemetry: structured logging, optional OTLP export, metrics
//!
//! `init_tracing` must run exactly once, before any session starts. It returns
//! a `Telemetry` handle that is passed explicitly to every controller; the core
//! never touches logging or metrics state through globals of its own.
//!
//! # Architecture
//!
//! ```text
//! aquarium ──fmt──► stderr (text or JSON lines)
//!          └─OTLP (gRPC, optional)──► OTel Collector ──► trace backend
//! ```

use std::sync::Arc;

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;
use crate::metrics::AgentMetrics;

/// Error type for telemetry initialisation
#[derive(Debug)]
pub enum TelemetryError {
    /// Metrics registry could not be built
    Metrics(prometheus::Error),
    /// The OTLP exporter could not be installed
    Exporter(String),
    /// A global subscriber was already installed
    AlreadyInitialized(String),
}

impl std::fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TelemetryError::Metrics(e) => write!(f, "Metrics registry error: {}", e),
            TelemetryError::Exporter(msg) => write!(f, "OTLP exporter error: {}", msg),
            TelemetryError::AlreadyInitialized(msg) => write!(f, "Telemetry already initialized: {}", msg),
        }
    }
}

impl std::error::Error for TelemetryError {}

impl From<prometheus::Error> for TelemetryError {
    fn from(e: prometheus::Error) -> Self {
        TelemetryError::Metrics(e)
    }
}

/// Handle to initialised telemetry state
#[derive(Debug, Clone)]
pub struct Telemetry {
    metrics: Arc<AgentMetrics>,
    otel_enabled: bool,
}

impl Telemetry {
    /// Telemetry with a fresh metrics registry and no subscriber
    ///
    /// Used by tests and embedders that install their own subscriber.
    pub fn detached() -> Result<Self, TelemetryError> {
        Ok(Self {
            metrics: Arc::new(AgentMetrics::new()?),
            otel_enabled: false,
        })
    }

    /// Metrics shared by all sessions
    pub fn metrics(&self) -> &Arc<AgentMetrics> {
        &self.metrics
    }

    /// Flush pending spans to the collector
    pub fn shutdown(&self) {
        if self.otel_enabled {
            opentelemetry::global::shutdown_tracer_provider();
            tracing::info!("OpenTelemetry tracing shutdown complete");
        }
    }
}

/// Initialize the tracing subsystem
///
/// This sets up:
/// - Console logging (text or JSON) filtered by `RUST_LOG` or the debug flag
/// - OpenTelemetry trace export when an OTLP endpoint is configured
/// - The metrics registry carried by the returned handle
///
/// # Example
/// ```ignore
/// let telemetry = init_tracing("aquarium", &LogConfig::default())?;
/// ```
pub fn init_tracing(service_name: &str, config: &LogConfig) -> Result<Telemetry, TelemetryError> {
    let otel_layer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint);

            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(exporter)
                .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(vec![
                    KeyValue::new("service.name", service_name.to_string()),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])))
                .install_batch(runtime::Tokio)
                .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };
    let otel_enabled = otel_layer.is_some();

    let default_directive = if config.debug {
        "info,aquarium=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let text_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
    });
    let json_layer = config
        .json
        .then(|| tracing_subscriber::fmt::layer().json().with_target(true));

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;

    tracing::info!(
        service = service_name,
        otlp = otel_enabled,
        "Telemetry initialized"
    );

    Ok(Telemetry {
        metrics: Arc::new(AgentMetrics::new()?),
        otel_enabled,
    })
}
