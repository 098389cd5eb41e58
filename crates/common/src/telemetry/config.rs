use opentelemetry_sdk::{logs::LoggerProvider, trace::TracerProvider as SdkTracerProvider};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;

/// Configuration for telemetry initialization
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub otel_endpoint: String,
    pub otel_enabled: bool,
    pub log_level: String,
    /// Directory for the JSON log file; stdout only when unset
    pub log_dir: Option<PathBuf>,
    pub log_file_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "iot-bridge".to_string(),
            otel_endpoint: "http://localhost:4317".to_string(),
            otel_enabled: false,
            log_level: "info".to_string(),
            log_dir: None,
            log_file_name: "logfile.log".to_string(),
        }
    }
}

/// Handles returned from telemetry initialization for proper shutdown
#[derive(Default)]
pub struct TelemetryProviders {
    pub otel: Option<OtelProviders>,
    /// Flushes the log file writer when dropped
    pub file_guard: Option<WorkerGuard>,
}

pub struct OtelProviders {
    pub tracer_provider: SdkTracerProvider,
    pub logger_provider: LoggerProvider,
}
