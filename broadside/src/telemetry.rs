//! Logging and trace export.
//!
//! Console output through `tracing-subscriber` (compact or JSON), filtered by
//! `RUST_LOG` when set and by [`TracingConfig::log_level`] otherwise. With the
//! `otlp` feature, spans are also exported to an OTLP collector.
//!
//! ```rust,ignore
//! use broadside::telemetry::{init_tracing, TracingConfig};
//!
//! let _guard = init_tracing(TracingConfig::new("broadside").with_level("broadside=debug"));
//! ```

#[cfg(feature = "otlp")]
use opentelemetry::trace::TracerProvider as _;
#[cfg(feature = "otlp")]
use opentelemetry::KeyValue;
#[cfg(feature = "otlp")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "otlp")]
use opentelemetry_sdk::{
    runtime,
    trace::{Config, Sampler},
    Resource,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Tracing configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct TracingConfig {
    /// Service name attached to exported spans.
    pub service_name: String,
    /// OTLP endpoint (e.g., "http://localhost:4317"). None for console-only.
    pub otlp_endpoint: Option<String>,
    /// Log level filter (e.g., "info", "broadside=debug,tower_http=warn").
    pub log_level: String,
    /// Output logs as JSON.
    pub json_output: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "broadside".into(),
            otlp_endpoint: None,
            log_level: "info".into(),
            json_output: false,
        }
    }
}

impl TracingConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn with_otlp(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_json(mut self) -> Self {
        self.json_output = true;
        self
    }
}

/// Install the global subscriber. Call once at startup and keep the guard
/// alive until shutdown.
pub fn init_tracing(config: TracingConfig) -> Option<TracingGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    #[cfg(feature = "otlp")]
    let (otel_layer, guard) = match &config.otlp_endpoint {
        Some(endpoint) => match init_otlp_tracer(&config.service_name, endpoint) {
            Ok((provider, guard)) => {
                let layer = tracing_opentelemetry::layer().with_tracer(provider.tracer("broadside"));
                (Some(layer), Some(guard))
            }
            Err(e) => {
                eprintln!("OTLP export disabled: {}", e);
                (None, None)
            }
        },
        None => (None, None),
    };

    #[cfg(not(feature = "otlp"))]
    let (otel_layer, guard) = {
        if config.otlp_endpoint.is_some() {
            eprintln!("OTLP endpoint set but the otlp feature is not enabled; exporting nothing");
        }
        (None::<tracing_subscriber::layer::Identity>, None)
    };

    let registry = tracing_subscriber::registry().with(env_filter).with(otel_layer);

    if config.json_output {
        let fmt_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        registry.with(fmt_layer).init();
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact();
        registry.with(fmt_layer).init();
    }

    guard
}

#[cfg(feature = "otlp")]
fn init_otlp_tracer(
    service_name: &str,
    endpoint: &str,
) -> Result<(opentelemetry_sdk::trace::TracerProvider, TracingGuard), opentelemetry::trace::TraceError> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()?;

    let resource = Resource::new(vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION").to_string()),
    ]);

    let provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_config(Config::default().with_sampler(Sampler::AlwaysOn).with_resource(resource))
        .build();

    let guard = TracingGuard {
        provider: provider.clone(),
    };
    Ok((provider, guard))
}

/// Flushes and shuts down trace export on drop.
pub struct TracingGuard {
    #[cfg(feature = "otlp")]
    provider: opentelemetry_sdk::trace::TracerProvider,
}

#[cfg(feature = "otlp")]
impl Drop for TracingGuard {
    fn drop(&mut self) {
        if let Err(e) = self.provider.shutdown() {
            eprintln!("Error shutting down tracer provider: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = TracingConfig::new("test-service").with_level("debug").with_json();

        assert_eq!(config.service_name, "test-service");
        assert_eq!(config.log_level, "debug");
        assert!(config.json_output);
        assert!(config.otlp_endpoint.is_none());
    }

    #[test]
    fn test_config_with_otlp() {
        let config = TracingConfig::default()
            .with_otlp("http://localhost:4317")
            .with_level("info,broadside=debug");

        assert_eq!(config.service_name, "broadside");
        assert_eq!(config.otlp_endpoint.as_deref(), Some("http://localhost:4317"));
    }
}
