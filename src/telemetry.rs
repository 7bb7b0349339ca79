use crate::config::MetricsConfig;
use crate::error::TelemetryError;
use opentelemetry::global;
use opentelemetry_sdk::metrics::MeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber. `RUST_LOG` overrides the flag-derived level.
pub fn init_tracing(verbose: bool, debug: bool) {
    let level = if debug {
        "trace"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Owns the Prometheus registry the OpenTelemetry meter provider exports
/// into.
pub struct TelemetryService {
    registry: Registry,
    provider: Option<MeterProvider>,
}

impl TelemetryService {
    pub fn new(config: &MetricsConfig) -> Result<Self, TelemetryError> {
        let registry = Registry::new();
        if !config.enabled {
            info!("Metrics collection disabled");
            return Ok(Self {
                registry,
                provider: None,
            });
        }

        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
        let provider = MeterProvider::builder().with_reader(exporter).build();
        global::set_meter_provider(provider.clone());

        info!("OpenTelemetry metrics exported to Prometheus registry");
        Ok(Self {
            registry,
            provider: Some(provider),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// Current metrics in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, TelemetryError> {
        render(&self.registry)
    }

    pub fn shutdown(&self) -> Result<(), TelemetryError> {
        match &self.provider {
            Some(provider) => provider
                .shutdown()
                .map_err(|e| TelemetryError::ProviderSetup(e.to_string())),
            None => Ok(()),
        }
    }
}

pub fn render(registry: &Registry) -> Result<String, TelemetryError> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_metrics() {
        let service = TelemetryService::new(&MetricsConfig::default()).unwrap();
        assert!(!service.is_enabled());
        assert_eq!(service.render().unwrap(), "");
        assert!(service.shutdown().is_ok());
    }

    #[test]
    fn test_enabled_metrics_export_into_registry() {
        let config = MetricsConfig {
            enabled: true,
            ..MetricsConfig::default()
        };
        let service = TelemetryService::new(&config).unwrap();
        assert!(service.is_enabled());

        let meter = global::meter("telemetry-test");
        let counter = meter.u64_counter("exported_queries").init();
        counter.add(3, &[]);

        assert!(service.render().unwrap().contains("exported_queries"));
        assert!(service.shutdown().is_ok());
    }
}
