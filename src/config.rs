use crate::cli::Cli;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Process configuration: the backend list of the replica set plus the
/// metrics endpoint and keyspace reporter settings.
///
/// Can be loaded from files, env vars, or CLI args with precedence order:
/// CLI > File > Environment > Defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub redis: Vec<BackendConfig>,
    pub metrics: MetricsConfig,
    pub reporter: ReporterConfig,
    #[serde(skip)]
    pub identity: HostIdentity,
}

/// One backend descriptor. Durations are (de)serialised as milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub name: String,
    pub hosts: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Defaults to the machine's host name.
    pub client_name: Option<String>,
    /// TTL attached to cached reads; zero disables caching of results.
    #[serde(with = "duration_ms")]
    pub ttl: Duration,
    pub always_pipelining: bool,
    pub pipeline_multiplex: usize,
    /// Name of the sentinel-monitored primary; `hosts` are then sentinels.
    pub sentinel_primary: Option<String>,
    pub disable_cache: bool,
    pub replica_only: bool,
    #[serde(with = "duration_ms")]
    pub dial_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub read_timeout: Duration,
    pub disable_retry: bool,
    pub force_single_client: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            name: "redis".to_string(),
            hosts: Vec::new(),
            username: None,
            password: None,
            client_name: None,
            ttl: Duration::ZERO,
            always_pipelining: true,
            pipeline_multiplex: 1,
            sentinel_primary: None,
            disable_cache: false,
            replica_only: false,
            dial_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(1),
            disable_retry: false,
            force_single_client: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Value of the constant `app` label.
    pub service: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "0.0.0.0".to_string(),
            port: 9090,
            service: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

impl MetricsConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    pub pattern: String,
    #[serde(with = "duration_ms")]
    pub interval: Duration,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            pattern: "*".to_string(),
            interval: Duration::from_secs(60),
        }
    }
}

/// Machine identity, looked up once on first use and read-only afterwards.
///
/// Clones share the same cell.
#[derive(Debug, Clone, Default)]
pub struct HostIdentity {
    name: Arc<OnceLock<String>>,
}

impl HostIdentity {
    /// Identity with a fixed name, skipping the lookup.
    pub fn fixed(name: &str) -> Self {
        let identity = Self::default();
        identity.name.get_or_init(|| name.to_string());
        identity
    }

    pub fn hostname(&self) -> &str {
        self.name.get_or_init(lookup_hostname)
    }
}

fn lookup_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
}

impl Config {
    /// Create config from environment variables.
    ///
    /// `REDIS_HOST` (comma separated) defines a single backend; without it
    /// the backend list stays empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(hosts) = std::env::var("REDIS_HOST") {
            let mut backend = BackendConfig {
                hosts: hosts
                    .split(',')
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(str::to_string)
                    .collect(),
                ..BackendConfig::default()
            };
            if let Ok(name) = std::env::var("REDIS_NAME") {
                backend.name = name;
            }
            backend.username = std::env::var("REDIS_USERNAME").ok();
            backend.password = std::env::var("REDIS_PASSWORD").ok();
            backend.client_name = std::env::var("REDIS_APP").ok();
            backend.sentinel_primary = std::env::var("REDIS_SENTINEL_PRIMARY").ok();
            if let Some(ttl) = env_millis("REDIS_TTL_MS") {
                backend.ttl = ttl;
            }
            if let Some(timeout) = env_millis("REDIS_DIAL_TIMEOUT_MS") {
                backend.dial_timeout = timeout;
            }
            if let Some(timeout) = env_millis("REDIS_READ_TIMEOUT_MS") {
                backend.read_timeout = timeout;
            }
            if let Some(disable) = env_flag("REDIS_DISABLE_CACHE") {
                backend.disable_cache = disable;
            }
            if let Some(disable) = env_flag("REDIS_DISABLE_RETRY") {
                backend.disable_retry = disable;
            }
            config.redis.push(backend);
        }

        if let Ok(host) = std::env::var("METRICS_HOST") {
            config.metrics.host = host;
        }
        if let Ok(port) = std::env::var("METRICS_PORT") {
            config.metrics.port = port.parse().map_err(|_| {
                ConfigError::Validation(format!("METRICS_PORT is not a port: {}", port))
            })?;
        }
        if let Some(enabled) = env_flag("METRICS_ENABLED") {
            config.metrics.enabled = enabled;
        }
        if let Ok(service) = std::env::var("METRICS_SERVICE") {
            config.metrics.service = service;
        }

        Ok(config)
    }

    /// Create config with CLI args taking precedence over environment and file.
    ///
    /// Precedence: CLI > File > Environment > Defaults
    pub fn from_sources(cli: &Cli) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;
        let file_config = cli
            .config
            .as_ref()
            .map(Self::load_from_file)
            .transpose()?;

        let mut config = match file_config {
            Some(mut file) => {
                if file.redis.is_empty() {
                    file.redis = env_config.redis;
                }
                file
            }
            None => env_config,
        };

        if !cli.redis.is_empty() {
            config.redis = cli
                .redis
                .iter()
                .enumerate()
                .map(|(i, host)| BackendConfig {
                    name: format!("redis-{}", i),
                    hosts: vec![host.clone()],
                    ..BackendConfig::default()
                })
                .collect();
        }
        if cli.metrics {
            config.metrics.enabled = true;
        }
        if let Some(host) = &cli.metrics_host {
            config.metrics.host = host.clone();
        }
        if let Some(port) = cli.metrics_port {
            config.metrics.port = port;
        }
        if let Some(pattern) = &cli.scan_pattern {
            config.reporter.pattern = pattern.clone();
        }
        if let Some(secs) = cli.report_interval_secs {
            config.reporter.interval = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis.is_empty() {
            return Err(ConfigError::MissingField(
                "at least one redis backend".to_string(),
            ));
        }
        for backend in &self.redis {
            if backend.hosts.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "backend {} has no hosts",
                    backend.name
                )));
            }
            if backend.pipeline_multiplex == 0 {
                return Err(ConfigError::Validation(format!(
                    "backend {} needs pipeline_multiplex >= 1",
                    backend.name
                )));
            }
        }
        if self.reporter.interval.is_zero() {
            return Err(ConfigError::Validation(
                "reporter interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_defaults_from_json() {
        let config: Config =
            serde_json::from_str(r#"{"redis": [{"name": "a", "hosts": ["h:6379"], "ttl": 1500}]}"#)
                .unwrap();

        let backend = &config.redis[0];
        assert_eq!(backend.ttl, Duration::from_millis(1500));
        assert_eq!(backend.read_timeout, Duration::from_secs(1));
        assert!(backend.always_pipelining);
        assert_eq!(backend.pipeline_multiplex, 1);
        assert_eq!(config.reporter.pattern, "*");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(Config::default().validate().is_err());

        let mut config = Config::default();
        config.redis.push(BackendConfig::default());
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("skeleton-config-{}.json", std::process::id()));
        let mut config = Config::default();
        config.redis.push(BackendConfig {
            name: "primary".to_string(),
            hosts: vec!["127.0.0.1:6379".to_string()],
            sentinel_primary: Some("mymaster".to_string()),
            ..BackendConfig::default()
        });

        config.save_to_file(&path).unwrap();
        let loaded = Config::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.redis[0].name, "primary");
        assert_eq!(loaded.redis[0].sentinel_primary.as_deref(), Some("mymaster"));
    }

    #[test]
    fn test_host_identity_is_memoised() {
        let identity = HostIdentity::fixed("box-1");
        let shared = identity.clone();
        assert_eq!(identity.hostname(), "box-1");
        assert_eq!(shared.hostname(), "box-1");
        assert!(!HostIdentity::default().hostname().is_empty());
    }
}
