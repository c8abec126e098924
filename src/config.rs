//! Configuration management for Slidegate.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{LimiterError, Result};

/// Environment variable prefix for configuration overrides.
const ENV_PREFIX: &str = "SLIDEGATE";

/// Main configuration for the Slidegate binary.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Load generator configuration
    #[serde(default)]
    pub demo: DemoConfig,
}

/// Limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LimiterConfig {
    /// Maximum admissions within any window; zero or negative never admits
    #[serde(default = "default_max_count")]
    pub max_count: i64,

    /// Window length in milliseconds; zero disables throttling
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Exact window length when built from a `Duration`; wins over `interval_ms`
    #[serde(skip)]
    exact_interval: Option<Duration>,

    /// Idle time after stop before the coordinator terminates
    #[serde(default = "default_drain_idle_ms")]
    pub drain_idle_ms: u64,

    /// Lower bound for the periodic cleanup tick
    #[serde(default = "default_min_cleanup_ms")]
    pub min_cleanup_ms: u64,

    /// Capacity of the request channel in front of the coordinator
    #[serde(default = "default_request_buffer")]
    pub request_buffer: usize,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_count: default_max_count(),
            interval_ms: default_interval_ms(),
            exact_interval: None,
            drain_idle_ms: default_drain_idle_ms(),
            min_cleanup_ms: default_min_cleanup_ms(),
            request_buffer: default_request_buffer(),
        }
    }
}

fn default_max_count() -> i64 {
    10
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_drain_idle_ms() -> u64 {
    100
}

fn default_min_cleanup_ms() -> u64 {
    100
}

fn default_request_buffer() -> usize {
    64
}

impl LimiterConfig {
    /// Build a configuration with the given quota and default tuning.
    pub fn new(max_count: i64, interval: Duration) -> Self {
        let mut config = Self {
            max_count,
            ..Self::default()
        };
        config.set_interval(interval);
        config
    }

    /// Set the window length exactly.
    ///
    /// `interval_ms` is rounded up so it never describes a shorter window.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval_ms =
            u64::try_from(interval.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX);
        self.exact_interval = Some(interval);
    }

    /// The sliding window length.
    pub fn interval(&self) -> Duration {
        self.exact_interval
            .unwrap_or_else(|| Duration::from_millis(self.interval_ms))
    }

    /// How long the coordinator keeps answering after stop without new requests.
    pub fn drain_idle(&self) -> Duration {
        Duration::from_millis(self.drain_idle_ms)
    }

    /// Period of the cleanup tick: a tenth of the window, but never below the floor.
    pub fn cleanup_period(&self) -> Duration {
        (self.interval() / 10).max(Duration::from_millis(self.min_cleanup_ms.max(1)))
    }

    /// Whether this configuration can ever admit a request.
    pub fn admits_anything(&self) -> bool {
        self.max_count > 0
    }

    /// Reject configurations that can never admit a request.
    pub fn validate(&self) -> Result<()> {
        if !self.admits_anything() {
            return Err(LimiterError::InvalidConfig(format!(
                "max_count must be positive, got {}",
                self.max_count
            )));
        }
        Ok(())
    }
}

/// Load generator configuration used by the binary.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DemoConfig {
    /// Number of concurrent workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Acquire calls issued by each worker
    #[serde(default = "default_requests_per_worker")]
    pub requests_per_worker: usize,

    /// Per-acquire timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            requests_per_worker: default_requests_per_worker(),
            timeout_ms: None,
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_requests_per_worker() -> usize {
    10
}

impl AppConfig {
    /// Load configuration from a YAML file, layered with `SLIDEGATE__*` environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        if !path.exists() {
            return Err(LimiterError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("config file not found: {}", path.display()),
            )));
        }

        let config = ::config::Config::builder()
            .add_source(::config::File::from(path).format(::config::FileFormat::Yaml))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse configuration: {}", e)))
    }
}
