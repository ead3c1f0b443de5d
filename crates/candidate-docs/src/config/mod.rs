use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::revalidation::rate_limit::RateLimitConfig;
use crate::revalidation::scheduler::RevalidationSettings;
use crate::revalidation::state_machine::MAX_RETRY_CEILING;

const LEASE_FILE_NAME: &str = "candidate-docs-revalidation.lock";

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the worker.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub engine: EngineConfig,
    pub lease: LeaseConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let engine = EngineConfig {
            max_retries: parse_var("REVALIDATION_MAX_RETRIES", MAX_RETRY_CEILING)?,
            requests_per_minute: parse_var("REVALIDATION_REQUESTS_PER_MINUTE", 25)?,
            cost_units_per_minute: parse_var("REVALIDATION_COST_UNITS_PER_MINUTE", 5500)?,
            interval_secs: parse_var("REVALIDATION_INTERVAL_SECS", 21_600)?,
        };
        engine.validate()?;

        let lease = LeaseConfig {
            path: env::var_os("REVALIDATION_LEASE_PATH")
                .map(PathBuf::from)
                .filter(|path| !path.as_os_str().is_empty())
                .unwrap_or_else(|| env::temp_dir().join(LEASE_FILE_NAME)),
        };

        let storage = StorageConfig {
            document_types_csv: env::var_os("DOCUMENT_TYPES_CSV")
                .map(PathBuf::from)
                .filter(|path| !path.as_os_str().is_empty()),
            document_root: env::var_os("DOCUMENT_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            engine,
            lease,
            storage,
        })
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidNumber { name, value: raw })
        }
        _ => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Retry budget, classifier limits and cycle cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub max_retries: u8,
    pub requests_per_minute: u32,
    pub cost_units_per_minute: u32,
    pub interval_secs: u64,
}

impl EngineConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_RETRY_CEILING).contains(&self.max_retries) {
            return Err(ConfigError::RetryBudgetOutOfRange(self.max_retries));
        }
        if self.requests_per_minute == 0 {
            return Err(ConfigError::ZeroValue("REVALIDATION_REQUESTS_PER_MINUTE"));
        }
        if self.cost_units_per_minute == 0 {
            return Err(ConfigError::ZeroValue("REVALIDATION_COST_UNITS_PER_MINUTE"));
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::ZeroValue("REVALIDATION_INTERVAL_SECS"));
        }
        Ok(())
    }

    pub fn settings(&self) -> RevalidationSettings {
        RevalidationSettings {
            max_retries: self.max_retries,
            rate_limit: RateLimitConfig {
                requests_per_minute: self.requests_per_minute,
                cost_units_per_minute: self.cost_units_per_minute,
            },
            interval: Duration::from_secs(self.interval_secs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LeaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Replaces the built-in document catalog when set.
    pub document_types_csv: Option<PathBuf>,
    pub document_root: PathBuf,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { name: &'static str, value: String },
    RetryBudgetOutOfRange(u8),
    ZeroValue(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { name, value } => {
                write!(f, "{name} must be a non-negative integer, got '{value}'")
            }
            ConfigError::RetryBudgetOutOfRange(value) => write!(
                f,
                "REVALIDATION_MAX_RETRIES must be between 1 and {MAX_RETRY_CEILING}, got {value}"
            ),
            ConfigError::ZeroValue(name) => write!(f, "{name} must be greater than zero"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}
