//! Environment-driven service configuration.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

const DEV_SIGN_KEY: &str = "dev-secret";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} has an invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Which of the two services a process is running as. Only affects defaults.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ServiceKind {
    Catalog,
    Reservations,
}

impl ServiceKind {
    pub fn default_queue_group(self) -> &'static str {
        match self {
            ServiceKind::Catalog => "catalog-svc",
            ServiceKind::Reservations => "reservations-svc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub jwt_sign_key: String,
    pub bind_addr: SocketAddr,
    /// Zero means bookings expire immediately (`expires_at` = epoch).
    pub booking_duration: Duration,
    /// Bound on every store and bus call made while serving a request.
    pub store_timeout: Duration,
    /// `None` disables the expiry sweeper.
    pub expiry_sweep_interval: Option<Duration>,
    pub queue_group: String,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
}

impl ServiceConfig {
    pub fn from_env(kind: ServiceKind) -> Result<Self, ConfigError> {
        Self::from_lookup(kind, |var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(kind: ServiceKind, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let use_persistent_stores = match get("USE_PERSISTENT_STORES") {
            Some(v) => parse_bool("USE_PERSISTENT_STORES", &v)?,
            None => false,
        };

        let jwt_sign_key = match get("JWT_SIGN_KEY") {
            Some(key) => key,
            None if use_persistent_stores => return Err(ConfigError::Missing("JWT_SIGN_KEY")),
            None => {
                warn!("JWT_SIGN_KEY not set; using insecure dev default");
                DEV_SIGN_KEY.to_string()
            }
        };

        let bind_addr = match get("BIND_ADDR") {
            Some(v) => v.parse().map_err(|e| invalid("BIND_ADDR", &v, e))?,
            None => SocketAddr::from(([0, 0, 0, 0], 8080)),
        };

        let booking_duration = Duration::from_secs(parse_u64(get("BOOKING_DURATION_SECS"), "BOOKING_DURATION_SECS", 900)?);
        let store_timeout = Duration::from_millis(parse_u64(get("STORE_TIMEOUT_MS"), "STORE_TIMEOUT_MS", 3000)?);
        if store_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                var: "STORE_TIMEOUT_MS",
                value: "0".into(),
                reason: "must be greater than zero".into(),
            });
        }

        let sweep_secs = parse_u64(get("EXPIRY_SWEEP_INTERVAL_SECS"), "EXPIRY_SWEEP_INTERVAL_SECS", 0)?;
        let expiry_sweep_interval = (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs));

        let database_url = get("DATABASE_URL");
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        Ok(Self {
            jwt_sign_key,
            bind_addr,
            booking_duration,
            store_timeout,
            expiry_sweep_interval,
            queue_group: get("QUEUE_GROUP").unwrap_or_else(|| kind.default_queue_group().to_string()),
            use_persistent_stores,
            database_url,
            redis_url: get("REDIS_URL"),
        })
    }
}

fn invalid(var: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_u64(raw: Option<String>, var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match raw {
        Some(v) => v.trim().parse().map_err(|e| invalid(var, &v, e)),
        None => Ok(default),
    }
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(invalid(var, raw, "expected true or false")),
    }
}
