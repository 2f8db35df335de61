use std::env;
use std::time::Duration;

use once_cell::sync::Lazy;
use thiserror::Error;
use url::Url;

use crate::sync::{CoreConfig, ReconnectPolicy, SyncGroup};

pub const DEFAULT_DEVICE_URL: &str = "http://192.168.4.1";

/// The controller's access-point address.
static DEFAULT_DEVICE: Lazy<Url> =
    Lazy::new(|| Url::parse(DEFAULT_DEVICE_URL).expect("DEFAULT_DEVICE_URL is a valid URL"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is not a valid URL: {reason}")]
    InvalidUrl { var: &'static str, reason: String },
    #[error("{var} must be a whole number of milliseconds, got '{value}'")]
    InvalidDuration { var: &'static str, value: String },
    #[error("{var} must be greater than zero")]
    ZeroDuration { var: &'static str },
}

/// Controller client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Firmware HTTP root (defaults to the access-point address)
    pub device_url: Url,
    /// Explicit live channel URL; derived from `device_url` when unset
    pub ws_url: Option<Url>,
    pub live: bool,
    pub auth_pin: Option<String>,
    pub debounce: Duration,
    pub command_timeout: Duration,
    pub reconnect_delay: Duration,
    pub reconnect_max: Duration,
    pub backoff: bool,
    pub poll_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let device_url = match env::var("AERI_DEVICE_URL") {
            Ok(raw) => parse_url("AERI_DEVICE_URL", &raw)?,
            Err(_) => defaults.device_url,
        };
        let ws_url = match env::var("AERI_WS_URL") {
            Ok(raw) if !raw.trim().is_empty() => Some(parse_url("AERI_WS_URL", &raw)?),
            _ => None,
        };
        let auth_pin = env::var("AERI_AUTH_PIN")
            .ok()
            .map(|pin| pin.trim().to_string())
            .filter(|pin| !pin.is_empty());

        Ok(Self {
            device_url,
            ws_url,
            live: flag("AERI_LIVE").unwrap_or(defaults.live),
            auth_pin,
            debounce: millis("AERI_DEBOUNCE_MS", defaults.debounce)?,
            command_timeout: nonzero(millis("AERI_COMMAND_TIMEOUT_MS", defaults.command_timeout)?, "AERI_COMMAND_TIMEOUT_MS")?,
            reconnect_delay: nonzero(millis("AERI_RECONNECT_MS", defaults.reconnect_delay)?, "AERI_RECONNECT_MS")?,
            reconnect_max: millis("AERI_RECONNECT_MAX_MS", defaults.reconnect_max)?,
            backoff: flag("AERI_BACKOFF").unwrap_or(defaults.backoff),
            poll_interval: nonzero(millis("AERI_POLL_MS", defaults.poll_interval)?, "AERI_POLL_MS")?,
        })
    }

    /// Replaces the device address, e.g. from `--device`.
    pub fn with_device_url(mut self, raw: &str) -> Result<Self, ConfigError> {
        self.device_url = parse_url("--device", raw)?;
        Ok(self)
    }

    /// WebSocket endpoint for state pushes, or `None` when disabled.
    pub fn live_url(&self) -> Option<Url> {
        if !self.live {
            return None;
        }
        if let Some(url) = &self.ws_url {
            return Some(url.clone());
        }
        let mut url = self.device_url.clone();
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).ok()?;
        url.set_path("/ws");
        url.set_query(None);
        Some(url)
    }

    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            debounce: self.debounce,
            poll_interval: self.poll_interval,
            reconnect: ReconnectPolicy {
                base: self.reconnect_delay,
                max: self.reconnect_max,
                backoff: self.backoff,
            },
            live_channel: self.live,
            sync_group: SyncGroup::DEFAULT_MEMBERS.to_vec(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_url: DEFAULT_DEVICE.clone(),
            ws_url: None,
            live: true,
            auth_pin: None,
            debounce: Duration::from_millis(250),
            command_timeout: Duration::from_millis(4_000),
            reconnect_delay: Duration::from_millis(2_000),
            reconnect_max: Duration::from_millis(30_000),
            backoff: false,
            poll_interval: Duration::from_millis(15_000),
        }
    }
}

fn parse_url(var: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let raw = raw.trim();
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    Url::parse(&candidate).map_err(|err| ConfigError::InvalidUrl {
        var,
        reason: err.to_string(),
    })
}

fn flag(var: &str) -> Option<bool> {
    env::var(var).ok().map(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn millis(var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidDuration { var, value }),
        Err(_) => Ok(default),
    }
}

fn nonzero(duration: Duration, var: &'static str) -> Result<Duration, ConfigError> {
    if duration.is_zero() {
        return Err(ConfigError::ZeroDuration { var });
    }
    Ok(duration)
}
