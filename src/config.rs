//! Server configuration: optional JSON file, then environment overrides

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen port
    pub port: u16,
    /// Base path all routes are mounted under, e.g. `/wmstats`
    pub base: String,
    /// Verbosity level for logging and aggregation diagnostics
    pub verbose: u8,
    /// Emit JSON log lines instead of human-readable ones
    pub log_json: bool,
    /// Statistics feed: a local file name or an HTTP(S) URL
    pub access_uri: String,
    /// Seconds a fetched snapshot stays current
    pub renew_interval: u64,
    /// Upstream request timeout in seconds, 0 disables it
    pub timeout: u64,
    /// Bearer token, or path to a file holding it
    pub token: Option<String>,
    /// Rate limit as `<count>-<S|M|H>`
    #[serde(rename = "limiter_rate")]
    pub limiter_rate: String,
    /// Prefix for Prometheus metric names
    pub metrics_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8250,
            base: String::new(),
            verbose: 0,
            log_json: false,
            access_uri: String::new(),
            renew_interval: 300,
            timeout: 0,
            token: None,
            limiter_rate: "100-S".to_string(),
            metrics_prefix: "wmstats".to_string(),
        }
    }
}

impl Config {
    /// Load from an optional JSON file and apply `WMSTATS_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let data = std::fs::read(path).map_err(|e| {
                    AppError::Config(format!("unable to read {}: {}", path.display(), e))
                })?;
                serde_json::from_slice(&data).map_err(|e| {
                    AppError::Config(format!("unable to parse {}: {}", path.display(), e))
                })?
            }
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("WMSTATS_PORT") {
            self.port = parse_number("WMSTATS_PORT", &port)?;
        }
        if let Some(base) = lookup("WMSTATS_BASE") {
            self.base = base;
        }
        if let Some(uri) = lookup("WMSTATS_URI") {
            self.access_uri = uri;
        }
        if let Some(token) = lookup("WMSTATS_TOKEN") {
            self.token = Some(token);
        }
        if let Some(renew) = lookup("WMSTATS_RENEW_INTERVAL") {
            self.renew_interval = parse_number("WMSTATS_RENEW_INTERVAL", &renew)?;
        }
        if let Some(timeout) = lookup("WMSTATS_TIMEOUT") {
            self.timeout = parse_number("WMSTATS_TIMEOUT", &timeout)?;
        }
        if let Some(verbose) = lookup("WMSTATS_VERBOSE") {
            self.verbose = parse_number("WMSTATS_VERBOSE", &verbose)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.access_uri.is_empty() {
            return Err(AppError::Config(
                "access_uri is not set (config file or WMSTATS_URI)".into(),
            ));
        }
        self.limiter()?;
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs(self.renew_interval)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }

    /// Normalised base path: empty, or `/segment` without a trailing slash.
    pub fn base_path(&self) -> String {
        let trimmed = self.base.trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{}", trimmed)
        }
    }

    /// Parse `limiter_rate` into a request count per period.
    pub fn limiter(&self) -> Result<(u64, Duration)> {
        parse_rate(&self.limiter_rate)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::Config(format!("invalid {}: {:?}", key, value)))
}

/// `100-S` is 100 requests per second; `M` and `H` select minutes and hours.
pub fn parse_rate(rate: &str) -> Result<(u64, Duration)> {
    let invalid = || AppError::Config(format!("invalid limiter rate {:?}", rate));
    let (count, period) = rate.split_once('-').ok_or_else(invalid)?;
    let count: u64 = count.trim().parse().map_err(|_| invalid())?;
    if count == 0 {
        return Err(invalid());
    }
    let period = match period.trim().to_ascii_uppercase().as_str() {
        "S" => Duration::from_secs(1),
        "M" => Duration::from_secs(60),
        "H" => Duration::from_secs(3600),
        _ => return Err(invalid()),
    };
    Ok((count, period))
}
