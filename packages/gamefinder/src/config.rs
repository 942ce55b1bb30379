use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::domains::geocoding::{DEFAULT_CACHE_CAPACITY, DEFAULT_NOMINATIM_URL};
use crate::domains::matching::NotificationPolicy;

/// Which address lookup backs the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeocoderStrategy {
    /// Nominatim over HTTP
    Live,
    /// Deterministic jitter around a fixed base point
    Synthetic,
    /// Never resolve; matching stays off
    Disabled,
}

impl FromStr for GeocoderStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" | "nominatim" => Ok(Self::Live),
            "synthetic" | "fake" => Ok(Self::Synthetic),
            "disabled" | "none" | "off" => Ok(Self::Disabled),
            other => bail!("unknown geocoder strategy: {}", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeocoderConfig {
    pub strategy: GeocoderStrategy,
    pub nominatim_url: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub requests_per_second: u32,
    pub cache_capacity: usize,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            strategy: GeocoderStrategy::Disabled,
            nominatim_url: DEFAULT_NOMINATIM_URL.to_string(),
            user_agent: "GameFinder".to_string(),
            timeout: Duration::from_secs(10),
            requests_per_second: 1,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub geocoder: GeocoderConfig,
    pub notification_policy: NotificationPolicy,
    pub database_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = GeocoderConfig::default();

        let geocoder = GeocoderConfig {
            strategy: match lookup("GEOCODER") {
                Some(s) => s.parse().context("GEOCODER must be live, synthetic or disabled")?,
                None => defaults.strategy,
            },
            nominatim_url: lookup("NOMINATIM_URL").unwrap_or(defaults.nominatim_url),
            user_agent: lookup("GEOCODER_USER_AGENT").unwrap_or(defaults.user_agent),
            timeout: match lookup("GEOCODER_TIMEOUT_SECS") {
                Some(s) => Duration::from_secs(
                    s.parse()
                        .context("GEOCODER_TIMEOUT_SECS must be a whole number of seconds")?,
                ),
                None => defaults.timeout,
            },
            requests_per_second: parse_or(
                &lookup,
                "GEOCODER_REQUESTS_PER_SECOND",
                defaults.requests_per_second,
            )?,
            cache_capacity: parse_or(&lookup, "GEOCODE_CACHE_CAPACITY", defaults.cache_capacity)?,
        };

        let notification_policy = match lookup("NOTIFICATION_POLICY") {
            Some(s) => s
                .parse()
                .context("NOTIFICATION_POLICY must be every_evaluation or on_pool_change")?,
            None => NotificationPolicy::default(),
        };

        Ok(Self {
            geocoder,
            notification_policy,
            database_url: lookup("DATABASE_URL"),
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(s) => s
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        None => Ok(default),
    }
}
