//! Runtime configuration from environment variables.
//!
//! Every value has a default; invalid values are logged and replaced by the
//! default rather than aborting start-up.

use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::{info, warn};

const DEFAULT_API_URL: &str = "http://localhost:5000";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 8;
const DEFAULT_ORDER_LIMIT: u32 = 50;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_NOTICE_TTL_SECS: u64 = 6;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub poll_interval: Duration,
    pub order_limit: u32,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub data_dir: PathBuf,
    pub notice_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            order_limit: DEFAULT_ORDER_LIMIT,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            data_dir: default_data_dir(),
            notice_ttl: Duration::from_secs(DEFAULT_NOTICE_TTL_SECS),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let api_url = lookup("MARKETPLACE_API_URL")
            .map(|u| normalize_api_url(&u))
            .filter(|u| !u.is_empty())
            .unwrap_or(defaults.api_url);

        let config = Self {
            api_url,
            poll_interval: Duration::from_secs(
                parse_or(&lookup, "MARKETPLACE_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)
                    .max(1),
            ),
            order_limit: parse_or(&lookup, "MARKETPLACE_ORDER_LIMIT", DEFAULT_ORDER_LIMIT).max(1),
            request_timeout: Duration::from_secs(
                parse_or(
                    &lookup,
                    "MARKETPLACE_REQUEST_TIMEOUT_SECS",
                    DEFAULT_REQUEST_TIMEOUT_SECS,
                )
                .max(1),
            ),
            max_attempts: parse_or(&lookup, "MARKETPLACE_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)
                .max(1),
            data_dir: lookup("MARKETPLACE_DATA_DIR")
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            notice_ttl: Duration::from_secs(parse_or(
                &lookup,
                "MARKETPLACE_NOTICE_TTL_SECS",
                DEFAULT_NOTICE_TTL_SECS,
            )),
        };

        info!(
            api_url = %config.api_url,
            poll_interval_secs = config.poll_interval.as_secs(),
            data_dir = %config.data_dir.display(),
            "configuration loaded"
        );
        config
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?} ({e}), using default: {default}");
            default
        }),
    }
}

/// Platform data directory for this client.
fn default_data_dir() -> PathBuf {
    let base = env::var("LOCALAPPDATA")
        .or_else(|_| env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("marketplace-sync")
}

/// Normalise the API base URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
/// - strip a trailing `/api` segment
pub fn normalize_api_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}
