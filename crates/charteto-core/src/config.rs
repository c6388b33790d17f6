//! Exporter configuration.
//!
//! All sources (flat `charteto.*` properties or a `[charteto]` table in a
//! TOML file) are funnelled through [`RawConfig::validate`], so defaults and
//! error messages are identical regardless of where a setting came from.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};

/// Property prefix, e.g. `charteto.apiKey`.
pub const PREFIX: &str = "charteto";

pub const DEFAULT_URI: &str = "https://api.charteto.com";
pub const DEFAULT_STEP: Duration = Duration::from_secs(10);
pub const DEFAULT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HOST_TAG: &str = "instance";

/// Path appended to the configured URI.
pub const METRICS_PATH: &str = "/api/v1/metrics";

/// Validated exporter configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartetoConfig {
    /// Whether metrics are pushed at all.
    pub enabled: bool,
    /// Sent as `X-API-Key`. Required by validation when enabled.
    pub api_key: Option<String>,
    /// Collector base URI, without a trailing slash.
    pub uri: String,
    /// Publish interval.
    pub step: Duration,
    /// Maximum number of meters per request.
    pub batch_size: usize,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Tag key whose value is reported as the metric's host.
    pub host_tag: Option<String>,
}

impl Default for ChartetoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            uri: DEFAULT_URI.to_string(),
            step: DEFAULT_STEP,
            batch_size: DEFAULT_BATCH_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            host_tag: Some(DEFAULT_HOST_TAG.to_string()),
        }
    }
}

impl ChartetoConfig {
    /// Build from flat properties such as `charteto.apiKey`.
    pub fn from_properties(props: &HashMap<String, String>) -> ConfigResult<Self> {
        RawConfig::from_properties(props)?.validate()
    }

    /// Build from a TOML document containing a `[charteto]` table.
    pub fn from_toml_str(s: &str) -> ConfigResult<Self> {
        let file: ConfigFile = toml::from_str(s)?;
        file.charteto.validate()
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Full URL batches are posted to.
    pub fn metrics_endpoint(&self) -> String {
        format!("{}{METRICS_PATH}", self.uri.trim_end_matches('/'))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    charteto: RawConfig,
}

/// Unvalidated settings as read from a source.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    pub enabled: Option<bool>,
    #[serde(alias = "apiKey")]
    pub api_key: Option<String>,
    pub uri: Option<String>,
    pub step: Option<String>,
    #[serde(alias = "batchSize")]
    pub batch_size: Option<usize>,
    #[serde(alias = "connectTimeout")]
    pub connect_timeout: Option<String>,
    #[serde(alias = "readTimeout")]
    pub read_timeout: Option<String>,
    #[serde(alias = "hostTag")]
    pub host_tag: Option<String>,
}

impl RawConfig {
    pub fn from_properties(props: &HashMap<String, String>) -> ConfigResult<Self> {
        let get = |name: &str| props.get(&key(name)).cloned();

        let enabled = match get("enabled") {
            Some(v) => Some(v.trim().parse::<bool>().map_err(|_| ConfigError::InvalidValue {
                key: key("enabled"),
                value: v.clone(),
                expected: "true or false",
            })?),
            None => None,
        };

        let batch_size = match get("batchSize") {
            Some(v) => Some(v.trim().parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                key: key("batchSize"),
                value: v.clone(),
                expected: "a positive integer",
            })?),
            None => None,
        };

        Ok(Self {
            enabled,
            api_key: get("apiKey"),
            uri: get("uri"),
            step: get("step"),
            batch_size,
            connect_timeout: get("connectTimeout"),
            read_timeout: get("readTimeout"),
            host_tag: get("hostTag"),
        })
    }

    /// Apply defaults and check every setting. The first invalid key wins.
    pub fn validate(self) -> ConfigResult<ChartetoConfig> {
        let enabled = self.enabled.unwrap_or(true);

        let api_key = self
            .api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        if enabled && api_key.is_none() {
            return Err(ConfigError::Missing { key: key("apiKey") });
        }

        let uri = match self.uri {
            Some(uri) => validate_uri(&uri)?,
            None => DEFAULT_URI.to_string(),
        };

        let step = duration_setting("step", self.step.as_deref(), DEFAULT_STEP)?;
        if step.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: key("step"),
                value: "0".to_string(),
                expected: "a positive duration",
            });
        }

        let batch_size = self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: key("batchSize"),
                value: "0".to_string(),
                expected: "a positive integer",
            });
        }

        let connect_timeout = duration_setting(
            "connectTimeout",
            self.connect_timeout.as_deref(),
            DEFAULT_CONNECT_TIMEOUT,
        )?;
        let read_timeout =
            duration_setting("readTimeout", self.read_timeout.as_deref(), DEFAULT_READ_TIMEOUT)?;

        let host_tag = match self.host_tag {
            Some(tag) if tag.trim().is_empty() => None,
            Some(tag) => Some(tag.trim().to_string()),
            None => Some(DEFAULT_HOST_TAG.to_string()),
        };

        Ok(ChartetoConfig {
            enabled,
            api_key,
            uri,
            step,
            batch_size,
            connect_timeout,
            read_timeout,
            host_tag,
        })
    }
}

fn key(name: &str) -> String {
    format!("{PREFIX}.{name}")
}

fn validate_uri(raw: &str) -> ConfigResult<String> {
    let invalid = || ConfigError::InvalidUrl {
        key: key("uri"),
        value: raw.to_string(),
    };

    let uri: http::Uri = raw.trim().parse().map_err(|_| invalid())?;
    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        _ => return Err(invalid()),
    }
    if uri.host().is_none_or(str::is_empty) {
        return Err(invalid());
    }

    Ok(raw.trim().trim_end_matches('/').to_string())
}

fn duration_setting(name: &str, raw: Option<&str>, default: Duration) -> ConfigResult<Duration> {
    match raw {
        Some(v) => parse_duration(v).ok_or_else(|| ConfigError::InvalidDuration {
            key: key(name),
            value: v.to_string(),
        }),
        None => Ok(default),
    }
}

/// Parse a duration string like "500ms", "10s", "2m", "1h". A bare number
/// is taken as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok()?.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
