//! Proxy configuration.
//!
//! Everything the proxy needs is injected through a [`ProxyConfig`] value at
//! construction time; nothing reads the environment after startup.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::server::DEFAULT_MAX_REQUEST_SIZE;

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {name}")]
    Missing { name: &'static str },

    #[error("invalid URL for {name}: {source}")]
    InvalidUrl {
        name: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("{name} must be an http(s) URL, got {url}")]
    UnsupportedScheme { name: &'static str, url: String },

    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: &'static str, value: String },
}

/// What to do with a POST body larger than [`ProxyConfig::max_body_bytes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OversizeBodyPolicy {
    /// Skip parameter extraction and forward the request to the origin uncached.
    #[default]
    Forward,
    /// Answer `413 Payload Too Large` without contacting the origin.
    Reject,
}

impl std::str::FromStr for OversizeBodyPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" => Ok(Self::Forward),
            "reject" => Ok(Self::Reject),
            _ => Err(()),
        }
    }
}

/// Runtime configuration for the proxy.
///
/// Loaded from the environment by [`ProxyConfig::from_env`] or assembled with
/// [`ProxyConfig::new`] and the `with_*` builders.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Base URL of the object store holding rendered artifacts.
    pub cache_url: String,

    /// Base URL of the upstream origin every uncached request goes to.
    pub origin_url: String,

    /// Address the front end listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Largest complete request (head plus body) the front end buffers.
    ///
    /// A transport limit, separate from `max_body_bytes`: anything above it
    /// is answered `413` before routing, whatever the oversize policy.
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,

    /// Largest POST body that is parsed for cache parameters.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Handling of bodies above `max_body_bytes`.
    #[serde(default)]
    pub oversize_body: OversizeBodyPolicy,

    /// Deadline for a cache existence probe before it counts as a miss.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Deadline for downloading a cached artifact before falling back to the origin.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8787".to_string()
}

fn default_max_request_bytes() -> usize {
    DEFAULT_MAX_REQUEST_SIZE
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_probe_timeout_ms() -> u64 {
    250
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

impl ProxyConfig {
    /// Creates a configuration with the two required URLs and defaults for the rest.
    pub fn new(cache_url: impl Into<String>, origin_url: impl Into<String>) -> Self {
        Self {
            cache_url: cache_url.into(),
            origin_url: origin_url.into(),
            listen_addr: default_listen_addr(),
            max_request_bytes: default_max_request_bytes(),
            max_body_bytes: default_max_body_bytes(),
            oversize_body: OversizeBodyPolicy::default(),
            probe_timeout_ms: default_probe_timeout_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
        }
    }

    /// Creates config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `CACHE_URL` | Object store base URL (required) |
    /// | `ORIGIN_URL` | Upstream origin base URL (required) |
    /// | `EDGECACHE_LISTEN` | Listen address |
    /// | `EDGECACHE_MAX_REQUEST_BYTES` | Front-end request size limit |
    /// | `EDGECACHE_MAX_BODY_BYTES` | POST body parse limit |
    /// | `EDGECACHE_OVERSIZE_BODY` | `forward` or `reject` |
    /// | `EDGECACHE_PROBE_TIMEOUT_MS` | Cache probe deadline |
    /// | `EDGECACHE_FETCH_TIMEOUT_MS` | Cache fetch deadline |
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required variable is missing or a value
    /// does not parse, or when [`validate`](Self::validate) fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing { name })
        };

        let mut config = Self::new(required("CACHE_URL")?, required("ORIGIN_URL")?);

        if let Some(addr) = lookup("EDGECACHE_LISTEN") {
            config.listen_addr = addr;
        }
        if let Some(value) = lookup("EDGECACHE_MAX_REQUEST_BYTES") {
            config.max_request_bytes = parse_value("EDGECACHE_MAX_REQUEST_BYTES", &value)?;
        }
        if let Some(value) = lookup("EDGECACHE_MAX_BODY_BYTES") {
            config.max_body_bytes = parse_value("EDGECACHE_MAX_BODY_BYTES", &value)?;
        }
        if let Some(value) = lookup("EDGECACHE_OVERSIZE_BODY") {
            config.oversize_body = value.parse().map_err(|()| ConfigError::InvalidValue {
                name: "EDGECACHE_OVERSIZE_BODY",
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup("EDGECACHE_PROBE_TIMEOUT_MS") {
            config.probe_timeout_ms = parse_value("EDGECACHE_PROBE_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("EDGECACHE_FETCH_TIMEOUT_MS") {
            config.fetch_timeout_ms = parse_value("EDGECACHE_FETCH_TIMEOUT_MS", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks that both base URLs are absolute http(s) URLs and that the
    /// front end admits every body the parse limit allows.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`], [`ConfigError::UnsupportedScheme`]
    /// or [`ConfigError::InvalidValue`] for `EDGECACHE_MAX_REQUEST_BYTES`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache_base()?;
        self.origin_base()?;
        if self.max_request_bytes < self.max_body_bytes {
            return Err(ConfigError::InvalidValue {
                name: "EDGECACHE_MAX_REQUEST_BYTES",
                value: format!(
                    "{} (below EDGECACHE_MAX_BODY_BYTES = {})",
                    self.max_request_bytes, self.max_body_bytes
                ),
            });
        }
        Ok(())
    }

    /// Parsed cache store base URL.
    pub fn cache_base(&self) -> Result<Url, ConfigError> {
        parse_base("CACHE_URL", &self.cache_url)
    }

    /// Parsed origin base URL.
    pub fn origin_base(&self) -> Result<Url, ConfigError> {
        parse_base("ORIGIN_URL", &self.origin_url)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Set the listen address.
    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    /// Set the front-end request size limit.
    pub fn with_max_request_bytes(mut self, max: usize) -> Self {
        self.max_request_bytes = max;
        self
    }

    /// Set the POST body parse limit.
    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    /// Set the oversize body policy.
    pub fn with_oversize_body(mut self, policy: OversizeBodyPolicy) -> Self {
        self.oversize_body = policy;
        self
    }

    /// Set the cache probe deadline.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout_ms = millis(timeout);
        self
    }

    /// Set the cache fetch deadline.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout_ms = millis(timeout);
        self
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_value<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: value.to_owned(),
    })
}

fn parse_base(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl { name, source })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(ConfigError::UnsupportedScheme {
            name,
            url: raw.to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn required_urls_and_defaults() {
        let config = ProxyConfig::from_lookup(lookup(&[
            ("CACHE_URL", "https://cache.example.com"),
            ("ORIGIN_URL", "https://api.example.com"),
        ]))
        .unwrap();

        assert_eq!(config.cache_url, "https://cache.example.com");
        assert_eq!(config.listen_addr, "0.0.0.0:8787");
        assert_eq!(config.max_body_bytes, 1024 * 1024);
        assert_eq!(config.max_request_bytes, DEFAULT_MAX_REQUEST_SIZE);
        assert_eq!(config.oversize_body, OversizeBodyPolicy::Forward);
        assert_eq!(config.probe_timeout(), Duration::from_millis(250));
        assert_eq!(config.fetch_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn missing_cache_url() {
        let err = ProxyConfig::from_lookup(lookup(&[("ORIGIN_URL", "https://api.example.com")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing { name: "CACHE_URL" }));
    }

    #[test]
    fn blank_origin_counts_as_missing() {
        let err = ProxyConfig::from_lookup(lookup(&[
            ("CACHE_URL", "https://cache.example.com"),
            ("ORIGIN_URL", "  "),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing { name: "ORIGIN_URL" }));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = ProxyConfig::from_lookup(lookup(&[
            ("CACHE_URL", "http://cache.local"),
            ("ORIGIN_URL", "http://origin.local"),
            ("EDGECACHE_LISTEN", "127.0.0.1:9000"),
            ("EDGECACHE_MAX_REQUEST_BYTES", "65536"),
            ("EDGECACHE_MAX_BODY_BYTES", "2048"),
            ("EDGECACHE_OVERSIZE_BODY", "Reject"),
            ("EDGECACHE_PROBE_TIMEOUT_MS", "100"),
            ("EDGECACHE_FETCH_TIMEOUT_MS", "3000"),
        ]))
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.max_request_bytes, 65536);
        assert_eq!(config.max_body_bytes, 2048);
        assert_eq!(config.oversize_body, OversizeBodyPolicy::Reject);
        assert_eq!(config.probe_timeout_ms, 100);
        assert_eq!(config.fetch_timeout_ms, 3000);
    }

    #[test]
    fn bad_number_is_rejected() {
        let err = ProxyConfig::from_lookup(lookup(&[
            ("CACHE_URL", "http://cache.local"),
            ("ORIGIN_URL", "http://origin.local"),
            ("EDGECACHE_PROBE_TIMEOUT_MS", "fast"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "EDGECACHE_PROBE_TIMEOUT_MS",
                ..
            }
        ));
    }

    #[test]
    fn request_limit_below_body_limit_is_rejected() {
        let err = ProxyConfig::from_lookup(lookup(&[
            ("CACHE_URL", "http://cache.local"),
            ("ORIGIN_URL", "http://origin.local"),
            ("EDGECACHE_MAX_REQUEST_BYTES", "1024"),
            ("EDGECACHE_MAX_BODY_BYTES", "4096"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "EDGECACHE_MAX_REQUEST_BYTES",
                ..
            }
        ));
    }

    #[test]
    fn huge_timeouts_saturate() {
        assert_eq!(millis(Duration::MAX), u64::MAX);
        let config = ProxyConfig::new("http://c.local", "http://o.local")
            .with_fetch_timeout(Duration::MAX)
            .with_probe_timeout(Duration::from_millis(75));
        assert_eq!(config.fetch_timeout_ms, u64::MAX);
        assert_eq!(config.probe_timeout_ms, 75);
    }

    #[test]
    fn non_http_scheme_is_rejected() {
        let config = ProxyConfig::new("ftp://cache.local", "http://origin.local");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedScheme { name: "CACHE_URL", .. })
        ));
    }

    #[test]
    fn relative_url_is_rejected() {
        let config = ProxyConfig::new("http://cache.local", "/origin");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { name: "ORIGIN_URL", .. })
        ));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: ProxyConfig = serde_json::from_str(
            r#"{"cache_url":"http://c","origin_url":"http://o","oversize_body":"reject"}"#,
        )
        .unwrap();
        assert_eq!(config.oversize_body, OversizeBodyPolicy::Reject);
        assert_eq!(config.probe_timeout_ms, 250);
    }
}
