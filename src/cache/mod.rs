//! Cache lookup client for the external object store.
//!
//! Objects are addressed as `{base}/{fingerprint}.{extension}`. A `HEAD`
//! probe decides hit or miss; a `GET` downloads the artifact. The store is
//! strictly best-effort: probe failures of any kind read as a miss, and fetch
//! failures surface as [`CacheError`] only so the router can fall back to the
//! origin.

mod endpoint;

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::{ConfigError, ProxyConfig, millis};
use crate::fingerprint::Fingerprint;
use crate::http::{Headers, Response, StatusCode};

pub use endpoint::Endpoint;

/// Reasons a cached artifact could not be delivered.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store answered {status} for {url}")]
    Status { url: Url, status: u16 },

    #[error("cache store timed out after {timeout:?} for {url}")]
    Timeout { url: Url, timeout: Duration },

    #[error("cache store request to {url} failed: {source}")]
    Transport {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("cache base URL {base} cannot hold object paths")]
    InvalidBase { base: Url },
}

/// Result of an existence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Hit,
    Miss,
}

/// A cached artifact downloaded from the store, as the store served it.
#[derive(Debug, Clone)]
pub struct CacheObject {
    pub url: Url,
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Bytes,
}

impl CacheObject {
    /// The store's `Content-Type`, if it sent one.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    /// Relays the object with the store's status and end-to-end headers.
    pub fn into_response(self) -> Response {
        Response::new(self.status)
            .headers(self.headers.end_to_end())
            .body_bytes(self.body)
    }
}

/// HTTP client for the object store.
#[derive(Debug, Clone)]
pub struct CacheClient {
    client: reqwest::Client,
    base: Url,
    probe_timeout: Duration,
    fetch_timeout: Duration,
}

impl CacheClient {
    /// Builds a client from the proxy configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the cache URL does not parse.
    pub fn new(config: &ProxyConfig) -> Result<Self, ConfigError> {
        Ok(Self::with_client(
            reqwest::Client::new(),
            config.cache_base()?,
            config.probe_timeout(),
            config.fetch_timeout(),
        ))
    }

    pub fn with_client(
        client: reqwest::Client,
        base: Url,
        probe_timeout: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            client,
            base,
            probe_timeout,
            fetch_timeout,
        }
    }

    /// URL of the object `{fingerprint}.{extension}` under the base URL.
    ///
    /// The object name is a single path segment; any `/` in the extension is
    /// percent-encoded rather than treated as a separator.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidBase`] for bases such as `mailto:` that
    /// cannot carry a path.
    pub fn object_url(&self, fingerprint: &Fingerprint, extension: &str) -> Result<Url, CacheError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| CacheError::InvalidBase {
                    base: self.base.clone(),
                })?;
            segments.pop_if_empty();
            segments.push(&format!("{fingerprint}.{extension}"));
        }
        Ok(url)
    }

    /// Checks whether the object exists, without transferring its body.
    ///
    /// Any `2xx` is a hit. Other statuses, transport errors and the probe
    /// deadline all read as [`Probe::Miss`].
    pub async fn probe(&self, fingerprint: &Fingerprint, extension: &str) -> Probe {
        let url = match self.object_url(fingerprint, extension) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "cannot build cache object URL, treating as miss");
                return Probe::Miss;
            }
        };

        let request = self.client.head(url.clone()).send();
        match tokio::time::timeout(self.probe_timeout, request).await {
            Ok(Ok(response)) if response.status().is_success() => {
                debug!(%url, status = response.status().as_u16(), "cache probe hit");
                Probe::Hit
            }
            Ok(Ok(response)) => {
                debug!(%url, status = response.status().as_u16(), "cache probe miss");
                Probe::Miss
            }
            Ok(Err(e)) => {
                warn!(%url, error = %e, "cache probe failed, treating as miss");
                Probe::Miss
            }
            Err(_) => {
                warn!(
                    %url,
                    timeout_ms = millis(self.probe_timeout),
                    "cache probe timed out, treating as miss"
                );
                Probe::Miss
            }
        }
    }

    /// Downloads the object body.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Status`]: the store answered with a non-`2xx` status.
    /// - [`CacheError::Timeout`]: headers and body did not arrive within the fetch deadline.
    /// - [`CacheError::Transport`]: the connection failed.
    pub async fn fetch(
        &self,
        fingerprint: &Fingerprint,
        extension: &str,
    ) -> Result<CacheObject, CacheError> {
        let url = self.object_url(fingerprint, extension)?;

        let download = async {
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|source| transport_error(&url, source, self.fetch_timeout))?;

            let status = response.status();
            if !status.is_success() {
                return Err(CacheError::Status {
                    url: url.clone(),
                    status: status.as_u16(),
                });
            }

            let headers = Headers::from(response.headers());

            let body = response
                .bytes()
                .await
                .map_err(|source| transport_error(&url, source, self.fetch_timeout))?;

            Ok(CacheObject {
                url: url.clone(),
                status: StatusCode::from_u16(status.as_u16()),
                headers,
                body,
            })
        };

        let outcome = tokio::time::timeout(self.fetch_timeout, download).await;
        match outcome {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout {
                url,
                timeout: self.fetch_timeout,
            }),
        }
    }
}

fn transport_error(url: &Url, source: reqwest::Error, timeout: Duration) -> CacheError {
    if source.is_timeout() {
        CacheError::Timeout {
            url: url.clone(),
            timeout,
        }
    } else {
        CacheError::Transport {
            url: url.clone(),
            source,
        }
    }
}
