//! Origin forwarder.
//!
//! Replays a buffered [`Request`] against the upstream origin and converts
//! the upstream reply into a [`Response`]. Upstream statuses, including
//! errors, are relayed verbatim. There are no retries and no timeout beyond
//! the transport defaults.

use reqwest::header::{CONTENT_LENGTH, HeaderName, HeaderValue};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::{ConfigError, ProxyConfig};
use crate::http::{Headers, Method, Request, Response, StatusCode};

/// Request headers the client library derives itself.
const CLIENT_MANAGED: &[&str] = &["host", "content-length"];

/// Failures that prevented the origin from producing any reply.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid origin URL for {path}: {source}")]
    Url {
        path: String,
        #[source]
        source: url::ParseError,
    },

    #[error("method {method} cannot be sent upstream")]
    Method { method: String },

    #[error("origin request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("origin unreachable: {0}")]
    Transport(#[source] reqwest::Error),
}

impl ForwardError {
    /// The status the proxy answers with when forwarding itself failed.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Timeout(_) => StatusCode::GatewayTimeout,
            Self::Url { .. } | Self::Method { .. } | Self::Transport(_) => StatusCode::BadGateway,
        }
    }

    /// Renders the failure as a plain-text gateway response.
    pub fn into_response(self) -> Response {
        let status = self.status();
        Response::new(status).body(format!("{}: {self}", status.canonical_reason()))
    }
}

impl From<reqwest::Error> for ForwardError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e)
        } else {
            Self::Transport(e)
        }
    }
}

/// HTTP client for the upstream origin.
#[derive(Debug, Clone)]
pub struct OriginClient {
    client: reqwest::Client,
    base: Url,
}

impl OriginClient {
    /// Builds a forwarder from the proxy configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the origin URL does not parse.
    pub fn new(config: &ProxyConfig) -> Result<Self, ConfigError> {
        Ok(Self::with_client(reqwest::Client::new(), config.origin_base()?))
    }

    pub fn with_client(client: reqwest::Client, base: Url) -> Self {
        Self { client, base }
    }

    /// Upstream URL for `request`: origin scheme and authority with the
    /// inbound path and query appended to the origin's base path.
    pub fn target_url(&self, request: &Request) -> Result<Url, ForwardError> {
        let base = self.base.as_str().trim_end_matches('/');
        let raw = format!("{base}{}", request.path_and_query());
        Url::parse(&raw).map_err(|source| ForwardError::Url {
            path: request.path().to_owned(),
            source,
        })
    }

    /// Sends `request` to the origin and relays its reply.
    ///
    /// Method, end-to-end headers and the buffered body are replayed as
    /// received; the body is sent whenever it is non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardError`] when no upstream reply was obtained. An
    /// upstream `4xx`/`5xx` is a successful forward, not an error.
    pub async fn forward(&self, request: &Request) -> Result<Response, ForwardError> {
        let url = self.target_url(request)?;
        let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes()).map_err(
            |_| ForwardError::Method {
                method: request.method().to_string(),
            },
        )?;

        let mut outbound = self.client.request(method, url.clone());
        for (name, value) in request.headers().end_to_end().iter() {
            if CLIENT_MANAGED.iter().any(|h| h.eq_ignore_ascii_case(name)) {
                continue;
            }
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) else {
                debug!(header = name, "dropping header that cannot be re-encoded");
                continue;
            };
            outbound = outbound.header(name, value);
        }
        if !request.body().is_empty() {
            outbound = outbound.body(request.body().clone());
        }

        let upstream = outbound.send().await?;
        let status = StatusCode::from_u16(upstream.status().as_u16());
        let declared_length = upstream
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let headers = Headers::from(upstream.headers());

        let body = upstream.bytes().await?;
        debug!(%url, status = status.as_u16(), bytes = body.len(), "origin replied");

        let mut response = Response::new(status)
            .headers(headers.end_to_end())
            .body_bytes(body);
        if *request.method() == Method::Head {
            if let Some(length) = declared_length {
                response = response.declared_length(length);
            }
        }
        Ok(response)
    }
}
