//! Request routing: decide per request between the cache store and the origin.
//!
//! [`ProxyRouter::handle`] walks every request through the same small state
//! machine:
//!
//! | Step        | Outcome                                                        |
//! |-------------|----------------------------------------------------------------|
//! | method      | anything but GET/POST is forwarded untouched                   |
//! | normalize   | GET query or POST JSON body becomes a sorted parameter set     |
//! | opt-in      | without `cache=true` the request is forwarded                  |
//! | endpoint    | a path outside the extension table is forwarded                |
//! | probe       | `HEAD {cache}/{fingerprint}.{ext}`; a miss is forwarded         |
//! | fetch       | the stored artifact is returned; a failed fetch is forwarded   |
//!
//! Every failure on the cache side degrades to forwarding. Responses carry an
//! `X-Cache` header of `HIT`, `MISS` or `BYPASS`.

pub mod params;

use tracing::{Instrument, debug, info, info_span, warn};

use crate::cache::{CacheClient, Endpoint, Probe};
use crate::config::{ConfigError, OversizeBodyPolicy, ProxyConfig};
use crate::fingerprint::CacheKeyInput;
use crate::forward::OriginClient;
use crate::http::{Method, Request, Response, StatusCode};

/// Response header reporting how the cache was involved.
pub const X_CACHE: &str = "X-Cache";

/// Value of the [`X_CACHE`] header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from the cache store.
    Hit,
    /// Looked up, not served from the cache store.
    Miss,
    /// Not looked up at all.
    Bypass,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Bypass => "BYPASS",
        }
    }
}

/// Why a request skipped the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    Method,
    BodyTooLarge,
    NotRequested,
    UnknownEndpoint,
}

impl BypassReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Method => "method",
            Self::BodyTooLarge => "body_too_large",
            Self::NotRequested => "not_requested",
            Self::UnknownEndpoint => "unknown_endpoint",
        }
    }
}

/// What the router will do with a request, decided before any I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Forward to the origin without touching the cache.
    Bypass(BypassReason),
    /// Answer `413 Payload Too Large` without contacting anything.
    Reject,
    /// Probe the cache for this key, forwarding on a miss.
    Lookup(CacheKeyInput),
}

/// The cache-aside proxy.
///
/// Immutable after construction; share it between connection tasks behind an
/// [`Arc`](std::sync::Arc).
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use edgecache::{ProxyConfig, ProxyRouter, Server};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ProxyConfig::new("https://cache.example.com", "https://api.example.com");
/// let router = Arc::new(ProxyRouter::new(&config)?);
///
/// let server = Server::bind(&config.listen_addr).await?;
/// server
///     .run(move |req| {
///         let router = Arc::clone(&router);
///         async move { router.handle(req).await }
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ProxyRouter {
    cache: CacheClient,
    origin: OriginClient,
    max_body_bytes: usize,
    oversize_body: OversizeBodyPolicy,
}

impl ProxyRouter {
    /// Builds the router and its two HTTP clients from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if either base URL is invalid.
    pub fn new(config: &ProxyConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_parts(
            CacheClient::new(config)?,
            OriginClient::new(config)?,
            config,
        ))
    }

    /// Assembles a router from pre-built clients.
    pub fn from_parts(cache: CacheClient, origin: OriginClient, config: &ProxyConfig) -> Self {
        Self {
            cache,
            origin,
            max_body_bytes: config.max_body_bytes,
            oversize_body: config.oversize_body,
        }
    }

    /// Handles one request end to end.
    ///
    /// Never fails: cache-side problems fall back to the origin, and origin
    /// transport failures become `502`/`504` responses.
    pub async fn handle(&self, request: Request) -> Response {
        let span = info_span!("proxy", method = %request.method(), path = %request.path());

        async move {
            match self.plan(&request) {
                Plan::Bypass(reason) => {
                    debug!(reason = reason.as_str(), "bypassing cache");
                    self.forward(&request, CacheStatus::Bypass).await
                }
                Plan::Reject => {
                    warn!(
                        bytes = request.body().len(),
                        limit = self.max_body_bytes,
                        "rejecting oversized body"
                    );
                    let mut response = Response::new(StatusCode::PayloadTooLarge)
                        .body("Request entity too large");
                    response.set_header(X_CACHE, CacheStatus::Bypass.as_str());
                    response
                }
                Plan::Lookup(key) => self.lookup(&request, &key).await,
            }
        }
        .instrument(span)
        .await
    }

    /// Classifies a request without performing any I/O.
    pub fn plan(&self, request: &Request) -> Plan {
        let method = request.method();
        if !method.is_cacheable() {
            return Plan::Bypass(BypassReason::Method);
        }

        let params = if *method == Method::Post {
            if request.body().len() > self.max_body_bytes {
                return match self.oversize_body {
                    OversizeBodyPolicy::Forward => Plan::Bypass(BypassReason::BodyTooLarge),
                    OversizeBodyPolicy::Reject => Plan::Reject,
                };
            }
            params::body_params(request.body())
        } else {
            params::query_params(request.query_string().unwrap_or_default())
        };

        if !params.cache_requested() {
            return Plan::Bypass(BypassReason::NotRequested);
        }

        let Some(endpoint) = Endpoint::from_path(request.path()) else {
            return Plan::Bypass(BypassReason::UnknownEndpoint);
        };

        let extension = endpoint.extension(params.format()).to_owned();
        Plan::Lookup(CacheKeyInput::new(params, extension))
    }

    async fn lookup(&self, request: &Request, key: &CacheKeyInput) -> Response {
        let fingerprint = key.fingerprint();
        let extension = key.extension();
        debug!(
            %fingerprint,
            extension,
            params = %key.params().canonical(),
            "cacheable request"
        );

        if self.cache.probe(&fingerprint, extension).await == Probe::Hit {
            match self.cache.fetch(&fingerprint, extension).await {
                Ok(object) => {
                    info!(
                        url = %object.url,
                        content_type = object.content_type().unwrap_or("unknown"),
                        bytes = object.body.len(),
                        "cache hit"
                    );
                    let mut response = object.into_response();
                    response.set_header(X_CACHE, CacheStatus::Hit.as_str());
                    return response;
                }
                Err(e) => warn!(error = %e, "cached object unavailable, forwarding to origin"),
            }
        }

        self.forward(request, CacheStatus::Miss).await
    }

    async fn forward(&self, request: &Request, status: CacheStatus) -> Response {
        let mut response = match self.origin.forward(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "origin request failed");
                e.into_response()
            }
        };
        response.set_header(X_CACHE, status.as_str());
        response
    }
}
