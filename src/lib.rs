//! # edgecache
//!
//! A request-fingerprint cache-aside HTTP proxy.
//!
//! Opted-in requests (`cache=true` in the query or JSON body) to a rendering
//! endpoint are fingerprinted, and the artifact `{fingerprint}.{extension}` is
//! looked up in an external object store. Hits are served from the store;
//! everything else is forwarded unmodified to the origin.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use edgecache::{ProxyConfig, ProxyRouter, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProxyConfig::from_env()?;
//!     let router = Arc::new(ProxyRouter::new(&config)?);
//!
//!     let server = Server::bind(&config.listen_addr)
//!         .await?
//!         .max_request_size(config.max_request_bytes);
//!     server
//!         .run(move |req| {
//!             let router = Arc::clone(&router);
//!             async move { router.handle(req).await }
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod fingerprint;
pub mod forward;
pub mod http;
pub mod router;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheClient, CacheError, CacheObject, Endpoint, Probe};
pub use config::{ConfigError, OversizeBodyPolicy, ProxyConfig};
pub use fingerprint::{CacheKeyInput, Fingerprint, Params, fingerprint};
pub use forward::{ForwardError, OriginClient};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::{CacheStatus, Plan, ProxyRouter};
pub use server::{Server, ServerError};
