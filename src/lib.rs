//! # metanet
//!
//! Outbound HTTP request layer for meta search engines, inspired by the
//! SearXNG network stack.
//!
//! All connections are driven by one dedicated I/O loop thread; calling
//! threads stay synchronous and block on completions with a deadline. On top
//! of that sit:
//!
//! - Named networks with rotating source addresses and proxies
//! - Soft retries on configurable HTTP statuses
//! - Tor-gated networks that verify their proxies before serving traffic
//! - A shared request budget per calling thread
//! - Pull-based response streaming
//!
//! ## Example
//!
//! ```rust,no_run
//! use metanet::{CallContext, NetworkRegistry, OutgoingSettings, RequestOptions, RuntimeLoop};
//! use std::time::Duration;
//!
//! fn main() -> metanet::Result<()> {
//!     let rt = RuntimeLoop::start()?;
//!     let registry = NetworkRegistry::initialize(
//!         &OutgoingSettings::default(),
//!         &[],
//!         rt.handle(),
//!     )?;
//!
//!     let mut ctx = CallContext::new(registry.get(None));
//!     ctx.set_timeout(Some(Duration::from_secs(5)), None);
//!     let response = ctx.get("https://example.com/", RequestOptions::new())?;
//!     println!("{} ({} bytes)", response.status(), response.body().len());
//!     Ok(())
//! }
//! ```

mod addr;
mod classify;
mod client;
mod context;
mod engine;
mod error;
mod metrics;
mod network;
mod request;
mod response;
mod runtime;
mod settings;
mod shared;
mod tls;
mod tor;

pub use classify::classify_response;
pub use client::{HttpSend, RetryCondition};
pub use context::{CallContext, DEFAULT_TIMEOUT};
pub use engine::{
    run_search, send_provider_request, ProviderResult, RequestParams, SearchProvider,
};
pub use error::{ClassifiedError, HttpError, Result};
pub use metrics::{ErrorRecord, ErrorRecorder, MemoryRecorder, NullRecorder};
pub use network::{Network, NetworkConfig, NetworkRegistry, DEFAULT_NETWORK};
pub use request::{BasicAuth, RequestBody, RequestDescriptor, RequestOptions};
pub use response::{ByteStream, HttpResponse};
pub use runtime::{Completion, LoopHandle, RuntimeLoop};
pub use settings::{
    EngineNetworkRef, EngineSettings, NetworkSettings, OneOrMany, OutgoingSettings,
    ProxiesSetting, RetryOnHttpError,
};
pub use shared::{InMemoryStorage, SharedStorage};
pub use tls::TlsContextCache;
pub use tor::TorCheckCache;

pub use reqwest::Method;
