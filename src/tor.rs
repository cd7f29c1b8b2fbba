//! Tor-gated client: refuses to serve traffic unless the configured proxies
//! verifiably route through Tor.
//!
//! Verification has a structural half (every proxy must resolve hostnames
//! remotely, so DNS cannot leak past the proxy) and a behavioral half (a
//! probe to the Tor project's exit-node check). Results are cached per proxy
//! configuration so a registry with many Tor networks probes each
//! configuration once.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::client::{HttpSend, ProxyKind, ResponseFuture, SoftErrorClient};
use crate::request::RequestOptions;
use crate::runtime::LoopHandle;
use crate::{HttpError, Result};

const TOR_CHECK_URL: &str = "https://check.torproject.org/api/ip";
const TOR_CHECK_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TorCheckResponse {
    #[serde(rename = "IsTor")]
    is_tor: bool,
}

/// Cache of Tor verification verdicts, keyed by the ordered proxy
/// configuration.
pub struct TorCheckCache {
    results: Mutex<HashMap<Vec<(String, String)>, bool>>,
}

impl TorCheckCache {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, proxies: &[(String, String)]) -> Option<bool> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(proxies)
            .copied()
    }

    fn set(&self, proxies: Vec<(String, String)>, verdict: bool) {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(proxies, verdict);
    }

    /// Drops every cached verdict, forcing re-verification.
    pub fn clear(&self) {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TorCheckCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Client that only comes up after its proxy configuration passed Tor
/// verification.
pub(crate) struct TorClient {
    inner: SoftErrorClient,
}

impl TorClient {
    /// Builds the inner client and runs the Tor check against it; a failed
    /// check closes the client and fails construction.
    pub(crate) fn new(inner: SoftErrorClient, proxies: &[(String, String)], cache: &TorCheckCache) -> Result<Self> {
        if let Err(error) = verify_tor(&inner, proxies, cache) {
            inner.close();
            return Err(error);
        }
        Ok(Self { inner })
    }
}

fn verify_tor(
    client: &SoftErrorClient,
    proxies: &[(String, String)],
    cache: &TorCheckCache,
) -> Result<()> {
    if proxies.is_empty() {
        return Err(HttpError::Configuration(
            "Tor is required but no proxy is configured".to_string(),
        ));
    }
    // Structural check first: client-side DNS resolution leaks every
    // hostname past the proxy, Tor or not.
    for (pattern, proxy_url) in proxies {
        let kind = ProxyKind::from_url(proxy_url)?;
        if !kind.remote_dns() {
            return Err(HttpError::Configuration(format!(
                "proxy {proxy_url} ({pattern}) resolves DNS locally and cannot guarantee Tor"
            )));
        }
    }
    match cache.get(proxies) {
        Some(true) => return Ok(()),
        Some(false) => {
            return Err(HttpError::Configuration(
                "proxy configuration previously failed the Tor check".to_string(),
            ))
        }
        None => {}
    }
    let verdict = probe_tor(client)?;
    cache.set(proxies.to_vec(), verdict);
    if verdict {
        debug!("Tor check passed");
        Ok(())
    } else {
        warn!("Tor check failed: exit traffic is not routed through Tor");
        Err(HttpError::Configuration(
            "proxy configuration does not route traffic through Tor".to_string(),
        ))
    }
}

fn probe_tor(client: &SoftErrorClient) -> Result<bool> {
    let response = client.send(
        false,
        Method::GET,
        TOR_CHECK_URL.to_string(),
        Some(TOR_CHECK_TIMEOUT),
        RequestOptions::default(),
    )?;
    let check: TorCheckResponse = response.json()?;
    Ok(check.is_tor)
}

impl HttpSend for TorClient {
    fn response_future(
        &self,
        stream: bool,
        method: Method,
        url: String,
        timeout: Option<Duration>,
        options: RequestOptions,
    ) -> ResponseFuture {
        self.inner.response_future(stream, method, url, timeout, options)
    }

    fn loop_handle(&self) -> &LoopHandle {
        self.inner.loop_handle()
    }

    fn close(&self) {
        self.inner.close();
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
