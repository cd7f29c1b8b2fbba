//! Process-scoped TLS context cache.
//!
//! TLS client configs are expensive to build and servers fingerprint the
//! cipher order, so configs are cached per (proxy, http2) key and each cache
//! entry gets an independently shuffled cipher-suite order: the first three
//! suites stay in place, the remainder is permuted. Servers doing TLS
//! fingerprinting work off blocklists, so a permuted tail is enough to miss
//! them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use rand::seq::SliceRandom;
use rustls::crypto::{ring, CryptoProvider};
use rustls::{ClientConfig, RootCertStore};

use crate::{HttpError, Result};

/// Cache key: one TLS config per (proxy endpoint, http2) combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct TlsKey {
    pub proxy_url: Option<String>,
    pub http2: bool,
}

/// Cache of cipher-shuffled rustls configs, shared across all networks.
///
/// Constructed explicitly and passed by handle so tests can build isolated
/// instances; [`TlsContextCache::clear`] is the reset entry point.
pub struct TlsContextCache {
    configs: Mutex<HashMap<TlsKey, Arc<ClientConfig>>>,
}

impl TlsContextCache {
    pub fn new() -> Self {
        Self {
            configs: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached config for `key`, building it on first use.
    pub(crate) fn get(&self, key: TlsKey) -> Result<Arc<ClientConfig>> {
        let mut configs = self
            .configs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(config) = configs.get(&key) {
            return Ok(Arc::clone(config));
        }
        let config = Arc::new(build_shuffled_config(key.http2)?);
        configs.insert(key, Arc::clone(&config));
        Ok(config)
    }

    /// Drops every cached config.
    pub fn clear(&self) {
        self.configs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of cached configs.
    pub fn len(&self) -> usize {
        self.configs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TlsContextCache {
    fn default() -> Self {
        Self::new()
    }
}

fn build_shuffled_config(http2: bool) -> Result<ClientConfig> {
    let base = ring::default_provider();
    let mut cipher_suites = base.cipher_suites.clone();
    if cipher_suites.len() > 3 {
        let (_pinned, tail) = cipher_suites.split_at_mut(3);
        tail.shuffle(&mut rand::thread_rng());
    }
    let provider = CryptoProvider {
        cipher_suites,
        ..base
    };

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let mut config = ClientConfig::builder_with_provider(Arc::new(provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| HttpError::Configuration(format!("TLS setup failed: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = if http2 {
        vec![b"h2".to_vec(), b"http/1.1".to_vec()]
    } else {
        vec![b"http/1.1".to_vec()]
    };
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_reuses_config_for_same_key() {
        let cache = TlsContextCache::new();
        let key = TlsKey {
            proxy_url: None,
            http2: true,
        };
        let a = cache.get(key.clone()).unwrap();
        let b = cache.get(key).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_distinct_keys() {
        let cache = TlsContextCache::new();
        cache
            .get(TlsKey {
                proxy_url: None,
                http2: true,
            })
            .unwrap();
        cache
            .get(TlsKey {
                proxy_url: Some("socks5h://127.0.0.1:9050".to_string()),
                http2: true,
            })
            .unwrap();
        cache
            .get(TlsKey {
                proxy_url: None,
                http2: false,
            })
            .unwrap();
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_cache_clear() {
        let cache = TlsContextCache::new();
        cache
            .get(TlsKey {
                proxy_url: None,
                http2: false,
            })
            .unwrap();
        assert!(!cache.is_empty());
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_alpn_follows_http2_flag() {
        let with_h2 = build_shuffled_config(true).unwrap();
        assert!(with_h2.alpn_protocols.contains(&b"h2".to_vec()));
        let without_h2 = build_shuffled_config(false).unwrap();
        assert!(!without_h2.alpn_protocols.contains(&b"h2".to_vec()));
    }

    #[test]
    fn test_leading_ciphers_pinned() {
        let default = ring::default_provider();
        let shuffled = build_shuffled_config(true).unwrap();
        let suites = shuffled.crypto_provider().cipher_suites.clone();
        assert_eq!(suites.len(), default.cipher_suites.len());
        for i in 0..3.min(suites.len()) {
            assert_eq!(
                suites[i].suite(),
                default.cipher_suites[i].suite(),
                "leading suites must keep their order"
            );
        }
    }
}
