//! Named networks and the process-wide registry.
//!
//! A [`Network`] owns the rotation state for one named configuration and a
//! cache of ready clients keyed by the rotation slot they were built for.
//! The [`NetworkRegistry`] materializes the networks described by the
//! settings: the default network, the `ipv4`/`ipv6`/`image_proxy` built-ins,
//! the named extras, and one network per engine that asks for its own.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::addr::{AddressCycle, ProxyCycle};
use crate::client::{ClientSettings, HttpSend, RetryCondition, SoftErrorClient};
use crate::runtime::LoopHandle;
use crate::settings::{EngineNetworkRef, EngineSettings, OutgoingSettings};
use crate::tls::TlsContextCache;
use crate::tor::{TorCheckCache, TorClient};
use crate::{HttpError, Result};

/// Name of the fallback network every unbound request uses.
pub const DEFAULT_NETWORK: &str = "__DEFAULT__";

/// Resolved configuration of one network.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub enable_http: bool,
    pub verify: bool,
    pub enable_http2: bool,
    pub max_connections: usize,
    pub max_keepalive_connections: usize,
    pub keepalive_expiry: Option<f64>,
    pub local_addresses: Vec<String>,
    /// `(pattern, urls)` proxy rules, before pattern normalization.
    pub proxies: Vec<(String, Vec<String>)>,
    pub using_tor_proxy: bool,
    pub max_redirects: usize,
    /// Transport and soft retries granted per request.
    pub retries: u32,
    pub retry_on_http_error: RetryCondition,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            enable_http: true,
            verify: true,
            enable_http2: false,
            max_connections: 100,
            max_keepalive_connections: 10,
            keepalive_expiry: Some(5.0),
            local_addresses: Vec::new(),
            proxies: Vec::new(),
            using_tor_proxy: false,
            max_redirects: 30,
            retries: 0,
            retry_on_http_error: RetryCondition::Never,
        }
    }
}

/// One step of both rotations; the cache key for a ready client.
type RotationKey = (Option<IpAddr>, Vec<(String, String)>);

struct NetworkState {
    addresses: AddressCycle,
    proxies: ProxyCycle,
    clients: HashMap<RotationKey, Arc<dyn HttpSend>>,
}

/// A named outbound configuration with rotating local addresses and proxies.
pub struct Network {
    name: String,
    config: NetworkConfig,
    loop_handle: LoopHandle,
    tls: Arc<TlsContextCache>,
    tor_cache: Arc<TorCheckCache>,
    state: Mutex<NetworkState>,
}

impl Network {
    pub fn new(
        name: impl Into<String>,
        config: NetworkConfig,
        loop_handle: LoopHandle,
        tls: Arc<TlsContextCache>,
        tor_cache: Arc<TorCheckCache>,
    ) -> Result<Self> {
        let addresses = AddressCycle::parse(&config.local_addresses)?;
        let proxies = ProxyCycle::new(&config.proxies);
        Ok(Self {
            name: name.into(),
            config,
            loop_handle,
            tls,
            tor_cache,
            state: Mutex::new(NetworkState {
                addresses,
                proxies,
                clients: HashMap::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Retries granted per request on this network.
    pub fn retries(&self) -> u32 {
        self.config.retries
    }

    /// Advances both rotations one step and returns the client for the
    /// drawn slot, building it on first use.
    ///
    /// Rotation advance and cache lookup happen under one lock, so
    /// concurrent callers each get a distinct slot and a slot's client is
    /// built exactly once.
    pub fn get_http_client(&self) -> Result<Arc<dyn HttpSend>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let address = state.addresses.next_address();
        let slot = state.proxies.next_slot();
        let key: RotationKey = (address, slot.clone());
        if let Some(client) = state.clients.get(&key) {
            if !client.is_closed() {
                return Ok(Arc::clone(client));
            }
        }
        debug!(network = %self.name, ?address, ?slot, "building client");
        let client = self.build_client(address, &slot)?;
        state.clients.insert(key, Arc::clone(&client));
        Ok(client)
    }

    fn build_client(
        &self,
        address: Option<IpAddr>,
        slot: &[(String, String)],
    ) -> Result<Arc<dyn HttpSend>> {
        let settings = ClientSettings {
            enable_http: self.config.enable_http,
            verify: self.config.verify,
            enable_http2: self.config.enable_http2,
            max_keepalive_connections: self.config.max_keepalive_connections,
            keepalive_expiry: self.config.keepalive_expiry,
            proxies: slot.to_vec(),
            local_address: address,
            max_redirects: self.config.max_redirects,
            // Redirects are opt-in per request, the GET/OPTIONS helpers turn
            // them on.
            follow_redirects: false,
        };
        let soft = SoftErrorClient::new(
            settings,
            self.config.retry_on_http_error.clone(),
            self.loop_handle.clone(),
            Arc::clone(&self.tls),
        )?;
        if self.config.using_tor_proxy {
            let tor = TorClient::new(soft, slot, &self.tor_cache)?;
            Ok(Arc::new(tor))
        } else {
            Ok(Arc::new(soft))
        }
    }

    /// Closes every cached client; later calls rebuild.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for client in state.clients.values() {
            client.close();
        }
        state.clients.clear();
    }
}

/// All networks of the process, materialized from the settings.
pub struct NetworkRegistry {
    networks: HashMap<String, Arc<Network>>,
    default: Arc<Network>,
    tls: Arc<TlsContextCache>,
    tor_cache: Arc<TorCheckCache>,
}

impl NetworkRegistry {
    /// Builds the registry.
    ///
    /// A broken default network is fatal; a broken extra or engine network
    /// is skipped with a warning and its engines fall back to the default.
    pub fn initialize(
        outgoing: &OutgoingSettings,
        engines: &[EngineSettings],
        loop_handle: LoopHandle,
    ) -> Result<Self> {
        let tls = Arc::new(TlsContextCache::new());
        let tor_cache = Arc::new(TorCheckCache::new());
        let base = outgoing.base_config();

        let default = Arc::new(Network::new(
            DEFAULT_NETWORK,
            base.clone(),
            loop_handle.clone(),
            Arc::clone(&tls),
            Arc::clone(&tor_cache),
        )?);

        let mut networks: HashMap<String, Arc<Network>> = HashMap::new();
        networks.insert(DEFAULT_NETWORK.to_string(), Arc::clone(&default));

        let add = |name: &str,
                   config: NetworkConfig,
                   networks: &mut HashMap<String, Arc<Network>>| {
            match Network::new(
                name,
                config,
                loop_handle.clone(),
                Arc::clone(&tls),
                Arc::clone(&tor_cache),
            ) {
                Ok(network) => {
                    networks.insert(name.to_string(), Arc::new(network));
                }
                Err(error) => {
                    warn!(network = name, %error, "skipping misconfigured network");
                }
            }
        };

        let mut ipv4 = base.clone();
        ipv4.local_addresses = vec!["0.0.0.0".to_string()];
        add("ipv4", ipv4, &mut networks);

        let mut ipv6 = base.clone();
        ipv6.local_addresses = vec!["::".to_string()];
        add("ipv6", ipv6, &mut networks);

        let mut image_proxy = base.clone();
        image_proxy.enable_http2 = false;
        add("image_proxy", image_proxy, &mut networks);

        for (name, overrides) in &outgoing.networks {
            let mut config = base.clone();
            overrides.apply(&mut config);
            add(name, config, &mut networks);
        }

        // Engines with an inline definition get their own network first, so
        // other engines can reference them by name in the second pass.
        for engine in engines {
            if let Some(EngineNetworkRef::Inline(overrides)) = &engine.network {
                let mut config = base.clone();
                overrides.apply(&mut config);
                add(&engine.name, config, &mut networks);
            }
        }
        for engine in engines {
            if let Some(EngineNetworkRef::Name(reference)) = &engine.network {
                match networks.get(reference) {
                    Some(network) => {
                        let network = Arc::clone(network);
                        networks.insert(engine.name.clone(), network);
                    }
                    None => warn!(
                        engine = %engine.name,
                        network = %reference,
                        "engine references unknown network, using default"
                    ),
                }
            }
        }

        Ok(Self {
            networks,
            default,
            tls,
            tor_cache,
        })
    }

    /// Looks up a network; unknown or absent names resolve to the default.
    pub fn get(&self, name: Option<&str>) -> Arc<Network> {
        name.and_then(|name| self.networks.get(name))
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::clone(&self.default))
    }

    pub fn default_network(&self) -> Arc<Network> {
        Arc::clone(&self.default)
    }

    /// Sorted names of all registered networks.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.networks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Eagerly builds the clients of every Tor-gated network, surfacing the
    /// verification outcome before the first real request.
    pub fn check_configuration(&self) -> Result<()> {
        let mut failures = Vec::new();
        for network in self.networks.values() {
            if network.config().using_tor_proxy {
                if let Err(error) = network.get_http_client() {
                    warn!(network = network.name(), %error, "network failed verification");
                    failures.push(format!("{}: {error}", network.name()));
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            failures.sort();
            Err(HttpError::Configuration(format!(
                "networks failed verification: {}",
                failures.join("; ")
            )))
        }
    }

    /// Closes every network's clients.
    pub fn close_all(&self) {
        for network in self.networks.values() {
            network.close();
        }
    }

    /// Shared TLS context cache.
    pub fn tls_cache(&self) -> &Arc<TlsContextCache> {
        &self.tls
    }

    /// Shared Tor verification cache.
    pub fn tor_cache(&self) -> &Arc<TorCheckCache> {
        &self.tor_cache
    }
}
