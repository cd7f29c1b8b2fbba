//! Deserializable settings for the outgoing layer.
//!
//! Mirrors the `outgoing:` section of an engine-driven settings file, plus
//! per-engine network references. Shorthand forms are accepted where the
//! hand-written configs use them: a single proxy URL, a single source IP, a
//! bare status code as a retry condition.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use crate::client::RetryCondition;
use crate::network::NetworkConfig;

/// The `outgoing:` settings block.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutgoingSettings {
    pub request_timeout: f64,
    pub max_request_timeout: Option<f64>,
    pub verify: bool,
    pub enable_http2: bool,
    pub pool_connections: usize,
    pub pool_maxsize: usize,
    pub keepalive_expiry: f64,
    pub source_ips: OneOrMany,
    pub proxies: Option<ProxiesSetting>,
    pub using_tor_proxy: bool,
    pub max_redirects: usize,
    pub retries: u32,
    /// Named extra networks, each a partial override of the defaults.
    pub networks: HashMap<String, NetworkSettings>,
}

impl Default for OutgoingSettings {
    fn default() -> Self {
        Self {
            request_timeout: 3.0,
            max_request_timeout: None,
            verify: true,
            enable_http2: true,
            pool_connections: 100,
            pool_maxsize: 20,
            keepalive_expiry: 5.0,
            source_ips: OneOrMany::default(),
            proxies: None,
            using_tor_proxy: false,
            max_redirects: 30,
            retries: 0,
            networks: HashMap::new(),
        }
    }
}

impl OutgoingSettings {
    /// The configuration every network starts from.
    ///
    /// Plain HTTP stays off unless a network opts in.
    pub fn base_config(&self) -> NetworkConfig {
        NetworkConfig {
            enable_http: false,
            verify: self.verify,
            enable_http2: self.enable_http2,
            max_connections: self.pool_connections,
            max_keepalive_connections: self.pool_maxsize,
            keepalive_expiry: Some(self.keepalive_expiry),
            local_addresses: self.source_ips.clone().into_vec(),
            proxies: self
                .proxies
                .as_ref()
                .map(ProxiesSetting::rules)
                .unwrap_or_default(),
            using_tor_proxy: self.using_tor_proxy,
            max_redirects: self.max_redirects,
            retries: self.retries,
            retry_on_http_error: RetryCondition::Never,
        }
    }

    /// Effective request budget for one engine, in seconds.
    ///
    /// Engines without their own timeout inherit `request_timeout`;
    /// `max_request_timeout` caps both.
    pub fn engine_timeout(&self, engine: &EngineSettings) -> f64 {
        let timeout = engine.timeout.unwrap_or(self.request_timeout);
        match self.max_request_timeout {
            Some(max) => timeout.min(max),
            None => timeout,
        }
    }
}

/// A string or a list of strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

impl Default for OneOrMany {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

/// Proxy setting: a single URL for all traffic, or a pattern map.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ProxiesSetting {
    Single(String),
    Map(BTreeMap<String, OneOrMany>),
}

impl ProxiesSetting {
    /// Normalizes to `(pattern, urls)` rules in a stable order.
    pub fn rules(&self) -> Vec<(String, Vec<String>)> {
        match self {
            ProxiesSetting::Single(url) => vec![("all://".to_string(), vec![url.clone()])],
            ProxiesSetting::Map(map) => map
                .iter()
                .map(|(pattern, urls)| (pattern.clone(), urls.clone().into_vec()))
                .collect(),
        }
    }
}

/// Retry-on-status setting: a flag, one status, or a status list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RetryOnHttpError {
    All(bool),
    Status(u16),
    Statuses(Vec<u16>),
}

impl RetryOnHttpError {
    pub fn to_condition(&self) -> RetryCondition {
        match self {
            RetryOnHttpError::All(true) => RetryCondition::AllErrors,
            RetryOnHttpError::All(false) => RetryCondition::Never,
            RetryOnHttpError::Status(status) => RetryCondition::Status(*status),
            RetryOnHttpError::Statuses(statuses) => RetryCondition::Statuses(statuses.clone()),
        }
    }
}

/// Partial network override; unset fields keep the base value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub enable_http: Option<bool>,
    pub verify: Option<bool>,
    pub enable_http2: Option<bool>,
    pub max_connections: Option<usize>,
    pub max_keepalive_connections: Option<usize>,
    pub keepalive_expiry: Option<f64>,
    pub local_addresses: Option<OneOrMany>,
    pub proxies: Option<ProxiesSetting>,
    pub using_tor_proxy: Option<bool>,
    pub max_redirects: Option<usize>,
    pub retries: Option<u32>,
    pub retry_on_http_error: Option<RetryOnHttpError>,
}

impl NetworkSettings {
    /// Applies the set fields on top of `config`.
    pub fn apply(&self, config: &mut NetworkConfig) {
        if let Some(value) = self.enable_http {
            config.enable_http = value;
        }
        if let Some(value) = self.verify {
            config.verify = value;
        }
        if let Some(value) = self.enable_http2 {
            config.enable_http2 = value;
        }
        if let Some(value) = self.max_connections {
            config.max_connections = value;
        }
        if let Some(value) = self.max_keepalive_connections {
            config.max_keepalive_connections = value;
        }
        if let Some(value) = self.keepalive_expiry {
            config.keepalive_expiry = Some(value);
        }
        if let Some(addresses) = &self.local_addresses {
            config.local_addresses = addresses.clone().into_vec();
        }
        if let Some(proxies) = &self.proxies {
            config.proxies = proxies.rules();
        }
        if let Some(value) = self.using_tor_proxy {
            config.using_tor_proxy = value;
        }
        if let Some(value) = self.max_redirects {
            config.max_redirects = value;
        }
        if let Some(value) = self.retries {
            config.retries = value;
        }
        if let Some(condition) = &self.retry_on_http_error {
            config.retry_on_http_error = condition.to_condition();
        }
    }
}

/// Network binding of one engine: a named network or an inline definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EngineNetworkRef {
    Name(String),
    Inline(NetworkSettings),
}

/// The network-relevant slice of one engine's settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    pub name: String,
    #[serde(default)]
    pub network: Option<EngineNetworkRef>,
    /// Per-engine request budget in seconds.
    #[serde(default)]
    pub timeout: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_defaults() {
        let settings: OutgoingSettings = serde_json::from_str("{}").unwrap();
        assert!(settings.verify);
        assert!(settings.enable_http2);
        assert_eq!(settings.pool_connections, 100);
        assert_eq!(settings.pool_maxsize, 20);
        assert_eq!(settings.retries, 0);
        assert_eq!(settings.max_redirects, 30);
        assert!(!settings.using_tor_proxy);
    }

    #[test]
    fn test_base_config_disables_plain_http() {
        let settings = OutgoingSettings::default();
        let config = settings.base_config();
        assert!(!config.enable_http);
        assert!(config.verify);
    }

    #[test]
    fn test_proxies_single_url() {
        let settings: OutgoingSettings =
            serde_json::from_str(r#"{"proxies": "socks5h://127.0.0.1:9050"}"#).unwrap();
        let rules = settings.proxies.unwrap().rules();
        assert_eq!(
            rules,
            vec![(
                "all://".to_string(),
                vec!["socks5h://127.0.0.1:9050".to_string()]
            )]
        );
    }

    #[test]
    fn test_proxies_pattern_map() {
        let settings: OutgoingSettings = serde_json::from_str(
            r#"{"proxies": {"https:": ["http://p1:1337", "http://p2:1337"], "http:": "http://p3:1337"}}"#,
        )
        .unwrap();
        let rules = settings.proxies.unwrap().rules();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].0, "http:");
        assert_eq!(rules[0].1, vec!["http://p3:1337".to_string()]);
        assert_eq!(rules[1].1.len(), 2);
    }

    #[test]
    fn test_source_ips_single_string() {
        let settings: OutgoingSettings =
            serde_json::from_str(r#"{"source_ips": "192.168.0.1"}"#).unwrap();
        assert_eq!(
            settings.source_ips.into_vec(),
            vec!["192.168.0.1".to_string()]
        );
    }

    #[test]
    fn test_retry_on_http_error_forms() {
        let flag: RetryOnHttpError = serde_json::from_str("true").unwrap();
        assert_eq!(flag.to_condition(), RetryCondition::AllErrors);
        let flag: RetryOnHttpError = serde_json::from_str("false").unwrap();
        assert_eq!(flag.to_condition(), RetryCondition::Never);
        let status: RetryOnHttpError = serde_json::from_str("503").unwrap();
        assert_eq!(status.to_condition(), RetryCondition::Status(503));
        let list: RetryOnHttpError = serde_json::from_str("[403, 429]").unwrap();
        assert_eq!(
            list.to_condition(),
            RetryCondition::Statuses(vec![403, 429])
        );
    }

    #[test]
    fn test_network_settings_apply_partial() {
        let overrides: NetworkSettings =
            serde_json::from_str(r#"{"retries": 2, "enable_http": true}"#).unwrap();
        let mut config = OutgoingSettings::default().base_config();
        overrides.apply(&mut config);
        assert_eq!(config.retries, 2);
        assert!(config.enable_http);
        assert!(config.verify);
        assert_eq!(config.max_redirects, 30);
    }

    #[test]
    fn test_engine_timeout_resolution() {
        let outgoing: OutgoingSettings =
            serde_json::from_str(r#"{"request_timeout": 2.0, "max_request_timeout": 5.0}"#)
                .unwrap();
        let plain: EngineSettings = serde_json::from_str(r#"{"name": "a"}"#).unwrap();
        assert_eq!(outgoing.engine_timeout(&plain), 2.0);
        let slow: EngineSettings =
            serde_json::from_str(r#"{"name": "b", "timeout": 9.0}"#).unwrap();
        assert_eq!(outgoing.engine_timeout(&slow), 5.0);
        let uncapped: OutgoingSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(outgoing.engine_timeout(&plain), 2.0);
        assert_eq!(uncapped.engine_timeout(&slow), 9.0);
    }

    #[test]
    fn test_engine_network_ref_forms() {
        let by_name: EngineSettings =
            serde_json::from_str(r#"{"name": "example", "network": "tor"}"#).unwrap();
        assert!(matches!(by_name.network, Some(EngineNetworkRef::Name(_))));

        let inline: EngineSettings = serde_json::from_str(
            r#"{"name": "example", "network": {"retries": 1, "retry_on_http_error": 503}}"#,
        )
        .unwrap();
        match inline.network {
            Some(EngineNetworkRef::Inline(settings)) => {
                assert_eq!(settings.retries, Some(1));
            }
            _ => panic!("Expected inline network settings"),
        }
    }
}
