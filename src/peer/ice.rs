use serde::Deserialize;
use std::time::Duration;
use strum::{Display, EnumString};

use crate::error::{AppError, Result};

/// One ICE server descriptor as returned by the relay credential service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    pub fn is_relay(&self) -> bool {
        self.urls
            .iter()
            .any(|u| u.starts_with("turn:") || u.starts_with("turns:"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum IceTransportPolicy {
    All,
    Relay,
}

/// What the peer connection is initialised with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcConfiguration {
    pub ice_servers: Vec<IceServer>,
    pub ice_transport_policy: IceTransportPolicy,
}

impl RtcConfiguration {
    /// All media goes through the relay; fails when no TURN server is present.
    pub fn relay_only(ice_servers: Vec<IceServer>) -> Result<Self> {
        if ice_servers.is_empty() {
            return Err(AppError::PeerSessionSetup(
                "relay service returned no ICE servers".to_string(),
            ));
        }
        if !ice_servers.iter().any(IceServer::is_relay) {
            return Err(AppError::PeerSessionSetup(
                "relay-only transport needs at least one turn: server".to_string(),
            ));
        }
        Ok(Self {
            ice_servers,
            ice_transport_policy: IceTransportPolicy::Relay,
        })
    }
}

/// Source of relay credentials, queried once per peer session.
pub trait IceServerProvider {
    fn fetch(&self) -> Result<Vec<IceServer>>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
struct RawIceServer {
    #[serde(default)]
    urls: Option<OneOrMany>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    credential: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum IceResponse {
    Wrapped {
        #[serde(alias = "iceServers")]
        ice_servers: Vec<RawIceServer>,
    },
    Bare(Vec<RawIceServer>),
}

/// Parse a credential service response.
///
/// Accepts `{"ice_servers": [...]}`, `{"iceServers": [...]}` or a bare array;
/// each entry may use `url` or `urls` (string or list).
pub fn parse_ice_servers(json: &str) -> Result<Vec<IceServer>> {
    let response: IceResponse = serde_json::from_str(json)?;
    let raw = match response {
        IceResponse::Wrapped { ice_servers } => ice_servers,
        IceResponse::Bare(list) => list,
    };

    let servers = raw
        .into_iter()
        .filter_map(|s| {
            let mut urls = match s.urls {
                Some(OneOrMany::One(u)) => vec![u],
                Some(OneOrMany::Many(us)) => us,
                None => Vec::new(),
            };
            if let Some(u) = s.url
                && !urls.contains(&u)
            {
                urls.push(u);
            }
            (!urls.is_empty()).then_some(IceServer {
                urls,
                username: s.username,
                credential: s.credential,
            })
        })
        .collect();
    Ok(servers)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Credential service endpoint; when unset, `servers` is used as is
    pub endpoint: Option<String>,

    /// Environment variable holding the service key
    pub api_key_env: String,

    /// Timeout for the credential request, in seconds
    pub timeout_secs: u64,

    /// Static servers, used when no endpoint is configured
    pub servers: Vec<StaticIceServer>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_env: "RELAY_API_KEY".to_string(),
            timeout_secs: 10,
            servers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaticIceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl RelayConfig {
    /// Provider matching this config: HTTP service if an endpoint is set, static list otherwise.
    pub fn provider(&self) -> Box<dyn IceServerProvider> {
        match &self.endpoint {
            Some(endpoint) => Box::new(HttpIceProvider {
                endpoint: endpoint.clone(),
                api_key: std::env::var(&self.api_key_env).ok(),
                timeout: Duration::from_secs(self.timeout_secs.max(1)),
            }),
            None => Box::new(StaticIceProvider::new(
                self.servers
                    .iter()
                    .map(|s| IceServer {
                        urls: s.urls.clone(),
                        username: s.username.clone(),
                        credential: s.credential.clone(),
                    })
                    .collect(),
            )),
        }
    }
}

/// Fetches ICE servers from an HTTP credential service.
#[derive(Debug, Clone)]
pub struct HttpIceProvider {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl IceServerProvider for HttpIceProvider {
    fn fetch(&self) -> Result<Vec<IceServer>> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            AppError::PeerSessionSetup("relay service key is not set".to_string())
        })?;

        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();
        let response = agent
            .get(&self.endpoint)
            .set("Authorization", &format!("Bearer {api_key}"))
            .set("Accept", "application/json")
            .call()
            .map_err(|e| AppError::PeerSessionSetup(format!("relay service request failed: {e}")))?;
        let body = response
            .into_string()
            .map_err(|e| AppError::PeerSessionSetup(format!("relay service response: {e}")))?;

        let servers = parse_ice_servers(&body)
            .map_err(|e| AppError::PeerSessionSetup(format!("relay service response: {e}")))?;
        tracing::info!("Fetched {} ICE servers from relay service", servers.len());
        Ok(servers)
    }
}

/// Fixed list of ICE servers.
#[derive(Debug, Clone, Default)]
pub struct StaticIceProvider {
    servers: Vec<IceServer>,
}

impl StaticIceProvider {
    pub fn new(servers: Vec<IceServer>) -> Self {
        Self { servers }
    }
}

impl IceServerProvider for StaticIceProvider {
    fn fetch(&self) -> Result<Vec<IceServer>> {
        Ok(self.servers.clone())
    }
}
