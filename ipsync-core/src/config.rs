use serde::Deserialize;

use crate::client::StoreError;

/// The subset of the daemon descriptor returned by `config show` that the
/// sync engine relies on.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeConfig {
    pub addresses: Addresses,
    #[serde(default)]
    pub identity: Option<Identity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Addresses {
    #[serde(rename = "API")]
    pub api: ApiAddress,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ApiAddress {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Identity {
    #[serde(rename = "PeerID")]
    pub peer_id: String,
}

impl NodeConfig {
    pub fn parse(json: &str) -> Result<Self, StoreError> {
        serde_json::from_str(json).map_err(|err| StoreError::Config(err.to_string()))
    }

    pub fn api_address(&self) -> Result<&str, StoreError> {
        let address = match &self.addresses.api {
            ApiAddress::One(address) => Some(address.as_str()),
            ApiAddress::Many(addresses) => addresses.first().map(String::as_str),
        };
        address
            .filter(|address| !address.trim().is_empty())
            .ok_or_else(|| StoreError::Config("Addresses.API is empty".into()))
    }
}
