mod address;
mod client;
mod config;
mod node;

pub use address::api_base_url;
pub use client::{AddEntry, AddResult, StoreClient, StoreError, VersionInfo};
pub use config::{Addresses, ApiAddress, Identity, NodeConfig};
pub use node::{LocalNode, SpawnedDaemon};
