use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use ipsync_core::{AddEntry, AddResult, LocalNode, SpawnedDaemon, StoreClient, StoreError};

/// Ingestion API of a running daemon.
#[async_trait]
pub trait StoreApi: Send + Sync {
    fn api_address(&self) -> &str;

    /// Returns one result per entry, in entry order.
    async fn add_files(&self, entries: Vec<AddEntry>) -> Result<Vec<AddResult>, StoreError>;

    /// Stops the daemon if this process started it.
    async fn shutdown(&self) {}
}

/// Control surface of a local node bound to one repository.
#[async_trait]
pub trait NodeControl: Send + Sync {
    fn is_initialized(&self) -> bool;

    async fn init(&self) -> Result<(), StoreError>;

    async fn start_daemon(&self) -> Result<Arc<dyn StoreApi>, StoreError>;

    /// Raw JSON of the node's daemon configuration.
    async fn config_show(&self) -> Result<String, StoreError>;
}

#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn get_local_node(&self, repo_path: &Path) -> Result<Box<dyn NodeControl>, StoreError>;

    fn connect(&self, api_address: &str) -> Result<Arc<dyn StoreApi>, StoreError>;
}

#[async_trait]
impl StoreApi for StoreClient {
    fn api_address(&self) -> &str {
        StoreClient::api_address(self)
    }

    async fn add_files(&self, entries: Vec<AddEntry>) -> Result<Vec<AddResult>, StoreError> {
        StoreClient::add_files(self, entries).await
    }
}

#[async_trait]
impl StoreApi for SpawnedDaemon {
    fn api_address(&self) -> &str {
        self.client().api_address()
    }

    async fn add_files(&self, entries: Vec<AddEntry>) -> Result<Vec<AddResult>, StoreError> {
        self.client().add_files(entries).await
    }

    async fn shutdown(&self) {
        SpawnedDaemon::shutdown(self).await
    }
}

#[async_trait]
impl NodeControl for LocalNode {
    fn is_initialized(&self) -> bool {
        LocalNode::is_initialized(self)
    }

    async fn init(&self) -> Result<(), StoreError> {
        LocalNode::init(self).await
    }

    async fn start_daemon(&self) -> Result<Arc<dyn StoreApi>, StoreError> {
        let daemon = LocalNode::start_daemon(self).await?;
        Ok(Arc::new(daemon))
    }

    async fn config_show(&self) -> Result<String, StoreError> {
        LocalNode::config_show(self).await
    }
}

/// Drives the store binary installed on this machine.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    binary: PathBuf,
}

impl LocalBackend {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl StoreBackend for LocalBackend {
    async fn get_local_node(&self, repo_path: &Path) -> Result<Box<dyn NodeControl>, StoreError> {
        let node = LocalNode::open(self.binary.clone(), repo_path).await?;
        Ok(Box::new(node))
    }

    fn connect(&self, api_address: &str) -> Result<Arc<dyn StoreApi>, StoreError> {
        Ok(Arc::new(StoreClient::connect(api_address)?))
    }
}
