use std::path::Path;
use std::sync::Arc;

use ipsync_core::{NodeConfig, StoreError};
use thiserror::Error;
use tracing::{info, warn};

use super::store::{NodeControl, StoreApi, StoreBackend};

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("store node is unreachable: {0}")]
    Node(#[source] StoreError),
    #[error("repository init failed: {0}")]
    Init(#[source] StoreError),
    #[error("daemon start failed ({start}) and no running daemon could be attached: {attach}")]
    Attach {
        start: StoreError,
        #[source]
        attach: StoreError,
    },
}

/// Terminal success states of daemon acquisition.
pub enum Acquired {
    Started(Arc<dyn StoreApi>),
    Attached(Arc<dyn StoreApi>),
}

impl Acquired {
    pub fn daemon(&self) -> &Arc<dyn StoreApi> {
        match self {
            Acquired::Started(daemon) | Acquired::Attached(daemon) => daemon,
        }
    }

    pub fn into_daemon(self) -> Arc<dyn StoreApi> {
        match self {
            Acquired::Started(daemon) | Acquired::Attached(daemon) => daemon,
        }
    }

    pub fn is_attached(&self) -> bool {
        matches!(self, Acquired::Attached(_))
    }
}

/// Opens the node at `repo_path`, initializes its repository when needed and
/// starts the daemon, attaching to an already running one if start fails.
pub async fn acquire_daemon(
    backend: &dyn StoreBackend,
    repo_path: &Path,
) -> Result<Acquired, AcquireError> {
    let node = backend
        .get_local_node(repo_path)
        .await
        .map_err(AcquireError::Node)?;
    init_node(node.as_ref(), repo_path).await?;
    start_daemon(backend, node.as_ref()).await
}

async fn init_node(node: &dyn NodeControl, repo_path: &Path) -> Result<(), AcquireError> {
    if node.is_initialized() {
        return Ok(());
    }
    info!(repo = %repo_path.display(), "initializing store repository");
    node.init().await.map_err(AcquireError::Init)
}

async fn start_daemon(
    backend: &dyn StoreBackend,
    node: &dyn NodeControl,
) -> Result<Acquired, AcquireError> {
    let start = match node.start_daemon().await {
        Ok(daemon) => {
            info!(api = daemon.api_address(), "store daemon started");
            return Ok(Acquired::Started(daemon));
        }
        Err(err) => err,
    };
    warn!(error = %start, "daemon start failed, attaching to running daemon");

    match attach_existing(backend, node).await {
        Ok(daemon) => {
            info!(api = daemon.api_address(), "attached to running store daemon");
            Ok(Acquired::Attached(daemon))
        }
        Err(attach) => Err(AcquireError::Attach { start, attach }),
    }
}

async fn attach_existing(
    backend: &dyn StoreBackend,
    node: &dyn NodeControl,
) -> Result<Arc<dyn StoreApi>, StoreError> {
    let raw = node.config_show().await?;
    let config = NodeConfig::parse(&raw)?;
    backend.connect(config.api_address()?)
}
