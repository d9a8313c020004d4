use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ipsync_core::{AddEntry, AddResult, StoreError};

use super::store::{NodeControl, StoreApi, StoreBackend};

type AddHook = Box<dyn FnOnce() + Send>;

/// Scripted behavior shared by the fake backend, node and daemons.
#[derive(Default)]
pub struct Script {
    pub node_unreachable: bool,
    pub node_delay: Option<Duration>,
    pub initialized: AtomicBool,
    pub fail_init: bool,
    pub start_error: Option<String>,
    pub config_json: Option<String>,
    pub fail_add: AtomicBool,
    pub hashes: HashMap<String, String>,
    pub node_opens: AtomicUsize,
    pub init_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
    pub add_calls: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub connected_to: Mutex<Vec<String>>,
    pub on_add: Mutex<Option<AddHook>>,
}

impl Script {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_on_add(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_add.lock().unwrap() = Some(Box::new(hook));
    }
}

pub struct FakeBackend(pub Arc<Script>);

pub struct FakeNode(Arc<Script>);

pub struct FakeStore {
    address: String,
    spawned: bool,
    script: Arc<Script>,
}

impl FakeStore {
    pub fn attached(address: &str, script: Arc<Script>) -> Arc<Self> {
        Arc::new(Self {
            address: address.to_string(),
            spawned: false,
            script,
        })
    }
}

#[async_trait]
impl StoreApi for FakeStore {
    fn api_address(&self) -> &str {
        &self.address
    }

    async fn add_files(&self, entries: Vec<AddEntry>) -> Result<Vec<AddResult>, StoreError> {
        self.script.add_calls.fetch_add(1, Ordering::SeqCst);
        let hook = self.script.on_add.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        if self.script.fail_add.load(Ordering::SeqCst) {
            return Err(StoreError::MissingResult("scripted failure".into()));
        }
        Ok(entries
            .into_iter()
            .map(|entry| AddResult {
                hash: self
                    .script
                    .hashes
                    .get(&entry.relative_path)
                    .cloned()
                    .unwrap_or_else(|| format!("Qm{}", entry.relative_path)),
                name: entry.relative_path,
                size: "0".into(),
            })
            .collect())
    }

    async fn shutdown(&self) {
        if self.spawned {
            self.script.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl NodeControl for FakeNode {
    fn is_initialized(&self) -> bool {
        self.0.initialized.load(Ordering::SeqCst)
    }

    async fn init(&self) -> Result<(), StoreError> {
        self.0.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.0.fail_init {
            return Err(StoreError::Config("scripted init failure".into()));
        }
        self.0.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn start_daemon(&self) -> Result<Arc<dyn StoreApi>, StoreError> {
        self.0.start_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(stderr) = &self.0.start_error {
            return Err(StoreError::DaemonExited {
                status: "exit status: 1".into(),
                stderr: stderr.clone(),
            });
        }
        Ok(Arc::new(FakeStore {
            address: "/ip4/127.0.0.1/tcp/5001".into(),
            spawned: true,
            script: Arc::clone(&self.0),
        }))
    }

    async fn config_show(&self) -> Result<String, StoreError> {
        self.0
            .config_json
            .clone()
            .ok_or_else(|| StoreError::Config("scripted config failure".into()))
    }
}

#[async_trait]
impl StoreBackend for FakeBackend {
    async fn get_local_node(&self, _repo_path: &Path) -> Result<Box<dyn NodeControl>, StoreError> {
        self.0.node_opens.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.0.node_delay {
            tokio::time::sleep(delay).await;
        }
        if self.0.node_unreachable {
            return Err(StoreError::Spawn {
                command: "ipfs version".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        Ok(Box::new(FakeNode(Arc::clone(&self.0))))
    }

    fn connect(&self, api_address: &str) -> Result<Arc<dyn StoreApi>, StoreError> {
        self.0
            .connected_to
            .lock()
            .unwrap()
            .push(api_address.to_string());
        Ok(FakeStore::attached(api_address, Arc::clone(&self.0)))
    }
}
