use std::path::{Path, PathBuf};

use anyhow::Context;

const DEFAULT_SYNC_DIR_NAME: &str = "IPFS Sync";
const DEFAULT_REPO_DIR_NAME: &str = ".ipfs";
const DEFAULT_STORE_BINARY: &str = "ipfs";

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub folder: PathBuf,
    pub repo_path: PathBuf,
    pub store_binary: PathBuf,
    pub auto_start: bool,
}

impl SyncConfig {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        let home = dirs::home_dir().unwrap_or_default();
        Self {
            folder: absolute(folder.into()),
            repo_path: absolute(home.join(DEFAULT_REPO_DIR_NAME)),
            store_binary: PathBuf::from(DEFAULT_STORE_BINARY),
            auto_start: true,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let folder = std::env::var("IPSYNC_FOLDER")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| home.join(DEFAULT_SYNC_DIR_NAME));
        let repo_path = std::env::var("IPSYNC_REPO")
            .or_else(|_| std::env::var("IPFS_PATH"))
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| home.join(DEFAULT_REPO_DIR_NAME));
        let store_binary = std::env::var("IPSYNC_STORE_BIN")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_BINARY));
        let auto_start = read_bool_env("IPSYNC_AUTOSTART", true);

        Ok(Self {
            folder: absolute(folder),
            repo_path: absolute(repo_path),
            store_binary,
            auto_start,
        })
    }

    pub fn with_repo_path(mut self, repo_path: impl Into<PathBuf>) -> Self {
        self.repo_path = absolute(repo_path.into());
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }
}

fn absolute(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
