use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::{StoreClient, StoreError};
use crate::config::NodeConfig;

const REPO_ENV: &str = "IPFS_PATH";
const READY_MARKER: &str = "Daemon is ready";
const API_MARKER: &str = "API server listening on ";
const STDERR_TAIL_LINES: usize = 50;

/// Control surface of a local store node: a store binary bound to one
/// repository directory.
#[derive(Debug, Clone)]
pub struct LocalNode {
    binary: PathBuf,
    repo_path: PathBuf,
}

impl LocalNode {
    /// Fails when the store binary cannot be executed.
    pub async fn open(
        binary: impl Into<PathBuf>,
        repo_path: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let node = Self {
            binary: binary.into(),
            repo_path: repo_path.into(),
        };
        let version = node.run(&["version"]).await?;
        debug!(binary = %node.binary.display(), version = version.trim(), "store binary found");
        Ok(node)
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn is_initialized(&self) -> bool {
        self.repo_path.join("config").is_file()
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.repo_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Spawn {
                    command: format!("mkdir {}", parent.display()),
                    source,
                })?;
        }
        self.run(&["init"]).await?;
        info!(repo = %self.repo_path.display(), "initialized store repository");
        Ok(())
    }

    pub async fn config_show(&self) -> Result<String, StoreError> {
        self.run(&["config", "show"]).await
    }

    /// Spawns `daemon` and waits until it reports readiness.
    pub async fn start_daemon(&self) -> Result<SpawnedDaemon, StoreError> {
        let mut child = self
            .command(&["daemon"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| StoreError::Spawn {
                command: self.describe(&["daemon"]),
                source,
            })?;

        // Drained from the start so a chatty daemon never blocks on a full pipe.
        let stderr_tail = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(collect_tail(stderr)));
        let mut api_address = None;
        let mut outcome = StartupOutcome::Exited;

        if let Some(stdout) = child.stdout.take() {
            let mut stdout = BufReader::new(stdout);
            outcome = loop {
                match next_line(&mut stdout).await {
                    Ok(Some(line)) => {
                        debug!(line = %line, "daemon output");
                        if let Some(address) = parse_api_line(&line) {
                            api_address = Some(address.to_string());
                        }
                        if line.contains(READY_MARKER) {
                            break StartupOutcome::Ready;
                        }
                    }
                    Ok(None) => break StartupOutcome::Exited,
                    Err(err) => break StartupOutcome::Unreadable(err),
                }
            };
            if matches!(outcome, StartupOutcome::Ready) {
                tokio::spawn(drain_lines(stdout));
            }
        }

        if let StartupOutcome::Unreadable(err) = &outcome {
            warn!(error = %err, "daemon output unreadable, stopping it");
            if let Err(err) = child.start_kill() {
                warn!(error = %err, "failed to stop store daemon");
            }
        }
        if !matches!(outcome, StartupOutcome::Ready) {
            let status = match child.wait().await {
                Ok(status) => status.to_string(),
                Err(err) => err.to_string(),
            };
            let stderr = match stderr_tail {
                Some(task) => task.await.unwrap_or_default(),
                None => String::new(),
            };
            return Err(StoreError::DaemonExited {
                status,
                stderr: stderr.trim().to_string(),
            });
        }

        let api_address = match api_address {
            Some(address) => address,
            None => {
                let config = NodeConfig::parse(&self.config_show().await?)?;
                config.api_address()?.to_string()
            }
        };
        info!(api = %api_address, pid = ?child.id(), "store daemon is ready");

        Ok(SpawnedDaemon {
            client: StoreClient::connect(&api_address)?,
            child: Mutex::new(Some(child)),
        })
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .env(REPO_ENV, &self.repo_path)
            .stdin(Stdio::null());
        command
    }

    fn describe(&self, args: &[&str]) -> String {
        format!("{} {}", self.binary.display(), args.join(" "))
    }

    async fn run(&self, args: &[&str]) -> Result<String, StoreError> {
        let output = self
            .command(args)
            .output()
            .await
            .map_err(|source| StoreError::Spawn {
                command: self.describe(args),
                source,
            })?;
        if !output.status.success() {
            return Err(StoreError::CommandFailed {
                command: self.describe(args),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// A daemon process started by this process, plus a client bound to its API.
#[derive(Debug)]
pub struct SpawnedDaemon {
    client: StoreClient,
    child: Mutex<Option<Child>>,
}

impl SpawnedDaemon {
    pub fn client(&self) -> &StoreClient {
        &self.client
    }

    pub async fn shutdown(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        if let Err(err) = child.kill().await {
            warn!(error = %err, "failed to stop store daemon");
        } else {
            info!("store daemon stopped");
        }
    }
}

fn parse_api_line(line: &str) -> Option<&str> {
    let (_, rest) = line.split_once(API_MARKER)?;
    rest.split_whitespace().next()
}

enum StartupOutcome {
    Ready,
    Exited,
    Unreadable(std::io::Error),
}

/// Reads one line, replacing invalid UTF-8 instead of failing on it.
async fn next_line<R>(reader: &mut BufReader<R>) -> std::io::Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf).await? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(&buf);
    Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
}

async fn drain_lines<R>(mut reader: BufReader<R>)
where
    R: AsyncRead + Unpin,
{
    while let Ok(Some(line)) = next_line(&mut reader).await {
        debug!(line = %line, "daemon output");
    }
}

/// Logs every stderr line and keeps the last few for error reports.
async fn collect_tail<R>(stderr: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stderr);
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    while let Ok(Some(line)) = next_line(&mut reader).await {
        debug!(line = %line, "daemon stderr");
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}
