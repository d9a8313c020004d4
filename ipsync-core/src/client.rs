use std::collections::HashMap;
use std::io;

use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use url::Url;
use url::form_urlencoded::byte_serialize;

use crate::address::api_base_url;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("unsupported api address: {0}")]
    Address(String),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("malformed api response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("store returned no result for {0}")]
    MissingResult(String),
    #[error("invalid daemon config: {0}")]
    Config(String),
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("daemon exited before becoming ready ({status}): {stderr}")]
    DaemonExited { status: String, stderr: String },
}

/// One file handed to the store for ingestion.
#[derive(Debug)]
pub struct AddEntry {
    pub relative_path: String,
    pub file: tokio::fs::File,
}

/// Ingestion result for a single file, as reported by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AddResult {
    #[serde(rename(deserialize = "Name"))]
    pub name: String,
    #[serde(rename(deserialize = "Hash"))]
    pub hash: String,
    #[serde(rename(deserialize = "Size"), default)]
    pub size: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VersionInfo {
    pub version: String,
    #[serde(default)]
    pub commit: String,
}

#[derive(Clone)]
pub struct StoreClient {
    http: Client,
    base_url: Url,
    api_address: String,
}

impl StoreClient {
    pub fn connect(api_address: &str) -> Result<Self, StoreError> {
        Ok(Self {
            http: Client::new(),
            base_url: api_base_url(api_address)?,
            api_address: api_address.to_string(),
        })
    }

    pub fn api_address(&self) -> &str {
        &self.api_address
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn version(&self) -> Result<VersionInfo, StoreError> {
        let url = self.endpoint("api/v0/version")?;
        let response = self.http.post(url).send().await?;
        let body = Self::handle_response(response).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Submits every entry in a single request and returns one result per
    /// entry, in the order the entries were given.
    pub async fn add_files(&self, entries: Vec<AddEntry>) -> Result<Vec<AddResult>, StoreError> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut url = self.endpoint("api/v0/add")?;
        url.query_pairs_mut()
            .append_pair("pin", "true")
            .append_pair("wrap-with-directory", "false");

        let mut order = Vec::with_capacity(entries.len());
        let mut form = Form::new();
        for entry in entries {
            let file_name: String = byte_serialize(entry.relative_path.as_bytes()).collect();
            let body = Body::wrap_stream(ReaderStream::new(entry.file));
            let part = Part::stream(body)
                .file_name(file_name)
                .mime_str("application/octet-stream")?;
            form = form.part("file", part);
            order.push(entry.relative_path);
        }

        let response = self.http.post(url).multipart(form).send().await?;
        let body = Self::handle_response(response).await?;
        let mut by_name = parse_add_response(&body)?;

        order
            .into_iter()
            .map(|path| {
                by_name
                    .remove(&path)
                    .ok_or(StoreError::MissingResult(path))
            })
            .collect()
    }

    fn endpoint(&self, path: &str) -> Result<Url, StoreError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response(response: reqwest::Response) -> Result<String, StoreError> {
        if response.status().is_success() {
            Ok(response.text().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::Api { status, body })
        }
    }
}

impl std::fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreClient")
            .field("api_address", &self.api_address)
            .finish()
    }
}

// The add endpoint streams one JSON object per line, including entries for
// intermediate directories.
fn parse_add_response(body: &str) -> Result<HashMap<String, AddResult>, StoreError> {
    let mut out = HashMap::new();
    for line in body.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let result: AddResult = serde_json::from_str(line)?;
        out.insert(result.name.clone(), result);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_newline_delimited_add_results() {
        let body = concat!(
            "{\"Name\":\"docs/a.txt\",\"Hash\":\"QmA\",\"Size\":\"12\"}\n",
            "{\"Name\":\"docs\",\"Hash\":\"QmDir\",\"Size\":\"60\"}\n",
            "\n"
        );
        let parsed = parse_add_response(body).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["docs/a.txt"].hash, "QmA");
        assert_eq!(parsed["docs/a.txt"].size, "12");
    }

    #[test]
    fn rejects_garbage_lines() {
        assert!(matches!(
            parse_add_response("not json"),
            Err(StoreError::Decode(_))
        ));
    }

    #[test]
    fn connect_remembers_the_original_address() {
        let client = StoreClient::connect("/ip4/127.0.0.1/tcp/5001").unwrap();
        assert_eq!(client.api_address(), "/ip4/127.0.0.1/tcp/5001");
        assert_eq!(client.base_url().as_str(), "http://127.0.0.1:5001/");
    }
}
