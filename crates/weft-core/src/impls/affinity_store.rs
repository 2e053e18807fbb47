//! MachineAffinityStore - 書いたノードから直接読むデコレータ
//!
//! # 設計原則
//! - 成果物はノード間で複製しない。書いたノードのローカルストアにだけ置く
//! - ファイル名は `<machine-id>,<file>`（`ports::machine::with_machine_id`）
//! - `read` / `del` は basename の machine id を見て、自ノードならローカル、
//!   他ノードなら `http://<machine-id>:<port>/<path>` の sidecar に問い合わせる
//! - リモートへの到達失敗はストアのエラーとして返す（この層ではリトライしない）

use async_trait::async_trait;
use futures::TryStreamExt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::io::StreamReader;

use crate::domain::errors::WeftError;
use crate::ports::{BlobReader, BlobSource, ContentStore, MachineIdentifier, machine_id_of};

/// sidecar の既定ポート
pub const DEFAULT_STORE_PORT: u16 = 777;

const REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct MachineAffinityStore {
    local: Arc<dyn ContentStore>,
    machine: Arc<dyn MachineIdentifier>,
    http: reqwest::Client,
    port: u16,
}

impl MachineAffinityStore {
    pub fn new(local: Arc<dyn ContentStore>, machine: Arc<dyn MachineIdentifier>) -> Self {
        Self {
            local,
            machine,
            http: reqwest::Client::new(),
            port: DEFAULT_STORE_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Machine that owns `path`, or None when it is ours (or carries no id).
    fn remote_owner<'a>(&self, path: &'a str) -> Option<&'a str> {
        machine_id_of(path).filter(|id| *id != self.machine.machine_id())
    }

    fn remote_url(&self, machine: &str, path: &str) -> String {
        format!(
            "http://{}:{}/{}",
            machine,
            self.port,
            path.trim_start_matches('/')
        )
    }

    async fn remote_error(method: &str, url: String, resp: reqwest::Response) -> WeftError {
        let status = resp.status().as_u16();
        let message = resp.text().await.unwrap_or_default();
        WeftError::Remote {
            method: method.to_string(),
            url,
            status,
            message,
        }
    }
}

#[async_trait]
impl ContentStore for MachineAffinityStore {
    async fn read(&self, path: &str) -> Result<BlobReader, WeftError> {
        let Some(owner) = self.remote_owner(path) else {
            return self.local.read(path).await;
        };

        let url = self.remote_url(owner, path);
        let started = Instant::now();
        let resp = self.http.get(&url).timeout(REMOTE_TIMEOUT).send().await?;
        tracing::debug!(%url, cost = ?started.elapsed(), status = resp.status().as_u16(), "remote read");

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(WeftError::not_found(path));
        }
        if !resp.status().is_success() {
            return Err(Self::remote_error("GET", url, resp).await);
        }

        let body = resp.bytes_stream().map_err(io::Error::other);
        Ok(Box::new(StreamReader::new(Box::pin(body))))
    }

    async fn put(&self, path: &str, source: Box<dyn BlobSource>) -> Result<(), WeftError> {
        self.local.put(path, source).await
    }

    async fn del(&self, path: &str) -> Result<(), WeftError> {
        let Some(owner) = self.remote_owner(path) else {
            return self.local.del(path).await;
        };

        let url = self.remote_url(owner, path);
        let resp = self.http.delete(&url).timeout(REMOTE_TIMEOUT).send().await?;
        tracing::debug!(%url, status = resp.status().as_u16(), "remote delete");

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(WeftError::not_found(path));
        }
        if !resp.status().is_success() {
            return Err(Self::remote_error("DELETE", url, resp).await);
        }
        Ok(())
    }
}
