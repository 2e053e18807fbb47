//! MemoryStore - プロセス内の ContentStore（開発用・テスト用）

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::io::Cursor;
use std::sync::Arc;

use crate::domain::errors::WeftError;
use crate::ports::{BlobReader, BlobSource, ContentStore};

#[derive(Clone, Default)]
pub struct MemoryStore {
    blobs: Arc<DashMap<String, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// 保存済みのパス（ソート済み）
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.blobs.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn read(&self, path: &str) -> Result<BlobReader, WeftError> {
        let blob = self
            .blobs
            .get(path)
            .map(|b| b.value().clone())
            .ok_or_else(|| WeftError::not_found(path))?;
        Ok(Box::new(Cursor::new(blob)))
    }

    async fn put(&self, path: &str, source: Box<dyn BlobSource>) -> Result<(), WeftError> {
        let mut buf = Vec::new();
        source.write_to(&mut buf).await?;
        self.blobs.insert(path.to_string(), Bytes::from(buf));
        Ok(())
    }

    async fn del(&self, path: &str) -> Result<(), WeftError> {
        self.blobs
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| WeftError::not_found(path))
    }
}
