//! BasePathStore - パスに名前空間を付けるデコレータ
//!
//! `path` → `<base>/<path>`。run ごと・ステージごとのストレージ分離に使います。

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::errors::WeftError;
use crate::ports::{BlobReader, BlobSource, ContentStore};

pub struct BasePathStore {
    inner: Arc<dyn ContentStore>,
    base: String,
}

impl BasePathStore {
    pub fn new(inner: Arc<dyn ContentStore>, base: impl Into<String>) -> Self {
        Self {
            inner,
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn full_path(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if self.base.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.base, path)
        }
    }
}

#[async_trait]
impl ContentStore for BasePathStore {
    async fn read(&self, path: &str) -> Result<BlobReader, WeftError> {
        self.inner.read(&self.full_path(path)).await
    }

    async fn put(&self, path: &str, source: Box<dyn BlobSource>) -> Result<(), WeftError> {
        self.inner.put(&self.full_path(path), source).await
    }

    async fn del(&self, path: &str) -> Result<(), WeftError> {
        self.inner.del(&self.full_path(path)).await
    }
}
