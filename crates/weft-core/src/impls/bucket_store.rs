//! BucketStore - オブジェクトストレージ（S3 など）上の ContentStore
//!
//! `object_store::ObjectStore` をそのまま包むだけのバックエンドです。
//! どのノードからも同じバケットが見えるので、マシンアフィニティは不要です。

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload, RetryConfig};
use std::io;
use std::sync::Arc;
use tokio_util::io::StreamReader;

use crate::domain::errors::WeftError;
use crate::ports::{BlobReader, BlobSource, ContentStore};

#[derive(Clone)]
pub struct BucketStore {
    inner: Arc<dyn ObjectStore>,
}

impl BucketStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self { inner }
    }

    /// テスト・ローカル実行用
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// `bucket` の S3 バケット。認証情報とリージョンは `AWS_*` 環境変数から。
    /// `endpoint` を渡すと path-style + http を許可する（MinIO など）
    pub fn s3(bucket: &str, endpoint: Option<&str>) -> Result<Self, WeftError> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_retry(RetryConfig::default());
        if let Some(endpoint) = endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false)
                .with_allow_http(true);
        }
        Ok(Self::new(Arc::new(builder.build()?)))
    }
}

fn object_path(path: &str) -> Result<Path, WeftError> {
    Path::parse(path).map_err(|e| WeftError::ObjectStore(e.into()))
}

fn store_error(path: &str, e: object_store::Error) -> WeftError {
    match e {
        object_store::Error::NotFound { .. } => WeftError::not_found(path),
        other => WeftError::ObjectStore(other),
    }
}

#[async_trait]
impl ContentStore for BucketStore {
    async fn read(&self, path: &str) -> Result<BlobReader, WeftError> {
        let result = self
            .inner
            .get(&object_path(path)?)
            .await
            .map_err(|e| store_error(path, e))?;
        let body = result.into_stream().map_err(io::Error::other);
        Ok(Box::new(StreamReader::new(body)))
    }

    async fn put(&self, path: &str, source: Box<dyn BlobSource>) -> Result<(), WeftError> {
        let location = object_path(path)?;
        let mut buf = Vec::new();
        source.write_to(&mut buf).await?;
        self.inner
            .put(&location, PutPayload::from(Bytes::from(buf)))
            .await
            .map_err(|e| store_error(path, e))?;
        Ok(())
    }

    async fn del(&self, path: &str) -> Result<(), WeftError> {
        let location = object_path(path)?;
        // delete 自体は存在しなくても成功するので、先に確認する
        self.inner
            .head(&location)
            .await
            .map_err(|e| store_error(path, e))?;
        self.inner
            .delete(&location)
            .await
            .map_err(|e| store_error(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::BasePathStore;
    use crate::ports::{WithContentType, read_to_bytes};

    #[tokio::test]
    async fn put_read_del() {
        let store = BucketStore::in_memory();

        store
            .put("tasks/1/stages/a/results/m,2.txt", Box::new(Bytes::from_static(b"hello")))
            .await
            .unwrap();
        let read = read_to_bytes(store.read("tasks/1/stages/a/results/m,2.txt").await.unwrap())
            .await
            .unwrap();
        assert_eq!(read, Bytes::from_static(b"hello"));

        store.del("tasks/1/stages/a/results/m,2.txt").await.unwrap();
        assert!(matches!(
            store.read("tasks/1/stages/a/results/m,2.txt").await,
            Err(WeftError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn missing_blob_is_not_found() {
        let store = BucketStore::in_memory();
        let err = store.del("nothing/here").await.unwrap_err();
        assert!(matches!(err, WeftError::NotFound { .. }));
    }

    #[tokio::test]
    async fn sits_under_the_base_path_decorator() {
        let inner = InMemory::new();
        let shared: Arc<dyn ObjectStore> = Arc::new(inner);
        let scoped = BasePathStore::new(
            Arc::new(BucketStore::new(shared.clone())),
            "pipelines/p:1.0.0/7",
        );

        scoped
            .put(
                "out.json",
                Box::new(WithContentType::new(b"{}".to_vec(), "application/json")),
            )
            .await
            .unwrap();

        let raw = shared
            .get(&Path::parse("pipelines/p:1.0.0/7/out.json").unwrap())
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(raw, Bytes::from_static(b"{}"));
    }
}
