//! ContentStore port - パスでアドレスする Blob の read / put / del
//!
//! # 設計原則
//! - `put` は pull 型の `BlobSource` を受け取る。いつ・どれだけ書くかは source 側が決める
//!   （reader をそのまま流し込むパススルーが可能）
//! - `read` はストリーム（`BlobReader`）を返す。存在しないパスは `WeftError::NotFound`
//! - スコープ（base path）やマシンアフィニティはデコレータで重ねる。
//!   バックエンドはスコープを知らない
//!
//! # 実装
//! - `MemoryStore`, `FsStore`: バックエンド
//! - `BasePathStore`, `MachineAffinityStore`: デコレータ

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::domain::errors::WeftError;

pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

pub type BlobSink<'a> = dyn AsyncWrite + Send + Unpin + 'a;

/// BlobSource は `put` に渡す遅延バイト列
#[async_trait]
pub trait BlobSource: Send {
    /// Content-Type のヒント（出力ファイルの拡張子に使う）
    fn content_type(&self) -> Option<&str> {
        None
    }

    /// `sink` に中身を書き出し、書いたバイト数を返す
    async fn write_to(self: Box<Self>, sink: &mut BlobSink<'_>) -> io::Result<u64>;
}

#[async_trait]
impl BlobSource for Bytes {
    async fn write_to(self: Box<Self>, sink: &mut BlobSink<'_>) -> io::Result<u64> {
        sink.write_all(&self).await?;
        Ok(self.len() as u64)
    }
}

#[async_trait]
impl BlobSource for Vec<u8> {
    async fn write_to(self: Box<Self>, sink: &mut BlobSink<'_>) -> io::Result<u64> {
        sink.write_all(&self).await?;
        Ok(self.len() as u64)
    }
}

#[async_trait]
impl BlobSource for Box<dyn BlobSource> {
    fn content_type(&self) -> Option<&str> {
        (**self).content_type()
    }

    async fn write_to(self: Box<Self>, sink: &mut BlobSink<'_>) -> io::Result<u64> {
        (*self).write_to(sink).await
    }
}

/// 任意の `AsyncRead` をそのまま流し込む source
pub struct ReaderSource<R>(pub R);

#[async_trait]
impl<R> BlobSource for ReaderSource<R>
where
    R: AsyncRead + Send + Unpin,
{
    async fn write_to(mut self: Box<Self>, sink: &mut BlobSink<'_>) -> io::Result<u64> {
        tokio::io::copy(&mut self.0, sink).await
    }
}

/// source に Content-Type のヒントを付ける
pub struct WithContentType<S> {
    inner: S,
    content_type: String,
}

impl<S: BlobSource> WithContentType<S> {
    pub fn new(inner: S, content_type: impl Into<String>) -> Self {
        Self {
            inner,
            content_type: content_type.into(),
        }
    }
}

#[async_trait]
impl<S: BlobSource> BlobSource for WithContentType<S> {
    fn content_type(&self) -> Option<&str> {
        Some(&self.content_type)
    }

    async fn write_to(self: Box<Self>, sink: &mut BlobSink<'_>) -> io::Result<u64> {
        Box::new(self.inner).write_to(sink).await
    }
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn read(&self, path: &str) -> Result<BlobReader, WeftError>;

    async fn put(&self, path: &str, source: Box<dyn BlobSource>) -> Result<(), WeftError>;

    async fn del(&self, path: &str) -> Result<(), WeftError>;
}

/// `put` して書き込み時間を debug ログに残す
pub async fn put_with_cost(
    store: &dyn ContentStore,
    path: &str,
    source: Box<dyn BlobSource>,
) -> Result<(), WeftError> {
    let started = Instant::now();
    let result = store.put(path, source).await;
    tracing::debug!(path, cost = ?started.elapsed(), ok = result.is_ok(), "store put");
    result
}

/// reader を最後まで読んで `Bytes` にする
pub async fn read_to_bytes(mut reader: BlobReader) -> Result<Bytes, WeftError> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(Bytes::from(buf))
}
