//! FsStore - ローカルファイルシステム上の ContentStore
//!
//! パスは `root` からの相対パスとして扱います。`..` や絶対パスは拒否します。
//! 書き込みは `<file>.partial` に書いてから rename するので、
//! 書きかけのファイルが読まれることはありません。

use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::domain::errors::WeftError;
use crate::ports::{BlobReader, BlobSource, ContentStore};

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, WeftError> {
        let relative = Path::new(path.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || relative.as_os_str().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid store path {path:?}"),
            )
            .into());
        }
        Ok(self.root.join(relative))
    }
}

fn not_found_or(path: &str, err: io::Error) -> WeftError {
    if err.kind() == io::ErrorKind::NotFound {
        WeftError::not_found(path)
    } else {
        err.into()
    }
}

#[async_trait]
impl ContentStore for FsStore {
    async fn read(&self, path: &str) -> Result<BlobReader, WeftError> {
        let file = fs::File::open(self.resolve(path)?)
            .await
            .map_err(|e| not_found_or(path, e))?;
        Ok(Box::new(file))
    }

    async fn put(&self, path: &str, source: Box<dyn BlobSource>) -> Result<(), WeftError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut partial = target.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        let mut file = fs::File::create(&partial).await?;
        let written = source.write_to(&mut file).await;
        let written = match written {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                return Err(e.into());
            }
        };
        file.flush().await?;
        drop(file);

        fs::rename(&partial, &target).await?;
        tracing::trace!(path, bytes = written, "fs store put");
        Ok(())
    }

    async fn del(&self, path: &str) -> Result<(), WeftError> {
        fs::remove_file(self.resolve(path)?)
            .await
            .map_err(|e| not_found_or(path, e))
    }
}
