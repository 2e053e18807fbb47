//! Built-in operators for local runs and single-stage replicas.
//!
//! - `pass:1.0.0`: 入力をそのまま出力へ（ストリームのまま）
//! - `upper:1.0.0`: ASCII 大文字化
//! - `reverse:1.0.0`: バイト列を反転
//! - `wc:1.0.0`: 行数・単語数・バイト数を JSON で

use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use weft_core::app::{OperatorHandler, OperatorRegistry, Transfer};
use weft_core::domain::WeftError;
use weft_core::ports::{ReaderSource, WithContentType};

struct Pass;

#[async_trait]
impl OperatorHandler for Pass {
    async fn handle(&self, transfer: &mut Transfer) -> anyhow::Result<()> {
        while transfer.has_next() {
            let input = transfer.next_input().await?;
            transfer.put(ReaderSource(input)).await?;
        }
        Ok(())
    }
}

struct Upper;

#[async_trait]
impl OperatorHandler for Upper {
    async fn handle(&self, transfer: &mut Transfer) -> anyhow::Result<()> {
        while transfer.has_next() {
            let input = transfer.next_bytes().await?;
            transfer
                .put(WithContentType::new(input.to_ascii_uppercase(), "text/plain"))
                .await?;
        }
        Ok(())
    }
}

struct Reverse;

#[async_trait]
impl OperatorHandler for Reverse {
    async fn handle(&self, transfer: &mut Transfer) -> anyhow::Result<()> {
        while transfer.has_next() {
            let mut input = transfer.next_bytes().await?.to_vec();
            input.reverse();
            transfer.put(input).await?;
        }
        Ok(())
    }
}

struct WordCount;

#[async_trait]
impl OperatorHandler for WordCount {
    async fn handle(&self, transfer: &mut Transfer) -> anyhow::Result<()> {
        while transfer.has_next() {
            let input = transfer.next_bytes().await?;
            let text = std::str::from_utf8(&input).context("wc expects utf-8 input")?;
            let summary = serde_json::json!({
                "lines": text.lines().count(),
                "words": text.split_whitespace().count(),
                "bytes": input.len(),
            });
            transfer
                .put(WithContentType::new(
                    serde_json::to_vec(&summary)?,
                    "application/json",
                ))
                .await?;
        }
        Ok(())
    }
}

pub fn builtin_registry() -> Result<OperatorRegistry, WeftError> {
    let mut registry = OperatorRegistry::new();
    let builtins: [(&str, Arc<dyn OperatorHandler>); 4] = [
        ("pass:1.0.0", Arc::new(Pass)),
        ("upper:1.0.0", Arc::new(Upper)),
        ("reverse:1.0.0", Arc::new(Reverse)),
        ("wc:1.0.0", Arc::new(WordCount)),
    ];
    for (operator, handler) in builtins {
        registry.register(operator.parse()?, handler)?;
    }
    Ok(registry)
}
