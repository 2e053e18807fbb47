//! PrefixedBus - topic に名前空間を付けるデコレータ
//!
//! `topic` → `<prefix>:<topic>`。run ごと・ステージごとの topic 分離に使います。

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::domain::errors::WeftError;
use crate::ports::{EventBus, MessageHandler, Subscription};

pub struct PrefixedBus {
    inner: Arc<dyn EventBus>,
    prefix: String,
}

impl PrefixedBus {
    pub fn new(inner: Arc<dyn EventBus>, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    pub fn topic(&self, topic: &str) -> String {
        format!("{}:{}", self.prefix, topic)
    }
}

#[async_trait]
impl EventBus for PrefixedBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), WeftError> {
        self.inner.publish(&self.topic(topic), payload).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
    ) -> Result<Subscription, WeftError> {
        self.inner.subscribe(&self.topic(topic), handler).await
    }
}
