//! LocalBus - プロセス内の fan-out event bus
//!
//! # 実装詳細
//! - `DashMap<topic, HashMap<subscriber-id, handler>>` で購読者を管理
//! - publish はロック下で購読者のスナップショットを取り、ロックを離してから
//!   購読者ごとに `tokio::spawn` する（ハンドラ実行中にロックを持たない）
//! - 全購読者が全メッセージを受け取る（broadcast）
//!
//! # 使用例
//! ```ignore
//! let bus = LocalBus::new();
//! let sub = bus.subscribe("stage", message_handler(|p| async move { ... })).await?;
//! bus.publish("stage", Bytes::from_static(b"hi")).await?;
//! sub.unsubscribe().await;
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::errors::WeftError;
use crate::ports::{EventBus, MessageHandler, Subscription};

#[derive(Default)]
struct Registry {
    topics: DashMap<String, HashMap<u64, MessageHandler>>,
    next_id: AtomicU64,
}

#[derive(Clone, Default)]
pub struct LocalBus {
    registry: Arc<Registry>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// topic の現在の購読者数
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.registry
            .topics
            .get(topic)
            .map(|handlers| handlers.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), WeftError> {
        let handlers: Vec<MessageHandler> = match self.registry.topics.get(topic) {
            Some(handlers) => handlers.values().cloned().collect(),
            None => Vec::new(),
        };
        if handlers.is_empty() {
            return Err(WeftError::no_subscribers(topic));
        }

        for handler in handlers {
            tokio::spawn(handler(payload.clone()));
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
    ) -> Result<Subscription, WeftError> {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(id, handler);

        let registry = self.registry.clone();
        let topic = topic.to_string();
        Ok(Subscription::new(move || async move {
            registry.topics.remove_if_mut(&topic, |_, handlers| {
                handlers.remove(&id);
                handlers.is_empty()
            });
        }))
    }
}
