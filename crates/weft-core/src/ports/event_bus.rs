//! EventBus port - topic 単位の publish / subscribe
//!
//! # 配送の契約
//! - at-least-once。topic をまたいだ順序保証はなし、topic 内は best-effort
//! - publish 時点で購読者がいなければ `WeftError::NoSubscribers`
//!   （ステージのレプリカが 0 であることを呼び出し側が検出するための正常系）
//!
//! # バックエンドごとの差
//! - `LocalBus`: 購読者全員に配る（broadcast）
//! - `RedisBus`: 1 メッセージを 1 購読者だけが取る（competing consumers）

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

use crate::domain::errors::WeftError;

/// メッセージ 1 件ごとに呼ばれるハンドラ
pub type MessageHandler = Arc<dyn Fn(Bytes) -> BoxFuture<'static, ()> + Send + Sync>;

/// async closure から `MessageHandler` を作る
pub fn message_handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |payload| Box::pin(f(payload)))
}

/// 購読の解除ハンドル
///
/// `unsubscribe` 以降、このハンドラに新しいメッセージは届きません。
/// 実行中の配送は止めません。
#[must_use = "dropping a Subscription keeps the handler subscribed"]
pub struct Subscription {
    cancel: Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>,
}

impl Subscription {
    pub fn new<F, Fut>(cancel: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            cancel: Box::new(move || Box::pin(cancel())),
        }
    }

    pub async fn unsubscribe(self) {
        (self.cancel)().await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), WeftError>;

    async fn subscribe(&self, topic: &str, handler: MessageHandler)
    -> Result<Subscription, WeftError>;
}
