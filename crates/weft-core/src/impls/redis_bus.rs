//! RedisBus - Redis 上の competing-consumer event bus
//!
//! # プロトコル
//! - publish: `PUBSUB NUMSUB <topic>:subscription` で生存中の購読者を数え、
//!   0 なら `NoSubscribers`。それ以外は `RPUSH <topic> <payload>`
//! - subscribe: pub/sub チャネル `<topic>:subscription` を購読し続ける（購読者数の side-channel）。
//!   ポーリングループが `LPOP <topic>` で 1 件ずつ取り出す。
//!   同じ topic の購読者はキューを取り合う（1 メッセージは 1 購読者だけが処理）
//! - liveness: 購読ごとの別タスクが 5 秒ごとに `EXPIRE <topic> 10`。
//!   ハンドラの実行時間に関係なく続き、購読者がいなくなったキューはいずれ消える
//! - 接続が切れたら 500ms 待って購読し直す（ループは終了しない）
//! - publish 側は `ConnectionManager`（切断後は自動で張り直す）
//! - unsubscribe はループの終了まで待つ。取り出した直後に止められた項目はキューの先頭へ戻す

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;

use crate::domain::errors::WeftError;
use crate::ports::{EventBus, MessageHandler, Subscription};

const LIVENESS_INTERVAL: Duration = Duration::from_secs(5);
const QUEUE_TTL_SECS: i64 = 10;
const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);
const EMPTY_POLL_INTERVAL: Duration = Duration::from_millis(100);

fn presence_channel(topic: &str) -> String {
    format!("{topic}:subscription")
}

#[derive(Clone)]
pub struct RedisBus {
    client: redis::Client,
    conn: ConnectionManager,
    shutdown: CancellationToken,
}

impl RedisBus {
    pub async fn connect(url: &str) -> Result<Self, WeftError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            conn,
            shutdown: CancellationToken::new(),
        })
    }

    /// すべての購読ループを止める
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub async fn subscriber_count(&self, topic: &str) -> Result<i64, WeftError> {
        let mut conn = self.conn.clone();
        let reply: Vec<(String, i64)> = redis::cmd("PUBSUB")
            .arg("NUMSUB")
            .arg(presence_channel(topic))
            .query_async(&mut conn)
            .await?;
        Ok(reply.first().map(|(_, n)| *n).unwrap_or(0))
    }

    /// キューに残っている件数
    pub async fn queued(&self, topic: &str) -> Result<i64, WeftError> {
        let mut conn = self.conn.clone();
        let len: i64 = redis::cmd("LLEN").arg(topic).query_async(&mut conn).await?;
        Ok(len)
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), WeftError> {
        if self.subscriber_count(topic).await? == 0 {
            return Err(WeftError::no_subscribers(topic));
        }

        let mut conn = self.conn.clone();
        let _len: i64 = redis::cmd("RPUSH")
            .arg(topic)
            .arg(payload.as_ref())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
    ) -> Result<Subscription, WeftError> {
        // 最初の接続は呼び出し元に失敗を返す。以降の再接続はループ内で行う
        let session = Session::open(&self.client, topic).await?;

        let token = self.shutdown.child_token();
        let pinger = tokio::spawn(keep_alive(
            self.conn.clone(),
            topic.to_string(),
            token.clone(),
        ));
        let worker = SubscriptionLoop {
            client: self.client.clone(),
            topic: topic.to_string(),
            handler,
            token: token.clone(),
        };
        let poller = tokio::spawn(worker.run(session));

        let topic = topic.to_string();
        Ok(Subscription::new(move || async move {
            token.cancel();
            join(&topic, "poll loop", poller).await;
            join(&topic, "keep-alive", pinger).await;
        }))
    }
}

async fn join(topic: &str, what: &str, handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        tracing::error!(topic, task = what, error = %e, "subscription task panicked");
    }
}

/// `EXPIRE <topic>` をポーリングとは独立に打ち続ける
async fn keep_alive(mut conn: ConnectionManager, topic: String, token: CancellationToken) {
    let mut ticker = interval(LIVENESS_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let refreshed: Result<i64, redis::RedisError> = redis::cmd("EXPIRE")
            .arg(&topic)
            .arg(QUEUE_TTL_SECS)
            .query_async(&mut conn)
            .await;
        if let Err(e) = refreshed {
            tracing::warn!(topic = %topic, error = %e, "queue refresh failed");
        }
    }
}

/// 1 回分の接続（presence 用 pub/sub + キュー操作用の接続）
struct Session {
    pubsub: redis::aio::PubSub,
    conn: MultiplexedConnection,
}

impl Session {
    async fn open(client: &redis::Client, topic: &str) -> Result<Self, WeftError> {
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(presence_channel(topic)).await?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { pubsub, conn })
    }
}

struct SubscriptionLoop {
    client: redis::Client,
    topic: String,
    handler: MessageHandler,
    token: CancellationToken,
}

impl SubscriptionLoop {
    async fn run(self, first: Session) {
        let mut session = Some(first);
        loop {
            let current = match session.take() {
                Some(s) => s,
                None => match Session::open(&self.client, &self.topic).await {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(topic = %self.topic, error = %e, "resubscribe failed");
                        if self.backoff().await {
                            return;
                        }
                        continue;
                    }
                },
            };

            match self.poll(current).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(topic = %self.topic, error = %e, "subscription lost, resubscribing");
                    if self.backoff().await {
                        return;
                    }
                }
            }
        }
    }

    /// Returns true when cancelled during the backoff.
    async fn backoff(&self) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => true,
            _ = sleep(RECONNECT_BACKOFF) => false,
        }
    }

    /// Ok(()) はキャンセル、Err は接続断
    async fn poll(&self, session: Session) -> Result<(), WeftError> {
        let Session { pubsub, mut conn } = session;
        // presence 用の購読は stream が生きている間だけ有効
        let mut presence = pubsub.into_on_message();

        loop {
            if self.token.is_cancelled() {
                return Ok(());
            }

            let item: Option<Vec<u8>> = redis::cmd("LPOP")
                .arg(&self.topic)
                .query_async(&mut conn)
                .await?;

            match item {
                Some(payload) if self.token.is_cancelled() => {
                    // 取り出し中に止められた。次の購読者のために先頭へ戻す
                    let _len: i64 = redis::cmd("LPUSH")
                        .arg(&self.topic)
                        .arg(payload)
                        .query_async(&mut conn)
                        .await?;
                    return Ok(());
                }
                Some(payload) => (self.handler)(Bytes::from(payload)).await,
                None => {
                    tokio::select! {
                        _ = self.token.cancelled() => return Ok(()),
                        _ = sleep(EMPTY_POLL_INTERVAL) => {}
                        msg = presence.next() => {
                            if msg.is_none() {
                                return Err(redis::RedisError::from((
                                    redis::ErrorKind::IoError,
                                    "presence channel closed",
                                ))
                                .into());
                            }
                        }
                    }
                }
            }
        }
    }
}
