//! CompletionTracker - 投入中の Task ごとの結果テーブル
//!
//! # 設計原則
//! - エントリは投入時に作り、解決したら即座に消す（at-most-once）
//! - 同じ ID への 2 回目の解決は何もしない
//! - オーケストレータが所有し、`Arc` で watcher と共有する（グローバル状態にしない）

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::domain::errors::WeftError;
use crate::domain::ids::TaskId;
use crate::domain::task::{INPUT_STAGE, Task};
use crate::ports::{BlobReader, ContentStore, read_to_bytes};

/// 終端ステージの出力
pub struct TaskOutput {
    task: Task,
    store: Arc<dyn ContentStore>,
}

impl TaskOutput {
    pub fn new(task: Task, store: Arc<dyn ContentStore>) -> Self {
        Self { task, store }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    /// 出力のパス（run スコープ相対）
    pub fn paths(&self) -> &[String] {
        self.task.inputs()
    }

    pub async fn open(&self, index: usize) -> Result<BlobReader, WeftError> {
        let path = self.paths().get(index).ok_or(WeftError::NoMoreInputs)?;
        self.store.read(path).await
    }

    /// 先頭の出力を読む
    pub async fn first_bytes(&self) -> Result<bytes::Bytes, WeftError> {
        read_to_bytes(self.open(0).await?).await
    }
}

impl std::fmt::Debug for TaskOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskOutput")
            .field("task_id", &self.task.id())
            .field("paths", &self.paths())
            .finish()
    }
}

pub type Completion = Result<TaskOutput, WeftError>;

/// 投入 1 件分の結果待ちハンドル
#[derive(Debug)]
pub struct PendingResult {
    id: TaskId,
    pipeline: String,
    rx: oneshot::Receiver<Completion>,
}

impl PendingResult {
    pub fn task_id(&self) -> TaskId {
        self.id
    }

    pub async fn wait(self) -> Completion {
        self.rx.await.unwrap_or_else(|_| {
            Err(WeftError::Cancelled {
                pipeline: self.pipeline,
                stage: INPUT_STAGE.to_string(),
                reason: "result dropped before completion".to_string(),
            })
        })
    }
}

#[derive(Default)]
pub struct CompletionTracker {
    pending: DashMap<TaskId, oneshot::Sender<Completion>>,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: TaskId, pipeline: impl Into<String>) -> PendingResult {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        PendingResult {
            id,
            pipeline: pipeline.into(),
            rx,
        }
    }

    /// 結果を確定させる。すでに解決済み（または未登録）なら false
    pub fn resolve(&self, id: TaskId, completion: Completion) -> bool {
        match self.pending.remove(&id) {
            Some((_, tx)) => {
                // the caller may have dropped its PendingResult
                let _ = tx.send(completion);
                true
            }
            None => false,
        }
    }

    /// 解決せずに外す（投入に失敗した場合）
    pub fn forget(&self, id: TaskId) -> bool {
        self.pending.remove(&id).is_some()
    }

    pub fn is_tracking(&self, id: TaskId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
