//! PipelineManager / PipelineRun - パイプラインの起動・停止と投入
//!
//! # 投入の流れ
//! 1. Task ID を払い出し、`$input` Task を作る
//! 2. 結果テーブルに登録し、Task の完了 topic を購読する
//! 3. watcher を起動: 完了メッセージ / キャンセル / 期限 の最初の 1 つで結果を確定し、購読を外す
//! 4. 入力を `$input` ステージの出力として書き、開始ステージへ送る
//!
//! 購読は publish より前に張るので、どれだけ速く完了しても取りこぼしません。
//! キャンセルは呼び出し側の待ちを打ち切るだけで、ステージで実行中のハンドラは止めません。

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::app::controller::PipelineController;
use crate::app::tracker::{Completion, CompletionTracker, PendingResult, TaskOutput};
use crate::app::transfer::Transfer;
use crate::domain::errors::WeftError;
use crate::domain::ids::{RunId, TaskId};
use crate::domain::pipeline::PipelineSpec;
use crate::domain::task::{Task, TaskMeta};
use crate::ports::{BlobSource, Scaler};

pub struct PipelineManager {
    controller: PipelineController,
    scaler: Arc<dyn Scaler>,
}

impl PipelineManager {
    /// `controller` はルート（スコープなし）のハンドル
    pub fn new(controller: PipelineController, scaler: Arc<dyn Scaler>) -> Self {
        Self { controller, scaler }
    }

    /// 定義を検証し、新しい run を作る（ステージはまだ起動しない）
    pub fn instantiate(&self, spec: PipelineSpec) -> Result<PipelineRun, WeftError> {
        spec.validate()?;
        let run_id = self.controller.ids().generate_run_id();
        let meta = Arc::new(TaskMeta::for_run(&spec, run_id));
        let controller = self.controller.with_scope(&meta.scope);
        tracing::info!(pipeline = %meta.scope, stages = spec.stages.len(), "pipeline instantiated");

        Ok(PipelineRun {
            spec: Arc::new(spec),
            run_id,
            meta,
            controller,
            scaler: self.scaler.clone(),
            tracker: Arc::new(CompletionTracker::new()),
        })
    }
}

pub struct PipelineRun {
    spec: Arc<PipelineSpec>,
    run_id: RunId,
    meta: Arc<TaskMeta>,
    controller: PipelineController,
    scaler: Arc<dyn Scaler>,
    tracker: Arc<CompletionTracker>,
}

impl PipelineRun {
    pub fn spec(&self) -> &PipelineSpec {
        &self.spec
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn scope(&self) -> &str {
        &self.meta.scope
    }

    pub fn controller(&self) -> &PipelineController {
        &self.controller
    }

    pub fn pending_count(&self) -> usize {
        self.tracker.pending_count()
    }

    pub fn is_tracking(&self, id: TaskId) -> bool {
        self.tracker.is_tracking(id)
    }

    /// 各ステージを目標レプリカ数に。最初のエラーで止まる（ロールバックしない）
    pub async fn start(&self) -> Result<(), WeftError> {
        for (name, stage) in &self.spec.stages {
            self.scaler
                .apply(self.scope(), name, stage, stage.options.replicas)
                .await?;
        }
        Ok(())
    }

    /// 全ステージを止める。最初のエラーで止まる
    pub async fn stop(&self) -> Result<(), WeftError> {
        for name in self.spec.stages.keys() {
            self.scaler.destroy(self.scope(), name).await?;
        }
        Ok(())
    }

    /// 入力を投入し、結果待ちハンドルをすぐ返す。`cancel` で待ちを打ち切れる
    pub async fn submit<S>(
        &self,
        cancel: &CancellationToken,
        input: S,
    ) -> Result<PendingResult, WeftError>
    where
        S: BlobSource + 'static,
    {
        self.submit_inner(cancel, None, Box::new(input)).await
    }

    /// `submit` に期限を付けたもの
    pub async fn submit_with_timeout<S>(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
        input: S,
    ) -> Result<PendingResult, WeftError>
    where
        S: BlobSource + 'static,
    {
        self.submit_inner(cancel, Some(Instant::now() + timeout), Box::new(input))
            .await
    }

    async fn submit_inner(
        &self,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
        input: Box<dyn BlobSource>,
    ) -> Result<PendingResult, WeftError> {
        let id = self.controller.ids().generate_task_id();
        let task = Task::submission(id, self.meta.clone());
        let pending = self.tracker.register(id, self.spec.ref_id());

        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = match self
            .controller
            .subscribe_tasks(&task.completion_topic(), move |done| {
                let _ = tx.send(done);
                async {}
            })
            .await
        {
            Ok(s) => s,
            Err(e) => {
                self.tracker.forget(id);
                return Err(e);
            }
        };

        let abort = CancellationToken::new();
        let watcher = Watcher {
            task: task.clone(),
            pipeline: self.spec.ref_id(),
            store: self.controller.store().clone(),
            tracker: self.tracker.clone(),
        };
        tokio::spawn({
            let cancel = cancel.clone();
            let abort = abort.clone();
            async move {
                watcher.run(rx, cancel, abort, deadline).await;
                subscription.unsubscribe().await;
            }
        });

        let mut transfer = Transfer::new(self.controller.clone(), task);
        let sent = async {
            transfer.put_boxed(input).await?;
            transfer.send().await
        }
        .await;
        if let Err(e) = sent {
            tracing::warn!(pipeline = %self.scope(), task_id = %id, error = %e, "submission failed");
            self.tracker.forget(id);
            abort.cancel();
            return Err(e);
        }

        tracing::debug!(pipeline = %self.scope(), task_id = %id, "task submitted");
        Ok(pending)
    }
}

struct Watcher {
    task: Task,
    pipeline: String,
    store: Arc<dyn crate::ports::ContentStore>,
    tracker: Arc<CompletionTracker>,
}

impl Watcher {
    async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<Task>,
        cancel: CancellationToken,
        abort: CancellationToken,
        deadline: Option<Instant>,
    ) {
        let expired = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        let completion = tokio::select! {
            Some(done) = rx.recv() => self.completed(done),
            _ = cancel.cancelled() => self.cancelled("submission cancelled"),
            _ = expired => self.cancelled("deadline exceeded"),
            _ = abort.cancelled() => return,
        };

        let id = self.task.id();
        if !self.tracker.resolve(id, completion) {
            tracing::debug!(task_id = %id, "completion for an untracked task ignored");
        }
    }

    fn completed(&self, done: Task) -> Completion {
        match done.error() {
            Some(message) => Err(WeftError::TaskFailed {
                pipeline: self.pipeline.clone(),
                stage: done.stage_name().to_string(),
                message: message.to_string(),
            }),
            None => Ok(TaskOutput::new(done, self.store.clone())),
        }
    }

    /// No stage will report on an abandoned task, so the error task is made here.
    fn cancelled(&self, reason: &str) -> Completion {
        let local = self.task.with_error(reason);
        tracing::debug!(
            pipeline = %self.pipeline,
            task_id = %local.id(),
            stage = local.stage_name(),
            reason,
            "submission abandoned"
        );
        Err(WeftError::Cancelled {
            pipeline: self.pipeline.clone(),
            stage: local.stage_name().to_string(),
            reason: local.error().unwrap_or(reason).to_string(),
        })
    }
}
