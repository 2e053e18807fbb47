//! serve_operator - ステージ 1 レプリカ分のイベントループ
//!
//! # フロー
//! 1. ステージ topic から Task を受け取る（decode 失敗はエラー付き Task になる）
//! 2. すでにエラーを持つ Task は捨てる（ハンドラは呼ばない）
//! 3. `Transfer` を作ってハンドラを呼ぶ
//! 4. 成功したら `send` で溜まった出力を後続へ（出力 0 件は何もしない）
//! 5. 失敗したらエラー付き Task を完了 topic へ直接 publish（後続には流さない）
//!
//! `StageRuntime::unsubscribe` は新しいメッセージの受信を止め、
//! 実行中のハンドラがすべて終わるまで待ちます（スケールダウンで書き込み途中を中断しない）。

use std::sync::Arc;
use std::time::Instant;
use tokio_util::task::TaskTracker;

use crate::app::controller::PipelineController;
use crate::app::registry::OperatorHandler;
use crate::app::transfer::Transfer;
use crate::domain::errors::WeftError;
use crate::domain::task::Task;
use crate::ports::Subscription;

pub struct StageRuntime {
    subscription: Subscription,
    tracker: TaskTracker,
    scope: String,
    stage: String,
}

impl StageRuntime {
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// 実行中のハンドラ数
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// 受信を止め、実行中のハンドラの完了を待つ
    pub async fn unsubscribe(self) {
        self.subscription.unsubscribe().await;
        self.tracker.close();
        self.tracker.wait().await;
        tracing::debug!(pipeline = %self.scope, stage = %self.stage, "stage runtime drained");
    }
}

struct StageContext {
    controller: PipelineController,
    stage: String,
    handler: Arc<dyn OperatorHandler>,
}

/// `controller`（run のスコープ付き）の `stage` topic でハンドラを動かす
pub async fn serve_operator(
    controller: &PipelineController,
    stage: &str,
    handler: Arc<dyn OperatorHandler>,
) -> Result<StageRuntime, WeftError> {
    let tracker = TaskTracker::new();
    let ctx = Arc::new(StageContext {
        controller: controller.clone(),
        stage: stage.to_string(),
        handler,
    });

    let subscription = {
        let tracker = tracker.clone();
        controller
            .subscribe_tasks(stage, move |task| {
                let ctx = ctx.clone();
                tracker.track_future(async move { ctx.process(task).await })
            })
            .await?
    };

    tracing::debug!(pipeline = %controller.scope(), stage, "stage runtime subscribed");
    Ok(StageRuntime {
        subscription,
        tracker,
        scope: controller.scope().to_string(),
        stage: stage.to_string(),
    })
}

impl StageContext {
    async fn process(&self, task: Task) {
        let pipeline = self.controller.scope();
        if let Some(error) = task.error() {
            tracing::debug!(pipeline, stage = %self.stage, task_id = %task.id(), error, "discarding error task");
            return;
        }

        let started = Instant::now();
        tracing::debug!(pipeline, stage = %self.stage, task_id = %task.id(), inputs = task.inputs().len(), "stage start");

        match self.run_handler(task.clone()).await {
            Ok(()) => {
                tracing::debug!(pipeline, stage = %self.stage, task_id = %task.id(), elapsed = ?started.elapsed(), "stage finish");
            }
            Err(e) => {
                let message = format!("{e:#}");
                tracing::warn!(pipeline, stage = %self.stage, task_id = %task.id(), error = %message, "stage failed");

                let failed = task.with_error(message);
                let topic = failed.completion_topic();
                if let Err(e) = self.controller.publish_task(&topic, &failed).await {
                    tracing::error!(pipeline, stage = %self.stage, task_id = %task.id(), error = %e, "failed to report stage error");
                }
            }
        }
    }

    async fn run_handler(&self, task: Task) -> anyhow::Result<()> {
        let mut transfer = Transfer::new(self.controller.clone(), task);
        self.handler.handle(&mut transfer).await?;
        match transfer.send().await {
            Ok(()) | Err(WeftError::NoInputsForNext) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::controller::tests::local_controller;
    use crate::domain::pipeline::{PipelineSpec, Stage};
    use crate::domain::{RunId, TaskId, TaskMeta};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Upper {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl OperatorHandler for Upper {
        async fn handle(&self, transfer: &mut Transfer) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            while transfer.has_next() {
                let input = transfer.next_bytes().await?;
                transfer.put(input.to_ascii_uppercase()).await?;
            }
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl OperatorHandler for Failing {
        async fn handle(&self, _transfer: &mut Transfer) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    struct Slow;

    #[async_trait]
    impl OperatorHandler for Slow {
        async fn handle(&self, _transfer: &mut Transfer) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }
    }

    fn meta() -> Arc<TaskMeta> {
        let op = || "noop:1.0.0".parse().unwrap();
        let spec = PipelineSpec {
            name: "t".into(),
            version: semver::Version::new(1, 0, 0),
            stages: BTreeMap::from([
                ("a".to_string(), Stage::new(op())),
                ("b".to_string(), Stage::new(op()).after(["a"])),
            ]),
            starts: "a".into(),
            ends: "b".into(),
        };
        Arc::new(TaskMeta::for_run(&spec, RunId::from_u64(1)))
    }

    async fn collect(
        run: &PipelineController,
        topic: &str,
    ) -> (crate::ports::Subscription, mpsc::UnboundedReceiver<Task>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = run
            .subscribe_tasks(topic, move |task| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(task);
                }
            })
            .await
            .unwrap();
        (sub, rx)
    }

    #[tokio::test]
    async fn successful_handler_forwards_outputs() {
        let (root, _, _) = local_controller("n");
        let run = root.with_scope("r");
        run.store()
            .put("in/1", Box::new(Bytes::from_static(b"abc")))
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let runtime = serve_operator(&run, "a", Arc::new(Upper { calls: calls.clone() }))
            .await
            .unwrap();
        let (sub, mut rx) = collect(&run, "b").await;

        let task = Task::submission(TaskId::from_u64(4), meta()).next("a", vec!["in/1".into()]);
        run.publish_task("a", &task).await.unwrap();

        let next = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.stage_name(), "b");
        let mut transfer = Transfer::new(run.clone(), next);
        assert_eq!(transfer.next_bytes().await.unwrap(), Bytes::from_static(b"ABC"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        sub.unsubscribe().await;
        runtime.unsubscribe().await;
    }

    #[tokio::test]
    async fn handler_error_goes_to_completion_topic_only() {
        let (root, _, _) = local_controller("n");
        let run = root.with_scope("r");
        let runtime = serve_operator(&run, "a", Arc::new(Failing)).await.unwrap();
        let (succ_sub, mut successors) = collect(&run, "b").await;
        let (done_sub, mut done) = collect(&run, "tasks/4/$output").await;

        let task = Task::submission(TaskId::from_u64(4), meta()).next("a", vec![]);
        run.publish_task("a", &task).await.unwrap();

        let failed = tokio::time::timeout(Duration::from_secs(1), done.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.stage_name(), "a");
        assert_eq!(failed.error(), Some("boom"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(successors.try_recv().is_err());

        succ_sub.unsubscribe().await;
        done_sub.unsubscribe().await;
        runtime.unsubscribe().await;
    }

    #[tokio::test]
    async fn error_tasks_are_not_handled() {
        let (root, _, _) = local_controller("n");
        let run = root.with_scope("r");
        let calls = Arc::new(AtomicUsize::new(0));
        let runtime = serve_operator(&run, "a", Arc::new(Upper { calls: calls.clone() }))
            .await
            .unwrap();

        let task = Task::submission(TaskId::from_u64(4), meta())
            .next("a", vec![])
            .with_error("upstream broke");
        run.publish_task("a", &task).await.unwrap();
        run.publish("a", Bytes::from_static(b"not a task")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        runtime.unsubscribe().await;
    }

    #[tokio::test]
    async fn unsubscribe_waits_for_in_flight_handlers() {
        let (root, bus, _) = local_controller("n");
        let run = root.with_scope("r");
        let runtime = serve_operator(&run, "a", Arc::new(Slow)).await.unwrap();

        let task = Task::submission(TaskId::from_u64(4), meta()).next("a", vec![]);
        run.publish_task("a", &task).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runtime.in_flight(), 1);

        let started = std::time::Instant::now();
        runtime.unsubscribe().await;
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(bus.subscriber_count("r:a"), 0);
    }
}
