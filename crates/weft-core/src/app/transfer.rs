//! Transfer - ステージハンドラから見た入力と出力
//!
//! - 入力: 現在の Task の `inputs` を先頭から 1 回だけ順に読む（`has_next` / `next_input`）
//! - 出力: `put` でストアに書き、パスを溜める
//! - `send`: 溜めた出力を新しい入力として後続ステージへ publish し、溜めた出力を空にする。
//!   ハンドラの途中で何度呼んでもよい。出力が 0 件なら `NoInputsForNext`
//!
//! 出力のパスは `tasks/<task-id>/stages/<stage>/results/<machine-id>,<blob-id>[.<ext>]`。
//! machine id を埋め込むので、どのノードからでも書いたノードの実体を読めます。

use bytes::Bytes;

use crate::app::controller::PipelineController;
use crate::domain::errors::WeftError;
use crate::domain::task::{OUTPUT_TOPIC, Task};
use crate::ports::{BlobReader, BlobSource, put_with_cost, read_to_bytes, with_machine_id};

/// Content-Type から出力ファイルの拡張子
pub fn extension_for(content_type: &str) -> &'static str {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/png" => ".png",
        "image/jpeg" | "image/jpg" => ".jpg",
        "image/gif" => ".gif",
        "application/json" => ".json",
        "text/plain" => ".txt",
        _ => "",
    }
}

pub struct Transfer {
    controller: PipelineController,
    task: Task,
    cursor: usize,
    outputs: Vec<String>,
}

impl Transfer {
    /// `controller` は run のスコープ付き
    pub fn new(controller: PipelineController, task: Task) -> Self {
        Self {
            controller,
            task,
            cursor: 0,
            outputs: Vec::new(),
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn controller(&self) -> &PipelineController {
        &self.controller
    }

    pub fn has_next(&self) -> bool {
        self.cursor < self.task.inputs().len()
    }

    /// 残りの入力数
    pub fn remaining(&self) -> usize {
        self.task.inputs().len().saturating_sub(self.cursor)
    }

    /// 次の入力を開く。読み切っていたら `NoMoreInputs`
    pub async fn next_input(&mut self) -> Result<BlobReader, WeftError> {
        let path = self
            .task
            .inputs()
            .get(self.cursor)
            .ok_or(WeftError::NoMoreInputs)?
            .clone();
        self.cursor += 1;
        self.controller.store().read(&path).await
    }

    pub async fn next_bytes(&mut self) -> Result<Bytes, WeftError> {
        let reader = self.next_input().await?;
        read_to_bytes(reader).await
    }

    /// 出力を 1 つ書き、書いたパスを返す
    pub async fn put<S>(&mut self, source: S) -> Result<String, WeftError>
    where
        S: BlobSource + 'static,
    {
        self.put_boxed(Box::new(source)).await
    }

    pub async fn put_boxed(&mut self, source: Box<dyn BlobSource>) -> Result<String, WeftError> {
        let ext = source.content_type().map(extension_for).unwrap_or_default();
        let blob_id = self.controller.ids().generate_blob_id();
        let file = with_machine_id(self.controller.machine_id(), &format!("{blob_id}{ext}"));
        let path = format!("{}/{}", self.task.results_dir(), file);

        put_with_cost(self.controller.store().as_ref(), &path, source).await?;
        self.outputs.push(path.clone());
        Ok(path)
    }

    /// まだ送っていない出力
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// 溜めた出力を後続へ送る
    pub async fn send(&mut self) -> Result<(), WeftError> {
        if self.outputs.is_empty() {
            return Err(WeftError::NoInputsForNext);
        }

        let inputs = std::mem::take(&mut self.outputs);
        let completion = self.task.completion_topic();
        for topic in self.task.successors() {
            let stage = if topic == completion {
                OUTPUT_TOPIC
            } else {
                topic.as_str()
            };
            let next = self.task.next(stage, inputs.clone());
            self.controller.publish_task(&topic, &next).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::controller::tests::local_controller;
    use crate::domain::pipeline::{PipelineSpec, Stage};
    use crate::domain::{RunId, TaskId, TaskMeta};
    use crate::ports::WithContentType;
    use rstest::rstest;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn meta() -> Arc<TaskMeta> {
        let op = || "noop:1.0.0".parse().unwrap();
        let spec = PipelineSpec {
            name: "t".into(),
            version: semver::Version::new(1, 0, 0),
            stages: BTreeMap::from([
                ("a".to_string(), Stage::new(op())),
                ("b".to_string(), Stage::new(op()).after(["a"])),
                ("c".to_string(), Stage::new(op()).after(["a"])),
            ]),
            starts: "a".into(),
            ends: "c".into(),
        };
        Arc::new(TaskMeta::for_run(&spec, RunId::from_u64(1)))
    }

    #[rstest]
    #[case("image/png", ".png")]
    #[case("image/jpeg", ".jpg")]
    #[case("image/gif", ".gif")]
    #[case("application/json; charset=utf-8", ".json")]
    #[case("Text/Plain", ".txt")]
    #[case("application/octet-stream", "")]
    fn extension_follows_content_type(#[case] content_type: &str, #[case] ext: &str) {
        assert_eq!(extension_for(content_type), ext);
    }

    #[tokio::test]
    async fn inputs_are_read_once_in_order() {
        let (root, _, _) = local_controller("node-1");
        let run = root.with_scope("r");
        for (path, body) in [("in/1", "one"), ("in/2", "two")] {
            run.store()
                .put(path, Box::new(Bytes::from(body)))
                .await
                .unwrap();
        }

        let task = Task::submission(TaskId::from_u64(9), meta())
            .next("a", vec!["in/1".into(), "in/2".into()]);
        let mut transfer = Transfer::new(run, task);

        assert_eq!(transfer.remaining(), 2);
        assert_eq!(transfer.next_bytes().await.unwrap(), Bytes::from("one"));
        assert!(transfer.has_next());
        assert_eq!(transfer.next_bytes().await.unwrap(), Bytes::from("two"));
        assert!(!transfer.has_next());
        assert!(matches!(
            transfer.next_input().await,
            Err(WeftError::NoMoreInputs)
        ));
    }

    #[tokio::test]
    async fn outputs_embed_machine_id_and_extension() {
        let (root, _, store) = local_controller("node-1");
        let task = Task::submission(TaskId::from_u64(9), meta()).next("a", vec![]);
        let mut transfer = Transfer::new(root.with_scope("r"), task);

        let path = transfer
            .put(WithContentType::new(Bytes::from_static(b"{}"), "application/json"))
            .await
            .unwrap();

        assert!(path.starts_with("tasks/9/stages/a/results/node-1,"), "{path}");
        assert!(path.ends_with(".json"), "{path}");
        assert_eq!(store.paths(), vec![format!("r/{path}")]);
        assert_eq!(transfer.outputs(), [path]);
    }

    #[tokio::test]
    async fn send_publishes_to_every_successor_and_clears_outputs() {
        let (root, _, _) = local_controller("n");
        let run = root.with_scope("r");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut subs = Vec::new();
        for stage in ["b", "c"] {
            let tx = tx.clone();
            subs.push(
                run.subscribe_tasks(stage, move |task| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(task);
                    }
                })
                .await
                .unwrap(),
            );
        }

        let task = Task::submission(TaskId::from_u64(9), meta()).next("a", vec![]);
        let mut transfer = Transfer::new(run, task);

        assert!(matches!(
            transfer.send().await,
            Err(WeftError::NoInputsForNext)
        ));

        let out = transfer.put(Bytes::from_static(b"x")).await.unwrap();
        transfer.send().await.unwrap();
        assert!(transfer.outputs().is_empty());

        let mut got = Vec::new();
        for _ in 0..2 {
            let t = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(t.inputs(), [out.clone()]);
            assert_eq!(t.stage.upstream.as_ref().unwrap().stage, "a");
            got.push(t.stage_name().to_string());
        }
        got.sort();
        assert_eq!(got, vec!["b", "c"]);

        for sub in subs {
            sub.unsubscribe().await;
        }
    }

    #[tokio::test]
    async fn end_stage_sends_to_completion_topic() {
        let (root, _, _) = local_controller("n");
        let run = root.with_scope("r");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = run
            .subscribe_tasks("tasks/9/$output", move |task| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(task);
                }
            })
            .await
            .unwrap();

        let task = Task::submission(TaskId::from_u64(9), meta())
            .next("a", vec![])
            .next("c", vec![]);
        let mut transfer = Transfer::new(run, task);
        transfer.put(Bytes::from_static(b"done")).await.unwrap();
        transfer.send().await.unwrap();

        let done = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.stage_name(), OUTPUT_TOPIC);
        assert_eq!(done.inputs().len(), 1);
        sub.unsubscribe().await;
    }
}
