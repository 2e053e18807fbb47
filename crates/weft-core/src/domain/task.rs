//! Task - ステージグラフを流れる 1 単位の仕事
//!
//! # 設計原則
//! - `Task` は作成後に変更しない。遷移（`next`）やエラー付与（`with_error`）は
//!   常に新しい `Task` を返す
//! - `TaskStage::upstream` は遷移元を指す後方リンク。新しいノードを毎回確保するので
//!   循環にはならない
//! - `TaskMeta` は run ごとに 1 つ。`Arc` で全 Task から共有する
//!
//! ## Wire 表現
//! event bus の payload は JSON。map はすべて `BTreeMap` なので
//! encode → decode → encode がバイト単位で一致します。

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::errors::WeftError;
use super::ids::{RunId, TaskId};
use super::pipeline::PipelineSpec;

/// 投入直後の合成ステージ名
pub const INPUT_STAGE: &str = "$input";

/// タスクごとの完了 topic の末尾
pub const OUTPUT_TOPIC: &str = "$output";

/// run 単位のメタ情報（run 中は不変）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMeta {
    /// run の名前空間 `pipelines/<name>:<version>/<run-id>`
    pub scope: String,
    pub starts: String,
    pub ends: String,
    /// stage -> 宣言された先行ステージ
    pub stage_deps: BTreeMap<String, Vec<String>>,
}

impl TaskMeta {
    pub fn for_run(spec: &PipelineSpec, run_id: RunId) -> Self {
        Self {
            scope: run_scope(spec, run_id),
            starts: spec.starts.clone(),
            ends: spec.ends.clone(),
            stage_deps: spec.stage_deps(),
        }
    }

    /// Direct graph successors of `stage`, in stage-name order.
    pub fn graph_successors(&self, stage: &str) -> Vec<String> {
        self.stage_deps
            .iter()
            .filter(|(_, deps)| deps.iter().any(|d| d == stage))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

pub fn run_scope(spec: &PipelineSpec, run_id: RunId) -> String {
    format!("pipelines/{}/{}", spec.ref_id(), run_id)
}

pub fn completion_topic(id: TaskId) -> String {
    format!("tasks/{id}/{OUTPUT_TOPIC}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext {
    pub id: TaskId,

    /// 帯域外メタデータ
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Vec<String>>,

    pub meta: Arc<TaskMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<Arc<TaskStage>>,

    pub stage: String,

    /// このステージの入力（ストアのパス）
    #[serde(default)]
    pub inputs: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskStage {
    /// 自分から root までの来歴
    pub fn lineage(&self) -> impl Iterator<Item = &TaskStage> {
        std::iter::successors(Some(self), |s| s.upstream.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub context: TaskContext,
    pub stage: Arc<TaskStage>,
}

impl Task {
    /// 投入用の `$input` タスク
    pub fn submission(id: TaskId, meta: Arc<TaskMeta>) -> Self {
        Self {
            context: TaskContext {
                id,
                headers: BTreeMap::new(),
                meta,
            },
            stage: Arc::new(TaskStage {
                upstream: None,
                stage: INPUT_STAGE.to_string(),
                inputs: Vec::new(),
                error: None,
            }),
        }
    }

    /// Task standing in for a payload that could not be decoded.
    pub fn undecodable(err: &WeftError) -> Self {
        Self::submission(TaskId::from_u64(0), Arc::default()).with_error(err.to_string())
    }

    pub fn id(&self) -> TaskId {
        self.context.id
    }

    pub fn meta(&self) -> &TaskMeta {
        &self.context.meta
    }

    pub fn stage_name(&self) -> &str {
        &self.stage.stage
    }

    pub fn inputs(&self) -> &[String] {
        &self.stage.inputs
    }

    pub fn error(&self) -> Option<&str> {
        self.stage.error.as_deref()
    }

    pub fn is_error(&self) -> bool {
        self.stage.error.is_some()
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.context
            .headers
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn with_header(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut context = self.context.clone();
        context
            .headers
            .entry(key.into())
            .or_default()
            .push(value.into());
        Self {
            context,
            stage: self.stage.clone(),
        }
    }

    /// `stage` へ遷移した新しい Task。
    ///
    /// `$input` からの遷移は upstream を張りません（合成ステージは来歴に含めない）。
    pub fn next(&self, stage: impl Into<String>, inputs: Vec<String>) -> Self {
        let upstream = (self.stage.stage != INPUT_STAGE).then(|| self.stage.clone());
        Self {
            context: self.context.clone(),
            stage: Arc::new(TaskStage {
                upstream,
                stage: stage.into(),
                inputs,
                error: None,
            }),
        }
    }

    /// 現在のステージにエラーを付けた新しい Task（upstream はそのまま）
    pub fn with_error(&self, message: impl Into<String>) -> Self {
        let mut stage = (*self.stage).clone();
        stage.error = Some(message.into());
        Self {
            context: self.context.clone(),
            stage: Arc::new(stage),
        }
    }

    pub fn completion_topic(&self) -> String {
        completion_topic(self.id())
    }

    /// Topics the outputs of the current stage are published to.
    ///
    /// - `$input` -> the run's start stage
    /// - the run's end stage -> this task's completion topic
    /// - otherwise -> every stage whose deps contain the current stage
    ///
    /// Depends only on the static graph and the current stage name.
    pub fn successors(&self) -> Vec<String> {
        let meta = self.meta();
        let current = self.stage_name();
        if current == INPUT_STAGE {
            vec![meta.starts.clone()]
        } else if current == meta.ends {
            vec![self.completion_topic()]
        } else {
            meta.graph_successors(current)
        }
    }

    /// 出力の置き場 `tasks/<id>/stages/<stage>/results`
    pub fn results_dir(&self) -> String {
        format!("tasks/{}/stages/{}/results", self.id(), self.stage_name())
    }

    pub fn encode(&self) -> Result<Bytes, WeftError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WeftError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pipeline::Stage;
    use rstest::rstest;
    use semver::Version;

    fn diamond() -> PipelineSpec {
        //     a
        //    / \
        //   b   c
        //    \ /
        //     d
        let op = || "noop:1.0.0".parse().unwrap();
        PipelineSpec {
            name: "diamond".into(),
            version: Version::new(0, 1, 0),
            stages: BTreeMap::from([
                ("a".to_string(), Stage::new(op())),
                ("b".to_string(), Stage::new(op()).after(["a"])),
                ("c".to_string(), Stage::new(op()).after(["a"])),
                ("d".to_string(), Stage::new(op()).after(["b", "c"])),
            ]),
            starts: "a".into(),
            ends: "d".into(),
        }
    }

    fn submission() -> Task {
        let meta = Arc::new(TaskMeta::for_run(&diamond(), RunId::from_u64(5)));
        Task::submission(TaskId::from_u64(42), meta)
    }

    #[test]
    fn meta_carries_run_scope() {
        let task = submission();
        assert_eq!(task.meta().scope, "pipelines/diamond:0.1.0/5");
        assert_eq!(task.completion_topic(), "tasks/42/$output");
        assert_eq!(task.results_dir(), "tasks/42/stages/$input/results");
    }

    #[rstest]
    #[case(INPUT_STAGE, &["a"])]
    #[case("a", &["b", "c"])]
    #[case("b", &["d"])]
    #[case("c", &["d"])]
    #[case("d", &["tasks/42/$output"])]
    fn successors_follow_the_graph(#[case] stage: &str, #[case] expected: &[&str]) {
        let base = submission();
        let task = if stage == INPUT_STAGE {
            base
        } else {
            base.next(stage, vec![])
        };

        assert_eq!(task.successors(), expected);
        // same answer on every call
        assert_eq!(task.successors(), task.successors());
    }

    #[test]
    fn transitions_build_a_lineage() {
        let task = submission()
            .next("a", vec!["in/0".into()])
            .next("b", vec!["a/out".into()])
            .next("d", vec!["b/out".into()]);

        let stages: Vec<&str> = task.stage.lineage().map(|s| s.stage.as_str()).collect();
        assert_eq!(stages, vec!["d", "b", "a"]);
        for pair in task.stage.lineage().collect::<Vec<_>>().windows(2) {
            assert_ne!(pair[0].stage, pair[1].stage);
        }
    }

    #[test]
    fn transitions_do_not_mutate_the_source() {
        let a = submission().next("a", vec!["x".into()]);
        let b = a.next("b", vec!["y".into()]);

        assert_eq!(a.stage_name(), "a");
        assert_eq!(a.inputs(), ["x".to_string()]);
        assert!(Arc::ptr_eq(b.stage.upstream.as_ref().unwrap(), &a.stage));
    }

    #[test]
    fn with_error_keeps_stage_and_upstream() {
        let b = submission().next("a", vec![]).next("b", vec!["p".into()]);
        let failed = b.with_error("boom");

        assert!(failed.is_error());
        assert!(!b.is_error());
        assert_eq!(failed.error(), Some("boom"));
        assert_eq!(failed.stage_name(), "b");
        assert_eq!(failed.inputs(), b.inputs());
        assert_eq!(failed.stage.upstream, b.stage.upstream);
    }

    #[test]
    fn wire_format_round_trips_byte_for_byte() {
        let task = submission()
            .with_header("trace", "abc")
            .with_header("trace", "def")
            .next("a", vec!["tasks/42/stages/$input/results/m,1".into()])
            .next("c", vec!["tasks/42/stages/a/results/m,2.png".into()])
            .with_error("bad pixel");

        let encoded = task.encode().unwrap();
        let decoded = Task::decode(&encoded).unwrap();

        assert_eq!(decoded, task);
        assert_eq!(decoded.encode().unwrap(), encoded);
        assert_eq!(decoded.header("trace"), Some("abc"));
    }

    #[test]
    fn undecodable_payload_becomes_error_task() {
        let err = Task::decode(b"{not json").unwrap_err();
        let task = Task::undecodable(&err);

        assert!(task.is_error());
        assert!(task.error().unwrap().starts_with("codec"));
    }
}
