//! PipelineSpec - パイプライン定義（外部入力、ロード後は不変）
//!
//! ```json
//! {
//!   "name": "thumbnail",
//!   "version": "1.0.0",
//!   "stages": {
//!     "fetch":  { "deps": [],        "uses": "fetch:1.0.0" },
//!     "resize": { "deps": ["fetch"], "uses": "resize:0.3.1", "replicas": 2 }
//!   },
//!   "starts": "fetch",
//!   "ends": "resize"
//! }
//! ```
//!
//! `validate` が通らない定義からは `PipelineRun` を作れません（構築時に致命的）。

use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::errors::WeftError;
use super::graph::StageGraph;
use super::operator_ref::OperatorRef;

fn default_replicas() -> u32 {
    1
}

/// StepOption はステージの実行時設定（コンテナ / in-process 共通）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOption {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// 目標レプリカ数
    #[serde(default = "default_replicas")]
    pub replicas: u32,
}

impl Default for StepOption {
    fn default() -> Self {
        Self {
            env: BTreeMap::new(),
            args: Vec::new(),
            replicas: default_replicas(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// 先行ステージ名
    #[serde(default)]
    pub deps: Vec<String>,

    pub uses: OperatorRef,

    #[serde(flatten)]
    pub options: StepOption,
}

impl Stage {
    pub fn new(uses: OperatorRef) -> Self {
        Self {
            deps: Vec::new(),
            uses,
            options: StepOption::default(),
        }
    }

    pub fn after<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deps = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.options.replicas = replicas;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub name: String,
    pub version: Version,
    pub stages: BTreeMap<String, Stage>,
    pub starts: String,
    pub ends: String,
}

impl PipelineSpec {
    pub fn from_json_str(json: &str) -> Result<Self, WeftError> {
        let spec: Self = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, WeftError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// `<name>:<version>`。エラーメッセージとスコープ名に使います。
    pub fn ref_id(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }

    /// stage -> 宣言された先行ステージ
    pub fn stage_deps(&self) -> BTreeMap<String, Vec<String>> {
        self.stages
            .iter()
            .map(|(name, stage)| (name.clone(), stage.deps.clone()))
            .collect()
    }

    pub fn graph(&self) -> StageGraph {
        StageGraph::from_deps(self.stages.iter().map(|(name, stage)| (name, stage.deps.iter())))
    }

    /// Check the stage graph.
    ///
    /// - every dependency is a declared stage
    /// - `starts` / `ends` are declared stages
    /// - no stage depends on itself, and there is no cycle
    pub fn validate(&self) -> Result<(), WeftError> {
        let invalid = |reason: String| WeftError::invalid_pipeline(self.ref_id(), reason);

        if self.stages.is_empty() {
            return Err(invalid("no stages declared".to_string()));
        }
        for (role, name) in [("starts", &self.starts), ("ends", &self.ends)] {
            if !self.stages.contains_key(name) {
                return Err(invalid(format!("{role} stage {name:?} is not declared")));
            }
        }
        for (name, stage) in &self.stages {
            if stage.deps.iter().any(|dep| dep == name) {
                return Err(invalid(format!("stage {name:?} depends on itself")));
            }
        }

        let graph = self.graph();
        if let Some((stage, dep)) = graph.unknown_dependencies().first() {
            return Err(invalid(format!(
                "stage {stage:?} depends on undeclared stage {dep:?}"
            )));
        }
        if let Some(cycle) = graph.detect_cycle() {
            return Err(invalid(format!(
                "dependency cycle: {}",
                cycle.join(" -> ")
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn op(s: &str) -> OperatorRef {
        s.parse().unwrap()
    }

    fn linear() -> PipelineSpec {
        PipelineSpec {
            name: "demo".into(),
            version: Version::new(1, 0, 0),
            stages: BTreeMap::from([
                ("start".to_string(), Stage::new(op("read:1.0.0"))),
                (
                    "transform".to_string(),
                    Stage::new(op("upper:1.0.0")).after(["start"]),
                ),
                (
                    "end".to_string(),
                    Stage::new(op("write:1.0.0")).after(["transform"]),
                ),
            ]),
            starts: "start".into(),
            ends: "end".into(),
        }
    }

    #[test]
    fn linear_pipeline_is_valid() {
        let spec = linear();
        spec.validate().unwrap();
        assert_eq!(spec.ref_id(), "demo:1.0.0");
        assert_eq!(spec.graph().successors("start"), vec!["transform"]);
    }

    #[test]
    fn parses_json_definition() {
        let spec = PipelineSpec::from_json_str(
            r#"{
                "name": "img",
                "version": "0.2.0",
                "stages": {
                    "fetch": { "uses": "fetch:1.0.0", "env": { "TIMEOUT": "5" } },
                    "gray":  { "deps": ["fetch"], "uses": "gray:1.1.0-rc.1", "args": ["-q"], "replicas": 3 }
                },
                "starts": "fetch",
                "ends": "gray"
            }"#,
        )
        .unwrap();

        let fetch = &spec.stages["fetch"];
        assert_eq!(fetch.options.replicas, 1);
        assert_eq!(fetch.options.env["TIMEOUT"], "5");

        let gray = &spec.stages["gray"];
        assert_eq!(gray.deps, vec!["fetch"]);
        assert_eq!(gray.uses.to_string(), "gray:1.1.0-rc.1");
        assert_eq!(gray.options.args, vec!["-q"]);
        assert_eq!(gray.options.replicas, 3);
    }

    #[rstest]
    #[case::unknown_dep(|s: &mut PipelineSpec| {
        s.stages.get_mut("end").unwrap().deps.push("ghost".into());
    }, "undeclared")]
    #[case::self_dep(|s: &mut PipelineSpec| {
        s.stages.get_mut("transform").unwrap().deps.push("transform".into());
    }, "itself")]
    #[case::missing_start(|s: &mut PipelineSpec| {
        s.starts = "nope".into();
    }, "starts")]
    #[case::missing_end(|s: &mut PipelineSpec| {
        s.ends = "nope".into();
    }, "ends")]
    #[case::cycle(|s: &mut PipelineSpec| {
        s.stages.get_mut("start").unwrap().deps.push("end".into());
    }, "cycle")]
    fn invalid_graphs_are_rejected(#[case] mutate: fn(&mut PipelineSpec), #[case] needle: &str) {
        let mut spec = linear();
        mutate(&mut spec);

        let err = spec.validate().unwrap_err();
        assert!(matches!(err, WeftError::InvalidPipeline { .. }));
        assert!(err.to_string().contains(needle), "{err}");
    }

    #[test]
    fn malformed_operator_ref_fails_to_load() {
        let err = PipelineSpec::from_json_str(
            r#"{"name":"x","version":"1.0.0","stages":{"a":{"uses":"nover"}},"starts":"a","ends":"a"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, WeftError::Codec(_)));
    }
}
