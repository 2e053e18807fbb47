//! Stage dependency graph.
//!
//! Design:
//! - Forward edges: stage -> stages it depends on (declared `deps`)
//! - Reverse edges: stage -> stages that depend on it (graph successors)
//! - Invariant: edges and reverse_edges must be kept in sync
//!
//! ルーティング自体は `TaskMeta::successors` が静的な隣接リストから毎回導出します。
//! このグラフはパイプライン構築時の検証（未知の依存・循環）に使います。

use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Default)]
pub struct StageGraph {
    /// Forward edges: stage -> stages it depends on
    edges: BTreeMap<String, BTreeSet<String>>,

    /// Reverse edges: stage -> stages that depend on it
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl StageGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// 隣接リスト（stage -> 依存先）からグラフを作る
    pub fn from_deps<'a, I, D>(deps: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, D)>,
        D: IntoIterator<Item = &'a String>,
    {
        let mut graph = Self::new();
        for (stage, stage_deps) in deps {
            graph.add_stage(stage);
            for dep in stage_deps {
                graph.add_dependency(stage, dep);
            }
        }
        graph
    }

    pub fn add_stage(&mut self, stage: &str) {
        self.edges.entry(stage.to_string()).or_default();
    }

    /// `stage` depends on `depends_on`.
    ///
    /// Example: add_dependency("b", "a") means "b runs after a"
    pub fn add_dependency(&mut self, stage: &str, depends_on: &str) {
        self.edges
            .entry(stage.to_string())
            .or_default()
            .insert(depends_on.to_string());
        self.reverse_edges
            .entry(depends_on.to_string())
            .or_default()
            .insert(stage.to_string());
    }

    pub fn dependencies(&self, stage: &str) -> Vec<&str> {
        self.edges
            .get(stage)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Stages whose declared dependencies contain `stage`.
    pub fn successors(&self, stage: &str) -> Vec<&str> {
        self.reverse_edges
            .get(stage)
            .map(|waiting| waiting.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Dependencies that are not themselves declared stages.
    pub fn unknown_dependencies(&self) -> Vec<(&str, &str)> {
        self.edges
            .iter()
            .flat_map(|(stage, deps)| deps.iter().map(move |dep| (stage.as_str(), dep.as_str())))
            .filter(|(_, dep)| !self.edges.contains_key(*dep))
            .collect()
    }

    /// Detect a cycle in the dependency graph.
    ///
    /// 3 色 DFS（White: 未訪問, Gray: 探索中のパス上, Black: 探索済み）。
    /// Gray のノードに再び到達したらそこから現在のパスまでが循環です。
    /// Returns the first cycle found (first node repeated at the end), or None.
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        let mut colors: HashMap<&str, Color> = self
            .edges
            .keys()
            .map(|k| (k.as_str(), Color::White))
            .collect();
        let mut path = Vec::new();

        for start in self.edges.keys() {
            if colors.get(start.as_str()) == Some(&Color::White)
                && let Some(cycle) = self.dfs_cycle(start, &mut colors, &mut path)
            {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        colors: &mut HashMap<&'a str, Color>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        colors.insert(node, Color::Gray);
        path.push(node);

        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                match colors.get(dep.as_str()).copied() {
                    Some(Color::Gray) => {
                        let from = path.iter().position(|n| *n == dep.as_str()).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            path[from..].iter().map(|s| s.to_string()).collect();
                        cycle.push(dep.clone());
                        return Some(cycle);
                    }
                    Some(Color::White) => {
                        if let Some(cycle) = self.dfs_cycle(dep, colors, path) {
                            return Some(cycle);
                        }
                    }
                    // Black, or an undeclared dependency (reported separately)
                    _ => {}
                }
            }
        }

        colors.insert(node, Color::Black);
        path.pop();
        None
    }
}
