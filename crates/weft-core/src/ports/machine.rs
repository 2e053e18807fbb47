//! MachineIdentifier port - ノードの識別子
//!
//! ストアに書いたファイル名には `<machine-id>,<file>` の形でノードの識別子が埋め込まれます。
//! 読み出し側はパスの basename から識別子を取り出し、ローカルかリモートかを判定します。

use std::io;

pub trait MachineIdentifier: Send + Sync {
    fn machine_id(&self) -> &str;
}

/// 固定の識別子（設定値・テスト用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticMachineId(String);

impl StaticMachineId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// OS のホスト名
    pub fn from_hostname() -> io::Result<Self> {
        let name = hostname::get()?;
        Ok(Self(name.to_string_lossy().into_owned()))
    }
}

impl MachineIdentifier for StaticMachineId {
    fn machine_id(&self) -> &str {
        &self.0
    }
}

/// `<machine-id>,<file>`
pub fn with_machine_id(machine_id: &str, file: &str) -> String {
    format!("{machine_id},{file}")
}

/// Machine id embedded in the basename of `path`, if any.
pub fn machine_id_of(path: &str) -> Option<&str> {
    let base = path.rsplit('/').next().unwrap_or(path);
    base.split_once(',')
        .map(|(id, _)| id)
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("tasks/1/stages/a/results/node-a,77.png", Some("node-a"))]
    #[case("node-b,1", Some("node-b"))]
    #[case("x/10.0.0.3,5,extra", Some("10.0.0.3"))]
    #[case("dir,with,commas/plain.txt", None)]
    #[case("tasks/1/,77", None)]
    #[case("plain", None)]
    fn extracts_machine_id_from_basename(#[case] path: &str, #[case] expected: Option<&str>) {
        assert_eq!(machine_id_of(path), expected);
    }

    #[test]
    fn with_machine_id_round_trips() {
        let file = with_machine_id("host-1", "42.json");
        assert_eq!(file, "host-1,42.json");
        assert_eq!(machine_id_of(&format!("a/b/{file}")), Some("host-1"));
    }
}
