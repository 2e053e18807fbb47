//! Domain identifiers (strongly-typed IDs).
//!
//! すべての ID は `IdGenerator`（snowflake）が払い出す `u64` です。
//! `Id<T>` はジェネリック実装を 1 つにまとめ、`T` を PhantomData の
//! マーカー型としてコンパイル時に種類を区別します。
//!
//! ## Wire 表現
//! serde では素の数値としてシリアライズされます（`#[serde(transparent)]`）。
//! topic 名やストレージパスにも Display（10 進数）がそのまま埋め込まれます。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

/// IdMarker は各 ID 型のマーカー trait
pub trait IdMarker: Send + Sync + 'static {
    /// Debug 出力で使う種類名（例: "task"）
    fn kind() -> &'static str;
}

/// ジェネリック ID 型
///
/// # 例
/// ```ignore
/// let task_id = TaskId::from_u64(42);
/// let run_id = RunId::from_u64(42);
/// // task_id と run_id は異なる型なので、混同できない
/// ```
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    value: u64,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub const fn from_u64(value: u64) -> Self {
        Self {
            value,
            _marker: PhantomData,
        }
    }

    pub const fn as_u64(&self) -> u64 {
        self.value
    }
}

impl<T: IdMarker> From<u64> for Id<T> {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl<T: IdMarker> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", T::kind(), self.value)
    }
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self::from_u64)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Task のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn kind() -> &'static str {
        "task"
    }
}

/// Run（パイプラインの 1 回のインスタンス化）のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Run {}

impl IdMarker for Run {
    fn kind() -> &'static str {
        "run"
    }
}

/// Blob（ストアに書かれた成果物 1 つ）のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Blob {}

impl IdMarker for Blob {
    fn kind() -> &'static str {
        "blob"
    }
}

/// Identifier of a Task (one unit of work flowing through the stage graph).
pub type TaskId = Id<Task>;

/// Identifier of a pipeline Run.
pub type RunId = Id<Run>;

/// Identifier of an artifact written by a stage.
pub type BlobId = Id<Blob>;
