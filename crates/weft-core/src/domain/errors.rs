//! Errors - エラー型と分類
//!
//! ライブラリ全体で 1 つの `WeftError` を使い、`?` で伝播させます。
//! ハンドラのエラーはプロセス境界を越えて throw されることはなく、
//! Task の `error` フィールド（データ）として完了 topic まで運ばれます。

use thiserror::Error;

/// ErrorKind は運用上の分類
///
/// - Configuration: パイプライン定義の不正（構築時に致命的）
/// - NoSubscribers: topic に購読者がいない（ステージのレプリカが 0）
/// - Handler: ユーザーのステージロジックの失敗
/// - Transport: event bus / store への接続障害
/// - Cancelled: 呼び出し側のキャンセル・期限切れ
/// - NotFound: ストアにパスが存在しない
/// - Codec: wire format の encode/decode 失敗
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    NoSubscribers,
    Handler,
    Transport,
    Cancelled,
    NotFound,
    Codec,
}

#[derive(Debug, Error)]
pub enum WeftError {
    #[error("invalid pipeline {pipeline}: {reason}")]
    InvalidPipeline { pipeline: String, reason: String },

    #[error("invalid setting {key}: {reason}")]
    Config { key: String, reason: String },

    #[error("invalid operator ref {input:?}: {reason}")]
    InvalidOperatorRef { input: String, reason: String },

    #[error("operator {0} is not registered")]
    OperatorNotFound(String),

    #[error("operator {0} is already registered")]
    AlreadyRegistered(String),

    #[error("no subscriptions for topic {topic}")]
    NoSubscribers { topic: String },

    #[error("{path} not found")]
    NotFound { path: String },

    #[error("no more inputs")]
    NoMoreInputs,

    #[error("no inputs for next")]
    NoInputsForNext,

    #[error("[{pipeline}]{stage}: {message}")]
    TaskFailed {
        pipeline: String,
        stage: String,
        message: String,
    },

    #[error("[{pipeline}]{stage}: {reason}")]
    Cancelled {
        pipeline: String,
        stage: String,
        reason: String,
    },

    #[error("{method} {url} failed with {status}: {message}")]
    Remote {
        method: String,
        url: String,
        status: u16,
        message: String,
    },

    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("object store: {0}")]
    ObjectStore(#[from] object_store::Error),
}

impl WeftError {
    pub fn invalid_pipeline(pipeline: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPipeline {
            pipeline: pipeline.into(),
            reason: reason.into(),
        }
    }

    pub fn no_subscribers(topic: impl Into<String>) -> Self {
        Self::NoSubscribers {
            topic: topic.into(),
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPipeline { .. }
            | Self::Config { .. }
            | Self::InvalidOperatorRef { .. }
            | Self::OperatorNotFound(_)
            | Self::AlreadyRegistered(_) => ErrorKind::Configuration,
            Self::NoSubscribers { .. } => ErrorKind::NoSubscribers,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::NoMoreInputs | Self::NoInputsForNext | Self::TaskFailed { .. } => {
                ErrorKind::Handler
            }
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Codec(_) => ErrorKind::Codec,
            Self::Remote { .. }
            | Self::Io(_)
            | Self::Http(_)
            | Self::Redis(_)
            | Self::ObjectStore(_) => ErrorKind::Transport,
        }
    }

    pub fn is_no_subscribers(&self) -> bool {
        self.kind() == ErrorKind::NoSubscribers
    }
}
