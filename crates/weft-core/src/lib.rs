//! weft-core
//!
//! 分散タスクルーティングエンジンの中核。
//! ステージ（operator）は event bus と共有ストアだけでつながり、直接接続しません。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, operator_ref, pipeline, graph, task, errors）
//! - **ports**: 抽象化レイヤー（EventBus, ContentStore, IdGenerator, MachineIdentifier, Scaler, Clock）
//! - **impls**: 実装（LocalBus, RedisBus, MemoryStore, FsStore, デコレータ, store sidecar）
//! - **app**: アプリケーションロジック（controller, transfer, serve, scaler, tracker, orchestrator）
//! - **config**: 環境変数からの設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{
    OperatorHandler, OperatorRegistry, PipelineController, PipelineManager, PipelineRun,
    Transfer,
};
pub use config::Settings;
pub use domain::{PipelineSpec, Task, WeftError};
