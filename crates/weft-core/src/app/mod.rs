//! App - アプリケーション層
//!
//! - **controller**: event bus / store / ID / マシン識別子をまとめたスコープ付きハンドル
//! - **transfer**: ハンドラから見た入力カーソルと出力
//! - **serve**: ステージ 1 レプリカ分のイベントループ
//! - **registry**: operator 参照 → ハンドラ
//! - **scaler**: in-process の Scaler
//! - **tracker**: 投入中の Task の結果テーブル
//! - **orchestrator**: パイプラインの起動・停止・投入

pub mod controller;
pub mod orchestrator;
pub mod registry;
pub mod scaler;
pub mod serve;
pub mod tracker;
pub mod transfer;

pub use self::controller::PipelineController;
pub use self::orchestrator::{PipelineManager, PipelineRun};
pub use self::registry::{OperatorHandler, OperatorRegistry};
pub use self::scaler::InProcessScaler;
pub use self::serve::{StageRuntime, serve_operator};
pub use self::tracker::{Completion, CompletionTracker, PendingResult, TaskOutput};
pub use self::transfer::{Transfer, extension_for};
