//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（Redis, ファイルシステム, リモートノード, コンテナ基盤など）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - ステージ間の連携は EventBus と ContentStore だけを通す（直接接続しない）
//! - ID とマシン識別子はノードごとに払い出せる（中央の調整なし）

pub mod clock;
pub mod content_store;
pub mod event_bus;
pub mod id_generator;
pub mod machine;
pub mod scaler;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::content_store::{
    BlobReader, BlobSink, BlobSource, ContentStore, ReaderSource, WithContentType, put_with_cost,
    read_to_bytes,
};
pub use self::event_bus::{EventBus, MessageHandler, Subscription, message_handler};
pub use self::id_generator::{IdGenerator, SnowflakeGenerator};
pub use self::machine::{MachineIdentifier, StaticMachineId, machine_id_of, with_machine_id};
pub use self::scaler::Scaler;
