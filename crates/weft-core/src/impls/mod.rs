//! Impls - ports の実装
//!
//! # Event bus
//! - **LocalBus**: プロセス内 fan-out（開発用・テスト用、in-process 実行）
//! - **RedisBus**: Redis 上の competing consumers（本番用）
//! - **PrefixedBus**: topic の名前空間デコレータ
//!
//! # Content store
//! - **MemoryStore** / **FsStore** / **BucketStore**: バックエンド
//! - **BasePathStore**: パスの名前空間デコレータ
//! - **MachineAffinityStore** + store sidecar: 書いたノードから直接読む

pub mod affinity_store;
pub mod base_path_store;
pub mod bucket_store;
pub mod fs_store;
pub mod local_bus;
pub mod memory_store;
pub mod prefixed_bus;
pub mod redis_bus;
pub mod store_server;

// 主要な型を再エクスポート
pub use self::affinity_store::{DEFAULT_STORE_PORT, MachineAffinityStore};
pub use self::base_path_store::BasePathStore;
pub use self::bucket_store::BucketStore;
pub use self::fs_store::FsStore;
pub use self::local_bus::LocalBus;
pub use self::memory_store::MemoryStore;
pub use self::prefixed_bus::PrefixedBus;
pub use self::redis_bus::RedisBus;
pub use self::store_server::{serve_store, serve_store_on, store_router};
