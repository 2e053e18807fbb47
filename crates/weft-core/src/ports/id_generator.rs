//! IdGenerator port - ID 生成の抽象化
//!
//! IdGenerator は分散システムで使える ID を生成するためのインターフェースです。
//! テスト容易性のために、trait として抽象化しています。
//!
//! # 実装
//! - **SnowflakeGenerator**: snowflake 形式の `u64`（本番用）

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::ids::{BlobId, RunId, TaskId};
use crate::ports::Clock;

/// IdGenerator は分散システムで使える ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数スレッドから使える）
pub trait IdGenerator: Send + Sync {
    fn next_u64(&self) -> u64;

    fn generate_task_id(&self) -> TaskId {
        TaskId::from_u64(self.next_u64())
    }

    fn generate_run_id(&self) -> RunId {
        RunId::from_u64(self.next_u64())
    }

    fn generate_blob_id(&self) -> BlobId {
        BlobId::from_u64(self.next_u64())
    }
}

const WORKER_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const TIMESTAMP_SHIFT: u32 = WORKER_BITS + SEQUENCE_BITS;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const TIMESTAMP_MASK: u64 = (1 << 41) - 1;

/// Largest worker id that fits the layout.
pub const MAX_WORKER_ID: u16 = (1 << WORKER_BITS) - 1;

/// 2020-01-01T00:00:00Z
pub fn snowflake_epoch() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_577_836_800_000)
        .single()
        .unwrap_or_default()
}

/// SnowflakeGenerator
///
/// `| 41 bit ms since 2020-01-01 | 10 bit worker | 12 bit sequence |`
///
/// 最後に払い出した ID を CAS で更新するので、同一ミリ秒内や
/// 時計が巻き戻った場合でも単調増加を保ちます（sequence が溢れたら次の ms を借りる）。
pub struct SnowflakeGenerator<C> {
    clock: C,
    worker: u64,
    last: AtomicU64,
}

impl<C: Clock> SnowflakeGenerator<C> {
    /// `worker` は下位 10 bit だけを使います
    pub fn new(clock: C, worker: u16) -> Self {
        Self {
            clock,
            worker: u64::from(worker & MAX_WORKER_ID),
            last: AtomicU64::new(0),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        let ms = (self.clock.now() - snowflake_epoch()).num_milliseconds();
        u64::try_from(ms).unwrap_or(0) & TIMESTAMP_MASK
    }
}

impl<C: Clock> IdGenerator for SnowflakeGenerator<C> {
    fn next_u64(&self) -> u64 {
        let candidate = (self.elapsed_ms() << TIMESTAMP_SHIFT) | (self.worker << SEQUENCE_BITS);
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let next = if candidate > last {
                candidate
            } else if last & SEQUENCE_MASK == SEQUENCE_MASK {
                (((last >> TIMESTAMP_SHIFT) + 1) << TIMESTAMP_SHIFT) | (self.worker << SEQUENCE_BITS)
            } else {
                last + 1
            };
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}

/// Split an id into (ms since epoch, worker, sequence).
pub fn decompose(id: u64) -> (u64, u16, u16) {
    (
        id >> TIMESTAMP_SHIFT,
        ((id >> SEQUENCE_BITS) & u64::from(MAX_WORKER_ID)) as u16,
        (id & SEQUENCE_MASK) as u16,
    )
}
