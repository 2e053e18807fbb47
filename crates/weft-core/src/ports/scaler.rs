//! Scaler port - ステージのレプリカ数の調整
//!
//! コンテナ（ローカル daemon / クラスタ）でも in-process でも同じ契約です。
//! エンジンは `apply` を不透明な reconcile として扱い、即時反映を仮定しません。

use async_trait::async_trait;

use crate::domain::errors::WeftError;
use crate::domain::pipeline::Stage;

#[async_trait]
pub trait Scaler: Send + Sync {
    /// `(scope, stage)` のレプリカ数を `replicas` に合わせる
    async fn apply(
        &self,
        scope: &str,
        stage_name: &str,
        stage: &Stage,
        replicas: u32,
    ) -> Result<(), WeftError>;

    /// `(scope, stage)` のレプリカをすべて止める
    async fn destroy(&self, scope: &str, stage_name: &str) -> Result<(), WeftError>;
}
