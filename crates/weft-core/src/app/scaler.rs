//! InProcessScaler - 同じプロセス内で StageRuntime を増減させる Scaler
//!
//! `(scope, stage)` ごとに動いている `StageRuntime` を持ち、
//! `apply` で目標レプリカ数に合わせ、`destroy` で全レプリカを drain して外します。
//! ハンドラは `OperatorRegistry` から stage の `uses` で引きます。
//!
//! LocalBus 上で 2 レプリカ以上にすると各レプリカが同じメッセージを受け取る（broadcast）点に注意。

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::app::controller::PipelineController;
use crate::app::registry::OperatorRegistry;
use crate::app::serve::{StageRuntime, serve_operator};
use crate::domain::errors::WeftError;
use crate::domain::pipeline::Stage;
use crate::ports::Scaler;

pub struct InProcessScaler {
    controller: PipelineController,
    registry: Arc<OperatorRegistry>,
    runtimes: Mutex<HashMap<String, Vec<StageRuntime>>>,
}

fn key(scope: &str, stage: &str) -> String {
    format!("{scope}/{stage}")
}

impl InProcessScaler {
    /// `controller` はルート（スコープなし）のハンドル
    pub fn new(controller: PipelineController, registry: Arc<OperatorRegistry>) -> Self {
        Self {
            controller,
            registry,
            runtimes: Mutex::new(HashMap::new()),
        }
    }

    pub async fn replicas(&self, scope: &str, stage: &str) -> usize {
        self.runtimes
            .lock()
            .await
            .get(&key(scope, stage))
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Scaler for InProcessScaler {
    async fn apply(
        &self,
        scope: &str,
        stage_name: &str,
        stage: &Stage,
        replicas: u32,
    ) -> Result<(), WeftError> {
        let handler = self.registry.get(&stage.uses)?;
        let scoped = self.controller.with_scope(scope);
        let target = replicas as usize;

        let surplus = {
            let mut runtimes = self.runtimes.lock().await;
            let running = runtimes.entry(key(scope, stage_name)).or_default();
            while running.len() < target {
                running.push(serve_operator(&scoped, stage_name, handler.clone()).await?);
            }
            let keep = target.min(running.len());
            running.split_off(keep)
        };

        // drain はロックの外で
        for runtime in surplus {
            runtime.unsubscribe().await;
        }
        tracing::info!(pipeline = scope, stage = stage_name, operator = %stage.uses, replicas, "stage applied");
        Ok(())
    }

    async fn destroy(&self, scope: &str, stage_name: &str) -> Result<(), WeftError> {
        let removed = self.runtimes.lock().await.remove(&key(scope, stage_name));
        for runtime in removed.into_iter().flatten() {
            runtime.unsubscribe().await;
        }
        tracing::info!(pipeline = scope, stage = stage_name, "stage destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::controller::tests::local_controller;
    use crate::app::registry::OperatorHandler;
    use crate::app::transfer::Transfer;

    struct Noop;

    #[async_trait]
    impl OperatorHandler for Noop {
        async fn handle(&self, _transfer: &mut Transfer) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn scaler() -> (InProcessScaler, crate::impls::LocalBus) {
        let (root, bus, _) = local_controller("n");
        let mut registry = OperatorRegistry::new();
        registry
            .register("noop:1.0.0".parse().unwrap(), Arc::new(Noop))
            .unwrap();
        (InProcessScaler::new(root, Arc::new(registry)), bus)
    }

    #[tokio::test]
    async fn apply_reconciles_replica_count() {
        let (scaler, bus) = scaler();
        let stage = Stage::new("noop:1.0.0".parse().unwrap());

        scaler.apply("run", "a", &stage, 3).await.unwrap();
        assert_eq!(scaler.replicas("run", "a").await, 3);
        assert_eq!(bus.subscriber_count("run:a"), 3);

        scaler.apply("run", "a", &stage, 1).await.unwrap();
        assert_eq!(scaler.replicas("run", "a").await, 1);
        assert_eq!(bus.subscriber_count("run:a"), 1);

        scaler.destroy("run", "a").await.unwrap();
        assert_eq!(scaler.replicas("run", "a").await, 0);
        assert_eq!(bus.subscriber_count("run:a"), 0);
    }

    #[tokio::test]
    async fn unknown_operator_is_rejected() {
        let (scaler, _) = scaler();
        let stage = Stage::new("missing:1.0.0".parse().unwrap());

        let err = scaler.apply("run", "a", &stage, 1).await.unwrap_err();
        assert!(matches!(err, WeftError::OperatorNotFound(_)));
        assert_eq!(scaler.replicas("run", "a").await, 0);
    }

    #[tokio::test]
    async fn destroy_of_unknown_stage_is_a_no_op() {
        let (scaler, _) = scaler();
        scaler.destroy("run", "nothing").await.unwrap();
    }
}
