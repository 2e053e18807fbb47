//! PipelineController - event bus + store + ID 生成 + マシン識別子をまとめたハンドル
//!
//! `with_scope(name)` は topic に `name:` を、ストアのパスに `name/` を付けた
//! 新しいハンドルを返します。run ごと・ステージごとの名前空間はこれだけで分離され、
//! 呼び出し側が手で名前を組み立てる必要はありません。
//!
//! # 使用例
//! ```ignore
//! let root = PipelineController::new(bus, store, ids, machine);
//! let run = root.with_scope("pipelines/demo:1.0.0/42");
//! run.publish_task("transform", &task).await?;
//! ```

use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;

use crate::domain::errors::WeftError;
use crate::domain::task::Task;
use crate::impls::{BasePathStore, PrefixedBus};
use crate::ports::{
    ContentStore, EventBus, IdGenerator, MachineIdentifier, Subscription, message_handler,
};

#[derive(Clone)]
pub struct PipelineController {
    bus: Arc<dyn EventBus>,
    store: Arc<dyn ContentStore>,
    ids: Arc<dyn IdGenerator>,
    machine: Arc<dyn MachineIdentifier>,
    scope: String,
}

impl PipelineController {
    pub fn new(
        bus: Arc<dyn EventBus>,
        store: Arc<dyn ContentStore>,
        ids: Arc<dyn IdGenerator>,
        machine: Arc<dyn MachineIdentifier>,
    ) -> Self {
        Self {
            bus,
            store,
            ids,
            machine,
            scope: String::new(),
        }
    }

    /// topic とパスを `name` で名前空間化したハンドル
    pub fn with_scope(&self, name: &str) -> Self {
        Self {
            bus: Arc::new(PrefixedBus::new(self.bus.clone(), name)),
            store: Arc::new(BasePathStore::new(self.store.clone(), name)),
            ids: self.ids.clone(),
            machine: self.machine.clone(),
            scope: name.to_string(),
        }
    }

    /// 直近の `with_scope` の名前（ルートでは空）
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn ids(&self) -> &dyn IdGenerator {
        self.ids.as_ref()
    }

    pub fn machine_id(&self) -> &str {
        self.machine.machine_id()
    }

    pub async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), WeftError> {
        self.bus.publish(topic, payload).await
    }

    pub async fn publish_task(&self, topic: &str, task: &Task) -> Result<(), WeftError> {
        self.bus.publish(topic, task.encode()?).await
    }

    /// `topic` の Task を購読する。
    ///
    /// decode できない payload はエラー付きの Task として `on_task` に渡します。
    pub async fn subscribe_tasks<F, Fut>(
        &self,
        topic: &str,
        on_task: F,
    ) -> Result<Subscription, WeftError>
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let scope = self.scope.clone();
        let topic_name = topic.to_string();
        let handler = message_handler(move |payload: Bytes| {
            let task = Task::decode(&payload).unwrap_or_else(|e| {
                tracing::warn!(pipeline = %scope, topic = %topic_name, error = %e, "undecodable task payload");
                Task::undecodable(&e)
            });
            on_task(task)
        });
        self.bus.subscribe(topic, handler).await
    }
}

impl std::fmt::Debug for PipelineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineController")
            .field("scope", &self.scope)
            .field("machine", &self.machine_id())
            .finish_non_exhaustive()
    }
}
