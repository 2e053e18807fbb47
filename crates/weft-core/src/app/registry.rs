//! OperatorRegistry - operator 参照 → ハンドラ
//!
//! # 設計原則
//! - 起動時に組み立て（mutable）、実行中は読み取り専用で共有する（ロック不要）
//! - 二重登録はエラー（後勝ちにしない）

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::app::transfer::Transfer;
use crate::domain::errors::WeftError;
use crate::domain::operator_ref::OperatorRef;

/// ステージのビジネスロジック
///
/// # 使用例
/// ```ignore
/// struct Upper;
///
/// #[async_trait]
/// impl OperatorHandler for Upper {
///     async fn handle(&self, transfer: &mut Transfer) -> anyhow::Result<()> {
///         while transfer.has_next() {
///             let input = transfer.next_bytes().await?;
///             transfer.put(input.to_ascii_uppercase()).await?;
///         }
///         Ok(())
///     }
/// }
/// ```
///
/// エラーは Task の `error` に文字列として載り、投入元まで運ばれます。
#[async_trait]
pub trait OperatorHandler: Send + Sync {
    async fn handle(&self, transfer: &mut Transfer) -> anyhow::Result<()>;
}

#[derive(Default, Clone)]
pub struct OperatorRegistry {
    handlers: HashMap<OperatorRef, Arc<dyn OperatorHandler>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        operator: OperatorRef,
        handler: Arc<dyn OperatorHandler>,
    ) -> Result<(), WeftError> {
        if self.handlers.contains_key(&operator) {
            return Err(WeftError::AlreadyRegistered(operator.to_string()));
        }
        self.handlers.insert(operator, handler);
        Ok(())
    }

    pub fn get(&self, operator: &OperatorRef) -> Result<Arc<dyn OperatorHandler>, WeftError> {
        self.handlers
            .get(operator)
            .cloned()
            .ok_or_else(|| WeftError::OperatorNotFound(operator.to_string()))
    }

    /// 登録済みの operator（ソート済み）
    pub fn operators(&self) -> Vec<&OperatorRef> {
        let mut ops: Vec<&OperatorRef> = self.handlers.keys().collect();
        ops.sort();
        ops
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl OperatorHandler for Noop {
        async fn handle(&self, _transfer: &mut Transfer) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = OperatorRegistry::new();
        let op: OperatorRef = "noop:1.0.0".parse().unwrap();

        registry.register(op.clone(), Arc::new(Noop)).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get(&op).is_ok());
        assert_eq!(registry.operators(), vec![&op]);
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = OperatorRegistry::new();
        let op: OperatorRef = "noop:1.0.0".parse().unwrap();
        registry.register(op.clone(), Arc::new(Noop)).unwrap();

        let err = registry.register(op, Arc::new(Noop)).unwrap_err();
        assert!(matches!(err, WeftError::AlreadyRegistered(ref name) if name == "noop:1.0.0"));
    }

    #[test]
    fn versions_are_distinct_operators() {
        let mut registry = OperatorRegistry::new();
        registry
            .register("noop:1.0.0".parse().unwrap(), Arc::new(Noop))
            .unwrap();

        let missing: OperatorRef = "noop:2.0.0".parse().unwrap();
        assert!(matches!(
            registry.get(&missing),
            Err(WeftError::OperatorNotFound(_))
        ));
    }
}
