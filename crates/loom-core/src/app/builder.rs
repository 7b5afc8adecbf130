//! ClaimerBuilder - TaskClaimer の構築とワイヤリング
//!
//! # 設計
//! - 依存（resolver / engine / clock）は明示的に渡す。グローバル状態は持たない
//! - 起動時検証（Fail-fast）: 必須の依存が欠けていれば build() で BuildError
//! - engine は組み込みの jq エンジン、clock は SystemClock がデフォルト

use std::sync::Arc;

use super::TaskClaimer;
use crate::fingerprint::{ExpressionEngine, Fingerprinter, JqEngine};
use crate::ports::{Clock, DependencyResolver, SystemClock};

/// ClaimerBuilder は TaskClaimer を構築
///
/// # 使用例
/// ```ignore
/// let claimer = ClaimerBuilder::new()
///     .resolver(Arc::new(GraphDependencyResolver::new(store.clone())))
///     .build()?;
/// ```
#[derive(Default)]
pub struct ClaimerBuilder {
    resolver: Option<Arc<dyn DependencyResolver>>,
    engine: Option<Arc<dyn ExpressionEngine>>,
    clock: Option<Arc<dyn Clock>>,
}

/// BuildError は構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing required component: {0}")]
    Missing(&'static str),
}

impl ClaimerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依存解決（必須）
    pub fn resolver(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// 重複判定式の評価エンジン
    pub fn engine(mut self, engine: Arc<dyn ExpressionEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<TaskClaimer, BuildError> {
        let resolver = self.resolver.ok_or(BuildError::Missing("dependency resolver"))?;
        let engine = self
            .engine
            .unwrap_or_else(|| Arc::new(JqEngine::new()) as Arc<dyn ExpressionEngine>);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);

        Ok(TaskClaimer::new(Fingerprinter::new(resolver, engine), clock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ResolveError, Task};
    use async_trait::async_trait;
    use serde_json::Value;

    struct NullResolver;

    #[async_trait]
    impl DependencyResolver for NullResolver {
        async fn resolve(&self, _task: &Task) -> Result<Value, ResolveError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_build_success_with_defaults() {
        let claimer = ClaimerBuilder::new().resolver(Arc::new(NullResolver)).build();
        assert!(claimer.is_ok());
    }

    #[test]
    fn test_build_missing_resolver() {
        let claimer = ClaimerBuilder::new().engine(Arc::new(JqEngine::new())).build();
        assert!(matches!(
            claimer,
            Err(BuildError::Missing(name)) if name == "dependency resolver"
        ));
    }
}
