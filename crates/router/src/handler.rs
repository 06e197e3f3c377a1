use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Context shared by reference with every handler invocation.
///
/// Handlers treat it as read-mostly; only the router replaces it.
pub type HandlerContext = Arc<Value>;

/// 能力处理函数的执行接口
///
/// A handler is the concrete implementation behind one capability name.
/// Input and output are JSON; failures are plain `anyhow` errors whose
/// message ends up in the call result.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn handle(&self, input: Value, context: HandlerContext) -> anyhow::Result<Value>;
}

/// Adapts an async closure into a [`CapabilityHandler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> CapabilityHandler for FnHandler<F>
where
    F: Fn(Value, HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn handle(&self, input: Value, context: HandlerContext) -> anyhow::Result<Value> {
        (self.f)(input, context).await
    }
}

/// Adapts a synchronous closure into a [`CapabilityHandler`].
pub struct SyncFnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> CapabilityHandler for SyncFnHandler<F>
where
    F: Fn(Value, &Value) -> anyhow::Result<Value> + Send + Sync,
{
    async fn handle(&self, input: Value, context: HandlerContext) -> anyhow::Result<Value> {
        (self.f)(input, &*context)
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn CapabilityHandler>
where
    F: Fn(Value, HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnHandler::new(f))
}

pub fn sync_handler<F>(f: F) -> Arc<dyn CapabilityHandler>
where
    F: Fn(Value, &Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(SyncFnHandler { f })
}
