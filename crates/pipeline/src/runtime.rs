use async_trait::async_trait;
use capflow_core::{Capability, CapabilityGraph, Config, EngineLookup, PipelineSettings, Result};
use capflow_router::{CapabilityCallResult, CapabilityRouter};
use serde_json::Value;
use tracing::debug;

use crate::optimizer::PipelineOptimizer;
use crate::resolver::expand_pipeline;

/// What the runner needs from whoever executes steps.
///
/// `call` may fail outright (e.g. a transport error in a remote runtime);
/// the runner folds that into the same failure envelope as an unsuccessful
/// result.
#[async_trait]
pub trait PipelineRuntime: Send + Sync {
    async fn call(&self, capability: &str, input: Value) -> Result<CapabilityCallResult>;

    fn has_capability(&self, capability: &str) -> bool;
}

/// What expansion and optimization need: the static graph, and optionally a
/// way to attribute capabilities to engines for grouping.
pub trait GraphRuntime {
    fn capability_graph(&self) -> &CapabilityGraph;

    /// `None` when the runtime cannot report owning engines; the optimizer
    /// then only deduplicates.
    fn engine_lookup(&self) -> Option<&dyn EngineLookup> {
        None
    }
}

impl GraphRuntime for CapabilityGraph {
    fn capability_graph(&self) -> &CapabilityGraph {
        self
    }
}

#[async_trait]
impl PipelineRuntime for CapabilityRouter {
    async fn call(&self, capability: &str, input: Value) -> Result<CapabilityCallResult> {
        Ok(CapabilityRouter::call(self, capability, input).await)
    }

    fn has_capability(&self, capability: &str) -> bool {
        CapabilityRouter::has_capability(self, capability)
    }
}

/// A capability graph paired with the router that serves it.
pub struct CapabilityRuntime {
    graph: CapabilityGraph,
    router: CapabilityRouter,
}

impl CapabilityRuntime {
    pub fn new(graph: CapabilityGraph, router: CapabilityRouter) -> Self {
        Self { graph, router }
    }

    /// Takes the graph from a manifest and seeds the router context with the
    /// manifest's `context`.
    pub fn from_config(config: &Config, mut router: CapabilityRouter) -> Self {
        router.set_context(config.context.clone());
        Self::new(config.engines.clone(), router)
    }

    pub fn graph(&self) -> &CapabilityGraph {
        &self.graph
    }

    pub fn router(&self) -> &CapabilityRouter {
        &self.router
    }

    /// Turns a requested capability list into an execution order according
    /// to `settings`: expansion first, then optimization.
    pub fn plan<S: AsRef<str>>(&self, requested: &[S], settings: &PipelineSettings) -> Result<Vec<Capability>> {
        let mut order: Vec<Capability> = if settings.expand {
            expand_pipeline(self, requested)?
        } else {
            requested.iter().map(|c| Capability::from(c.as_ref())).collect()
        };

        if settings.optimize {
            let optimized = PipelineOptimizer::for_runtime(self).optimize(&order);
            order = optimized.order;
        }

        debug!(requested = requested.len(), planned = order.len(), "planned pipeline");
        Ok(order)
    }
}

#[async_trait]
impl PipelineRuntime for CapabilityRuntime {
    async fn call(&self, capability: &str, input: Value) -> Result<CapabilityCallResult> {
        Ok(self.router.call(capability, input).await)
    }

    fn has_capability(&self, capability: &str) -> bool {
        self.router.has_capability(capability)
    }
}

impl GraphRuntime for CapabilityRuntime {
    fn capability_graph(&self) -> &CapabilityGraph {
        &self.graph
    }

    fn engine_lookup(&self) -> Option<&dyn EngineLookup> {
        Some(&self.router)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capflow_router::sync_handler;
    use serde_json::json;

    fn runtime() -> CapabilityRuntime {
        let graph = CapabilityGraph::new()
            .with_engine("identity", ["identity.resolve", "identity.normalize"], Vec::<&str>::new())
            .with_engine("deviation", ["deviation.compute"], ["identity.resolve"]);
        let mut router = CapabilityRouter::default();
        for (cap, engine) in [
            ("identity.resolve", "identity"),
            ("identity.normalize", "identity"),
            ("deviation.compute", "deviation"),
        ] {
            router
                .register(cap, engine, sync_handler(|input, _ctx| Ok(input)))
                .unwrap();
        }
        CapabilityRuntime::new(graph, router)
    }

    #[test]
    fn test_plan_expands_then_optimizes() {
        let rt = runtime();
        let order = rt.plan(&["deviation.compute", "identity.normalize"], &PipelineSettings::default()).unwrap();
        let order: Vec<&str> = order.iter().map(Capability::as_str).collect();
        assert_eq!(order, vec!["identity.resolve", "identity.normalize", "deviation.compute"]);
    }

    #[test]
    fn test_plan_without_expansion_keeps_request() {
        let rt = runtime();
        let settings = PipelineSettings {
            expand: false,
            optimize: false,
        };
        let order = rt.plan(&["deviation.compute", "deviation.compute"], &settings).unwrap();
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn test_from_config_seeds_context() {
        let mut config = Config::default();
        config.context = json!({ "tenant": "acme" });
        let rt = CapabilityRuntime::from_config(&config, CapabilityRouter::default());
        assert_eq!(rt.router().context()["tenant"], "acme");
        assert!(rt.graph().is_empty());
    }

    #[tokio::test]
    async fn test_runtime_delegates_calls_to_router() {
        let rt = runtime();
        assert!(PipelineRuntime::has_capability(&rt, "identity.resolve"));
        let result = PipelineRuntime::call(&rt, "identity.resolve", json!(7)).await.unwrap();
        assert!(result.success);
        assert_eq!(result.data, Some(json!(7)));
        assert_eq!(
            rt.engine_lookup().unwrap().engine_for_capability("deviation.compute").unwrap(),
            "deviation"
        );
    }
}
