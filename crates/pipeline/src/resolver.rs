//! Transitive dependency expansion over the capability graph.

use capflow_core::{Capability, CapabilityGraph, Error, ProviderIndex, Result};
use std::collections::HashSet;
use tracing::debug;

use crate::runtime::GraphRuntime;

/// Resolves capabilities so that every dependency lands before its dependents.
///
/// Two sets are kept apart:
/// - `resolved` spans the whole expansion, so a shared dependency is only
///   walked once and appears once in the output;
/// - the recursion path is rebuilt for every top-level request and only
///   breaks cycles.
///
/// A capability's dependencies are the `consumes` list of the engine that
/// provides it.
pub struct DependencyResolver<'g> {
    graph: &'g CapabilityGraph,
    index: ProviderIndex,
    order: Vec<Capability>,
    resolved: HashSet<Capability>,
}

impl<'g> DependencyResolver<'g> {
    pub fn new(graph: &'g CapabilityGraph) -> Self {
        Self {
            graph,
            index: ProviderIndex::build(graph),
            order: Vec::new(),
            resolved: HashSet::new(),
        }
    }

    pub fn provider_index(&self) -> &ProviderIndex {
        &self.index
    }

    /// Resolves one requested capability and everything it depends on.
    ///
    /// Fails with [`Error::MissingProvider`] when the capability, or anything
    /// it transitively needs, has no provider in the graph.
    pub fn resolve(&mut self, capability: &str) -> Result<()> {
        let mut path: HashSet<Capability> = HashSet::new();
        self.visit(&Capability::from(capability), &mut path)
    }

    fn visit(&mut self, capability: &Capability, path: &mut HashSet<Capability>) -> Result<()> {
        if self.resolved.contains(capability) {
            return Ok(());
        }

        let engine = self
            .index
            .provider(capability.as_str())
            .cloned()
            .ok_or_else(|| Error::MissingProvider(capability.to_string()))?;

        let graph = self.graph;
        path.insert(capability.clone());
        for dependency in graph.consumes_of(engine.as_str()) {
            if path.contains(dependency) {
                debug!(
                    capability = %capability,
                    dependency = %dependency,
                    "dependency cycle, skipping back edge"
                );
                continue;
            }
            self.visit(dependency, path)?;
        }
        path.remove(capability);

        self.resolved.insert(capability.clone());
        self.order.push(capability.clone());
        Ok(())
    }

    /// Capabilities resolved so far, dependencies first.
    pub fn resolved(&self) -> &[Capability] {
        &self.order
    }

    pub fn into_order(self) -> Vec<Capability> {
        self.order
    }
}

/// Expands `requested` into a duplicate-free list that includes every
/// transitive dependency, each placed before the capabilities needing it.
pub fn expand_pipeline<R, S>(runtime: &R, requested: &[S]) -> Result<Vec<Capability>>
where
    R: GraphRuntime + ?Sized,
    S: AsRef<str>,
{
    let mut resolver = DependencyResolver::new(runtime.capability_graph());
    for capability in requested {
        resolver.resolve(capability.as_ref())?;
    }

    let order = resolver.into_order();
    debug!(requested = requested.len(), expanded = order.len(), "expanded pipeline");
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: [&str; 0] = [];

    fn app_graph() -> CapabilityGraph {
        CapabilityGraph::new()
            .with_engine("identity_filter", ["identity.resolve", "identity.normalize"], NONE)
            .with_engine("deviation_engine", ["deviation.compute", "deviation.analyze"], ["identity.resolve"])
            .with_engine(
                "membrane_engine",
                ["membrane.filter", "membrane.transform"],
                ["identity.resolve", "deviation.compute"],
            )
            .with_engine("tonal_engine", ["tone.generate", "tone.adjust"], ["identity.normalize", "membrane.filter"])
            .with_engine(
                "sofia_api",
                ["api.respond", "api.compose"],
                ["tone.generate", "membrane.transform", "identity.resolve"],
            )
    }

    fn names(order: &[Capability]) -> Vec<&str> {
        order.iter().map(Capability::as_str).collect()
    }

    fn index_of(order: &[Capability], capability: &str) -> usize {
        order
            .iter()
            .position(|c| c == capability)
            .unwrap_or_else(|| panic!("{} missing from {:?}", capability, order))
    }

    /// Every consumed capability present in `order` sits before its consumer.
    fn assert_dependency_order(graph: &CapabilityGraph, order: &[Capability]) {
        let index = graph.provider_index();
        for (position, capability) in order.iter().enumerate() {
            let engine = index.provider(capability.as_str()).unwrap();
            for dependency in graph.consumes_of(engine.as_str()) {
                if let Some(dep_position) = order.iter().position(|c| c == dependency) {
                    assert!(
                        dep_position < position,
                        "{} must come before {} in {:?}",
                        dependency,
                        capability,
                        order
                    );
                }
            }
        }
    }

    #[test]
    fn test_two_engine_chain() {
        let graph = CapabilityGraph::new()
            .with_engine("A", ["cap1"], NONE)
            .with_engine("B", ["cap2"], ["cap1"]);
        let order = expand_pipeline(&graph, &["cap2"]).unwrap();
        assert_eq!(names(&order), vec!["cap1", "cap2"]);
    }

    #[test]
    fn test_transitive_dependencies_are_ordered() {
        let graph = app_graph();
        let order = expand_pipeline(&graph, &["tone.generate"]).unwrap();

        assert_eq!(
            names(&order),
            vec![
                "identity.normalize",
                "identity.resolve",
                "deviation.compute",
                "membrane.filter",
                "tone.generate"
            ]
        );
        assert_dependency_order(&graph, &order);
    }

    #[test]
    fn test_shared_dependency_appears_once() {
        let graph = app_graph();
        let order = expand_pipeline(&graph, &["deviation.compute", "membrane.filter"]).unwrap();
        assert_eq!(order.iter().filter(|c| *c == "identity.resolve").count(), 1);
        assert!(index_of(&order, "identity.resolve") < index_of(&order, "deviation.compute"));
        assert!(index_of(&order, "deviation.compute") < index_of(&order, "membrane.filter"));
    }

    #[test]
    fn test_full_graph_request_respects_dependencies() {
        let graph = app_graph();
        let order = expand_pipeline(&graph, &["api.respond", "tone.adjust", "deviation.analyze"]).unwrap();
        assert_dependency_order(&graph, &order);
        let unique: HashSet<&Capability> = order.iter().collect();
        assert_eq!(unique.len(), order.len());
    }

    #[test]
    fn test_expansion_is_idempotent() {
        let graph = app_graph();
        let once = expand_pipeline(&graph, &["api.respond", "deviation.analyze"]).unwrap();
        let twice = expand_pipeline(&graph, &once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_no_dependencies() {
        let graph = app_graph();
        let order = expand_pipeline(&graph, &["identity.resolve"]).unwrap();
        assert_eq!(names(&order), vec!["identity.resolve"]);
    }

    #[test]
    fn test_missing_provider_is_an_error() {
        let graph = CapabilityGraph::new().with_engine("identity_filter", ["identity.resolve"], NONE);
        let err = expand_pipeline(&graph, &["nonexistent.capability"]).unwrap_err();
        assert!(matches!(err, Error::MissingProvider(_)));
        assert_eq!(err.to_string(), "No provider for capability: nonexistent.capability");
    }

    #[test]
    fn test_missing_transitive_provider_is_an_error() {
        let graph = CapabilityGraph::new().with_engine("api", ["api.respond"], ["tone.generate"]);
        let err = expand_pipeline(&graph, &["api.respond"]).unwrap_err();
        assert!(err.to_string().contains("tone.generate"));
    }

    #[test]
    fn test_cycle_terminates() {
        let graph = CapabilityGraph::new()
            .with_engine("engine_a", ["cap-a"], ["cap-b"])
            .with_engine("engine_b", ["cap-b"], ["cap-a"]);
        let order = expand_pipeline(&graph, &["cap-a", "cap-b"]).unwrap();
        assert_eq!(names(&order), vec!["cap-b", "cap-a"]);
    }

    #[test]
    fn test_self_consuming_engine() {
        let graph = CapabilityGraph::new().with_engine("loop", ["loop.step", "loop.emit"], ["loop.step"]);
        let order = expand_pipeline(&graph, &["loop.emit"]).unwrap();
        assert_eq!(names(&order), vec!["loop.step", "loop.emit"]);
    }

    #[test]
    fn test_resolver_skips_already_resolved() {
        let graph = app_graph();
        let mut resolver = DependencyResolver::new(&graph);
        resolver.resolve("deviation.compute").unwrap();
        assert_eq!(resolver.resolved().len(), 2);
        resolver.resolve("identity.resolve").unwrap();
        assert_eq!(resolver.resolved().len(), 2);
        assert!(!resolver.provider_index().has_conflicts());
    }
}
