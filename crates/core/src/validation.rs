//! Static checks over a [`CapabilityGraph`]: missing providers, engine cycles,
//! unused capabilities, provider clashes, and a dependency-first engine order.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::capability::{Capability, EngineId};
use crate::error::{Error, Result};
use crate::graph::{CapabilityGraph, ProviderConflict, ProviderIndex};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineCapabilityRef {
    pub engine: EngineId,
    pub capability: Capability,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityValidation {
    /// False when a consumed capability has no provider or engines form a cycle.
    pub valid: bool,
    pub missing_providers: Vec<EngineCapabilityRef>,
    /// Engine paths; each path repeats its first engine at the end.
    pub circular_dependencies: Vec<Vec<EngineId>>,
    /// Provided but never consumed. Informational.
    pub unused_capabilities: Vec<EngineCapabilityRef>,
    pub provider_conflicts: Vec<ProviderConflict>,
}

/// Every engine that declares `capability` in its provides list, in graph order.
fn providers_by_capability(graph: &CapabilityGraph) -> HashMap<&Capability, Vec<&EngineId>> {
    let mut providers: HashMap<&Capability, Vec<&EngineId>> = HashMap::new();
    for (engine, caps) in graph.engines() {
        for capability in &caps.provides {
            providers.entry(capability).or_default().push(engine);
        }
    }
    providers
}

pub fn validate_capabilities(graph: &CapabilityGraph) -> CapabilityValidation {
    let providers = providers_by_capability(graph);
    let mut result = CapabilityValidation {
        valid: true,
        ..Default::default()
    };

    for (engine, caps) in graph.engines() {
        for capability in &caps.consumes {
            if !providers.contains_key(capability) {
                result.valid = false;
                result.missing_providers.push(EngineCapabilityRef {
                    engine: engine.clone(),
                    capability: capability.clone(),
                });
            }
        }
    }

    let consumed: HashSet<&Capability> = graph
        .engines()
        .flat_map(|(_, caps)| caps.consumes.iter())
        .collect();
    for (engine, caps) in graph.engines() {
        for capability in &caps.provides {
            if !consumed.contains(capability) {
                result.unused_capabilities.push(EngineCapabilityRef {
                    engine: engine.clone(),
                    capability: capability.clone(),
                });
            }
        }
    }

    let cycles = find_engine_cycles(graph, &providers);
    if !cycles.is_empty() {
        result.valid = false;
        result.circular_dependencies = cycles;
    }

    result.provider_conflicts = ProviderIndex::build(graph).conflicts().to_vec();

    debug!(
        valid = result.valid,
        missing = result.missing_providers.len(),
        cycles = result.circular_dependencies.len(),
        "capability graph validated"
    );
    result
}

/// Depth-first walk over consumer → provider engine edges.
fn find_engine_cycles(
    graph: &CapabilityGraph,
    providers: &HashMap<&Capability, Vec<&EngineId>>,
) -> Vec<Vec<EngineId>> {
    struct Walk<'a> {
        graph: &'a CapabilityGraph,
        providers: &'a HashMap<&'a Capability, Vec<&'a EngineId>>,
        visited: HashSet<&'a EngineId>,
        on_stack: Vec<&'a EngineId>,
        cycles: Vec<Vec<EngineId>>,
    }

    impl<'a> Walk<'a> {
        fn visit(&mut self, engine: &'a EngineId) {
            if let Some(start) = self.on_stack.iter().position(|e| *e == engine) {
                let mut cycle: Vec<EngineId> =
                    self.on_stack[start..].iter().map(|e| (*e).clone()).collect();
                cycle.push(engine.clone());
                self.cycles.push(cycle);
                return;
            }
            if !self.visited.insert(engine) {
                return;
            }

            let (graph, providers) = (self.graph, self.providers);
            self.on_stack.push(engine);
            for capability in graph.consumes_of(engine.as_str()) {
                let Some(owners) = providers.get(capability) else {
                    continue;
                };
                for provider in owners {
                    if *provider != engine {
                        self.visit(provider);
                    }
                }
            }
            self.on_stack.pop();
        }
    }

    let mut walk = Walk {
        graph,
        providers,
        visited: HashSet::new(),
        on_stack: Vec::new(),
        cycles: Vec::new(),
    };
    for engine in graph.engine_ids() {
        if !walk.visited.contains(engine) {
            walk.visit(engine);
        }
    }
    walk.cycles
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineNode {
    pub engine: EngineId,
    pub provides: Vec<Capability>,
    pub consumes: Vec<Capability>,
    /// Engines providing what this one consumes, excluding itself.
    pub dependencies: Vec<EngineId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyEdge {
    /// The consuming engine.
    pub from: EngineId,
    /// The providing engine.
    pub to: EngineId,
    pub capability: Capability,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphAnalysis {
    pub nodes: Vec<EngineNode>,
    pub edges: Vec<DependencyEdge>,
}

impl GraphAnalysis {
    pub fn node(&self, engine: &str) -> Option<&EngineNode> {
        self.nodes.iter().find(|n| n.engine == engine)
    }
}

/// Engine-level view of the graph for inspection and rendering.
pub fn analyze_graph(graph: &CapabilityGraph) -> GraphAnalysis {
    let providers = providers_by_capability(graph);
    let mut analysis = GraphAnalysis::default();

    for (engine, caps) in graph.engines() {
        let mut node = EngineNode {
            engine: engine.clone(),
            provides: caps.provides.clone(),
            consumes: caps.consumes.clone(),
            dependencies: Vec::new(),
        };
        for capability in &caps.consumes {
            for provider in providers.get(capability).into_iter().flatten() {
                if *provider == engine {
                    continue;
                }
                analysis.edges.push(DependencyEdge {
                    from: engine.clone(),
                    to: (*provider).clone(),
                    capability: capability.clone(),
                });
                if !node.dependencies.contains(provider) {
                    node.dependencies.push((*provider).clone());
                }
            }
        }
        analysis.nodes.push(node);
    }

    analysis
}

/// Orders engines so each comes after the engines it depends on.
///
/// Each pass emits, in graph order, every engine whose dependencies are all
/// emitted. A pass with no progress means a cycle, reported as
/// [`Error::UnresolvableEngines`]. Consumed capabilities without a provider do
/// not block an engine; [`validate_capabilities`] reports those.
pub fn engine_load_order(graph: &CapabilityGraph) -> Result<Vec<EngineId>> {
    let analysis = analyze_graph(graph);
    let mut loaded: Vec<EngineId> = Vec::with_capacity(analysis.nodes.len());
    let mut pending: Vec<&EngineNode> = analysis.nodes.iter().collect();

    while !pending.is_empty() {
        let before = pending.len();
        pending.retain(|node| {
            let ready = node.dependencies.iter().all(|dep| loaded.contains(dep));
            if ready {
                loaded.push(node.engine.clone());
            }
            !ready
        });

        if pending.len() == before {
            return Err(Error::UnresolvableEngines(
                pending.iter().map(|n| n.engine.to_string()).collect(),
            ));
        }
    }

    Ok(loaded)
}
