//! Deduplication and engine-affinity scheduling of capability lists.

use capflow_core::{Capability, CapabilityGraph, EngineId, EngineLookup, ProviderIndex};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::runtime::GraphRuntime;

/// Result of one optimization pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizedPipeline {
    pub order: Vec<Capability>,
    /// Set when scheduling stalled and the remaining items were appended
    /// unscheduled.
    pub degraded: bool,
    /// The items appended by the stall fallback, in input order.
    pub fallback: Vec<Capability>,
}

impl OptimizedPipeline {
    fn scheduled(order: Vec<Capability>) -> Self {
        Self {
            order,
            degraded: false,
            fallback: Vec::new(),
        }
    }
}

/// Greedy topological scheduler with a bias for running same-engine
/// capabilities back to back.
///
/// Ties are broken by the order in which engines first appear in the input,
/// so the result is deterministic but not guaranteed optimal.
pub struct PipelineOptimizer<'a> {
    graph: &'a CapabilityGraph,
    index: ProviderIndex,
    engines: Option<&'a dyn EngineLookup>,
}

impl<'a> PipelineOptimizer<'a> {
    pub fn new(graph: &'a CapabilityGraph) -> Self {
        Self {
            graph,
            index: ProviderIndex::build(graph),
            engines: None,
        }
    }

    pub fn with_engine_lookup(mut self, engines: &'a dyn EngineLookup) -> Self {
        self.engines = Some(engines);
        self
    }

    pub fn for_runtime<R: GraphRuntime + ?Sized>(runtime: &'a R) -> Self {
        let optimizer = Self::new(runtime.capability_graph());
        match runtime.engine_lookup() {
            Some(engines) => optimizer.with_engine_lookup(engines),
            None => optimizer,
        }
    }

    pub fn optimize<S: AsRef<str>>(&self, steps: &[S]) -> OptimizedPipeline {
        let unique = dedup(steps);

        let engines = match self.engines {
            Some(engines) => engines,
            None => {
                debug!(steps = unique.len(), "no engine lookup, keeping deduplicated order");
                return OptimizedPipeline::scheduled(unique);
            }
        };

        let deps = self.dependencies(&unique);
        let groups = group_by_engine(&unique, engines);

        let total = unique.len();
        let mut emitted = vec![false; total];
        let mut order: Vec<usize> = Vec::with_capacity(total);
        let ready = |i: usize, emitted: &[bool]| deps[i].iter().all(|&d| emitted[d]);

        while order.len() < total {
            let mut progressed = false;

            for (_, members) in &groups {
                let remaining: Vec<usize> = members.iter().copied().filter(|&i| !emitted[i]).collect();
                if remaining.is_empty() || !remaining.iter().all(|&i| ready(i, &emitted)) {
                    continue;
                }
                for i in remaining {
                    emitted[i] = true;
                    order.push(i);
                }
                progressed = true;
            }
            if progressed {
                continue;
            }

            // No whole group is ready; split one off.
            if let Some(i) = (0..total).find(|&i| !emitted[i] && ready(i, &emitted)) {
                emitted[i] = true;
                order.push(i);
                continue;
            }

            let fallback: Vec<Capability> = (0..total)
                .filter(|&i| !emitted[i])
                .map(|i| unique[i].clone())
                .collect();
            warn!(
                remaining = fallback.len(),
                capabilities = ?fallback,
                "pipeline scheduling stalled, appending remaining capabilities in input order"
            );
            let mut result: Vec<Capability> = order.iter().map(|&i| unique[i].clone()).collect();
            result.extend(fallback.iter().cloned());
            return OptimizedPipeline {
                order: result,
                degraded: true,
                fallback,
            };
        }

        debug!(steps = total, groups = groups.len(), "optimized pipeline");
        OptimizedPipeline::scheduled(order.into_iter().map(|i| unique[i].clone()).collect())
    }

    /// Direct dependencies of each item, as indices into `unique`. Only
    /// dependencies present in the list count, and never the item itself.
    fn dependencies(&self, unique: &[Capability]) -> Vec<Vec<usize>> {
        let position: HashMap<&str, usize> = unique.iter().enumerate().map(|(i, c)| (c.as_str(), i)).collect();

        unique
            .iter()
            .enumerate()
            .map(|(i, capability)| {
                let consumes: &[Capability] = match self.index.provider(capability.as_str()) {
                    Some(engine) => self.graph.consumes_of(engine.as_str()),
                    None => &[],
                };
                let mut deps: Vec<usize> = consumes
                    .iter()
                    .filter_map(|d| position.get(d.as_str()).copied())
                    .filter(|&d| d != i)
                    .collect();
                deps.dedup();
                deps
            })
            .collect()
    }
}

fn dedup<S: AsRef<str>>(steps: &[S]) -> Vec<Capability> {
    let mut seen: HashSet<&str> = HashSet::new();
    steps
        .iter()
        .map(|s| s.as_ref())
        .filter(|c| seen.insert(*c))
        .map(Capability::from)
        .collect()
}

/// Groups indices by owning engine in order of first appearance.
/// Capabilities with no known engine share one group.
fn group_by_engine(unique: &[Capability], engines: &dyn EngineLookup) -> Vec<(Option<EngineId>, Vec<usize>)> {
    let mut groups: Vec<(Option<EngineId>, Vec<usize>)> = Vec::new();
    for (i, capability) in unique.iter().enumerate() {
        let engine = engines.engine_for_capability(capability.as_str());
        match groups.iter_mut().find(|(e, _)| *e == engine) {
            Some((_, members)) => members.push(i),
            None => groups.push((engine, vec![i])),
        }
    }
    groups
}

/// Deduplicates `steps` and reorders them for engine locality, keeping every
/// dependency ahead of its consumers.
pub fn optimize_pipeline<R, S>(runtime: &R, steps: &[S]) -> Vec<Capability>
where
    R: GraphRuntime + ?Sized,
    S: AsRef<str>,
{
    PipelineOptimizer::for_runtime(runtime).optimize(steps).order
}
