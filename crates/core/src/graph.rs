//! Static capability graph: which engine provides and consumes what.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::warn;

use crate::capability::{Capability, EngineId};

/// Capabilities an engine provides to others and the ones it depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineCapabilities {
    #[serde(default)]
    pub provides: Vec<Capability>,
    #[serde(default)]
    pub consumes: Vec<Capability>,
}

impl EngineCapabilities {
    pub fn new<P, C>(provides: P, consumes: C) -> Self
    where
        P: IntoIterator,
        P::Item: Into<Capability>,
        C: IntoIterator,
        C::Item: Into<Capability>,
    {
        let mut caps = Self {
            provides: provides.into_iter().map(Into::into).collect(),
            consumes: consumes.into_iter().map(Into::into).collect(),
        };
        caps.dedup();
        caps
    }

    // provides/consumes are sets; keep first occurrence
    fn dedup(&mut self) {
        dedup_in_place(&mut self.provides);
        dedup_in_place(&mut self.consumes);
    }
}

fn dedup_in_place(items: &mut Vec<Capability>) {
    let mut seen = HashSet::new();
    items.retain(|c| seen.insert(c.clone()));
}

/// Engine id → `{provides, consumes}`, in declaration order.
///
/// Declaration order is significant: the provider index lets later engines
/// overwrite earlier ones, and engine load order breaks ties by it. It is
/// (de)serialized as a JSON object whose key order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityGraph {
    engines: Vec<(EngineId, EngineCapabilities)>,
}

impl CapabilityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`CapabilityGraph::insert`].
    pub fn with_engine<P, C>(mut self, engine: impl Into<EngineId>, provides: P, consumes: C) -> Self
    where
        P: IntoIterator,
        P::Item: Into<Capability>,
        C: IntoIterator,
        C::Item: Into<Capability>,
    {
        self.insert(engine, EngineCapabilities::new(provides, consumes));
        self
    }

    /// Declares an engine. Re-declaring an engine replaces its entry in place.
    pub fn insert(&mut self, engine: impl Into<EngineId>, mut caps: EngineCapabilities) {
        caps.dedup();
        let engine = engine.into();
        match self.engines.iter_mut().find(|(id, _)| *id == engine) {
            Some(slot) => slot.1 = caps,
            None => self.engines.push((engine, caps)),
        }
    }

    pub fn get(&self, engine: &str) -> Option<&EngineCapabilities> {
        self.engines
            .iter()
            .find(|(id, _)| id == engine)
            .map(|(_, caps)| caps)
    }

    pub fn contains_engine(&self, engine: &str) -> bool {
        self.get(engine).is_some()
    }

    /// Capabilities consumed by `engine`; empty for unknown engines.
    pub fn consumes_of(&self, engine: &str) -> &[Capability] {
        self.get(engine).map(|caps| caps.consumes.as_slice()).unwrap_or(&[])
    }

    pub fn engines(&self) -> impl Iterator<Item = (&EngineId, &EngineCapabilities)> {
        self.engines.iter().map(|(id, caps)| (id, caps))
    }

    pub fn engine_ids(&self) -> impl Iterator<Item = &EngineId> {
        self.engines.iter().map(|(id, _)| id)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    pub fn provider_index(&self) -> ProviderIndex {
        ProviderIndex::build(self)
    }
}

impl Serialize for CapabilityGraph {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.engines.len()))?;
        for (id, caps) in &self.engines {
            map.serialize_entry(id, caps)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CapabilityGraph {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct GraphVisitor;

        impl<'de> Visitor<'de> for GraphVisitor {
            type Value = CapabilityGraph;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of engine id to {provides, consumes}")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut graph = CapabilityGraph::new();
                while let Some((id, caps)) = access.next_entry::<EngineId, EngineCapabilities>()? {
                    graph.insert(id, caps);
                }
                Ok(graph)
            }
        }

        deserializer.deserialize_map(GraphVisitor)
    }
}

/// Resolves a capability to the engine that owns it.
pub trait EngineLookup {
    fn engine_for_capability(&self, capability: &str) -> Option<EngineId>;
}

/// A capability declared in the `provides` list of more than one engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConflict {
    pub capability: Capability,
    /// Declaring engines in graph order; the last one owns the index entry.
    pub engines: Vec<EngineId>,
}

impl ProviderConflict {
    pub fn winner(&self) -> Option<&EngineId> {
        self.engines.last()
    }
}

/// Reverse map capability → providing engine, derived from a [`CapabilityGraph`].
///
/// When two engines provide the same capability the later declaration wins,
/// and the clash is kept in [`ProviderIndex::conflicts`].
#[derive(Debug, Clone, Default)]
pub struct ProviderIndex {
    providers: HashMap<Capability, EngineId>,
    conflicts: Vec<ProviderConflict>,
}

impl ProviderIndex {
    pub fn build(graph: &CapabilityGraph) -> Self {
        let mut providers: HashMap<Capability, EngineId> = HashMap::new();
        let mut conflicts: Vec<ProviderConflict> = Vec::new();

        for (engine, caps) in graph.engines() {
            for capability in &caps.provides {
                if let Some(previous) = providers.insert(capability.clone(), engine.clone()) {
                    if previous == *engine {
                        continue;
                    }
                    match conflicts.iter_mut().find(|c| c.capability == *capability) {
                        Some(conflict) => conflict.engines.push(engine.clone()),
                        None => conflicts.push(ProviderConflict {
                            capability: capability.clone(),
                            engines: vec![previous, engine.clone()],
                        }),
                    }
                }
            }
        }

        for conflict in &conflicts {
            warn!(
                capability = %conflict.capability,
                engines = ?conflict.engines,
                "capability provided by multiple engines, last declaration wins"
            );
        }

        Self { providers, conflicts }
    }

    pub fn provider(&self, capability: &str) -> Option<&EngineId> {
        self.providers.get(capability)
    }

    pub fn contains(&self, capability: &str) -> bool {
        self.providers.contains_key(capability)
    }

    pub fn conflicts(&self) -> &[ProviderConflict] {
        &self.conflicts
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl EngineLookup for ProviderIndex {
    fn engine_for_capability(&self, capability: &str) -> Option<EngineId> {
        self.provider(capability).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_graph() -> CapabilityGraph {
        CapabilityGraph::new()
            .with_engine("identity_filter", ["identity.resolve", "identity.normalize"], Vec::<&str>::new())
            .with_engine("deviation_engine", ["deviation.compute"], ["identity.resolve"])
    }

    #[test]
    fn test_graph_preserves_declaration_order() {
        let raw = r#"{
            "zeta": { "provides": ["z.run"] },
            "alpha": { "provides": ["a.run"], "consumes": ["z.run"] }
        }"#;
        let graph: CapabilityGraph = serde_json::from_str(raw).unwrap();
        let ids: Vec<&str> = graph.engine_ids().map(EngineId::as_str).collect();
        assert_eq!(ids, vec!["zeta", "alpha"]);
        assert!(graph.get("zeta").unwrap().consumes.is_empty());

        let round: CapabilityGraph =
            serde_json::from_str(&serde_json::to_string(&graph).unwrap()).unwrap();
        assert_eq!(round, graph);
    }

    #[test]
    fn test_insert_replaces_in_place_and_dedups() {
        let mut graph = sample_graph();
        graph.insert(
            "identity_filter",
            EngineCapabilities::new(["identity.resolve", "identity.resolve"], ["x.y"]),
        );
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.engine_ids().next().unwrap(), "identity_filter");
        let caps = graph.get("identity_filter").unwrap();
        assert_eq!(caps.provides.len(), 1);
        assert_eq!(graph.consumes_of("identity_filter"), &[Capability::from("x.y")]);
        assert!(graph.consumes_of("missing").is_empty());
    }

    #[test]
    fn test_provider_index_lookup() {
        let index = sample_graph().provider_index();
        assert_eq!(index.len(), 3);
        assert_eq!(index.provider("deviation.compute").unwrap(), "deviation_engine");
        assert_eq!(
            index.engine_for_capability("identity.normalize"),
            Some(EngineId::from("identity_filter"))
        );
        assert!(index.provider("tone.generate").is_none());
        assert!(!index.has_conflicts());
    }

    #[test]
    fn test_provider_index_last_declaration_wins_and_reports_conflict() {
        let graph = CapabilityGraph::new()
            .with_engine("first", ["shared.cap"], Vec::<&str>::new())
            .with_engine("second", ["shared.cap", "own.cap"], Vec::<&str>::new())
            .with_engine("third", ["shared.cap"], Vec::<&str>::new());
        let index = ProviderIndex::build(&graph);

        assert_eq!(index.provider("shared.cap").unwrap(), "third");
        assert_eq!(index.conflicts().len(), 1);
        let conflict = &index.conflicts()[0];
        assert_eq!(conflict.capability, "shared.cap");
        assert_eq!(conflict.engines, vec![EngineId::from("first"), "second".into(), "third".into()]);
        assert_eq!(conflict.winner().unwrap(), "third");
    }
}
