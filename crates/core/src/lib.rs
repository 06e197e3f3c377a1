pub mod capability;
pub mod config;
pub mod error;
pub mod graph;
pub mod paths;
pub mod validation;

pub use capability::{Capability, EngineId};
pub use config::{Config, PipelineSettings};
pub use error::{Error, Result};
pub use graph::{CapabilityGraph, EngineCapabilities, EngineLookup, ProviderConflict, ProviderIndex};
pub use paths::Paths;
pub use validation::{
    analyze_graph, engine_load_order, validate_capabilities, CapabilityValidation,
    DependencyEdge, EngineCapabilityRef, EngineNode, GraphAnalysis,
};
