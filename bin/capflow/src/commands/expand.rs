use capflow_core::{Capability, EngineLookup};
use capflow_pipeline::{expand_pipeline, PipelineOptimizer};
use std::path::Path;

/// Print the expanded order for `capabilities`, optionally optimized.
pub async fn run(manifest: Option<&Path>, capabilities: &[String], optimize: bool) -> anyhow::Result<()> {
    let config = super::load_manifest(manifest)?;
    let graph = &config.engines;

    let mut order: Vec<Capability> = expand_pipeline(graph, capabilities)?;

    let index = graph.provider_index();
    if optimize {
        order = PipelineOptimizer::new(graph).with_engine_lookup(&index).optimize(&order).order;
    }

    for (i, capability) in order.iter().enumerate() {
        let engine = index
            .engine_for_capability(capability.as_str())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "?".to_string());
        println!("{:>3}. {:<28} [{}]", i + 1, capability, engine);
    }
    Ok(())
}
