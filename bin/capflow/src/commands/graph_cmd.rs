use capflow_core::{analyze_graph, Capability, EngineId};
use std::path::Path;

fn join<T: AsRef<str>>(items: &[T]) -> String {
    if items.is_empty() {
        return "-".to_string();
    }
    items.iter().map(|i| i.as_ref()).collect::<Vec<_>>().join(", ")
}

/// Print engines, their dependency engines and the capability edges.
pub async fn run(manifest: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_manifest(manifest)?;
    let analysis = analyze_graph(&config.engines);

    println!("Engines ({}):", analysis.nodes.len());
    for node in &analysis.nodes {
        println!("  {}", node.engine);
        println!("    provides:   {}", join::<Capability>(&node.provides));
        println!("    consumes:   {}", join::<Capability>(&node.consumes));
        println!("    depends on: {}", join::<EngineId>(&node.dependencies));
    }

    println!();
    println!("Edges ({}):", analysis.edges.len());
    for edge in &analysis.edges {
        println!("  {:<20} -> {:<20} via {}", edge.from, edge.to, edge.capability);
    }

    let index = config.engines.provider_index();
    if index.has_conflicts() {
        println!();
        println!("⚠ Capabilities provided by more than one engine:");
        for conflict in index.conflicts() {
            let winner = conflict.winner().map(EngineId::as_str).unwrap_or("-");
            println!("  {} ({}), routed to {}", conflict.capability, join(&conflict.engines), winner);
        }
    }

    Ok(())
}
