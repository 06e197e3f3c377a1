use capflow_core::validate_capabilities;
use std::path::Path;

/// Validate the manifest's capability graph. Exits with status 1 when invalid.
pub async fn run(manifest: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_manifest(manifest)?;
    let report = validate_capabilities(&config.engines);

    for missing in &report.missing_providers {
        println!("✗ {} consumes {}, which no engine provides", missing.engine, missing.capability);
    }
    for cycle in &report.circular_dependencies {
        let path: Vec<&str> = cycle.iter().map(|e| e.as_str()).collect();
        println!("✗ circular dependency: {}", path.join(" -> "));
    }
    for conflict in &report.provider_conflicts {
        let engines: Vec<&str> = conflict.engines.iter().map(|e| e.as_str()).collect();
        println!("⚠ {} is provided by {}", conflict.capability, engines.join(", "));
    }
    for unused in &report.unused_capabilities {
        println!("  {} provides {}, never consumed", unused.engine, unused.capability);
    }

    println!();
    if report.valid {
        println!("✓ {} engines, capability graph is valid", config.engines.len());
        Ok(())
    } else {
        eprintln!(
            "Capability graph is invalid: {} missing provider(s), {} cycle(s)",
            report.missing_providers.len(),
            report.circular_dependencies.len()
        );
        std::process::exit(1);
    }
}
