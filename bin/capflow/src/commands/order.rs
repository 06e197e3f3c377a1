use capflow_core::engine_load_order;
use std::path::Path;

pub async fn run(manifest: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_manifest(manifest)?;
    let order = engine_load_order(&config.engines)?;

    for (i, engine) in order.iter().enumerate() {
        println!("{:>3}. {}", i + 1, engine);
    }
    Ok(())
}
