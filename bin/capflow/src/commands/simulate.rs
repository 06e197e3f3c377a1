use capflow_core::{Capability, Config, EngineId};
use capflow_pipeline::{create_pipeline, CapabilityRuntime, PipelineResult};
use capflow_router::{sync_handler, CapabilityHandler, CapabilityRouter};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;

/// Handler that records `{capability, engine}` in the `trace` array of the
/// data it receives. Non-object input is kept under `input`.
fn tracing_handler(capability: Capability, engine: EngineId) -> Arc<dyn CapabilityHandler> {
    sync_handler(move |input, _ctx| {
        let mut data = match input {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other);
                map
            }
        };

        let trace = data
            .entry("trace")
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .ok_or_else(|| anyhow::anyhow!("`trace` in pipeline data is not an array"))?;
        trace.push(json!({ "capability": capability, "engine": engine }));

        Ok(Value::Object(data))
    })
}

/// Registers a tracing handler for every capability in the manifest, under
/// the engine the provider index routes it to.
pub fn simulation_router(config: &Config) -> anyhow::Result<CapabilityRouter> {
    let index = config.engines.provider_index();
    let mut router = CapabilityRouter::new(config.context.clone());

    for (engine, caps) in config.engines.engines() {
        for capability in &caps.provides {
            if index.provider(capability.as_str()) != Some(engine) || router.has_capability(capability.as_str()) {
                continue;
            }
            router.register(
                capability.clone(),
                engine.clone(),
                tracing_handler(capability.clone(), engine.clone()),
            )?;
        }
    }
    Ok(router)
}

/// Plans and runs `target` (a pipeline name or capability list) against
/// tracing handlers.
pub async fn simulate(config: &Config, target: &[String], input: Value) -> anyhow::Result<PipelineResult> {
    let requested: Vec<Capability> = match target {
        [name] if config.pipelines.contains_key(name.as_str()) => config.pipeline_steps(name)?.to_vec(),
        caps => caps.iter().map(Capability::from).collect(),
    };

    let runtime = CapabilityRuntime::from_config(config, simulation_router(config)?);
    let order = runtime.plan(&requested, &config.pipeline)?;
    let pipeline = create_pipeline(order);

    let validation = pipeline.validate(&runtime);
    if !validation.valid {
        let missing: Vec<&str> = validation.missing_capabilities.iter().map(|c| c.as_str()).collect();
        anyhow::bail!("No handler for: {}", missing.join(", "));
    }

    Ok(pipeline.run(&runtime, input).await)
}

pub async fn run(manifest: Option<&Path>, target: &[String], input: &str) -> anyhow::Result<()> {
    let config = super::load_manifest(manifest)?;
    let input: Value = serde_json::from_str(input)
        .map_err(|e| anyhow::anyhow!("Failed to parse JSON input: {}\nInput: {}", e, input))?;

    let result = simulate(&config, target, input).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}
