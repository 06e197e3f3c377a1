use capflow_core::Capability;
use capflow_router::panic_message;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::runtime::PipelineRuntime;

/// Rewrites the data flowing into a step before the step is called.
pub type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// One stage of a pipeline.
#[derive(Clone)]
pub struct PipelineStep {
    pub capability: Capability,
    pub transform: Option<Transform>,
}

impl PipelineStep {
    pub fn new(capability: impl Into<Capability>) -> Self {
        Self {
            capability: capability.into(),
            transform: None,
        }
    }

    pub fn with_transform<F>(capability: impl Into<Capability>, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        Self {
            capability: capability.into(),
            transform: Some(Arc::new(transform)),
        }
    }
}

impl fmt::Debug for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStep")
            .field("capability", &self.capability)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

impl From<&str> for PipelineStep {
    fn from(capability: &str) -> Self {
        Self::new(capability)
    }
}

impl From<String> for PipelineStep {
    fn from(capability: String) -> Self {
        Self::new(capability)
    }
}

impl From<Capability> for PipelineStep {
    fn from(capability: Capability) -> Self {
        Self::new(capability)
    }
}

impl From<&Capability> for PipelineStep {
    fn from(capability: &Capability) -> Self {
        Self::new(capability)
    }
}

/// Outcome of a pipeline run.
///
/// `executed_steps` always holds the attempted prefix of the step list,
/// including the step that failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<Capability>,
    #[serde(default)]
    pub executed_steps: Vec<Capability>,
}

impl PipelineResult {
    fn succeeded(output: Value, executed_steps: Vec<Capability>) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            failed_step: None,
            executed_steps,
        }
    }

    fn failed(step: &Capability, error: String, executed_steps: Vec<Capability>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error),
            failed_step: Some(step.clone()),
            executed_steps,
        }
    }
}

/// Runs `steps` strictly in order, threading each step's output into the
/// next. Stops at the first failure; nothing is retried or rolled back.
pub async fn run_pipeline<R>(runtime: &R, steps: &[PipelineStep], input: Value) -> PipelineResult
where
    R: PipelineRuntime + ?Sized,
{
    let run_id = Uuid::new_v4();
    info!(run_id = %run_id, steps = steps.len(), "pipeline started");

    let mut data = input;
    let mut executed: Vec<Capability> = Vec::with_capacity(steps.len());

    for step in steps {
        let current = data;
        // A panicking transform or runtime fails the step like any other error.
        let attempt = AssertUnwindSafe(async move {
            let step_input = match &step.transform {
                Some(transform) => transform(current),
                None => current,
            };
            runtime.call(step.capability.as_str(), step_input).await
        })
        .catch_unwind()
        .await;
        executed.push(step.capability.clone());

        let outcome = match attempt {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(run_id = %run_id, capability = %step.capability, error = %message, "step panicked");
                return PipelineResult::failed(
                    &step.capability,
                    format!("Step panicked: {}", message),
                    executed,
                );
            }
        };

        match outcome {
            Ok(result) if result.success => {
                debug!(run_id = %run_id, capability = %step.capability, "step completed");
                data = result.data.unwrap_or(Value::Null);
            }
            Ok(result) => {
                let error = result
                    .error
                    .unwrap_or_else(|| format!("Capability {} failed", step.capability));
                warn!(run_id = %run_id, capability = %step.capability, error = %error, "step failed");
                return PipelineResult::failed(&step.capability, error, executed);
            }
            Err(e) => {
                warn!(run_id = %run_id, capability = %step.capability, error = %e, "step raised an error");
                return PipelineResult::failed(&step.capability, e.to_string(), executed);
            }
        }
    }

    info!(run_id = %run_id, executed = executed.len(), "pipeline finished");
    PipelineResult::succeeded(data, executed)
}

/// A fixed step list that can be run repeatedly against different runtimes
/// and inputs.
#[derive(Debug, Clone)]
pub struct Pipeline {
    steps: Arc<[PipelineStep]>,
}

impl Pipeline {
    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    pub async fn run<R>(&self, runtime: &R, input: Value) -> PipelineResult
    where
        R: PipelineRuntime + ?Sized,
    {
        run_pipeline(runtime, &self.steps, input).await
    }

    pub fn validate<R>(&self, runtime: &R) -> PipelineValidation
    where
        R: PipelineRuntime + ?Sized,
    {
        validate_pipeline(runtime, &self.steps)
    }
}

pub fn create_pipeline<I, T>(steps: I) -> Pipeline
where
    I: IntoIterator<Item = T>,
    T: Into<PipelineStep>,
{
    Pipeline {
        steps: steps.into_iter().map(Into::into).collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineValidation {
    pub valid: bool,
    pub missing_capabilities: Vec<Capability>,
}

/// Checks that every step has a handler without running anything.
pub fn validate_pipeline<R>(runtime: &R, steps: &[PipelineStep]) -> PipelineValidation
where
    R: PipelineRuntime + ?Sized,
{
    let missing_capabilities: Vec<Capability> = steps
        .iter()
        .filter(|step| !runtime.has_capability(step.capability.as_str()))
        .map(|step| step.capability.clone())
        .collect();

    PipelineValidation {
        valid: missing_capabilities.is_empty(),
        missing_capabilities,
    }
}
