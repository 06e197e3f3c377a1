pub mod optimizer;
pub mod resolver;
pub mod runner;
pub mod runtime;

pub use optimizer::{optimize_pipeline, OptimizedPipeline, PipelineOptimizer};
pub use resolver::{expand_pipeline, DependencyResolver};
pub use runner::{
    create_pipeline, run_pipeline, validate_pipeline, Pipeline, PipelineResult, PipelineStep,
    PipelineValidation, Transform,
};
pub use runtime::{CapabilityRuntime, GraphRuntime, PipelineRuntime};
