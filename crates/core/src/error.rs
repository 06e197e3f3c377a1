use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Two engines claimed the same capability on one router.
    #[error("Capability \"{capability}\" is already registered by engine \"{engine}\"")]
    DuplicateRegistration { capability: String, engine: String },

    /// Dependency resolution reached a capability nobody provides.
    #[error("No provider for capability: {0}")]
    MissingProvider(String),

    #[error("Cannot resolve dependencies for engines: {}", .0.join(", "))]
    UnresolvableEngines(Vec<String>),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JSON5 error: {0}")]
    Json5(#[from] json5::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
