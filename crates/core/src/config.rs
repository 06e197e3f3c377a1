use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::capability::Capability;
use crate::error::{Error, Result};
use crate::graph::CapabilityGraph;
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSettings {
    /// Pull transitive dependencies into requested pipelines.
    #[serde(default = "default_true")]
    pub expand: bool,
    /// Deduplicate and group by engine after expansion.
    #[serde(default = "default_true")]
    pub optimize: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            expand: default_true(),
            optimize: default_true(),
        }
    }
}

fn default_context() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Engine manifest: the capability graph plus named pipelines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub engines: CapabilityGraph,
    #[serde(default)]
    pub pipelines: BTreeMap<String, Vec<Capability>>,
    /// Initial context handed to every handler.
    #[serde(default = "default_context")]
    pub context: serde_json::Value,
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engines: CapabilityGraph::default(),
            pipelines: BTreeMap::new(),
            context: default_context(),
            pipeline: PipelineSettings::default(),
        }
    }
}

enum Format {
    Json,
    Json5,
    Yaml,
}

impl Format {
    /// Paths without an extension are read as JSON.
    fn of(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            None | Some("json") => Ok(Format::Json),
            Some("json5") => Ok(Format::Json5),
            Some("yaml") | Some("yml") => Ok(Format::Yaml),
            Some(other) => Err(Error::Config(format!(
                "Unsupported manifest format '.{}' for {} (expected .json, .json5, .yaml or .yml)",
                other,
                path.display()
            ))),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, path)
    }

    /// Parses `content` in the format implied by `path`'s extension.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let config: Config = match Format::of(path)? {
            Format::Json => serde_json::from_str(content)?,
            Format::Json5 => json5::from_str(content)?,
            Format::Yaml => serde_yaml::from_str(content)?,
        };
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Writes YAML for `.yaml`/`.yml` paths and pretty JSON for the others.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = match Format::of(path)? {
            Format::Yaml => serde_yaml::to_string(self)?,
            Format::Json | Format::Json5 => serde_json::to_string_pretty(self)?,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn pipeline_steps(&self, name: &str) -> Result<&[Capability]> {
        self.pipelines
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::NotFound(format!("Pipeline '{}' not declared in manifest", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_json_manifest() {
        let raw = r#"{
  "engines": {
    "identity_filter": { "provides": ["identity.resolve"] },
    "tonal_engine": { "provides": ["tone.generate"], "consumes": ["identity.resolve"] }
  },
  "pipelines": { "respond": ["tone.generate"] },
  "context": { "tenant": "acme" }
}"#;
        let cfg = Config::parse(raw, &PathBuf::from("manifest.json")).unwrap();
        assert_eq!(cfg.engines.len(), 2);
        assert_eq!(cfg.context["tenant"], "acme");
        assert_eq!(cfg.pipeline_steps("respond").unwrap(), &[Capability::from("tone.generate")]);
        assert!(cfg.pipeline.expand && cfg.pipeline.optimize);
        assert!(matches!(cfg.pipeline_steps("missing"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_parse_json5_and_yaml() {
        let json5 = r#"{
  // comments are allowed here
  engines: { identity: { provides: ['identity.resolve'], }, },
  pipeline: { optimize: false },
}"#;
        let cfg = Config::parse(json5, &PathBuf::from("m.json5")).unwrap();
        assert!(cfg.engines.contains_engine("identity"));
        assert!(!cfg.pipeline.optimize);
        assert!(cfg.context.as_object().unwrap().is_empty());

        let yaml = "engines:\n  identity:\n    provides: [identity.resolve]\n  api:\n    provides: [api.respond]\n    consumes: [identity.resolve]\n";
        let cfg = Config::parse(yaml, &PathBuf::from("m.yaml")).unwrap();
        let ids: Vec<String> = cfg.engines.engine_ids().map(|e| e.to_string()).collect();
        assert_eq!(ids, vec!["identity", "api"]);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("manifest.yaml");
        let mut cfg = Config::default();
        cfg.engines = CapabilityGraph::new().with_engine("a", ["a.run"], Vec::<&str>::new());
        cfg.pipelines.insert("main".to_string(), vec!["a.run".into()]);
        cfg.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.engines, cfg.engines);
        assert_eq!(loaded.pipelines, cfg.pipelines);
    }

    #[test]
    fn test_unsupported_extension_is_a_config_error() {
        let err = Config::parse("[engines]", &PathBuf::from("manifest.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains(".toml"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.ini");
        assert!(matches!(Config::default().save(&path), Err(Error::Config(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_path_without_extension_reads_json() {
        let cfg = Config::parse(r#"{ "engines": { "a": { "provides": ["a.run"] } } }"#, &PathBuf::from("manifest"))
            .unwrap();
        assert!(cfg.engines.contains_engine("a"));
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_or_default(&Paths::with_base(dir.path().to_path_buf())).unwrap();
        assert!(cfg.engines.is_empty());
        assert!(cfg.pipelines.is_empty());
    }
}
