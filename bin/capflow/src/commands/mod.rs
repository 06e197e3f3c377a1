pub mod expand;
pub mod graph_cmd;
pub mod order;
pub mod simulate;
pub mod validate;

use capflow_core::{Config, Paths};
use std::path::{Path, PathBuf};

/// Loads the manifest at `path`, or the default one under `~/.capflow`.
pub fn load_manifest(path: Option<&Path>) -> anyhow::Result<Config> {
    load_manifest_in(&Paths::new(), path)
}

/// A bare name with no extension that is not an existing file, e.g.
/// `staging`, refers to `<base>/manifests/staging.json`.
fn resolve_manifest(paths: &Paths, path: &Path) -> PathBuf {
    let bare_name = path.extension().is_none() && path.components().count() == 1;
    match path.to_str() {
        Some(name) if bare_name && !path.exists() => paths.manifest_file(name),
        _ => path.to_path_buf(),
    }
}

fn load_manifest_in(paths: &Paths, path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => {
            let resolved = resolve_manifest(paths, path);
            Config::load(&resolved)
                .map_err(|e| anyhow::anyhow!("Failed to load manifest {}: {}", resolved.display(), e))?
        }
        None => Config::load_or_default(paths)?,
    };

    if config.engines.is_empty() {
        tracing::warn!("manifest declares no engines");
    }
    Ok(config)
}
