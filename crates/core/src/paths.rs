use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".capflow"))
            .unwrap_or_else(|| PathBuf::from(".capflow"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    /// The default engine manifest.
    pub fn config_file(&self) -> PathBuf {
        self.base.join("manifest.json")
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.base.join("manifests")
    }

    /// A named manifest under `manifests/`, e.g. `staging` → `manifests/staging.json`.
    pub fn manifest_file(&self, name: &str) -> PathBuf {
        let safe_name = name.replace([':', '/', '\\'], "_");
        self.manifests_dir().join(format!("{}.json", safe_name))
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
