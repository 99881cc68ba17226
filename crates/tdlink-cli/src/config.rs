use serde::Deserialize;
use std::path::{Path, PathBuf};
use tdlink::ClientConfig;
use tdlink_protocol::paths;

#[derive(Deserialize, Debug, Clone, Default)]
pub struct CliConfig {
    /// Bridge socket; falls back to `paths::default_socket_path`.
    pub socket_path: Option<PathBuf>,
    #[serde(default)]
    pub client: ClientConfig,
}

impl CliConfig {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Read `path` if it exists, otherwise use defaults.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(paths::default_socket_path)
    }
}
