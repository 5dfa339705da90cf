use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub generation: toon_client::Config,
}

impl Config {
    /// Load the configuration from an optional YAML file, then the environment.
    pub fn load(yml_path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config: Config = match yml_path {
            Some(path) => serde_yaml::from_str(&std::fs::read_to_string(path)?)?,
            None => Config::default(),
        };
        config.generation.apply_env();
        Ok(config)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    /// Scenes and images live under here
    pub data_dir: PathBuf,
    /// Where the daily access logs go. Defaults to the working directory.
    pub log_dir: Option<PathBuf>,
    pub tls: Option<TLSConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:3000".to_string(),
            data_dir: PathBuf::from("data"),
            log_dir: None,
            tls: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct TLSConfig {
    pub cert_path: String,
    pub key_path: String,
}
