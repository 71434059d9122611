use bytesize::ByteSize;
use nixvm_provision::PullPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{read_to_string, try_exists};
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "nixvm.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found at: {0}")]
    NotFound(PathBuf),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Installer image URL overrides, keyed by architecture.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImagesConfig {
    pub intel: Option<Url>,
    pub arm: Option<Url>,
}

/// Contents of `nixvm.toml`. Every key is optional; command line flags win.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub work_dir: Option<PathBuf>,
    pub arch: Option<String>,
    pub runtime: Option<String>,
    pub disk_size_gib: Option<u64>,
    pub cpu_count: Option<u16>,
    pub memory_size: Option<ByteSize>,
    pub settle_delay_ms: Option<u64>,
    pub pull: Option<PullPolicy>,
    #[serde(default)]
    pub images: ImagesConfig,
}

impl Config {
    /// Load `path` if given (it must exist), else `./nixvm.toml` if present,
    /// else defaults.
    pub async fn locate(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let path = if path.is_dir() {
                    path.join(DEFAULT_CONFIG_FILE)
                } else {
                    path.to_owned()
                };
                if !try_exists(&path).await.unwrap_or(false) {
                    return Err(ConfigError::NotFound(path));
                }
                Self::load(&path).await
            }
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if try_exists(&path).await.unwrap_or(false) {
                    Self::load(&path).await
                } else {
                    Ok(Config::default())
                }
            }
        }
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let string = read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_owned(),
                source,
            })?;
        Self::parse(path, &string)
    }

    fn parse(path: &Path, string: &str) -> Result<Self, ConfigError> {
        toml::from_str(string).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }
}
