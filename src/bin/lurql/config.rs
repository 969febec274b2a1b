use lurql::query::executor::{ParamValue, Params};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fallback log filter when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Default)]
pub struct CliConfig {
    path: Option<PathBuf>,
    data: RawConfig,
}

impl CliConfig {
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let must_exist = explicit.is_some();
        let path = explicit.or_else(default_config_path);
        let data = match path.as_ref() {
            Some(config_path) if config_path.exists() => read_file(config_path)?,
            Some(config_path) if must_exist => {
                return Err(ConfigError::Missing {
                    path: config_path.clone(),
                })
            }
            _ => RawConfig::default(),
        };
        Ok(Self { path, data })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn default_model(&self) -> Option<&PathBuf> {
        self.data.defaults.model.as_ref()
    }

    pub fn default_sqlite(&self) -> Option<&PathBuf> {
        self.data.defaults.sqlite.as_ref()
    }

    pub fn log_filter(&self) -> &str {
        self.data
            .defaults
            .log
            .as_deref()
            .unwrap_or(DEFAULT_LOG_FILTER)
    }

    pub fn identity_attribute(&self) -> Option<&str> {
        self.data.defaults.identity_attribute.as_deref()
    }

    /// Parameter bindings from `[params]`; command-line bindings are layered on top.
    pub fn params(&self) -> Params {
        let mut params = Params::new();
        for (name, raw) in &self.data.params {
            let value = match raw {
                RawParam::Scalar(value) => ParamValue::Scalar(value.clone()),
                RawParam::Set(values) => ParamValue::Set(values.iter().cloned().collect()),
            };
            params.insert(name.clone(), value);
        }
        params
    }
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    defaults: DefaultsSection,
    #[serde(default)]
    params: BTreeMap<String, RawParam>,
}

#[derive(Debug, Default, Deserialize)]
struct DefaultsSection {
    model: Option<PathBuf>,
    sqlite: Option<PathBuf>,
    log: Option<String>,
    identity_attribute: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawParam {
    Scalar(String),
    Set(Vec<String>),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read CLI config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse CLI config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("CLI config {path} does not exist")]
    Missing { path: PathBuf },
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("lurql").join("config.toml"))
}
