//! `callflow.toml` loading.
//!
//! ```toml
//! [engine]
//! max_steps = 100
//! default_time_zone = "+10:00"
//!
//! [batch]
//! batch_width = 10
//!
//! [serve]
//! port = 8080
//!
//! [collaborators]
//! classifier_url = "http://nlu.internal/classify"
//! platform_url = "http://platform.internal"
//! random_seed = 7
//! ```
//!
//! Every table and key is optional. `CALLFLOW_API_KEY`,
//! `CALLFLOW_BATCH_WIDTH` and `CALLFLOW_CLASSIFIER_TOKEN` override the file.

use std::path::{Path, PathBuf};

use callflow_batch::BatchConfig;
use callflow_eval::EngineConfig;
use serde::Deserialize;

pub(crate) const DEFAULT_CONFIG_FILE: &str = "callflow.toml";

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConfigError {
    #[error("error reading config '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid {name}: '{value}'")]
    Env { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub(crate) struct ServeConfig {
    pub port: u16,
    /// None disables authentication.
    pub api_key: Option<String>,
}

impl Default for ServeConfig {
    fn default() -> Self {
        ServeConfig {
            port: 8080,
            api_key: None,
        }
    }
}

/// External services the engine calls. Absent URLs leave the
/// collaborator unconfigured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub(crate) struct CollaboratorConfig {
    /// NLU endpoint for `TextInference` rules.
    pub classifier_url: Option<String>,
    pub classifier_token: Option<String>,
    /// Base URL for contact attribute reads.
    pub platform_url: Option<String>,
    /// Fixed seed for `Distribution` draws.
    pub random_seed: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct CliConfig {
    pub engine: EngineConfig,
    pub batch: BatchConfig,
    pub serve: ServeConfig,
    pub collaborators: CollaboratorConfig,
}

impl CliConfig {
    /// Load `path`, or `callflow.toml` in the working directory when no
    /// path is given and that file exists. Environment overrides apply in
    /// both cases.
    pub(crate) fn load(path: Option<&Path>) -> Result<CliConfig, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => CliConfig::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<CliConfig, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(key) = var("CALLFLOW_API_KEY").filter(|k| !k.is_empty()) {
            self.serve.api_key = Some(key);
        }
        if let Some(token) = var("CALLFLOW_CLASSIFIER_TOKEN").filter(|t| !t.is_empty()) {
            self.collaborators.classifier_token = Some(token);
        }
        if let Some(width) = var("CALLFLOW_BATCH_WIDTH") {
            self.batch.batch_width = match width.parse::<usize>() {
                Ok(w) if w > 0 => w,
                _ => {
                    return Err(ConfigError::Env {
                        name: "CALLFLOW_BATCH_WIDTH",
                        value: width,
                    })
                }
            };
        }
        Ok(())
    }
}
