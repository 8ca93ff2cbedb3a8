//! File and environment configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use callsim_core::{AgentConfig, AgentRegistry};
use callsim_openai_model::{OpenAIConfig, OpenAIConfigBuilder};
use serde::Deserialize;

/// The file [`Config::load_default`] looks for in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "callsim.toml";

/// Errors raised while loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read `{}`", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse `{}`", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// The whole configuration, as read from `callsim.toml`.
///
/// Every section is optional.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub model: ModelConfig,
    pub simulation: SimulationConfig,
    pub storage: StorageConfig,
    pub agents: Vec<AgentOverride>,
}

/// The `[model]` section.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// How long transport failures are retried, in seconds.
    pub max_retry_secs: Option<u64>,
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_retry_secs", &self.max_retry_secs)
            .finish()
    }
}

impl ModelConfig {
    /// Builds the provider configuration. Fails without an API key.
    pub fn openai_config(&self) -> Result<OpenAIConfig, ConfigError> {
        let Some(api_key) = self.api_key.as_ref().filter(|key| !key.is_empty())
        else {
            return Err(ConfigError::Invalid(
                "no API key, set OPENAI_API_KEY or `model.api_key`".to_owned(),
            ));
        };
        let mut builder = OpenAIConfigBuilder::with_api_key(api_key.clone());
        if let Some(base_url) = &self.base_url {
            builder = builder.with_base_url(base_url.clone());
        }
        if let Some(model) = &self.model {
            builder = builder.with_model(model.clone());
        }
        if let Some(secs) = self.max_retry_secs {
            builder = builder.with_max_retry_elapsed(Duration::from_secs(secs));
        }
        Ok(builder.build())
    }
}

/// The `[simulation]` section.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// The turn budget used when a request does not name one.
    pub default_max_turns: u32,
    /// The deadline of a single model invocation, in seconds.
    pub invocation_timeout_secs: Option<u64>,
    /// Return the partial history of failed runs.
    pub keep_partial_on_error: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            default_max_turns: 5,
            invocation_timeout_secs: Some(60),
            keep_partial_on_error: false,
        }
    }
}

/// Where documents are stored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// One JSON file per document under `data_dir`.
    #[default]
    File,
    /// Nothing outlives the process.
    Memory,
}

/// The `[storage]` section.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
    /// The container simulated conversations are stored in.
    pub conversations: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            data_dir: PathBuf::from("callsim-data"),
            conversations: callsim_core::aggregator::CONVERSATIONS_CONTAINER
                .to_owned(),
        }
    }
}

/// An `[[agents]]` entry. Fields left out keep the built-in values of an
/// existing agent; a new agent must set all of them except `sample_inputs`
/// and `model`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentOverride {
    pub agent_id: String,
    pub display_name: Option<String>,
    pub system_instructions: Option<String>,
    /// Reads the instructions from a file, relative to the config file.
    pub instructions_file: Option<PathBuf>,
    pub storage_container: Option<String>,
    pub sample_inputs: Option<Vec<String>>,
    pub model: Option<String>,
}

impl Config {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Reads a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| {
            ConfigError::Read {
                path: path.to_owned(),
                source,
            }
        })?;
        let mut config = Self::from_toml_str(&text, path)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Reads [`DEFAULT_CONFIG_FILE`] if it exists, or falls back to the
    /// defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Path::new(DEFAULT_CONFIG_FILE);
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Applies `OPENAI_API_KEY`, `OPENAI_BASE_URL` and `OPENAI_MODEL` from
    /// the process environment.
    #[inline]
    pub fn with_env(self) -> Self {
        self.with_vars(|name| std::env::var(name).ok())
    }

    /// Applies the model variables looked up with `var`. Set variables win
    /// over the file.
    pub fn with_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name| var(name).filter(|value: &String| !value.is_empty());
        if let Some(api_key) = var("OPENAI_API_KEY") {
            self.model.api_key = Some(api_key);
        }
        if let Some(base_url) = var("OPENAI_BASE_URL") {
            self.model.base_url = Some(base_url);
        }
        if let Some(model) = var("OPENAI_MODEL") {
            self.model.model = Some(model);
        }
        self
    }

    fn resolve_paths(&mut self, base: &Path) {
        if self.storage.data_dir.is_relative() {
            self.storage.data_dir = base.join(&self.storage.data_dir);
        }
        for agent in &mut self.agents {
            if let Some(file) = &mut agent.instructions_file {
                if file.is_relative() {
                    *file = base.join(&*file);
                }
            }
        }
    }

    /// Builds the agent registry: the built-in agents with the
    /// `[[agents]]` entries applied on top.
    pub fn registry(&self) -> Result<AgentRegistry, ConfigError> {
        let mut registry = AgentRegistry::builtin();
        for entry in &self.agents {
            if entry.agent_id.is_empty() {
                return Err(ConfigError::Invalid(
                    "an `[[agents]]` entry has no `agent_id`".to_owned(),
                ));
            }
            let existing = registry.get(&entry.agent_id).ok().cloned();
            let config = entry.apply(existing)?;
            registry = registry.with_agent(config);
        }
        Ok(registry)
    }
}

impl AgentOverride {
    fn apply(&self, base: Option<AgentConfig>) -> Result<AgentConfig, ConfigError> {
        let instructions = match (&self.system_instructions, &self.instructions_file) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(format!(
                    "agent `{}` sets both `system_instructions` and `instructions_file`",
                    self.agent_id
                )));
            }
            (Some(text), None) => Some(text.clone()),
            (None, Some(path)) => Some(fs::read_to_string(path).map_err(
                |source| ConfigError::Read {
                    path: path.clone(),
                    source,
                },
            )?),
            (None, None) => None,
        };

        let missing = |field: &str| {
            ConfigError::Invalid(format!(
                "new agent `{}` needs `{field}`",
                self.agent_id
            ))
        };
        let mut config = match base {
            Some(config) => config,
            None => AgentConfig {
                agent_id: self.agent_id.clone(),
                display_name: self
                    .display_name
                    .clone()
                    .ok_or_else(|| missing("display_name"))?,
                system_instructions: instructions
                    .clone()
                    .ok_or_else(|| missing("system_instructions"))?,
                storage_container: self
                    .storage_container
                    .clone()
                    .ok_or_else(|| missing("storage_container"))?,
                sample_inputs: vec![],
                model: None,
            },
        };

        if let Some(display_name) = &self.display_name {
            config.display_name = display_name.clone();
        }
        if let Some(instructions) = instructions {
            config.system_instructions = instructions;
        }
        if let Some(container) = &self.storage_container {
            config.storage_container = container.clone();
        }
        if let Some(sample_inputs) = &self.sample_inputs {
            config.sample_inputs = sample_inputs.clone();
        }
        if let Some(model) = &self.model {
            config.model = Some(model.clone());
        }
        Ok(config)
    }
}
