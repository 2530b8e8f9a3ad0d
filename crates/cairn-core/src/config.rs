//! Run configuration: template constants and variables, pool size, remote timeout.
//!
//! Loaded from YAML, then overridden by `CAIRN_*` environment variables, then
//! by `--set` pairs.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ConfigError;
use crate::template::{TemplateRenderer, Variable};
use crate::ConfigResult;

/// Config file picked up from the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "cairn-config.yaml";
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 30;

pub const ENV_MAX_CONCURRENCY: &str = "CAIRN_MAX_CONCURRENCY";
pub const ENV_REMOTE_TIMEOUT_SECS: &str = "CAIRN_REMOTE_TIMEOUT_SECS";
pub const ENV_VAR_PREFIX: &str = "CAIRN_VAR_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VariableConfig {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    pub sensitive: bool,
    /// Set by environment or command-line overrides; wins over `default`
    #[serde(skip)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CairnConfig {
    #[serde(default)]
    pub constants: serde_json::Map<String, Value>,
    #[serde(default)]
    pub variables: Vec<VariableConfig>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_remote_timeout_secs() -> u64 {
    DEFAULT_REMOTE_TIMEOUT_SECS
}

impl Default for CairnConfig {
    fn default() -> Self {
        Self {
            constants: serde_json::Map::new(),
            variables: Vec::new(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            remote_timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
        }
    }
}

impl CairnConfig {
    /// Load `path`, or [`DEFAULT_CONFIG_FILE`] when present, then apply the
    /// process environment.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded config");
        Self::from_yaml_str(&raw, &path.display().to_string())
    }

    pub fn from_yaml_str(raw: &str, source_name: &str) -> ConfigResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse {
            path: source_name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Apply `CAIRN_*` overrides from `vars`.
    pub fn apply_env<I>(&mut self, vars: I) -> ConfigResult<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if key == ENV_MAX_CONCURRENCY {
                self.max_concurrency = parse_env(&key, &value)?;
                if self.max_concurrency == 0 {
                    return Err(ConfigError::InvalidEnv {
                        key,
                        reason: "must be at least 1".to_string(),
                    });
                }
            } else if key == ENV_REMOTE_TIMEOUT_SECS {
                self.remote_timeout_secs = parse_env(&key, &value)?;
            } else if let Some(name) = key.strip_prefix(ENV_VAR_PREFIX) {
                if !name.is_empty() {
                    self.set_variable(name, value);
                }
            }
        }
        Ok(())
    }

    /// Apply one `var.<key>=<value>`, `const.<path>=<value>` or bare
    /// `<key>=<value>` (a variable) override.
    pub fn apply_override(&mut self, pair: &str) -> ConfigResult<()> {
        let (key, value) = pair
            .split_once('=')
            .filter(|(k, _)| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::InvalidOverride(pair.to_string()))?;
        let key = key.trim();

        if let Some(path) = key.strip_prefix("const.") {
            let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
            if segments.is_empty() {
                return Err(ConfigError::InvalidOverride(pair.to_string()));
            }
            set_constant(&mut self.constants, &segments, value.to_string());
        } else {
            let name = key.strip_prefix("var.").unwrap_or(key);
            if name.is_empty() {
                return Err(ConfigError::InvalidOverride(pair.to_string()));
            }
            self.set_variable(name, value.to_string());
        }
        Ok(())
    }

    /// Set a variable value; environment-style names (`MY_VAR`) match declared
    /// keys (`my-var`, `my_var`) case-insensitively.
    fn set_variable(&mut self, name: &str, value: String) {
        let wanted = normalize_key(name);
        match self
            .variables
            .iter_mut()
            .find(|v| normalize_key(&v.key) == wanted)
        {
            Some(var) => var.value = Some(value),
            None => self.variables.push(VariableConfig {
                key: name.to_ascii_lowercase(),
                default: None,
                sensitive: false,
                value: Some(value),
            }),
        }
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    /// Renderer over the configured constants and every variable with a value.
    pub fn renderer(&self) -> TemplateRenderer {
        let variables: BTreeMap<String, Variable> = self
            .variables
            .iter()
            .filter_map(|v| {
                let value = v.value.clone().or_else(|| v.default.clone())?;
                Some((
                    v.key.clone(),
                    Variable {
                        value,
                        sensitive: v.sensitive,
                    },
                ))
            })
            .collect();
        TemplateRenderer::new(self.constants.clone(), variables)
    }
}

fn normalize_key(key: &str) -> String {
    key.to_ascii_lowercase().replace('-', "_")
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> ConfigResult<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn set_constant(map: &mut serde_json::Map<String, Value>, path: &[&str], value: String) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = map;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(serde_json::Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        current = next;
    }
    current.insert(last.to_string(), Value::String(value));
}
