//! Configuration management module
//!
//! Layers, lowest first: built-in defaults, a YAML file, then environment
//! variables of the form `STEPWISE__<SECTION>__<KEY>=value`. The merged tree
//! is validated before anything is constructed from it.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use action_flow::CoordinatorConfig;
use action_locator::ResolverConfig;
use action_timeouts::TimeoutPolicy;
use l6_observe::ObsPolicyView;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use stepwise_event_store::RetentionPolicy;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const ENV_PREFIX: &str = "STEPWISE__";
pub const DEFAULT_CONFIG_PATH: &str = "config/stepwise.yaml";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse {origin}: {reason}")]
    Parse { origin: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit console logs as JSON lines.
    pub json: bool,
    /// Also write daily-rolled session logs under `<retention.root>/sessions`.
    pub to_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            to_file: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub timeouts: TimeoutPolicy,
    pub locator: ResolverConfig,
    pub observe: ObsPolicyView,
    pub retention: RetentionPolicy,
    pub run: CoordinatorConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logging.level '{}' is not one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }
        self.timeouts
            .validate()
            .map_err(|err| ConfigError::Invalid(format!("timeouts: {err}")))?;
        if self.locator.cache_probe_timeout_ms == 0 || self.locator.base_probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "locator probe timeouts must be positive".into(),
            ));
        }
        if self.locator.max_failure_streak == 0 {
            return Err(ConfigError::Invalid(
                "locator.max_failure_streak must be at least 1".into(),
            ));
        }
        self.observe
            .validate()
            .map_err(|err| ConfigError::Invalid(format!("observe: {err}")))?;
        self.retention
            .validate()
            .map_err(|err| ConfigError::Invalid(format!("retention: {err}")))?;
        if self.run.diagnostic_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "run.diagnostic_timeout_ms must be positive".into(),
            ));
        }
        if self.run.default_run_deadline_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "run.default_run_deadline_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Directory receiving the rolling tracing output.
    pub fn session_log_dir(&self) -> PathBuf {
        self.retention.category_dir("sessions")
    }
}

pub struct LoadedConfig {
    pub config: AppConfig,
    /// File the config was read from, if any.
    pub path: Option<PathBuf>,
}

/// Load from `path` (or [`DEFAULT_CONFIG_PATH`] when present) plus the
/// process environment.
pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(ConfigError::Io {
                    path: p.display().to_string(),
                    reason: "file not found".into(),
                });
            }
            Some(p.to_path_buf())
        }
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_PATH);
            default.exists().then_some(default)
        }
    };
    let config = load_layered(path.as_deref(), env::vars())?;
    match &path {
        Some(p) => info!(path = %p.display(), "loaded configuration"),
        None => debug!("no configuration file, using defaults"),
    }
    Ok(LoadedConfig { config, path })
}

/// Merge defaults, the optional YAML file and `vars`, then validate.
pub fn load_layered(
    path: Option<&Path>,
    vars: impl IntoIterator<Item = (String, String)>,
) -> Result<AppConfig, ConfigError> {
    let mut tree = serde_json::to_value(AppConfig::default()).map_err(|err| ConfigError::Parse {
        origin: "defaults".into(),
        reason: err.to_string(),
    })?;

    if let Some(path) = path {
        let raw = fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        let overlay = yaml_to_json(&raw, &path.display().to_string())?;
        merge(&mut tree, overlay);
    }

    for (dotted, value) in env_overlays(vars) {
        debug!(key = %dotted, "environment override");
        set_path(&mut tree, &dotted, value);
    }

    let config: AppConfig = serde_json::from_value(tree).map_err(|err| ConfigError::Parse {
        origin: "merged configuration".into(),
        reason: err.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

pub fn from_yaml_str(raw: &str) -> Result<AppConfig, ConfigError> {
    let mut tree = serde_json::to_value(AppConfig::default()).map_err(|err| ConfigError::Parse {
        origin: "defaults".into(),
        reason: err.to_string(),
    })?;
    merge(&mut tree, yaml_to_json(raw, "inline yaml")?);
    let config: AppConfig = serde_json::from_value(tree).map_err(|err| ConfigError::Parse {
        origin: "inline yaml".into(),
        reason: err.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

fn yaml_to_json(raw: &str, origin: &str) -> Result<Value, ConfigError> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(raw).map_err(|err| ConfigError::Parse {
        origin: origin.to_string(),
        reason: err.to_string(),
    })?;
    let value = serde_json::to_value(yaml).map_err(|err| ConfigError::Parse {
        origin: origin.to_string(),
        reason: err.to_string(),
    })?;
    match value {
        Value::Null => Ok(Value::Object(Map::new())),
        Value::Object(_) => Ok(value),
        _ => Err(ConfigError::Parse {
            origin: origin.to_string(),
            reason: "top level must be a mapping".into(),
        }),
    }
}

fn env_overlays(vars: impl IntoIterator<Item = (String, String)>) -> Vec<(String, Value)> {
    let mut overlays: Vec<(String, Value)> = vars
        .into_iter()
        .filter_map(|(key, raw)| {
            let stripped = key.strip_prefix(ENV_PREFIX)?;
            let path = stripped
                .split("__")
                .filter(|segment| !segment.is_empty())
                .map(|segment| segment.to_ascii_lowercase())
                .collect::<Vec<_>>()
                .join(".");
            if path.is_empty() {
                warn!(key = %key, "ignoring empty configuration override");
                return None;
            }
            Some((path, parse_env_value(&raw)))
        })
        .collect();
    overlays.sort_by(|a, b| a.0.cmp(&b.0));
    overlays
}

fn parse_env_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
        return parsed;
    }
    Value::String(raw.to_string())
}

/// Recursive merge; objects merge key by key, anything else replaces.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn set_path(tree: &mut Value, dotted: &str, value: Value) {
    let mut cursor = tree;
    let mut segments = dotted.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !cursor.is_object() {
            *cursor = Value::Object(Map::new());
        }
        let Value::Object(map) = cursor else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        cursor = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}
