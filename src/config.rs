//! Harness configuration: YAML file, `AGENTSIM__SECTION__KEY` environment
//! overlay, then validation.

use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use agentsim_event_graph::FailurePolicy;
use agentsim_scheduler::{ClockMode, SchedulerConfig};

use crate::errors::ConfigError;

pub const ENV_PREFIX: &str = "AGENTSIM__";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub log_format: LogFormat,
    /// Bound on each request marshalled to a resource worker thread.
    #[serde(with = "duration_str")]
    pub resource_timeout: Duration,
    pub scheduler: SchedulerSection,
    pub trace: TraceSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            resource_timeout: Duration::from_secs(30),
            scheduler: SchedulerSection::default(),
            trace: TraceSection::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub clock: ClockMode,
    #[serde(with = "duration_str")]
    pub tick: Duration,
    #[serde(with = "duration_str")]
    pub agent_timeout: Duration,
    #[serde(with = "duration_str")]
    pub call_timeout: Duration,
    #[serde(with = "opt_duration_str")]
    pub dependency_timeout: Option<Duration>,
    pub max_concurrency: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        let defaults = SchedulerConfig::default();
        Self {
            clock: defaults.clock,
            tick: defaults.tick,
            agent_timeout: defaults.agent_timeout,
            call_timeout: defaults.call_timeout,
            dependency_timeout: defaults.dependency_timeout,
            max_concurrency: defaults.max_concurrency,
            failure_policy: defaults.failure_policy,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceSection {
    /// Entries kept by the in-memory state center.
    pub capacity: usize,
    /// Where `run` writes the trace when `--trace` is not given.
    pub output: Option<PathBuf>,
}

impl Default for TraceSection {
    fn default() -> Self {
        Self {
            capacity: 4096,
            output: None,
        }
    }
}

impl Config {
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Applies `AGENTSIM__SECTION__KEY=value` pairs on top of the current values.
    pub fn apply_env_overrides<I>(&mut self, vars: I) -> Result<usize, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut doc = serde_json::to_value(&*self).map_err(|err| ConfigError::Parse(err.to_string()))?;
        let mut applied = 0;
        for (key, raw) in vars {
            let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let path: Vec<String> = stripped
                .split("__")
                .filter(|segment| !segment.is_empty())
                .map(|segment| segment.to_ascii_lowercase())
                .collect();
            if path.is_empty() {
                continue;
            }
            set_json_value(&mut doc, &path, parse_env_value(&raw)).map_err(|message| {
                ConfigError::Override {
                    key: key.clone(),
                    message,
                }
            })?;
            applied += 1;
        }
        if applied > 0 {
            *self = serde_json::from_value(doc).map_err(|err| ConfigError::Override {
                key: ENV_PREFIX.trim_end_matches('_').to_string(),
                message: err.to_string(),
            })?;
        }
        Ok(applied)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.log_level
            .parse::<tracing::Level>()
            .map_err(|_| ConfigError::Invalid(format!("unknown log level {}", self.log_level)))?;
        let scheduler = &self.scheduler;
        if scheduler.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_concurrency must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("scheduler.tick", scheduler.tick),
            ("scheduler.agent_timeout", scheduler.agent_timeout),
            ("scheduler.call_timeout", scheduler.call_timeout),
            ("resource_timeout", self.resource_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if scheduler.dependency_timeout.is_some_and(|bound| bound.is_zero()) {
            return Err(ConfigError::Invalid(
                "scheduler.dependency_timeout must be positive when set".into(),
            ));
        }
        if self.trace.capacity == 0 {
            return Err(ConfigError::Invalid("trace.capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        let section = &self.scheduler;
        SchedulerConfig {
            clock: section.clock,
            tick: section.tick,
            agent_timeout: section.agent_timeout,
            call_timeout: section.call_timeout,
            dependency_timeout: section.dependency_timeout,
            max_concurrency: section.max_concurrency,
            failure_policy: section.failure_policy,
            duration: None,
        }
    }
}

/// Reads a dotted key such as `scheduler.tick` out of the serialized config.
pub fn lookup<'a>(doc: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(doc, |current, segment| current.as_object()?.get(segment))
}

fn parse_env_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn set_json_value(target: &mut Value, path: &[String], value: Value) -> Result<(), String> {
    let Some((last, parents)) = path.split_last() else {
        return Err("key cannot be empty".into());
    };
    let mut current = target;
    for segment in parents {
        current = ensure_object(current, segment)?
            .entry(segment.clone())
            .or_insert(Value::Null);
    }
    ensure_object(current, last)?.insert(last.clone(), value);
    Ok(())
}

fn ensure_object<'a>(value: &'a mut Value, segment: &str) -> Result<&'a mut Map<String, Value>, String> {
    if value.is_null() {
        *value = Value::Object(Map::new());
    }
    value
        .as_object_mut()
        .ok_or_else(|| format!("{segment} resolves to a non-object value"))
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

mod opt_duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => {
                serializer.serialize_str(&humantime::format_duration(*duration).to_string())
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| humantime::parse_duration(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}
