use crate::{
    job_config::{JobConfig, JobConfigError, TASK_OVERRIDES_KEY},
    overrides::OverrideToken,
};
use serde_yaml::Value;
use std::fmt::Debug;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Override {0} targets a key that does not exist, use +{0} to add it")]
    UnknownKey(String),
    #[error("Override +{0} adds a key that already exists, use ++{0} to replace it")]
    KeyExists(String),
    #[error("Failed to apply override: {0}")]
    Config(#[from] JobConfigError),
}

/// Produces the configuration of one run from the base config and its overrides
pub trait ConfigResolver: Debug {
    fn resolve(
        &self,
        base: &JobConfig,
        overrides: &[OverrideToken],
    ) -> Result<JobConfig, ResolveError>;
}

/// Applies `key=value`, `+key=value` and `++key=value` overrides to a copy of the base
#[derive(Debug, Clone, Copy, Default)]
pub struct OverrideResolver;

#[derive(Debug, PartialEq, Eq)]
enum Mode {
    Set,
    Add,
    Upsert,
}

fn split_mode(key: &str) -> (Mode, &str) {
    if let Some(key) = key.strip_prefix("++") {
        (Mode::Upsert, key)
    } else if let Some(key) = key.strip_prefix('+') {
        (Mode::Add, key)
    } else {
        (Mode::Set, key)
    }
}

/// values are read as YAML, anything unparsable stays a plain string
pub fn parse_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::String(String::new());
    }

    serde_yaml::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

impl ConfigResolver for OverrideResolver {
    fn resolve(
        &self,
        base: &JobConfig,
        overrides: &[OverrideToken],
    ) -> Result<JobConfig, ResolveError> {
        let mut config = base.clone();

        for token in overrides {
            let (mode, key) = split_mode(token.key());
            let exists = config.contains(key);

            match mode {
                Mode::Set if !exists => return Err(ResolveError::UnknownKey(key.to_string())),
                Mode::Add if exists => return Err(ResolveError::KeyExists(key.to_string())),
                _ => {}
            }

            debug!(key = key, value = token.value(), "Applying override");
            config.set(key, parse_value(token.value()))?;
        }

        config.set(
            TASK_OVERRIDES_KEY,
            overrides
                .iter()
                .map(|token| Value::String(token.to_string()))
                .collect::<Vec<_>>(),
        )?;

        Ok(config)
    }
}
