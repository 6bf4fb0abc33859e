use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use tracing::warn;

/// prefixes marking an override as meant for the launcher instead of the task config
pub const LAUNCH_PREFIXES: [&str; 2] = ["+launch.", "+launch/"];
/// marks the override replacing the submitted script, wherever it appears in a token
pub const SCRIPT_MARKER: &str = "+launch.script=";
/// separates task overrides from the script's own arguments
pub const ARGS_SEPARATOR: &str = "--";
/// `$` escaped so it survives one more shell layer on the scheduler side
const ESCAPED_DOLLAR: &str = r"\\$";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OverrideError {
    #[error("Override {0:?} is missing a '=' between key and value")]
    MissingSeparator(String),
    #[error("Override {0:?} has an empty key")]
    EmptyKey(String),
}

/// A single `key=value` override as given by the caller
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OverrideToken {
    raw: String,
    // byte offset of the first '='
    split: usize,
}

impl OverrideToken {
    pub fn parse(raw: impl Into<String>) -> Result<Self, OverrideError> {
        let raw = raw.into();

        match raw.find('=') {
            None => Err(OverrideError::MissingSeparator(raw)),
            Some(0) => Err(OverrideError::EmptyKey(raw)),
            Some(split) => Ok(Self { raw, split }),
        }
    }

    pub fn key(&self) -> &str {
        &self.raw[..self.split]
    }

    pub fn value(&self) -> &str {
        &self.raw[self.split + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// consumed by the launcher, never part of the resolved config
    pub fn is_launch(&self) -> bool {
        LAUNCH_PREFIXES
            .iter()
            .any(|prefix| self.key().starts_with(prefix))
    }

    /// any token containing `+launch.script=`, so `++launch.script=` counts as well
    pub fn is_script(&self) -> bool {
        self.raw.contains(SCRIPT_MARKER)
    }

    /// only tokens with backslashes, dollars or launch keys are rewritten
    fn needs_escaping(&self) -> bool {
        self.raw.contains('\\') || self.raw.contains('$') || self.raw.contains("+launch")
    }
}

impl fmt::Display for OverrideToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for OverrideToken {
    type Err = OverrideError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl TryFrom<String> for OverrideToken {
    type Error = OverrideError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}

impl From<OverrideToken> for String {
    fn from(token: OverrideToken) -> Self {
        token.raw
    }
}

/// parse a whole sequence of raw overrides, failing on the first malformed one
pub fn parse_all<I, S>(raw: I) -> Result<Vec<OverrideToken>, OverrideError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    raw.into_iter().map(OverrideToken::parse).collect()
}

/// Remove every `+launch.script=` override and return the script it names.
/// The first one wins, later ones are dropped with a warning.
pub fn take_script(tokens: &mut Vec<OverrideToken>) -> Option<String> {
    let mut script: Option<String> = None;

    tokens.retain(|token| {
        if !token.is_script() {
            return true;
        }

        if let Some(kept) = &script {
            warn!(kept = %kept, ignored = %token.value(), "Multiple script overrides, using the first one");
        } else {
            script = Some(token.value().to_string());
        }

        false
    });

    script
}

/// Overrides after sanitizing, split by their destination
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SanitizedOverrides {
    pub task: Vec<String>,
    pub launch: Vec<String>,
}

impl SanitizedOverrides {
    /// task overrides, followed by `--` and the launch overrides if there are any
    pub fn into_args(self) -> Vec<String> {
        let mut args = self.task;

        if !self.launch.is_empty() {
            args.push(ARGS_SEPARATOR.to_string());
            args.extend(self.launch);
        }

        args
    }

    /// single argument handed to the scheduler as the script's arguments
    pub fn joined(self) -> String {
        self.into_args().join(" ")
    }
}

/// escape an override value for the shell that runs the job script
fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 8);

    for character in value.chars() {
        match character {
            '\\' => {}
            '(' | ')' | '{' | '}' => {
                escaped.push('\\');
                escaped.push(character);
            }
            '$' => escaped.push_str(ESCAPED_DOLLAR),
            other => escaped.push(other),
        }
    }

    escaped
}

fn strip_launch_prefix(key: &str) -> &str {
    LAUNCH_PREFIXES
        .iter()
        .find_map(|prefix| key.strip_prefix(prefix))
        .unwrap_or(key)
}

/// Turn overrides into shell safe tokens, routing launch overrides after a `--`.
/// Script overrides must already be removed with [`take_script`].
pub fn sanitize<'a, I>(tokens: I) -> SanitizedOverrides
where
    I: IntoIterator<Item = &'a OverrideToken>,
{
    let mut sanitized = SanitizedOverrides::default();

    for token in tokens {
        if !token.needs_escaping() {
            sanitized.task.push(token.as_str().to_string());
            continue;
        }

        let value = escape_value(token.value());

        if token.is_launch() {
            sanitized
                .launch
                .push(format!("{}=\"{value}\"", strip_launch_prefix(token.key())));
        } else {
            sanitized.task.push(format!("{}=\"{value}\"", token.key()));
        }
    }

    sanitized
}

#[cfg(test)]
#[path = "overrides_test.rs"]
mod overrides_test;
