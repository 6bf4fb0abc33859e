use serde::{Serialize, Serializer};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeSet;
use thiserror::Error;

pub const RUNTIME_SECTION: &str = "hydra";
pub const JOB_NAME_KEY: &str = "hydra.job.name";
pub const JOB_ID_KEY: &str = "hydra.job.id";
pub const JOB_NUM_KEY: &str = "hydra.job.num";
pub const SWEEP_DIR_KEY: &str = "hydra.sweep.dir";
pub const SWEEP_SUBDIR_KEY: &str = "hydra.sweep.subdir";
pub const OUTPUT_SUBDIR_KEY: &str = "hydra.output_subdir";
pub const RUNTIME_KEY: &str = "hydra.runtime";
pub const OUTPUT_DIR_KEY: &str = "hydra.runtime.output_dir";
pub const TASK_OVERRIDES_KEY: &str = "hydra.overrides.task";

// guards against self referencing interpolations
const MAX_INTERPOLATION_DEPTH: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobConfigError {
    #[error("Config root must be a mapping")]
    NotAMapping,
    #[error("Key {0} is read-only")]
    ReadOnly(String),
    #[error("Cannot set {0}, a parent of it is not a mapping")]
    ParentNotAMapping(String),
    #[error("Interpolation references missing key {0}")]
    MissingKey(String),
    #[error("Interpolation of {0} is not a scalar")]
    NotAScalar(String),
    #[error("Interpolation in {0:?} is not closed")]
    Unterminated(String),
    #[error("Interpolation of {0:?} nests too deep")]
    TooDeep(String),
}

/// Resolved configuration of a single job: a YAML tree plus read-only key prefixes
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    tree: Value,
    readonly: BTreeSet<String>,
}

impl Serialize for JobConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.tree.serialize(serializer)
    }
}

fn runtime_defaults(job_label: &str) -> Value {
    let mut job = Mapping::new();
    job.insert("name".into(), job_label.into());
    job.insert("id".into(), Value::Null);
    job.insert("num".into(), Value::Null);

    let mut sweep = Mapping::new();
    sweep.insert("dir".into(), "multirun".into());
    sweep.insert("subdir".into(), "${hydra.job.num}".into());

    let mut overrides = Mapping::new();
    overrides.insert("task".into(), Value::Sequence(Vec::new()));

    let mut runtime = Mapping::new();
    runtime.insert("output_dir".into(), Value::Null);

    let mut section = Mapping::new();
    section.insert("job".into(), Value::Mapping(job));
    section.insert("sweep".into(), Value::Mapping(sweep));
    section.insert("output_subdir".into(), ".hydra".into());
    section.insert("overrides".into(), Value::Mapping(overrides));
    section.insert("runtime".into(), Value::Mapping(runtime));

    let mut root = Mapping::new();
    root.insert(RUNTIME_SECTION.into(), Value::Mapping(section));

    Value::Mapping(root)
}

/// fill in every key missing in `target` from `defaults`, values in `target` win,
/// an explicit null included
fn merge_defaults(target: &mut Value, defaults: Value) {
    if let (Value::Mapping(target), Value::Mapping(defaults)) = (target, defaults) {
        for (key, default) in defaults {
            match target.get_mut(&key) {
                Some(existing) => merge_defaults(existing, default),
                None => {
                    target.insert(key, default);
                }
            }
        }
    }
}

/// render a scalar the way it would be written in YAML, without quotes
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("null".to_string()),
        Value::Bool(boolean) => Some(boolean.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::String(string) => Some(string.clone()),
        Value::Sequence(_) | Value::Mapping(_) | Value::Tagged(_) => None,
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|segment| !segment.is_empty())
}

impl JobConfig {
    /// Wrap a task config and add the runtime section defaults. The runtime section's
    /// `runtime` part is read-only from here on.
    pub fn new(task: Value, job_label: &str) -> Result<Self, JobConfigError> {
        let mut tree = match task {
            Value::Null => Value::Mapping(Mapping::new()),
            mapping @ Value::Mapping(_) => mapping,
            _ => return Err(JobConfigError::NotAMapping),
        };
        merge_defaults(&mut tree, runtime_defaults(job_label));

        let mut config = Self {
            tree,
            readonly: BTreeSet::new(),
        };
        config.set_readonly(RUNTIME_KEY, true);

        Ok(config)
    }

    pub fn select(&self, path: &str) -> Option<&Value> {
        segments(path).try_fold(&self.tree, |node, segment| node.get(segment))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.select(path).is_some()
    }

    pub fn is_readonly(&self, path: &str) -> bool {
        self.readonly.iter().any(|prefix| {
            path == prefix
                || path
                    .strip_prefix(prefix.as_str())
                    .map_or(false, |rest| rest.starts_with('.'))
        })
    }

    pub fn set_readonly(&mut self, prefix: &str, readonly: bool) {
        if readonly {
            self.readonly.insert(prefix.to_string());
        } else {
            self.readonly.remove(prefix);
        }
    }

    /// Set a value, creating missing parent mappings
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<(), JobConfigError> {
        if self.is_readonly(path) {
            return Err(JobConfigError::ReadOnly(path.to_string()));
        }

        let parts = segments(path).collect::<Vec<_>>();
        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| JobConfigError::ParentNotAMapping(path.to_string()))?;

        let mut node = &mut self.tree;
        for segment in parents {
            let mapping = node
                .as_mapping_mut()
                .ok_or_else(|| JobConfigError::ParentNotAMapping(path.to_string()))?;

            if !mapping.contains_key(*segment) {
                mapping.insert((*segment).into(), Value::Mapping(Mapping::new()));
            }
            node = mapping
                .get_mut(*segment)
                .ok_or_else(|| JobConfigError::ParentNotAMapping(path.to_string()))?;
        }

        node.as_mapping_mut()
            .ok_or_else(|| JobConfigError::ParentNotAMapping(path.to_string()))?
            .insert((*last).into(), value.into());

        Ok(())
    }

    /// Run `update` with the read-only mark on `prefix` lifted. The previous mark is
    /// restored afterwards, also when `update` fails.
    pub fn with_writable<T, E>(
        &mut self,
        prefix: &str,
        update: impl FnOnce(&mut Self) -> Result<T, E>,
    ) -> Result<T, E> {
        let was_readonly = self.readonly.contains(prefix);
        self.set_readonly(prefix, false);

        let result = update(self);

        if was_readonly {
            self.set_readonly(prefix, true);
        }

        result
    }

    /// Replace every `${dotted.key}` with the scalar stored under that key
    pub fn interpolate(&self, input: &str) -> Result<String, JobConfigError> {
        self.interpolate_at(input, 0)
    }

    fn interpolate_at(&self, input: &str, depth: usize) -> Result<String, JobConfigError> {
        if depth > MAX_INTERPOLATION_DEPTH {
            return Err(JobConfigError::TooDeep(input.to_string()));
        }

        let mut output = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(start) = rest.find("${") {
            output.push_str(&rest[..start]);

            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or_else(|| JobConfigError::Unterminated(input.to_string()))?;
            let key = after[..end].trim();

            let value = self
                .select(key)
                .ok_or_else(|| JobConfigError::MissingKey(key.to_string()))?;
            let value =
                scalar_to_string(value).ok_or_else(|| JobConfigError::NotAScalar(key.to_string()))?;

            output.push_str(&self.interpolate_at(&value, depth + 1)?);
            rest = &after[end + 1..];
        }

        output.push_str(rest);

        Ok(output)
    }

    /// interpolated string value of a key, `None` if it is missing or null
    pub fn select_string(&self, path: &str) -> Result<Option<String>, JobConfigError> {
        match self.select(path) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => {
                let value = scalar_to_string(value)
                    .ok_or_else(|| JobConfigError::NotAScalar(path.to_string()))?;

                self.interpolate(&value).map(Some)
            }
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        self.select(JOB_ID_KEY).and_then(Value::as_str)
    }

    pub fn job_num(&self) -> Option<u64> {
        self.select(JOB_NUM_KEY).and_then(Value::as_u64)
    }

    pub fn output_dir(&self) -> Option<&str> {
        self.select(OUTPUT_DIR_KEY).and_then(Value::as_str)
    }

    /// the runtime section on its own, wrapped in its top level key
    pub fn runtime_section(&self) -> Value {
        let mut root = Mapping::new();
        if let Some(section) = self.select(RUNTIME_SECTION) {
            root.insert(RUNTIME_SECTION.into(), section.clone());
        }

        Value::Mapping(root)
    }

    pub fn task_overrides(&self) -> Value {
        self.select(TASK_OVERRIDES_KEY)
            .cloned()
            .unwrap_or_else(|| Value::Sequence(Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> JobConfig {
        JobConfig::new(serde_yaml::from_str(yaml).unwrap(), "train").unwrap()
    }

    #[test]
    fn adds_runtime_defaults() {
        let config = config("lr: 0.1\nhydra:\n  sweep:\n    dir: /scratch/sweeps\n");

        assert_eq!(config.select("lr"), Some(&Value::from(0.1)));
        assert_eq!(
            config.select_string(JOB_NAME_KEY).unwrap().as_deref(),
            Some("train")
        );
        assert_eq!(
            config.select_string(SWEEP_DIR_KEY).unwrap().as_deref(),
            Some("/scratch/sweeps")
        );
        assert_eq!(
            config.select(SWEEP_SUBDIR_KEY),
            Some(&Value::from("${hydra.job.num}"))
        );
        assert_eq!(config.output_dir(), None);
        assert!(config.is_readonly(OUTPUT_DIR_KEY));
        assert!(!config.is_readonly("hydra.runtime_extra"));
    }

    #[test]
    fn explicit_null_survives_defaults() {
        let config = config("hydra:\n  output_subdir: null\n");

        assert_eq!(config.select(OUTPUT_SUBDIR_KEY), Some(&Value::Null));
        assert_eq!(config.select_string(OUTPUT_SUBDIR_KEY).unwrap(), None);
    }

    #[test]
    fn rejects_non_mapping_root() {
        assert_eq!(
            JobConfig::new(Value::from("text"), "train"),
            Err(JobConfigError::NotAMapping)
        );
    }

    #[test]
    fn set_creates_parents_and_respects_readonly() {
        let mut config = config("{}");

        config.set("model.layers.depth", 4).unwrap();
        assert_eq!(config.select("model.layers.depth"), Some(&Value::from(4)));

        assert_eq!(
            config.set(OUTPUT_DIR_KEY, "/tmp"),
            Err(JobConfigError::ReadOnly(OUTPUT_DIR_KEY.to_string()))
        );
        assert_eq!(
            config.set("model.layers.depth.inner", 1),
            Err(JobConfigError::ParentNotAMapping(
                "model.layers.depth.inner".to_string()
            ))
        );
    }

    #[test]
    fn with_writable_restores_mark() {
        let mut config = config("{}");

        config
            .with_writable(RUNTIME_KEY, |config| config.set(OUTPUT_DIR_KEY, "/out"))
            .unwrap();
        assert_eq!(config.output_dir(), Some("/out"));
        assert!(config.is_readonly(OUTPUT_DIR_KEY));

        let failed: Result<(), JobConfigError> = config.with_writable(RUNTIME_KEY, |_| {
            Err(JobConfigError::MissingKey("x".to_string()))
        });
        assert!(failed.is_err());
        assert!(config.is_readonly(RUNTIME_KEY));
    }

    #[test]
    fn interpolates_nested_references() {
        let mut config = config("base: /data\npath: ${base}/sets\n");
        config.set(JOB_NUM_KEY, 3).unwrap();

        assert_eq!(
            config.interpolate("${path}/${hydra.job.name}_${hydra.job.num}").unwrap(),
            "/data/sets/train_3"
        );
        assert_eq!(
            config.interpolate("${missing}"),
            Err(JobConfigError::MissingKey("missing".to_string()))
        );
        assert_eq!(
            config.interpolate("${hydra.job"),
            Err(JobConfigError::Unterminated("${hydra.job".to_string()))
        );
        assert_eq!(
            config.interpolate("${hydra}"),
            Err(JobConfigError::NotAScalar("hydra".to_string()))
        );
    }

    #[test]
    fn self_reference_is_reported() {
        let config = config("a: ${a}\n");

        assert!(matches!(
            config.interpolate("${a}"),
            Err(JobConfigError::TooDeep(_))
        ));
    }
}
