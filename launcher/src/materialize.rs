use crate::{
    config::OutputConfig,
    job_config::{JobConfig, JobConfigError, OUTPUT_DIR_KEY, OUTPUT_SUBDIR_KEY, RUNTIME_KEY},
};
use serde::Serialize;
use std::{
    env,
    fmt::Debug,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};

pub const CONFIG_FILE: &str = "config.yaml";
pub const RUNTIME_FILE: &str = "hydra.yaml";
pub const OVERRIDES_FILE: &str = "overrides.yaml";

#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("Output directory key {0} is not set")]
    MissingDirectory(String),
    #[error("Failed to resolve output directory: {0}")]
    Config(#[from] JobConfigError),
    #[error("Failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to serialize {path:?}: {source}")]
    Serialize {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Persists a resolved job configuration, returns the job's output directory
pub trait Materializer: Debug {
    fn materialize(&self, config: &mut JobConfig) -> Result<PathBuf, MaterializeError>;
}

/// Writes the job configuration as YAML below `<sweep dir>/<sweep subdir>`
#[derive(Debug, Clone)]
pub struct FsMaterializer {
    job_dir_key: String,
    job_subdir_key: Option<String>,
}

impl Default for FsMaterializer {
    fn default() -> Self {
        Self::load(&OutputConfig::default())
    }
}

fn absolute(path: PathBuf) -> Result<PathBuf, MaterializeError> {
    if path.is_absolute() {
        return Ok(path);
    }

    env::current_dir()
        .map(|cwd| cwd.join(&path))
        .map_err(|source| MaterializeError::Io { path, source })
}

fn create_dir(path: &Path) -> Result<(), MaterializeError> {
    fs::create_dir_all(path).map_err(|source| MaterializeError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn save<T: Serialize>(value: &T, directory: &Path, file_name: &str) -> Result<(), MaterializeError> {
    let path = directory.join(file_name);
    let content = serde_yaml::to_string(value).map_err(|source| MaterializeError::Serialize {
        path: path.clone(),
        source,
    })?;

    fs::write(&path, content).map_err(|source| MaterializeError::Io { path, source })
}

impl FsMaterializer {
    pub fn load(config: &OutputConfig) -> Self {
        Self {
            job_dir_key: config.job_dir_key.clone(),
            job_subdir_key: config.job_subdir_key.clone(),
        }
    }

    /// output directory of a job, relative paths are taken from the working directory
    pub fn output_dir(&self, config: &JobConfig) -> Result<PathBuf, MaterializeError> {
        let mut output_dir = config
            .select_string(&self.job_dir_key)?
            .map(PathBuf::from)
            .ok_or_else(|| MaterializeError::MissingDirectory(self.job_dir_key.clone()))?;

        if let Some(ref subdir_key) = self.job_subdir_key {
            if let Some(subdir) = config.select_string(subdir_key)? {
                output_dir.push(subdir);
            }
        }

        absolute(output_dir)
    }
}

impl Materializer for FsMaterializer {
    fn materialize(&self, config: &mut JobConfig) -> Result<PathBuf, MaterializeError> {
        let output_dir = self.output_dir(config)?;
        let stamped = output_dir.to_string_lossy().into_owned();

        config.with_writable(RUNTIME_KEY, |config| config.set(OUTPUT_DIR_KEY, stamped))?;

        create_dir(&output_dir)?;
        debug!(output_dir = ?output_dir, "Created job output directory");

        if let Some(output_subdir) = config.select_string(OUTPUT_SUBDIR_KEY)? {
            let metadata_dir = output_dir.join(output_subdir);
            create_dir(&metadata_dir)?;

            save(&*config, &metadata_dir, CONFIG_FILE)?;
            save(&config.runtime_section(), &metadata_dir, RUNTIME_FILE)?;
            save(&config.task_overrides(), &metadata_dir, OVERRIDES_FILE)?;

            info!(path = ?metadata_dir, "Saved job configuration");
        }

        Ok(output_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_config::{JOB_NUM_KEY, TASK_OVERRIDES_KEY};
    use serde_yaml::Value;
    use tempfile::TempDir;

    fn job_config(root: &Path, extra: &str) -> JobConfig {
        let yaml = format!(
            "lr: 0.1\nhydra:\n  sweep:\n    dir: {}\n{extra}",
            root.join("sweep").display()
        );
        let mut config = JobConfig::new(serde_yaml::from_str(&yaml).unwrap(), "train").unwrap();
        config.set(JOB_NUM_KEY, 2).unwrap();
        config
            .set(TASK_OVERRIDES_KEY, vec![Value::from("lr=0.1")])
            .unwrap();

        config
    }

    #[test]
    fn writes_all_artifacts() {
        let root = TempDir::new().unwrap();
        let mut config = job_config(root.path(), "");

        let output_dir = FsMaterializer::default().materialize(&mut config).unwrap();
        let metadata_dir = output_dir.join(".hydra");

        assert_eq!(output_dir, root.path().join("sweep").join("2"));
        assert_eq!(config.output_dir(), Some(output_dir.to_str().unwrap()));
        assert!(config.is_readonly(OUTPUT_DIR_KEY));

        let saved: Value =
            serde_yaml::from_str(&fs::read_to_string(metadata_dir.join(CONFIG_FILE)).unwrap())
                .unwrap();
        assert_eq!(saved.get("lr"), Some(&Value::from(0.1)));

        let runtime: Value =
            serde_yaml::from_str(&fs::read_to_string(metadata_dir.join(RUNTIME_FILE)).unwrap())
                .unwrap();
        assert!(runtime.get("hydra").is_some());
        assert!(runtime.get("lr").is_none());

        let overrides: Vec<String> =
            serde_yaml::from_str(&fs::read_to_string(metadata_dir.join(OVERRIDES_FILE)).unwrap())
                .unwrap();
        assert_eq!(overrides, vec!["lr=0.1"]);
    }

    #[test]
    fn null_output_subdir_writes_no_files() {
        let root = TempDir::new().unwrap();
        let mut config = job_config(root.path(), "  output_subdir: null\n");

        let output_dir = FsMaterializer::default().materialize(&mut config).unwrap();

        assert!(output_dir.is_dir());
        assert_eq!(fs::read_dir(&output_dir).unwrap().count(), 0);
    }

    #[test]
    fn existing_directory_is_fine() {
        let root = TempDir::new().unwrap();
        let mut config = job_config(root.path(), "");
        let materializer = FsMaterializer::default();

        let first = materializer.materialize(&mut config).unwrap();
        let second = materializer.materialize(&mut config).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn subdir_key_can_be_disabled() {
        let root = TempDir::new().unwrap();
        let config = job_config(root.path(), "");
        let materializer = FsMaterializer::load(&OutputConfig {
            job_subdir_key: None,
            ..OutputConfig::default()
        });

        assert_eq!(
            materializer.output_dir(&config).unwrap(),
            root.path().join("sweep")
        );
    }
}
