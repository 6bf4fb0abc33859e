use crate::{
    job_config::{JobConfig, JobConfigError, JOB_ID_KEY, JOB_NUM_KEY},
    materialize::{MaterializeError, Materializer},
    overrides::OverrideToken,
    resolver::{ConfigResolver, ResolveError},
    response::JobId,
};
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Failed to resolve job config: {0}")]
    Resolve(#[from] ResolveError),
    #[error("Failed to stamp job config: {0}")]
    Stamp(#[from] JobConfigError),
    #[error("Failed to save job config: {0}")]
    Materialize(#[from] MaterializeError),
}

/// Resolves, stamps and persists the configuration of a submitted job
#[derive(Debug, Clone, Copy)]
pub struct RunRecorder<'a> {
    resolver: &'a dyn ConfigResolver,
    materializer: &'a dyn Materializer,
}

impl<'a> RunRecorder<'a> {
    pub fn new(resolver: &'a dyn ConfigResolver, materializer: &'a dyn Materializer) -> Self {
        Self {
            resolver,
            materializer,
        }
    }

    /// Launch overrides are filtered out here, they never become part of the config.
    /// `idx` is the position within the batch, not the global job index.
    pub fn record(
        &self,
        base: &JobConfig,
        overrides: &[OverrideToken],
        job_id: &JobId,
        idx: usize,
    ) -> Result<(JobConfig, PathBuf), RecordError> {
        let task_overrides = overrides
            .iter()
            .filter(|token| !token.is_launch())
            .cloned()
            .collect::<Vec<_>>();

        let mut config = self.resolver.resolve(base, &task_overrides)?;
        config.set(JOB_ID_KEY, job_id.as_str())?;
        config.set(JOB_NUM_KEY, idx as u64)?;

        let output_dir = self.materializer.materialize(&mut config)?;
        debug!(job_id = %job_id, output_dir = ?output_dir, "Recorded job config");

        Ok((config, output_dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        job_config::{OUTPUT_DIR_KEY, RUNTIME_KEY},
        overrides::parse_all,
        resolver::OverrideResolver,
    };
    use serde_yaml::Value;

    /// keeps everything in memory, stamps a fixed output dir
    #[derive(Debug)]
    struct MemoryMaterializer;

    impl Materializer for MemoryMaterializer {
        fn materialize(&self, config: &mut JobConfig) -> Result<PathBuf, MaterializeError> {
            config.with_writable(RUNTIME_KEY, |config| config.set(OUTPUT_DIR_KEY, "/memory"))?;

            Ok(PathBuf::from("/memory"))
        }
    }

    #[test]
    fn stamps_id_and_batch_index() {
        let base = JobConfig::new(serde_yaml::from_str("lr: 0.1").unwrap(), "train").unwrap();
        let recorder = RunRecorder::new(&OverrideResolver, &MemoryMaterializer);
        let overrides = parse_all(["lr=0.5", "+launch.debug=1"]).unwrap();

        let (config, output_dir) = recorder
            .record(&base, &overrides, &JobId::new("991"), 4)
            .unwrap();

        assert_eq!(output_dir, PathBuf::from("/memory"));
        assert_eq!(config.job_id(), Some("991"));
        assert_eq!(config.job_num(), Some(4));
        assert_eq!(config.select("lr"), Some(&Value::from(0.5)));
        assert!(!config.contains("debug"));
        assert_eq!(
            config.task_overrides(),
            Value::Sequence(vec![Value::from("lr=0.5")])
        );
    }

    #[test]
    fn resolver_errors_are_passed_on() {
        let base = JobConfig::new(Value::Null, "train").unwrap();
        let recorder = RunRecorder::new(&OverrideResolver, &MemoryMaterializer);

        let error = recorder
            .record(&base, &parse_all(["epochs=3"]).unwrap(), &JobId::failed(), 0)
            .unwrap_err();

        assert!(matches!(error, RecordError::Resolve(ResolveError::UnknownKey(_))));
    }
}
