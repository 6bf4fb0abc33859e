use crate::{
    command::{CommandBuilder, RunRequest},
    config::{LaunchSettings, UnparsedResponsePolicy},
    job_config::JobConfig,
    materialize::Materializer,
    overrides::{OverrideError, OverrideToken},
    record::{RecordError, RunRecorder},
    resolver::ConfigResolver,
    response::{JobId, ResponseParser, SubmittedIdParser},
    scheduler::{Scheduler, SchedulerError},
};
use serde::Serialize;
use std::{env, path::PathBuf};
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Launcher was used before setup")]
    NotSetUp,
    #[error("Invalid override in run {idx}: {source}")]
    Override { idx: usize, source: OverrideError },
    #[error("Job index of run {idx} overflows, initial job index is {initial_job_idx}")]
    JobIndexOverflow { idx: usize, initial_job_idx: usize },
    #[error("Submission of {job_name} failed: {source}")]
    Scheduler {
        job_name: String,
        source: SchedulerError,
    },
    #[error("Scheduler gave no job id for {job_name}, output: {stdout:?}")]
    UnparsedResponse { job_name: String, stdout: String },
    #[error("Failed to record {job_name}: {source}")]
    Record {
        job_name: String,
        source: RecordError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Completed,
    Failed,
}

/// Outcome of one submitted run
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    // the run's overrides with the script override removed
    pub overrides: Vec<OverrideToken>,
    pub status: JobStatus,
    pub job_id: JobId,
    pub output_dir: PathBuf,
    #[serde(skip)]
    pub config: JobConfig,
}

/// Collaborators needed to turn overrides into persisted job configs
#[derive(Debug)]
pub struct LaunchContext {
    pub resolver: Box<dyn ConfigResolver>,
    pub materializer: Box<dyn Materializer>,
}

impl LaunchContext {
    pub fn new(resolver: Box<dyn ConfigResolver>, materializer: Box<dyn Materializer>) -> Self {
        Self {
            resolver,
            materializer,
        }
    }
}

#[derive(Debug)]
struct Setup {
    base: JobConfig,
    job_label: String,
    context: LaunchContext,
}

/// Submits one scheduler job per override set, strictly one after the other
#[derive(Debug)]
pub struct Launcher<S> {
    settings: LaunchSettings,
    policy: UnparsedResponsePolicy,
    scheduler: S,
    parser: Box<dyn ResponseParser>,
    // script submitted when a run has no script override
    entry: String,
    setup: Option<Setup>,
}

/// path this process was started with, like a shell's `$0`
fn process_entry() -> String {
    env::args_os()
        .next()
        .map(|entry| entry.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl<S: Scheduler> Launcher<S> {
    pub fn new(settings: LaunchSettings, scheduler: S) -> Self {
        Self {
            settings,
            policy: UnparsedResponsePolicy::default(),
            scheduler,
            parser: Box::new(SubmittedIdParser),
            entry: process_entry(),
            setup: None,
        }
    }

    pub fn with_policy(mut self, policy: UnparsedResponsePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_parser(mut self, parser: Box<dyn ResponseParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }

    /// `job_label` names the jobs, `<label>_<global index>`
    pub fn setup(&mut self, base: JobConfig, job_label: impl Into<String>, context: LaunchContext) {
        self.setup = Some(Setup {
            base,
            job_label: job_label.into(),
            context,
        });
    }

    /// Submit every override set in order. The first failing submission aborts the batch,
    /// runs after it are never submitted.
    #[instrument(skip_all, fields(runs = job_overrides.len(), initial_job_idx = initial_job_idx))]
    pub fn launch<T: AsRef<str>>(
        &self,
        job_overrides: &[Vec<T>],
        initial_job_idx: usize,
    ) -> Result<Vec<RunResult>, LaunchError> {
        let setup = self.setup.as_ref().ok_or(LaunchError::NotSetUp)?;

        // validate the whole batch before anything is submitted
        let requests = job_overrides
            .iter()
            .enumerate()
            .map(|(idx, raw)| {
                let overrides = raw
                    .iter()
                    .map(|token| OverrideToken::parse(token.as_ref()))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|source| LaunchError::Override { idx, source })?;

                RunRequest::new(overrides, idx, initial_job_idx)
                    .ok_or(LaunchError::JobIndexOverflow {
                        idx,
                        initial_job_idx,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let builder = CommandBuilder::new(&self.settings, &setup.job_label, &self.entry);
        let recorder = RunRecorder::new(
            setup.context.resolver.as_ref(),
            setup.context.materializer.as_ref(),
        );

        let mut results = Vec::with_capacity(requests.len());

        for request in requests {
            let prepared = builder.build(&request);
            let job_name = prepared.job_name;

            info!("Submitting job with command: {}", prepared.command);
            let submission =
                self.scheduler
                    .submit(&prepared.command)
                    .map_err(|source| LaunchError::Scheduler {
                        job_name: job_name.clone(),
                        source,
                    })?;

            let job_id = self.parser.parse(&submission.stdout);
            let status = if job_id.is_failed() {
                warn!(job_name = %job_name, stdout = %submission.stdout, "Scheduler response contained no job id");

                match self.policy {
                    UnparsedResponsePolicy::Accept => JobStatus::Completed,
                    UnparsedResponsePolicy::MarkFailed => JobStatus::Failed,
                    UnparsedResponsePolicy::Abort => {
                        return Err(LaunchError::UnparsedResponse {
                            job_name,
                            stdout: submission.stdout,
                        })
                    }
                }
            } else {
                info!(job_name = %job_name, job_id = %job_id, "Job submitted");
                JobStatus::Completed
            };

            let (config, output_dir) = recorder
                .record(&setup.base, &prepared.overrides, &job_id, request.idx)
                .map_err(|source| LaunchError::Record {
                    job_name: job_name.clone(),
                    source,
                })?;

            results.push(RunResult {
                overrides: prepared.overrides,
                status,
                job_id,
                output_dir,
                config,
            });
        }

        Ok(results)
    }
}

#[cfg(test)]
#[path = "launcher_test.rs"]
mod launcher_test;
