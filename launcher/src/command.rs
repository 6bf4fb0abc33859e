use crate::{
    config::{LaunchSettings, PackageManager},
    overrides::{sanitize, take_script, OverrideToken},
};
use std::{fmt, path::Path};

pub const SCHEDULER_PROGRAM: &str = "hpc";
pub const SCHEDULER_SUBCOMMAND: &str = "run";

/// One run of a batch, consumed exactly once by the launcher
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunRequest {
    pub overrides: Vec<OverrideToken>,
    // position within the batch
    pub idx: usize,
    // initial_job_idx + idx, used for naming
    pub global_idx: usize,
}

impl RunRequest {
    /// `None` if the global index does not fit into a usize
    pub fn new(overrides: Vec<OverrideToken>, idx: usize, initial_job_idx: usize) -> Option<Self> {
        Some(Self {
            overrides,
            idx,
            global_idx: initial_job_idx.checked_add(idx)?,
        })
    }
}

/// Argument vector for a single scheduler submission
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchCommand {
    argv: Vec<String>,
}

impl LaunchCommand {
    pub fn from_argv(argv: Vec<String>) -> Self {
        Self { argv }
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// value following `flag`, if the flag is present
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.argv
            .iter()
            .position(|arg| arg == flag)
            .and_then(|position| self.argv.get(position + 1))
            .map(String::as_str)
    }

    /// single shell command line, every argument quoted as needed
    pub fn render(&self) -> String {
        self.argv
            .iter()
            .map(|arg| shell_quote(arg))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// POSIX single quote an argument unless it only contains shell inert characters
pub fn shell_quote(arg: &str) -> String {
    if arg.is_empty() {
        "''".to_string()
    } else if arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:=,@%+".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\"'\"'"))
    }
}

/// Packaged entry points (no extension, living in a `bin` directory) are run through the
/// package manager's wrapper, e.g. `.venv/bin/train` becomes `urun:train`
pub fn resolve_script(script: &str, package_manager: PackageManager) -> String {
    let path = Path::new(script);
    let in_bin = path
        .parent()
        .and_then(Path::file_name)
        .map_or(false, |name| name == "bin");

    match path.file_name() {
        Some(name) if in_bin && path.extension().is_none() => {
            format!("{}:{}", package_manager.tag(), name.to_string_lossy())
        }
        _ => script.to_string(),
    }
}

/// A prepared submission: the command plus the overrides left for the task config
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedRun {
    pub job_name: String,
    pub script: String,
    pub command: LaunchCommand,
    // request overrides with the script override removed
    pub overrides: Vec<OverrideToken>,
}

/// Builds scheduler submissions, a pure function of its inputs
#[derive(Clone, Debug)]
pub struct CommandBuilder<'a> {
    settings: &'a LaunchSettings,
    job_label: &'a str,
    entry: &'a str,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(settings: &'a LaunchSettings, job_label: &'a str, entry: &'a str) -> Self {
        Self {
            settings,
            job_label,
            entry,
        }
    }

    pub fn job_name(&self, request: &RunRequest) -> String {
        format!("{}_{}", self.job_label, request.global_idx)
    }

    pub fn build(&self, request: &RunRequest) -> PreparedRun {
        let mut overrides = request.overrides.clone();
        let script = take_script(&mut overrides).unwrap_or_else(|| self.entry.to_string());
        let script = resolve_script(&script, self.settings.package_manager);
        let job_name = self.job_name(request);
        let script_args = sanitize(&overrides).joined();

        let mut argv = vec![
            SCHEDULER_PROGRAM.to_string(),
            SCHEDULER_SUBCOMMAND.to_string(),
            "--job_name".to_string(),
            job_name.clone(),
            "--job_script".to_string(),
            script.clone(),
            "--job_script_args".to_string(),
            script_args,
            "--template".to_string(),
            self.settings.template.to_string(),
            "--ncpus".to_string(),
            self.settings.ncpus.to_string(),
            "--memory".to_string(),
            self.settings.memory.to_string(),
            "--ngpus".to_string(),
            self.settings.ngpus.to_string(),
            // the scheduler only accepts the walltime joined with '='
            format!("--walltime={}", self.settings.walltime),
        ];

        if !self.settings.queue.is_unset() {
            argv.push("--queue".to_string());
            argv.push(self.settings.queue.to_string());
        }

        PreparedRun {
            job_name,
            script,
            command: LaunchCommand::from_argv(argv),
            overrides,
        }
    }
}
