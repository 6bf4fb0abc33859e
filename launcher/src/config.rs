use crate::job_config::{SWEEP_DIR_KEY, SWEEP_SUBDIR_KEY};
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::Path, time::Duration};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read launcher config: {0}")]
    ReadFailed(#[from] std::io::Error),
    #[error("Launcher config is invalid: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),
    #[error("Launcher config failed preflight checks")]
    PreflightFailed,
}

/// Queue a job is submitted to, `Default` leaves the choice to the scheduler
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Queue {
    #[serde(rename = "DEFAULT", alias = "default")]
    Default,
    #[default]
    #[serde(rename = "DSML")]
    Dsml,
    #[serde(rename = "CUDA")]
    Cuda,
}

impl Queue {
    /// whether `--queue` should be passed at all
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Default)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::Dsml => "DSML",
            Self::Cuda => "CUDA",
        }
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hardware/software profile the scheduler prepares for a job
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Template {
    #[serde(rename = "DSML")]
    Dsml,
    #[serde(rename = "GTX1080")]
    Gtx1080,
    #[default]
    #[serde(rename = "RTX6000")]
    Rtx6000,
    #[serde(rename = "RTX8000")]
    Rtx8000,
    #[serde(rename = "A100_40GB")]
    A100With40Gb,
    #[serde(rename = "A100_80GB")]
    A100With80Gb,
}

impl Template {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dsml => "DSML",
            Self::Gtx1080 => "GTX1080",
            Self::Rtx6000 => "RTX6000",
            Self::Rtx8000 => "RTX8000",
            Self::A100With40Gb => "A100_40GB",
            Self::A100With80Gb => "A100_80GB",
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wrapper the scheduler uses to run packaged (extensionless, `bin/`) scripts
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    #[default]
    Uv,
    Poetry,
}

impl PackageManager {
    /// prefix understood by the scheduler, e.g. `urun:train`
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Uv => "urun",
            Self::Poetry => "prun",
        }
    }
}

/// What to do when the scheduler exits cleanly but prints no job id
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnparsedResponsePolicy {
    /// keep the run as completed with the "Failed" job id
    #[default]
    Accept,
    /// mark the run as failed, its config is still recorded
    MarkFailed,
    /// abort the whole batch
    Abort,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LaunchSettings {
    #[serde(default)]
    pub queue: Queue,
    #[serde(default = "default_ncpus")]
    pub ncpus: u32,
    // memory in GB
    #[serde(default = "default_memory")]
    pub memory: u32,
    #[serde(default = "default_ngpus")]
    pub ngpus: u32,
    // scheduler specific duration, "-1:00:00" means no limit
    #[serde(default = "default_walltime")]
    pub walltime: String,
    #[serde(default)]
    pub template: Template,
    #[serde(default)]
    pub package_manager: PackageManager,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            queue: Queue::default(),
            ncpus: default_ncpus(),
            memory: default_memory(),
            ngpus: default_ngpus(),
            walltime: default_walltime(),
            template: Template::default(),
            package_manager: PackageManager::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SubmitConfig {
    // shell used to interpret the rendered command line
    #[serde(default = "default_shell")]
    pub shell: String,
    // seconds, none blocks until the scheduler cli returns
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub on_unparsed_response: UnparsedResponsePolicy,
}

impl SubmitConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            timeout: None,
            on_unparsed_response: UnparsedResponsePolicy::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default = "default_job_dir_key")]
    pub job_dir_key: String,
    // no subdir key means the output dir is the job dir itself
    #[serde(default = "default_job_subdir_key")]
    pub job_subdir_key: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            job_dir_key: default_job_dir_key(),
            job_subdir_key: default_job_subdir_key(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LauncherConfig {
    #[serde(default)]
    pub launch: LaunchSettings,
    #[serde(default)]
    pub submit: SubmitConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl LauncherConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let content = fs::read_to_string(path)?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigErrors> {
        // an empty file is a valid config with every default
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        Ok(serde_yaml::from_str(content)?)
    }

    /// check all settings and log every problem instead of stopping at the first one,
    /// returns true if any error was found
    pub fn preflight_checks(&self) -> bool {
        let mut contains_error = false;

        if self.launch.ncpus == 0 {
            error!("launch.ncpus must be a positive number");
            contains_error = true;
        }

        if self.launch.memory == 0 {
            error!("launch.memory must be a positive number of GB");
            contains_error = true;
        }

        let walltime = self.launch.walltime.as_str();
        if walltime.is_empty() || walltime.contains(char::is_whitespace) {
            error!("launch.walltime ({walltime:?}) must be a non-empty duration without whitespace");
            contains_error = true;
        }

        if self.submit.shell.trim().is_empty() {
            error!("submit.shell must name a shell to run the scheduler command with");
            contains_error = true;
        }

        if self.submit.timeout == Some(0) {
            warn!("submit.timeout is 0, every submission will time out immediately");
        }

        if self.output.job_dir_key.is_empty() {
            error!("output.job_dir_key cannot be empty");
            contains_error = true;
        }

        contains_error
    }
}

fn default_ncpus() -> u32 {
    2
}

fn default_memory() -> u32 {
    16
}

fn default_ngpus() -> u32 {
    1
}

fn default_walltime() -> String {
    "-1:00:00".to_string()
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_job_dir_key() -> String {
    SWEEP_DIR_KEY.to_string()
}

fn default_job_subdir_key() -> Option<String> {
    Some(SWEEP_SUBDIR_KEY.to_string())
}
