pub mod command;
pub mod config;
pub mod job_config;
pub mod launcher;
pub mod materialize;
pub mod overrides;
pub mod record;
pub mod resolver;
pub mod response;
pub mod scheduler;
pub mod sweep;

pub use command::{CommandBuilder, LaunchCommand, RunRequest};
pub use config::{LaunchSettings, LauncherConfig};
pub use job_config::JobConfig;
pub use launcher::{JobStatus, LaunchContext, LaunchError, Launcher, RunResult};
pub use response::JobId;
pub use scheduler::{Scheduler, ShellScheduler};
