use crate::{command::LaunchCommand, config::SubmitConfig};
use nix::{
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
use std::{
    io::Read,
    os::unix::process::CommandExt,
    process::{Child, Command, ExitStatus, Stdio},
    thread::{self, JoinHandle},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, error, instrument, trace};
use wait_timeout::ChildExt;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Failed to spawn scheduler command: {0}")]
    Spawn(std::io::Error),
    #[error("Failed to wait for the scheduler command: {0}")]
    Wait(#[from] std::io::Error),
    #[error("Scheduler command exited with {status}: {stderr}")]
    NonZeroExit {
        status: ExitStatus,
        stdout: String,
        stderr: String,
    },
    #[error("Scheduler command did not finish within {0:?}")]
    Timeout(Duration),
}

/// Captured output of a scheduler invocation that exited successfully
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submission {
    pub stdout: String,
    pub stderr: String,
}

/// Capability to hand a command to the external scheduler
pub trait Scheduler {
    fn submit(&self, command: &LaunchCommand) -> Result<Submission, SchedulerError>;
}

impl<S: Scheduler + ?Sized> Scheduler for &S {
    fn submit(&self, command: &LaunchCommand) -> Result<Submission, SchedulerError> {
        (**self).submit(command)
    }
}

/// Runs the rendered command line through a shell and blocks until it returns
#[derive(Debug, Clone)]
pub struct ShellScheduler {
    shell: String,
    timeout: Option<Duration>,
}

impl Default for ShellScheduler {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            timeout: None,
        }
    }
}

impl ShellScheduler {
    pub fn load(config: &SubmitConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            timeout: config.timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus, SchedulerError> {
        match self.timeout {
            None => Ok(child.wait()?),
            Some(timeout) => match child.wait_timeout(timeout)? {
                Some(status) => Ok(status),
                None => {
                    debug!(pid = child.id(), "Scheduler command ran into timeout, killing it");

                    // the shell leads its own process group, anything it forked goes with it
                    if let Err(error) = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
                        error!(error = ?error, "Failed to kill timed out scheduler command");
                        let _ = child.kill();
                    }
                    child.wait()?;

                    Err(SchedulerError::Timeout(timeout))
                }
            },
        }
    }
}

/// drain a pipe on its own thread so a chatty child never blocks on a full buffer
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();

        if let Some(mut pipe) = pipe {
            if let Err(error) = pipe.read_to_end(&mut buffer) {
                error!(error = ?error, "Failed to read scheduler output");
            }
        }

        String::from_utf8_lossy(&buffer).into_owned()
    })
}

fn collect(handle: JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

impl Scheduler for ShellScheduler {
    #[instrument(skip_all, level = "debug")]
    fn submit(&self, command: &LaunchCommand) -> Result<Submission, SchedulerError> {
        let rendered = command.render();

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&rendered)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(SchedulerError::Spawn)?;

        debug!(pid = child.id(), "Scheduler command spawned");

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let status = self.wait(&mut child);
        let stdout = collect(stdout);
        let stderr = collect(stderr);
        let status = status?;

        trace!(stdout = %stdout, stderr = %stderr, "Scheduler output");

        if !status.success() {
            error!(status = %status, stderr = %stderr, "Scheduler command failed");

            return Err(SchedulerError::NonZeroExit {
                status,
                stdout,
                stderr,
            });
        }

        Ok(Submission { stdout, stderr })
    }
}
