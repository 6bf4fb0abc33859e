use clap::Parser;
use hpc_launcher::{
    config::{ConfigErrors, LauncherConfig},
    job_config::{JobConfig, JobConfigError},
    launcher::{LaunchContext, LaunchError, Launcher},
    materialize::FsMaterializer,
    overrides::OverrideError,
    resolver::OverrideResolver,
    scheduler::ShellScheduler,
    sweep,
};
use std::{fs, path::PathBuf, process::exit};
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error("Failed to read base config {path:?}: {source}")]
    ReadBase {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Base config {path:?} is invalid: {source}")]
    ParseBase {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("Base config is invalid: {0}")]
    Base(#[from] JobConfigError),
    #[error("Invalid sweep: {0}")]
    Sweep(#[from] OverrideError),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("Failed to print results: {0}")]
    Output(#[from] serde_yaml::Error),
}

/// Submit one HPC job per override combination
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// launcher settings (YAML), defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// base task configuration (YAML) the overrides are applied to
    #[arg(short, long)]
    base: Option<PathBuf>,
    /// script submitted for every job unless overridden with +launch.script=
    #[arg(short, long)]
    script: String,
    /// job name prefix, jobs are named <label>_<index>
    #[arg(short, long)]
    label: String,
    #[arg(long, default_value_t = 0)]
    initial_job_idx: usize,
    /// key=value overrides, comma separated values are swept
    overrides: Vec<String>,
}

fn load_base(args: &Args) -> Result<JobConfig, CliError> {
    let task = match args.base {
        Some(ref path) => {
            let content = fs::read_to_string(path).map_err(|source| CliError::ReadBase {
                path: path.clone(),
                source,
            })?;

            serde_yaml::from_str(&content).map_err(|source| CliError::ParseBase {
                path: path.clone(),
                source,
            })?
        }
        None => serde_yaml::Value::Null,
    };

    Ok(JobConfig::new(task, &args.label)?)
}

fn run(args: Args) -> Result<(), CliError> {
    let config = match args.config {
        Some(ref path) => LauncherConfig::load(path)?,
        None => LauncherConfig::default(),
    };

    if config.preflight_checks() {
        return Err(ConfigErrors::PreflightFailed.into());
    }

    let base = load_base(&args)?;
    let runs = sweep::expand(&args.overrides)?;
    info!("Launching {} job(s) for {}", runs.len(), args.label);

    let mut launcher = Launcher::new(config.launch.clone(), ShellScheduler::load(&config.submit))
        .with_policy(config.submit.on_unparsed_response)
        .with_entry(args.script.clone());
    launcher.setup(
        base,
        args.label.clone(),
        LaunchContext::new(
            Box::new(OverrideResolver),
            Box::new(FsMaterializer::load(&config.output)),
        ),
    );

    let results = launcher.launch(&runs, args.initial_job_idx)?;
    print!("{}", serde_yaml::to_string(&results)?);

    Ok(())
}

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(error) = run(Args::parse()) {
        error!("{error}");

        exit(1)
    }
}
