//! Run command - Execute the modules of a suite.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

use tfprobe_core::{
    ExecutionOutcome, ModuleDescriptor, ModuleExecution, ProvisionCheck, StagingOptions,
    TerraformConfig,
};
use tfprobe_health::{HealthClientConfig, HealthValidator};
use tfprobe_runner::CommandRunner;

use crate::config::{suite_base_dir, SuiteConfig, DEFAULT_SUITE_FILE};
use crate::report::{print_run, print_summary, ModuleRun};

#[derive(Args)]
pub struct RunArgs {
    /// Suite file (YAML, or TOML by extension)
    #[arg(short, long, default_value = DEFAULT_SUITE_FILE, env = "TFPROBE_SUITE")]
    pub suite: PathBuf,

    /// Only run these modules (repeatable)
    #[arg(short, long = "module", value_name = "NAME")]
    pub modules: Vec<String>,

    /// Modules run in parallel
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub jobs: u16,

    /// Log terraform commands without running them
    #[arg(long)]
    pub dry_run: bool,

    /// Keep staged copies on disk
    #[arg(long)]
    pub keep_staging: bool,
}

/// Everything a module run needs besides its descriptor.
#[derive(Clone)]
pub(crate) struct RunSettings {
    pub runner: Arc<dyn CommandRunner>,
    pub terraform: TerraformConfig,
    pub staging: StagingOptions,
    /// Shared health check; `None` in dry-run mode
    pub validator: Option<Arc<HealthValidator>>,
}

/// Module queued for execution.
pub(crate) struct ModuleJob {
    pub name: String,
    pub descriptor: ModuleDescriptor,
    pub static_analysis: bool,
    pub health_check: bool,
}

pub async fn execute(args: RunArgs) -> Result<ExecutionOutcome> {
    let suite = SuiteConfig::load(&args.suite)?;
    let selected = suite.select(&args.modules)?;
    if selected.is_empty() {
        anyhow::bail!("Suite {} has no modules", args.suite.display());
    }

    let base = suite_base_dir(&args.suite);
    let runner = super::command_runner(args.dry_run);
    let settings = RunSettings {
        validator: health_validator(runner.clone(), &suite.health, args.dry_run)?,
        runner,
        terraform: suite.terraform.terraform_config(),
        staging: suite.terraform.staging_options(args.keep_staging),
    };

    let jobs = selected
        .into_iter()
        .map(|entry| ModuleJob {
            name: entry.name.clone(),
            descriptor: entry.descriptor(&base),
            static_analysis: entry.static_analysis,
            health_check: entry.health_check,
        })
        .collect();

    let runs = run_all(jobs, &settings, usize::from(args.jobs)).await?;
    for run in &runs {
        print_run(run);
    }
    Ok(print_summary(&runs))
}

/// Health validator for the run, unless terraform is not really executed.
pub(crate) fn health_validator(
    runner: Arc<dyn CommandRunner>,
    config: &HealthClientConfig,
    dry_run: bool,
) -> Result<Option<Arc<HealthValidator>>> {
    if dry_run {
        return Ok(None);
    }
    let validator = HealthValidator::azure(runner, config.clone())
        .context("Failed to set up the resource health client")?;
    Ok(Some(Arc::new(validator)))
}

/// Run `jobs` with at most `parallelism` in flight, returning them in input order.
///
/// A panicking module task does not stop the others; every task is joined
/// before the panic is reported.
pub(crate) async fn run_all(
    jobs: Vec<ModuleJob>,
    settings: &RunSettings,
    parallelism: usize,
) -> Result<Vec<ModuleRun>> {
    let total = jobs.len();
    let parallelism = parallelism.max(1);
    info!("Running {} module(s), {} at a time", total, parallelism);

    let mut set = JoinSet::new();
    let mut finished: Vec<(usize, ModuleRun)> = Vec::with_capacity(total);
    let mut panicked = 0;

    for (index, job) in jobs.into_iter().enumerate() {
        while set.len() >= parallelism {
            if let Some(joined) = set.join_next().await {
                collect(joined, &mut finished, &mut panicked);
            }
        }
        let settings = settings.clone();
        set.spawn(async move { (index, run_module(job, &settings).await) });
    }
    while let Some(joined) = set.join_next().await {
        collect(joined, &mut finished, &mut panicked);
    }

    if panicked > 0 {
        anyhow::bail!("{} module task(s) panicked", panicked);
    }

    finished.sort_by_key(|(index, _)| *index);
    Ok(finished.into_iter().map(|(_, run)| run).collect())
}

fn collect(
    joined: std::result::Result<(usize, ModuleRun), JoinError>,
    finished: &mut Vec<(usize, ModuleRun)>,
    panicked: &mut usize,
) {
    match joined {
        Ok(run) => finished.push(run),
        Err(e) => {
            error!("Module task panicked: {}", e);
            *panicked += 1;
        }
    }
}

/// Stage, provision, optionally health check, and destroy one module.
pub(crate) async fn run_module(job: ModuleJob, settings: &RunSettings) -> ModuleRun {
    let ModuleJob {
        name,
        mut descriptor,
        static_analysis,
        health_check,
    } = job;

    let execution = ModuleExecution::new(settings.runner.clone())
        .with_terraform_config(settings.terraform.clone())
        .with_staging_options(settings.staging.clone());

    let check = match (&settings.validator, health_check) {
        (Some(validator), true) => Some(validator.as_ref() as &dyn ProvisionCheck),
        (None, true) => {
            warn!("Skipping health check of {} in dry-run mode", name);
            None
        }
        _ => None,
    };
    let (report, result) = execution
        .execute_reported(&mut descriptor, static_analysis, check)
        .await;

    ModuleRun {
        name,
        report,
        result,
    }
}
