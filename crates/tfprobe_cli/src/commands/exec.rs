//! Exec command - Run one module given on the command line.

use std::collections::BTreeMap;

use anyhow::Result;
use clap::Args;
use tracing::info;

use tfprobe_core::{ExecutionOutcome, ModuleDescriptor, StagingOptions, TerraformConfig};
use tfprobe_health::HealthClientConfig;

use super::parse_key_val;
use super::run::{health_validator, run_module, ModuleJob, RunSettings};
use crate::report::{print_run, print_summary};

#[derive(Args)]
pub struct ExecArgs {
    /// Folder copied to the staging directory
    #[arg(long, default_value = tfprobe_core::DEFAULT_ROOT_FOLDER_PATH)]
    pub root: String,

    /// Module path inside the root folder
    #[arg(long, default_value = tfprobe_core::DEFAULT_MODULE_PATH)]
    pub module_path: String,

    /// Input variable (repeatable)
    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_key_val)]
    pub vars: Vec<(String, String)>,

    /// Backend config passed to init (repeatable)
    #[arg(long = "backend-config", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub backend_config: Vec<(String, String)>,

    /// Run validate and plan before apply
    #[arg(long)]
    pub static_analysis: bool,

    /// Check Azure resource health after apply
    #[arg(long)]
    pub health_check: bool,

    /// Terraform binary
    #[arg(long, default_value = "terraform", env = "TFPROBE_TERRAFORM")]
    pub terraform: String,

    /// Per-command timeout in seconds (0 = none)
    #[arg(long, default_value_t = 3600)]
    pub timeout: u64,

    /// Copy .terraform.lock.hcl into the staged copy
    #[arg(long)]
    pub copy_lock_file: bool,

    /// Stream terraform output while it runs
    #[arg(long)]
    pub stream: bool,

    /// Log terraform commands without running them
    #[arg(long)]
    pub dry_run: bool,

    /// Keep the staged copy on disk
    #[arg(long)]
    pub keep_staging: bool,
}

impl ExecArgs {
    fn descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor {
            root_folder_path: self.root.clone(),
            module_path: self.module_path.clone(),
            variables: self
                .vars
                .iter()
                .map(|(k, v)| (k.clone(), v.clone().into()))
                .collect(),
            backend_config: self.backend_config.iter().cloned().collect::<BTreeMap<_, _>>(),
            env: BTreeMap::new(),
        }
    }
}

pub async fn execute(args: ExecArgs) -> Result<ExecutionOutcome> {
    let descriptor = args.descriptor();
    info!("Executing {}", descriptor.label());

    let runner = super::command_runner(args.dry_run);
    let validator = if args.health_check {
        health_validator(runner.clone(), &HealthClientConfig::default(), args.dry_run)?
    } else {
        None
    };
    let settings = RunSettings {
        runner,
        terraform: TerraformConfig {
            binary: args.terraform.clone(),
            container: None,
            timeout_seconds: args.timeout,
            stream_logs: args.stream,
        },
        staging: StagingOptions {
            copy_lock_file: args.copy_lock_file,
            keep: args.keep_staging,
            temp_root: None,
        },
        validator,
    };

    let job = ModuleJob {
        name: descriptor.label(),
        descriptor,
        static_analysis: args.static_analysis,
        health_check: args.health_check,
    };

    let run = run_module(job, &settings).await;
    print_run(&run);
    Ok(print_summary(std::slice::from_ref(&run)))
}
