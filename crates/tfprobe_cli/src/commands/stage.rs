//! Stage command - Copy a module without running terraform.

use anyhow::{Context, Result};
use clap::Args;

use tfprobe_core::{stage, ModuleDescriptor, StagingOptions};

#[derive(Args)]
pub struct StageArgs {
    /// Folder copied to the staging directory
    #[arg(long, default_value = tfprobe_core::DEFAULT_ROOT_FOLDER_PATH)]
    pub root: String,

    /// Module path inside the root folder
    #[arg(long, default_value = tfprobe_core::DEFAULT_MODULE_PATH)]
    pub module_path: String,

    /// Copy .terraform.lock.hcl into the staged copy
    #[arg(long)]
    pub copy_lock_file: bool,
}

pub async fn execute(args: StageArgs) -> Result<()> {
    let mut module = ModuleDescriptor::new(args.root, args.module_path);
    module.resolve_defaults();
    let options = StagingOptions {
        copy_lock_file: args.copy_lock_file,
        keep: true,
        temp_root: None,
    };

    let label = module.label();
    let staged = tokio::task::spawn_blocking(move || stage(&module, &options))
        .await
        .context("Staging task failed")?
        .with_context(|| format!("Failed to stage {}", label))?;

    println!("{}", staged.working_dir.display());
    Ok(())
}
