//! # tfprobe_core
//!
//! Staging and execution sequencing for Terraform module tests.
//!
//! A [`ModuleDescriptor`] names the module under test. [`ModuleExecution`]
//! copies it to a temporary directory, runs init/validate/plan/apply
//! against the copy, optionally runs a [`ProvisionCheck`], and always
//! destroys what it created.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tfprobe_core::{ExecutionOutcome, ModuleDescriptor, ModuleExecution};
//! use tfprobe_runner::{CliRunner, CliRunnerOptions};
//!
//! #[tokio::test]
//! async fn storage_module() {
//!     let mut module = ModuleDescriptor::new("../", "examples/azure/tf-storage")
//!         .variable("account_tier", "Standard")
//!         .variable("account_replication_type", "LRS");
//!
//!     let execution = ModuleExecution::new(Arc::new(CliRunner::new(CliRunnerOptions::default())));
//!     let outcome = execution.execute(&mut module, true).await.unwrap();
//!
//!     assert_eq!(outcome, ExecutionOutcome::Successful);
//! }
//! ```

pub mod error;
pub mod module;
pub mod sequencer;
pub mod staging;
pub mod terraform;

pub use error::{CheckError, CoreError, CoreResult};
pub use module::{ExecutionOutcome, ModuleDescriptor, DEFAULT_MODULE_PATH, DEFAULT_ROOT_FOLDER_PATH};
pub use sequencer::{ExecutionReport, ModuleExecution, ProvisionCheck, Step, StepRecord};
pub use staging::{stage, StagedOptions, StagingOptions};
pub use terraform::{
    command_args, format_var, parse_outputs, required_output, Terraform, TerraformCommand,
    TerraformConfig, TerraformResult,
};
