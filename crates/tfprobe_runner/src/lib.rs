//! # tfprobe_runner
//!
//! External command execution for tfprobe.
//!
//! Terraform and the Azure CLI are driven as child processes, either directly
//! on the host or inside a Docker/Podman container.
//!
//! # Features
//!
//! - **Local or containerized**: the same [`CommandSpec`] runs on the host or
//!   in an image such as `hashicorp/terraform`
//! - **Runtime Detection**: Auto-detect Docker vs Podman
//! - **Dry-Run Mode**: Log commands without execution
//! - **CI Integration**: Log formatting compatible with GitHub Actions
//! - **Mock Runner**: For testing without terraform installed
//!
//! # Example
//!
//! ```rust,no_run
//! use tfprobe_runner::{CliRunner, CliRunnerOptions, CommandRunner, CommandSpec, RunConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = CliRunner::new(CliRunnerOptions::default());
//!
//!     let spec = CommandSpec::new("terraform")
//!         .args(["init", "-input=false"])
//!         .workdir("/tmp/module");
//!
//!     let result = runner.run(&spec, &RunConfig::default()).await?;
//!     println!("Exit code: {}", result.exit_code);
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod mock;
pub mod runner;

pub use cli::{CliRunner, CliRunnerOptions, LogHandler, LogLine, LogStream};
pub use config::{CommandSpec, ContainerRuntime, ContainerSpec, RunConfig};
pub use error::{RunnerError, RunnerResult};
pub use mock::{CapturedCall, MockResponse, MockRunner};
pub use runner::{CommandRunner, ExecutionResult};
