//! # tfprobe_health
//!
//! Post-apply health validation for Azure resources.
//!
//! [`HealthValidator`] reads the `subscriptionId`, `resourceId` and
//! `resourceName` outputs of an applied module, obtains a management token
//! from the first configured credential source, and asks Azure Resource
//! Health whether the resource is available. It plugs into
//! [`tfprobe_core::ModuleExecution`] as a [`tfprobe_core::ProvisionCheck`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tfprobe_core::{ModuleDescriptor, ModuleExecution};
//! use tfprobe_health::{HealthClientConfig, HealthValidator};
//! use tfprobe_runner::{CliRunner, CliRunnerOptions};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let runner = Arc::new(CliRunner::new(CliRunnerOptions::default()));
//! let validator = HealthValidator::azure(runner.clone(), HealthClientConfig::default())?;
//!
//! let mut module = ModuleDescriptor::new("../", "examples/azure/tf-storage");
//! let outcome = ModuleExecution::new(runner)
//!     .execute_with_check(&mut module, true, Some(&validator))
//!     .await?;
//! println!("{}", outcome);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod credential;
pub mod error;
pub mod validator;

pub use client::{
    parse_status, AvailabilityState, AvailabilityStatus, HealthApi, HealthClientConfig,
    ResourceHealthClient, DEFAULT_ENDPOINT, RESOURCE_HEALTH_API_VERSION,
};
pub use credential::{
    AccessToken, AzureCliCredential, ChainedCredential, ClientSecret, CredentialProvider,
    EnvironmentCredential, FileCredential, DEFAULT_AUTHORITY, MANAGEMENT_RESOURCE,
    MANAGEMENT_SCOPE,
};
pub use error::{HealthError, HealthResult};
pub use validator::{
    HealthTarget, HealthValidator, RESOURCE_ID_OUTPUT, RESOURCE_NAME_OUTPUT,
    SUBSCRIPTION_ID_OUTPUT,
};
