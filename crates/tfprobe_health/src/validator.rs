//! Health validation of a provisioned module.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use tfprobe_core::{
    required_output, CheckError, ExecutionOutcome, ProvisionCheck, StagedOptions, Terraform,
};
use tfprobe_runner::CommandRunner;

use crate::client::{HealthApi, HealthClientConfig, ResourceHealthClient};
use crate::credential::{ChainedCredential, CredentialProvider};
use crate::error::{HealthError, HealthResult};

/// Outputs the module under test must declare.
pub const SUBSCRIPTION_ID_OUTPUT: &str = "subscriptionId";
pub const RESOURCE_ID_OUTPUT: &str = "resourceId";
pub const RESOURCE_NAME_OUTPUT: &str = "resourceName";

/// Resource identified from module outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthTarget {
    pub subscription_id: String,
    pub resource_id: String,
    pub resource_name: String,
}

impl HealthTarget {
    /// Read the three required outputs.
    pub async fn from_outputs(terraform: &Terraform, options: &StagedOptions) -> HealthResult<Self> {
        let outputs = terraform.outputs(options).await?;
        Ok(Self {
            subscription_id: required_output(&outputs, SUBSCRIPTION_ID_OUTPUT)?,
            resource_id: required_output(&outputs, RESOURCE_ID_OUTPUT)?,
            resource_name: required_output(&outputs, RESOURCE_NAME_OUTPUT)?,
        })
    }
}

/// Checks that a provisioned resource reports itself as available.
pub struct HealthValidator {
    credential: Arc<dyn CredentialProvider>,
    api: Arc<dyn HealthApi>,
}

impl HealthValidator {
    pub fn new(credential: Arc<dyn CredentialProvider>, api: Arc<dyn HealthApi>) -> Self {
        Self { credential, api }
    }

    /// Default credential chain and the public management endpoint.
    pub fn azure(runner: Arc<dyn CommandRunner>, config: HealthClientConfig) -> HealthResult<Self> {
        Ok(Self::new(
            Arc::new(ChainedCredential::default_chain(runner)),
            Arc::new(ResourceHealthClient::new(config)?),
        ))
    }

    /// Validate the module applied in `options`.
    ///
    /// Missing options are reported as `Failed`. Only an `Available`
    /// resource is `Successful`.
    pub async fn validate(
        &self,
        terraform: &Terraform,
        options: Option<&StagedOptions>,
    ) -> HealthResult<ExecutionOutcome> {
        info!("Validating provisioned resource...");

        let Some(options) = options else {
            error!("Terraform options can't be nil, please check the test code");
            return Ok(ExecutionOutcome::Failed);
        };

        let target = HealthTarget::from_outputs(terraform, options).await?;
        self.validate_target(&target).await
    }

    /// Query the health of an already identified resource.
    pub async fn validate_target(&self, target: &HealthTarget) -> HealthResult<ExecutionOutcome> {
        if !target
            .resource_id
            .to_ascii_lowercase()
            .contains(&target.subscription_id.to_ascii_lowercase())
        {
            warn!(
                "Resource {} is not in subscription {}",
                target.resource_id, target.subscription_id
            );
        }

        let token = self
            .credential
            .get_token()
            .await?
            .ok_or_else(|| HealthError::Authorization("no credential available".to_string()))?;

        let status = self.api.availability(&target.resource_id, &token).await?;

        if status.state.is_available() {
            info!(
                "Validation complete! Resource {} is: {}",
                target.resource_name, status.state
            );
            Ok(ExecutionOutcome::Successful)
        } else {
            error!(
                "Resource {} is unhealthy: {}{}",
                target.resource_name,
                status.state,
                status
                    .summary
                    .as_deref()
                    .map(|s| format!(" ({})", s))
                    .unwrap_or_default()
            );
            Ok(ExecutionOutcome::Failed)
        }
    }
}

#[async_trait]
impl ProvisionCheck for HealthValidator {
    fn name(&self) -> String {
        "health".to_string()
    }

    async fn check(
        &self,
        terraform: &Terraform,
        options: &StagedOptions,
    ) -> Result<ExecutionOutcome, CheckError> {
        self.validate(terraform, Some(options))
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AvailabilityState, AvailabilityStatus, MockHealthApi};
    use crate::credential::{AccessToken, MockCredentialProvider};
    use tfprobe_core::CoreError;
    use tfprobe_runner::{MockResponse, MockRunner};

    const OUTPUTS: &str = r#"{
        "subscriptionId": {"type": "string", "value": "0000-1111"},
        "resourceId": {"type": "string", "value": "/subscriptions/0000-1111/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/stprobe01"},
        "resourceName": {"type": "string", "value": "stprobe01"}
    }"#;

    fn terraform_with_outputs(outputs: &str) -> Terraform {
        let runner = MockRunner::new().on_subcommand("output", MockResponse::success(outputs));
        Terraform::new(Arc::new(runner))
    }

    fn credential() -> MockCredentialProvider {
        let mut credential = MockCredentialProvider::new();
        credential.expect_name().return_const("mock".to_string());
        credential
            .expect_get_token()
            .returning(|| Ok(Some(AccessToken::new("tok"))));
        credential
    }

    fn api_reporting(state: AvailabilityState) -> MockHealthApi {
        let mut api = MockHealthApi::new();
        api.expect_availability().times(1).returning(move |resource_id, token| {
            assert!(resource_id.ends_with("stprobe01"));
            assert_eq!(token.token, "tok");
            Ok(AvailabilityStatus {
                state: state.clone(),
                summary: Some("summary".to_string()),
                reason_type: None,
            })
        });
        api
    }

    fn options() -> StagedOptions {
        StagedOptions::for_dir("/tmp/stage/module")
    }

    #[tokio::test]
    async fn test_available_is_successful() {
        let validator = HealthValidator::new(
            Arc::new(credential()),
            Arc::new(api_reporting(AvailabilityState::Available)),
        );

        let outcome = validator
            .validate(&terraform_with_outputs(OUTPUTS), Some(&options()))
            .await
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::Successful);
    }

    #[tokio::test]
    async fn test_other_states_are_failed() {
        for state in [
            AvailabilityState::Unavailable,
            AvailabilityState::Degraded,
            AvailabilityState::Unknown,
            AvailabilityState::Other("Maintenance".to_string()),
        ] {
            let validator =
                HealthValidator::new(Arc::new(credential()), Arc::new(api_reporting(state)));

            let outcome = validator
                .validate(&terraform_with_outputs(OUTPUTS), Some(&options()))
                .await
                .unwrap();
            assert_eq!(outcome, ExecutionOutcome::Failed);
        }
    }

    #[tokio::test]
    async fn test_missing_options_is_failed() {
        let mut api = MockHealthApi::new();
        api.expect_availability().never();
        let validator = HealthValidator::new(Arc::new(credential()), Arc::new(api));

        let outcome = validator
            .validate(&terraform_with_outputs(OUTPUTS), None)
            .await
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::Failed);
    }

    #[tokio::test]
    async fn test_missing_output_is_an_error() {
        let mut api = MockHealthApi::new();
        api.expect_availability().never();
        let validator = HealthValidator::new(Arc::new(credential()), Arc::new(api));
        let outputs = r#"{"subscriptionId": {"type": "string", "value": "0000"}}"#;

        let result = validator
            .validate(&terraform_with_outputs(outputs), Some(&options()))
            .await;
        assert!(matches!(
            result,
            Err(HealthError::Core(CoreError::MissingOutput(name))) if name == RESOURCE_ID_OUTPUT
        ));
    }

    #[tokio::test]
    async fn test_query_error_propagates() {
        let mut api = MockHealthApi::new();
        api.expect_availability()
            .returning(|_, _| Err(HealthError::HealthQuery("503".to_string())));
        let validator = HealthValidator::new(Arc::new(credential()), Arc::new(api));

        let result = validator
            .validate(&terraform_with_outputs(OUTPUTS), Some(&options()))
            .await;
        assert!(matches!(result, Err(HealthError::HealthQuery(_))));
    }

    #[tokio::test]
    async fn test_authorization_failure_skips_query() {
        let mut credential = MockCredentialProvider::new();
        credential.expect_name().return_const("mock".to_string());
        credential
            .expect_get_token()
            .returning(|| Err(HealthError::Authorization("no session".to_string())));
        let mut api = MockHealthApi::new();
        api.expect_availability().never();
        let validator = HealthValidator::new(Arc::new(credential), Arc::new(api));

        let result = validator
            .validate(&terraform_with_outputs(OUTPUTS), Some(&options()))
            .await;
        assert!(matches!(result, Err(HealthError::Authorization(_))));
    }

    #[tokio::test]
    async fn test_as_provision_check() {
        let validator = HealthValidator::new(
            Arc::new(credential()),
            Arc::new(api_reporting(AvailabilityState::Degraded)),
        );

        let outcome = validator
            .check(&terraform_with_outputs(OUTPUTS), &options())
            .await
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::Failed);
        assert_eq!(validator.name(), "health");
    }
}
