//! Azure credential discovery.
//!
//! Sources are tried in a fixed order: environment variables, then the
//! auth file named by `AZURE_AUTH_LOCATION`, then the Azure CLI session.
//! A source that is not configured yields `Ok(None)` and the next one is
//! tried.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use tfprobe_runner::{CommandRunner, CommandSpec, RunConfig};

use crate::error::{HealthError, HealthResult};

/// Azure Resource Manager audience.
pub const MANAGEMENT_RESOURCE: &str = "https://management.azure.com/";
pub const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Bearer token for the management API.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_on: None,
        }
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// A source of access tokens.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> String;

    /// Fetch a token, or `Ok(None)` when this source is not configured.
    async fn get_token(&self) -> HealthResult<Option<AccessToken>>;
}

/// Service principal secret.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSecret {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSecret")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Client-credentials grant against the identity platform.
async fn request_token(
    client: &reqwest::Client,
    authority: &str,
    secret: &ClientSecret,
) -> HealthResult<AccessToken> {
    let url = format!(
        "{}/{}/oauth2/v2.0/token",
        authority.trim_end_matches('/'),
        secret.tenant_id
    );
    debug!("Requesting token for client {} from {}", secret.client_id, url);

    let response = client
        .post(&url)
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", secret.client_id.as_str()),
            ("client_secret", secret.client_secret.as_str()),
            ("scope", MANAGEMENT_SCOPE),
        ])
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(HealthError::Authorization(format!(
            "token request returned {}: {}",
            status, body
        )));
    }

    let token: TokenResponse = response.json().await?;
    Ok(AccessToken {
        token: token.access_token,
        expires_on: token.expires_in.map(|s| Utc::now() + Duration::seconds(s)),
    })
}

/// `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and `AZURE_CLIENT_SECRET`.
pub struct EnvironmentCredential {
    secret: Option<ClientSecret>,
    authority: String,
    client: reqwest::Client,
}

impl EnvironmentCredential {
    pub fn new(secret: Option<ClientSecret>) -> Self {
        Self {
            secret,
            authority: DEFAULT_AUTHORITY.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let secret = match (
            get("AZURE_TENANT_ID"),
            get("AZURE_CLIENT_ID"),
            get("AZURE_CLIENT_SECRET"),
        ) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => Some(ClientSecret {
                tenant_id,
                client_id,
                client_secret,
            }),
            _ => None,
        };
        Self::new(secret)
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }
}

#[async_trait]
impl CredentialProvider for EnvironmentCredential {
    fn name(&self) -> String {
        "environment".to_string()
    }

    async fn get_token(&self) -> HealthResult<Option<AccessToken>> {
        match &self.secret {
            Some(secret) => Ok(Some(request_token(&self.client, &self.authority, secret).await?)),
            None => Ok(None),
        }
    }
}

/// JSON auth file, as written by `az ad sp create-for-rbac --sdk-auth`.
pub struct FileCredential {
    path: Option<PathBuf>,
    authority: String,
    client: reqwest::Client,
}

impl FileCredential {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            authority: DEFAULT_AUTHORITY.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Use the file named by `AZURE_AUTH_LOCATION`.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var_os("AZURE_AUTH_LOCATION")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        )
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    /// Read the service principal from the auth file.
    pub async fn read_secret(&self) -> HealthResult<Option<ClientSecret>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            HealthError::InvalidCredential(format!("cannot read auth file {:?}: {}", path, e))
        })?;
        let secret: ClientSecret = serde_json::from_str(&content).map_err(|e| {
            HealthError::InvalidCredential(format!("invalid auth file {:?}: {}", path, e))
        })?;
        Ok(Some(secret))
    }
}

#[async_trait]
impl CredentialProvider for FileCredential {
    fn name(&self) -> String {
        "auth file".to_string()
    }

    async fn get_token(&self) -> HealthResult<Option<AccessToken>> {
        match self.read_secret().await? {
            Some(secret) => Ok(Some(request_token(&self.client, &self.authority, &secret).await?)),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    #[serde(default)]
    expires_on: Option<String>,
}

/// Token from a logged-in `az` session.
pub struct AzureCliCredential {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl AzureCliCredential {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            program: "az".to_string(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl CredentialProvider for AzureCliCredential {
    fn name(&self) -> String {
        "azure cli".to_string()
    }

    async fn get_token(&self) -> HealthResult<Option<AccessToken>> {
        if !self.runner.is_available(&self.program).await? {
            debug!("{} not found, skipping CLI credential", self.program);
            return Ok(None);
        }

        let spec = CommandSpec::new(&self.program).args([
            "account",
            "get-access-token",
            "--resource",
            MANAGEMENT_RESOURCE,
            "--output",
            "json",
        ]);
        let result = self
            .runner
            .run(&spec, &RunConfig::default().timeout(60))
            .await?;

        if !result.success() {
            return Err(HealthError::Authorization(format!(
                "az account get-access-token failed: {}",
                result.stderr.trim()
            )));
        }

        let token: CliToken = serde_json::from_str(&result.stdout)?;
        Ok(Some(AccessToken {
            token: token.access_token,
            // az prints local time without offset; only used for display
            expires_on: token
                .expires_on
                .as_deref()
                .and_then(|s| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").ok())
                .map(|naive| naive.and_utc()),
        }))
    }
}

/// Tries each provider in order and returns the first token.
pub struct ChainedCredential {
    providers: Vec<Arc<dyn CredentialProvider>>,
}

impl ChainedCredential {
    pub fn new(providers: Vec<Arc<dyn CredentialProvider>>) -> Self {
        Self { providers }
    }

    /// Environment, auth file, then Azure CLI.
    pub fn default_chain(runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(vec![
            Arc::new(EnvironmentCredential::from_env()),
            Arc::new(FileCredential::from_env()),
            Arc::new(AzureCliCredential::new(runner)),
        ])
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

#[async_trait]
impl CredentialProvider for ChainedCredential {
    fn name(&self) -> String {
        "chained".to_string()
    }

    async fn get_token(&self) -> HealthResult<Option<AccessToken>> {
        let mut failures = Vec::new();

        for provider in &self.providers {
            match provider.get_token().await {
                Ok(Some(token)) => {
                    info!("Authorized with {} credential", provider.name());
                    return Ok(Some(token));
                }
                Ok(None) => debug!("{} credential not configured", provider.name()),
                Err(e) => {
                    warn!("{} credential failed: {}", provider.name(), e);
                    failures.push(format!("{}: {}", provider.name(), e));
                }
            }
        }

        let detail = if failures.is_empty() {
            "no credential source is configured".to_string()
        } else {
            failures.join("; ")
        };
        Err(HealthError::Authorization(detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tfprobe_runner::{MockResponse, MockRunner};

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_environment_requires_all_three_variables() {
        let full = EnvironmentCredential::from_lookup(lookup(&[
            ("AZURE_TENANT_ID", "t"),
            ("AZURE_CLIENT_ID", "c"),
            ("AZURE_CLIENT_SECRET", "s"),
        ]));
        assert!(full.is_configured());

        let partial = EnvironmentCredential::from_lookup(lookup(&[
            ("AZURE_TENANT_ID", "t"),
            ("AZURE_CLIENT_ID", "c"),
            ("AZURE_CLIENT_SECRET", ""),
        ]));
        assert!(!partial.is_configured());
    }

    #[tokio::test]
    async fn test_unconfigured_sources_yield_none() {
        let env = EnvironmentCredential::new(None);
        assert!(env.get_token().await.unwrap().is_none());

        let file = FileCredential::new(None);
        assert!(file.get_token().await.unwrap().is_none());

        let cli = AzureCliCredential::new(Arc::new(MockRunner::new().set_unavailable("az")));
        assert!(cli.get_token().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_auth_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(
            &path,
            r#"{"clientId": "c", "clientSecret": "s", "subscriptionId": "sub", "tenantId": "t"}"#,
        )
        .unwrap();

        let secret = FileCredential::new(Some(path)).read_secret().await.unwrap().unwrap();
        assert_eq!(secret.tenant_id, "t");
        assert_eq!(secret.client_id, "c");
        assert_eq!(secret.client_secret, "s");
    }

    #[tokio::test]
    async fn test_missing_auth_file_is_an_error() {
        let file = FileCredential::new(Some(PathBuf::from("/definitely/missing/auth.json")));
        assert!(matches!(
            file.get_token().await,
            Err(HealthError::InvalidCredential(_))
        ));
    }

    #[tokio::test]
    async fn test_cli_credential_reads_access_token() {
        let runner = MockRunner::new().on_subcommand(
            "account",
            MockResponse::success(
                r#"{"accessToken": "cli-token", "expiresOn": "2030-01-01 10:00:00.000000", "tokenType": "Bearer"}"#,
            ),
        );
        let cli = AzureCliCredential::new(Arc::new(runner.clone()));

        let token = cli.get_token().await.unwrap().unwrap();
        assert_eq!(token.token, "cli-token");
        assert!(token.expires_on.is_some());

        let call = &runner.get_calls()[0];
        assert_eq!(call.program, "az");
        assert!(call.args.contains(&MANAGEMENT_RESOURCE.to_string()));
    }

    #[tokio::test]
    async fn test_cli_credential_not_logged_in() {
        let runner = MockRunner::new().on_subcommand(
            "account",
            MockResponse::failure(1, "Please run 'az login' to setup account."),
        );
        let cli = AzureCliCredential::new(Arc::new(runner));

        assert!(matches!(
            cli.get_token().await,
            Err(HealthError::Authorization(msg)) if msg.contains("az login")
        ));
    }

    #[tokio::test]
    async fn test_chain_falls_through_to_next_provider() {
        let mut unconfigured = MockCredentialProvider::new();
        unconfigured.expect_name().return_const("first".to_string());
        unconfigured.expect_get_token().times(1).returning(|| Ok(None));

        let mut failing = MockCredentialProvider::new();
        failing.expect_name().return_const("second".to_string());
        failing
            .expect_get_token()
            .times(1)
            .returning(|| Err(HealthError::Authorization("expired".to_string())));

        let mut working = MockCredentialProvider::new();
        working.expect_name().return_const("third".to_string());
        working
            .expect_get_token()
            .times(1)
            .returning(|| Ok(Some(AccessToken::new("tok"))));

        let mut never = MockCredentialProvider::new();
        never.expect_name().return_const("fourth".to_string());
        never.expect_get_token().never();

        let chain = ChainedCredential::new(vec![
            Arc::new(unconfigured),
            Arc::new(failing),
            Arc::new(working),
            Arc::new(never),
        ]);

        let token = chain.get_token().await.unwrap().unwrap();
        assert_eq!(token.token, "tok");
    }

    #[tokio::test]
    async fn test_empty_chain_is_authorization_failure() {
        let chain = ChainedCredential::new(vec![Arc::new(EnvironmentCredential::new(None))]);

        assert!(matches!(
            chain.get_token().await,
            Err(HealthError::Authorization(msg)) if msg.contains("no credential source")
        ));
    }

    #[test]
    fn test_default_chain_order() {
        let chain = ChainedCredential::default_chain(Arc::new(MockRunner::new()));
        assert_eq!(
            chain.provider_names(),
            vec!["environment", "auth file", "azure cli"]
        );
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = AccessToken::new("super-secret");
        assert!(!format!("{:?}", token).contains("super-secret"));
    }
}
