//! Azure Resource Health REST client.
//!
//! See <https://learn.microsoft.com/rest/api/resourcehealth/>.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::credential::AccessToken;
use crate::error::{HealthError, HealthResult};

pub const RESOURCE_HEALTH_API_VERSION: &str = "2017-07-01";
pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";

/// Availability state reported for a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvailabilityState {
    Available,
    Unavailable,
    Degraded,
    Unknown,
    Other(String),
}

impl AvailabilityState {
    pub fn parse(value: &str) -> Self {
        match value {
            "Available" => Self::Available,
            "Unavailable" => Self::Unavailable,
            "Degraded" => Self::Degraded,
            "Unknown" => Self::Unknown,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

impl std::fmt::Display for AvailabilityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => write!(f, "Available"),
            Self::Unavailable => write!(f, "Unavailable"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Unknown => write!(f, "Unknown"),
            Self::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Current availability of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityStatus {
    pub state: AvailabilityState,
    pub summary: Option<String>,
    pub reason_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    properties: Option<StatusProperties>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusProperties {
    #[serde(default)]
    availability_state: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    reason_type: Option<String>,
}

/// Parse an `availabilityStatuses/current` response body.
pub fn parse_status(body: &str) -> HealthResult<AvailabilityStatus> {
    let response: StatusResponse = serde_json::from_str(body)?;
    let properties = response
        .properties
        .ok_or_else(|| HealthError::HealthQuery("response has no properties".to_string()))?;
    Ok(AvailabilityStatus {
        state: properties
            .availability_state
            .as_deref()
            .map(AvailabilityState::parse)
            .unwrap_or(AvailabilityState::Unknown),
        summary: properties.summary,
        reason_type: properties.reason_type,
    })
}

/// Query interface for resource availability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HealthApi: Send + Sync {
    async fn availability(
        &self,
        resource_id: &str,
        token: &AccessToken,
    ) -> HealthResult<AvailabilityStatus>;
}

/// Resource health client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthClientConfig {
    /// Management endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Bound on the whole query, retries included
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_timeout() -> u64 {
    300
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    5
}

impl Default for HealthClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_seconds: default_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_delay_seconds: default_retry_delay(),
        }
    }
}

impl HealthClientConfig {
    /// Bound on one availability query, retries included; never below one second.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

/// Resource Health client over `reqwest`.
pub struct ResourceHealthClient {
    client: reqwest::Client,
    config: HealthClientConfig,
}

impl ResourceHealthClient {
    pub fn new(config: HealthClientConfig) -> HealthResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HealthClientConfig {
        &self.config
    }

    /// URL of the current availability status of a resource.
    pub fn status_url(&self, resource_id: &str) -> String {
        format!(
            "{}/{}/providers/Microsoft.ResourceHealth/availabilityStatuses/current?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            resource_id.trim_matches('/'),
            RESOURCE_HEALTH_API_VERSION
        )
    }

    async fn query_with_retry(
        &self,
        url: &str,
        token: &AccessToken,
    ) -> HealthResult<AvailabilityStatus> {
        let attempts = self.config.retry_attempts.max(1);
        let delay = Duration::from_secs(self.config.retry_delay_seconds);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .client
                .get(url)
                .bearer_auth(&token.token)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    warn!("Resource health request failed (attempt {}/{}): {}", attempt + 1, attempts, e);
                    last_error = Some(HealthError::HealthQuery(format!("network error: {}", e)));
                    continue;
                }
            };

            let status = response.status();
            if status.is_server_error() || status.as_u16() == 429 {
                let body = response.text().await.unwrap_or_default();
                warn!("Resource health API returned {} (attempt {}/{})", status, attempt + 1, attempts);
                last_error = Some(HealthError::HealthQuery(format!(
                    "resource health API error {}: {}",
                    status, body
                )));
                continue;
            }

            let body = response.text().await?;
            if !status.is_success() {
                return Err(HealthError::HealthQuery(format!(
                    "resource health API error {}: {}",
                    status, body
                )));
            }

            debug!("Resource health response: {}", body);
            return parse_status(&body);
        }

        Err(last_error
            .unwrap_or_else(|| HealthError::HealthQuery("no attempt was made".to_string())))
    }
}

#[async_trait]
impl HealthApi for ResourceHealthClient {
    async fn availability(
        &self,
        resource_id: &str,
        token: &AccessToken,
    ) -> HealthResult<AvailabilityStatus> {
        let url = self.status_url(resource_id);
        debug!("Querying {}", url);

        let timeout = self.config.timeout();
        tokio::time::timeout(timeout, self.query_with_retry(&url, token))
            .await
            .map_err(|_| HealthError::Timeout(timeout.as_secs()))?
    }
}
