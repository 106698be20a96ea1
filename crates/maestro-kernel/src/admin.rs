//! Admin source contract: API service configuration, credentials and user
//! settings supplied by whatever administers the deployment.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::OrchestratorResult;
use crate::tier::ModelTier;

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

fn default_enabled() -> bool {
    true
}

/// How a remote service authenticates requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthType {
    #[default]
    None,
    /// `Authorization: Bearer <secret>`
    Bearer,
    /// Secret sent verbatim in a custom header
    ApiKey {
        #[serde(default = "default_api_key_header")]
        header: String,
    },
    /// `Authorization: Basic base64(user:secret)`
    Basic,
}

/// Configuration of one remote API service. Never carries the secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiServiceConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub provider: String,
    pub endpoint: String,
    #[serde(default)]
    pub auth: AuthType,
    /// Key the admin source resolves to credentials
    #[serde(default)]
    pub credential_ref: Option<String>,
    #[serde(default)]
    pub supported_tasks: Vec<String>,
    #[serde(default)]
    pub tier: ModelTier,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Higher is preferred; services without a priority come last
    #[serde(default)]
    pub priority: Option<i32>,
    /// Overrides the integration-wide attempt timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ApiServiceConfig {
    pub fn new(
        id: impl Into<String>,
        provider: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            provider: provider.into(),
            endpoint: endpoint.into(),
            auth: AuthType::None,
            credential_ref: None,
            supported_tasks: Vec::new(),
            tier: ModelTier::Standard,
            enabled: true,
            priority: None,
            timeout_ms: None,
        }
    }

    pub fn with_auth(mut self, auth: AuthType) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_tasks<I, S>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_tasks = tasks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tier(mut self, tier: ModelTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn supports_task(&self, task: &str) -> bool {
        self.supported_tasks
            .iter()
            .any(|t| t.eq_ignore_ascii_case(task))
    }
}

/// Secret material for one call. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    pub username: Option<String>,
    pub secret: String,
}

impl ApiCredentials {
    pub fn token(secret: impl Into<String>) -> Self {
        Self {
            username: None,
            secret: secret.into(),
        }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            secret: password.into(),
        }
    }
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Per-deployment user settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default)]
    pub tier: Option<ModelTier>,
    #[serde(default)]
    pub preferred_provider: Option<String>,
}

#[async_trait]
pub trait AdminSource: Send + Sync {
    async fn get_api_service_configurations(&self) -> OrchestratorResult<Vec<ApiServiceConfig>>;

    /// Credentials for one service, fetched per call and never cached.
    async fn get_api_service_credentials(
        &self,
        service_id: &str,
    ) -> OrchestratorResult<Option<ApiCredentials>>;

    async fn get_user_settings(&self) -> OrchestratorResult<UserSettings>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = ApiCredentials::basic("svc-user", "hunter2");
        let text = format!("{creds:?}");
        assert!(text.contains("svc-user"));
        assert!(!text.contains("hunter2"));
        assert!(text.contains("<redacted>"));
    }

    #[test]
    fn service_config_defaults() {
        let json = r#"{
            "id": "openai",
            "provider": "openai",
            "endpoint": "https://api.example.com/v1",
            "auth": {"type": "API_KEY"}
        }"#;
        let cfg: ApiServiceConfig = serde_json::from_str(json).unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.tier, ModelTier::Standard);
        assert_eq!(
            cfg.auth,
            AuthType::ApiKey {
                header: "X-API-Key".into()
            }
        );
        assert!(cfg.priority.is_none());
    }

    #[test]
    fn task_support_is_case_insensitive() {
        let cfg = ApiServiceConfig::new("s", "p", "http://x").with_tasks(["Summarization"]);
        assert!(cfg.supports_task("summarization"));
        assert!(!cfg.supports_task("translation"));
    }
}
