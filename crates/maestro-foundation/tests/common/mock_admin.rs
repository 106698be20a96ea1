//! In-memory [`AdminSource`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use maestro_kernel::{
    AdminSource, ApiCredentials, ApiServiceConfig, ModelTier, OrchestratorResult, UserSettings,
};

#[derive(Default)]
pub struct StaticAdmin {
    services: Vec<ApiServiceConfig>,
    credentials: HashMap<String, ApiCredentials>,
    settings: UserSettings,
    credential_calls: AtomicUsize,
}

impl StaticAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, service: ApiServiceConfig) -> Self {
        self.services.push(service);
        self
    }

    pub fn with_credentials(mut self, key: &str, credentials: ApiCredentials) -> Self {
        self.credentials.insert(key.to_string(), credentials);
        self
    }

    pub fn with_tier(mut self, tier: ModelTier) -> Self {
        self.settings.tier = Some(tier);
        self
    }

    pub fn credential_calls(&self) -> usize {
        self.credential_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdminSource for StaticAdmin {
    async fn get_api_service_configurations(&self) -> OrchestratorResult<Vec<ApiServiceConfig>> {
        Ok(self.services.clone())
    }

    async fn get_api_service_credentials(
        &self,
        service_id: &str,
    ) -> OrchestratorResult<Option<ApiCredentials>> {
        self.credential_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.credentials.get(service_id).cloned())
    }

    async fn get_user_settings(&self) -> OrchestratorResult<UserSettings> {
        Ok(self.settings.clone())
    }
}
