//! Remote API service integration.
//!
//! Services come from the admin source (or are registered directly). Each
//! call fetches credentials fresh, authenticates per the service's auth
//! type, and retries transient failures with exponential backoff.

mod retry;
mod transport;
mod usage;

pub use retry::{BackoffStrategy, RetryPolicy, retry_with_policy};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
pub use usage::{ApiUsage, estimate_tokens};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use dashmap::DashMap;
use maestro_kernel::{
    AdminSource, ApiServiceConfig, AuthType, ModelTier, OrchestratorError, OrchestratorResult,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::ApiConfig;

/// Filters for [`ApiServiceIntegration::find_best_api_service_for_task`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceQuery {
    /// Highest service tier the caller may use
    pub tier: Option<ModelTier>,
    pub provider: Option<String>,
}

impl ServiceQuery {
    pub fn with_tier(mut self, tier: ModelTier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

/// One request to a service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiRequest {
    /// Appended to the service endpoint when set
    pub path: Option<String>,
    pub body: Value,
}

impl ApiRequest {
    pub fn new(body: Value) -> Self {
        Self { path: None, body }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub service_id: String,
    pub status: u16,
    pub body: Value,
    /// Attempts made, including the successful one
    pub attempts: u32,
    pub estimated_tokens: u64,
}

/// Configuration summary plus usage for one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiServiceStatus {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub tier: ModelTier,
    pub enabled: bool,
    pub priority: Option<i32>,
    pub usage: ApiUsage,
}

struct RegisteredService {
    seq: u64,
    config: ApiServiceConfig,
}

pub struct ApiServiceIntegration {
    admin: Option<Arc<dyn AdminSource>>,
    transport: Arc<dyn HttpTransport>,
    config: ApiConfig,
    services: RwLock<Vec<RegisteredService>>,
    usage: DashMap<String, ApiUsage>,
    next_seq: AtomicU64,
}

impl ApiServiceIntegration {
    pub fn new(
        admin: Option<Arc<dyn AdminSource>>,
        transport: Arc<dyn HttpTransport>,
        config: ApiConfig,
    ) -> Self {
        Self {
            admin,
            transport,
            config,
            services: RwLock::new(Vec::new()),
            usage: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Load service configurations from the admin source. Returns how many
    /// were newly registered.
    pub async fn initialize(&self) -> OrchestratorResult<usize> {
        let admin = self.admin.as_ref().ok_or_else(|| {
            OrchestratorError::Config("API service integration has no admin source".into())
        })?;

        let configs = admin.get_api_service_configurations().await?;
        let total = configs.len();
        let registered = configs
            .into_iter()
            .filter(|c| self.register_api_service(c.clone()))
            .count();

        info!(registered, total, "API services loaded");
        Ok(registered)
    }

    /// `false` when a service with the same id exists.
    pub fn register_api_service(&self, config: ApiServiceConfig) -> bool {
        let mut services = self.services.write();
        if services.iter().any(|s| s.config.id == config.id) {
            warn!(service_id = %config.id, "Duplicate API service ignored");
            return false;
        }
        debug!(service_id = %config.id, provider = %config.provider, "API service registered");
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        services.push(RegisteredService { seq, config });
        true
    }

    pub fn unregister_api_service(&self, service_id: &str) -> bool {
        let mut services = self.services.write();
        let before = services.len();
        services.retain(|s| s.config.id != service_id);
        let removed = services.len() != before;
        drop(services);

        if removed {
            self.usage.remove(service_id);
        }
        removed
    }

    pub fn get_service(&self, service_id: &str) -> Option<ApiServiceConfig> {
        self.services
            .read()
            .iter()
            .find(|s| s.config.id == service_id)
            .map(|s| s.config.clone())
    }

    pub fn service_count(&self) -> usize {
        self.services.read().len()
    }

    /// Best enabled service for `task`: priority descending (unprioritized
    /// last), then registration order.
    pub fn find_best_api_service_for_task(
        &self,
        task: &str,
        query: &ServiceQuery,
    ) -> Option<String> {
        let services = self.services.read();
        services
            .iter()
            .filter(|s| {
                let c = &s.config;
                c.enabled
                    && c.supports_task(task)
                    && query.tier.is_none_or(|ceiling| ceiling.grants(c.tier))
                    && query
                        .provider
                        .as_deref()
                        .is_none_or(|p| c.provider.eq_ignore_ascii_case(p))
            })
            .min_by(|a, b| {
                // Some(p) sorts above None; higher priority first.
                b.config
                    .priority
                    .cmp(&a.config.priority)
                    .then(a.seq.cmp(&b.seq))
            })
            .map(|s| s.config.id.clone())
    }

    /// POST `request` to the service, retrying transient failures.
    pub async fn execute_api_request(
        &self,
        service_id: &str,
        request: &ApiRequest,
    ) -> OrchestratorResult<ApiResponse> {
        let service = self
            .get_service(service_id)
            .ok_or_else(|| OrchestratorError::ServiceNotFound(service_id.to_string()))?;
        if !service.enabled {
            return Err(OrchestratorError::Config(format!(
                "API service {service_id} is disabled"
            )));
        }

        let url = join_url(&service.endpoint, request.path.as_deref());
        let timeout = service
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.timeout());
        let policy = RetryPolicy::from_config(&self.config);

        let span = info_span!("api_request", service_id = %service_id, url = %url);
        let (attempts, response) = retry_with_policy(
            &policy,
            OrchestratorError::is_transient,
            |attempt| {
                let service = &service;
                let url = url.as_str();
                async move {
                    self.attempt(service, url, &request.body, timeout)
                        .await
                        .map(|response| (attempt, response))
                }
            },
        )
        .instrument(span)
        .await?;

        let estimated_tokens = estimate_tokens(&request.body, &response.body);
        self.track_api_usage(service_id, estimated_tokens);
        debug!(service_id = %service_id, attempts, estimated_tokens, "API request succeeded");

        Ok(ApiResponse {
            service_id: service_id.to_string(),
            status: response.status,
            body: response.body,
            attempts,
            estimated_tokens,
        })
    }

    async fn attempt(
        &self,
        service: &ApiServiceConfig,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> OrchestratorResult<HttpResponse> {
        let headers = self.auth_headers(service).await?;
        let request = HttpRequest {
            url: url.to_string(),
            headers,
            body: body.clone(),
            timeout,
        };

        let response = tokio::time::timeout(timeout, self.transport.post_json(request))
            .await
            .map_err(|_| OrchestratorError::Timeout(timeout))??;

        if !response.is_success() {
            return Err(OrchestratorError::Http {
                status: response.status,
                message: error_message(&response.body),
            });
        }
        Ok(response)
    }

    async fn auth_headers(
        &self,
        service: &ApiServiceConfig,
    ) -> OrchestratorResult<Vec<(String, String)>> {
        if service.auth == AuthType::None {
            return Ok(Vec::new());
        }

        let admin = self.admin.as_ref().ok_or_else(|| {
            OrchestratorError::Credentials(format!(
                "no admin source to resolve credentials for {}",
                service.id
            ))
        })?;
        let key = service.credential_ref.as_deref().unwrap_or(&service.id);
        let credentials = admin
            .get_api_service_credentials(key)
            .await?
            .ok_or_else(|| {
                OrchestratorError::Credentials(format!("no credentials for service {}", service.id))
            })?;

        let header = match &service.auth {
            AuthType::None => return Ok(Vec::new()),
            AuthType::Bearer => (
                "Authorization".to_string(),
                format!("Bearer {}", credentials.secret),
            ),
            AuthType::ApiKey { header } => (header.clone(), credentials.secret),
            AuthType::Basic => {
                let user = credentials.username.unwrap_or_default();
                let encoded = BASE64.encode(format!("{user}:{}", credentials.secret));
                ("Authorization".to_string(), format!("Basic {encoded}"))
            }
        };
        Ok(vec![header])
    }

    /// Count one successful call against `service_id`.
    pub fn track_api_usage(&self, service_id: &str, estimated_tokens: u64) {
        self.usage
            .entry(service_id.to_string())
            .or_default()
            .record(estimated_tokens, Utc::now());
    }

    pub fn usage(&self, service_id: &str) -> Option<ApiUsage> {
        self.usage.get(service_id).map(|u| u.clone())
    }

    pub fn service_status(&self) -> Vec<ApiServiceStatus> {
        self.services
            .read()
            .iter()
            .map(|s| ApiServiceStatus {
                id: s.config.id.clone(),
                name: s.config.name.clone(),
                provider: s.config.provider.clone(),
                tier: s.config.tier,
                enabled: s.config.enabled,
                priority: s.config.priority,
                usage: self.usage(&s.config.id).unwrap_or_default(),
            })
            .collect()
    }
}

fn join_url(endpoint: &str, path: Option<&str>) -> String {
    match path {
        Some(path) if !path.is_empty() => format!(
            "{}/{}",
            endpoint.trim_end_matches('/'),
            path.trim_start_matches('/')
        ),
        _ => endpoint.to_string(),
    }
}

fn error_message(body: &Value) -> String {
    let nested = body
        .get("error")
        .and_then(|e| e.get("message").or(Some(e)))
        .and_then(Value::as_str);
    match (nested, body) {
        (Some(message), _) => message.to_string(),
        (None, Value::String(text)) => text.clone(),
        (None, Value::Null) => String::new(),
        (None, other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use maestro_kernel::{ApiCredentials, UserSettings};
    use parking_lot::Mutex;
    use serde_json::json;

    struct Admin;

    #[async_trait]
    impl AdminSource for Admin {
        async fn get_api_service_configurations(
            &self,
        ) -> OrchestratorResult<Vec<ApiServiceConfig>> {
            Ok(vec![
                ApiServiceConfig::new("a", "acme", "http://a").with_tasks(["chat"]),
                ApiServiceConfig::new("a", "acme", "http://dup"),
            ])
        }

        async fn get_api_service_credentials(
            &self,
            service_id: &str,
        ) -> OrchestratorResult<Option<ApiCredentials>> {
            Ok(match service_id {
                "basic-ref" => Some(ApiCredentials::basic("user", "pass")),
                "missing" => None,
                _ => Some(ApiCredentials::token("s3cret")),
            })
        }

        async fn get_user_settings(&self) -> OrchestratorResult<UserSettings> {
            Ok(UserSettings::default())
        }
    }

    /// Replies with the queued responses in order, recording requests.
    #[derive(Default)]
    struct Queue {
        replies: Mutex<Vec<OrchestratorResult<HttpResponse>>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    #[async_trait]
    impl HttpTransport for Queue {
        async fn post_json(&self, request: HttpRequest) -> OrchestratorResult<HttpResponse> {
            self.seen.lock().push(request);
            let mut replies = self.replies.lock();
            if replies.is_empty() {
                Ok(HttpResponse {
                    status: 200,
                    body: json!({}),
                })
            } else {
                replies.remove(0)
            }
        }
    }

    fn fast_config() -> ApiConfig {
        ApiConfig {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 4,
            timeout_ms: 1_000,
            ..ApiConfig::default()
        }
    }

    fn integration(queue: Arc<Queue>) -> ApiServiceIntegration {
        ApiServiceIntegration::new(Some(Arc::new(Admin)), queue, fast_config())
    }

    #[tokio::test]
    async fn initialize_skips_duplicates() {
        let api = integration(Arc::new(Queue::default()));
        assert_eq!(api.initialize().await.unwrap(), 1);
        assert_eq!(api.get_service("a").unwrap().endpoint, "http://a");
    }

    #[tokio::test]
    async fn initialize_without_admin_is_config_error() {
        let api = ApiServiceIntegration::new(None, Arc::new(Queue::default()), fast_config());
        let err = api.initialize().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }

    #[test]
    fn best_service_ordering() {
        let api = integration(Arc::new(Queue::default()));
        api.register_api_service(ApiServiceConfig::new("none-1", "p", "http://x").with_tasks(["t"]));
        api.register_api_service(
            ApiServiceConfig::new("low", "p", "http://x")
                .with_tasks(["t"])
                .with_priority(1),
        );
        api.register_api_service(
            ApiServiceConfig::new("high-1", "p", "http://x")
                .with_tasks(["t"])
                .with_priority(5),
        );
        api.register_api_service(
            ApiServiceConfig::new("high-2", "p", "http://x")
                .with_tasks(["t"])
                .with_priority(5),
        );
        assert_eq!(
            api.find_best_api_service_for_task("t", &ServiceQuery::default())
                .as_deref(),
            Some("high-1")
        );

        api.unregister_api_service("high-1");
        api.unregister_api_service("high-2");
        api.unregister_api_service("low");
        assert_eq!(
            api.find_best_api_service_for_task("t", &ServiceQuery::default())
                .as_deref(),
            Some("none-1")
        );
    }

    #[test]
    fn best_service_respects_filters() {
        let api = integration(Arc::new(Queue::default()));
        api.register_api_service(
            ApiServiceConfig::new("ent", "big", "http://x")
                .with_tasks(["t"])
                .with_tier(ModelTier::Enterprise)
                .with_priority(10),
        );
        api.register_api_service(ApiServiceConfig::new("off", "p", "http://x").with_tasks(["t"]).disabled());
        api.register_api_service(ApiServiceConfig::new("std", "p", "http://x").with_tasks(["t"]));

        let standard = ServiceQuery::default().with_tier(ModelTier::Standard);
        assert_eq!(
            api.find_best_api_service_for_task("t", &standard).as_deref(),
            Some("std")
        );
        let by_provider = ServiceQuery::default().with_provider("BIG");
        assert_eq!(
            api.find_best_api_service_for_task("t", &by_provider).as_deref(),
            Some("ent")
        );
        assert!(
            api.find_best_api_service_for_task("other", &ServiceQuery::default())
                .is_none()
        );
    }

    #[tokio::test]
    async fn auth_headers_per_type() {
        let queue = Arc::new(Queue::default());
        let api = integration(queue.clone());
        api.register_api_service(
            ApiServiceConfig::new("bearer", "p", "http://x").with_auth(AuthType::Bearer),
        );
        api.register_api_service(ApiServiceConfig::new("key", "p", "http://x").with_auth(
            AuthType::ApiKey {
                header: "X-Key".into(),
            },
        ));
        let mut basic = ApiServiceConfig::new("basic", "p", "http://x").with_auth(AuthType::Basic);
        basic.credential_ref = Some("basic-ref".into());
        api.register_api_service(basic);

        for id in ["bearer", "key", "basic"] {
            api.execute_api_request(id, &ApiRequest::new(json!({"q": 1})))
                .await
                .unwrap();
        }

        let seen = queue.seen.lock();
        assert_eq!(
            seen[0].headers,
            vec![("Authorization".to_string(), "Bearer s3cret".to_string())]
        );
        assert_eq!(
            seen[1].headers,
            vec![("X-Key".to_string(), "s3cret".to_string())]
        );
        let expected = format!("Basic {}", BASE64.encode("user:pass"));
        assert_eq!(seen[2].headers[0].1, expected);
    }

    #[tokio::test]
    async fn missing_credentials_fail_without_retry() {
        let queue = Arc::new(Queue::default());
        let api = integration(queue.clone());
        let mut svc = ApiServiceConfig::new("svc", "p", "http://x").with_auth(AuthType::Bearer);
        svc.credential_ref = Some("missing".into());
        api.register_api_service(svc);

        let err = api
            .execute_api_request("svc", &ApiRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Credentials(_)));
        assert!(queue.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn retries_server_errors_and_tracks_usage() {
        let queue = Arc::new(Queue::default());
        queue.replies.lock().extend([
            Ok(HttpResponse {
                status: 503,
                body: json!({"error": {"message": "overloaded"}}),
            }),
            Ok(HttpResponse {
                status: 200,
                body: json!({"usage": {"total_tokens": 7}}),
            }),
        ]);
        let api = integration(queue.clone());
        api.register_api_service(ApiServiceConfig::new("svc", "p", "http://x/v1/"));

        let response = api
            .execute_api_request("svc", &ApiRequest::new(json!({})).with_path("/chat"))
            .await
            .unwrap();
        assert_eq!(response.attempts, 2);
        assert_eq!(response.estimated_tokens, 7);
        assert_eq!(queue.seen.lock()[0].url, "http://x/v1/chat");

        let usage = api.usage("svc").unwrap();
        assert_eq!(usage.request_count, 1);
        assert_eq!(usage.estimated_tokens, 7);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let queue = Arc::new(Queue::default());
        queue.replies.lock().push(Ok(HttpResponse {
            status: 403,
            body: json!({"error": "forbidden"}),
        }));
        let api = integration(queue.clone());
        api.register_api_service(ApiServiceConfig::new("svc", "p", "http://x"));

        let err = api
            .execute_api_request("svc", &ApiRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(403));
        assert_eq!(err.to_string(), "HTTP 403: forbidden");
        assert_eq!(queue.seen.lock().len(), 1);
        assert!(api.usage("svc").is_none());
    }

    #[tokio::test]
    async fn unknown_and_disabled_services() {
        let api = integration(Arc::new(Queue::default()));
        api.register_api_service(ApiServiceConfig::new("off", "p", "http://x").disabled());

        let err = api
            .execute_api_request("nope", &ApiRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ServiceNotFound(_)));

        let err = api
            .execute_api_request("off", &ApiRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }

    #[test]
    fn unregister_unknown_is_false() {
        let api = integration(Arc::new(Queue::default()));
        assert!(!api.unregister_api_service("ghost"));
    }

    /// Always busy; records when each attempt arrived.
    #[derive(Default)]
    struct Busy {
        arrivals: Mutex<Vec<tokio::time::Instant>>,
    }

    #[async_trait]
    impl HttpTransport for Busy {
        async fn post_json(&self, _request: HttpRequest) -> OrchestratorResult<HttpResponse> {
            self.arrivals.lock().push(tokio::time::Instant::now());
            Ok(HttpResponse {
                status: 503,
                body: json!({"error": "busy"}),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_service_is_retried_with_growing_delays() {
        let busy = Arc::new(Busy::default());
        let config = ApiConfig {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            ..ApiConfig::default()
        };
        let api = ApiServiceIntegration::new(Some(Arc::new(Admin)), busy.clone(), config.clone());
        api.register_api_service(ApiServiceConfig::new("svc", "p", "http://x"));

        let err = api
            .execute_api_request("svc", &ApiRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(503));
        assert!(api.usage("svc").is_none());

        let arrivals = busy.arrivals.lock();
        assert_eq!(arrivals.len(), config.max_retries as usize + 1);
        let gaps: Vec<Duration> = arrivals.windows(2).map(|w| w[1] - w[0]).collect();
        for pair in gaps.windows(2) {
            assert!(pair[1] > pair[0], "delays not increasing: {gaps:?}");
        }
        assert!(gaps[0] >= Duration::from_millis(100));
    }
}
