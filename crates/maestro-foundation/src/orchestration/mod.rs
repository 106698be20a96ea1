//! Orchestration coordinator.
//!
//! [`ModelOrchestrationSystem`] owns every component and the state they
//! share: the task cache, per-model usage, API routes and the load locks.
//! It decides which model answers a request, provisions it locally or
//! through a remote service, and keeps the number of loaded models inside
//! the configured budget.
//!
//! ```rust,ignore
//! let system = ModelOrchestrationSystem::builder(catalog)
//!     .admin(admin)
//!     .config(OrchestrationConfig::from_file("maestro.toml")?)
//!     .build()?;
//! system.initialize().await?;
//!
//! let assignment = system
//!     .get_model_for_task(&ModelRequest::new(ModelType::Text).with_task_type("summarization"))
//!     .await?;
//! let output = system
//!     .execute_model(&assignment.model_id, &TaskInput::new("..."), &ExecuteOptions::default())
//!     .await?;
//! ```

mod status;
mod task_cache;
mod usage;

pub use status::{
    LoadedModelStatus, MemoryOptimizationReport, ModelAssignment, ModelRequest, ModelRoute,
    OrchestrationEvent, OrchestrationStatus,
};
pub use task_cache::{TaskCache, TaskCacheKey};
pub use usage::ModelUsage;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use maestro_kernel::{
    AdminSource, ExecuteOptions, LoadOptions, LoadState, ModelCatalog, ModelCriteria,
    ModelDescriptor, ModelTier, OrchestratorError, OrchestratorResult, QuantizationLevel,
    TaskInput, TaskOutput,
};
use parking_lot::RwLock;
use serde_json::{Value, json};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::api_service::{
    ApiRequest, ApiServiceIntegration, HttpTransport, ReqwestTransport, ServiceQuery,
};
use crate::collaboration::{
    CollaborationResult, CollaborationSession, CollaborativeModelOrchestrator, SessionRequest,
};
use crate::config::OrchestrationConfig;
use crate::quantization::{QuantizationConstraints, QuantizationDecision, QuantizationManager};
use crate::resource::{ResourceMonitor, SystemProbe, ThresholdEvent};
use crate::selector::{PerformanceRecord, SelectionCriteria, SpecializedModelSelector};
use usage::UsageLedger;

const EVENT_CHANNEL_CAPACITY: usize = 128;

// ============================================================================
// Builder
// ============================================================================

pub struct OrchestrationSystemBuilder {
    catalog: Arc<dyn ModelCatalog>,
    admin: Option<Arc<dyn AdminSource>>,
    transport: Option<Arc<dyn HttpTransport>>,
    probe: Option<Arc<dyn SystemProbe>>,
    config: OrchestrationConfig,
}

impl OrchestrationSystemBuilder {
    pub fn admin(mut self, admin: Arc<dyn AdminSource>) -> Self {
        self.admin = Some(admin);
        self
    }

    /// Defaults to [`ReqwestTransport`].
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Defaults to the sysinfo-backed probe.
    pub fn probe(mut self, probe: Arc<dyn SystemProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn config(mut self, config: OrchestrationConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the configuration and wire the components together.
    pub fn build(self) -> OrchestratorResult<ModelOrchestrationSystem> {
        self.config.validate()?;

        let resource_config = self.config.resource.clone();
        let monitor = Arc::new(match self.probe {
            Some(probe) => ResourceMonitor::with_probe(resource_config, probe),
            None => ResourceMonitor::new(resource_config),
        });
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::new()));

        let selector = SpecializedModelSelector::new(self.catalog.clone(), monitor.clone());
        let collaboration =
            CollaborativeModelOrchestrator::new(self.catalog.clone(), selector.profiles());
        let api = ApiServiceIntegration::new(self.admin.clone(), transport, self.config.api.clone());
        let quantization =
            QuantizationManager::new(monitor.clone(), self.config.default_quantization);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(ModelOrchestrationSystem {
            caller_tier: RwLock::new(self.config.caller_tier),
            config: self.config,
            catalog: self.catalog,
            admin: self.admin,
            monitor,
            quantization,
            selector,
            collaboration,
            api,
            task_cache: TaskCache::new(),
            ledger: UsageLedger::default(),
            api_routes: RwLock::new(HashMap::new()),
            load_locks: DashMap::new(),
            capacity_gate: Mutex::new(()),
            loading: parking_lot::Mutex::new(HashSet::new()),
            events,
            initialized: AtomicBool::new(false),
        })
    }
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct ModelOrchestrationSystem {
    config: OrchestrationConfig,
    catalog: Arc<dyn ModelCatalog>,
    admin: Option<Arc<dyn AdminSource>>,
    monitor: Arc<ResourceMonitor>,
    quantization: QuantizationManager,
    selector: SpecializedModelSelector,
    collaboration: CollaborativeModelOrchestrator,
    api: ApiServiceIntegration,
    task_cache: TaskCache,
    ledger: UsageLedger,
    /// Models served by a remote service instead of a local load
    api_routes: RwLock<HashMap<String, String>>,
    load_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Serializes budget checks so two loads cannot claim the last slot
    capacity_gate: Mutex<()>,
    /// Models holding a budget slot while their adapter loads
    loading: parking_lot::Mutex<HashSet<String>>,
    caller_tier: RwLock<ModelTier>,
    events: broadcast::Sender<OrchestrationEvent>,
    initialized: AtomicBool,
}

/// A budget slot held for the duration of one load.
struct LoadReservation<'a> {
    loading: &'a parking_lot::Mutex<HashSet<String>>,
    model_id: String,
}

impl Drop for LoadReservation<'_> {
    fn drop(&mut self) {
        self.loading.lock().remove(&self.model_id);
    }
}

enum LoadPlan {
    Local(LoadOptions),
    Api(String),
}

impl ModelOrchestrationSystem {
    pub fn builder(catalog: Arc<dyn ModelCatalog>) -> OrchestrationSystemBuilder {
        OrchestrationSystemBuilder {
            catalog,
            admin: None,
            transport: None,
            probe: None,
            config: OrchestrationConfig::default(),
        }
    }

    pub fn config(&self) -> &OrchestrationConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<dyn ModelCatalog> {
        &self.catalog
    }

    pub fn resource_monitor(&self) -> &Arc<ResourceMonitor> {
        &self.monitor
    }

    pub fn selector(&self) -> &SpecializedModelSelector {
        &self.selector
    }

    pub fn collaboration(&self) -> &CollaborativeModelOrchestrator {
        &self.collaboration
    }

    pub fn api_services(&self) -> &ApiServiceIntegration {
        &self.api
    }

    pub fn task_cache(&self) -> &TaskCache {
        &self.task_cache
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn caller_tier(&self) -> ModelTier {
        *self.caller_tier.read()
    }

    pub fn set_caller_tier(&self, tier: ModelTier) {
        let previous = std::mem::replace(&mut *self.caller_tier.write(), tier);
        if previous != tier {
            info!(%previous, %tier, "Caller tier changed");
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_resource_events(&self) -> broadcast::Receiver<ThresholdEvent> {
        self.monitor.subscribe()
    }

    fn emit(&self, event: OrchestrationEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Read the caller tier and API services from the admin source, build
    /// capability profiles and start sampling resources.
    ///
    /// Admin source failures are logged and do not abort initialization.
    pub async fn initialize(&self) -> OrchestratorResult<()> {
        if let Some(admin) = &self.admin {
            match admin.get_user_settings().await {
                Ok(settings) => {
                    if let Some(tier) = settings.tier {
                        self.set_caller_tier(tier);
                    }
                }
                Err(e) => warn!(error = %e, "User settings unavailable, keeping configured tier"),
            }

            if let Err(e) = self.api.initialize().await {
                warn!(error = %e, "API services could not be loaded");
            }
        }

        let profiles = self.selector.initialize().await;

        if self.config.start_resource_monitor {
            self.monitor.start().await;
        } else {
            self.monitor.sample_now().await;
        }

        self.initialized.store(true, Ordering::SeqCst);
        info!(
            tier = %self.caller_tier(),
            profiles,
            api_services = self.api.service_count(),
            "Orchestration system initialized"
        );
        Ok(())
    }

    /// Stop the monitor and unload every model. Returns `false` if some
    /// model failed to unload.
    pub async fn shutdown(&self) -> bool {
        self.monitor.stop();
        let clean = self.unload_all_models().await;
        self.initialized.store(false, Ordering::SeqCst);
        info!(clean, "Orchestration system shut down");
        clean
    }

    // ------------------------------------------------------------------------
    // Model assignment
    // ------------------------------------------------------------------------

    pub async fn get_model_by_id(&self, model_id: &str) -> Option<ModelDescriptor> {
        self.catalog.get_model(model_id).await
    }

    /// Pick, provision and bind a model for a task.
    pub async fn get_model_for_task(
        &self,
        request: &ModelRequest,
    ) -> OrchestratorResult<ModelAssignment> {
        let key = TaskCacheKey::new(
            request.model_type,
            request.task_type.as_deref(),
            request.strategy,
        );

        if let Some(model_id) = self.task_cache.get(&key) {
            if let Some(descriptor) = self.catalog.get_model(&model_id).await {
                if let Some(route) = self.current_route(&descriptor) {
                    self.ledger.touch(&model_id);
                    debug!(model_id = %model_id, task = %key.task_type, "Task cache hit");
                    return Ok(ModelAssignment {
                        model_id,
                        descriptor,
                        route,
                    });
                }
            }
            debug!(model_id = %model_id, "Stale task cache binding");
        }

        let tier = self.caller_tier();
        let candidate = match request.strategy {
            Some(strategy) => {
                let mut criteria = SelectionCriteria::new(request.model_type)
                    .with_strategy(strategy)
                    .with_max_tier(tier)
                    .offline_only(request.offline_only);
                if let Some(task) = &request.task_type {
                    criteria = criteria.with_task_type(task.clone());
                }
                if let Some(input) = &request.input {
                    criteria = criteria.with_input(input.clone());
                }
                self.selector.select_model(&criteria).await
            }
            None => {
                let criteria = ModelCriteria {
                    model_type: request.model_type,
                    task_type: request.task_type.clone(),
                    offline_only: request.offline_only,
                    max_tier: tier,
                };
                self.catalog.get_best_model_for_task(&criteria).await
            }
        };
        let candidate = candidate.ok_or_else(|| {
            OrchestratorError::NoEligibleModel(format!(
                "no {} model for task {} within tier {tier}",
                request.model_type, key.task_type
            ))
        })?;

        let route = match self.current_route(&candidate) {
            Some(route) => route,
            None if request.auto_load => {
                self.provision(&candidate, request.task_type.as_deref())
                    .await?
            }
            None => ModelRoute::Local { quantization: None },
        };

        // refresh after a load so the descriptor reports the new state
        let descriptor = self
            .catalog
            .get_model(&candidate.id)
            .await
            .unwrap_or(candidate);

        self.task_cache.bind(key, descriptor.id.clone());
        self.ledger.touch(&descriptor.id);
        debug!(model_id = %descriptor.id, route = ?route, "Model assigned");

        Ok(ModelAssignment {
            model_id: descriptor.id.clone(),
            descriptor,
            route,
        })
    }

    fn current_route(&self, descriptor: &ModelDescriptor) -> Option<ModelRoute> {
        if let Some(service_id) = self.api_routes.read().get(&descriptor.id) {
            return Some(ModelRoute::Api {
                service_id: service_id.clone(),
            });
        }
        descriptor.is_loaded().then(|| ModelRoute::Local {
            quantization: self.ledger.usage(&descriptor.id).quantization,
        })
    }

    /// API fallback when a hybrid model needs more RAM than is free and a
    /// service can take its task; otherwise a local load at the optimal
    /// level.
    fn plan_load(&self, descriptor: &ModelDescriptor, task_type: Option<&str>) -> LoadPlan {
        let free_mb = self.monitor.get_available_memory().ram_gb * 1024.0;
        let needed_mb = descriptor.min_required_ram_mb().unwrap_or(0.0);

        if descriptor.hybrid_capable && needed_mb > free_mb {
            if let Some(service_id) = self.find_service_for(descriptor, task_type) {
                debug!(
                    model_id = %descriptor.id,
                    needed_mb,
                    free_mb,
                    service_id = %service_id,
                    "Planning API fallback"
                );
                return LoadPlan::Api(service_id);
            }
        }

        let quantization = self
            .quantization
            .get_optimal_quantization(descriptor, &QuantizationConstraints::default())
            .map(|d| d.level);
        LoadPlan::Local(LoadOptions {
            quantization,
            ..LoadOptions::default()
        })
    }

    async fn provision(
        &self,
        descriptor: &ModelDescriptor,
        task_type: Option<&str>,
    ) -> OrchestratorResult<ModelRoute> {
        match self.plan_load(descriptor, task_type) {
            LoadPlan::Api(service_id) => {
                self.route_to_api(&descriptor.id, service_id.clone());
                Ok(ModelRoute::Api { service_id })
            }
            LoadPlan::Local(options) => {
                self.load_model(&descriptor.id, Some(options)).await?;
                Ok(ModelRoute::Local {
                    quantization: self.ledger.usage(&descriptor.id).quantization,
                })
            }
        }
    }

    fn find_service_for(&self, descriptor: &ModelDescriptor, task_type: Option<&str>) -> Option<String> {
        let query = ServiceQuery::default().with_tier(self.caller_tier());
        task_type
            .into_iter()
            .chain(descriptor.supported_tasks.iter().map(String::as_str))
            .find_map(|task| self.api.find_best_api_service_for_task(task, &query))
    }

    fn route_to_api(&self, model_id: &str, service_id: String) {
        self.api_routes
            .write()
            .insert(model_id.to_string(), service_id.clone());
        info!(model_id, service_id = %service_id, "Model routed to API service");
        self.emit(OrchestrationEvent::ApiFallback {
            model_id: model_id.to_string(),
            service_id,
        });
    }

    // ------------------------------------------------------------------------
    // Loading and unloading
    // ------------------------------------------------------------------------

    fn load_lock(&self, model_id: &str) -> Arc<Mutex<()>> {
        self.load_locks
            .entry(model_id.to_string())
            .or_default()
            .clone()
    }

    /// Load a model, evicting another one first if the budget is full.
    ///
    /// Loading an already loaded model succeeds without side effects.
    /// `options.use_api` routes the model to a remote service instead.
    pub async fn load_model(
        &self,
        model_id: &str,
        options: Option<LoadOptions>,
    ) -> OrchestratorResult<bool> {
        let descriptor = self
            .catalog
            .get_model(model_id)
            .await
            .ok_or_else(|| OrchestratorError::ModelNotFound(model_id.to_string()))?;

        let granted = self.caller_tier();
        if !granted.grants(descriptor.tier) {
            warn!(model_id, required = %descriptor.tier, granted = %granted, "Tier denied");
            return Err(OrchestratorError::TierDenied {
                model_id: model_id.to_string(),
                required: descriptor.tier,
                granted,
            });
        }

        let options = options.unwrap_or_default();
        if options.use_api {
            let service_id = match options.api_service_id.clone() {
                Some(id) => {
                    if self.api.get_service(&id).is_none() {
                        return Err(OrchestratorError::ServiceNotFound(id));
                    }
                    id
                }
                None => self.find_service_for(&descriptor, None).ok_or_else(|| {
                    OrchestratorError::ServiceNotFound(format!(
                        "no API service can serve model {model_id}"
                    ))
                })?,
            };
            self.route_to_api(model_id, service_id);
            return Ok(true);
        }

        let adapter = self.catalog.get_adapter(model_id).await.ok_or_else(|| {
            OrchestratorError::Config(format!("no adapter registered for model {model_id}"))
        })?;

        let lock = self.load_lock(model_id);
        let _guard = lock.lock().await;

        if self.catalog.is_model_loaded(model_id).await {
            debug!(model_id, "Model already loaded");
            return Ok(true);
        }

        let _reservation = self.reserve_capacity(model_id).await?;

        let available = self.monitor.get_available_memory();
        let (level, fits) = match options.quantization {
            Some(level) => (
                Some(level),
                descriptor
                    .requirement_for(level)
                    .is_none_or(|r| r.fits(&available)),
            ),
            None => match self
                .quantization
                .get_optimal_quantization(&descriptor, &QuantizationConstraints::default())
            {
                Some(QuantizationDecision { level, fits, .. }) => (Some(level), fits),
                None => (None, true),
            },
        };

        self.catalog
            .track_model_load_status(model_id, LoadState::Loading, None)
            .await?;

        let load_options = LoadOptions {
            quantization: level,
            ..options
        };
        let failure = match adapter.load(&load_options).await {
            Ok(true) => None,
            Ok(false) => Some("adapter declined to load".to_string()),
            Err(e) => Some(e.to_string()),
        };

        if let Some(reason) = failure {
            if let Err(e) = self
                .catalog
                .track_model_load_status(model_id, LoadState::Failed, None)
                .await
            {
                warn!(model_id, error = %e, "Could not record failed load");
            }
            warn!(model_id, level = ?level, fits, reason = %reason, "Model load failed");
            return Err(if fits {
                OrchestratorError::ModelLoadFailed(format!("{model_id}: {reason}"))
            } else {
                OrchestratorError::InsufficientMemory(format!(
                    "{model_id} does not fit at any supported level: {reason}"
                ))
            });
        }

        let memory_usage_mb = adapter.memory_usage_mb();
        self.catalog
            .track_model_load_status(model_id, LoadState::Loaded, Some(memory_usage_mb))
            .await?;
        self.ledger.set_quantization(model_id, level);
        self.api_routes.write().remove(model_id);

        info!(model_id, level = ?level, memory_usage_mb, "Model loaded");
        self.emit(OrchestrationEvent::ModelLoaded {
            model_id: model_id.to_string(),
            quantization: level,
            memory_usage_mb,
        });
        Ok(true)
    }

    /// Evict until one more model fits in the concurrent-model budget, then
    /// hold a slot for `loading_id` until the returned reservation drops.
    ///
    /// Loads still in progress count against the budget.
    async fn reserve_capacity(
        &self,
        loading_id: &str,
    ) -> OrchestratorResult<LoadReservation<'_>> {
        let _gate = self.capacity_gate.lock().await;
        loop {
            let loaded = self
                .catalog
                .get_loaded_models()
                .await
                .into_iter()
                .filter(|m| m.id != loading_id)
                .count();
            let in_progress = self
                .loading
                .lock()
                .iter()
                .filter(|id| id.as_str() != loading_id)
                .count();
            let occupied = loaded + in_progress;
            if occupied < self.config.max_concurrent_models {
                self.loading.lock().insert(loading_id.to_string());
                return Ok(LoadReservation {
                    loading: &self.loading,
                    model_id: loading_id.to_string(),
                });
            }

            let Some(victim) = self.eviction_candidates().await.into_iter().next() else {
                return Err(OrchestratorError::CapacityExceeded(format!(
                    "{occupied} models loaded or loading (max {}), none can be evicted",
                    self.config.max_concurrent_models
                )));
            };
            if !self.evict(&victim).await? {
                return Err(OrchestratorError::CapacityExceeded(format!(
                    "could not evict {} to make room for {loading_id}",
                    victim.id
                )));
            }
        }
    }

    /// Loaded models outside sessions and not executing, least used first.
    async fn eviction_candidates(&self) -> Vec<ModelDescriptor> {
        let mut candidates: Vec<_> = self
            .catalog
            .get_loaded_models()
            .await
            .into_iter()
            .filter(|m| self.ledger.in_flight(&m.id) == 0)
            .filter(|m| !self.collaboration.is_model_in_session(&m.id))
            .collect();
        candidates.sort_by_key(|m| self.ledger.eviction_key(&m.id));
        candidates
    }

    async fn evict(&self, descriptor: &ModelDescriptor) -> OrchestratorResult<bool> {
        let freed_mb = descriptor.footprint_mb();
        self.task_cache.invalidate_model(&descriptor.id);
        let unloaded = self.unload_now(&descriptor.id).await?;
        if unloaded {
            info!(model_id = %descriptor.id, freed_mb, "Model evicted");
            self.emit(OrchestrationEvent::ModelEvicted {
                model_id: descriptor.id.clone(),
                freed_mb,
            });
        }
        Ok(unloaded)
    }

    fn is_held(&self, model_id: &str) -> bool {
        self.task_cache.is_bound(model_id)
            || self.collaboration.is_model_in_session(model_id)
            || self.ledger.in_flight(model_id) > 0
    }

    /// Unload a model that nothing refers to.
    ///
    /// Returns `Ok(false)` while a task-cache binding, a session or an
    /// execution holds the model; see [`release_model`](Self::release_model).
    pub async fn unload_model(&self, model_id: &str) -> OrchestratorResult<bool> {
        let descriptor = self
            .catalog
            .get_model(model_id)
            .await
            .ok_or_else(|| OrchestratorError::ModelNotFound(model_id.to_string()))?;

        if !descriptor.is_loaded() && !self.api_routes.read().contains_key(model_id) {
            return Ok(true);
        }
        if self.is_held(model_id) {
            debug!(model_id, "Model in use, not unloading");
            return Ok(false);
        }
        self.unload_now(model_id).await
    }

    /// Drop the model's task-cache bindings, then unload it.
    pub async fn release_model(&self, model_id: &str) -> OrchestratorResult<bool> {
        let dropped = self.task_cache.invalidate_model(model_id);
        if dropped > 0 {
            debug!(model_id, dropped, "Task cache bindings released");
        }
        self.unload_model(model_id).await
    }

    async fn unload_now(&self, model_id: &str) -> OrchestratorResult<bool> {
        let was_routed = self.api_routes.write().remove(model_id).is_some();

        let Some(adapter) = self.catalog.get_adapter(model_id).await else {
            return Ok(was_routed);
        };

        let lock = self.load_lock(model_id);
        let _guard = lock.lock().await;

        if !self.catalog.is_model_loaded(model_id).await && !adapter.is_loaded() {
            return Ok(true);
        }

        match adapter.unload().await {
            Ok(true) => {
                self.catalog
                    .track_model_load_status(model_id, LoadState::Unloaded, None)
                    .await?;
                self.ledger.set_quantization(model_id, None);
                info!(model_id, "Model unloaded");
                self.emit(OrchestrationEvent::ModelUnloaded {
                    model_id: model_id.to_string(),
                });
                Ok(true)
            }
            Ok(false) => {
                warn!(model_id, "Adapter declined to unload");
                Ok(false)
            }
            Err(e) => {
                warn!(model_id, error = %e, "Unload failed");
                Err(e)
            }
        }
    }

    /// Unload everything regardless of bindings, sessions or executions.
    ///
    /// Continues past failures; `true` only if every unload succeeded.
    pub async fn unload_all_models(&self) -> bool {
        self.task_cache.clear();

        let mut targets: Vec<String> = self
            .catalog
            .get_loaded_models()
            .await
            .into_iter()
            .map(|m| m.id)
            .collect();
        for model_id in self.api_routes.read().keys() {
            if !targets.contains(model_id) {
                targets.push(model_id.clone());
            }
        }

        let mut all_ok = true;
        for model_id in &targets {
            match self.unload_now(model_id).await {
                Ok(true) => {}
                Ok(false) => all_ok = false,
                Err(e) => {
                    warn!(model_id = %model_id, error = %e, "Unload failed during unload-all");
                    all_ok = false;
                }
            }
        }
        info!(models = targets.len(), all_ok, "All models unloaded");
        all_ok
    }

    /// Evict least-used idle models until model memory is at or below
    /// `target_mb` (default: `memory_target_ratio` of the current usage).
    pub async fn optimize_memory_usage(&self, target_mb: Option<f64>) -> MemoryOptimizationReport {
        let before_mb: f64 = self
            .catalog
            .get_loaded_models()
            .await
            .iter()
            .map(ModelDescriptor::footprint_mb)
            .sum();
        let target_mb = target_mb.unwrap_or(before_mb * self.config.memory_target_ratio);

        let mut current_mb = before_mb;
        let mut evicted = Vec::new();
        for candidate in self.eviction_candidates().await {
            if current_mb <= target_mb {
                break;
            }
            match self.evict(&candidate).await {
                Ok(true) => {
                    current_mb -= candidate.footprint_mb();
                    evicted.push(candidate.id);
                }
                Ok(false) => {}
                Err(e) => warn!(model_id = %candidate.id, error = %e, "Eviction failed"),
            }
        }

        let report = MemoryOptimizationReport {
            before_mb,
            target_mb,
            after_mb: current_mb.max(0.0),
            evicted,
        };
        if report.target_reached() {
            info!(
                before_mb,
                after_mb = report.after_mb,
                evicted = report.evicted.len(),
                "Memory optimized"
            );
        } else {
            warn!(
                before_mb,
                target_mb,
                after_mb = report.after_mb,
                "Memory target not reached, nothing left to evict"
            );
        }
        report
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    /// Run one model on `input`, locally or through its API route.
    ///
    /// The model counts as in use until this returns.
    pub async fn execute_model(
        &self,
        model_id: &str,
        input: &TaskInput,
        options: &ExecuteOptions,
    ) -> OrchestratorResult<TaskOutput> {
        let descriptor = self
            .catalog
            .get_model(model_id)
            .await
            .ok_or_else(|| OrchestratorError::ModelNotFound(model_id.to_string()))?;

        let _lease = self.ledger.lease(model_id);
        let started = Instant::now();
        let service_id = self.api_routes.read().get(model_id).cloned();

        let result = match service_id {
            Some(service_id) => self.execute_via_api(&service_id, &descriptor, input, options).await,
            None if descriptor.is_loaded() => match self.catalog.get_adapter(model_id).await {
                Some(adapter) => adapter.execute(input, options).await,
                None => Err(OrchestratorError::Config(format!(
                    "no adapter registered for model {model_id}"
                ))),
            },
            None => Err(OrchestratorError::ExecutionFailed(format!(
                "model {model_id} is not loaded"
            ))),
        };

        let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
        let record = if result.is_ok() {
            PerformanceRecord::success(latency_ms)
        } else {
            PerformanceRecord::failure(latency_ms)
        };
        self.selector.record_model_performance(model_id, record);
        self.ledger.touch(model_id);

        if let Err(e) = &result {
            warn!(model_id, latency_ms, error = %e, "Model execution failed");
        }
        result
    }

    async fn execute_via_api(
        &self,
        service_id: &str,
        descriptor: &ModelDescriptor,
        input: &TaskInput,
        options: &ExecuteOptions,
    ) -> OrchestratorResult<TaskOutput> {
        let body = json!({
            "model": descriptor.id,
            "input": input.content,
            "task_type": input.task_type,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
        });
        let response = self
            .api
            .execute_api_request(service_id, &ApiRequest::new(body))
            .await?;
        Ok(output_from_api_body(response.body))
    }

    // ------------------------------------------------------------------------
    // Collaboration
    // ------------------------------------------------------------------------

    /// Create a session. The request's tier ceiling is clamped to the
    /// caller's tier.
    pub async fn create_collaboration_session(
        &self,
        mut request: SessionRequest,
    ) -> OrchestratorResult<CollaborationSession> {
        request.max_tier = request.max_tier.min(self.caller_tier());
        let session = self.collaboration.create_session(request).await?;
        self.emit(OrchestrationEvent::SessionCreated {
            session_id: session.id.clone(),
            strategy: session.strategy,
            participants: session.participants().to_vec(),
        });
        Ok(session)
    }

    /// Load the session's participants (best effort) and run its protocol.
    ///
    /// Participants that could not be loaded are left out of this run.
    pub async fn execute_collaborative_task(
        &self,
        session_id: &str,
        input: &TaskInput,
        options: &ExecuteOptions,
    ) -> OrchestratorResult<CollaborationResult> {
        let session = self
            .collaboration
            .session(session_id)
            .ok_or_else(|| OrchestratorError::SessionNotFound(session_id.to_string()))?;

        for model_id in session.participants() {
            if let Err(e) = self.load_model(model_id, None).await {
                warn!(session_id, model_id = %model_id, error = %e, "Participant failed to load");
            }
        }

        let _leases: Vec<_> = session
            .participants()
            .iter()
            .map(|id| self.ledger.lease(id))
            .collect();
        let result = self
            .collaboration
            .execute_task(session_id, input, options)
            .await?;

        for contribution in &result.contributions {
            self.ledger.touch(&contribution.model_id);
        }
        Ok(result)
    }

    pub fn close_collaboration_session(&self, session_id: &str) -> bool {
        let closed = self.collaboration.close_session(session_id);
        if closed {
            self.emit(OrchestrationEvent::SessionClosed {
                session_id: session_id.to_string(),
            });
        }
        closed
    }

    // ------------------------------------------------------------------------
    // Pass-throughs
    // ------------------------------------------------------------------------

    pub async fn get_optimal_quantization(
        &self,
        model_id: &str,
        constraints: &QuantizationConstraints,
    ) -> OrchestratorResult<Option<QuantizationDecision>> {
        let descriptor = self
            .catalog
            .get_model(model_id)
            .await
            .ok_or_else(|| OrchestratorError::ModelNotFound(model_id.to_string()))?;
        Ok(self
            .quantization
            .get_optimal_quantization(&descriptor, constraints))
    }

    /// The model's current API route, else the best service for any of its
    /// tasks within the caller's tier.
    pub async fn get_api_service_for_model(
        &self,
        model_id: &str,
    ) -> OrchestratorResult<Option<String>> {
        if let Some(service_id) = self.api_routes.read().get(model_id) {
            return Ok(Some(service_id.clone()));
        }
        let descriptor = self
            .catalog
            .get_model(model_id)
            .await
            .ok_or_else(|| OrchestratorError::ModelNotFound(model_id.to_string()))?;
        Ok(self.find_service_for(&descriptor, None))
    }

    pub fn track_api_usage(&self, service_id: &str, estimated_tokens: u64) {
        self.api.track_api_usage(service_id, estimated_tokens);
    }

    pub fn record_model_performance(&self, model_id: &str, record: PerformanceRecord) {
        self.selector.record_model_performance(model_id, record);
    }

    pub fn model_usage(&self, model_id: &str) -> ModelUsage {
        self.ledger.usage(model_id)
    }

    pub fn default_quantization(&self) -> QuantizationLevel {
        self.quantization.default_level()
    }

    pub async fn get_status(&self) -> OrchestrationStatus {
        let loaded_models = self
            .catalog
            .get_loaded_models()
            .await
            .into_iter()
            .map(|m| {
                let usage = self.ledger.usage(&m.id);
                LoadedModelStatus {
                    memory_usage_mb: m.footprint_mb(),
                    quantization: usage.quantization,
                    invocations: usage.invocations,
                    last_used: usage.last_used,
                    in_flight: self.ledger.in_flight(&m.id),
                    average_latency_ms: self.selector.average_latency(&m.id),
                    success_rate: self.selector.success_rate(&m.id),
                    model_id: m.id,
                }
            })
            .collect();

        OrchestrationStatus {
            initialized: self.is_initialized(),
            caller_tier: self.caller_tier(),
            resources: self.monitor.get_current_readings(),
            loaded_models,
            api_routes: self.api_routes.read().clone(),
            api_services: self.api.service_status(),
            active_sessions: self.collaboration.active_session_count(),
            task_cache_entries: self.task_cache.len(),
        }
    }
}

/// Best-effort text extraction from common response shapes.
fn output_from_api_body(body: Value) -> TaskOutput {
    let content = ["/content", "/output", "/text", "/choices/0/message/content", "/choices/0/text"]
        .iter()
        .find_map(|pointer| body.pointer(pointer).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| match &body {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        });

    let mut output = TaskOutput::text(content);
    output.usage = body
        .get("usage")
        .and_then(|u| serde_json::from_value(u.clone()).ok());
    output.with_data(body)
}
