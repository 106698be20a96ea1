//! Model catalog contract.
//!
//! The catalog owns model descriptors and their adapters. The orchestration
//! core reads it and reports load-state changes back through
//! [`ModelCatalog::track_model_load_status`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::adapter::ModelAdapter;
use crate::error::OrchestratorResult;
use crate::model::{LoadState, ModelCriteria, ModelDescriptor, ModelType};

#[async_trait]
pub trait ModelCatalog: Send + Sync {
    async fn get_model(&self, model_id: &str) -> Option<ModelDescriptor>;

    async fn get_adapter(&self, model_id: &str) -> Option<Arc<dyn ModelAdapter>>;

    async fn get_models_by_type(&self, model_type: ModelType) -> Vec<ModelDescriptor>;

    async fn get_all_models(&self) -> Vec<ModelDescriptor>;

    async fn get_loaded_models(&self) -> Vec<ModelDescriptor>;

    async fn is_model_loaded(&self, model_id: &str) -> bool;

    /// Record a load-state transition and, when loaded, the new footprint.
    async fn track_model_load_status(
        &self,
        model_id: &str,
        state: LoadState,
        memory_usage_mb: Option<f64>,
    ) -> OrchestratorResult<()>;

    /// The catalog's own ranking for a request without an explicit strategy.
    async fn get_best_model_for_task(&self, criteria: &ModelCriteria) -> Option<ModelDescriptor>;

    /// Scan a directory for model manifests. Returns the number registered.
    async fn discover_and_register_models(&self, dir: &Path) -> OrchestratorResult<usize>;

    /// Register the models that ship with the catalog. Returns the number registered.
    async fn register_built_in_models(&self) -> OrchestratorResult<usize>;
}

/// Turns a descriptor into an adapter.
///
/// Catalogs that discover manifests call this once per model.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, descriptor: &ModelDescriptor) -> OrchestratorResult<Arc<dyn ModelAdapter>>;
}

impl<F> AdapterFactory for F
where
    F: Fn(&ModelDescriptor) -> OrchestratorResult<Arc<dyn ModelAdapter>> + Send + Sync,
{
    fn create(&self, descriptor: &ModelDescriptor) -> OrchestratorResult<Arc<dyn ModelAdapter>> {
        self(descriptor)
    }
}
