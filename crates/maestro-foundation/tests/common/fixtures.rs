//! Catalog, probe and system fixtures.

use std::collections::HashMap;
use std::sync::Arc;

use maestro_foundation::api_service::HttpTransport;
use maestro_foundation::{
    ApiConfig, InMemoryModelCatalog, ModelOrchestrationSystem, OrchestrationConfig, StaticProbe,
};
use maestro_kernel::{AdminSource, ModelDescriptor, ModelType, QuantizationLevel};

use super::mock_adapter::MockAdapter;
use super::mock_transport::MockTransport;

/// Text model supporting `chat` and `summarization`, INT4 at 2 GB and
/// INT8 at 4 GB of RAM.
pub fn text_model(id: &str, accuracy: f64) -> ModelDescriptor {
    ModelDescriptor::new(id, ModelType::Text)
        .with_accuracy(accuracy)
        .with_tasks(["chat", "summarization"])
        .with_level(QuantizationLevel::Int4, 2.0, 0.0)
        .with_level(QuantizationLevel::Int8, 4.0, 0.0)
}

/// Catalog plus handles to the scripted adapters, by model id.
pub struct Fixture {
    pub catalog: Arc<InMemoryModelCatalog>,
    pub adapters: HashMap<String, Arc<MockAdapter>>,
}

impl Fixture {
    pub fn new(models: Vec<(ModelDescriptor, MockAdapter)>) -> Self {
        let catalog = Arc::new(InMemoryModelCatalog::new());
        let mut adapters = HashMap::new();
        for (descriptor, adapter) in models {
            let adapter = Arc::new(adapter);
            adapters.insert(descriptor.id.clone(), adapter.clone());
            assert!(catalog.register(descriptor, adapter), "duplicate fixture model");
        }
        Self { catalog, adapters }
    }

    pub fn adapter(&self, model_id: &str) -> &Arc<MockAdapter> {
        &self.adapters[model_id]
    }
}

/// Host with `free_gb` of 32 GB free and no GPU.
pub fn probe(free_gb: f64) -> Arc<StaticProbe> {
    Arc::new(StaticProbe::with_memory(32.0, free_gb))
}

/// Defaults with the periodic monitor off and millisecond backoff.
pub fn quiet_config() -> OrchestrationConfig {
    OrchestrationConfig::default()
        .with_resource_monitor(false)
        .with_api(ApiConfig {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 5,
            timeout_ms: 1_000,
            ..ApiConfig::default()
        })
}

pub struct SystemBuilder {
    config: OrchestrationConfig,
    free_gb: f64,
    admin: Option<Arc<dyn AdminSource>>,
    transport: Arc<dyn HttpTransport>,
}

impl SystemBuilder {
    pub fn new() -> Self {
        Self {
            config: quiet_config(),
            free_gb: 16.0,
            admin: None,
            transport: Arc::new(MockTransport::new()),
        }
    }

    pub fn config(mut self, config: OrchestrationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn free_gb(mut self, free_gb: f64) -> Self {
        self.free_gb = free_gb;
        self
    }

    pub fn admin(mut self, admin: Arc<dyn AdminSource>) -> Self {
        self.admin = Some(admin);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Build and initialize.
    pub async fn start(self, fixture: &Fixture) -> ModelOrchestrationSystem {
        let mut builder = ModelOrchestrationSystem::builder(fixture.catalog.clone())
            .config(self.config)
            .probe(probe(self.free_gb))
            .transport(self.transport);
        if let Some(admin) = self.admin {
            builder = builder.admin(admin);
        }
        let system = builder.build().expect("valid test config");
        system.initialize().await.expect("initialize");
        system
    }
}
