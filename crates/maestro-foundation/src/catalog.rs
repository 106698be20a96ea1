//! In-memory model catalog.
//!
//! Descriptors are registered directly with an adapter, discovered from a
//! directory of manifests, or taken from a built-in list. Manifests and
//! built-ins are turned into adapters by an [`AdapterFactory`].
//!
//! A manifest is a YAML, TOML or JSON file holding either one descriptor or
//! a `models` list:
//!
//! ```toml
//! [[models]]
//! id = "llama-3-8b"
//! model_type = "TEXT"
//! accuracy = 0.82
//! quantization_levels = ["INT4", "INT8"]
//!
//! [models.memory_requirements.INT4]
//! ram_gb = 5.0
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use maestro_kernel::config::{is_supported, load_config};
use maestro_kernel::{
    AdapterFactory, LoadState, ModelAdapter, ModelCatalog, ModelCriteria, ModelDescriptor,
    ModelType, OrchestratorError, OrchestratorResult,
};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    models: Vec<ModelDescriptor>,
}

fn read_manifest(path: &Path) -> OrchestratorResult<Vec<ModelDescriptor>> {
    let file: ManifestFile = load_config(path)
        .map_err(|e| OrchestratorError::Config(format!("{}: {e}", path.display())))?;
    if !file.models.is_empty() {
        return Ok(file.models);
    }
    let single: ModelDescriptor = load_config(path)
        .map_err(|e| OrchestratorError::Config(format!("{}: {e}", path.display())))?;
    Ok(vec![single])
}

fn scan_manifests(dir: &Path) -> OrchestratorResult<Vec<(PathBuf, Vec<ModelDescriptor>)>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        OrchestratorError::Config(format!("cannot read model directory {}: {e}", dir.display()))
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_supported(p))
        .collect();
    paths.sort();

    let mut found = Vec::new();
    for path in paths {
        match read_manifest(&path) {
            Ok(models) => found.push((path, models)),
            Err(e) => warn!(error = %e, "Skipping unreadable model manifest"),
        }
    }
    Ok(found)
}

struct Entry {
    descriptor: ModelDescriptor,
    adapter: Arc<dyn ModelAdapter>,
}

#[derive(Default)]
pub struct InMemoryModelCatalog {
    // registration order is preserved for deterministic ranking ties
    entries: RwLock<Vec<Entry>>,
    factory: Option<Arc<dyn AdapterFactory>>,
    built_ins: Vec<ModelDescriptor>,
}

impl InMemoryModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_factory(mut self, factory: Arc<dyn AdapterFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_built_in_models(mut self, models: Vec<ModelDescriptor>) -> Self {
        self.built_ins = models;
        self
    }

    /// Register a model with its adapter. `false` if the id is taken.
    pub fn register(&self, descriptor: ModelDescriptor, adapter: Arc<dyn ModelAdapter>) -> bool {
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.descriptor.id == descriptor.id) {
            warn!(model_id = %descriptor.id, "Model already registered");
            return false;
        }
        debug!(model_id = %descriptor.id, model_type = %descriptor.model_type, "Model registered");
        entries.push(Entry {
            descriptor,
            adapter,
        });
        true
    }

    pub fn unregister(&self, model_id: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.descriptor.id != model_id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn register_with_factory(&self, descriptors: Vec<ModelDescriptor>) -> OrchestratorResult<usize> {
        let factory = self
            .factory
            .as_ref()
            .ok_or_else(|| OrchestratorError::Config("no adapter factory configured".into()))?;

        let mut registered = 0;
        for mut descriptor in descriptors {
            descriptor.load_state = LoadState::Unloaded;
            descriptor.memory_usage_mb = 0.0;
            match factory.create(&descriptor) {
                Ok(adapter) => {
                    if self.register(descriptor, adapter) {
                        registered += 1;
                    }
                }
                Err(e) => warn!(model_id = %descriptor.id, error = %e, "Adapter creation failed"),
            }
        }
        Ok(registered)
    }

    fn collect(&self, filter: impl Fn(&ModelDescriptor) -> bool) -> Vec<ModelDescriptor> {
        self.entries
            .read()
            .iter()
            .filter(|e| filter(&e.descriptor))
            .map(|e| e.descriptor.clone())
            .collect()
    }
}

#[async_trait]
impl ModelCatalog for InMemoryModelCatalog {
    async fn get_model(&self, model_id: &str) -> Option<ModelDescriptor> {
        self.collect(|m| m.id == model_id).into_iter().next()
    }

    async fn get_adapter(&self, model_id: &str) -> Option<Arc<dyn ModelAdapter>> {
        self.entries
            .read()
            .iter()
            .find(|e| e.descriptor.id == model_id)
            .map(|e| e.adapter.clone())
    }

    async fn get_models_by_type(&self, model_type: ModelType) -> Vec<ModelDescriptor> {
        self.collect(|m| m.model_type == model_type)
    }

    async fn get_all_models(&self) -> Vec<ModelDescriptor> {
        self.collect(|_| true)
    }

    async fn get_loaded_models(&self) -> Vec<ModelDescriptor> {
        self.collect(ModelDescriptor::is_loaded)
    }

    async fn is_model_loaded(&self, model_id: &str) -> bool {
        self.entries
            .read()
            .iter()
            .any(|e| e.descriptor.id == model_id && e.descriptor.is_loaded())
    }

    async fn track_model_load_status(
        &self,
        model_id: &str,
        state: LoadState,
        memory_usage_mb: Option<f64>,
    ) -> OrchestratorResult<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .iter_mut()
            .find(|e| e.descriptor.id == model_id)
            .ok_or_else(|| OrchestratorError::ModelNotFound(model_id.to_string()))?;

        entry.descriptor.load_state = state;
        match state {
            LoadState::Loaded => {
                if let Some(mb) = memory_usage_mb {
                    entry.descriptor.memory_usage_mb = mb;
                }
            }
            LoadState::Unloaded | LoadState::Failed => entry.descriptor.memory_usage_mb = 0.0,
            LoadState::Loading => {}
        }
        Ok(())
    }

    /// Loaded models first, then task-specific accuracy.
    async fn get_best_model_for_task(&self, criteria: &ModelCriteria) -> Option<ModelDescriptor> {
        let task = criteria.task_type.as_deref();
        let mut best: Option<ModelDescriptor> = None;
        for model in self.collect(|m| criteria.admits(m)) {
            let better = match &best {
                None => true,
                Some(current) => {
                    (model.is_loaded(), model.accuracy_for(task))
                        > (current.is_loaded(), current.accuracy_for(task))
                }
            };
            if better {
                best = Some(model);
            }
        }
        best
    }

    async fn discover_and_register_models(&self, dir: &Path) -> OrchestratorResult<usize> {
        if self.factory.is_none() {
            return Err(OrchestratorError::Config(
                "no adapter factory configured".into(),
            ));
        }

        let owned = dir.to_path_buf();
        let manifests = tokio::task::spawn_blocking(move || scan_manifests(&owned))
            .await
            .map_err(|e| OrchestratorError::Other(format!("manifest scan aborted: {e}")))??;

        let mut registered = 0;
        for (path, models) in manifests {
            let count = self.register_with_factory(models)?;
            debug!(path = %path.display(), registered = count, "Manifest processed");
            registered += count;
        }
        info!(dir = %dir.display(), registered, "Model discovery complete");
        Ok(registered)
    }

    async fn register_built_in_models(&self) -> OrchestratorResult<usize> {
        if self.built_ins.is_empty() {
            return Ok(0);
        }
        let registered = self.register_with_factory(self.built_ins.clone())?;
        info!(registered, "Built-in models registered");
        Ok(registered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_kernel::{
        ExecuteOptions, LoadOptions, ModelTier, QuantizationLevel, TaskInput, TaskOutput,
    };
    use std::fs;
    use tempfile::TempDir;

    struct Stub(String);

    #[async_trait]
    impl ModelAdapter for Stub {
        fn model_id(&self) -> &str {
            &self.0
        }
        async fn load(&self, _: &LoadOptions) -> OrchestratorResult<bool> {
            Ok(true)
        }
        async fn unload(&self) -> OrchestratorResult<bool> {
            Ok(true)
        }
        async fn execute(&self, _: &TaskInput, _: &ExecuteOptions) -> OrchestratorResult<TaskOutput> {
            Ok(TaskOutput::text(self.0.clone()))
        }
        fn is_loaded(&self) -> bool {
            false
        }
        fn memory_usage_mb(&self) -> f64 {
            0.0
        }
    }

    fn stub_factory() -> Arc<dyn AdapterFactory> {
        Arc::new(|d: &ModelDescriptor| -> OrchestratorResult<Arc<dyn ModelAdapter>> {
            Ok(Arc::new(Stub(d.id.clone())))
        })
    }

    fn stub(id: &str) -> Arc<dyn ModelAdapter> {
        Arc::new(Stub(id.to_string()))
    }

    #[tokio::test]
    async fn register_rejects_duplicates() {
        let catalog = InMemoryModelCatalog::new();
        assert!(catalog.register(ModelDescriptor::new("a", ModelType::Text), stub("a")));
        assert!(!catalog.register(ModelDescriptor::new("a", ModelType::Code), stub("a")));
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get_adapter("a").await.is_some());
        assert!(catalog.unregister("a"));
        assert!(catalog.get_model("a").await.is_none());
    }

    #[tokio::test]
    async fn load_status_updates_descriptor() {
        let catalog = InMemoryModelCatalog::new();
        catalog.register(ModelDescriptor::new("a", ModelType::Text), stub("a"));

        catalog
            .track_model_load_status("a", LoadState::Loaded, Some(2048.0))
            .await
            .unwrap();
        assert!(catalog.is_model_loaded("a").await);
        assert_eq!(catalog.get_loaded_models().await.len(), 1);
        assert_eq!(catalog.get_model("a").await.unwrap().memory_usage_mb, 2048.0);

        catalog
            .track_model_load_status("a", LoadState::Unloaded, None)
            .await
            .unwrap();
        assert!(!catalog.is_model_loaded("a").await);
        assert_eq!(catalog.get_model("a").await.unwrap().memory_usage_mb, 0.0);

        let err = catalog
            .track_model_load_status("ghost", LoadState::Loaded, None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn best_model_prefers_loaded_then_accuracy() {
        let catalog = InMemoryModelCatalog::new();
        catalog.register(
            ModelDescriptor::new("accurate", ModelType::Text).with_accuracy(0.9),
            stub("accurate"),
        );
        catalog.register(
            ModelDescriptor::new("warm", ModelType::Text).with_accuracy(0.6),
            stub("warm"),
        );
        catalog.register(
            ModelDescriptor::new("premium", ModelType::Text)
                .with_accuracy(0.99)
                .with_tier(ModelTier::Enterprise),
            stub("premium"),
        );

        let criteria = ModelCriteria::new(ModelType::Text);
        assert_eq!(
            catalog.get_best_model_for_task(&criteria).await.unwrap().id,
            "accurate"
        );

        catalog
            .track_model_load_status("warm", LoadState::Loaded, Some(100.0))
            .await
            .unwrap();
        assert_eq!(catalog.get_best_model_for_task(&criteria).await.unwrap().id, "warm");

        assert!(
            catalog
                .get_best_model_for_task(&ModelCriteria::new(ModelType::Audio))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn discovers_manifests_in_every_format() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("llama.toml"),
            r#"
[[models]]
id = "llama"
model_type = "TEXT"
accuracy = 0.8
supported_tasks = ["chat"]
quantization_levels = ["INT4", "INT8"]

[models.memory_requirements.INT4]
ram_gb = 4.0

[[models]]
id = "coder"
model_type = "CODE"
"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("embed.json"),
            r#"{"id": "embedder", "model_type": "EMBEDDING", "tier": "PRO"}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("whisper.yaml"),
            "id: whisper\nmodel_type: AUDIO\noffline_capable: true\n",
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "not a manifest").unwrap();
        fs::write(dir.path().join("broken.json"), "{").unwrap();

        let catalog = InMemoryModelCatalog::new().with_factory(stub_factory());
        let count = catalog.discover_and_register_models(dir.path()).await.unwrap();
        assert_eq!(count, 4);

        let llama = catalog.get_model("llama").await.unwrap();
        assert!(llama.supports_level(QuantizationLevel::Int8));
        assert_eq!(
            llama.requirement_for(QuantizationLevel::Int4).map(|r| r.ram_gb),
            Some(4.0)
        );
        assert_eq!(catalog.get_model("embedder").await.unwrap().tier, ModelTier::Pro);
        assert!(catalog.get_model("whisper").await.unwrap().offline_capable);
        assert_eq!(catalog.get_models_by_type(ModelType::Code).await.len(), 1);
    }

    #[tokio::test]
    async fn discovery_needs_a_factory_and_a_directory() {
        let catalog = InMemoryModelCatalog::new();
        assert!(
            catalog
                .discover_and_register_models(Path::new("/tmp"))
                .await
                .is_err()
        );

        let catalog = InMemoryModelCatalog::new().with_factory(stub_factory());
        let err = catalog
            .discover_and_register_models(Path::new("/nonexistent/maestro/models"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }

    #[tokio::test]
    async fn built_ins_go_through_the_factory() {
        let catalog = InMemoryModelCatalog::new()
            .with_factory(stub_factory())
            .with_built_in_models(vec![
                ModelDescriptor::new("a", ModelType::Text),
                ModelDescriptor::new("b", ModelType::Vision),
            ]);
        assert_eq!(catalog.register_built_in_models().await.unwrap(), 2);
        // already registered
        assert_eq!(catalog.register_built_in_models().await.unwrap(), 0);

        let output = catalog
            .get_adapter("b")
            .await
            .unwrap()
            .execute(&TaskInput::new("x"), &ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(output.content, "b");
    }
}
