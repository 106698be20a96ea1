//! Coordinator request, result and reporting types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use maestro_kernel::{ModelDescriptor, ModelTier, ModelType, QuantizationLevel, TaskInput};
use serde::{Deserialize, Serialize};

use crate::api_service::ApiServiceStatus;
use crate::collaboration::CollaborationStrategy;
use crate::resource::ResourceSnapshot;
use crate::selector::SelectionStrategy;

/// Input to [`ModelOrchestrationSystem::get_model_for_task`](super::ModelOrchestrationSystem::get_model_for_task).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub model_type: ModelType,
    #[serde(default)]
    pub task_type: Option<String>,
    /// Use the selector instead of the catalog's best match
    #[serde(default)]
    pub strategy: Option<SelectionStrategy>,
    #[serde(default)]
    pub offline_only: bool,
    #[serde(default = "default_auto_load")]
    pub auto_load: bool,
    /// Fed to specialized selection
    #[serde(default)]
    pub input: Option<TaskInput>,
}

fn default_auto_load() -> bool {
    true
}

impl ModelRequest {
    pub fn new(model_type: ModelType) -> Self {
        Self {
            model_type,
            task_type: None,
            strategy: None,
            offline_only: false,
            auto_load: true,
            input: None,
        }
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn with_strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn offline_only(mut self, offline_only: bool) -> Self {
        self.offline_only = offline_only;
        self
    }

    pub fn without_auto_load(mut self) -> Self {
        self.auto_load = false;
        self
    }

    pub fn with_input(mut self, input: TaskInput) -> Self {
        self.input = Some(input);
        self
    }
}

/// Where requests for a model go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelRoute {
    /// Loaded in process. `quantization` is `None` when not loaded yet.
    Local {
        quantization: Option<QuantizationLevel>,
    },
    Api { service_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelAssignment {
    pub model_id: String,
    pub descriptor: ModelDescriptor,
    pub route: ModelRoute,
}

impl ModelAssignment {
    pub fn is_api(&self) -> bool {
        matches!(self.route, ModelRoute::Api { .. })
    }
}

/// Lifecycle notifications from the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    ModelLoaded {
        model_id: String,
        quantization: Option<QuantizationLevel>,
        memory_usage_mb: f64,
    },
    ModelUnloaded {
        model_id: String,
    },
    ModelEvicted {
        model_id: String,
        freed_mb: f64,
    },
    ApiFallback {
        model_id: String,
        service_id: String,
    },
    SessionCreated {
        session_id: String,
        strategy: CollaborationStrategy,
        participants: Vec<String>,
    },
    SessionClosed {
        session_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryOptimizationReport {
    pub before_mb: f64,
    pub target_mb: f64,
    pub after_mb: f64,
    /// In eviction order
    pub evicted: Vec<String>,
}

impl MemoryOptimizationReport {
    pub fn target_reached(&self) -> bool {
        self.after_mb <= self.target_mb
    }

    pub fn freed_mb(&self) -> f64 {
        self.before_mb - self.after_mb
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedModelStatus {
    pub model_id: String,
    pub memory_usage_mb: f64,
    pub quantization: Option<QuantizationLevel>,
    pub invocations: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub in_flight: usize,
    pub average_latency_ms: Option<f64>,
    pub success_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationStatus {
    pub initialized: bool,
    pub caller_tier: ModelTier,
    pub resources: ResourceSnapshot,
    pub loaded_models: Vec<LoadedModelStatus>,
    /// Model id to API service id
    pub api_routes: HashMap<String, String>,
    pub api_services: Vec<ApiServiceStatus>,
    pub active_sessions: usize,
    pub task_cache_entries: usize,
}

impl OrchestrationStatus {
    pub fn total_model_memory_mb(&self) -> f64 {
        self.loaded_models.iter().map(|m| m.memory_usage_mb).sum()
    }
}
