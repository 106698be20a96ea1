//! Model descriptors, precision levels and memory requirements.
//!
//! A [`ModelDescriptor`] is owned by the catalog and read by the core. It
//! carries everything the selection and provisioning logic needs to know
//! about a model without touching its adapter.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;
use crate::tier::ModelTier;

/// Modality of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelType {
    #[serde(alias = "text")]
    Text,
    #[serde(alias = "code")]
    Code,
    #[serde(alias = "embedding")]
    Embedding,
    #[serde(alias = "classification")]
    Classification,
    #[serde(alias = "vision")]
    Vision,
    #[serde(alias = "audio")]
    Audio,
    #[serde(alias = "multimodal")]
    Multimodal,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Code => "CODE",
            Self::Embedding => "EMBEDDING",
            Self::Classification => "CLASSIFICATION",
            Self::Vision => "VISION",
            Self::Audio => "AUDIO",
            Self::Multimodal => "MULTIMODAL",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TEXT" => Ok(Self::Text),
            "CODE" => Ok(Self::Code),
            "EMBEDDING" => Ok(Self::Embedding),
            "CLASSIFICATION" => Ok(Self::Classification),
            "VISION" => Ok(Self::Vision),
            "AUDIO" => Ok(Self::Audio),
            "MULTIMODAL" => Ok(Self::Multimodal),
            other => Err(OrchestratorError::Config(format!(
                "invalid model type: {other}"
            ))),
        }
    }
}

/// Model precision / quantization level.
///
/// Ordered from lowest precision (least memory) to highest precision
/// (most memory): `Int4 < Int5 < Int8 < Fp16 < Fp32`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum QuantizationLevel {
    #[serde(rename = "INT4", alias = "int4")]
    Int4,
    #[serde(rename = "INT5", alias = "int5")]
    Int5,
    #[serde(rename = "INT8", alias = "int8")]
    Int8,
    #[serde(rename = "FP16", alias = "fp16")]
    Fp16,
    #[serde(rename = "FP32", alias = "fp32")]
    Fp32,
}

impl QuantizationLevel {
    /// Every level, lowest precision first.
    pub const ALL: [QuantizationLevel; 5] = [
        Self::Int4,
        Self::Int5,
        Self::Int8,
        Self::Fp16,
        Self::Fp32,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int4 => "INT4",
            Self::Int5 => "INT5",
            Self::Int8 => "INT8",
            Self::Fp16 => "FP16",
            Self::Fp32 => "FP32",
        }
    }
}

impl fmt::Display for QuantizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuantizationLevel {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INT4" | "Q4" => Ok(Self::Int4),
            "INT5" | "Q5" => Ok(Self::Int5),
            "INT8" | "Q8" => Ok(Self::Int8),
            "FP16" | "F16" => Ok(Self::Fp16),
            "FP32" | "F32" => Ok(Self::Fp32),
            other => Err(OrchestratorError::Config(format!(
                "invalid quantization level: {other}"
            ))),
        }
    }
}

/// Memory currently available to load models, in GB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AvailableMemory {
    pub ram_gb: f64,
    pub vram_gb: f64,
}

impl AvailableMemory {
    pub fn new(ram_gb: f64, vram_gb: f64) -> Self {
        Self { ram_gb, vram_gb }
    }
}

/// Memory a model needs at one quantization level, in GB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryRequirement {
    #[serde(default, alias = "ram")]
    pub ram_gb: f64,
    #[serde(default, alias = "vram")]
    pub vram_gb: f64,
}

impl MemoryRequirement {
    pub fn new(ram_gb: f64, vram_gb: f64) -> Self {
        Self { ram_gb, vram_gb }
    }

    /// Both RAM and VRAM requirements are within what is available.
    pub fn fits(&self, available: &AvailableMemory) -> bool {
        self.ram_gb <= available.ram_gb && self.vram_gb <= available.vram_gb
    }
}

/// Load state of a model as tracked by the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

/// Capability metadata a catalog may attach to a model.
///
/// Missing fields deserialize to empty maps, which the selector reads as
/// all-zero scores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityMetadata {
    /// Per-dimension scores keyed by dimension name (`reasoning`, `planning`, ...)
    #[serde(default)]
    pub scores: HashMap<String, f64>,
    /// Named specializations (`mathematics`, `legal`, ...) with scores
    #[serde(default)]
    pub specializations: HashMap<String, f64>,
}

/// Static and tracked information about one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub model_type: ModelType,
    #[serde(default)]
    pub tier: ModelTier,
    /// Static accuracy score in `0.0..=1.0`
    #[serde(default)]
    pub accuracy: f64,
    /// Task-specific accuracy overrides
    #[serde(default)]
    pub task_accuracy: HashMap<String, f64>,
    #[serde(default)]
    pub offline_capable: bool,
    /// Can fall back to a remote API when it cannot run locally
    #[serde(default)]
    pub hybrid_capable: bool,
    #[serde(default)]
    pub supported_tasks: Vec<String>,
    #[serde(default)]
    pub quantization_levels: Vec<QuantizationLevel>,
    #[serde(default)]
    pub memory_requirements: BTreeMap<QuantizationLevel, MemoryRequirement>,
    #[serde(default)]
    pub load_state: LoadState,
    /// Memory footprint once loaded, in MB
    #[serde(default)]
    pub memory_usage_mb: f64,
    #[serde(default)]
    pub capabilities: CapabilityMetadata,
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, model_type: ModelType) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            model_type,
            tier: ModelTier::default(),
            accuracy: 0.0,
            task_accuracy: HashMap::new(),
            offline_capable: false,
            hybrid_capable: false,
            supported_tasks: Vec::new(),
            quantization_levels: Vec::new(),
            memory_requirements: BTreeMap::new(),
            load_state: LoadState::Unloaded,
            memory_usage_mb: 0.0,
            capabilities: CapabilityMetadata::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tier(mut self, tier: ModelTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = accuracy;
        self
    }

    pub fn with_task_accuracy(mut self, task: impl Into<String>, accuracy: f64) -> Self {
        self.task_accuracy.insert(task.into(), accuracy);
        self
    }

    pub fn with_offline(mut self, offline_capable: bool) -> Self {
        self.offline_capable = offline_capable;
        self
    }

    pub fn with_hybrid(mut self, hybrid_capable: bool) -> Self {
        self.hybrid_capable = hybrid_capable;
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

    /// Declare a supported level together with its memory requirement.
    pub fn with_level(mut self, level: QuantizationLevel, ram_gb: f64, vram_gb: f64) -> Self {
        if !self.quantization_levels.contains(&level) {
            self.quantization_levels.push(level);
        }
        self.memory_requirements
            .insert(level, MemoryRequirement::new(ram_gb, vram_gb));
        self
    }

    /// Declare a supported level without a requirement entry.
    pub fn with_unmetered_level(mut self, level: QuantizationLevel) -> Self {
        if !self.quantization_levels.contains(&level) {
            self.quantization_levels.push(level);
        }
        self
    }

    pub fn with_memory_usage_mb(mut self, memory_usage_mb: f64) -> Self {
        self.memory_usage_mb = memory_usage_mb;
        self
    }

    pub fn with_score(mut self, dimension: impl Into<String>, score: f64) -> Self {
        self.capabilities.scores.insert(dimension.into(), score);
        self
    }

    pub fn with_specialization(mut self, name: impl Into<String>, score: f64) -> Self {
        self.capabilities
            .specializations
            .insert(name.into(), score);
        self
    }

    pub fn supports_task(&self, task: &str) -> bool {
        self.supported_tasks.iter().any(|t| t.eq_ignore_ascii_case(task))
    }

    pub fn supports_level(&self, level: QuantizationLevel) -> bool {
        self.quantization_levels.contains(&level)
    }

    pub fn is_loaded(&self) -> bool {
        self.load_state == LoadState::Loaded
    }

    /// Accuracy for a task, falling back to the general score.
    pub fn accuracy_for(&self, task: Option<&str>) -> f64 {
        task.and_then(|t| {
            self.task_accuracy
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(t))
                .map(|(_, v)| *v)
        })
        .unwrap_or(self.accuracy)
    }

    pub fn requirement_for(&self, level: QuantizationLevel) -> Option<&MemoryRequirement> {
        self.memory_requirements.get(&level)
    }

    /// Smallest declared RAM requirement across supported levels, in MB.
    pub fn min_required_ram_mb(&self) -> Option<f64> {
        self.quantization_levels
            .iter()
            .filter_map(|level| self.memory_requirements.get(level))
            .map(|req| req.ram_gb * 1024.0)
            .reduce(f64::min)
    }

    /// Current footprint when loaded, otherwise the smallest declared RAM
    /// requirement. Models declaring neither report zero.
    pub fn footprint_mb(&self) -> f64 {
        if self.is_loaded() && self.memory_usage_mb > 0.0 {
            self.memory_usage_mb
        } else {
            self.min_required_ram_mb()
                .unwrap_or(self.memory_usage_mb)
        }
    }
}

/// Options passed to an adapter when loading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadOptions {
    pub quantization: Option<QuantizationLevel>,
    /// Prefer routing through a remote API instead of a local load
    #[serde(default)]
    pub use_api: bool,
    /// API service chosen for the remote route
    pub api_service_id: Option<String>,
}

impl LoadOptions {
    pub fn with_quantization(level: QuantizationLevel) -> Self {
        Self {
            quantization: Some(level),
            ..Self::default()
        }
    }
}

/// Criteria for the catalog's own best-model ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCriteria {
    pub model_type: ModelType,
    pub task_type: Option<String>,
    #[serde(default)]
    pub offline_only: bool,
    #[serde(default)]
    pub max_tier: ModelTier,
}

impl ModelCriteria {
    pub fn new(model_type: ModelType) -> Self {
        Self {
            model_type,
            task_type: None,
            offline_only: false,
            max_tier: ModelTier::default(),
        }
    }

    /// Whether a descriptor passes the eligibility filter shared by the
    /// catalog ranking, the selector and collaboration sessions.
    pub fn admits(&self, model: &ModelDescriptor) -> bool {
        model.model_type == self.model_type
            && self
                .task_type
                .as_deref()
                .is_none_or(|task| model.supports_task(task))
            && (!self.offline_only || model.offline_capable)
            && self.max_tier.grants(model.tier)
    }
}
