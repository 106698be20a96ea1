//! Specialized model selector.
//!
//! Filters the catalog down to eligible models and ranks them under one of
//! five strategies. Capability profiles are built once at
//! [`SpecializedModelSelector::initialize`]; performance history is fed in
//! by callers through [`SpecializedModelSelector::record_model_performance`]
//! and is never written as a side effect of selection.

mod analysis;
mod performance;
mod profile;

pub use analysis::{ANALYSIS_CACHE_CAPACITY, AnalysisCache, analysis_key};
pub use performance::{HISTORY_CAPACITY, PerformanceRecord, PerformanceTracker};
pub use profile::{CapabilityDimension, CapabilityProfile, ProfileRegistry};

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use maestro_kernel::{
    ModelCatalog, ModelCriteria, ModelDescriptor, ModelTier, ModelType, OrchestratorError,
    TaskInput,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::resource::ResourceMonitor;

const LATENCY_CEILING_MS: f64 = 5_000.0;
const MEMORY_CEILING_MB: f64 = 8_192.0;
const NEUTRAL_LATENCY_TERM: f64 = 0.5;
const ACCURACY_WEIGHT: f64 = 10.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    HighestAccuracy,
    LowestLatency,
    LowestResourceUsage,
    Balanced,
    #[default]
    Specialized,
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighestAccuracy => "highest-accuracy",
            Self::LowestLatency => "lowest-latency",
            Self::LowestResourceUsage => "lowest-resource-usage",
            Self::Balanced => "balanced",
            Self::Specialized => "specialized",
        }
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionStrategy {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "highest-accuracy" => Ok(Self::HighestAccuracy),
            "lowest-latency" => Ok(Self::LowestLatency),
            "lowest-resource-usage" => Ok(Self::LowestResourceUsage),
            "balanced" => Ok(Self::Balanced),
            "specialized" => Ok(Self::Specialized),
            other => Err(OrchestratorError::Config(format!(
                "invalid selection strategy: {other}"
            ))),
        }
    }
}

/// What to select for.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionCriteria {
    pub model_type: ModelType,
    pub task_type: Option<String>,
    pub offline_only: bool,
    pub max_tier: ModelTier,
    pub strategy: SelectionStrategy,
    /// Lets the specialized strategy analyze the actual task
    pub input: Option<TaskInput>,
}

impl SelectionCriteria {
    pub fn new(model_type: ModelType) -> Self {
        Self {
            model_type,
            task_type: None,
            offline_only: false,
            max_tier: ModelTier::default(),
            strategy: SelectionStrategy::default(),
            input: None,
        }
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn with_strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_tier(mut self, tier: ModelTier) -> Self {
        self.max_tier = tier;
        self
    }

    pub fn offline_only(mut self, offline_only: bool) -> Self {
        self.offline_only = offline_only;
        self
    }

    pub fn with_input(mut self, input: TaskInput) -> Self {
        self.input = Some(input);
        self
    }

    pub fn eligibility(&self) -> ModelCriteria {
        ModelCriteria {
            model_type: self.model_type,
            task_type: self.task_type.clone(),
            offline_only: self.offline_only,
            max_tier: self.max_tier,
        }
    }
}

/// First element with the greatest key.
fn first_max_by<'a, T>(items: &'a [T], key: impl Fn(&T) -> f64) -> Option<&'a T> {
    let mut best: Option<(&T, f64)> = None;
    for item in items {
        let k = key(item);
        match best {
            Some((_, b)) if k.total_cmp(&b) != Ordering::Greater => {}
            _ => best = Some((item, k)),
        }
    }
    best.map(|(item, _)| item)
}

/// First element with the smallest key.
fn first_min_by<'a, T>(items: &'a [T], key: impl Fn(&T) -> f64) -> Option<&'a T> {
    first_max_by(items, |item| -key(item))
}

pub struct SpecializedModelSelector {
    catalog: Arc<dyn ModelCatalog>,
    monitor: Arc<ResourceMonitor>,
    profiles: Arc<ProfileRegistry>,
    performance: PerformanceTracker,
    analysis: AnalysisCache,
}

impl SpecializedModelSelector {
    pub fn new(catalog: Arc<dyn ModelCatalog>, monitor: Arc<ResourceMonitor>) -> Self {
        Self {
            catalog,
            monitor,
            profiles: Arc::new(ProfileRegistry::new()),
            performance: PerformanceTracker::new(),
            analysis: AnalysisCache::default(),
        }
    }

    /// Build capability profiles for every catalog model.
    pub async fn initialize(&self) -> usize {
        let models = self.catalog.get_all_models().await;
        let count = self.profiles.rebuild(&models);
        debug!(profiles = count, "Capability profiles built");
        count
    }

    pub fn profiles(&self) -> Arc<ProfileRegistry> {
        self.profiles.clone()
    }

    pub fn profile(&self, model_id: &str) -> CapabilityProfile {
        self.profiles.get(model_id)
    }

    pub fn analysis_cache(&self) -> &AnalysisCache {
        &self.analysis
    }

    pub fn record_model_performance(&self, model_id: &str, record: PerformanceRecord) {
        self.performance.record(model_id, record);
    }

    pub fn average_latency(&self, model_id: &str) -> Option<f64> {
        self.performance.average_latency(model_id)
    }

    pub fn success_rate(&self, model_id: &str) -> Option<f64> {
        self.performance.success_rate(model_id)
    }

    /// Models passing the eligibility filter, in catalog order.
    pub async fn eligible_models(&self, criteria: &ModelCriteria) -> Vec<ModelDescriptor> {
        self.catalog
            .get_models_by_type(criteria.model_type)
            .await
            .into_iter()
            .filter(|m| criteria.admits(m))
            .collect()
    }

    /// Best model for the criteria, or `None` when nothing is eligible.
    pub async fn select_model(&self, criteria: &SelectionCriteria) -> Option<ModelDescriptor> {
        let candidates = self.eligible_models(&criteria.eligibility()).await;
        if candidates.is_empty() {
            debug!(model_type = %criteria.model_type, "No eligible models");
            return None;
        }

        let chosen = match criteria.strategy {
            SelectionStrategy::HighestAccuracy => self.by_accuracy(&candidates),
            SelectionStrategy::LowestLatency => self.by_latency(&candidates),
            SelectionStrategy::LowestResourceUsage => self.by_resource_usage(&candidates),
            SelectionStrategy::Balanced => self.by_balanced_score(&candidates),
            SelectionStrategy::Specialized => self.by_specialization(&candidates, criteria).await,
        }
        .or_else(|| self.by_accuracy(&candidates));

        if let Some(model) = &chosen {
            debug!(
                strategy = %criteria.strategy,
                model_id = %model.id,
                candidates = candidates.len(),
                "Model selected"
            );
        }
        chosen
    }

    fn by_accuracy(&self, candidates: &[ModelDescriptor]) -> Option<ModelDescriptor> {
        first_max_by(candidates, |m| m.accuracy).cloned()
    }

    fn by_latency(&self, candidates: &[ModelDescriptor]) -> Option<ModelDescriptor> {
        let with_history: Vec<(&ModelDescriptor, f64)> = candidates
            .iter()
            .filter_map(|m| self.average_latency(&m.id).map(|l| (m, l)))
            .collect();
        if with_history.is_empty() {
            return self.by_accuracy(candidates);
        }
        first_min_by(&with_history, |(_, latency)| *latency).map(|(m, _)| (*m).clone())
    }

    fn by_resource_usage(&self, candidates: &[ModelDescriptor]) -> Option<ModelDescriptor> {
        let available_mb = self.monitor.get_available_memory().ram_gb * 1024.0;
        let fitting: Vec<ModelDescriptor> = candidates
            .iter()
            .filter(|m| m.footprint_mb() <= available_mb)
            .cloned()
            .collect();
        let pool = if fitting.is_empty() { candidates } else { &fitting };
        first_min_by(pool, ModelDescriptor::footprint_mb).cloned()
    }

    /// `0.5·accuracy + 0.3·latency term + 0.2·memory term`
    pub fn balanced_score(&self, model: &ModelDescriptor) -> f64 {
        let latency_term = self
            .average_latency(&model.id)
            .map(|l| 1.0 - (l / LATENCY_CEILING_MS).min(1.0))
            .unwrap_or(NEUTRAL_LATENCY_TERM);
        let memory_term = 1.0 - (model.footprint_mb() / MEMORY_CEILING_MB).min(1.0);
        0.5 * model.accuracy + 0.3 * latency_term + 0.2 * memory_term
    }

    fn by_balanced_score(&self, candidates: &[ModelDescriptor]) -> Option<ModelDescriptor> {
        first_max_by(candidates, |m| self.balanced_score(m)).cloned()
    }

    async fn by_specialization(
        &self,
        candidates: &[ModelDescriptor],
        criteria: &SelectionCriteria,
    ) -> Option<ModelDescriptor> {
        let characteristics = match &criteria.input {
            Some(input) => {
                self.analyze_task_characteristics(candidates, criteria.task_type.as_deref(), input)
                    .await
            }
            None => Vec::new(),
        };

        if !characteristics.is_empty() {
            return first_max_by(candidates, |m| {
                self.profiles.get(&m.id).specialization_sum(&characteristics)
                    + ACCURACY_WEIGHT * m.accuracy
            })
            .cloned();
        }

        match criteria.task_type.as_deref() {
            Some(task) => {
                let supporting: Vec<ModelDescriptor> = candidates
                    .iter()
                    .filter(|m| m.supports_task(task))
                    .cloned()
                    .collect();
                first_max_by(&supporting, |m| m.accuracy_for(Some(task))).cloned()
            }
            None => self.by_accuracy(candidates),
        }
    }

    /// Characteristics of `input`, analyzed by one eligible model and cached.
    ///
    /// `task_type` is the requested task type; the input's own task type is
    /// used when it is `None`. A loaded candidate analyzes when there is one,
    /// otherwise the most accurate candidate does. Analysis failures yield no
    /// characteristics.
    pub async fn analyze_task_characteristics(
        &self,
        candidates: &[ModelDescriptor],
        task_type: Option<&str>,
        input: &TaskInput,
    ) -> Vec<String> {
        let task_type = task_type.or(input.task_type.as_deref());
        let key = analysis_key(task_type, &input.content);
        if let Some(hit) = self.analysis.get(&key) {
            return hit;
        }

        let loaded: Vec<ModelDescriptor> =
            candidates.iter().filter(|m| m.is_loaded()).cloned().collect();
        let analyzer = if loaded.is_empty() {
            first_max_by(candidates, |m| m.accuracy)
        } else {
            first_max_by(&loaded, |m| m.accuracy)
        };
        let Some(analyzer) = analyzer else {
            return Vec::new();
        };

        let Some(adapter) = self.catalog.get_adapter(&analyzer.id).await else {
            warn!(model_id = %analyzer.id, "No adapter for analyzer model");
            return Vec::new();
        };

        let mut request = input.clone();
        if request.task_type.is_none() {
            request.task_type = task_type.map(str::to_string);
        }
        match adapter.analyze_task(&request).await {
            Ok(characteristics) => {
                debug!(
                    model_id = %analyzer.id,
                    ?characteristics,
                    "Task characteristics analyzed"
                );
                self.analysis.insert(key, characteristics.clone());
                characteristics
            }
            Err(e) => {
                warn!(model_id = %analyzer.id, error = %e, "Task analysis failed");
                Vec::new()
            }
        }
    }
}
