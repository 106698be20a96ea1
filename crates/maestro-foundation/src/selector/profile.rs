//! Capability profiles derived from catalog metadata.

use std::collections::HashMap;
use std::fmt;

use maestro_kernel::ModelDescriptor;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityDimension {
    Reasoning,
    Planning,
    Synthesizing,
    Consistency,
    Specialization,
    EnsembleFitness,
    Creativity,
    Factuality,
    Coding,
}

impl CapabilityDimension {
    pub const ALL: [CapabilityDimension; 9] = [
        Self::Reasoning,
        Self::Planning,
        Self::Synthesizing,
        Self::Consistency,
        Self::Specialization,
        Self::EnsembleFitness,
        Self::Creativity,
        Self::Factuality,
        Self::Coding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reasoning => "reasoning",
            Self::Planning => "planning",
            Self::Synthesizing => "synthesizing",
            Self::Consistency => "consistency",
            Self::Specialization => "specialization",
            Self::EnsembleFitness => "ensemble_fitness",
            Self::Creativity => "creativity",
            Self::Factuality => "factuality",
            Self::Coding => "coding",
        }
    }

    /// Match a metadata key, accepting `ensemble-fitness`, `EnsembleFitness` and so on.
    pub fn from_key(key: &str) -> Option<Self> {
        let normalized: String = key
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Self::ALL
            .into_iter()
            .find(|d| d.as_str().replace('_', "") == normalized)
    }
}

impl fmt::Display for CapabilityDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityProfile {
    pub model_id: String,
    pub scores: HashMap<CapabilityDimension, f64>,
    /// Named specializations, keys lowercased
    pub specializations: HashMap<String, f64>,
}

impl CapabilityProfile {
    pub fn empty(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            ..Self::default()
        }
    }

    pub fn from_descriptor(model: &ModelDescriptor) -> Self {
        let scores = model
            .capabilities
            .scores
            .iter()
            .filter_map(|(k, v)| CapabilityDimension::from_key(k).map(|d| (d, *v)))
            .collect();
        let specializations = model
            .capabilities
            .specializations
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), *v))
            .collect();
        Self {
            model_id: model.id.clone(),
            scores,
            specializations,
        }
    }

    pub fn score(&self, dimension: CapabilityDimension) -> f64 {
        self.scores.get(&dimension).copied().unwrap_or(0.0)
    }

    pub fn specialization(&self, name: &str) -> f64 {
        self.specializations
            .get(&name.to_ascii_lowercase())
            .copied()
            .unwrap_or(0.0)
    }

    /// Sum of specialization scores over the given characteristics.
    pub fn specialization_sum<S: AsRef<str>>(&self, characteristics: &[S]) -> f64 {
        characteristics
            .iter()
            .map(|c| self.specialization(c.as_ref()))
            .sum()
    }
}

/// Profiles by model id, shared between the selector and collaboration.
///
/// Lookup is total: unknown ids yield an all-zero profile.
#[derive(Default)]
pub struct ProfileRegistry {
    profiles: RwLock<HashMap<String, CapabilityProfile>>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rebuild<'a>(&self, models: impl IntoIterator<Item = &'a ModelDescriptor>) -> usize {
        let profiles: HashMap<String, CapabilityProfile> = models
            .into_iter()
            .map(|m| (m.id.clone(), CapabilityProfile::from_descriptor(m)))
            .collect();
        let count = profiles.len();
        *self.profiles.write() = profiles;
        count
    }

    pub fn upsert(&self, model: &ModelDescriptor) {
        self.profiles
            .write()
            .insert(model.id.clone(), CapabilityProfile::from_descriptor(model));
    }

    pub fn get(&self, model_id: &str) -> CapabilityProfile {
        self.profiles
            .read()
            .get(model_id)
            .cloned()
            .unwrap_or_else(|| CapabilityProfile::empty(model_id))
    }

    pub fn score(&self, model_id: &str, dimension: CapabilityDimension) -> f64 {
        self.profiles
            .read()
            .get(model_id)
            .map(|p| p.score(dimension))
            .unwrap_or(0.0)
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.profiles.read().contains_key(model_id)
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
