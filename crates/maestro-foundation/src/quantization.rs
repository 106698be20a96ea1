//! Precision selection under memory constraints.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use maestro_kernel::{
    AvailableMemory, MemoryRequirement, ModelDescriptor, OrchestratorError, QuantizationLevel,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::resource::ResourceMonitor;

/// What the caller cares about most when picking a level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantizationPriority {
    Speed,
    #[default]
    Balanced,
    Accuracy,
}

impl fmt::Display for QuantizationPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Speed => write!(f, "speed"),
            Self::Balanced => write!(f, "balanced"),
            Self::Accuracy => write!(f, "accuracy"),
        }
    }
}

impl FromStr for QuantizationPriority {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "speed" => Ok(Self::Speed),
            "balanced" => Ok(Self::Balanced),
            "accuracy" => Ok(Self::Accuracy),
            other => Err(OrchestratorError::Config(format!(
                "invalid quantization priority: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QuantizationConstraints {
    #[serde(default)]
    pub priority: QuantizationPriority,
    /// Overrides the monitor's latest reading
    #[serde(default)]
    pub memory: Option<AvailableMemory>,
}

impl QuantizationConstraints {
    pub fn new(priority: QuantizationPriority) -> Self {
        Self {
            priority,
            memory: None,
        }
    }

    pub fn with_memory(mut self, ram_gb: f64, vram_gb: f64) -> Self {
        self.memory = Some(AvailableMemory::new(ram_gb, vram_gb));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizationDecision {
    pub level: QuantizationLevel,
    /// `false` when nothing fit and the lowest level was chosen anyway
    pub fits: bool,
    pub requirement: Option<MemoryRequirement>,
}

pub struct QuantizationManager {
    monitor: Arc<ResourceMonitor>,
    default_level: QuantizationLevel,
}

impl QuantizationManager {
    pub fn new(monitor: Arc<ResourceMonitor>, default_level: QuantizationLevel) -> Self {
        Self {
            monitor,
            default_level,
        }
    }

    pub fn default_level(&self) -> QuantizationLevel {
        self.default_level
    }

    /// Pick a level for `model`. `None` only when it declares no levels.
    pub fn get_optimal_quantization(
        &self,
        model: &ModelDescriptor,
        constraints: &QuantizationConstraints,
    ) -> Option<QuantizationDecision> {
        let available = constraints
            .memory
            .unwrap_or_else(|| self.monitor.get_available_memory());
        let decision = choose_level(model, constraints.priority, &available, self.default_level);
        if let Some(d) = &decision {
            debug!(
                model_id = %model.id,
                priority = %constraints.priority,
                level = %d.level,
                fits = d.fits,
                "Quantization chosen"
            );
        }
        decision
    }
}

/// The pure selection rule.
pub fn choose_level(
    model: &ModelDescriptor,
    priority: QuantizationPriority,
    available: &AvailableMemory,
    default_level: QuantizationLevel,
) -> Option<QuantizationDecision> {
    // supported levels only, lowest precision first
    let supported: Vec<QuantizationLevel> = QuantizationLevel::ALL
        .into_iter()
        .filter(|l| model.supports_level(*l))
        .collect();

    let lowest = *supported.first()?;

    let fits = |level: &QuantizationLevel| {
        model
            .requirement_for(*level)
            .is_none_or(|req| req.fits(available))
    };
    let decide = |level: QuantizationLevel, fits: bool| QuantizationDecision {
        level,
        fits,
        requirement: model.requirement_for(level).copied(),
    };

    let fitting: Vec<QuantizationLevel> = supported.iter().copied().filter(fits).collect();

    let chosen = match priority {
        QuantizationPriority::Speed => fitting.first().copied(),
        QuantizationPriority::Accuracy => fitting.last().copied(),
        QuantizationPriority::Balanced => {
            if fitting.contains(&default_level) {
                Some(default_level)
            } else {
                fitting.first().copied()
            }
        }
    };

    Some(match chosen {
        Some(level) => decide(level, true),
        None => decide(lowest, false),
    })
}
