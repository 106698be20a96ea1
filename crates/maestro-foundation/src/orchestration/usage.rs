//! Per-model invocation counts and in-flight leases.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use maestro_kernel::QuantizationLevel;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub invocations: u64,
    pub last_used: Option<DateTime<Utc>>,
    /// Level of the current local load
    pub quantization: Option<QuantizationLevel>,
}

#[derive(Default)]
pub(crate) struct UsageLedger {
    usage: DashMap<String, ModelUsage>,
    in_flight: Arc<DashMap<String, usize>>,
}

impl UsageLedger {
    pub fn touch(&self, model_id: &str) {
        let mut usage = self.usage.entry(model_id.to_string()).or_default();
        usage.invocations += 1;
        usage.last_used = Some(Utc::now());
    }

    pub fn set_quantization(&self, model_id: &str, level: Option<QuantizationLevel>) {
        self.usage.entry(model_id.to_string()).or_default().quantization = level;
    }

    pub fn usage(&self, model_id: &str) -> ModelUsage {
        self.usage
            .get(model_id)
            .map(|u| u.clone())
            .unwrap_or_default()
    }

    /// Eviction order: fewest invocations, then least recently used.
    pub fn eviction_key(&self, model_id: &str) -> (u64, Option<DateTime<Utc>>) {
        let usage = self.usage(model_id);
        (usage.invocations, usage.last_used)
    }

    pub fn lease(&self, model_id: &str) -> InFlightLease {
        *self.in_flight.entry(model_id.to_string()).or_insert(0) += 1;
        InFlightLease {
            counts: self.in_flight.clone(),
            model_id: model_id.to_string(),
        }
    }

    pub fn in_flight(&self, model_id: &str) -> usize {
        self.in_flight.get(model_id).map(|n| *n).unwrap_or(0)
    }
}

/// Marks a model in use until dropped.
pub(crate) struct InFlightLease {
    counts: Arc<DashMap<String, usize>>,
    model_id: String,
}

impl Drop for InFlightLease {
    fn drop(&mut self) {
        let released = match self.counts.get_mut(&self.model_id) {
            Some(mut n) => {
                *n = n.saturating_sub(1);
                *n == 0
            }
            None => false,
        };
        if released {
            self.counts.remove_if(&self.model_id, |_, n| *n == 0);
        }
    }
}
