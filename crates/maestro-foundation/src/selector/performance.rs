//! Rolling per-model performance history.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Records kept per model.
pub const HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub latency_ms: f64,
    pub success: bool,
    #[serde(default)]
    pub accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl PerformanceRecord {
    pub fn success(latency_ms: f64) -> Self {
        Self {
            latency_ms,
            success: true,
            accuracy: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(latency_ms: f64) -> Self {
        Self {
            success: false,
            ..Self::success(latency_ms)
        }
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }
}

#[derive(Default)]
pub struct PerformanceTracker {
    history: DashMap<String, VecDeque<PerformanceRecord>>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, model_id: &str, record: PerformanceRecord) {
        let mut ring = self.history.entry(model_id.to_string()).or_default();
        if ring.len() == HISTORY_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(record);
    }

    pub fn average_latency(&self, model_id: &str) -> Option<f64> {
        let ring = self.history.get(model_id)?;
        if ring.is_empty() {
            return None;
        }
        Some(ring.iter().map(|r| r.latency_ms).sum::<f64>() / ring.len() as f64)
    }

    pub fn success_rate(&self, model_id: &str) -> Option<f64> {
        let ring = self.history.get(model_id)?;
        if ring.is_empty() {
            return None;
        }
        let ok = ring.iter().filter(|r| r.success).count();
        Some(ok as f64 / ring.len() as f64)
    }

    pub fn history_len(&self, model_id: &str) -> usize {
        self.history.get(model_id).map(|r| r.len()).unwrap_or(0)
    }

    pub fn has_history(&self, model_id: &str) -> bool {
        self.history_len(model_id) > 0
    }
}
