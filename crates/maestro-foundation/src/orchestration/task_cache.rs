//! Task-to-model bindings.

use std::collections::HashMap;

use maestro_kernel::ModelType;
use parking_lot::RwLock;

use crate::selector::SelectionStrategy;

const GENERAL_TASK: &str = "general";
const DEFAULT_STRATEGY: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskCacheKey {
    pub model_type: ModelType,
    pub task_type: String,
    pub strategy: String,
}

impl TaskCacheKey {
    pub fn new(
        model_type: ModelType,
        task_type: Option<&str>,
        strategy: Option<SelectionStrategy>,
    ) -> Self {
        Self {
            model_type,
            task_type: task_type.unwrap_or(GENERAL_TASK).to_ascii_lowercase(),
            strategy: strategy
                .map(|s| s.as_str())
                .unwrap_or(DEFAULT_STRATEGY)
                .to_string(),
        }
    }
}

/// Each key is bound to at most one model id.
#[derive(Debug, Default)]
pub struct TaskCache {
    bindings: RwLock<HashMap<TaskCacheKey, String>>,
}

impl TaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &TaskCacheKey) -> Option<String> {
        self.bindings.read().get(key).cloned()
    }

    /// Bind `key`, replacing any previous binding.
    pub fn bind(&self, key: TaskCacheKey, model_id: impl Into<String>) {
        self.bindings.write().insert(key, model_id.into());
    }

    pub fn remove(&self, key: &TaskCacheKey) -> Option<String> {
        self.bindings.write().remove(key)
    }

    /// Drop every binding to `model_id`. Returns how many were dropped.
    pub fn invalidate_model(&self, model_id: &str) -> usize {
        let mut bindings = self.bindings.write();
        let before = bindings.len();
        bindings.retain(|_, bound| bound != model_id);
        before - bindings.len()
    }

    pub fn is_bound(&self, model_id: &str) -> bool {
        self.bindings.read().values().any(|bound| bound == model_id)
    }

    pub fn clear(&self) -> usize {
        let mut bindings = self.bindings.write();
        let n = bindings.len();
        bindings.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_defaults() {
        let key = TaskCacheKey::new(ModelType::Text, None, None);
        assert_eq!(key.task_type, "general");
        assert_eq!(key.strategy, "default");

        let key = TaskCacheKey::new(
            ModelType::Text,
            Some("Summarization"),
            Some(SelectionStrategy::Balanced),
        );
        assert_eq!(key.task_type, "summarization");
        assert_eq!(key.strategy, SelectionStrategy::Balanced.as_str());
    }

    #[test]
    fn rebinding_replaces() {
        let cache = TaskCache::new();
        let key = TaskCacheKey::new(ModelType::Code, Some("review"), None);
        cache.bind(key.clone(), "a");
        cache.bind(key.clone(), "b");
        assert_eq!(cache.get(&key).as_deref(), Some("b"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalidation_is_per_model() {
        let cache = TaskCache::new();
        cache.bind(TaskCacheKey::new(ModelType::Text, Some("a"), None), "m1");
        cache.bind(TaskCacheKey::new(ModelType::Text, Some("b"), None), "m1");
        cache.bind(TaskCacheKey::new(ModelType::Text, Some("c"), None), "m2");

        assert_eq!(cache.invalidate_model("m1"), 2);
        assert!(!cache.is_bound("m1"));
        assert!(cache.is_bound("m2"));
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }
}
