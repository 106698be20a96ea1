//! Bounded cache of task-characteristic analyses.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

pub const ANALYSIS_CACHE_CAPACITY: usize = 1_000;

/// `taskType:sha256(content)`
pub fn analysis_key(task_type: Option<&str>, content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    format!("{}:{}", task_type.unwrap_or("general"), hex::encode(digest))
}

struct Entries {
    map: HashMap<String, Vec<String>>,
    order: VecDeque<String>,
}

/// Insertion-ordered cache; the oldest entry goes first when full.
pub struct AnalysisCache {
    capacity: usize,
    entries: Mutex<Entries>,
}

impl Default for AnalysisCache {
    fn default() -> Self {
        Self::with_capacity(ANALYSIS_CACHE_CAPACITY)
    }
}

impl AnalysisCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(Entries {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<String>> {
        self.entries.lock().map.get(key).cloned()
    }

    pub fn insert(&self, key: String, characteristics: Vec<String>) {
        let mut entries = self.entries.lock();
        if entries.map.insert(key.clone(), characteristics).is_some() {
            return;
        }
        entries.order.push_back(key);
        while entries.order.len() > self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.map.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_depends_on_task_type_and_content() {
        let a = analysis_key(Some("qa"), "what is 2+2");
        assert_eq!(a, analysis_key(Some("qa"), "what is 2+2"));
        assert_ne!(a, analysis_key(Some("chat"), "what is 2+2"));
        assert_ne!(a, analysis_key(Some("qa"), "what is 3+3"));
        assert!(analysis_key(None, "x").starts_with("general:"));
    }

    #[test]
    fn evicts_oldest_when_full() {
        let cache = AnalysisCache::with_capacity(2);
        cache.insert("a".into(), vec!["math".into()]);
        cache.insert("b".into(), vec![]);
        cache.insert("c".into(), vec![]);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn default_bound_is_one_thousand() {
        let cache = AnalysisCache::default();
        for i in 0..1_005 {
            cache.insert(format!("k{i}"), vec![]);
        }
        assert_eq!(cache.len(), ANALYSIS_CACHE_CAPACITY);
        assert!(cache.get("k4").is_none());
        assert!(cache.get("k5").is_some());
    }
}
