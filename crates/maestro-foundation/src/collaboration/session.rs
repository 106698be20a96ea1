//! Collaboration sessions and their request/result types.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use maestro_kernel::{
    ConsensusVerdict, ModelContribution, ModelTier, ModelType, OrchestratorError, Subtask,
    TaskOutput,
};
use serde::{Deserialize, Serialize};

use crate::selector::CapabilityDimension;

/// Execution log entries kept per session, oldest dropped first.
pub const SESSION_LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollaborationStrategy {
    Ensemble,
    ChainOfThought,
    TaskDecomposition,
    Consensus,
    Specialized,
}

impl CollaborationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ensemble => "ensemble",
            Self::ChainOfThought => "chain-of-thought",
            Self::TaskDecomposition => "task-decomposition",
            Self::Consensus => "consensus",
            Self::Specialized => "specialized",
        }
    }

    /// Capability that ranks participants for this strategy.
    pub fn ranking_dimension(&self) -> CapabilityDimension {
        match self {
            Self::Ensemble => CapabilityDimension::EnsembleFitness,
            Self::ChainOfThought => CapabilityDimension::Reasoning,
            Self::TaskDecomposition => CapabilityDimension::Planning,
            Self::Consensus => CapabilityDimension::Consistency,
            Self::Specialized => CapabilityDimension::Specialization,
        }
    }

    /// Most participants a session of this strategy takes.
    pub fn pool_size(&self) -> usize {
        match self {
            Self::Ensemble | Self::TaskDecomposition | Self::Specialized => 5,
            Self::ChainOfThought | Self::Consensus => 3,
        }
    }
}

impl fmt::Display for CollaborationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollaborationStrategy {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "ensemble" => Ok(Self::Ensemble),
            "chain-of-thought" => Ok(Self::ChainOfThought),
            "task-decomposition" => Ok(Self::TaskDecomposition),
            "consensus" => Ok(Self::Consensus),
            "specialized" => Ok(Self::Specialized),
            other => Err(OrchestratorError::Config(format!(
                "invalid collaboration strategy: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub model_type: ModelType,
    #[serde(default)]
    pub task_type: Option<String>,
    pub strategy: CollaborationStrategy,
    #[serde(default)]
    pub offline_only: bool,
    #[serde(default)]
    pub max_tier: ModelTier,
}

impl SessionRequest {
    pub fn new(model_type: ModelType, strategy: CollaborationStrategy) -> Self {
        Self {
            session_id: None,
            model_type,
            task_type: None,
            strategy,
            offline_only: false,
            max_tier: ModelTier::default(),
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
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
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    /// Models whose output made it into the result
    pub contributors: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationSession {
    pub id: String,
    pub model_type: ModelType,
    pub task_type: Option<String>,
    pub strategy: CollaborationStrategy,
    /// Fixed at creation, best first
    participants: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    /// Most recent executions, at most [`SESSION_LOG_CAPACITY`]
    pub log: VecDeque<SessionLogEntry>,
}

impl CollaborationSession {
    pub(crate) fn new(id: String, request: &SessionRequest, participants: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            model_type: request.model_type,
            task_type: request.task_type.clone(),
            strategy: request.strategy,
            participants,
            created_at: now,
            last_used: now,
            log: VecDeque::new(),
        }
    }

    pub fn participants(&self) -> &[String] {
        &self.participants
    }

    pub fn has_participant(&self, model_id: &str) -> bool {
        self.participants.iter().any(|p| p == model_id)
    }

    pub(crate) fn record(&mut self, entry: SessionLogEntry) {
        self.last_used = entry.timestamp;
        if self.log.len() == SESSION_LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(entry);
    }
}

/// Outcome of one collaborative execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationResult {
    pub session_id: String,
    pub strategy: CollaborationStrategy,
    pub output: TaskOutput,
    /// Successful intermediate outputs, in completion order for sequential
    /// strategies and participant order otherwise
    pub contributions: Vec<ModelContribution>,
    pub model_confidences: HashMap<String, f64>,
    /// Set by the consensus strategy
    #[serde(default)]
    pub consensus: Option<ConsensusVerdict>,
    /// Set by the decomposition strategy
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    /// Set by the specialized strategy
    #[serde(default)]
    pub characteristics: Vec<String>,
}

impl CollaborationResult {
    pub fn consensus_reached(&self) -> bool {
        self.consensus.as_ref().is_some_and(|c| c.reached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_table() {
        assert_eq!(CollaborationStrategy::Ensemble.pool_size(), 5);
        assert_eq!(CollaborationStrategy::ChainOfThought.pool_size(), 3);
        assert_eq!(CollaborationStrategy::Consensus.pool_size(), 3);
        assert_eq!(
            CollaborationStrategy::TaskDecomposition.ranking_dimension(),
            CapabilityDimension::Planning
        );
        assert_eq!(
            "chain_of_thought".parse::<CollaborationStrategy>().unwrap(),
            CollaborationStrategy::ChainOfThought
        );
        assert!("round-robin".parse::<CollaborationStrategy>().is_err());
    }

    #[test]
    fn recording_extends_last_used() {
        let request = SessionRequest::new(ModelType::Text, CollaborationStrategy::Ensemble);
        let mut session = CollaborationSession::new("s".into(), &request, vec!["a".into()]);
        let later = session.created_at + chrono::Duration::seconds(5);
        session.record(SessionLogEntry {
            timestamp: later,
            success: true,
            contributors: vec!["a".into()],
            error: None,
        });
        assert_eq!(session.last_used, later);
        assert_eq!(session.log.len(), 1);
        assert!(session.has_participant("a"));
    }

    #[test]
    fn log_keeps_only_recent_entries() {
        let request = SessionRequest::new(ModelType::Text, CollaborationStrategy::Consensus);
        let mut session = CollaborationSession::new("s".into(), &request, vec!["a".into()]);
        for i in 0..SESSION_LOG_CAPACITY + 5 {
            session.record(SessionLogEntry {
                timestamp: session.created_at + chrono::Duration::seconds(i as i64),
                success: i % 2 == 0,
                contributors: vec![format!("run-{i}")],
                error: None,
            });
        }
        assert_eq!(session.log.len(), SESSION_LOG_CAPACITY);
        assert_eq!(session.log[0].contributors, ["run-5"]);
        assert_eq!(
            session.log.back().unwrap().contributors,
            [format!("run-{}", SESSION_LOG_CAPACITY + 4)]
        );
    }
}
