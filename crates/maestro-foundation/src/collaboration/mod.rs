//! Collaborative model orchestrator.
//!
//! A session fixes a ranked set of participants for one strategy; each
//! execution runs the strategy's protocol over them. Sessions live until
//! closed.

mod session;
mod strategies;

pub use session::{
    CollaborationResult, CollaborationSession, CollaborationStrategy, SessionLogEntry,
    SessionRequest,
};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use maestro_kernel::{
    ExecuteOptions, ModelCatalog, ModelCriteria, OrchestratorError, OrchestratorResult,
    TaskInput,
};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::selector::ProfileRegistry;
use strategies::{Participant, ProtocolOutcome, confidence_of};

pub struct CollaborativeModelOrchestrator {
    catalog: Arc<dyn ModelCatalog>,
    profiles: Arc<ProfileRegistry>,
    sessions: RwLock<HashMap<String, CollaborationSession>>,
}

impl CollaborativeModelOrchestrator {
    pub fn new(catalog: Arc<dyn ModelCatalog>, profiles: Arc<ProfileRegistry>) -> Self {
        Self {
            catalog,
            profiles,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a session over the best eligible models for the strategy.
    pub async fn create_session(
        &self,
        request: SessionRequest,
    ) -> OrchestratorResult<CollaborationSession> {
        if let Some(id) = &request.session_id {
            if self.sessions.read().contains_key(id) {
                return Err(OrchestratorError::Config(format!(
                    "session already exists: {id}"
                )));
            }
        }

        let criteria = ModelCriteria {
            model_type: request.model_type,
            task_type: request.task_type.clone(),
            offline_only: request.offline_only,
            max_tier: request.max_tier,
        };
        let mut eligible: Vec<_> = self
            .catalog
            .get_models_by_type(request.model_type)
            .await
            .into_iter()
            .filter(|m| criteria.admits(m))
            .collect();

        if eligible.is_empty() {
            return Err(OrchestratorError::NoEligibleModel(format!(
                "no {} model eligible for {} collaboration",
                request.model_type, request.strategy
            )));
        }

        let dimension = request.strategy.ranking_dimension();
        eligible.sort_by(|a, b| {
            self.profiles
                .score(&b.id, dimension)
                .total_cmp(&self.profiles.score(&a.id, dimension))
                .then_with(|| b.accuracy.total_cmp(&a.accuracy))
        });
        let participants: Vec<String> = eligible
            .into_iter()
            .take(request.strategy.pool_size())
            .map(|m| m.id)
            .collect();

        let id = request
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let session = CollaborationSession::new(id.clone(), &request, participants);

        {
            let mut sessions = self.sessions.write();
            if sessions.contains_key(&id) {
                return Err(OrchestratorError::Config(format!(
                    "session already exists: {id}"
                )));
            }
            sessions.insert(id.clone(), session.clone());
        }

        info!(
            session_id = %id,
            strategy = %session.strategy,
            participants = ?session.participants(),
            "Collaboration session created"
        );
        Ok(session)
    }

    /// Run the session's protocol on `input`.
    pub async fn execute_task(
        &self,
        session_id: &str,
        input: &TaskInput,
        options: &ExecuteOptions,
    ) -> OrchestratorResult<CollaborationResult> {
        let session = self
            .session(session_id)
            .ok_or_else(|| OrchestratorError::SessionNotFound(session_id.to_string()))?;

        let participants = self.resolve(&session).await;
        let outcome = if participants.is_empty() {
            Err(OrchestratorError::AllParticipantsFailed(format!(
                "no participant of session {session_id} is available"
            )))
        } else {
            self.dispatch(session.strategy, &participants, input, options)
                .await
        };

        self.record(session_id, &outcome);

        match outcome {
            Ok(outcome) => {
                let model_confidences = outcome
                    .contributions
                    .iter()
                    .map(|c| (c.model_id.clone(), confidence_of(c, &participants)))
                    .collect();
                Ok(CollaborationResult {
                    session_id: session.id,
                    strategy: session.strategy,
                    output: outcome.output,
                    contributions: outcome.contributions,
                    model_confidences,
                    consensus: outcome.consensus,
                    subtasks: outcome.subtasks,
                    characteristics: outcome.characteristics,
                })
            }
            Err(e) => {
                error!(session_id, strategy = %session.strategy, error = %e, "Collaborative execution failed");
                Err(e)
            }
        }
    }

    async fn dispatch(
        &self,
        strategy: CollaborationStrategy,
        participants: &[Participant],
        input: &TaskInput,
        options: &ExecuteOptions,
    ) -> OrchestratorResult<ProtocolOutcome> {
        debug!(%strategy, participants = participants.len(), "Dispatching collaborative task");
        match strategy {
            CollaborationStrategy::Ensemble => strategies::ensemble(participants, input, options).await,
            CollaborationStrategy::ChainOfThought => {
                strategies::chain_of_thought(participants, input, options).await
            }
            CollaborationStrategy::TaskDecomposition => {
                strategies::task_decomposition(participants, input, options).await
            }
            CollaborationStrategy::Consensus => {
                strategies::consensus(participants, input, options).await
            }
            CollaborationStrategy::Specialized => {
                strategies::specialized(participants, input, options).await
            }
        }
    }

    /// Participants that are in the catalog and loaded. Anything else
    /// counts as a failed member for this execution.
    async fn resolve(&self, session: &CollaborationSession) -> Vec<Participant> {
        let mut resolved = Vec::with_capacity(session.participants().len());
        for model_id in session.participants() {
            let descriptor = self.catalog.get_model(model_id).await;
            let adapter = self.catalog.get_adapter(model_id).await;
            match (descriptor, adapter) {
                (Some(_), Some(adapter)) if !adapter.is_loaded() => {
                    warn!(
                        session_id = %session.id,
                        model_id = %model_id,
                        "Participant not loaded, skipping"
                    );
                }
                (Some(descriptor), Some(adapter)) => resolved.push(Participant {
                    profile: self.profiles.get(model_id),
                    descriptor,
                    adapter,
                }),
                _ => warn!(session_id = %session.id, model_id = %model_id, "Participant no longer in catalog"),
            }
        }
        resolved
    }

    fn record(&self, session_id: &str, outcome: &OrchestratorResult<ProtocolOutcome>) {
        let entry = SessionLogEntry {
            timestamp: Utc::now(),
            success: outcome.is_ok(),
            contributors: outcome
                .as_ref()
                .map(|o| o.contributions.iter().map(|c| c.model_id.clone()).collect())
                .unwrap_or_default(),
            error: outcome.as_ref().err().map(ToString::to_string),
        };
        // the session may have been closed mid-flight
        if let Some(session) = self.sessions.write().get_mut(session_id) {
            session.record(entry);
        }
    }

    pub fn close_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().remove(session_id).is_some();
        if removed {
            info!(session_id, "Collaboration session closed");
        }
        removed
    }

    pub fn session(&self, session_id: &str) -> Option<CollaborationSession> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_model_in_session(&self, model_id: &str) -> bool {
        self.sessions
            .read()
            .values()
            .any(|s| s.has_participant(model_id))
    }
}
