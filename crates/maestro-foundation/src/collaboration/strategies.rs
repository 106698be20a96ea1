//! The five cooperation protocols.
//!
//! Each protocol runs over resolved participants and returns a
//! [`ProtocolOutcome`]. Fan-out phases wait for every participant and keep
//! the successes; a phase with no success fails the whole execution.

use std::cmp::Ordering;
use std::sync::Arc;

use futures::future::join_all;
use maestro_kernel::{
    ConsensusVerdict, ExecuteOptions, ModelAdapter, ModelContribution, ModelDescriptor,
    OrchestratorError, OrchestratorResult, Subtask, TaskInput, TaskOutput,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::selector::{CapabilityDimension, CapabilityProfile};

const ACCURACY_WEIGHT: f64 = 10.0;
const GENERAL_CHARACTERISTIC: &str = "general";

pub(crate) struct Participant {
    pub descriptor: ModelDescriptor,
    pub adapter: Arc<dyn ModelAdapter>,
    pub profile: CapabilityProfile,
}

impl Participant {
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    fn score(&self, dimension: CapabilityDimension) -> f64 {
        self.profile.score(dimension)
    }

    fn specialization_fit(&self, characteristics: &[String]) -> f64 {
        self.profile.specialization_sum(characteristics) + ACCURACY_WEIGHT * self.descriptor.accuracy
    }
}

/// Output confidence, falling back to the model's static accuracy.
pub(crate) fn confidence_of(contribution: &ModelContribution, participants: &[Participant]) -> f64 {
    contribution.output.confidence.unwrap_or_else(|| {
        participants
            .iter()
            .find(|p| p.id() == contribution.model_id)
            .map(|p| p.descriptor.accuracy)
            .unwrap_or(0.0)
    })
}

#[derive(Debug, Default)]
pub(crate) struct ProtocolOutcome {
    pub output: TaskOutput,
    pub contributions: Vec<ModelContribution>,
    pub consensus: Option<ConsensusVerdict>,
    pub subtasks: Vec<Subtask>,
    pub characteristics: Vec<String>,
}

impl ProtocolOutcome {
    fn new(output: TaskOutput, contributions: Vec<ModelContribution>) -> Self {
        Self {
            output,
            contributions,
            ..Self::default()
        }
    }
}

/// Best participant on `dimension`, ties by accuracy, then earliest.
fn lead(participants: &[Participant], dimension: CapabilityDimension) -> Option<&Participant> {
    participants.iter().fold(None::<&Participant>, |best, p| match best {
        None => Some(p),
        Some(b) => {
            let order = p
                .score(dimension)
                .total_cmp(&b.score(dimension))
                .then_with(|| p.descriptor.accuracy.total_cmp(&b.descriptor.accuracy));
            if order == Ordering::Greater { Some(p) } else { Some(b) }
        }
    })
}

fn first_max<'a>(
    participants: &'a [Participant],
    key: impl Fn(&Participant) -> f64,
) -> Option<&'a Participant> {
    participants.iter().fold(None::<(&Participant, f64)>, |best, p| {
        let k = key(p);
        match best {
            Some((_, bk)) if k.total_cmp(&bk) != Ordering::Greater => best,
            _ => Some((p, k)),
        }
    })
    .map(|(p, _)| p)
}

struct Job<'a> {
    participant: &'a Participant,
    input: TaskInput,
    focus: Option<String>,
}

/// Run every job concurrently and keep the successes, in job order.
async fn fan_out(jobs: Vec<Job<'_>>, options: &ExecuteOptions) -> Vec<ModelContribution> {
    let runs = jobs.into_iter().map(|job| async move {
        let result = job.participant.adapter.execute(&job.input, options).await;
        (job.participant.id().to_string(), job.focus, result)
    });

    join_all(runs)
        .await
        .into_iter()
        .filter_map(|(model_id, focus, result)| match result {
            Ok(output) => {
                let contribution = ModelContribution::new(model_id, output);
                Some(match focus {
                    Some(f) => contribution.with_focus(f),
                    None => contribution,
                })
            }
            Err(e) => {
                warn!(model_id = %model_id, error = %e, "Participant failed, dropping its output");
                None
            }
        })
        .collect()
}

fn all_failed(phase: &str, attempted: usize) -> OrchestratorError {
    OrchestratorError::AllParticipantsFailed(format!("{phase}: all {attempted} attempts failed"))
}

/// Merge outputs with the best synthesizer. A single output is returned as is.
async fn synthesize(
    participants: &[Participant],
    input: &TaskInput,
    contributions: &[ModelContribution],
) -> OrchestratorResult<TaskOutput> {
    if let [only] = contributions {
        return Ok(only.output.clone());
    }
    let synthesizer = lead(participants, CapabilityDimension::Synthesizing)
        .ok_or_else(|| all_failed("synthesis", 0))?;
    debug!(model_id = %synthesizer.id(), inputs = contributions.len(), "Synthesizing outputs");
    synthesizer.adapter.combine_outputs(input, contributions).await
}

pub(crate) async fn ensemble(
    participants: &[Participant],
    input: &TaskInput,
    options: &ExecuteOptions,
) -> OrchestratorResult<ProtocolOutcome> {
    let jobs = participants
        .iter()
        .map(|p| Job {
            participant: p,
            input: input.clone(),
            focus: None,
        })
        .collect();
    let contributions = fan_out(jobs, options).await;
    if contributions.is_empty() {
        return Err(all_failed("ensemble", participants.len()));
    }

    let output = synthesize(participants, input, &contributions).await?;
    Ok(ProtocolOutcome::new(output, contributions))
}

pub(crate) async fn chain_of_thought(
    participants: &[Participant],
    input: &TaskInput,
    options: &ExecuteOptions,
) -> OrchestratorResult<ProtocolOutcome> {
    let mut order: Vec<&Participant> = participants.iter().collect();
    order.sort_by(|a, b| {
        b.score(CapabilityDimension::Reasoning)
            .total_cmp(&a.score(CapabilityDimension::Reasoning))
            .then_with(|| b.descriptor.accuracy.total_cmp(&a.descriptor.accuracy))
    });

    let mut steps: Vec<ModelContribution> = Vec::new();
    for participant in order {
        let mut context = input.context.clone();
        context.extend(steps.iter().cloned());
        let step_input = input.clone().with_context(context);

        match participant.adapter.execute(&step_input, options).await {
            Ok(output) => {
                debug!(model_id = %participant.id(), step = steps.len() + 1, "Reasoning step complete");
                steps.push(ModelContribution::new(participant.id(), output));
            }
            Err(e) => {
                warn!(model_id = %participant.id(), error = %e, "Reasoning step failed, skipping");
            }
        }
    }

    let Some(last) = steps.last() else {
        return Err(all_failed("chain-of-thought", participants.len()));
    };
    let output = last.output.clone();
    Ok(ProtocolOutcome::new(output, steps))
}

pub(crate) async fn task_decomposition(
    participants: &[Participant],
    input: &TaskInput,
    options: &ExecuteOptions,
) -> OrchestratorResult<ProtocolOutcome> {
    let planner = lead(participants, CapabilityDimension::Planning)
        .ok_or_else(|| all_failed("decomposition", 0))?;

    let mut subtasks = match planner.adapter.decompose_task(input).await {
        Ok(subtasks) => subtasks,
        Err(e) => {
            warn!(model_id = %planner.id(), error = %e, "Decomposition failed, running task whole");
            Vec::new()
        }
    };
    if subtasks.is_empty() {
        subtasks.push(Subtask::new("subtask-1", input.content.clone()));
    }

    let jobs = subtasks
        .iter()
        .filter_map(|subtask| {
            let assignee = if subtask.characteristics.is_empty() {
                participants.first()
            } else {
                first_max(participants, |p| p.specialization_fit(&subtask.characteristics))
            }?;
            let mut sub_input = TaskInput::new(subtask.description.clone())
                .with_context(input.context.clone())
                .with_metadata("subtask_id", Value::String(subtask.id.clone()));
            sub_input.task_type = input.task_type.clone();
            Some(Job {
                participant: assignee,
                input: sub_input,
                focus: Some(subtask.id.clone()),
            })
        })
        .collect();

    let contributions = fan_out(jobs, options).await;
    if contributions.is_empty() {
        return Err(all_failed("task-decomposition", subtasks.len()));
    }

    let output = synthesize(participants, input, &contributions).await?;
    Ok(ProtocolOutcome {
        subtasks,
        ..ProtocolOutcome::new(output, contributions)
    })
}

pub(crate) async fn consensus(
    participants: &[Participant],
    input: &TaskInput,
    options: &ExecuteOptions,
) -> OrchestratorResult<ProtocolOutcome> {
    let jobs = participants
        .iter()
        .map(|p| Job {
            participant: p,
            input: input.clone(),
            focus: None,
        })
        .collect();
    let contributions = fan_out(jobs, options).await;
    if contributions.is_empty() {
        return Err(all_failed("consensus", participants.len()));
    }

    if participants.len() == 1 {
        let output = contributions[0].output.clone();
        return Ok(ProtocolOutcome::new(output, contributions));
    }

    let verdict = match lead(participants, CapabilityDimension::Consistency) {
        Some(detector) => match detector.adapter.detect_consensus(input, &contributions).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(model_id = %detector.id(), error = %e, "Consensus detection failed");
                ConsensusVerdict::default()
            }
        },
        None => ConsensusVerdict::default(),
    };

    let most_confident = |pool: Vec<&ModelContribution>| {
        pool.into_iter()
            .fold(None::<(&ModelContribution, f64)>, |best, c| {
                let conf = confidence_of(c, participants);
                match best {
                    Some((_, b)) if conf <= b => best,
                    _ => Some((c, conf)),
                }
            })
            .map(|(c, _)| c.output.clone())
    };

    let output = if verdict.reached {
        match verdict.content.as_deref() {
            // keep the member's metadata when the agreed text is one of the outputs
            Some(agreed) => contributions
                .iter()
                .find(|c| c.output.content == agreed)
                .map(|c| c.output.clone())
                .unwrap_or_else(|| TaskOutput::text(agreed)),
            None => {
                let agreeing: Vec<&ModelContribution> = contributions
                    .iter()
                    .filter(|c| verdict.agreeing_models.contains(&c.model_id))
                    .collect();
                most_confident(agreeing).unwrap_or_default()
            }
        }
    } else {
        most_confident(contributions.iter().collect()).unwrap_or_default()
    };

    debug!(
        reached = verdict.reached,
        strength = verdict.strength,
        "Consensus evaluated"
    );
    Ok(ProtocolOutcome {
        consensus: Some(verdict),
        ..ProtocolOutcome::new(output, contributions)
    })
}

pub(crate) async fn specialized(
    participants: &[Participant],
    input: &TaskInput,
    options: &ExecuteOptions,
) -> OrchestratorResult<ProtocolOutcome> {
    let analyzer = participants
        .first()
        .ok_or_else(|| all_failed("specialized", 0))?;

    let mut characteristics = match analyzer.adapter.analyze_task(input).await {
        Ok(found) => found,
        Err(e) => {
            warn!(model_id = %analyzer.id(), error = %e, "Task analysis failed");
            Vec::new()
        }
    };
    if characteristics.is_empty() {
        characteristics.push(GENERAL_CHARACTERISTIC.to_string());
    }

    let jobs = characteristics
        .iter()
        .filter_map(|characteristic| {
            let specialist = first_max(participants, |p| p.profile.specialization(characteristic))
                .filter(|p| p.profile.specialization(characteristic) > 0.0)
                .or_else(|| first_max(participants, |p| p.descriptor.accuracy))?;
            Some(Job {
                participant: specialist,
                input: input.clone().with_focus(characteristic.clone()),
                focus: Some(characteristic.clone()),
            })
        })
        .collect();

    let contributions = fan_out(jobs, options).await;
    if contributions.is_empty() {
        return Err(all_failed("specialized", characteristics.len()));
    }

    let output = synthesize(participants, input, &contributions).await?;
    Ok(ProtocolOutcome {
        characteristics,
        ..ProtocolOutcome::new(output, contributions)
    })
}
