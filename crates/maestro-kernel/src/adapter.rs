//! The single seam between the orchestration core and an inference backend.
//!
//! An adapter owns exactly one model. Static attributes such as tier,
//! offline/hybrid flags and accuracy live on the paired
//! [`ModelDescriptor`](crate::model::ModelDescriptor); the adapter only
//! answers lifecycle and execution calls.
//!
//! The protocol operations used by collaborative execution
//! (`analyze_task`, `decompose_task`, `combine_outputs`, `detect_consensus`)
//! have default implementations so a plain backend only needs `execute`.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::OrchestratorResult;
use crate::model::{LoadOptions, MemoryRequirement};
use crate::task::{
    ConsensusVerdict, ExecuteOptions, ModelContribution, Subtask, TaskInput, TaskOutput,
};

/// Task type used when asking a model to analyze characteristics.
pub const ANALYSIS_TASK: &str = "task-analysis";
/// Task type used when asking a model to decompose work.
pub const DECOMPOSITION_TASK: &str = "task-decomposition";
/// Task type used when asking a model to merge several outputs.
pub const SYNTHESIS_TASK: &str = "synthesis";

#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Id of the model this adapter serves
    fn model_id(&self) -> &str;

    /// Load the model. `Ok(false)` means the backend declined.
    async fn load(&self, options: &LoadOptions) -> OrchestratorResult<bool>;

    /// Unload the model and release its memory.
    async fn unload(&self) -> OrchestratorResult<bool>;

    /// Run inference.
    async fn execute(
        &self,
        input: &TaskInput,
        options: &ExecuteOptions,
    ) -> OrchestratorResult<TaskOutput>;

    fn is_loaded(&self) -> bool;

    /// Current memory footprint in MB (zero when unloaded)
    fn memory_usage_mb(&self) -> f64;

    /// Memory the adapter would need for the given options, when it knows
    /// better than the descriptor's table.
    fn required_memory(&self, _options: &LoadOptions) -> Option<MemoryRequirement> {
        None
    }

    /// Extract the characteristics of a task (`mathematics`, `legal`, ...).
    ///
    /// Reads `data.characteristics`, then a JSON array in the content, then
    /// a comma or newline separated list.
    async fn analyze_task(&self, input: &TaskInput) -> OrchestratorResult<Vec<String>> {
        let request = TaskInput::new(input.content.clone())
            .with_task_type(ANALYSIS_TASK)
            .with_metadata(
                "original_task_type",
                input.task_type.clone().map(Value::String).unwrap_or(Value::Null),
            );
        let output = self.execute(&request, &ExecuteOptions::default()).await?;
        Ok(parse_characteristics(&output))
    }

    /// Split a task into subtasks. An empty list means "run it whole".
    async fn decompose_task(&self, input: &TaskInput) -> OrchestratorResult<Vec<Subtask>> {
        let mut request = input.clone();
        request.task_type = Some(DECOMPOSITION_TASK.to_string());
        let output = self.execute(&request, &ExecuteOptions::default()).await?;
        Ok(parse_subtasks(&output))
    }

    /// Merge several outputs into one.
    async fn combine_outputs(
        &self,
        input: &TaskInput,
        contributions: &[ModelContribution],
    ) -> OrchestratorResult<TaskOutput> {
        let request = input
            .clone()
            .with_task_type(SYNTHESIS_TASK)
            .with_context(contributions.to_vec())
            .with_metadata(
                "original_task_type",
                input.task_type.clone().map(Value::String).unwrap_or(Value::Null),
            );
        self.execute(&request, &ExecuteOptions::default()).await
    }

    /// Decide whether the outputs agree.
    ///
    /// The default groups outputs by normalized content and reports
    /// consensus when a strict majority of at least two agree.
    async fn detect_consensus(
        &self,
        _input: &TaskInput,
        contributions: &[ModelContribution],
    ) -> OrchestratorResult<ConsensusVerdict> {
        Ok(majority_verdict(contributions))
    }
}

fn parse_characteristics(output: &TaskOutput) -> Vec<String> {
    if let Some(items) = output.data.get("characteristics").and_then(Value::as_array) {
        return normalize(items.iter().filter_map(Value::as_str));
    }
    if let Ok(items) = serde_json::from_str::<Vec<String>>(output.content.trim()) {
        return normalize(items.iter().map(String::as_str));
    }
    normalize(output.content.split([',', '\n']))
}

fn normalize<'a>(items: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let item = item.trim().to_ascii_lowercase();
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

fn parse_subtasks(output: &TaskOutput) -> Vec<Subtask> {
    let from_data = output
        .data
        .get("subtasks")
        .cloned()
        .and_then(|v| serde_json::from_value::<Vec<Subtask>>(v).ok());
    let mut subtasks = from_data
        .or_else(|| serde_json::from_str::<Vec<Subtask>>(output.content.trim()).ok())
        .unwrap_or_default();

    for (idx, subtask) in subtasks.iter_mut().enumerate() {
        if subtask.id.is_empty() {
            subtask.id = format!("subtask-{}", idx + 1);
        }
    }
    subtasks
}

/// Majority vote over normalized output content.
///
/// The agreed content is the most confident member of the largest group,
/// the first one when none reports a confidence.
pub fn majority_verdict(contributions: &[ModelContribution]) -> ConsensusVerdict {
    let total = contributions.len();
    if total == 0 {
        return ConsensusVerdict::default();
    }

    let mut groups: Vec<(String, Vec<&ModelContribution>)> = Vec::new();
    for contribution in contributions {
        let key = contribution.output.content.trim().to_lowercase();
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(contribution),
            None => groups.push((key, vec![contribution])),
        }
    }

    let Some((_, largest)) = groups.iter().max_by_key(|(_, members)| members.len()) else {
        return ConsensusVerdict::default();
    };

    let agreeing = largest.len();
    let strength = agreeing as f64 / total as f64;
    if agreeing >= 2 && agreeing * 2 > total {
        ConsensusVerdict {
            reached: true,
            agreeing_models: largest.iter().map(|c| c.model_id.clone()).collect(),
            strength,
            content: largest
                .iter()
                .fold(None::<&ModelContribution>, |best, c| {
                    let conf = c.output.confidence.unwrap_or(0.0);
                    match best {
                        Some(b) if conf <= b.output.confidence.unwrap_or(0.0) => best,
                        _ => Some(c),
                    }
                })
                .map(|c| c.output.content.clone()),
        }
    } else {
        ConsensusVerdict {
            reached: false,
            agreeing_models: Vec::new(),
            strength,
            content: None,
        }
    }
}
