//! Task payloads exchanged between the orchestration core and adapters.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Input
// ============================================================================

/// One unit of work handed to a model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskInput {
    pub content: String,
    #[serde(default)]
    pub task_type: Option<String>,
    /// Characteristic the model should concentrate on (specialized routing)
    #[serde(default)]
    pub focus: Option<String>,
    /// Outputs of earlier steps or participants
    #[serde(default)]
    pub context: Vec<ModelContribution>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl TaskInput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn with_focus(mut self, focus: impl Into<String>) -> Self {
        self.focus = Some(focus.into());
        self
    }

    pub fn with_context(mut self, context: Vec<ModelContribution>) -> Self {
        self.context = context;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Per-call execution options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

// ============================================================================
// Output
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// What a model produced for a [`TaskInput`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub content: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    /// Structured payload (analysis results, subtasks, raw API response)
    #[serde(default)]
    pub data: Value,
}

impl TaskOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// A successful output attributed to the model that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelContribution {
    pub model_id: String,
    pub output: TaskOutput,
    /// Characteristic or subtask this output answers, if any
    #[serde(default)]
    pub focus: Option<String>,
}

impl ModelContribution {
    pub fn new(model_id: impl Into<String>, output: TaskOutput) -> Self {
        Self {
            model_id: model_id.into(),
            output,
            focus: None,
        }
    }

    pub fn with_focus(mut self, focus: impl Into<String>) -> Self {
        self.focus = Some(focus.into());
        self
    }
}

// ============================================================================
// Protocol payloads
// ============================================================================

/// One piece of a decomposed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    #[serde(default)]
    pub id: String,
    pub description: String,
    /// Characteristics used to route the subtask to a specialist
    #[serde(default)]
    pub characteristics: Vec<String>,
}

impl Subtask {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            characteristics: Vec::new(),
        }
    }

    pub fn with_characteristics<I, S>(mut self, characteristics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.characteristics = characteristics.into_iter().map(Into::into).collect();
        self
    }
}

/// Outcome of agreement detection over several outputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsensusVerdict {
    pub reached: bool,
    #[serde(default)]
    pub agreeing_models: Vec<String>,
    /// Share of participants that agree, in `0.0..=1.0`
    #[serde(default)]
    pub strength: f64,
    /// Agreed content when consensus was reached
    #[serde(default)]
    pub content: Option<String>,
}
