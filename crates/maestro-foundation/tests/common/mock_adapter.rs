//! Scripted [`ModelAdapter`] for integration tests.
//!
//! Replies are fixed at construction time. Synthesis requests are answered
//! with `combined:` followed by the contributing contents, so tests can see
//! exactly which outputs survived a fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use maestro_kernel::adapter::{SYNTHESIS_TASK, majority_verdict};
use maestro_kernel::{
    ConsensusVerdict, ExecuteOptions, LoadOptions, ModelAdapter, ModelContribution,
    OrchestratorError, OrchestratorResult, TaskInput, TaskOutput,
};
use parking_lot::Mutex;

pub struct MockAdapter {
    id: String,
    reply: String,
    confidence: Option<f64>,
    memory_mb: f64,
    load_ok: bool,
    load_delay: Option<Duration>,
    execute_ok: bool,
    echo_focus: bool,
    task_replies: HashMap<String, TaskOutput>,
    verdict: Option<ConsensusVerdict>,
    loaded: AtomicBool,
    loads: AtomicUsize,
    unloads: AtomicUsize,
    executions: AtomicUsize,
    last_load: Mutex<Option<LoadOptions>>,
    inputs: Mutex<Vec<TaskInput>>,
}

impl MockAdapter {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            reply: format!("answer from {id}"),
            confidence: None,
            memory_mb: 1024.0,
            load_ok: true,
            load_delay: None,
            execute_ok: true,
            echo_focus: false,
            task_replies: HashMap::new(),
            verdict: None,
            loaded: AtomicBool::new(false),
            loads: AtomicUsize::new(0),
            unloads: AtomicUsize::new(0),
            executions: AtomicUsize::new(0),
            last_load: Mutex::new(None),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(mut self, reply: &str) -> Self {
        self.reply = reply.to_string();
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_memory_mb(mut self, memory_mb: f64) -> Self {
        self.memory_mb = memory_mb;
        self
    }

    pub fn failing_load(mut self) -> Self {
        self.load_ok = false;
        self
    }

    /// `load` sleeps for `delay` before finishing.
    pub fn slow_load(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    /// Every `execute` call fails, synthesis included.
    pub fn failing_execute(mut self) -> Self {
        self.execute_ok = false;
        self
    }

    /// Prefix replies with the focus hint, if any.
    pub fn echoing_focus(mut self) -> Self {
        self.echo_focus = true;
        self
    }

    /// Reply to inputs of `task_type` with `output`.
    pub fn on_task(mut self, task_type: &str, output: TaskOutput) -> Self {
        self.task_replies.insert(task_type.to_string(), output);
        self
    }

    /// Answer consensus detection with `verdict` instead of a majority vote.
    pub fn with_verdict(mut self, verdict: ConsensusVerdict) -> Self {
        self.verdict = Some(verdict);
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn unload_count(&self) -> usize {
        self.unloads.load(Ordering::SeqCst)
    }

    pub fn execution_count(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn last_load(&self) -> Option<LoadOptions> {
        self.last_load.lock().clone()
    }

    pub fn inputs(&self) -> Vec<TaskInput> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl ModelAdapter for MockAdapter {
    fn model_id(&self) -> &str {
        &self.id
    }

    async fn load(&self, options: &LoadOptions) -> OrchestratorResult<bool> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        *self.last_load.lock() = Some(options.clone());
        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }
        if !self.load_ok {
            return Err(OrchestratorError::ModelLoadFailed(format!(
                "{} refused to load",
                self.id
            )));
        }
        self.loaded.store(true, Ordering::SeqCst);
        Ok(true)
    }

    async fn unload(&self) -> OrchestratorResult<bool> {
        self.unloads.fetch_add(1, Ordering::SeqCst);
        self.loaded.store(false, Ordering::SeqCst);
        Ok(true)
    }

    async fn execute(
        &self,
        input: &TaskInput,
        _options: &ExecuteOptions,
    ) -> OrchestratorResult<TaskOutput> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().push(input.clone());

        if !self.execute_ok {
            return Err(OrchestratorError::ExecutionFailed(format!(
                "{} is scripted to fail",
                self.id
            )));
        }

        let task = input.task_type.as_deref().unwrap_or_default();
        if let Some(output) = self.task_replies.get(task) {
            return Ok(output.clone());
        }

        if task == SYNTHESIS_TASK {
            let parts: Vec<&str> = input.context.iter().map(|c| c.output.content.as_str()).collect();
            return Ok(TaskOutput::text(format!("combined:{}", parts.join("|"))));
        }

        let content = match (&input.focus, self.echo_focus) {
            (Some(focus), true) => format!("[{focus}] {}", self.reply),
            _ => self.reply.clone(),
        };
        let mut output = TaskOutput::text(content);
        output.confidence = self.confidence;
        Ok(output)
    }

    async fn detect_consensus(
        &self,
        _input: &TaskInput,
        contributions: &[ModelContribution],
    ) -> OrchestratorResult<ConsensusVerdict> {
        Ok(self
            .verdict
            .clone()
            .unwrap_or_else(|| majority_verdict(contributions)))
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    fn memory_usage_mb(&self) -> f64 {
        if self.is_loaded() { self.memory_mb } else { 0.0 }
    }
}
