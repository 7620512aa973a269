//! One evaluation run: a compiled labeling spec plus the backends it fans out to.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::GenerationSettings;
use crate::dispatch::Dispatcher;
use crate::error::ConfigurationError;
use crate::label_config::LabelingSpec;
use crate::llm::{GenerationRequest, Llm};
use crate::normalize::normalize;
use crate::prompt::{self, FieldHints};
use crate::schema::{self, OutputSchema};
use crate::scoring::SharedAccuracy;
use crate::types::{PredictionSet, Task};

/// Predictions for one task, plus why the other backends produced none.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPredictions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<u64>,
    pub predictions: Vec<PredictionSet>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<String, String>,
    /// Why this task's ground truth could not be scored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring_error: Option<String>,
}

pub struct Session {
    spec: Arc<LabelingSpec>,
    schema: Arc<OutputSchema>,
    hints: FieldHints,
    dispatcher: Dispatcher,
    generation: GenerationSettings,
}

impl Session {
    pub fn new(
        spec: LabelingSpec,
        backends: Vec<Arc<dyn Llm>>,
        generation: GenerationSettings,
    ) -> Result<Self, ConfigurationError> {
        let schema = schema::compile(&spec)?;
        let hints = FieldHints::from_schema(&schema);
        let dispatcher = Dispatcher::new(backends)?.with_timeout(generation.timeout());
        Ok(Self {
            spec: Arc::new(spec),
            schema: Arc::new(schema),
            hints,
            dispatcher,
            generation,
        })
    }

    pub fn spec(&self) -> &LabelingSpec {
        &self.spec
    }

    pub fn schema(&self) -> &OutputSchema {
        &self.schema
    }

    pub fn prompt(&self, content: &str) -> String {
        prompt::assemble(&self.spec, &self.hints, content)
    }

    pub fn request(&self, content: &str) -> GenerationRequest {
        GenerationRequest {
            system: prompt::system_prompt(&self.schema),
            prompt: self.prompt(content),
            schema: self.schema.json_schema(),
            max_tokens: self.generation.max_tokens,
            temperature: self.generation.temperature,
        }
    }

    /// Fan `content` out to every backend and normalize what comes back.
    pub async fn predict(&self, content: &str) -> TaskPredictions {
        let results = self.dispatcher.dispatch(Arc::new(self.request(content))).await;

        let mut out = TaskPredictions::default();
        for (backend, result) in results {
            let normalized = match result {
                Ok(raw) => normalize(&self.schema, &backend, &raw).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match normalized {
                Ok(n) => out.predictions.push(n.into_prediction(backend)),
                Err(msg) => {
                    out.failures.insert(backend, msg);
                }
            }
        }
        out
    }

    pub async fn predict_task(&self, task: &Task) -> TaskPredictions {
        let Some(content) = self.spec.task_content(&task.data) else {
            warn!(task = ?task.id, "task has no text content for this labeling config");
            let failures = self
                .dispatcher
                .backend_ids()
                .map(|id| (id.to_string(), "task has no text content".to_string()))
                .collect();
            return TaskPredictions { task: task.id, failures, ..Default::default() };
        };
        let mut out = self.predict(&content).await;
        out.task = task.id;
        out
    }

    /// Predict a batch of tasks, `concurrency` at a time, returned in input
    /// order. Tasks that carry ground truth are scored into `accuracy`; a
    /// task whose ground truth can't be scored keeps its predictions and
    /// reports the reason in [`TaskPredictions::scoring_error`].
    pub async fn predict_batch(
        &self,
        tasks: &[Task],
        concurrency: usize,
        accuracy: Option<&SharedAccuracy>,
    ) -> Vec<TaskPredictions> {
        let jobs = tasks.iter().enumerate().map(|(idx, task)| async move {
            let mut out = self.predict_task(task).await;
            if let (Some(acc), Some(truth)) = (accuracy, &task.ground_truth) {
                let truth: Vec<_> =
                    truth.iter().cloned().map(|r| self.spec.resolve_region(r)).collect();
                if let Err(e) = acc.evaluate(&truth, &out.predictions) {
                    warn!(task = ?task.id, "not scored: {e}");
                    out.scoring_error = Some(e.to_string());
                }
            }
            (idx, out)
        }).collect::<Vec<_>>();

        let mut done = stream::iter(jobs)
            .buffer_unordered(concurrency.max(1))
            .collect::<Vec<_>>()
            .await;
        done.sort_by_key(|(idx, _)| *idx);

        let unscored = done.iter().filter(|(_, p)| p.scoring_error.is_some()).count();
        info!(tasks = done.len(), unscored, "batch complete");
        done.into_iter().map(|(_, p)| p).collect()
    }
}
