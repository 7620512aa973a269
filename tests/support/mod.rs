#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use labelscore_rs::labelstudio::{LsTask, Project, TaskSource};
use labelscore_rs::llm::{GenerationRequest, Llm};

pub struct FakeLlm {
    pub id: String,
    // maps each request to the raw completion text
    pub handler: Box<dyn Fn(&GenerationRequest) -> Result<String> + Send + Sync>,
    pub delay_ms: u64,
    pub calls: AtomicUsize,
}

impl FakeLlm {
    pub fn new(
        id: &str,
        handler: impl Fn(&GenerationRequest) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self { id: id.to_string(), handler: Box::new(handler), delay_ms: 0, calls: AtomicUsize::new(0) }
    }

    pub fn fixed(id: &str, text: &str) -> Self {
        let text = text.to_string();
        Self::new(id, move |_| Ok(text.clone()))
    }

    pub fn failing(id: &str, msg: &str) -> Self {
        let msg = msg.to_string();
        Self::new(id, move |_| Err(anyhow!(msg.clone())))
    }

    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    pub fn shared(self) -> Arc<dyn Llm> {
        Arc::new(self)
    }
}

#[async_trait]
impl Llm for FakeLlm {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        use tokio::time::{sleep, Duration};
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            sleep(Duration::from_millis(self.delay_ms)).await;
        }
        (self.handler)(request)
    }
}

#[derive(Default)]
pub struct FakeSource {
    pub projects: BTreeMap<u64, Project>,
    pub tasks: BTreeMap<u64, Vec<LsTask>>,
}

impl FakeSource {
    pub fn with_project(mut self, project: Project, tasks: Vec<LsTask>) -> Self {
        self.tasks.insert(project.id, tasks);
        self.projects.insert(project.id, project);
        self
    }
}

#[async_trait]
impl TaskSource for FakeSource {
    async fn project(&self, id: u64) -> Result<Project> {
        self.projects.get(&id).cloned().ok_or_else(|| anyhow!("404 project {id}"))
    }

    async fn tasks(&self, project_id: u64) -> Result<Vec<LsTask>> {
        Ok(self.tasks.get(&project_id).cloned().unwrap_or_default())
    }
}

pub const SENTIMENT_CONFIG: &str = r#"
<View>
  <Text name="text" value="$text"/>
  <Choices name="sentiment" toName="text">
    <Choice value="positive"/>
    <Choice value="negative"/>
    <Choice value="neutral"/>
  </Choices>
  <Number name="score" toName="text"/>
</View>"#;
