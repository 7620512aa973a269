//! Label Studio REST client: projects, tasks, annotations and predictions.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::LabelStudioSettings;
use crate::label_config::LabelingSpec;
use crate::scoring::{score_tasks, AccuracyTable, MatchRules};
use crate::types::{AnnotationRegion, PredictionSet, Task};

const PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    pub label_config: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LsAnnotation {
    #[serde(default)]
    pub result: Vec<Value>,
    #[serde(default)]
    pub was_cancelled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LsPrediction {
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub result: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LsTask {
    pub id: u64,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub annotations: Vec<LsAnnotation>,
    #[serde(default)]
    pub predictions: Vec<LsPrediction>,
}

impl LsTask {
    /// Convert to a [`Task`]. Ground truth is the first annotation, unless it
    /// was cancelled.
    pub fn into_task(self, spec: &LabelingSpec) -> Task {
        let ground_truth = self
            .annotations
            .first()
            .filter(|a| !a.was_cancelled)
            .map(|a| parse_regions(&a.result, spec));
        let predictions = self
            .predictions
            .iter()
            .map(|p| PredictionSet {
                model_version: p.model_version.clone().unwrap_or_else(|| "unknown".to_string()),
                result: parse_regions(&p.result, spec),
            })
            .collect();
        Task { id: Some(self.id), data: self.data, ground_truth, predictions }
    }
}

/// Regions this engine understands, re-kinded from the labeling config. Others (boxes,
/// relations, ...) are dropped.
pub fn parse_regions(values: &[Value], spec: &LabelingSpec) -> Vec<AnnotationRegion> {
    values
        .iter()
        .filter_map(|v| match serde_json::from_value::<AnnotationRegion>(v.clone()) {
            Ok(r) => Some(spec.resolve_region(r)),
            Err(e) => {
                debug!("skipping region {v}: {e}");
                None
            }
        })
        .collect()
}

#[async_trait::async_trait]
pub trait TaskSource: Send + Sync {
    async fn project(&self, id: u64) -> Result<Project>;
    async fn tasks(&self, project_id: u64) -> Result<Vec<LsTask>>;
}

pub struct LabelStudio {
    http: Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TaskPage {
    Wrapped {
        tasks: Vec<LsTask>,
        #[serde(default)]
        total: Option<usize>,
    },
    Bare(Vec<LsTask>),
}

/// Accumulates task pages and decides when the listing is exhausted.
#[derive(Default)]
struct Pages {
    tasks: Vec<LsTask>,
    seen: HashSet<u64>,
}

impl Pages {
    /// Add one page; `false` once no further page should be requested.
    fn absorb(&mut self, page: TaskPage) -> bool {
        let (tasks, total) = match page {
            TaskPage::Wrapped { tasks, total } => (tasks, total),
            TaskPage::Bare(tasks) => (tasks, None),
        };
        let full = tasks.len() >= PAGE_SIZE;
        let before = self.tasks.len();
        for task in tasks {
            if self.seen.insert(task.id) {
                self.tasks.push(task);
            }
        }
        // a server ignoring `page` repeats itself
        let progressed = self.tasks.len() > before;
        let below_total = total.map_or(true, |t| self.tasks.len() < t);
        full && progressed && below_total
    }
}

impl LabelStudio {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn from_settings(settings: &LabelStudioSettings) -> Result<Self> {
        let base_url = settings
            .base_url
            .as_deref()
            .ok_or_else(|| anyhow!("LABEL_STUDIO_BASE_URL is not set"))?;
        let api_key = settings
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("LABEL_STUDIO_API_KEY is not set"))?;
        Self::new(base_url, api_key)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Token {}", self.api_key))
    }
}

#[async_trait::async_trait]
impl TaskSource for LabelStudio {
    async fn project(&self, id: u64) -> Result<Project> {
        Ok(self
            .get(&format!("/api/projects/{id}"))
            .send()
            .await?
            .error_for_status()?
            .json::<Project>()
            .await
            .with_context(|| format!("decoding project {id}"))?)
    }

    async fn tasks(&self, project_id: u64) -> Result<Vec<LsTask>> {
        let mut pages = Pages::default();
        for page in 1.. {
            let resp = self
                .get("/api/tasks")
                .query(&[
                    ("project", project_id.to_string()),
                    ("fields", "all".to_string()),
                    ("page", page.to_string()),
                    ("page_size", PAGE_SIZE.to_string()),
                ])
                .send()
                .await?;
            // past the last page
            if resp.status() == StatusCode::NOT_FOUND {
                break;
            }
            let page = resp.error_for_status()?.json::<TaskPage>().await?;
            if !pages.absorb(page) {
                break;
            }
        }
        debug!(project = project_id, tasks = pages.tasks.len(), "fetched tasks");
        Ok(pages.tasks)
    }
}

/// A project's freshly computed accuracy.
#[derive(Debug, Clone)]
pub struct ProjectStats {
    pub project: Project,
    pub table: AccuracyTable,
}

impl ProjectStats {
    /// Key the stats are stored under: the title, or the id when untitled.
    pub fn key(&self) -> String {
        if self.project.title.is_empty() {
            self.project.id.to_string()
        } else {
            self.project.title.clone()
        }
    }
}

/// Recompute a project's accuracy table from all of its tasks.
pub async fn project_accuracy(
    source: &dyn TaskSource,
    project_id: u64,
    rules: &MatchRules,
) -> Result<ProjectStats> {
    let project = source.project(project_id).await?;
    let spec = LabelingSpec::parse(&project.label_config)
        .with_context(|| format!("label config of project {project_id}"))?;
    let tasks: Vec<Task> = source
        .tasks(project_id)
        .await?
        .into_iter()
        .map(|t| t.into_task(&spec))
        .collect();
    let table = score_tasks(rules, &tasks)?;
    info!(project = project_id, title = %project.title, tasks = tasks.len(), "recomputed accuracy");
    Ok(ProjectStats { project, table })
}
