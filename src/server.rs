// src/server.rs
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::config::GenerationSettings;
use crate::label_config::LabelingSpec;
use crate::labelstudio::{project_accuracy, TaskSource};
use crate::llm::Llm;
use crate::scoring::MatchRules;
use crate::session::{Session, TaskPredictions};
use crate::stats::{StatsReport, StatsStore};
use crate::types::Task;

pub const ANNOTATION_CREATED: &str = "ANNOTATION_CREATED";

type ApiError = (StatusCode, String);

#[derive(Clone)]
pub struct Engine {
    backends: Vec<Arc<dyn Llm>>,
    generation: GenerationSettings,
    rules: MatchRules,
    default_session: Option<Arc<Session>>,
    source: Option<Arc<dyn TaskSource>>,
    store: StatsStore,
    concurrency: usize,
    // serializes read-modify-write of the stats file
    stats_lock: Arc<Mutex<()>>,
}

impl Engine {
    pub fn new(backends: Vec<Arc<dyn Llm>>, generation: GenerationSettings, store: StatsStore) -> Self {
        Self {
            backends,
            generation,
            rules: MatchRules::default(),
            default_session: None,
            source: None,
            store,
            concurrency: 8,
            stats_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_rules(mut self, rules: MatchRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_source(mut self, source: Arc<dyn TaskSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Labeling spec used by `/predict` requests that don't send one.
    pub fn with_default_spec(mut self, spec: LabelingSpec) -> anyhow::Result<Self> {
        let session = Session::new(spec, self.backends.clone(), self.generation.clone())?;
        self.default_session = Some(Arc::new(session));
        Ok(self)
    }

    fn session_for(&self, label_config: Option<&str>) -> Result<Arc<Session>, ApiError> {
        match label_config {
            Some(xml) => {
                let spec = LabelingSpec::parse(xml).map_err(bad_request)?;
                let session = Session::new(spec, self.backends.clone(), self.generation.clone())
                    .map_err(bad_request)?;
                Ok(Arc::new(session))
            }
            None => self.default_session.clone().ok_or_else(|| {
                bad_request("no label_config in request and no default configured")
            }),
        }
    }
}

fn bad_request(e: impl std::fmt::Display) -> ApiError {
    (StatusCode::BAD_REQUEST, e.to_string())
}

fn internal(e: anyhow::Error) -> ApiError {
    error!("{e:#}");
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
}

#[derive(Deserialize)]
pub struct PredictReq {
    #[serde(default)]
    label_config: Option<String>,
    tasks: Vec<Task>,
}

#[derive(Serialize)]
pub struct PredictResp {
    results: Vec<TaskPredictions>,
}

pub async fn predict(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<PredictReq>,
) -> Result<Json<PredictResp>, ApiError> {
    let session = engine.session_for(req.label_config.as_deref())?;
    let results = session.predict_batch(&req.tasks, engine.concurrency, None).await;
    Ok(Json(PredictResp { results }))
}

#[derive(Debug, Deserialize)]
pub struct WebhookProject {
    id: u64,
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    action: String,
    project: WebhookProject,
}

/// Recompute a project's stats when a new annotation lands.
pub async fn webhook(
    State(engine): State<Arc<Engine>>,
    Json(payload): Json<WebhookPayload>,
) -> Result<Json<Value>, ApiError> {
    info!(action = %payload.action, project = payload.project.id, "received webhook");
    if payload.action != ANNOTATION_CREATED {
        return Ok(Json(json!({ "status": "ignored" })));
    }
    let source = engine.source.as_ref().ok_or_else(|| {
        (StatusCode::SERVICE_UNAVAILABLE, "no Label Studio connection configured".to_string())
    })?;

    let stats = project_accuracy(source.as_ref(), payload.project.id, &engine.rules)
        .await
        .map_err(internal)?;
    let key = stats.key();
    {
        let _guard = engine.stats_lock.lock().await;
        engine.store.save(&key, &stats.table).await.map_err(internal)?;
    }
    Ok(Json(json!({ "status": "updated", "project": key })))
}

pub async fn all_stats(State(engine): State<Arc<Engine>>) -> Result<Json<StatsReport>, ApiError> {
    let _guard = engine.stats_lock.lock().await;
    Ok(Json(engine.store.report().await.map_err(internal)?))
}

pub async fn project_stats(
    State(engine): State<Arc<Engine>>,
    Path(project): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let _guard = engine.stats_lock.lock().await;
    let mut report = engine.store.report().await.map_err(internal)?;
    let fields = report
        .remove(&project)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("no stats for `{project}`")))?;
    Ok(Json(json!(fields)))
}

async fn health() -> &'static str {
    "ok"
}

pub fn router(engine: Engine) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/webhook", post(webhook))
        .route("/stats", get(all_stats))
        .route("/stats/:project", get(project_stats))
        .route("/health", get(health))
        .with_state(Arc::new(engine))
}

pub async fn run_server(engine: Engine, addr: &str) -> anyhow::Result<()> {
    let app = router(engine);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
