mod support;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use labelscore_rs::config::GenerationSettings;
use labelscore_rs::labelstudio::{LsTask, Project};
use labelscore_rs::server::{self, Engine};
use labelscore_rs::stats::StatsStore;
use labelscore_rs::LabelingSpec;
use serde_json::{json, Value};
use support::{FakeLlm, FakeSource, SENTIMENT_CONFIG};
use tower::ServiceExt; // for `oneshot`

fn engine(store: StatsStore) -> Engine {
    Engine::new(
        vec![
            FakeLlm::fixed("m1", r#"{"sentiment": {"output": "positive"}, "score": {"output": 3}}"#).shared(),
            FakeLlm::fixed("m2", "not json").shared(),
        ],
        GenerationSettings::default(),
        store,
    )
}

fn source() -> FakeSource {
    let project = Project { id: 42, title: "Reviews".into(), label_config: SENTIMENT_CONFIG.into() };
    let tasks: Vec<LsTask> = serde_json::from_value(json!([
        {
            "id": 1,
            "data": {"text": "great"},
            "annotations": [{"result": [
                {"from_name": "sentiment", "to_name": "text", "type": "choices", "value": {"choices": ["positive"]}}
            ]}],
            "predictions": [
                {"model_version": "m1", "result": [
                    {"from_name": "sentiment", "to_name": "text", "type": "choices", "value": {"choices": ["positive"]}}
                ]},
                {"model_version": "m2", "result": [
                    {"from_name": "sentiment", "to_name": "text", "type": "choices", "value": {"choices": ["negative"]}}
                ]}
            ]
        },
        {
            "id": 2,
            "data": {"text": "meh"},
            "annotations": [{"result": [
                {"from_name": "sentiment", "to_name": "text", "type": "choices", "value": {"choices": ["neutral"]}}
            ]}],
            "predictions": [
                {"model_version": "m1", "result": [
                    {"from_name": "sentiment", "to_name": "text", "type": "choices", "value": {"choices": ["positive"]}}
                ]}
            ]
        }
    ]))
    .unwrap();
    FakeSource::default().with_project(project, tasks)
}

async fn call(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let v = serde_json::from_slice(&body).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into()));
    (status, v)
}

fn post(uri: &str, payload: &Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(payload).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn predict_returns_regions_and_failures() {
    let dir = tempfile::tempdir().unwrap();
    let app = server::router(engine(StatsStore::new(dir.path().join("stats.json"))));

    let payload = json!({
        "label_config": SENTIMENT_CONFIG,
        "tasks": [{"id": 5, "data": {"text": "great"}}]
    });
    let (status, v) = call(app, post("/predict", &payload)).await;

    assert_eq!(status, StatusCode::OK);
    let result = &v["results"][0];
    assert_eq!(result["task"], 5);
    assert_eq!(result["predictions"][0]["model_version"], "m1");
    assert_eq!(result["predictions"][0]["result"][0]["value"]["choices"][0], "positive");
    assert!(result["failures"]["m2"].as_str().unwrap().contains("m2"));
}

#[tokio::test]
async fn predict_uses_default_spec_or_rejects() {
    let dir = tempfile::tempdir().unwrap();
    let store = StatsStore::new(dir.path().join("stats.json"));
    let payload = json!({"tasks": [{"data": {"text": "great"}}]});

    let (status, _) = call(server::router(engine(store.clone())), post("/predict", &payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let with_default = engine(store)
        .with_default_spec(LabelingSpec::parse(SENTIMENT_CONFIG).unwrap())
        .unwrap();
    let (status, v) = call(server::router(with_default), post("/predict", &payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["results"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn bad_label_config_is_a_client_error() {
    let dir = tempfile::tempdir().unwrap();
    let app = server::router(engine(StatsStore::new(dir.path().join("stats.json"))));
    let payload = json!({"label_config": "<View><Text name=\"t\" value=\"$t\"/></View>", "tasks": []});
    let (status, _) = call(app, post("/predict", &payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_recomputes_and_persists_project_stats() {
    let dir = tempfile::tempdir().unwrap();
    let store = StatsStore::new(dir.path().join("stats.json"));
    let engine = engine(store.clone()).with_source(Arc::new(source()));
    let app = server::router(engine);

    let (status, v) = call(
        app.clone(),
        post("/webhook", &json!({"action": "ANNOTATION_CREATED", "project": {"id": 42}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["project"], "Reviews");

    let (status, v) = call(app.clone(), get("/stats/Reviews")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["sentiment"]["m1"], 0.5);
    assert_eq!(v["sentiment"]["m2"], 0.0);

    // a second event recomputes rather than accumulates
    call(app.clone(), post("/webhook", &json!({"action": "ANNOTATION_CREATED", "project": {"id": 42}}))).await;
    let stored = store.load().await.unwrap();
    assert_eq!(stored["Reviews"].tally("sentiment", "m1").total, 2);

    let (status, v) = call(app, get("/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["Reviews"]["sentiment"]["m1"], 0.5);
}

#[tokio::test]
async fn webhook_ignores_other_actions_and_needs_a_source() {
    let dir = tempfile::tempdir().unwrap();
    let app = server::router(engine(StatsStore::new(dir.path().join("stats.json"))));

    let (status, v) = call(
        app.clone(),
        post("/webhook", &json!({"action": "ANNOTATION_UPDATED", "project": {"id": 42}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "ignored");

    let (status, _) = call(
        app,
        post("/webhook", &json!({"action": "ANNOTATION_CREATED", "project": {"id": 42}})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn unknown_project_stats_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = server::router(engine(StatsStore::new(dir.path().join("stats.json"))));

    let (status, _) = call(app.clone(), get("/stats/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, v) = call(app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v, "ok");
}
