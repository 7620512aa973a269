mod support;

use labelscore_rs::config::GenerationSettings;
use labelscore_rs::types::{ControlKind, RegionValue, Task};
use labelscore_rs::{LabelingSpec, MatchRules, Session, SharedAccuracy};
use serde_json::json;
use support::{FakeLlm, SENTIMENT_CONFIG};

fn session() -> Session {
    let good = FakeLlm::new("good", |req| {
        // the task text reaches the prompt
        assert!(req.prompt.contains("Input:\nI loved it"));
        Ok(r#"{"sentiment": {"output": "positive"}, "score": {"output": 7}}"#.into())
    });
    let bad = FakeLlm::fixed("bad", r#"{"sentiment": {"output": "negative"}, "score": {"output": 20}}"#);
    Session::new(
        LabelingSpec::parse(SENTIMENT_CONFIG).unwrap(),
        vec![good.shared(), bad.shared()],
        GenerationSettings::default(),
    )
    .unwrap()
}

fn task(id: u64) -> Task {
    serde_json::from_value(json!({
        "id": id,
        "data": {"text": "I loved it"},
        "ground_truth": [
            {"from_name": "sentiment", "to_name": "text", "type": "choices", "value": {"choices": ["positive"]}},
            {"from_name": "score", "to_name": "text", "type": "number", "value": {"number": 5}}
        ]
    }))
    .unwrap()
}

#[tokio::test]
async fn predictions_are_normalized_per_backend() {
    let out = session().predict("I loved it").await;
    assert!(out.failures.is_empty());
    assert_eq!(out.predictions.len(), 2);

    let good = out.predictions.iter().find(|p| p.backend_id() == "good").unwrap();
    let sentiment = good.region("sentiment").unwrap();
    assert_eq!(sentiment.kind, ControlKind::SingleChoice);
    assert_eq!(sentiment.value, RegionValue::Choices { choices: vec!["positive".into()] });
    assert_eq!(good.region("score").unwrap().value.number(), Some(7.0));
}

#[tokio::test]
async fn batch_scores_ground_truth_and_keeps_input_order() {
    let session = session();
    let accuracy = SharedAccuracy::new(MatchRules::default());
    let tasks = vec![task(1), task(2), task(3)];

    let results = session.predict_batch(&tasks, 2, Some(&accuracy)).await;
    assert!(results.iter().all(|r| r.scoring_error.is_none()));
    let ids: Vec<_> = results.iter().map(|r| r.task).collect();
    assert_eq!(ids, vec![Some(1), Some(2), Some(3)]);

    let table = accuracy.into_inner();
    assert_eq!(table.accuracy("sentiment", "good"), Some(1.0));
    assert_eq!(table.accuracy("score", "good"), Some(1.0));
    assert_eq!(table.accuracy("sentiment", "bad"), Some(0.0));
    assert_eq!(table.accuracy("score", "bad"), Some(0.0));
    assert_eq!(table.tally("score", "bad").total, 3);
}

#[tokio::test]
async fn malformed_field_is_skipped_not_fatal() {
    let picky = FakeLlm::fixed("picky", r#"{"sentiment": {"output": "ecstatic"}, "score": {"output": 4}}"#);
    let session = Session::new(
        LabelingSpec::parse(SENTIMENT_CONFIG).unwrap(),
        vec![picky.shared()],
        GenerationSettings::default(),
    )
    .unwrap();
    let accuracy = SharedAccuracy::new(MatchRules::default());

    session.predict_batch(&[task(1)], 1, Some(&accuracy)).await;
    let table = accuracy.into_inner();
    // missing sentiment still counts against the backend
    assert_eq!(table.tally("sentiment", "picky").total, 1);
    assert_eq!(table.accuracy("sentiment", "picky"), Some(0.0));
    assert_eq!(table.accuracy("score", "picky"), Some(1.0));
}

#[tokio::test]
async fn task_without_text_fails_every_backend() {
    let session = session();
    let task: Task = serde_json::from_value(json!({"id": 9, "data": {"image": "x.png"}})).unwrap();
    let out = session.predict_task(&task).await;
    assert!(out.predictions.is_empty());
    assert_eq!(out.failures.keys().collect::<Vec<_>>(), vec!["bad", "good"]);
}

#[tokio::test]
async fn non_object_output_becomes_a_failure() {
    let session = Session::new(
        LabelingSpec::parse(SENTIMENT_CONFIG).unwrap(),
        vec![FakeLlm::fixed("list", "[1, 2]").shared()],
        GenerationSettings::default(),
    )
    .unwrap();
    let out = session.predict("anything").await;
    assert!(out.predictions.is_empty());
    assert!(out.failures.contains_key("list"));
}

#[tokio::test]
async fn unscorable_ground_truth_keeps_the_batch() {
    let config = r#"
    <View>
      <Text name="text" value="$text"/>
      <Choices name="topics" toName="text" choice="multiple">
        <Choice value="price"/><Choice value="quality"/>
      </Choices>
    </View>"#;
    let session = Session::new(
        LabelingSpec::parse(config).unwrap(),
        vec![FakeLlm::fixed("m", r#"{"topics": {"output": ["price"]}}"#).shared()],
        GenerationSettings::default(),
    )
    .unwrap();
    let tasks: Vec<Task> = serde_json::from_value(json!([
        {
            "id": 1,
            "data": {"text": "too expensive"},
            "ground_truth": [
                {"from_name": "topics", "to_name": "text", "type": "choices", "value": {"choices": ["price"]}}
            ]
        },
        {"id": 2, "data": {"text": "sturdy"}}
    ]))
    .unwrap();
    let accuracy = SharedAccuracy::new(MatchRules::default());

    let results = session.predict_batch(&tasks, 2, Some(&accuracy)).await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.predictions.len() == 1));
    assert!(results[0].scoring_error.as_deref().unwrap().contains("MultiChoice"));
    assert!(results[1].scoring_error.is_none());
    assert!(accuracy.into_inner().is_empty());
}
