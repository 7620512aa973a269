//! Map a backend's decoded JSON onto canonical annotation regions.
//!
//! Normalization is lenient per field: a missing or malformed field is logged,
//! recorded in [`Normalized::skipped`], and the remaining fields still count.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::NormalizationError;
use crate::schema::{FieldType, OutputSchema, SchemaField};
use crate::types::{AnnotationRegion, PredictionSet, RegionValue};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub regions: Vec<AnnotationRegion>,
    pub skipped: Vec<NormalizationError>,
}

impl Normalized {
    pub fn into_prediction(self, backend_id: impl Into<String>) -> PredictionSet {
        PredictionSet { model_version: backend_id.into(), result: self.regions }
    }
}

pub fn normalize(
    schema: &OutputSchema,
    backend_id: &str,
    raw: &Value,
) -> Result<Normalized, NormalizationError> {
    let obj = raw.as_object().ok_or(NormalizationError::NotAnObject)?;
    for key in obj.keys().filter(|k| schema.field(k).is_none()) {
        debug!(backend = backend_id, field = %key, "ignoring field not in schema");
    }

    let mut out = Normalized::default();
    for field in schema.fields() {
        let result = match obj.get(&field.name).filter(|v| !v.is_null()) {
            Some(v) => to_region(field, v),
            None => Err(NormalizationError::MissingField(field.name.clone())),
        };
        match result {
            Ok(region) => out.regions.push(region),
            Err(e) => {
                warn!(backend = backend_id, "skipping field: {e}");
                out.skipped.push(e);
            }
        }
    }
    Ok(out)
}

fn to_region(field: &SchemaField, raw: &Value) -> Result<AnnotationRegion, NormalizationError> {
    // constrained backends wrap each field as {"output": ...}; accept bare values too
    let payload = raw.as_object().and_then(|o| o.get("output")).unwrap_or(raw);
    let value = region_value(&field.field_type, payload, raw).map_err(|reason| {
        NormalizationError::Malformed { field: field.name.clone(), reason }
    })?;
    Ok(AnnotationRegion {
        from_name: field.name.clone(),
        to_name: field.target_name.clone(),
        kind: field.field_type.kind(),
        value,
    })
}

fn region_value(ft: &FieldType, payload: &Value, raw: &Value) -> Result<RegionValue, String> {
    let allowed = ft.allowed();
    Ok(match ft {
        FieldType::SingleChoice { .. } => RegionValue::Choices {
            choices: vec![allowed_string(payload, allowed)?],
        },
        FieldType::MultiChoice { .. } => {
            let choices = string_list(payload)?;
            if choices.is_empty() {
                return Err("expected at least one choice".into());
            }
            let mut seen = HashSet::new();
            for c in &choices {
                check_allowed(c, allowed)?;
                if !seen.insert(c) {
                    return Err(format!("duplicate choice `{c}`"));
                }
            }
            RegionValue::Choices { choices }
        }
        FieldType::Taxonomy { .. } => {
            let items = payload.as_array().ok_or("expected a list of paths")?;
            // a single flat path is accepted as one selection
            let paths = if items.iter().all(Value::is_string) && !items.is_empty() {
                vec![string_list(payload)?]
            } else {
                items.iter().map(string_list).collect::<Result<Vec<_>, _>>()?
            };
            for node in paths.iter().flatten() {
                check_allowed(node, allowed)?;
            }
            RegionValue::Taxonomy { taxonomy: paths }
        }
        FieldType::Labels { .. } => {
            let label = allowed_string(payload, allowed)?;
            let offset = |key: &str| {
                raw.get(key)
                    .and_then(Value::as_i64)
                    .ok_or_else(|| format!("missing integer `{key}`"))
            };
            let (start, end) = (offset("start")?, offset("end")?);
            if start < 0 || start > end {
                return Err(format!("invalid span {start}..{end}"));
            }
            RegionValue::Labels { labels: vec![label], start, end }
        }
        FieldType::TextArea => RegionValue::Text {
            text: vec![payload.as_str().ok_or("expected a string")?.to_string()],
        },
        FieldType::TextAreaMultiple => {
            let text = string_list(payload)?;
            if text.is_empty() {
                return Err("expected at least one text".into());
            }
            RegionValue::Text { text }
        }
        FieldType::Date => {
            let s = payload.as_str().ok_or("expected a date string")?;
            let date = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map_err(|e| format!("bad date `{s}`: {e}"))?;
            RegionValue::DateTime { datetime: date.format("%Y-%m-%d").to_string() }
        }
        FieldType::Integer => {
            let number = match payload.as_i64() {
                Some(n) => n as f64,
                None => payload
                    .as_f64()
                    .filter(|f| f.fract() == 0.0)
                    .ok_or("expected an integer")?,
            };
            RegionValue::Number { number }
        }
    })
}

fn allowed_string(v: &Value, allowed: &[String]) -> Result<String, String> {
    let s = v.as_str().ok_or("expected a string")?;
    check_allowed(s, allowed)?;
    Ok(s.to_string())
}

fn check_allowed(s: &str, allowed: &[String]) -> Result<(), String> {
    if allowed.iter().any(|a| a == s) {
        Ok(())
    } else {
        Err(format!("`{s}` is not one of {allowed:?}"))
    }
}

fn string_list(v: &Value) -> Result<Vec<String>, String> {
    v.as_array()
        .ok_or("expected a list")?
        .iter()
        .map(|item| item.as_str().map(str::to_string).ok_or_else(|| "expected strings".to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label_config::LabelingSpec;
    use crate::schema::compile;
    use crate::types::ControlKind;
    use serde_json::json;

    const CONFIG: &str = r#"
    <View>
      <Text name="text" value="$text"/>
      <Choices name="sentiment" toName="text">
        <Choice value="positive"/><Choice value="negative"/>
      </Choices>
      <Choices name="topics" toName="text" choice="multiple">
        <Choice value="price"/><Choice value="quality"/>
      </Choices>
      <Taxonomy name="category" toName="text">
        <Choice value="Electronics"><Choice value="Phones"/></Choice>
      </Taxonomy>
      <Labels name="ner" toName="text"><Label value="PER"/></Labels>
      <TextArea name="summary" toName="text"/>
      <TextArea name="keywords" toName="text" maxSubmissions="3"/>
      <DateTime name="date" toName="text"/>
      <Number name="score" toName="text"/>
    </View>"#;

    fn schema() -> OutputSchema {
        compile(&LabelingSpec::parse(CONFIG).unwrap()).unwrap()
    }

    #[test]
    fn wraps_each_kind_into_region_shape() {
        let raw = json!({
            "sentiment": {"output": "positive"},
            "topics": {"output": ["price", "quality"]},
            "category": {"output": [["Electronics", "Phones"]]},
            "ner": {"output": "PER", "start": 0, "end": 6},
            "summary": {"output": "Good phone."},
            "keywords": {"output": ["phone", "battery"]},
            "date": {"output": "2024-03-01"},
            "score": {"output": 87},
        });
        let n = normalize(&schema(), "m1", &raw).unwrap();
        assert!(n.skipped.is_empty(), "{:?}", n.skipped);
        let values: Vec<_> = n.regions.iter().map(|r| serde_json::to_value(&r.value).unwrap()).collect();
        assert_eq!(
            values,
            vec![
                json!({"choices": ["positive"]}),
                json!({"choices": ["price", "quality"]}),
                json!({"taxonomy": [["Electronics", "Phones"]]}),
                json!({"labels": ["PER"], "start": 0, "end": 6}),
                json!({"text": ["Good phone."]}),
                json!({"text": ["phone", "battery"]}),
                json!({"datetime": "2024-03-01"}),
                json!({"number": 87.0}),
            ]
        );
        assert_eq!(n.regions[1].kind, ControlKind::MultiChoice);
        assert!(n.regions.iter().all(|r| r.to_name == "text"));

        let pred = n.into_prediction("m1");
        let wire = serde_json::to_value(&pred).unwrap();
        assert_eq!(wire["model_version"], "m1");
        assert_eq!(wire["result"][0]["type"], "choices");
        assert_eq!(wire["result"][0]["from_name"], "sentiment");
    }

    #[test]
    fn missing_field_is_skipped_not_fatal() {
        let raw = json!({"sentiment": {"output": "negative"}, "score": null});
        let n = normalize(&schema(), "m1", &raw).unwrap();
        assert_eq!(n.regions.len(), 1);
        assert_eq!(n.regions[0].from_name, "sentiment");
        assert!(n.skipped.contains(&NormalizationError::MissingField("score".into())));
        assert!(n.skipped.contains(&NormalizationError::MissingField("date".into())));
    }

    #[test]
    fn malformed_values_are_skipped() {
        let raw = json!({
            "sentiment": {"output": "neutral"},
            "topics": {"output": ["price", "price"]},
            "ner": {"output": "PER", "start": 9, "end": 2},
            "date": {"output": "March 1st"},
            "score": {"output": 3.5},
            "summary": "bare value is fine",
        });
        let n = normalize(&schema(), "m1", &raw).unwrap();
        assert_eq!(n.regions.len(), 1);
        assert_eq!(n.regions[0].from_name, "summary");
        let malformed: Vec<_> = n
            .skipped
            .iter()
            .filter_map(|e| match e {
                NormalizationError::Malformed { field, .. } => Some(field.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(malformed, vec!["sentiment", "topics", "ner", "date", "score"]);
    }

    #[test]
    fn non_object_output_is_fatal() {
        assert_eq!(
            normalize(&schema(), "m1", &json!(["x"])).unwrap_err(),
            NormalizationError::NotAnObject
        );
    }
}
