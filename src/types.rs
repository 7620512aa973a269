use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The closed set of annotation control kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ControlKind {
    SingleChoice,
    MultiChoice,
    Taxonomy,
    Labels,
    TextArea,
    TextAreaMultiple,
    DateTime,
    Number,
}

impl ControlKind {
    pub const ALL: [ControlKind; 8] = [
        ControlKind::SingleChoice,
        ControlKind::MultiChoice,
        ControlKind::Taxonomy,
        ControlKind::Labels,
        ControlKind::TextArea,
        ControlKind::TextAreaMultiple,
        ControlKind::DateTime,
        ControlKind::Number,
    ];

    /// Region `type` string used by the labeling tool.
    pub fn region_type(self) -> &'static str {
        match self {
            Self::SingleChoice | Self::MultiChoice => "choices",
            Self::Taxonomy => "taxonomy",
            Self::Labels => "labels",
            Self::TextArea | Self::TextAreaMultiple => "textarea",
            Self::DateTime => "datetime",
            Self::Number => "number",
        }
    }

    /// Inverse of [`region_type`](Self::region_type). `choices` and `textarea`
    /// come back as their single-valued kinds; the labeling spec is the
    /// authority on which one a field really is.
    pub fn from_region_type(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "choices" => Some(Self::SingleChoice),
            "taxonomy" => Some(Self::Taxonomy),
            "labels" => Some(Self::Labels),
            "textarea" => Some(Self::TextArea),
            "datetime" => Some(Self::DateTime),
            "number" => Some(Self::Number),
            _ => None,
        }
    }

    /// Kinds whose value domain is a closed set of allowed values.
    pub fn requires_values(self) -> bool {
        matches!(
            self,
            Self::SingleChoice | Self::MultiChoice | Self::Taxonomy | Self::Labels
        )
    }
}

impl Serialize for ControlKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.region_type())
    }
}

impl<'de> Deserialize<'de> for ControlKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ControlKind::from_region_type(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown region type `{s}`")))
    }
}

/// One named, typed annotation field of a labeling config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub name: String,
    pub kind: ControlKind,
    pub allowed_values: Vec<String>,
    pub target_name: String,
    pub prompt_hint: Option<String>,
}

/// Kind-specific region payload, in the labeling tool's shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegionValue {
    Labels {
        labels: Vec<String>,
        start: i64,
        end: i64,
    },
    Choices {
        choices: Vec<String>,
    },
    Taxonomy {
        taxonomy: Vec<Vec<String>>,
    },
    Text {
        text: Vec<String>,
    },
    DateTime {
        datetime: String,
    },
    Number {
        number: f64,
    },
}

impl RegionValue {
    pub fn number(&self) -> Option<f64> {
        match self {
            Self::Number { number } => Some(*number),
            _ => None,
        }
    }

    pub fn texts(&self) -> Option<&[String]> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// One field's value, either human ground truth or a backend prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRegion {
    pub from_name: String,
    pub to_name: String,
    #[serde(rename = "type")]
    pub kind: ControlKind,
    pub value: RegionValue,
}

/// All regions one backend produced for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSet {
    pub model_version: String,
    pub result: Vec<AnnotationRegion>,
}

impl PredictionSet {
    pub fn backend_id(&self) -> &str {
        &self.model_version
    }

    pub fn region(&self, field: &str) -> Option<&AnnotationRegion> {
        self.result.iter().find(|r| r.from_name == field)
    }
}

/// Opaque task content plus whatever labels exist for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub id: Option<u64>,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<Vec<AnnotationRegion>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predictions: Vec<PredictionSet>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn region_values_use_labeling_tool_shape() {
        let r = AnnotationRegion {
            from_name: "sentiment".into(),
            to_name: "text".into(),
            kind: ControlKind::SingleChoice,
            value: RegionValue::Choices { choices: vec!["positive".into()] },
        };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(
            v,
            json!({"from_name":"sentiment","to_name":"text","type":"choices","value":{"choices":["positive"]}})
        );
    }

    #[test]
    fn labels_region_keeps_offsets() {
        let v = json!({"from_name":"ner","to_name":"text","type":"labels",
                       "value":{"labels":["PER"],"start":0,"end":6,"text":"Barack"}});
        let r: AnnotationRegion = serde_json::from_value(v).unwrap();
        assert_eq!(r.kind, ControlKind::Labels);
        assert_eq!(
            r.value,
            RegionValue::Labels { labels: vec!["PER".into()], start: 0, end: 6 }
        );
    }

    #[test]
    fn unknown_region_type_is_rejected() {
        let v = json!({"from_name":"box","to_name":"img","type":"rectanglelabels",
                       "value":{"x":1.0}});
        assert!(serde_json::from_value::<AnnotationRegion>(v).is_err());
    }
}
