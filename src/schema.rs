//! Compile a labeling spec into the output schema backends generate against.

use serde_json::{json, Map, Value};

use crate::error::ConfigurationError;
use crate::label_config::LabelingSpec;
use crate::types::{Control, ControlKind};

/// Appended to every field instruction.
pub const JSON_DIRECTIVE: &str = "Provide output in the JSON format.";

/// Constrained value domain of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    SingleChoice { choices: Vec<String> },
    MultiChoice { choices: Vec<String> },
    Taxonomy { nodes: Vec<String> },
    Labels { labels: Vec<String> },
    TextArea,
    TextAreaMultiple,
    Date,
    Integer,
}

impl FieldType {
    pub fn for_control(control: &Control) -> Result<Self, ConfigurationError> {
        if control.kind.requires_values() && control.allowed_values.is_empty() {
            return Err(ConfigurationError::EmptyValues {
                name: control.name.clone(),
                kind: control.kind,
            });
        }
        let values = control.allowed_values.clone();
        Ok(match control.kind {
            ControlKind::SingleChoice => Self::SingleChoice { choices: values },
            ControlKind::MultiChoice => Self::MultiChoice { choices: values },
            ControlKind::Taxonomy => Self::Taxonomy { nodes: values },
            ControlKind::Labels => Self::Labels { labels: values },
            ControlKind::TextArea => Self::TextArea,
            ControlKind::TextAreaMultiple => Self::TextAreaMultiple,
            ControlKind::DateTime => Self::Date,
            ControlKind::Number => Self::Integer,
        })
    }

    pub fn kind(&self) -> ControlKind {
        match self {
            Self::SingleChoice { .. } => ControlKind::SingleChoice,
            Self::MultiChoice { .. } => ControlKind::MultiChoice,
            Self::Taxonomy { .. } => ControlKind::Taxonomy,
            Self::Labels { .. } => ControlKind::Labels,
            Self::TextArea => ControlKind::TextArea,
            Self::TextAreaMultiple => ControlKind::TextAreaMultiple,
            Self::Date => ControlKind::DateTime,
            Self::Integer => ControlKind::Number,
        }
    }

    /// Closed value set, empty for free-form types.
    pub fn allowed(&self) -> &[String] {
        match self {
            Self::SingleChoice { choices } | Self::MultiChoice { choices } => choices,
            Self::Taxonomy { nodes } => nodes,
            Self::Labels { labels } => labels,
            _ => &[],
        }
    }

    /// Extraction instruction for this field, ending with [`JSON_DIRECTIVE`].
    pub fn instruction(&self) -> String {
        let task = match self {
            Self::SingleChoice { .. } => "Classify the text into one of the given choices.".to_string(),
            Self::MultiChoice { .. } => {
                "Classify the text into one or more of the given choices.".to_string()
            }
            Self::Taxonomy { nodes } => format!(
                "Given the taxonomy of categories: {nodes:?}, assign the text to one or more of the given categories."
            ),
            Self::Labels { .. } => "Extract the entities from the text and assign them to the given labels. \
                                    Additionally, provide the start and end character indices of the entities."
                .to_string(),
            Self::TextArea => "Generate a text based on the given input.".to_string(),
            Self::TextAreaMultiple => "Generate one or more texts based on the given input.".to_string(),
            Self::Date => "Extract the date in the format YYYY-MM-DD.".to_string(),
            Self::Integer => "Extract the number from the text.".to_string(),
        };
        format!("{task}\n\n{JSON_DIRECTIVE}")
    }

    /// JSON Schema of this field's object (`output`, plus `start`/`end` for labels).
    pub fn json_schema(&self) -> Value {
        let enum_of = |values: &[String]| json!({ "type": "string", "enum": values });
        let output = match self {
            Self::SingleChoice { choices } => enum_of(choices),
            Self::MultiChoice { choices } => json!({
                "type": "array",
                "items": enum_of(choices),
                "minItems": 1,
                "uniqueItems": true,
            }),
            Self::Taxonomy { nodes } => json!({
                "type": "array",
                "items": { "type": "array", "items": enum_of(nodes) },
            }),
            Self::Labels { labels } => enum_of(labels),
            Self::TextArea => json!({ "type": "string" }),
            Self::TextAreaMultiple => json!({
                "type": "array",
                "items": { "type": "string" },
                "minItems": 1,
            }),
            Self::Date => json!({
                "type": "string",
                "format": "date",
                "pattern": r"^\d{4}-\d{2}-\d{2}$",
            }),
            Self::Integer => json!({ "type": "integer" }),
        };

        let mut properties = Map::new();
        properties.insert("output".into(), output);
        let mut required = vec!["output"];
        if let Self::Labels { .. } = self {
            properties.insert("start".into(), json!({ "type": "integer", "minimum": 0 }));
            properties.insert("end".into(), json!({ "type": "integer", "minimum": 0 }));
            required.extend(["start", "end"]);
        }

        json!({
            "title": title(self.kind()),
            "description": self.instruction(),
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}

fn title(kind: ControlKind) -> &'static str {
    match kind {
        ControlKind::SingleChoice => "Choices",
        ControlKind::MultiChoice => "ChoicesMultiple",
        ControlKind::Taxonomy => "Taxonomy",
        ControlKind::Labels => "Labels",
        ControlKind::TextArea => "TextArea",
        ControlKind::TextAreaMultiple => "TextAreaMultiple",
        ControlKind::DateTime => "DateTime",
        ControlKind::Number => "Number",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaField {
    pub name: String,
    pub target_name: String,
    pub field_type: FieldType,
}

/// Record type of all fields, in spec order. Immutable once compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSchema {
    fields: Vec<SchemaField>,
}

impl OutputSchema {
    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Composite JSON Schema a constrained decoder produces in one shot.
    pub fn json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.field_type.json_schema()))
            .collect();
        let required: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
        json!({
            "title": "LabelingModel",
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}

pub fn compile(spec: &LabelingSpec) -> Result<OutputSchema, ConfigurationError> {
    let fields = spec
        .controls()
        .iter()
        .map(|c| {
            Ok(SchemaField {
                name: c.name.clone(),
                target_name: c.target_name.clone(),
                field_type: FieldType::for_control(c)?,
            })
        })
        .collect::<Result<Vec<_>, ConfigurationError>>()?;
    Ok(OutputSchema { fields })
}
