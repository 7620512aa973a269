use std::collections::BTreeMap;

use crate::label_config::LabelingSpec;
use crate::schema::{OutputSchema, JSON_DIRECTIVE};

/// Per-field instruction text used when a control has no `prompt` of its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldHints(BTreeMap<String, String>);

impl FieldHints {
    pub fn from_schema(schema: &OutputSchema) -> Self {
        Self(
            schema
                .fields()
                .iter()
                .map(|f| (f.name.clone(), task_line(&f.field_type.instruction())))
                .collect(),
        )
    }

    pub fn with(mut self, field: impl Into<String>, hint: impl Into<String>) -> Self {
        self.0.insert(field.into(), hint.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }
}

fn task_line(instruction: &str) -> String {
    instruction.trim_end_matches(JSON_DIRECTIVE).trim_end().to_string()
}

/// User prompt: one instruction bullet per control, then the task content.
///
/// A control's own `prompt` attribute takes precedence over `hints`; `hints`
/// only fill in controls that declare none.
pub fn assemble(spec: &LabelingSpec, hints: &FieldHints, content: &str) -> String {
    let mut prompt = String::from("Instructions:\n");
    for control in spec.controls() {
        let hint = control.prompt_hint.as_deref().or_else(|| hints.get(&control.name));
        if let Some(hint) = hint {
            prompt.push_str(&format!("- {}: {}\n", control.name, hint));
        }
    }
    format!("{prompt}\n\nInput:\n{content}")
}

/// System message describing every field of the schema.
pub fn system_prompt(schema: &OutputSchema) -> String {
    let fields = schema
        .fields()
        .iter()
        .map(|f| format!("- {}: {}", f.name, task_line(&f.field_type.instruction())))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Annotate the input for each of the following fields:\n{fields}\n\n{JSON_DIRECTIVE}")
}
