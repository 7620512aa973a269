//! Labeling configuration: the controls a project annotates and the task
//! fields they point at.
//!
//! Only the attribute subset needed for schema compilation is read from the
//! XML config: control tag, `name`, `toName`, `prompt`, the `Choice`/`Label`
//! values and the `$key` of object tags.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use crate::error::ConfigurationError;
use crate::types::{AnnotationRegion, Control, ControlKind};

#[derive(Debug, Clone, PartialEq)]
pub struct LabelingSpec {
    controls: Vec<Control>,
    /// object tag name -> task data key
    objects: BTreeMap<String, String>,
}

impl LabelingSpec {
    pub fn new(controls: Vec<Control>) -> Result<Self, ConfigurationError> {
        if controls.is_empty() {
            return Err(ConfigurationError::NoControls);
        }
        let mut seen = HashSet::new();
        for c in &controls {
            if !seen.insert(c.name.as_str()) {
                return Err(ConfigurationError::DuplicateControl(c.name.clone()));
            }
        }
        Ok(Self { controls, objects: BTreeMap::new() })
    }

    /// Register the task data key an object tag reads from.
    pub fn with_object(mut self, name: impl Into<String>, data_key: impl Into<String>) -> Self {
        self.objects.insert(name.into(), data_key.into());
        self
    }

    pub fn parse(xml: &str) -> Result<Self, ConfigurationError> {
        let doc = roxmltree::Document::parse(xml)
            .map_err(|e| ConfigurationError::Xml(e.to_string()))?;

        let mut controls = Vec::new();
        let mut objects = BTreeMap::new();
        for node in doc.descendants().filter(|n| n.is_element()) {
            let Some(name) = node.attribute("name") else { continue };
            match node.attribute("toName") {
                Some(to_name) => controls.push(parse_control(&node, name, to_name)?),
                None => {
                    if let Some(key) = node.attribute("value").and_then(|v| v.strip_prefix('$')) {
                        objects.insert(name.to_string(), key.to_string());
                    }
                }
            }
        }

        let mut spec = Self::new(controls)?;
        spec.objects = objects;
        Ok(spec)
    }

    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    pub fn control(&self, name: &str) -> Option<&Control> {
        self.controls.iter().find(|c| c.name == name)
    }

    /// Text content of a task for the objects this spec annotates. Falls back
    /// to `data.text`.
    pub fn task_content(&self, data: &Value) -> Option<String> {
        self.controls
            .iter()
            .filter_map(|c| self.objects.get(&c.target_name).map(String::as_str))
            .chain(std::iter::once("text"))
            .find_map(|key| data.get(key).and_then(Value::as_str))
            .map(str::to_string)
    }

    /// Re-kind a region loaded from the labeling tool using the declared
    /// control, since the wire `type` can't tell single from multi-valued.
    pub fn resolve_region(&self, mut region: AnnotationRegion) -> AnnotationRegion {
        if let Some(control) = self.control(&region.from_name) {
            if control.kind.region_type() == region.kind.region_type() {
                region.kind = control.kind;
            }
        }
        region
    }
}

fn parse_control(
    node: &roxmltree::Node,
    name: &str,
    to_name: &str,
) -> Result<Control, ConfigurationError> {
    let tag = node.tag_name().name();
    let kind = kind_for_tag(node, tag).ok_or_else(|| ConfigurationError::UnsupportedKind {
        name: name.to_string(),
        tag: tag.to_string(),
    })?;

    let allowed_values = match kind {
        ControlKind::SingleChoice | ControlKind::MultiChoice => child_values(node, "Choice"),
        ControlKind::Labels => child_values(node, "Label"),
        ControlKind::Taxonomy => {
            let mut seen = HashSet::new();
            node.descendants()
                .filter(|n| n.is_element() && n.tag_name().name() == "Choice")
                .filter_map(|n| n.attribute("value"))
                .filter(|v| seen.insert(*v))
                .map(str::to_string)
                .collect()
        }
        _ => Vec::new(),
    };

    // multi-object controls list targets comma separated; regions carry one
    let target_name = to_name.split(',').next().unwrap_or(to_name).trim().to_string();

    Ok(Control {
        name: name.to_string(),
        kind,
        allowed_values,
        target_name,
        prompt_hint: node.attribute("prompt").map(str::to_string),
    })
}

fn kind_for_tag(node: &roxmltree::Node, tag: &str) -> Option<ControlKind> {
    match tag {
        "Choices" => match node.attribute("choice") {
            Some("multiple") => Some(ControlKind::MultiChoice),
            _ => Some(ControlKind::SingleChoice),
        },
        "ChoicesMultiple" => Some(ControlKind::MultiChoice),
        "Taxonomy" => Some(ControlKind::Taxonomy),
        "Labels" => Some(ControlKind::Labels),
        "TextArea" => match node.attribute("maxSubmissions").and_then(|v| v.parse::<u32>().ok()) {
            Some(n) if n > 1 => Some(ControlKind::TextAreaMultiple),
            _ => Some(ControlKind::TextArea),
        },
        "TextAreaMultiple" => Some(ControlKind::TextAreaMultiple),
        "DateTime" => Some(ControlKind::DateTime),
        "Number" => Some(ControlKind::Number),
        _ => None,
    }
}

fn child_values(node: &roxmltree::Node, child_tag: &str) -> Vec<String> {
    node.children()
        .filter(|n| n.is_element() && n.tag_name().name() == child_tag)
        .filter_map(|n| n.attribute("value"))
        .map(str::to_string)
        .collect()
}
