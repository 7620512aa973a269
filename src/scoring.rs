//! Per-backend, per-field accuracy against human ground truth.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::UnsupportedKindError;
use crate::similarity;
use crate::types::{AnnotationRegion, ControlKind, PredictionSet, RegionValue, Task};

pub const DEFAULT_NUMBER_TOLERANCE: f64 = 5.0;
pub const DEFAULT_TEXT_SIMILARITY: f64 = 0.8;

/// Matching thresholds and which kinds have a rule at all.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchRules {
    /// Numbers match when `|predicted - truth|` is strictly below this.
    pub number_tolerance: f64,
    /// Texts match when their similarity ratio is strictly above this.
    pub text_similarity_threshold: f64,
    /// Enable set-equality rules for multi-choice, taxonomy and labels.
    pub extended: bool,
}

impl Default for MatchRules {
    fn default() -> Self {
        Self {
            number_tolerance: DEFAULT_NUMBER_TOLERANCE,
            text_similarity_threshold: DEFAULT_TEXT_SIMILARITY,
            extended: false,
        }
    }
}

impl MatchRules {
    pub fn extended() -> Self {
        Self { extended: true, ..Self::default() }
    }

    pub fn supports(&self, kind: ControlKind) -> bool {
        match kind {
            ControlKind::MultiChoice | ControlKind::Taxonomy | ControlKind::Labels => self.extended,
            _ => true,
        }
    }

    /// Whether `predicted` counts as correct for a `kind` field. Payloads of
    /// different shapes never match.
    pub fn is_match(
        &self,
        kind: ControlKind,
        predicted: &RegionValue,
        truth: &RegionValue,
    ) -> Result<bool, UnsupportedKindError> {
        if !self.supports(kind) {
            return Err(UnsupportedKindError(kind));
        }
        Ok(match kind {
            ControlKind::SingleChoice | ControlKind::DateTime => predicted == truth,
            ControlKind::Number => match (predicted.number(), truth.number()) {
                (Some(p), Some(t)) => (p - t).abs() < self.number_tolerance,
                _ => false,
            },
            ControlKind::TextArea | ControlKind::TextAreaMultiple => {
                match (predicted.texts(), truth.texts()) {
                    (Some(p), Some(t)) => {
                        similarity::ratio(&p.join("\n"), &t.join("\n")) > self.text_similarity_threshold
                    }
                    _ => false,
                }
            }
            ControlKind::MultiChoice => match (predicted, truth) {
                (RegionValue::Choices { choices: p }, RegionValue::Choices { choices: t }) => {
                    as_set(p) == as_set(t)
                }
                _ => false,
            },
            ControlKind::Taxonomy => match (predicted, truth) {
                (RegionValue::Taxonomy { taxonomy: p }, RegionValue::Taxonomy { taxonomy: t }) => {
                    as_set(p) == as_set(t)
                }
                _ => false,
            },
            ControlKind::Labels => match (predicted, truth) {
                (
                    RegionValue::Labels { labels: pl, start: ps, end: pe },
                    RegionValue::Labels { labels: tl, start: ts, end: te },
                ) => as_set(pl) == as_set(tl) && ps == ts && pe == te,
                _ => false,
            },
        })
    }
}

fn as_set<T: Ord>(items: &[T]) -> BTreeSet<&T> {
    items.iter().collect()
}

/// Correct and total counts for one field and backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub correct: u64,
    pub total: u64,
}

impl Tally {
    pub fn accuracy(&self) -> Option<f64> {
        (self.total > 0).then(|| self.correct as f64 / self.total as f64)
    }
}

/// field -> backend -> tally. Counts only ever grow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccuracyTable {
    fields: BTreeMap<String, BTreeMap<String, Tally>>,
}

impl AccuracyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn tally(&self, field: &str, backend: &str) -> Tally {
        self.fields
            .get(field)
            .and_then(|b| b.get(backend))
            .copied()
            .unwrap_or_default()
    }

    pub fn accuracy(&self, field: &str, backend: &str) -> Option<f64> {
        self.tally(field, backend).accuracy()
    }

    pub fn record(&mut self, field: &str, backend: &str, matched: bool) {
        let tally = self
            .fields
            .entry(field.to_string())
            .or_default()
            .entry(backend.to_string())
            .or_default();
        tally.total += 1;
        if matched {
            tally.correct += 1;
        }
    }

    /// Score every prediction set against the ground truth of one task.
    ///
    /// Every ground-truth field counts once per backend whether or not the
    /// backend predicted it. When several regions share a field, the last one
    /// is the truth. Kinds without a rule fail the whole call before anything
    /// is recorded. The table does not deduplicate: evaluating the same task
    /// twice counts it twice.
    pub fn evaluate(
        &mut self,
        rules: &MatchRules,
        ground_truth: &[AnnotationRegion],
        predictions: &[PredictionSet],
    ) -> Result<(), UnsupportedKindError> {
        if let Some(region) = ground_truth.iter().find(|r| !rules.supports(r.kind)) {
            return Err(UnsupportedKindError(region.kind));
        }
        let by_field: BTreeMap<&str, &AnnotationRegion> =
            ground_truth.iter().map(|r| (r.from_name.as_str(), r)).collect();
        for truth in by_field.into_values() {
            for set in predictions {
                let matched = match set.region(&truth.from_name) {
                    Some(pred) => rules.is_match(truth.kind, &pred.value, &truth.value)?,
                    None => false,
                };
                self.record(&truth.from_name, set.backend_id(), matched);
            }
        }
        Ok(())
    }

    pub fn merge(&mut self, other: &AccuracyTable) {
        for (field, backends) in &other.fields {
            let mine = self.fields.entry(field.clone()).or_default();
            for (backend, t) in backends {
                let tally = mine.entry(backend.clone()).or_default();
                tally.correct += t.correct;
                tally.total += t.total;
            }
        }
    }

    /// field -> backend -> ratio, computed now from the counts.
    pub fn report(&self) -> BTreeMap<String, BTreeMap<String, f64>> {
        self.fields
            .iter()
            .map(|(field, backends)| {
                let ratios = backends
                    .iter()
                    .filter_map(|(b, t)| t.accuracy().map(|a| (b.clone(), a)))
                    .collect();
                (field.clone(), ratios)
            })
            .collect()
    }
}

/// Score every task that has both ground truth and predictions.
pub fn score_tasks(rules: &MatchRules, tasks: &[Task]) -> Result<AccuracyTable, UnsupportedKindError> {
    let mut table = AccuracyTable::new();
    for task in tasks.iter().filter(|t| !t.predictions.is_empty()) {
        if let Some(truth) = &task.ground_truth {
            table.evaluate(rules, truth, &task.predictions)?;
        }
    }
    Ok(table)
}

/// An accuracy table shared by concurrently processed tasks.
#[derive(Debug, Default)]
pub struct SharedAccuracy {
    rules: MatchRules,
    table: Mutex<AccuracyTable>,
}

impl SharedAccuracy {
    pub fn new(rules: MatchRules) -> Self {
        Self { rules, table: Mutex::new(AccuracyTable::new()) }
    }

    pub fn evaluate(
        &self,
        ground_truth: &[AnnotationRegion],
        predictions: &[PredictionSet],
    ) -> Result<(), UnsupportedKindError> {
        self.lock().evaluate(&self.rules, ground_truth, predictions)
    }

    pub fn snapshot(&self) -> AccuracyTable {
        self.lock().clone()
    }

    pub fn into_inner(self) -> AccuracyTable {
        self.table.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock(&self) -> MutexGuard<'_, AccuracyTable> {
        // record() has no panicking step between its two increments
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
