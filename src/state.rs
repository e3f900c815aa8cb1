use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::section::TemplateSection;

/// Per-section runtime state for one (student, template) writing session.
///
/// All mutation funnels through [`SectionStateStore::patch`]; readers get
/// owned snapshots so nothing outside the store can observe a half-applied
/// merge.
#[derive(Debug, Default)]
pub struct SectionStateStore {
    sections: HashMap<String, Map<String, Value>>,
}

impl SectionStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one section's state. Empty map if the section has none.
    pub fn get(&self, section_id: &str) -> Map<String, Value> {
        self.sections.get(section_id).cloned().unwrap_or_default()
    }

    /// Shallow-merges `partial` into the section's state: new keys are
    /// added, existing keys overwritten, untouched keys preserved. Null
    /// values are kept, not removed - `category: null` is a meaningful
    /// exclusion sentinel.
    pub fn patch(&mut self, section_id: &str, partial: &Map<String, Value>) {
        let entry = self.sections.entry(section_id.to_string()).or_default();
        for (k, v) in partial {
            entry.insert(k.clone(), v.clone());
        }
    }

    /// Resets the store to a fresh session seeded from template defaults:
    /// `showHeader` is false unless the section's own configuration sets it,
    /// and assessment sections carry their configured score entry settings.
    pub fn seed_from_template(&mut self, sections: &[TemplateSection]) {
        self.sections.clear();
        for section in sections {
            let mut state = Map::new();
            state.insert(
                "showHeader".to_string(),
                Value::Bool(section.config.show_header_default().unwrap_or(false)),
            );
            if let crate::section::SectionConfig::AssessmentComment(data) = &section.config {
                if let Some(score_type) = &data.score_type {
                    state.insert("scoreType".to_string(), Value::String(score_type.clone()));
                }
                if let Some(max_score) = data.max_score {
                    if let Some(n) = serde_json::Number::from_f64(max_score) {
                        state.insert("maxScore".to_string(), Value::Number(n));
                    }
                }
            }
            self.sections.insert(section.id.clone(), state);
        }
    }

    /// Resets the store to a previously saved report's state snapshot,
    /// verbatim.
    pub fn seed_from_snapshot(&mut self, snapshot: &Value) {
        self.sections.clear();
        let Some(obj) = snapshot.as_object() else {
            return;
        };
        for (section_id, state) in obj {
            if let Some(map) = state.as_object() {
                self.sections.insert(section_id.clone(), map.clone());
            }
        }
    }

    /// Full per-section snapshot, as persisted in a report's `sectionData`.
    pub fn snapshot(&self) -> Value {
        let mut out = Map::new();
        for (id, state) in &self.sections {
            out.insert(id.clone(), Value::Object(state.clone()));
        }
        Value::Object(out)
    }
}

/// Convenience readers over a section-state map.
pub fn str_value<'a>(state: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    state.get(key).and_then(|v| v.as_str())
}

pub fn non_empty_str<'a>(state: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    str_value(state, key).filter(|s| !s.trim().is_empty())
}

pub fn bool_value(state: &Map<String, Value>, key: &str) -> Option<bool> {
    state.get(key).and_then(|v| v.as_bool())
}

pub fn num_value(state: &Map<String, Value>, key: &str) -> Option<f64> {
    state.get(key).and_then(|v| v.as_f64())
}
