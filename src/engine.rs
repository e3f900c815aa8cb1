use rand::Rng;
use serde_json::{Map, Value};

use crate::section::TemplateSection;
use crate::state::non_empty_str;

/// Index source for candidate auto-selection. Production draws uniformly at
/// random; tests inject a fixed sequence so selections are assertable.
pub trait IndexPicker {
    /// Picks an index in `0..len`. `len` is always >= 1.
    fn pick(&mut self, len: usize) -> usize;
}

pub struct RandomPicker;

impl IndexPicker for RandomPicker {
    fn pick(&mut self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}

/// Always picks the same index (clamped to the candidate list).
pub struct FixedPicker(pub usize);

impl IndexPicker for FixedPicker {
    fn pick(&mut self, len: usize) -> usize {
        self.0.min(len - 1)
    }
}

/// True when `patch` sets the section's trigger field.
pub fn is_trigger_change(section: &TemplateSection, patch: &Map<String, Value>) -> bool {
    section
        .config
        .trigger_key()
        .map(|key| patch.contains_key(key))
        .unwrap_or(false)
}

/// True when applying `patch` would clear a custom edit the writer has made:
/// the patch changes the trigger field while a non-empty `customEdited*`
/// value exists. Callers surface this as a confirmation prompt; the patch is
/// only applied once confirmed.
pub fn discards_custom_edit(
    section: &TemplateSection,
    current: &Map<String, Value>,
    patch: &Map<String, Value>,
) -> bool {
    if !is_trigger_change(section, patch) {
        return false;
    }
    section
        .config
        .custom_edit_key()
        .map(|key| non_empty_str(current, key).is_some())
        .unwrap_or(false)
}

/// Enriches a state patch with the engine's auto-selection.
///
/// Only a trigger-field change does anything here; edits to `score`,
/// `personalisedInfo` and the like pass through untouched so they never
/// re-roll the chosen fragment. On a trigger change:
///
/// - the `customEdited*` field is cleared unconditionally;
/// - an excluded sentinel value clears the selection;
/// - otherwise one candidate for the new value is drawn through `picker`
///   (re-triggering the same value may draw a different one - selection is
///   not memoized by value);
/// - an empty or absent candidate list leaves no selection.
pub fn enrich_patch(
    section: &TemplateSection,
    patch: &mut Map<String, Value>,
    picker: &mut dyn IndexPicker,
) {
    let Some(trigger_key) = section.config.trigger_key() else {
        return;
    };
    let Some(trigger_value) = patch.get(trigger_key).cloned() else {
        return;
    };

    let selected_key = section.config.selected_key().unwrap_or_default();
    let index_key = section.config.selected_index_key().unwrap_or_default();
    let custom_key = section.config.custom_edit_key().unwrap_or_default();

    patch.insert(custom_key.to_string(), Value::Null);

    if section.config.is_excluded_trigger(&trigger_value) {
        patch.insert(selected_key.to_string(), Value::Null);
        patch.insert(index_key.to_string(), Value::Null);
        return;
    }

    let candidates = trigger_value
        .as_str()
        .and_then(|v| section.config.candidates_for(v))
        .unwrap_or(&[]);
    if candidates.is_empty() {
        patch.insert(selected_key.to_string(), Value::Null);
        patch.insert(index_key.to_string(), Value::Null);
        return;
    }

    let idx = picker.pick(candidates.len());
    patch.insert(
        selected_key.to_string(),
        Value::String(candidates[idx].clone()),
    );
    patch.insert(index_key.to_string(), Value::from(idx as u64));
}
