//! Report content assembly: renders the ordered section list against the
//! current section state into the final report string.
//!
//! This is a pure function of its inputs. Calling it twice without an
//! intervening state change yields identical output.

use serde_json::{Map, Value};
use tracing::warn;

use crate::placeholder;
use crate::section::{SectionConfig, TemplateSection, NO_COMMENT};
use crate::state::{bool_value, non_empty_str, num_value, str_value, SectionStateStore};

/// Assembles the report text for `sections` in order.
///
/// Per section: decide inclusion, resolve the text fragment (custom edit
/// first, then auto-selection, then a bracketed fallback), substitute
/// placeholders, optionally prefix the section name as a header, and append
/// with a single trailing space. `new-line` contributes a paragraph break
/// only. The final result is trimmed.
pub fn generate(
    sections: &[TemplateSection],
    state: &SectionStateStore,
    first_name: &str,
) -> String {
    let mut out = String::new();

    for section in sections {
        let section_state = state.get(&section.id);
        match &section.config {
            SectionConfig::NewLine => {
                out.push_str("\n\n");
                continue;
            }
            SectionConfig::Unknown => {
                warn!(section_id = %section.id, "skipping section with unrecognized type");
                continue;
            }
            _ => {}
        }

        let Some(body) = section_text(section, &section_state) else {
            continue;
        };
        let body = placeholder::substitute_name(&body, first_name);

        if effective_show_header(section, &section_state) && !section.name.trim().is_empty() {
            out.push_str(&format!("{}: ", section.name));
        }
        out.push_str(&body);
        out.push(' ');
    }

    out.trim().to_string()
}

/// The section's rendered text, or `None` when it is excluded from the
/// report.
fn section_text(section: &TemplateSection, state: &Map<String, Value>) -> Option<String> {
    match &section.config {
        SectionConfig::RatedComment(_) => {
            let rating = str_value(state, "rating")?;
            if rating == NO_COMMENT {
                return None;
            }
            Some(fragment_or_fallback(section, state))
        }
        SectionConfig::AssessmentComment(data) => {
            let performance = str_value(state, "performance")?;
            if performance == NO_COMMENT {
                return None;
            }
            let text = fragment_or_fallback(section, state);
            let score_type = str_value(state, "scoreType")
                .or(data.score_type.as_deref())
                .unwrap_or("outOf");
            let max_score = num_value(state, "maxScore").or(data.max_score);
            Some(placeholder::substitute_score(
                &text,
                num_value(state, "score"),
                score_type,
                max_score,
            ))
        }
        SectionConfig::PersonalisedComment(_) => {
            // `category: null` is the exclusion sentinel.
            if state.get("category").map(|v| v.is_null()).unwrap_or(true) {
                return None;
            }
            let text = fragment_or_fallback(section, state);
            let info = str_value(state, "personalisedInfo").unwrap_or("");
            Some(placeholder::substitute_personal_info(&text, info))
        }
        SectionConfig::NextSteps(_) | SectionConfig::Qualities(_) => {
            let trigger_key = section.config.trigger_key().unwrap_or_default();
            if state.get(trigger_key).map(|v| v.is_null()).unwrap_or(true) {
                return None;
            }
            Some(fragment_or_fallback(section, state))
        }
        SectionConfig::OptionalAdditionalComment => {
            non_empty_str(state, "comment").map(|s| s.to_string())
        }
        SectionConfig::StandardComment(data) => non_empty_str(state, "comment")
            .map(|s| s.to_string())
            .or_else(|| {
                let content = data.content.trim();
                if content.is_empty() {
                    None
                } else {
                    Some(data.content.clone())
                }
            }),
        SectionConfig::NewLine | SectionConfig::Unknown => None,
    }
}

/// Custom edit takes priority over the auto-selected fragment; when neither
/// is present a bracketed placeholder stands in rather than an error.
fn fragment_or_fallback(section: &TemplateSection, state: &Map<String, Value>) -> String {
    let custom = section
        .config
        .custom_edit_key()
        .and_then(|key| non_empty_str(state, key));
    let selected = section
        .config
        .selected_key()
        .and_then(|key| non_empty_str(state, key));
    custom
        .or(selected)
        .unwrap_or(section.config.no_selection_fallback())
        .to_string()
}

/// Header visibility: section state wins, then the template's own default,
/// then off.
fn effective_show_header(section: &TemplateSection, state: &Map<String, Value>) -> bool {
    bool_value(state, "showHeader")
        .or_else(|| section.config.show_header_default())
        .unwrap_or(false)
}
