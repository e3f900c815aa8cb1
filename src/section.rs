use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A reusable report template: an ordered list of sections plus metadata.
/// Order is significant, it is the reading order of the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    pub sections: Vec<TemplateSection>,
    pub created_at: String,
}

/// One configurable unit of a template. The `type`/`data` pair is carried as
/// a tagged enum so dispatch over section kinds is exhaustive at compile time
/// instead of relying on a default branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSection {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub config: SectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum SectionConfig {
    RatedComment(RatedCommentData),
    AssessmentComment(AssessmentCommentData),
    PersonalisedComment(PersonalisedCommentData),
    NextSteps(NextStepsData),
    Qualities(QualitiesData),
    StandardComment(StandardCommentData),
    OptionalAdditionalComment,
    NewLine,
    /// Tags we do not recognize still deserialize; the assembler skips them
    /// with a warning instead of failing the whole template.
    #[serde(other)]
    Unknown,
}

/// Candidate comments keyed by rating level
/// (`excellent|good|satisfactory|needsImprovement`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatedCommentData {
    #[serde(default)]
    pub comments: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_header: Option<bool>,
}

/// Candidate comments keyed by performance level (rating levels plus
/// `notCompleted`), with optional score entry configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentCommentData {
    #[serde(default)]
    pub comments: BTreeMap<String, Vec<String>>,
    /// `outOf` or `percentage`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_header: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalisedCommentData {
    #[serde(default)]
    pub categories: BTreeMap<String, Vec<String>>,
    /// Free-text guidance shown to the report writer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_header: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextStepsData {
    #[serde(default)]
    pub focus_areas: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_header: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualitiesData {
    #[serde(default)]
    pub quality_areas: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_header: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardCommentData {
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_header: Option<bool>,
}

/// The sentinel rating/performance value meaning "omit this section".
pub const NO_COMMENT: &str = "no-comment";

impl SectionConfig {
    pub fn kind_str(&self) -> &'static str {
        match self {
            SectionConfig::RatedComment(_) => "rated-comment",
            SectionConfig::AssessmentComment(_) => "assessment-comment",
            SectionConfig::PersonalisedComment(_) => "personalised-comment",
            SectionConfig::NextSteps(_) => "next-steps",
            SectionConfig::Qualities(_) => "qualities",
            SectionConfig::StandardComment(_) => "standard-comment",
            SectionConfig::OptionalAdditionalComment => "optional-additional-comment",
            SectionConfig::NewLine => "new-line",
            SectionConfig::Unknown => "unknown",
        }
    }

    /// The state key whose change drives candidate auto-selection, if any.
    pub fn trigger_key(&self) -> Option<&'static str> {
        match self {
            SectionConfig::RatedComment(_) => Some("rating"),
            SectionConfig::AssessmentComment(_) => Some("performance"),
            SectionConfig::PersonalisedComment(_) => Some("category"),
            SectionConfig::NextSteps(_) => Some("focusArea"),
            SectionConfig::Qualities(_) => Some("qualityArea"),
            _ => None,
        }
    }

    pub fn selected_key(&self) -> Option<&'static str> {
        match self {
            SectionConfig::RatedComment(_)
            | SectionConfig::AssessmentComment(_)
            | SectionConfig::PersonalisedComment(_) => Some("selectedComment"),
            SectionConfig::NextSteps(_) => Some("selectedSuggestion"),
            SectionConfig::Qualities(_) => Some("selectedQuality"),
            _ => None,
        }
    }

    pub fn selected_index_key(&self) -> Option<&'static str> {
        match self {
            SectionConfig::RatedComment(_)
            | SectionConfig::AssessmentComment(_)
            | SectionConfig::PersonalisedComment(_) => Some("selectedCommentIndex"),
            SectionConfig::NextSteps(_) => Some("selectedSuggestionIndex"),
            SectionConfig::Qualities(_) => Some("selectedQualityIndex"),
            _ => None,
        }
    }

    pub fn custom_edit_key(&self) -> Option<&'static str> {
        match self {
            SectionConfig::RatedComment(_)
            | SectionConfig::AssessmentComment(_)
            | SectionConfig::PersonalisedComment(_) => Some("customEditedComment"),
            SectionConfig::NextSteps(_) => Some("customEditedSuggestion"),
            SectionConfig::Qualities(_) => Some("customEditedQuality"),
            _ => None,
        }
    }

    /// Placeholder text used when a trigger value is chosen but no candidate
    /// was available for it.
    pub fn no_selection_fallback(&self) -> &'static str {
        match self {
            SectionConfig::NextSteps(_) => "[No suggestion selected]",
            SectionConfig::Qualities(_) => "[No quality selected]",
            _ => "[No comment selected]",
        }
    }

    /// Candidate fragments for a trigger value. `None` when the value has no
    /// entry in the configuration (not an error, the engine simply selects
    /// nothing).
    pub fn candidates_for(&self, value: &str) -> Option<&[String]> {
        let map = match self {
            SectionConfig::RatedComment(d) => &d.comments,
            SectionConfig::AssessmentComment(d) => &d.comments,
            SectionConfig::PersonalisedComment(d) => &d.categories,
            SectionConfig::NextSteps(d) => &d.focus_areas,
            SectionConfig::Qualities(d) => &d.quality_areas,
            _ => return None,
        };
        map.get(value).map(|v| v.as_slice())
    }

    /// Whether a trigger value is the per-kind exclusion sentinel:
    /// `"no-comment"` for rated/assessment, JSON null for the named-area
    /// kinds.
    pub fn is_excluded_trigger(&self, value: &serde_json::Value) -> bool {
        match self {
            SectionConfig::RatedComment(_) | SectionConfig::AssessmentComment(_) => {
                value.as_str() == Some(NO_COMMENT)
            }
            SectionConfig::PersonalisedComment(_)
            | SectionConfig::NextSteps(_)
            | SectionConfig::Qualities(_) => value.is_null(),
            _ => false,
        }
    }

    /// The template-level header default, when the configuration carries one.
    pub fn show_header_default(&self) -> Option<bool> {
        match self {
            SectionConfig::RatedComment(d) => d.show_header,
            SectionConfig::AssessmentComment(d) => d.show_header,
            SectionConfig::PersonalisedComment(d) => d.show_header,
            SectionConfig::NextSteps(d) => d.show_header,
            SectionConfig::Qualities(d) => d.show_header,
            SectionConfig::StandardComment(d) => d.show_header,
            _ => None,
        }
    }

    /// Kinds a report writer may insert ad hoc during a session.
    pub fn allowed_dynamic(&self) -> bool {
        matches!(
            self,
            SectionConfig::OptionalAdditionalComment
                | SectionConfig::StandardComment(_)
                | SectionConfig::NewLine
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn section_config_round_trips_tagged_form() {
        let raw = json!({
            "id": "s1",
            "name": "Maths",
            "type": "rated-comment",
            "data": {
                "comments": { "excellent": ["Great work, [Name]!"] },
                "showHeader": true
            }
        });
        let section: TemplateSection = serde_json::from_value(raw.clone()).expect("parse");
        assert_eq!(section.id, "s1");
        match &section.config {
            SectionConfig::RatedComment(d) => {
                assert_eq!(d.show_header, Some(true));
                assert_eq!(
                    d.comments.get("excellent").map(|v| v.len()),
                    Some(1)
                );
            }
            other => panic!("wrong kind: {}", other.kind_str()),
        }
        let back = serde_json::to_value(&section).expect("serialize");
        assert_eq!(back.get("type").and_then(|v| v.as_str()), Some("rated-comment"));
    }

    #[test]
    fn unit_kinds_parse_without_data() {
        let section: TemplateSection =
            serde_json::from_value(json!({ "id": "nl", "type": "new-line" })).expect("parse");
        assert!(matches!(section.config, SectionConfig::NewLine));
        assert_eq!(section.name, "");
    }

    #[test]
    fn unrecognized_type_maps_to_unknown() {
        let section: TemplateSection =
            serde_json::from_value(json!({ "id": "x", "type": "sticker-chart" })).expect("parse");
        assert!(matches!(section.config, SectionConfig::Unknown));
    }

    #[test]
    fn exclusion_sentinels_per_kind() {
        let rated = SectionConfig::RatedComment(RatedCommentData::default());
        assert!(rated.is_excluded_trigger(&json!("no-comment")));
        assert!(!rated.is_excluded_trigger(&json!("excellent")));

        let personalised = SectionConfig::PersonalisedComment(PersonalisedCommentData::default());
        assert!(personalised.is_excluded_trigger(&serde_json::Value::Null));
        assert!(!personalised.is_excluded_trigger(&json!("effort")));
    }
}
