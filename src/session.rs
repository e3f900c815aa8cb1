use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use uuid::Uuid;

use crate::assemble;
use crate::db::Report;
use crate::engine::{self, IndexPicker};
use crate::section::{SectionConfig, Template, TemplateSection};
use crate::state::SectionStateStore;

#[derive(Debug, Clone, Serialize)]
pub struct SessionError {
    pub code: String,
    pub message: String,
}

impl SessionError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// The student a session is currently writing for.
#[derive(Debug, Clone)]
pub struct StudentRef {
    pub id: String,
    pub first_name: String,
}

/// A section the writer added ad hoc. It follows the template section at
/// `insert_after` (by index); it only becomes part of a persisted template
/// through "save as new template".
#[derive(Debug, Clone)]
pub struct DynamicSection {
    pub insert_after: i64,
    pub section: TemplateSection,
}

/// Outcome of a state patch request. Destructive trigger changes (ones that
/// would discard a custom edit) are not applied until confirmed; declining
/// leaves state untouched.
pub enum PatchOutcome {
    Applied(Map<String, Value>),
    NeedsConfirmation,
}

/// One report-writing session: one template, one active student at a time.
///
/// Owns the section state store, the writer's ad-hoc sections, and the
/// whole-report preview edit buffer. All mutation happens synchronously
/// through these methods.
pub struct WritingSession {
    pub class_id: String,
    pub template: Template,
    dynamic: Vec<DynamicSection>,
    store: SectionStateStore,
    student: StudentRef,
    picker: Box<dyn IndexPicker + Send>,
    /// Whole-report edit buffer ("preview edit" mode). `None` until the
    /// writer edits or a manually edited report is loaded.
    preview: Option<String>,
    /// Persisted row identity for the (student, template) pair, if any.
    loaded_report: Option<(String, String)>, // (report id, created_at)
}

impl WritingSession {
    pub fn open(
        class_id: String,
        template: Template,
        student: StudentRef,
        saved: Option<&Report>,
        picker: Box<dyn IndexPicker + Send>,
    ) -> Result<Self, SessionError> {
        let mut seen = HashSet::new();
        for section in &template.sections {
            if !seen.insert(section.id.as_str()) {
                return Err(SessionError::new(
                    "duplicate_section_id",
                    format!("section id {} appears twice in template", section.id),
                ));
            }
        }

        let mut session = Self {
            class_id,
            template,
            dynamic: Vec::new(),
            store: SectionStateStore::new(),
            student,
            picker,
            preview: None,
            loaded_report: None,
        };
        session.reset_for_student(saved);
        Ok(session)
    }

    pub fn student(&self) -> &StudentRef {
        &self.student
    }

    /// Switches the active student. A no-op when the id is unchanged, so
    /// redundant calls from re-renders cannot wipe in-progress state.
    pub fn set_student(&mut self, student: StudentRef, saved: Option<&Report>) {
        if student.id == self.student.id {
            return;
        }
        self.student = student;
        self.reset_for_student(saved);
    }

    fn reset_for_student(&mut self, saved: Option<&Report>) {
        self.dynamic.clear();
        self.preview = None;
        self.loaded_report = None;
        match saved {
            Some(report) => {
                self.store.seed_from_snapshot(&report.section_data);
                self.loaded_report = Some((report.id.clone(), report.created_at.clone()));
                // A manually edited report re-populates the edit buffer with
                // its saved text, not a fresh assembler pass.
                if report.is_manually_edited {
                    if let Some(text) = &report.manually_edited_content {
                        self.preview = Some(text.clone());
                    }
                }
            }
            None => self.store.seed_from_template(&self.template.sections),
        }
    }

    /// Template sections with dynamic sections spliced in reading order.
    pub fn ordered_sections(&self) -> Vec<TemplateSection> {
        let len = self.template.sections.len() as i64;
        let mut out: Vec<TemplateSection> = Vec::new();

        for d in self.dynamic.iter().filter(|d| d.insert_after < 0) {
            out.push(d.section.clone());
        }
        for (idx, section) in self.template.sections.iter().enumerate() {
            out.push(section.clone());
            for d in self
                .dynamic
                .iter()
                .filter(|d| d.insert_after == idx as i64)
            {
                out.push(d.section.clone());
            }
        }
        for d in self.dynamic.iter().filter(|d| d.insert_after >= len) {
            out.push(d.section.clone());
        }
        out
    }

    fn find_section(&self, section_id: &str) -> Option<&TemplateSection> {
        self.template
            .sections
            .iter()
            .find(|s| s.id == section_id)
            .or_else(|| {
                self.dynamic
                    .iter()
                    .map(|d| &d.section)
                    .find(|s| s.id == section_id)
            })
    }

    /// Adds an ad-hoc section for this session. Only the free-text kinds and
    /// paragraph breaks may be inserted mid-writing.
    pub fn add_section(
        &mut self,
        name: String,
        config: SectionConfig,
        insert_after: i64,
    ) -> Result<TemplateSection, SessionError> {
        if !config.allowed_dynamic() {
            return Err(SessionError::new(
                "unsupported_section_type",
                format!("{} sections cannot be added during writing", config.kind_str()),
            ));
        }
        let section = TemplateSection {
            id: Uuid::new_v4().to_string(),
            name,
            config,
        };
        self.dynamic.push(DynamicSection {
            insert_after,
            section: section.clone(),
        });
        Ok(section)
    }

    /// Applies a state patch to one section, with auto-selection enrichment.
    ///
    /// Two-phase: when the patch changes a trigger field while a custom edit
    /// exists, nothing is applied and `NeedsConfirmation` is returned; the
    /// caller asks the user and retries with `confirmed = true`.
    pub fn request_patch(
        &mut self,
        section_id: &str,
        patch: &Map<String, Value>,
        confirmed: bool,
    ) -> Result<PatchOutcome, SessionError> {
        let Some(section) = self.find_section(section_id).cloned() else {
            return Err(SessionError::new(
                "not_found",
                format!("no section with id {}", section_id),
            ));
        };

        let current = self.store.get(section_id);
        if engine::discards_custom_edit(&section, &current, patch) && !confirmed {
            return Ok(PatchOutcome::NeedsConfirmation);
        }

        let mut enriched = patch.clone();
        engine::enrich_patch(&section, &mut enriched, self.picker.as_mut());
        self.store.patch(section_id, &enriched);
        Ok(PatchOutcome::Applied(self.store.get(section_id)))
    }

    pub fn section_state(&self, section_id: &str) -> Map<String, Value> {
        self.store.get(section_id)
    }

    /// A fresh Content Assembler pass over the current state.
    pub fn generate_content(&self) -> String {
        assemble::generate(
            &self.ordered_sections(),
            &self.store,
            &self.student.first_name,
        )
    }

    /// The text the editable preview shows, and whether it currently
    /// diverges from what the assembler would produce.
    pub fn preview(&self) -> (String, bool) {
        let generated = self.generate_content();
        match &self.preview {
            Some(buffer) => {
                let edited = buffer.trim() != generated.trim();
                (buffer.clone(), edited)
            }
            None => (generated, false),
        }
    }

    /// Replaces the whole-report edit buffer.
    pub fn edit_preview(&mut self, content: String) {
        self.preview = Some(content);
    }

    /// Overwrites the edit buffer with a fresh assembler pass, discarding
    /// any manual text in the buffer. The persisted row is only overwritten
    /// on the next save.
    pub fn regenerate_preview(&mut self) -> String {
        let generated = self.generate_content();
        self.preview = Some(generated.clone());
        generated
    }

    /// Builds the report row to persist. The (trimmed) preview text is
    /// compared against the assembler's current output: equal means a clean,
    /// regenerable report; different means the literal edited text is kept
    /// and flagged.
    pub fn build_report(&self, template_id: &str, now: &str) -> Report {
        let generated = self.generate_content();
        let edited = self
            .preview
            .clone()
            .unwrap_or_else(|| generated.clone());
        let manually_edited = edited.trim() != generated.trim();

        let (id, created_at) = match &self.loaded_report {
            Some((id, created_at)) => (id.clone(), created_at.clone()),
            None => (Uuid::new_v4().to_string(), now.to_string()),
        };

        Report {
            id,
            student_id: self.student.id.clone(),
            template_id: template_id.to_string(),
            class_id: self.class_id.clone(),
            content: if manually_edited {
                edited.clone()
            } else {
                generated
            },
            section_data: self.store.snapshot(),
            is_manually_edited: manually_edited,
            manually_edited_content: if manually_edited { Some(edited) } else { None },
            created_at,
            updated_at: now.to_string(),
        }
    }

    /// Remembers the persisted row identity after a successful save, so the
    /// next save updates the same record.
    pub fn note_saved(&mut self, report: &Report) {
        self.loaded_report = Some((report.id.clone(), report.created_at.clone()));
    }

    /// Flattens template sections plus dynamic sections into a new template.
    pub fn save_as_template(&self, name: String, now: &str) -> Template {
        Template {
            id: Uuid::new_v4().to_string(),
            name,
            sections: self.ordered_sections(),
            created_at: now.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FixedPicker;
    use crate::section::{RatedCommentData, StandardCommentData};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn template_with_rated() -> Template {
        let mut comments = BTreeMap::new();
        comments.insert("excellent".to_string(), vec!["Great work, [Name]!".to_string()]);
        Template {
            id: "t1".to_string(),
            name: "Term 1".to_string(),
            sections: vec![TemplateSection {
                id: "s1".to_string(),
                name: "Maths".to_string(),
                config: SectionConfig::RatedComment(RatedCommentData {
                    comments,
                    show_header: Some(true),
                }),
            }],
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn open_session() -> WritingSession {
        WritingSession::open(
            "c1".to_string(),
            template_with_rated(),
            StudentRef {
                id: "stu1".to_string(),
                first_name: "Sam".to_string(),
            },
            None,
            Box::new(FixedPicker(0)),
        )
        .expect("open session")
    }

    fn obj(v: serde_json::Value) -> Map<String, Value> {
        v.as_object().cloned().expect("object")
    }

    #[test]
    fn rating_selection_flows_into_generated_content() {
        let mut session = open_session();
        let outcome = session
            .request_patch("s1", &obj(json!({ "rating": "excellent" })), false)
            .expect("patch");
        assert!(matches!(outcome, PatchOutcome::Applied(_)));
        assert_eq!(session.generate_content(), "Maths: Great work, Sam!");
    }

    #[test]
    fn destructive_trigger_change_requires_confirmation() {
        let mut session = open_session();
        session
            .request_patch("s1", &obj(json!({ "rating": "excellent" })), false)
            .expect("patch");
        session
            .request_patch(
                "s1",
                &obj(json!({ "customEditedComment": "My own words." })),
                false,
            )
            .expect("patch");

        let outcome = session
            .request_patch("s1", &obj(json!({ "rating": "good" })), false)
            .expect("patch");
        assert!(matches!(outcome, PatchOutcome::NeedsConfirmation));
        // Declined: state untouched.
        assert_eq!(
            session.section_state("s1").get("rating"),
            Some(&json!("excellent"))
        );

        let outcome = session
            .request_patch("s1", &obj(json!({ "rating": "good" })), true)
            .expect("patch");
        let PatchOutcome::Applied(state) = outcome else {
            panic!("expected applied");
        };
        assert!(state.get("customEditedComment").unwrap().is_null());
    }

    #[test]
    fn set_student_is_idempotent_per_id() {
        let mut session = open_session();
        session
            .request_patch("s1", &obj(json!({ "rating": "excellent" })), false)
            .expect("patch");

        session.set_student(
            StudentRef {
                id: "stu1".to_string(),
                first_name: "Sam".to_string(),
            },
            None,
        );
        assert_eq!(
            session.section_state("s1").get("rating"),
            Some(&json!("excellent"))
        );

        session.set_student(
            StudentRef {
                id: "stu2".to_string(),
                first_name: "Alex".to_string(),
            },
            None,
        );
        assert!(session.section_state("s1").get("rating").is_none());
    }

    #[test]
    fn dynamic_sections_splice_into_reading_order() {
        let mut session = open_session();
        session
            .add_section(
                String::new(),
                SectionConfig::StandardComment(StandardCommentData {
                    content: "Keeps a tidy desk.".to_string(),
                    show_header: None,
                }),
                0,
            )
            .expect("add");

        let ordered = session.ordered_sections();
        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].id, "s1");
        assert!(matches!(ordered[1].config, SectionConfig::StandardComment(_)));

        let err = session
            .add_section(
                "Spelling".to_string(),
                SectionConfig::RatedComment(RatedCommentData::default()),
                0,
            )
            .expect_err("rated sections are template-only");
        assert_eq!(err.code, "unsupported_section_type");
    }

    #[test]
    fn build_report_flags_manual_edits_by_trimmed_comparison() {
        let mut session = open_session();
        session
            .request_patch("s1", &obj(json!({ "rating": "excellent" })), false)
            .expect("patch");

        // Whitespace-only divergence is not a manual edit.
        let generated = session.generate_content();
        session.edit_preview(format!("  {}  ", generated));
        let report = session.build_report("t1", "2026-02-01T00:00:00Z");
        assert!(!report.is_manually_edited);
        assert!(report.manually_edited_content.is_none());
        assert_eq!(report.content, generated);

        session.edit_preview("Entirely rewritten.".to_string());
        let report = session.build_report("t1", "2026-02-01T00:00:00Z");
        assert!(report.is_manually_edited);
        assert_eq!(
            report.manually_edited_content.as_deref(),
            Some("Entirely rewritten.")
        );
        assert_eq!(report.content, "Entirely rewritten.");
    }

    #[test]
    fn loading_manual_report_repopulates_buffer_until_regenerated() {
        let mut session = open_session();
        session
            .request_patch("s1", &obj(json!({ "rating": "excellent" })), false)
            .expect("patch");
        session.edit_preview("Hand-written report.".to_string());
        let saved = session.build_report("t1", "2026-02-01T00:00:00Z");

        let mut reopened = WritingSession::open(
            "c1".to_string(),
            template_with_rated(),
            StudentRef {
                id: "stu1".to_string(),
                first_name: "Sam".to_string(),
            },
            Some(&saved),
            Box::new(FixedPicker(0)),
        )
        .expect("open");

        let (content, edited) = reopened.preview();
        assert_eq!(content, "Hand-written report.");
        assert!(edited);

        let regenerated = reopened.regenerate_preview();
        assert_eq!(regenerated, "Maths: Great work, Sam!");
        let (content, edited) = reopened.preview();
        assert_eq!(content, regenerated);
        assert!(!edited);
    }

    #[test]
    fn save_as_template_flattens_dynamic_sections() {
        let mut session = open_session();
        session
            .add_section(String::new(), SectionConfig::NewLine, 0)
            .expect("add");
        let template = session.save_as_template("Term 2".to_string(), "2026-02-01T00:00:00Z");
        assert_eq!(template.sections.len(), 2);
        assert_eq!(template.name, "Term 2");
        assert_ne!(template.id, "t1");
    }

    #[test]
    fn duplicate_template_section_ids_are_rejected() {
        let mut template = template_with_rated();
        template.sections.push(template.sections[0].clone());
        let err = WritingSession::open(
            "c1".to_string(),
            template,
            StudentRef {
                id: "stu1".to_string(),
                first_name: "Sam".to_string(),
            },
            None,
            Box::new(FixedPicker(0)),
        )
        .err()
        .expect("duplicate ids");
        assert_eq!(err.code, "duplicate_section_id");
    }
}
