use crate::db;
use crate::engine::RandomPicker;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::section::SectionConfig;
use crate::session::{PatchOutcome, SessionError, StudentRef, WritingSession};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn session_err(req: &Request, e: SessionError) -> serde_json::Value {
    err(&req.id, &e.code, e.message, None)
}

fn load_student(
    conn: &Connection,
    req: &Request,
    student_id: &str,
) -> Result<StudentRef, serde_json::Value> {
    let row: Option<String> = conn
        .query_row(
            "SELECT first_name FROM students WHERE id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    match row {
        Some(first_name) => Ok(StudentRef {
            id: student_id.to_string(),
            first_name,
        }),
        None => Err(err(&req.id, "not_found", "student not found", None)),
    }
}

fn handle_session_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let template_id = match required_str(req, "templateId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let template = match db::get_template(conn, &template_id) {
        Ok(Some(t)) => t,
        Ok(None) => return err(&req.id, "not_found", "template not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let student = match load_student(conn, req, &student_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let saved = match db::get_report(conn, &student_id, &template_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let session = match WritingSession::open(
        class_id,
        template,
        student,
        saved.as_ref(),
        Box::new(RandomPicker),
    ) {
        Ok(s) => s,
        Err(e) => return session_err(req, e),
    };

    let (content, is_edited) = session.preview();
    state.session = Some(session);
    ok(
        &req.id,
        json!({
            "templateId": template_id,
            "studentId": student_id,
            "hasSavedReport": saved.is_some(),
            "content": content,
            "isEdited": is_edited
        }),
    )
}

fn handle_session_set_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let AppState { db, session, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = session.as_mut() else {
        return err(&req.id, "no_session", "open a session first", None);
    };

    let student = match load_student(conn, req, &student_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let saved = match db::get_report(conn, &student_id, &session.template.id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    session.set_student(student, saved.as_ref());
    let (content, is_edited) = session.preview();
    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "content": content,
            "isEdited": is_edited
        }),
    )
}

fn handle_session_patch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a session first", None);
    };
    let section_id = match required_str(req, "sectionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };
    let confirmed = req
        .params
        .get("confirm")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    match session.request_patch(&section_id, patch, confirmed) {
        Ok(PatchOutcome::Applied(section_state)) => ok(
            &req.id,
            json!({ "applied": true, "state": section_state }),
        ),
        Ok(PatchOutcome::NeedsConfirmation) => ok(
            &req.id,
            json!({
                "applied": false,
                "requiresConfirmation": true,
                "reason": "this change would discard the custom edit for this section"
            }),
        ),
        Err(e) => session_err(req, e),
    }
}

fn handle_session_add_section(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a session first", None);
    };
    let section_type = match required_str(req, "type") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(insert_after) = req.params.get("insertAfter").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing insertAfter", None);
    };
    let name = req
        .params
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let mut raw = json!({ "type": section_type });
    if let Some(data) = req.params.get("data") {
        raw["data"] = data.clone();
    }
    let config: SectionConfig = match serde_json::from_value(raw) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("section did not parse: {}", e),
                None,
            )
        }
    };

    match session.add_section(name, config, insert_after) {
        Ok(section) => ok(&req.id, json!({ "section": section })),
        Err(e) => session_err(req, e),
    }
}

fn handle_session_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "no_session", "open a session first", None);
    };
    let (content, is_edited) = session.preview();
    ok(&req.id, json!({ "content": content, "isEdited": is_edited }))
}

fn handle_session_edit_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a session first", None);
    };
    let Some(content) = req.params.get("content").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing content", None);
    };
    session.edit_preview(content.to_string());
    let (content, is_edited) = session.preview();
    ok(&req.id, json!({ "content": content, "isEdited": is_edited }))
}

fn handle_session_regenerate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a session first", None);
    };
    let content = session.regenerate_preview();
    ok(&req.id, json!({ "content": content, "isEdited": false }))
}

fn handle_session_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, session, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = session.as_mut() else {
        return err(&req.id, "no_session", "open a session first", None);
    };

    let now = Utc::now().to_rfc3339();
    let report = session.build_report(&session.template.id.clone(), &now);

    let existing = match db::get_report(conn, &report.student_id, &report.template_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let result = if existing.is_some() {
        db::update_report(conn, &report)
    } else {
        db::add_report(conn, &report)
    };
    if let Err(e) = result {
        // The in-memory session is untouched; only the persisted row failed.
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }

    session.note_saved(&report);
    ok(&req.id, json!({ "report": report }))
}

fn handle_session_save_as_template(state: &mut AppState, req: &Request) -> serde_json::Value {
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let AppState { db, session, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = session.as_ref() else {
        return err(&req.id, "no_session", "open a session first", None);
    };

    let template = session.save_as_template(name, &Utc::now().to_rfc3339());
    if let Err(e) = db::add_template(conn, &template) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "templateId": template.id, "sectionCount": template.sections.len() }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.open" => Some(handle_session_open(state, req)),
        "session.setStudent" => Some(handle_session_set_student(state, req)),
        "session.patch" => Some(handle_session_patch(state, req)),
        "session.addSection" => Some(handle_session_add_section(state, req)),
        "session.preview" => Some(handle_session_preview(state, req)),
        "session.editPreview" => Some(handle_session_edit_preview(state, req)),
        "session.regenerate" => Some(handle_session_regenerate(state, req)),
        "session.save" => Some(handle_session_save(state, req)),
        "session.saveAsTemplate" => Some(handle_session_save_as_template(state, req)),
        _ => None,
    }
}
