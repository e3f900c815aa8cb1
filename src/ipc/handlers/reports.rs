use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_reports_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let template_id = match req.params.get("templateId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing templateId", None),
    };

    match db::get_report(conn, student_id, template_id) {
        Ok(Some(report)) => ok(&req.id, json!({ "report": report })),
        Ok(None) => ok(&req.id, json!({ "report": null })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_reports_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };

    let mut stmt = match conn.prepare(
        "SELECT id, student_id, template_id, is_manually_edited, updated_at
         FROM reports
         WHERE class_id = ?
         ORDER BY updated_at DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let reports = match stmt
        .query_map([&class_id], |r| {
            let id: String = r.get(0)?;
            let student_id: String = r.get(1)?;
            let template_id: String = r.get(2)?;
            let is_manually_edited: i64 = r.get(3)?;
            let updated_at: String = r.get(4)?;
            Ok(json!({
                "id": id,
                "studentId": student_id,
                "templateId": template_id,
                "isManuallyEdited": is_manually_edited != 0,
                "updatedAt": updated_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "reports": reports }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.get" => Some(handle_reports_get(state, req)),
        "reports.list" => Some(handle_reports_list(state, req)),
        _ => None,
    }
}
