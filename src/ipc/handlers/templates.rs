use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::section::{Template, TemplateSection};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

fn parse_sections(req: &Request) -> Result<Vec<TemplateSection>, serde_json::Value> {
    let raw = req
        .params
        .get("sections")
        .cloned()
        .ok_or_else(|| err(&req.id, "bad_params", "missing sections", None))?;
    serde_json::from_value(raw).map_err(|e| {
        err(
            &req.id,
            "bad_params",
            format!("sections did not parse: {}", e),
            None,
        )
    })
}

fn handle_templates_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, sections_json, created_at FROM templates ORDER BY created_at",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let templates = match stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let sections_json: String = r.get(2)?;
            let created_at: String = r.get(3)?;
            let section_count = serde_json::from_str::<Vec<TemplateSection>>(&sections_json)
                .map(|s| s.len())
                .unwrap_or(0);
            Ok(json!({
                "id": id,
                "name": name,
                "sectionCount": section_count,
                "createdAt": created_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "templates": templates }))
}

fn handle_templates_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing name", None),
    };
    let sections = match parse_sections(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let template = Template {
        id: Uuid::new_v4().to_string(),
        name,
        sections,
        created_at: Utc::now().to_rfc3339(),
    };
    if let Err(e) = db::add_template(conn, &template) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "templateId": template.id }))
}

fn handle_templates_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let template_id = match req.params.get("templateId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing templateId", None),
    };

    match db::get_template(conn, template_id) {
        Ok(Some(template)) => ok(&req.id, json!({ "template": template })),
        Ok(None) => err(&req.id, "not_found", "template not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_templates_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let template_id = match req.params.get("templateId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing templateId", None),
    };

    let mut template = match db::get_template(conn, &template_id) {
        Ok(Some(t)) => t,
        Ok(None) => return err(&req.id, "not_found", "template not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if let Some(name) = req.params.get("name").and_then(|v| v.as_str()) {
        if name.trim().is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        template.name = name.trim().to_string();
    }
    if req.params.get("sections").is_some() {
        template.sections = match parse_sections(req) {
            Ok(v) => v,
            Err(e) => return e,
        };
    }

    if let Err(e) = db::update_template(conn, &template) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "templateId": template.id }))
}

fn handle_templates_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let template_id = match req.params.get("templateId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing templateId", None),
    };

    // Reports written against the template go with it.
    if let Err(e) = conn.execute("DELETE FROM reports WHERE template_id = ?", [&template_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "reports" })),
        );
    }
    match conn.execute("DELETE FROM templates WHERE id = ?", [&template_id]) {
        Ok(0) => err(&req.id, "not_found", "template not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "templates" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "templates.list" => Some(handle_templates_list(state, req)),
        "templates.create" => Some(handle_templates_create(state, req)),
        "templates.get" => Some(handle_templates_get(state, req)),
        "templates.update" => Some(handle_templates_update(state, req)),
        "templates.delete" => Some(handle_templates_delete(state, req)),
        _ => None,
    }
}
