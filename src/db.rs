use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::section::{Template, TemplateSection};

/// A persisted report: the assembled text plus the full section-state
/// snapshot it was assembled from. One row per (student, template) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub student_id: String,
    pub template_id: String,
    pub class_id: String,
    pub content: String,
    pub section_data: serde_json::Value,
    pub is_manually_edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manually_edited_content: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("reportwriter.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            active INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS templates(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            sections_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS reports(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            template_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            content TEXT NOT NULL,
            section_data_json TEXT NOT NULL,
            is_manually_edited INTEGER NOT NULL DEFAULT 0,
            manually_edited_content TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(template_id) REFERENCES templates(id),
            UNIQUE(student_id, template_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reports_student ON reports(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reports_template ON reports(template_id)",
        [],
    )?;

    Ok(conn)
}

pub fn get_template(conn: &Connection, template_id: &str) -> anyhow::Result<Option<Template>> {
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT name, sections_json, created_at FROM templates WHERE id = ?",
            [template_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((name, sections_json, created_at)) = row else {
        return Ok(None);
    };
    let sections: Vec<TemplateSection> = serde_json::from_str(&sections_json)?;
    Ok(Some(Template {
        id: template_id.to_string(),
        name,
        sections,
        created_at,
    }))
}

pub fn add_template(conn: &Connection, template: &Template) -> anyhow::Result<()> {
    let sections_json = serde_json::to_string(&template.sections)?;
    conn.execute(
        "INSERT INTO templates(id, name, sections_json, created_at) VALUES(?, ?, ?, ?)",
        (
            &template.id,
            &template.name,
            &sections_json,
            &template.created_at,
        ),
    )?;
    Ok(())
}

pub fn update_template(conn: &Connection, template: &Template) -> anyhow::Result<()> {
    let sections_json = serde_json::to_string(&template.sections)?;
    let changed = conn.execute(
        "UPDATE templates SET name = ?, sections_json = ? WHERE id = ?",
        (&template.name, &sections_json, &template.id),
    )?;
    anyhow::ensure!(changed == 1, "template {} not found", template.id);
    Ok(())
}

/// Looks a report up by its (student, template) pair - saves address the
/// pair, not a report id.
pub fn get_report(
    conn: &Connection,
    student_id: &str,
    template_id: &str,
) -> anyhow::Result<Option<Report>> {
    let row: Option<(
        String,
        String,
        String,
        String,
        i64,
        Option<String>,
        String,
        String,
    )> = conn
        .query_row(
            "SELECT id, class_id, content, section_data_json, is_manually_edited,
                    manually_edited_content, created_at, updated_at
             FROM reports
             WHERE student_id = ? AND template_id = ?",
            (student_id, template_id),
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                    r.get(7)?,
                ))
            },
        )
        .optional()?;
    let Some((
        id,
        class_id,
        content,
        section_data_json,
        is_manually_edited,
        manually_edited_content,
        created_at,
        updated_at,
    )) = row
    else {
        return Ok(None);
    };

    Ok(Some(Report {
        id,
        student_id: student_id.to_string(),
        template_id: template_id.to_string(),
        class_id,
        content,
        section_data: serde_json::from_str(&section_data_json)?,
        is_manually_edited: is_manually_edited != 0,
        manually_edited_content,
        created_at,
        updated_at,
    }))
}

pub fn add_report(conn: &Connection, report: &Report) -> anyhow::Result<()> {
    let section_data_json = serde_json::to_string(&report.section_data)?;
    conn.execute(
        "INSERT INTO reports(id, student_id, template_id, class_id, content,
                             section_data_json, is_manually_edited,
                             manually_edited_content, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &report.id,
            &report.student_id,
            &report.template_id,
            &report.class_id,
            &report.content,
            &section_data_json,
            report.is_manually_edited as i64,
            &report.manually_edited_content,
            &report.created_at,
            &report.updated_at,
        ),
    )?;
    Ok(())
}

pub fn update_report(conn: &Connection, report: &Report) -> anyhow::Result<()> {
    let section_data_json = serde_json::to_string(&report.section_data)?;
    let changed = conn.execute(
        "UPDATE reports
         SET content = ?, section_data_json = ?, is_manually_edited = ?,
             manually_edited_content = ?, updated_at = ?
         WHERE student_id = ? AND template_id = ?",
        (
            &report.content,
            &section_data_json,
            report.is_manually_edited as i64,
            &report.manually_edited_content,
            &report.updated_at,
            &report.student_id,
            &report.template_id,
        ),
    )?;
    anyhow::ensure!(
        changed == 1,
        "no report for student {} and template {}",
        report.student_id,
        report.template_id
    );
    Ok(())
}
