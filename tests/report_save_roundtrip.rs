
use serde_json::json;
use test_support::{request_ok, spawn_sidecar, temp_dir};

#[test]
fn save_reload_and_regenerate_roundtrip() {
    let workspace = temp_dir("reportwriter-save-roundtrip");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(&mut stdin, &mut reader, "2", "classes.create", json!({ "name": "4B" }));
    let class_id = class.get("classId").and_then(|v| v.as_str()).expect("classId").to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "classId": class_id, "firstName": "Sam", "lastName": "Porter" }),
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();
    let template = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "templates.create",
        json!({
            "name": "Term 1",
            "sections": [{
                "id": "sec-maths",
                "name": "Maths",
                "type": "rated-comment",
                "data": {
                    "comments": { "excellent": ["Great work, [Name]!"] },
                    "showHeader": true
                }
            }]
        }),
    );
    let template_id = template
        .get("templateId")
        .and_then(|v| v.as_str())
        .expect("templateId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "session.open",
        json!({ "classId": class_id, "templateId": template_id, "studentId": student_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "session.patch",
        json!({ "sectionId": "sec-maths", "patch": { "rating": "excellent" } }),
    );

    // First save: untouched preview persists as a clean, regenerable report.
    let saved = request_ok(&mut stdin, &mut reader, "7", "session.save", json!({}));
    let report = saved.get("report").expect("report");
    assert_eq!(
        report.get("content").and_then(|v| v.as_str()),
        Some("Maths: Great work, Sam!")
    );
    assert_eq!(
        report.get("isManuallyEdited").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert!(report.get("manuallyEditedContent").is_none());
    let report_id = report.get("id").and_then(|v| v.as_str()).expect("id").to_string();

    // Manual rewrite, then save again: same row, now flagged.
    let edited = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "session.editPreview",
        json!({ "content": "Sam had a wonderful term." }),
    );
    assert_eq!(edited.get("isEdited").and_then(|v| v.as_bool()), Some(true));
    let saved = request_ok(&mut stdin, &mut reader, "9", "session.save", json!({}));
    let report = saved.get("report").expect("report");
    assert_eq!(report.get("id").and_then(|v| v.as_str()), Some(report_id.as_str()));
    assert_eq!(
        report.get("isManuallyEdited").and_then(|v| v.as_bool()),
        Some(true)
    );
    assert_eq!(
        report.get("manuallyEditedContent").and_then(|v| v.as_str()),
        Some("Sam had a wonderful term.")
    );

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "reports.get",
        json!({ "studentId": student_id, "templateId": template_id }),
    );
    assert_eq!(
        fetched.pointer("/report/manuallyEditedContent").and_then(|v| v.as_str()),
        Some("Sam had a wonderful term.")
    );

    // Reopening restores the manual text, not a fresh assembler pass.
    let reopened = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "session.open",
        json!({ "classId": class_id, "templateId": template_id, "studentId": student_id }),
    );
    assert_eq!(
        reopened.get("hasSavedReport").and_then(|v| v.as_bool()),
        Some(true)
    );
    assert_eq!(
        reopened.get("content").and_then(|v| v.as_str()),
        Some("Sam had a wonderful term.")
    );
    assert_eq!(reopened.get("isEdited").and_then(|v| v.as_bool()), Some(true));

    // Regenerate discards the manual text in the buffer.
    let regenerated = request_ok(&mut stdin, &mut reader, "12", "session.regenerate", json!({}));
    assert_eq!(
        regenerated.get("content").and_then(|v| v.as_str()),
        Some("Maths: Great work, Sam!")
    );
    assert_eq!(
        regenerated.get("isEdited").and_then(|v| v.as_bool()),
        Some(false)
    );

    // And a further save clears the flag on the persisted row.
    let saved = request_ok(&mut stdin, &mut reader, "13", "session.save", json!({}));
    assert_eq!(
        saved.pointer("/report/isManuallyEdited").and_then(|v| v.as_bool()),
        Some(false)
    );

    let _ = child.kill();
}

#[test]
fn save_as_template_persists_flattened_sections() {
    let workspace = temp_dir("reportwriter-save-as-template");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(&mut stdin, &mut reader, "2", "classes.create", json!({ "name": "4B" }));
    let class_id = class.get("classId").and_then(|v| v.as_str()).expect("classId").to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "classId": class_id, "firstName": "Jo" }),
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();
    let template = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "templates.create",
        json!({
            "name": "Short",
            "sections": [{
                "id": "sec-open",
                "type": "standard-comment",
                "data": { "content": "A good term." }
            }]
        }),
    );
    let template_id = template
        .get("templateId")
        .and_then(|v| v.as_str())
        .expect("templateId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "session.open",
        json!({ "classId": class_id, "templateId": template_id, "studentId": student_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "session.addSection",
        json!({ "type": "new-line", "insertAfter": 0 }),
    );
    let promoted = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "session.saveAsTemplate",
        json!({ "name": "Short v2" }),
    );
    assert_eq!(promoted.get("sectionCount").and_then(|v| v.as_i64()), Some(2));
    let new_template_id = promoted
        .get("templateId")
        .and_then(|v| v.as_str())
        .expect("templateId")
        .to_string();
    assert_ne!(new_template_id, template_id);

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "templates.get",
        json!({ "templateId": new_template_id }),
    );
    let sections = fetched
        .pointer("/template/sections")
        .and_then(|v| v.as_array())
        .expect("sections");
    assert_eq!(sections.len(), 2);
    assert_eq!(
        sections[1].get("type").and_then(|v| v.as_str()),
        Some("new-line")
    );

    let _ = child.kill();
}
