use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::common::{self, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Hard cap on a single list query. Full record sets are gathered by paging,
/// never by raising the limit.
const MAX_PAGE_SIZE: i64 = 1000;

fn student_json(s: &common::StudentRow) -> serde_json::Value {
    json!({
        "id": s.roster.id,
        "fullName": s.roster.full_name,
        "saintName": s.roster.saint_name,
        "studentCode": s.roster.student_code,
        "classId": s.class_id,
        "score45HK1": s.marks.score_45_hk1,
        "scoreExamHK1": s.marks.score_exam_hk1,
        "score45HK2": s.marks.score_45_hk2,
        "scoreExamHK2": s.marks.score_exam_hk2,
        "attendanceThu5": s.marks.attendance_thu5,
        "attendanceCn": s.marks.attendance_cn,
        "averageYear": s.average_year,
        "sortOrder": s.sort_order
    })
}

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = params.get("classId").and_then(|v| v.as_str());
    let offset = params.get("offset").and_then(|v| v.as_i64()).unwrap_or(0);
    let limit = params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(MAX_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    if offset < 0 {
        return Err(HandlerErr::new("bad_params", "offset must not be negative"));
    }

    // Stable id order so offset paging neither skips nor repeats rows while
    // the table is unchanged.
    let rows = match class_id {
        Some(cid) => {
            let mut stmt = conn
                .prepare(
                    "SELECT id, full_name, saint_name, student_code, class_id,
                            score_45_hk1, score_exam_hk1, score_45_hk2, score_exam_hk2,
                            attendance_thu5, attendance_cn, average_year, sort_order
                     FROM students
                     WHERE class_id = ?1
                     ORDER BY id
                     LIMIT ?2 OFFSET ?3",
                )
                .map_err(HandlerErr::db)?;
            stmt.query_map((cid, limit, offset), common::student_row)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(HandlerErr::db)?
        }
        None => {
            let mut stmt = conn
                .prepare(
                    "SELECT id, full_name, saint_name, student_code, class_id,
                            score_45_hk1, score_exam_hk1, score_45_hk2, score_exam_hk2,
                            attendance_thu5, attendance_cn, average_year, sort_order
                     FROM students
                     ORDER BY id
                     LIMIT ?1 OFFSET ?2",
                )
                .map_err(HandlerErr::db)?;
            stmt.query_map((limit, offset), common::student_row)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(HandlerErr::db)?
        }
    };

    Ok(json!({
        "students": rows.iter().map(student_json).collect::<Vec<_>>(),
        "offset": offset,
        "limit": limit
    }))
}

fn students_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let full_name = required_str(params, "fullName")?.trim().to_string();
    if full_name.is_empty() {
        return Err(HandlerErr::new("bad_params", "fullName must not be empty"));
    }
    let class_id = params
        .get("classId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let saint_name = params
        .get("saintName")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let student_code = params
        .get("studentCode")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let sort_order: i64 = match &class_id {
        Some(cid) => conn
            .query_row(
                "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE class_id = ?",
                [cid],
                |r| r.get(0),
            )
            .map_err(HandlerErr::db)?,
        None => conn
            .query_row(
                "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE class_id IS NULL",
                [],
                |r| r.get(0),
            )
            .map_err(HandlerErr::db)?,
    };

    let student_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO students(id, class_id, full_name, saint_name, student_code,
                              sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &class_id,
            &full_name,
            &saint_name,
            &student_code,
            sort_order,
            &now,
        ),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    Ok(json!({ "studentId": student_id, "sortOrder": sort_order }))
}

struct NumPatch<T> {
    set: bool,
    value: Option<T>,
}

fn f64_patch(patch: &serde_json::Value, key: &str) -> Result<NumPatch<f64>, HandlerErr> {
    let Some(v) = patch.get(key) else {
        return Ok(NumPatch {
            set: false,
            value: None,
        });
    };
    if v.is_null() {
        return Ok(NumPatch {
            set: true,
            value: None,
        });
    }
    let n = v
        .as_f64()
        .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be a number or null", key)))?;
    Ok(NumPatch {
        set: true,
        value: Some(n),
    })
}

fn i64_patch(patch: &serde_json::Value, key: &str) -> Result<NumPatch<i64>, HandlerErr> {
    let Some(v) = patch.get(key) else {
        return Ok(NumPatch {
            set: false,
            value: None,
        });
    };
    if v.is_null() {
        return Ok(NumPatch {
            set: true,
            value: None,
        });
    }
    let n = v.as_i64().ok_or_else(|| {
        HandlerErr::new("bad_params", format!("{} must be an integer or null", key))
    })?;
    if n < 0 {
        return Err(HandlerErr::new(
            "bad_params",
            format!("{} must not be negative", key),
        ));
    }
    Ok(NumPatch {
        set: true,
        value: Some(n),
    })
}

/// Applies an identity/score/attendance patch, then recomputes and persists
/// the yearly weighted average from the stored fields and the current school
/// year. With no current year the attendance term contributes 0.
fn students_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing patch object"))?;
    let patch = serde_json::Value::Object(patch.clone());

    let existing = common::fetch_student(conn, &student_id)?
        .ok_or_else(|| HandlerErr::new("not_found", "student not found"))?;

    let mut marks = existing.marks;
    let year = common::current_school_year(conn)?;
    let total_weeks = year.as_ref().map(|y| y.total_weeks).unwrap_or(0);

    let mut full_name = existing.roster.full_name.clone();
    if let Some(v) = patch.get("fullName") {
        let s = v
            .as_str()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HandlerErr::new("bad_params", "fullName must be a non-empty string"))?;
        full_name = s.to_string();
    }
    let mut saint_name = existing.roster.saint_name.clone();
    if let Some(v) = patch.get("saintName") {
        saint_name = v.as_str().unwrap_or_default().to_string();
    }
    let mut student_code = existing.roster.student_code.clone();
    if let Some(v) = patch.get("studentCode") {
        student_code = v.as_str().unwrap_or_default().to_string();
    }
    let mut class_id = existing.class_id.clone();
    if let Some(v) = patch.get("classId") {
        class_id = v.as_str().map(|s| s.to_string());
    }

    for (key, slot) in [
        ("score45HK1", &mut marks.score_45_hk1),
        ("scoreExamHK1", &mut marks.score_exam_hk1),
        ("score45HK2", &mut marks.score_45_hk2),
        ("scoreExamHK2", &mut marks.score_exam_hk2),
    ] {
        let p = f64_patch(&patch, key)?;
        if p.set {
            if let Some(n) = p.value {
                if !(0.0..=10.0).contains(&n) {
                    return Err(HandlerErr::new(
                        "bad_params",
                        format!("{} must be between 0 and 10", key),
                    ));
                }
            }
            *slot = p.value;
        }
    }

    for (key, slot) in [
        ("attendanceThu5", &mut marks.attendance_thu5),
        ("attendanceCn", &mut marks.attendance_cn),
    ] {
        let p = i64_patch(&patch, key)?;
        if p.set {
            if let (Some(n), true) = (p.value, total_weeks > 0) {
                if n > total_weeks {
                    return Err(HandlerErr::new(
                        "bad_params",
                        format!("{} exceeds the school year's {} weeks", key, total_weeks),
                    ));
                }
            }
            *slot = p.value;
        }
    }

    let average_year = calc::evaluate(&marks, total_weeks).total_avg;
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE students SET
           class_id = ?, full_name = ?, saint_name = ?, student_code = ?,
           score_45_hk1 = ?, score_exam_hk1 = ?, score_45_hk2 = ?, score_exam_hk2 = ?,
           attendance_thu5 = ?, attendance_cn = ?, average_year = ?, updated_at = ?
         WHERE id = ?",
        (
            &class_id,
            &full_name,
            &saint_name,
            &student_code,
            marks.score_45_hk1,
            marks.score_exam_hk1,
            marks.score_45_hk2,
            marks.score_exam_hk2,
            marks.attendance_thu5,
            marks.attendance_cn,
            average_year,
            &now,
            &student_id,
        ),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    Ok(json!({ "ok": true, "averageYear": average_year }))
}

fn students_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;

    let exists = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db)?
        .is_some();
    if !exists {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "DELETE FROM attendance_days WHERE student_id = ?",
        [&student_id],
    )
    .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "ok": true }))
}

fn with_conn(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Connection) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_conn(state, req, |c| students_list(c, &req.params))),
        "students.create" => Some(with_conn(state, req, |c| students_create(c, &req.params))),
        "students.update" => Some(with_conn(state, req, |c| students_update(c, &req.params))),
        "students.delete" => Some(with_conn(state, req, |c| students_delete(c, &req.params))),
        _ => None,
    }
}
