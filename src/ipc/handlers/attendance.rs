use crate::ipc::error::{err, ok};
use crate::ipc::handlers::common::{self, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn parse_date(raw: &str) -> Result<String, HandlerErr> {
    match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        Ok(d) => Ok(d.format("%Y-%m-%d").to_string()),
        Err(_) => Err(HandlerErr::new("bad_params", "date must be YYYY-MM-DD")),
    }
}

fn parse_status(v: Option<&serde_json::Value>) -> Result<Option<&'static str>, HandlerErr> {
    let Some(v) = v else { return Ok(None) };
    if v.is_null() {
        return Ok(None);
    }
    match v.as_str() {
        Some("present") => Ok(Some("present")),
        Some("absent") => Ok(Some("absent")),
        _ => Err(HandlerErr::new(
            "bad_params",
            "status must be 'present', 'absent' or null",
        )),
    }
}

/// Upserts one presence cell; a null status removes the record (blank cell in
/// the matrix, distinct from a recorded absence).
fn attendance_set_day(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let student_id = required_str(params, "studentId")?;
    let date = parse_date(&required_str(params, "date")?)?;
    let status = parse_status(params.get("status"))?;

    let student_exists = conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ?",
            [&student_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::db)?
        .is_some();
    if !student_exists {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    if common::class_name(conn, &class_id)?.is_none() {
        return Err(HandlerErr::new("not_found", "class not found"));
    }

    match status {
        Some(status) => {
            conn.execute(
                "INSERT INTO attendance_days(class_id, student_id, date, status)
                 VALUES(?, ?, ?, ?)
                 ON CONFLICT(class_id, student_id, date) DO UPDATE SET
                   status = excluded.status",
                (&class_id, &student_id, &date, status),
            )
            .map_err(|e| HandlerErr {
                code: "db_update_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "attendance_days" })),
            })?;
        }
        None => {
            conn.execute(
                "DELETE FROM attendance_days
                 WHERE class_id = ? AND student_id = ? AND date = ?",
                (&class_id, &student_id, &date),
            )
            .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
        }
    }

    Ok(json!({ "ok": true }))
}

fn attendance_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let roster = common::roster_for_class(conn, &class_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT date FROM attendance_days
             WHERE class_id = ?
             ORDER BY date",
        )
        .map_err(HandlerErr::db)?;
    let dates: Vec<String> = stmt
        .query_map([&class_id], |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut stmt = conn
        .prepare(
            "SELECT student_id, date, status FROM attendance_days
             WHERE class_id = ?",
        )
        .map_err(HandlerErr::db)?;
    let marks: Vec<serde_json::Value> = stmt
        .query_map([&class_id], |r| {
            let student_id: String = r.get(0)?;
            let date: String = r.get(1)?;
            let status: String = r.get(2)?;
            Ok(json!({
                "studentId": student_id,
                "date": date,
                "status": status
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let students: Vec<serde_json::Value> = roster
        .iter()
        .map(|s| {
            json!({
                "id": s.roster.id,
                "fullName": s.roster.full_name,
                "sortOrder": s.sort_order
            })
        })
        .collect();

    Ok(json!({
        "classId": class_id,
        "students": students,
        "dates": dates,
        "marks": marks
    }))
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
        "attendance.setDay" => Some(with_conn(state, req, |c| {
            attendance_set_day(c, &req.params)
        })),
        "attendance.open" => Some(with_conn(state, req, |c| attendance_open(c, &req.params))),
        _ => None,
    }
}
