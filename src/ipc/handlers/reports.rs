use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::common::{self, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::report;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;

fn parse_opt_date(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    let Some(v) = params.get(key) else {
        return Ok(None);
    };
    if v.is_null() {
        return Ok(None);
    }
    let Some(s) = v.as_str() else {
        return Err(HandlerErr::new(
            "bad_params",
            format!("{} must be a YYYY-MM-DD string", key),
        ));
    };
    match NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d") {
        Ok(d) => Ok(Some(d.format("%Y-%m-%d").to_string())),
        Err(_) => Err(HandlerErr::new(
            "bad_params",
            format!("{} must be a YYYY-MM-DD string", key),
        )),
    }
}

/// Attendance matrix for a class: one row per roster entry, one column per
/// recorded date (optionally clipped to a range). The date list comes from
/// the records themselves; a date nobody was marked on simply has no column.
fn reports_attendance_matrix(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let date_from = parse_opt_date(params, "dateFrom")?;
    let date_to = parse_opt_date(params, "dateTo")?;

    let class_name = common::class_name(conn, &class_id)?
        .ok_or_else(|| HandlerErr::new("not_found", "class not found"))?;
    let roster_rows = common::roster_for_class(conn, &class_id)?;
    let roster: Vec<report::RosterEntry> =
        roster_rows.iter().map(|s| s.roster.clone()).collect();

    let mut stmt = conn
        .prepare(
            "SELECT student_id, date, status FROM attendance_days
             WHERE class_id = ?1
               AND (?2 IS NULL OR date >= ?2)
               AND (?3 IS NULL OR date <= ?3)
             ORDER BY date",
        )
        .map_err(HandlerErr::db)?;
    let marks: Vec<(String, String, String)> = stmt
        .query_map((&class_id, &date_from, &date_to), |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut dates: Vec<String> = Vec::new();
    let mut presence: HashMap<(String, String), report::Presence> = HashMap::new();
    for (student_id, date, status) in marks {
        if !dates.contains(&date) {
            dates.push(date.clone());
        }
        if let Some(p) = report::Presence::parse(&status) {
            presence.insert((student_id, date), p);
        }
    }

    let matrix = report::attendance_matrix(&roster, &dates, &presence);
    Ok(json!({
        "classId": class_id,
        "className": class_name,
        "matrix": matrix
    }))
}

/// Score sheet for a class, evaluated against the current school year. The
/// column selection flags come in as `scoreColumns`; leaving them out (or all
/// false) shows every column.
fn reports_score_sheet(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;

    let flags: report::ScoreColumns = match params.get("scoreColumns") {
        None => report::ScoreColumns::default(),
        Some(v) if v.is_null() => report::ScoreColumns::default(),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| HandlerErr::new("bad_params", format!("bad scoreColumns: {}", e)))?,
    };

    let class_name = common::class_name(conn, &class_id)?
        .ok_or_else(|| HandlerErr::new("not_found", "class not found"))?;
    let roster = common::roster_for_class(conn, &class_id)?;
    let year = common::current_school_year(conn)?;
    let total_weeks = year.as_ref().map(|y| y.total_weeks).unwrap_or(0);

    let entries: Vec<report::ScoreSheetEntry> = roster
        .iter()
        .map(|s| report::ScoreSheetEntry {
            roster: s.roster.clone(),
            marks: s.marks,
            average_year: s.average_year,
        })
        .collect();

    let sheet = report::score_sheet(&entries, flags, total_weeks);
    Ok(json!({
        "classId": class_id,
        "className": class_name,
        "schoolYear": year.as_ref().map(|y| json!({
            "id": y.id,
            "name": y.name,
            "totalWeeks": y.total_weeks
        })),
        "sheet": sheet
    }))
}

/// Per-week progress strips for one student, expanded from the bare counters.
/// The strip marks the first N weeks, not the actual calendar weeks attended.
fn reports_attendance_progress(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let student = common::fetch_student(conn, &student_id)?
        .ok_or_else(|| HandlerErr::new("not_found", "student not found"))?;
    let year = common::current_school_year(conn)?;
    let total_weeks = year.as_ref().map(|y| y.total_weeks).unwrap_or(0);

    let thu5 = student.marks.attendance_thu5.unwrap_or(0);
    let cn = student.marks.attendance_cn.unwrap_or(0);
    Ok(json!({
        "studentId": student_id,
        "totalWeeks": total_weeks,
        "thu5Cells": calc::attendance_week_cells(thu5, total_weeks),
        "cnCells": calc::attendance_week_cells(cn, total_weeks)
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
        "reports.attendanceMatrix" => Some(with_conn(state, req, |c| {
            reports_attendance_matrix(c, &req.params)
        })),
        "reports.scoreSheet" => Some(with_conn(state, req, |c| {
            reports_score_sheet(c, &req.params)
        })),
        "reports.attendanceProgress" => Some(with_conn(state, req, |c| {
            reports_attendance_progress(c, &req.params)
        })),
        _ => None,
    }
}
