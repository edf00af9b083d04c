use rusqlite::{Connection, OptionalExtension};

use crate::calc::RawMarks;
use crate::ipc::error::err;
use crate::report::RosterEntry;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn db(e: rusqlite::Error) -> Self {
        HandlerErr::new("db_query_failed", e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub roster: RosterEntry,
    pub class_id: Option<String>,
    pub marks: RawMarks,
    pub average_year: Option<f64>,
    pub sort_order: i64,
}

pub fn class_name(conn: &Connection, class_id: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row("SELECT name FROM classes WHERE id = ?", [class_id], |r| {
        r.get(0)
    })
    .optional()
    .map_err(HandlerErr::db)
}

pub fn student_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        roster: RosterEntry {
            id: r.get(0)?,
            full_name: r.get(1)?,
            saint_name: r.get::<_, Option<String>>(2)?.unwrap_or_default(),
            student_code: r.get::<_, Option<String>>(3)?.unwrap_or_default(),
        },
        class_id: r.get(4)?,
        marks: RawMarks {
            score_45_hk1: r.get(5)?,
            score_exam_hk1: r.get(6)?,
            score_45_hk2: r.get(7)?,
            score_exam_hk2: r.get(8)?,
            attendance_thu5: r.get(9)?,
            attendance_cn: r.get(10)?,
        },
        average_year: r.get(11)?,
        sort_order: r.get(12)?,
    })
}

const STUDENT_COLUMNS: &str = "id, full_name, saint_name, student_code, class_id,
             score_45_hk1, score_exam_hk1, score_45_hk2, score_exam_hk2,
             attendance_thu5, attendance_cn, average_year, sort_order";

/// Two-step class membership lookup. Students are matched by `class_id`
/// equal to the class's id; rows imported from the legacy portal may carry
/// the class display name in that column instead, so an exact-name match is
/// included as a fallback. If two classes share a name the fallback can
/// double-match; the legacy data never de-duplicated this and neither do we.
pub fn roster_for_class(conn: &Connection, class_id: &str) -> Result<Vec<StudentRow>, HandlerErr> {
    let name = class_name(conn, class_id)?
        .ok_or_else(|| HandlerErr::new("not_found", "class not found"))?;

    let sql = format!(
        "SELECT {}
         FROM students
         WHERE class_id = ?1 OR class_id = ?2
         ORDER BY sort_order",
        STUDENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    stmt.query_map((class_id, &name), student_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)
}

pub fn fetch_student(conn: &Connection, student_id: &str) -> Result<Option<StudentRow>, HandlerErr> {
    let sql = format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS);
    conn.query_row(&sql, [student_id], student_row)
        .optional()
        .map_err(HandlerErr::db)
}

#[derive(Debug, Clone)]
pub struct CurrentSchoolYear {
    pub id: String,
    pub name: String,
    pub total_weeks: i64,
}

/// The active school year; the schema allows zero or several current rows
/// and this read does not enforce the singleton, it just takes the first.
pub fn current_school_year(conn: &Connection) -> Result<Option<CurrentSchoolYear>, HandlerErr> {
    conn.query_row(
        "SELECT id, name, total_weeks FROM school_years WHERE is_current = 1 LIMIT 1",
        [],
        |r| {
            Ok(CurrentSchoolYear {
                id: r.get(0)?,
                name: r.get(1)?,
                total_weeks: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db)
}
