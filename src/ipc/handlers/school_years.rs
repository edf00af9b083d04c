use crate::ipc::error::{err, ok};
use crate::ipc::handlers::common::{required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn school_years_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, total_weeks, is_current
             FROM school_years
             ORDER BY name",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let total_weeks: i64 = r.get(2)?;
            let is_current: i64 = r.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "totalWeeks": total_weeks,
                "isCurrent": is_current != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "schoolYears": rows }))
}

fn school_years_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::new("bad_params", "name must not be empty"));
    }
    let total_weeks = params
        .get("totalWeeks")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing totalWeeks"))?;
    if total_weeks <= 0 {
        return Err(HandlerErr::new("bad_params", "totalWeeks must be positive"));
    }
    let make_current = params
        .get("isCurrent")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let year_id = Uuid::new_v4().to_string();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    if make_current {
        tx.execute("UPDATE school_years SET is_current = 0", [])
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    tx.execute(
        "INSERT INTO school_years(id, name, total_weeks, is_current)
         VALUES(?, ?, ?, ?)",
        (&year_id, &name, total_weeks, make_current as i64),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "schoolYearId": year_id,
        "name": name,
        "totalWeeks": total_weeks,
        "isCurrent": make_current
    }))
}

/// Exactly one year is current at any time: flipping the flag clears every
/// other row in the same transaction.
fn school_years_set_current(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let year_id = required_str(params, "schoolYearId")?;

    let exists = conn
        .query_row("SELECT 1 FROM school_years WHERE id = ?", [&year_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db)?
        .is_some();
    if !exists {
        return Err(HandlerErr::new("not_found", "school year not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute("UPDATE school_years SET is_current = 0", [])
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tx.execute(
        "UPDATE school_years SET is_current = 1 WHERE id = ?",
        [&year_id],
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
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
        "schoolYears.list" => Some(with_conn(state, req, school_years_list)),
        "schoolYears.create" => Some(with_conn(state, req, |c| {
            school_years_create(c, &req.params)
        })),
        "schoolYears.setCurrent" => Some(with_conn(state, req, |c| {
            school_years_set_current(c, &req.params)
        })),
        _ => None,
    }
}
