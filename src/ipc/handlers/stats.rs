use crate::ipc::error::{err, ok};
use crate::ipc::handlers::common::HandlerErr;
use crate::ipc::types::{AppState, Request};
use crate::scan;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

/// Resolves a tally key back to a class: by id first, then by exact name
/// equality for legacy rows that stored the display name in `class_id`.
fn resolve_class_key(
    conn: &Connection,
    key: &str,
) -> Result<Option<(String, String)>, HandlerErr> {
    let by_id: Option<String> = conn
        .query_row("SELECT name FROM classes WHERE id = ?", [key], |r| r.get(0))
        .optional()
        .map_err(HandlerErr::db)?;
    if let Some(name) = by_id {
        return Ok(Some((key.to_string(), name)));
    }
    conn.query_row(
        "SELECT id, name FROM classes WHERE name = ? LIMIT 1",
        [key],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .optional()
    .map_err(HandlerErr::db)
}

/// Per-class student counts over the whole students table. The table is read
/// through the capped page interface and stitched together by the collector,
/// so the count stays correct past the single-query row limit.
fn stats_class_counts(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let page_size = params
        .get("pageSize")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(scan::DEFAULT_PAGE_SIZE)
        .clamp(1, scan::DEFAULT_PAGE_SIZE);

    let mut stmt = conn
        .prepare(
            "SELECT id, class_id FROM students
             ORDER BY id
             LIMIT ? OFFSET ?",
        )
        .map_err(HandlerErr::db)?;

    let records: Vec<(String, Option<String>)> =
        scan::collect_all_pages(page_size, |offset, limit| {
            let rows = stmt
                .query_map((limit as i64, offset as i64), |r| {
                    Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let tally = scan::tally_by_key(&records, |(_, class_id)| {
        class_id.as_deref().filter(|s| !s.is_empty()).map(String::from)
    });

    let mut keys: Vec<&String> = tally.counts.keys().collect();
    keys.sort();
    let mut counts = Vec::with_capacity(keys.len());
    for key in keys {
        let resolved = resolve_class_key(conn, key)?;
        let count = tally.counts[key];
        counts.push(json!({
            "key": key,
            "classId": resolved.as_ref().map(|(id, _)| id.clone()),
            "className": resolved.as_ref().map(|(_, name)| name.clone()),
            "count": count
        }));
    }

    Ok(json!({
        "counts": counts,
        "withClass": tally.with_key,
        "withoutClass": tally.without_key,
        "totalStudents": records.len(),
        "pageSize": page_size
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "stats.classCounts" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match stats_class_counts(conn, &req.params) {
                Ok(result) => ok(&req.id, result),
                Err(error) => error.response(&req.id),
            })
        }
        _ => None,
    }
}
