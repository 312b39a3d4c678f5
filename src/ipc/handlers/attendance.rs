use crate::batch::{self, AttendanceItem};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{actor_from, get_optional_str, get_required_bool, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn parse_items(params: &serde_json::Value) -> Result<Vec<AttendanceItem>, HandlerErr> {
    let Some(raw) = params.get("items").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing items"));
    };
    let mut items = Vec::with_capacity(raw.len());
    for (idx, entry) in raw.iter().enumerate() {
        if !entry.is_object() {
            return Err(HandlerErr::new(
                "bad_params",
                format!("items[{}] must be an object", idx),
            ));
        }
        items.push(AttendanceItem {
            session_id: get_required_str(entry, "sessionId")
                .map_err(|e| HandlerErr::new("bad_params", format!("items[{}]: {}", idx, e.message)))?,
            enrollment_id: get_required_str(entry, "enrollmentId")
                .map_err(|e| HandlerErr::new("bad_params", format!("items[{}]: {}", idx, e.message)))?,
            present: get_required_bool(entry, "present")
                .map_err(|e| HandlerErr::new("bad_params", format!("items[{}]: {}", idx, e.message)))?,
            justification: get_optional_str(entry, "justification")
                .map_err(|e| HandlerErr::new("bad_params", format!("items[{}]: {}", idx, e.message)))?,
        });
    }
    Ok(items)
}

fn attendance_bulk_record(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let items = parse_items(params)?;
    let actor = actor_from(params);
    let outcome = batch::record_attendance_batch(conn, &actor, &items)?;
    Ok(json!({
        "recorded": outcome.recorded,
        "enrollmentsUpdated": outcome.enrollments_updated,
        "auditEntries": outcome.audit_entries,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.bulkRecord" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match attendance_bulk_record(conn, &req.params) {
                Ok(value) => ok(&req.id, value),
                Err(error) => error.response(&req.id),
            })
        }
        _ => None,
    }
}
