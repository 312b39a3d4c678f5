use crate::audit::{self, AuditFilter};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn audit_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let filter = AuditFilter {
        entity_type: get_optional_str(params, "entityType")?,
        entity_id: get_optional_str(params, "entityId")?,
        limit: params.get("limit").and_then(|v| v.as_i64()),
    };
    let entries = audit::list_entries(conn, &filter)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({ "entries": entries }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "audit.list" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match audit_list(conn, &req.params) {
                Ok(value) => ok(&req.id, value),
                Err(error) => error.response(&req.id),
            })
        }
        _ => None,
    }
}
