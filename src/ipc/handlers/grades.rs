use crate::batch::{self, GradeItem};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{actor_from, get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn parse_items(params: &serde_json::Value) -> Result<Vec<GradeItem>, HandlerErr> {
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
        let grade = entry
            .get("grade")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| HandlerErr::new("bad_params", format!("items[{}]: missing grade", idx)))?;
        items.push(GradeItem {
            student_id: get_required_str(entry, "studentId")
                .map_err(|e| HandlerErr::new("bad_params", format!("items[{}]: {}", idx, e.message)))?,
            grade,
            note: get_optional_str(entry, "note")
                .map_err(|e| HandlerErr::new("bad_params", format!("items[{}]: {}", idx, e.message)))?,
        });
    }
    Ok(items)
}

fn grades_launch(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let evaluation_id = get_required_str(params, "evaluationId")?;
    let items = parse_items(params)?;
    let actor = actor_from(params);
    let outcome = batch::launch_grades(conn, &actor, &evaluation_id, &items)?;
    Ok(json!({
        "recorded": outcome.recorded,
        "studentsUpdated": outcome.students_updated,
        "auditEntries": outcome.audit_entries,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.launch" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match grades_launch(conn, &req.params) {
                Ok(value) => ok(&req.id, value),
                Err(error) => error.response(&req.id),
            })
        }
        _ => None,
    }
}
