use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn students_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    // Students are keyed by the registration number the upstream system
    // issues: 8 characters, supplied with the request rather than minted here.
    let student_id = get_required_str(params, "studentId")?;
    let student_id = student_id.trim().to_string();
    if student_id.len() != 8 {
        return Err(HandlerErr::new(
            "bad_params",
            "studentId must be exactly 8 characters",
        ));
    }
    let name = get_required_str(params, "name")?;
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::new("bad_params", "name must not be empty"));
    }

    let exists = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .is_some();
    if exists {
        return Err(HandlerErr::new(
            "conflict",
            format!("student {} already exists", student_id),
        ));
    }

    conn.execute(
        "INSERT INTO students(id, name) VALUES(?, ?)",
        (&student_id, &name),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;

    Ok(json!({ "studentId": student_id, "name": name }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match students_create(conn, &req.params) {
                Ok(value) => ok(&req.id, value),
                Err(error) => error.response(&req.id),
            })
        }
        _ => None,
    }
}
