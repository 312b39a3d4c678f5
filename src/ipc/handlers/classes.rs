use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn classes_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::new("bad_params", "name must not be empty"));
    }
    let course = get_optional_str(params, "course")?;
    let term = get_optional_str(params, "term")?;

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, course, term) VALUES(?, ?, ?, ?)",
        (&class_id, &name, &course, &term),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "classes" })),
    })?;

    Ok(json!({ "classId": class_id, "name": name }))
}

fn classes_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    // Correlated subqueries keep the counts join-free.
    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.name,
               c.course,
               c.term,
               (SELECT COUNT(*) FROM enrollments e WHERE e.class_id = c.id) AS enrollment_count,
               (SELECT COUNT(*) FROM class_sessions s WHERE s.class_id = c.id) AS session_count,
               (SELECT COUNT(*) FROM evaluations ev WHERE ev.class_id = c.id) AS evaluation_count
             FROM classes c
             ORDER BY c.name",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let classes = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "course": row.get::<_, Option<String>>(2)?,
                "term": row.get::<_, Option<String>>(3)?,
                "enrollmentCount": row.get::<_, i64>(4)?,
                "sessionCount": row.get::<_, i64>(5)?,
                "evaluationCount": row.get::<_, i64>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    Ok(json!({ "classes": classes }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "classes.create" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            classes_create(conn, &req.params)
        }
        "classes.list" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(ok(&req.id, json!({ "classes": [] })));
            };
            classes_list(conn)
        }
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(error) => error.response(&req.id),
    })
}
