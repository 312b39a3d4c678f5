use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_bool_or, get_optional_str, get_required_date, get_required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, GenerateRequest};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn sessions_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_required_date(params, "date")?;
    let start_time = get_optional_str(params, "startTime")?;
    let end_time = get_optional_str(params, "endTime")?;
    let topic = get_optional_str(params, "topic")?;
    let material = get_optional_str(params, "material")?;

    let class_exists = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .is_some();
    if !class_exists {
        return Err(HandlerErr::new("not_found", "class not found"));
    }

    let date_str = date.format("%Y-%m-%d").to_string();
    let duplicate = conn
        .query_row(
            "SELECT 1 FROM class_sessions WHERE class_id = ? AND session_date = ?",
            (&class_id, &date_str),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .is_some();
    if duplicate {
        return Err(HandlerErr::new(
            "conflict",
            format!("class already has a session on {}", date_str),
        ));
    }

    let session_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO class_sessions(id, class_id, session_date, start_time, end_time, topic, material)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &session_id,
            &class_id,
            &date_str,
            &start_time,
            &end_time,
            &topic,
            &material,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "class_sessions" })),
    })?;

    Ok(json!({ "sessionId": session_id, "date": date_str }))
}

fn sessions_generate(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let weekday = params
        .get("weekday")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing weekday"))?;
    if weekday > 6 {
        return Err(HandlerErr::new(
            "bad_params",
            "weekday must be between 0 (Sunday) and 6 (Saturday)",
        ));
    }
    let request = GenerateRequest {
        class_id,
        weekday: weekday as u8,
        start_date: get_required_date(params, "startDate")?,
        end_date: get_required_date(params, "endDate")?,
        start_time: get_optional_str(params, "startTime")?,
        end_time: get_optional_str(params, "endTime")?,
        skip_holidays: get_bool_or(params, "skipHolidays", true)?,
        dry_run: get_bool_or(params, "dryRun", false)?,
    };

    let preview = schedule::generate_sessions(conn, &request)?;
    Ok(json!({
        "totalGenerated": preview.total_generated,
        "existingSkipped": preview.existing_skipped,
        "dates": preview
            .dates
            .iter()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .collect::<Vec<_>>(),
        "dryRun": request.dry_run,
    }))
}

fn sessions_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let mut stmt = conn
        .prepare(
            "SELECT id, session_date, start_time, end_time, topic, material
             FROM class_sessions
             WHERE class_id = ?
             ORDER BY session_date",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let sessions = stmt
        .query_map([&class_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "date": r.get::<_, String>(1)?,
                "startTime": r.get::<_, Option<String>>(2)?,
                "endTime": r.get::<_, Option<String>>(3)?,
                "topic": r.get::<_, Option<String>>(4)?,
                "material": r.get::<_, Option<String>>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({ "sessions": sessions }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler = match req.method.as_str() {
        "sessions.create" => sessions_create,
        "sessions.generate" => sessions_generate,
        "sessions.list" => sessions_list,
        _ => return None,
    };
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(match handler(conn, &req.params) {
        Ok(value) => ok(&req.id, value),
        Err(error) => error.response(&req.id),
    })
}
