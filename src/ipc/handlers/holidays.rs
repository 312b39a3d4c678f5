use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_date, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn holidays_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let start = get_required_date(params, "startDate")?;
    let end = get_required_date(params, "endDate")?;
    if start > end {
        return Err(HandlerErr::new(
            "bad_params",
            "startDate must not be after endDate",
        ));
    }

    let holiday_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO holiday_periods(id, name, start_date, end_date) VALUES(?, ?, ?, ?)",
        (
            &holiday_id,
            name.trim(),
            start.format("%Y-%m-%d").to_string(),
            end.format("%Y-%m-%d").to_string(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "holiday_periods" })),
    })?;

    Ok(json!({ "holidayId": holiday_id }))
}

fn holidays_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, start_date, end_date
             FROM holiday_periods
             ORDER BY start_date",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let holidays = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "startDate": r.get::<_, String>(2)?,
                "endDate": r.get::<_, String>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({ "holidays": holidays }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "holidays.create" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            holidays_create(conn, &req.params)
        }
        "holidays.list" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(ok(&req.id, json!({ "holidays": [] })));
            };
            holidays_list(conn)
        }
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(error) => error.response(&req.id),
    })
}
