use crate::batch;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn get_weight(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    let weight = params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))?;
    if !(0..=100).contains(&weight) {
        return Err(HandlerErr::new(
            "bad_params",
            "weight must be an integer percent between 0 and 100",
        ));
    }
    Ok(weight)
}

fn evaluations_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let code = get_required_str(params, "code")?;
    let code = code.trim().to_string();
    if code.is_empty() {
        return Err(HandlerErr::new("bad_params", "code must not be empty"));
    }
    let weight = get_weight(params, "weight")?;
    let eval_date = get_optional_str(params, "date")?;
    let kind = get_optional_str(params, "kind")?;
    let description = get_optional_str(params, "description")?;

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

    let duplicate = conn
        .query_row(
            "SELECT 1 FROM evaluations WHERE class_id = ? AND code = ?",
            (&class_id, &code),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .is_some();
    if duplicate {
        return Err(HandlerErr::new(
            "conflict",
            format!("class already has an evaluation with code {}", code),
        ));
    }

    let evaluation_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO evaluations(id, class_id, eval_date, kind, code, description, weight)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &evaluation_id,
            &class_id,
            &eval_date,
            &kind,
            &code,
            &description,
            weight,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "evaluations" })),
    })?;

    Ok(json!({ "evaluationId": evaluation_id, "code": code, "weight": weight }))
}

fn evaluations_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let evaluation_id = get_required_str(params, "evaluationId")?;
    let class_id: Option<String> = conn
        .query_row(
            "SELECT class_id FROM evaluations WHERE id = ?",
            [&evaluation_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let Some(class_id) = class_id else {
        return Err(HandlerErr::new("not_found", "evaluation not found"));
    };

    let weight = match params.get("weight") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(_) => Some(get_weight(params, "weight")?),
    };
    let eval_date = get_optional_str(params, "date")?;
    let kind = get_optional_str(params, "kind")?;
    let description = get_optional_str(params, "description")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    if let Some(weight) = weight {
        tx.execute(
            "UPDATE evaluations SET weight = ? WHERE id = ?",
            (weight, &evaluation_id),
        )
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    }
    if let Some(eval_date) = &eval_date {
        tx.execute(
            "UPDATE evaluations SET eval_date = ? WHERE id = ?",
            (eval_date, &evaluation_id),
        )
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    }
    if let Some(kind) = &kind {
        tx.execute(
            "UPDATE evaluations SET kind = ? WHERE id = ?",
            (kind, &evaluation_id),
        )
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    }
    if let Some(description) = &description {
        tx.execute(
            "UPDATE evaluations SET description = ? WHERE id = ?",
            (description, &evaluation_id),
        )
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    }

    // Weight edits shift every cached average in the class.
    let recomputed = if weight.is_some() {
        batch::recompute_class_averages(&tx, &class_id)
            .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?
    } else {
        0
    };
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    Ok(json!({ "evaluationId": evaluation_id, "enrollmentsRecomputed": recomputed }))
}

fn evaluations_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let evaluation_id = get_required_str(params, "evaluationId")?;
    let class_id: Option<String> = conn
        .query_row(
            "SELECT class_id FROM evaluations WHERE id = ?",
            [&evaluation_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let Some(class_id) = class_id else {
        return Err(HandlerErr::new("not_found", "evaluation not found"));
    };

    // Grades exist only while their evaluation does; delete in dependency
    // order and bring the cached averages back in line before committing.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let grades_deleted = tx
        .execute(
            "DELETE FROM evaluation_grades WHERE evaluation_id = ?",
            [&evaluation_id],
        )
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute("DELETE FROM evaluations WHERE id = ?", [&evaluation_id])
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let recomputed = batch::recompute_class_averages(&tx, &class_id)
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    Ok(json!({
        "evaluationId": evaluation_id,
        "gradesDeleted": grades_deleted,
        "enrollmentsRecomputed": recomputed,
    }))
}

fn evaluations_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let mut stmt = conn
        .prepare(
            "SELECT id, code, description, kind, eval_date, weight
             FROM evaluations
             WHERE class_id = ?
             ORDER BY eval_date, code",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let evaluations = stmt
        .query_map([&class_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "description": r.get::<_, Option<String>>(2)?,
                "kind": r.get::<_, Option<String>>(3)?,
                "date": r.get::<_, Option<String>>(4)?,
                "weight": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    // Surface the gate state so callers can tell whether a launch would pass.
    let check = batch::class_weight_check(conn, &class_id).map_err(HandlerErr::from)?;

    Ok(json!({
        "evaluations": evaluations,
        "weightCheck": check,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler = match req.method.as_str() {
        "evaluations.create" => evaluations_create,
        "evaluations.update" => evaluations_update,
        "evaluations.delete" => evaluations_delete,
        "evaluations.list" => evaluations_list,
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
