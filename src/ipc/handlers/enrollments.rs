use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn enrollments_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;

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
    let student_exists = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .is_some();
    if !student_exists {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let already = conn
        .query_row(
            "SELECT 1 FROM enrollments WHERE class_id = ? AND student_id = ?",
            (&class_id, &student_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .is_some();
    if already {
        return Err(HandlerErr::new(
            "conflict",
            "student is already enrolled in this class",
        ));
    }

    let enrollment_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO enrollments(id, class_id, student_id) VALUES(?, ?, ?)",
        (&enrollment_id, &class_id, &student_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "enrollments" })),
    })?;

    Ok(json!({ "enrollmentId": enrollment_id }))
}

fn enrollments_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let enrollment_id = get_required_str(params, "enrollmentId")?;

    let row: Option<(String, String, Option<f64>, Option<f64>)> = conn
        .query_row(
            "SELECT class_id, student_id, grade_average, attendance_percent
             FROM enrollments
             WHERE id = ?",
            [&enrollment_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let Some((class_id, student_id, grade_average, attendance_percent)) = row else {
        return Err(HandlerErr::new("not_found", "enrollment not found"));
    };

    // Status is reported from live counts; the cached percentage stays the
    // authoritative value the batch path wrote.
    let total_sessions: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM class_sessions WHERE class_id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let absences: i64 = conn
        .query_row(
            "SELECT COUNT(*)
             FROM attendance_records ar
             JOIN class_sessions cs ON cs.id = ar.session_id
             WHERE ar.enrollment_id = ? AND cs.class_id = ? AND ar.present = 0",
            (&enrollment_id, &class_id),
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let status = calc::attendance_status(total_sessions, absences);

    Ok(json!({
        "enrollmentId": enrollment_id,
        "classId": class_id,
        "studentId": student_id,
        "gradeAverage": grade_average,
        "attendancePercent": attendance_percent,
        "attendanceStatus": status,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler = match req.method.as_str() {
        "enrollments.create" => enrollments_create,
        "enrollments.get" => enrollments_get,
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
