use crate::audit::{AuditEntry, AuditRecorder};
use crate::calc;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug)]
pub enum BatchError {
    Validation(String),
    NotFound(String),
    Invariant(String),
    Query(String),
    Tx(String),
}

impl BatchError {
    pub fn code(&self) -> &'static str {
        match self {
            BatchError::Validation(_) => "bad_params",
            BatchError::NotFound(_) => "not_found",
            BatchError::Invariant(_) => "invariant_violation",
            BatchError::Query(_) => "db_query_failed",
            BatchError::Tx(_) => "db_tx_failed",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            BatchError::Validation(m)
            | BatchError::NotFound(m)
            | BatchError::Invariant(m)
            | BatchError::Query(m)
            | BatchError::Tx(m) => m,
        }
    }
}

fn query_err(e: rusqlite::Error) -> BatchError {
    BatchError::Query(e.to_string())
}

fn tx_err(e: rusqlite::Error) -> BatchError {
    BatchError::Tx(e.to_string())
}

#[derive(Debug, Clone)]
pub struct AttendanceItem {
    pub session_id: String,
    pub enrollment_id: String,
    pub present: bool,
    pub justification: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceOutcome {
    pub recorded: usize,
    pub enrollments_updated: usize,
    pub audit_entries: usize,
}

#[derive(Debug, Clone)]
pub struct GradeItem {
    pub student_id: String,
    pub grade: f64,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeOutcome {
    pub recorded: usize,
    pub students_updated: usize,
    pub audit_entries: usize,
}

/// Bulk attendance upsert. Preconditions are checked read-only, then one
/// transaction replaces the posted `(session, enrollment)` records,
/// recomputes each touched enrollment's attendance percentage, and commits.
/// Resubmitting an identical batch reaches the same final state and emits
/// no further audit entries.
pub fn record_attendance_batch(
    conn: &Connection,
    actor: &str,
    items: &[AttendanceItem],
) -> Result<AttendanceOutcome, BatchError> {
    if items.is_empty() {
        return Err(BatchError::Validation(
            "batch must contain at least one item".to_string(),
        ));
    }
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    for item in items {
        if !seen.insert((item.session_id.as_str(), item.enrollment_id.as_str())) {
            return Err(BatchError::Validation(format!(
                "duplicate batch entry for session {} and enrollment {}",
                item.session_id, item.enrollment_id
            )));
        }
    }

    let session_ids: HashSet<&str> = items.iter().map(|i| i.session_id.as_str()).collect();
    let session_classes = load_session_classes(conn, &session_ids)?;
    let mut missing: Vec<&str> = session_ids
        .iter()
        .filter(|id| !session_classes.contains_key(**id))
        .copied()
        .collect();
    if !missing.is_empty() {
        missing.sort_unstable();
        return Err(BatchError::NotFound(format!(
            "sessions not found: {}",
            missing.join(", ")
        )));
    }

    // enrollment id -> (class_id, student_id)
    let mut enrollments: BTreeMap<String, (String, String)> = BTreeMap::new();
    for item in items {
        if enrollments.contains_key(&item.enrollment_id) {
            continue;
        }
        let Some(found) = load_enrollment(conn, &item.enrollment_id)? else {
            return Err(BatchError::NotFound(format!(
                "enrollment not found: {}",
                item.enrollment_id
            )));
        };
        enrollments.insert(item.enrollment_id.clone(), found);
    }
    for item in items {
        let session_class = &session_classes[item.session_id.as_str()];
        let (enrollment_class, _) = &enrollments[&item.enrollment_id];
        if session_class != enrollment_class {
            return Err(BatchError::Validation(format!(
                "session {} and enrollment {} belong to different classes",
                item.session_id, item.enrollment_id
            )));
        }
    }

    let mut recorder = AuditRecorder::new();
    let tx = conn.unchecked_transaction().map_err(tx_err)?;

    let prior = replace_attendance_records(&tx, items).map_err(tx_err)?;
    for (item, before) in items.iter().zip(prior.iter()) {
        if *before == Some(item.present) {
            continue;
        }
        let (class_id, student_id) = &enrollments[&item.enrollment_id];
        recorder.record(AuditEntry {
            actor: actor.to_string(),
            entity_type: "attendance_record".to_string(),
            entity_id: format!("{}:{}", item.session_id, item.enrollment_id),
            action: if before.is_some() {
                "attendance.updated".to_string()
            } else {
                "attendance.recorded".to_string()
            },
            old_value: before.map(|b| json!(b)),
            new_value: json!(item.present),
            metadata: json!({
                "classId": class_id,
                "sessionId": item.session_id,
                "enrollmentId": item.enrollment_id,
                "studentId": student_id,
            }),
        });
    }

    for (enrollment_id, (class_id, _)) in &enrollments {
        let pct = recompute_enrollment_attendance(&tx, enrollment_id, class_id).map_err(tx_err)?;
        tx.execute(
            "UPDATE enrollments SET attendance_percent = ? WHERE id = ?",
            (pct, enrollment_id),
        )
        .map_err(tx_err)?;
    }

    tx.commit().map_err(tx_err)?;

    let audit_entries = recorder.flush(conn);
    Ok(AttendanceOutcome {
        recorded: items.len(),
        enrollments_updated: enrollments.len(),
        audit_entries,
    })
}

/// Grade launch for one evaluation. The class-wide weight gate runs before
/// any write; the transaction then replaces the posted grades and
/// recomputes each touched student's average over all grades of the class.
pub fn launch_grades(
    conn: &Connection,
    actor: &str,
    evaluation_id: &str,
    items: &[GradeItem],
) -> Result<GradeOutcome, BatchError> {
    if items.is_empty() {
        return Err(BatchError::Validation(
            "batch must contain at least one item".to_string(),
        ));
    }
    let mut seen: HashSet<&str> = HashSet::new();
    for item in items {
        if !seen.insert(item.student_id.as_str()) {
            return Err(BatchError::Validation(format!(
                "duplicate batch entry for student {}",
                item.student_id
            )));
        }
        if !calc::validate_grade(item.grade) {
            return Err(BatchError::Validation(format!(
                "grade {} for student {} is outside [0, 10]",
                item.grade, item.student_id
            )));
        }
    }

    let class_id: Option<String> = conn
        .query_row(
            "SELECT class_id FROM evaluations WHERE id = ?",
            [evaluation_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_err)?;
    let Some(class_id) = class_id else {
        return Err(BatchError::NotFound("evaluation not found".to_string()));
    };

    let check = class_weight_check(conn, &class_id)?;
    if !check.is_valid {
        return Err(BatchError::Invariant(check.gap_message()));
    }

    // Every graded student must hold an enrollment in the owning class.
    for item in items {
        let enrolled = conn
            .query_row(
                "SELECT 1 FROM enrollments WHERE class_id = ? AND student_id = ?",
                (&class_id, &item.student_id),
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map_err(query_err)?
            .is_some();
        if !enrolled {
            return Err(BatchError::NotFound(format!(
                "student {} is not enrolled in this class",
                item.student_id
            )));
        }
    }

    let mut recorder = AuditRecorder::new();
    let tx = conn.unchecked_transaction().map_err(tx_err)?;

    let prior = replace_evaluation_grades(&tx, evaluation_id, items).map_err(tx_err)?;
    for (item, before) in items.iter().zip(prior.iter()) {
        let rounded = calc::round_grade(item.grade);
        if before.map(|b| (b - rounded).abs() < 1e-9).unwrap_or(false) {
            continue;
        }
        recorder.record(AuditEntry {
            actor: actor.to_string(),
            entity_type: "evaluation_grade".to_string(),
            entity_id: format!("{}:{}", evaluation_id, item.student_id),
            action: if before.is_some() {
                "grade.updated".to_string()
            } else {
                "grade.recorded".to_string()
            },
            old_value: before.map(|b| json!(b)),
            new_value: json!(rounded),
            metadata: json!({
                "classId": class_id,
                "evaluationId": evaluation_id,
                "studentId": item.student_id,
            }),
        });
    }

    let mut students: Vec<&str> = items.iter().map(|i| i.student_id.as_str()).collect();
    students.sort_unstable();
    for student_id in &students {
        let average = recompute_student_average(&tx, &class_id, student_id).map_err(tx_err)?;
        tx.execute(
            "UPDATE enrollments SET grade_average = ? WHERE class_id = ? AND student_id = ?",
            (average, &class_id, student_id),
        )
        .map_err(tx_err)?;
    }

    tx.commit().map_err(tx_err)?;

    let audit_entries = recorder.flush(conn);
    Ok(GradeOutcome {
        recorded: items.len(),
        students_updated: students.len(),
        audit_entries,
    })
}

/// Weight state over all evaluations of a class; the gate for grade writes.
pub fn class_weight_check(
    conn: &Connection,
    class_id: &str,
) -> Result<calc::WeightCheck, BatchError> {
    let mut stmt = conn
        .prepare("SELECT weight FROM evaluations WHERE class_id = ?")
        .map_err(query_err)?;
    let weights: Vec<i64> = stmt
        .query_map([class_id], |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(calc::validate_weights(&weights))
}

/// Replace-by-composite-key for attendance: delete exactly the posted
/// `(session, enrollment)` pairs, insert the new rows. Returns each item's
/// prior presence for audit diffing. Scoping the delete to the posted keys
/// is what makes resubmission idempotent.
fn replace_attendance_records(
    tx: &Connection,
    items: &[AttendanceItem],
) -> Result<Vec<Option<bool>>, rusqlite::Error> {
    let mut before_stmt = tx.prepare(
        "SELECT present FROM attendance_records WHERE session_id = ? AND enrollment_id = ?",
    )?;
    let mut delete_stmt =
        tx.prepare("DELETE FROM attendance_records WHERE session_id = ? AND enrollment_id = ?")?;
    let mut insert_stmt = tx.prepare(
        "INSERT INTO attendance_records(id, session_id, enrollment_id, present, justification)
         VALUES(?, ?, ?, ?, ?)",
    )?;

    let mut prior = Vec::with_capacity(items.len());
    for item in items {
        let before: Option<i64> = before_stmt
            .query_row((&item.session_id, &item.enrollment_id), |r| r.get(0))
            .optional()?;
        prior.push(before.map(|v| v != 0));
        delete_stmt.execute((&item.session_id, &item.enrollment_id))?;
        insert_stmt.execute((
            Uuid::new_v4().to_string(),
            &item.session_id,
            &item.enrollment_id,
            item.present as i64,
            &item.justification,
        ))?;
    }
    Ok(prior)
}

/// Replace-by-composite-key for grades: delete exactly the posted
/// `(evaluation, student)` pairs, insert the new rounded grades. Returns
/// each item's prior grade for audit diffing.
fn replace_evaluation_grades(
    tx: &Connection,
    evaluation_id: &str,
    items: &[GradeItem],
) -> Result<Vec<Option<f64>>, rusqlite::Error> {
    let mut before_stmt = tx
        .prepare("SELECT grade FROM evaluation_grades WHERE evaluation_id = ? AND student_id = ?")?;
    let mut delete_stmt =
        tx.prepare("DELETE FROM evaluation_grades WHERE evaluation_id = ? AND student_id = ?")?;
    let mut insert_stmt = tx.prepare(
        "INSERT INTO evaluation_grades(id, evaluation_id, student_id, grade, note)
         VALUES(?, ?, ?, ?, ?)",
    )?;

    let mut prior = Vec::with_capacity(items.len());
    for item in items {
        let before: Option<f64> = before_stmt
            .query_row((evaluation_id, &item.student_id), |r| r.get(0))
            .optional()?;
        prior.push(before);
        delete_stmt.execute((evaluation_id, &item.student_id))?;
        insert_stmt.execute((
            Uuid::new_v4().to_string(),
            evaluation_id,
            &item.student_id,
            calc::round_grade(item.grade),
            &item.note,
        ))?;
    }
    Ok(prior)
}

/// Attendance percentage for one enrollment, recomputed from the class's
/// current sessions and this enrollment's absence records.
pub fn recompute_enrollment_attendance(
    conn: &Connection,
    enrollment_id: &str,
    class_id: &str,
) -> Result<f64, rusqlite::Error> {
    let total_sessions: i64 = conn.query_row(
        "SELECT COUNT(*) FROM class_sessions WHERE class_id = ?",
        [class_id],
        |r| r.get(0),
    )?;
    let absences: i64 = conn.query_row(
        "SELECT COUNT(*)
         FROM attendance_records ar
         JOIN class_sessions cs ON cs.id = ar.session_id
         WHERE ar.enrollment_id = ? AND cs.class_id = ? AND ar.present = 0",
        (enrollment_id, class_id),
        |r| r.get(0),
    )?;
    Ok(calc::attendance_percent(total_sessions, absences))
}

/// Weighted average over all of a student's grades across every evaluation
/// of the class, not only the most recently launched one. `None` when the
/// student has no grades.
pub fn recompute_student_average(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
) -> Result<Option<f64>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT g.grade, e.weight
         FROM evaluation_grades g
         JOIN evaluations e ON e.id = g.evaluation_id
         WHERE e.class_id = ? AND g.student_id = ?",
    )?;
    let entries: Vec<calc::GradeEntry> = stmt
        .query_map((class_id, student_id), |r| {
            Ok(calc::GradeEntry {
                grade: r.get(0)?,
                weight: r.get(1)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(calc::weighted_average(&entries))
}

/// Recompute the cached average for every enrollment of a class. Used when
/// evaluation definitions change underneath existing grades (weight edits,
/// evaluation deletion).
pub fn recompute_class_averages(
    conn: &Connection,
    class_id: &str,
) -> Result<usize, rusqlite::Error> {
    let mut stmt =
        conn.prepare("SELECT id, student_id FROM enrollments WHERE class_id = ? ORDER BY id")?;
    let rows: Vec<(String, String)> = stmt
        .query_map([class_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    for (enrollment_id, student_id) in &rows {
        let average = recompute_student_average(conn, class_id, student_id)?;
        conn.execute(
            "UPDATE enrollments SET grade_average = ? WHERE id = ?",
            (average, enrollment_id),
        )?;
    }
    Ok(rows.len())
}

fn load_session_classes(
    conn: &Connection,
    session_ids: &HashSet<&str>,
) -> Result<HashMap<String, String>, BatchError> {
    if session_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders = std::iter::repeat("?")
        .take(session_ids.len())
        .collect::<Vec<_>>()
        .join(",");
    let sql = format!(
        "SELECT id, class_id FROM class_sessions WHERE id IN ({})",
        placeholders
    );
    let binds: Vec<Value> = session_ids
        .iter()
        .map(|id| Value::Text((*id).to_string()))
        .collect();
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(rows.into_iter().collect())
}

fn load_enrollment(
    conn: &Connection,
    enrollment_id: &str,
) -> Result<Option<(String, String)>, BatchError> {
    conn.query_row(
        "SELECT class_id, student_id FROM enrollments WHERE id = ?",
        [enrollment_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .optional()
    .map_err(query_err)
}
