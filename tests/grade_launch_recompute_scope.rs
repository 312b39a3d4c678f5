use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_registrard");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn registrard");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn grade_average(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    enrollment_id: &str,
) -> Option<f64> {
    let enrollment = request_ok(
        stdin,
        reader,
        id,
        "enrollments.get",
        json!({ "enrollmentId": enrollment_id }),
    );
    enrollment.get("gradeAverage").and_then(|v| v.as_f64())
}

#[test]
fn average_spans_all_evaluations_not_just_the_launched_one() {
    let workspace = temp_dir("registrar-grade-scope");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(&mut stdin, &mut reader, "2", "classes.create", json!({ "name": "History" }));
    let class_id = class.get("classId").and_then(|v| v.as_str()).expect("classId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "studentId": "20240020", "name": "Elisa Prado" }),
    );
    let enrollment = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "enrollments.create",
        json!({ "classId": class_id, "studentId": "20240020" }),
    );
    let enrollment_id = enrollment
        .get("enrollmentId")
        .and_then(|v| v.as_str())
        .expect("enrollmentId")
        .to_string();

    let midterm = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "evaluations.create",
        json!({ "classId": class_id, "code": "MID", "weight": 60 }),
    );
    let midterm_id = midterm
        .get("evaluationId")
        .and_then(|v| v.as_str())
        .expect("evaluationId")
        .to_string();
    let final_exam = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "evaluations.create",
        json!({ "classId": class_id, "code": "FIN", "weight": 40 }),
    );
    let final_id = final_exam
        .get("evaluationId")
        .and_then(|v| v.as_str())
        .expect("evaluationId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "launch-mid",
        "grades.launch",
        json!({
            "evaluationId": midterm_id,
            "items": [{ "studentId": "20240020", "grade": 9.3 }]
        }),
    );
    // Only the midterm is graded so far; it carries all the weight present.
    assert_eq!(
        grade_average(&mut stdin, &mut reader, "get-1", &enrollment_id),
        Some(9.3)
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "launch-fin",
        "grades.launch",
        json!({
            "evaluationId": final_id,
            "items": [{ "studentId": "20240020", "grade": 5.1 }]
        }),
    );
    // (9.3*60 + 5.1*40) / 100 = 7.62 -> 7.6
    assert_eq!(
        grade_average(&mut stdin, &mut reader, "get-2", &enrollment_id),
        Some(7.6)
    );

    // Identical relaunch: same state, no further audit entries.
    let repeat = request_ok(
        &mut stdin,
        &mut reader,
        "launch-fin-2",
        "grades.launch",
        json!({
            "evaluationId": final_id,
            "items": [{ "studentId": "20240020", "grade": 5.1 }]
        }),
    );
    assert_eq!(repeat.get("auditEntries").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(
        grade_average(&mut stdin, &mut reader, "get-3", &enrollment_id),
        Some(7.6)
    );

    // Correction: the final is regraded, the average follows.
    let corrected = request_ok(
        &mut stdin,
        &mut reader,
        "launch-fin-3",
        "grades.launch",
        json!({
            "evaluationId": final_id,
            "items": [{ "studentId": "20240020", "grade": 6.0 }],
            "actor": "prof.rocha"
        }),
    );
    assert_eq!(corrected.get("auditEntries").and_then(|v| v.as_u64()), Some(1));
    // (9.3*60 + 6.0*40) / 100 = 7.98 -> 8.0
    assert_eq!(
        grade_average(&mut stdin, &mut reader, "get-4", &enrollment_id),
        Some(8.0)
    );

    let audit = request_ok(
        &mut stdin,
        &mut reader,
        "audit",
        "audit.list",
        json!({ "entityType": "evaluation_grade", "entityId": format!("{}:20240020", final_id) }),
    );
    let entries = audit.get("entries").and_then(|v| v.as_array()).expect("entries");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].get("action").and_then(|v| v.as_str()), Some("grade.updated"));
    assert_eq!(entries[0].get("oldValue").and_then(|v| v.as_f64()), Some(5.1));
    assert_eq!(entries[0].get("newValue").and_then(|v| v.as_f64()), Some(6.0));
}

#[test]
fn grades_are_stored_rounded_to_one_decimal() {
    let workspace = temp_dir("registrar-grade-round");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(&mut stdin, &mut reader, "2", "classes.create", json!({ "name": "Chemistry" }));
    let class_id = class.get("classId").and_then(|v| v.as_str()).expect("classId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "studentId": "20240021", "name": "Fabio Nunes" }),
    );
    let enrollment = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "enrollments.create",
        json!({ "classId": class_id, "studentId": "20240021" }),
    );
    let enrollment_id = enrollment
        .get("enrollmentId")
        .and_then(|v| v.as_str())
        .expect("enrollmentId")
        .to_string();
    let exam = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "evaluations.create",
        json!({ "classId": class_id, "code": "EX", "weight": 100 }),
    );
    let exam_id = exam
        .get("evaluationId")
        .and_then(|v| v.as_str())
        .expect("evaluationId")
        .to_string();

    // Ties round away from zero: 7.25 lands on 7.3.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "launch",
        "grades.launch",
        json!({
            "evaluationId": exam_id,
            "items": [{ "studentId": "20240021", "grade": 7.25 }]
        }),
    );
    assert_eq!(
        grade_average(&mut stdin, &mut reader, "get", &enrollment_id),
        Some(7.3)
    );
}

#[test]
fn multi_student_batch_updates_each_enrollment() {
    let workspace = temp_dir("registrar-grade-multi");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(&mut stdin, &mut reader, "2", "classes.create", json!({ "name": "Biology" }));
    let class_id = class.get("classId").and_then(|v| v.as_str()).expect("classId");

    let mut enrollment_ids = Vec::new();
    for (i, (student_id, name)) in [("20240030", "Gina Alves"), ("20240031", "Hugo Costa")]
        .iter()
        .enumerate()
    {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("student-{}", i),
            "students.create",
            json!({ "studentId": student_id, "name": name }),
        );
        let enrollment = request_ok(
            &mut stdin,
            &mut reader,
            &format!("enroll-{}", i),
            "enrollments.create",
            json!({ "classId": class_id, "studentId": student_id }),
        );
        enrollment_ids.push(
            enrollment
                .get("enrollmentId")
                .and_then(|v| v.as_str())
                .expect("enrollmentId")
                .to_string(),
        );
    }

    let exam = request_ok(
        &mut stdin,
        &mut reader,
        "eval",
        "evaluations.create",
        json!({ "classId": class_id, "code": "EX", "weight": 100 }),
    );
    let exam_id = exam
        .get("evaluationId")
        .and_then(|v| v.as_str())
        .expect("evaluationId")
        .to_string();

    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "launch",
        "grades.launch",
        json!({
            "evaluationId": exam_id,
            "items": [
                { "studentId": "20240030", "grade": 8.5 },
                { "studentId": "20240031", "grade": 4.0, "note": "retake offered" }
            ]
        }),
    );
    assert_eq!(outcome.get("recorded").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(outcome.get("studentsUpdated").and_then(|v| v.as_u64()), Some(2));

    assert_eq!(
        grade_average(&mut stdin, &mut reader, "get-0", &enrollment_ids[0]),
        Some(8.5)
    );
    assert_eq!(
        grade_average(&mut stdin, &mut reader, "get-1", &enrollment_ids[1]),
        Some(4.0)
    );
}
