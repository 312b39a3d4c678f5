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

struct Roster {
    enrollment_id: String,
    session_ids: Vec<String>,
}

fn setup_roster(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
    session_dates: &[&str],
) -> Roster {
    let _ = request_ok(
        stdin,
        reader,
        "setup-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        stdin,
        reader,
        "setup-class",
        "classes.create",
        json!({ "name": "Algebra I" }),
    );
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let _ = request_ok(
        stdin,
        reader,
        "setup-student",
        "students.create",
        json!({ "studentId": "20240001", "name": "Ana Souza" }),
    );
    let enrollment = request_ok(
        stdin,
        reader,
        "setup-enrollment",
        "enrollments.create",
        json!({ "classId": class_id, "studentId": "20240001" }),
    );
    let enrollment_id = enrollment
        .get("enrollmentId")
        .and_then(|v| v.as_str())
        .expect("enrollmentId")
        .to_string();

    let mut session_ids = Vec::new();
    for (i, date) in session_dates.iter().enumerate() {
        let session = request_ok(
            stdin,
            reader,
            &format!("setup-session-{}", i),
            "sessions.create",
            json!({ "classId": class_id, "date": date }),
        );
        session_ids.push(
            session
                .get("sessionId")
                .and_then(|v| v.as_str())
                .expect("sessionId")
                .to_string(),
        );
    }

    Roster {
        enrollment_id,
        session_ids,
    }
}

fn attendance_percent(
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
    enrollment.get("attendancePercent").and_then(|v| v.as_f64())
}

#[test]
fn resubmitting_an_identical_batch_is_a_no_op() {
    let workspace = temp_dir("registrar-attendance-idem");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let roster = setup_roster(
        &mut stdin,
        &mut reader,
        &workspace,
        &["2024-03-04", "2024-03-11", "2024-03-18", "2024-03-25"],
    );

    let items: Vec<serde_json::Value> = roster
        .session_ids
        .iter()
        .enumerate()
        .map(|(i, session_id)| {
            json!({
                "sessionId": session_id,
                "enrollmentId": roster.enrollment_id,
                // Absent at the second session only.
                "present": i != 1,
            })
        })
        .collect();

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "bulk-1",
        "attendance.bulkRecord",
        json!({ "items": items, "actor": "prof.silva" }),
    );
    assert_eq!(first.get("recorded").and_then(|v| v.as_u64()), Some(4));
    assert_eq!(first.get("enrollmentsUpdated").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(first.get("auditEntries").and_then(|v| v.as_u64()), Some(4));

    // 3 of 4 sessions attended.
    assert_eq!(
        attendance_percent(&mut stdin, &mut reader, "get-1", &roster.enrollment_id),
        Some(75.0)
    );

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "bulk-2",
        "attendance.bulkRecord",
        json!({ "items": items, "actor": "prof.silva" }),
    );
    assert_eq!(second.get("recorded").and_then(|v| v.as_u64()), Some(4));
    assert_eq!(second.get("auditEntries").and_then(|v| v.as_u64()), Some(0));

    assert_eq!(
        attendance_percent(&mut stdin, &mut reader, "get-2", &roster.enrollment_id),
        Some(75.0)
    );

    // No audit entries beyond the first real change.
    let audit = request_ok(
        &mut stdin,
        &mut reader,
        "audit",
        "audit.list",
        json!({ "entityType": "attendance_record" }),
    );
    let entries = audit.get("entries").and_then(|v| v.as_array()).expect("entries");
    assert_eq!(entries.len(), 4);
}

#[test]
fn flipping_presence_emits_one_diff_entry() {
    let workspace = temp_dir("registrar-attendance-flip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let roster = setup_roster(
        &mut stdin,
        &mut reader,
        &workspace,
        &["2024-03-04", "2024-03-11"],
    );

    let present_everywhere: Vec<serde_json::Value> = roster
        .session_ids
        .iter()
        .map(|session_id| {
            json!({
                "sessionId": session_id,
                "enrollmentId": roster.enrollment_id,
                "present": true,
            })
        })
        .collect();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "bulk-1",
        "attendance.bulkRecord",
        json!({ "items": present_everywhere, "actor": "prof.silva" }),
    );
    assert_eq!(
        attendance_percent(&mut stdin, &mut reader, "get-1", &roster.enrollment_id),
        Some(100.0)
    );

    // Correction: the student was actually absent at the first session.
    let correction = json!([{
        "sessionId": roster.session_ids[0],
        "enrollmentId": roster.enrollment_id,
        "present": false,
        "justification": "medical certificate",
    }]);
    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "bulk-2",
        "attendance.bulkRecord",
        json!({ "items": correction, "actor": "prof.silva" }),
    );
    assert_eq!(outcome.get("auditEntries").and_then(|v| v.as_u64()), Some(1));

    assert_eq!(
        attendance_percent(&mut stdin, &mut reader, "get-2", &roster.enrollment_id),
        Some(50.0)
    );

    let audit = request_ok(
        &mut stdin,
        &mut reader,
        "audit",
        "audit.list",
        json!({
            "entityType": "attendance_record",
            "entityId": format!("{}:{}", roster.session_ids[0], roster.enrollment_id),
        }),
    );
    let entries = audit.get("entries").and_then(|v| v.as_array()).expect("entries");
    assert_eq!(entries.len(), 2);
    // Newest first: the correction carries the old/new presence pair.
    let flip = &entries[0];
    assert_eq!(flip.get("action").and_then(|v| v.as_str()), Some("attendance.updated"));
    assert_eq!(flip.get("oldValue").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(flip.get("newValue").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(flip.get("actor").and_then(|v| v.as_str()), Some("prof.silva"));
}
