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
    let exe = env!("CARGO_BIN_EXE_parishd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn parishd");
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
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn result_of(value: &serde_json::Value) -> &serde_json::Value {
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "request failed: {}",
        value
    );
    value.get("result").expect("result")
}

#[test]
fn attendance_matrix_renders_tri_state_cells_in_roster_order() {
    let workspace = temp_dir("parishd-attendance-matrix");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    result_of(&resp);
    let class = request(
        &mut stdin,
        &mut reader,
        "class",
        "classes.create",
        json!({ "name": "Thiếu Nhi 2B" }),
    );
    let class_id = result_of(&class)
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let mut student_ids = Vec::new();
    for (i, name) in ["Nguyễn Văn An", "Trần Thị Bé"].iter().enumerate() {
        let created = request(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "students.create",
            json!({ "classId": class_id, "fullName": name }),
        );
        student_ids.push(
            result_of(&created)
                .get("studentId")
                .and_then(|v| v.as_str())
                .expect("studentId")
                .to_string(),
        );
    }

    // An: present on the 7th; Bé: absent on the 14th. Nothing else recorded.
    let resp = request(
        &mut stdin,
        &mut reader,
        "a1",
        "attendance.setDay",
        json!({
            "classId": class_id,
            "studentId": student_ids[0],
            "date": "2025-09-07",
            "status": "present"
        }),
    );
    result_of(&resp);
    let resp = request(
        &mut stdin,
        &mut reader,
        "a2",
        "attendance.setDay",
        json!({
            "classId": class_id,
            "studentId": student_ids[1],
            "date": "2025-09-14",
            "status": "absent"
        }),
    );
    result_of(&resp);

    let resp = request(
        &mut stdin,
        &mut reader,
        "matrix",
        "reports.attendanceMatrix",
        json!({ "classId": class_id }),
    );
    let matrix = result_of(&resp).get("matrix").expect("matrix").clone();

    let dates: Vec<&str> = matrix["dates"]
        .as_array()
        .expect("dates")
        .iter()
        .map(|d| d.as_str().expect("date"))
        .collect();
    assert_eq!(dates, vec!["2025-09-07", "2025-09-14"]);

    let rows = matrix["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["givenName"].as_str(), Some("An"));
    assert_eq!(rows[0]["familyName"].as_str(), Some("Nguyễn Văn"));
    assert_eq!(rows[0]["cells"][0].as_str(), Some("✓"));
    assert_eq!(rows[0]["cells"][1].as_str(), Some(""));
    assert_eq!(rows[1]["cells"][0].as_str(), Some(""));
    assert_eq!(rows[1]["cells"][1].as_str(), Some("x"));

    // Clipping the range drops the out-of-range column entirely.
    let resp = request(
        &mut stdin,
        &mut reader,
        "clipped",
        "reports.attendanceMatrix",
        json!({
            "classId": class_id,
            "dateFrom": "2025-09-10",
            "dateTo": "2025-09-30"
        }),
    );
    let matrix = result_of(&resp).get("matrix").expect("matrix").clone();
    assert_eq!(matrix["dates"].as_array().map(|d| d.len()), Some(1));
    assert_eq!(matrix["rows"][0]["cells"][0].as_str(), Some(""));
    assert_eq!(matrix["rows"][1]["cells"][0].as_str(), Some("x"));

    // Clearing a mark returns the cell to blank, not absent.
    let resp = request(
        &mut stdin,
        &mut reader,
        "clear",
        "attendance.setDay",
        json!({
            "classId": class_id,
            "studentId": student_ids[1],
            "date": "2025-09-14",
            "status": null
        }),
    );
    result_of(&resp);
    let resp = request(
        &mut stdin,
        &mut reader,
        "matrix2",
        "reports.attendanceMatrix",
        json!({ "classId": class_id }),
    );
    let matrix = result_of(&resp).get("matrix").expect("matrix").clone();
    assert_eq!(matrix["dates"].as_array().map(|d| d.len()), Some(1));

    let resp = request(
        &mut stdin,
        &mut reader,
        "baddate",
        "attendance.setDay",
        json!({
            "classId": class_id,
            "studentId": student_ids[0],
            "date": "07/09/2025",
            "status": "present"
        }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp["error"]["code"].as_str(),
        Some("bad_params"),
        "non ISO dates must be rejected"
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn attendance_progress_expands_counters_to_prefix_cells() {
    let workspace = temp_dir("parishd-attendance-progress");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    result_of(&resp);
    let resp = request(
        &mut stdin,
        &mut reader,
        "year",
        "schoolYears.create",
        json!({ "name": "2025-2026", "totalWeeks": 5, "isCurrent": true }),
    );
    result_of(&resp);
    let created = request(
        &mut stdin,
        &mut reader,
        "s1",
        "students.create",
        json!({ "fullName": "Lê Văn Cường" }),
    );
    let student_id = result_of(&created)
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();
    let resp = request(
        &mut stdin,
        &mut reader,
        "patch",
        "students.update",
        json!({ "studentId": student_id, "patch": { "attendanceThu5": 3 } }),
    );
    result_of(&resp);

    let resp = request(
        &mut stdin,
        &mut reader,
        "progress",
        "reports.attendanceProgress",
        json!({ "studentId": student_id }),
    );
    let result = result_of(&resp);
    assert_eq!(result["totalWeeks"].as_i64(), Some(5));
    let cells = result["thu5Cells"].as_array().expect("thu5Cells");
    assert_eq!(cells.len(), 5);
    let attended: Vec<bool> = cells
        .iter()
        .map(|c| c["attended"].as_bool().expect("attended"))
        .collect();
    assert_eq!(attended, vec![true, true, true, false, false]);
    // No Sunday sessions recorded: the whole strip is unattended.
    let cn: Vec<bool> = result["cnCells"]
        .as_array()
        .expect("cnCells")
        .iter()
        .map(|c| c["attended"].as_bool().expect("attended"))
        .collect();
    assert_eq!(cn, vec![false; 5]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
