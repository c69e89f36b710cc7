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
    let exe = env!("CARGO_BIN_EXE_absensid");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn absensid");
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

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .pointer("/error/code")
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

fn siswa_names(result: &serde_json::Value) -> Vec<(String, String)> {
    result
        .get("siswa")
        .and_then(|v| v.as_array())
        .expect("siswa array")
        .iter()
        .map(|s| {
            (
                s.get("nomor").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                s.get("nama").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            )
        })
        .collect()
}

#[test]
fn roster_crud_roundtrip_with_upsert_semantics() {
    let workspace = temp_dir("absensi-roster");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    // Before a workspace is selected, class listing is just empty while
    // writes are refused.
    let empty = request_ok(&mut stdin, &mut reader, "1", "kelas.list", json!({}));
    assert_eq!(empty.get("kelas"), Some(&json!([])));
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "2",
        "siswa.upsert",
        json!({ "kelas": "X-A", "nomor": "05", "nama": "Rini" }),
    );
    assert_eq!(code, "no_workspace");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let code = request_err_code(&mut stdin, &mut reader, "4", "kelas.add", json!({ "nama": "  " }));
    assert_eq!(code, "bad_params");

    let _ = request_ok(&mut stdin, &mut reader, "5", "kelas.add", json!({ "nama": "X-A" }));
    let _ = request_ok(&mut stdin, &mut reader, "6", "kelas.add", json!({ "nama": "X-B" }));
    let listed = request_ok(&mut stdin, &mut reader, "7", "kelas.list", json!({}));
    assert_eq!(listed.get("kelas"), Some(&json!(["X-A", "X-B"])));

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "8",
        "siswa.upsert",
        json!({ "kelas": "XII-Z", "nomor": "05", "nama": "Rini" }),
    );
    assert_eq!(code, "not_found");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "siswa.upsert",
        json!({ "kelas": "X-A", "nomor": "05", "nama": "Rini" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "siswa.upsert",
        json!({ "kelas": "X-A", "nomor": "02", "nama": "Budi" }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "siswa.list",
        json!({ "kelas": "X-A" }),
    );
    assert_eq!(
        siswa_names(&listed),
        vec![
            ("02".to_string(), "Budi".to_string()),
            ("05".to_string(), "Rini".to_string())
        ]
    );

    // Same nomor replaces the name instead of adding a row.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "siswa.upsert",
        json!({ "kelas": "X-A", "nomor": "05", "nama": "Rini Baru" }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "siswa.list",
        json!({ "kelas": "X-A" }),
    );
    assert_eq!(
        siswa_names(&listed),
        vec![
            ("02".to_string(), "Budi".to_string()),
            ("05".to_string(), "Rini Baru".to_string())
        ]
    );

    // Re-adding a class must not disturb its roster.
    let _ = request_ok(&mut stdin, &mut reader, "14", "kelas.add", json!({ "nama": "X-A" }));
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "siswa.list",
        json!({ "kelas": "X-A" }),
    );
    assert_eq!(siswa_names(&listed).len(), 2);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "siswa.delete",
        json!({ "kelas": "X-A", "nomor": "02" }),
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "17",
        "siswa.delete",
        json!({ "kelas": "X-A", "nomor": "02" }),
    );
    assert_eq!(code, "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn deleting_a_kelas_cascades_to_roster_and_attendance() {
    let workspace = temp_dir("absensi-cascade");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "kelas.add", json!({ "nama": "X-A" }));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "siswa.upsert",
        json!({ "kelas": "X-A", "nomor": "05", "nama": "Rini" }),
    );

    // Record one attendance through the real pipeline.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "scan.start",
        json!({ "kelas": "X-A", "mapel": "Matematika", "tanggal": "2024-05-01" }),
    );
    let recorded = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "scan.decode",
        json!({ "text": r#"{"v":1,"jenis":"absensi-siswa","kelas":"X-A","nomor":"05","nama":"Rini","uid":"X-A|05"}"# }),
    );
    assert_eq!(
        recorded.get("outcome").and_then(|v| v.as_str()),
        Some("recorded")
    );
    let _ = request_ok(&mut stdin, &mut reader, "6", "scan.stop", json!({}));

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "7",
        "kelas.delete",
        json!({ "nama": "XII-Z" }),
    );
    assert_eq!(code, "not_found");

    let _ = request_ok(&mut stdin, &mut reader, "8", "kelas.delete", json!({ "nama": "X-A" }));

    let listed = request_ok(&mut stdin, &mut reader, "9", "kelas.list", json!({}));
    assert_eq!(listed.get("kelas"), Some(&json!([])));
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "siswa.list",
        json!({ "kelas": "X-A" }),
    );
    assert!(siswa_names(&listed).is_empty());
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "11",
        "rekap.build",
        json!({ "kelas": "X-A", "tanggal": "2024-05-01" }),
    );
    assert_eq!(code, "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
