use crate::ipc::error::{err, ok};
use crate::ipc::helpers::optional_str;
use crate::ipc::types::{AppState, Request};
use crate::scan::{ScanOutcome, ScanSession};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;

fn param_str<'a>(params: &'a serde_json::Value, key: &str) -> &'a str {
    params.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

fn handle_scan_start(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if state.scan.is_some() {
        return err(
            &req.id,
            "scan_active",
            "stop the current scanning session first",
            None,
        );
    }

    // Field validation lives in the session itself; empty kelas or mapel
    // must fail before anything else happens.
    let kelas = param_str(&req.params, "kelas");
    let mapel = param_str(&req.params, "mapel");
    let tanggal = optional_str(&req.params, "tanggal");
    let session = match ScanSession::start(kelas, mapel, tanggal.as_deref()) {
        Ok(s) => s,
        Err(e) => return err(&req.id, e.code, e.message, None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM kelas WHERE nama = ?", [&session.kelas], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "kelas not found", None);
    }

    let resp = json!({
        "sessionId": session.session_id,
        "kelas": session.kelas,
        "mapel": session.mapel,
        "tanggal": session.tanggal
    });
    state.scan = Some(session);
    ok(&req.id, resp)
}

fn handle_scan_stop(state: &mut AppState, req: &Request) -> serde_json::Value {
    // Unconditional Scanning -> Idle; stopping an idle daemon is a no-op,
    // matching the frontend's best-effort camera release.
    let was_scanning = state.scan.take().is_some();
    ok(&req.id, json!({ "stopped": was_scanning }))
}

fn handle_scan_decode(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(text) = req.params.get("text").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing text", None);
    };

    let AppState { db, scan, .. } = state;
    let Some(session) = scan.as_mut() else {
        return err(&req.id, "scan_not_active", "start a scanning session first", None);
    };
    let Some(conn) = db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match session.handle_decoded_text(text, Utc::now(), conn) {
        Ok(outcome) => {
            let mut result = json!({
                "outcome": outcome.kind(),
                "message": outcome.message()
            });
            match &outcome {
                ScanOutcome::Recorded { nomor, nama, mapel } => {
                    result["nomor"] = json!(nomor);
                    result["nama"] = json!(nama);
                    result["mapel"] = json!(mapel);
                }
                ScanOutcome::AlreadyRecorded { nomor, nama }
                | ScanOutcome::DuplicateScan { nomor, nama } => {
                    result["nomor"] = json!(nomor);
                    result["nama"] = json!(nama);
                }
                ScanOutcome::WrongKelas { payload_kelas, .. } => {
                    result["payloadKelas"] = json!(payload_kelas);
                }
                ScanOutcome::UnsupportedVersion { v } => {
                    result["version"] = json!(v);
                }
                ScanOutcome::InvalidPayload => {}
            }
            ok(&req.id, result)
        }
        Err(e) => {
            // Non-fatal: the decode loop keeps running with the session (and
            // its duplicate memory) intact.
            eprintln!("absensid: store failure during scan: {e:?}");
            err(&req.id, "store_failed", e.to_string(), None)
        }
    }
}

fn handle_scan_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    match state.scan.as_ref() {
        Some(s) => ok(
            &req.id,
            json!({
                "scanning": true,
                "sessionId": s.session_id,
                "kelas": s.kelas,
                "mapel": s.mapel,
                "tanggal": s.tanggal,
                "recentCount": s.memory().len()
            }),
        ),
        None => ok(&req.id, json!({ "scanning": false })),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scan.start" => Some(handle_scan_start(state, req)),
        "scan.stop" => Some(handle_scan_stop(state, req)),
        "scan.decode" => Some(handle_scan_decode(state, req)),
        "scan.status" => Some(handle_scan_status(state, req)),
        _ => None,
    }
}
