use crate::ipc::error::{err, ok};
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Request};
use crate::scan::ScanPayload;
use rusqlite::OptionalExtension;
use serde_json::json;

/// The daemon side of the QR boundary: it produces the exact UTF-8 text the
/// frontend feeds to its QR renderer. Payload values always come from the
/// roster as it is right now, not from whatever an earlier printout said.
fn handle_qr_payload(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let kelas = match required_str(&req.params, "kelas") {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.message, None),
    };
    let nomor = match required_str(&req.params, "nomor") {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.message, None),
    };

    let nama: Option<String> = match conn
        .query_row(
            "SELECT nama FROM siswa WHERE kelas = ? AND nomor = ?",
            (&kelas, &nomor),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(nama) = nama else {
        return err(&req.id, "not_found", "siswa not found", None);
    };

    let payload = ScanPayload::for_siswa(&kelas, &nomor, &nama);
    let text = match serde_json::to_string(&payload) {
        Ok(t) => t,
        Err(e) => return err(&req.id, "encode_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "payload": payload,
            "text": text,
            "fileName": format!("{}-{}-{}.png", kelas, nomor, nama),
            "title": format!("{} • {} • {}", kelas, nomor, nama)
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "qr.payload" => Some(handle_qr_payload(state, req)),
        _ => None,
    }
}
