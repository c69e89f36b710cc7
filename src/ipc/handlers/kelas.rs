use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{SecondsFormat, Utc};
use rusqlite::OptionalExtension;
use serde_json::json;

fn handle_kelas_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "kelas": [] }));
    };

    let mut stmt = match conn.prepare("SELECT nama FROM kelas ORDER BY nama") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(names) => ok(&req.id, json!({ "kelas": names })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_kelas_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let nama = match req.params.get("nama").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing nama", None),
    };
    if nama.is_empty() {
        return err(&req.id, "bad_params", "nama must not be empty", None);
    }

    // Upsert: re-adding an existing class refreshes created_at but must not
    // disturb its roster or attendance children.
    let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    if let Err(e) = conn.execute(
        "INSERT INTO kelas(nama, created_at) VALUES(?, ?)
         ON CONFLICT(nama) DO UPDATE SET created_at = excluded.created_at",
        (&nama, &created_at),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "kelas" })),
        );
    }

    ok(&req.id, json!({ "kelas": nama }))
}

fn handle_kelas_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let nama = match req.params.get("nama").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing nama", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM kelas WHERE nama = ?", [&nama], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "kelas not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute("DELETE FROM absensi WHERE kelas = ?", [&nama]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "absensi" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM siswa WHERE kelas = ?", [&nama]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "siswa" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM kelas WHERE nama = ?", [&nama]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "kelas" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "kelas.list" => Some(handle_kelas_list(state, req)),
        "kelas.add" => Some(handle_kelas_add(state, req)),
        "kelas.delete" => Some(handle_kelas_delete(state, req)),
        _ => None,
    }
}
