use crate::ipc::error::{err, ok};
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Request};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn kelas_exists(conn: &Connection, kelas: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM kelas WHERE nama = ?", [kelas], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}

fn handle_siswa_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let kelas = match required_str(&req.params, "kelas") {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.message, None),
    };

    let mut stmt = match conn
        .prepare("SELECT nomor, nama FROM siswa WHERE kelas = ? ORDER BY nomor")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&kelas], |row| {
            let nomor: String = row.get(0)?;
            let nama: String = row.get(1)?;
            Ok(json!({ "nomor": nomor, "nama": nama }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(siswa) => ok(&req.id, json!({ "kelas": kelas, "siswa": siswa })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_siswa_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let nama = match required_str(&req.params, "nama") {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.message, None),
    };

    match kelas_exists(conn, &kelas) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "kelas not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    // nomor is the storage key: writing the same nomor again replaces the
    // student's name rather than creating a second entry.
    let updated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    if let Err(e) = conn.execute(
        "INSERT INTO siswa(kelas, nomor, nama, updated_at) VALUES(?, ?, ?, ?)
         ON CONFLICT(kelas, nomor) DO UPDATE SET
           nama = excluded.nama,
           updated_at = excluded.updated_at",
        (&kelas, &nomor, &nama, &updated_at),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "siswa" })),
        );
    }

    ok(
        &req.id,
        json!({ "kelas": kelas, "nomor": nomor, "nama": nama }),
    )
}

fn handle_siswa_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let deleted = match conn.execute(
        "DELETE FROM siswa WHERE kelas = ? AND nomor = ?",
        (&kelas, &nomor),
    ) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "siswa" })),
            )
        }
    };
    if deleted == 0 {
        return err(&req.id, "not_found", "siswa not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "siswa.list" => Some(handle_siswa_list(state, req)),
        "siswa.upsert" => Some(handle_siswa_upsert(state, req)),
        "siswa.delete" => Some(handle_siswa_delete(state, req)),
        _ => None,
    }
}
