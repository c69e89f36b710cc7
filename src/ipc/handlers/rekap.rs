use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::rekap;
use crate::scan::today_local;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::PathBuf;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

struct RekapScope {
    kelas: String,
    tanggal: String,
    mapel: Option<String>,
}

fn parse_scope(conn: &Connection, params: &serde_json::Value) -> Result<RekapScope, HandlerErr> {
    let kelas = required_str(params, "kelas").map_err(|e| HandlerErr {
        code: "bad_params",
        message: e.message,
        details: None,
    })?;
    let tanggal = optional_str(params, "tanggal").unwrap_or_else(today_local);
    let mapel = optional_str(params, "mapel");

    let exists = conn
        .query_row("SELECT 1 FROM kelas WHERE nama = ?", [&kelas], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?
        .is_some();
    if !exists {
        return Err(HandlerErr {
            code: "not_found",
            message: "kelas not found".to_string(),
            details: None,
        });
    }

    Ok(RekapScope {
        kelas,
        tanggal,
        mapel,
    })
}

fn build_rows(conn: &Connection, scope: &RekapScope) -> Result<Vec<rekap::RekapRow>, HandlerErr> {
    rekap::build_rekap(conn, &scope.kelas, &scope.tanggal, scope.mapel.as_deref()).map_err(|e| {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    })
}

fn handle_rekap_build(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let scope = match parse_scope(conn, &req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let rows = match build_rows(conn, &scope) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    ok(
        &req.id,
        json!({
            "kelas": scope.kelas,
            "tanggal": scope.tanggal,
            "mapel": scope.mapel,
            "rowCount": rows.len(),
            "rows": rows
        }),
    )
}

fn write_text_file(path: &str, contents: &str) -> Result<(), HandlerErr> {
    let out = PathBuf::from(path);
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HandlerErr {
            code: "export_failed",
            message: e.to_string(),
            details: Some(json!({ "path": path })),
        })?;
    }
    std::fs::write(&out, contents).map_err(|e| HandlerErr {
        code: "export_failed",
        message: e.to_string(),
        details: Some(json!({ "path": path })),
    })?;
    Ok(())
}

fn handle_rekap_export_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let out_path = match required_str(&req.params, "outPath") {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.message, None),
    };
    let scope = match parse_scope(conn, &req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let rows = match build_rows(conn, &scope) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let csv = rekap::rekap_to_csv(&rows);
    if let Err(e) = write_text_file(&out_path, &csv) {
        return e.response(&req.id);
    }

    ok(
        &req.id,
        json!({
            "ok": true,
            "rowsExported": rows.len(),
            "path": out_path,
            "fileName": rekap::export_file_name(&scope.kelas, &scope.tanggal, scope.mapel.as_deref())
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "rekap.build" => Some(handle_rekap_build(state, req)),
        "rekap.exportCsv" => Some(handle_rekap_export_csv(state, req)),
        _ => None,
    }
}
