use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::scan::ScanSession;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// `Some` is the Scanning state, `None` is Idle. The session owns the
    /// recent-scan memory, so stopping discards both together.
    pub scan: Option<ScanSession>,
}
