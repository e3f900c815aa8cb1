use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::session::WritingSession;

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
    /// At most one active writing session (one student x one template).
    pub session: Option<WritingSession>,
}
