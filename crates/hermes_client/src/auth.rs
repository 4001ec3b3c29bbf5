//! Persisted login state (`~/.hermes/session.json`): access token and user object.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::api::LoginResponse;
use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    #[serde(default)]
    pub user: serde_json::Value,
}

impl From<LoginResponse> for Credentials {
    fn from(r: LoginResponse) -> Self {
        Self {
            access_token: r.access_token,
            user: r.user,
        }
    }
}

pub fn default_credentials_path() -> Option<PathBuf> {
    crate::config::hermes_dir().map(|d| d.join("session.json"))
}

/// Returns `None` when nobody is logged in.
pub fn load_credentials(path: &Path) -> Result<Option<Credentials>, ClientError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&contents)?))
}

pub fn save_credentials(path: &Path, credentials: &Credentials) -> Result<(), ClientError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, serde_json::to_string_pretty(credentials)?)?;
    Ok(())
}

/// Remove stored credentials. Safe to call when none exist.
pub fn clear_credentials(path: &Path) -> Result<(), ClientError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
