//! Per-document session persistence.
//!
//! A session file lists the clients attached to one document so they can be
//! reconnected when the document is reopened. Only the client handle and
//! the `paused`/`visible` flags are stored; live connections, timers and
//! subscriptions are re-established on restore.
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home, used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, SessionError};
use crate::paths::{self, session_path};
use crate::types::ClientSnapshot;

pub const SESSION_VERSION: u32 = 1;

/// On-disk session payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFile {
    pub version: u32,
    pub document: String,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub clients: Vec<ClientSnapshot>,
}

impl SessionFile {
    pub fn new(document: impl Into<String>, clients: Vec<ClientSnapshot>) -> Self {
        Self {
            version: SESSION_VERSION,
            document: document.into(),
            saved_at: Utc::now(),
            clients,
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Load the session for `document`.
///
/// Returns an empty session if none was saved yet.
pub fn load_at(home: &Path, document: &str) -> Result<SessionFile, SessionError> {
    let path = session_path(home, document);
    if !path.exists() {
        return Ok(SessionFile::new(document, Vec::new()));
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_yaml::from_str(&contents).map_err(|source| SessionError::Parse { path, source })
}

/// `load_at` convenience wrapper.
pub fn load(document: &str) -> Result<SessionFile, SessionError> {
    load_at(&paths::home()?, document)
}

/// Every saved session, sorted by document name.
pub fn list_at(home: &Path) -> Result<Vec<SessionFile>, SessionError> {
    let dir = paths::sessions_dir(home);
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut entries: Vec<_> = std::fs::read_dir(&dir)
        .map_err(|e| io_err(&dir, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".yaml"))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut sessions = Vec::new();
    for entry in entries {
        let path = entry.path();
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let session: SessionFile = serde_yaml::from_str(&contents)
            .map_err(|source| SessionError::Parse { path, source })?;
        sessions.push(session);
    }
    sessions.sort_by(|a, b| a.document.cmp(&b.document));
    Ok(sessions)
}

/// `list_at` convenience wrapper.
pub fn list() -> Result<Vec<SessionFile>, SessionError> {
    list_at(&paths::home()?)
}

// ---------------------------------------------------------------------------
// Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save a session.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, session: &SessionFile) -> Result<(), SessionError> {
    let path = session_path(home, &session.document);
    let Some(dir) = path.parent() else {
        return Err(io_err(
            path,
            std::io::Error::other("invalid session path"),
        ));
    };
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        set_dir_permissions(dir)?;
    }

    let yaml = serde_yaml::to_string(session)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(session: &SessionFile) -> Result<(), SessionError> {
    save_at(&paths::home()?, session)
}

/// Remove a document's session file; missing files are not an error.
pub fn remove_at(home: &Path, document: &str) -> Result<(), SessionError> {
    let path = session_path(home, document);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(&path, e)),
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), SessionError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), SessionError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), SessionError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), SessionError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClientHandle, ClientId, ClientRole, StreamId};
    use tempfile::TempDir;

    fn snapshot(id: &str, role: ClientRole, paused: bool) -> ClientSnapshot {
        ClientSnapshot {
            client: ClientHandle {
                client_id: ClientId::from(id),
                stream_id: StreamId::from(format!("stream-{id}")),
                role,
                server_url: "https://streams.example/api".to_string(),
            },
            paused,
            visible: !paused,
        }
    }

    #[test]
    fn empty_session_when_file_missing() {
        let home = TempDir::new().unwrap();
        let session = load_at(home.path(), "tower.3dm").unwrap();
        assert!(session.clients.is_empty());
        assert_eq!(session.document, "tower.3dm");
    }

    #[test]
    fn save_and_load_roundtrip_keeps_flags() {
        let home = TempDir::new().unwrap();
        let session = SessionFile::new(
            "tower.3dm",
            vec![
                snapshot("a", ClientRole::Sender, false),
                snapshot("b", ClientRole::Receiver, true),
            ],
        );
        save_at(home.path(), &session).unwrap();

        let loaded = load_at(home.path(), "tower.3dm").unwrap();
        assert_eq!(loaded.clients, session.clients);
        assert!(loaded.clients[1].paused);
        assert!(!loaded.clients[1].visible);
    }

    #[test]
    fn tmp_file_cleaned_up_after_save() {
        let home = TempDir::new().unwrap();
        save_at(home.path(), &SessionFile::new("clean", vec![])).unwrap();
        let tmp = session_path(home.path(), "clean").with_extension("yaml.tmp");
        assert!(!tmp.exists(), "tmp file should be removed after atomic rename");
    }

    #[test]
    fn list_returns_sessions_sorted_by_document() {
        let home = TempDir::new().unwrap();
        save_at(home.path(), &SessionFile::new("zeta", vec![])).unwrap();
        save_at(
            home.path(),
            &SessionFile::new("alpha", vec![snapshot("a", ClientRole::Sender, false)]),
        )
        .unwrap();

        let sessions = list_at(home.path()).unwrap();
        let names: Vec<_> = sessions.iter().map(|s| s.document.as_str()).collect();
        assert_eq!(names, ["alpha", "zeta"]);
        assert_eq!(sessions[0].clients.len(), 1);
    }

    #[test]
    fn malformed_session_reports_parse_error() {
        let home = TempDir::new().unwrap();
        let path = session_path(home.path(), "broken");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "version: [").unwrap();

        let err = load_at(home.path(), "broken").unwrap_err();
        assert!(matches!(err, SessionError::Parse { .. }));
    }

    #[test]
    fn remove_missing_session_is_ok() {
        let home = TempDir::new().unwrap();
        remove_at(home.path(), "never-saved").unwrap();
    }

    #[test]
    #[cfg(unix)]
    fn session_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let home = TempDir::new().unwrap();
        save_at(home.path(), &SessionFile::new("private", vec![])).unwrap();
        let mode = std::fs::metadata(session_path(home.path(), "private"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }
}
