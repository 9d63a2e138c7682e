//! On-disk layout under the user's home directory.
//!
//! ```text
//! ~/.layersync/
//!   config.yaml               (optional SyncConfig overrides)
//!   sessions/
//!     <document>.yaml         (persisted clients of one document)
//! ```

use std::path::{Path, PathBuf};

use crate::error::SessionError;

pub const ROOT_DIR: &str = ".layersync";
pub const CONFIG_FILE: &str = "config.yaml";
pub const SESSIONS_DIR: &str = "sessions";

pub fn layersync_root(home: &Path) -> PathBuf {
    home.join(ROOT_DIR)
}

pub fn config_path(home: &Path) -> PathBuf {
    layersync_root(home).join(CONFIG_FILE)
}

pub fn sessions_dir(home: &Path) -> PathBuf {
    layersync_root(home).join(SESSIONS_DIR)
}

/// `<home>/.layersync/sessions/<document>.yaml`; pure, no I/O.
///
/// Characters that cannot appear in a file name are replaced by `_`.
pub fn session_path(home: &Path, document: &str) -> PathBuf {
    let file: String = document
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    sessions_dir(home).join(format!("{file}.yaml"))
}

pub(crate) fn home() -> Result<PathBuf, SessionError> {
    dirs::home_dir().ok_or(SessionError::HomeNotFound)
}
