//! Error types for layersync-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ObjectId;

/// Errors from session and config persistence.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// Errors raised by a [`crate::document::Document`] implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("object {0} not found in document")]
    ObjectNotFound(ObjectId),

    #[error("layer #{0} not found in document")]
    LayerNotFound(usize),

    #[error("layer id '{0}' already exists")]
    DuplicateLayerId(String),

    #[error("invalid layer name '{0}'")]
    InvalidLayerName(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SessionError {
    SessionError::Io {
        path: path.into(),
        source,
    }
}
