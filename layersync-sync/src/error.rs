//! Error types for layersync-sync.

use thiserror::Error;

use layersync_core::error::DocumentError;
use layersync_core::types::{RemoteId, StreamId};
use layersync_display::DisplayError;

/// Failures reported by a [`crate::remote::RemoteStreamService`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("stream {0} not found")]
    StreamNotFound(StreamId),

    #[error("object {0} not found")]
    ObjectNotFound(RemoteId),

    /// Transport or server failure; the request may succeed on retry.
    #[error("request failed: {0}")]
    Request(String),

    /// The notification feed was closed by the store.
    #[error("notification feed closed")]
    Closed,
}

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A call to the remote store failed.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The converted objects need more upload buckets than allowed.
    #[error("payload needs {buckets} buckets, more than the limit of {limit}")]
    PayloadTooLarge { buckets: usize, limit: usize },

    /// A toggle or bake referenced a layer id the stream does not have.
    #[error("layer {0} not found")]
    LayerNotFound(String),

    #[error("document error: {0}")]
    Document(#[from] DocumentError),

    #[error("display error: {0}")]
    Display(#[from] DisplayError),

    /// The geometry converter rejected an object.
    #[error("conversion failed: {0}")]
    Conversion(String),

    /// A stream reference that neither the cache nor the store could resolve.
    #[error("object {0} missing after fetch")]
    MissingObject(RemoteId),

    /// The store answered with a shape the engine cannot line up.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{0} is not supported for this client")]
    Unsupported(&'static str),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Whether the failed operation may succeed when retried unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Remote(RemoteError::Request(_)))
    }
}
