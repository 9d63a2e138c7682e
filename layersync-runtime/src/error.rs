use thiserror::Error;

use layersync_core::types::{ClientId, StreamId};

/// Error surface for the client store and the host command protocol.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("I/O error on {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("session error: {0}")]
    Session(#[from] layersync_core::SessionError),

    #[error("sync error: {0}")]
    Sync(#[from] layersync_sync::SyncError),

    #[error("remote error: {0}")]
    Remote(#[from] layersync_sync::RemoteError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("no client with id {0}")]
    ClientNotFound(ClientId),

    #[error("client {0} is not a {1}")]
    WrongRole(ClientId, &'static str),

    #[error("no sender attached to stream {0}")]
    StreamNotTracked(StreamId),
}

pub(crate) fn io_err(context: impl Into<String>, source: std::io::Error) -> RuntimeError {
    RuntimeError::Io {
        context: context.into(),
        source,
    }
}
