//! layersync core library: domain types, document abstraction, persistence.
//!
//! - [`types`]: stream payloads, ids, client state
//! - [`document`]: the document-context handle and its event source
//! - [`memory`]: in-memory document used by tests and loopback setups
//! - [`config`]: [`SyncConfig`] tunables
//! - [`session`]: per-document client persistence
//! - [`error`]: [`SessionError`], [`DocumentError`]

pub mod config;
pub mod document;
pub mod error;
pub mod memory;
pub mod paths;
pub mod session;
pub mod types;

pub use config::SyncConfig;
pub use document::{
    Document, DocumentEvent, DocumentEventSource, DocumentObject, DocumentSettings, Geometry,
    Layer, NewLayer, ObjectAttributes, Subscription, TrackingTag,
};
pub use error::{DocumentError, SessionError};
pub use memory::MemoryDocument;
pub use types::{
    BaseProperties, ClientHandle, ClientId, ClientRole, ClientSnapshot, Color, ContentHash,
    LayerColor, LayerDescriptor, ObjectId, ObjectRef, PortableObject, RemoteId, StreamId,
    StreamSnapshot, SyncState, LAYER_PATH_SEPARATOR,
};
