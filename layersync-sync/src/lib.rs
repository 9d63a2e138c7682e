//! # layersync-sync
//!
//! Bidirectional sync between a document and a remote stream.
//!
//! - [`sender::SenderEngine`] pushes tracked objects: convert, dedupe
//!   through the shared [`cache::ObjectCache`], bucket, upload, publish.
//! - [`receiver::ReceiverEngine`] pulls only uncached objects and feeds the
//!   display list; [`bake`] materializes a stream into the layer tree.
//! - [`tracker::ChangeTracker`] and [`debounce::DebounceScheduler`] turn
//!   bursts of document events into single sender cycles.

pub mod bake;
pub mod bucket;
pub mod cache;
pub mod context;
pub mod convert;
pub mod debounce;
pub mod error;
pub mod gate;
pub mod hash;
pub mod layers;
pub mod notify;
pub mod receiver;
pub mod remote;
pub mod sender;
pub mod tracker;

pub use cache::{CacheEntry, ObjectCache};
pub use context::EngineContext;
pub use convert::{GeometryConverter, JsonConverter};
pub use debounce::DebounceScheduler;
pub use error::{RemoteError, SyncError};
pub use notify::{ChannelNotifier, Notification, NotificationKind, Notifier, TracingNotifier};
pub use receiver::{MessageOutcome, PullReport, ReceiverEngine};
pub use remote::{InboundEvent, InboundMessage, MemoryStreamService, RemoteStreamService};
pub use sender::{CycleReport, SenderEngine, TriggerOutcome};
pub use tracker::{ChangeSignal, ChangeTracker};
