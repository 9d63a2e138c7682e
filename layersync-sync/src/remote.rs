//! Remote stream service seam and the in-memory store.
//!
//! The engines only talk to the store through [`RemoteStreamService`].
//! Inbound notifications arrive as [`InboundMessage`]s on a per-client feed;
//! the `eventType` tag is validated once here and unknown types become
//! [`InboundEvent::Unrecognized`].

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use layersync_core::types::{ClientId, ClientRole, PortableObject, RemoteId, StreamId, StreamSnapshot};

use crate::error::RemoteError;

// ---------------------------------------------------------------------------
// Inbound messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    UpdateGlobal,
    UpdateMeta,
    UpdateName,
    UpdateObject,
    UpdateChildren,
    Unrecognized(String),
}

impl InboundEvent {
    pub fn parse(event_type: &str) -> Self {
        match event_type {
            "update-global" => InboundEvent::UpdateGlobal,
            "update-meta" => InboundEvent::UpdateMeta,
            "update-name" => InboundEvent::UpdateName,
            "update-object" => InboundEvent::UpdateObject,
            "update-children" => InboundEvent::UpdateChildren,
            other => InboundEvent::Unrecognized(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            InboundEvent::UpdateGlobal => "update-global",
            InboundEvent::UpdateMeta => "update-meta",
            InboundEvent::UpdateName => "update-name",
            InboundEvent::UpdateObject => "update-object",
            InboundEvent::UpdateChildren => "update-children",
            InboundEvent::Unrecognized(other) => other,
        }
    }
}

/// A notification pushed by the store to one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawMessage", into = "RawMessage")]
pub struct InboundMessage {
    pub event: InboundEvent,
    pub stream_id: StreamId,
    /// Client that caused the event, when the store relays a broadcast.
    pub sender_id: Option<ClientId>,
    pub args: Value,
}

impl InboundMessage {
    pub fn new(event: InboundEvent, stream_id: StreamId) -> Self {
        Self {
            event,
            stream_id,
            sender_id: None,
            args: Value::Null,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    event_type: String,
    stream_id: StreamId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sender_id: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    args: Value,
}

impl From<RawMessage> for InboundMessage {
    fn from(raw: RawMessage) -> Self {
        Self {
            event: InboundEvent::parse(&raw.event_type),
            stream_id: raw.stream_id,
            sender_id: raw.sender_id,
            args: raw.args,
        }
    }
}

impl From<InboundMessage> for RawMessage {
    fn from(message: InboundMessage) -> Self {
        Self {
            event_type: message.event.as_str().to_string(),
            stream_id: message.stream_id,
            sender_id: message.sender_id,
            args: message.args,
        }
    }
}

pub type MessageFeed = mpsc::UnboundedReceiver<InboundMessage>;

// ---------------------------------------------------------------------------
// Service trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RemoteStreamService: Send + Sync {
    /// Base URL recorded in persisted client handles.
    fn server_url(&self) -> String;

    async fn create_stream(&self, name: &str) -> Result<StreamSnapshot, RemoteError>;

    /// Register a client instance on a stream.
    async fn register_client(
        &self,
        stream_id: &StreamId,
        role: ClientRole,
    ) -> Result<ClientId, RemoteError>;

    async fn get_stream(&self, stream_id: &StreamId) -> Result<StreamSnapshot, RemoteError>;

    /// Replace the stream metadata. Returns the remote ids the store
    /// assigned to the stream's objects, in order; empty when the store
    /// keeps the ids it was given.
    async fn update_stream(&self, snapshot: &StreamSnapshot) -> Result<Vec<RemoteId>, RemoteError>;

    /// Store one bucket. Returns one remote id per object, in bucket order.
    async fn create_objects(&self, objects: &[PortableObject]) -> Result<Vec<RemoteId>, RemoteError>;

    /// Fetch objects by remote id, in request order, dropping the `omit`
    /// fields from their bodies.
    async fn get_objects(
        &self,
        ids: &[RemoteId],
        omit: &[String],
    ) -> Result<Vec<PortableObject>, RemoteError>;

    /// Relay a message to every other client subscribed to the stream.
    async fn broadcast(
        &self,
        stream_id: &StreamId,
        from: &ClientId,
        message: InboundMessage,
    ) -> Result<(), RemoteError>;

    /// Open the client's inbound notification feed.
    async fn subscribe(&self, stream_id: &StreamId, client: &ClientId) -> Result<MessageFeed, RemoteError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Remote operations that can be told to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    CreateStream,
    GetStream,
    UpdateStream,
    CreateObjects,
    GetObjects,
    Broadcast,
}

/// Calls observed by the in-memory store.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    /// Every bucket passed to `create_objects`, in call order.
    pub created: Vec<Vec<PortableObject>>,
    /// Every id list passed to `get_objects`, in call order.
    pub fetched: Vec<Vec<RemoteId>>,
    pub stream_updates: usize,
    pub broadcasts: Vec<(StreamId, InboundMessage)>,
}

#[derive(Debug, Default)]
struct StoreState {
    streams: HashMap<StreamId, StreamSnapshot>,
    objects: HashMap<RemoteId, PortableObject>,
    subscribers: Vec<(StreamId, ClientId, mpsc::UnboundedSender<InboundMessage>)>,
    next_stream: u64,
    next_object: u64,
    next_client: u64,
    fail_once: HashSet<RemoteOp>,
    calls: CallLog,
}

impl StoreState {
    fn check(&mut self, op: RemoteOp) -> Result<(), RemoteError> {
        if self.fail_once.remove(&op) {
            return Err(RemoteError::Request(format!("injected {op:?} failure")));
        }
        Ok(())
    }
}

/// In-process [`RemoteStreamService`] used by tests and loopback setups.
#[derive(Debug, Default)]
pub struct MemoryStreamService {
    state: Mutex<StoreState>,
}

impl MemoryStreamService {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next call of `op` fail with a transient error.
    pub fn fail_next(&self, op: RemoteOp) {
        self.state().fail_once.insert(op);
    }

    pub fn calls(&self) -> CallLog {
        self.state().calls.clone()
    }

    pub fn stored_object(&self, id: &RemoteId) -> Option<PortableObject> {
        self.state().objects.get(id).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.state().objects.len()
    }

    /// Push a stream as if another client had written it.
    pub fn put_stream(&self, snapshot: StreamSnapshot) {
        self.state().streams.insert(snapshot.stream_id.clone(), snapshot);
    }

    /// Store an object under a chosen id, as if another client uploaded it.
    pub fn put_object(&self, id: RemoteId, mut object: PortableObject) {
        object.remote_id = Some(id.clone());
        self.state().objects.insert(id, object);
    }

    /// Deliver a message to every subscriber of the stream.
    pub fn push(&self, message: InboundMessage) -> usize {
        let mut state = self.state();
        state.subscribers.retain(|(_, _, tx)| !tx.is_closed());
        state
            .subscribers
            .iter()
            .filter(|(stream, _, _)| stream == &message.stream_id)
            .filter(|(_, _, tx)| tx.send(message.clone()).is_ok())
            .count()
    }
}

#[async_trait]
impl RemoteStreamService for MemoryStreamService {
    fn server_url(&self) -> String {
        "memory://local".to_string()
    }

    async fn create_stream(&self, name: &str) -> Result<StreamSnapshot, RemoteError> {
        let mut state = self.state();
        state.check(RemoteOp::CreateStream)?;
        state.next_stream += 1;
        let snapshot = StreamSnapshot::new(StreamId(format!("stream-{:04}", state.next_stream)), name);
        state.streams.insert(snapshot.stream_id.clone(), snapshot.clone());
        Ok(snapshot)
    }

    async fn register_client(
        &self,
        stream_id: &StreamId,
        role: ClientRole,
    ) -> Result<ClientId, RemoteError> {
        let mut state = self.state();
        if !state.streams.contains_key(stream_id) {
            return Err(RemoteError::StreamNotFound(stream_id.clone()));
        }
        state.next_client += 1;
        Ok(ClientId(format!("{role}-{:04}", state.next_client)))
    }

    async fn get_stream(&self, stream_id: &StreamId) -> Result<StreamSnapshot, RemoteError> {
        let mut state = self.state();
        state.check(RemoteOp::GetStream)?;
        state
            .streams
            .get(stream_id)
            .cloned()
            .ok_or_else(|| RemoteError::StreamNotFound(stream_id.clone()))
    }

    async fn update_stream(&self, snapshot: &StreamSnapshot) -> Result<Vec<RemoteId>, RemoteError> {
        let mut state = self.state();
        state.check(RemoteOp::UpdateStream)?;
        if !state.streams.contains_key(&snapshot.stream_id) {
            return Err(RemoteError::StreamNotFound(snapshot.stream_id.clone()));
        }
        state.calls.stream_updates += 1;
        state.streams.insert(snapshot.stream_id.clone(), snapshot.clone());
        Ok(snapshot.objects.iter().map(|o| o.remote_id.clone()).collect())
    }

    async fn create_objects(&self, objects: &[PortableObject]) -> Result<Vec<RemoteId>, RemoteError> {
        let mut state = self.state();
        state.check(RemoteOp::CreateObjects)?;
        state.calls.created.push(objects.to_vec());
        let mut ids = Vec::with_capacity(objects.len());
        for object in objects {
            if object.is_placeholder() {
                let id = object.remote_id.clone().ok_or_else(|| {
                    RemoteError::Request("placeholder without a remote id".to_string())
                })?;
                ids.push(id);
                continue;
            }
            state.next_object += 1;
            let id = RemoteId(format!("obj-{:06}", state.next_object));
            let mut stored = object.clone();
            stored.remote_id = Some(id.clone());
            state.objects.insert(id.clone(), stored);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn get_objects(
        &self,
        ids: &[RemoteId],
        omit: &[String],
    ) -> Result<Vec<PortableObject>, RemoteError> {
        let mut state = self.state();
        state.check(RemoteOp::GetObjects)?;
        state.calls.fetched.push(ids.to_vec());
        ids.iter()
            .map(|id| {
                let mut object = state
                    .objects
                    .get(id)
                    .cloned()
                    .ok_or_else(|| RemoteError::ObjectNotFound(id.clone()))?;
                if let Some(body) = object.body.as_object_mut() {
                    for field in omit {
                        body.remove(field);
                    }
                }
                Ok(object)
            })
            .collect()
    }

    async fn broadcast(
        &self,
        stream_id: &StreamId,
        from: &ClientId,
        mut message: InboundMessage,
    ) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.check(RemoteOp::Broadcast)?;
        message.sender_id = Some(from.clone());
        state.calls.broadcasts.push((stream_id.clone(), message.clone()));
        state.subscribers.retain(|(_, _, tx)| !tx.is_closed());
        for (stream, client, tx) in &state.subscribers {
            if stream == stream_id && client != from {
                let _ = tx.send(message.clone());
            }
        }
        Ok(())
    }

    async fn subscribe(&self, stream_id: &StreamId, client: &ClientId) -> Result<MessageFeed, RemoteError> {
        let mut state = self.state();
        if !state.streams.contains_key(stream_id) {
            return Err(RemoteError::StreamNotFound(stream_id.clone()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.push((stream_id.clone(), client.clone(), tx));
        Ok(rx)
    }
}
