//! Registry of live clients attached to one document.
//!
//! The store owns every engine and the glue between them and the outside
//! world: document events reach sender trackers, debounce expirations reach
//! sender cycles, and each receiver gets a task draining its remote feed.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use layersync_core::document::DocumentEventSource;
use layersync_core::session::{self, SessionFile};
use layersync_core::types::{
    ClientHandle, ClientId, ClientRole, ClientSnapshot, ObjectId, StreamId, SyncState,
};
use layersync_sync::remote::MessageFeed;
use layersync_sync::{
    ChangeTracker, DebounceScheduler, EngineContext, MessageOutcome, ReceiverEngine, SenderEngine,
    TriggerOutcome,
};

use crate::error::RuntimeError;
use crate::protocol::HostCommand;

struct ReceiverSlot {
    engine: Arc<ReceiverEngine>,
    feed: JoinHandle<()>,
}

/// One row of `list-clients`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientSummary {
    pub client: ClientHandle,
    pub paused: bool,
    pub visible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<SyncState>,
    /// Tracked objects for a sender, displayed objects for a receiver.
    pub objects: usize,
}

pub struct ClientStore {
    ctx: EngineContext,
    events: Arc<dyn DocumentEventSource>,
    scheduler: DebounceScheduler,
    senders: RwLock<HashMap<ClientId, Arc<SenderEngine>>>,
    receivers: RwLock<HashMap<ClientId, ReceiverSlot>>,
}

impl ClientStore {
    pub fn new(
        ctx: EngineContext,
        events: Arc<dyn DocumentEventSource>,
        scheduler: DebounceScheduler,
    ) -> Self {
        Self {
            ctx,
            events,
            scheduler,
            senders: RwLock::new(HashMap::new()),
            receivers: RwLock::new(HashMap::new()),
        }
    }

    pub fn document_name(&self) -> String {
        self.ctx.document.name()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Create a stream named `name`, track `objects` on it and arm its timer.
    pub async fn add_sender(
        &self,
        name: &str,
        objects: &[ObjectId],
    ) -> Result<Arc<SenderEngine>, RuntimeError> {
        let engine = Arc::new(SenderEngine::create(self.ctx.clone(), name).await?);
        self.wire_sender(&engine);
        engine.add_tracked_objects(objects)?;
        self.scheduler.signal(&engine.client().stream_id);
        tracing::info!(
            client = %engine.client().client_id,
            stream = %engine.client().stream_id,
            objects = objects.len(),
            "sender added",
        );
        self.senders
            .write()
            .await
            .insert(engine.client().client_id.clone(), engine.clone());
        Ok(engine)
    }

    pub async fn add_receiver(&self, stream_id: &StreamId) -> Result<Arc<ReceiverEngine>, RuntimeError> {
        let (engine, feed) = ReceiverEngine::create(self.ctx.clone(), stream_id).await?;
        let engine = Arc::new(engine);
        self.attach_receiver(engine.clone(), feed).await;
        tracing::info!(
            client = %engine.client().client_id,
            stream = %stream_id,
            "receiver added",
        );
        Ok(engine)
    }

    /// Dispose a client and forget it. `delete` strips a sender's tags.
    pub async fn remove_client(&self, client_id: &ClientId, delete: bool) -> Result<(), RuntimeError> {
        if let Some(engine) = self.senders.write().await.remove(client_id) {
            self.scheduler.disarm(&engine.client().stream_id);
            engine.dispose(delete)?;
            tracing::info!(client = %client_id, delete, "sender removed");
            return Ok(());
        }
        if let Some(slot) = self.receivers.write().await.remove(client_id) {
            slot.feed.abort();
            slot.engine.dispose();
            tracing::info!(client = %client_id, "receiver removed");
            return Ok(());
        }
        Err(RuntimeError::ClientNotFound(client_id.clone()))
    }

    /// Dispose every client without deleting anything from the document.
    pub async fn dispose_all(&self) {
        for (client_id, engine) in self.senders.write().await.drain() {
            self.scheduler.disarm(&engine.client().stream_id);
            if let Err(err) = engine.dispose(false) {
                tracing::warn!(client = %client_id, error = %err, "sender dispose failed");
            }
        }
        for (_, slot) in self.receivers.write().await.drain() {
            slot.feed.abort();
            slot.engine.dispose();
        }
    }

    fn wire_sender(&self, engine: &Arc<SenderEngine>) {
        let weak = Arc::downgrade(engine);
        let scheduler = self.scheduler.clone();
        let tracker = ChangeTracker::new(engine.client().stream_id.clone());
        let subscription = tracker.attach(self.events.as_ref(), move |stream, event| {
            let Some(engine) = weak.upgrade() else {
                return;
            };
            if engine.accept_change() && scheduler.signal(stream) {
                tracing::debug!(stream = %stream, event = event.kind(), "debounce armed");
            }
        });
        engine.attach_subscription(subscription);
    }

    /// Drain the feed the engine opened before its first pull, so updates
    /// that landed during that pull are applied too.
    async fn attach_receiver(&self, engine: Arc<ReceiverEngine>, feed: MessageFeed) {
        let client_id = engine.client().client_id.clone();
        let task = tokio::spawn(pump_feed(engine.clone(), feed));
        self.receivers.write().await.insert(
            client_id,
            ReceiverSlot {
                engine,
                feed: task,
            },
        );
    }

    // -----------------------------------------------------------------------
    // Debounce expirations
    // -----------------------------------------------------------------------

    pub async fn sender_for_stream(&self, stream_id: &StreamId) -> Option<Arc<SenderEngine>> {
        self.senders
            .read()
            .await
            .values()
            .find(|engine| &engine.client().stream_id == stream_id)
            .cloned()
    }

    /// Run the debounced cycle of the sender attached to `stream_id`.
    pub async fn on_debounce(&self, stream_id: &StreamId) -> Result<TriggerOutcome, RuntimeError> {
        let engine = self
            .sender_for_stream(stream_id)
            .await
            .ok_or_else(|| RuntimeError::StreamNotTracked(stream_id.clone()))?;
        Ok(engine.trigger().await)
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub async fn sender(&self, client_id: &ClientId) -> Result<Arc<SenderEngine>, RuntimeError> {
        if let Some(engine) = self.senders.read().await.get(client_id) {
            return Ok(engine.clone());
        }
        if self.receivers.read().await.contains_key(client_id) {
            return Err(RuntimeError::WrongRole(client_id.clone(), "sender"));
        }
        Err(RuntimeError::ClientNotFound(client_id.clone()))
    }

    pub async fn receiver(&self, client_id: &ClientId) -> Result<Arc<ReceiverEngine>, RuntimeError> {
        if let Some(slot) = self.receivers.read().await.get(client_id) {
            return Ok(slot.engine.clone());
        }
        if self.senders.read().await.contains_key(client_id) {
            return Err(RuntimeError::WrongRole(client_id.clone(), "receiver"));
        }
        Err(RuntimeError::ClientNotFound(client_id.clone()))
    }

    async fn role_of(&self, client_id: &ClientId) -> Result<ClientRole, RuntimeError> {
        if self.senders.read().await.contains_key(client_id) {
            return Ok(ClientRole::Sender);
        }
        if self.receivers.read().await.contains_key(client_id) {
            return Ok(ClientRole::Receiver);
        }
        Err(RuntimeError::ClientNotFound(client_id.clone()))
    }

    /// Every client, ordered by client id.
    pub async fn list(&self) -> Vec<ClientSummary> {
        let mut rows: Vec<ClientSummary> = self
            .senders
            .read()
            .await
            .values()
            .map(|engine| ClientSummary {
                client: engine.client().clone(),
                paused: engine.is_paused(),
                visible: engine.is_visible(),
                state: Some(engine.state()),
                objects: engine.tracked_objects().len(),
            })
            .collect();
        rows.extend(self.receivers.read().await.values().map(|slot| ClientSummary {
            client: slot.engine.client().clone(),
            paused: slot.engine.is_paused(),
            visible: slot.engine.is_visible(),
            state: None,
            objects: slot.engine.display().len(),
        }));
        rows.sort_by(|a, b| a.client.client_id.cmp(&b.client.client_id));
        rows
    }

    // -----------------------------------------------------------------------
    // Host commands
    // -----------------------------------------------------------------------

    pub async fn handle_command(&self, command: HostCommand) -> Result<Value, RuntimeError> {
        match command {
            HostCommand::AddSender { name, objects } => {
                let engine = self.add_sender(&name, &objects).await?;
                Ok(json!({ "client": engine.client(), "stream": engine.snapshot() }))
            }
            HostCommand::AddReceiver { stream_id } => {
                let engine = self.add_receiver(&stream_id).await?;
                Ok(json!({
                    "client": engine.client(),
                    "stream": engine.snapshot(),
                    "objects": engine.display().len(),
                }))
            }
            HostCommand::RemoveClient { client_id, delete } => {
                self.remove_client(&client_id, delete).await?;
                Ok(json!({ "removed": client_id }))
            }
            HostCommand::ForceUpdate { client_id } => {
                let engine = self.sender(&client_id).await?;
                outcome_value(engine.force_update().await)
            }
            HostCommand::TogglePaused { client_id, paused } => {
                match self.role_of(&client_id).await? {
                    ClientRole::Sender => self.sender(&client_id).await?.toggle_paused(paused),
                    ClientRole::Receiver => self.receiver(&client_id).await?.toggle_paused(paused),
                }
                Ok(json!({ "paused": paused }))
            }
            HostCommand::ToggleVisibility { client_id, visible } => {
                match self.role_of(&client_id).await? {
                    ClientRole::Sender => self.sender(&client_id).await?.toggle_visibility(visible),
                    ClientRole::Receiver => {
                        self.receiver(&client_id).await?.toggle_visibility(visible)
                    }
                }
                Ok(json!({ "visible": visible }))
            }
            HostCommand::ToggleLayerHover {
                client_id,
                layer_id,
                on,
            } => {
                match self.role_of(&client_id).await? {
                    ClientRole::Sender => self
                        .sender(&client_id)
                        .await?
                        .toggle_layer_hover(&layer_id, on)?,
                    ClientRole::Receiver => self
                        .receiver(&client_id)
                        .await?
                        .toggle_layer_hover(&layer_id, on)?,
                }
                Ok(json!({ "layer": layer_id, "on": on }))
            }
            HostCommand::ToggleLayerVisibility {
                client_id,
                layer_id,
                visible,
            } => {
                match self.role_of(&client_id).await? {
                    ClientRole::Sender => self
                        .sender(&client_id)
                        .await?
                        .toggle_layer_visibility(&layer_id, visible)?,
                    ClientRole::Receiver => self
                        .receiver(&client_id)
                        .await?
                        .toggle_layer_visibility(&layer_id, visible)?,
                }
                Ok(json!({ "layer": layer_id, "visible": visible }))
            }
            HostCommand::Bake { client_id } => {
                let report = self.receiver(&client_id).await?.bake()?;
                Ok(serde_json::to_value(report)?)
            }
            HostCommand::BakeLayer {
                client_id,
                layer_id,
            } => {
                let report = self.receiver(&client_id).await?.bake_layer(&layer_id)?;
                Ok(serde_json::to_value(report)?)
            }
            HostCommand::AddObjects { client_id, objects } => {
                let tagged = self.sender(&client_id).await?.add_tracked_objects(&objects)?;
                Ok(json!({ "tagged": tagged }))
            }
            HostCommand::RemoveObjects { client_id, objects } => {
                let untagged = self
                    .sender(&client_id)
                    .await?
                    .remove_tracked_objects(&objects)?;
                Ok(json!({ "untagged": untagged }))
            }
            HostCommand::ListClients => Ok(serde_json::to_value(self.list().await)?),
        }
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Persist every client of this document under `home`.
    pub async fn save_session_at(&self, home: &Path) -> Result<usize, RuntimeError> {
        let clients: Vec<ClientSnapshot> = self
            .list()
            .await
            .into_iter()
            .map(|row| ClientSnapshot {
                client: row.client,
                paused: row.paused,
                visible: row.visible,
            })
            .collect();
        let count = clients.len();
        session::save_at(home, &SessionFile::new(self.document_name(), clients))?;
        tracing::info!(document = %self.document_name(), clients = count, "session saved");
        Ok(count)
    }

    /// Reconnect every client saved for this document. A client whose
    /// stream can no longer be reached is skipped with a warning.
    pub async fn restore_session_at(&self, home: &Path) -> Result<usize, RuntimeError> {
        let saved = session::load_at(home, &self.document_name())?;
        let mut restored = 0;
        for snapshot in &saved.clients {
            let result = match snapshot.client.role {
                ClientRole::Sender => self.restore_sender(snapshot).await,
                ClientRole::Receiver => self.restore_receiver(snapshot).await,
            };
            match result {
                Ok(()) => restored += 1,
                Err(err) => tracing::warn!(
                    client = %snapshot.client.client_id,
                    stream = %snapshot.client.stream_id,
                    error = %err,
                    "could not restore client",
                ),
            }
        }
        tracing::info!(document = %saved.document, restored, "session restored");
        Ok(restored)
    }

    async fn restore_sender(&self, snapshot: &ClientSnapshot) -> Result<(), RuntimeError> {
        let engine = Arc::new(SenderEngine::restore(self.ctx.clone(), snapshot).await?);
        self.wire_sender(&engine);
        self.senders
            .write()
            .await
            .insert(engine.client().client_id.clone(), engine);
        Ok(())
    }

    async fn restore_receiver(&self, snapshot: &ClientSnapshot) -> Result<(), RuntimeError> {
        let (engine, feed) = ReceiverEngine::restore(self.ctx.clone(), snapshot).await?;
        self.attach_receiver(Arc::new(engine), feed).await;
        Ok(())
    }
}

async fn pump_feed(engine: Arc<ReceiverEngine>, mut feed: MessageFeed) {
    while let Some(message) = feed.recv().await {
        let client = &engine.client().client_id;
        match engine.handle_message(&message).await {
            MessageOutcome::Pulled(Ok(report)) => tracing::info!(
                client = %client,
                objects = report.objects,
                fetched = report.fetched,
                "stream pulled",
            ),
            MessageOutcome::Pulled(Err(err)) | MessageOutcome::Refreshed(Err(err)) => {
                tracing::warn!(client = %client, event = message.event.as_str(), error = %err, "inbound event failed")
            }
            MessageOutcome::Refreshed(Ok(())) | MessageOutcome::Ignored | MessageOutcome::Expired => {
                tracing::debug!(client = %client, event = message.event.as_str(), "inbound event handled")
            }
        }
    }
    tracing::debug!(client = %engine.client().client_id, "remote feed closed");
}

fn outcome_value(outcome: TriggerOutcome) -> Result<Value, RuntimeError> {
    match outcome {
        TriggerOutcome::Ran(results) => {
            let mut reports = Vec::with_capacity(results.len());
            for result in results {
                reports.push(result?);
            }
            Ok(json!({ "cycles": reports }))
        }
        TriggerOutcome::Deferred => Ok(json!({ "deferred": true })),
        TriggerOutcome::Expired => Ok(json!({ "expired": true })),
    }
}
