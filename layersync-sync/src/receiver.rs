//! Receiver engine: pulls a stream and materializes it locally.
//!
//! An `update-global` pull fetches the stream metadata, bulk-fetches only
//! the objects the shared cache does not hold yet, resolves every reference
//! and hands the display list to the renderer. The new snapshot and display
//! list replace the old ones only once every reference has resolved.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use layersync_core::types::{ClientHandle, ClientRole, ClientSnapshot, StreamId, StreamSnapshot};
use layersync_display::{DisplayConduit, DisplayItem};

use crate::bake::{self, BakeReport};
use crate::context::{lock, EngineContext};
use crate::error::SyncError;
use crate::layers::validate_partition;
use crate::notify::NotificationKind;
use crate::remote::{InboundEvent, InboundMessage, MessageFeed};

/// What one `update-global` pull did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PullReport {
    pub objects: usize,
    pub fetched: usize,
    pub cached: usize,
}

#[derive(Debug)]
pub enum MessageOutcome {
    /// The client is paused; `client-expired` was sent instead.
    Expired,
    /// Recognized but without an effect, or not recognized at all.
    Ignored,
    /// Geometry was re-pulled.
    Pulled(Result<PullReport, SyncError>),
    /// Only metadata was refreshed.
    Refreshed(Result<(), SyncError>),
}

pub struct ReceiverEngine {
    ctx: EngineContext,
    client: ClientHandle,
    snapshot: Mutex<StreamSnapshot>,
    display: Mutex<DisplayConduit>,
    paused: AtomicBool,
}

impl ReceiverEngine {
    /// Register as a receiver of `stream_id`, open its message feed and run
    /// the first pull.
    ///
    /// The feed is open before the pull starts, so an update broadcast while
    /// the pull is running queues on the returned feed instead of being lost.
    pub async fn create(ctx: EngineContext, stream_id: &StreamId) -> Result<(Self, MessageFeed), SyncError> {
        let client_id = ctx
            .remote
            .register_client(stream_id, ClientRole::Receiver)
            .await?;
        let feed = ctx.remote.subscribe(stream_id, &client_id).await?;
        let snapshot = ctx.remote.get_stream(stream_id).await?;
        let client = ClientHandle {
            client_id,
            stream_id: stream_id.clone(),
            role: ClientRole::Receiver,
            server_url: ctx.remote.server_url(),
        };
        let engine = Self::build(ctx, client, snapshot, false, true);
        engine.ctx.notify(
            NotificationKind::ClientAdd,
            stream_id,
            json!({ "stream": engine.snapshot(), "client": engine.client }),
        );
        info!("receiver {} attached to {stream_id}", engine.client.client_id);
        let _ = engine.update_global().await;
        Ok((engine, feed))
    }

    /// Reconnect a persisted receiver, reopen its feed and pull the current
    /// stream state.
    pub async fn restore(ctx: EngineContext, saved: &ClientSnapshot) -> Result<(Self, MessageFeed), SyncError> {
        let client = &saved.client;
        let feed = ctx.remote.subscribe(&client.stream_id, &client.client_id).await?;
        let snapshot = ctx.remote.get_stream(&client.stream_id).await?;
        let engine = Self::build(ctx, client.clone(), snapshot, saved.paused, saved.visible);
        let _ = engine.update_global().await;
        Ok((engine, feed))
    }

    fn build(
        ctx: EngineContext,
        client: ClientHandle,
        snapshot: StreamSnapshot,
        paused: bool,
        visible: bool,
    ) -> Self {
        let mut display = DisplayConduit::new();
        display.set_enabled(visible);
        Self {
            ctx,
            client,
            snapshot: Mutex::new(snapshot),
            display: Mutex::new(display),
            paused: AtomicBool::new(paused),
        }
    }

    pub fn client(&self) -> &ClientHandle {
        &self.client
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        lock(&self.snapshot).clone()
    }

    pub fn display(&self) -> DisplayConduit {
        lock(&self.display).clone()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_visible(&self) -> bool {
        lock(&self.display).is_enabled()
    }

    pub fn client_snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            client: self.client.clone(),
            paused: self.is_paused(),
            visible: self.is_visible(),
        }
    }

    // -----------------------------------------------------------------------
    // Inbound notifications
    // -----------------------------------------------------------------------

    pub async fn handle_message(&self, message: &InboundMessage) -> MessageOutcome {
        let stream = &self.client.stream_id;
        if self.is_paused() {
            self.ctx
                .notify(NotificationKind::ClientExpired, stream, json!({}));
            return MessageOutcome::Expired;
        }
        match &message.event {
            InboundEvent::UpdateGlobal => MessageOutcome::Pulled(self.update_global().await),
            InboundEvent::UpdateMeta | InboundEvent::UpdateName => {
                MessageOutcome::Refreshed(self.update_meta().await)
            }
            InboundEvent::UpdateChildren => MessageOutcome::Refreshed(self.update_children().await),
            InboundEvent::UpdateObject => {
                debug!("[{stream}] update-object ignored");
                MessageOutcome::Ignored
            }
            InboundEvent::Unrecognized(event_type) => {
                warn!("[{stream}] unrecognized event {event_type:?}");
                MessageOutcome::Ignored
            }
        }
    }

    /// Full pull. Failures are reported as `client-error` and returned.
    pub async fn update_global(&self) -> Result<PullReport, SyncError> {
        let stream = &self.client.stream_id;
        self.ctx
            .notify(NotificationKind::ClientIsLoading, stream, json!({}));
        let result = self.pull().await;
        if let Err(e) = &result {
            self.report_error(e);
        }
        self.ctx
            .notify(NotificationKind::ClientDoneLoading, stream, json!({}));
        result
    }

    async fn pull(&self) -> Result<PullReport, SyncError> {
        let stream = &self.client.stream_id;
        let cache = &self.ctx.cache;

        let snapshot = self.ctx.remote.get_stream(stream).await?;
        validate_partition(&snapshot.layers, snapshot.objects.len())?;

        let missing = cache.missing_objects(&snapshot.objects);
        let mut report = PullReport {
            objects: snapshot.objects.len(),
            fetched: missing.len(),
            cached: snapshot.objects.len() - missing.len(),
        };
        if !missing.is_empty() {
            self.ctx
                .progress(stream, format!("Fetching {} objects...", missing.len()));
            let fetched = self
                .ctx
                .remote
                .get_objects(&missing, &self.ctx.config.omit_hints)
                .await?;
            if fetched.len() != missing.len() {
                return Err(SyncError::Protocol(format!(
                    "requested {} objects, received {}",
                    missing.len(),
                    fetched.len()
                )));
            }
            for (requested, object) in missing.iter().zip(fetched) {
                let id = object.remote_id.clone().unwrap_or_else(|| requested.clone());
                cache.insert_object(id, object);
            }
        }

        let fallback = self.ctx.config.fallback_layer_color;
        let mut items = Vec::with_capacity(snapshot.objects.len());
        for (position, reference) in snapshot.objects.iter().enumerate() {
            let object = cache
                .lookup_object(&reference.remote_id)
                .ok_or_else(|| SyncError::MissingObject(reference.remote_id.clone()))?;
            let color = snapshot
                .layer_for_index(position)
                .map(|layer| layer.resolved_color(fallback))
                .unwrap_or(fallback);
            items.push(DisplayItem::new(self.ctx.converter.to_native(&object), color));
        }
        report.objects = items.len();

        {
            let mut display = lock(&self.display);
            display.replace(items);
            self.ctx.renderer.render(&display);
        }
        *lock(&self.snapshot) = snapshot.clone();
        self.ctx.document.redraw();
        self.ctx.notify(
            NotificationKind::ClientMetadataUpdate,
            stream,
            serde_json::to_value(&snapshot)?,
        );
        info!(
            "[{stream}] pulled {} objects ({} fetched, {} cached)",
            report.objects, report.fetched, report.cached
        );
        Ok(report)
    }

    /// Re-fetch metadata only, for renames and layer edits.
    pub async fn update_meta(&self) -> Result<(), SyncError> {
        let result = self.refresh(NotificationKind::ClientMetadataUpdate).await;
        if let Err(e) = &result {
            self.report_error(e);
        }
        result
    }

    pub async fn update_children(&self) -> Result<(), SyncError> {
        let result = self.refresh(NotificationKind::ClientChildren).await;
        if let Err(e) = &result {
            self.report_error(e);
        }
        result
    }

    async fn refresh(&self, kind: NotificationKind) -> Result<(), SyncError> {
        let stream = &self.client.stream_id;
        let snapshot = self.ctx.remote.get_stream(stream).await?;
        let payload = serde_json::to_value(&snapshot)?;
        *lock(&self.snapshot) = snapshot;
        self.ctx.notify(kind, stream, payload);
        Ok(())
    }

    fn report_error(&self, error: &SyncError) {
        let stream = &self.client.stream_id;
        warn!("[{stream}] receive failed: {error}");
        self.ctx.notify(
            NotificationKind::ClientError,
            stream,
            json!({ "message": error.to_string(), "transient": error.is_transient() }),
        );
    }

    // -----------------------------------------------------------------------
    // Bake
    // -----------------------------------------------------------------------

    pub fn bake(&self) -> Result<BakeReport, SyncError> {
        let snapshot = self.snapshot();
        let mut display = lock(&self.display);
        bake::bake(
            &*self.ctx.document,
            &snapshot,
            &mut display,
            self.ctx.config.fallback_layer_color,
        )
    }

    pub fn bake_layer(&self, layer_guid: &str) -> Result<BakeReport, SyncError> {
        let snapshot = self.snapshot();
        let mut display = lock(&self.display);
        bake::bake_layer(
            &*self.ctx.document,
            &snapshot,
            &mut display,
            layer_guid,
            self.ctx.config.fallback_layer_color,
        )
    }

    // -----------------------------------------------------------------------
    // Toggles
    // -----------------------------------------------------------------------

    pub fn toggle_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn toggle_visibility(&self, visible: bool) {
        let mut display = lock(&self.display);
        display.set_enabled(visible);
        self.ctx.renderer.render(&display);
        self.ctx.document.redraw();
    }

    /// Highlight a stream layer's range of the display list.
    pub fn toggle_layer_hover(&self, layer_guid: &str, on: bool) -> Result<(), SyncError> {
        let range = self.layer_range(layer_guid)?;
        let mut display = lock(&self.display);
        if on {
            display.set_hover(range)?;
        } else {
            display.clear_hover();
        }
        self.ctx.renderer.render(&display);
        self.ctx.document.redraw();
        Ok(())
    }

    pub fn toggle_layer_visibility(&self, layer_guid: &str, visible: bool) -> Result<(), SyncError> {
        let range = self.layer_range(layer_guid)?;
        let mut display = lock(&self.display);
        display.set_visible(range, visible)?;
        self.ctx.renderer.render(&display);
        self.ctx.document.redraw();
        Ok(())
    }

    fn layer_range(&self, layer_guid: &str) -> Result<std::ops::Range<usize>, SyncError> {
        lock(&self.snapshot)
            .layer_by_guid(layer_guid)
            .map(|layer| layer.range())
            .ok_or_else(|| SyncError::LayerNotFound(layer_guid.to_string()))
    }

    /// Stop displaying the stream. Baked objects stay in the document.
    pub fn dispose(&self) {
        {
            let mut display = lock(&self.display);
            display.clear_hover();
            display.set_enabled(false);
            self.ctx.renderer.render(&display);
        }
        self.ctx.document.redraw();
        info!("receiver {} disposed", self.client.client_id);
    }
}
