//! Sender engine: pushes a stream's tracked objects to the remote store.
//!
//! ## One cycle
//!
//! 1. Collect the tagged objects, ordered by layer index.
//! 2. Derive layer descriptors from that order.
//! 3. Convert and hash every object.
//! 4. Swap objects whose hash is cached for placeholders.
//! 5. Bucket the payload; 6. reject it when it needs too many buckets.
//! 7. Upload buckets one after another, collecting remote ids in order.
//! 8. Assemble the new snapshot; 9. push it to the store.
//! 10. Commit: cache the new hashes, replace the local snapshot, broadcast.
//! 11. Run again right away if a trigger arrived meanwhile.
//!
//! Nothing is committed unless every step succeeds.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use layersync_core::document::{Subscription, TrackingTag};
use layersync_core::types::{
    ClientHandle, ClientRole, ClientSnapshot, ObjectId, ObjectRef, PortableObject, RemoteId,
    StreamSnapshot, SyncState,
};
use layersync_display::DisplayConduit;

use crate::bucket::{bucket, Bucket};
use crate::cache::CacheEntry;
use crate::context::{lock, EngineContext};
use crate::error::SyncError;
use crate::gate::CycleGate;
use crate::hash::stamp;
use crate::layers::{build_descriptors, order_by_layer};
use crate::notify::NotificationKind;
use crate::remote::{InboundEvent, InboundMessage};

/// What one completed cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CycleReport {
    pub objects: usize,
    /// Objects sent with their full payload.
    pub uploaded: usize,
    /// Objects replaced by placeholders.
    pub reused: usize,
    pub buckets: usize,
    pub bytes: usize,
}

/// Result of asking the engine to sync.
#[derive(Debug)]
pub enum TriggerOutcome {
    /// The client is paused; `client-expired` was sent instead.
    Expired,
    /// A cycle was already running; it will run again when it finishes.
    Deferred,
    /// Cycles run by this call, the first one plus any retriggers.
    Ran(Vec<Result<CycleReport, SyncError>>),
}

impl TriggerOutcome {
    pub fn cycles(&self) -> usize {
        match self {
            TriggerOutcome::Ran(results) => results.len(),
            _ => 0,
        }
    }
}

pub struct SenderEngine {
    ctx: EngineContext,
    client: ClientHandle,
    tag: TrackingTag,
    gate: CycleGate,
    snapshot: Mutex<StreamSnapshot>,
    display: Mutex<DisplayConduit>,
    paused: AtomicBool,
    orphaned: AtomicUsize,
    subscription: Mutex<Option<Subscription>>,
}

impl SenderEngine {
    /// Create a new stream named `name` and register as its sender.
    pub async fn create(ctx: EngineContext, name: &str) -> Result<Self, SyncError> {
        let snapshot = ctx.remote.create_stream(name).await?;
        let client_id = ctx
            .remote
            .register_client(&snapshot.stream_id, ClientRole::Sender)
            .await?;
        let client = ClientHandle {
            client_id,
            stream_id: snapshot.stream_id.clone(),
            role: ClientRole::Sender,
            server_url: ctx.remote.server_url(),
        };
        let engine = Self::build(ctx, client, snapshot, false, true);
        engine.ctx.notify(
            NotificationKind::ClientAdd,
            &engine.client.stream_id,
            json!({ "stream": engine.snapshot(), "client": engine.client }),
        );
        info!("sender {} created stream {}", engine.client.client_id, engine.client.stream_id);
        Ok(engine)
    }

    /// Reconnect a persisted sender to its stream.
    pub async fn restore(ctx: EngineContext, saved: &ClientSnapshot) -> Result<Self, SyncError> {
        let snapshot = ctx.remote.get_stream(&saved.client.stream_id).await?;
        Ok(Self::build(ctx, saved.client.clone(), snapshot, saved.paused, saved.visible))
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
            tag: TrackingTag::for_stream(&client.stream_id),
            ctx,
            client,
            gate: CycleGate::new(),
            snapshot: Mutex::new(snapshot),
            display: Mutex::new(display),
            paused: AtomicBool::new(paused),
            orphaned: AtomicUsize::new(0),
            subscription: Mutex::new(None),
        }
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    pub fn client(&self) -> &ClientHandle {
        &self.client
    }

    pub fn tracking_tag(&self) -> &TrackingTag {
        &self.tag
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        lock(&self.snapshot).clone()
    }

    pub fn state(&self) -> SyncState {
        self.gate.state()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_visible(&self) -> bool {
        lock(&self.display).is_enabled()
    }

    /// Objects uploaded by failed cycles that no stream snapshot references.
    pub fn orphaned_objects(&self) -> usize {
        self.orphaned.load(Ordering::SeqCst)
    }

    pub fn client_snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            client: self.client.clone(),
            paused: self.is_paused(),
            visible: self.is_visible(),
        }
    }

    /// Keep the document event subscription alive until disposal.
    pub fn attach_subscription(&self, subscription: Subscription) {
        *lock(&self.subscription) = Some(subscription);
    }

    /// Ids of the objects currently carrying this stream's tag.
    pub fn tracked_objects(&self) -> Vec<ObjectId> {
        self.ctx
            .document
            .tagged_objects(&self.tag)
            .into_iter()
            .map(|object| object.id)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Triggering
    // -----------------------------------------------------------------------

    /// Called for every dirty signal. Returns `false` when paused, after
    /// telling the UI the client is expired; the caller should not arm the
    /// debounce timer then.
    pub fn accept_change(&self) -> bool {
        if self.is_paused() {
            self.ctx
                .notify(NotificationKind::ClientExpired, &self.client.stream_id, json!({}));
            return false;
        }
        true
    }

    /// Debounced entry point: runs a cycle unless paused.
    pub async fn trigger(&self) -> TriggerOutcome {
        if !self.accept_change() {
            return TriggerOutcome::Expired;
        }
        self.run_cycles(false).await
    }

    /// Run a cycle even while paused.
    pub async fn force_update(&self) -> TriggerOutcome {
        self.run_cycles(true).await
    }

    /// A retrigger recorded before a pause is dropped once the sender is
    /// paused, unless the run was forced.
    async fn run_cycles(&self, force: bool) -> TriggerOutcome {
        if !self.gate.try_begin() {
            debug!("[{}] cycle in flight, retrigger recorded", self.client.stream_id);
            return TriggerOutcome::Deferred;
        }
        let mut results = Vec::new();
        loop {
            results.push(self.run_reported_cycle().await);
            if !self.gate.finish() {
                break;
            }
            if !force && self.is_paused() {
                debug!("[{}] paused, retrigger dropped", self.client.stream_id);
                self.ctx
                    .notify(NotificationKind::ClientExpired, &self.client.stream_id, json!({}));
                // Only a forced update can have deferred since the pause.
                if !self.gate.finish() {
                    break;
                }
            }
            debug!("[{}] running retrigger", self.client.stream_id);
        }
        TriggerOutcome::Ran(results)
    }

    /// Cycle boundary: failures become a `client-error` notification.
    async fn run_reported_cycle(&self) -> Result<CycleReport, SyncError> {
        let stream = &self.client.stream_id;
        self.ctx
            .notify(NotificationKind::ClientIsLoading, stream, json!({}));
        let result = self.run_cycle().await;
        if let Err(e) = &result {
            warn!("[{stream}] sync cycle failed: {e}");
            self.ctx.notify(
                NotificationKind::ClientError,
                stream,
                json!({ "message": e.to_string(), "transient": e.is_transient() }),
            );
        }
        self.ctx
            .notify(NotificationKind::ClientDoneLoading, stream, json!({}));
        result
    }

    async fn run_cycle(&self) -> Result<CycleReport, SyncError> {
        let stream = &self.client.stream_id;
        let config = &self.ctx.config;

        // 1-2: a synchronous scan, finished before the first suspension point.
        let mut objects = self.ctx.document.tagged_objects(&self.tag);
        order_by_layer(&mut objects);
        let layers = build_descriptors(&*self.ctx.document, &objects);
        let base_properties = self.ctx.document.settings().base_properties();

        // 3
        self.ctx
            .progress(stream, format!("Converting {} objects...", objects.len()));
        let mut converted = Vec::with_capacity(objects.len());
        for object in &objects {
            let mut portable = self.ctx.converter.to_portable(&object.geometry)?;
            portable.application_id = Some(object.id.0.clone());
            stamp(&mut portable)?;
            converted.push(portable);
        }

        // 4
        let mut report = CycleReport {
            objects: converted.len(),
            ..CycleReport::default()
        };
        let payload: Vec<PortableObject> = converted
            .into_iter()
            .map(|portable| match portable.hash.as_ref().and_then(|h| self.ctx.cache.lookup(h)) {
                Some(entry) => {
                    debug!("[{stream}] reusing {} for {:?}", entry.remote_id, portable.application_id);
                    report.reused += 1;
                    PortableObject::placeholder(portable.hash, entry.remote_id, portable.application_id)
                }
                None => {
                    report.uploaded += 1;
                    portable
                }
            })
            .collect();

        // 5-6
        let buckets = bucket(payload, config.max_bucket_bytes)?;
        if buckets.len() > config.max_buckets {
            return Err(SyncError::PayloadTooLarge {
                buckets: buckets.len(),
                limit: config.max_buckets,
            });
        }
        report.buckets = buckets.len();
        report.bytes = buckets.iter().map(|b| b.bytes).sum();

        // 7
        let mut remote_ids: Vec<RemoteId> = Vec::with_capacity(report.objects);
        for (k, b) in buckets.iter().enumerate() {
            self.ctx
                .progress(stream, format!("Sending payload {} out of {}", k + 1, buckets.len()));
            let ids = match self.ctx.remote.create_objects(&b.objects).await {
                Ok(ids) => ids,
                Err(e) => {
                    self.warn_orphans(&buckets[..k]);
                    return Err(e.into());
                }
            };
            if ids.len() != b.objects.len() {
                self.warn_orphans(&buckets[..=k]);
                return Err(SyncError::Protocol(format!(
                    "bucket {} of {} objects came back with {} ids",
                    k + 1,
                    b.objects.len(),
                    ids.len()
                )));
            }
            remote_ids.extend(ids);
        }

        // 8
        let mut next = self.snapshot();
        next.layers = layers;
        next.base_properties = base_properties;
        next.objects = remote_ids
            .iter()
            .zip(&objects)
            .map(|(remote_id, object)| ObjectRef {
                remote_id: remote_id.clone(),
                application_id: Some(object.id.0.clone()),
            })
            .collect();

        // 9
        self.ctx.progress(stream, "Updating stream...");
        let assigned = match self.ctx.remote.update_stream(&next).await {
            Ok(assigned) => assigned,
            Err(e) => {
                self.warn_orphans(&buckets);
                return Err(e.into());
            }
        };
        if !assigned.is_empty() {
            if assigned.len() != next.objects.len() {
                self.warn_orphans(&buckets);
                return Err(SyncError::Protocol(format!(
                    "stream update assigned {} ids to {} objects",
                    assigned.len(),
                    next.objects.len()
                )));
            }
            for (reference, id) in next.objects.iter_mut().zip(&assigned) {
                reference.remote_id = id.clone();
            }
        }

        // 10
        let uploaded = buckets.into_iter().flat_map(|b| b.objects);
        for (object, reference) in uploaded.zip(&next.objects) {
            if object.is_placeholder() {
                continue;
            }
            if let Some(hash) = object.hash.clone() {
                self.ctx.cache.insert(
                    hash,
                    CacheEntry {
                        remote_id: reference.remote_id.clone(),
                        application_id: object.application_id.clone(),
                    },
                );
            }
            let mut stored = object;
            stored.remote_id = Some(reference.remote_id.clone());
            self.ctx.cache.insert_object(reference.remote_id.clone(), stored);
        }
        *lock(&self.snapshot) = next.clone();

        self.ctx
            .notify(NotificationKind::ClientMetadataUpdate, stream, serde_json::to_value(&next)?);
        let broadcast = InboundMessage::new(InboundEvent::UpdateGlobal, stream.clone());
        if let Err(e) = self
            .ctx
            .remote
            .broadcast(stream, &self.client.client_id, broadcast)
            .await
        {
            warn!("[{stream}] update-global broadcast failed: {e}");
        }
        self.ctx.notify(
            NotificationKind::ClientLog,
            stream,
            json!({ "message": "Update Sent." }),
        );
        info!(
            "[{stream}] sent {} objects ({} uploaded, {} reused) in {} buckets",
            report.objects, report.uploaded, report.reused, report.buckets
        );
        Ok(report)
    }

    fn warn_orphans(&self, sent: &[Bucket]) {
        let orphans = sent
            .iter()
            .flat_map(|b| &b.objects)
            .filter(|o| !o.is_placeholder())
            .count();
        if orphans > 0 {
            self.orphaned.fetch_add(orphans, Ordering::SeqCst);
            warn!(
                "[{}] {orphans} uploaded objects are not referenced by the stream",
                self.client.stream_id
            );
        }
    }

    // -----------------------------------------------------------------------
    // Tracked set
    // -----------------------------------------------------------------------

    /// Tag objects as members of this stream. Returns how many were tagged.
    pub fn add_tracked_objects(&self, ids: &[ObjectId]) -> Result<usize, SyncError> {
        for id in ids {
            self.ctx
                .document
                .set_user_string(id, self.tag.key(), Some(self.tag.value()))?;
        }
        Ok(ids.len())
    }

    /// Remove the stream tag from objects. Returns how many were untagged.
    pub fn remove_tracked_objects(&self, ids: &[ObjectId]) -> Result<usize, SyncError> {
        for id in ids {
            self.ctx.document.set_user_string(id, self.tag.key(), None)?;
        }
        Ok(ids.len())
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

    /// Highlight the tracked objects sitting on a document layer.
    pub fn toggle_layer_hover(&self, layer_id: &str, on: bool) -> Result<(), SyncError> {
        let mut display = lock(&self.display);
        if !on {
            display.clear_hover();
        } else {
            let layer = self
                .ctx
                .document
                .find_layer_by_id(layer_id)
                .ok_or_else(|| SyncError::LayerNotFound(layer_id.to_string()))?;
            let mut objects = self.ctx.document.tagged_objects(&self.tag);
            order_by_layer(&mut objects);
            let geometry = objects
                .into_iter()
                .filter(|o| o.attributes.layer_index == layer)
                .map(|o| o.geometry)
                .collect();
            display.set_hover_geometry(geometry);
        }
        self.ctx.renderer.render(&display);
        self.ctx.document.redraw();
        Ok(())
    }

    pub fn toggle_layer_visibility(&self, _layer_id: &str, _visible: bool) -> Result<(), SyncError> {
        Err(SyncError::Unsupported("layer visibility"))
    }

    // -----------------------------------------------------------------------
    // Disposal
    // -----------------------------------------------------------------------

    /// Stop tracking. With `delete`, also strip the tag from every tracked
    /// object so the document no longer refers to the stream.
    pub fn dispose(&self, delete: bool) -> Result<(), SyncError> {
        lock(&self.subscription).take();
        {
            let mut display = lock(&self.display);
            display.clear_hover();
            display.set_enabled(false);
            self.ctx.renderer.render(&display);
        }
        if delete {
            let tracked = self.tracked_objects();
            self.remove_tracked_objects(&tracked)?;
        }
        self.ctx.document.redraw();
        info!("sender {} disposed (delete = {delete})", self.client.client_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::ObjectCache;
    use crate::convert::JsonConverter;
    use crate::notify::{ChannelNotifier, Notification};
    use crate::remote::{MemoryStreamService, RemoteOp};
    use layersync_core::document::Document;
    use layersync_core::memory::{point, MemoryDocument};
    use layersync_core::types::Color;
    use layersync_core::SyncConfig;
    use layersync_display::RecordingRenderer;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        doc: Arc<MemoryDocument>,
        store: Arc<MemoryStreamService>,
        cache: ObjectCache,
        notes: UnboundedReceiver<Notification>,
        engine: SenderEngine,
    }

    async fn fixture(config: SyncConfig) -> Fixture {
        let doc = Arc::new(MemoryDocument::new("tower.3dm"));
        let store = Arc::new(MemoryStreamService::new());
        let cache = ObjectCache::new();
        let (notifier, notes) = ChannelNotifier::new();
        let ctx = EngineContext {
            document: doc.clone(),
            remote: store.clone(),
            converter: Arc::new(JsonConverter),
            notifier: Arc::new(notifier),
            renderer: Arc::new(RecordingRenderer::new()),
            cache: cache.clone(),
            config,
        };
        let engine = SenderEngine::create(ctx, "Tower").await.unwrap();
        Fixture {
            doc,
            store,
            cache,
            notes,
            engine,
        }
    }

    fn drain(rx: &mut UnboundedReceiver<Notification>) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n);
        }
        out
    }

    fn add_points(f: &Fixture, layer: usize, n: usize) -> Vec<ObjectId> {
        let ids: Vec<ObjectId> = (0..n)
            .map(|i| f.doc.add_object(point(&format!("p{layer}-{i}"), i as f64, 0.0), layer).unwrap())
            .collect();
        f.engine.add_tracked_objects(&ids).unwrap();
        ids
    }

    fn single(outcome: TriggerOutcome) -> CycleReport {
        match outcome {
            TriggerOutcome::Ran(mut results) if results.len() == 1 => results.remove(0).unwrap(),
            other => panic!("expected one cycle, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_announces_the_client() {
        let mut f = fixture(SyncConfig::default()).await;
        let notes = drain(&mut f.notes);
        assert_eq!(notes[0].kind, NotificationKind::ClientAdd);
        assert_eq!(notes[0].payload["stream"]["name"], "Tower");
        assert_eq!(f.engine.client().role, ClientRole::Sender);
    }

    #[tokio::test]
    async fn cycle_publishes_layers_and_objects() {
        let f = fixture(SyncConfig::default()).await;
        let a = f.doc.ensure_layer_path("A", Color::BLACK).unwrap();
        let b = f.doc.ensure_layer_path("B", Color::BLACK).unwrap();
        add_points(&f, b, 2);
        add_points(&f, a, 3);

        let report = single(f.engine.trigger().await);
        assert_eq!(report.objects, 5);
        assert_eq!(report.uploaded, 5);

        let snapshot = f.engine.snapshot();
        let layers: Vec<_> = snapshot
            .layers
            .iter()
            .map(|l| (l.name.as_str(), l.start_index, l.object_count, l.order_index))
            .collect();
        assert_eq!(layers, [("A", 0, 3, 0), ("B", 3, 2, 1)]);
        assert_eq!(snapshot.objects.len(), 5);
        assert_eq!(snapshot.base_properties["units"], "Millimeters");
        assert_eq!(f.store.calls().stream_updates, 1);
        assert_eq!(f.cache.stats().hashes, 5);
    }

    #[tokio::test]
    async fn unchanged_objects_are_sent_as_placeholders() {
        let f = fixture(SyncConfig::default()).await;
        let a = f.doc.ensure_layer_path("A", Color::BLACK).unwrap();
        add_points(&f, a, 3);
        single(f.engine.trigger().await);
        let first = f.engine.snapshot().objects;

        let report = single(f.engine.trigger().await);
        assert_eq!(report.uploaded, 0);
        assert_eq!(report.reused, 3);

        let calls = f.store.calls();
        assert!(calls.created[1].iter().all(PortableObject::is_placeholder));
        assert_eq!(f.engine.snapshot().objects, first);
        assert_eq!(f.store.object_count(), 3);
    }

    #[tokio::test]
    async fn too_many_buckets_aborts_before_any_upload() {
        let config = SyncConfig {
            max_bucket_bytes: 1,
            max_buckets: 2,
            ..SyncConfig::default()
        };
        let mut f = fixture(config).await;
        let a = f.doc.ensure_layer_path("A", Color::BLACK).unwrap();
        add_points(&f, a, 3);
        drain(&mut f.notes);

        let outcome = f.engine.trigger().await;
        let TriggerOutcome::Ran(results) = outcome else {
            panic!("expected a cycle");
        };
        assert!(matches!(
            results[0],
            Err(SyncError::PayloadTooLarge { buckets: 3, limit: 2 })
        ));
        assert!(f.store.calls().created.is_empty());
        assert_eq!(f.cache.stats().hashes, 0);
        assert_eq!(f.engine.state(), SyncState::Idle);
        assert!(drain(&mut f.notes)
            .iter()
            .any(|n| n.kind == NotificationKind::ClientError));
    }

    #[tokio::test]
    async fn failed_stream_update_commits_nothing() {
        let f = fixture(SyncConfig::default()).await;
        let a = f.doc.ensure_layer_path("A", Color::BLACK).unwrap();
        add_points(&f, a, 2);
        f.store.fail_next(RemoteOp::UpdateStream);

        let TriggerOutcome::Ran(results) = f.engine.trigger().await else {
            panic!("expected a cycle");
        };
        assert!(results[0].as_ref().is_err_and(SyncError::is_transient));
        assert!(f.engine.snapshot().objects.is_empty());
        assert_eq!(f.cache.stats().hashes, 0);
        assert_eq!(f.engine.orphaned_objects(), 2);
        assert!(f.store.calls().broadcasts.is_empty());

        // the retry succeeds and re-uploads everything
        let report = single(f.engine.trigger().await);
        assert_eq!(report.uploaded, 2);
    }

    #[tokio::test]
    async fn paused_sender_answers_expired_but_force_runs() {
        let mut f = fixture(SyncConfig::default()).await;
        let a = f.doc.ensure_layer_path("A", Color::BLACK).unwrap();
        add_points(&f, a, 1);
        f.engine.toggle_paused(true);
        drain(&mut f.notes);

        assert!(matches!(f.engine.trigger().await, TriggerOutcome::Expired));
        assert_eq!(drain(&mut f.notes)[0].kind, NotificationKind::ClientExpired);

        assert_eq!(f.engine.force_update().await.cycles(), 1);
        assert_eq!(f.engine.snapshot().objects.len(), 1);
    }

    #[tokio::test]
    async fn successful_cycle_reports_progress() {
        let mut f = fixture(SyncConfig::default()).await;
        let a = f.doc.ensure_layer_path("A", Color::BLACK).unwrap();
        add_points(&f, a, 2);
        drain(&mut f.notes);

        single(f.engine.trigger().await);
        let notes = drain(&mut f.notes);
        let messages: Vec<_> = notes.iter().filter_map(Notification::message).collect();
        assert_eq!(
            messages,
            [
                "Converting 2 objects...",
                "Sending payload 1 out of 1",
                "Updating stream...",
                "Update Sent.",
            ]
        );
        let kinds: Vec<_> = notes.iter().map(|n| n.kind).collect();
        assert!(kinds.contains(&NotificationKind::ClientMetadataUpdate));
        assert_eq!(kinds.first(), Some(&NotificationKind::ClientIsLoading));
        assert_eq!(kinds.last(), Some(&NotificationKind::ClientDoneLoading));
    }

    #[tokio::test]
    async fn sender_layer_visibility_is_unsupported() {
        let f = fixture(SyncConfig::default()).await;
        assert!(matches!(
            f.engine.toggle_layer_visibility("any", false),
            Err(SyncError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn layer_hover_collects_tracked_geometry() {
        let f = fixture(SyncConfig::default()).await;
        let a = f.doc.ensure_layer_path("A", Color::BLACK).unwrap();
        let b = f.doc.ensure_layer_path("B", Color::BLACK).unwrap();
        add_points(&f, a, 2);
        add_points(&f, b, 1);
        let layer_id = f.doc.layer(a).unwrap().id;

        f.engine.toggle_layer_hover(&layer_id, true).unwrap();
        assert_eq!(lock(&f.engine.display).hover_geometry().len(), 2);
        f.engine.toggle_layer_hover(&layer_id, false).unwrap();
        assert!(lock(&f.engine.display).hover().is_none());

        assert!(matches!(
            f.engine.toggle_layer_hover("missing", true),
            Err(SyncError::LayerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn dispose_with_delete_clears_tags() {
        let f = fixture(SyncConfig::default()).await;
        let a = f.doc.ensure_layer_path("A", Color::BLACK).unwrap();
        add_points(&f, a, 3);
        assert_eq!(f.engine.tracked_objects().len(), 3);

        f.engine.dispose(true).unwrap();
        assert!(f.engine.tracked_objects().is_empty());
        assert!(!f.engine.is_visible());
    }
}
