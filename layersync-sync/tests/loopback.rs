use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use layersync_core::document::Document;
use layersync_core::memory::{point, MemoryDocument};
use async_trait::async_trait;

use layersync_core::types::{
    ClientId, ClientRole, Color, ObjectId, PortableObject, RemoteId, StreamId, StreamSnapshot,
};
use layersync_core::SyncConfig;
use layersync_display::{NullRenderer, RecordingRenderer};
use layersync_sync::remote::MessageFeed;
use layersync_sync::{
    ChangeTracker, DebounceScheduler, EngineContext, InboundEvent, InboundMessage, JsonConverter,
    MemoryStreamService, MessageOutcome, ObjectCache, ReceiverEngine, RemoteError,
    RemoteStreamService, SenderEngine, TracingNotifier, TriggerOutcome,
};

fn context(doc: Arc<MemoryDocument>, store: Arc<MemoryStreamService>, cache: ObjectCache) -> EngineContext {
    EngineContext {
        document: doc,
        remote: store,
        converter: Arc::new(JsonConverter),
        notifier: Arc::new(TracingNotifier),
        renderer: Arc::new(NullRenderer),
        cache,
        config: SyncConfig::default(),
    }
}

fn draw(doc: &MemoryDocument, layer: &str, n: usize) -> Vec<ObjectId> {
    let layer = doc.ensure_layer_path(layer, Color::rgb(10, 20, 30)).expect("layer");
    (0..n)
        .map(|i| doc.add_object(point(&format!("p{i}"), i as f64, 1.0), layer).expect("object"))
        .collect()
}

#[tokio::test]
async fn sender_broadcast_drives_receiver_pull() {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = Arc::new(MemoryStreamService::new());

    let source = Arc::new(MemoryDocument::new("source.3dm"));
    let sender = SenderEngine::create(context(source.clone(), store.clone(), ObjectCache::new()), "Loop")
        .await
        .expect("sender");
    let stream = sender.client().stream_id.clone();

    let target = Arc::new(MemoryDocument::new("target.3dm"));
    let mut ctx = context(target.clone(), store.clone(), ObjectCache::new());
    let renderer = Arc::new(RecordingRenderer::new());
    ctx.renderer = renderer.clone();
    let (receiver, mut feed) = ReceiverEngine::create(ctx, &stream).await.expect("receiver");
    assert_eq!(receiver.display().len(), 0);

    let ids = draw(&source, "Walls", 3);
    sender.add_tracked_objects(&ids).expect("track");
    assert_eq!(sender.trigger().await.cycles(), 1);

    let message = feed.try_recv().expect("update-global relayed");
    assert_eq!(message.event, InboundEvent::UpdateGlobal);
    let MessageOutcome::Pulled(Ok(report)) = receiver.handle_message(&message).await else {
        panic!("expected a pull");
    };
    assert_eq!(report.fetched, 3);
    assert_eq!(receiver.display().len(), 3);
    assert_eq!(receiver.snapshot().layers, sender.snapshot().layers);
    let frame = renderer.last_frame().expect("rendered");
    assert!(frame.triples().all(|(g, c, v)| g.is_some() && c == Color::rgb(10, 20, 30) && v));

    receiver.bake().expect("bake");
    let root = format!("Loop | {stream}");
    assert_eq!(target.layer_paths(), [root.clone(), format!("{root}::Walls")]);
    assert_eq!(target.live_objects().len(), 3);
}

#[tokio::test]
async fn shared_cache_lets_an_in_process_receiver_skip_the_fetch() {
    let store = Arc::new(MemoryStreamService::new());
    let cache = ObjectCache::new();
    let doc = Arc::new(MemoryDocument::new("same.3dm"));

    let sender = SenderEngine::create(context(doc.clone(), store.clone(), cache.clone()), "Shared")
        .await
        .expect("sender");
    let ids = draw(&doc, "A", 4);
    sender.add_tracked_objects(&ids).expect("track");
    sender.trigger().await;

    let (receiver, _feed) = ReceiverEngine::create(context(doc, store.clone(), cache), &sender.client().stream_id)
        .await
        .expect("receiver");
    assert!(store.calls().fetched.is_empty());
    assert_eq!(receiver.display().len(), 4);
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn burst_of_edits_coalesces_into_one_cycle() {
    let store = Arc::new(MemoryStreamService::new());
    let doc = Arc::new(MemoryDocument::new("burst.3dm"));
    let sender = Arc::new(
        SenderEngine::create(context(doc.clone(), store.clone(), ObjectCache::new()), "Burst")
            .await
            .expect("sender"),
    );
    let (scheduler, mut fired) = DebounceScheduler::new(Duration::from_millis(2000));

    let signals = Arc::new(AtomicUsize::new(0));
    let subscription = {
        let scheduler = scheduler.clone();
        let signals = signals.clone();
        let gate = sender.clone();
        ChangeTracker::new(sender.client().stream_id.clone()).attach(&*doc, move |stream, _| {
            signals.fetch_add(1, Ordering::SeqCst);
            if gate.accept_change() {
                scheduler.signal(stream);
            }
        })
    };
    sender.attach_subscription(subscription);

    let ids = draw(&doc, "A", 5);
    sender.add_tracked_objects(&ids).expect("track");
    for id in &ids {
        doc.modify_attributes(id, |a| a.name = Some("edited".to_string()))
            .expect("edit");
    }
    assert!(signals.load(Ordering::SeqCst) >= 10);

    tokio::time::advance(Duration::from_millis(2100)).await;
    let stream = fired.recv().await.expect("debounce fired");
    assert_eq!(stream, sender.client().stream_id);
    assert!(matches!(sender.trigger().await, TriggerOutcome::Ran(ref r) if r.len() == 1));
    assert!(fired.try_recv().is_err());
    assert_eq!(store.calls().stream_updates, 1);

    // a second edit after the window is its own cycle
    doc.modify_attributes(&ids[0], |a| a.name = Some("again".to_string()))
        .expect("edit");
    tokio::time::advance(Duration::from_millis(2100)).await;
    fired.recv().await.expect("second fire");
    sender.trigger().await;
    assert_eq!(store.calls().stream_updates, 2);
}

/// Store whose next metadata read returns an older snapshot and then relays
/// the sender's `update-global`, as if the sender committed mid-read.
struct RacingStore {
    inner: Arc<MemoryStreamService>,
    stale: Mutex<Option<(StreamSnapshot, ClientId)>>,
}

#[async_trait]
impl RemoteStreamService for RacingStore {
    fn server_url(&self) -> String {
        self.inner.server_url()
    }

    async fn create_stream(&self, name: &str) -> Result<StreamSnapshot, RemoteError> {
        self.inner.create_stream(name).await
    }

    async fn register_client(&self, stream_id: &StreamId, role: ClientRole) -> Result<ClientId, RemoteError> {
        self.inner.register_client(stream_id, role).await
    }

    async fn get_stream(&self, stream_id: &StreamId) -> Result<StreamSnapshot, RemoteError> {
        let stale = self.stale.lock().expect("stale").take();
        let Some((snapshot, sender)) = stale else {
            return self.inner.get_stream(stream_id).await;
        };
        let update = InboundMessage::new(InboundEvent::UpdateGlobal, stream_id.clone());
        self.inner.broadcast(stream_id, &sender, update).await?;
        Ok(snapshot)
    }

    async fn update_stream(&self, snapshot: &StreamSnapshot) -> Result<Vec<RemoteId>, RemoteError> {
        self.inner.update_stream(snapshot).await
    }

    async fn create_objects(&self, objects: &[PortableObject]) -> Result<Vec<RemoteId>, RemoteError> {
        self.inner.create_objects(objects).await
    }

    async fn get_objects(&self, ids: &[RemoteId], omit: &[String]) -> Result<Vec<PortableObject>, RemoteError> {
        self.inner.get_objects(ids, omit).await
    }

    async fn broadcast(&self, stream_id: &StreamId, from: &ClientId, message: InboundMessage) -> Result<(), RemoteError> {
        self.inner.broadcast(stream_id, from, message).await
    }

    async fn subscribe(&self, stream_id: &StreamId, client: &ClientId) -> Result<MessageFeed, RemoteError> {
        self.inner.subscribe(stream_id, client).await
    }
}

#[tokio::test]
async fn update_relayed_during_the_first_pull_reaches_the_receiver() {
    let store = Arc::new(MemoryStreamService::new());
    let source = Arc::new(MemoryDocument::new("source.3dm"));
    let sender = SenderEngine::create(context(source.clone(), store.clone(), ObjectCache::new()), "Race")
        .await
        .expect("sender");
    let stream = sender.client().stream_id.clone();
    let before = store.get_stream(&stream).await.expect("stream");
    let ids = draw(&source, "Walls", 3);
    sender.add_tracked_objects(&ids).expect("track");
    assert_eq!(sender.trigger().await.cycles(), 1);

    let racing = Arc::new(RacingStore {
        inner: store.clone(),
        stale: Mutex::new(Some((before, sender.client().client_id.clone()))),
    });
    let mut ctx = context(Arc::new(MemoryDocument::new("target.3dm")), store, ObjectCache::new());
    ctx.remote = racing;
    let (receiver, mut feed) = ReceiverEngine::create(ctx, &stream).await.expect("receiver");

    let message = feed.try_recv().expect("update queued while the pull ran");
    assert_eq!(message.event, InboundEvent::UpdateGlobal);
    assert!(matches!(receiver.handle_message(&message).await, MessageOutcome::Pulled(Ok(_))));
    assert_eq!(receiver.display().len(), 3);
    assert_eq!(receiver.snapshot().objects, sender.snapshot().objects);
}
