//! Collaborators shared by every engine.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use layersync_core::document::Document;
use layersync_core::types::StreamId;
use layersync_core::SyncConfig;
use layersync_display::SceneRenderer;

use crate::cache::ObjectCache;
use crate::convert::GeometryConverter;
use crate::notify::{Notification, NotificationKind, Notifier};
use crate::remote::RemoteStreamService;

/// Everything an engine talks to, injected at construction.
#[derive(Clone)]
pub struct EngineContext {
    pub document: Arc<dyn Document>,
    pub remote: Arc<dyn RemoteStreamService>,
    pub converter: Arc<dyn GeometryConverter>,
    pub notifier: Arc<dyn Notifier>,
    pub renderer: Arc<dyn SceneRenderer>,
    pub cache: ObjectCache,
    pub config: SyncConfig,
}

impl EngineContext {
    pub(crate) fn notify(&self, kind: NotificationKind, stream_id: &StreamId, payload: Value) {
        self.notifier
            .notify(Notification::new(kind, stream_id.clone(), payload));
    }

    pub(crate) fn progress(&self, stream_id: &StreamId, message: impl Into<String>) {
        self.notify(
            NotificationKind::ClientProgressMessage,
            stream_id,
            serde_json::json!({ "message": message.into() }),
        );
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
