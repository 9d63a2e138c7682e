//! Change tracker: turns document events into dirty signals for one stream.

use layersync_core::document::{
    DocumentEvent, DocumentEventSource, ObjectAttributes, Subscription, TrackingTag,
};
use layersync_core::types::StreamId;

/// How an event relates to a stream's tracked set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSignal {
    /// The tracked set changed; a sync cycle is due.
    Dirty,
    Ignored,
}

#[derive(Debug, Clone)]
pub struct ChangeTracker {
    stream_id: StreamId,
    tag: TrackingTag,
}

impl ChangeTracker {
    pub fn new(stream_id: StreamId) -> Self {
        let tag = TrackingTag::for_stream(&stream_id);
        Self { stream_id, tag }
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn classify(&self, event: &DocumentEvent) -> ChangeSignal {
        let dirty = match event {
            DocumentEvent::ObjectAdded(object)
            | DocumentEvent::ObjectDeleted(object)
            | DocumentEvent::ObjectUndeleted(object) => self.tag.matches(&object.attributes),
            DocumentEvent::AttributesModified { old, new, .. } => {
                // An object leaving the set is a change too, so either side counts.
                !same_serialization(old, new) && (self.tag.matches(old) || self.tag.matches(new))
            }
            DocumentEvent::LayerTableChanged { .. } => true,
        };
        if dirty {
            ChangeSignal::Dirty
        } else {
            ChangeSignal::Ignored
        }
    }

    /// Subscribe to `source`; `on_dirty` runs on the event thread for every
    /// dirty event. Dropping the returned subscription stops tracking.
    pub fn attach(
        self,
        source: &dyn DocumentEventSource,
        on_dirty: impl Fn(&StreamId, &DocumentEvent) + Send + Sync + 'static,
    ) -> Subscription {
        source.subscribe(Box::new(move |event| {
            if self.classify(event) == ChangeSignal::Dirty {
                tracing::debug!("[{}] dirty: {}", self.stream_id, event.kind());
                on_dirty(&self.stream_id, event);
            }
        }))
    }
}

/// Attribute snapshots that serialize identically are the same edit echoed
/// back (for instance the engine writing its own tag).
fn same_serialization(old: &ObjectAttributes, new: &ObjectAttributes) -> bool {
    match (serde_json::to_vec(old), serde_json::to_vec(new)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
