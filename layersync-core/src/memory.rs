//! In-memory [`Document`] with a synchronous event source.
//!
//! Used by tests and loopback setups. Every mutation emits the same events a
//! host document would, after the internal lock is released, so handlers may
//! call back into the document.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::document::{
    Document, DocumentEvent, DocumentEventSource, DocumentObject, DocumentSettings, EventHandler,
    Geometry, Layer, NewLayer, ObjectAttributes, Subscription, TrackingTag,
};
use crate::error::DocumentError;
use crate::types::{Color, ObjectId, LAYER_PATH_SEPARATOR};

type HandlerList = Vec<(u64, Arc<dyn Fn(&DocumentEvent) + Send + Sync>)>;

#[derive(Debug, Clone)]
struct StoredObject {
    object: DocumentObject,
    deleted: bool,
}

#[derive(Debug, Default)]
struct DocState {
    layers: Vec<Option<Layer>>,
    objects: Vec<StoredObject>,
    next_object: u64,
    next_layer_id: u64,
    redraws: usize,
}

impl DocState {
    fn live_layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index).and_then(Option::as_ref)
    }

    fn full_path(&self, index: usize) -> Option<String> {
        let mut segments = Vec::new();
        let mut cursor = Some(index);
        while let Some(i) = cursor {
            let layer = self.live_layer(i)?;
            segments.push(layer.name.clone());
            cursor = layer.parent;
        }
        segments.reverse();
        Some(segments.join(LAYER_PATH_SEPARATOR))
    }

    fn descendants(&self, index: usize) -> Vec<usize> {
        let mut out = vec![index];
        let mut cursor = 0;
        while cursor < out.len() {
            let parent = out[cursor];
            cursor += 1;
            for layer in self.layers.iter().flatten() {
                if layer.parent == Some(parent) {
                    out.push(layer.index);
                }
            }
        }
        out
    }

    fn object_mut(&mut self, id: &ObjectId) -> Option<&mut StoredObject> {
        self.objects.iter_mut().find(|stored| &stored.object.id == id)
    }
}

/// Thread-safe in-memory document.
#[derive(Default)]
pub struct MemoryDocument {
    name: String,
    settings: DocumentSettings,
    state: Mutex<DocState>,
    handlers: Arc<Mutex<HandlerList>>,
    next_handler: Mutex<u64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryDocument {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_settings(mut self, settings: DocumentSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Create every missing segment of `path` and return the leaf layer.
    pub fn ensure_layer_path(&self, path: &str, color: Color) -> Result<usize, DocumentError> {
        let mut parent: Option<usize> = None;
        let mut walked = String::new();
        for segment in path.split(LAYER_PATH_SEPARATOR) {
            if !walked.is_empty() {
                walked.push_str(LAYER_PATH_SEPARATOR);
            }
            walked.push_str(segment);
            parent = Some(match self.find_layer_by_path(&walked) {
                Some(index) => index,
                None => self.add_layer(NewLayer::new(segment, parent, color))?,
            });
        }
        parent.ok_or_else(|| DocumentError::InvalidLayerName(path.to_string()))
    }

    /// Add an object with explicit attributes (e.g. pre-tagged).
    pub fn insert_object(
        &self,
        geometry: Geometry,
        attributes: ObjectAttributes,
    ) -> Result<ObjectId, DocumentError> {
        let object = {
            let mut state = lock(&self.state);
            if state.live_layer(attributes.layer_index).is_none() {
                return Err(DocumentError::LayerNotFound(attributes.layer_index));
            }
            state.next_object += 1;
            let object = DocumentObject {
                id: ObjectId(format!("obj-{:06}", state.next_object)),
                geometry,
                attributes,
            };
            state.objects.push(StoredObject {
                object: object.clone(),
                deleted: false,
            });
            object
        };
        let id = object.id.clone();
        self.emit(&DocumentEvent::ObjectAdded(object));
        Ok(id)
    }

    pub fn delete_object(&self, id: &ObjectId) -> Result<(), DocumentError> {
        let object = {
            let mut state = lock(&self.state);
            let stored = state
                .object_mut(id)
                .filter(|stored| !stored.deleted)
                .ok_or_else(|| DocumentError::ObjectNotFound(id.clone()))?;
            stored.deleted = true;
            stored.object.clone()
        };
        self.emit(&DocumentEvent::ObjectDeleted(object));
        Ok(())
    }

    pub fn undelete_object(&self, id: &ObjectId) -> Result<(), DocumentError> {
        let object = {
            let mut state = lock(&self.state);
            let stored = state
                .object_mut(id)
                .filter(|stored| stored.deleted)
                .ok_or_else(|| DocumentError::ObjectNotFound(id.clone()))?;
            stored.deleted = false;
            stored.object.clone()
        };
        self.emit(&DocumentEvent::ObjectUndeleted(object));
        Ok(())
    }

    /// Apply `edit` to an object's attributes and emit `AttributesModified`.
    pub fn modify_attributes(
        &self,
        id: &ObjectId,
        edit: impl FnOnce(&mut ObjectAttributes),
    ) -> Result<(), DocumentError> {
        let event = {
            let mut state = lock(&self.state);
            let stored = state
                .object_mut(id)
                .filter(|stored| !stored.deleted)
                .ok_or_else(|| DocumentError::ObjectNotFound(id.clone()))?;
            let old = stored.object.attributes.clone();
            edit(&mut stored.object.attributes);
            DocumentEvent::AttributesModified {
                object: stored.object.clone(),
                old,
                new: stored.object.attributes.clone(),
            }
        };
        self.emit(&event);
        Ok(())
    }

    /// Replace an object's geometry in place (no event, like a host-side
    /// geometry edit that is reported separately).
    pub fn replace_geometry(&self, id: &ObjectId, geometry: Geometry) -> Result<(), DocumentError> {
        let mut state = lock(&self.state);
        let stored = state
            .object_mut(id)
            .ok_or_else(|| DocumentError::ObjectNotFound(id.clone()))?;
        stored.object.geometry = geometry;
        Ok(())
    }

    /// Live objects on one layer, in document order.
    pub fn objects_on_layer(&self, index: usize) -> Vec<DocumentObject> {
        lock(&self.state)
            .objects
            .iter()
            .filter(|stored| !stored.deleted && stored.object.attributes.layer_index == index)
            .map(|stored| stored.object.clone())
            .collect()
    }

    pub fn live_objects(&self) -> Vec<DocumentObject> {
        lock(&self.state)
            .objects
            .iter()
            .filter(|stored| !stored.deleted)
            .map(|stored| stored.object.clone())
            .collect()
    }

    /// Full paths of every live layer, sorted.
    pub fn layer_paths(&self) -> Vec<String> {
        let state = lock(&self.state);
        let mut paths: Vec<String> = state
            .layers
            .iter()
            .flatten()
            .filter_map(|layer| state.full_path(layer.index))
            .collect();
        paths.sort();
        paths
    }

    pub fn redraw_count(&self) -> usize {
        lock(&self.state).redraws
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.handlers).len()
    }

    fn emit(&self, event: &DocumentEvent) {
        let handlers: Vec<_> = lock(&self.handlers)
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(event);
        }
    }
}

impl Document for MemoryDocument {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn tagged_objects(&self, tag: &TrackingTag) -> Vec<DocumentObject> {
        lock(&self.state)
            .objects
            .iter()
            .filter(|stored| !stored.deleted && tag.matches(&stored.object.attributes))
            .map(|stored| stored.object.clone())
            .collect()
    }

    fn find_object(&self, id: &ObjectId) -> Option<DocumentObject> {
        lock(&self.state)
            .objects
            .iter()
            .find(|stored| !stored.deleted && &stored.object.id == id)
            .map(|stored| stored.object.clone())
    }

    fn set_user_string(
        &self,
        id: &ObjectId,
        key: &str,
        value: Option<&str>,
    ) -> Result<(), DocumentError> {
        self.modify_attributes(id, |attrs| match value {
            Some(value) => {
                attrs.user_strings.insert(key.to_string(), value.to_string());
            }
            None => {
                attrs.user_strings.remove(key);
            }
        })
    }

    fn layer(&self, index: usize) -> Option<Layer> {
        lock(&self.state).live_layer(index).cloned()
    }

    fn find_layer_by_id(&self, id: &str) -> Option<usize> {
        lock(&self.state)
            .layers
            .iter()
            .flatten()
            .find(|layer| layer.id == id)
            .map(|layer| layer.index)
    }

    fn find_layer_by_path(&self, full_path: &str) -> Option<usize> {
        let state = lock(&self.state);
        state
            .layers
            .iter()
            .flatten()
            .find(|layer| state.full_path(layer.index).as_deref() == Some(full_path))
            .map(|layer| layer.index)
    }

    fn layer_full_path(&self, index: usize) -> Option<String> {
        lock(&self.state).full_path(index)
    }

    fn child_layers(&self, index: usize) -> Vec<usize> {
        lock(&self.state)
            .layers
            .iter()
            .flatten()
            .filter(|layer| layer.parent == Some(index))
            .map(|layer| layer.index)
            .collect()
    }

    fn add_layer(&self, layer: NewLayer) -> Result<usize, DocumentError> {
        if layer.name.is_empty() || layer.name.contains(LAYER_PATH_SEPARATOR) {
            return Err(DocumentError::InvalidLayerName(layer.name));
        }
        let index = {
            let mut state = lock(&self.state);
            if let Some(parent) = layer.parent {
                if state.live_layer(parent).is_none() {
                    return Err(DocumentError::LayerNotFound(parent));
                }
            }
            let id = match layer.id {
                Some(id) => {
                    if state.layers.iter().flatten().any(|l| l.id == id) {
                        return Err(DocumentError::DuplicateLayerId(id));
                    }
                    id
                }
                None => {
                    state.next_layer_id += 1;
                    format!("layer-{:04}", state.next_layer_id)
                }
            };
            let index = state.layers.len();
            state.layers.push(Some(Layer {
                index,
                id,
                name: layer.name,
                parent: layer.parent,
                color: layer.color,
                visible: layer.visible,
            }));
            index
        };
        self.emit(&DocumentEvent::LayerTableChanged { layer: Some(index) });
        Ok(index)
    }

    fn purge_layer(&self, index: usize) -> Result<(), DocumentError> {
        {
            let mut state = lock(&self.state);
            if state.live_layer(index).is_none() {
                return Err(DocumentError::LayerNotFound(index));
            }
            let doomed = state.descendants(index);
            state
                .objects
                .retain(|stored| !doomed.contains(&stored.object.attributes.layer_index));
            for i in doomed {
                if let Some(slot) = state.layers.get_mut(i) {
                    *slot = None;
                }
            }
        }
        self.emit(&DocumentEvent::LayerTableChanged { layer: Some(index) });
        Ok(())
    }

    fn add_object(&self, geometry: Geometry, layer: usize) -> Result<ObjectId, DocumentError> {
        self.insert_object(geometry, ObjectAttributes::on_layer(layer))
    }

    fn settings(&self) -> DocumentSettings {
        self.settings.clone()
    }

    fn redraw(&self) {
        lock(&self.state).redraws += 1;
    }
}

impl DocumentEventSource for MemoryDocument {
    fn subscribe(&self, handler: EventHandler) -> Subscription {
        let id = {
            let mut next = lock(&self.next_handler);
            *next += 1;
            *next
        };
        lock(&self.handlers).push((id, Arc::from(handler)));

        let handlers: Weak<Mutex<HandlerList>> = Arc::downgrade(&self.handlers);
        Subscription::new(move || {
            if let Some(handlers) = handlers.upgrade() {
                lock(&handlers).retain(|(handler_id, _)| *handler_id != id);
            }
        })
    }
}

/// Geometry stub convenient for tests: a point with a label.
pub fn point(label: &str, x: f64, y: f64) -> Geometry {
    Geometry::new("Point", serde_json::json!({ "label": label, "x": x, "y": y }))
}

/// Attribute snapshot on `layer` with the given user strings.
pub fn attributes_with(layer: usize, user_strings: &[(&str, &str)]) -> ObjectAttributes {
    ObjectAttributes {
        layer_index: layer,
        name: None,
        user_strings: user_strings
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn ensure_layer_path_reuses_existing_segments() {
        let doc = MemoryDocument::new("doc");
        let walls = doc.ensure_layer_path("Site::Walls", Color::BLACK).unwrap();
        let roof = doc.ensure_layer_path("Site::Roof", Color::BLACK).unwrap();
        assert_ne!(walls, roof);
        assert_eq!(doc.layer_paths(), ["Site", "Site::Roof", "Site::Walls"]);
        assert_eq!(doc.layer_full_path(roof).as_deref(), Some("Site::Roof"));
    }

    #[test]
    fn purge_removes_sublayers_and_their_objects() {
        let doc = MemoryDocument::new("doc");
        let leaf = doc.ensure_layer_path("Root::A::B", Color::BLACK).unwrap();
        let root = doc.find_layer_by_path("Root").unwrap();
        let a = doc.find_layer_by_path("Root::A").unwrap();
        doc.add_object(point("p", 0.0, 0.0), leaf).unwrap();

        doc.purge_layer(a).unwrap();
        assert_eq!(doc.layer_paths(), ["Root"]);
        assert!(doc.live_objects().is_empty());
        assert!(doc.child_layers(root).is_empty());
    }

    #[test]
    fn tagged_objects_skip_deleted() {
        let doc = MemoryDocument::new("doc");
        let layer = doc.ensure_layer_path("A", Color::BLACK).unwrap();
        let id = doc
            .insert_object(point("p", 0.0, 0.0), attributes_with(layer, &[("k", "v")]))
            .unwrap();
        let tag_attrs = attributes_with(layer, &[("k", "v")]);
        assert_eq!(doc.live_objects()[0].attributes, tag_attrs);

        doc.delete_object(&id).unwrap();
        assert!(doc.find_object(&id).is_none());
        doc.undelete_object(&id).unwrap();
        assert!(doc.contains_object(&id));
    }

    #[test]
    fn dropping_subscription_stops_delivery() {
        let doc = MemoryDocument::new("doc");
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let sub = doc.subscribe(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        doc.ensure_layer_path("A", Color::BLACK).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(doc.subscriber_count(), 1);

        drop(sub);
        doc.ensure_layer_path("B", Color::BLACK).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(doc.subscriber_count(), 0);
    }

    #[test]
    fn duplicate_layer_ids_are_rejected() {
        let doc = MemoryDocument::new("doc");
        doc.add_layer(NewLayer::new("A", None, Color::BLACK).with_id("g1"))
            .unwrap();
        let err = doc
            .add_layer(NewLayer::new("B", None, Color::BLACK).with_id("g1"))
            .unwrap_err();
        assert_eq!(err, DocumentError::DuplicateLayerId("g1".to_string()));
    }
}
