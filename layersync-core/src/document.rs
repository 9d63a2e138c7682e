//! Document abstraction: the host CAD document as seen by the sync engines.
//!
//! The engines never reach for a global "active document"; every engine is
//! constructed with an `Arc<dyn Document>` handle. Document scans are
//! synchronous and must complete without yielding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DocumentError;
use crate::types::{BaseProperties, Color, ObjectId, StreamId};

/// Native geometry, opaque to the engines. Conversion to and from the wire
/// representation is the geometry converter's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl Geometry {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

/// Attribute snapshot of a document object.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectAttributes {
    pub layer_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub user_strings: BTreeMap<String, String>,
}

impl ObjectAttributes {
    pub fn on_layer(layer_index: usize) -> Self {
        Self {
            layer_index,
            ..Self::default()
        }
    }

    pub fn user_string(&self, key: &str) -> Option<&str> {
        self.user_strings.get(key).map(String::as_str)
    }
}

/// A live object in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentObject {
    pub id: ObjectId,
    pub geometry: Geometry,
    pub attributes: ObjectAttributes,
}

/// A document layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub index: usize,
    pub id: String,
    pub name: String,
    pub parent: Option<usize>,
    pub color: Color,
    pub visible: bool,
}

/// Request to create a layer.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLayer {
    pub name: String,
    /// Requested layer id; the document assigns one when `None`.
    pub id: Option<String>,
    pub parent: Option<usize>,
    pub color: Color,
    pub visible: bool,
    pub user_strings: BTreeMap<String, String>,
}

impl NewLayer {
    pub fn new(name: impl Into<String>, parent: Option<usize>, color: Color) -> Self {
        Self {
            name: name.into(),
            id: None,
            parent,
            color,
            visible: true,
            user_strings: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_user_string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_strings.insert(key.into(), value.into());
        self
    }
}

/// Model-wide settings pushed as stream base properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSettings {
    pub unit_system: String,
    pub absolute_tolerance: f64,
    pub angle_tolerance_radians: f64,
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            unit_system: "Millimeters".to_string(),
            absolute_tolerance: 0.001,
            angle_tolerance_radians: 1.0_f64.to_radians(),
        }
    }
}

impl DocumentSettings {
    pub fn base_properties(&self) -> BaseProperties {
        let mut props = BaseProperties::new();
        props.insert("units".to_string(), Value::from(self.unit_system.clone()));
        props.insert("tolerance".to_string(), Value::from(self.absolute_tolerance));
        props.insert(
            "angleTolerance".to_string(),
            Value::from(self.angle_tolerance_radians),
        );
        props
    }
}

/// User-string tag marking an object as a member of a stream's tracked set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingTag {
    key: String,
    value: String,
}

impl TrackingTag {
    pub fn for_stream(stream_id: &StreamId) -> Self {
        Self {
            key: format!("layersync_{stream_id}"),
            value: stream_id.0.clone(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn matches(&self, attributes: &ObjectAttributes) -> bool {
        attributes.user_string(&self.key) == Some(self.value.as_str())
    }
}

/// Document-context handle injected into every engine.
pub trait Document: Send + Sync {
    /// Display name, used to key persisted sessions.
    fn name(&self) -> String;

    /// Live objects carrying `tag`, in document order.
    fn tagged_objects(&self, tag: &TrackingTag) -> Vec<DocumentObject>;

    fn find_object(&self, id: &ObjectId) -> Option<DocumentObject>;

    fn contains_object(&self, id: &ObjectId) -> bool {
        self.find_object(id).is_some()
    }

    /// Set (`Some`) or clear (`None`) a user string on an object.
    fn set_user_string(
        &self,
        id: &ObjectId,
        key: &str,
        value: Option<&str>,
    ) -> Result<(), DocumentError>;

    fn layer(&self, index: usize) -> Option<Layer>;

    fn find_layer_by_id(&self, id: &str) -> Option<usize>;

    /// Layer whose `::`-joined full path equals `full_path`.
    fn find_layer_by_path(&self, full_path: &str) -> Option<usize>;

    fn layer_full_path(&self, index: usize) -> Option<String>;

    /// Direct children of a layer.
    fn child_layers(&self, index: usize) -> Vec<usize>;

    fn add_layer(&self, layer: NewLayer) -> Result<usize, DocumentError>;

    /// Delete a layer together with its sub-layers and their objects.
    fn purge_layer(&self, index: usize) -> Result<(), DocumentError>;

    fn add_object(&self, geometry: Geometry, layer: usize) -> Result<ObjectId, DocumentError>;

    fn settings(&self) -> DocumentSettings;

    /// Ask the host to repaint its views.
    fn redraw(&self) {}
}

/// Notification from the document event source.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentEvent {
    ObjectAdded(DocumentObject),
    ObjectDeleted(DocumentObject),
    ObjectUndeleted(DocumentObject),
    AttributesModified {
        object: DocumentObject,
        old: ObjectAttributes,
        new: ObjectAttributes,
    },
    LayerTableChanged {
        layer: Option<usize>,
    },
}

impl DocumentEvent {
    /// The object the event is about, if any.
    pub fn object(&self) -> Option<&DocumentObject> {
        match self {
            DocumentEvent::ObjectAdded(object)
            | DocumentEvent::ObjectDeleted(object)
            | DocumentEvent::ObjectUndeleted(object)
            | DocumentEvent::AttributesModified { object, .. } => Some(object),
            DocumentEvent::LayerTableChanged { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DocumentEvent::ObjectAdded(_) => "object-added",
            DocumentEvent::ObjectDeleted(_) => "object-deleted",
            DocumentEvent::ObjectUndeleted(_) => "object-undeleted",
            DocumentEvent::AttributesModified { .. } => "attributes-modified",
            DocumentEvent::LayerTableChanged { .. } => "layer-table-changed",
        }
    }
}

pub type EventHandler = Box<dyn Fn(&DocumentEvent) + Send + Sync>;

/// Observer registration on the host's document events.
pub trait DocumentEventSource: Send + Sync {
    fn subscribe(&self, handler: EventHandler) -> Subscription;
}

/// Scoped registration: dropping it unsubscribes the handler.
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A subscription with nothing to release.
    pub fn detached() -> Self {
        Self { release: None }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracking_tag_matches_only_its_stream() {
        let tag = TrackingTag::for_stream(&StreamId::from("s1"));
        let mut attrs = ObjectAttributes::on_layer(0);
        assert!(!tag.matches(&attrs));

        attrs
            .user_strings
            .insert(tag.key().to_string(), "s2".to_string());
        assert!(!tag.matches(&attrs));

        attrs
            .user_strings
            .insert(tag.key().to_string(), tag.value().to_string());
        assert!(tag.matches(&attrs));
    }

    #[test]
    fn base_properties_carry_units_and_tolerances() {
        let props = DocumentSettings::default().base_properties();
        assert_eq!(props["units"], "Millimeters");
        assert!(props.contains_key("tolerance"));
        assert!(props.contains_key("angleTolerance"));
    }

    #[test]
    fn dropping_subscription_runs_release_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let sub = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(sub);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
