//! Geometry converter seam.

use layersync_core::document::Geometry;
use layersync_core::types::PortableObject;

use crate::error::SyncError;

/// Maps native geometry to the wire representation and back.
pub trait GeometryConverter: Send + Sync {
    fn to_portable(&self, geometry: &Geometry) -> Result<PortableObject, SyncError>;

    /// `None` when the object has no native counterpart (placeholders,
    /// unsupported types).
    fn to_native(&self, object: &PortableObject) -> Option<Geometry>;
}

/// Pass-through converter: the geometry kind becomes the object type and
/// the geometry data becomes the body.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonConverter;

impl GeometryConverter for JsonConverter {
    fn to_portable(&self, geometry: &Geometry) -> Result<PortableObject, SyncError> {
        if geometry.kind.is_empty() {
            return Err(SyncError::Conversion("geometry has no kind".to_string()));
        }
        Ok(PortableObject::new(geometry.kind.clone(), geometry.data.clone()))
    }

    fn to_native(&self, object: &PortableObject) -> Option<Geometry> {
        if object.is_placeholder() {
            return None;
        }
        Some(Geometry::new(object.object_type.clone(), object.body.clone()))
    }
}
