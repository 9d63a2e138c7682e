//! Content hashing of portable objects.
//!
//! The digest covers the object type and body only. Identity fields
//! (`applicationId`, `remoteId`) and the hash itself are excluded so two
//! documents holding identical geometry share one upload.

use serde_json::json;
use sha2::{Digest, Sha256};

use layersync_core::types::{ContentHash, PortableObject};

use crate::error::SyncError;

/// SHA-256 hex digest of the object's type and body.
pub fn content_hash(object: &PortableObject) -> Result<ContentHash, SyncError> {
    let canonical = serde_json::to_vec(&json!({
        "type": object.object_type,
        "body": object.body,
    }))?;
    let mut h = Sha256::new();
    h.update(&canonical);
    Ok(ContentHash(hex::encode(h.finalize())))
}

/// Compute and store the object's hash, returning it.
pub fn stamp(object: &mut PortableObject) -> Result<ContentHash, SyncError> {
    let hash = content_hash(object)?;
    object.hash = Some(hash.clone());
    Ok(hash)
}
