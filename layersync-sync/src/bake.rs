//! Bake: materialize a received stream into the document's layer tree.
//!
//! Every layer is nested under one root layer named `"<name> | <stream id>"`.
//! A full bake is a destructive replace: when the root already exists its
//! sub-layers, and the objects on them, are purged first.

use serde::Serialize;

use layersync_core::document::{Document, NewLayer};
use layersync_core::types::{Color, LayerDescriptor, StreamSnapshot, LAYER_PATH_SEPARATOR};
use layersync_display::DisplayConduit;
use tracing::{debug, info};

use crate::error::SyncError;

/// User string placed on the root layer so it can be traced to its stream.
pub const ROOT_LAYER_KEY: &str = "layersync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BakeReport {
    pub root_layer: usize,
    pub layers_created: usize,
    pub objects_added: usize,
    /// Items skipped because they are already in the document or have no
    /// native geometry.
    pub objects_skipped: usize,
}

/// Bake every layer of the snapshot.
pub fn bake(
    document: &dyn Document,
    snapshot: &StreamSnapshot,
    display: &mut DisplayConduit,
    fallback: Color,
) -> Result<BakeReport, SyncError> {
    check_ranges(snapshot.layers.iter(), display)?;
    let mut report = BakeReport::default();
    let root_name = snapshot.root_layer_name();

    report.root_layer = match document.find_layer_by_path(&root_name) {
        Some(root) => {
            for child in document.child_layers(root) {
                document.purge_layer(child)?;
            }
            root
        }
        None => {
            report.layers_created += 1;
            create_root(document, snapshot)?
        }
    };

    for descriptor in &snapshot.layers {
        let leaf = ensure_layer(document, &root_name, report.root_layer, descriptor, fallback, &mut report)?;
        add_objects(document, descriptor, leaf, display, &mut report)?;
    }

    document.redraw();
    info!(
        "baked {}: {} layers created, {} objects added",
        root_name, report.layers_created, report.objects_added
    );
    Ok(report)
}

/// Bake one layer, replacing only `<root>::<layer name>`.
pub fn bake_layer(
    document: &dyn Document,
    snapshot: &StreamSnapshot,
    display: &mut DisplayConduit,
    layer_guid: &str,
    fallback: Color,
) -> Result<BakeReport, SyncError> {
    let descriptor = snapshot
        .layer_by_guid(layer_guid)
        .ok_or_else(|| SyncError::LayerNotFound(layer_guid.to_string()))?;
    check_ranges(std::iter::once(descriptor), display)?;
    let mut report = BakeReport::default();
    let root_name = snapshot.root_layer_name();

    report.root_layer = match document.find_layer_by_path(&root_name) {
        Some(root) => {
            let full_path = format!("{root_name}{LAYER_PATH_SEPARATOR}{}", descriptor.name);
            if let Some(previous) = document.find_layer_by_path(&full_path) {
                document.purge_layer(previous)?;
            }
            root
        }
        None => {
            report.layers_created += 1;
            create_root(document, snapshot)?
        }
    };

    let leaf = ensure_layer(document, &root_name, report.root_layer, descriptor, fallback, &mut report)?;
    add_objects(document, descriptor, leaf, display, &mut report)?;
    document.redraw();
    Ok(report)
}

fn check_ranges<'a>(
    layers: impl Iterator<Item = &'a LayerDescriptor>,
    display: &DisplayConduit,
) -> Result<(), SyncError> {
    for layer in layers {
        if layer.range().end > display.len() {
            return Err(SyncError::Protocol(format!(
                "layer {:?} covers {:?} but only {} objects are loaded",
                layer.name,
                layer.range(),
                display.len()
            )));
        }
    }
    Ok(())
}

fn create_root(document: &dyn Document, snapshot: &StreamSnapshot) -> Result<usize, SyncError> {
    let layer = NewLayer::new(snapshot.root_layer_name(), None, Color::BLACK)
        .with_user_string(ROOT_LAYER_KEY, snapshot.stream_id.as_str());
    Ok(document.add_layer(layer)?)
}

/// Walk the descriptor's path below the root, creating missing segments.
fn ensure_layer(
    document: &dyn Document,
    root_name: &str,
    root: usize,
    descriptor: &LayerDescriptor,
    fallback: Color,
    report: &mut BakeReport,
) -> Result<usize, SyncError> {
    let full_path = format!("{root_name}{LAYER_PATH_SEPARATOR}{}", descriptor.name);
    if let Some(existing) = document.find_layer_by_path(&full_path) {
        return Ok(existing);
    }

    let color = descriptor.resolved_color(fallback);
    let segments: Vec<&str> = descriptor.path_segments().collect();
    let mut parent = root;
    let mut walked = root_name.to_string();
    for (i, segment) in segments.iter().enumerate() {
        walked.push_str(LAYER_PATH_SEPARATOR);
        walked.push_str(segment);
        if let Some(existing) = document.find_layer_by_path(&walked) {
            parent = existing;
            continue;
        }
        let mut layer = NewLayer::new(*segment, Some(parent), color);
        let is_leaf = i + 1 == segments.len();
        if is_leaf && !descriptor.guid.is_empty() && document.find_layer_by_id(&descriptor.guid).is_none() {
            layer = layer.with_id(descriptor.guid.clone());
        }
        parent = document.add_layer(layer)?;
        report.layers_created += 1;
        debug!("created layer {walked}");
    }
    Ok(parent)
}

fn add_objects(
    document: &dyn Document,
    descriptor: &LayerDescriptor,
    leaf: usize,
    display: &mut DisplayConduit,
    report: &mut BakeReport,
) -> Result<(), SyncError> {
    for position in descriptor.range() {
        let Some(item) = display.items().get(position) else {
            continue;
        };
        let already_baked = item
            .baked
            .as_ref()
            .is_some_and(|id| document.contains_object(id));
        let Some(geometry) = item.geometry.clone().filter(|_| !already_baked) else {
            report.objects_skipped += 1;
            continue;
        };
        let id = document.add_object(geometry, leaf)?;
        display.mark_baked(position, id)?;
        report.objects_added += 1;
    }
    Ok(())
}
