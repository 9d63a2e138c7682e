//! Layer descriptors and the nested layer tree.
//!
//! A stream stores its layers flat: each descriptor names a `::`-joined path
//! and claims a contiguous range of the flat object list. Senders derive the
//! descriptors from layer-ordered document objects; receivers rebuild the
//! tree from the paths.

use std::ops::Range;

use layersync_core::document::{Document, DocumentObject};
use layersync_core::types::{
    Color, LayerColor, LayerDescriptor, StreamSnapshot, LAYER_PATH_SEPARATOR,
};

use crate::error::SyncError;

/// Stable sort by owning layer index. Objects on one layer keep their
/// document order.
pub fn order_by_layer(objects: &mut [DocumentObject]) {
    objects.sort_by_key(|object| object.attributes.layer_index);
}

/// One descriptor per run of objects sharing a layer.
///
/// `objects` must already be ordered with [`order_by_layer`].
pub fn build_descriptors(document: &dyn Document, objects: &[DocumentObject]) -> Vec<LayerDescriptor> {
    let mut descriptors: Vec<LayerDescriptor> = Vec::new();
    let mut current_layer: Option<usize> = None;

    for (position, object) in objects.iter().enumerate() {
        let layer_index = object.attributes.layer_index;
        if current_layer == Some(layer_index) {
            if let Some(last) = descriptors.last_mut() {
                last.object_count += 1;
            }
            continue;
        }
        current_layer = Some(layer_index);

        let layer = document.layer(layer_index);
        let name = document
            .layer_full_path(layer_index)
            .unwrap_or_else(|| format!("Layer {layer_index}"));
        descriptors.push(LayerDescriptor {
            name,
            guid: layer.as_ref().map(|l| l.id.clone()).unwrap_or_default(),
            start_index: position,
            object_count: 1,
            order_index: descriptors.len(),
            color: Some(LayerColor::from_color(
                layer.as_ref().map(|l| l.color).unwrap_or(Color::BLACK),
            )),
            topology: None,
        });
    }

    for descriptor in &mut descriptors {
        descriptor.topology = Some(format!("0-{} ", descriptor.object_count));
    }
    descriptors
}

/// Check that the layer ranges tile `0..object_count` in order with no gap
/// or overlap.
pub fn validate_partition(layers: &[LayerDescriptor], object_count: usize) -> Result<(), SyncError> {
    let mut expected_start = 0;
    for layer in layers {
        if layer.start_index != expected_start {
            return Err(SyncError::Protocol(format!(
                "layer {:?} starts at {} but the previous layer ends at {}",
                layer.name, layer.start_index, expected_start
            )));
        }
        expected_start = layer.range().end;
    }
    if expected_start != object_count {
        return Err(SyncError::Protocol(format!(
            "layers cover {expected_start} objects, stream lists {object_count}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Layer tree
// ---------------------------------------------------------------------------

/// A node of the nested layer tree a bake would produce.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerNode {
    pub name: String,
    /// Full path including the stream root.
    pub path: String,
    pub color: Option<Color>,
    /// Object range of the descriptor that ends at this node, if any.
    pub range: Option<Range<usize>>,
    pub children: Vec<LayerNode>,
}

impl LayerNode {
    fn new(name: &str, path: String) -> Self {
        Self {
            name: name.to_string(),
            path,
            color: None,
            range: None,
            children: Vec::new(),
        }
    }

    /// Depth-first walk, parents before children.
    pub fn walk(&self) -> Vec<(usize, &LayerNode)> {
        let mut out = Vec::new();
        let mut stack = vec![(0usize, self)];
        while let Some((depth, node)) = stack.pop() {
            out.push((depth, node));
            for child in node.children.iter().rev() {
                stack.push((depth + 1, child));
            }
        }
        out
    }
}

/// Nest the snapshot's layers under a root named after the stream.
pub fn build_tree(snapshot: &StreamSnapshot, fallback: Color) -> LayerNode {
    let root_name = snapshot.root_layer_name();
    let mut root = LayerNode::new(&root_name, root_name.clone());
    for descriptor in &snapshot.layers {
        let mut node = &mut root;
        for segment in descriptor.path_segments() {
            let position = match node.children.iter().position(|c| c.name == segment) {
                Some(position) => position,
                None => {
                    let path = format!("{}{LAYER_PATH_SEPARATOR}{segment}", node.path);
                    let mut child = LayerNode::new(segment, path);
                    child.color = Some(descriptor.resolved_color(fallback));
                    node.children.push(child);
                    node.children.len() - 1
                }
            };
            node = &mut node.children[position];
        }
        node.range = Some(descriptor.range());
    }
    root
}
