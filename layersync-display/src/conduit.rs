//! Display list fed to the scene renderer.
//!
//! The conduit holds one `(geometry, color, visible)` item per position of a
//! stream's flat object list, plus the hover state used to highlight a layer.
//! Positions line up with the stream's layer ranges, so every layer-scoped
//! operation is a range operation here.

use std::ops::Range;
use std::sync::{Mutex, PoisonError};

use layersync_core::{Color, Geometry, ObjectId};

use crate::error::DisplayError;

/// One materialized object.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayItem {
    /// `None` when the converter could not produce native geometry.
    pub geometry: Option<Geometry>,
    pub color: Color,
    pub visible: bool,
    /// Document object this item was baked into, if any.
    pub baked: Option<ObjectId>,
}

impl DisplayItem {
    pub fn new(geometry: Option<Geometry>, color: Color) -> Self {
        Self {
            geometry,
            color,
            visible: true,
            baked: None,
        }
    }
}

/// The renderer-facing display state of one client.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayConduit {
    enabled: bool,
    items: Vec<DisplayItem>,
    hover: Option<Range<usize>>,
    hover_geometry: Vec<Geometry>,
}

impl Default for DisplayConduit {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayConduit {
    pub fn new() -> Self {
        Self {
            enabled: true,
            items: Vec::new(),
            hover: None,
            hover_geometry: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn items(&self) -> &[DisplayItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Replace the whole list. Hover state is reset since positions changed.
    pub fn replace(&mut self, items: Vec<DisplayItem>) {
        self.items = items;
        self.hover = None;
        self.hover_geometry.clear();
    }

    /// Flat `(geometry, color, visible)` triples in list order.
    pub fn triples(&self) -> impl Iterator<Item = (Option<&Geometry>, Color, bool)> {
        self.items
            .iter()
            .map(|item| (item.geometry.as_ref(), item.color, item.visible))
    }

    pub fn hover(&self) -> Option<Range<usize>> {
        self.hover.clone()
    }

    pub fn hover_geometry(&self) -> &[Geometry] {
        &self.hover_geometry
    }

    /// Highlight a range of the list.
    pub fn set_hover(&mut self, range: Range<usize>) -> Result<(), DisplayError> {
        self.check_range(&range)?;
        self.hover = Some(range);
        Ok(())
    }

    /// Highlight free-standing geometry (a sender hovering its own layer).
    pub fn set_hover_geometry(&mut self, geometry: Vec<Geometry>) {
        self.hover = Some(0..geometry.len());
        self.hover_geometry = geometry;
    }

    pub fn clear_hover(&mut self) {
        self.hover = None;
        self.hover_geometry.clear();
    }

    pub fn set_visible(&mut self, range: Range<usize>, visible: bool) -> Result<(), DisplayError> {
        self.check_range(&range)?;
        for item in &mut self.items[range] {
            item.visible = visible;
        }
        Ok(())
    }

    pub fn mark_baked(&mut self, index: usize, object: ObjectId) -> Result<(), DisplayError> {
        let len = self.items.len();
        let item = self
            .items
            .get_mut(index)
            .ok_or(DisplayError::ItemOutOfBounds { index, len })?;
        item.baked = Some(object);
        Ok(())
    }

    fn check_range(&self, range: &Range<usize>) -> Result<(), DisplayError> {
        if range.start > range.end || range.end > self.items.len() {
            return Err(DisplayError::RangeOutOfBounds {
                range: range.clone(),
                len: self.items.len(),
            });
        }
        Ok(())
    }
}

/// Display overlay of the host: repaints from the conduit.
pub trait SceneRenderer: Send + Sync {
    fn render(&self, conduit: &DisplayConduit);
}

/// Renderer that discards every frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl SceneRenderer for NullRenderer {
    fn render(&self, _conduit: &DisplayConduit) {}
}

/// Renderer that keeps a copy of every frame it was asked to draw.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    frames: Mutex<Vec<DisplayConduit>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<DisplayConduit> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_frame(&self) -> Option<DisplayConduit> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    pub fn frame_count(&self) -> usize {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl SceneRenderer for RecordingRenderer {
    fn render(&self, conduit: &DisplayConduit) {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(conduit.clone());
    }
}
