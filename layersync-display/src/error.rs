//! Error types for layersync-display.

use std::ops::Range;

use thiserror::Error;

/// All errors that can arise from display-list operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DisplayError {
    /// A layer range reaches past the end of the display list.
    #[error("range {start}..{end} is outside the display list of {len} items", start = range.start, end = range.end)]
    RangeOutOfBounds { range: Range<usize>, len: usize },

    /// An item index past the end of the display list.
    #[error("display item #{index} does not exist (list has {len} items)")]
    ItemOutOfBounds { index: usize, len: usize },
}
