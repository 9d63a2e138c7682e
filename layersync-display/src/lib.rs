//! layersync-display: display list and renderer seam for stream clients.

pub mod conduit;
pub mod error;

pub use conduit::{DisplayConduit, DisplayItem, NullRenderer, RecordingRenderer, SceneRenderer};
pub use error::DisplayError;
