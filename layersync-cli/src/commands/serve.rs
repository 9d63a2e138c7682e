//! `layersync serve`: loopback host over stdio.
//!
//! Every client lives against an in-memory document and stream store, so
//! nothing is persisted; the command is meant for exercising the host
//! protocol end to end.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use layersync_core::MemoryDocument;
use layersync_display::NullRenderer;
use layersync_runtime::start_blocking;
use layersync_sync::{EngineContext, JsonConverter, MemoryStreamService, ObjectCache, TracingNotifier};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Name of the in-memory document.
    #[arg(long, default_value = "untitled")]
    pub document: String,
}

impl ServeArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let config = super::load_config(&home)?;
        let document = Arc::new(MemoryDocument::new(self.document));
        let ctx = EngineContext {
            document: document.clone(),
            remote: Arc::new(MemoryStreamService::new()),
            converter: Arc::new(JsonConverter),
            notifier: Arc::new(TracingNotifier),
            renderer: Arc::new(NullRenderer),
            cache: ObjectCache::new(),
            config,
        };
        start_blocking(ctx, document, None).context("runtime exited with error")
    }
}
