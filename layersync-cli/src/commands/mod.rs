pub mod buckets;
pub mod plan;
pub mod serve;
pub mod session;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

use layersync_core::SyncConfig;

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// `~/.layersync/config.yaml`, or defaults when absent.
pub(crate) fn load_config(home: &Path) -> Result<SyncConfig> {
    SyncConfig::load_at(home).context("failed to load ~/.layersync/config.yaml")
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}
