//! Engine tunables.
//!
//! Defaults mirror the limits the remote store is known to accept; any of
//! them can be overridden in `~/.layersync/config.yaml`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, SessionError};
use crate::paths;
use crate::types::Color;

pub const DEFAULT_MAX_BUCKET_BYTES: usize = 500_000;
pub const DEFAULT_MAX_BUCKETS: usize = 100;
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(2000);
pub const DEFAULT_FALLBACK_LAYER_COLOR: Color = Color::rgb(0xAE, 0xEC, 0xFD);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Serialized-size ceiling of one upload bucket.
    pub max_bucket_bytes: usize,
    /// A cycle needing more buckets than this is rejected.
    pub max_buckets: usize,
    /// Delay between the first dirty signal and the sender cycle.
    #[serde(with = "millis")]
    pub debounce: Duration,
    /// Fields the receiver asks the store to omit from bulk fetches.
    pub omit_hints: Vec<String>,
    pub fallback_layer_color: Color,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_bucket_bytes: DEFAULT_MAX_BUCKET_BYTES,
            max_buckets: DEFAULT_MAX_BUCKETS,
            debounce: DEFAULT_DEBOUNCE,
            omit_hints: vec!["displayValue".to_string()],
            fallback_layer_color: DEFAULT_FALLBACK_LAYER_COLOR,
        }
    }
}

impl SyncConfig {
    /// Load `<home>/.layersync/config.yaml`, falling back to defaults when
    /// the file does not exist.
    pub fn load_at(home: &Path) -> Result<Self, SessionError> {
        let path = paths::config_path(home);
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        serde_yaml::from_str(&contents).map_err(|source| SessionError::Parse { path, source })
    }

    /// `load_at` convenience wrapper.
    pub fn load() -> Result<Self, SessionError> {
        Self::load_at(&paths::home()?)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
