//! `layersync buckets`: preview how a payload would be split for upload.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use layersync_core::types::PortableObject;
use layersync_sync::bucket::bucket;
use layersync_sync::SyncError;

/// Arguments for `layersync buckets`.
#[derive(Args, Debug)]
pub struct BucketsArgs {
    /// JSON array of portable objects, in upload order.
    pub objects: PathBuf,

    /// Bucket size ceiling in serialized bytes (defaults to the configured
    /// `max_bucket_bytes`).
    #[arg(long)]
    pub max_bytes: Option<usize>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled, Serialize)]
struct BucketRow {
    #[tabled(rename = "bucket")]
    bucket: usize,
    #[tabled(rename = "objects")]
    objects: usize,
    #[tabled(rename = "bytes")]
    bytes: usize,
}

impl BucketsArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let config = super::load_config(&home)?;
        let max_bytes = self.max_bytes.unwrap_or(config.max_bucket_bytes);
        let objects: Vec<PortableObject> = super::read_json(&self.objects)?;
        let total = objects.len();

        let buckets = bucket(objects, max_bytes).context("failed to size objects")?;
        let rows: Vec<BucketRow> = buckets
            .iter()
            .enumerate()
            .map(|(i, b)| BucketRow {
                bucket: i + 1,
                objects: b.objects.len(),
                bytes: b.bytes,
            })
            .collect();
        let count = rows.len();

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("failed to serialize bucket JSON")?
            );
        } else {
            println!("{total} objects in {count} buckets (ceiling {max_bytes} bytes)");
            if !rows.is_empty() {
                let mut table = Table::new(rows);
                table.with(Style::rounded());
                println!("{table}");
            }
        }

        if count > config.max_buckets {
            eprintln!("{}", "payload too large for a single sync cycle".red());
            return Err(SyncError::PayloadTooLarge {
                buckets: count,
                limit: config.max_buckets,
            }
            .into());
        }
        Ok(())
    }
}
