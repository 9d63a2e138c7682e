//! `layersync plan`: preview the layer tree a bake would produce.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use layersync_core::types::StreamSnapshot;
use layersync_sync::layers::{build_tree, validate_partition, LayerNode};

/// Arguments for `layersync plan`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Stream snapshot as JSON (`streamId`, `name`, `layers`, `objects`).
    pub snapshot: PathBuf,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct PlanRowJson {
    path: String,
    depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<usize>,
}

impl PlanArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let config = super::load_config(&home)?;
        let snapshot: StreamSnapshot = super::read_json(&self.snapshot)?;
        validate_partition(&snapshot.layers, snapshot.objects.len())
            .with_context(|| format!("{} is not a valid stream", self.snapshot.display()))?;

        let tree = build_tree(&snapshot, config.fallback_layer_color);
        if self.json {
            let rows: Vec<PlanRowJson> = tree.walk().into_iter().map(row_json).collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("failed to serialize plan JSON")?
            );
            return Ok(());
        }

        println!(
            "{} layers, {} objects",
            snapshot.layers.len(),
            snapshot.objects.len()
        );
        for (depth, node) in tree.walk() {
            println!("{}", render_line(depth, node));
        }
        Ok(())
    }
}

fn row_json((depth, node): (usize, &LayerNode)) -> PlanRowJson {
    PlanRowJson {
        path: node.path.clone(),
        depth,
        color: node.color.map(|c| c.to_hex()),
        start: node.range.as_ref().map(|r| r.start),
        count: node.range.as_ref().map(|r| r.len()),
    }
}

fn render_line(depth: usize, node: &LayerNode) -> String {
    let mut line = format!("{}{}", "  ".repeat(depth), node.name.bold());
    if let Some(color) = node.color {
        line.push_str(&format!("  {}", color.to_hex().bright_black()));
    }
    if let Some(range) = &node.range {
        line.push_str(&format!("  objects {}..{}", range.start, range.end));
    }
    line
}
