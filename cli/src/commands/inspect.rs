use crate::commands::{print_info, print_success};
use anyhow::{Context, Result};
use bandwidth_core::persist::{MetricValue, Storage, StorageBuilder, StorageOptions, DEFAULT_TREE_NAME};
use clap::Args;
use colored::*;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Directory of the metrics database
    #[arg(value_name = "DATABASE")]
    pub path: PathBuf,

    /// Tree holding the metrics
    #[arg(long, default_value = DEFAULT_TREE_NAME)]
    pub tree: String,

    /// Identifier of the metric to overwrite, e.g. "::::l4_tx_bytes"
    #[arg(long, requires = "values")]
    pub set_metric: Option<String>,

    /// JSON array of values replacing the stored ones
    #[arg(long, requires = "set_metric")]
    pub values: Option<String>,
}

/// Open the database without declaring counters or saving anything
pub async fn open(path: &Path, tree: &str) -> Result<Storage> {
    let options = StorageOptions::default()
        .tree_name(tree)
        .autosave(false, Duration::ZERO);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    StorageBuilder::new(options)?
        .initialize(path, shutdown_rx)
        .await
        .with_context(|| format!("Failed to open database at {}", path.display()))
}

/// Write every stored metric and its values to `out`
pub fn dump<W: Write>(storage: &Storage, out: &mut W) -> Result<usize> {
    let ids = storage.list_metrics()?;
    for id in &ids {
        let values = storage.read_metric(id)?;
        writeln!(out, "{}", id.bold())?;
        writeln!(out, "  {}", serde_json::to_string(&values)?)?;
    }
    Ok(ids.len())
}

/// Replace the stored values of `metric_id` with the JSON array in `json`
pub fn set_metric(storage: &Storage, metric_id: &str, json: &str) -> Result<usize> {
    let values: Vec<MetricValue> =
        serde_json::from_str(json).context("Values must be a JSON array of metric values")?;
    storage.write_metric(metric_id, &values)?;
    log::info!("Wrote {} values to {}", values.len(), metric_id);
    Ok(values.len())
}

pub async fn run(args: InspectArgs) -> Result<()> {
    let storage = open(&args.path, &args.tree).await?;

    let count = dump(&storage, &mut std::io::stdout().lock())?;
    if count == 0 {
        print_info("No metrics stored");
    }

    if let (Some(metric_id), Some(values)) = (&args.set_metric, &args.values) {
        let written = set_metric(&storage, metric_id, values)?;
        print_success(&format!("Replaced {metric_id} with {written} values"));
    }

    Ok(())
}
