//! `flowcache build`: CSV + boundaries in, artifact set out.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use flowcache_build::{build_cache, CacheWriter, GeoIndex};
use flowcache_ingest::{
    load_centroid_table, read_flow_records, resolve_counties, resolve_states, CentroidTable,
    IngestOptions,
};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Args)]
pub struct BuildArgs {
    /// Flow records CSV.
    #[arg(long)]
    flows: PathBuf,
    /// County boundaries GeoJSON.
    #[arg(long)]
    counties: PathBuf,
    /// State boundaries GeoJSON (origin coordinates come from here).
    #[arg(long)]
    states: Option<PathBuf>,
    /// Optional centroid lookup CSV, preferred over boundary-derived points.
    #[arg(long)]
    centroids: Option<PathBuf>,
    /// Column prefix marking attribution vector columns.
    #[arg(long, default_value = "shap_")]
    attr_prefix: String,
    /// Column holding the model base value.
    #[arg(long, default_value = "shap_base_value")]
    attr_base_column: String,
    /// Output cache directory.
    #[arg(short, long)]
    out: PathBuf,
}

pub fn run(args: &BuildArgs) -> Result<()> {
    let options = IngestOptions {
        attr_prefix: args.attr_prefix.clone(),
        attr_base_column: args.attr_base_column.clone(),
    };
    let report = read_flow_records(&args.flows, &options)?;
    eprintln!(
        "{} parsed {} record(s), {} rejected, {} attribution feature(s)",
        "ok".green().bold(),
        report.records.len(),
        report.rejected.total(),
        report.schema.len()
    );

    let centroids = match &args.centroids {
        Some(path) => load_centroid_table(path),
        None => CentroidTable::new(),
    };
    let counties = resolve_counties(&read_json(&args.counties)?, &centroids);
    let states = match &args.states {
        Some(path) => resolve_states(&read_json(path)?),
        None => Vec::new(),
    };
    eprintln!(
        "{} resolved {} county(ies) and {} state(s)",
        "ok".green().bold(),
        counties.len(),
        states.len()
    );

    let geo = GeoIndex::new(counties.clone(), states);
    let output = build_cache(&report.records, &report.schema, &geo);
    CacheWriter::new(&args.out).write_all(&output, &counties)?;

    eprintln!(
        "{} wrote {} row(s) across {} dest / {} origin partition(s) to {}",
        "ok".green().bold(),
        output.summary.total_rows,
        output.by_dest.len(),
        output.by_origin.len(),
        args.out.display().to_string().bold()
    );
    Ok(())
}

fn read_json(path: &Path) -> Result<Value> {
    let bytes =
        std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}
