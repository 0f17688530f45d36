//! `flowcache inspect`: one-screen view of a cache's summary and manifest.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use flowcache_query::{EngineConfig, FlowEngine};
use std::path::PathBuf;

#[derive(Args)]
pub struct InspectArgs {
    /// Cache location: a directory path or an http(s) base URL.
    #[arg(long)]
    cache: String,
    /// Local directory tried when the primary cache location fails.
    #[arg(long)]
    fallback: Option<PathBuf>,
}

pub async fn run(args: &InspectArgs) -> Result<()> {
    let store = crate::query::open_store(&args.cache, args.fallback.as_deref());
    let engine = FlowEngine::new(store, EngineConfig::default());
    engine.init().await?;

    let summary = engine.get_summary()?;
    let manifest = engine.get_manifest()?;
    let schema = engine.get_feature_schema()?;
    let counties = engine.get_geo_metadata()?;

    println!("{}", "cache".bold());
    println!("  rows           {}", summary.total_rows);
    println!("  max observed   {:.1}", summary.max_observed);
    println!("  max predicted  {:.1}", summary.max_predicted);
    println!("  counties       {}", counties.len());
    println!();
    println!("{}", "partitions".bold());
    println!("  by_dest        {}", manifest.by_dest.len());
    println!("  by_origin      {}", manifest.by_origin.len());
    println!("  by_dest_attr   {}", manifest.by_dest_attr.len());
    println!();
    println!("{}", "features".bold());
    if schema.is_empty() {
        println!("  (no attribution data)");
    } else {
        for (i, id) in schema.iter().enumerate() {
            println!("  [{i:>2}] {id}");
        }
    }
    Ok(())
}
