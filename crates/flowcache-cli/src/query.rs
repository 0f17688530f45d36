//! `flowcache query`: run one filter against a built cache and print the
//! ranked arcs (or, for the net metric, the summary totals).

use anyhow::{bail, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;
use flowcache_query::{
    ArtifactStore, EngineConfig, FallbackStore, FeatureFilter, FlowEngine, FlowFilter, FsStore,
    HttpStore, Metric, ValueType,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MetricArg {
    In,
    Out,
    Net,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ValueTypeArg {
    Observed,
    Predicted,
}

impl From<MetricArg> for Metric {
    fn from(m: MetricArg) -> Self {
        match m {
            MetricArg::In => Metric::In,
            MetricArg::Out => Metric::Out,
            MetricArg::Net => Metric::Net,
        }
    }
}

impl From<ValueTypeArg> for ValueType {
    fn from(v: ValueTypeArg) -> Self {
        match v {
            ValueTypeArg::Observed => ValueType::Observed,
            ValueTypeArg::Predicted => ValueType::Predicted,
        }
    }
}

#[derive(Args)]
pub struct QueryArgs {
    /// Cache location: a directory path or an http(s) base URL.
    #[arg(long)]
    cache: String,
    /// Local directory tried when the primary cache location fails.
    #[arg(long)]
    fallback: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = MetricArg::In)]
    metric: MetricArg,
    #[arg(long)]
    state: Option<String>,
    #[arg(long)]
    county: Option<String>,
    #[arg(long, value_enum, default_value_t = ValueTypeArg::Observed)]
    value_type: ValueTypeArg,
    /// Keep rows at or above this value.
    #[arg(long)]
    min_value: Option<f64>,
    /// Result cap; 0 means unbounded.
    #[arg(long)]
    top: Option<usize>,
    #[arg(long)]
    age: Option<String>,
    #[arg(long)]
    income: Option<String>,
    #[arg(long)]
    education: Option<String>,
    /// Attribution feature index to filter on.
    #[arg(long)]
    feature_index: Option<usize>,
    /// Magnitude percentile threshold for the feature filter, 0-100.
    #[arg(long, default_value_t = 75.0)]
    feature_percentile: f64,
    /// Emit the arc list as JSON instead of a table.
    #[arg(long)]
    json: bool,
}

/// Directory paths get `FsStore`, http(s) URLs get `HttpStore`, and a
/// `--fallback` directory wraps either in a `FallbackStore`.
pub fn open_store(cache: &str, fallback: Option<&Path>) -> Arc<dyn ArtifactStore> {
    let primary: Arc<dyn ArtifactStore> =
        if cache.starts_with("http://") || cache.starts_with("https://") {
            Arc::new(HttpStore::new(cache))
        } else {
            Arc::new(FsStore::new(cache))
        };
    match fallback {
        Some(dir) => Arc::new(FallbackStore::new(primary, Arc::new(FsStore::new(dir)))),
        None => primary,
    }
}

pub async fn run(args: &QueryArgs) -> Result<()> {
    let store = open_store(&args.cache, args.fallback.as_deref());
    let engine = FlowEngine::new(store, EngineConfig::default());
    engine.init().await?;

    // net has no row-level rendition, report summary totals instead
    if args.metric == MetricArg::Net {
        let Some(state) = &args.state else {
            bail!("the net metric needs --state");
        };
        let totals = engine.state_net_totals(state, args.value_type.into())?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&totals)?);
        } else {
            println!(
                "{state}: inbound {:.1}, outbound {:.1}, net {:+.1}",
                totals.inbound, totals.outbound, totals.net
            );
        }
        return Ok(());
    }

    let filter = FlowFilter {
        metric: Some(args.metric.into()),
        state: args.state.clone(),
        county: args.county.clone(),
        value_type: Some(args.value_type.into()),
        min_value: args.min_value,
        top_n: args.top,
        age: args.age.clone(),
        income: args.income.clone(),
        education: args.education.clone(),
        feature: args.feature_index.map(|index| FeatureFilter {
            index,
            min_percentile: args.feature_percentile,
        }),
    };
    let arcs = engine.query(&filter).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(arcs.as_ref())?);
        return Ok(());
    }

    for arc in arcs.iter() {
        let dest = engine.county_name(&arc.dest)?;
        println!("{:>12.1}  {} → {}", arc.value, arc.origin, dest);
    }
    eprintln!("{} {} arc(s)", "ok".green().bold(), arcs.len());
    Ok(())
}
