//! The flow query engine.
//!
//! An explicit engine instance over an `ArtifactStore`: construct it, call
//! `init()` once (idempotent, concurrent callers share the load), then
//! `query()` as often as needed. All caches are append-only until `reset()`
//! wipes everything back to the pre-`init` state.
//!
//! Partition lifecycle per key is `NotLoaded → Loading → Loaded`; concurrent
//! queries needing the same uncached partition join one in-flight load
//! instead of fetching twice. A failed load leaves the key `NotLoaded` so a
//! later query can retry.

use crate::filter::{FlowFilter, Metric, ResolvedFilter, ValueType};
use crate::store::{ArtifactStore, StoreError};
use dashmap::DashMap;
use flowcache_model::artifact::{keys, AttrPartition, Manifest, Partition, PartitionRow, Summary};
use flowcache_model::codes;
use flowcache_model::geo::GeoEntity;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("engine not initialized; call init() first")]
    NotInitialized,
    #[error("net metric is only available at summary granularity, pick a direction for arcs")]
    NetNotRowLevel,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("decoding artifact {key}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default result cap when a filter sets no `top_n`.
    pub max_results: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_results: 200 }
    }
}

/// One ranked result row, shaped for arc rendering: `value` is the selected
/// metric value, observed and predicted ride along for tooltips.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowArc {
    pub id: String,
    pub origin: String,
    pub dest: String,
    pub value: f64,
    pub observed: f64,
    pub predicted: f64,
    pub origin_position: [f64; 2],
    pub dest_position: [f64; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub income: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub education: Option<String>,
}

/// Summary-granularity inbound/outbound/net totals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NetTotals {
    pub inbound: f64,
    pub outbound: f64,
    pub net: f64,
}

/// Everything `init()` loads once.
struct Catalog {
    summary: Arc<Summary>,
    manifest: Arc<Manifest>,
    schema: Arc<Vec<String>>,
    counties: Arc<Vec<GeoEntity>>,
    county_names: HashMap<String, String>,
}

type LoadCell<T> = Arc<OnceCell<Arc<T>>>;

pub struct FlowEngine {
    store: Arc<dyn ArtifactStore>,
    config: EngineConfig,
    /// Swapped for a fresh cell on reset; cloning out of the lock keeps
    /// awaits outside of it.
    catalog: RwLock<LoadCell<Catalog>>,
    partitions: DashMap<String, LoadCell<Partition>>,
    attr_partitions: DashMap<String, LoadCell<AttrPartition>>,
    memo: RwLock<HashMap<String, Arc<Vec<FlowArc>>>>,
    /// Bumped by `reset()`. A query that started before a reset must not
    /// memoize its result into the post-reset caches.
    generation: AtomicU64,
}

impl FlowEngine {
    pub fn new(store: Arc<dyn ArtifactStore>, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            catalog: RwLock::new(Arc::new(OnceCell::new())),
            partitions: DashMap::new(),
            attr_partitions: DashMap::new(),
            memo: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Load the summary, manifest, feature schema, and geo metadata.
    /// Idempotent; concurrent callers share one in-flight initialization.
    pub async fn init(&self) -> Result<(), QueryError> {
        let cell = self.catalog.read().clone();
        cell.get_or_try_init(|| async {
            let summary: Summary = self.fetch_json(keys::SUMMARY).await?;
            let manifest: Manifest = self.fetch_json(keys::INDEX).await?;
            let counties: Vec<GeoEntity> = self.fetch_json(keys::COUNTY_METADATA).await?;
            // datasets without attribution vectors simply have no schema
            let schema: Vec<String> = match self.fetch_json(keys::ATTR_SCHEMA).await {
                Ok(schema) => schema,
                Err(QueryError::Store(err)) if err.is_not_found() => Vec::new(),
                Err(err) => return Err(err),
            };

            let county_names = counties
                .iter()
                .map(|c| (c.geoid.clone(), c.name.clone()))
                .collect();
            tracing::info!(
                counties = counties.len(),
                features = schema.len(),
                rows = summary.total_rows,
                "engine initialized"
            );
            Ok(Arc::new(Catalog {
                summary: Arc::new(summary),
                manifest: Arc::new(manifest),
                schema: Arc::new(schema),
                counties: Arc::new(counties),
                county_names,
            }))
        })
        .await?;
        Ok(())
    }

    /// Drop every cache and return to the pre-`init` state.
    pub fn reset(&self) {
        // generation first: an in-flight query re-checks it before touching
        // the memo, so clearing after the bump leaves no stale entry behind
        self.generation.fetch_add(1, Ordering::AcqRel);
        *self.catalog.write() = Arc::new(OnceCell::new());
        self.partitions.clear();
        self.attr_partitions.clear();
        self.memo.write().clear();
    }

    fn catalog(&self) -> Result<Arc<Catalog>, QueryError> {
        self.catalog
            .read()
            .get()
            .cloned()
            .ok_or(QueryError::NotInitialized)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Resolve `filter`, load whatever partitions its scope needs, and return
    /// the ranked, capped arc list. Identical filters (canonicalized) return
    /// the identical cached `Arc` until `reset()`.
    pub async fn query(&self, filter: &FlowFilter) -> Result<Arc<Vec<FlowArc>>, QueryError> {
        let catalog = self.catalog()?;
        let generation = self.generation.load(Ordering::Acquire);
        let resolved = filter.resolve(self.config.max_results);
        if resolved.metric == Metric::Net {
            return Err(QueryError::NetNotRowLevel);
        }

        let signature = resolved.signature();
        if let Some(hit) = self.memo.read().get(&signature) {
            return Ok(hit.clone());
        }

        let candidates = self.candidates(&catalog, &resolved).await?;
        let candidates = apply_demographics(candidates, &resolved);
        let candidates = self
            .apply_feature_filter(&catalog, candidates, &resolved)
            .await?;

        let predicted = resolved.value_type.is_predicted();
        let mut rows: Vec<PartitionRow> = candidates
            .into_iter()
            .filter(|r| r.value(predicted) >= resolved.min_value)
            .collect();
        // stable: ties keep the partition's pre-sorted order
        rows.sort_by(|a, b| b.value(predicted).total_cmp(&a.value(predicted)));
        if resolved.top_n > 0 {
            rows.truncate(resolved.top_n);
        }

        let arcs = Arc::new(rows.into_iter().map(|r| to_arc(r, predicted)).collect::<Vec<_>>());
        let mut memo = self.memo.write();
        if self.generation.load(Ordering::Acquire) != generation {
            // a reset happened while partitions were loading; this result
            // belongs to the old build and must not outlive it
            return Ok(arcs);
        }
        // concurrent first queries race to this point; the first insert wins
        // so every caller shares one result object
        Ok(memo.entry(signature).or_insert(arcs).clone())
    }

    async fn candidates(
        &self,
        catalog: &Catalog,
        f: &ResolvedFilter,
    ) -> Result<Vec<PartitionRow>, QueryError> {
        match f.metric {
            Metric::In => {
                // county scope has a precomputed inbound adjacency index
                if let Some(county) = &f.county {
                    return Ok(catalog
                        .summary
                        .in_adjacency
                        .get(county)
                        .cloned()
                        .unwrap_or_default());
                }
                let Some(dest_state) = &f.state else {
                    return Ok(Vec::new()); // inbound needs a geographic context
                };
                if !catalog.manifest.by_dest.contains_key(dest_state) {
                    return Ok(Vec::new()); // unknown geography, not an error
                }
                let partition = self.partition(&keys::by_dest(dest_state)).await?;
                Ok(partition.rows.clone())
            }
            Metric::Out => {
                let Some(state) = &f.state else {
                    return Ok(Vec::new()); // outbound requires a state context
                };
                let key = codes::origin_partition_key(state);
                if !catalog.manifest.by_origin.contains_key(&key) {
                    return Ok(Vec::new());
                }
                let partition = self.partition(&keys::by_origin(&key)).await?;
                let mut rows = partition.rows.clone();
                if let Some(county) = &f.county {
                    // no outbound adjacency index at county grain; filter the
                    // full record list instead
                    rows.retain(|r| &r.dest == county);
                }
                Ok(rows)
            }
            // rejected before candidates are gathered
            Metric::Net => Ok(Vec::new()),
        }
    }

    async fn apply_feature_filter(
        &self,
        catalog: &Catalog,
        rows: Vec<PartitionRow>,
        f: &ResolvedFilter,
    ) -> Result<Vec<PartitionRow>, QueryError> {
        let Some(feature) = f.feature else {
            return Ok(rows);
        };
        // schemas are append-safe but index-unsafe across rebuilds: an index
        // outside the loaded schema means "no filter", not a failure
        if feature.index >= catalog.schema.len() || rows.is_empty() {
            return Ok(rows);
        }

        let states: BTreeSet<String> = rows.iter().map(|r| r.dest[..2].to_string()).collect();
        let mut magnitudes: HashMap<String, f64> = HashMap::new();
        for code in states {
            if !catalog.manifest.by_dest_attr.contains_key(&code) {
                continue;
            }
            let attr = self.attr_partition(&keys::by_dest_attr(&code)).await?;
            for row in &attr.rows {
                if let Some(v) = row.values.get(feature.index) {
                    magnitudes.insert(row.id.clone(), v.abs());
                }
            }
        }

        let magnitude =
            |r: &PartitionRow| magnitudes.get(&r.id).copied().unwrap_or(0.0);
        let mut sorted: Vec<f64> = rows.iter().map(magnitude).collect();
        sorted.sort_by(f64::total_cmp);
        let pct = feature.min_percentile.clamp(0.0, 100.0);
        let rank = ((pct / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        let threshold = sorted[rank];

        Ok(rows.into_iter().filter(|r| magnitude(r) >= threshold).collect())
    }

    // ========================================================================
    // Summary-granularity reads
    // ========================================================================

    /// Inbound/outbound/net totals for a state. Net only exists at this
    /// granularity; missing keys read as zero.
    pub fn state_net_totals(&self, code: &str, value_type: ValueType) -> Result<NetTotals, QueryError> {
        let catalog = self.catalog()?;
        let code = codes::normalize_state(code).unwrap_or_default();
        let s = &catalog.summary;
        let (inbound_map, outbound_map) = match value_type {
            ValueType::Observed => (
                &s.inbound_totals_by_state_observed,
                &s.outbound_totals_by_state_observed,
            ),
            ValueType::Predicted => (
                &s.inbound_totals_by_state_predicted,
                &s.outbound_totals_by_state_predicted,
            ),
        };
        let inbound = inbound_map.get(&code).copied().unwrap_or(0.0);
        let outbound = outbound_map.get(&code).copied().unwrap_or(0.0);
        Ok(NetTotals {
            inbound,
            outbound,
            net: inbound - outbound,
        })
    }

    /// Summed inbound value for one destination county.
    pub fn county_inbound_total(&self, geoid: &str, value_type: ValueType) -> Result<f64, QueryError> {
        let catalog = self.catalog()?;
        let geoid = codes::normalize_county(geoid).unwrap_or_default();
        let map = match value_type {
            ValueType::Observed => &catalog.summary.inbound_totals_by_county_observed,
            ValueType::Predicted => &catalog.summary.inbound_totals_by_county_predicted,
        };
        Ok(map.get(&geoid).copied().unwrap_or(0.0))
    }

    pub fn get_summary(&self) -> Result<Arc<Summary>, QueryError> {
        Ok(self.catalog()?.summary.clone())
    }

    pub fn get_manifest(&self) -> Result<Arc<Manifest>, QueryError> {
        Ok(self.catalog()?.manifest.clone())
    }

    pub fn get_feature_schema(&self) -> Result<Arc<Vec<String>>, QueryError> {
        Ok(self.catalog()?.schema.clone())
    }

    pub fn get_geo_metadata(&self) -> Result<Arc<Vec<GeoEntity>>, QueryError> {
        Ok(self.catalog()?.counties.clone())
    }

    /// Human-friendly county name, falling back to the geoid itself.
    pub fn county_name(&self, geoid: &str) -> Result<String, QueryError> {
        let catalog = self.catalog()?;
        Ok(catalog
            .county_names
            .get(geoid)
            .cloned()
            .unwrap_or_else(|| geoid.to_string()))
    }

    /// The raw attribution partition for one destination state.
    pub async fn attribution_for_state(&self, code: &str) -> Result<Arc<AttrPartition>, QueryError> {
        self.catalog()?;
        let code = codes::normalize_state(code).unwrap_or_default();
        self.attr_partition(&keys::by_dest_attr(&code)).await
    }

    // ========================================================================
    // Partition loading
    // ========================================================================

    async fn partition(&self, key: &str) -> Result<Arc<Partition>, QueryError> {
        let cell = self
            .partitions
            .entry(key.to_string())
            .or_default()
            .clone();
        let partition = cell
            .get_or_try_init(|| self.fetch_json_arc::<Partition>(key))
            .await?;
        Ok(partition.clone())
    }

    async fn attr_partition(&self, key: &str) -> Result<Arc<AttrPartition>, QueryError> {
        let cell = self
            .attr_partitions
            .entry(key.to_string())
            .or_default()
            .clone();
        let partition = cell
            .get_or_try_init(|| self.fetch_json_arc::<AttrPartition>(key))
            .await?;
        Ok(partition.clone())
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T, QueryError> {
        let bytes = self.store.get(key).await?;
        serde_json::from_slice(&bytes).map_err(|source| QueryError::Decode {
            key: key.to_string(),
            source,
        })
    }

    async fn fetch_json_arc<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Arc<T>, QueryError> {
        self.fetch_json(key).await.map(Arc::new)
    }
}

fn apply_demographics(rows: Vec<PartitionRow>, f: &ResolvedFilter) -> Vec<PartitionRow> {
    if f.age.is_none() && f.income.is_none() && f.education.is_none() {
        return rows;
    }
    rows.into_iter()
        .filter(|r| {
            f.age.as_ref().map_or(true, |v| r.age.as_ref() == Some(v))
                && f.income.as_ref().map_or(true, |v| r.income.as_ref() == Some(v))
                && f.education
                    .as_ref()
                    .map_or(true, |v| r.education.as_ref() == Some(v))
        })
        .collect()
}

fn to_arc(row: PartitionRow, predicted: bool) -> FlowArc {
    FlowArc {
        value: row.value(predicted),
        id: row.id,
        origin: row.origin,
        dest: row.dest,
        observed: row.observed,
        predicted: row.predicted,
        origin_position: [row.origin_lon, row.origin_lat],
        dest_position: [row.dest_lon, row.dest_lat],
        age: row.age,
        income: row.income,
        education: row.education,
    }
}
