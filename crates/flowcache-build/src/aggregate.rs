//! Partition and aggregate accumulation.
//!
//! One streaming pass over the validated records. Each rayon shard owns a
//! private `Accumulator`; shards merge pairwise (concatenating partition rows
//! in input order, summing totals, taking maxima) so the result is identical
//! to a sequential pass. Finalization stable-sorts partitions and adjacency
//! candidates descending by observed value and truncates adjacency lists to
//! the top-K cap.
//!
//! The normalizer already filtered bad rows; the only skip here is a record
//! whose destination has no resolved geo entity, which a map cannot place.

use flowcache_model::artifact::{
    AttrRow, FeatureCountyAggregate, FeatureRankEntry, NestedTotals, PartitionRow, Summary,
    ADJACENCY_TOP_K,
};
use flowcache_model::codes;
use flowcache_model::geo::{region_centroid, GeoEntity, StateMeta};
use flowcache_model::record::FlowRecord;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Records per rayon shard. Small enough to parallelize mid-sized builds,
/// large enough that merge cost stays negligible.
const SHARD_SIZE: usize = 8192;

// ============================================================================
// Geo index
// ============================================================================

/// Lookup structure over resolved geo metadata.
pub struct GeoIndex {
    counties: BTreeMap<String, GeoEntity>,
    states: BTreeMap<String, StateMeta>,
}

impl GeoIndex {
    pub fn new(counties: Vec<GeoEntity>, states: Vec<StateMeta>) -> Self {
        Self {
            counties: counties.into_iter().map(|c| (c.geoid.clone(), c)).collect(),
            states: states.into_iter().map(|s| (s.code.clone(), s)).collect(),
        }
    }

    pub fn county(&self, geoid: &str) -> Option<&GeoEntity> {
        self.counties.get(geoid)
    }

    pub fn counties(&self) -> impl Iterator<Item = &GeoEntity> {
        self.counties.values()
    }

    /// Representative coordinate for an origin code: state centroid for
    /// numeric codes, the synthetic region table otherwise. An origin with
    /// no coordinate anywhere anchors at (0, 0) so its arcs stay drawable.
    pub fn origin_position(&self, code: &str) -> (f64, f64) {
        if codes::is_numeric_code(code) {
            if let Some(meta) = self.states.get(code) {
                if let (Some(lon), Some(lat)) = (meta.lon, meta.lat) {
                    return (lon, lat);
                }
            }
        }
        region_centroid(code).unwrap_or((0.0, 0.0))
    }
}

// ============================================================================
// Accumulator
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct FeatStat {
    sum: f64,
    sum_abs: f64,
    count: u64,
}

impl FeatStat {
    fn add(&mut self, v: f64) {
        self.sum += v;
        self.sum_abs += v.abs();
        self.count += 1;
    }

    fn merge(&mut self, other: &FeatStat) {
        self.sum += other.sum;
        self.sum_abs += other.sum_abs;
        self.count += other.count;
    }
}

#[derive(Default)]
struct Accumulator {
    by_dest: BTreeMap<String, Vec<PartitionRow>>,
    by_origin: BTreeMap<String, Vec<PartitionRow>>,
    by_dest_attr: BTreeMap<String, Vec<AttrRow>>,

    inbound_county_observed: BTreeMap<String, f64>,
    inbound_county_predicted: BTreeMap<String, f64>,
    inbound_state_observed: BTreeMap<String, f64>,
    inbound_state_predicted: BTreeMap<String, f64>,
    outbound_state_observed: BTreeMap<String, f64>,
    outbound_state_predicted: BTreeMap<String, f64>,

    inbound_by_age: NestedTotals,
    inbound_by_income: NestedTotals,
    inbound_by_education: NestedTotals,

    in_adjacency: BTreeMap<String, Vec<PartitionRow>>,
    out_adjacency: BTreeMap<String, Vec<PartitionRow>>,

    max_observed: f64,
    max_predicted: f64,

    feature_global: Vec<FeatStat>,
    feature_county: Vec<BTreeMap<String, FeatStat>>,

    skipped_missing_geo: u64,
}

impl Accumulator {
    fn with_schema(schema_len: usize) -> Self {
        Self {
            feature_global: vec![FeatStat::default(); schema_len],
            feature_county: vec![BTreeMap::new(); schema_len],
            ..Self::default()
        }
    }

    fn absorb(&mut self, record: &FlowRecord, geo: &GeoIndex) {
        let Some(county) = geo.county(&record.dest) else {
            self.skipped_missing_geo += 1;
            return;
        };

        let (origin_lon, origin_lat) = geo.origin_position(&record.origin);
        let dest_state = record.dest[..2].to_string();
        let origin_key = codes::origin_partition_key(&record.origin);

        let row = PartitionRow {
            id: record.id(),
            origin: record.origin.clone(),
            dest: record.dest.clone(),
            observed: record.observed,
            predicted: record.predicted,
            origin_lon,
            origin_lat,
            dest_lon: county.lon.unwrap_or(0.0),
            dest_lat: county.lat.unwrap_or(0.0),
            age: record.demographics.age.clone(),
            income: record.demographics.income.clone(),
            education: record.demographics.education.clone(),
        };

        self.max_observed = self.max_observed.max(record.observed);
        self.max_predicted = self.max_predicted.max(record.predicted);

        accumulate(&mut self.inbound_county_observed, &record.dest, record.observed);
        accumulate(&mut self.inbound_county_predicted, &record.dest, record.predicted);
        accumulate(&mut self.inbound_state_observed, &dest_state, record.observed);
        accumulate(&mut self.inbound_state_predicted, &dest_state, record.predicted);
        accumulate(&mut self.outbound_state_observed, &record.origin, record.observed);
        accumulate(&mut self.outbound_state_predicted, &record.origin, record.predicted);

        if let Some(age) = &record.demographics.age {
            accumulate_nested(&mut self.inbound_by_age, &record.dest, age, record.observed);
        }
        if let Some(income) = &record.demographics.income {
            accumulate_nested(&mut self.inbound_by_income, &record.dest, income, record.observed);
        }
        if let Some(education) = &record.demographics.education {
            accumulate_nested(
                &mut self.inbound_by_education,
                &record.dest,
                education,
                record.observed,
            );
        }

        self.in_adjacency
            .entry(record.dest.clone())
            .or_default()
            .push(row.clone());
        self.out_adjacency
            .entry(origin_key.clone())
            .or_default()
            .push(row.clone());

        if let Some(attr) = &record.attribution {
            self.by_dest_attr
                .entry(dest_state.clone())
                .or_default()
                .push(AttrRow {
                    id: row.id.clone(),
                    base_value: attr.base_value,
                    values: attr.values.clone(),
                });

            for (i, &v) in attr.values.iter().enumerate() {
                if i >= self.feature_global.len() {
                    break;
                }
                self.feature_global[i].add(v);
                self.feature_county[i]
                    .entry(record.dest.clone())
                    .or_default()
                    .add(v);
            }
        }

        self.by_dest.entry(dest_state).or_default().push(row.clone());
        self.by_origin.entry(origin_key).or_default().push(row);
    }

    /// Associative merge; `other` holds the later input range, so its rows
    /// append after ours and original record order survives the reduction.
    fn merge(mut self, other: Accumulator) -> Accumulator {
        merge_rows(&mut self.by_dest, other.by_dest);
        merge_rows(&mut self.by_origin, other.by_origin);
        merge_rows(&mut self.by_dest_attr, other.by_dest_attr);
        merge_rows(&mut self.in_adjacency, other.in_adjacency);
        merge_rows(&mut self.out_adjacency, other.out_adjacency);

        merge_totals(&mut self.inbound_county_observed, other.inbound_county_observed);
        merge_totals(&mut self.inbound_county_predicted, other.inbound_county_predicted);
        merge_totals(&mut self.inbound_state_observed, other.inbound_state_observed);
        merge_totals(&mut self.inbound_state_predicted, other.inbound_state_predicted);
        merge_totals(&mut self.outbound_state_observed, other.outbound_state_observed);
        merge_totals(&mut self.outbound_state_predicted, other.outbound_state_predicted);

        merge_nested(&mut self.inbound_by_age, other.inbound_by_age);
        merge_nested(&mut self.inbound_by_income, other.inbound_by_income);
        merge_nested(&mut self.inbound_by_education, other.inbound_by_education);

        self.max_observed = self.max_observed.max(other.max_observed);
        self.max_predicted = self.max_predicted.max(other.max_predicted);

        for (mine, theirs) in self.feature_global.iter_mut().zip(&other.feature_global) {
            mine.merge(theirs);
        }
        for (mine, theirs) in self.feature_county.iter_mut().zip(other.feature_county) {
            for (geoid, stat) in theirs {
                mine.entry(geoid).or_default().merge(&stat);
            }
        }

        self.skipped_missing_geo += other.skipped_missing_geo;
        self
    }
}

fn accumulate(map: &mut BTreeMap<String, f64>, key: &str, amount: f64) {
    *map.entry(key.to_string()).or_insert(0.0) += amount;
}

fn accumulate_nested(map: &mut NestedTotals, primary: &str, secondary: &str, amount: f64) {
    *map.entry(primary.to_string())
        .or_default()
        .entry(secondary.to_string())
        .or_insert(0.0) += amount;
}

fn merge_rows<T>(into: &mut BTreeMap<String, Vec<T>>, from: BTreeMap<String, Vec<T>>) {
    for (key, mut rows) in from {
        into.entry(key).or_default().append(&mut rows);
    }
}

fn merge_totals(into: &mut BTreeMap<String, f64>, from: BTreeMap<String, f64>) {
    for (key, amount) in from {
        *into.entry(key).or_insert(0.0) += amount;
    }
}

fn merge_nested(into: &mut NestedTotals, from: NestedTotals) {
    for (primary, inner) in from {
        let target = into.entry(primary).or_default();
        for (secondary, amount) in inner {
            *target.entry(secondary).or_insert(0.0) += amount;
        }
    }
}

// ============================================================================
// Build output
// ============================================================================

/// Everything the cache writer serializes.
pub struct BuildOutput {
    pub by_dest: BTreeMap<String, Vec<PartitionRow>>,
    pub by_origin: BTreeMap<String, Vec<PartitionRow>>,
    pub by_dest_attr: BTreeMap<String, Vec<AttrRow>>,
    pub summary: Summary,
    pub schema: Vec<String>,
    pub feature_rank: Vec<FeatureRankEntry>,
    pub feature_by_county: Vec<FeatureCountyAggregate>,
    pub skipped_missing_geo: u64,
}

/// Run the full aggregation pass.
pub fn build_cache(records: &[FlowRecord], schema: &[String], geo: &GeoIndex) -> BuildOutput {
    let merged = records
        .par_chunks(SHARD_SIZE)
        .map(|chunk| {
            let mut acc = Accumulator::with_schema(schema.len());
            for record in chunk {
                acc.absorb(record, geo);
            }
            acc
        })
        .reduce(|| Accumulator::with_schema(schema.len()), Accumulator::merge);

    finalize(merged, schema)
}

fn finalize(mut acc: Accumulator, schema: &[String]) -> BuildOutput {
    if acc.skipped_missing_geo > 0 {
        tracing::warn!(
            skipped = acc.skipped_missing_geo,
            "records without resolvable destination metadata were excluded"
        );
    }

    // Consumers assume "top of partition" ordering; ties keep input order.
    for rows in acc.by_dest.values_mut().chain(acc.by_origin.values_mut()) {
        sort_rows_desc(rows);
    }
    for rows in acc.in_adjacency.values_mut().chain(acc.out_adjacency.values_mut()) {
        sort_rows_desc(rows);
        rows.truncate(ADJACENCY_TOP_K);
    }

    let total_rows = acc.by_dest.values().map(Vec::len).sum();

    let mut feature_rank: Vec<FeatureRankEntry> = schema
        .iter()
        .zip(&acc.feature_global)
        .map(|(id, stat)| FeatureRankEntry {
            id: id.clone(),
            label: flowcache_model::artifact::pretty_feature_label(id),
            mean: mean(stat.sum, stat.count),
            mean_abs: mean(stat.sum_abs, stat.count),
            count: stat.count,
        })
        .collect();
    feature_rank.sort_by(|a, b| b.mean_abs.total_cmp(&a.mean_abs));

    let feature_by_county: Vec<FeatureCountyAggregate> = schema
        .iter()
        .zip(&acc.feature_county)
        .map(|(id, by_county)| {
            let mut mean_map = BTreeMap::new();
            let mut mean_abs_map = BTreeMap::new();
            for (geoid, stat) in by_county {
                mean_map.insert(geoid.clone(), mean(stat.sum, stat.count));
                mean_abs_map.insert(geoid.clone(), mean(stat.sum_abs, stat.count));
            }
            FeatureCountyAggregate {
                id: id.clone(),
                label: flowcache_model::artifact::pretty_feature_label(id),
                mean: mean_map,
                mean_abs: mean_abs_map,
            }
        })
        .collect();

    let summary = Summary {
        total_rows,
        max_observed: acc.max_observed,
        max_predicted: acc.max_predicted,
        inbound_totals_by_county_observed: acc.inbound_county_observed,
        inbound_totals_by_county_predicted: acc.inbound_county_predicted,
        inbound_totals_by_state_observed: acc.inbound_state_observed,
        inbound_totals_by_state_predicted: acc.inbound_state_predicted,
        outbound_totals_by_state_observed: acc.outbound_state_observed,
        outbound_totals_by_state_predicted: acc.outbound_state_predicted,
        inbound_totals_by_age: acc.inbound_by_age,
        inbound_totals_by_income: acc.inbound_by_income,
        inbound_totals_by_education: acc.inbound_by_education,
        in_adjacency: acc.in_adjacency,
        out_adjacency: acc.out_adjacency,
    };

    BuildOutput {
        by_dest: acc.by_dest,
        by_origin: acc.by_origin,
        by_dest_attr: acc.by_dest_attr,
        summary,
        schema: schema.to_vec(),
        feature_rank,
        feature_by_county,
        skipped_missing_geo: acc.skipped_missing_geo,
    }
}

fn sort_rows_desc(rows: &mut [PartitionRow]) {
    rows.sort_by(|a, b| b.observed.total_cmp(&a.observed));
}

fn mean(sum: f64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
