//! Cache artifact payloads and the artifact key scheme.
//!
//! Every artifact is a self-contained JSON document addressable by a
//! predictable key under the cache root. Field names are camelCase on the
//! wire (the downstream visualization layer is JavaScript). Artifacts are
//! write-once: the builder emits them, the query engine only reads.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Adjacency lists are capped at the top 100 records per geo entity.
pub const ADJACENCY_TOP_K: usize = 100;

/// Which partition family a payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionKind {
    #[serde(rename = "by_dest")]
    ByDest,
    #[serde(rename = "by_origin")]
    ByOrigin,
    #[serde(rename = "by_dest_attr")]
    ByDestAttr,
}

/// One serialized flow row inside a base partition or adjacency list.
///
/// Coordinates are resolved at build time; an unresolvable endpoint is
/// written as `0.0` so every row stays drawable as an arc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionRow {
    pub id: String,
    pub origin: String,
    pub dest: String,
    pub observed: f64,
    pub predicted: f64,
    pub origin_lon: f64,
    pub origin_lat: f64,
    pub dest_lon: f64,
    pub dest_lat: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub income: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub education: Option<String>,
}

impl PartitionRow {
    /// The row's numeric value for a given value type selector.
    pub fn value(&self, predicted: bool) -> f64 {
        if predicted {
            self.predicted
        } else {
            self.observed
        }
    }
}

/// A base partition: all rows sharing one destination-state prefix (or one
/// origin code), pre-sorted descending by observed value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    pub code: String,
    pub kind: PartitionKind,
    pub max_observed: f64,
    pub max_predicted: f64,
    pub rows: Vec<PartitionRow>,
}

/// One attribution row: the record id, the model base value, and the vector
/// aligned to the build's feature schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttrRow {
    pub id: String,
    pub base_value: f64,
    pub values: Vec<f64>,
}

/// An attribution partition, keyed by destination state like `ByDest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrPartition {
    pub code: String,
    pub kind: PartitionKind,
    pub rows: Vec<AttrRow>,
}

/// Nested totals map: geoid → demographic bucket → summed value.
pub type NestedTotals = BTreeMap<String, BTreeMap<String, f64>>;

/// The global summary: every aggregate-totals map, the global maxima, and
/// the bounded adjacency lists. Missing keys in any map mean zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_rows: usize,
    pub max_observed: f64,
    pub max_predicted: f64,
    pub inbound_totals_by_county_observed: BTreeMap<String, f64>,
    pub inbound_totals_by_county_predicted: BTreeMap<String, f64>,
    pub inbound_totals_by_state_observed: BTreeMap<String, f64>,
    pub inbound_totals_by_state_predicted: BTreeMap<String, f64>,
    pub outbound_totals_by_state_observed: BTreeMap<String, f64>,
    pub outbound_totals_by_state_predicted: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inbound_totals_by_age: NestedTotals,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inbound_totals_by_income: NestedTotals,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inbound_totals_by_education: NestedTotals,
    /// Top-K inbound rows per destination county.
    pub in_adjacency: BTreeMap<String, Vec<PartitionRow>>,
    /// Top-K outbound rows per origin partition key.
    pub out_adjacency: BTreeMap<String, Vec<PartitionRow>>,
}

/// Manifest: per partition family, row count per key. Lets a client size its
/// loading progress and detect empty scopes without fetching partitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub by_dest: BTreeMap<String, usize>,
    pub by_origin: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub by_dest_attr: BTreeMap<String, usize>,
}

/// One entry of the global feature ranking, sorted by `mean_abs` descending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRankEntry {
    pub id: String,
    pub label: String,
    pub mean: f64,
    pub mean_abs: f64,
    pub count: u64,
}

/// Per-feature per-county means. Counties with no observations for the
/// feature are absent, never zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureCountyAggregate {
    pub id: String,
    pub label: String,
    pub mean: BTreeMap<String, f64>,
    pub mean_abs: BTreeMap<String, f64>,
}

/// A demographic bucket dictionary entry for the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub id: String,
    pub label: String,
}

/// Demographic dimension dictionaries, emitted when the dataset variant
/// carries slice tags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub age: Vec<Bucket>,
    pub income: Vec<Bucket>,
    pub education: Vec<Bucket>,
}

impl Dimensions {
    /// The standard bucket dictionaries used by the sliced dataset variant.
    pub fn standard() -> Self {
        let bucket = |id: &str, label: &str| Bucket {
            id: id.to_string(),
            label: label.to_string(),
        };
        Self {
            age: vec![
                bucket("age_18_24", "18-24"),
                bucket("age_25_34", "25-34"),
                bucket("age_35_44", "35-44"),
                bucket("age_45_54", "45-54"),
                bucket("age_55_64", "55-64"),
                bucket("age_65_plus", "65+"),
            ],
            income: vec![
                bucket("inc_lt_25k", "<$25k"),
                bucket("inc_25_50k", "$25k-$50k"),
                bucket("inc_50_100k", "$50k-$100k"),
                bucket("inc_100_plus", "$100k+"),
            ],
            education: vec![
                bucket("edu_hs", "High school or GED"),
                bucket("edu_some_college", "Some college"),
                bucket("edu_ba", "Bachelor's"),
                bucket("edu_grad", "Graduate degree"),
            ],
        }
    }
}

/// Human-readable label for a feature id: `median_income` → `Median Income`.
pub fn pretty_feature_label(id: &str) -> String {
    id.split('_')
        .filter(|s| !s.is_empty())
        .map(|s| {
            let mut chars = s.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Artifact keys
// ============================================================================

/// Artifact key scheme shared by the cache writer and the query engine.
pub mod keys {
    pub const SUMMARY: &str = "summary.json";
    pub const INDEX: &str = "index.json";
    pub const ATTR_SCHEMA: &str = "attr_schema.json";
    pub const COUNTY_METADATA: &str = "county-metadata.json";
    pub const DIMENSIONS: &str = "dimensions.json";
    pub const FEATURE_GLOBAL_RANK: &str = "feature/global_rank.json";

    pub fn by_dest(code: &str) -> String {
        format!("flows/by_dest/{code}.json")
    }

    pub fn by_origin(code: &str) -> String {
        format!("flows/by_origin/{code}.json")
    }

    pub fn by_dest_attr(code: &str) -> String {
        format!("flows/by_dest_attr/{code}.json")
    }

    pub fn feature_by_county(feature_id: &str) -> String {
        format!("feature/by_county/{feature_id}.json")
    }
}
