//! FlowCache core data model
//!
//! Shared types for the build pipeline and the query engine:
//!
//! - `codes`: fixed-width geographic identifier normalization (FIPS codes and
//!   the small closed set of non-US region codes)
//! - `record`: validated flow records and demographic tags
//! - `geo`: resolved geographic entities (counties, states, regions)
//! - `artifact`: the write-once cache artifact payloads and their key scheme
//!
//! Everything here is plain data: no I/O, no global state. The build pipeline
//! produces these types once; the query engine only ever reads them.

pub mod artifact;
pub mod codes;
pub mod geo;
pub mod record;

pub use artifact::{
    AttrPartition, AttrRow, Dimensions, FeatureCountyAggregate, FeatureRankEntry, Manifest,
    Partition, PartitionKind, PartitionRow, Summary, ADJACENCY_TOP_K,
};
pub use geo::{GeoEntity, StateMeta};
pub use record::{Attribution, Demographics, FlowRecord};
