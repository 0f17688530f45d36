//! FlowCache ingestion
//!
//! Turns untrusted build-time inputs into validated model types:
//!
//! - `flows`: parses the tabular flow-records CSV, normalizes identifiers,
//!   enforces the geoid cross-field invariant, and counts (never throws on)
//!   rejected rows
//! - `geometry`: resolves counties and states from GeoJSON boundary files,
//!   with a deterministic coordinate fallback chain
//! - `centroids`: loads the optional precomputed centroid table
//!
//! One bad row or feature never aborts a batch; it is skipped and counted
//! (rows) or skipped and warned about (features).

pub mod centroids;
pub mod flows;
pub mod geometry;

pub use centroids::{load_centroid_table, CentroidTable};
pub use flows::{read_flow_records, IngestOptions, IngestReport, RejectCounts};
pub use geometry::{resolve_counties, resolve_states};
