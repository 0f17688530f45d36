//! FlowCache build pipeline
//!
//! Takes the validated record set plus resolved geo metadata and produces the
//! complete cache artifact set:
//!
//! - disjoint base partitions per destination state and per origin code
//! - attribution partitions (when the dataset carries vectors)
//! - running aggregate totals, global maxima, bounded adjacency lists
//! - per-feature global and per-county aggregate statistics
//! - the manifest and the global summary
//!
//! The aggregation is one logical pass per record, sharded across worker
//! threads by `rayon` and merged with an associative reduction; the writer
//! then serializes every artifact independently (idempotent,
//! order-independent writes keyed by the artifact scheme).

pub mod aggregate;
pub mod writer;

pub use aggregate::{build_cache, BuildOutput, GeoIndex};
pub use writer::CacheWriter;
