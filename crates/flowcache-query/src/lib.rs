//! FlowCache query engine
//!
//! Serves ranked flow arcs out of the write-once artifact set:
//!
//! - `store`: the `ArtifactStore` strategy seam — one trait, filesystem and
//!   HTTP implementations, and a fallback combinator, so the engine never
//!   branches on I/O strategy
//! - `filter`: user filters, their resolution against defaults, and the
//!   canonical memoization signature
//! - `engine`: the `FlowEngine` itself — explicit `init`/`reset` lifecycle,
//!   lazily loaded partitions with coalesced concurrent loads, and memoized
//!   results shared by `Arc`
//!
//! The engine never sees raw rows and never writes artifacts back.

pub mod engine;
pub mod filter;
pub mod store;

pub use engine::{EngineConfig, FlowArc, FlowEngine, NetTotals, QueryError};
pub use filter::{FeatureFilter, FlowFilter, Metric, ValueType};
pub use store::{ArtifactStore, FallbackStore, FsStore, HttpStore, StoreError};
