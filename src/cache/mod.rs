//! Disk-backed memoization of expensive, deterministic pipeline stages.
//!
//! Two artifact kinds share one redb database:
//! - binned local/global views, keyed by dataset identity and bin counts
//! - metric/confusion grids, keyed by model identity and evaluation shape
//!
//! Cache keys are structured types serialized with bincode, never formatted
//! strings, so key collisions from ambiguous formatting cannot happen.

pub mod store;

pub use store::{ArtifactStore, BinKey, CacheStats, MetricKey};
