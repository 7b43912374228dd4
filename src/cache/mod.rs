//! Generic TTL cache for source results.
//!
//! This module knows nothing about work items. It:
//! - Stores one serialized value per key with the time it was written
//! - Serves the stored value while it is younger than the TTL
//! - Runs the producer otherwise, and never stores failures
//! - Supports unconditional purging for forced refreshes

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, NoopStorage, SqliteStorage};
pub use traits::{CacheKey, CacheSource};
