pub mod access;
pub mod geometry;
pub mod line;
pub mod replacement;
pub mod storage;

/// Line-aligned physical address.
pub type Tag = u64;

pub use access::{AccessKind, CacheAccess};
pub use geometry::CacheGeometry;
pub use line::{CacheLine, MesiState};
pub use replacement::{
    LruPolicy, RandomPolicy, Replacement, ReplacementPolicy, ReplacementPolicyKind,
};
pub use storage::LockableCache;
