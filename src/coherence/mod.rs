//! MESI coherence between per-core first-level caches and a shared last-level directory cache.
//!
//! Every transaction runs as a `Process` that first locks its target line, then steps
//! through its protocol actions across controller passes.  Later requests to a locked line
//! either queue behind it or, for requests the directory receives, fail and get retried.

pub mod access;
pub mod config;
pub mod controller;
pub mod directory;
pub mod error;
pub mod events;
pub mod first_level;
pub mod last_level;
pub mod message;
pub mod process;
pub mod stats;

#[cfg(test)]
mod tests;

pub use access::{AccessCompletion, AccessId, AccessInfo, CompletionCallback, MemoryAccess};
pub use config::{CacheConfig, FirstLevelCacheConfig, LastLevelCacheConfig};
pub use controller::{CacheRole, CoherenceController, ControllerCore};
pub use directory::ShadowTagDirectory;
pub use error::{AccessReject, AccessRejectReason, CoherenceError};
pub use events::{CoherenceEvent, EventDispatcher, EventListener};
pub use first_level::{FirstLevel, FirstLevelCache, L1Step, L1Task};
pub use last_level::{LastLevel, LastLevelCache, LlcStep, LlcTask, Sharers};
pub use message::{data_bytes, DeviceId, Message, MessageId, MessageKind, CONTROL_BYTES};
pub use process::{FindAndLock, FindAndLockStatus, Process, ProcessId, Step};
pub use stats::CacheStats;
