//! Caches backing the incremental recompilation engine: bounded LRU/LFU
//! replacement policies, the build-result cache keyed by hashed inputs,
//! and the persistent per-unit compilation cache.

pub mod build_cache;
pub mod compilation_cache;
mod key_list;
pub mod lfu;
pub mod lru;
pub mod policy;

pub use build_cache::*;
pub use compilation_cache::*;
pub use lfu::*;
pub use lru::*;
pub use policy::*;

// Re-export common types for convenience
pub use unitgraph_core::{Result, UnitGraphError};
