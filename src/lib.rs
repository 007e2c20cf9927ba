//! Bounded caching for a content-addressed object store: decoded objects in memory, and memory-mapped windows into
//! the pack files they come from.
//!
//! Mapped memory, file descriptors and decoded objects all compete for the same RAM, so each is kept under a budget
//! which can be changed at runtime.  This crate provides the pieces for that:
//!
//! [LruPolicy] is the recency bookkeeping both caches share.  It only orders ids and picks the coldest one which isn't
//! pinned; it knows nothing of sizes or budgets.
//!
//! [WindowPool] maps spans of pack files through a [PackSource], reusing a window when one already covers a request,
//! and unmapping the least recently used windows when the mapped byte budget or the window count limit would be
//! exceeded.  Windows that a [WindowHandle] still refers to are never unmapped.
//!
//! [ObjectCache] holds inflated objects keyed by [Oid] under a byte budget, with a ceiling per [ObjectKind] on how large
//! a single cached object may be.  It can be switched off entirely, which drops everything it holds.
//!
//! [ObjectReader] ties these together with a [Decoder]: check the cache, map the object's bytes, decode, cache.
//!
//! [Settings] owns one of each cache plus the per-[ConfigLevel] configuration search paths, and is the surface all of
//! these are tuned through, either with a method per tunable or with [Settings::option] and a [GitOption] selector.
//! Construct it once with a [TuningConfig] and share it.
mod config;
mod error;
mod filesystem_packs;
mod lru_policy;
mod object_cache;
mod object_reader;
mod options;
mod search_path;
mod settings;
#[cfg(test)]
mod test_util;
mod traits;
mod window_pool;

pub use config::*;
pub use error::*;
pub use filesystem_packs::*;
pub use lru_policy::*;
pub use object_cache::*;
pub use object_reader::*;
pub use options::*;
pub use search_path::*;
pub use settings::*;
pub use traits::*;
pub use window_pool::*;
