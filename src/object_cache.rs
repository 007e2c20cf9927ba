//! The [ObjectCache] keeps inflated objects in memory, keyed by their content hash, under a byte budget.
//!
//! Each object kind has its own ceiling on the size of a single entry, checked when the entry is inserted.  Kinds with
//! a ceiling of 0 are never cached.  Entries are handed out behind `Arc`, so evicting an entry which somebody is still
//! reading only drops the cache's reference; the bytes go away when the reader is done with them.
use std::collections::HashMap;
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::*;

pub const OID_LEN: usize = 20;

pub const DEFAULT_CACHE_MAX_SIZE: u64 = 256 * 1024 * 1024;

/// Content hash of an object.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid([u8; OID_LEN]);

impl Oid {
    pub const fn from_bytes(bytes: [u8; OID_LEN]) -> Oid {
        Oid(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; OID_LEN] {
        &self.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self)
    }
}

impl FromStr for Oid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Oid> {
        if s.len() != OID_LEN * 2 || !s.is_ascii() {
            return Err(Error::InvalidArgument("object id must be 40 hex digits"));
        }
        let mut out = [0u8; OID_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| Error::InvalidArgument("object id must be 40 hex digits"))?;
        }
        Ok(Oid(out))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Commit = 1,
    Tree = 2,
    Blob = 3,
    Tag = 4,
    OfsDelta = 6,
    RefDelta = 7,
}

const KIND_COUNT: usize = 6;

impl ObjectKind {
    pub const ALL: [ObjectKind; KIND_COUNT] = [
        ObjectKind::Commit,
        ObjectKind::Tree,
        ObjectKind::Blob,
        ObjectKind::Tag,
        ObjectKind::OfsDelta,
        ObjectKind::RefDelta,
    ];

    /// The numeric code used by the option selectors.
    pub fn code(self) -> i32 {
        self as i32
    }

    fn slot(self) -> usize {
        match self {
            ObjectKind::Commit => 0,
            ObjectKind::Tree => 1,
            ObjectKind::Blob => 2,
            ObjectKind::Tag => 3,
            ObjectKind::OfsDelta => 4,
            ObjectKind::RefDelta => 5,
        }
    }

    /// Default ceiling for a single cached object of this kind.
    pub fn default_limit(self) -> u64 {
        match self {
            ObjectKind::Commit | ObjectKind::Tree | ObjectKind::Tag => 4096,
            ObjectKind::Blob | ObjectKind::OfsDelta | ObjectKind::RefDelta => 0,
        }
    }
}

impl TryFrom<i32> for ObjectKind {
    type Error = Error;

    fn try_from(code: i32) -> Result<ObjectKind> {
        ObjectKind::ALL
            .iter()
            .copied()
            .find(|k| k.code() == code)
            .ok_or(Error::InvalidArgument("unknown object kind"))
    }
}

/// An inflated object held by the cache.
#[derive(Debug)]
pub struct CacheEntry {
    oid: Oid,
    kind: ObjectKind,
    data: Vec<u8>,
    last_access: AtomicU64,
}

impl CacheEntry {
    pub(crate) fn new(oid: Oid, kind: ObjectKind, data: Vec<u8>) -> CacheEntry {
        CacheEntry {
            oid,
            kind,
            data,
            last_access: AtomicU64::new(0),
        }
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Cache tick of the last insert or hit.
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheUsage {
    pub count: usize,
    pub bytes: u64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    /// Puts refused with [Error::EntryTooLarge].
    pub rejections: u64,
}

struct CacheState {
    entries: HashMap<Oid, Arc<CacheEntry>, RandomState>,
    lru: LruPolicy<Oid>,
    used_bytes: u64,
    max_bytes: u64,
    type_limits: [u64; KIND_COUNT],
    enabled: bool,
    tick: u64,
    stats: CacheStats,
}

impl CacheState {
    fn touch(&mut self, entry: &CacheEntry) {
        self.tick += 1;
        entry.last_access.store(self.tick, Ordering::Relaxed);
        self.lru.touch(entry.oid);
    }

    fn remove(&mut self, oid: &Oid) -> Option<Arc<CacheEntry>> {
        let entry = self.entries.remove(oid)?;
        self.lru.remove(oid);
        self.used_bytes -= entry.size();
        Some(entry)
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.lru.clear();
        self.used_bytes = 0;
    }

    fn check_size(&self, kind: ObjectKind, size: u64) -> Result<()> {
        let limit = self.type_limits[kind.slot()];
        if size > limit {
            return Err(Error::EntryTooLarge { kind, size, limit });
        }
        if size > self.max_bytes {
            return Err(Error::EntryTooLarge {
                kind,
                size,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    /// Run a cache eviction if required.
    fn evict_to_budget(&mut self) {
        let mut evicted = 0;
        while self.used_bytes > self.max_bytes {
            // Readers hold their own `Arc`, so nothing here is ever pinned.
            let oid = match self.lru.evict_one(|_| false) {
                Some(o) => o,
                None => break,
            };
            if let Some(entry) = self.entries.remove(&oid) {
                self.used_bytes -= entry.size();
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.stats.evictions += evicted;
            trace!(evicted, used_bytes = self.used_bytes, max_bytes = self.max_bytes, "evicted objects");
        }
    }
}

pub struct ObjectCache {
    state: Mutex<CacheState>,
}

impl Default for ObjectCache {
    fn default() -> Self {
        ObjectCache::new(DEFAULT_CACHE_MAX_SIZE, true)
    }
}

impl ObjectCache {
    /// Build a cache with the default per-kind ceilings.  A zero budget is replaced by the default.
    pub fn new(max_bytes: u64, enabled: bool) -> ObjectCache {
        let mut type_limits = [0; KIND_COUNT];
        for kind in ObjectKind::ALL.iter() {
            type_limits[kind.slot()] = kind.default_limit();
        }

        ObjectCache {
            state: Mutex::new(CacheState {
                entries: Default::default(),
                lru: LruPolicy::new(),
                used_bytes: 0,
                max_bytes: if max_bytes == 0 {
                    DEFAULT_CACHE_MAX_SIZE
                } else {
                    max_bytes
                },
                type_limits,
                enabled,
                tick: 0,
                stats: Default::default(),
            }),
        }
    }

    /// Look up an object, making it the most recently used.
    pub fn get(&self, oid: &Oid) -> Option<Arc<CacheEntry>> {
        let mut state = self.state.lock();
        match state.entries.get(oid).cloned() {
            Some(entry) => {
                state.touch(&entry);
                state.stats.hits += 1;
                Some(entry)
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    /// Insert an object, replacing any entry with the same id, then evict until the cache is within budget.
    ///
    /// Returns `Ok(None)` without doing anything if caching is disabled.
    pub fn put(&self, oid: Oid, kind: ObjectKind, data: Vec<u8>) -> Result<Option<Arc<CacheEntry>>> {
        let mut state = self.state.lock();
        if !state.enabled {
            return Ok(None);
        }

        let size = data.len() as u64;
        if let Err(e) = state.check_size(kind, size) {
            state.stats.rejections += 1;
            return Err(e);
        }

        state.remove(&oid);
        let entry = Arc::new(CacheEntry::new(oid, kind, data));
        state.touch(&entry);
        state.entries.insert(oid, entry.clone());
        state.used_bytes += size;
        state.stats.insertions += 1;
        state.evict_to_budget();
        Ok(Some(entry))
    }

    /// Would a `put` of this kind and size be stored?
    pub fn admits(&self, kind: ObjectKind, size: u64) -> bool {
        let state = self.state.lock();
        state.enabled && state.check_size(kind, size).is_ok()
    }

    pub fn remove(&self, oid: &Oid) -> Option<Arc<CacheEntry>> {
        self.state.lock().remove(oid)
    }

    pub fn clear(&self) {
        self.state.lock().clear();
    }

    pub fn byte_limit(&self) -> u64 {
        self.state.lock().max_bytes
    }

    /// Change the byte budget.  Shrinking evicts immediately.
    pub fn set_byte_limit(&self, bytes: u64) -> Result<()> {
        if bytes == 0 {
            return Err(Error::InvalidArgument("cache size must be positive"));
        }
        let mut state = self.state.lock();
        state.max_bytes = bytes;
        state.evict_to_budget();
        debug!(max_bytes = bytes, used_bytes = state.used_bytes, "set object cache limit");
        Ok(())
    }

    pub fn type_limit(&self, kind: ObjectKind) -> u64 {
        self.state.lock().type_limits[kind.slot()]
    }

    /// Set the largest single object of `kind` the cache will take.  Entries already cached are kept.
    pub fn set_type_limit(&self, kind: ObjectKind, bytes: u64) {
        self.state.lock().type_limits[kind.slot()] = bytes;
        debug!(?kind, limit = bytes, "set object kind limit");
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Turn caching on or off.  Turning it off drops every entry.
    pub fn enable(&self, enabled: bool) {
        let mut state = self.state.lock();
        state.enabled = enabled;
        if !enabled {
            state.clear();
        }
        debug!(enabled, "object caching toggled");
    }

    pub fn current_usage(&self) -> CacheUsage {
        let state = self.state.lock();
        CacheUsage {
            count: state.entries.len(),
            bytes: state.used_bytes,
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }
}
