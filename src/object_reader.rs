//! The [ObjectReader] drives a [PackSource] and a [Decoder] through the window pool and the object cache.
//!
//! A read checks the object cache first.  On a miss, the object's raw bytes are located through the window pool, which
//! may unmap a cold window to make room, then decoded and offered to the cache.  Objects the cache won't take (caching
//! is off, or the object is too big for its kind) are still returned, just not kept.
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::*;

type GuardMap = HashMap<Oid, Arc<Mutex<()>>, ahash::RandomState>;

/// Where an object's raw bytes live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectLocation {
    pub file: FileId,
    pub offset: u64,
    pub length: u64,
    pub kind: ObjectKind,
}

pub struct ObjectReader<S: PackSource, D: Decoder> {
    source: S,
    decoder: D,
    windows: Arc<WindowPool>,
    cache: Arc<ObjectCache>,
    /// Mutexes that stop multiple threads trying to decode the same object.
    decoding_guards: Mutex<GuardMap>,
}

impl<S: PackSource, D: Decoder> ObjectReader<S, D> {
    pub fn new(source: S, decoder: D, windows: Arc<WindowPool>, cache: Arc<ObjectCache>) -> ObjectReader<S, D> {
        ObjectReader {
            source,
            decoder,
            windows,
            cache,
            decoding_guards: Default::default(),
        }
    }

    /// Build a reader over the pool and cache a [Settings] tunes.
    pub fn with_settings(source: S, decoder: D, settings: &Settings) -> ObjectReader<S, D> {
        ObjectReader::new(
            source,
            decoder,
            settings.window_pool().clone(),
            settings.object_cache().clone(),
        )
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Decode an object, assuming we are holding the guard necessary to stop other threads from doing so in parallel.
    fn decode_postchecked(
        &self,
        oid: Oid,
        location: &ObjectLocation,
    ) -> Result<Arc<CacheEntry>, ReadError<D::Error>> {
        // Somebody else may have finished decoding while we waited on the guard.
        if let Some(x) = self.cache.get(&oid) {
            return Ok(x);
        }

        let decoded = {
            let window = self
                .windows
                .acquire(&self.source, &location.file, location.offset, location.length)?;
            self.decoder
                .decode(window.bytes(), location.kind)
                .map_err(ReadError::Decoder)?
        };

        if self.cache.admits(location.kind, decoded.len() as u64) {
            // The limits can change between the check and the put; fall through to an uncached entry if they did.
            match self.cache.put(oid, location.kind, decoded) {
                Ok(Some(entry)) => return Ok(entry),
                Ok(None) => {}
                Err(Error::EntryTooLarge { .. }) => {}
                Err(e) => return Err(e.into()),
            }
            // Lost a race with a limit change after the bytes moved into `put`, so decode them again.
            return self.decode_uncached(oid, location);
        }

        trace!(%oid, kind = ?location.kind, "object not cacheable");
        Ok(Arc::new(CacheEntry::new(oid, location.kind, decoded)))
    }

    fn decode_uncached(&self, oid: Oid, location: &ObjectLocation) -> Result<Arc<CacheEntry>, ReadError<D::Error>> {
        let window = self
            .windows
            .acquire(&self.source, &location.file, location.offset, location.length)?;
        let decoded = self
            .decoder
            .decode(window.bytes(), location.kind)
            .map_err(ReadError::Decoder)?;
        Ok(Arc::new(CacheEntry::new(oid, location.kind, decoded)))
    }

    /// Get an object, reading and decoding it if it isn't cached.
    pub fn read(&self, oid: Oid, location: &ObjectLocation) -> Result<Arc<CacheEntry>, ReadError<D::Error>> {
        if let Some(x) = self.cache.get(&oid) {
            return Ok(x);
        }

        // Stop any other threads from trying to decode this object, and make them wait on this thread to finish.
        let mutex = self
            .decoding_guards
            .lock()
            .entry(oid)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard: parking_lot::MutexGuard<()> = mutex.lock();
            self.decode_postchecked(oid, location)
        };

        // Drop the guard unless another thread cloned it while we decoded.  Waiters clone under the map lock, so the
        // count can't change underneath us here.
        let mut guards = self.decoding_guards.lock();
        if guards.get(&oid).map_or(false, |m| Arc::ptr_eq(m, &mutex)) && Arc::strong_count(&mutex) == 2 {
            guards.remove(&oid);
        }

        result
    }

    /// Drop an object from the cache.
    pub fn remove(&self, oid: &Oid) {
        self.decoding_guards.lock().remove(oid);
        self.cache.remove(oid);
    }
}
