//! The [WindowPool] keeps a bounded set of mapped views ("windows") into pack files.
//!
//! Mapped memory and file descriptors are scarce, so the pool enforces two budgets: the total number of mapped bytes
//! and, optionally, the number of windows.  A request for a span of a file reuses any window which already contains
//! the span; otherwise a new window of the configured size is mapped around it, evicting the least recently used
//! windows first.
//!
//! Windows are handed out behind [WindowHandle]s.  While a handle is alive its window is pinned and will never be
//! unmapped; dropping the handle (or passing it to [WindowPool::release]) makes it evictable again.
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::*;

/// Window sizes and placements are rounded to this.  The mapping itself is aligned to the platform page by memmap2,
/// so this only sets the granularity of the budget.
pub const PAGE_SIZE: u64 = 4096;

#[cfg(target_pointer_width = "64")]
pub const DEFAULT_WINDOW_SIZE: u64 = 1024 * 1024 * 1024;
#[cfg(not(target_pointer_width = "64"))]
pub const DEFAULT_WINDOW_SIZE: u64 = 32 * 1024 * 1024;

#[cfg(target_pointer_width = "64")]
pub const DEFAULT_MAPPED_LIMIT: u64 = 8 * 1024 * 1024 * 1024;
#[cfg(not(target_pointer_width = "64"))]
pub const DEFAULT_MAPPED_LIMIT: u64 = 256 * 1024 * 1024;

/// Identifies a pack file to a [PackSource].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(Arc<str>);

impl FileId {
    pub fn new(name: impl AsRef<str>) -> FileId {
        FileId(name.as_ref().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FileId {
    fn from(name: &str) -> FileId {
        FileId::new(name)
    }
}

impl From<String> for FileId {
    fn from(name: String) -> FileId {
        FileId(name.into())
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type WindowId = u64;

struct Window {
    file: FileId,
    offset: u64,
    len: u64,
    region: Box<dyn AsRef<[u8]> + Send + Sync>,
    last_access: AtomicU64,
    /// Only ever incremented with the pool locked.
    refs: AtomicUsize,
}

impl Window {
    fn contains(&self, offset: u64, end: u64) -> bool {
        self.offset <= offset && end <= self.offset + self.len
    }

    fn is_pinned(&self) -> bool {
        self.refs.load(Ordering::Acquire) > 0
    }
}

/// A pinned view of a span of a pack file.
pub struct WindowHandle {
    window: Arc<Window>,
    start: usize,
    len: usize,
}

impl WindowHandle {
    /// The bytes of the span which was asked for.
    pub fn bytes(&self) -> &[u8] {
        &(*self.window.region).as_ref()[self.start..self.start + self.len]
    }

    pub fn file(&self) -> &FileId {
        &self.window.file
    }

    /// Offset of the whole window in its file.
    pub fn window_offset(&self) -> u64 {
        self.window.offset
    }

    pub fn window_len(&self) -> u64 {
        self.window.len
    }

    /// Pool tick at which the window was last acquired.
    pub fn last_access(&self) -> u64 {
        self.window.last_access.load(Ordering::Relaxed)
    }

    /// Number of live handles on this window, including this one.
    pub fn ref_count(&self) -> usize {
        self.window.refs.load(Ordering::Acquire)
    }
}

impl Drop for WindowHandle {
    fn drop(&mut self) {
        self.window.refs.fetch_sub(1, Ordering::Release);
    }
}

impl fmt::Debug for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowHandle")
            .field("file", &self.window.file)
            .field("window_offset", &self.window.offset)
            .field("window_len", &self.window.len)
            .field("span_start", &self.start)
            .field("span_len", &self.len)
            .finish()
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct WindowUsage {
    pub count: usize,
    pub bytes: u64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct WindowStats {
    pub mapped_bytes: u64,
    pub open_windows: usize,
    pub peak_mapped_bytes: u64,
    pub mmap_calls: u64,
}

struct PoolState {
    windows: HashMap<WindowId, Arc<Window>, RandomState>,
    by_file: HashMap<FileId, Vec<WindowId>, RandomState>,
    lru: LruPolicy<WindowId>,
    next_id: WindowId,
    tick: u64,
    window_size: u64,
    mapped_limit: u64,
    max_windows: Option<usize>,
    mapped_bytes: u64,
    peak_mapped_bytes: u64,
    mmap_calls: u64,
}

impl PoolState {
    fn find_containing(&self, file: &FileId, offset: u64, end: u64) -> Option<(WindowId, Arc<Window>)> {
        self.by_file
            .get(file)?
            .iter()
            .map(|id| (*id, &self.windows[id]))
            .find(|(_, w)| w.contains(offset, end))
            .map(|(id, w)| (id, w.clone()))
    }

    /// Pin a window for a new handle and make it the most recent.
    fn pin(&mut self, id: WindowId, window: &Window) {
        self.tick += 1;
        window.refs.fetch_add(1, Ordering::AcqRel);
        window.last_access.store(self.tick, Ordering::Relaxed);
        self.lru.touch(id);
    }

    /// Where a new window around `[offset, end)` goes.  The result always contains the span.
    fn window_bounds(&self, offset: u64, end: u64, file_len: u64) -> (u64, u64) {
        let half = (self.window_size / 2 / PAGE_SIZE).max(1) * PAGE_SIZE;
        let mut start = offset / half * half;
        if end - start > self.mapped_limit {
            start = offset / PAGE_SIZE * PAGE_SIZE;
        }
        if end - start > self.mapped_limit {
            // Even page alignment would push us over budget, so start exactly at the span.
            start = offset;
        }

        let len = self
            .window_size
            .max(end - start)
            .min(file_len - start)
            .min(self.mapped_limit);
        (start, len)
    }

    fn over_budget(&self, extra_bytes: u64, extra_count: usize) -> bool {
        self.mapped_bytes + extra_bytes > self.mapped_limit
            || self
                .max_windows
                .map_or(false, |m| self.windows.len() + extra_count > m)
    }

    fn unmap(&mut self, id: WindowId) {
        let window = match self.windows.remove(&id) {
            Some(w) => w,
            None => return,
        };
        self.lru.remove(&id);
        if let Some(ids) = self.by_file.get_mut(&window.file) {
            ids.retain(|x| *x != id);
            if ids.is_empty() {
                self.by_file.remove(&window.file);
            }
        }
        self.mapped_bytes -= window.len;
        debug!(file = %window.file, offset = window.offset, len = window.len, "unmapped window");
    }

    /// Evict cold, unpinned windows until `extra_bytes` more bytes in `extra_count` more windows fit the budgets.
    fn evict_until_fits(&mut self, extra_bytes: u64, extra_count: usize) -> Result<()> {
        while self.over_budget(extra_bytes, extra_count) {
            let victim = {
                let PoolState { lru, windows, .. } = &mut *self;
                lru.evict_one(|id| windows[id].is_pinned())
            };

            match victim {
                Some(id) => self.unmap(id),
                None => {
                    let pinned = self.windows.len();
                    warn!(
                        mapped_bytes = self.mapped_bytes,
                        mapped_limit = self.mapped_limit,
                        pinned,
                        "every mapped window is in use"
                    );
                    return Err(Error::ResourceBusy {
                        limit: self.mapped_limit,
                        count_limit: self.max_windows,
                        pinned,
                    });
                }
            }
        }
        Ok(())
    }
}

pub struct WindowPool {
    state: Mutex<PoolState>,
}

impl Default for WindowPool {
    fn default() -> Self {
        WindowPool::new(DEFAULT_WINDOW_SIZE, DEFAULT_MAPPED_LIMIT, None)
    }
}

impl WindowPool {
    /// Build a pool.  Zero sizes are replaced by the defaults; use the setters for validated changes.
    pub fn new(window_size: u64, mapped_limit: u64, max_windows: Option<usize>) -> WindowPool {
        let window_size = round_to_page(window_size).unwrap_or(DEFAULT_WINDOW_SIZE);
        let mapped_limit = if mapped_limit == 0 {
            DEFAULT_MAPPED_LIMIT
        } else {
            mapped_limit
        };

        WindowPool {
            state: Mutex::new(PoolState {
                windows: Default::default(),
                by_file: Default::default(),
                lru: LruPolicy::new(),
                next_id: 0,
                tick: 0,
                window_size,
                mapped_limit,
                max_windows: max_windows.filter(|m| *m > 0),
                mapped_bytes: 0,
                peak_mapped_bytes: 0,
                mmap_calls: 0,
            }),
        }
    }

    /// Get a handle on a window containing `length` bytes of `file` starting at `offset`.
    pub fn acquire<S: PackSource>(
        &self,
        source: &S,
        file: &FileId,
        offset: u64,
        length: u64,
    ) -> Result<WindowHandle> {
        if length == 0 {
            return Err(Error::InvalidArgument("window span must not be empty"));
        }
        let end = offset
            .checked_add(length)
            .ok_or(Error::InvalidArgument("window span overflows"))?;

        let mut state = self.state.lock();

        if let Some((id, window)) = state.find_containing(file, offset, end) {
            state.pin(id, &window);
            trace!(file = %file, offset, length, "reused window");
            return Ok(handle_for(window, offset, length));
        }

        let file_len = source.file_len(file)?;
        if end > file_len {
            return Err(Error::InvalidArgument("window span extends past the end of the file"));
        }
        if length > state.mapped_limit {
            return Err(Error::InvalidArgument("window span is larger than the mapped limit"));
        }

        let (start, len) = state.window_bounds(offset, end, file_len);
        state.evict_until_fits(len, 1)?;

        let region = source.read_span(file, start, len)?;
        if (AsRef::<[u8]>::as_ref(&region).len() as u64) < len {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "pack source returned a short span",
            )));
        }

        let window = Arc::new(Window {
            file: file.clone(),
            offset: start,
            len,
            region: Box::new(region),
            last_access: AtomicU64::new(0),
            refs: AtomicUsize::new(0),
        });

        let id = state.next_id;
        state.next_id += 1;
        state.windows.insert(id, window.clone());
        state.by_file.entry(file.clone()).or_default().push(id);
        state.mapped_bytes += len;
        state.peak_mapped_bytes = state.peak_mapped_bytes.max(state.mapped_bytes);
        state.mmap_calls += 1;
        state.pin(id, &window);
        debug!(file = %file, offset = start, len, mapped_bytes = state.mapped_bytes, "mapped window");

        Ok(handle_for(window, offset, length))
    }

    /// Give back a handle.  Equivalent to dropping it.
    pub fn release(&self, handle: WindowHandle) {
        std::mem::drop(handle);
    }

    pub fn window_size(&self) -> u64 {
        self.state.lock().window_size
    }

    /// Set the span of windows mapped from now on.  Existing windows keep their size.
    pub fn set_window_size(&self, bytes: u64) -> Result<()> {
        let rounded = round_to_page(bytes).ok_or(Error::InvalidArgument("window size must be positive"))?;
        self.state.lock().window_size = rounded;
        debug!(window_size = rounded, "set window size");
        Ok(())
    }

    pub fn mapped_limit(&self) -> u64 {
        self.state.lock().mapped_limit
    }

    /// Change the mapped byte budget, unmapping cold windows if usage is now above it.
    ///
    /// The new limit stays in effect even when this returns [Error::ResourceBusy].
    pub fn set_mapped_limit(&self, bytes: u64) -> Result<()> {
        if bytes == 0 {
            return Err(Error::InvalidArgument("mapped limit must be positive"));
        }
        let mut state = self.state.lock();
        state.mapped_limit = bytes;
        debug!(mapped_limit = bytes, "set mapped limit");
        state.evict_until_fits(0, 0)
    }

    pub fn max_window_count(&self) -> Option<usize> {
        self.state.lock().max_windows
    }

    /// Bound the number of windows, unmapping cold ones if there are now too many.
    pub fn set_max_window_count(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(Error::InvalidArgument("window count limit must be positive"));
        }
        let mut state = self.state.lock();
        state.max_windows = Some(count);
        debug!(max_windows = count, "set window count limit");
        state.evict_until_fits(0, 0)
    }

    pub fn clear_max_window_count(&self) {
        self.state.lock().max_windows = None;
    }

    /// Unmap every window of `file` which isn't in use, returning how many are still pinned.
    pub fn close_file(&self, file: &FileId) -> usize {
        let mut state = self.state.lock();
        let ids = state.by_file.get(file).cloned().unwrap_or_default();
        let mut pinned = 0;
        for id in ids {
            if state.windows[&id].is_pinned() {
                pinned += 1;
            } else {
                state.unmap(id);
            }
        }
        pinned
    }

    pub fn current_usage(&self) -> WindowUsage {
        let state = self.state.lock();
        WindowUsage {
            count: state.windows.len(),
            bytes: state.mapped_bytes,
        }
    }

    pub fn stats(&self) -> WindowStats {
        let state = self.state.lock();
        WindowStats {
            mapped_bytes: state.mapped_bytes,
            open_windows: state.windows.len(),
            peak_mapped_bytes: state.peak_mapped_bytes,
            mmap_calls: state.mmap_calls,
        }
    }
}

fn handle_for(window: Arc<Window>, offset: u64, length: u64) -> WindowHandle {
    WindowHandle {
        start: (offset - window.offset) as usize,
        len: length as usize,
        window,
    }
}

fn round_to_page(bytes: u64) -> Option<u64> {
    if bytes == 0 {
        return None;
    }
    Some(bytes.checked_add(PAGE_SIZE - 1)? / PAGE_SIZE * PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{pattern, MemoryPacks};

    fn build_pool() -> (MemoryPacks, WindowPool, FileId) {
        let mut packs = MemoryPacks::default();
        packs.insert("pack-a", pattern(64 * 1024));
        let pool = WindowPool::new(4096, 8192, None);
        (packs, pool, FileId::new("pack-a"))
    }

    #[test]
    fn test_reuses_containing_window() {
        let (packs, pool, file) = build_pool();

        let a = pool.acquire(&packs, &file, 100, 50).unwrap();
        assert_eq!(a.bytes(), &pattern(64 * 1024)[100..150]);
        assert_eq!(a.window_offset(), 0);
        assert_eq!(a.window_len(), 4096);

        let b = pool.acquire(&packs, &file, 4000, 96).unwrap();
        assert_eq!(b.bytes(), &pattern(64 * 1024)[4000..4096]);
        assert_eq!(a.ref_count(), 2);
        assert_eq!(pool.stats().mmap_calls, 1);
        assert_eq!(packs.reads.load(Ordering::Relaxed), 1);

        pool.release(a);
        assert_eq!(b.ref_count(), 1);
    }

    #[test]
    fn test_span_across_windows_gets_its_own_window() {
        let (packs, pool, file) = build_pool();

        let h = pool.acquire(&packs, &file, 4000, 200).unwrap();
        assert_eq!(h.window_offset(), 0);
        assert_eq!(h.window_len(), 4200);
        assert_eq!(h.bytes(), &pattern(64 * 1024)[4000..4200]);
    }

    #[test]
    fn test_mapped_limit_evicts_coldest() {
        let (packs, pool, file) = build_pool();

        for offset in &[0u64, 8192, 16384] {
            let h = pool.acquire(&packs, &file, *offset, 10).unwrap();
            pool.release(h);
            assert!(pool.current_usage().bytes <= 8192);
        }
        assert_eq!(pool.current_usage(), WindowUsage { count: 2, bytes: 8192 });

        // The window at 8192 is still mapped, the one at 0 isn't.
        pool.acquire(&packs, &file, 8192, 10).unwrap();
        assert_eq!(pool.stats().mmap_calls, 3);
        pool.acquire(&packs, &file, 0, 10).unwrap();
        assert_eq!(pool.stats().mmap_calls, 4);
        assert_eq!(pool.stats().peak_mapped_bytes, 8192);
    }

    #[test]
    fn test_pinned_windows_are_never_evicted() {
        let (packs, pool, file) = build_pool();

        let a = pool.acquire(&packs, &file, 0, 10).unwrap();
        let b = pool.acquire(&packs, &file, 8192, 10).unwrap();
        match pool.acquire(&packs, &file, 16384, 10) {
            Err(Error::ResourceBusy { pinned: 2, .. }) => {}
            x => panic!("Expected ResourceBusy, got {:?}", x),
        }
        assert_eq!(a.bytes(), &pattern(10)[..]);

        pool.release(a);
        let c = pool.acquire(&packs, &file, 16384, 10).unwrap();
        assert_eq!(c.window_offset(), 16384);
        assert_eq!(b.window_offset(), 8192);
        assert_eq!(pool.current_usage().count, 2);
    }

    #[test]
    fn test_shrinking_with_pinned_windows() {
        let (packs, pool, file) = build_pool();

        let a = pool.acquire(&packs, &file, 0, 10).unwrap();
        let b = pool.acquire(&packs, &file, 8192, 10).unwrap();
        pool.release(b);

        assert!(matches!(pool.set_mapped_limit(4096), Ok(())));
        assert_eq!(pool.current_usage().count, 1);

        assert!(matches!(pool.set_mapped_limit(1), Err(Error::ResourceBusy { .. })));
        assert_eq!(pool.mapped_limit(), 1);

        pool.release(a);
        pool.set_mapped_limit(1).unwrap();
        assert_eq!(pool.current_usage(), WindowUsage::default());
    }

    #[test]
    fn test_window_count_limit() {
        let mut packs = MemoryPacks::default();
        packs.insert("pack-a", pattern(64 * 1024));
        let pool = WindowPool::new(4096, 1 << 20, None);
        let file = FileId::new("pack-a");

        for i in 0..4u64 {
            pool.acquire(&packs, &file, i * 4096, 10).unwrap();
        }
        assert_eq!(pool.current_usage().count, 4);

        pool.set_max_window_count(2).unwrap();
        assert_eq!(pool.current_usage(), WindowUsage { count: 2, bytes: 8192 });
        assert_eq!(pool.max_window_count(), Some(2));

        pool.acquire(&packs, &file, 40960, 10).unwrap();
        assert_eq!(pool.current_usage().count, 2);

        assert!(matches!(pool.set_max_window_count(0), Err(Error::InvalidArgument(_))));
        pool.clear_max_window_count();
        assert_eq!(pool.max_window_count(), None);
    }

    #[test]
    fn test_window_size_rounding() {
        let pool = WindowPool::default();
        assert_eq!(pool.window_size(), DEFAULT_WINDOW_SIZE);

        pool.set_window_size(200 * 1024).unwrap();
        assert_eq!(pool.window_size(), 200 * 1024);
        pool.set_window_size(5000).unwrap();
        assert_eq!(pool.window_size(), 8192);
        assert!(matches!(pool.set_window_size(0), Err(Error::InvalidArgument(_))));
        assert_eq!(pool.window_size(), 8192);
    }

    #[test]
    fn test_bad_spans() {
        let (packs, pool, file) = build_pool();

        assert!(matches!(pool.acquire(&packs, &file, 0, 0), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            pool.acquire(&packs, &file, 64 * 1024 - 5, 10),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(pool.acquire(&packs, &file, 0, 9000), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            pool.acquire(&packs, &FileId::new("missing"), 0, 1),
            Err(Error::Io(_))
        ));
        assert_eq!(pool.current_usage(), WindowUsage::default());
    }

    #[test]
    fn test_window_clamped_to_file_end() {
        let (packs, pool, file) = build_pool();
        pool.set_window_size(1 << 20).unwrap();

        let h = pool.acquire(&packs, &file, 60000, 100).unwrap();
        assert_eq!(h.window_offset() + h.window_len(), 64 * 1024);
        assert!(h.window_len() <= 8192);
        assert_eq!(h.bytes(), &pattern(64 * 1024)[60000..60100]);
    }

    #[test]
    fn test_close_file() {
        let (mut packs, pool, file) = build_pool();
        packs.insert("pack-b", pattern(4096));
        let other = FileId::new("pack-b");

        let held = pool.acquire(&packs, &file, 0, 10).unwrap();
        pool.acquire(&packs, &other, 0, 10).unwrap();

        assert_eq!(pool.close_file(&other), 0);
        assert_eq!(pool.close_file(&file), 1);
        assert_eq!(pool.current_usage().count, 1);
        drop(held);
        assert_eq!(pool.close_file(&file), 0);
        assert_eq!(pool.current_usage(), WindowUsage::default());
    }

    #[test]
    fn test_concurrent_acquire() {
        let mut packs = MemoryPacks::default();
        packs.insert("pack-a", pattern(256 * 1024));
        let packs = Arc::new(packs);
        let pool = Arc::new(WindowPool::new(8192, 64 * 1024, Some(6)));
        let expected = Arc::new(pattern(256 * 1024));

        let threads = (0..8u64)
            .map(|t| {
                let packs = packs.clone();
                let pool = pool.clone();
                let expected = expected.clone();
                std::thread::spawn(move || {
                    let file = FileId::new("pack-a");
                    for i in 0..500u64 {
                        let offset = (i * 7919 + t * 104729) % (256 * 1024 - 64);
                        // Few enough concurrent holders that a window can always be freed.
                        match pool.acquire(&*packs, &file, offset, 64) {
                            Ok(h) => {
                                assert_eq!(h.bytes(), &expected[offset as usize..offset as usize + 64]);
                            }
                            Err(Error::ResourceBusy { .. }) => {}
                            Err(e) => panic!("Unexpected error {:?}", e),
                        }
                    }
                })
            })
            .collect::<Vec<_>>();

        for t in threads {
            t.join().unwrap();
        }

        let usage = pool.current_usage();
        assert!(usage.bytes <= 64 * 1024);
        assert!(usage.count <= 6);
    }
}
