//! Initial budgets for the caches a [crate::Settings] owns.
//!
//! Everything defaults to the library defaults, so a builder only needs the fields that differ:
//!
//! ```
//! let config = odb_lru::TuningConfigBuilder::default()
//!     .cache_max_size(64 * 1024 * 1024)
//!     .build()
//!     .expect("Should build");
//! assert_eq!(config.cache_max_size, 64 * 1024 * 1024);
//! ```
use crate::*;

#[derive(Clone, Debug, derive_builder::Builder)]
pub struct TuningConfig {
    /// Span of newly mapped windows.
    #[builder(default = "DEFAULT_WINDOW_SIZE")]
    pub window_size: u64,
    /// Maximum bytes mapped at once.
    #[builder(default = "DEFAULT_MAPPED_LIMIT")]
    pub mapped_limit: u64,
    /// Maximum number of mapped windows, if any.
    #[builder(default)]
    pub max_windows: Option<usize>,
    /// Byte budget of the object cache.
    #[builder(default = "DEFAULT_CACHE_MAX_SIZE")]
    pub cache_max_size: u64,
    #[builder(default = "true")]
    pub caching_enabled: bool,
    /// Per-kind ceilings which differ from [ObjectKind::default_limit].
    #[builder(default)]
    pub object_limits: Vec<(ObjectKind, u64)>,
}

impl Default for TuningConfig {
    fn default() -> Self {
        TuningConfig {
            window_size: DEFAULT_WINDOW_SIZE,
            mapped_limit: DEFAULT_MAPPED_LIMIT,
            max_windows: None,
            cache_max_size: DEFAULT_CACHE_MAX_SIZE,
            caching_enabled: true,
            object_limits: vec![],
        }
    }
}

impl TuningConfig {
    pub fn build_window_pool(&self) -> WindowPool {
        WindowPool::new(self.window_size, self.mapped_limit, self.max_windows)
    }

    pub fn build_object_cache(&self) -> ObjectCache {
        let cache = ObjectCache::new(self.cache_max_size, self.caching_enabled);
        for (kind, limit) in &self.object_limits {
            cache.set_type_limit(*kind, *limit);
        }
        cache
    }
}
