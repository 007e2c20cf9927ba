//! [Settings] is the one place the caches are tuned from.
//!
//! It owns the object cache, the window pool and the configuration search paths.  There are two ways in: the methods
//! here, one per tunable, and the selector-based [Settings::option] in [crate::options].  Both read and write the same
//! state, so a change made one way is immediately visible the other way.
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::*;

pub struct Settings {
    cache: Arc<ObjectCache>,
    windows: Arc<WindowPool>,
    search_paths: RwLock<SearchPaths>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings::new(TuningConfig::default())
    }
}

impl Settings {
    /// Build the caches from `config`, with search paths defaulted from the environment.
    pub fn new(config: TuningConfig) -> Settings {
        Settings::with_search_paths(config, SearchPaths::from_env())
    }

    pub fn with_search_paths(config: TuningConfig, search_paths: SearchPaths) -> Settings {
        debug!(?config, "initializing cache settings");
        Settings {
            cache: Arc::new(config.build_object_cache()),
            windows: Arc::new(config.build_window_pool()),
            search_paths: RwLock::new(search_paths),
        }
    }

    pub fn object_cache(&self) -> &Arc<ObjectCache> {
        &self.cache
    }

    pub fn window_pool(&self) -> &Arc<WindowPool> {
        &self.windows
    }

    pub fn mwindow_size(&self) -> u64 {
        self.windows.window_size()
    }

    pub fn set_mwindow_size(&self, bytes: u64) -> Result<()> {
        self.windows.set_window_size(bytes)
    }

    pub fn mwindow_mapped_limit(&self) -> u64 {
        self.windows.mapped_limit()
    }

    pub fn set_mwindow_mapped_limit(&self, bytes: u64) -> Result<()> {
        self.windows.set_mapped_limit(bytes)
    }

    /// Maximum number of mapped windows; `None` when unbounded.
    pub fn mwindow_file_limit(&self) -> Option<usize> {
        self.windows.max_window_count()
    }

    pub fn set_mwindow_file_limit(&self, count: usize) -> Result<()> {
        self.windows.set_max_window_count(count)
    }

    /// Set the largest single object of `kind` which will be cached.
    pub fn cache_object_limit(&self, kind: ObjectKind, bytes: u64) {
        self.cache.set_type_limit(kind, bytes);
    }

    pub fn object_limit(&self, kind: ObjectKind) -> u64 {
        self.cache.type_limit(kind)
    }

    pub fn cache_max_size(&self, bytes: u64) -> Result<()> {
        self.cache.set_byte_limit(bytes)
    }

    pub fn enable_caching(&self, enabled: bool) {
        self.cache.enable(enabled);
    }

    pub fn caching_enabled(&self) -> bool {
        self.cache.is_enabled()
    }

    /// `(current, max)` bytes of the object cache.
    pub fn cached_memory(&self) -> (u64, u64) {
        (self.cache.current_usage().bytes, self.cache.byte_limit())
    }

    pub fn search_path(&self) -> SearchPathAccessor<'_> {
        SearchPathAccessor {
            paths: &self.search_paths,
        }
    }
}

/// Indexed access to the search path of each [ConfigLevel].
pub struct SearchPathAccessor<'a> {
    paths: &'a RwLock<SearchPaths>,
}

impl<'a> SearchPathAccessor<'a> {
    pub fn get(&self, level: ConfigLevel) -> Option<String> {
        self.paths.read().get(level).map(str::to_string)
    }

    /// Set a level's search path; `None` restores its default.
    pub fn set(&self, level: ConfigLevel, path: Option<&str>) -> Result<()> {
        self.paths.write().set(level, path)
    }

    pub fn candidates(&self, level: ConfigLevel, file_name: &str) -> Vec<std::path::PathBuf> {
        self.paths.read().candidates(level, file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::build_settings;

    /// Set, check, then restore, the way a caller sharing the process-wide settings would.
    fn round_trip<T: PartialEq + std::fmt::Debug + Copy>(
        get: impl Fn() -> T,
        set: impl Fn(T),
        value: T,
    ) {
        let old = get();
        set(value);
        assert_eq!(get(), value);
        set(old);
        assert_eq!(get(), old);
    }

    #[test]
    fn test_mwindow_settings() {
        let settings = build_settings();

        round_trip(
            || settings.mwindow_size(),
            |v| settings.set_mwindow_size(v).unwrap(),
            300 * 1024,
        );
        round_trip(
            || settings.mwindow_mapped_limit(),
            |v| settings.set_mwindow_mapped_limit(v).unwrap(),
            300 * 1024,
        );

        assert_eq!(settings.mwindow_file_limit(), None);
        settings.set_mwindow_file_limit(128).unwrap();
        assert_eq!(settings.mwindow_file_limit(), Some(128));
        assert_eq!(settings.window_pool().max_window_count(), Some(128));

        assert!(matches!(settings.set_mwindow_size(0), Err(Error::InvalidArgument(_))));
        assert!(matches!(settings.set_mwindow_mapped_limit(0), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_cache_settings() {
        let settings = build_settings();

        assert_eq!(settings.cached_memory(), (0, 256 * 1024 * 1024));
        settings.cache_max_size(128 * 1024 * 1024).unwrap();
        assert_eq!(settings.cached_memory().1, 128 * 1024 * 1024);
        settings.cache_max_size(256 * 1024 * 1024).unwrap();
        assert_eq!(settings.cached_memory().1, 256 * 1024 * 1024);

        settings.cache_object_limit(ObjectKind::Blob, 4 * 1024);
        assert_eq!(settings.object_limit(ObjectKind::Blob), 4 * 1024);

        let oid = Oid::from_bytes([1; OID_LEN]);
        settings.object_cache().put(oid, ObjectKind::Blob, vec![0; 1000]).unwrap();
        assert_eq!(settings.cached_memory().0, 1000);

        settings.enable_caching(false);
        assert!(!settings.caching_enabled());
        settings.enable_caching(true);
        assert!(settings.caching_enabled());
        assert_eq!(settings.cached_memory().0, 0);
    }

    #[test]
    fn test_search_path_accessor() {
        let settings = build_settings();
        let paths = [
            (ConfigLevel::Global, "/tmp2/global"),
            (ConfigLevel::Xdg, "/tmp2/xdg"),
            (ConfigLevel::System, "/tmp2/etc"),
        ];

        for (level, path) in paths.iter() {
            settings.search_path().set(*level, Some(*path)).unwrap();
            assert_eq!(settings.search_path().get(*level).as_deref(), Some(*path));
        }

        settings.search_path().set(ConfigLevel::Global, None).unwrap();
        assert_eq!(settings.search_path().get(ConfigLevel::Global).as_deref(), Some("/home/u"));
        assert_eq!(
            settings.search_path().candidates(ConfigLevel::System, "gitconfig"),
            vec![std::path::PathBuf::from("/tmp2/etc/gitconfig")]
        );
    }
}
