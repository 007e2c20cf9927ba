//! Search paths for the configuration levels which are looked up on the filesystem.
//!
//! The caches never read configuration files.  They only keep, per level, the list of directories an external config
//! parser should look in, joined with the platform's path list separator.
use std::convert::TryFrom;
use std::path::PathBuf;

use relative_path::RelativePath;
use tracing::debug;

use crate::*;

#[cfg(windows)]
pub const PATH_LIST_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const PATH_LIST_SEPARATOR: char = ':';

/// Replaced with the level's previous value when setting a search path.
pub const PATH_MAGIC: &str = "$PATH";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfigLevel {
    System = 2,
    Xdg = 3,
    Global = 4,
    Local = 5,
}

impl ConfigLevel {
    pub const ALL: [ConfigLevel; 4] = [
        ConfigLevel::System,
        ConfigLevel::Xdg,
        ConfigLevel::Global,
        ConfigLevel::Local,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    fn slot(self) -> usize {
        match self {
            ConfigLevel::System => 0,
            ConfigLevel::Xdg => 1,
            ConfigLevel::Global => 2,
            ConfigLevel::Local => 3,
        }
    }
}

impl TryFrom<i32> for ConfigLevel {
    type Error = Error;

    fn try_from(code: i32) -> Result<ConfigLevel> {
        ConfigLevel::ALL
            .iter()
            .copied()
            .find(|l| l.code() == code)
            .ok_or(Error::InvalidLevel(code.into()))
    }
}

/// The per-level search paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchPaths {
    paths: [Option<String>; 4],
    defaults: [Option<String>; 4],
}

impl Default for SearchPaths {
    fn default() -> Self {
        SearchPaths::from_env()
    }
}

impl SearchPaths {
    /// Defaults derived from `HOME` and `XDG_CONFIG_HOME`.
    pub fn from_env() -> SearchPaths {
        let home = std::env::var("HOME").ok().filter(|h| !h.is_empty());
        let xdg = std::env::var("XDG_CONFIG_HOME")
            .ok()
            .filter(|x| !x.is_empty())
            .map(|x| format!("{}/git", x))
            .or_else(|| home.as_ref().map(|h| format!("{}/.config/git", h)));
        SearchPaths::with_defaults(Some("/etc".to_string()), xdg, home, None)
    }

    pub fn with_defaults(
        system: Option<String>,
        xdg: Option<String>,
        global: Option<String>,
        local: Option<String>,
    ) -> SearchPaths {
        let defaults = [system, xdg, global, local];
        SearchPaths {
            paths: defaults.clone(),
            defaults,
        }
    }

    pub fn get(&self, level: ConfigLevel) -> Option<&str> {
        self.paths[level.slot()].as_deref()
    }

    /// Set the search path of a level, or reset it to its default with `None`.
    ///
    /// Any `$PATH` in the new value is replaced with the previous value, so that directories can be prepended or
    /// appended.
    pub fn set(&mut self, level: ConfigLevel, path: Option<&str>) -> Result<()> {
        let slot = level.slot();
        let new = match path {
            None => self.defaults[slot].clone(),
            Some("") => return Err(Error::InvalidArgument("search path must not be empty")),
            Some(p) if p.contains(PATH_MAGIC) => {
                let previous = self.paths[slot].as_deref().unwrap_or("");
                let expanded = p.replace(PATH_MAGIC, previous);
                // Expanding an unset level can leave stray separators behind.
                let sep = PATH_LIST_SEPARATOR.to_string();
                let cleaned = expanded
                    .split(PATH_LIST_SEPARATOR)
                    .filter(|d| !d.is_empty())
                    .collect::<Vec<_>>()
                    .join(sep.as_str());
                if cleaned.is_empty() {
                    None
                } else {
                    Some(cleaned)
                }
            }
            Some(p) => Some(p.to_string()),
        };

        debug!(?level, path = ?new, "set config search path");
        self.paths[slot] = new;
        Ok(())
    }

    /// Where the config parser should look for `file_name` at this level, in order.
    pub fn candidates(&self, level: ConfigLevel, file_name: &str) -> Vec<PathBuf> {
        let file = RelativePath::new(file_name);
        self.get(level)
            .map(|p| {
                p.split(PATH_LIST_SEPARATOR)
                    .filter(|d| !d.is_empty())
                    .map(|d| file.to_logical_path(d))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn build_paths() -> SearchPaths {
        SearchPaths::with_defaults(
            Some("/etc".into()),
            Some("/home/u/.config/git".into()),
            Some("/home/u".into()),
            None,
        )
    }

    #[test]
    fn test_set_and_get() {
        let mut paths = build_paths();
        for (level, path) in &[
            (ConfigLevel::Global, "/tmp/global"),
            (ConfigLevel::Xdg, "/tmp/xdg"),
            (ConfigLevel::System, "/tmp/etc"),
            (ConfigLevel::Local, "/tmp/local"),
        ] {
            paths.set(*level, Some(*path)).unwrap();
            assert_eq!(paths.get(*level), Some(*path));
        }
    }

    #[test]
    fn test_reset_and_empty() {
        let mut paths = build_paths();
        paths.set(ConfigLevel::Global, Some("/tmp/global")).unwrap();
        paths.set(ConfigLevel::Global, None).unwrap();
        assert_eq!(paths.get(ConfigLevel::Global), Some("/home/u"));
        assert_eq!(paths.get(ConfigLevel::Local), None);

        assert!(matches!(
            paths.set(ConfigLevel::Global, Some("")),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(paths.get(ConfigLevel::Global), Some("/home/u"));
    }

    #[test]
    fn test_path_magic() {
        let mut paths = build_paths();
        let sep = PATH_LIST_SEPARATOR;

        paths.set(ConfigLevel::System, Some(format!("/opt/etc{}$PATH", sep).as_str())).unwrap();
        assert_eq!(paths.get(ConfigLevel::System), Some(&*format!("/opt/etc{}/etc", sep)));

        paths.set(ConfigLevel::Local, Some(format!("$PATH{}/repo", sep).as_str())).unwrap();
        assert_eq!(paths.get(ConfigLevel::Local), Some("/repo"));
    }

    #[test]
    fn test_candidates() {
        let mut paths = build_paths();
        paths
            .set(ConfigLevel::System, Some(format!("/a{}/b", PATH_LIST_SEPARATOR).as_str()))
            .unwrap();
        assert_eq!(
            paths.candidates(ConfigLevel::System, "gitconfig"),
            vec![Path::new("/a/gitconfig").to_path_buf(), Path::new("/b/gitconfig").to_path_buf()]
        );
        assert!(paths.candidates(ConfigLevel::Local, "config").is_empty());
    }

    #[test]
    fn test_level_codes() {
        assert_eq!(ConfigLevel::try_from(4).unwrap(), ConfigLevel::Global);
        assert_eq!(ConfigLevel::try_from(2).unwrap(), ConfigLevel::System);
        assert!(matches!(ConfigLevel::try_from(1), Err(Error::InvalidLevel(1))));
        assert!(matches!(ConfigLevel::try_from(6), Err(Error::InvalidLevel(6))));
    }
}
