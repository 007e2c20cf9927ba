//! Selector-style access to [Settings]: one entry point, a [GitOption] naming the tunable, and loosely typed arguments.
//!
//! Integer arguments are signed so that callers passing values through from elsewhere get [Error::InvalidArgument]
//! for negative sizes rather than a wrapped-around budget.
use std::convert::TryFrom;

use crate::*;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GitOption {
    GetMwindowSize,
    SetMwindowSize,
    GetMwindowMappedLimit,
    SetMwindowMappedLimit,
    GetMwindowFileLimit,
    SetMwindowFileLimit,
    GetSearchPath,
    SetSearchPath,
    SetCacheObjectLimit,
    SetCacheMaxSize,
    EnableCaching,
    GetCachedMemory,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OptionArg {
    Int(i64),
    Bool(bool),
    /// `None` resets a search path to its default.
    Str(Option<String>),
}

impl From<i64> for OptionArg {
    fn from(v: i64) -> OptionArg {
        OptionArg::Int(v)
    }
}

impl From<i32> for OptionArg {
    fn from(v: i32) -> OptionArg {
        OptionArg::Int(v.into())
    }
}

impl From<bool> for OptionArg {
    fn from(v: bool) -> OptionArg {
        OptionArg::Bool(v)
    }
}

impl From<&str> for OptionArg {
    fn from(v: &str) -> OptionArg {
        OptionArg::Str(Some(v.to_string()))
    }
}

impl From<Option<&str>> for OptionArg {
    fn from(v: Option<&str>) -> OptionArg {
        OptionArg::Str(v.map(str::to_string))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OptionValue {
    /// Setters return nothing.
    Unit,
    Size(u64),
    Memory { current: u64, max: u64 },
    Path(Option<String>),
}

impl OptionValue {
    pub fn as_size(&self) -> Option<u64> {
        match self {
            OptionValue::Size(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&str> {
        match self {
            OptionValue::Path(x) => x.as_deref(),
            _ => None,
        }
    }

    /// `(current, max)`, as reported by [GitOption::GetCachedMemory].
    pub fn as_memory(&self) -> Option<(u64, u64)> {
        match self {
            OptionValue::Memory { current, max } => Some((*current, *max)),
            _ => None,
        }
    }
}

fn check_arity(args: &[OptionArg], count: usize) -> Result<()> {
    if args.len() != count {
        return Err(Error::InvalidArgument("wrong number of arguments for option"));
    }
    Ok(())
}

fn int_arg(args: &[OptionArg], index: usize) -> Result<i64> {
    match args.get(index) {
        Some(OptionArg::Int(v)) => Ok(*v),
        _ => Err(Error::InvalidArgument("expected an integer argument")),
    }
}

/// A strictly positive integer argument.
fn size_arg(args: &[OptionArg], index: usize) -> Result<u64> {
    u64::try_from(int_arg(args, index)?)
        .ok()
        .filter(|v| *v > 0)
        .ok_or(Error::InvalidArgument("size must be positive"))
}

fn level_arg(args: &[OptionArg], index: usize) -> Result<ConfigLevel> {
    let raw = int_arg(args, index)?;
    let code = i32::try_from(raw).map_err(|_| Error::InvalidLevel(raw))?;
    ConfigLevel::try_from(code)
}

impl Settings {
    /// Get or set a tunable by selector.
    ///
    /// | Selector | Arguments | Result |
    /// |---|---|---|
    /// | `GetMwindowSize`, `GetMwindowMappedLimit` | | `Size` |
    /// | `GetMwindowFileLimit` | | `Size`, 0 when unbounded |
    /// | `SetMwindowSize`, `SetMwindowMappedLimit`, `SetMwindowFileLimit`, `SetCacheMaxSize` | positive `Int` | `Unit` |
    /// | `SetCacheObjectLimit` | `Int` kind, non-negative `Int` bytes | `Unit` |
    /// | `EnableCaching` | `Bool` or `Int` | `Unit` |
    /// | `GetCachedMemory` | | `Memory` |
    /// | `GetSearchPath` | `Int` level | `Path` |
    /// | `SetSearchPath` | `Int` level, `Str` | `Unit` |
    pub fn option(&self, option: GitOption, args: &[OptionArg]) -> Result<OptionValue> {
        use self::GitOption::*;

        match option {
            GetMwindowSize => {
                check_arity(args, 0)?;
                Ok(OptionValue::Size(self.mwindow_size()))
            }
            SetMwindowSize => {
                check_arity(args, 1)?;
                self.set_mwindow_size(size_arg(args, 0)?)?;
                Ok(OptionValue::Unit)
            }
            GetMwindowMappedLimit => {
                check_arity(args, 0)?;
                Ok(OptionValue::Size(self.mwindow_mapped_limit()))
            }
            SetMwindowMappedLimit => {
                check_arity(args, 1)?;
                self.set_mwindow_mapped_limit(size_arg(args, 0)?)?;
                Ok(OptionValue::Unit)
            }
            GetMwindowFileLimit => {
                check_arity(args, 0)?;
                Ok(OptionValue::Size(self.mwindow_file_limit().unwrap_or(0) as u64))
            }
            SetMwindowFileLimit => {
                check_arity(args, 1)?;
                let count = usize::try_from(size_arg(args, 0)?)
                    .map_err(|_| Error::InvalidArgument("window count limit is too large"))?;
                self.set_mwindow_file_limit(count)?;
                Ok(OptionValue::Unit)
            }
            SetCacheObjectLimit => {
                check_arity(args, 2)?;
                let code = i32::try_from(int_arg(args, 0)?).map_err(|_| Error::InvalidArgument("unknown object kind"))?;
                let kind = ObjectKind::try_from(code)?;
                let bytes = u64::try_from(int_arg(args, 1)?)
                    .map_err(|_| Error::InvalidArgument("object limit must not be negative"))?;
                self.cache_object_limit(kind, bytes);
                Ok(OptionValue::Unit)
            }
            SetCacheMaxSize => {
                check_arity(args, 1)?;
                self.cache_max_size(size_arg(args, 0)?)?;
                Ok(OptionValue::Unit)
            }
            EnableCaching => {
                check_arity(args, 1)?;
                let enabled = match &args[0] {
                    OptionArg::Bool(b) => *b,
                    OptionArg::Int(i) => *i != 0,
                    OptionArg::Str(_) => return Err(Error::InvalidArgument("expected a boolean argument")),
                };
                self.enable_caching(enabled);
                Ok(OptionValue::Unit)
            }
            GetCachedMemory => {
                check_arity(args, 0)?;
                let (current, max) = self.cached_memory();
                Ok(OptionValue::Memory { current, max })
            }
            GetSearchPath => {
                check_arity(args, 1)?;
                let level = level_arg(args, 0)?;
                Ok(OptionValue::Path(self.search_path().get(level)))
            }
            SetSearchPath => {
                check_arity(args, 2)?;
                let level = level_arg(args, 0)?;
                let path = match &args[1] {
                    OptionArg::Str(p) => p.as_deref(),
                    _ => return Err(Error::InvalidArgument("expected a path argument")),
                };
                self.search_path().set(level, path)?;
                Ok(OptionValue::Unit)
            }
        }
    }
}
