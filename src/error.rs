//! Errors reported by the caches and the settings surface.
use crate::ObjectKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configuration level selector doesn't name a level with a search path.
    #[error("invalid configuration level {0}")]
    InvalidLevel(i64),

    /// A single object is bigger than the cache is willing to hold for its kind.
    #[error("{kind:?} object of {size} bytes exceeds the limit of {limit} bytes")]
    EntryTooLarge {
        kind: ObjectKind,
        size: u64,
        limit: u64,
    },

    /// A budget couldn't be met because every remaining candidate is in use.
    ///
    /// Callers may retry after releasing their references.
    #[error("budget of {limit} bytes / {count_limit:?} windows can't be met: {pinned} windows are in use")]
    ResourceBusy {
        limit: u64,
        count_limit: Option<usize>,
        pinned: usize,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("pack source: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from [crate::ObjectReader], which may also fail inside the user's decoder.
#[derive(Debug, thiserror::Error)]
pub enum ReadError<DecoderError> {
    #[error(transparent)]
    Cache(#[from] Error),
    #[error("decoding failed: {0}")]
    Decoder(DecoderError),
}
