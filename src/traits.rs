//! The [PackSource] trait is responsible for turning spans of pack files into mapped regions.
//!
//! The window pool keeps the regions a [PackSource] returns around for as long as its budget allows, then the
//! [Decoder] is used on the raw bytes of an object to get the inflated representation the object cache stores.
use std::io::Error;

use crate::{FileId, ObjectKind};

/// Materialize spans of pack files.
pub trait PackSource: Send + Sync {
    /// A mapped (or read) view of a span.  Unmapping should happen in the region's drop implementation.
    type Region: AsRef<[u8]> + Send + Sync + 'static;

    /// Length of the file in bytes, used to clamp windows at the end of the file.
    fn file_len(&self, file: &FileId) -> Result<u64, Error>;

    /// Map `length` bytes starting at `offset`.  The window pool only asks for spans inside the file.
    fn read_span(&self, file: &FileId, offset: u64, length: u64) -> Result<Self::Region, Error>;
}

/// A `Decoder` knows how to get from the raw bytes of an object in a pack to its inflated representation.
pub trait Decoder {
    type Error: std::error::Error;

    fn decode(&self, raw: &[u8], kind: ObjectKind) -> Result<Vec<u8>, Self::Error>;
}
