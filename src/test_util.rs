//! Helpers shared by the unit tests.
use std::collections::HashMap;
use std::io::{Error as IoError, ErrorKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::*;

/// A pack source over in-memory buffers which counts the spans it hands out.
#[derive(Default)]
pub(crate) struct MemoryPacks {
    files: HashMap<FileId, Arc<Vec<u8>>>,
    pub(crate) reads: AtomicU64,
}

pub(crate) struct MemoryRegion {
    data: Arc<Vec<u8>>,
    start: usize,
    end: usize,
}

impl AsRef<[u8]> for MemoryRegion {
    fn as_ref(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }
}

impl MemoryPacks {
    pub(crate) fn insert(&mut self, file: &str, data: Vec<u8>) {
        self.files.insert(FileId::new(file), Arc::new(data));
    }
}

impl PackSource for MemoryPacks {
    type Region = MemoryRegion;

    fn file_len(&self, file: &FileId) -> Result<u64, IoError> {
        self.files
            .get(file)
            .map(|d| d.len() as u64)
            .ok_or_else(|| IoError::new(ErrorKind::NotFound, "no such pack"))
    }

    fn read_span(&self, file: &FileId, offset: u64, length: u64) -> Result<MemoryRegion, IoError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let data = self
            .files
            .get(file)
            .ok_or_else(|| IoError::new(ErrorKind::NotFound, "no such pack"))?;
        Ok(MemoryRegion {
            data: data.clone(),
            start: offset as usize,
            end: (offset + length) as usize,
        })
    }
}

pub(crate) fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub(crate) fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) fn build_settings() -> Settings {
    init_logging();
    Settings::with_search_paths(
        TuningConfig::default(),
        SearchPaths::with_defaults(Some("/etc".into()), None, Some("/home/u".into()), None),
    )
}
