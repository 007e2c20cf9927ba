use std::convert::TryFrom;
use std::fs::File;
use std::io::{Error, ErrorKind, Result};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};

use crate::{FileId, PackSource};

/// A [PackSource] which memory-maps pack files under a given root directory.
///
/// File ids are paths relative to the root, like `pack/pack-1234.pack` (behavior with `\` is undefined).  This makes a
/// best effort to disallow ids which use relative components to escape the root directory, primarily as a measure to
/// detect bugs.
#[derive(Debug)]
pub struct FilesystemPacks {
    root_path: PathBuf,
}

fn conv_path(path: impl AsRef<Path>) -> Result<relative_path::RelativePathBuf> {
    relative_path::RelativePathBuf::from_path(path).map_err(|_| Error::new(ErrorKind::Other, "Invalid path"))
}

impl FilesystemPacks {
    pub fn new(root_path: &Path) -> FilesystemPacks {
        FilesystemPacks {
            root_path: root_path.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_path
    }

    /// Resolve a file id to a path under the root.
    pub fn resolve(&self, file: &FileId) -> Result<PathBuf> {
        // Go via `RelativePathBuf` to normalize away `..` segments before checking the prefix; canonicalize would
        // require the file to exist and is broken on Windows for relative segments in the middle of a path.
        let absolute = conv_path(file.as_str())?.to_logical_path(&self.root_path);
        if !absolute.starts_with(&self.root_path) {
            return Err(Error::new(ErrorKind::Other, "path is outside the pack root directory"));
        }
        Ok(absolute)
    }

    fn open(&self, file: &FileId) -> Result<File> {
        File::open(self.resolve(file)?)
    }
}

impl PackSource for FilesystemPacks {
    type Region = Mmap;

    fn file_len(&self, file: &FileId) -> Result<u64> {
        Ok(self.open(file)?.metadata()?.len())
    }

    fn read_span(&self, file: &FileId, offset: u64, length: u64) -> Result<Mmap> {
        let handle = self.open(file)?;
        let len = usize::try_from(length).map_err(|_| Error::new(ErrorKind::InvalidInput, "span too large to map"))?;
        // SAFETY: the mapping is read-only and pack files are never rewritten in place; a pack is replaced by writing
        // a new file and renaming it over the old one, which leaves existing mappings pointing at the old inode.
        unsafe { MmapOptions::new().offset(offset).len(len).map(&handle) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_util::pattern;
    use crate::WindowPool;

    #[test]
    fn test_filesystem_packs() {
        let tmp_dir = tempfile::tempdir().unwrap();

        // Create a directory under the temporary directory so that we can test relative paths.
        let mut root = tmp_dir.path().to_path_buf();
        root.push("objects");
        std::fs::create_dir(&root).unwrap();
        std::fs::create_dir(root.join("pack")).unwrap();
        std::fs::write(root.join("pack").join("a.pack"), pattern(3 * 4096)).unwrap();
        // Now, we want to write something outside the root.
        std::fs::write(root.parent().unwrap().join("b.pack"), pattern(4096)).unwrap();

        let packs = FilesystemPacks::new(&root);
        let pool = WindowPool::new(4096, 8192, None);
        let file = FileId::new("pack/a.pack");

        assert_eq!(packs.file_len(&file).unwrap(), 3 * 4096);
        let h = pool.acquire(&packs, &file, 5000, 100).unwrap();
        assert_eq!(h.bytes(), &pattern(3 * 4096)[5000..5100]);
        assert_eq!(h.window_offset(), 4096);
        drop(h);

        // Unaligned spans map too.
        let region = packs.read_span(&file, 10, 20).unwrap();
        assert_eq!(&region[..], &pattern(30)[10..30]);

        // b should return a specific error.
        match pool.acquire(&packs, &FileId::new("../b.pack"), 0, 10) {
            Err(crate::Error::Io(e)) => assert_eq!(e.kind(), ErrorKind::Other),
            x => panic!("Should error when mapping files outside the pack root: {:?}", x),
        }
    }
}
