use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};

use crate::core::error::Result;

/// Whole-file read-only map. Attribute files may additionally be pinned
/// with mlock; when pinning is unavailable the pages are walked once to
/// force population.
pub struct MmapFile {
    pub path: PathBuf,
    mmap: Option<Mmap>,
    len: usize,
    locked: bool,
}

const TOUCH_STRIDE: usize = 2048;

impl MmapFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len() as usize;
        // Zero-length maps are refused by some platforms
        let mmap = if len > 0 {
            Some(unsafe { MmapOptions::new().len(len).map(&file)? })
        } else {
            None
        };
        Ok(MmapFile { path, mmap, len, locked: false })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn data(&self) -> &[u8] {
        match &self.mmap {
            Some(mmap) => &mmap[..],
            None => &[],
        }
    }

    /// Pin the map into RAM. Returns false (and leaves the map unpinned)
    /// if the system refuses.
    pub fn try_lock(&mut self) -> bool {
        let Some(mmap) = &self.mmap else { return true };
        let ok = unsafe { libc::mlock(mmap.as_ptr() as *const libc::c_void, self.len) == 0 };
        self.locked = ok;
        ok
    }

    /// Touch one byte per page plus the last byte so a cold map gets
    /// populated even without mlock. The xor keeps the loads observable.
    pub fn touch_pages(&self) -> u8 {
        let data = self.data();
        if data.is_empty() {
            return 0;
        }
        let mut acc = 0u8;
        let mut offset = 0;
        while offset < data.len() {
            acc ^= data[offset];
            offset += TOUCH_STRIDE;
        }
        acc ^= data[data.len() - 1];
        std::hint::black_box(acc)
    }
}

impl Drop for MmapFile {
    fn drop(&mut self) {
        if self.locked {
            if let Some(mmap) = &self.mmap {
                unsafe {
                    libc::munlock(mmap.as_ptr() as *const libc::c_void, self.len);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapped.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let map = MmapFile::open(&path).unwrap();
        assert_eq!(map.len(), 10);
        assert_eq!(map.data(), b"0123456789");
        map.touch_pages();
    }

    #[test]
    fn test_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        std::fs::write(&path, b"").unwrap();

        let map = MmapFile::open(&path).unwrap();
        assert!(map.is_empty());
        assert_eq!(map.data(), b"");
        assert_eq!(map.touch_pages(), 0);
    }
}
