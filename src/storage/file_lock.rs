use std::fs::{File, OpenOptions};

use crate::core::error::{Error, ErrorKind, Result};
use crate::storage::fileset::{FileSet, IndexFile};

/// Exclusive `.spl` lock serializing writers on one index. Taking it is
/// always non-blocking: a busy index is an error, not a wait.
pub struct IndexLock {
    pub file: File,
}

impl IndexLock {
    pub fn acquire(files: &FileSet) -> Result<Self> {
        let lock_path = files.path(IndexFile::Lock);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            use libc::{flock, LOCK_EX, LOCK_NB};

            let fd = file.as_raw_fd();
            unsafe {
                if flock(fd, LOCK_EX | LOCK_NB) != 0 {
                    return Err(Error {
                        kind: ErrorKind::Io,
                        context: format!("index '{}' is locked by another writer", files.base.display()),
                    });
                }
            }
        }

        Ok(IndexLock { file })
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            use libc::{flock, LOCK_UN};

            let fd = self.file.as_raw_fd();
            unsafe {
                flock(fd, LOCK_UN);
            }
        }
    }
}
