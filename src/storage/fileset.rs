use std::fs;
use std::path::{Path, PathBuf};

/// Every file of one on-disk index, keyed by canonical extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFile {
    Header,
    Attrs,
    Doclist,
    Hitlist,
    Skiplist,
    Dict,
    Mva,
    Strings,
    KillList,
    Lock,
    MvaLog,
}

impl IndexFile {
    pub const ALL: [IndexFile; 11] = [
        IndexFile::Header,
        IndexFile::Attrs,
        IndexFile::Doclist,
        IndexFile::Hitlist,
        IndexFile::Skiplist,
        IndexFile::Dict,
        IndexFile::Mva,
        IndexFile::Strings,
        IndexFile::KillList,
        IndexFile::Lock,
        IndexFile::MvaLog,
    ];

    pub fn ext(&self) -> &'static str {
        match self {
            IndexFile::Header => ".sph",
            IndexFile::Attrs => ".spa",
            IndexFile::Doclist => ".spd",
            IndexFile::Hitlist => ".spp",
            IndexFile::Skiplist => ".spe",
            IndexFile::Dict => ".spi",
            IndexFile::Mva => ".spm",
            IndexFile::Strings => ".sps",
            IndexFile::KillList => ".spk",
            IndexFile::Lock => ".spl",
            IndexFile::MvaLog => ".mvp",
        }
    }
}

/// Path bookkeeping for one index: canonical names, tmp names, the
/// three-rename juggle and its startup recovery.
#[derive(Debug, Clone)]
pub struct FileSet {
    /// Index path prefix; extensions are appended to it.
    pub base: PathBuf,
}

impl FileSet {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        FileSet { base: base.into() }
    }

    pub fn path(&self, file: IndexFile) -> PathBuf {
        self.with_suffix(file.ext())
    }

    pub fn tmp_new(&self, file: IndexFile) -> PathBuf {
        self.with_suffix(&format!("{}.tmpnew", file.ext()))
    }

    pub fn tmp_old(&self, file: IndexFile) -> PathBuf {
        self.with_suffix(&format!("{}.tmpold", file.ext()))
    }

    /// Scratch name used while a fresh build is in flight.
    pub fn tmp_build(&self, file: IndexFile) -> PathBuf {
        self.with_suffix(&format!("{}.tmp", file.ext()))
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut raw = self.base.as_os_str().to_os_string();
        raw.push(suffix);
        PathBuf::from(raw)
    }

    /// Replace the canonical file with its `.tmpnew` sibling:
    /// `x -> x.tmpold; x.tmpnew -> x; unlink x.tmpold`, rolling the old
    /// file back if the promotion fails.
    pub fn juggle(&self, file: IndexFile) -> std::io::Result<()> {
        let canonical = self.path(file);
        let tmp_new = self.tmp_new(file);
        let tmp_old = self.tmp_old(file);

        let had_old = canonical.exists();
        if had_old {
            fs::rename(&canonical, &tmp_old)?;
        }
        if let Err(err) = fs::rename(&tmp_new, &canonical) {
            if had_old {
                // Promotion failed, put the previous generation back
                let _ = fs::rename(&tmp_old, &canonical);
            }
            return Err(err);
        }
        if had_old {
            let _ = fs::remove_file(&tmp_old);
        }
        log::debug!("juggled {}", canonical.display());
        Ok(())
    }

    /// Startup recovery: a crash between the two renames leaves
    /// `.tmpold` without a canonical file; promote it back.
    pub fn recover(&self) -> std::io::Result<()> {
        for file in IndexFile::ALL {
            let canonical = self.path(file);
            let tmp_old = self.tmp_old(file);
            if tmp_old.exists() && !canonical.exists() {
                fs::rename(&tmp_old, &canonical)?;
                log::warn!("recovered {} from interrupted juggle", canonical.display());
            }
        }
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.path(IndexFile::Header).exists()
    }
}

/// Unlinks the registered files on drop unless disarmed; the build and
/// merge paths lean on it so a failure leaves no partial output behind.
pub struct TempGuard {
    paths: Vec<PathBuf>,
    armed: bool,
}

impl TempGuard {
    pub fn new() -> Self {
        TempGuard { paths: Vec::new(), armed: true }
    }

    pub fn protect(&mut self, path: impl AsRef<Path>) {
        self.paths.push(path.as_ref().to_path_buf());
    }

    /// The operation succeeded; keep the files.
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Default for TempGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if self.armed {
            for path in &self.paths {
                let _ = fs::remove_file(path);
            }
        }
    }
}
