use std::sync::Arc;
use std::sync::atomic::AtomicU32;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use crate::attr::mva::MvaArena;
use crate::core::config::{DocinfoKind, ThrottleConfig};
use crate::core::error::{Error, Result};
use crate::core::types::{DocId, WordId};
use crate::dict::dictionary::{hash_word, DictSettings};
use crate::io::throttle::IoStats;
use crate::mmap::mmap_file::MmapFile;
use crate::schema::schema::RowAccess;
use crate::search::filter::RowPools;
use crate::search::qword::PostingReader;
use crate::search::wordlist::{Wordlist, WordlistEntry};
use crate::storage::fileset::{FileSet, IndexFile};
use crate::storage::header::{DictFlavor, IndexHeader};
use crate::storage::kill_list::KillList;

/// attrs_status bits consulted by save_attributes.
pub const STATUS_ATTRS_UPDATED: u32 = 1;
pub const STATUS_MVA_UPDATED: u32 = 2;
pub const STATUS_STRINGS_UPDATED: u32 = 4;

const DOCINFO_HASH_BITS: u32 = 18;

/// Two-stage row lookup: a fixed bucket table over shifted doc ids,
/// then a bounded binary search inside the bucket's row span.
pub struct DocinfoHash {
    shift: u32,
    min_doc_id: u64,
    max_doc_id: u64,
    buckets: Vec<u32>,
}

impl DocinfoHash {
    pub fn build(rows: &[u32], row_width: usize) -> Self {
        let row_count = if row_width == 0 { 0 } else { rows.len() / row_width };
        if row_count == 0 {
            return DocinfoHash { shift: 0, min_doc_id: 1, max_doc_id: 0, buckets: Vec::new() };
        }
        let min_doc_id = RowAccess::doc_id(&rows[..row_width]).0;
        let max_doc_id = RowAccess::doc_id(&rows[(row_count - 1) * row_width..]).0;

        let mut shift = 0u32;
        while shift < 64 && (max_doc_id - min_doc_id) >> shift >= (1 << DOCINFO_HASH_BITS) {
            shift += 1;
        }

        let bucket_count = (((max_doc_id - min_doc_id) >> shift) + 2) as usize;
        let mut buckets = vec![0u32; bucket_count + 1];
        for row in 0..row_count {
            let doc = RowAccess::doc_id(&rows[row * row_width..(row + 1) * row_width]).0;
            let bucket = ((doc - min_doc_id) >> shift) as usize + 1;
            buckets[bucket] = (row + 1) as u32;
        }
        // Forward-fill: bucket start = end of the previous one
        for i in 1..buckets.len() {
            if buckets[i] < buckets[i - 1] {
                buckets[i] = buckets[i - 1];
            }
        }
        DocinfoHash { shift, min_doc_id, max_doc_id, buckets }
    }

    /// Row index of the doc, if present.
    pub fn lookup(&self, rows: &[u32], row_width: usize, doc_id: DocId) -> Option<usize> {
        if self.buckets.is_empty() || doc_id.0 < self.min_doc_id || doc_id.0 > self.max_doc_id {
            return None;
        }
        let bucket = ((doc_id.0 - self.min_doc_id) >> self.shift) as usize;
        let start = self.buckets[bucket] as usize;
        let end = self.buckets[bucket + 1] as usize;

        let slice = &rows[start * row_width..end * row_width];
        let mut lo = 0usize;
        let mut hi = slice.len() / row_width;
        while lo < hi {
            let mid = (lo + hi) / 2;
            let doc = RowAccess::doc_id(&slice[mid * row_width..(mid + 1) * row_width]);
            match doc.cmp(&doc_id) {
                std::cmp::Ordering::Equal => return Some(start + mid),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        None
    }
}

/// Open-time knobs. Stop-words, word-forms and morphology are not
/// stored in the file set, so a caller that built with them supplies
/// them again here; the fingerprints cross-check the match.
pub struct OpenSettings {
    pub dict_settings: Option<DictSettings>,
    pub mlock: bool,
    pub arena_limit: usize,
    pub throttle: ThrottleConfig,
}

impl Default for OpenSettings {
    fn default() -> Self {
        OpenSettings {
            dict_settings: None,
            mlock: false,
            arena_limit: 16 * 1024 * 1024,
            throttle: ThrottleConfig::default(),
        }
    }
}

/// A preallocated on-disk index: the header, the mapped file family,
/// the in-memory attribute pool and the decoded dictionary. Read
/// paths are pure against this state; attribute updates go through
/// the RwLocks.
pub struct DiskIndex {
    pub files: FileSet,
    pub header: IndexHeader,
    pub stats: Arc<IoStats>,
    pub dict_settings: DictSettings,
    pub arena: MvaArena,
    pub attrs_status: AtomicU32,

    pub(crate) attrs: RwLock<Vec<u32>>,
    pub(crate) strings: RwLock<Vec<u8>>,
    pub(crate) mva_log: Mutex<std::collections::BTreeMap<u64, Vec<(usize, Vec<u64>)>>>,

    doclist: MmapFile,
    hitlist: MmapFile,
    skiplist: Option<MmapFile>,
    dict: MmapFile,
    mva: MmapFile,
    kill: KillList,
    wordlist: Wordlist,
    hash: DocinfoHash,
}

impl DiskIndex {
    pub fn open(base: impl Into<std::path::PathBuf>, settings: OpenSettings) -> Result<Self> {
        let files = FileSet::new(base);
        files.recover()?;

        let stats = Arc::new(IoStats::default());
        let mut header_reader = crate::io::reader::FileReader::open(
            files.path(IndexFile::Header), 64 * 1024, settings.throttle, Arc::clone(&stats))?;
        let header = IndexHeader::load(&mut header_reader)?;

        let dict_settings = match settings.dict_settings {
            Some(mut ds) => {
                if ds.morphology.fingerprint() != header.dict.morph_fingerprint {
                    log::warn!("{}: morphology fingerprint mismatch", files.base.display());
                }
                if ds.stopwords.fingerprint() != header.dict.stopwords_fingerprint {
                    log::warn!("{}: stopwords fingerprint mismatch", files.base.display());
                }
                // Hash width always follows the header
                ds.use_64bit = header.use_64bit;
                ds
            }
            None => DictSettings::plain(header.use_64bit),
        };

        let attrs_raw = std::fs::read(files.path(IndexFile::Attrs))?;
        if attrs_raw.len() % 4 != 0 {
            return Err(Error::corrupt("attribute file size not a multiple of 4"));
        }
        let attrs: Vec<u32> = attrs_raw.chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let row_width = header.schema.row_width() as usize;
        if header.docinfo == DocinfoKind::Extern {
            let expected = header.minmax_words_offset as usize;
            if expected > attrs.len() || expected % row_width != 0 {
                return Err(Error::corrupt("min/max offset outside the attribute file"));
            }
        }

        let strings = std::fs::read(files.path(IndexFile::Strings))?;

        let doclist = MmapFile::open(files.path(IndexFile::Doclist))?;
        let hitlist = MmapFile::open(files.path(IndexFile::Hitlist))?;
        let dict = MmapFile::open(files.path(IndexFile::Dict))?;
        let mut mva = MmapFile::open(files.path(IndexFile::Mva))?;
        let skiplist = if header.has_skiplists() {
            Some(MmapFile::open(files.path(IndexFile::Skiplist))?)
        } else {
            None
        };

        if settings.mlock {
            if !mva.try_lock() {
                log::warn!("{}: mlock refused, touching pages instead", files.base.display());
                mva.touch_pages();
            }
        } else {
            mva.touch_pages();
        }

        let kill_path = files.path(IndexFile::KillList);
        let kill = if kill_path.exists() {
            KillList::load(&MmapFile::open(kill_path)?)?
        } else {
            KillList::new()
        };
        if kill.len() != header.kill_list_count {
            return Err(Error::corrupt(format!(
                "kill list count mismatch: header {} file {}", header.kill_list_count, kill.len())));
        }

        let wordlist = Wordlist::load(dict.data(), &header)?;

        let rows_words = if header.docinfo == DocinfoKind::Extern {
            header.minmax_words_offset as usize
        } else {
            attrs.len()
        };
        let hash = DocinfoHash::build(&attrs[..rows_words], row_width);

        let index = DiskIndex {
            files,
            header,
            stats,
            dict_settings,
            arena: MvaArena::new(settings.arena_limit),
            attrs_status: AtomicU32::new(0),
            attrs: RwLock::new(attrs),
            strings: RwLock::new(strings),
            mva_log: Mutex::new(std::collections::BTreeMap::new()),
            doclist,
            hitlist,
            skiplist,
            dict,
            mva,
            kill,
            wordlist,
            hash,
        };

        // Live-updated MVA lists from the previous session come back
        // through the persistent log
        crate::attr::update::replay_mva_log(&index)?;
        Ok(index)
    }

    pub fn row_width(&self) -> usize {
        self.header.schema.row_width() as usize
    }

    pub fn row_count(&self) -> usize {
        if self.header.docinfo != DocinfoKind::Extern {
            return 0;
        }
        self.header.minmax_words_offset as usize / self.row_width()
    }

    pub fn kill_list(&self) -> &KillList {
        &self.kill
    }

    pub fn wordlist(&self) -> &Wordlist {
        &self.wordlist
    }

    pub fn dict_data(&self) -> &[u8] {
        self.dict.data()
    }

    pub fn doclist_data(&self) -> &[u8] {
        self.doclist.data()
    }

    pub fn hitlist_data(&self) -> &[u8] {
        self.hitlist.data()
    }

    pub fn skiplist_data(&self) -> Option<&[u8]> {
        self.skiplist.as_ref().map(|m| m.data())
    }

    pub fn rows_guard(&self) -> RwLockReadGuard<'_, Vec<u32>> {
        self.attrs.read()
    }

    pub fn strings_guard(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.strings.read()
    }

    pub fn mva_data(&self) -> &[u8] {
        self.mva.data()
    }

    /// Row index for a doc id, through the docinfo hash.
    pub fn find_row(&self, doc_id: DocId) -> Option<usize> {
        let attrs = self.attrs.read();
        self.hash.lookup(&attrs, self.row_width(), doc_id)
    }

    /// Same, for callers already holding an attribute guard (the lock
    /// is not reentrant).
    pub fn find_row_locked(&self, attrs: &[u32], doc_id: DocId) -> Option<usize> {
        self.hash.lookup(attrs, self.row_width(), doc_id)
    }

    /// Copy of a row by index.
    pub fn read_row(&self, row: usize) -> Vec<u32> {
        let width = self.row_width();
        let attrs = self.attrs.read();
        attrs[row * width..(row + 1) * width].to_vec()
    }

    /// Normalize a query token the way the build did.
    pub fn normalize_term(&self, term: &str) -> Option<Vec<u8>> {
        let mut token = term.as_bytes().to_vec();
        if !self.dict_settings.normalize(&mut token) {
            return None;
        }
        Some(token)
    }

    fn entry_for(&self, normalized: &[u8]) -> Result<Option<WordlistEntry>> {
        match self.header.dict.flavor {
            DictFlavor::Crc => {
                let id = hash_word(normalized, self.header.use_64bit);
                self.wordlist.find_by_id(self.dict.data(), id)
            }
            DictFlavor::Keywords => self.wordlist.find_by_text(self.dict.data(), normalized),
        }
    }

    fn is_hitless_term(&self, normalized: &[u8], word_id: WordId) -> bool {
        if self.header.dict.hitless_all {
            return true;
        }
        if self.header.dict.hitless_words.is_empty() {
            return false;
        }
        self.header.dict.hitless_words.iter().any(|word| {
            let mut token = word.as_bytes().to_vec();
            if !self.dict_settings.normalize(&mut token) {
                return false;
            }
            match self.header.dict.flavor {
                DictFlavor::Keywords => token == normalized,
                DictFlavor::Crc => hash_word(&token, self.header.use_64bit) == word_id,
            }
        })
    }

    fn reader_for(&self, entry: WordlistEntry, normalized: &[u8]) -> PostingReader<'_> {
        let hitless = self.is_hitless_term(normalized, entry.word_id);
        let inline_min_row = (self.header.docinfo == DocinfoKind::Inline)
            .then_some(self.header.inline_min_row.as_slice());
        PostingReader::new(
            self.doclist.data(),
            self.hitlist.data(),
            self.skiplist.as_ref().map(|m| m.data()),
            entry,
            self.header.hit_format,
            hitless,
            inline_min_row,
        )
    }

    /// Posting reader for one term; None when the term is a stop-word
    /// or absent from the dictionary.
    pub fn term_reader(&self, term: &str) -> Result<Option<PostingReader<'_>>> {
        let Some(normalized) = self.normalize_term(term) else { return Ok(None) };
        let Some(entry) = self.entry_for(&normalized)? else { return Ok(None) };
        Ok(Some(self.reader_for(entry, &normalized)))
    }

    /// Expand a wildcard pattern into posting readers.
    pub fn wildcard_readers(&self, pattern: &str) -> Result<Vec<PostingReader<'_>>> {
        if self.header.dict.flavor != DictFlavor::Keywords {
            return Err(Error::config("wildcard expansion needs a keywords dictionary"));
        }
        let entries = self.wordlist.expand_wildcard(self.dict.data(), pattern.as_bytes())?;
        Ok(entries.into_iter()
            .map(|entry| {
                let keyword = entry.keyword.clone();
                self.reader_for(entry, &keyword)
            })
            .collect())
    }

    /// Min/max view for one 128-row block (or the whole-index pair
    /// with `block == block_count`).
    pub fn minmax_block<'a>(&self, attrs: &'a [u32], block: usize) -> crate::attr::minmax::MinMaxView<'a> {
        let width = self.row_width();
        let tail_start = self.header.minmax_words_offset as usize;
        let pair = tail_start + block * 2 * width;
        crate::attr::minmax::MinMaxView {
            min_row: &attrs[pair..pair + width],
            max_row: &attrs[pair + width..pair + 2 * width],
        }
    }

    pub fn minmax_block_count(&self) -> usize {
        let rows = self.row_count();
        rows.div_ceil(crate::attr::minmax::MINMAX_BLOCK_ROWS)
    }

    /// Per-keyword dictionary stats for a raw query string.
    pub fn keyword_stats(&self, query: &str) -> Result<Vec<KeywordStat>> {
        let mut out = Vec::new();
        for raw in query.split_whitespace() {
            let Some(normalized) = self.normalize_term(raw) else {
                out.push(KeywordStat {
                    tokenized: raw.to_string(),
                    normalized: String::new(),
                    docs: 0,
                    hits: 0,
                });
                continue;
            };
            let entry = self.entry_for(&normalized)?;
            out.push(KeywordStat {
                tokenized: raw.to_string(),
                normalized: String::from_utf8_lossy(&normalized).into_owned(),
                docs: entry.as_ref().map_or(0, |e| e.docs),
                hits: entry.as_ref().map_or(0, |e| e.hits),
            });
        }
        Ok(out)
    }

    /// The pools filters chase offsets into. The strings guard must
    /// outlive the returned pools.
    pub fn pools<'a>(&'a self, strings: &'a [u8]) -> RowPools<'a> {
        RowPools {
            mva: self.mva.data(),
            strings,
            arena: Some(&self.arena),
        }
    }
}

/// One row of the keyword terms report.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordStat {
    pub tokenized: String,
    pub normalized: String,
    pub docs: u32,
    pub hits: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docinfo_hash_dense() {
        let row_width = 3usize;
        let mut rows = Vec::new();
        for doc in [2u64, 5, 9, 1000, 1001] {
            let mut row = vec![0u32; row_width];
            RowAccess::set_doc_id(&mut row, DocId(doc));
            rows.extend_from_slice(&row);
        }
        let hash = DocinfoHash::build(&rows, row_width);
        assert_eq!(hash.lookup(&rows, row_width, DocId(2)), Some(0));
        assert_eq!(hash.lookup(&rows, row_width, DocId(9)), Some(2));
        assert_eq!(hash.lookup(&rows, row_width, DocId(1001)), Some(4));
        assert_eq!(hash.lookup(&rows, row_width, DocId(3)), None);
        assert_eq!(hash.lookup(&rows, row_width, DocId(0)), None);
        assert_eq!(hash.lookup(&rows, row_width, DocId(5000)), None);
    }

    #[test]
    fn test_docinfo_hash_wide_spread() {
        let row_width = 2usize;
        let mut rows = Vec::new();
        let docs: Vec<u64> = (0..1000).map(|i| 1 + i * 7_000_003).collect();
        for &doc in &docs {
            let mut row = vec![0u32; row_width];
            RowAccess::set_doc_id(&mut row, DocId(doc));
            rows.extend_from_slice(&row);
        }
        let hash = DocinfoHash::build(&rows, row_width);
        for (i, &doc) in docs.iter().enumerate() {
            assert_eq!(hash.lookup(&rows, row_width, DocId(doc)), Some(i));
            assert_eq!(hash.lookup(&rows, row_width, DocId(doc + 1)), None);
        }
    }

    #[test]
    fn test_docinfo_hash_empty() {
        let hash = DocinfoHash::build(&[], 3);
        assert_eq!(hash.lookup(&[], 3, DocId(1)), None);
    }
}
