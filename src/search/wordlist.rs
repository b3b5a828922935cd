use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::core::error::{Error, Result};
use crate::core::types::WordId;
use crate::dict::writer::{doclist_hint_unpack, DOCLIST_HINT_THRESH, SKIPLIST_DOC_THRESH};
use crate::index::infix::{InfixFileInfo, InfixIndex};
use crate::io::reader::SliceReader;
use crate::search::wildcard::{has_wildcards, literal_prefix, wildcard_match};
use crate::storage::header::{DictFlavor, IndexHeader};

/// One decoded dictionary entry.
#[derive(Debug, Clone, PartialEq)]
pub struct WordlistEntry {
    pub word_id: WordId,
    pub keyword: Vec<u8>,
    pub doclist_offset: u64,
    pub doclist_hint: u64,
    pub docs: u32,
    pub hits: u32,
    pub skiplist_offset: Option<u64>,
}

#[derive(Debug, Clone)]
enum CheckpointKey {
    Id(WordId),
    Text(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Checkpoint {
    key: CheckpointKey,
    offset: u64,
}

/// Decoded view over the mapped `.spi`: checkpoint binary search,
/// on-demand block decode with a small LRU, prefix and infix
/// expansion.
pub struct Wordlist {
    pub flavor: DictFlavor,
    checkpoints: Vec<Checkpoint>,
    checkpoints_offset: u64,
    infix: Option<InfixIndex>,
    block_cache: Mutex<LruCache<u32, Arc<Vec<WordlistEntry>>>>,
}

impl Wordlist {
    pub fn load(data: &[u8], header: &IndexHeader) -> Result<Self> {
        let mut reader = SliceReader::at(data, header.dict_checkpoints_offset as usize);
        let mut checkpoints = Vec::with_capacity(header.dict_checkpoint_count as usize);
        for _ in 0..header.dict_checkpoint_count {
            let key = match header.dict.flavor {
                DictFlavor::Crc => CheckpointKey::Id(WordId(reader.read_u64()?)),
                DictFlavor::Keywords => {
                    let len = reader.read_u32()? as usize;
                    CheckpointKey::Text(reader.read_bytes(len)?.to_vec())
                }
            };
            let offset = reader.read_u64()?;
            checkpoints.push(Checkpoint { key, offset });
        }

        // Checkpoints must ascend in the dictionary's own order
        for pair in checkpoints.windows(2) {
            let ordered = match (&pair[0].key, &pair[1].key) {
                (CheckpointKey::Id(a), CheckpointKey::Id(b)) => a < b,
                (CheckpointKey::Text(a), CheckpointKey::Text(b)) => a < b,
                _ => false,
            };
            if !ordered {
                return Err(Error::corrupt("dictionary checkpoints out of order"));
            }
        }

        let infix = if header.min_infix_len > 0 && header.dict.flavor == DictFlavor::Keywords {
            let info = InfixFileInfo {
                blocks_offset: header.infix_blocks_offset,
                hash_size: header.infix_hash_size,
                codepoint_bytes: header.infix_codepoint_bytes,
            };
            Some(InfixIndex::load(data, info)?)
        } else {
            None
        };

        Ok(Wordlist {
            flavor: header.dict.flavor,
            checkpoints,
            checkpoints_offset: header.dict_checkpoints_offset,
            infix,
            block_cache: Mutex::new(LruCache::new(NonZeroUsize::new(64).unwrap())),
        })
    }

    pub fn checkpoint_count(&self) -> usize {
        self.checkpoints.len()
    }

    /// Sequential readers (the merger, the checker) walk blocks in
    /// checkpoint order through this.
    pub fn block_entries(&self, data: &[u8], checkpoint: u32) -> Result<Arc<Vec<WordlistEntry>>> {
        self.block(data, checkpoint)
    }

    /// Decode one checkpoint's block, via the cache.
    fn block(&self, data: &[u8], checkpoint: u32) -> Result<Arc<Vec<WordlistEntry>>> {
        if let Some(cached) = self.block_cache.lock().get(&checkpoint) {
            return Ok(Arc::clone(cached));
        }
        let decoded = Arc::new(self.decode_block(data, checkpoint)?);
        self.block_cache.lock().put(checkpoint, Arc::clone(&decoded));
        Ok(decoded)
    }

    fn decode_block(&self, data: &[u8], checkpoint: u32) -> Result<Vec<WordlistEntry>> {
        let start = self.checkpoints[checkpoint as usize].offset;
        let mut reader = SliceReader::at(data, start as usize);
        let mut entries = Vec::new();

        match self.flavor {
            DictFlavor::Crc => {
                let mut last_word = 0u64;
                let mut last_offset = 0u64;
                loop {
                    if reader.pos() as u64 >= self.checkpoints_offset {
                        break;
                    }
                    let delta = reader.unzip_u64()?;
                    if delta == 0 {
                        break;
                    }
                    last_word += delta;
                    last_offset += reader.unzip_u64()?;
                    let docs = reader.unzip_u32()?;
                    let hits = reader.unzip_u32()?;
                    let hint = if docs >= DOCLIST_HINT_THRESH {
                        doclist_hint_unpack(docs, reader.get_byte()?)
                    } else {
                        0
                    };
                    let skiplist_offset = if docs > SKIPLIST_DOC_THRESH {
                        Some(reader.unzip_u64()?)
                    } else {
                        None
                    };
                    entries.push(WordlistEntry {
                        word_id: WordId(last_word),
                        keyword: Vec::new(),
                        doclist_offset: last_offset,
                        doclist_hint: hint,
                        docs,
                        hits,
                        skiplist_offset,
                    });
                }
            }
            DictFlavor::Keywords => {
                let mut last_keyword: Vec<u8> = Vec::new();
                let mut last_offset = 0u64;
                loop {
                    if reader.pos() as u64 >= self.checkpoints_offset {
                        break;
                    }
                    let suffix_len = reader.unzip_u64()? as usize;
                    if suffix_len == 0 {
                        break;
                    }
                    let prefix_len = reader.unzip_u64()? as usize;
                    if prefix_len > last_keyword.len() {
                        return Err(Error::corrupt("keyword prefix longer than previous keyword"));
                    }
                    let mut keyword = last_keyword[..prefix_len].to_vec();
                    keyword.extend_from_slice(reader.read_bytes(suffix_len)?);
                    last_offset += reader.unzip_u64()?;
                    let docs = reader.unzip_u32()?;
                    let hits = reader.unzip_u32()?;
                    let hint = if docs >= DOCLIST_HINT_THRESH {
                        doclist_hint_unpack(docs, reader.get_byte()?)
                    } else {
                        0
                    };
                    let skiplist_offset = if docs > SKIPLIST_DOC_THRESH {
                        Some(reader.unzip_u64()?)
                    } else {
                        None
                    };
                    last_keyword = keyword.clone();
                    entries.push(WordlistEntry {
                        word_id: WordId(0),
                        keyword,
                        doclist_offset: last_offset,
                        doclist_hint: hint,
                        docs,
                        hits,
                        skiplist_offset,
                    });
                }
            }
        }
        Ok(entries)
    }

    /// Exact lookup by hashed id (crc mode).
    pub fn find_by_id(&self, data: &[u8], word_id: WordId) -> Result<Option<WordlistEntry>> {
        if self.flavor != DictFlavor::Crc || self.checkpoints.is_empty() {
            return Ok(None);
        }
        let block = match self.checkpoints.partition_point(|cp| match &cp.key {
            CheckpointKey::Id(id) => *id <= word_id,
            CheckpointKey::Text(_) => false,
        }) {
            0 => return Ok(None),
            n => (n - 1) as u32,
        };
        let entries = self.block(data, block)?;
        Ok(entries.iter().find(|e| e.word_id == word_id).cloned())
    }

    /// Exact lookup by keyword text (keywords mode).
    pub fn find_by_text(&self, data: &[u8], keyword: &[u8]) -> Result<Option<WordlistEntry>> {
        if self.flavor != DictFlavor::Keywords || self.checkpoints.is_empty() {
            return Ok(None);
        }
        let block = match self.checkpoints.partition_point(|cp| match &cp.key {
            CheckpointKey::Text(text) => text.as_slice() <= keyword,
            CheckpointKey::Id(_) => false,
        }) {
            0 => return Ok(None),
            n => (n - 1) as u32,
        };
        let entries = self.block(data, block)?;
        Ok(entries.iter().find(|e| e.keyword == keyword).cloned())
    }

    /// Every keyword matching `prefix*`-style patterns: scan forward
    /// from the first candidate block, stop once past the prefix.
    pub fn expand_prefix(&self, data: &[u8], prefix: &[u8], pattern: &[u8]) -> Result<Vec<WordlistEntry>> {
        let mut out = Vec::new();
        if self.flavor != DictFlavor::Keywords || self.checkpoints.is_empty() {
            return Ok(out);
        }
        let first_block = self.checkpoints.partition_point(|cp| match &cp.key {
            CheckpointKey::Text(text) => text.as_slice() <= prefix,
            CheckpointKey::Id(_) => false,
        }).saturating_sub(1) as u32;

        'blocks: for block in first_block..self.checkpoints.len() as u32 {
            let entries = self.block(data, block)?;
            for entry in entries.iter() {
                if entry.keyword.starts_with(prefix) {
                    if wildcard_match(pattern, &entry.keyword) {
                        out.push(entry.clone());
                    }
                } else if entry.keyword.as_slice() > prefix {
                    break 'blocks;
                }
            }
        }
        Ok(out)
    }

    /// Resolve a wildcard pattern into matching dictionary entries,
    /// through the prefix scan or the infix hash.
    pub fn expand_wildcard(&self, data: &[u8], pattern: &[u8]) -> Result<Vec<WordlistEntry>> {
        if !has_wildcards(pattern) {
            return Ok(self.find_by_text(data, pattern)?.into_iter().collect());
        }
        let prefix = literal_prefix(pattern);
        if !prefix.is_empty() {
            return self.expand_prefix(data, prefix, pattern);
        }

        // Leading wildcard: collect candidate checkpoints via the
        // infix hash when present, scan everything when not
        let candidates: Vec<u32> = match (&self.infix, longest_literal_run(pattern)) {
            (Some(infix), Some(run)) => {
                infix.lookup(data, &run)?.iter().collect()
            }
            _ => (0..self.checkpoints.len() as u32).collect(),
        };

        let mut out = Vec::new();
        for block in candidates {
            if block as usize >= self.checkpoints.len() {
                continue;
            }
            let entries = self.block(data, block)?;
            for entry in entries.iter() {
                if wildcard_match(pattern, &entry.keyword) {
                    out.push(entry.clone());
                }
            }
        }
        out.sort_by(|a, b| a.keyword.cmp(&b.keyword));
        out.dedup_by(|a, b| a.keyword == b.keyword);
        Ok(out)
    }
}

/// Longest run of literal bytes in a pattern, trimmed to the recorded
/// infix length window; None when nothing usable remains.
fn longest_literal_run(pattern: &[u8]) -> Option<Vec<u8>> {
    let mut best: &[u8] = &[];
    for run in pattern.split(|&b| b == b'*' || b == b'?' || b == b'%') {
        if run.len() > best.len() {
            best = run;
        }
    }
    let chars: Vec<char> = String::from_utf8_lossy(best).chars().collect();
    if chars.len() < crate::index::infix::MIN_INFIX_CODEPOINTS {
        return None;
    }
    let take: String = chars.into_iter().take(crate::index::infix::MAX_INFIX_CODEPOINTS).collect();
    Some(take.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_literal_run() {
        assert_eq!(longest_literal_run(b"*foo*"), Some(b"foo".to_vec()));
        assert_eq!(longest_literal_run(b"*ab?cdef*"), Some(b"cdef".to_vec()));
        assert_eq!(longest_literal_run(b"*a*"), None);
        // Trimmed to the six-codepoint window
        assert_eq!(longest_literal_run(b"*abcdefgh*"), Some(b"abcdef".to_vec()));
    }
}
