use crate::core::error::Result;
use crate::core::types::WordId;
use crate::io::writer::FileWriter;

/// Entries per dictionary checkpoint block.
pub const CHECKPOINT_INTERVAL: usize = 1024;

/// Words with at least this many documents carry a doclist-size hint.
pub const DOCLIST_HINT_THRESH: u32 = 256;

/// Words with more documents than this carry a skip list.
pub const SKIPLIST_DOC_THRESH: u32 = 128;

/// "DHDR": redundant header block at the `.spi` tail.
pub const DICT_TAIL_MAGIC: u32 = 0x5244_4844;

/// Average doclist bytes per document, clamped to a byte. Lets the
/// reader pre-size its buffer without knowing the exact list length.
pub fn doclist_hint_pack(docs: u32, doclist_len: u64) -> u8 {
    if docs == 0 {
        return 1;
    }
    (doclist_len / docs as u64).clamp(1, 255) as u8
}

pub fn doclist_hint_unpack(docs: u32, hint: u8) -> u64 {
    docs as u64 * hint as u64
}

/// One finished word handed from the posting writer to the dictionary.
#[derive(Debug, Clone)]
pub struct DictEntry {
    pub word_id: WordId,
    /// Present in keywords mode only.
    pub keyword: Option<Vec<u8>>,
    pub doclist_offset: u64,
    pub doclist_len: u64,
    pub docs: u32,
    pub hits: u32,
    pub skiplist_offset: Option<u64>,
}

/// Sparse top-level index over the dictionary blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub word_id: WordId,
    pub keyword: Vec<u8>,
    pub offset: u64,
}

/// Where the finished dictionary parts landed inside `.spi`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DictFileInfo {
    pub checkpoints_offset: u64,
    pub checkpoint_count: u32,
}

/// Streams crc-mode entries: delta-coded word ids in hash order,
/// checkpoint every block.
pub struct CrcDictWriter {
    entries_in_block: usize,
    last_word_id: u64,
    last_doclist_offset: u64,
    checkpoints: Vec<Checkpoint>,
}

impl CrcDictWriter {
    pub fn new() -> Self {
        CrcDictWriter {
            entries_in_block: 0,
            last_word_id: 0,
            last_doclist_offset: 0,
            checkpoints: Vec::new(),
        }
    }

    pub fn add(&mut self, writer: &mut FileWriter, entry: &DictEntry) -> Result<()> {
        debug_assert!(entry.word_id.0 > self.last_word_id || self.entries_in_block == 0);
        if self.entries_in_block == 0 {
            self.checkpoints.push(Checkpoint {
                word_id: entry.word_id,
                keyword: Vec::new(),
                offset: writer.pos(),
            });
            self.last_word_id = 0;
            self.last_doclist_offset = 0;
        }

        writer.zip_u64(entry.word_id.0 - self.last_word_id)?;
        writer.zip_u64(entry.doclist_offset - self.last_doclist_offset)?;
        writer.zip_u32(entry.docs)?;
        writer.zip_u32(entry.hits)?;
        if entry.docs >= DOCLIST_HINT_THRESH {
            writer.put_byte(doclist_hint_pack(entry.docs, entry.doclist_len))?;
        }
        if entry.docs > SKIPLIST_DOC_THRESH {
            writer.zip_u64(entry.skiplist_offset.unwrap_or(0))?;
        }

        self.last_word_id = entry.word_id.0;
        self.last_doclist_offset = entry.doclist_offset;
        self.entries_in_block += 1;
        if self.entries_in_block == CHECKPOINT_INTERVAL {
            writer.zip_u64(0)?;
            self.entries_in_block = 0;
        }
        Ok(())
    }

    pub fn checkpoint_count(&self) -> u32 {
        self.checkpoints.len() as u32
    }

    pub fn finish(mut self, writer: &mut FileWriter) -> Result<(DictFileInfo, Vec<Checkpoint>)> {
        if self.entries_in_block > 0 {
            writer.zip_u64(0)?;
        }
        let info = DictFileInfo {
            checkpoints_offset: writer.pos(),
            checkpoint_count: self.checkpoints.len() as u32,
        };
        for checkpoint in &self.checkpoints {
            writer.write_u64(checkpoint.word_id.0)?;
            writer.write_u64(checkpoint.offset)?;
        }
        Ok((info, std::mem::take(&mut self.checkpoints)))
    }
}

impl Default for CrcDictWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Streams keywords-mode entries: prefix+delta coded keyword text in
/// text order. The suffix length leads each entry so a zero can
/// terminate the block unambiguously.
pub struct KeywordsDictWriter {
    entries_in_block: usize,
    last_keyword: Vec<u8>,
    last_doclist_offset: u64,
    checkpoints: Vec<Checkpoint>,
}

impl KeywordsDictWriter {
    pub fn new() -> Self {
        KeywordsDictWriter {
            entries_in_block: 0,
            last_keyword: Vec::new(),
            last_doclist_offset: 0,
            checkpoints: Vec::new(),
        }
    }

    pub fn add(&mut self, writer: &mut FileWriter, entry: &DictEntry) -> Result<()> {
        let keyword = entry.keyword.as_deref().expect("keywords dict entry without text");
        if self.entries_in_block == 0 {
            self.checkpoints.push(Checkpoint {
                word_id: entry.word_id,
                keyword: keyword.to_vec(),
                offset: writer.pos(),
            });
            self.last_keyword.clear();
            self.last_doclist_offset = 0;
        }

        let prefix_len = self.last_keyword.iter().zip(keyword.iter())
            .take_while(|(a, b)| a == b)
            .count();
        let suffix = &keyword[prefix_len..];
        debug_assert!(!suffix.is_empty(), "keywords must be strictly ascending");

        writer.zip_u64(suffix.len() as u64)?;
        writer.zip_u64(prefix_len as u64)?;
        writer.write_bytes(suffix)?;
        writer.zip_u64(entry.doclist_offset - self.last_doclist_offset)?;
        writer.zip_u32(entry.docs)?;
        writer.zip_u32(entry.hits)?;
        if entry.docs >= DOCLIST_HINT_THRESH {
            writer.put_byte(doclist_hint_pack(entry.docs, entry.doclist_len))?;
        }
        if entry.docs > SKIPLIST_DOC_THRESH {
            writer.zip_u64(entry.skiplist_offset.unwrap_or(0))?;
        }

        self.last_keyword.clear();
        self.last_keyword.extend_from_slice(keyword);
        self.last_doclist_offset = entry.doclist_offset;
        self.entries_in_block += 1;
        if self.entries_in_block == CHECKPOINT_INTERVAL {
            writer.zip_u64(0)?;
            self.entries_in_block = 0;
        }
        Ok(())
    }

    pub fn checkpoint_count(&self) -> u32 {
        self.checkpoints.len() as u32
    }

    pub fn finish(mut self, writer: &mut FileWriter) -> Result<(DictFileInfo, Vec<Checkpoint>)> {
        if self.entries_in_block > 0 {
            writer.zip_u64(0)?;
        }
        let info = DictFileInfo {
            checkpoints_offset: writer.pos(),
            checkpoint_count: self.checkpoints.len() as u32,
        };
        for checkpoint in &self.checkpoints {
            writer.write_lstring(&checkpoint.keyword)?;
            writer.write_u64(checkpoint.offset)?;
        }
        Ok((info, std::mem::take(&mut self.checkpoints)))
    }
}

impl Default for KeywordsDictWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// The redundant `.spi` tail block: lets the checker cross-validate
/// the header against the dictionary file itself.
pub fn write_dict_tail(
    writer: &mut FileWriter,
    info: DictFileInfo,
    infix_blocks_offset: u64,
    infix_hash_size: u64,
) -> Result<()> {
    writer.write_u32(DICT_TAIL_MAGIC)?;
    writer.write_u64(info.checkpoints_offset)?;
    writer.write_u32(info.checkpoint_count)?;
    writer.write_u64(infix_blocks_offset)?;
    writer.write_u64(infix_hash_size)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ThrottleConfig;
    use crate::io::reader::SliceReader;
    use crate::io::throttle::IoStats;
    use std::sync::Arc;

    fn entry(word_id: u64, offset: u64, docs: u32) -> DictEntry {
        DictEntry {
            word_id: WordId(word_id),
            keyword: None,
            doclist_offset: offset,
            doclist_len: docs as u64 * 3,
            docs,
            hits: docs * 2,
            skiplist_offset: if docs > SKIPLIST_DOC_THRESH { Some(100) } else { None },
        }
    }

    #[test]
    fn test_crc_writer_block_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dict.spi");
        let mut writer = FileWriter::create(&path, 4096, ThrottleConfig::default(), Arc::new(IoStats::default())).unwrap();

        let mut dict = CrcDictWriter::new();
        dict.add(&mut writer, &entry(100, 0, 2)).unwrap();
        dict.add(&mut writer, &entry(250, 40, 300)).unwrap();
        let (info, checkpoints) = dict.finish(&mut writer).unwrap();
        writer.finish().unwrap();

        assert_eq!(info.checkpoint_count, 1);
        assert_eq!(checkpoints[0].word_id, WordId(100));
        assert_eq!(checkpoints[0].offset, 0);

        let raw = std::fs::read(&path).unwrap();
        let mut reader = SliceReader::new(&raw);
        // First entry
        assert_eq!(reader.unzip_u64().unwrap(), 100);
        assert_eq!(reader.unzip_u64().unwrap(), 0);
        assert_eq!(reader.unzip_u32().unwrap(), 2);
        assert_eq!(reader.unzip_u32().unwrap(), 4);
        // Second entry: deltas, then hint and skiplist offset
        assert_eq!(reader.unzip_u64().unwrap(), 150);
        assert_eq!(reader.unzip_u64().unwrap(), 40);
        assert_eq!(reader.unzip_u32().unwrap(), 300);
        assert_eq!(reader.unzip_u32().unwrap(), 600);
        assert_eq!(reader.get_byte().unwrap(), 3);
        assert_eq!(reader.unzip_u64().unwrap(), 100);
        // Terminator
        assert_eq!(reader.unzip_u64().unwrap(), 0);
        assert_eq!(reader.pos() as u64, info.checkpoints_offset);
    }

    #[test]
    fn test_keywords_writer_prefix_coding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dict.spi");
        let mut writer = FileWriter::create(&path, 4096, ThrottleConfig::default(), Arc::new(IoStats::default())).unwrap();

        let mut dict = KeywordsDictWriter::new();
        let mut first = entry(1, 0, 2);
        first.keyword = Some(b"cat".to_vec());
        let mut second = entry(2, 30, 2);
        second.keyword = Some(b"cater".to_vec());
        dict.add(&mut writer, &first).unwrap();
        dict.add(&mut writer, &second).unwrap();
        let (info, checkpoints) = dict.finish(&mut writer).unwrap();
        writer.finish().unwrap();

        assert_eq!(checkpoints[0].keyword, b"cat");

        let raw = std::fs::read(&path).unwrap();
        let mut reader = SliceReader::new(&raw);
        // "cat": no shared prefix
        assert_eq!(reader.unzip_u64().unwrap(), 3);
        assert_eq!(reader.unzip_u64().unwrap(), 0);
        assert_eq!(reader.read_bytes(3).unwrap(), b"cat");
        assert_eq!(reader.unzip_u64().unwrap(), 0);
        assert_eq!(reader.unzip_u32().unwrap(), 2);
        assert_eq!(reader.unzip_u32().unwrap(), 4);
        // "cater": prefix 3, suffix "er"
        assert_eq!(reader.unzip_u64().unwrap(), 2);
        assert_eq!(reader.unzip_u64().unwrap(), 3);
        assert_eq!(reader.read_bytes(2).unwrap(), b"er");
        assert_eq!(reader.unzip_u64().unwrap(), 30);
        // Terminator follows the remaining counters
        assert_eq!(reader.unzip_u32().unwrap(), 2);
        assert_eq!(reader.unzip_u32().unwrap(), 4);
        assert_eq!(reader.unzip_u64().unwrap(), 0);
        assert_eq!(reader.pos() as u64, info.checkpoints_offset);
    }

    #[test]
    fn test_hint_round_trip() {
        assert_eq!(doclist_hint_pack(300, 900), 3);
        assert_eq!(doclist_hint_unpack(300, 3), 900);
        // Clamped on both ends
        assert_eq!(doclist_hint_pack(1000, 10), 1);
        assert_eq!(doclist_hint_pack(256, 1 << 30), 255);
    }
}
