use crate::core::error::{Error, Result};
use crate::core::types::DocId;
use crate::io::reader::SliceReader;
use crate::io::writer::FileWriter;

/// Docs per skip entry.
pub const SKIPLIST_BLOCK: u32 = 128;

/// Guaranteed minimum doclist bytes per doc; folded into the offset
/// deltas so they zip smaller.
pub const SKIPLIST_MIN_DOC_BYTES: u64 = 4;

/// Saved decoder state at a block boundary: the delta-base doc id
/// (the last doc BEFORE the block), the doclist position of the
/// block's first record, and the hitlist delta base at that point.
/// Restoring these three resumes decoding mid-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipEntry {
    pub base_doc_id: DocId,
    pub doclist_offset: u64,
    pub base_hitlist_pos: u64,
}

/// `.spe` writer. The file leads with a format byte; each word with
/// more than one block of docs appends its entries as deltas against
/// the previous entry, less the guaranteed minimums.
pub struct SkiplistWriter {
    pub writer: FileWriter,
}

pub const SKIPLIST_FORMAT_BYTE: u8 = 0x01;

impl SkiplistWriter {
    pub fn begin(mut writer: FileWriter) -> Result<Self> {
        writer.put_byte(SKIPLIST_FORMAT_BYTE)?;
        Ok(SkiplistWriter { writer })
    }

    /// Write one word's entries. The first snapshot is implied and
    /// not passed: it is always `(0, doclist_start, 0)` and gets
    /// reconstructed from the dictionary entry. Returns the word's
    /// offset into `.spe`.
    pub fn write_word(&mut self, entries: &[SkipEntry], doclist_start: u64) -> Result<u64> {
        let offset = self.writer.pos();
        let mut prev = SkipEntry {
            base_doc_id: DocId(0),
            doclist_offset: doclist_start,
            base_hitlist_pos: 0,
        };
        for entry in entries {
            // Consecutive bases are at least a block of docs and a
            // block of minimum-size records apart
            self.writer.zip_u64(entry.base_doc_id.0 - prev.base_doc_id.0 - SKIPLIST_BLOCK as u64)?;
            self.writer.zip_u64(
                entry.doclist_offset - prev.doclist_offset
                    - SKIPLIST_MIN_DOC_BYTES * SKIPLIST_BLOCK as u64,
            )?;
            self.writer.zip_u64(entry.base_hitlist_pos - prev.base_hitlist_pos)?;
            prev = *entry;
        }
        Ok(offset)
    }

    pub fn finish(self) -> Result<()> {
        self.writer.finish()
    }
}

/// Decode one word's skip entries from the mapped `.spe`. The implied
/// first entry `(0, doclist_start, 0)` is included in the result so a
/// seek can always fall back to the list head.
pub fn read_skiplist(
    data: &[u8],
    offset: u64,
    entry_count: usize,
    doclist_start: u64,
) -> Result<Vec<SkipEntry>> {
    if data.first() != Some(&SKIPLIST_FORMAT_BYTE) {
        return Err(Error::corrupt("bad skiplist format byte"));
    }
    let mut reader = SliceReader::at(data, offset as usize);
    let mut prev = SkipEntry {
        base_doc_id: DocId(0),
        doclist_offset: doclist_start,
        base_hitlist_pos: 0,
    };
    let mut entries = Vec::with_capacity(entry_count + 1);
    entries.push(prev);
    for _ in 0..entry_count {
        let doc_delta = reader.unzip_u64()?;
        let off_delta = reader.unzip_u64()?;
        let hit_delta = reader.unzip_u64()?;
        prev = SkipEntry {
            base_doc_id: DocId(prev.base_doc_id.0 + SKIPLIST_BLOCK as u64 + doc_delta),
            doclist_offset: prev.doclist_offset
                + SKIPLIST_MIN_DOC_BYTES * SKIPLIST_BLOCK as u64
                + off_delta,
            base_hitlist_pos: prev.base_hitlist_pos + hit_delta,
        };
        entries.push(prev);
    }
    Ok(entries)
}

/// On-disk entry count for a word with `docs` documents.
pub fn skiplist_entry_count(docs: u32) -> usize {
    if docs <= SKIPLIST_BLOCK {
        0
    } else {
        ((docs - 1) / SKIPLIST_BLOCK) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ThrottleConfig;
    use crate::io::throttle::IoStats;
    use std::sync::Arc;

    #[test]
    fn test_write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx.spe");
        let writer = FileWriter::create(&path, 4096, ThrottleConfig::default(), Arc::new(IoStats::default())).unwrap();
        let mut skiplist = SkiplistWriter::begin(writer).unwrap();

        let entries = vec![
            SkipEntry { base_doc_id: DocId(130), doclist_offset: 1000 + 520, base_hitlist_pos: 300 },
            SkipEntry { base_doc_id: DocId(258), doclist_offset: 1000 + 1200, base_hitlist_pos: 800 },
        ];
        let offset = skiplist.write_word(&entries, 1000).unwrap();
        skiplist.finish().unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(offset, 1);
        let decoded = read_skiplist(&data, offset, 2, 1000).unwrap();
        // The implied head entry leads the decoded list
        assert_eq!(decoded[0], SkipEntry { base_doc_id: DocId(0), doclist_offset: 1000, base_hitlist_pos: 0 });
        assert_eq!(&decoded[1..], entries.as_slice());
    }

    #[test]
    fn test_entry_count() {
        assert_eq!(skiplist_entry_count(128), 0);
        assert_eq!(skiplist_entry_count(129), 1);
        assert_eq!(skiplist_entry_count(256), 1);
        assert_eq!(skiplist_entry_count(257), 2);
        assert_eq!(skiplist_entry_count(10000), 78);
    }
}
