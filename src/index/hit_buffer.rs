use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::config::ThrottleConfig;
use crate::core::error::Result;
use crate::core::types::Hit;
use crate::dict::dictionary::Dictionary;
use crate::io::throttle::IoStats;
use crate::io::writer::FileWriter;

/// Rough in-memory footprint of one buffered hit.
pub const HIT_BYTES: usize = 24;

/// Byte range of one sorted block inside the hit temp file.
#[derive(Debug, Clone, Copy)]
pub struct HitBlock {
    pub start: u64,
    pub end: u64,
}

/// Bounded posting collector. Full pools are sorted in dictionary
/// order and appended to the temp file as independent blocks.
pub struct HitBuffer {
    hits: Vec<Hit>,
    limit_hits: usize,
    temp_path: PathBuf,
    writer: Option<FileWriter>,
    blocks: Vec<HitBlock>,
    throttle: ThrottleConfig,
    stats: Arc<IoStats>,
}

impl HitBuffer {
    pub fn new(
        mem_limit: usize,
        temp_path: impl AsRef<Path>,
        throttle: ThrottleConfig,
        stats: Arc<IoStats>,
    ) -> Self {
        HitBuffer {
            hits: Vec::new(),
            limit_hits: (mem_limit / HIT_BYTES).max(1024),
            temp_path: temp_path.as_ref().to_path_buf(),
            writer: None,
            blocks: Vec::new(),
            throttle,
            stats,
        }
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn push(&mut self, hit: Hit, dict: &dyn Dictionary) -> Result<()> {
        self.hits.push(hit);
        if self.hits.len() >= self.limit_hits {
            self.flush(dict)?;
        }
        Ok(())
    }

    /// Sort the pool in posting order and append it as one block.
    fn flush(&mut self, dict: &dyn Dictionary) -> Result<()> {
        if self.hits.is_empty() {
            return Ok(());
        }
        self.hits.sort_by(|a, b| {
            dict.cmp_ids(a.word_id, b.word_id)
                .then(a.doc_id.cmp(&b.doc_id))
                .then(a.pos.cmp(&b.pos))
        });

        if self.writer.is_none() {
            self.writer = Some(FileWriter::create(
                &self.temp_path,
                256 * 1024,
                self.throttle,
                Arc::clone(&self.stats),
            )?);
        }
        let writer = self.writer.as_mut().unwrap();
        let start = writer.pos();
        for hit in &self.hits {
            writer.zip_u64(hit.word_id.0)?;
            writer.zip_u64(hit.doc_id.0)?;
            writer.zip_u32(hit.pos.0)?;
        }
        self.blocks.push(HitBlock { start, end: writer.pos() });
        self.hits.clear();
        Ok(())
    }

    /// Flush the tail and hand back the block ranges for the merge.
    pub fn finish(mut self, dict: &dyn Dictionary) -> Result<Vec<HitBlock>> {
        self.flush(dict)?;
        if let Some(writer) = self.writer.take() {
            writer.finish()?;
        }
        Ok(self.blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DocId, Hitpos, WordId};
    use crate::dict::dictionary::{CrcDict, DictSettings};

    #[test]
    fn test_blocks_are_sorted_and_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let dict = CrcDict::new(DictSettings::plain(true));
        // Tiny limit to force multiple blocks
        let mut buffer = HitBuffer::new(
            HIT_BYTES * 1024,
            dir.path().join("hits.tmp"),
            ThrottleConfig::default(),
            Arc::new(IoStats::default()),
        );

        for i in (0..3000u64).rev() {
            let hit = Hit {
                word_id: WordId(i % 7),
                doc_id: DocId(i + 1),
                pos: Hitpos::pack(0, 1),
            };
            buffer.push(hit, &dict).unwrap();
        }
        let blocks = buffer.finish(&dict).unwrap();
        assert!(blocks.len() >= 2);
        // Blocks tile the file with no gaps
        for pair in blocks.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }
}
