use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use crate::core::config::ThrottleConfig;
use crate::core::error::Result;
use crate::core::types::{DocId, Hit, Hitpos, WordId};
use crate::dict::dictionary::Dictionary;
use crate::index::hit_buffer::HitBlock;
use crate::io::reader::FileReader;
use crate::io::throttle::IoStats;

/// Streaming reader over one sorted hit block.
pub struct Bin {
    reader: FileReader,
    end: u64,
    pub current: Option<Hit>,
}

impl Bin {
    pub fn open(
        path: &Path,
        block: HitBlock,
        throttle: ThrottleConfig,
        stats: Arc<IoStats>,
    ) -> Result<Self> {
        let mut reader = FileReader::open(path, 4096, throttle, stats)?;
        reader.seek(block.start)?;
        let mut bin = Bin { reader, end: block.end, current: None };
        bin.advance()?;
        Ok(bin)
    }

    pub fn advance(&mut self) -> Result<()> {
        if self.reader.pos() >= self.end {
            self.current = None;
            return Ok(());
        }
        let word_id = WordId(self.reader.unzip_u64()?);
        let doc_id = DocId(self.reader.unzip_u64()?);
        let pos = Hitpos(self.reader.unzip_u32()?);
        self.current = Some(Hit { word_id, doc_id, pos });
        Ok(())
    }
}

/// Binary heap over the bins, ordered by the dictionary's posting
/// order; pops the globally smallest hit.
pub struct HitMerge {
    bins: Vec<Bin>,
    heap: Vec<usize>,
}

impl HitMerge {
    pub fn new(bins: Vec<Bin>, dict: &dyn Dictionary) -> Self {
        let mut merge = HitMerge {
            heap: (0..bins.len()).filter(|&i| bins[i].current.is_some()).collect(),
            bins,
        };
        // Floyd heapify
        for i in (0..merge.heap.len() / 2).rev() {
            merge.sift_down(i, dict);
        }
        merge
    }

    fn less(&self, a: usize, b: usize, dict: &dyn Dictionary) -> bool {
        let ha = self.bins[a].current.as_ref().unwrap();
        let hb = self.bins[b].current.as_ref().unwrap();
        let ord = dict.cmp_ids(ha.word_id, hb.word_id)
            .then(ha.doc_id.cmp(&hb.doc_id))
            .then(ha.pos.cmp(&hb.pos));
        ord == Ordering::Less
    }

    fn sift_down(&mut self, mut at: usize, dict: &dyn Dictionary) {
        loop {
            let left = 2 * at + 1;
            if left >= self.heap.len() {
                return;
            }
            let mut smallest = left;
            let right = left + 1;
            if right < self.heap.len() && self.less(self.heap[right], self.heap[left], dict) {
                smallest = right;
            }
            if self.less(self.heap[smallest], self.heap[at], dict) {
                self.heap.swap(at, smallest);
                at = smallest;
            } else {
                return;
            }
        }
    }

    pub fn next_hit(&mut self, dict: &dyn Dictionary) -> Result<Option<Hit>> {
        if self.heap.is_empty() {
            return Ok(None);
        }
        let top = self.heap[0];
        let hit = self.bins[top].current.take().unwrap();
        self.bins[top].advance()?;
        if self.bins[top].current.is_none() {
            let last = self.heap.len() - 1;
            self.heap.swap(0, last);
            self.heap.pop();
        }
        if !self.heap.is_empty() {
            self.sift_down(0, dict);
        }
        Ok(Some(hit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::dictionary::{CrcDict, DictSettings};
    use crate::index::hit_buffer::{HitBuffer, HIT_BYTES};

    #[test]
    fn test_k_way_merge_is_globally_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let dict = CrcDict::new(DictSettings::plain(true));
        let path = dir.path().join("hits.tmp");
        let stats = Arc::new(IoStats::default());
        let mut buffer = HitBuffer::new(
            HIT_BYTES * 1024,
            &path,
            ThrottleConfig::default(),
            Arc::clone(&stats),
        );

        // Scrambled input across several flushes
        for i in 0..5000u64 {
            let hit = Hit {
                word_id: WordId((i * 7919) % 13),
                doc_id: DocId(((i * 104729) % 4999) + 1),
                pos: Hitpos::pack((i % 3) as u8, (i % 50 + 1) as u32),
            };
            buffer.push(hit, &dict).unwrap();
        }
        let blocks = buffer.finish(&dict).unwrap();
        assert!(blocks.len() > 1);

        let bins = blocks.iter()
            .map(|&block| Bin::open(&path, block, ThrottleConfig::default(), Arc::clone(&stats)).unwrap())
            .collect();
        let mut merge = HitMerge::new(bins, &dict);

        let mut count = 0;
        let mut last: Option<Hit> = None;
        while let Some(hit) = merge.next_hit(&dict).unwrap() {
            if let Some(prev) = last {
                assert!(prev.cmp_key() <= hit.cmp_key());
            }
            last = Some(hit);
            count += 1;
        }
        assert_eq!(count, 5000);
    }
}
