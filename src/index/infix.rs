use std::collections::BTreeMap;

use roaring::RoaringBitmap;

use crate::core::error::{Error, Result};
use crate::io::reader::SliceReader;
use crate::io::writer::FileWriter;

/// Infixes per top-level block.
pub const INFIX_BLOCK_INTERVAL: usize = 512;

/// Recorded substring lengths, in codepoints.
pub const MIN_INFIX_CODEPOINTS: usize = 2;
pub const MAX_INFIX_CODEPOINTS: usize = 6;

/// Where the infix sections landed inside `.spi`.
#[derive(Debug, Clone, Copy, Default)]
pub struct InfixFileInfo {
    pub blocks_offset: u64,
    pub hash_size: u64,
    pub codepoint_bytes: u32,
}

/// Collects every 2..6-codepoint substring of the indexed keywords,
/// each mapped to the set of dictionary checkpoints whose block holds
/// a matching keyword. Sorted and written after the checkpoints.
pub struct InfixBuilder {
    min_keyword_len: usize,
    max_substring_len: usize,
    entries: BTreeMap<Vec<u8>, RoaringBitmap>,
    codepoint_bytes: u32,
}

fn codepoint_starts(keyword: &[u8]) -> Vec<usize> {
    let mut starts: Vec<usize> = keyword.iter().enumerate()
        .filter(|(_, &byte)| byte & 0xC0 != 0x80)
        .map(|(i, _)| i)
        .collect();
    starts.push(keyword.len());
    starts
}

impl InfixBuilder {
    pub fn new(min_keyword_len: usize, max_substring_len: usize) -> Self {
        InfixBuilder {
            min_keyword_len: min_keyword_len.max(1),
            max_substring_len,
            entries: BTreeMap::new(),
            codepoint_bytes: 1,
        }
    }

    pub fn register(&mut self, keyword: &[u8], checkpoint: u32) {
        // Magic-marker forms are not substring-searchable
        if keyword.first().map_or(true, |&b| b < 0x20) {
            return;
        }
        let starts = codepoint_starts(keyword);
        let codepoints = starts.len() - 1;
        if codepoints < self.min_keyword_len {
            return;
        }

        let mut max_len = MAX_INFIX_CODEPOINTS;
        if self.max_substring_len > 0 {
            max_len = max_len.min(self.max_substring_len);
        }
        for from in 0..codepoints {
            for len in MIN_INFIX_CODEPOINTS..=max_len {
                if from + len > codepoints {
                    break;
                }
                let slice = &keyword[starts[from]..starts[from + len]];
                let width = (starts[from + 1] - starts[from]) as u32;
                self.codepoint_bytes = self.codepoint_bytes.max(width);
                self.entries.entry(slice.to_vec()).or_default().insert(checkpoint);
            }
        }
    }

    /// Write the hash section then the block index; both land after
    /// the dictionary checkpoints.
    pub fn finish(self, writer: &mut FileWriter) -> Result<InfixFileInfo> {
        let hash_start = writer.pos();
        let mut blocks: Vec<(Vec<u8>, u64)> = Vec::new();

        for (idx, (infix, checkpoints)) in self.entries.iter().enumerate() {
            if idx % INFIX_BLOCK_INTERVAL == 0 {
                blocks.push((infix.clone(), writer.pos()));
            }
            writer.write_lstring(infix)?;
            writer.zip_u32(checkpoints.len() as u32)?;
            let mut last = 0u32;
            for checkpoint in checkpoints.iter() {
                writer.zip_u32(checkpoint - last)?;
                last = checkpoint;
            }
        }

        let blocks_offset = writer.pos();
        writer.write_u32(blocks.len() as u32)?;
        for (first_infix, offset) in &blocks {
            writer.write_lstring(first_infix)?;
            writer.write_u64(*offset)?;
        }

        Ok(InfixFileInfo {
            blocks_offset,
            hash_size: blocks_offset - hash_start,
            codepoint_bytes: self.codepoint_bytes,
        })
    }
}

/// Top-level infix index parsed back from the mapped `.spi`.
pub struct InfixIndex {
    pub blocks: Vec<(Vec<u8>, u64)>,
    pub hash_start: u64,
    pub blocks_offset: u64,
}

impl InfixIndex {
    pub fn load(data: &[u8], info: InfixFileInfo) -> Result<Self> {
        if info.hash_size == 0 {
            return Ok(InfixIndex { blocks: Vec::new(), hash_start: 0, blocks_offset: 0 });
        }
        let mut reader = SliceReader::at(data, info.blocks_offset as usize);
        let count = reader.read_u32()? as usize;
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            let len = reader.read_u32()? as usize;
            let text = reader.read_bytes(len)?.to_vec();
            let offset = reader.read_u64()?;
            blocks.push((text, offset));
        }
        Ok(InfixIndex {
            blocks,
            hash_start: info.blocks_offset - info.hash_size,
            blocks_offset: info.blocks_offset,
        })
    }

    /// Checkpoint candidates whose blocks may hold keywords containing
    /// `infix`.
    pub fn lookup(&self, data: &[u8], infix: &[u8]) -> Result<RoaringBitmap> {
        if self.blocks.is_empty() {
            return Ok(RoaringBitmap::new());
        }
        // Last block whose first infix is <= the probe
        let block = match self.blocks.partition_point(|(first, _)| first.as_slice() <= infix) {
            0 => return Ok(RoaringBitmap::new()),
            n => n - 1,
        };
        let start = self.blocks[block].1;
        let end = self.blocks.get(block + 1).map_or(self.blocks_offset, |(_, off)| *off);

        let mut reader = SliceReader::at(data, start as usize);
        while (reader.pos() as u64) < end {
            let len = reader.read_u32()? as usize;
            let text = reader.read_bytes(len)?;
            let count = reader.unzip_u32()?;
            let mut checkpoints = RoaringBitmap::new();
            let mut last = 0u32;
            for _ in 0..count {
                last += reader.unzip_u32()?;
                checkpoints.insert(last);
            }
            match text.cmp(infix) {
                std::cmp::Ordering::Equal => return Ok(checkpoints),
                std::cmp::Ordering::Greater => break,
                std::cmp::Ordering::Less => {}
            }
        }
        Ok(RoaringBitmap::new())
    }
}
