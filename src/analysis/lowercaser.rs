use std::sync::Arc;

use crate::core::error::{Error, Result};

/// Codepoint classes carried in the high byte of a table entry.
pub const FLAG_SPECIAL: u32 = 0x0100_0000;
pub const FLAG_BOUNDARY: u32 = 0x0200_0000;
pub const FLAG_IGNORE: u32 = 0x0400_0000;
pub const FLAG_BLEND: u32 = 0x0800_0000;
pub const FLAG_NGRAM: u32 = 0x1000_0000;
pub const FLAG_DUAL: u32 = 0x2000_0000;

pub const CODEPOINT_MASK: u32 = 0x00FF_FFFF;
pub const FLAGS_MASK: u32 = !CODEPOINT_MASK;

const CHUNK_SIZE: usize = 0x100;
const CHUNK_COUNT: usize = 0x300;
const TABLE_SIZE: u32 = (CHUNK_COUNT * CHUNK_SIZE) as u32;

/// One remap rule: fold `[start..=end]` onto codepoints starting at
/// `dest_start` (identity mapping when `dest_start == start`).
#[derive(Debug, Clone, Copy)]
pub struct RemapRange {
    pub start: u32,
    pub end: u32,
    pub dest_start: u32,
}

impl RemapRange {
    pub fn identity(start: u32, end: u32) -> Self {
        RemapRange { start, end, dest_start: start }
    }

    pub fn single(cp: u32, dest: u32) -> Self {
        RemapRange { start: cp, end: cp, dest_start: dest }
    }
}

/// Sparse folded-codepoint table. Entries pack the folded codepoint in
/// the low 24 bits and class flags in the high byte; zero means the
/// codepoint is a separator.
///
/// `clone()` shares chunk storage (the per-query tokenizer path);
/// mutation copies the touched chunk, so a shared clone never observes
/// another session's remaps.
#[derive(Clone)]
pub struct Lowercaser {
    chunks: Vec<Option<Arc<[u32; CHUNK_SIZE]>>>,
}

impl Lowercaser {
    pub fn new() -> Self {
        Lowercaser { chunks: vec![None; CHUNK_COUNT] }
    }

    /// The stock single-byte charset: ascii letters and digits plus
    /// underscore, latin-1 letters folded to lowercase.
    pub fn default_latin() -> Self {
        let mut table = Lowercaser::new();
        table.add_remap(&[
            RemapRange::identity('a' as u32, 'z' as u32),
            RemapRange { start: 'A' as u32, end: 'Z' as u32, dest_start: 'a' as u32 },
            RemapRange::identity('0' as u32, '9' as u32),
            RemapRange::single('_' as u32, '_' as u32),
            RemapRange::identity(0x00E0, 0x00F6),
            RemapRange::identity(0x00F8, 0x00FF),
            RemapRange { start: 0x00C0, end: 0x00D6, dest_start: 0x00E0 },
            RemapRange { start: 0x00D8, end: 0x00DE, dest_start: 0x00F8 },
        ], 0).expect("stock charset is in range");
        table
    }

    fn chunk_mut(&mut self, cp: u32) -> &mut [u32; CHUNK_SIZE] {
        let idx = (cp as usize) / CHUNK_SIZE;
        let slot = &mut self.chunks[idx];
        if slot.is_none() {
            *slot = Some(Arc::new([0u32; CHUNK_SIZE]));
        }
        Arc::make_mut(slot.as_mut().unwrap())
    }

    /// Merge ranges into the table, OR-ing `flags` onto existing
    /// entries. Control characters are refused; codepoints past the
    /// table end are clamped with a warning.
    pub fn add_remap(&mut self, ranges: &[RemapRange], flags: u32) -> Result<()> {
        for range in ranges {
            if range.start < 0x20 || range.dest_start < 0x20 {
                return Err(Error::config(format!(
                    "cannot remap control codepoint U+{:04X}", range.start.min(range.dest_start))));
            }
            if range.end < range.start {
                return Err(Error::config("remap range end precedes start"));
            }
            let mut end = range.end;
            if end >= TABLE_SIZE {
                log::warn!("remap range U+{:04X}..U+{:04X} clamped to table end", range.start, range.end);
                end = TABLE_SIZE - 1;
            }
            for cp in range.start..=end {
                let dest = range.dest_start + (cp - range.start);
                let entry = &mut self.chunk_mut(cp)[(cp as usize) % CHUNK_SIZE];
                let kept_flags = *entry & FLAGS_MASK;
                *entry = (dest & CODEPOINT_MASK) | kept_flags | (flags & FLAGS_MASK);
            }
        }
        Ok(())
    }

    /// Flag existing entries (or create flag-only entries folding to
    /// themselves) for the given ranges.
    pub fn add_flags(&mut self, ranges: &[RemapRange], flags: u32) -> Result<()> {
        let identity: Vec<RemapRange> = ranges.iter()
            .map(|r| RemapRange { start: r.start, end: r.end, dest_start: r.start })
            .collect();
        self.add_remap(&identity, flags)
    }

    /// Folded codepoint plus flags; (0, 0) for separators.
    pub fn tolower(&self, cp: u32) -> (u32, u32) {
        if cp >= TABLE_SIZE {
            return (0, 0);
        }
        let entry = match &self.chunks[(cp as usize) / CHUNK_SIZE] {
            Some(chunk) => chunk[(cp as usize) % CHUNK_SIZE],
            None => 0,
        };
        (entry & CODEPOINT_MASK, entry & FLAGS_MASK)
    }

    /// Deep copy with private chunk storage (the indexer path).
    pub fn heavy_clone(&self) -> Self {
        Lowercaser {
            chunks: self.chunks.iter()
                .map(|slot| slot.as_ref().map(|chunk| Arc::new(**chunk)))
                .collect(),
        }
    }

    /// FNV-1a over the populated chunks; detects incompatible table
    /// reuse across index generations.
    pub fn fingerprint(&self) -> u64 {
        let mut hash = 0xcbf29ce484222325u64;
        let mut fnv = |byte: u8| {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        };
        for (idx, slot) in self.chunks.iter().enumerate() {
            let Some(chunk) = slot else { continue };
            for byte in (idx as u32).to_le_bytes() {
                fnv(byte);
            }
            for &entry in chunk.iter() {
                for byte in entry.to_le_bytes() {
                    fnv(byte);
                }
            }
        }
        hash
    }
}

impl Default for Lowercaser {
    fn default() -> Self {
        Self::default_latin()
    }
}
