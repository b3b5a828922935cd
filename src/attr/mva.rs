use parking_lot::Mutex;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::DocId;
use crate::io::writer::FileWriter;

/// High bit of a row's MVA slot: the value is an offset into the
/// in-memory arena, not into `.spm`.
pub const MVA_ARENA_FLAG: u32 = 0x8000_0000;

/// `.spm` layout: one reserved zero word, then per doc with any MVA
/// values: docid (two words), then per mva attribute a count word and
/// the values (one word each for uint32 sets, two for int64 sets).
/// Rows point at the count word, in u32-word units; zero means empty.
pub struct MvaSidecarWriter<'a> {
    writer: &'a mut FileWriter,
    words_written: u64,
}

impl<'a> MvaSidecarWriter<'a> {
    pub fn begin(writer: &'a mut FileWriter) -> Result<Self> {
        writer.write_u32(0)?;
        Ok(MvaSidecarWriter { writer, words_written: 1 })
    }

    /// Append one document's lists; `lists` is (is_64bit, sorted
    /// values) per mva attribute in schema order. Returns the row
    /// offset for each attribute.
    pub fn append_doc(&mut self, doc_id: DocId, lists: &[(bool, &[u64])]) -> Result<Vec<u32>> {
        if lists.iter().all(|(_, values)| values.is_empty()) {
            return Ok(vec![0; lists.len()]);
        }
        self.writer.write_u32(doc_id.0 as u32)?;
        self.writer.write_u32((doc_id.0 >> 32) as u32)?;
        self.words_written += 2;

        let mut offsets = Vec::with_capacity(lists.len());
        for &(is_64bit, values) in lists {
            if self.words_written > u32::MAX as u64 {
                return Err(Error::new(ErrorKind::Budget, "mva sidecar over 16 GiB".to_string()));
            }
            offsets.push(self.words_written as u32);
            let value_words = if is_64bit { values.len() * 2 } else { values.len() };
            self.writer.write_u32(value_words as u32)?;
            self.words_written += 1;
            let mut last = None;
            for &value in values {
                debug_assert!(last.map_or(true, |prev| prev < value), "mva values must ascend");
                last = Some(value);
                self.writer.write_u32(value as u32)?;
                self.words_written += 1;
                if is_64bit {
                    self.writer.write_u32((value >> 32) as u32)?;
                    self.words_written += 1;
                }
            }
        }
        Ok(offsets)
    }

    pub fn words_written(&self) -> u64 {
        self.words_written
    }
}

fn word_at(data: &[u8], word: u32) -> Result<u32> {
    let at = word as usize * 4;
    let raw = data.get(at..at + 4)
        .ok_or_else(|| Error::corrupt(format!("mva offset {} past sidecar end", word)))?;
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

/// Decode the value list at a row offset in the mapped sidecar.
pub fn read_values(data: &[u8], offset: u32, is_64bit: bool) -> Result<Vec<u64>> {
    if offset == 0 {
        return Ok(Vec::new());
    }
    let value_words = word_at(data, offset)?;
    let mut values = Vec::new();
    let mut word = offset + 1;
    let end = offset + 1 + value_words;
    while word < end {
        let low = word_at(data, word)?;
        if is_64bit {
            let high = word_at(data, word + 1)?;
            values.push((low as u64) | ((high as u64) << 32));
            word += 2;
        } else {
            values.push(low as u64);
            word += 1;
        }
    }
    Ok(values)
}

/// A generation-tagged reference into the update arena. The tag is
/// validated on every dereference, so a reader holding a handle to a
/// freed slot gets None instead of someone else's values. Keeping the
/// handle from outliving an index rotation is the caller's job (the
/// index handle is ref-counted above this layer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaHandle {
    pub gen: u16,
    pub off: u32,
}

impl ArenaHandle {
    /// Row-slot encoding: flag bit plus the 31-bit word offset.
    pub fn to_slot(&self) -> u32 {
        MVA_ARENA_FLAG | self.off
    }

    pub fn from_slot(slot: u32) -> Option<u32> {
        if slot & MVA_ARENA_FLAG != 0 {
            Some(slot & !MVA_ARENA_FLAG)
        } else {
            None
        }
    }
}

struct ArenaInner {
    words: Vec<u32>,
    limit_words: usize,
    free_lists: std::collections::HashMap<u32, Vec<u32>>,
    next_gen: u16,
}

/// In-memory storage for live-updated MVA lists. Slot layout:
/// `[gen | capacity<<16] [count] [values...]`.
pub struct MvaArena {
    inner: Mutex<ArenaInner>,
}

const SLOT_HEADER_WORDS: usize = 2;

impl MvaArena {
    pub fn new(limit_bytes: usize) -> Self {
        MvaArena {
            inner: Mutex::new(ArenaInner {
                words: Vec::new(),
                limit_words: limit_bytes / 4,
                free_lists: std::collections::HashMap::new(),
                next_gen: 1,
            }),
        }
    }

    /// Allocate a slot for `value_words` words and fill it. Fails with
    /// OutOfPool when the arena limit would be crossed.
    pub fn alloc(&self, values: &[u32]) -> Result<ArenaHandle> {
        let capacity = values.len() as u32;
        let mut inner = self.inner.lock();

        let gen = inner.next_gen;
        inner.next_gen = inner.next_gen.wrapping_add(1).max(1);

        let off = match inner.free_lists.get_mut(&capacity).and_then(|list| list.pop()) {
            Some(off) => off,
            None => {
                let needed = SLOT_HEADER_WORDS + capacity as usize;
                if inner.words.len() + needed > inner.limit_words {
                    return Err(Error::new(ErrorKind::OutOfPool, "mva arena exhausted".to_string()));
                }
                let off = inner.words.len() as u32;
                let new_len = inner.words.len() + needed;
                inner.words.resize(new_len, 0);
                off
            }
        };

        let at = off as usize;
        inner.words[at] = gen as u32 | (capacity << 16);
        inner.words[at + 1] = capacity;
        inner.words[at + SLOT_HEADER_WORDS..at + SLOT_HEADER_WORDS + values.len()]
            .copy_from_slice(values);
        Ok(ArenaHandle { gen, off })
    }

    /// Read through a raw row slot offset; None when the slot is not
    /// live (freed or never allocated). Rows cannot carry the
    /// generation, so this validates liveness only — the full
    /// generation check needs the typed handle.
    pub fn read_slot(&self, off: u32) -> Option<Vec<u32>> {
        let inner = self.inner.lock();
        let at = off as usize;
        let header = *inner.words.get(at)?;
        if header & 0xFFFF == 0 {
            return None;
        }
        let count = *inner.words.get(at + 1)? as usize;
        inner.words.get(at + SLOT_HEADER_WORDS..at + SLOT_HEADER_WORDS + count)
            .map(|slice| slice.to_vec())
    }

    /// Read the slot, or None when the generation no longer matches.
    pub fn read(&self, handle: ArenaHandle) -> Option<Vec<u32>> {
        let inner = self.inner.lock();
        let at = handle.off as usize;
        let header = *inner.words.get(at)?;
        if (header & 0xFFFF) as u16 != handle.gen {
            return None;
        }
        let count = *inner.words.get(at + 1)? as usize;
        inner.words.get(at + SLOT_HEADER_WORDS..at + SLOT_HEADER_WORDS + count)
            .map(|slice| slice.to_vec())
    }

    /// Current generation of a slot, if it is live.
    pub fn slot_gen(&self, off: u32) -> Option<u16> {
        let inner = self.inner.lock();
        let header = *inner.words.get(off as usize)?;
        let gen = (header & 0xFFFF) as u16;
        if gen == 0 { None } else { Some(gen) }
    }

    /// Retire the slot: bump its generation and recycle the space.
    pub fn free(&self, handle: ArenaHandle) {
        let mut inner = self.inner.lock();
        let at = handle.off as usize;
        let Some(&header) = inner.words.get(at) else { return };
        if (header & 0xFFFF) as u16 != handle.gen {
            return;
        }
        let capacity = header >> 16;
        inner.words[at] = capacity << 16;
        inner.free_lists.entry(capacity).or_default().push(handle.off);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ThrottleConfig;
    use crate::io::throttle::IoStats;
    use std::sync::Arc;

    #[test]
    fn test_sidecar_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx.spm");
        let mut writer = FileWriter::create(&path, 4096, ThrottleConfig::default(), Arc::new(IoStats::default())).unwrap();

        let mut sidecar = MvaSidecarWriter::begin(&mut writer).unwrap();
        let offsets = sidecar.append_doc(DocId(9), &[
            (false, &[10, 20, 30][..]),
            (true, &[1u64 << 40][..]),
        ]).unwrap();
        let empty = sidecar.append_doc(DocId(10), &[(false, &[][..]), (true, &[][..])]).unwrap();
        writer.finish().unwrap();

        assert_eq!(empty, vec![0, 0]);
        let data = std::fs::read(&path).unwrap();
        assert_eq!(read_values(&data, offsets[0], false).unwrap(), vec![10, 20, 30]);
        assert_eq!(read_values(&data, offsets[1], true).unwrap(), vec![1u64 << 40]);
        assert_eq!(read_values(&data, 0, false).unwrap(), Vec::<u64>::new());
    }

    #[test]
    fn test_arena_round_trip_and_free() {
        let arena = MvaArena::new(1024);
        let handle = arena.alloc(&[5, 6, 7]).unwrap();
        assert_eq!(arena.read(handle), Some(vec![5, 6, 7]));

        arena.free(handle);
        // Stale handle is refused after free
        assert_eq!(arena.read(handle), None);

        // The slot is recycled for a same-size allocation under a new gen
        let reused = arena.alloc(&[8, 9, 10]).unwrap();
        assert_eq!(reused.off, handle.off);
        assert_ne!(reused.gen, handle.gen);
        assert_eq!(arena.read(reused), Some(vec![8, 9, 10]));
    }

    #[test]
    fn test_arena_limit() {
        let arena = MvaArena::new(40);
        assert!(arena.alloc(&[1, 2, 3]).is_ok());
        let err = arena.alloc(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfPool);
    }

    #[test]
    fn test_slot_encoding() {
        let handle = ArenaHandle { gen: 3, off: 17 };
        let slot = handle.to_slot();
        assert_eq!(ArenaHandle::from_slot(slot), Some(17));
        assert_eq!(ArenaHandle::from_slot(17), None);
    }
}
