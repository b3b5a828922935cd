use serde::{Serialize, Deserialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::error::{Error, Result};

/// Document identifier. 0 is reserved, MAX is the end-of-stream sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocId(pub u64);

impl DocId {
    pub const MAX: DocId = DocId(u64::MAX);

    pub fn new(id: u64) -> Self {
        DocId(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for DocId {
    fn from(id: u64) -> Self {
        DocId(id)
    }
}

/// Word identifier. A folded-token hash in crc mode, a dense arena
/// offset in keywords mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WordId(pub u64);

impl WordId {
    pub const STOPWORD: WordId = WordId(0);

    pub fn value(&self) -> u64 {
        self.0
    }
}

const FIELD_SHIFT: u32 = 24;
const FIELD_END_BIT: u32 = 1 << 23;
const POS_MASK: u32 = FIELD_END_BIT - 1;

/// Packed in-document hit position: field index in the high byte,
/// end-of-field marker at bit 23, 1-based in-field position below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hitpos(pub u32);

impl Hitpos {
    pub const EMPTY: Hitpos = Hitpos(0);

    pub fn pack(field: u8, pos: u32) -> Self {
        Hitpos(((field as u32) << FIELD_SHIFT) | (pos & POS_MASK))
    }

    pub fn field(&self) -> u8 {
        (self.0 >> FIELD_SHIFT) as u8
    }

    pub fn pos(&self) -> u32 {
        self.0 & POS_MASK
    }

    pub fn is_field_end(&self) -> bool {
        self.0 & FIELD_END_BIT != 0
    }

    pub fn with_field_end(&self) -> Self {
        Hitpos(self.0 | FIELD_END_BIT)
    }
}

/// One raw posting triplet produced by hit collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub word_id: WordId,
    pub doc_id: DocId,
    pub pos: Hitpos,
}

impl Hit {
    /// Sort key for the external sorter: word, then doc, then position.
    pub fn cmp_key(&self) -> (u64, u64, u32) {
        (self.word_id.0, self.doc_id.0, self.pos.0)
    }
}

/// Cooperative cancellation flag shared between an operation and its caller.
/// Inner loops poll it at least every 1000 iterations.
#[derive(Clone, Default)]
pub struct StopFlag {
    stopped: Arc<AtomicBool>,
}

impl StopFlag {
    pub fn new() -> Self {
        StopFlag { stopped: Arc::new(AtomicBool::new(false)) }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(Error::interrupted());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hitpos_packing() {
        let hit = Hitpos::pack(3, 17);
        assert_eq!(hit.field(), 3);
        assert_eq!(hit.pos(), 17);
        assert!(!hit.is_field_end());

        let closed = hit.with_field_end();
        assert!(closed.is_field_end());
        assert_eq!(closed.field(), 3);
        assert_eq!(closed.pos(), 17);
    }

    #[test]
    fn test_hitpos_ordering_within_doc() {
        // Same field: position decides; later field always sorts higher
        assert!(Hitpos::pack(0, 5) < Hitpos::pack(0, 6));
        assert!(Hitpos::pack(0, 9999) < Hitpos::pack(1, 1));
    }

    #[test]
    fn test_stop_flag() {
        let flag = StopFlag::new();
        assert!(flag.check().is_ok());
        flag.stop();
        assert!(flag.check().is_err());
    }
}
