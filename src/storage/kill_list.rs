use std::sync::Arc;

use roaring::RoaringTreemap;

use crate::core::config::ThrottleConfig;
use crate::core::error::{Error, Result};
use crate::core::types::DocId;
use crate::io::reader::SliceReader;
use crate::io::throttle::IoStats;
use crate::io::writer::FileWriter;
use crate::mmap::mmap_file::MmapFile;

/// Doc ids whose matches from this index are suppressed when the index
/// participates in a federated query. Sorted u64 array on disk, bitmap
/// in memory.
#[derive(Debug, Clone, Default)]
pub struct KillList {
    pub docs: RoaringTreemap,
}

impl KillList {
    pub fn new() -> Self {
        KillList::default()
    }

    pub fn from_docs(docs: impl IntoIterator<Item = DocId>) -> Self {
        let mut list = KillList::new();
        for doc in docs {
            list.docs.insert(doc.0);
        }
        list
    }

    pub fn len(&self) -> u64 {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn insert(&mut self, doc_id: DocId) {
        self.docs.insert(doc_id.0);
    }

    pub fn contains(&self, doc_id: DocId) -> bool {
        self.docs.contains(doc_id.0)
    }

    pub fn union_with(&mut self, other: &KillList) {
        self.docs |= &other.docs;
    }

    /// Write the sorted array; the bitmap already iterates ascending.
    pub fn save(&self, writer: &mut FileWriter) -> Result<()> {
        let mut last = None;
        for doc in self.docs.iter() {
            debug_assert!(last.map_or(true, |prev| prev < doc));
            writer.write_u64(doc)?;
            last = Some(doc);
        }
        Ok(())
    }

    pub fn load(map: &MmapFile) -> Result<Self> {
        let data = map.data();
        if data.len() % 8 != 0 {
            return Err(Error::corrupt(format!("{}: kill list size not a multiple of 8", map.path.display())));
        }
        let mut reader = SliceReader::new(data);
        let mut list = KillList::new();
        let mut last = 0u64;
        let mut first = true;
        while !reader.eof() {
            let doc = reader.read_u64()?;
            if !first && doc <= last {
                return Err(Error::corrupt("kill list is not strictly ascending"));
            }
            list.docs.insert(doc);
            last = doc;
            first = false;
        }
        Ok(list)
    }

    pub fn save_to(&self, path: &std::path::Path, write_buffer: usize, throttle: ThrottleConfig, stats: Arc<IoStats>) -> Result<()> {
        let mut writer = FileWriter::create(path, write_buffer, throttle, stats)?;
        self.save(&mut writer)?;
        writer.finish()
    }
}
