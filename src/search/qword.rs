use crate::core::config::HitFormat;
use crate::core::error::Result;
use crate::core::types::{DocId, Hitpos};
use crate::index::skiplist::{read_skiplist, skiplist_entry_count, SkipEntry};
use crate::io::reader::SliceReader;
use crate::search::wordlist::WordlistEntry;

/// Streams one word's doclist and hitlist off the mapped files.
/// Created per query term, thrown away afterwards.
pub struct PostingReader<'a> {
    doclist: SliceReader<'a>,
    hitlist_data: &'a [u8],
    skiplist_data: Option<&'a [u8]>,
    pub entry: WordlistEntry,
    hit_format: HitFormat,
    pub hitless: bool,
    inline_words: usize,
    min_row: Vec<u32>,

    last_doc_id: u64,
    last_hitlist_pos: u64,
    docs_left: u32,
    /// Last doc yielded; None before the first decode and after the
    /// terminator.
    pub cur_doc: Option<DocId>,

    /// Current doc facts, valid after a Some from get_next_doc.
    pub hitlist_pos: u64,
    pub doc_hits: u32,
    pub field_mask: u64,
    pub has_hitlist: bool,
    pub inline_attrs: Vec<u32>,
    inline_pos: Option<u32>,
    inline_served: bool,
    hit_cursor: usize,
    hit_last: u32,

    /// Doclist records decoded; the skip-seek tests watch this.
    pub doclist_reads: u64,

    skiplist: Option<Vec<SkipEntry>>,
}

impl<'a> PostingReader<'a> {
    pub fn new(
        doclist_data: &'a [u8],
        hitlist_data: &'a [u8],
        skiplist_data: Option<&'a [u8]>,
        entry: WordlistEntry,
        hit_format: HitFormat,
        hitless: bool,
        inline_min_row: Option<&[u32]>,
    ) -> Self {
        let doclist = SliceReader::at(doclist_data, entry.doclist_offset as usize);
        let (inline_words, min_row) = match inline_min_row {
            Some(row) => (row.len(), row.to_vec()),
            None => (0, Vec::new()),
        };
        PostingReader {
            doclist,
            hitlist_data,
            skiplist_data,
            docs_left: entry.docs,
            entry,
            hit_format,
            hitless,
            inline_words,
            min_row,
            last_doc_id: 0,
            last_hitlist_pos: 0,
            cur_doc: None,
            hitlist_pos: 0,
            doc_hits: 0,
            field_mask: 0,
            has_hitlist: false,
            inline_attrs: Vec::new(),
            inline_pos: None,
            inline_served: false,
            hit_cursor: 0,
            hit_last: 0,
            doclist_reads: 0,
            skiplist: None,
        }
    }

    /// Raw decoder state (delta-base doc id, doclist cursor, hitlist
    /// delta base); the checker snapshots this at block boundaries to
    /// cross-validate the skip list.
    pub fn decoder_state(&self) -> (u64, u64, u64) {
        (self.last_doc_id, self.doclist.pos() as u64, self.last_hitlist_pos)
    }

    /// Decode the next doclist record; None at the terminating zero.
    pub fn get_next_doc(&mut self) -> Result<Option<DocId>> {
        let delta = self.doclist.unzip_u64()?;
        self.doclist_reads += 1;
        if delta == 0 {
            self.cur_doc = None;
            return Ok(None);
        }
        let doc_id = self.last_doc_id + delta;
        self.last_doc_id = doc_id;

        if self.inline_words > 0 {
            self.inline_attrs.clear();
            for i in 0..self.inline_words {
                let coded = self.doclist.unzip_u32()?;
                self.inline_attrs.push(coded + self.min_row[i]);
            }
        }

        let count = self.doclist.unzip_u32()?;
        self.inline_pos = None;
        if self.hitless {
            self.field_mask = self.doclist.unzip_u64()?;
            self.doc_hits = count;
            self.has_hitlist = false;
        } else if self.hit_format == HitFormat::Inline && count == 1 {
            let field = self.doclist.unzip_u32()?;
            let packed = self.doclist.unzip_u32()?;
            self.field_mask = 1u64 << (field as u64 & 63);
            self.inline_pos = Some(packed);
            self.doc_hits = 1;
            self.has_hitlist = false;
        } else {
            self.field_mask = self.doclist.unzip_u64()?;
            let hit_delta = self.doclist.unzip_u64()?;
            self.hitlist_pos = self.last_hitlist_pos + hit_delta;
            self.last_hitlist_pos = self.hitlist_pos;
            self.doc_hits = count;
            self.has_hitlist = true;
        }
        self.docs_left = self.docs_left.saturating_sub(1);
        self.cur_doc = Some(DocId(doc_id));
        Ok(Some(DocId(doc_id)))
    }

    /// Position the hit stream at the current doc.
    pub fn seek_hitlist(&mut self) {
        self.inline_served = false;
        self.hit_cursor = self.hitlist_pos as usize;
        self.hit_last = 0;
    }

    /// Next position of the current doc; None past the terminator.
    pub fn get_next_hit(&mut self) -> Result<Option<Hitpos>> {
        if let Some(packed) = self.inline_pos {
            if self.inline_served {
                return Ok(None);
            }
            self.inline_served = true;
            return Ok(Some(Hitpos(packed)));
        }
        if !self.has_hitlist {
            return Ok(None);
        }
        let mut reader = SliceReader::at(self.hitlist_data, self.hit_cursor);
        let delta = reader.unzip_u32()?;
        self.hit_cursor = reader.pos();
        if delta == Hitpos::EMPTY.0 {
            return Ok(None);
        }
        self.hit_last += delta;
        Ok(Some(Hitpos(self.hit_last)))
    }

    fn load_skiplist(&mut self) -> Result<Option<&[SkipEntry]>> {
        if self.skiplist.is_none() {
            let (Some(data), Some(offset)) = (self.skiplist_data, self.entry.skiplist_offset) else {
                return Ok(None);
            };
            let entries = read_skiplist(
                data,
                offset,
                skiplist_entry_count(self.entry.docs),
                self.entry.doclist_offset,
            )?;
            self.skiplist = Some(entries);
        }
        Ok(self.skiplist.as_deref())
    }

    /// Seek to the first doc with id >= target, through the skip list
    /// when one exists. A current doc already at or past the target
    /// is returned as-is (leapfrog intersection relies on that).
    /// Returns None when the list ends first.
    pub fn skip_to(&mut self, target: DocId) -> Result<Option<DocId>> {
        if let Some(cur) = self.cur_doc {
            if cur >= target {
                return Ok(Some(cur));
            }
        }
        let jump = match self.load_skiplist()? {
            Some(entries) => {
                // Highest saved state strictly before the target
                let idx = entries.partition_point(|e| e.base_doc_id.0 < target.0);
                if idx > 0 { Some(entries[idx - 1]) } else { None }
            }
            None => None,
        };
        if let Some(jump) = jump {
            if jump.base_doc_id.0 > self.last_doc_id {
                self.doclist.seek(jump.doclist_offset as usize);
                self.last_doc_id = jump.base_doc_id.0;
                self.last_hitlist_pos = jump.base_hitlist_pos;
            }
        }
        loop {
            match self.get_next_doc()? {
                None => return Ok(None),
                Some(doc_id) if doc_id >= target => return Ok(Some(doc_id)),
                Some(_) => {}
            }
        }
    }
}
