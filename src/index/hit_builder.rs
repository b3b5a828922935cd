use std::collections::HashSet;

use crate::core::config::HitFormat;
use crate::core::error::Result;
use crate::core::types::{DocId, Hit, Hitpos, WordId};
use crate::dict::writer::{
    CrcDictWriter, DictEntry, DictFileInfo, KeywordsDictWriter, SKIPLIST_DOC_THRESH,
};
use crate::index::infix::{InfixBuilder, InfixFileInfo};
use crate::index::skiplist::{SkipEntry, SkiplistWriter, SKIPLIST_BLOCK};
use crate::io::writer::FileWriter;

/// Which words get their positions dropped at build time.
#[derive(Debug, Default)]
pub struct HitlessSet {
    pub all: bool,
    pub ids: HashSet<WordId>,
    pub texts: HashSet<Vec<u8>>,
}

impl HitlessSet {
    pub fn is_hitless(&self, word_id: WordId, keyword: Option<&[u8]>) -> bool {
        if self.all {
            return true;
        }
        if self.ids.contains(&word_id) {
            return true;
        }
        keyword.map_or(false, |text| self.texts.contains(text))
    }
}

pub enum DictWriterKind {
    Crc(CrcDictWriter),
    Keywords(KeywordsDictWriter),
}

impl DictWriterKind {
    fn add(&mut self, writer: &mut FileWriter, entry: &DictEntry) -> Result<()> {
        match self {
            DictWriterKind::Crc(w) => w.add(writer, entry),
            DictWriterKind::Keywords(w) => w.add(writer, entry),
        }
    }

    fn checkpoint_count(&self) -> u32 {
        match self {
            DictWriterKind::Crc(w) => w.checkpoint_count(),
            DictWriterKind::Keywords(w) => w.checkpoint_count(),
        }
    }

    fn finish(self, writer: &mut FileWriter) -> Result<DictFileInfo> {
        let (info, _) = match self {
            DictWriterKind::Crc(w) => w.finish(writer)?,
            DictWriterKind::Keywords(w) => w.finish(writer)?,
        };
        Ok(info)
    }
}

/// Everything the header needs from a finished posting pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct HitBuilderOutput {
    pub dict_info: DictFileInfo,
    pub infix_info: InfixFileInfo,
    pub total_hits: u64,
}

/// Consumes the globally sorted hit stream and emits the doclist,
/// hitlist, skip lists and dictionary entries. One instance per build
/// or merge.
pub struct HitBuilder {
    doclist: FileWriter,
    hitlist: FileWriter,
    skiplist: SkiplistWriter,
    dict_file: FileWriter,
    dict_writer: Option<DictWriterKind>,
    infix: Option<InfixBuilder>,
    hit_format: HitFormat,
    hitless: HitlessSet,

    // inline docinfo: attribute words per row and the per-attr minimums
    inline_words: usize,
    min_row: Vec<u32>,

    // current word
    cur_word: Option<WordId>,
    cur_keyword: Option<Vec<u8>>,
    word_doclist_start: u64,
    word_docs: u32,
    word_hits: u64,
    word_hitless: bool,
    last_doc_id: u64,
    last_hitlist_pos: u64,
    skip_entries: Vec<SkipEntry>,

    // current doc
    doc_open: bool,
    doc_id: DocId,
    doc_hit_count: u32,
    doc_field_mask: u64,
    doc_hitlist_start: u64,
    doc_last_pos: u32,
    doc_written_last: u32,
    first_hit: Option<Hitpos>,
    doc_attrs: Vec<u32>,

    total_hits: u64,
}

impl HitBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        doclist: FileWriter,
        hitlist: FileWriter,
        skiplist: SkiplistWriter,
        dict_file: FileWriter,
        dict_writer: DictWriterKind,
        infix: Option<InfixBuilder>,
        hit_format: HitFormat,
        hitless: HitlessSet,
        inline_min_row: Option<Vec<u32>>,
    ) -> Self {
        let (inline_words, min_row) = match inline_min_row {
            Some(row) => (row.len(), row),
            None => (0, Vec::new()),
        };
        HitBuilder {
            doclist,
            hitlist,
            skiplist,
            dict_file,
            dict_writer: Some(dict_writer),
            infix,
            hit_format,
            hitless,
            inline_words,
            min_row,
            cur_word: None,
            cur_keyword: None,
            word_doclist_start: 0,
            word_docs: 0,
            word_hits: 0,
            word_hitless: false,
            last_doc_id: 0,
            last_hitlist_pos: 0,
            skip_entries: Vec::new(),
            doc_open: false,
            doc_id: DocId(0),
            doc_hit_count: 0,
            doc_field_mask: 0,
            doc_hitlist_start: 0,
            doc_last_pos: 0,
            doc_written_last: 0,
            first_hit: None,
            doc_attrs: Vec::new(),
            total_hits: 0,
        }
    }

    /// Feed one aggregate hit. The stream must arrive in posting
    /// order; `keyword` rides along in keywords mode, `attrs` when the
    /// docinfo is inline.
    pub fn hit(&mut self, hit: Hit, keyword: Option<&[u8]>, attrs: Option<&[u32]>) -> Result<()> {
        if self.cur_word != Some(hit.word_id) {
            self.end_word()?;
            self.begin_word(hit.word_id, keyword);
        }
        if !self.doc_open || self.doc_id != hit.doc_id {
            self.end_doc()?;
            self.begin_doc(hit.doc_id, attrs);
        }

        let field_bit = 1u64 << (hit.pos.field() as u64 & 63);
        if self.word_hitless {
            self.doc_field_mask |= field_bit;
            self.doc_hit_count += 1;
            self.total_hits += 1;
            return Ok(());
        }

        // Collapse duplicate positions
        if self.doc_hit_count > 0 && hit.pos.0 == self.doc_last_pos {
            return Ok(());
        }

        if self.doc_hit_count == 0 {
            // Hold the first hit back: it may end up inlined
            self.first_hit = Some(hit.pos);
        } else {
            if self.doc_hit_count == 1 {
                let first = self.first_hit.take().unwrap();
                self.hitlist.zip_u32(first.0)?;
                self.doc_written_last = first.0;
            }
            self.hitlist.zip_u32(hit.pos.0 - self.doc_written_last)?;
            self.doc_written_last = hit.pos.0;
        }
        self.doc_field_mask |= field_bit;
        self.doc_last_pos = hit.pos.0;
        self.doc_hit_count += 1;
        self.total_hits += 1;
        Ok(())
    }

    /// Pre-aggregated entry for a hitless word: mask and count arrive
    /// already collapsed (the merge path reads them that way).
    pub fn hit_aggregate(
        &mut self,
        word_id: WordId,
        keyword: Option<&[u8]>,
        doc_id: DocId,
        field_mask: u64,
        count: u32,
    ) -> Result<()> {
        if self.cur_word != Some(word_id) {
            self.end_word()?;
            self.begin_word(word_id, keyword);
            self.word_hitless = true;
        }
        if !self.doc_open || self.doc_id != doc_id {
            self.end_doc()?;
            self.begin_doc(doc_id, None);
        }
        self.doc_field_mask |= field_mask;
        self.doc_hit_count += count;
        self.total_hits += count as u64;
        Ok(())
    }

    fn begin_word(&mut self, word_id: WordId, keyword: Option<&[u8]>) {
        self.cur_word = Some(word_id);
        self.cur_keyword = keyword.map(|k| k.to_vec());
        self.word_doclist_start = self.doclist.pos();
        self.word_docs = 0;
        self.word_hits = 0;
        self.last_doc_id = 0;
        self.last_hitlist_pos = 0;
        self.skip_entries.clear();
        self.word_hitless = self.hitless.is_hitless(word_id, keyword);
    }

    fn begin_doc(&mut self, doc_id: DocId, attrs: Option<&[u32]>) {
        if self.word_docs % SKIPLIST_BLOCK == 0 {
            // Decoder state just before this doc's record
            self.skip_entries.push(SkipEntry {
                base_doc_id: DocId(self.last_doc_id),
                doclist_offset: self.doclist.pos(),
                base_hitlist_pos: self.last_hitlist_pos,
            });
        }
        self.doc_open = true;
        self.doc_id = doc_id;
        self.doc_hit_count = 0;
        self.doc_field_mask = 0;
        self.doc_hitlist_start = self.hitlist.pos();
        self.doc_last_pos = 0;
        self.doc_written_last = 0;
        self.first_hit = None;
        self.doc_attrs.clear();
        if let Some(attrs) = attrs {
            self.doc_attrs.extend_from_slice(attrs);
        }
    }

    fn end_doc(&mut self) -> Result<()> {
        if !self.doc_open {
            return Ok(());
        }
        self.doclist.zip_u64(self.doc_id.0 - self.last_doc_id)?;
        if self.inline_words > 0 {
            // Inline rows code each value against the schema minimum
            for i in 0..self.inline_words {
                let value = self.doc_attrs.get(i).copied().unwrap_or(0);
                self.doclist.zip_u32(value - self.min_row[i])?;
            }
        }

        if self.word_hitless {
            self.doclist.zip_u32(self.doc_hit_count)?;
            self.doclist.zip_u64(self.doc_field_mask)?;
        } else if self.doc_hit_count == 1 && self.hit_format == HitFormat::Inline {
            let first = self.first_hit.take().unwrap();
            self.doclist.zip_u32(1)?;
            self.doclist.zip_u32(first.field() as u32)?;
            self.doclist.zip_u32(first.0)?;
        } else {
            if self.doc_hit_count == 1 {
                let first = self.first_hit.take().unwrap();
                self.hitlist.zip_u32(first.0)?;
            }
            self.hitlist.zip_u32(Hitpos::EMPTY.0)?;
            self.doclist.zip_u32(self.doc_hit_count)?;
            self.doclist.zip_u64(self.doc_field_mask)?;
            self.doclist.zip_u64(self.doc_hitlist_start - self.last_hitlist_pos)?;
            self.last_hitlist_pos = self.doc_hitlist_start;
        }

        self.last_doc_id = self.doc_id.0;
        self.word_docs += 1;
        self.word_hits += self.doc_hit_count as u64;
        self.doc_open = false;
        Ok(())
    }

    fn end_word(&mut self) -> Result<()> {
        let Some(word_id) = self.cur_word.take() else { return Ok(()) };
        self.end_doc()?;
        // Zero delta terminates the word's doclist
        self.doclist.zip_u64(0)?;

        let skiplist_offset = if self.word_docs > SKIPLIST_DOC_THRESH && !self.word_hitless {
            Some(self.skiplist.write_word(&self.skip_entries[1..], self.word_doclist_start)?)
        } else {
            None
        };

        let entry = DictEntry {
            word_id,
            keyword: self.cur_keyword.take(),
            doclist_offset: self.word_doclist_start,
            doclist_len: self.doclist.pos() - self.word_doclist_start,
            docs: self.word_docs,
            hits: self.word_hits.min(u32::MAX as u64) as u32,
            skiplist_offset,
        };
        let dict_writer = self.dict_writer.as_mut().unwrap();
        dict_writer.add(&mut self.dict_file, &entry)?;

        if let Some(infix) = &mut self.infix {
            if let Some(keyword) = &entry.keyword {
                let checkpoint = dict_writer.checkpoint_count().saturating_sub(1);
                infix.register(keyword, checkpoint);
            }
        }
        Ok(())
    }

    /// Close the last word, flush the dictionary, infixes and tail,
    /// and sync everything.
    pub fn finish(mut self) -> Result<HitBuilderOutput> {
        self.end_word()?;

        let dict_info = self.dict_writer.take().unwrap().finish(&mut self.dict_file)?;
        let infix_info = match self.infix.take() {
            Some(infix) => infix.finish(&mut self.dict_file)?,
            None => InfixFileInfo::default(),
        };
        crate::dict::writer::write_dict_tail(
            &mut self.dict_file,
            dict_info,
            infix_info.blocks_offset,
            infix_info.hash_size,
        )?;

        self.doclist.finish()?;
        self.hitlist.finish()?;
        self.skiplist.finish()?;
        self.dict_file.finish()?;

        Ok(HitBuilderOutput {
            dict_info,
            infix_info,
            total_hits: self.total_hits,
        })
    }
}
