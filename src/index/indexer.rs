use std::collections::HashMap;
use std::sync::Arc;

use crate::attr::builder::RowPool;
use crate::attr::json::pack_json_str;
use crate::attr::minmax::AttrIndexBuilder;
use crate::attr::mva::MvaSidecarWriter;
use crate::attr::strings::StringHeapWriter;
use crate::core::config::{DocinfoKind, IndexConfig};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{DocId, Hit, Hitpos, StopFlag};
use crate::dict::dictionary::{CrcDict, Dictionary, DictSettings, KeywordsDict};
use crate::dict::writer::{CrcDictWriter, KeywordsDictWriter};
use crate::index::bin::{Bin, HitMerge};
use crate::index::hit_buffer::HitBuffer;
use crate::index::hit_builder::{DictWriterKind, HitBuilder, HitlessSet};
use crate::index::infix::InfixBuilder;
use crate::index::skiplist::SkiplistWriter;
use crate::analysis::bigram::{BigramFilter, BigramMode};
use crate::analysis::multiform::MultiformFilter;
use crate::analysis::tokenizer::{TokenSource, Tokenizer};
use crate::io::throttle::IoStats;
use crate::io::writer::FileWriter;
use crate::schema::schema::{AttrType, RowAccess, Schema, DOCID_ROW_WORDS};
use crate::storage::file_lock::IndexLock;
use crate::storage::fileset::{FileSet, IndexFile, TempGuard};
use crate::storage::header::{DictFlavor, IndexHeader, TokenizerSettingsDisk};
use crate::storage::kill_list::KillList;

/// Which words drop their positions, as configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HitlessMode {
    None,
    All,
    Words(Vec<String>),
}

/// One attribute value as handed in by a document source.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    None,
    Int(u64),
    Float(f32),
    Mva(Vec<u64>),
    Str(String),
    Json(String),
}

#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub doc_id: DocId,
    /// Text per full-text field, schema order.
    pub fields: Vec<String>,
    /// One value per schema attribute, schema order.
    pub attrs: Vec<AttrValue>,
}

/// The indexer's view of a document stream.
pub trait DocumentSource {
    fn next_document(&mut self) -> Result<Option<SourceDocument>>;

    /// Doc ids to suppress when this index joins a federation.
    fn kill_list(&mut self) -> Result<Vec<DocId>> {
        Ok(Vec::new())
    }
}

/// Canned source over a vector; embedders with real feeds implement
/// DocumentSource themselves.
pub struct VecSource {
    docs: std::vec::IntoIter<SourceDocument>,
    kill: Vec<DocId>,
}

impl VecSource {
    pub fn new(docs: Vec<SourceDocument>) -> Self {
        VecSource { docs: docs.into_iter(), kill: Vec::new() }
    }

    pub fn with_kill_list(mut self, kill: Vec<DocId>) -> Self {
        self.kill = kill;
        self
    }
}

impl DocumentSource for VecSource {
    fn next_document(&mut self) -> Result<Option<SourceDocument>> {
        Ok(self.docs.next())
    }

    fn kill_list(&mut self) -> Result<Vec<DocId>> {
        Ok(std::mem::take(&mut self.kill))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildProgress {
    pub documents: u64,
    pub hits: u64,
    pub bytes: u64,
}

#[derive(Debug, Default)]
pub struct BuildStats {
    pub documents: u64,
    pub hits: u64,
    pub bytes: u64,
    pub duplicates: u64,
    pub warnings: Vec<String>,
}

/// Everything a build needs beyond the document stream.
pub struct IndexerSettings {
    pub config: IndexConfig,
    pub schema: Schema,
    pub tokenizer: Tokenizer,
    pub bigram: Option<(BigramMode, Vec<String>)>,
    pub dict_flavor: DictFlavor,
    pub dict_settings: DictSettings,
    pub hitless: HitlessMode,
    pub strict_json: bool,
    pub index_field_lens: bool,
}

impl IndexerSettings {
    pub fn plain(schema: Schema) -> Self {
        IndexerSettings {
            config: IndexConfig::default(),
            schema,
            tokenizer: Tokenizer::new(
                crate::analysis::lowercaser::Lowercaser::default_latin(),
                crate::analysis::tokenizer::TokenizerOptions::default(),
            ),
            bigram: None,
            dict_flavor: DictFlavor::Keywords,
            dict_settings: DictSettings::plain(true),
            hitless: HitlessMode::None,
            strict_json: false,
            index_field_lens: false,
        }
    }
}

/// Selected attribute columns of the previous index generation,
/// copied forward on keep_attrs rebuilds.
struct KeptAttrs {
    rows: Vec<u32>,
    row_width: usize,
    hash: crate::core::disk_index::DocinfoHash,
    locators: Vec<crate::schema::schema::AttrLocator>,
}

impl KeptAttrs {
    fn load(
        files: &FileSet,
        schema: &Schema,
        keep_list: &[String],
        throttle: crate::core::config::ThrottleConfig,
        stats: Arc<IoStats>,
    ) -> Result<Self> {
        let mut header_reader = crate::io::reader::FileReader::open(
            files.path(IndexFile::Header), 64 * 1024, throttle, stats)?;
        let old_header = IndexHeader::load(&mut header_reader)?;
        if !old_header.schema.compatible_with(schema) {
            return Err(Error::schema("keep_attrs: previous generation schema differs"));
        }

        let raw = std::fs::read(files.path(IndexFile::Attrs))?;
        let rows: Vec<u32> = raw.chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let row_width = schema.row_width() as usize;
        let row_words = old_header.minmax_words_offset as usize;
        let rows = rows[..row_words.min(rows.len())].to_vec();

        // Offsets into sidecars do not survive a rebuild; only
        // fixed-width columns are carried forward
        let locators = schema.attrs.iter()
            .filter(|a| !a.attr_type.is_mva() && !a.attr_type.is_string_like())
            .filter(|a| keep_list.is_empty() || keep_list.iter().any(|k| *k == a.name))
            .map(|a| a.locator)
            .collect();

        let hash = crate::core::disk_index::DocinfoHash::build(&rows, row_width);
        Ok(KeptAttrs { rows, row_width, hash, locators })
    }

    fn copy_into(&self, doc_id: DocId, row: &mut [u32]) {
        let Some(old_idx) = self.hash.lookup(&self.rows, self.row_width, doc_id) else { return };
        let old_row = &self.rows[old_idx * self.row_width..(old_idx + 1) * self.row_width];
        for &locator in &self.locators {
            RowAccess::set_attr(row, locator, RowAccess::get_attr(old_row, locator));
        }
    }
}

/// Builds one on-disk index from a document stream. Owns every temp
/// file; any failure unlinks them and leaves the previous generation
/// untouched.
pub struct Indexer {
    pub settings: IndexerSettings,
    pub stop: StopFlag,
    progress: Option<Box<dyn FnMut(&BuildProgress)>>,
}

impl Indexer {
    pub fn new(settings: IndexerSettings) -> Self {
        Indexer { settings, stop: StopFlag::new(), progress: None }
    }

    pub fn with_progress(mut self, progress: Box<dyn FnMut(&BuildProgress)>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn make_dict(&self) -> Box<dyn Dictionary> {
        match self.settings.dict_flavor {
            DictFlavor::Crc => Box::new(CrcDict::new(self.settings.dict_settings.clone())),
            DictFlavor::Keywords => Box::new(KeywordsDict::new(self.settings.dict_settings.clone())),
        }
    }

    fn make_token_chain(&self) -> Box<dyn TokenSource> {
        let mut chain: Box<dyn TokenSource> = Box::new(self.settings.tokenizer.clone());
        let multiforms = self.settings.dict_settings.wordforms.multiforms();
        if !multiforms.is_empty() {
            chain = Box::new(MultiformFilter::new(chain, multiforms));
        }
        if let Some((mode, freq_words)) = &self.settings.bigram {
            chain = Box::new(BigramFilter::new(
                chain,
                mode.clone(),
                freq_words.iter().map(|w| w.as_bytes().to_vec()).collect(),
            ));
        }
        chain
    }

    fn make_hitless_set(&self, dict: &mut dyn Dictionary) -> HitlessSet {
        let mut set = HitlessSet::default();
        match &self.settings.hitless {
            HitlessMode::None => {}
            HitlessMode::All => set.all = true,
            HitlessMode::Words(words) => {
                for word in words {
                    let mut token = word.as_bytes().to_vec();
                    let id = dict.get_word_id(&mut token);
                    if id.0 != 0 {
                        set.ids.insert(id);
                        set.texts.insert(token);
                    }
                }
            }
        }
        set
    }

    /// Tokenize one field, assigning 1-based positions and the
    /// end-of-field marker, and feed the hits to the pool.
    fn index_field(
        chain: &mut dyn TokenSource,
        dict: &mut dyn Dictionary,
        hit_buffer: &mut HitBuffer,
        doc_id: DocId,
        field_idx: usize,
        text: &str,
        field_hits: &mut Vec<Hit>,
    ) -> Result<u64> {
        chain.set_text(text.as_bytes());
        field_hits.clear();
        let mut pos = 0u32;
        let mut tokens = 0u64;
        while let Some(token) = chain.next_token()? {
            if token.is_special {
                continue;
            }
            // Overshort tokens leave phrase gaps; blended wholes share
            // the position of their first part and do not advance it
            pos += token.overshort_count;
            let hit_pos = (pos + 1).min((1 << 23) - 1);
            if !token.is_blended {
                pos += 1;
                tokens += 1;
            }
            let mut text = token.text;
            let word_id = dict.get_word_id(&mut text);
            if word_id.0 == 0 {
                continue;
            }
            field_hits.push(Hit {
                word_id,
                doc_id,
                pos: Hitpos::pack(field_idx as u8, hit_pos),
            });
        }
        // One end-of-field marker on the closing position
        if let Some(last) = field_hits.last().map(|h| h.pos.pos()) {
            for hit in field_hits.iter_mut().rev() {
                if hit.pos.pos() == last {
                    hit.pos = hit.pos.with_field_end();
                } else {
                    break;
                }
            }
        }
        for &hit in field_hits.iter() {
            hit_buffer.push(hit, dict)?;
        }
        Ok(tokens)
    }

    /// Build the attribute words of one row; strings and json land in
    /// the heap as a side effect. MVA slots stay zero here.
    #[allow(clippy::too_many_arguments)]
    fn build_row(
        schema: &Schema,
        doc: &SourceDocument,
        strings_writer: &mut FileWriter,
        strict_json: bool,
        warnings: &mut Vec<String>,
        mva_lists: &mut Vec<Vec<u64>>,
    ) -> Result<Vec<u32>> {
        let mut row = vec![0u32; schema.row_width() as usize];
        RowAccess::set_doc_id(&mut row, doc.doc_id);
        mva_lists.clear();

        for (idx, attr) in schema.attrs.iter().enumerate() {
            let value = doc.attrs.get(idx).unwrap_or(&AttrValue::None);
            match (attr.attr_type, value) {
                (AttrType::Uint32Set | AttrType::Int64Set, AttrValue::Mva(values)) => {
                    let mut sorted = values.clone();
                    sorted.sort_unstable();
                    sorted.dedup();
                    mva_lists.push(sorted);
                }
                (AttrType::Uint32Set | AttrType::Int64Set, _) => {
                    mva_lists.push(Vec::new());
                }
                (AttrType::String, AttrValue::Str(text)) => {
                    let mut heap = StringHeapWriter::resume(strings_writer);
                    let offset = heap.append(text.as_bytes())?;
                    RowAccess::set_attr(&mut row, attr.locator, offset as u64);
                }
                (AttrType::Json, AttrValue::Json(raw)) => {
                    match pack_json_str(raw) {
                        Ok(packed) => {
                            let mut heap = StringHeapWriter::resume(strings_writer);
                            let offset = heap.append(&packed)?;
                            RowAccess::set_attr(&mut row, attr.locator, offset as u64);
                        }
                        Err(err) if strict_json => {
                            return Err(Error::schema(format!(
                                "doc {}: invalid json in '{}': {}", doc.doc_id.0, attr.name, err)));
                        }
                        Err(err) => {
                            log::warn!("doc {}: invalid json in '{}' zeroed: {}", doc.doc_id.0, attr.name, err);
                            warnings.push(format!("doc {}: invalid json in '{}'", doc.doc_id.0, attr.name));
                        }
                    }
                }
                (AttrType::Float, AttrValue::Float(f)) => {
                    RowAccess::set_float(&mut row, attr.locator, *f);
                }
                (AttrType::Float, AttrValue::Int(v)) => {
                    RowAccess::set_float(&mut row, attr.locator, *v as f32);
                }
                (_, AttrValue::Int(v)) => {
                    RowAccess::set_attr(&mut row, attr.locator, *v);
                }
                _ => {}
            }
        }
        Ok(row)
    }

    pub fn build(&mut self, base: impl Into<std::path::PathBuf>, source: &mut dyn DocumentSource) -> Result<BuildStats> {
        let mut config = self.settings.config.clone();
        config.validate()?;
        // The hash width is an index property, not a dictionary one
        self.settings.dict_settings.use_64bit = config.use_64bit;
        if self.settings.dict_flavor == DictFlavor::Crc
            && (config.min_prefix_len > 0 || config.min_infix_len > 0)
        {
            return Err(Error::config("substring search needs the keywords dictionary"));
        }
        let schema = self.settings.schema.clone();

        let files = FileSet::new(base);
        files.recover()?;
        let _lock = IndexLock::acquire(&files)?;

        let stats = Arc::new(IoStats::default());
        let mut build_stats = BuildStats::default();

        // Spill files die with the build no matter what; the tmpnew
        // outputs survive only a full success
        let mut spill_guard = TempGuard::new();
        let mut out_guard = TempGuard::new();
        for file in IndexFile::ALL {
            out_guard.protect(files.tmp_new(file));
        }

        let hits_spill = files.tmp_build(IndexFile::Hitlist);
        let rows_spill = files.tmp_build(IndexFile::Attrs);
        spill_guard.protect(&hits_spill);
        spill_guard.protect(&rows_spill);

        let mut dict = self.make_dict();
        let mut chain = self.make_token_chain();

        let mut hit_buffer = HitBuffer::new(config.mem_limit / 2, &hits_spill, config.throttle, Arc::clone(&stats));
        let row_limit = (config.mem_limit / 4 / (schema.row_width() as usize * 4)).max(65536);
        let mut row_pool = RowPool::new(
            schema.row_width() as usize, row_limit, &rows_spill, config.throttle, Arc::clone(&stats));

        let mut strings_writer = FileWriter::create(
            files.tmp_new(IndexFile::Strings), config.write_buffer, config.throttle, Arc::clone(&stats))?;
        StringHeapWriter::begin(&mut strings_writer)?;

        // Doc id -> per-mva-attr value lists; the first row wins
        let mut mva_map: HashMap<u64, Vec<Vec<u64>>> = HashMap::new();
        let mva_attr_types: Vec<bool> = schema.attrs.iter()
            .filter(|a| a.attr_type.is_mva())
            .map(|a| a.attr_type == AttrType::Int64Set)
            .collect();

        let mut field_lens = vec![0u64; schema.fields.len()];
        let mut field_hits = Vec::new();
        let mut mva_lists = Vec::new();
        let mut progress = BuildProgress::default();

        while let Some(doc) = source.next_document()? {
            self.stop.check()?;
            if doc.doc_id.0 == 0 || doc.doc_id == DocId::MAX {
                build_stats.warnings.push(format!("reserved doc id {} skipped", doc.doc_id.0));
                continue;
            }

            let row = Self::build_row(
                &schema, &doc, &mut strings_writer, self.settings.strict_json,
                &mut build_stats.warnings, &mut mva_lists)?;
            row_pool.push(&row)?;
            if !mva_lists.iter().all(|l| l.is_empty()) {
                mva_map.entry(doc.doc_id.0).or_insert_with(|| mva_lists.clone());
            }

            for (field_idx, text) in doc.fields.iter().enumerate() {
                if field_idx >= schema.fields.len() {
                    break;
                }
                let tokens = Self::index_field(
                    chain.as_mut(), dict.as_mut(), &mut hit_buffer,
                    doc.doc_id, field_idx, text, &mut field_hits)?;
                field_lens[field_idx] += tokens;
                progress.bytes += text.len() as u64;
            }

            progress.documents += 1;
            if let Some(callback) = &mut self.progress {
                callback(&progress);
            }
        }

        let kill = KillList::from_docs(source.kill_list()?);

        // Previous-generation rows for keep_attrs rebuilds
        let kept = if config.keep_attrs && files.exists() {
            Some(KeptAttrs::load(&files, &schema, &config.keep_attrs_list, config.throttle, Arc::clone(&stats))?)
        } else {
            None
        };

        // Attribute pass: merge sorted row blocks, resolve MVA slots,
        // fold min/max, write rows out
        let mut attrs_writer = FileWriter::create(
            files.tmp_new(IndexFile::Attrs), config.write_buffer, config.throttle, Arc::clone(&stats))?;
        let mut mva_writer = FileWriter::create(
            files.tmp_new(IndexFile::Mva), config.write_buffer, config.throttle, Arc::clone(&stats))?;
        let mut sidecar = MvaSidecarWriter::begin(&mut mva_writer)?;
        let mut minmax = AttrIndexBuilder::new(&schema);
        let mva_slots: Vec<usize> = schema.attrs.iter().enumerate()
            .filter(|(_, a)| a.attr_type.is_mva())
            .map(|(i, _)| i)
            .collect();

        let mut inline_rows: HashMap<u64, Vec<u32>> = HashMap::new();
        let mut min_row: Option<Vec<u32>> = None;
        let mut total_documents = 0u64;
        let mut min_doc_id = DocId(0);

        let mut merge = row_pool.finish()?;
        let mut iterations = 0u64;
        while let Some(mut row) = merge.next_row()? {
            iterations += 1;
            if iterations % 1000 == 0 {
                self.stop.check()?;
            }
            let doc_id = RowAccess::doc_id(&row);
            if total_documents == 0 {
                min_doc_id = doc_id;
            }

            if let Some(kept) = &kept {
                kept.copy_into(doc_id, &mut row);
            }

            if !mva_slots.is_empty() {
                let empty = Vec::new();
                let lists = mva_map.get(&doc_id.0).unwrap_or(&empty);
                let borrowed: Vec<(bool, &[u64])> = mva_attr_types.iter().enumerate()
                    .map(|(i, &is64)| (is64, lists.get(i).map_or(&[][..], |l| l.as_slice())))
                    .collect();
                let offsets = sidecar.append_doc(doc_id, &borrowed)?;
                for (slot, offset) in mva_slots.iter().zip(offsets) {
                    RowAccess::set_attr(&mut row, schema.attrs[*slot].locator, offset as u64);
                }
            }

            match config.docinfo {
                DocinfoKind::Extern => {
                    minmax.collect(&row);
                    for &word in &row {
                        attrs_writer.write_u32(word)?;
                    }
                }
                DocinfoKind::Inline => {
                    let attr_area = row[DOCID_ROW_WORDS as usize..].to_vec();
                    match &mut min_row {
                        None => min_row = Some(attr_area.clone()),
                        Some(min_row) => {
                            for (slot, value) in min_row.iter_mut().zip(&attr_area) {
                                *slot = (*slot).min(*value);
                            }
                        }
                    }
                    inline_rows.insert(doc_id.0, attr_area);
                }
                DocinfoKind::None => {}
            }
            total_documents += 1;
        }
        build_stats.duplicates = merge.duplicates;
        if build_stats.duplicates > 0 {
            build_stats.warnings.push(format!("{} duplicate doc ids dropped", build_stats.duplicates));
        }
        if total_documents > (1 << 31) {
            return Err(Error::new(ErrorKind::Budget, "over 2^31 rows".to_string()));
        }

        let minmax_words_offset = total_documents * schema.row_width() as u64;
        if config.docinfo == DocinfoKind::Extern {
            for word in minmax.finish() {
                attrs_writer.write_u32(word)?;
            }
            if attrs_writer.pos() > 128u64 << 30 {
                return Err(Error::new(ErrorKind::Budget, "attribute file over 128 GiB".to_string()));
            }
        }
        if sidecar.words_written() * 4 > 16u64 << 30 {
            return Err(Error::new(ErrorKind::Budget, "mva sidecar over 16 GiB".to_string()));
        }
        attrs_writer.finish()?;
        mva_writer.finish()?;
        strings_writer.finish()?;

        // Posting pass: k-way merge the sorted hit blocks through the
        // hit builder
        let hitless = self.make_hitless_set(dict.as_mut());
        let blocks = hit_buffer.finish(dict.as_ref())?;
        let mut bins = Vec::new();
        for &block in &blocks {
            bins.push(Bin::open(&hits_spill, block, config.throttle, Arc::clone(&stats))?);
        }
        let mut hit_merge = HitMerge::new(bins, dict.as_ref());

        let new_writer = |file: IndexFile| {
            FileWriter::create(files.tmp_new(file), config.write_buffer, config.throttle, Arc::clone(&stats))
        };
        let dict_writer = match self.settings.dict_flavor {
            DictFlavor::Crc => DictWriterKind::Crc(CrcDictWriter::new()),
            DictFlavor::Keywords => DictWriterKind::Keywords(KeywordsDictWriter::new()),
        };
        let infix = if config.min_infix_len > 0 && self.settings.dict_flavor == DictFlavor::Keywords {
            Some(InfixBuilder::new(config.min_infix_len, config.max_substring_len))
        } else {
            None
        };
        let mut builder = HitBuilder::new(
            new_writer(IndexFile::Doclist)?,
            new_writer(IndexFile::Hitlist)?,
            SkiplistWriter::begin(new_writer(IndexFile::Skiplist)?)?,
            new_writer(IndexFile::Dict)?,
            dict_writer,
            infix,
            config.hit_format,
            hitless,
            if config.docinfo == DocinfoKind::Inline { min_row.clone() } else { None },
        );

        let mut iterations = 0u64;
        while let Some(hit) = hit_merge.next_hit(dict.as_ref())? {
            iterations += 1;
            if iterations % 1000 == 0 {
                self.stop.check()?;
            }
            let keyword = dict.keyword_for(hit.word_id).map(|k| k.to_vec());
            let attrs = inline_rows.get(&hit.doc_id.0).map(|r| r.as_slice());
            builder.hit(hit, keyword.as_deref(), attrs)?;
        }
        let output = builder.finish()?;
        build_stats.hits = output.total_hits;
        build_stats.documents = total_documents;
        build_stats.bytes = progress.bytes;

        kill.save_to(&files.tmp_new(IndexFile::KillList), config.write_buffer, config.throttle, Arc::clone(&stats))?;

        // Header last
        let mut header = IndexHeader::new(schema.clone());
        header.use_64bit = config.use_64bit;
        header.docinfo = config.docinfo;
        header.min_doc_id = min_doc_id;
        header.total_documents = total_documents;
        header.total_bytes = progress.bytes;
        header.total_hits = output.total_hits;
        header.dict_checkpoints_offset = output.dict_info.checkpoints_offset;
        header.dict_checkpoint_count = output.dict_info.checkpoint_count;
        header.infix_codepoint_bytes = output.infix_info.codepoint_bytes;
        header.infix_blocks_offset = output.infix_info.blocks_offset;
        header.infix_hash_size = output.infix_info.hash_size;
        header.hit_format = config.hit_format;
        header.min_prefix_len = config.min_prefix_len as u32;
        header.min_infix_len = config.min_infix_len as u32;
        header.max_substring_len = config.max_substring_len as u32;
        header.tokenizer = TokenizerSettingsDisk {
            fingerprint: self.settings.tokenizer.table.fingerprint(),
            min_word_len: self.settings.tokenizer.options.min_word_len as u32,
            blend_mode: self.settings.tokenizer.options.blend_mode,
            bigram_mode: match &self.settings.bigram {
                None => 0,
                Some((BigramMode::All, _)) => 1,
                Some((BigramMode::FirstFreq, _)) => 2,
                Some((BigramMode::BothFreq, _)) => 3,
            },
            bigram_words: self.settings.bigram.as_ref().map(|(_, w)| w.clone()).unwrap_or_default(),
        };
        header.dict.flavor = self.settings.dict_flavor;
        header.dict.morphology = self.settings.dict_settings.morphology.names.clone();
        header.dict.morph_fingerprint = self.settings.dict_settings.morphology.fingerprint();
        header.dict.stopwords_fingerprint = self.settings.dict_settings.stopwords.fingerprint();
        header.dict.stopwords_unstemmed = self.settings.dict_settings.stopwords_unstemmed;
        header.dict.hitless_all = self.settings.hitless == HitlessMode::All;
        header.dict.hitless_words = match &self.settings.hitless {
            HitlessMode::Words(words) => words.clone(),
            _ => Vec::new(),
        };
        header.kill_list_count = kill.len();
        header.minmax_words_offset = if config.docinfo == DocinfoKind::Extern {
            minmax_words_offset
        } else {
            0
        };
        if config.docinfo == DocinfoKind::Inline {
            header.inline_min_row = min_row.clone().unwrap_or_default();
        }
        header.field_lens_enabled = self.settings.index_field_lens;
        header.field_lens = if self.settings.index_field_lens { field_lens } else { Vec::new() };

        let mut header_writer = new_writer(IndexFile::Header)?;
        header.save(&mut header_writer)?;
        header_writer.finish()?;

        // Promote the new generation; the header goes last so a crash
        // mid-juggle never pairs a new header with old data files
        for file in [
            IndexFile::Attrs, IndexFile::Doclist, IndexFile::Hitlist, IndexFile::Skiplist,
            IndexFile::Dict, IndexFile::Mva, IndexFile::Strings, IndexFile::KillList,
        ] {
            files.juggle(file)?;
        }
        files.juggle(IndexFile::Header)?;
        out_guard.disarm();

        log::debug!(
            "built {}: {} docs, {} hits", files.base.display(), build_stats.documents, build_stats.hits);
        Ok(build_stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::disk_index::{DiskIndex, OpenSettings};
    use crate::core::types::StopFlag;
    use crate::dict::stopwords::Stopwords;
    use crate::dict::dictionary::hash_word;
    use crate::search::context::{QueryContext, QueryOptions};
    use crate::search::filter::FilterSpec;
    use crate::search::matcher::TermMatcher;
    use crate::search::scan::full_scan;

    fn text_doc(id: u64, text: &str) -> SourceDocument {
        SourceDocument {
            doc_id: DocId(id),
            fields: vec![text.to_string()],
            attrs: Vec::new(),
        }
    }

    fn text_schema() -> Schema {
        let mut schema = Schema::new();
        schema.add_field("content").unwrap();
        schema
    }

    fn build_index(dir: &std::path::Path, settings: IndexerSettings, docs: Vec<SourceDocument>) -> BuildStats {
        let mut indexer = Indexer::new(settings);
        let mut source = VecSource::new(docs);
        indexer.build(dir.join("idx"), &mut source).unwrap()
    }

    #[test]
    fn test_build_and_query_single_term() {
        let dir = tempfile::tempdir().unwrap();
        let stats = build_index(dir.path(), IndexerSettings::plain(text_schema()), vec![
            text_doc(1, "the quick brown fox"),
            text_doc(2, "the lazy fox"),
        ]);
        assert_eq!(stats.documents, 2);

        let index = DiskIndex::open(dir.path().join("idx"), OpenSettings::default()).unwrap();
        assert_eq!(index.header.total_documents, 2);

        let mut matcher = TermMatcher::new(&index, &["fox"], false).unwrap().unwrap();
        let matches = matcher.collect().unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].doc_id, DocId(1));
        assert_eq!(matches[1].doc_id, DocId(2));
        // Positions: 4th word in doc 1, 3rd in doc 2
        assert_eq!(matches[0].positions[0].iter().map(|p| p.pos()).collect::<Vec<_>>(), vec![4]);
        assert_eq!(matches[1].positions[0].iter().map(|p| p.pos()).collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_phrase_vs_bag_of_words() {
        let dir = tempfile::tempdir().unwrap();
        build_index(dir.path(), IndexerSettings::plain(text_schema()), vec![
            text_doc(1, "the quick brown fox"),
            text_doc(2, "the lazy fox"),
        ]);
        let index = DiskIndex::open(dir.path().join("idx"), OpenSettings::default()).unwrap();

        // Bag of words: both docs carry "fox", only doc 1 has "brown"
        let mut bag = TermMatcher::new(&index, &["brown", "fox"], false).unwrap().unwrap();
        assert_eq!(bag.collect().unwrap().len(), 1);

        let mut phrase = TermMatcher::new(&index, &["brown", "fox"], true).unwrap().unwrap();
        let matches = phrase.collect().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].doc_id, DocId(1));

        // Reversed phrase matches nothing
        let mut wrong = TermMatcher::new(&index, &["fox", "brown"], true).unwrap().unwrap();
        assert!(wrong.collect().unwrap().is_empty());
    }

    #[test]
    fn test_stopword_filtering() {
        let dir = tempfile::tempdir().unwrap();
        let words = vec![b"the".to_vec()];
        let ids = vec![hash_word(b"the", true)];
        let mut settings = IndexerSettings::plain(text_schema());
        settings.dict_settings.stopwords = Arc::new(Stopwords::new(ids, &words));

        build_index(dir.path(), settings, vec![
            text_doc(1, "the quick brown fox"),
            text_doc(2, "the lazy fox"),
        ]);

        let mut open = OpenSettings::default();
        let words = vec![b"the".to_vec()];
        let ids = vec![hash_word(b"the", true)];
        let mut ds = DictSettings::plain(true);
        ds.stopwords = Arc::new(Stopwords::new(ids, &words));
        open.dict_settings = Some(ds);
        let index = DiskIndex::open(dir.path().join("idx"), open).unwrap();

        // "the" is dropped; the query degrades to "fox"
        let mut matcher = TermMatcher::new(&index, &["the", "fox"], false).unwrap().unwrap();
        assert_eq!(matcher.dropped_terms, 1);
        let matches = matcher.collect().unwrap();
        assert_eq!(matches.len(), 2);

        // And "the" alone matches nothing at all
        assert!(TermMatcher::new(&index, &["the"], false).unwrap().is_none());
    }

    #[test]
    fn test_attribute_range_scan_with_block_prune() {
        let dir = tempfile::tempdir().unwrap();
        let mut schema = Schema::new();
        schema.add_field("content").unwrap();
        schema.add_attr("price", AttrType::Int).unwrap();

        let docs = vec![
            (1u64, 100u64), (2, 250), (3, 300), (4, 1000),
        ].into_iter().map(|(id, price)| SourceDocument {
            doc_id: DocId(id),
            fields: vec![format!("item {}", id)],
            attrs: vec![AttrValue::Int(price)],
        }).collect();

        build_index(dir.path(), IndexerSettings::plain(schema), docs);
        let index = DiskIndex::open(dir.path().join("idx"), OpenSettings::default()).unwrap();

        let options = QueryOptions {
            filters: vec![FilterSpec::range("price", 200, 400)],
            ..Default::default()
        };
        let ctx = QueryContext::new(&index.header.schema, &options, StopFlag::new()).unwrap();
        let matches = full_scan(&index, &ctx).unwrap();
        let ids: Vec<u64> = matches.iter().map(|m| m.doc_id.0).collect();
        assert_eq!(ids, vec![2, 3]);

        // A disjoint filter prunes on the whole-index envelope
        let options = QueryOptions {
            filters: vec![FilterSpec::range("price", 5000, 9000)],
            ..Default::default()
        };
        let ctx = QueryContext::new(&index.header.schema, &options, StopFlag::new()).unwrap();
        assert!(full_scan(&index, &ctx).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_docids_warn_and_keep_first() {
        let dir = tempfile::tempdir().unwrap();
        let stats = build_index(dir.path(), IndexerSettings::plain(text_schema()), vec![
            text_doc(7, "first version"),
            text_doc(7, "second version"),
        ]);
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.duplicates, 1);
        assert!(stats.warnings.iter().any(|w| w.contains("duplicate")));
    }

    #[test]
    fn test_skip_list_seek() {
        let dir = tempfile::tempdir().unwrap();
        let docs: Vec<SourceDocument> = (1..=10000u64)
            .map(|id| text_doc(id, "needle"))
            .collect();
        build_index(dir.path(), IndexerSettings::plain(text_schema()), docs);
        let index = DiskIndex::open(dir.path().join("idx"), OpenSettings::default()).unwrap();

        // Fixed pseudo-random targets
        let mut state = 12345u64;
        for _ in 0..20 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let target = state % 10000 + 1;

            let mut reader = index.term_reader("needle").unwrap().unwrap();
            let found = reader.skip_to(DocId(target)).unwrap();
            assert_eq!(found, Some(DocId(target)));
            // The skip list bounds the records decoded linearly
            assert!(reader.doclist_reads <= target / 128 + 130,
                "target {} took {} reads", target, reader.doclist_reads);
        }
    }

    #[test]
    fn test_crc_dict_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = IndexerSettings::plain(text_schema());
        settings.dict_flavor = DictFlavor::Crc;
        build_index(dir.path(), settings, vec![
            text_doc(1, "alpha beta"),
            text_doc(2, "beta gamma"),
        ]);
        let index = DiskIndex::open(dir.path().join("idx"), OpenSettings::default()).unwrap();
        assert_eq!(index.header.dict.flavor, DictFlavor::Crc);

        let mut matcher = TermMatcher::new(&index, &["beta"], false).unwrap().unwrap();
        assert_eq!(matcher.collect().unwrap().len(), 2);
        let mut matcher = TermMatcher::new(&index, &["gamma"], false).unwrap().unwrap();
        assert_eq!(matcher.collect().unwrap().len(), 1);
        assert!(TermMatcher::new(&index, &["delta"], false).unwrap().is_none());
    }

    #[test]
    fn test_wildcard_expansion() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = IndexerSettings::plain(text_schema());
        settings.config.min_infix_len = 2;
        build_index(dir.path(), settings, vec![
            text_doc(1, "quick quince"),
            text_doc(2, "brown"),
        ]);
        let index = DiskIndex::open(dir.path().join("idx"), OpenSettings::default()).unwrap();

        let readers = index.wildcard_readers("qui*").unwrap();
        let keywords: Vec<&[u8]> = readers.iter().map(|r| r.entry.keyword.as_slice()).collect();
        assert_eq!(keywords, vec![&b"quick"[..], &b"quince"[..]]);

        let readers = index.wildcard_readers("*row*").unwrap();
        assert_eq!(readers.len(), 1);
        assert_eq!(readers[0].entry.keyword, b"brown");
    }

    #[test]
    fn test_keyword_stats_report() {
        let dir = tempfile::tempdir().unwrap();
        build_index(dir.path(), IndexerSettings::plain(text_schema()), vec![
            text_doc(1, "fox fox fox"),
            text_doc(2, "fox"),
        ]);
        let index = DiskIndex::open(dir.path().join("idx"), OpenSettings::default()).unwrap();
        let stats = index.keyword_stats("fox missing").unwrap();
        assert_eq!(stats[0].docs, 2);
        assert_eq!(stats[0].hits, 4);
        assert_eq!(stats[1].docs, 0);
    }

    #[test]
    fn test_keep_attrs_carries_columns_forward() {
        let dir = tempfile::tempdir().unwrap();
        let mut schema = Schema::new();
        schema.add_field("content").unwrap();
        schema.add_attr("price", AttrType::Int).unwrap();

        let doc_with_price = |price: u64| SourceDocument {
            doc_id: DocId(1),
            fields: vec!["widget".to_string()],
            attrs: vec![AttrValue::Int(price)],
        };

        let mut indexer = Indexer::new(IndexerSettings::plain(schema.clone()));
        indexer.build(dir.path().join("idx"), &mut VecSource::new(vec![doc_with_price(500)])).unwrap();

        // Rebuild with keep_attrs: the source's new value is ignored
        let mut settings = IndexerSettings::plain(schema);
        settings.config.keep_attrs = true;
        let mut indexer = Indexer::new(settings);
        indexer.build(dir.path().join("idx"), &mut VecSource::new(vec![doc_with_price(1)])).unwrap();

        let index = DiskIndex::open(dir.path().join("idx"), OpenSettings::default()).unwrap();
        let row = index.read_row(index.find_row(DocId(1)).unwrap());
        let locator = index.header.schema.attr("price").unwrap().locator;
        assert_eq!(crate::schema::schema::RowAccess::get_attr(&row, locator), 500);
    }

    #[test]
    fn test_concurrent_queries_share_one_index() {
        let dir = tempfile::tempdir().unwrap();
        let docs: Vec<SourceDocument> = (1..=500u64)
            .map(|id| text_doc(id, if id % 2 == 0 { "even fox" } else { "odd fox" }))
            .collect();
        build_index(dir.path(), IndexerSettings::plain(text_schema()), docs);
        let index = DiskIndex::open(dir.path().join("idx"), OpenSettings::default()).unwrap();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..10 {
                        let mut matcher = TermMatcher::new(&index, &["fox"], false).unwrap().unwrap();
                        assert_eq!(matcher.collect().unwrap().len(), 500);
                        let mut matcher = TermMatcher::new(&index, &["even"], false).unwrap().unwrap();
                        assert_eq!(matcher.collect().unwrap().len(), 250);
                    }
                });
            }
        });
    }

    #[test]
    fn test_failed_build_leaves_no_tmpnew() {
        let dir = tempfile::tempdir().unwrap();

        struct FailingSource {
            emitted: bool,
        }
        impl DocumentSource for FailingSource {
            fn next_document(&mut self) -> Result<Option<SourceDocument>> {
                if self.emitted {
                    return Err(Error::new(ErrorKind::Io, "feed died".to_string()));
                }
                self.emitted = true;
                Ok(Some(SourceDocument {
                    doc_id: DocId(1),
                    fields: vec!["hello".to_string()],
                    attrs: Vec::new(),
                }))
            }
        }

        let mut indexer = Indexer::new(IndexerSettings::plain(text_schema()));
        let err = indexer.build(dir.path().join("idx"), &mut FailingSource { emitted: false });
        assert!(err.is_err());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|name| name.contains("tmp"))
            .collect();
        assert!(leftovers.is_empty(), "leftover temp files: {:?}", leftovers);
    }
}
