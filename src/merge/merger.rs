use std::cmp::Ordering;
use std::sync::Arc;

use roaring::RoaringTreemap;

use crate::attr::minmax::AttrIndexBuilder;
use crate::attr::mva::MvaSidecarWriter;
use crate::attr::strings::StringHeapWriter;
use crate::core::disk_index::DiskIndex;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{DocId, Hit, StopFlag, WordId};
use crate::dict::dictionary::hash_word;
use crate::dict::writer::{CrcDictWriter, KeywordsDictWriter};
use crate::index::hit_builder::{DictWriterKind, HitBuilder, HitlessSet};
use crate::index::infix::InfixBuilder;
use crate::index::skiplist::SkiplistWriter;
use crate::io::writer::FileWriter;
use crate::schema::schema::{AttrType, RowAccess};
use crate::search::filter::{compile_filters, FilterSpec, FilterTree};
use crate::search::qword::PostingReader;
use crate::search::wordlist::WordlistEntry;
use crate::storage::file_lock::IndexLock;
use crate::storage::fileset::{FileSet, IndexFile, TempGuard};
use crate::storage::header::{DictFlavor, IndexHeader};
use crate::storage::kill_list::KillList;

#[derive(Debug, Clone, Default)]
pub struct MergeSettings {
    /// Applied to the destination's rows; filtered rows vanish from
    /// the output entirely.
    pub filter: Vec<FilterSpec>,
    /// Extra doc ids to suppress from the destination.
    pub kill_list: Vec<DocId>,
    /// Union every kill list into the output instead of dropping
    /// them once applied.
    pub merge_kill_lists: bool,
}

#[derive(Debug, Default)]
pub struct MergeStats {
    pub documents: u64,
    pub words: u64,
    pub warnings: Vec<String>,
}

/// Sequential walk over one index's dictionary in posting order.
struct DictStream<'a> {
    index: &'a DiskIndex,
    block: u32,
    entry: usize,
    current: Option<WordlistEntry>,
}

impl<'a> DictStream<'a> {
    fn new(index: &'a DiskIndex) -> Result<Self> {
        let mut stream = DictStream { index, block: 0, entry: 0, current: None };
        stream.advance()?;
        Ok(stream)
    }

    fn advance(&mut self) -> Result<()> {
        let wordlist = self.index.wordlist();
        while (self.block as usize) < wordlist.checkpoint_count() {
            let entries = wordlist.block_entries(self.index.dict_data(), self.block)?;
            if self.entry < entries.len() {
                self.current = Some(entries[self.entry].clone());
                self.entry += 1;
                return Ok(());
            }
            self.block += 1;
            self.entry = 0;
        }
        self.current = None;
        Ok(())
    }
}

fn key_cmp(flavor: DictFlavor, a: &WordlistEntry, b: &WordlistEntry) -> Ordering {
    match flavor {
        DictFlavor::Crc => a.word_id.cmp(&b.word_id),
        DictFlavor::Keywords => a.keyword.cmp(&b.keyword),
    }
}

/// Normalized hitless-word set of one index, by the header's own
/// settings.
fn hitless_of(index: &DiskIndex) -> HitlessSet {
    let mut set = HitlessSet { all: index.header.dict.hitless_all, ..Default::default() };
    for word in &index.header.dict.hitless_words {
        let mut token = word.as_bytes().to_vec();
        if !index.dict_settings.normalize(&mut token) {
            continue;
        }
        set.ids.insert(hash_word(&token, index.header.use_64bit));
        set.texts.insert(token);
    }
    set
}

/// Two-way merge: the source (`src`) wins doc-id collisions, the
/// destination (`dst`) takes the filter and kill lists. The output is
/// written through the same posting writer a fresh build uses, so
/// skip lists, checkpoints and infixes are rebuilt from scratch.
pub struct Merger {
    pub settings: MergeSettings,
    pub stop: StopFlag,
}

impl Merger {
    pub fn new(settings: MergeSettings) -> Self {
        Merger { settings, stop: StopFlag::new() }
    }

    pub fn merge(
        &self,
        dst: &DiskIndex,
        src: &DiskIndex,
        out_base: impl Into<std::path::PathBuf>,
    ) -> Result<MergeStats> {
        if !dst.header.schema.compatible_with(&src.header.schema) {
            return Err(Error::schema("merge: schemas differ"));
        }
        if dst.header.hit_format != src.header.hit_format {
            return Err(Error::schema("merge: hit formats differ"));
        }
        if dst.header.dict.flavor != src.header.dict.flavor {
            return Err(Error::schema("merge: dictionary flavors differ"));
        }
        if dst.header.docinfo != src.header.docinfo
            && dst.header.total_documents > 0
            && src.header.total_documents > 0
        {
            return Err(Error::schema("merge: docinfo kinds differ"));
        }
        let flavor = dst.header.dict.flavor;

        let mut stats = MergeStats::default();
        if dst.header.dict.hitless_all != src.header.dict.hitless_all
            || dst.header.dict.hitless_words != src.header.dict.hitless_words
        {
            stats.warnings.push("hitless settings differ; affected hitlists dropped".to_string());
        }

        let out_files = FileSet::new(out_base);
        out_files.recover()?;
        let _lock = IndexLock::acquire(&out_files)?;
        let mut out_guard = TempGuard::new();
        for file in IndexFile::ALL {
            out_guard.protect(out_files.tmp_new(file));
        }

        let (filter_tree, late) = compile_filters(&dst.header.schema, &self.settings.filter)?;
        if !late.is_empty() {
            return Err(Error::schema("merge filters cannot reference @weight"));
        }

        // Destination docs suppressed by config or collision
        let mut dropped_dst = RoaringTreemap::new();
        let mut applied_kill = KillList::from_docs(self.settings.kill_list.iter().copied());
        applied_kill.union_with(dst.kill_list());
        applied_kill.union_with(src.kill_list());

        let io_stats = Arc::new(crate::io::throttle::IoStats::default());
        let buffer = crate::core::config::WRITE_BUFFER_DEFAULT;
        let throttle = crate::core::config::ThrottleConfig::default();
        let new_writer = |file: IndexFile| {
            FileWriter::create(out_files.tmp_new(file), buffer, throttle, Arc::clone(&io_stats))
        };

        // Pass 1: rows
        let mut attrs_writer = new_writer(IndexFile::Attrs)?;
        let mut mva_writer = new_writer(IndexFile::Mva)?;
        let mut strings_writer = new_writer(IndexFile::Strings)?;
        let mut sidecar = MvaSidecarWriter::begin(&mut mva_writer)?;
        StringHeapWriter::begin(&mut strings_writer)?;
        let mut minmax = AttrIndexBuilder::new(&dst.header.schema);

        let schema = dst.header.schema.clone();
        let width = schema.row_width() as usize;
        let mva_attrs = schema.mva_attrs();
        let string_attrs = schema.string_attrs();

        let dst_rows = dst.rows_guard();
        let src_rows = src.rows_guard();
        let dst_strings = dst.strings_guard();
        let src_strings = src.strings_guard();
        let dst_pools = dst.pools(&dst_strings);
        let src_pools = src.pools(&src_strings);

        let mut total_documents = 0u64;
        let mut min_doc_id = DocId(0);
        let mut dst_at = 0usize;
        let mut src_at = 0usize;
        let dst_count = dst.row_count();
        let src_count = src.row_count();

        let mut emit_row = |row: &[u32],
                            from_src: bool,
                            sidecar: &mut MvaSidecarWriter,
                            strings_writer: &mut FileWriter,
                            attrs_writer: &mut FileWriter|
         -> Result<()> {
            let mut row = row.to_vec();
            let doc_id = RowAccess::doc_id(&row);
            let pools = if from_src { src_pools } else { dst_pools };

            // Rewrite MVA lists into the output sidecar
            if !mva_attrs.is_empty() {
                let mut lists = Vec::new();
                for &attr_idx in &mva_attrs {
                    let attr = &schema.attrs[attr_idx];
                    let slot = RowAccess::get_attr(&row, attr.locator) as u32;
                    let values = pools.mva_values(slot, attr.attr_type == AttrType::Int64Set)?;
                    lists.push((attr.attr_type == AttrType::Int64Set, values));
                }
                let borrowed: Vec<(bool, &[u64])> =
                    lists.iter().map(|(is64, v)| (*is64, v.as_slice())).collect();
                let offsets = sidecar.append_doc(doc_id, &borrowed)?;
                for (&attr_idx, offset) in mva_attrs.iter().zip(offsets) {
                    RowAccess::set_attr(&mut row, schema.attrs[attr_idx].locator, offset as u64);
                }
            }

            // Rewrite string blobs into the output heap
            for &attr_idx in &string_attrs {
                let attr = &schema.attrs[attr_idx];
                let offset = RowAccess::get_attr(&row, attr.locator) as u32;
                let blob = crate::attr::strings::read_blob(pools.strings, offset)?;
                let mut heap = StringHeapWriter::resume(strings_writer);
                let new_offset = heap.append(blob)?;
                RowAccess::set_attr(&mut row, attr.locator, new_offset as u64);
            }

            if total_documents == 0 {
                min_doc_id = doc_id;
            }
            minmax.collect(&row);
            for &word in &row {
                attrs_writer.write_u32(word)?;
            }
            total_documents += 1;
            Ok(())
        };

        loop {
            self.stop.check()?;
            let dst_row = (dst_at < dst_count)
                .then(|| &dst_rows[dst_at * width..(dst_at + 1) * width]);
            let src_row = (src_at < src_count)
                .then(|| &src_rows[src_at * width..(src_at + 1) * width]);
            match (dst_row, src_row) {
                (None, None) => break,
                (Some(d), src_opt) => {
                    let d_id = RowAccess::doc_id(d);
                    let s_id = src_opt.map(RowAccess::doc_id);
                    if s_id.map_or(false, |s| s < d_id) {
                        emit_row(src_row.unwrap(), true, &mut sidecar, &mut strings_writer, &mut attrs_writer)?;
                        src_at += 1;
                        continue;
                    }
                    if s_id == Some(d_id) {
                        // Source wins the collision; the destination
                        // side goes on the phantom kill list
                        dropped_dst.insert(d_id.0);
                        emit_row(src_row.unwrap(), true, &mut sidecar, &mut strings_writer, &mut attrs_writer)?;
                        dst_at += 1;
                        src_at += 1;
                        continue;
                    }
                    // Destination row: kill lists and filter apply
                    if applied_kill.contains(d_id) || !filter_tree.eval(d, dst_pools)? {
                        dropped_dst.insert(d_id.0);
                        dst_at += 1;
                        continue;
                    }
                    emit_row(d, false, &mut sidecar, &mut strings_writer, &mut attrs_writer)?;
                    dst_at += 1;
                }
                (None, Some(s)) => {
                    emit_row(s, true, &mut sidecar, &mut strings_writer, &mut attrs_writer)?;
                    src_at += 1;
                }
            }
        }

        let minmax_words_offset = total_documents * width as u64;
        for word in minmax.finish() {
            attrs_writer.write_u32(word)?;
        }
        if attrs_writer.pos() > 128u64 << 30 {
            return Err(Error::new(ErrorKind::Budget, "merged attribute file over 128 GiB".to_string()));
        }
        if sidecar.words_written() * 4 > 16u64 << 30 {
            return Err(Error::new(ErrorKind::Budget, "merged mva sidecar over 16 GiB".to_string()));
        }
        stats.documents = total_documents;
        attrs_writer.finish()?;
        mva_writer.finish()?;
        strings_writer.finish()?;
        drop(dst_rows);
        drop(src_rows);

        // Pass 2: postings, through a fresh hit builder
        let mut hitless = hitless_of(dst);
        let src_hitless = hitless_of(src);
        hitless.all |= src_hitless.all;
        hitless.ids.extend(src_hitless.ids);
        hitless.texts.extend(src_hitless.texts);

        let dict_writer = match flavor {
            DictFlavor::Crc => DictWriterKind::Crc(CrcDictWriter::new()),
            DictFlavor::Keywords => DictWriterKind::Keywords(KeywordsDictWriter::new()),
        };
        let infix = if dst.header.min_infix_len > 0 && flavor == DictFlavor::Keywords {
            Some(InfixBuilder::new(
                dst.header.min_infix_len as usize,
                dst.header.max_substring_len as usize,
            ))
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
            dst.header.hit_format,
            hitless,
            None,
        );

        let mut dst_stream = DictStream::new(dst)?;
        let mut src_stream = DictStream::new(src)?;
        let mut out_word = 0u64;

        while dst_stream.current.is_some() || src_stream.current.is_some() {
            self.stop.check()?;
            let take_dst;
            let take_src;
            match (&dst_stream.current, &src_stream.current) {
                (Some(d), Some(s)) => match key_cmp(flavor, d, s) {
                    Ordering::Less => { take_dst = true; take_src = false; }
                    Ordering::Greater => { take_dst = false; take_src = true; }
                    Ordering::Equal => { take_dst = true; take_src = true; }
                },
                (Some(_), None) => { take_dst = true; take_src = false; }
                (None, Some(_)) => { take_dst = false; take_src = true; }
                (None, None) => break,
            }

            out_word += 1;
            let word_id = WordId(out_word);
            stats.words += 1;

            let dst_entry = take_dst.then(|| dst_stream.current.clone().unwrap());
            let src_entry = take_src.then(|| src_stream.current.clone().unwrap());
            let sample = src_entry.as_ref().or(dst_entry.as_ref()).unwrap();
            let keyword = match flavor {
                DictFlavor::Keywords => Some(sample.keyword.clone()),
                DictFlavor::Crc => None,
            };
            let out_id = match flavor {
                DictFlavor::Crc => sample.word_id,
                DictFlavor::Keywords => word_id,
            };

            self.merge_word(
                &mut builder, out_id, keyword.as_deref(),
                dst, dst_entry, &dropped_dst,
                src, src_entry,
            )?;

            if take_dst {
                dst_stream.advance()?;
            }
            if take_src {
                src_stream.advance()?;
            }
        }
        let output = builder.finish()?;

        // Output kill list
        let out_kill = if self.settings.merge_kill_lists {
            let mut k = KillList::from_docs(self.settings.kill_list.iter().copied());
            k.union_with(dst.kill_list());
            k.union_with(src.kill_list());
            k
        } else {
            KillList::new()
        };
        out_kill.save_to(&out_files.tmp_new(IndexFile::KillList), buffer, throttle, Arc::clone(&io_stats))?;

        let mut header = dst.header.clone();
        header.min_doc_id = min_doc_id;
        header.total_documents = total_documents;
        header.total_bytes = dst.header.total_bytes + src.header.total_bytes;
        header.total_hits = output.total_hits;
        header.dict_checkpoints_offset = output.dict_info.checkpoints_offset;
        header.dict_checkpoint_count = output.dict_info.checkpoint_count;
        header.infix_codepoint_bytes = output.infix_info.codepoint_bytes;
        header.infix_blocks_offset = output.infix_info.blocks_offset;
        header.infix_hash_size = output.infix_info.hash_size;
        header.kill_list_count = out_kill.len();
        header.minmax_words_offset = minmax_words_offset;
        let mut header_writer = new_writer(IndexFile::Header)?;
        header.save(&mut header_writer)?;
        header_writer.finish()?;

        for file in [
            IndexFile::Attrs, IndexFile::Doclist, IndexFile::Hitlist, IndexFile::Skiplist,
            IndexFile::Dict, IndexFile::Mva, IndexFile::Strings, IndexFile::KillList,
        ] {
            out_files.juggle(file)?;
        }
        out_files.juggle(IndexFile::Header)?;
        out_guard.disarm();
        Ok(stats)
    }

    /// Merge one word's postings from up to two sides into the
    /// builder. Docs present on both sides come from the source only.
    #[allow(clippy::too_many_arguments)]
    fn merge_word(
        &self,
        builder: &mut HitBuilder,
        out_id: WordId,
        keyword: Option<&[u8]>,
        dst: &DiskIndex,
        dst_entry: Option<WordlistEntry>,
        dropped_dst: &RoaringTreemap,
        src: &DiskIndex,
        src_entry: Option<WordlistEntry>,
    ) -> Result<()> {
        let mut dst_reader = dst_entry.map(|entry| {
            let hitless = word_is_hitless(dst, &entry);
            (make_reader(dst, entry, hitless), hitless)
        });
        let mut src_reader = src_entry.map(|entry| {
            let hitless = word_is_hitless(src, &entry);
            (make_reader(src, entry, hitless), hitless)
        });
        let merged_hitless = dst_reader.as_ref().map_or(false, |(_, h)| *h)
            || src_reader.as_ref().map_or(false, |(_, h)| *h);

        let mut dst_doc = match &mut dst_reader {
            Some((reader, _)) => next_surviving(reader, Some(dropped_dst))?,
            None => None,
        };
        let mut src_doc = match &mut src_reader {
            Some((reader, _)) => next_surviving(reader, None)?,
            None => None,
        };

        loop {
            let emit_from_src = match (dst_doc, src_doc) {
                (None, None) => break,
                (Some(_), None) => false,
                (None, Some(_)) => true,
                (Some(d), Some(s)) => {
                    if d == s {
                        // Collision: source side wins
                        let (reader, _) = dst_reader.as_mut().unwrap();
                        dst_doc = next_surviving(reader, Some(dropped_dst))?;
                    }
                    s <= d
                }
            };

            let (reader, _) = if emit_from_src {
                src_reader.as_mut().unwrap()
            } else {
                dst_reader.as_mut().unwrap()
            };
            let doc_id = if emit_from_src { src_doc.unwrap() } else { dst_doc.unwrap() };

            if merged_hitless {
                // Either side hitless makes the merged word hitless
                builder.hit_aggregate(out_id, keyword, doc_id, reader.field_mask, reader.doc_hits)?;
            } else {
                // Inline single hits flow through the same position
                // stream as plain hitlists
                reader.seek_hitlist();
                while let Some(pos) = reader.get_next_hit()? {
                    builder.hit(Hit { word_id: out_id, doc_id, pos }, keyword, None)?;
                }
            }

            if emit_from_src {
                let (reader, _) = src_reader.as_mut().unwrap();
                src_doc = next_surviving(reader, None)?;
            } else {
                let (reader, _) = dst_reader.as_mut().unwrap();
                dst_doc = next_surviving(reader, Some(dropped_dst))?;
            }
        }
        Ok(())
    }
}

fn word_is_hitless(index: &DiskIndex, entry: &WordlistEntry) -> bool {
    if index.header.dict.hitless_all {
        return true;
    }
    let set = hitless_of(index);
    match index.header.dict.flavor {
        DictFlavor::Crc => set.ids.contains(&entry.word_id),
        DictFlavor::Keywords => set.texts.contains(&entry.keyword),
    }
}

fn make_reader<'a>(index: &'a DiskIndex, entry: WordlistEntry, hitless: bool) -> PostingReader<'a> {
    PostingReader::new(
        index.doclist_data(),
        index.hitlist_data(),
        index.skiplist_data(),
        entry,
        index.header.hit_format,
        hitless,
        None,
    )
}

fn next_surviving(reader: &mut PostingReader, dropped: Option<&RoaringTreemap>) -> Result<Option<DocId>> {
    loop {
        match reader.get_next_doc()? {
            None => return Ok(None),
            Some(doc_id) => {
                if dropped.map_or(false, |set| set.contains(doc_id.0)) {
                    continue;
                }
                return Ok(Some(doc_id));
            }
        }
    }
}
