use crate::attr::minmax::MINMAX_BLOCK_ROWS;
use crate::attr::mva::MVA_ARENA_FLAG;
use crate::attr::strings;
use crate::core::config::DocinfoKind;
use crate::core::disk_index::DiskIndex;
use crate::core::error::Result;
use crate::core::types::DocId;
use crate::dict::writer::SKIPLIST_DOC_THRESH;
use crate::index::skiplist::{read_skiplist, skiplist_entry_count, SKIPLIST_BLOCK};
use crate::schema::schema::{AttrType, RowAccess};
use crate::search::qword::PostingReader;
use crate::search::wordlist::WordlistEntry;
use crate::storage::header::DictFlavor;

/// Reporting stops after this many failures.
pub const MAX_FAILURES: usize = 100;

#[derive(Debug, Default)]
pub struct CheckReport {
    pub failures: Vec<String>,
    pub checked_words: u64,
    pub checked_rows: u64,
}

impl CheckReport {
    fn fail(&mut self, message: String) {
        if self.failures.len() < MAX_FAILURES {
            self.failures.push(message);
        }
    }

    fn full(&self) -> bool {
        self.failures.len() >= MAX_FAILURES
    }

    pub fn ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Integrity scan: re-reads every on-disk structure and
/// cross-validates dictionary, postings, skip lists, rows, MVA and
/// string offsets, and the min/max envelopes.
pub fn check(index: &DiskIndex) -> Result<CheckReport> {
    let mut report = CheckReport::default();
    check_dictionary_and_postings(index, &mut report)?;
    if index.header.docinfo == DocinfoKind::Extern {
        check_rows(index, &mut report)?;
        check_minmax(index, &mut report)?;
    }
    Ok(report)
}

fn word_name(entry: &WordlistEntry) -> String {
    if entry.keyword.is_empty() {
        format!("{:#x}", entry.word_id.0)
    } else {
        String::from_utf8_lossy(&entry.keyword).into_owned()
    }
}

fn is_hitless_word(index: &DiskIndex, entry: &WordlistEntry) -> bool {
    if index.header.dict.hitless_all {
        return true;
    }
    if index.header.dict.hitless_words.is_empty() {
        return false;
    }
    index.header.dict.hitless_words.iter().any(|word| {
        let mut token = word.as_bytes().to_vec();
        if !index.dict_settings.normalize(&mut token) {
            return false;
        }
        match index.header.dict.flavor {
            DictFlavor::Keywords => token == entry.keyword,
            DictFlavor::Crc => {
                crate::dict::dictionary::hash_word(&token, index.header.use_64bit) == entry.word_id
            }
        }
    })
}

fn check_dictionary_and_postings(index: &DiskIndex, report: &mut CheckReport) -> Result<()> {
    let wordlist = index.wordlist();
    let dict_data = index.dict_data();
    let doclist_len = index.doclist_data().len() as u64;

    let mut prev_key: Option<WordlistEntry> = None;
    for block in 0..wordlist.checkpoint_count() as u32 {
        let entries = match wordlist.block_entries(dict_data, block) {
            Ok(entries) => entries,
            Err(err) => {
                report.fail(format!("block {}: undecodable: {}", block, err));
                continue;
            }
        };
        for entry in entries.iter() {
            if report.full() {
                return Ok(());
            }
            report.checked_words += 1;

            // Dictionary ordering
            if let Some(prev) = &prev_key {
                let ordered = match index.header.dict.flavor {
                    DictFlavor::Crc => prev.word_id < entry.word_id,
                    DictFlavor::Keywords => prev.keyword < entry.keyword,
                };
                if !ordered {
                    report.fail(format!("dictionary out of order at '{}'", word_name(entry)));
                }
            }
            prev_key = Some(entry.clone());

            if entry.doclist_offset >= doclist_len {
                report.fail(format!(
                    "'{}': doclist offset {} past file end {}",
                    word_name(entry), entry.doclist_offset, doclist_len));
                continue;
            }
            check_word_postings(index, entry, report)?;
        }
    }
    Ok(())
}

fn check_word_postings(index: &DiskIndex, entry: &WordlistEntry, report: &mut CheckReport) -> Result<()> {
    let hitless = is_hitless_word(index, entry);
    let mut reader = PostingReader::new(
        index.doclist_data(),
        index.hitlist_data(),
        index.skiplist_data(),
        entry.clone(),
        index.header.hit_format,
        hitless,
        None,
    );
    let name = word_name(entry);
    let field_count = index.header.schema.fields.len().max(1) as u8;

    let mut docs = 0u32;
    let mut hits = 0u64;
    let mut last_doc = 0u64;
    // Decoder snapshots at block boundaries, skip-list shaped
    let mut snapshots = Vec::new();

    loop {
        if docs % SKIPLIST_BLOCK == 0 {
            snapshots.push(reader.decoder_state());
        }
        let doc_id = match reader.get_next_doc() {
            Ok(Some(doc_id)) => doc_id,
            Ok(None) => break,
            Err(err) => {
                report.fail(format!("'{}': doclist decode failed: {}", name, err));
                return Ok(());
            }
        };
        if doc_id.0 <= last_doc {
            report.fail(format!("'{}': non-ascending doc id {}", name, doc_id.0));
            return Ok(());
        }
        last_doc = doc_id.0;
        docs += 1;

        if index.header.docinfo == DocinfoKind::Extern && index.find_row(doc_id).is_none() {
            report.fail(format!("'{}': doc {} has no attribute row", name, doc_id.0));
        }

        if hitless || !reader.has_hitlist && reader.doc_hits <= 1 {
            hits += reader.doc_hits as u64;
            if !hitless && reader.doc_hits == 1 {
                // Inline hit still must carry a sane field
                reader.seek_hitlist();
                if let Ok(Some(pos)) = reader.get_next_hit() {
                    if pos.field() >= field_count {
                        report.fail(format!("'{}': doc {} field {} out of range", name, doc_id.0, pos.field()));
                    }
                }
            }
            continue;
        }

        reader.seek_hitlist();
        let mut doc_hits = 0u32;
        let mut last_pos = 0u32;
        loop {
            match reader.get_next_hit() {
                Ok(Some(pos)) => {
                    if pos.0 <= last_pos {
                        report.fail(format!(
                            "'{}': doc {} non-ascending hit position {}", name, doc_id.0, pos.0));
                        return Ok(());
                    }
                    if pos.field() >= field_count {
                        report.fail(format!(
                            "'{}': doc {} field {} out of range", name, doc_id.0, pos.field()));
                    }
                    last_pos = pos.0;
                    doc_hits += 1;
                }
                Ok(None) => break,
                Err(err) => {
                    report.fail(format!("'{}': hitlist decode failed: {}", name, err));
                    return Ok(());
                }
            }
        }
        if doc_hits != reader.doc_hits {
            report.fail(format!(
                "'{}': doc {} hit count mismatch (doclist {}, hitlist {})",
                name, doc_id.0, reader.doc_hits, doc_hits));
        }
        hits += doc_hits as u64;
    }

    if docs != entry.docs {
        report.fail(format!("'{}': doc count mismatch (dict {}, doclist {})", name, entry.docs, docs));
    }
    if !hitless && hits != entry.hits as u64 {
        report.fail(format!("'{}': hit count mismatch (dict {}, lists {})", name, entry.hits, hits));
    }

    // Skip-list round trip against the live decode
    if docs > SKIPLIST_DOC_THRESH && !hitless {
        let Some(skip_data) = index.skiplist_data() else {
            report.fail(format!("'{}': skip list expected but file is absent", name));
            return Ok(());
        };
        let Some(offset) = entry.skiplist_offset else {
            report.fail(format!("'{}': skip list expected but dict entry has none", name));
            return Ok(());
        };
        match read_skiplist(skip_data, offset, skiplist_entry_count(docs), entry.doclist_offset) {
            Ok(decoded) => {
                for (i, on_disk) in decoded.iter().enumerate() {
                    let Some(&(doc, doclist_pos, hit_pos)) = snapshots.get(i) else { break };
                    if on_disk.base_doc_id != DocId(doc)
                        || on_disk.doclist_offset != doclist_pos
                        || on_disk.base_hitlist_pos != hit_pos
                    {
                        report.fail(format!(
                            "'{}': skip entry {} mismatch (disk {:?}, live ({}, {}, {}))",
                            name, i, on_disk, doc, doclist_pos, hit_pos));
                        break;
                    }
                }
            }
            Err(err) => report.fail(format!("'{}': skip list decode failed: {}", name, err)),
        }
    }
    Ok(())
}

fn check_rows(index: &DiskIndex, report: &mut CheckReport) -> Result<()> {
    let schema = index.header.schema.clone();
    let width = schema.row_width() as usize;
    let attrs = index.rows_guard();
    let strings_pool = index.strings_guard();
    let mva_data = index.mva_data();
    let row_count = index.row_count();

    let mut last_doc = 0u64;
    for row_idx in 0..row_count {
        if report.full() {
            return Ok(());
        }
        report.checked_rows += 1;
        let row = &attrs[row_idx * width..(row_idx + 1) * width];
        let doc_id = RowAccess::doc_id(row);
        if doc_id.0 <= last_doc {
            report.fail(format!("row {}: non-ascending doc id {}", row_idx, doc_id.0));
        }
        last_doc = doc_id.0;

        for attr in &schema.attrs {
            let raw = RowAccess::get_attr(row, attr.locator);
            if attr.attr_type.is_mva() {
                let slot = raw as u32;
                if slot & MVA_ARENA_FLAG != 0 {
                    continue;
                }
                match crate::attr::mva::read_values(
                    mva_data, slot, attr.attr_type == AttrType::Int64Set) {
                    Ok(values) => {
                        if !values.windows(2).all(|pair| pair[0] < pair[1]) {
                            report.fail(format!(
                                "doc {}: mva '{}' not strictly ascending", doc_id.0, attr.name));
                        }
                    }
                    Err(err) => {
                        report.fail(format!("doc {}: mva '{}' unreadable: {}", doc_id.0, attr.name, err));
                    }
                }
            } else if attr.attr_type.is_string_like() {
                if let Err(err) = strings::read_blob(&strings_pool, raw as u32) {
                    report.fail(format!(
                        "doc {}: string '{}' offset invalid: {}", doc_id.0, attr.name, err));
                }
            }
        }
    }
    Ok(())
}

fn check_minmax(index: &DiskIndex, report: &mut CheckReport) -> Result<()> {
    let schema = index.header.schema.clone();
    let width = schema.row_width() as usize;
    let attrs = index.rows_guard();
    let row_count = index.row_count();
    if row_count == 0 {
        return Ok(());
    }
    let block_count = index.minmax_block_count();

    for block in 0..block_count {
        let view = index.minmax_block(&attrs, block);
        let first = block * MINMAX_BLOCK_ROWS;
        let last = (first + MINMAX_BLOCK_ROWS).min(row_count);
        for row_idx in first..last {
            if report.full() {
                return Ok(());
            }
            let row = &attrs[row_idx * width..(row_idx + 1) * width];
            if !view.envelopes(&schema, row) {
                report.fail(format!(
                    "block {}: row {} escapes the min/max envelope", block, row_idx));
            }
        }
    }

    let overall = index.minmax_block(&attrs, block_count);
    for row_idx in 0..row_count {
        if report.full() {
            return Ok(());
        }
        let row = &attrs[row_idx * width..(row_idx + 1) * width];
        if !overall.envelopes(&schema, row) {
            report.fail(format!("row {} escapes the index-wide envelope", row_idx));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::disk_index::OpenSettings;
    use crate::attr::update::{update_attributes, DocUpdate, UpdateRequest, UpdateValue};
    use crate::index::indexer::{AttrValue, Indexer, IndexerSettings, SourceDocument, VecSource};
    use crate::schema::schema::Schema;

    fn build(dir: &std::path::Path, docs: usize) -> DiskIndex {
        let mut schema = Schema::new();
        schema.add_field("content").unwrap();
        schema.add_attr("price", AttrType::Int).unwrap();
        schema.add_attr("tags", AttrType::Uint32Set).unwrap();
        schema.add_attr("name", AttrType::String).unwrap();

        let docs: Vec<SourceDocument> = (1..=docs as u64).map(|id| SourceDocument {
            doc_id: DocId(id),
            fields: vec![format!("common word item{}", id)],
            attrs: vec![
                AttrValue::Int(id * 3),
                AttrValue::Mva(vec![id, id + 10]),
                AttrValue::Str(format!("name{}", id)),
            ],
        }).collect();

        let mut indexer = Indexer::new(IndexerSettings::plain(schema));
        indexer.build(dir.join("idx"), &mut VecSource::new(docs)).unwrap();
        DiskIndex::open(dir.join("idx"), OpenSettings::default()).unwrap()
    }

    #[test]
    fn test_fresh_index_checks_clean() {
        let dir = tempfile::tempdir().unwrap();
        // Enough docs to exercise skip lists and several blocks
        let index = build(dir.path(), 400);
        let report = check(&index).unwrap();
        assert!(report.ok(), "failures: {:?}", report.failures);
        assert!(report.checked_words >= 3);
        assert_eq!(report.checked_rows, 400);
    }

    #[test]
    fn test_checker_still_clean_after_update() {
        let dir = tempfile::tempdir().unwrap();
        let index = build(dir.path(), 200);

        let request = UpdateRequest {
            strict: false,
            updates: vec![DocUpdate {
                doc_id: DocId(10),
                values: vec![("price".to_string(), UpdateValue::Int(1_000_000))],
            }],
        };
        assert_eq!(update_attributes(&index, &request).unwrap().updated, 1);

        let report = check(&index).unwrap();
        assert!(report.ok(), "failures: {:?}", report.failures);
    }

    #[test]
    fn test_checker_catches_corrupt_minmax() {
        let dir = tempfile::tempdir().unwrap();
        let index = build(dir.path(), 10);

        // Break the envelope behind the checker's back
        {
            let mut attrs = index.attrs.write();
            let locator = index.header.schema.attr("price").unwrap().locator;
            let width = index.row_width();
            let row = &mut attrs[..width];
            RowAccess::set_attr(row, locator, 999_999);
        }
        let report = check(&index).unwrap();
        assert!(!report.ok());
        assert!(report.failures.iter().any(|f| f.contains("envelope")));
    }

    #[test]
    fn test_failure_cap() {
        let mut report = CheckReport::default();
        for i in 0..500 {
            report.fail(format!("failure {}", i));
        }
        assert_eq!(report.failures.len(), MAX_FAILURES);
    }
}
