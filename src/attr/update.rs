use std::sync::atomic::Ordering;

use crate::attr::json::{inplace_update, JsonScalar};
use crate::attr::minmax::MINMAX_BLOCK_ROWS;
use crate::attr::mva::ArenaHandle;
use crate::attr::strings;
use crate::core::disk_index::{
    DiskIndex, STATUS_ATTRS_UPDATED, STATUS_MVA_UPDATED, STATUS_STRINGS_UPDATED,
};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::DocId;
use crate::io::reader::FileReader;
use crate::io::writer::FileWriter;
use crate::mmap::mmap_file::MmapFile;
use crate::schema::schema::{AttrType, RowAccess};
use crate::storage::fileset::IndexFile;

/// One new value for one attribute of one document.
#[derive(Debug, Clone)]
pub enum UpdateValue {
    Int(u64),
    Float(f32),
    Mva(Vec<u64>),
    JsonField { path: String, value: JsonScalar },
}

#[derive(Debug, Clone)]
pub struct DocUpdate {
    pub doc_id: DocId,
    pub values: Vec<(String, UpdateValue)>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    /// Validate everything first; abort with no side effects on any
    /// failure.
    pub strict: bool,
    pub updates: Vec<DocUpdate>,
}

#[derive(Debug, Default)]
pub struct UpdateResult {
    pub updated: usize,
    pub warning: Option<String>,
}

fn type_accepts(attr_type: AttrType, value: &UpdateValue) -> bool {
    match value {
        UpdateValue::Int(_) => matches!(
            attr_type,
            AttrType::Int | AttrType::Bool | AttrType::Timestamp | AttrType::BigInt | AttrType::Float
        ),
        UpdateValue::Float(_) => matches!(attr_type, AttrType::Float | AttrType::BigInt),
        UpdateValue::Mva(_) => attr_type.is_mva(),
        UpdateValue::JsonField { .. } => attr_type == AttrType::Json,
    }
}

/// Widen the containing block's min/max pair (and the index-wide
/// pair) so they still envelope the new value.
fn widen_minmax(index: &DiskIndex, attrs: &mut [u32], row_idx: usize, attr_idx: usize, raw: u64) {
    let schema = &index.header.schema;
    let attr = &schema.attrs[attr_idx];
    let width = schema.row_width() as usize;
    let tail = index.header.minmax_words_offset as usize;
    if tail == 0 {
        return;
    }
    let block_count = index.row_count().div_ceil(MINMAX_BLOCK_ROWS);
    let pairs = [row_idx / MINMAX_BLOCK_ROWS, block_count];
    for pair in pairs {
        let min_at = tail + pair * 2 * width;
        let max_at = min_at + width;
        if attr.attr_type == AttrType::Float {
            let value = f32::from_bits(raw as u32);
            let min_row = &mut attrs[min_at..min_at + width];
            if value < RowAccess::get_float(min_row, attr.locator) {
                RowAccess::set_float(min_row, attr.locator, value);
            }
            let max_row = &mut attrs[max_at..max_at + width];
            if value > RowAccess::get_float(max_row, attr.locator) {
                RowAccess::set_float(max_row, attr.locator, value);
            }
        } else {
            let min_row = &mut attrs[min_at..min_at + width];
            if raw < RowAccess::get_attr(min_row, attr.locator) {
                RowAccess::set_attr(min_row, attr.locator, raw);
            }
            let max_row = &mut attrs[max_at..max_at + width];
            if raw > RowAccess::get_attr(max_row, attr.locator) {
                RowAccess::set_attr(max_row, attr.locator, raw);
            }
        }
    }
}

fn mva_words(attr_type: AttrType, values: &[u64]) -> Vec<u32> {
    let mut words = Vec::new();
    for &value in values {
        words.push(value as u32);
        if attr_type == AttrType::Int64Set {
            words.push((value >> 32) as u32);
        }
    }
    words
}

/// In-place attribute patching. Fixed-width slots are written
/// directly; MVA lists go through the arena with full prealloc and
/// rollback; JSON scalars retag in the string heap.
pub fn update_attributes(index: &DiskIndex, request: &UpdateRequest) -> Result<UpdateResult> {
    let schema = &index.header.schema;

    // Static validation runs for both modes
    for doc in &request.updates {
        for (name, value) in &doc.values {
            let attr = schema.attr(name)
                .ok_or_else(|| Error::schema(format!("unknown attribute '{}'", name)))?;
            if !attr.attr_type.updatable() {
                return Err(Error::schema(format!("attribute '{}' is not updatable", name)));
            }
            if !type_accepts(attr.attr_type, value) {
                return Err(Error::schema(format!("type mismatch updating '{}'", name)));
            }
        }
    }

    // Strict mode: resolve every row and json path before any write
    if request.strict {
        let attrs = index.attrs.read();
        let strings_pool = index.strings.read();
        let width = index.row_width();
        for doc in &request.updates {
            let row_idx = index.find_row_locked(&attrs, doc.doc_id)
                .ok_or_else(|| Error::schema(format!("doc {} not in index", doc.doc_id.0)))?;
            let row = &attrs[row_idx * width..(row_idx + 1) * width];
            for (name, value) in &doc.values {
                if let UpdateValue::JsonField { path, value: scalar } = value {
                    let attr = schema.attr(name).unwrap();
                    let offset = RowAccess::get_attr(row, attr.locator) as u32;
                    let blob = strings::read_blob(&strings_pool, offset)?;
                    let mut probe = blob.to_vec();
                    inplace_update(&mut probe, path, *scalar)?;
                }
            }
        }
    }

    // Preallocate every arena slot up front; roll all of them back if
    // any allocation fails
    let mut prealloc: Vec<(usize, usize, ArenaHandle)> = Vec::new();
    for (doc_pos, doc) in request.updates.iter().enumerate() {
        for (value_pos, (name, value)) in doc.values.iter().enumerate() {
            let UpdateValue::Mva(values) = value else { continue };
            let attr = schema.attr(name).unwrap();
            let mut sorted = values.clone();
            sorted.sort_unstable();
            sorted.dedup();
            let words = mva_words(attr.attr_type, &sorted);
            match index.arena.alloc(&words) {
                Ok(handle) => prealloc.push((doc_pos, value_pos, handle)),
                Err(err) => {
                    for (_, _, handle) in prealloc {
                        index.arena.free(handle);
                    }
                    return Err(err);
                }
            }
        }
    }

    let mut result = UpdateResult::default();
    let mut skipped = 0usize;
    let width = index.row_width();
    let mut attrs = index.attrs.write();

    for (doc_pos, doc) in request.updates.iter().enumerate() {
        let Some(row_idx) = index.find_row_locked(&attrs, doc.doc_id) else {
            skipped += 1;
            if result.warning.is_none() {
                result.warning = Some(format!("doc {} not in index", doc.doc_id.0));
            }
            continue;
        };

        let mut doc_applied = false;
        for (value_pos, (name, value)) in doc.values.iter().enumerate() {
            let attr = schema.attr(name).unwrap();
            let attr_idx = schema.attr_index(name).unwrap();
            let row = &mut attrs[row_idx * width..(row_idx + 1) * width];
            match value {
                UpdateValue::Int(raw) => {
                    let stored = if attr.attr_type == AttrType::Float {
                        (*raw as f32).to_bits() as u64
                    } else {
                        *raw
                    };
                    RowAccess::set_attr(row, attr.locator, stored);
                    widen_minmax(index, &mut attrs, row_idx, attr_idx, stored);
                    index.attrs_status.fetch_or(STATUS_ATTRS_UPDATED, Ordering::Relaxed);
                    doc_applied = true;
                }
                UpdateValue::Float(raw) => {
                    RowAccess::set_float(row, attr.locator, *raw);
                    widen_minmax(index, &mut attrs, row_idx, attr_idx, raw.to_bits() as u64);
                    index.attrs_status.fetch_or(STATUS_ATTRS_UPDATED, Ordering::Relaxed);
                    doc_applied = true;
                }
                UpdateValue::Mva(values) => {
                    let handle = prealloc.iter()
                        .find(|(d, v, _)| *d == doc_pos && *v == value_pos)
                        .map(|(_, _, h)| *h)
                        .expect("preallocated above");
                    let old_slot = RowAccess::get_attr(row, attr.locator) as u32;
                    RowAccess::set_attr(row, attr.locator, handle.to_slot() as u64);
                    if let Some(off) = ArenaHandle::from_slot(old_slot) {
                        // Previous live-updated list goes back to the pool
                        index.arena.free(ArenaHandle {
                            gen: index.arena.slot_gen(off).unwrap_or(0),
                            off,
                        });
                    }
                    let mut sorted = values.clone();
                    sorted.sort_unstable();
                    sorted.dedup();
                    let mva_attr_pos = schema.mva_attrs().iter().position(|&i| i == attr_idx).unwrap();
                    index.mva_log.lock().entry(doc.doc_id.0).or_default()
                        .retain(|(pos, _)| *pos != mva_attr_pos);
                    index.mva_log.lock().entry(doc.doc_id.0).or_default()
                        .push((mva_attr_pos, sorted));
                    index.attrs_status.fetch_or(STATUS_MVA_UPDATED, Ordering::Relaxed);
                    doc_applied = true;
                }
                UpdateValue::JsonField { path, value: scalar } => {
                    let offset = RowAccess::get_attr(row, attr.locator) as u32;
                    let mut strings_pool = index.strings.write();
                    let (start, len) = match blob_range(&strings_pool, offset) {
                        Ok(range) => range,
                        Err(err) => {
                            if request.strict {
                                return Err(err);
                            }
                            skipped += 1;
                            if result.warning.is_none() {
                                result.warning = Some(err.to_string());
                            }
                            continue;
                        }
                    };
                    match inplace_update(&mut strings_pool[start..start + len], path, *scalar) {
                        Ok(()) => {
                            index.attrs_status.fetch_or(STATUS_STRINGS_UPDATED, Ordering::Relaxed);
                            doc_applied = true;
                        }
                        Err(err) => {
                            if request.strict {
                                return Err(err);
                            }
                            skipped += 1;
                            if result.warning.is_none() {
                                result.warning = Some(err.to_string());
                            }
                        }
                    }
                }
            }
        }
        if doc_applied {
            result.updated += 1;
        }
    }

    if skipped > 0 {
        result.warning = Some(format!(
            "{} update(s) skipped; first: {}", skipped,
            result.warning.take().unwrap_or_default()));
    }
    Ok(result)
}

fn blob_range(heap: &[u8], offset: u32) -> Result<(usize, usize)> {
    let payload = strings::read_blob(heap, offset)?;
    if payload.is_empty() {
        return Err(Error::schema("json attribute is empty"));
    }
    let total = strings::record_len(heap, offset)?;
    let start = offset as usize + (total - payload.len());
    Ok((start, payload.len()))
}

/// Flush updated attribute state: `.spa.tmpnew` (and `.sps`, `.mvp`
/// as needed), then juggle each file in. Returns false when nothing
/// was dirty.
pub fn save_attributes(index: &DiskIndex) -> Result<bool> {
    let status = index.attrs_status.load(Ordering::Relaxed);
    if status == 0 {
        return Ok(false);
    }

    let throttle = crate::core::config::ThrottleConfig::default();
    let buffer = crate::core::config::WRITE_BUFFER_DEFAULT;

    {
        let attrs = index.attrs.read();
        let mut writer = FileWriter::create(
            index.files.tmp_new(IndexFile::Attrs), buffer, throttle, index.stats.clone())?;
        for &word in attrs.iter() {
            writer.write_u32(word)?;
        }
        writer.finish()?;
    }
    index.files.juggle(IndexFile::Attrs)?;

    if status & STATUS_STRINGS_UPDATED != 0 {
        let strings_pool = index.strings.read();
        let mut writer = FileWriter::create(
            index.files.tmp_new(IndexFile::Strings), buffer, throttle, index.stats.clone())?;
        writer.write_bytes(&strings_pool)?;
        writer.finish()?;
        drop(strings_pool);
        index.files.juggle(IndexFile::Strings)?;
    }

    if status & STATUS_MVA_UPDATED != 0 {
        let log = index.mva_log.lock();
        let mut writer = FileWriter::create(
            index.files.tmp_new(IndexFile::MvaLog), buffer, throttle, index.stats.clone())?;
        writer.write_u32(log.len() as u32)?;
        for &doc_id in log.keys() {
            writer.write_u64(doc_id)?;
        }
        let mva_attrs = index.header.schema.mva_attrs();
        for lists in log.values() {
            for mva_pos in 0..mva_attrs.len() {
                match lists.iter().find(|(pos, _)| *pos == mva_pos) {
                    Some((_, values)) => {
                        let attr_type = index.header.schema.attrs[mva_attrs[mva_pos]].attr_type;
                        let words = mva_words(attr_type, values);
                        writer.write_u32(words.len() as u32)?;
                        for word in words {
                            writer.write_u32(word)?;
                        }
                    }
                    None => writer.write_u32(u32::MAX)?,
                }
            }
        }
        writer.finish()?;
        drop(log);
        index.files.juggle(IndexFile::MvaLog)?;
    }

    index.attrs_status.store(0, Ordering::Relaxed);
    log::debug!("saved attributes for {}", index.files.base.display());
    Ok(true)
}

/// Replay the persistent MVA log after open: realloc each logged list
/// in the arena and repoint the rows.
pub fn replay_mva_log(index: &DiskIndex) -> Result<u64> {
    let path = index.files.path(IndexFile::MvaLog);
    if !path.exists() || MmapFile::open(&path)?.is_empty() {
        return Ok(0);
    }
    let mut reader = FileReader::open(
        &path, 64 * 1024, crate::core::config::ThrottleConfig::default(), index.stats.clone())?;
    let affected = reader.read_u32()? as usize;
    let mut doc_ids = Vec::with_capacity(affected);
    for _ in 0..affected {
        doc_ids.push(DocId(reader.read_u64()?));
    }

    let schema = index.header.schema.clone();
    let mva_attrs = schema.mva_attrs();
    let width = index.row_width();
    let mut replayed = 0u64;
    let mut attrs = index.attrs.write();
    for doc_id in doc_ids {
        for &attr_idx in &mva_attrs {
            let count = reader.read_u32()?;
            if count == u32::MAX {
                continue;
            }
            let mut words = Vec::with_capacity(count as usize);
            for _ in 0..count {
                words.push(reader.read_u32()?);
            }
            let Some(row_idx) = index.find_row_locked(&attrs, doc_id) else { continue };
            let handle = index.arena.alloc(&words)?;
            let row = &mut attrs[row_idx * width..(row_idx + 1) * width];
            RowAccess::set_attr(row, schema.attrs[attr_idx].locator, handle.to_slot() as u64);
            let mva_pos = mva_attrs.iter().position(|&i| i == attr_idx).unwrap();
            index.mva_log.lock().entry(doc_id.0).or_default().push((
                mva_pos,
                words.chunks(if schema.attrs[attr_idx].attr_type == AttrType::Int64Set { 2 } else { 1 })
                    .map(|c| (c[0] as u64) | ((*c.get(1).unwrap_or(&0) as u64) << 32))
                    .collect(),
            ));
            replayed += 1;
        }
    }
    if replayed > 0 {
        index.attrs_status.fetch_or(STATUS_MVA_UPDATED, Ordering::Relaxed);
    }
    Ok(replayed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::disk_index::OpenSettings;
    use crate::core::types::StopFlag;
    use crate::index::indexer::{AttrValue, Indexer, IndexerSettings, SourceDocument, VecSource};
    use crate::schema::schema::Schema;
    use crate::search::context::{QueryContext, QueryOptions};
    use crate::search::filter::{FilterSpec, MvaFunc};
    use crate::search::scan::full_scan;

    fn build(dir: &std::path::Path) -> DiskIndex {
        let mut schema = Schema::new();
        schema.add_field("content").unwrap();
        schema.add_attr("price", AttrType::Int).unwrap();
        schema.add_attr("tags", AttrType::Uint32Set).unwrap();
        schema.add_attr("payload", AttrType::Json).unwrap();

        let docs = vec![SourceDocument {
            doc_id: DocId(1),
            fields: vec!["widget".to_string()],
            attrs: vec![
                AttrValue::Int(100),
                AttrValue::Mva(vec![10, 20, 30]),
                AttrValue::Json(r#"{"stock": 5}"#.to_string()),
            ],
        }];
        let mut indexer = Indexer::new(IndexerSettings::plain(schema));
        indexer.build(dir.join("idx"), &mut VecSource::new(docs)).unwrap();
        DiskIndex::open(dir.join("idx"), OpenSettings::default()).unwrap()
    }

    fn int_update(doc: u64, attr: &str, value: u64) -> UpdateRequest {
        UpdateRequest {
            strict: false,
            updates: vec![DocUpdate {
                doc_id: DocId(doc),
                values: vec![(attr.to_string(), UpdateValue::Int(value))],
            }],
        }
    }

    #[test]
    fn test_fixed_width_update_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let index = build(dir.path());

        let result = update_attributes(&index, &int_update(1, "price", 777)).unwrap();
        assert_eq!(result.updated, 1);

        let row = index.read_row(index.find_row(DocId(1)).unwrap());
        let locator = index.header.schema.attr("price").unwrap().locator;
        assert_eq!(RowAccess::get_attr(&row, locator), 777);

        assert!(save_attributes(&index).unwrap());
        assert!(!save_attributes(&index).unwrap());

        // Survives a reopen
        let reopened = DiskIndex::open(dir.path().join("idx"), OpenSettings::default()).unwrap();
        let row = reopened.read_row(reopened.find_row(DocId(1)).unwrap());
        assert_eq!(RowAccess::get_attr(&row, locator), 777);
    }

    #[test]
    fn test_minmax_widened_by_update() {
        let dir = tempfile::tempdir().unwrap();
        let index = build(dir.path());
        update_attributes(&index, &int_update(1, "price", 100_000)).unwrap();

        // The updated value still passes the block prefilter
        let options = QueryOptions {
            filters: vec![FilterSpec::range("price", 99_999, 200_000)],
            ..Default::default()
        };
        let ctx = QueryContext::new(&index.header.schema, &options, StopFlag::new()).unwrap();
        let matches = full_scan(&index, &ctx).unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn test_mva_update_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let index = build(dir.path());

        let request = UpdateRequest {
            strict: false,
            updates: vec![DocUpdate {
                doc_id: DocId(1),
                values: vec![("tags".to_string(), UpdateValue::Mva(vec![25, 5]))],
            }],
        };
        assert_eq!(update_attributes(&index, &request).unwrap().updated, 1);

        // Query through the arena-backed slot
        let mut spec = FilterSpec::values("tags", [25u64]);
        spec.mva_func = MvaFunc::Any;
        let options = QueryOptions { filters: vec![spec], ..Default::default() };
        let ctx = QueryContext::new(&index.header.schema, &options, StopFlag::new()).unwrap();
        assert_eq!(full_scan(&index, &ctx).unwrap().len(), 1);

        // Old values are gone
        let mut spec = FilterSpec::values("tags", [10u64]);
        spec.mva_func = MvaFunc::Any;
        let options = QueryOptions { filters: vec![spec], ..Default::default() };
        let ctx = QueryContext::new(&index.header.schema, &options, StopFlag::new()).unwrap();
        assert!(full_scan(&index, &ctx).unwrap().is_empty());

        // Save writes a non-empty persistent log, and the values
        // survive a reopen
        assert!(save_attributes(&index).unwrap());
        let log_len = std::fs::metadata(index.files.path(IndexFile::MvaLog)).unwrap().len();
        assert!(log_len > 0);

        let reopened = DiskIndex::open(dir.path().join("idx"), OpenSettings::default()).unwrap();
        let mut spec = FilterSpec::values("tags", [25u64]);
        spec.mva_func = MvaFunc::Any;
        let options = QueryOptions { filters: vec![spec], ..Default::default() };
        let ctx = QueryContext::new(&reopened.header.schema, &options, StopFlag::new()).unwrap();
        assert_eq!(full_scan(&reopened, &ctx).unwrap().len(), 1);
    }

    #[test]
    fn test_json_inplace_update() {
        let dir = tempfile::tempdir().unwrap();
        let index = build(dir.path());

        let request = UpdateRequest {
            strict: true,
            updates: vec![DocUpdate {
                doc_id: DocId(1),
                values: vec![("payload".to_string(), UpdateValue::JsonField {
                    path: "stock".to_string(),
                    value: JsonScalar::Int32(42),
                })],
            }],
        };
        assert_eq!(update_attributes(&index, &request).unwrap().updated, 1);

        let row = index.read_row(index.find_row(DocId(1)).unwrap());
        let locator = index.header.schema.attr("payload").unwrap().locator;
        let offset = RowAccess::get_attr(&row, locator) as u32;
        let strings_pool = index.strings_guard();
        let blob = strings::read_blob(&strings_pool, offset).unwrap();
        let at = crate::attr::json::locate(blob, "stock").unwrap().unwrap();
        match crate::attr::json::read_scalar(blob, at).unwrap() {
            JsonScalar::Int32(v) => assert_eq!(v, 42),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_strict_mode_aborts_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let index = build(dir.path());

        let request = UpdateRequest {
            strict: true,
            updates: vec![
                DocUpdate {
                    doc_id: DocId(1),
                    values: vec![("price".to_string(), UpdateValue::Int(5))],
                },
                DocUpdate {
                    doc_id: DocId(999),
                    values: vec![("price".to_string(), UpdateValue::Int(6))],
                },
            ],
        };
        assert!(update_attributes(&index, &request).is_err());

        // Nothing was applied
        let row = index.read_row(index.find_row(DocId(1)).unwrap());
        let locator = index.header.schema.attr("price").unwrap().locator;
        assert_eq!(RowAccess::get_attr(&row, locator), 100);
    }

    #[test]
    fn test_non_strict_skips_and_warns() {
        let dir = tempfile::tempdir().unwrap();
        let index = build(dir.path());

        let request = UpdateRequest {
            strict: false,
            updates: vec![
                DocUpdate {
                    doc_id: DocId(999),
                    values: vec![("price".to_string(), UpdateValue::Int(6))],
                },
                DocUpdate {
                    doc_id: DocId(1),
                    values: vec![("price".to_string(), UpdateValue::Int(5))],
                },
            ],
        };
        let result = update_attributes(&index, &request).unwrap();
        assert_eq!(result.updated, 1);
        assert!(result.warning.unwrap().contains("skipped"));
    }

    #[test]
    fn test_bad_attribute_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let index = build(dir.path());
        let err = update_attributes(&index, &int_update(1, "ghost", 1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Schema);
    }
}
