use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::config::ThrottleConfig;
use crate::core::error::Result;
use crate::core::types::DocId;
use crate::io::reader::FileReader;
use crate::io::throttle::IoStats;
use crate::io::writer::FileWriter;
use crate::schema::schema::RowAccess;

/// Bounded row accumulator. Rows arrive in source order; full pools
/// are sorted by doc id and spilled to a temp file as one block, and
/// the blocks k-way merge at finalize.
pub struct RowPool {
    row_width: usize,
    limit_rows: usize,
    rows: Vec<u32>,
    temp_path: PathBuf,
    writer: Option<FileWriter>,
    spilled_blocks: Vec<u64>,
    throttle: ThrottleConfig,
    stats: Arc<IoStats>,
}

impl RowPool {
    pub fn new(
        row_width: usize,
        limit_rows: usize,
        temp_path: impl AsRef<Path>,
        throttle: ThrottleConfig,
        stats: Arc<IoStats>,
    ) -> Self {
        RowPool {
            row_width,
            limit_rows: limit_rows.max(2),
            rows: Vec::new(),
            temp_path: temp_path.as_ref().to_path_buf(),
            writer: None,
            spilled_blocks: Vec::new(),
            throttle,
            stats,
        }
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn push(&mut self, row: &[u32]) -> Result<()> {
        debug_assert_eq!(row.len(), self.row_width);
        self.rows.extend_from_slice(row);
        if self.rows.len() / self.row_width >= self.limit_rows {
            self.spill()?;
        }
        Ok(())
    }

    fn sorted_order(&self) -> Vec<usize> {
        let count = self.rows.len() / self.row_width;
        let mut order: Vec<usize> = (0..count).collect();
        order.sort_by_key(|&i| {
            RowAccess::doc_id(&self.rows[i * self.row_width..(i + 1) * self.row_width])
        });
        order
    }

    fn spill(&mut self) -> Result<()> {
        if self.rows.is_empty() {
            return Ok(());
        }
        if self.writer.is_none() {
            self.writer = Some(FileWriter::create(
                &self.temp_path,
                256 * 1024,
                self.throttle,
                Arc::clone(&self.stats),
            )?);
        }
        let order = self.sorted_order();
        let writer = self.writer.as_mut().unwrap();
        for &i in &order {
            for &word in &self.rows[i * self.row_width..(i + 1) * self.row_width] {
                writer.write_u32(word)?;
            }
        }
        self.spilled_blocks.push(order.len() as u64);
        self.rows.clear();
        Ok(())
    }

    /// Sort what is still in memory and open merge cursors over every
    /// block.
    pub fn finish(mut self) -> Result<RowMerge> {
        let order = self.sorted_order();
        let mut mem_rows = Vec::with_capacity(self.rows.len());
        for &i in &order {
            mem_rows.extend_from_slice(&self.rows[i * self.row_width..(i + 1) * self.row_width]);
        }

        if let Some(writer) = self.writer.take() {
            writer.finish()?;
        }

        let mut cursors = Vec::new();
        let mut offset = 0u64;
        for &rows in &self.spilled_blocks {
            let mut reader = FileReader::open(
                &self.temp_path,
                256 * 1024,
                self.throttle,
                Arc::clone(&self.stats),
            )?;
            reader.seek(offset)?;
            offset += rows * self.row_width as u64 * 4;
            cursors.push(RowCursor {
                reader: Some(reader),
                mem: Vec::new(),
                mem_cursor: 0,
                remaining: rows as usize,
                current: None,
            });
        }
        cursors.push(RowCursor {
            reader: None,
            remaining: mem_rows.len() / self.row_width,
            mem: mem_rows,
            mem_cursor: 0,
            current: None,
        });

        let mut merge = RowMerge {
            row_width: self.row_width,
            cursors,
            duplicates: 0,
        };
        for i in 0..merge.cursors.len() {
            merge.advance(i)?;
        }
        Ok(merge)
    }
}

struct RowCursor {
    reader: Option<FileReader>,
    mem: Vec<u32>,
    mem_cursor: usize,
    remaining: usize,
    current: Option<Vec<u32>>,
}

/// K-way merge over sorted row blocks. Equal doc ids keep the
/// earliest block's row and count the rest as duplicates.
pub struct RowMerge {
    row_width: usize,
    cursors: Vec<RowCursor>,
    pub duplicates: u64,
}

impl RowMerge {
    fn advance(&mut self, idx: usize) -> Result<()> {
        let width = self.row_width;
        let cursor = &mut self.cursors[idx];
        if cursor.remaining == 0 {
            cursor.current = None;
            return Ok(());
        }
        cursor.remaining -= 1;
        let mut row = vec![0u32; width];
        match &mut cursor.reader {
            Some(reader) => {
                for slot in row.iter_mut() {
                    *slot = reader.read_u32()?;
                }
            }
            None => {
                row.copy_from_slice(&cursor.mem[cursor.mem_cursor..cursor.mem_cursor + width]);
                cursor.mem_cursor += width;
            }
        }
        cursor.current = Some(row);
        Ok(())
    }

    pub fn next_row(&mut self) -> Result<Option<Vec<u32>>> {
        let mut best: Option<(DocId, usize)> = None;
        for (idx, cursor) in self.cursors.iter().enumerate() {
            if let Some(row) = &cursor.current {
                let doc_id = RowAccess::doc_id(row);
                if best.map_or(true, |(min, _)| doc_id < min) {
                    best = Some((doc_id, idx));
                }
            }
        }
        let Some((doc_id, winner)) = best else { return Ok(None) };

        let row = self.cursors[winner].current.take().unwrap();
        self.advance(winner)?;

        // Drop every other block's row with the same id
        for idx in 0..self.cursors.len() {
            while self.cursors[idx].current.as_ref()
                .map_or(false, |r| RowAccess::doc_id(r) == doc_id)
            {
                self.cursors[idx].current = None;
                self.duplicates += 1;
                self.advance(idx)?;
            }
        }
        Ok(Some(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::schema::{AttrType, Schema};

    fn pool(dir: &Path, schema: &Schema, limit: usize) -> RowPool {
        RowPool::new(
            schema.row_width() as usize,
            limit,
            dir.join("rows.tmp"),
            ThrottleConfig::default(),
            Arc::new(IoStats::default()),
        )
    }

    fn row(schema: &Schema, doc: u64, price: u64) -> Vec<u32> {
        let mut row = vec![0u32; schema.row_width() as usize];
        RowAccess::set_doc_id(&mut row, DocId(doc));
        RowAccess::set_attr(&mut row, schema.attr("price").unwrap().locator, price);
        row
    }

    fn schema() -> Schema {
        let mut schema = Schema::new();
        schema.add_attr("price", AttrType::Int).unwrap();
        schema
    }

    #[test]
    fn test_merge_across_spills() {
        let dir = tempfile::tempdir().unwrap();
        let schema = schema();
        let mut pool = pool(dir.path(), &schema, 2);

        // Out of order, forcing two spilled blocks plus memory
        for doc in [5u64, 1, 9, 3, 7] {
            pool.push(&row(&schema, doc, doc * 10)).unwrap();
        }
        let mut merge = pool.finish().unwrap();
        let mut docs = Vec::new();
        while let Some(row) = merge.next_row().unwrap() {
            docs.push(RowAccess::doc_id(&row).0);
            assert_eq!(
                RowAccess::get_attr(&row, schema.attr("price").unwrap().locator),
                RowAccess::doc_id(&row).0 * 10
            );
        }
        assert_eq!(docs, vec![1, 3, 5, 7, 9]);
        assert_eq!(merge.duplicates, 0);
    }

    #[test]
    fn test_duplicate_docids_keep_first() {
        let dir = tempfile::tempdir().unwrap();
        let schema = schema();
        let mut pool = pool(dir.path(), &schema, 2);

        pool.push(&row(&schema, 1, 111)).unwrap();
        pool.push(&row(&schema, 2, 222)).unwrap();
        // Same id again in a later block with a different payload
        pool.push(&row(&schema, 1, 999)).unwrap();

        let mut merge = pool.finish().unwrap();
        let first = merge.next_row().unwrap().unwrap();
        assert_eq!(RowAccess::doc_id(&first), DocId(1));
        assert_eq!(RowAccess::get_attr(&first, schema.attr("price").unwrap().locator), 111);
        let second = merge.next_row().unwrap().unwrap();
        assert_eq!(RowAccess::doc_id(&second), DocId(2));
        assert!(merge.next_row().unwrap().is_none());
        assert_eq!(merge.duplicates, 1);
    }
}
