use crate::core::types::DocId;
use crate::schema::schema::{AttrType, RowAccess, Schema};

/// Rows per min/max summary block.
pub const MINMAX_BLOCK_ROWS: usize = 128;

fn is_ranged(attr_type: AttrType) -> bool {
    matches!(
        attr_type,
        AttrType::Int | AttrType::Bool | AttrType::Timestamp
            | AttrType::BigInt | AttrType::Float | AttrType::TokenCount
    )
}

/// Builds the `.spa` tail: for every block of up to 128 rows, one
/// synthetic min row and one max row; a final pair envelopes the whole
/// index. Floats compare as floats, everything else as unsigned.
pub struct AttrIndexBuilder {
    schema: Schema,
    row_width: usize,
    block_min: Vec<u32>,
    block_max: Vec<u32>,
    rows_in_block: usize,
    blocks: Vec<u32>,
    index_min: Vec<u32>,
    index_max: Vec<u32>,
    any_rows: bool,
}

impl AttrIndexBuilder {
    pub fn new(schema: &Schema) -> Self {
        let row_width = schema.row_width() as usize;
        AttrIndexBuilder {
            schema: schema.clone(),
            row_width,
            block_min: vec![0; row_width],
            block_max: vec![0; row_width],
            rows_in_block: 0,
            blocks: Vec::new(),
            index_min: vec![0; row_width],
            index_max: vec![0; row_width],
            any_rows: false,
        }
    }

    fn fold(schema: &Schema, min: &mut [u32], max: &mut [u32], row: &[u32], first: bool) {
        if first {
            min.copy_from_slice(row);
            max.copy_from_slice(row);
            return;
        }
        // Doc id range rides in the synthetic rows too
        if RowAccess::doc_id(row) < RowAccess::doc_id(min) {
            RowAccess::set_doc_id(min, RowAccess::doc_id(row));
        }
        if RowAccess::doc_id(row) > RowAccess::doc_id(max) {
            RowAccess::set_doc_id(max, RowAccess::doc_id(row));
        }
        for attr in &schema.attrs {
            if !is_ranged(attr.attr_type) {
                continue;
            }
            if attr.attr_type == AttrType::Float {
                let value = RowAccess::get_float(row, attr.locator);
                if value < RowAccess::get_float(min, attr.locator) {
                    RowAccess::set_float(min, attr.locator, value);
                }
                if value > RowAccess::get_float(max, attr.locator) {
                    RowAccess::set_float(max, attr.locator, value);
                }
            } else {
                let value = RowAccess::get_attr(row, attr.locator);
                if value < RowAccess::get_attr(min, attr.locator) {
                    RowAccess::set_attr(min, attr.locator, value);
                }
                if value > RowAccess::get_attr(max, attr.locator) {
                    RowAccess::set_attr(max, attr.locator, value);
                }
            }
        }
    }

    pub fn collect(&mut self, row: &[u32]) {
        debug_assert_eq!(row.len(), self.row_width);
        let first_in_block = self.rows_in_block == 0;
        Self::fold(&self.schema, &mut self.block_min, &mut self.block_max, row, first_in_block);
        Self::fold(&self.schema, &mut self.index_min, &mut self.index_max, row, !self.any_rows);
        self.any_rows = true;

        self.rows_in_block += 1;
        if self.rows_in_block == MINMAX_BLOCK_ROWS {
            self.close_block();
        }
    }

    fn close_block(&mut self) {
        if self.rows_in_block == 0 {
            return;
        }
        self.blocks.extend_from_slice(&self.block_min);
        self.blocks.extend_from_slice(&self.block_max);
        self.rows_in_block = 0;
    }

    /// All summary rows, block pairs first, the whole-index pair last.
    pub fn finish(mut self) -> Vec<u32> {
        self.close_block();
        if self.any_rows {
            self.blocks.extend_from_slice(&self.index_min);
            self.blocks.extend_from_slice(&self.index_max);
        }
        self.blocks
    }
}

/// One block summary decoded from the `.spa` tail.
pub struct MinMaxView<'a> {
    pub min_row: &'a [u32],
    pub max_row: &'a [u32],
}

impl<'a> MinMaxView<'a> {
    pub fn doc_range(&self) -> (DocId, DocId) {
        (RowAccess::doc_id(self.min_row), RowAccess::doc_id(self.max_row))
    }

    /// Does `row` fall inside this envelope on every ranged attribute?
    pub fn envelopes(&self, schema: &Schema, row: &[u32]) -> bool {
        for attr in &schema.attrs {
            if !is_ranged(attr.attr_type) {
                continue;
            }
            if attr.attr_type == AttrType::Float {
                let value = RowAccess::get_float(row, attr.locator);
                if value < RowAccess::get_float(self.min_row, attr.locator)
                    || value > RowAccess::get_float(self.max_row, attr.locator)
                {
                    return false;
                }
            } else {
                let value = RowAccess::get_attr(row, attr.locator);
                if value < RowAccess::get_attr(self.min_row, attr.locator)
                    || value > RowAccess::get_attr(self.max_row, attr.locator)
                {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        let mut schema = Schema::new();
        schema.add_attr("price", AttrType::Int).unwrap();
        schema.add_attr("rate", AttrType::Float).unwrap();
        schema
    }

    fn row(schema: &Schema, doc: u64, price: u64, rate: f32) -> Vec<u32> {
        let mut row = vec![0u32; schema.row_width() as usize];
        RowAccess::set_doc_id(&mut row, DocId(doc));
        RowAccess::set_attr(&mut row, schema.attr("price").unwrap().locator, price);
        RowAccess::set_float(&mut row, schema.attr("rate").unwrap().locator, rate);
        row
    }

    #[test]
    fn test_single_block_envelope() {
        let schema = schema();
        let mut builder = AttrIndexBuilder::new(&schema);
        let rows = [
            row(&schema, 1, 100, 0.5),
            row(&schema, 2, 50, -1.5),
            row(&schema, 3, 300, 2.0),
        ];
        for r in &rows {
            builder.collect(r);
        }
        let tail = builder.finish();
        let width = schema.row_width() as usize;
        // One block pair plus the index-wide pair
        assert_eq!(tail.len(), 4 * width);

        let view = MinMaxView { min_row: &tail[..width], max_row: &tail[width..2 * width] };
        assert_eq!(view.doc_range(), (DocId(1), DocId(3)));
        assert_eq!(RowAccess::get_attr(view.min_row, schema.attr("price").unwrap().locator), 50);
        assert_eq!(RowAccess::get_attr(view.max_row, schema.attr("price").unwrap().locator), 300);
        // Negative float min handled by float comparison, not bit order
        assert_eq!(RowAccess::get_float(view.min_row, schema.attr("rate").unwrap().locator), -1.5);
        assert_eq!(RowAccess::get_float(view.max_row, schema.attr("rate").unwrap().locator), 2.0);

        for r in &rows {
            assert!(view.envelopes(&schema, r));
        }
        assert!(!view.envelopes(&schema, &row(&schema, 4, 1000, 0.0)));
    }

    #[test]
    fn test_block_split_every_128_rows() {
        let schema = schema();
        let mut builder = AttrIndexBuilder::new(&schema);
        for doc in 1..=200u64 {
            builder.collect(&row(&schema, doc, doc, doc as f32));
        }
        let tail = builder.finish();
        let width = schema.row_width() as usize;
        // Two block pairs plus the final pair
        assert_eq!(tail.len(), 6 * width);

        let second = MinMaxView {
            min_row: &tail[2 * width..3 * width],
            max_row: &tail[3 * width..4 * width],
        };
        assert_eq!(second.doc_range(), (DocId(129), DocId(200)));

        let overall = MinMaxView {
            min_row: &tail[4 * width..5 * width],
            max_row: &tail[5 * width..6 * width],
        };
        assert_eq!(overall.doc_range(), (DocId(1), DocId(200)));
    }
}
