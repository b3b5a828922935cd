use crate::core::config::DocinfoKind;
use crate::core::disk_index::DiskIndex;
use crate::core::error::{Error, Result};
use crate::core::types::DocId;
use crate::schema::schema::RowAccess;
use crate::search::context::{QueryContext, QueryMatch};
use crate::attr::minmax::MINMAX_BLOCK_ROWS;

/// Full-scan driver for queries with no full-text part: walk the
/// attribute blocks (forward or reverse), prune whole blocks on the
/// min/max envelopes, filter rows, honor the cutoff.
pub fn full_scan(index: &DiskIndex, ctx: &QueryContext) -> Result<Vec<QueryMatch>> {
    if index.header.docinfo != DocinfoKind::Extern {
        return Err(Error::schema("full scan needs docinfo=extern"));
    }
    let mut out = Vec::new();
    let row_count = index.row_count();
    if row_count == 0 {
        return Ok(out);
    }
    let width = index.row_width();
    let attrs = index.rows_guard();
    let strings = index.strings_guard();
    let pools = index.pools(&strings);

    // Whole-index envelope first
    let block_count = index.minmax_block_count();
    let overall = index.minmax_block(&attrs, block_count);
    if !ctx.tree.block_can_match(overall.min_row, overall.max_row) {
        return Ok(out);
    }

    let blocks: Vec<usize> = if ctx.reverse_scan {
        (0..block_count).rev().collect()
    } else {
        (0..block_count).collect()
    };

    'blocks: for block in blocks {
        ctx.check_deadline()?;
        let view = index.minmax_block(&attrs, block);
        if !ctx.tree.block_can_match(view.min_row, view.max_row) {
            continue;
        }
        let first = block * MINMAX_BLOCK_ROWS;
        let last = (first + MINMAX_BLOCK_ROWS).min(row_count);
        for row_idx in first..last {
            let row = &attrs[row_idx * width..(row_idx + 1) * width];
            let doc_id = RowAccess::doc_id(row);
            if index.kill_list().contains(doc_id) {
                continue;
            }
            if let Some(m) = ctx.process_row(doc_id, row, 1.0, pools)? {
                out.push(m);
                if ctx.cutoff > 0 && out.len() >= ctx.cutoff {
                    break 'blocks;
                }
            }
        }
    }
    Ok(out)
}

/// Fast path for `id IN (...)` scans: the docinfo hash instead of the
/// block walk.
pub fn scan_by_ids(index: &DiskIndex, ids: &[DocId], ctx: &QueryContext) -> Result<Vec<QueryMatch>> {
    let mut out = Vec::new();
    let strings = index.strings_guard();
    let pools = index.pools(&strings);
    for &doc_id in ids {
        ctx.check_deadline()?;
        if index.kill_list().contains(doc_id) {
            continue;
        }
        let Some(row_idx) = index.find_row(doc_id) else { continue };
        let row = index.read_row(row_idx);
        if let Some(m) = ctx.process_row(doc_id, &row, 1.0, pools)? {
            out.push(m);
            if ctx.cutoff > 0 && out.len() >= ctx.cutoff {
                break;
            }
        }
    }
    Ok(out)
}
