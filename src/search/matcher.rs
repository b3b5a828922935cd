use crate::core::disk_index::DiskIndex;
use crate::core::error::Result;
use crate::core::types::{DocId, Hitpos};
use crate::search::context::{QueryContext, QueryMatch};
use crate::search::qword::PostingReader;

/// Minimal conjunctive match driver: AND over the query terms via
/// leapfrog skip_to, optional phrase check over the hitlists. The
/// parser and rankers live outside the core; embedders and the test
/// suite drive this directly.
pub struct TermMatcher<'a> {
    index: &'a DiskIndex,
    readers: Vec<PostingReader<'a>>,
    /// Terms dropped as stop-words (they do not constrain the match).
    pub dropped_terms: usize,
    phrase: bool,
}

/// One match plus its per-term positions (phrase checks and tests
/// read these).
#[derive(Debug, Clone)]
pub struct TermMatch {
    pub doc_id: DocId,
    pub positions: Vec<Vec<Hitpos>>,
}

impl<'a> TermMatcher<'a> {
    pub fn new(index: &'a DiskIndex, terms: &[&str], phrase: bool) -> Result<Option<Self>> {
        let mut readers = Vec::new();
        let mut dropped_terms = 0;
        for term in terms {
            match index.normalize_term(term) {
                None => dropped_terms += 1,
                Some(_) => match index.term_reader(term)? {
                    // A known term with no postings kills the conjunction
                    None => return Ok(None),
                    Some(reader) => readers.push(reader),
                },
            }
        }
        if readers.is_empty() {
            return Ok(None);
        }
        Ok(Some(TermMatcher { index, readers, dropped_terms, phrase }))
    }

    fn positions_of(reader: &mut PostingReader) -> Result<Vec<Hitpos>> {
        let mut positions = Vec::new();
        reader.seek_hitlist();
        while let Some(pos) = reader.get_next_hit()? {
            positions.push(pos);
        }
        Ok(positions)
    }

    /// Adjacent in the same field, in term order.
    fn phrase_at(positions: &[Vec<Hitpos>]) -> bool {
        let Some(first) = positions.first() else { return false };
        'starts: for &start in first {
            let mut want = start.0 & !(1 << 23);
            for term_positions in &positions[1..] {
                want += 1;
                let matched = term_positions.iter().any(|p| {
                    p.0 & !(1 << 23) == want && p.field() == start.field()
                });
                if !matched {
                    continue 'starts;
                }
            }
            return true;
        }
        false
    }

    /// Next conjunctive match at or past `from`.
    fn next_match(&mut self, from: DocId) -> Result<Option<TermMatch>> {
        let mut candidate = from;
        'align: loop {
            for i in 0..self.readers.len() {
                match self.readers[i].skip_to(candidate)? {
                    None => return Ok(None),
                    Some(doc_id) if doc_id > candidate => {
                        candidate = doc_id;
                        if i > 0 {
                            continue 'align;
                        }
                    }
                    Some(_) => {}
                }
            }
            // All readers sit on `candidate`
            let mut positions = Vec::with_capacity(self.readers.len());
            for reader in &mut self.readers {
                positions.push(Self::positions_of(reader)?);
            }
            if self.phrase && !Self::phrase_at(&positions) {
                candidate = DocId(candidate.0 + 1);
                continue 'align;
            }
            return Ok(Some(TermMatch { doc_id: candidate, positions }));
        }
    }

    /// Run the conjunction to the end, applying the kill list.
    pub fn collect(&mut self) -> Result<Vec<TermMatch>> {
        let mut out = Vec::new();
        let mut from = DocId(1);
        while let Some(m) = self.next_match(from)? {
            from = DocId(m.doc_id.0 + 1);
            if !self.index.kill_list().contains(m.doc_id) {
                out.push(m);
            }
        }
        Ok(out)
    }

    /// Full query path: match, fetch rows, filter through the context.
    pub fn collect_filtered(&mut self, ctx: &QueryContext) -> Result<Vec<QueryMatch>> {
        let matches = self.collect()?;
        let strings = self.index.strings_guard();
        let pools = self.index.pools(&strings);
        let mut out = Vec::new();
        for m in matches {
            ctx.check_deadline()?;
            let weight = m.positions.iter().map(|p| p.len() as f32).sum::<f32>().max(1.0);
            let row = match self.index.find_row(m.doc_id) {
                Some(idx) => self.index.read_row(idx),
                None => vec![0u32; self.index.row_width()],
            };
            if let Some(qm) = ctx.process_row(m.doc_id, &row, weight, pools)? {
                out.push(qm);
                if ctx.cutoff > 0 && out.len() >= ctx.cutoff {
                    break;
                }
            }
        }
        Ok(out)
    }
}
