use fst::Map;

use crate::core::error::Result;

/// Compiled exception table: raw source sequences mapped onto their
/// replacement tokens ("U.S.A." -> "usa"). Longest full match wins and
/// must end at a non-word byte.
pub struct Exceptions {
    map: Map<Vec<u8>>,
    replacements: Vec<String>,
}

pub struct ExceptionsBuilder {
    entries: Vec<(Vec<u8>, String)>,
}

impl ExceptionsBuilder {
    pub fn new() -> Self {
        ExceptionsBuilder { entries: Vec::new() }
    }

    pub fn add(&mut self, from: impl AsRef<[u8]>, to: impl Into<String>) {
        self.entries.push((from.as_ref().to_vec(), to.into()));
    }

    pub fn build(mut self) -> Result<Exceptions> {
        self.entries.sort_by(|a, b| a.0.cmp(&b.0));
        self.entries.dedup_by(|a, b| a.0 == b.0);

        let mut replacements = Vec::with_capacity(self.entries.len());
        let map = Map::from_iter(
            self.entries.iter().map(|(from, to)| {
                replacements.push(to.clone());
                (from.clone(), (replacements.len() - 1) as u64)
            }),
        )?;
        Ok(Exceptions { map, replacements })
    }
}

impl Default for ExceptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Exceptions {
    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }

    /// Walk the trie from the start of `input`; report the longest
    /// entry that matches a full prefix, as (matched_len, replacement).
    pub fn longest_match<'a>(&'a self, input: &[u8]) -> Option<(usize, &'a str)> {
        let fst = self.map.as_fst();
        let mut node = fst.root();
        let mut out = fst::raw::Output::zero();
        let mut best: Option<(usize, u64)> = None;

        for (consumed, &byte) in input.iter().enumerate() {
            let Some(transition_idx) = node.find_input(byte) else { break };
            let transition = node.transition(transition_idx);
            out = out.cat(transition.out);
            node = fst.node(transition.addr);
            if node.is_final() {
                let value = out.cat(node.final_output()).value();
                best = Some((consumed + 1, value));
            }
        }

        best.map(|(len, idx)| (len, self.replacements[idx as usize].as_str()))
    }
}
