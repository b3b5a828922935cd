use std::collections::HashMap;
use std::sync::Arc;

use crate::analysis::multiform::MultiformSet;

/// Word-form rewrites. Single-token rules are applied inside the
/// dictionary before stemming; rules spanning multiple tokens on either
/// side are compiled into a multiform set consumed by the token filter.
#[derive(Debug, Default)]
pub struct Wordforms {
    single: HashMap<Vec<u8>, Vec<u8>>,
    multiforms: Arc<MultiformSet>,
    fingerprint: u64,
}

impl Wordforms {
    /// Each rule is (source tokens, destination tokens), pre-folded.
    pub fn from_rules(rules: &[(Vec<Vec<u8>>, Vec<Vec<u8>>)]) -> Self {
        let mut single = HashMap::new();
        let mut multiforms = MultiformSet::new();
        for (from, to) in rules {
            if from.is_empty() || to.is_empty() {
                continue;
            }
            if from.len() == 1 && to.len() == 1 {
                single.insert(from[0].clone(), to[0].clone());
            } else {
                multiforms.add(from.clone(), to.clone());
            }
        }

        let mut flat: Vec<String> = rules.iter()
            .map(|(from, to)| {
                let mut line = String::new();
                for part in from {
                    line.push_str(&String::from_utf8_lossy(part));
                    line.push(' ');
                }
                line.push('>');
                for part in to {
                    line.push(' ');
                    line.push_str(&String::from_utf8_lossy(part));
                }
                line
            })
            .collect();
        flat.sort_unstable();
        let mut fingerprint = 0xcbf29ce484222325u64;
        for line in &flat {
            for &byte in line.as_bytes() {
                fingerprint ^= byte as u64;
                fingerprint = fingerprint.wrapping_mul(0x100000001b3);
            }
        }

        Wordforms {
            single,
            multiforms: Arc::new(multiforms),
            fingerprint: if rules.is_empty() { 0 } else { fingerprint },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.single.is_empty() && self.multiforms.is_empty()
    }

    /// Rewrite a single token in place; true if a rule fired.
    pub fn apply(&self, token: &mut Vec<u8>) -> bool {
        if let Some(normal) = self.single.get(token.as_slice()) {
            token.clear();
            token.extend_from_slice(normal);
            return true;
        }
        false
    }

    /// The multi-token rules, for the wrapping token filter.
    pub fn multiforms(&self) -> Arc<MultiformSet> {
        Arc::clone(&self.multiforms)
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}
