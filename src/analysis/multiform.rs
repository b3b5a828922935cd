use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::analysis::tokenizer::{Token, TokenSource};
use crate::core::error::Result;

/// One multi-token rewrite rule: `pattern` tokens in a row become the
/// `replacement` tokens.
#[derive(Debug, Clone)]
pub struct Multiform {
    pub pattern: Vec<Vec<u8>>,
    pub replacement: Vec<Vec<u8>>,
}

/// Rules bucketed by their first pattern token for O(1) candidate
/// lookup per stream position.
#[derive(Debug, Default)]
pub struct MultiformSet {
    by_first: HashMap<Vec<u8>, Vec<Multiform>>,
    max_pattern_len: usize,
}

impl MultiformSet {
    pub fn new() -> Self {
        MultiformSet::default()
    }

    pub fn add(&mut self, pattern: Vec<Vec<u8>>, replacement: Vec<Vec<u8>>) {
        if pattern.is_empty() || replacement.is_empty() {
            return;
        }
        self.max_pattern_len = self.max_pattern_len.max(pattern.len());
        let bucket = self.by_first.entry(pattern[0].clone()).or_default();
        bucket.push(Multiform { pattern, replacement });
        // Longest pattern must win
        bucket.sort_by(|a, b| b.pattern.len().cmp(&a.pattern.len()));
    }

    pub fn is_empty(&self) -> bool {
        self.by_first.is_empty()
    }

    pub fn max_pattern_len(&self) -> usize {
        self.max_pattern_len
    }

    pub fn candidates(&self, first: &[u8]) -> Option<&[Multiform]> {
        self.by_first.get(first).map(|v| v.as_slice())
    }
}

/// Wrapping token filter with bounded lookahead; replaces matched
/// pattern runs with their normal forms.
pub struct MultiformFilter {
    inner: Box<dyn TokenSource>,
    forms: Arc<MultiformSet>,
    lookahead: VecDeque<Token>,
    queued: VecDeque<Token>,
    inner_done: bool,
}

impl MultiformFilter {
    pub fn new(inner: Box<dyn TokenSource>, forms: Arc<MultiformSet>) -> Self {
        MultiformFilter {
            inner,
            forms,
            lookahead: VecDeque::new(),
            queued: VecDeque::new(),
            inner_done: false,
        }
    }

    fn fill_lookahead(&mut self) -> Result<()> {
        while !self.inner_done && self.lookahead.len() < self.forms.max_pattern_len() {
            match self.inner.next_token()? {
                Some(token) => self.lookahead.push_back(token),
                None => self.inner_done = true,
            }
        }
        Ok(())
    }

    fn try_replace(&mut self) -> bool {
        let Some(first) = self.lookahead.front() else { return false };
        if first.is_special || first.is_blended || first.is_blended_part {
            return false;
        }
        let Some(candidates) = self.forms.candidates(&first.text) else { return false };

        for form in candidates {
            if form.pattern.len() > self.lookahead.len() {
                continue;
            }
            let matches = form.pattern.iter().zip(self.lookahead.iter())
                .all(|(want, have)| *want == have.text && !have.is_special);
            if !matches {
                continue;
            }
            let start = self.lookahead[0].start;
            let end = self.lookahead[form.pattern.len() - 1].end;
            let overshorts = self.lookahead.iter().take(form.pattern.len())
                .map(|t| t.overshort_count)
                .sum();
            for _ in 0..form.pattern.len() {
                self.lookahead.pop_front();
            }
            for (idx, text) in form.replacement.iter().enumerate() {
                self.queued.push_back(Token {
                    text: text.clone(),
                    start,
                    end,
                    is_synonym: true,
                    overshort_count: if idx == 0 { overshorts } else { 0 },
                    ..Token::default()
                });
            }
            return true;
        }
        false
    }
}

impl TokenSource for MultiformFilter {
    fn set_text(&mut self, text: &[u8]) {
        self.inner.set_text(text);
        self.lookahead.clear();
        self.queued.clear();
        self.inner_done = false;
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        loop {
            if let Some(token) = self.queued.pop_front() {
                return Ok(Some(token));
            }
            self.fill_lookahead()?;
            if self.lookahead.is_empty() {
                return Ok(None);
            }
            if self.try_replace() {
                continue;
            }
            return Ok(self.lookahead.pop_front());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::lowercaser::Lowercaser;
    use crate::analysis::tokenizer::{Tokenizer, TokenizerOptions};

    fn filter_for(rules: &[(&str, &str)]) -> MultiformFilter {
        let mut forms = MultiformSet::new();
        for (pattern, replacement) in rules {
            forms.add(
                pattern.split_whitespace().map(|w| w.as_bytes().to_vec()).collect(),
                replacement.split_whitespace().map(|w| w.as_bytes().to_vec()).collect(),
            );
        }
        let tokenizer = Tokenizer::new(Lowercaser::default_latin(), TokenizerOptions::default());
        MultiformFilter::new(Box::new(tokenizer), Arc::new(forms))
    }

    fn collect(filter: &mut MultiformFilter, text: &str) -> Vec<String> {
        filter.set_text(text.as_bytes());
        let mut out = Vec::new();
        while let Some(token) = filter.next_token().unwrap() {
            out.push(token.text_str().to_string());
        }
        out
    }

    #[test]
    fn test_two_to_one() {
        let mut filter = filter_for(&[("new york", "nyc")]);
        assert_eq!(collect(&mut filter, "visit New York today"), vec!["visit", "nyc", "today"]);
    }

    #[test]
    fn test_one_to_many() {
        let mut filter = filter_for(&[("nyc", "new york city")]);
        assert_eq!(collect(&mut filter, "nyc rocks"), vec!["new", "york", "city", "rocks"]);
    }

    #[test]
    fn test_longest_pattern_wins() {
        let mut filter = filter_for(&[("new york", "nyc"), ("new york city", "nyc2")]);
        assert_eq!(collect(&mut filter, "new york city"), vec!["nyc2"]);
        assert_eq!(collect(&mut filter, "new york state"), vec!["nyc", "state"]);
    }

    #[test]
    fn test_no_match_passthrough() {
        let mut filter = filter_for(&[("new york", "nyc")]);
        assert_eq!(collect(&mut filter, "old york"), vec!["old", "york"]);
    }

    #[test]
    fn test_replacement_is_synonym() {
        let mut filter = filter_for(&[("new york", "nyc")]);
        filter.set_text(b"new york");
        let token = filter.next_token().unwrap().unwrap();
        assert!(token.is_synonym);
        assert_eq!((token.start, token.end), (0, 8));
    }
}
