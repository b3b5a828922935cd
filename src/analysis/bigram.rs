use std::collections::{HashSet, VecDeque};

use crate::analysis::tokenizer::{Token, TokenSource};
use crate::core::error::Result;

/// Joins a bigram pair token; keeps the pair text a single dictionary
/// keyword while staying impossible to type.
pub const BIGRAM_SEPARATOR: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BigramMode {
    /// Pair every two adjacent plain tokens.
    All,
    /// Pair only when the first token is in the frequent-words list.
    FirstFreq,
    /// Pair only when both tokens are in the frequent-words list.
    BothFreq,
}

/// Wrapping filter that interleaves "w1\x01w2" pair tokens with the
/// plain stream: pair, then w1 alone, then the cycle restarts at w2.
pub struct BigramFilter {
    inner: Box<dyn TokenSource>,
    mode: BigramMode,
    freq_words: HashSet<Vec<u8>>,
    held: Option<Token>,
    queued: VecDeque<Token>,
}

impl BigramFilter {
    pub fn new(inner: Box<dyn TokenSource>, mode: BigramMode, freq_words: HashSet<Vec<u8>>) -> Self {
        BigramFilter {
            inner,
            mode,
            freq_words,
            held: None,
            queued: VecDeque::new(),
        }
    }

    fn pairable(token: &Token) -> bool {
        !token.is_special && !token.is_blended && !token.is_blended_part
    }

    fn eligible(&self, first: &Token, second: &Token) -> bool {
        match self.mode {
            BigramMode::All => true,
            BigramMode::FirstFreq => self.freq_words.contains(&first.text),
            BigramMode::BothFreq => {
                self.freq_words.contains(&first.text) && self.freq_words.contains(&second.text)
            }
        }
    }

    fn make_pair(first: &Token, second: &Token) -> Token {
        let mut text = Vec::with_capacity(first.text.len() + 1 + second.text.len());
        text.extend_from_slice(&first.text);
        text.push(BIGRAM_SEPARATOR);
        text.extend_from_slice(&second.text);
        Token {
            text,
            start: first.start,
            end: second.end,
            is_blended: true,
            overshort_count: first.overshort_count,
            ..Token::default()
        }
    }
}

impl TokenSource for BigramFilter {
    fn set_text(&mut self, text: &[u8]) {
        self.inner.set_text(text);
        self.held = None;
        self.queued.clear();
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        if let Some(token) = self.queued.pop_front() {
            return Ok(Some(token));
        }

        let first = match self.held.take() {
            Some(token) => token,
            None => match self.inner.next_token()? {
                Some(token) => token,
                None => return Ok(None),
            },
        };
        if !Self::pairable(&first) {
            return Ok(Some(first));
        }

        let Some(second) = self.inner.next_token()? else {
            return Ok(Some(first));
        };
        if !Self::pairable(&second) {
            // A non-word token breaks the chain
            self.queued.push_back(second);
            return Ok(Some(first));
        }

        if self.eligible(&first, &second) {
            let pair = Self::make_pair(&first, &second);
            self.queued.push_back(first);
            self.held = Some(second);
            Ok(Some(pair))
        } else {
            self.held = Some(second);
            Ok(Some(first))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::lowercaser::Lowercaser;
    use crate::analysis::tokenizer::{Tokenizer, TokenizerOptions};

    fn filter_for(mode: BigramMode, freq: &[&str]) -> BigramFilter {
        let tokenizer = Tokenizer::new(Lowercaser::default_latin(), TokenizerOptions::default());
        BigramFilter::new(
            Box::new(tokenizer),
            mode,
            freq.iter().map(|w| w.as_bytes().to_vec()).collect(),
        )
    }

    fn collect(filter: &mut BigramFilter, text: &str) -> Vec<Vec<u8>> {
        filter.set_text(text.as_bytes());
        let mut out = Vec::new();
        while let Some(token) = filter.next_token().unwrap() {
            out.push(token.text);
        }
        out
    }

    fn pair(a: &str, b: &str) -> Vec<u8> {
        let mut out = a.as_bytes().to_vec();
        out.push(BIGRAM_SEPARATOR);
        out.extend_from_slice(b.as_bytes());
        out
    }

    #[test]
    fn test_all_mode_emission_order() {
        let mut filter = filter_for(BigramMode::All, &[]);
        let tokens = collect(&mut filter, "one two three");
        assert_eq!(tokens, vec![
            pair("one", "two"),
            b"one".to_vec(),
            pair("two", "three"),
            b"two".to_vec(),
            b"three".to_vec(),
        ]);
    }

    #[test]
    fn test_pair_token_is_blended() {
        let mut filter = filter_for(BigramMode::All, &[]);
        filter.set_text(b"one two");
        let token = filter.next_token().unwrap().unwrap();
        assert!(token.is_blended);
        assert_eq!(token.text, pair("one", "two"));
    }

    #[test]
    fn test_first_freq_mode() {
        let mut filter = filter_for(BigramMode::FirstFreq, &["the"]);
        let tokens = collect(&mut filter, "the cat sat");
        // "the cat" pairs, "cat sat" does not
        assert_eq!(tokens, vec![
            pair("the", "cat"),
            b"the".to_vec(),
            b"cat".to_vec(),
            b"sat".to_vec(),
        ]);
    }

    #[test]
    fn test_both_freq_mode() {
        let mut filter = filter_for(BigramMode::BothFreq, &["to", "be"]);
        let tokens = collect(&mut filter, "to be free");
        assert_eq!(tokens, vec![
            pair("to", "be"),
            b"to".to_vec(),
            b"be".to_vec(),
            b"free".to_vec(),
        ]);
    }

    #[test]
    fn test_single_token_passthrough() {
        let mut filter = filter_for(BigramMode::All, &[]);
        assert_eq!(collect(&mut filter, "alone"), vec![b"alone".to_vec()]);
    }
}
