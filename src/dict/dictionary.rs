use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::types::WordId;
use crate::dict::morphology::Morphology;
use crate::dict::stopwords::Stopwords;
use crate::dict::wordforms::Wordforms;
use crate::storage::header::DictFlavor;

/// Prepended to force exact-form matching (`=word` queries).
pub const MAGIC_WORD_HEAD_EXACT: u8 = 0x02;
/// Wrapped around a token to bypass stemming entirely.
pub const MAGIC_WORD_HEAD_NONSTEMMED: u8 = 0x03;
pub const MAGIC_WORD_TAIL_NONSTEMMED: u8 = 0x04;

pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Token hash: FNV-1a in 64-bit indexes, CRC32 in 32-bit ones.
pub fn hash_word(bytes: &[u8], use_64bit: bool) -> WordId {
    if use_64bit {
        WordId(fnv1a_64(bytes))
    } else {
        WordId(crc32fast::hash(bytes) as u64)
    }
}

/// Runtime normalization state shared by both dictionary flavors and
/// by the searcher: word-forms, stop-words, the stemmer pipeline.
#[derive(Clone)]
pub struct DictSettings {
    pub use_64bit: bool,
    pub stopwords: Arc<Stopwords>,
    pub stopwords_unstemmed: bool,
    pub wordforms: Arc<Wordforms>,
    pub morphology: Arc<Morphology>,
}

impl DictSettings {
    pub fn plain(use_64bit: bool) -> Self {
        DictSettings {
            use_64bit,
            stopwords: Arc::new(Stopwords::default()),
            stopwords_unstemmed: false,
            wordforms: Arc::new(Wordforms::default()),
            morphology: Arc::new(Morphology::from_names(&[])),
        }
    }

    fn is_stopword(&self, token: &[u8]) -> bool {
        !self.stopwords.is_empty() && self.stopwords.contains(hash_word(token, self.use_64bit))
    }

    /// Word-forms, stop-word gates and stemming, in the configured
    /// order. Returns false when the token is a stop-word.
    pub fn normalize(&self, token: &mut Vec<u8>) -> bool {
        if token.first() == Some(&MAGIC_WORD_HEAD_NONSTEMMED) {
            return true;
        }
        if self.wordforms.apply(token) {
            // A matched word-form is final: no stemming on top
            return !self.is_stopword(token);
        }
        if self.stopwords_unstemmed && self.is_stopword(token) {
            return false;
        }
        self.morphology.apply(token);
        !self.is_stopword(token)
    }
}

/// The narrow dictionary seam: token text to word id, plus the id
/// comparator the hit sorter runs on.
pub trait Dictionary: Send {
    fn settings(&self) -> &DictSettings;

    /// Normalize and intern/hash; WordId(0) marks a dropped stop-word.
    fn get_word_id(&mut self, token: &mut Vec<u8>) -> WordId;

    /// Exact-form id: the token is marked so it cannot collide with
    /// its stemmed sibling.
    fn get_word_id_with_markers(&mut self, token: &mut Vec<u8>) -> WordId;

    /// Id of the raw, unstemmed form.
    fn get_word_id_nonstemmed(&mut self, token: &mut Vec<u8>) -> WordId;

    /// Keyword text behind an id; None in crc mode.
    fn keyword_for(&self, id: WordId) -> Option<&[u8]>;

    /// Posting order. Hash order in crc mode, keyword text order in
    /// keywords mode.
    fn cmp_ids(&self, a: WordId, b: WordId) -> Ordering;

    fn flavor(&self) -> DictFlavor;
}

/// Hash-id dictionary: the word id IS the folded-token hash, postings
/// are laid out in hash order.
pub struct CrcDict {
    pub settings: DictSettings,
}

impl CrcDict {
    pub fn new(settings: DictSettings) -> Self {
        CrcDict { settings }
    }
}

impl Dictionary for CrcDict {
    fn settings(&self) -> &DictSettings {
        &self.settings
    }

    fn get_word_id(&mut self, token: &mut Vec<u8>) -> WordId {
        if !self.settings.normalize(token) {
            return WordId::STOPWORD;
        }
        hash_word(token, self.settings.use_64bit)
    }

    fn get_word_id_with_markers(&mut self, token: &mut Vec<u8>) -> WordId {
        token.insert(0, MAGIC_WORD_HEAD_EXACT);
        if !self.settings.normalize(token) {
            return WordId::STOPWORD;
        }
        hash_word(token, self.settings.use_64bit)
    }

    fn get_word_id_nonstemmed(&mut self, token: &mut Vec<u8>) -> WordId {
        token.insert(0, MAGIC_WORD_HEAD_NONSTEMMED);
        token.push(MAGIC_WORD_TAIL_NONSTEMMED);
        if self.settings.is_stopword(&token[1..token.len() - 1]) {
            return WordId::STOPWORD;
        }
        hash_word(token, self.settings.use_64bit)
    }

    fn keyword_for(&self, _id: WordId) -> Option<&[u8]> {
        None
    }

    fn cmp_ids(&self, a: WordId, b: WordId) -> Ordering {
        a.0.cmp(&b.0)
    }

    fn flavor(&self) -> DictFlavor {
        DictFlavor::Crc
    }
}

/// Keyword-preserving dictionary: ids are offsets into a build-local
/// keyword arena (unique per token, not stable across builds), and the
/// posting order is keyword text order.
pub struct KeywordsDict {
    pub settings: DictSettings,
    arena: Vec<u8>,
    interned: HashMap<Vec<u8>, WordId>,
}

impl KeywordsDict {
    pub fn new(settings: DictSettings) -> Self {
        KeywordsDict {
            settings,
            arena: Vec::with_capacity(2 * 1024 * 1024),
            interned: HashMap::new(),
        }
    }

    pub fn arena_bytes(&self) -> usize {
        self.arena.len()
    }

    fn intern(&mut self, token: &[u8]) -> WordId {
        if let Some(&id) = self.interned.get(token) {
            return id;
        }
        // Offset is shifted by one so no live id collides with the
        // stop-word zero
        let id = WordId(self.arena.len() as u64 + 1);
        debug_assert!(token.len() < 256);
        self.arena.push(token.len() as u8);
        self.arena.extend_from_slice(token);
        self.interned.insert(token.to_vec(), id);
        id
    }
}

impl Dictionary for KeywordsDict {
    fn settings(&self) -> &DictSettings {
        &self.settings
    }

    fn get_word_id(&mut self, token: &mut Vec<u8>) -> WordId {
        if !self.settings.normalize(token) {
            return WordId::STOPWORD;
        }
        self.intern(token)
    }

    fn get_word_id_with_markers(&mut self, token: &mut Vec<u8>) -> WordId {
        token.insert(0, MAGIC_WORD_HEAD_EXACT);
        if !self.settings.normalize(token) {
            return WordId::STOPWORD;
        }
        self.intern(token)
    }

    fn get_word_id_nonstemmed(&mut self, token: &mut Vec<u8>) -> WordId {
        token.insert(0, MAGIC_WORD_HEAD_NONSTEMMED);
        token.push(MAGIC_WORD_TAIL_NONSTEMMED);
        if self.settings.is_stopword(&token[1..token.len() - 1]) {
            return WordId::STOPWORD;
        }
        self.intern(token)
    }

    fn keyword_for(&self, id: WordId) -> Option<&[u8]> {
        if id == WordId::STOPWORD {
            return None;
        }
        let offset = (id.0 - 1) as usize;
        let len = *self.arena.get(offset)? as usize;
        self.arena.get(offset + 1..offset + 1 + len)
    }

    fn cmp_ids(&self, a: WordId, b: WordId) -> Ordering {
        match (self.keyword_for(a), self.keyword_for(b)) {
            (Some(ka), Some(kb)) => ka.cmp(kb),
            _ => a.0.cmp(&b.0),
        }
    }

    fn flavor(&self) -> DictFlavor {
        DictFlavor::Keywords
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with(stopwords: &[&str], morphology: &[&str]) -> DictSettings {
        let words: Vec<Vec<u8>> = stopwords.iter().map(|w| w.as_bytes().to_vec()).collect();
        let ids: Vec<WordId> = words.iter().map(|w| hash_word(w, true)).collect();
        DictSettings {
            use_64bit: true,
            stopwords: Arc::new(Stopwords::new(ids, &words)),
            stopwords_unstemmed: false,
            wordforms: Arc::new(Wordforms::default()),
            morphology: Arc::new(Morphology::from_names(
                &morphology.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            )),
        }
    }

    #[test]
    fn test_crc_ids_are_stable_hashes() {
        let mut dict = CrcDict::new(DictSettings::plain(true));
        let mut a = b"fox".to_vec();
        let mut b = b"fox".to_vec();
        assert_eq!(dict.get_word_id(&mut a), dict.get_word_id(&mut b));
        assert_eq!(dict.get_word_id(&mut a.clone()), hash_word(b"fox", true));
    }

    #[test]
    fn test_stopwords_return_zero() {
        let mut dict = CrcDict::new(settings_with(&["the"], &[]));
        let mut token = b"the".to_vec();
        assert_eq!(dict.get_word_id(&mut token), WordId::STOPWORD);
        let mut other = b"fox".to_vec();
        assert_ne!(dict.get_word_id(&mut other), WordId::STOPWORD);
    }

    #[test]
    fn test_stemming_changes_id() {
        let mut dict = CrcDict::new(settings_with(&[], &["stem_en"]));
        let mut running = b"running".to_vec();
        let id = dict.get_word_id(&mut running);
        assert_eq!(running, b"run");
        assert_eq!(id, hash_word(b"run", true));
    }

    #[test]
    fn test_nonstemmed_bypasses_morphology() {
        let mut dict = CrcDict::new(settings_with(&[], &["stem_en"]));
        let mut token = b"running".to_vec();
        let raw_id = dict.get_word_id_nonstemmed(&mut token);
        let mut wrapped = vec![MAGIC_WORD_HEAD_NONSTEMMED];
        wrapped.extend_from_slice(b"running");
        wrapped.push(MAGIC_WORD_TAIL_NONSTEMMED);
        assert_eq!(raw_id, hash_word(&wrapped, true));
    }

    #[test]
    fn test_keywords_interning() {
        let mut dict = KeywordsDict::new(DictSettings::plain(true));
        let id_fox = dict.get_word_id(&mut b"fox".to_vec());
        let id_cat = dict.get_word_id(&mut b"cat".to_vec());
        let id_fox2 = dict.get_word_id(&mut b"fox".to_vec());
        assert_eq!(id_fox, id_fox2);
        assert_ne!(id_fox, id_cat);
        assert_eq!(dict.keyword_for(id_fox), Some(&b"fox"[..]));
        assert_eq!(dict.keyword_for(id_cat), Some(&b"cat"[..]));
    }

    #[test]
    fn test_keywords_cmp_is_text_order() {
        let mut dict = KeywordsDict::new(DictSettings::plain(true));
        // Interned out of alphabetical order on purpose
        let id_fox = dict.get_word_id(&mut b"fox".to_vec());
        let id_cat = dict.get_word_id(&mut b"cat".to_vec());
        assert_eq!(dict.cmp_ids(id_cat, id_fox), Ordering::Less);
        assert_eq!(dict.cmp_ids(id_fox, id_cat), Ordering::Greater);
        assert_eq!(dict.cmp_ids(id_fox, id_fox), Ordering::Equal);
    }

    #[test]
    fn test_wordform_preempts_stemming() {
        let rules = vec![(vec![b"walking".to_vec()], vec![b"walked".to_vec()])];
        let mut settings = settings_with(&[], &["stem_en"]);
        settings.wordforms = Arc::new(Wordforms::from_rules(&rules));
        let mut dict = CrcDict::new(settings);

        let mut token = b"walking".to_vec();
        dict.get_word_id(&mut token);
        // The word-form output is not stemmed further
        assert_eq!(token, b"walked");
    }
}
