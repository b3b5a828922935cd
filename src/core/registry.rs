use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::error::Result;
use crate::dict::wordforms::Wordforms;

/// Per-keyword IDF values shared across the indexes of one
/// federation; filled by the external ranker, cached here.
#[derive(Default)]
pub struct IdfCache {
    pub values: RwLock<HashMap<Vec<u8>, f32>>,
}

/// Process-wide shared containers, keyed by canonical path plus
/// content fingerprint. Rotating an index re-uses the loaded
/// word-forms when both the file and the tokenizer it was folded with
/// are unchanged.
#[derive(Default)]
pub struct Registry {
    wordforms: RwLock<HashMap<(String, u64), Arc<Wordforms>>>,
    idf: RwLock<HashMap<String, Arc<IdfCache>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Fetch or load a word-forms container. The key combines the
    /// canonical path with the tokenizer fingerprint the forms were
    /// folded under.
    pub fn wordforms(
        &self,
        path: &str,
        tokenizer_fingerprint: u64,
        load: impl FnOnce() -> Result<Wordforms>,
    ) -> Result<Arc<Wordforms>> {
        let key = (path.to_string(), tokenizer_fingerprint);
        if let Some(found) = self.wordforms.read().get(&key) {
            return Ok(Arc::clone(found));
        }
        let loaded = Arc::new(load()?);
        let mut map = self.wordforms.write();
        // Another loader may have won the race
        Ok(Arc::clone(map.entry(key).or_insert(loaded)))
    }

    pub fn idf(&self, name: &str) -> Arc<IdfCache> {
        if let Some(found) = self.idf.read().get(name) {
            return Arc::clone(found);
        }
        let mut map = self.idf.write();
        Arc::clone(map.entry(name.to_string()).or_default())
    }

    /// Drop entries nobody references anymore.
    pub fn purge(&self) {
        self.wordforms.write().retain(|_, v| Arc::strong_count(v) > 1);
        self.idf.write().retain(|_, v| Arc::strong_count(v) > 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wordforms_shared_by_fingerprint() {
        let registry = Registry::new();
        let mut loads = 0;
        let a = registry.wordforms("/etc/forms.txt", 7, || { loads += 1; Ok(Wordforms::default()) }).unwrap();
        let b = registry.wordforms("/etc/forms.txt", 7, || { loads += 1; Ok(Wordforms::default()) }).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loads, 1);

        // A different tokenizer fingerprint is a different entry
        let c = registry.wordforms("/etc/forms.txt", 8, || { loads += 1; Ok(Wordforms::default()) }).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(loads, 2);
    }

    #[test]
    fn test_purge_drops_unreferenced() {
        let registry = Registry::new();
        {
            let _held = registry.wordforms("x", 1, || Ok(Wordforms::default())).unwrap();
            registry.purge();
            // Still referenced, survives
            assert!(registry.wordforms.read().len() == 1);
        }
        registry.purge();
        assert!(registry.wordforms.read().is_empty());
    }

    #[test]
    fn test_idf_cache_shared() {
        let registry = Registry::new();
        let a = registry.idf("main");
        a.values.write().insert(b"fox".to_vec(), 1.5);
        let b = registry.idf("main");
        assert_eq!(b.values.read().get(&b"fox"[..]).copied(), Some(1.5));
    }
}
