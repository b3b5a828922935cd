use rust_stemmers::{Algorithm, Stemmer};

/// Stemmer pipeline applied before hashing. Processors run in order;
/// the first one that changes the word ends the chain.
pub struct Morphology {
    pub names: Vec<String>,
    stemmers: Vec<Stemmer>,
}

fn algorithm_for(name: &str) -> Option<Algorithm> {
    Some(match name {
        "stem_en" => Algorithm::English,
        "stem_ru" => Algorithm::Russian,
        "stem_fr" => Algorithm::French,
        "stem_de" => Algorithm::German,
        "stem_es" => Algorithm::Spanish,
        "stem_it" => Algorithm::Italian,
        "stem_pt" => Algorithm::Portuguese,
        "stem_nl" => Algorithm::Dutch,
        "stem_sv" => Algorithm::Swedish,
        "stem_no" => Algorithm::Norwegian,
        "stem_fi" => Algorithm::Finnish,
        "stem_da" => Algorithm::Danish,
        "stem_ro" => Algorithm::Romanian,
        "stem_hu" => Algorithm::Hungarian,
        "stem_tr" => Algorithm::Turkish,
        _ => return None,
    })
}

impl Morphology {
    /// Unknown processor names are skipped with a warning, not an error.
    pub fn from_names(names: &[String]) -> Self {
        let mut kept = Vec::new();
        let mut stemmers = Vec::new();
        for name in names {
            if name == "none" {
                continue;
            }
            match algorithm_for(name) {
                Some(algorithm) => {
                    stemmers.push(Stemmer::create(algorithm));
                    kept.push(name.clone());
                }
                None => log::warn!("unknown morphology processor '{}' skipped", name),
            }
        }
        Morphology { names: kept, stemmers }
    }

    pub fn is_empty(&self) -> bool {
        self.stemmers.is_empty()
    }

    /// Stem in place. Non-utf8 tokens (magic markers, bigram pairs)
    /// pass through untouched.
    pub fn apply(&self, token: &mut Vec<u8>) {
        if self.stemmers.is_empty() {
            return;
        }
        let Ok(word) = std::str::from_utf8(token) else { return };
        for stemmer in &self.stemmers {
            let stemmed = stemmer.stem(word);
            if stemmed != word {
                *token = stemmed.into_owned().into_bytes();
                return;
            }
        }
    }

    /// FNV-1a over the processor names; stored in the header to detect
    /// a mismatched runtime pipeline.
    pub fn fingerprint(&self) -> u64 {
        let mut hash = 0xcbf29ce484222325u64;
        for name in &self.names {
            for &byte in name.as_bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
            hash ^= 0xFF;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_english_stemming() {
        let morph = Morphology::from_names(&["stem_en".to_string()]);
        let mut token = b"running".to_vec();
        morph.apply(&mut token);
        assert_eq!(token, b"run");
    }

    #[test]
    fn test_unknown_processor_skipped() {
        let morph = Morphology::from_names(&["stem_xx".to_string(), "stem_en".to_string()]);
        assert_eq!(morph.names, vec!["stem_en"]);
    }

    #[test]
    fn test_empty_pipeline_is_identity() {
        let morph = Morphology::from_names(&[]);
        let mut token = b"running".to_vec();
        morph.apply(&mut token);
        assert_eq!(token, b"running");
    }

    #[test]
    fn test_fingerprint_depends_on_pipeline() {
        let a = Morphology::from_names(&["stem_en".to_string()]);
        let b = Morphology::from_names(&["stem_ru".to_string()]);
        let c = Morphology::from_names(&["stem_en".to_string()]);
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), c.fingerprint());
    }
}
