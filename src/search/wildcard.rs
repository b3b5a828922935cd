fn decode(text: &[u8]) -> Vec<char> {
    String::from_utf8_lossy(text).chars().collect()
}

/// Glob match over codepoints: `*` any run, `?` exactly one,
/// `%` zero or one.
pub fn wildcard_match(pattern: &[u8], candidate: &[u8]) -> bool {
    let pattern = decode(pattern);
    let candidate = decode(candidate);

    // dp[j]: pattern[..i] can consume candidate[..j]
    let mut dp = vec![false; candidate.len() + 1];
    dp[0] = true;
    for (j, _) in candidate.iter().enumerate() {
        dp[j + 1] = false;
    }

    for &p in &pattern {
        match p {
            '*' => {
                // Any prefix reachable so far stays reachable
                for j in 1..=candidate.len() {
                    dp[j] = dp[j] || dp[j - 1];
                }
            }
            '?' => {
                for j in (1..=candidate.len()).rev() {
                    dp[j] = dp[j - 1];
                }
                dp[0] = false;
            }
            '%' => {
                for j in (1..=candidate.len()).rev() {
                    dp[j] = dp[j] || dp[j - 1];
                }
            }
            literal => {
                for j in (1..=candidate.len()).rev() {
                    dp[j] = dp[j - 1] && candidate[j - 1] == literal;
                }
                dp[0] = false;
            }
        }
    }
    dp[candidate.len()]
}

/// Does the pattern contain any wildcard glyph at all?
pub fn has_wildcards(pattern: &[u8]) -> bool {
    pattern.iter().any(|&b| b == b'*' || b == b'?' || b == b'%')
}

/// Literal prefix before the first wildcard glyph.
pub fn literal_prefix(pattern: &[u8]) -> &[u8] {
    let end = pattern.iter()
        .position(|&b| b == b'*' || b == b'?' || b == b'%')
        .unwrap_or(pattern.len());
    &pattern[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star() {
        assert!(wildcard_match(b"foo*", b"foo"));
        assert!(wildcard_match(b"foo*", b"foobar"));
        assert!(!wildcard_match(b"foo*", b"fo"));
        assert!(wildcard_match(b"*foo*", b"seafood"));
        assert!(wildcard_match(b"*", b""));
        assert!(wildcard_match(b"f*o*d", b"food"));
    }

    #[test]
    fn test_question_mark() {
        assert!(wildcard_match(b"f?x", b"fox"));
        assert!(!wildcard_match(b"f?x", b"fx"));
        assert!(!wildcard_match(b"f?x", b"flax"));
    }

    #[test]
    fn test_optional() {
        assert!(wildcard_match(b"colo%ur", b"colour"));
        assert!(!wildcard_match(b"colo%ur", b"color"));
        // Zero-or-one: both spellings
        assert!(wildcard_match(b"colo%r", b"colour"));
        assert!(wildcard_match(b"colo%r", b"color"));
    }

    #[test]
    fn test_unicode_single_codepoint() {
        // One ? consumes one codepoint, not one byte
        assert!(wildcard_match("f?x".as_bytes(), "föx".as_bytes()));
    }

    #[test]
    fn test_literal_prefix() {
        assert_eq!(literal_prefix(b"foo*bar"), b"foo");
        assert_eq!(literal_prefix(b"*foo"), b"");
        assert_eq!(literal_prefix(b"plain"), b"plain");
        assert!(has_wildcards(b"foo%"));
        assert!(!has_wildcards(b"foo"));
    }
}
