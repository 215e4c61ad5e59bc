//! Byte-and-mask pattern search, with a hex-literal entry point that accepts
//! `??` wildcard bytes.

use anyhow::{Result, bail};

/// A fixed-length byte sequence where some positions are wildcards. The
/// first byte can never be a wildcard — it anchors the scan's skip
/// heuristic, so a pattern that starts with `??` is rejected at construction
/// rather than silently degrading to a slow scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    bytes: Vec<u8>,
    wildcard: Vec<bool>,
}

impl Pattern {
    pub fn new(bytes: Vec<u8>, wildcard: Vec<bool>) -> Result<Self> {
        if bytes.len() != wildcard.len() {
            bail!(
                "pattern bytes ({}) and mask ({}) must be the same length",
                bytes.len(),
                wildcard.len()
            );
        }
        if bytes.is_empty() {
            bail!("pattern must not be empty");
        }
        if wildcard[0] {
            bail!("pattern must not start with a wildcard byte");
        }
        Ok(Self { bytes, wildcard })
    }

    /// Parses a hex literal such as `"48 8B ?? ?? 00"` into a pattern.
    /// Whitespace is ignored; `??` marks a wildcard byte. Rejects an odd
    /// number of hex digits, any character outside `[0-9A-Fa-f?]`, and a
    /// lone `?` not paired into `??`.
    pub fn from_hex(pattern: &str) -> Result<Self> {
        let compact: String = pattern.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() {
            bail!("pattern must not be empty");
        }
        if compact.len() % 2 != 0 {
            bail!("pattern must have an even number of hex characters, got {}", compact.len());
        }

        let chars: Vec<char> = compact.chars().collect();
        let mut bytes = Vec::with_capacity(chars.len() / 2);
        let mut wildcard = Vec::with_capacity(chars.len() / 2);
        for pair in chars.chunks(2) {
            let (a, b) = (pair[0], pair[1]);
            match (a, b) {
                ('?', '?') => {
                    bytes.push(0);
                    wildcard.push(true);
                }
                ('?', _) | (_, '?') => {
                    bail!("lone '?' wildcard at {a}{b}: wildcards must be written as '??'");
                }
                _ => {
                    let byte_str: String = [a, b].into_iter().collect();
                    let byte = u8::from_str_radix(&byte_str, 16)
                        .map_err(|_| anyhow::anyhow!("invalid hex byte {byte_str:?}"))?;
                    bytes.push(byte);
                    wildcard.push(false);
                }
            }
        }
        Self::new(bytes, wildcard)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn matches_at(&self, haystack: &[u8], at: usize) -> bool {
        self.bytes
            .iter()
            .zip(self.wildcard.iter())
            .enumerate()
            .all(|(offset, (&byte, &wild))| wild || haystack[at + offset] == byte)
    }

    /// Scans `haystack` for occurrences of this pattern, in ascending
    /// address order. A modified naive scan: whenever the pattern's
    /// (always concrete) first byte fails to match, it jumps straight to
    /// the next position in `haystack` where that byte occurs, rather than
    /// probing every offset in between.
    pub fn search(&self, haystack: &[u8], first_only: bool) -> Vec<usize> {
        let mut matches = Vec::new();
        let plen = self.bytes.len();
        if plen == 0 || haystack.len() < plen {
            return matches;
        }
        let first_byte = self.bytes[0];
        let limit = haystack.len() - plen;
        let mut i = 0usize;
        while i <= limit {
            if haystack[i] == first_byte && self.matches_at(haystack, i) {
                matches.push(i);
                if first_only {
                    break;
                }
                i += 1;
                continue;
            }
            if i >= limit {
                break;
            }
            match haystack[i + 1..=limit].iter().position(|&b| b == first_byte) {
                Some(rel) => i += rel + 1,
                None => break,
            }
        }
        matches
    }

    pub fn find_first(&self, haystack: &[u8]) -> Option<usize> {
        self.search(haystack, true).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_exact_match() {
        let pattern = Pattern::from_hex("44 45 41 44").unwrap();
        let haystack = b"....DEAD....";
        assert_eq!(pattern.search(haystack, false), vec![4]);
    }

    #[test]
    fn wildcard_bytes_match_anything() {
        let pattern = Pattern::from_hex("44 ?? 41 44").unwrap();
        let haystack = b"....DXAD....";
        assert_eq!(pattern.search(haystack, false), vec![4]);
    }

    #[test]
    fn finds_all_matches_in_ascending_order() {
        let pattern = Pattern::from_hex("AA BB").unwrap();
        let haystack = [0xAA, 0xBB, 0x00, 0xAA, 0xBB, 0x00, 0xAA, 0xBB];
        assert_eq!(pattern.search(&haystack, false), vec![0, 3, 6]);
    }

    #[test]
    fn first_only_stops_at_first_match() {
        let pattern = Pattern::from_hex("AA BB").unwrap();
        let haystack = [0xAA, 0xBB, 0x00, 0xAA, 0xBB];
        assert_eq!(pattern.search(&haystack, true), vec![0]);
    }

    #[test]
    fn first_byte_skip_heuristic_jumps_past_repeated_near_misses() {
        // The first byte (0xAA) recurs many times without the rest of the
        // pattern matching; the scan must still land on the real match.
        let pattern = Pattern::from_hex("AA AA BB").unwrap();
        let mut haystack = vec![0xAAu8; 64];
        haystack.extend_from_slice(&[0xAA, 0xAA, 0xBB]);
        assert_eq!(pattern.search(&haystack, false), vec![64]);
    }

    #[test]
    fn leading_wildcard_is_rejected() {
        assert!(Pattern::from_hex("?? 41 44").is_err());
    }

    #[test]
    fn odd_length_hex_is_rejected() {
        assert!(Pattern::from_hex("441").is_err());
    }

    #[test]
    fn stray_non_hex_characters_are_rejected() {
        assert!(Pattern::from_hex("4G").is_err());
    }

    #[test]
    fn lone_question_mark_is_rejected() {
        assert!(Pattern::from_hex("4?").is_err());
    }

    #[test]
    fn no_match_in_shorter_haystack() {
        let pattern = Pattern::from_hex("AA BB CC").unwrap();
        assert!(pattern.search(&[0xAA, 0xBB], false).is_empty());
    }
}
