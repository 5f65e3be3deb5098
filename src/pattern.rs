//! Signature grammar and byte-window matching.
//!
//! A pattern is a whitespace-separated token list. Each token matches exactly
//! one byte: either two hex characters (a literal, case-insensitive) or `?` /
//! `??` (a wildcard). Patterns compile once to a `Vec<Option<u8>>` and are
//! reused across every scanned candidate.

use crate::error::{Error, Result};

/// Post-processing flags applied to a raw scan hit.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ScanFlags(u16);

impl ScanFlags {
    /// No post-processing; the raw hit address is the result.
    pub const NORMAL: Self = Self(0);
    /// Dereference a little-endian pointer-sized word at the hit address.
    pub const READ: Self = Self(0x1);
    /// Subtract the scanned candidate's base address from the result.
    pub const SUBTRACT: Self = Self(0x2);

    const MASK: u16 = 0x3;

    /// Validates a raw flag word from a caller.
    pub fn from_bits(bits: u16) -> Result<Self> {
        if bits & !Self::MASK != 0 {
            return Err(Error::InvalidArgument(format!(
                "unsupported scan flags: {bits:#x}"
            )));
        }
        Ok(Self(bits))
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn reads(self) -> bool {
        self.0 & Self::READ.0 != 0
    }

    pub fn subtracts(self) -> bool {
        self.0 & Self::SUBTRACT.0 != 0
    }
}

impl std::ops::BitOr for ScanFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A compiled signature: one entry per token, `None` for wildcards.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Pattern {
    tokens: Vec<Option<u8>>,
}

impl Pattern {
    /// Parses a whitespace-separated signature string.
    ///
    /// Rejects empty input and any token that is neither a wildcard nor two
    /// hex digits.
    pub fn parse(text: &str) -> Result<Self> {
        let mut tokens = Vec::new();
        for token in text.split_whitespace() {
            match token {
                "?" | "??" => tokens.push(None),
                _ => {
                    if token.len() != 2 {
                        return Err(Error::PatternSyntax(token.to_string()));
                    }
                    let byte = u8::from_str_radix(token, 16)
                        .map_err(|_| Error::PatternSyntax(token.to_string()))?;
                    tokens.push(Some(byte));
                }
            }
        }
        if tokens.is_empty() {
            return Err(Error::PatternSyntax(text.to_string()));
        }
        Ok(Self { tokens })
    }

    /// Token count; a window must be at least this long to contain a match.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Whether the pattern matches the window at byte offset `at`.
    pub fn matches_at(&self, window: &[u8], at: usize) -> bool {
        if at + self.tokens.len() > window.len() {
            return false;
        }
        self.tokens
            .iter()
            .zip(&window[at..])
            .all(|(token, byte)| token.is_none_or(|literal| literal == *byte))
    }

    /// Offset of the first (lowest-address) match inside `window`, if any.
    pub fn find(&self, window: &[u8]) -> Option<usize> {
        if window.len() < self.tokens.len() {
            return None;
        }
        (0..=window.len() - self.tokens.len()).find(|&i| self.matches_at(window, i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_literals_and_wildcards() {
        let pattern = Pattern::parse("48 8B ?? c3 ?").unwrap();
        assert_eq!(pattern.len(), 5);
        assert!(pattern.matches_at(&[0x48, 0x8B, 0x00, 0xC3, 0xFF], 0));
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(matches!(
            Pattern::parse("48 8B ZZ"),
            Err(Error::PatternSyntax(_))
        ));
        assert!(matches!(
            Pattern::parse("48 8"),
            Err(Error::PatternSyntax(_))
        ));
        assert!(matches!(
            Pattern::parse("123"),
            Err(Error::PatternSyntax(_))
        ));
        assert!(matches!(Pattern::parse("   "), Err(Error::PatternSyntax(_))));
    }

    #[test]
    fn finds_first_hit_in_window() {
        let window = [0x48, 0x8B, 0x05, 0x11, 0x22, 0x33, 0x44, 0xC3];
        let pattern = Pattern::parse("48 8B 05 ?? ?? ?? ?? C3").unwrap();
        assert_eq!(pattern.find(&window), Some(0));
    }

    #[test]
    fn first_match_wins_over_later_ones() {
        let window = [0x00, 0xAA, 0xBB, 0x00, 0xAA, 0xBB];
        let pattern = Pattern::parse("AA BB").unwrap();
        assert_eq!(pattern.find(&window), Some(1));
    }

    #[test]
    fn matching_is_idempotent_on_a_snapshot() {
        let window = [0x10, 0x20, 0x30, 0x40, 0x50];
        let pattern = Pattern::parse("30 ?? 50").unwrap();
        let first = pattern.find(&window);
        assert_eq!(first, Some(2));
        assert_eq!(pattern.find(&window), first);
    }

    #[test]
    fn wildcard_only_pattern_matches_at_offset_zero() {
        let pattern = Pattern::parse("?? ?? ??").unwrap();
        assert_eq!(pattern.find(&[9, 9, 9]), Some(0));
        assert_eq!(pattern.find(&[1, 2, 3, 4, 5, 6]), Some(0));
        assert_eq!(pattern.find(&[1, 2]), None);
    }

    #[test]
    fn no_match_in_short_or_mismatched_windows() {
        let pattern = Pattern::parse("DE AD").unwrap();
        assert_eq!(pattern.find(&[]), None);
        assert_eq!(pattern.find(&[0xDE]), None);
        assert_eq!(pattern.find(&[0xAD, 0xDE]), None);
    }

    #[test]
    fn hex_tokens_are_case_insensitive() {
        let upper = Pattern::parse("AB CD").unwrap();
        let lower = Pattern::parse("ab cd").unwrap();
        assert_eq!(upper, lower);
    }

    #[test]
    fn scan_flags_validate_their_mask() {
        assert_eq!(ScanFlags::from_bits(0).unwrap(), ScanFlags::NORMAL);
        assert!(ScanFlags::from_bits(1).unwrap().reads());
        assert!(ScanFlags::from_bits(2).unwrap().subtracts());
        let both = ScanFlags::from_bits(3).unwrap();
        assert!(both.reads() && both.subtracts());
        assert!(ScanFlags::from_bits(4).is_err());
    }

    #[test]
    fn scan_flags_compose_with_bitor() {
        let flags = ScanFlags::READ | ScanFlags::SUBTRACT;
        assert_eq!(flags.bits(), 3);
    }
}
