//! AccountKey - hierarchical account identifiers
//!
//! Format: colon-joined path segments, e.g. `campaign:strategy:subStrategy`.
//! The parent of `a:b:c` is `a:b`; top-level keys have a single segment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separator between path segments in the string form
pub const KEY_SEPARATOR: char = ':';

/// Maximum key depth
pub const MAX_DEPTH: usize = 16;

/// Errors that can occur when parsing account keys
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Account key cannot be empty")]
    Empty,

    #[error("Account key has an empty segment: {0}")]
    EmptySegment(String),

    #[error("Account key too deep (max {MAX_DEPTH} segments): {0}")]
    TooDeep(String),
}

/// Hierarchical account key: an ordered, non-empty sequence of segments.
///
/// Ordering is lexicographic by segments, which makes a prefix sort
/// directly ahead of all its descendants - the registry relies on this for
/// subtree scans and for its deadlock-free lock ordering.
///
/// # Examples
/// ```
/// use adbank_core::AccountKey;
///
/// let key: AccountKey = "campaign:strategy".parse().unwrap();
/// assert_eq!(key.parent().unwrap().to_string(), "campaign");
/// assert!(key.child_of(&"campaign".parse().unwrap()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountKey {
    segments: Vec<String>,
}

impl AccountKey {
    /// Build a key from segments, validating each one
    pub fn new<I, S>(segments: I) -> Result<Self, KeyError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(KeyError::Empty);
        }
        if segments.len() > MAX_DEPTH {
            return Err(KeyError::TooDeep(segments.join(":")));
        }
        for segment in &segments {
            if segment.is_empty() || segment.contains(KEY_SEPARATOR) {
                return Err(KeyError::EmptySegment(segments.join(":")));
            }
        }
        Ok(Self { segments })
    }

    /// The key's path segments
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// True for single-segment keys
    pub fn is_top_level(&self) -> bool {
        self.segments.len() == 1
    }

    /// The top-level ancestor (first segment)
    pub fn top_level(&self) -> AccountKey {
        AccountKey {
            segments: vec![self.segments[0].clone()],
        }
    }

    /// The key with the last segment removed; `None` for top-level keys
    /// (their parent is the root, which is not an account).
    pub fn parent(&self) -> Option<AccountKey> {
        if self.segments.len() <= 1 {
            return None;
        }
        Some(AccountKey {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// True iff `prefix` is a strict prefix of this key
    pub fn child_of(&self, prefix: &AccountKey) -> bool {
        self.segments.len() > prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// Extend the key with one more segment
    pub fn child(&self, segment: impl Into<String>) -> Result<AccountKey, KeyError> {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        AccountKey::new(segments)
    }

    /// All strict ancestors, shortest first
    pub fn ancestors(&self) -> Vec<AccountKey> {
        (1..self.segments.len())
            .map(|len| AccountKey {
                segments: self.segments[..len].to_vec(),
            })
            .collect()
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join(":"))
    }
}

impl FromStr for AccountKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(KeyError::Empty);
        }
        AccountKey::new(s.split(KEY_SEPARATOR))
    }
}

impl TryFrom<String> for AccountKey {
    type Error = KeyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<AccountKey> for String {
    fn from(key: AccountKey) -> Self {
        key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> AccountKey {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display_roundtrip() {
        let k = key("campaign:strategy:sub");
        assert_eq!(k.to_string(), "campaign:strategy:sub");
        assert_eq!(k.depth(), 3);
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!("".parse::<AccountKey>(), Err(KeyError::Empty)));
    }

    #[test]
    fn test_empty_segment_rejected() {
        assert!(matches!(
            "campaign::sub".parse::<AccountKey>(),
            Err(KeyError::EmptySegment(_))
        ));
        assert!(matches!(
            "campaign:".parse::<AccountKey>(),
            Err(KeyError::EmptySegment(_))
        ));
    }

    #[test]
    fn test_too_deep_rejected() {
        let deep = vec!["x"; MAX_DEPTH + 1].join(":");
        assert!(matches!(
            deep.parse::<AccountKey>(),
            Err(KeyError::TooDeep(_))
        ));
    }

    #[test]
    fn test_parent_chain() {
        let k = key("a:b:c");
        assert_eq!(k.parent(), Some(key("a:b")));
        assert_eq!(k.parent().unwrap().parent(), Some(key("a")));
        assert_eq!(key("a").parent(), None);
    }

    #[test]
    fn test_child_of() {
        assert!(key("a:b:c").child_of(&key("a")));
        assert!(key("a:b:c").child_of(&key("a:b")));
        assert!(!key("a:b").child_of(&key("a:b")));
        assert!(!key("ab:c").child_of(&key("a")));
    }

    #[test]
    fn test_lexicographic_order_groups_subtrees() {
        let mut keys = vec![key("b"), key("a:b"), key("a"), key("a:b:c"), key("a:c")];
        keys.sort();
        let strings: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(strings, vec!["a", "a:b", "a:b:c", "a:c", "b"]);
    }

    #[test]
    fn test_ancestors() {
        let k = key("a:b:c");
        assert_eq!(k.ancestors(), vec![key("a"), key("a:b")]);
    }

    #[test]
    fn test_serde_as_string() {
        let k = key("camp:strat");
        let json = serde_json::to_string(&k).unwrap();
        assert_eq!(json, "\"camp:strat\"");
        let back: AccountKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, k);
    }
}
