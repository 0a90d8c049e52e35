//! Platform-safe name encoding and decoding APIs.
//!
//! The execution platform restricts parameter and stage names to
//! `[A-Za-z0-9_]`, while workflow languages produce dotted names like
//! `bam_stats.coverage` (a call output) or `lib.align.reads` (a namespaced
//! identifier). This crate maps between the two forms: dots become the
//! reserved `___` separator, and the mapping is injective and exactly
//! reversible for every legal source name.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// The reserved segment separator in encoded names.
///
/// Segments are forbidden from containing consecutive underscores or
/// leading/trailing underscores, so every occurrence of this sequence in an
/// encoded name is a separator.
pub const SEPARATOR: &str = "___";

/// Possible errors when encoding or decoding a name.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    /// A name or one of its dotted segments is empty.
    #[error("empty name segment in `{0}`")]
    EmptySegment(String),
    /// A segment contains a character outside `[A-Za-z0-9_]`.
    #[error("illegal character `{1}` in name segment `{0}`")]
    IllegalCharacter(String, char),
    /// A segment starts with something other than a letter.
    #[error("name segment `{0}` must start with a letter")]
    BadLeadingCharacter(String),
    /// A segment would make the encoded form ambiguous to decode.
    ///
    /// This covers consecutive underscores (which could collide with the
    /// `___` separator) and trailing underscores (which could merge into an
    /// adjacent separator).
    #[error("name segment `{0}` is ambiguous under `___` encoding")]
    AmbiguousSegment(String),
}

fn check_segment(segment: &str, whole: &str) -> Result<(), NameError> {
    if segment.is_empty() {
        return Err(NameError::EmptySegment(whole.into()));
    }

    if let Some(bad) = segment
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '_')
    {
        return Err(NameError::IllegalCharacter(segment.into(), bad));
    }

    if !segment.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(NameError::BadLeadingCharacter(segment.into()));
    }

    if segment.contains("__") || segment.ends_with('_') {
        return Err(NameError::AmbiguousSegment(segment.into()));
    }

    Ok(())
}

/// A platform-safe parameter or stage name.
///
/// Constructed by [`EncodedName::encode`] from a dotted source name, or by
/// [`EncodedName::from_encoded`] from a string already in encoded form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedName(String);

impl EncodedName {
    /// Encode a dotted source name into its platform-safe form.
    ///
    /// `bam_stats.coverage` encodes as `bam_stats___coverage`; a name with
    /// no dots is validated but otherwise unchanged.
    pub fn encode(source: &str) -> Result<Self, NameError> {
        let segments = source.split('.').collect::<Vec<_>>();

        for segment in &segments {
            check_segment(segment, source)?;
        }

        Ok(Self(segments.join(SEPARATOR)))
    }

    /// Accept a name that is already in encoded form.
    ///
    /// The same segment rules apply as for [`EncodedName::encode`]; the
    /// segments here are the `___`-separated components.
    pub fn from_encoded(encoded: &str) -> Result<Self, NameError> {
        for segment in encoded.split(SEPARATOR) {
            check_segment(segment, encoded)?;
        }

        Ok(Self(encoded.into()))
    }

    /// Decode back into the dotted source form.
    ///
    /// Decoding cannot fail: every `EncodedName` was validated on
    /// construction, so each `___` occurrence is exactly one separator.
    pub fn decode(&self) -> String {
        self.0.split(SEPARATOR).collect::<Vec<_>>().join(".")
    }

    /// Returns the encoded form as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the namespace depth, i.e. the number of dotted segments.
    pub fn depth(&self) -> usize {
        self.0.split(SEPARATOR).count()
    }

    /// Encode the dotted join of `namespace` and `leaf`.
    ///
    /// This is the common case of naming a call output: the call alias plus
    /// the callee's output name.
    pub fn namespaced(namespace: &str, leaf: &str) -> Result<Self, NameError> {
        Self::encode(&format!("{namespace}.{leaf}"))
    }
}

impl fmt::Display for EncodedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for EncodedName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_roundtrip() {
        for source in &[
            "x",
            "reads",
            "bam_stats.coverage",
            "lib.align.reads",
            "a1.b2.c3",
            "CamelCase.snake_case",
        ] {
            let encoded = EncodedName::encode(source).unwrap();
            assert_eq!(&encoded.decode(), source, "round-trip for {source}");
        }
    }

    #[test]
    fn test_encode_injective() {
        // Distinct legal sources must never collide after encoding.
        let pairs = &[
            ("a.b", "a_b"),
            ("a.b.c", "a.b_c"),
            ("alpha.beta", "alphabeta"),
        ];

        for (left, right) in pairs {
            let left = EncodedName::encode(left).unwrap();
            let right = EncodedName::encode(right).unwrap();
            assert_ne!(left, right);
        }
    }

    #[test]
    fn test_rejects_illegal_names() {
        for bad in &[
            "",
            ".",
            "a..b",
            "a.",
            ".a",
            "has space",
            "has-dash",
            "1leading",
            "_leading",
            "trailing_",
            "double__underscore",
            "a.b!",
        ] {
            assert!(EncodedName::encode(bad).is_err(), "expected error for {bad:?}");
        }
    }

    #[test]
    fn test_from_encoded() {
        let name = EncodedName::from_encoded("bam_stats___coverage").unwrap();
        assert_eq!(name.decode(), "bam_stats.coverage");
        assert_eq!(name.depth(), 2);

        // Four underscores cannot split into legal segments.
        assert!(EncodedName::from_encoded("foo____bar").is_err());
    }

    #[test]
    fn test_namespaced() {
        let name = EncodedName::namespaced("add", "result").unwrap();
        assert_eq!(name.as_str(), "add___result");
        assert_eq!(name.decode(), "add.result");
    }
}
