//! Document-type normalization and sequence keys.
//!
//! Keys end up as durable schema-object names (PostgreSQL sequences, RocksDB
//! key prefixes), so they are restricted to `[a-z0-9_]` and can only be built
//! through [`normalize`] or the validating constructors here.

use std::fmt;

use serde::Serialize;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::contracts::ValidationError;

/// Maximum length of a normalized type key.
/// `docseq_` + key + `_YYYY` must fit PostgreSQL's 63-byte identifier limit.
pub const MAX_TYPE_KEY_LEN: usize = 48;

/// Series name used when every document type shares one counter.
pub const SHARED_SERIES: &str = "shared_series";

/// Normalizes a free-text document-type label.
///
/// Lowercases, strips accents, turns whitespace and `-`, `_`, `/`, `.`
/// separators into a single `_`, and drops any other character that is not
/// an ASCII letter or digit. Idempotent.
pub fn normalize(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut pending_separator = false;

    for c in label.nfd() {
        if is_combining_mark(c) {
            continue;
        }
        if c.is_ascii_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.push(c.to_ascii_lowercase());
        } else if c.is_whitespace() || matches!(c, '-' | '_' | '/' | '.') {
            pending_separator = true;
        }
    }

    out
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_TYPE_KEY_LEN
        && !key.starts_with('_')
        && !key.ends_with('_')
        && !key.contains("__")
        && key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

/// Normalized document-type key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TypeKey(String);

impl TypeKey {
    /// Derives the key for a free-text label.
    pub fn from_label(label: &str) -> Result<Self, ValidationError> {
        let key = normalize(label);
        if is_valid_key(&key) {
            Ok(Self(key))
        } else {
            Err(ValidationError::InvalidTypeKey(label.to_string()))
        }
    }

    /// Accepts an already-normalized key, rejecting anything `normalize`
    /// could not have produced.
    pub fn parse(key: &str) -> Result<Self, ValidationError> {
        if is_valid_key(key) {
            Ok(Self(key.to_string()))
        } else {
            Err(ValidationError::InvalidTypeKey(key.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which numbering series a document draws from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Series {
    /// Each document type has its own counter.
    Type(TypeKey),
    /// All document types share one counter.
    Shared,
}

impl Series {
    pub fn as_str(&self) -> &str {
        match self {
            Series::Type(key) => key.as_str(),
            Series::Shared => SHARED_SERIES,
        }
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one durable counter: a series within a calendar year.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceKey {
    series: Series,
    year: i32,
}

impl SequenceKey {
    pub fn new(series: Series, year: i32) -> Result<Self, ValidationError> {
        if !(1..=9999).contains(&year) {
            return Err(ValidationError::InvalidYear(year));
        }
        Ok(Self { series, year })
    }

    pub fn series(&self) -> &Series {
        &self.series
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    /// Name of the backing schema object, e.g. `docseq_oficio_2025`.
    /// Only ever contains `[a-z0-9_]`.
    pub fn object_name(&self) -> String {
        format!("docseq_{}_{}", self.series.as_str(), self.year)
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.series, self.year)
    }
}
