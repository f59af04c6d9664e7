//! Call metadata and the per-call header/trailer state machine.
//!
//! [`Metadata`] is the out-of-band key/value data exchanged with a call.
//! [`MetadataState`] tracks what the handler has staged for the response
//! header and trailer, and enforces that the header is sent exactly once.
//!
//! # Header lifecycle
//!
//! ```text
//! set_header ──► pending ──flush()──► sent (headerSent = true)
//!                   ▲                    │
//!                   └── ignored after ◄──┘
//! ```
//!
//! Malformed arguments (anything whose [`IntoMetadata`] conversion yields
//! `None`) are ignored instead of being rejected.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Insertion-ordered call metadata.
///
/// Keys are normalized to lowercase on insert, matching the wire rules of
/// RPC metadata.
///
/// # Example
///
/// ```
/// use thales_core::Metadata;
///
/// let mut md = Metadata::new();
/// md.insert("X-Request-Id", "abc");
/// assert_eq!(md.get("x-request-id"), Some("abc"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata {
    entries: IndexMap<String, String>,
}

impl Metadata {
    /// Creates empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing any previous value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .insert(key.into().to_ascii_lowercase(), value.into());
    }

    /// Returns the value for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Removes a key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.shift_remove(&key.to_ascii_lowercase())
    }

    /// Returns `true` if the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_ascii_lowercase())
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copies every entry of `other` into `self`, overwriting duplicates.
    pub fn extend_from(&mut self, other: &Metadata) {
        for (k, v) in other.iter() {
            self.insert(k, v);
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut md = Metadata::new();
        for (k, v) in iter {
            md.insert(k, v);
        }
        md
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Metadata {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Conversion into a well-formed metadata mapping.
///
/// Returning `None` marks the argument as malformed; metadata operations
/// then behave as if the argument had been omitted.
pub trait IntoMetadata {
    /// Converts `self`, or returns `None` if it is not a flat mapping.
    fn into_metadata(self) -> Option<Metadata>;
}

impl IntoMetadata for Metadata {
    fn into_metadata(self) -> Option<Metadata> {
        Some(self)
    }
}

impl IntoMetadata for &Metadata {
    fn into_metadata(self) -> Option<Metadata> {
        Some(self.clone())
    }
}

impl<T: IntoMetadata> IntoMetadata for Option<T> {
    fn into_metadata(self) -> Option<Metadata> {
        self.and_then(IntoMetadata::into_metadata)
    }
}

impl<K: Into<String>, V: Into<String>> IntoMetadata for HashMap<K, V> {
    fn into_metadata(self) -> Option<Metadata> {
        Some(self.into_iter().collect())
    }
}

impl<K: Into<String>, V: Into<String>> IntoMetadata for BTreeMap<K, V> {
    fn into_metadata(self) -> Option<Metadata> {
        Some(self.into_iter().collect())
    }
}

impl<K: Into<String>, V: Into<String>> IntoMetadata for Vec<(K, V)> {
    fn into_metadata(self) -> Option<Metadata> {
        Some(self.into_iter().collect())
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> IntoMetadata for [(K, V); N] {
    fn into_metadata(self) -> Option<Metadata> {
        Some(self.into_iter().collect())
    }
}

/// Only a JSON object of scalar values is a mapping. Strings, arrays, null,
/// and objects holding nested values are malformed.
impl IntoMetadata for serde_json::Value {
    fn into_metadata(self) -> Option<Metadata> {
        let serde_json::Value::Object(map) = self else {
            return None;
        };

        let mut md = Metadata::new();
        for (key, value) in map {
            let value = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            md.insert(key, value);
        }
        Some(md)
    }
}

/// Per-call header and trailer accumulator.
///
/// The header is sent at most once. Until then, [`set_header`] stages
/// fields; afterwards those calls are silently dropped. The trailer is
/// independent of the header and may be mutated until the call ends.
///
/// [`set_header`]: MetadataState::set_header
#[derive(Debug, Default)]
pub struct MetadataState {
    pending_header: Metadata,
    header_sent: bool,
    trailer: Metadata,
}

impl MetadataState {
    /// Creates an empty state with the header not yet sent.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a header field. No-op once the header has been sent.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        if !self.header_sent {
            self.pending_header.insert(key, value);
        }
    }

    /// Returns the header fields staged so far.
    #[must_use]
    pub fn pending_header(&self) -> &Metadata {
        &self.pending_header
    }

    /// Returns `true` once the header has been flushed.
    #[must_use]
    pub fn header_sent(&self) -> bool {
        self.header_sent
    }

    /// Marks the header as sent and returns the header to deliver.
    ///
    /// Returns `None` if the header was already sent. A well-formed override
    /// replaces the staged fields entirely; a malformed one is ignored.
    pub fn flush(&mut self, header_override: impl IntoMetadata) -> Option<Metadata> {
        if self.header_sent {
            return None;
        }
        if let Some(replacement) = header_override.into_metadata() {
            self.pending_header = replacement;
        }
        self.header_sent = true;
        Some(std::mem::take(&mut self.pending_header))
    }

    /// Upserts a trailer field.
    pub fn set_trailer(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.trailer.insert(key, value);
    }

    /// Returns the trailer accumulated so far.
    #[must_use]
    pub fn trailer(&self) -> &Metadata {
        &self.trailer
    }

    /// Resolves the trailer to deliver with the terminal status.
    ///
    /// A well-formed end value replaces the accumulated trailer entirely.
    /// A missing or malformed end value leaves it unchanged.
    pub fn finish_trailer(&mut self, end_value: impl IntoMetadata) -> Metadata {
        if let Some(replacement) = end_value.into_metadata() {
            self.trailer = replacement;
        }
        self.trailer.clone()
    }
}
