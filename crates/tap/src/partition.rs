//! Partition key resolution.
//!
//! A partition is the bookmark bucket of a stream: two invocations whose
//! contexts project to the same [`PartitionKey`] share one bookmark.

use serde::{Deserialize, Serialize};

use crate::stream::StreamDefinition;
use crate::{Context, ExtractError};

/// Storage form of the global (empty) partition.
pub const GLOBAL_PARTITION: &str = "*";

/// Ordered `(key, value)` tuple identifying one bookmark bucket.
///
/// Values are stored in their rendered string form so keys hash and compare
/// without depending on JSON number formatting.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey(Vec<(String, String)>);

impl PartitionKey {
    /// The global partition shared by every invocation of a stream.
    pub fn global() -> Self {
        Self(Vec::new())
    }

    /// Builds a partition from already-rendered pairs, keeping their order.
    pub fn from_pairs<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Returns `true` for the global partition.
    pub fn is_global(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates `(key, value)` pairs in declared order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Stable string form used by bookmark stores, e.g. `repo=widget/org=acme`.
    ///
    /// `%`, `/` and `=` inside keys or values are percent-escaped so distinct
    /// partitions never collide.
    pub fn storage_key(&self) -> String {
        if self.is_global() {
            return GLOBAL_PARTITION.to_owned();
        }
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", escape(k), escape(v)))
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '=' => out.push_str("%3D"),
            '*' => out.push_str("%2A"),
            other => out.push(other),
        }
    }
    out
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Projects `context` onto the partition keys of `stream`.
///
/// - Declared keys are taken in declared order; a missing key is fatal.
/// - An empty declaration is the global partition.
/// - No declaration means global for roots and every identifying context key
///   (in key order) for children, i.e. the natural key of the parent record.
///
/// # Errors
///
/// Returns [`ExtractError::MissingPartitionKey`] if a declared key is absent.
pub fn resolve_partition(stream: &StreamDefinition, context: &Context) -> Result<PartitionKey, ExtractError> {
    match &stream.partition_keys {
        Some(keys) => keys
            .iter()
            .map(|key| {
                context
                    .key(key)
                    .map(|value| (key.clone(), Context::render(value)))
                    .ok_or_else(|| ExtractError::MissingPartitionKey {
                        stream: stream.name.clone(),
                        key: key.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(PartitionKey),
        None if stream.is_root() => Ok(PartitionKey::global()),
        None => Ok(PartitionKey(
            context.keys().map(|(k, v)| (k.to_owned(), Context::render(v))).collect(),
        )),
    }
}
