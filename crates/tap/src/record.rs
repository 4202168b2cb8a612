//! Finalized records.
//!
//! A [`Record`] is one provider object after post-processing, with the
//! identifying keys of the context it was fetched under merged in.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{Context, StreamName};

/// A decoded JSON object as returned by the provider.
pub type Payload = Map<String, Value>;

/// Follows `path` through nested objects.
///
/// Returns `None` if any segment is missing or a non-object is traversed.
pub fn lookup<'a>(payload: &'a Payload, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = payload.get(first)?;
    for segment in rest {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// One finalized row of a stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    stream: StreamName,
    #[serde(rename = "record")]
    fields: Payload,
}

impl Record {
    /// Builds a record from a post-processed payload.
    ///
    /// Identifying keys of `context` are written into the row and take
    /// precedence over payload fields of the same name: the context is the
    /// authoritative identity of where the row came from. Hints are never
    /// merged.
    pub fn finalize(stream: StreamName, mut payload: Payload, context: Option<&Context>) -> Self {
        if let Some(ctx) = context {
            for (key, value) in ctx.keys() {
                payload.insert(key.to_owned(), value.clone());
            }
        }
        Self {
            stream,
            fields: payload,
        }
    }

    /// Stream the record belongs to.
    pub fn stream(&self) -> &StreamName {
        &self.stream
    }

    /// All fields of the row.
    pub fn fields(&self) -> &Payload {
        &self.fields
    }

    /// Returns a top-level field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns the values of `keys` in order, with `null` for missing fields.
    ///
    /// Downstream consumers deduplicate on this tuple, which is what makes
    /// refetching a page after an interrupted commit safe.
    pub fn primary_key(&self, keys: &[String]) -> Vec<Value> {
        keys.iter()
            .map(|k| self.fields.get(k).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Consumes the record, returning its fields.
    pub fn into_fields(self) -> Payload {
        self.fields
    }
}
