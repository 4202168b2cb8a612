//! Bookmarks and the replication watermark.
//!
//! A [`Bookmark`] is the persisted high-watermark of one (stream, partition).
//! The functions here are pure: they compute the next bookmark, they never
//! store it. Committing is the orchestrator's job, and it only commits after a
//! whole page was consumed.

use serde::{Deserialize, Serialize};

use crate::stream::ReplicationKey;
use crate::{ExtractError, Record, ReplicationValue, StreamName, Timestamp};

/// Persisted incremental-sync state of one (stream, partition).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Replication key field the value was taken from.
    pub replication_key: String,
    /// Largest replication value committed so far.
    pub value: ReplicationValue,
    /// When this bookmark was last committed.
    pub updated_at: Timestamp,
}

impl Bookmark {
    /// Creates a bookmark committed now.
    pub fn new(replication_key: impl Into<String>, value: ReplicationValue) -> Self {
        Self {
            replication_key: replication_key.into(),
            value,
            updated_at: Timestamp::now(),
        }
    }
}

/// Returns the maximum replication value recorded by `bookmark`.
pub fn max_seen(bookmark: Option<&Bookmark>) -> Option<&ReplicationValue> {
    bookmark.map(|b| &b.value)
}

/// Decodes the replication value of `record` under `key`.
///
/// Missing fields and `null` decode to `None`.
///
/// # Errors
///
/// Returns [`ExtractError::InvalidReplicationValue`] if the field has the
/// wrong shape for the key's ordering.
pub fn replication_value(
    stream: &StreamName,
    key: &ReplicationKey,
    record: &Record,
) -> Result<Option<ReplicationValue>, ExtractError> {
    match record.get(key.field.as_str()) {
        None => Ok(None),
        Some(raw) => ReplicationValue::from_json(key.kind, raw).map_err(|message| {
            ExtractError::InvalidReplicationValue {
                stream: stream.clone(),
                field: key.field.to_string(),
                message,
            }
        }),
    }
}

/// Returns the larger of two replication values.
///
/// Values of different kinds have no order; `candidate` then wins, since it
/// reflects the key as currently declared.
fn larger(current: ReplicationValue, candidate: ReplicationValue) -> ReplicationValue {
    match current.compare(&candidate) {
        Some(std::cmp::Ordering::Less) | None => candidate,
        Some(_) => current,
    }
}

/// Folds one record into a bookmark, keeping the larger value.
///
/// Returns the input unchanged when the record has no replication value.
///
/// # Errors
///
/// Propagates [`replication_value`] decoding errors.
pub fn advance(
    bookmark: Option<Bookmark>,
    stream: &StreamName,
    key: &ReplicationKey,
    record: &Record,
) -> Result<Option<Bookmark>, ExtractError> {
    let Some(observed) = replication_value(stream, key, record)? else {
        return Ok(bookmark);
    };
    Ok(Some(match bookmark {
        Some(existing) => {
            let value = larger(existing.value.clone(), observed);
            if value == existing.value {
                tracing::debug!(
                    stream = %stream,
                    replication_key = %key.field,
                    bookmark = %existing.value,
                    "Record does not advance the bookmark"
                );
                existing
            } else {
                Bookmark::new(key.field.as_str(), value)
            }
        }
        None => Bookmark::new(key.field.as_str(), observed),
    }))
}

/// Accumulates the maximum replication value observed within one page.
#[derive(Debug, Clone)]
pub struct PageWatermark {
    stream: StreamName,
    key: ReplicationKey,
    max: Option<ReplicationValue>,
}

impl PageWatermark {
    /// Starts an empty accumulator for `key`.
    pub fn new(stream: StreamName, key: ReplicationKey) -> Self {
        Self { stream, key, max: None }
    }

    /// Observes one finalized record.
    ///
    /// # Errors
    ///
    /// Propagates [`replication_value`] decoding errors.
    pub fn observe(&mut self, record: &Record) -> Result<(), ExtractError> {
        if let Some(value) = replication_value(&self.stream, &self.key, record)? {
            self.max = Some(match self.max.take() {
                Some(current) => larger(current, value),
                None => value,
            });
        }
        Ok(())
    }

    /// Returns the largest value observed so far.
    pub fn max(&self) -> Option<&ReplicationValue> {
        self.max.as_ref()
    }

    /// Produces the bookmark to commit after the page, or `None` when the page
    /// does not move `previous` forward.
    pub fn commit(&self, previous: Option<&Bookmark>) -> Option<Bookmark> {
        let observed = self.max.clone()?;
        match previous {
            Some(prev) if prev.replication_key == self.key.field.as_str() => {
                match prev.value.compare(&observed) {
                    Some(std::cmp::Ordering::Less) | None => Some(Bookmark::new(self.key.field.as_str(), observed)),
                    Some(_) => {
                        tracing::debug!(
                            stream = %self.stream,
                            replication_key = %self.key.field,
                            bookmark = %prev.value,
                            page_max = %observed,
                            "Page does not advance the bookmark"
                        );
                        None
                    }
                }
            }
            _ => Some(Bookmark::new(self.key.field.as_str(), observed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{FieldName, ReplicationKind};

    fn stream() -> StreamName {
        StreamName::new("issues").unwrap()
    }

    fn key() -> ReplicationKey {
        ReplicationKey {
            field: FieldName::new("updated_at").unwrap(),
            kind: ReplicationKind::DateTime,
        }
    }

    fn record(updated_at: serde_json::Value) -> Record {
        let payload = json!({"id": 1, "updated_at": updated_at}).as_object().cloned().unwrap();
        Record::finalize(stream(), payload, None)
    }

    fn ts(s: &str) -> ReplicationValue {
        ReplicationValue::Timestamp {
            value: Timestamp::parse_rfc3339(s).unwrap(),
        }
    }

    #[test]
    fn advance_creates_bookmark_lazily() {
        let b = advance(None, &stream(), &key(), &record(json!("2023-01-01T00:00:00Z"))).unwrap();
        assert_eq!(max_seen(b.as_ref()), Some(&ts("2023-01-01T00:00:00Z")));
    }

    #[test]
    fn advance_never_moves_backwards() {
        let b = advance(None, &stream(), &key(), &record(json!("2023-01-05T00:00:00Z"))).unwrap();
        let b = advance(b, &stream(), &key(), &record(json!("2023-01-02T00:00:00Z"))).unwrap();
        assert_eq!(max_seen(b.as_ref()), Some(&ts("2023-01-05T00:00:00Z")));
    }

    #[test]
    fn null_values_leave_the_bookmark_alone() {
        let b = advance(None, &stream(), &key(), &record(json!(null))).unwrap();
        assert!(b.is_none());
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = advance(None, &stream(), &key(), &record(json!("not a date"))).unwrap_err();
        assert!(matches!(err, ExtractError::InvalidReplicationValue { .. }));
    }

    #[test]
    fn page_watermark_commits_only_forward_progress() {
        let mut page = PageWatermark::new(stream(), key());
        page.observe(&record(json!("2023-01-03T00:00:00Z"))).unwrap();
        page.observe(&record(json!("2023-01-04T00:00:00Z"))).unwrap();
        page.observe(&record(json!("2023-01-01T00:00:00Z"))).unwrap();

        let ahead = Bookmark::new("updated_at", ts("2023-01-10T00:00:00Z"));
        assert!(page.commit(Some(&ahead)).is_none());

        let behind = Bookmark::new("updated_at", ts("2023-01-02T00:00:00Z"));
        let committed = page.commit(Some(&behind)).unwrap();
        assert_eq!(committed.value, ts("2023-01-04T00:00:00Z"));
    }

    #[test]
    fn stale_values_keep_the_previous_bookmark() {
        let previous = Bookmark::new("updated_at", ts("2023-01-10T00:00:00Z"));
        let kept = advance(Some(previous.clone()), &stream(), &key(), &record(json!("2023-01-10T00:00:00Z")))
            .unwrap()
            .unwrap();
        assert_eq!(kept, previous);

        let mut page = PageWatermark::new(stream(), key());
        page.observe(&record(json!("2023-01-10T00:00:00Z"))).unwrap();
        assert!(page.commit(Some(&previous)).is_none());
    }

    #[test]
    fn empty_page_commits_nothing() {
        let page = PageWatermark::new(stream(), key());
        assert!(page.commit(None).is_none());
    }

    #[test]
    fn bookmark_for_another_key_is_replaced() {
        let mut page = PageWatermark::new(stream(), key());
        page.observe(&record(json!("2023-01-03T00:00:00Z"))).unwrap();
        let stale = Bookmark::new("created_at", ts("2024-01-01T00:00:00Z"));
        assert_eq!(page.commit(Some(&stale)).unwrap().replication_key, "updated_at");
    }
}
