//! Run-scoped replication watermarks.
//!
//! [`RunWatermarks`] answers "what since-bound does this (stream, partition)
//! fetch with?" and commits page watermarks to the bookmark store.
//!
//! The since-bound of a partition is fixed the first time the partition is
//! touched in a run. Partitions shared by many parent records (comments of
//! every issue of a repository land in one `{repo, org}` bucket) would
//! otherwise hide older rows of later parents behind the watermark committed
//! for earlier ones.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tap::{
    Bookmark, BookmarkStore, Context, ExtractError, PageWatermark, PartitionKey, ReplicationKind, ReplicationValue,
    StreamDefinition, StreamName, Timestamp,
};

#[derive(Debug, Clone, Default)]
struct Entry {
    starting: Option<ReplicationValue>,
    committed: Option<Bookmark>,
}

/// Per-run cache of starting values and last committed bookmarks.
#[derive(Debug, Default)]
pub struct RunWatermarks {
    start_date: Option<Timestamp>,
    entries: Mutex<HashMap<(StreamName, PartitionKey), Entry>>,
}

impl RunWatermarks {
    /// Creates an empty cache. `start_date` is the since-bound of date-time
    /// partitions that have never been bookmarked.
    pub fn new(start_date: Option<Timestamp>) -> Self {
        Self {
            start_date,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<(StreamName, PartitionKey), Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the since-bound for one fetch of `stream` in `partition`.
    ///
    /// Resolution order: the partition's own bookmark as of the start of the
    /// run; then, unless the stream ignores its parent's replication key, the
    /// since-bound the parent fetch ran with; then the configured start date.
    /// Streams without a replication key never have a since-bound.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::State`] if the bookmark cannot be loaded.
    pub async fn since(
        &self,
        store: &dyn BookmarkStore,
        stream: &StreamDefinition,
        partition: &PartitionKey,
        context: &Context,
    ) -> Result<Option<ReplicationValue>, ExtractError> {
        let Some(key) = &stream.replication_key else {
            return Ok(None);
        };
        let cache_key = (stream.name.clone(), partition.clone());

        let cached = self.entries().get(&cache_key).map(|e| e.starting.clone());
        let starting = match cached {
            Some(starting) => starting,
            None => {
                let stored = store.load(&stream.name, partition).await?;
                let starting = stored
                    .as_ref()
                    .filter(|b| b.replication_key == key.field.as_str() && b.value.kind() == key.kind)
                    .map(|b| b.value.clone());
                if stored.is_some() && starting.is_none() {
                    tracing::debug!(
                        stream = %stream.name,
                        partition = %partition,
                        "Ignoring bookmark recorded for a different replication key"
                    );
                }
                self.entries().insert(
                    cache_key,
                    Entry {
                        starting: starting.clone(),
                        committed: stored,
                    },
                );
                starting
            }
        };

        let inherited = if stream.ignore_parent_replication_key {
            None
        } else {
            context.parent_since().filter(|v| v.kind() == key.kind).cloned()
        };
        let start_date = match key.kind {
            ReplicationKind::DateTime => self.start_date.map(|value| ReplicationValue::Timestamp { value }),
            ReplicationKind::Integer => None,
        };

        Ok(starting.or(inherited).or(start_date))
    }

    /// Commits a fully consumed page's watermark.
    ///
    /// Saves only when the page moves the partition's bookmark forward and
    /// returns the saved bookmark.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::State`] if the bookmark cannot be saved.
    pub async fn commit(
        &self,
        store: &dyn BookmarkStore,
        stream: &StreamName,
        partition: &PartitionKey,
        page: &PageWatermark,
    ) -> Result<Option<Bookmark>, ExtractError> {
        let cache_key = (stream.clone(), partition.clone());
        let previous = self.entries().get(&cache_key).and_then(|e| e.committed.clone());

        let Some(next) = page.commit(previous.as_ref()) else {
            return Ok(None);
        };
        store.save(stream, partition, &next).await?;
        self.entries().entry(cache_key).or_default().committed = Some(next.clone());
        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use state::MemoryBookmarkStore;
    use tap::Record;

    use super::*;

    fn ts(raw: &str) -> ReplicationValue {
        ReplicationValue::Timestamp {
            value: Timestamp::parse_rfc3339(raw).unwrap(),
        }
    }

    fn comments(ignore_parent: bool) -> StreamDefinition {
        StreamDefinition::new("comments", "/repos/{org}/{repo}/comments")
            .unwrap()
            .with_parent("issues", ignore_parent)
            .unwrap()
            .with_replication_key("updated_at", ReplicationKind::DateTime)
            .unwrap()
    }

    fn partition() -> PartitionKey {
        PartitionKey::from_pairs([("org", "acme"), ("repo", "widget")])
    }

    fn context() -> Context {
        Context::from_keys([("org", "acme"), ("repo", "widget")])
    }

    fn page(stream: &StreamDefinition, updated_at: &str) -> PageWatermark {
        let mut watermark = PageWatermark::new(stream.name.clone(), stream.replication_key.clone().unwrap());
        let payload = json!({"id": 1, "updated_at": updated_at}).as_object().cloned().unwrap();
        watermark
            .observe(&Record::finalize(stream.name.clone(), payload, None))
            .unwrap();
        watermark
    }

    #[tokio::test]
    async fn start_date_applies_only_without_a_bookmark() {
        let store = MemoryBookmarkStore::new();
        let stream = comments(true);
        let watermarks = RunWatermarks::new(Timestamp::parse_rfc3339("2023-01-01T00:00:00Z"));

        let since = watermarks.since(&store, &stream, &partition(), &context()).await.unwrap();
        assert_eq!(since, Some(ts("2023-01-01T00:00:00Z")));

        store
            .save(&stream.name, &partition(), &Bookmark::new("updated_at", ts("2023-03-01T00:00:00Z")))
            .await
            .unwrap();
        let fresh_run = RunWatermarks::new(Timestamp::parse_rfc3339("2023-01-01T00:00:00Z"));
        let since = fresh_run.since(&store, &stream, &partition(), &context()).await.unwrap();
        assert_eq!(since, Some(ts("2023-03-01T00:00:00Z")));
    }

    #[tokio::test]
    async fn parent_since_is_inherited_unless_ignored() {
        let store = MemoryBookmarkStore::new();
        let watermarks = RunWatermarks::new(None);
        let ctx = context().with_parent_since(Some(ts("2023-02-01T00:00:00Z")));

        let inherited = watermarks.since(&store, &comments(false), &partition(), &ctx).await.unwrap();
        assert_eq!(inherited, Some(ts("2023-02-01T00:00:00Z")));

        let ignored = watermarks.since(&store, &comments(true), &partition(), &ctx).await.unwrap();
        assert_eq!(ignored, None);

        let integer_parent = context().with_parent_since(Some(ReplicationValue::Integer { value: 9 }));
        let mismatched = watermarks
            .since(&store, &comments(false), &partition(), &integer_parent)
            .await
            .unwrap();
        assert_eq!(mismatched, None);
    }

    #[tokio::test]
    async fn bookmark_of_another_key_is_ignored() {
        let store = MemoryBookmarkStore::new();
        let stream = comments(true);
        store
            .save(&stream.name, &partition(), &Bookmark::new("created_at", ts("2023-03-01T00:00:00Z")))
            .await
            .unwrap();

        let since = RunWatermarks::new(None)
            .since(&store, &stream, &partition(), &context())
            .await
            .unwrap();
        assert_eq!(since, None);
    }

    #[tokio::test]
    async fn commits_advance_the_store_but_not_the_run_bound() {
        let store = MemoryBookmarkStore::new();
        let stream = comments(true);
        let watermarks = RunWatermarks::new(None);

        assert_eq!(watermarks.since(&store, &stream, &partition(), &context()).await.unwrap(), None);

        let saved = watermarks
            .commit(&store, &stream.name, &partition(), &page(&stream, "2023-01-05T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(saved.map(|b| b.value), Some(ts("2023-01-05T00:00:00Z")));

        let older = watermarks
            .commit(&store, &stream.name, &partition(), &page(&stream, "2023-01-02T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(older, None);
        assert_eq!(
            store.get("comments", &partition()).map(|b| b.value),
            Some(ts("2023-01-05T00:00:00Z"))
        );

        assert_eq!(watermarks.since(&store, &stream, &partition(), &context()).await.unwrap(), None);
    }
}
