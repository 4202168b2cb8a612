//! In-memory [`BookmarkStore`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use tap::{Bookmark, BookmarkStore, PartitionKey, StateError, StreamName};

type Entries = HashMap<(StreamName, PartitionKey), Bookmark>;

/// Bookmarks held in a map for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryBookmarkStore {
    entries: Mutex<Entries>,
}

impl MemoryBookmarkStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Entries>, StateError> {
        self.entries.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Returns the bookmark of a partition without going through the async
    /// trait.
    pub fn get(&self, stream: &str, partition: &PartitionKey) -> Option<Bookmark> {
        let stream = StreamName::new(stream)?;
        self.lock().ok()?.get(&(stream, partition.clone())).cloned()
    }

    /// Number of partitions with a bookmark.
    pub fn len(&self) -> usize {
        self.lock().map(|e| e.len()).unwrap_or_default()
    }

    /// True when no partition has a bookmark yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BookmarkStore for MemoryBookmarkStore {
    async fn load(&self, stream: &StreamName, partition: &PartitionKey) -> Result<Option<Bookmark>, StateError> {
        Ok(self.lock()?.get(&(stream.clone(), partition.clone())).cloned())
    }

    async fn save(&self, stream: &StreamName, partition: &PartitionKey, bookmark: &Bookmark) -> Result<(), StateError> {
        self.lock()?
            .insert((stream.clone(), partition.clone()), bookmark.clone());
        Ok(())
    }
}
