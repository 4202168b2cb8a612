//! JSON-file-backed [`BookmarkStore`].
//!
//! The whole state lives in one document:
//!
//! ```json
//! {
//!   "bookmarks": {
//!     "issues": {
//!       "org=acme/repo=widget": {
//!         "partition": [["org", "acme"], ["repo", "widget"]],
//!         "replication_key": "updated_at",
//!         "value": { "type": "timestamp", "value": "2023-01-05T00:00:00Z" },
//!         "updated_at": "2023-01-06T10:00:00Z"
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! Every save rewrites the document to a sibling temporary file and renames
//! it over the original, so a crash leaves either the old or the new state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use tap::{Bookmark, BookmarkStore, PartitionKey, StateError, StreamName};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredBookmark {
    partition: PartitionKey,
    #[serde(flatten)]
    bookmark: Bookmark,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default)]
    bookmarks: BTreeMap<StreamName, BTreeMap<String, StoredBookmark>>,
}

/// Bookmarks persisted in a JSON document on disk.
#[derive(Debug)]
pub struct JsonFileBookmarkStore {
    path: PathBuf,
    document: Mutex<StateDocument>,
}

impl JsonFileBookmarkStore {
    /// Opens the document at `path`, starting empty if the file does not
    /// exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the file cannot be read, or
    /// [`StateError::Malformed`] if it is not a state document.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let document = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => StateDocument::default(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateDocument::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(
            path = %path.display(),
            streams = document.bookmarks.len(),
            "Loaded bookmark state"
        );
        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    /// Location of the state document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, document: &StateDocument) -> Result<(), StateError> {
        let bytes = serde_json::to_vec_pretty(document)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl BookmarkStore for JsonFileBookmarkStore {
    async fn load(&self, stream: &StreamName, partition: &PartitionKey) -> Result<Option<Bookmark>, StateError> {
        let document = self.document.lock().await;
        Ok(document
            .bookmarks
            .get(stream)
            .and_then(|partitions| partitions.get(&partition.storage_key()))
            .map(|stored| stored.bookmark.clone()))
    }

    async fn save(&self, stream: &StreamName, partition: &PartitionKey, bookmark: &Bookmark) -> Result<(), StateError> {
        // Held across the write so concurrent saves land on disk in order.
        let mut document = self.document.lock().await;
        document.bookmarks.entry(stream.clone()).or_default().insert(
            partition.storage_key(),
            StoredBookmark {
                partition: partition.clone(),
                bookmark: bookmark.clone(),
            },
        );
        self.persist(&document).await
    }
}
