//! Port traits implemented by infrastructure crates.
//!
//! The engine talks to the outside world only through these three traits:
//! a transport that performs GET requests, a store that persists bookmarks,
//! and a sink that receives finalized records. Retry, back-off, and
//! authentication are the transport's business; the engine never sees them.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{SinkError, StateError, TransportError};
use crate::{Bookmark, PartitionKey, Record, StreamName};

/// One GET request for a page of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageRequest {
    /// Path with every placeholder bound.
    pub path: String,
    /// Query parameters, in a stable order.
    pub query: Vec<(String, String)>,
    /// Stream-specific headers, merged over the transport's defaults.
    pub headers: BTreeMap<String, String>,
    /// Opaque token returned with the previous page; `None` for the first
    /// page. Transports that encode the whole next URL in the token may
    /// ignore `path` and `query` when it is set.
    pub page_token: Option<String>,
}

impl PageRequest {
    /// Returns the value of a query parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

/// A provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Decoded JSON body (`Value::Null` for empty bodies).
    pub body: Value,
    /// Token for the next page, if the provider reported one.
    pub next_page: Option<String>,
}

impl HttpResponse {
    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs HTTP GET requests against the provider.
///
/// Implementations own authentication, retry, and rate-limit back-off. A
/// returned `Ok` may carry any status; the engine decides whether it is
/// tolerated. `Err` means the transport gave up.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Fetches one page.
    async fn get(&self, request: &PageRequest) -> Result<HttpResponse, TransportError>;
}

/// Persists bookmarks per (stream, partition).
///
/// Last writer wins per partition key. Implementations must be `Send + Sync`
/// for use behind `Arc<dyn BookmarkStore>`.
#[async_trait]
pub trait BookmarkStore: Send + Sync {
    /// Reads the bookmark of a partition. `Ok(None)` when none was committed.
    async fn load(&self, stream: &StreamName, partition: &PartitionKey) -> Result<Option<Bookmark>, StateError>;

    /// Replaces the bookmark of a partition.
    async fn save(&self, stream: &StreamName, partition: &PartitionKey, bookmark: &Bookmark) -> Result<(), StateError>;
}

/// Receives finalized records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Emits one record. Called in provider page order within a
    /// (stream, partition).
    async fn emit(&self, record: &Record) -> Result<(), SinkError>;
}
