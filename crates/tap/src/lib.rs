//! Core extraction domain for tap-github.
//!
//! This crate contains every domain concept of hierarchical incremental
//! extraction: stream definitions and the graph they form, the context a
//! parent record hands to its children, partition keys, bookmarks, finalized
//! records, and the port traits infrastructure crates implement. It contains
//! no provider-specific rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`StreamName`, `FieldName`, `SyncRunId`) |
//! | [`types`] | Value types (`Timestamp`, `ReplicationValue`, `PageSize`) |
//! | [`errors`] | `ExtractError`, port errors, `RetryPolicy` |
//! | [`context`] | `Context` and child-context propagation |
//! | [`partition`] | `PartitionKey` and its resolution from a context |
//! | [`stream`] | `StreamDefinition`, path templates, policies |
//! | [`graph`] | `StreamGraph` validation and stream selection |
//! | [`bookmark`] | `Bookmark` and watermark arithmetic |
//! | [`record`] | Finalized `Record`s |
//! | [`ports`] | `HttpTransport`, `BookmarkStore`, `RecordSink` |

pub mod bookmark;
pub mod context;
pub mod errors;
pub mod graph;
pub mod identifiers;
pub mod partition;
pub mod ports;
pub mod record;
pub mod stream;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use bookmark::{Bookmark, PageWatermark};
pub use context::{propagate, ChildContextSpec, Context, ContextBase, ContextField};
pub use errors::{ExtractError, RetryPolicy, SinkError, StateError, TransportError};
pub use graph::{Selection, StreamGraph};
pub use identifiers::{FieldName, StreamName, SyncRunId};
pub use partition::{resolve_partition, PartitionKey};
pub use ports::{BookmarkStore, HttpResponse, HttpTransport, PageRequest, RecordSink};
pub use record::{Payload, Record};
pub use stream::{PaginationPolicy, PathTemplate, PostProcessFn, ReplicationKey, StreamDefinition};
pub use types::{PageSize, ReplicationKind, ReplicationValue, Timestamp};
