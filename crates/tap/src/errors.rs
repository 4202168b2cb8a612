//! Top-level error and retry-policy types for the extraction domain.
//!
//! [`ExtractError`] covers every condition that ends a traversal. Port-level
//! failures ([`TransportError`], [`StateError`], [`SinkError`]) are produced by
//! infrastructure crates and wrapped into [`ExtractError`] by the engine.
//!
//! [`RetryPolicy`] is a cross-cutting concern: transports use it to decide
//! whether a failed request may be re-issued before giving up.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::StreamName;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// - `Retryable` errors: network failures, 5xx responses, rate-limit responses.
/// - `NonRetryable` errors: authentication failures, malformed requests,
///   anything the provider will answer the same way again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    ///
    /// `after` optionally specifies the minimum delay before retrying (e.g.
    /// derived from `Retry-After` or `x-ratelimit-reset` response headers).
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Port errors
// ---------------------------------------------------------------------------

/// A request the transport could not complete.
///
/// Transports own retry and back-off; by the time the engine sees this error
/// the transport has already given up.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    /// Human-readable description of the failure.
    pub message: String,
    /// HTTP status of the last response, if one was received.
    pub status: Option<u16>,
    /// Whether the condition was considered transient.
    pub retry: RetryPolicy,
}

impl TransportError {
    /// Creates a transient error (network failure, 5xx, rate limit).
    pub fn retryable(message: impl Into<String>, status: Option<u16>, after: Option<Duration>) -> Self {
        Self {
            message: message.into(),
            status,
            retry: RetryPolicy::Retryable { after },
        }
    }

    /// Creates a permanent error.
    pub fn fatal(message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            message: message.into(),
            status,
            retry: RetryPolicy::NonRetryable,
        }
    }
}

/// Errors produced by [`BookmarkStore`](crate::ports::BookmarkStore)
/// implementations.
#[derive(Debug, Error)]
pub enum StateError {
    /// File-system I/O failure.
    #[error("state i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted state document could not be encoded or decoded.
    #[error("state document is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Internal lock was poisoned by a panicked thread.
    #[error("state store lock poisoned")]
    LockPoisoned,
}

/// Errors produced by [`RecordSink`](crate::ports::RecordSink) implementations.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The record could not be written.
    #[error("sink i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The record does not match the schema declared for its stream.
    #[error("record for stream '{stream}' does not match its schema: {message}")]
    Schema {
        /// Stream the record belongs to.
        stream: StreamName,
        /// Decoder message.
        message: String,
    },

    /// The record could not be serialized.
    #[error("record could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Extraction errors
// ---------------------------------------------------------------------------

/// Errors that end a traversal.
///
/// Contract violations (see [`ExtractError::is_contract_violation`]) indicate a
/// defect in the stream graph configuration and are never retried. Everything
/// else is a runtime failure of one (stream, partition) fetch that propagates
/// after the last committed bookmark has been preserved.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// A child stream was invoked without the context its parent should
    /// have supplied.
    #[error("stream '{stream}' requires a parent context but was invoked without one")]
    MissingContext {
        /// Stream that was invoked.
        stream: StreamName,
    },

    /// A path template placeholder had no value in the context.
    #[error("stream '{stream}': path placeholder '{{{placeholder}}}' is not bound by the context")]
    UnresolvedPlaceholder {
        /// Stream whose path could not be bound.
        stream: StreamName,
        /// The unbound placeholder name.
        placeholder: String,
    },

    /// A declared partition key had no value in the context.
    #[error("stream '{stream}': partition key '{key}' is missing from the context")]
    MissingPartitionKey {
        /// Stream whose partition could not be resolved.
        stream: StreamName,
        /// The missing key.
        key: String,
    },

    /// A parent record lacked a field the child context is built from.
    #[error("stream '{stream}': record has no field '{path}' to build the child context from")]
    MissingContextField {
        /// Parent stream whose record was incomplete.
        stream: StreamName,
        /// Dotted path of the missing field.
        path: String,
    },

    /// A stream name was referenced but is not part of the graph.
    #[error("unknown stream '{stream}'")]
    UnknownStream {
        /// The unknown name.
        stream: String,
    },

    /// The stream graph is inconsistent (cycles, duplicate names, keys that
    /// cannot be derived from the parent).
    #[error("invalid stream graph: {message}")]
    InvalidGraph {
        /// Description of the inconsistency.
        message: String,
    },

    /// The transport gave up on a request.
    #[error("stream '{stream}': request to '{path}' failed: {source}")]
    Transport {
        /// Stream whose request failed.
        stream: StreamName,
        /// Request path.
        path: String,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },

    /// The provider answered with a status that is neither success nor
    /// tolerated for this stream.
    #[error("stream '{stream}': unexpected HTTP status {status} from '{path}'")]
    UnexpectedStatus {
        /// Stream whose request failed.
        stream: StreamName,
        /// Request path.
        path: String,
        /// The status received.
        status: u16,
    },

    /// A response body or record did not have the expected shape.
    #[error("stream '{stream}': {message}")]
    Decode {
        /// Stream whose data was malformed.
        stream: StreamName,
        /// Description of the problem.
        message: String,
    },

    /// A replication key value could not be decoded.
    #[error("stream '{stream}': invalid value for replication key '{field}': {message}")]
    InvalidReplicationValue {
        /// Stream whose record carried the value.
        stream: StreamName,
        /// Replication key field.
        field: String,
        /// Decoder message.
        message: String,
    },

    /// The bookmark store failed.
    #[error("bookmark store failure: {0}")]
    State(#[from] StateError),

    /// The record sink failed.
    #[error("record sink failure: {0}")]
    Sink(#[from] SinkError),

    /// The run was cancelled before it completed.
    #[error("extraction cancelled")]
    Cancelled,

    /// A stream definition or runtime option is invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },
}

impl ExtractError {
    /// Returns `true` for errors that signal a defect in the stream graph
    /// rather than a runtime failure.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::MissingContext { .. }
                | Self::UnresolvedPlaceholder { .. }
                | Self::MissingPartitionKey { .. }
                | Self::MissingContextField { .. }
                | Self::UnknownStream { .. }
                | Self::InvalidGraph { .. }
        )
    }
}
