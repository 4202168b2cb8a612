//! Shared value types for the extraction domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (page sizes are positive, replication
//! values of different kinds never compare) and participate in domain
//! computations.

use std::cmp::Ordering;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Parses an RFC 3339 string (any offset), normalising it to UTC.
    ///
    /// Returns `None` if the string is not a valid RFC 3339 timestamp.
    pub fn parse_rfc3339(value: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(value)
            .ok()
            .map(|dt| Self(dt.with_timezone(&Utc)))
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// Formats the timestamp as RFC 3339 with a `Z` suffix, keeping
    /// sub-second digits only when they are present.
    pub fn to_rfc3339(self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------
// Replication values
// ---------------------------------------------------------------------------

/// Declared ordering of a replication key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationKind {
    /// RFC 3339 date-time values, ordered chronologically.
    DateTime,
    /// Integer values, ordered numerically.
    Integer,
}

impl std::fmt::Display for ReplicationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DateTime => f.write_str("date_time"),
            Self::Integer => f.write_str("integer"),
        }
    }
}

/// One observed value of a replication key.
///
/// Each variant carries its value in a named `value` field for clean JSON
/// serialization: `{"type": "timestamp", "value": "2023-01-05T00:00:00Z"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplicationValue {
    /// Date-time position.
    Timestamp {
        /// Observed timestamp.
        value: Timestamp,
    },
    /// Integer position.
    Integer {
        /// Observed integer.
        value: i64,
    },
}

impl ReplicationValue {
    /// Decodes a record field according to `kind`.
    ///
    /// `null` decodes to `Ok(None)`: records without a replication value never
    /// move a watermark. Values of the wrong shape are rejected with a
    /// description of what was expected.
    pub fn from_json(kind: ReplicationKind, value: &Value) -> Result<Option<Self>, String> {
        match (kind, value) {
            (_, Value::Null) => Ok(None),
            (ReplicationKind::DateTime, Value::String(s)) => Timestamp::parse_rfc3339(s)
                .map(|value| Some(Self::Timestamp { value }))
                .ok_or_else(|| format!("expected an RFC 3339 timestamp, got '{s}'")),
            (ReplicationKind::Integer, Value::Number(n)) => n
                .as_i64()
                .map(|value| Some(Self::Integer { value }))
                .ok_or_else(|| format!("expected a 64-bit integer, got {n}")),
            (ReplicationKind::Integer, Value::String(s)) => s
                .parse::<i64>()
                .map(|value| Some(Self::Integer { value }))
                .map_err(|_| format!("expected an integer, got '{s}'")),
            (kind, other) => Err(format!("expected a {kind} value, got {other}")),
        }
    }

    /// Returns the ordering kind of this value.
    pub fn kind(&self) -> ReplicationKind {
        match self {
            Self::Timestamp { .. } => ReplicationKind::DateTime,
            Self::Integer { .. } => ReplicationKind::Integer,
        }
    }

    /// Compares two values of the same kind.
    ///
    /// Returns `None` when the kinds differ; such values have no order.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Timestamp { value: a }, Self::Timestamp { value: b }) => Some(a.cmp(b)),
            (Self::Integer { value: a }, Self::Integer { value: b }) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Renders the value as a request query parameter.
    pub fn to_query_param(&self) -> String {
        match self {
            Self::Timestamp { value } => value.to_rfc3339(),
            Self::Integer { value } => value.to_string(),
        }
    }
}

impl std::fmt::Display for ReplicationValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_query_param())
    }
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// Number of records requested per page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageSize(u32);

impl PageSize {
    /// Creates a [`PageSize`], returning `None` for zero.
    pub fn new(size: u32) -> Option<Self> {
        if size == 0 {
            None
        } else {
            Some(Self(size))
        }
    }

    /// Returns the underlying integer value.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl Default for PageSize {
    fn default() -> Self {
        Self(100)
    }
}

impl std::fmt::Display for PageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
