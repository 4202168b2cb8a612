//! Per-run counters.

use std::collections::BTreeMap;

use serde::Serialize;

use tap::StreamName;

/// Counters for one stream, summed over every invocation in a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    /// Records handed to the sink.
    pub records: u64,
    /// Pages fully processed.
    pub pages: u64,
    /// HTTP requests issued.
    pub requests: u64,
    /// Invocations skipped because a hint said there was nothing to fetch.
    pub skipped: u64,
    /// Invocations that ended on a tolerated HTTP status.
    pub tolerated: u64,
    /// Bookmarks written to the store.
    pub bookmarks_committed: u64,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub streams: BTreeMap<StreamName, StreamStats>,
}

impl SyncSummary {
    /// Returns the counters of one stream (zeros if it never ran).
    pub fn stream(&self, name: &str) -> StreamStats {
        self.streams.get(name).copied().unwrap_or_default()
    }

    pub(crate) fn entry(&mut self, name: &StreamName) -> &mut StreamStats {
        self.streams.entry(name.clone()).or_default()
    }

    /// Total records emitted across streams.
    pub fn total_records(&self) -> u64 {
        self.streams.values().map(|s| s.records).sum()
    }

    /// Total requests issued across streams.
    pub fn total_requests(&self) -> u64 {
        self.streams.values().map(|s| s.requests).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_streams_report_zeros() {
        let mut summary = SyncSummary::default();
        let issues = StreamName::new("issues").unwrap();
        summary.entry(&issues).records += 3;
        summary.entry(&issues).requests += 1;

        assert_eq!(summary.stream("issues").records, 3);
        assert_eq!(summary.stream("commits"), StreamStats::default());
        assert_eq!(summary.total_records(), 3);
        assert_eq!(summary.total_requests(), 1);
    }

    #[test]
    fn serializes_keyed_by_stream_name() {
        let mut summary = SyncSummary::default();
        summary.entry(&StreamName::new("readme").unwrap()).pages = 1;
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["streams"]["readme"]["pages"], 1);
    }
}
