//! Depth-first stream graph traversal.
//!
//! [`Orchestrator::run`] is the single recursive entry point. One invocation
//! handles one (stream, inbound context) pair:
//!
//! ```text
//! READY ──skip hint is zero──────────────────────────► SKIPPED
//!   │
//!   ▼
//! FETCHING ──page──► STREAMING ──per record──► emit, then recurse into children
//!   │                    │
//!   │                    └── page done ──► commit watermark ──► next page
//!   ▼
//! DONE   (any error on the way ──► FAILED, last committed bookmark kept)
//! ```
//!
//! Each record's children run to completion before the next record is
//! processed, and a page's watermark is committed only after every record of
//! the page (and its whole subtree) succeeded.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::Instrument;

use tap::{
    propagate, resolve_partition, BookmarkStore, Context, ExtractError, HttpTransport, PageWatermark, PartitionKey,
    Record, RecordSink, ReplicationValue, Selection, StreamDefinition, StreamGraph, SyncRunId, Timestamp,
};

use crate::cancel::CancelSignal;
use crate::pagination::Paginator;
use crate::summary::SyncSummary;
use crate::watermarks::RunWatermarks;

/// Boxed future returned by the recursive [`Orchestrator::run`].
pub type InvocationFuture<'a> = Pin<Box<dyn Future<Output = Result<InvocationState, ExtractError>> + Send + 'a>>;

// ---------------------------------------------------------------------------
// Invocation state
// ---------------------------------------------------------------------------

/// Lifecycle of one (stream, context) invocation, reported in log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Ready,
    Fetching,
    Skipped,
    Streaming,
    Failed,
    Done,
}

impl std::fmt::Display for InvocationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::Fetching => "fetching",
            Self::Skipped => "skipped",
            Self::Streaming => "streaming",
            Self::Failed => "failed",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Run-level knobs.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Since-bound for date-time partitions without a bookmark.
    pub start_date: Option<Timestamp>,
    /// Allow-list of stream names to emit. `None` emits every stream.
    pub streams: Option<Vec<String>>,
    /// Cooperative cancellation.
    pub cancel: CancelSignal,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            start_date: None,
            streams: None,
            cancel: CancelSignal::never(),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives one sync run over a [`StreamGraph`].
///
/// An orchestrator is single-use: its since-bounds are fixed for the run, so
/// a new run needs a new orchestrator.
pub struct Orchestrator {
    run_id: SyncRunId,
    graph: Arc<StreamGraph>,
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn BookmarkStore>,
    sink: Arc<dyn RecordSink>,
    selection: Selection,
    watermarks: RunWatermarks,
    cancel: CancelSignal,
    summary: Mutex<SyncSummary>,
}

impl Orchestrator {
    /// Creates an orchestrator for one run.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::UnknownStream`] if the stream allow-list names
    /// a stream that is not in the graph.
    pub fn new(
        graph: Arc<StreamGraph>,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn BookmarkStore>,
        sink: Arc<dyn RecordSink>,
        options: SyncOptions,
    ) -> Result<Self, ExtractError> {
        let selection = graph.select(options.streams.as_deref())?;
        Ok(Self {
            run_id: SyncRunId::new_random(),
            graph,
            transport,
            store,
            sink,
            selection,
            watermarks: RunWatermarks::new(options.start_date),
            cancel: options.cancel,
            summary: Mutex::new(SyncSummary::default()),
        })
    }

    /// Identifier of this run.
    pub fn run_id(&self) -> SyncRunId {
        self.run_id
    }

    /// Counters accumulated so far.
    pub fn summary(&self) -> SyncSummary {
        self.stats().clone()
    }

    fn stats(&self) -> MutexGuard<'_, SyncSummary> {
        self.summary.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs every root stream that leads to a selected stream, in graph
    /// order.
    ///
    /// # Errors
    ///
    /// Returns the first error of any invocation. Bookmarks committed before
    /// the error stay committed.
    pub async fn start(&self) -> Result<SyncSummary, ExtractError> {
        let span = tracing::info_span!("sync", run_id = %self.run_id);
        async {
            tracing::info!("Starting sync");
            for root in self.graph.roots() {
                if self.selection.is_traversed(&root.name) {
                    self.run(root, None).await?;
                }
            }
            let summary = self.summary();
            tracing::info!(
                records = summary.total_records(),
                requests = summary.total_requests(),
                "Sync complete"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    /// Processes `stream` under `inbound`, recursing depth-first into every
    /// traversed child for each record.
    ///
    /// Returns [`InvocationState::Skipped`] or [`InvocationState::Done`].
    ///
    /// # Errors
    ///
    /// - [`ExtractError::MissingContext`] when a child stream is invoked
    ///   without context.
    /// - Any pagination, post-processing, sink, or bookmark error of this
    ///   invocation or of a descendant.
    pub fn run<'a>(&'a self, stream: &'a StreamDefinition, inbound: Option<Context>) -> InvocationFuture<'a> {
        let span = tracing::debug_span!("stream", stream = %stream.name, partition = tracing::field::Empty);
        Box::pin(
            async move {
                let result = self.invoke(stream, inbound).await;
                if let Err(error) = &result {
                    tracing::debug!(state = %InvocationState::Failed, %error, "Invocation failed");
                }
                result
            }
            .instrument(span),
        )
    }

    async fn invoke(&self, stream: &StreamDefinition, inbound: Option<Context>) -> Result<InvocationState, ExtractError> {
        let context = inbound.unwrap_or_default();
        if !stream.is_root() && context.is_empty() {
            return Err(ExtractError::MissingContext {
                stream: stream.name.clone(),
            });
        }
        tracing::trace!(state = %InvocationState::Ready, %context);

        if let Some(hint) = stream.skip_reason(&context) {
            self.stats().entry(&stream.name).skipped += 1;
            tracing::debug!(state = %InvocationState::Skipped, hint, "Hint reports nothing to fetch");
            return Ok(InvocationState::Skipped);
        }

        let partition = resolve_partition(stream, &context)?;
        tracing::Span::current().record("partition", tracing::field::display(&partition));

        let since = self
            .watermarks
            .since(self.store.as_ref(), stream, &partition, &context)
            .await?;
        tracing::debug!(state = %InvocationState::Fetching, since = ?since, "Fetching");

        let pass = Pass {
            stream,
            children: self
                .graph
                .children(&stream.name)
                .filter(|child| self.selection.is_traversed(&child.name))
                .collect(),
            emit: self.selection.is_selected(&stream.name),
            context,
            partition,
            since,
        };

        let mut pages = Paginator::new(
            self.transport.as_ref(),
            stream,
            &pass.context,
            pass.since.as_ref(),
            &self.cancel,
        )?;
        let outcome = self.stream_pages(&pass, &mut pages).await;

        {
            let mut stats = self.stats();
            let entry = stats.entry(&stream.name);
            entry.requests += pages.requests();
            if pages.tolerated_status().is_some() {
                entry.tolerated += 1;
            }
        }

        outcome?;
        tracing::debug!(state = %InvocationState::Done, "Invocation done");
        Ok(InvocationState::Done)
    }

    async fn stream_pages(&self, pass: &Pass<'_>, pages: &mut Paginator<'_>) -> Result<(), ExtractError> {
        let stream = pass.stream;
        while let Some(page) = pages.next_page().await? {
            tracing::debug!(
                state = %InvocationState::Streaming,
                page = page.number,
                records = page.records.len(),
                "Processing page"
            );
            let mut watermark = stream
                .replication_key
                .clone()
                .map(|key| PageWatermark::new(stream.name.clone(), key));
            let mut emitted = 0_u64;

            for payload in page.records {
                self.cancel.check()?;
                let payload = stream.post_process(payload, &pass.context)?;
                let record = Record::finalize(stream.name.clone(), payload, Some(&pass.context));
                if let Some(watermark) = watermark.as_mut() {
                    watermark.observe(&record)?;
                }
                if pass.emit {
                    self.sink.emit(&record).await?;
                    emitted += 1;
                }
                for &child in &pass.children {
                    let child_context = propagate(stream, record.fields(), Some(&pass.context))?
                        .with_parent_since(pass.since.clone());
                    self.run(child, Some(child_context)).await?;
                }
            }

            let committed = match &watermark {
                Some(watermark) => {
                    self.watermarks
                        .commit(self.store.as_ref(), &stream.name, &pass.partition, watermark)
                        .await?
                }
                None => None,
            };

            if let Some(bookmark) = &committed {
                tracing::debug!(
                    replication_key = %bookmark.replication_key,
                    value = %bookmark.value,
                    "Bookmark advanced"
                );
            }
            let mut stats = self.stats();
            let entry = stats.entry(&stream.name);
            entry.pages += 1;
            entry.records += emitted;
            entry.bookmarks_committed += u64::from(committed.is_some());
        }
        Ok(())
    }
}

/// Everything one invocation resolved before its first fetch.
struct Pass<'s> {
    stream: &'s StreamDefinition,
    children: Vec<&'s StreamDefinition>,
    emit: bool,
    context: Context,
    partition: PartitionKey,
    since: Option<ReplicationValue>,
}
