//! Orchestration of hierarchical incremental extraction.
//!
//! This crate drives a [`tap::StreamGraph`] through the port traits defined in
//! `tap`: it pages through each stream, hands every record to the sink,
//! recurses into child streams depth-first, and commits bookmarks once a page
//! and everything it spawned has been processed.
//!
//! ## Architectural Layer
//!
//! **Orchestration.** Depends on `tap` and `tokio` only. Concrete transports,
//! stores, and sinks are injected as `Arc<dyn …>` by the composition root.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`cancel`] | `CancelHandle` / `CancelSignal` |
//! | [`pagination`] | `Paginator`, the lazy page sequence of one partition |
//! | [`watermarks`] | `RunWatermarks`, run-scoped since-bounds and commits |
//! | [`orchestrator`] | `Orchestrator`, `SyncOptions`, `InvocationState` |
//! | [`summary`] | `SyncSummary` per-stream counters |

pub mod cancel;
pub mod orchestrator;
pub mod pagination;
pub mod summary;
pub mod watermarks;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use orchestrator::{InvocationFuture, InvocationState, Orchestrator, SyncOptions};
pub use pagination::{Page, Paginator};
pub use summary::{StreamStats, SyncSummary};
pub use watermarks::RunWatermarks;
