//! Bookmark persistence for tap-github.
//!
//! Implementations of [`tap::BookmarkStore`]:
//!
//! - [`MemoryBookmarkStore`] keeps bookmarks in a map, for tests and dry runs.
//! - [`JsonFileBookmarkStore`] keeps one JSON document on disk and rewrites it
//!   atomically on every commit.
//!
//! Both are last-writer-wins per (stream, partition).

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileBookmarkStore;
pub use memory::MemoryBookmarkStore;
