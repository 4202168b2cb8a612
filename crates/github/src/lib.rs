//! GitHub adapter of the extraction engine.
//!
//! Describes the GitHub REST resources as a [`tap::StreamGraph`] and supplies
//! the provider side of the engine's ports: an [`HttpTransport`] built on
//! `reqwest` and a schema-conforming [`RecordSink`] decorator.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Everything GitHub-specific lives here: URL templates,
//! preview media types, `Link` header pagination, rate-limit handling, and
//! the per-stream payload reshaping. The `engine` crate never sees any of
//! it.
//!
//! ## Module Layout
//!
//! | Module        | Contents                                                  |
//! |---------------|-----------------------------------------------------------|
//! | [`streams`]   | Stream names, [`CatalogConfig`], [`catalog`]              |
//! | [`hooks`]     | Pure post-process hooks of individual streams             |
//! | [`records`]   | Typed record schemas and [`ConformingSink`]               |
//! | [`transport`] | [`GithubTransport`] and its retry / pagination helpers    |
//! | [`errors`]    | [`GithubError`]                                           |
//!
//! [`HttpTransport`]: tap::HttpTransport
//! [`RecordSink`]: tap::RecordSink

pub mod errors;
pub mod hooks;
pub mod records;
pub mod streams;
pub mod transport;

pub use errors::GithubError;
pub use records::{conform, ConformingSink};
pub use streams::{catalog, definitions, CatalogConfig};
pub use transport::{GithubTransport, TransportConfig};
