//! Static stream descriptors.
//!
//! A [`StreamDefinition`] describes one resource type: where to fetch it, how
//! its rows are keyed, how it is partitioned and bookmarked, and how its
//! records drive child streams. Behaviour that varies per resource is injected
//! as data ([`ChildContextSpec`], skip hints, extra query parameters) or as a
//! plain function pointer ([`PostProcessFn`]); the orchestrator dispatches on
//! these fields instead of on a type hierarchy.

use std::collections::{BTreeMap, BTreeSet};

use crate::context::{ChildContextSpec, Context};
use crate::record::Payload;
use crate::{ExtractError, FieldName, PageSize, ReplicationKind, StreamName};

/// Query parameter carrying the replication lower bound, unless overridden.
pub const DEFAULT_SINCE_PARAM: &str = "since";

/// Query parameter carrying the page size, unless overridden.
pub const DEFAULT_PAGE_SIZE_PARAM: &str = "per_page";

/// Derives synthetic fields or reshapes a raw provider object before it is
/// finalized.
///
/// Must be pure: no I/O, same output for the same input. Every field it
/// introduces must be part of the stream's declared schema. The error string
/// describes which source field was missing or malformed.
pub type PostProcessFn = fn(Payload, &Context) -> Result<Payload, String>;

// ---------------------------------------------------------------------------
// Path templates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A request path with `{name}` placeholders bound from a [`Context`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parses a template such as `"/repos/{org}/{repo}/issues"`.
    ///
    /// Returns `None` for unbalanced braces or empty placeholder names.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut segments = Vec::new();
        let mut rest = raw;
        while let Some(open) = rest.find('{') {
            let (literal, tail) = rest.split_at(open);
            if literal.contains('}') {
                return None;
            }
            if !literal.is_empty() {
                segments.push(Segment::Literal(literal.to_owned()));
            }
            let close = tail.find('}')?;
            let name = &tail[1..close];
            if name.is_empty() || name.contains('{') {
                return None;
            }
            segments.push(Segment::Placeholder(name.to_owned()));
            rest = &tail[close + 1..];
        }
        if rest.contains('}') {
            return None;
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_owned()));
        }
        Some(Self {
            raw: raw.to_owned(),
            segments,
        })
    }

    /// Returns the template text.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Iterates placeholder names in template order.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Substitutes every placeholder with the matching context key.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::UnresolvedPlaceholder`] for the first placeholder
    /// the context does not bind.
    pub fn bind(&self, stream: &StreamName, context: &Context) -> Result<String, ExtractError> {
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    let value = context.key(name).ok_or_else(|| ExtractError::UnresolvedPlaceholder {
                        stream: stream.clone(),
                        placeholder: name.clone(),
                    })?;
                    out.push_str(&Context::render(value));
                }
            }
        }
        Ok(out)
    }
}

impl std::fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

// ---------------------------------------------------------------------------
// Replication and pagination policy
// ---------------------------------------------------------------------------

/// The field whose maximum value is bookmarked, and how it is ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationKey {
    /// Record field holding the value.
    pub field: FieldName,
    /// Ordering used to compare values.
    pub kind: ReplicationKind,
}

/// How pages of a stream are requested and when to stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationPolicy {
    /// Records requested per page.
    pub page_size: PageSize,
    /// Name of the page-size query parameter.
    pub page_size_param: String,
    /// Provider-imposed maximum number of results across all pages.
    pub max_results: Option<u64>,
}

impl Default for PaginationPolicy {
    fn default() -> Self {
        Self {
            page_size: PageSize::default(),
            page_size_param: DEFAULT_PAGE_SIZE_PARAM.to_owned(),
            max_results: None,
        }
    }
}

// ---------------------------------------------------------------------------
// StreamDefinition
// ---------------------------------------------------------------------------

/// Static descriptor of one resource type.
#[derive(Debug, Clone)]
pub struct StreamDefinition {
    /// Unique stream name.
    pub name: StreamName,
    /// Request path, with placeholders bound from the inbound context.
    pub path: PathTemplate,
    /// Fields that identify a row.
    pub primary_keys: Vec<String>,
    /// Field bookmarked for incremental sync.
    pub replication_key: Option<ReplicationKey>,
    /// Context keys that select the bookmark bucket. `None` means "global"
    /// for roots and "every identifying context key" for children.
    pub partition_keys: Option<Vec<String>>,
    /// Stream whose records drive this one.
    pub parent: Option<StreamName>,
    /// When `true`, this stream never gates its fetch on the parent's
    /// since-bound.
    pub ignore_parent_replication_key: bool,
    /// HTTP statuses that mean "no data" for this stream.
    pub tolerated_http_errors: BTreeSet<u16>,
    /// Headers merged over the transport defaults for this stream only.
    pub headers: BTreeMap<String, String>,
    /// Static query parameters sent with every request.
    pub params: BTreeMap<String, String>,
    /// Name of the replication lower-bound query parameter.
    pub since_param: String,
    /// Page size and result cap.
    pub pagination: PaginationPolicy,
    /// Key holding the record array when the response body is an object
    /// (e.g. `"items"` for search endpoints).
    pub records_path: Option<String>,
    /// How this stream's records build their children's context.
    pub child_context: ChildContextSpec,
    /// Hints that, when zero in the inbound context, mean there is nothing
    /// to fetch.
    pub skip_hints: Vec<String>,
    /// Optional record reshaping hook.
    pub post_process: Option<PostProcessFn>,
}

impl StreamDefinition {
    /// Creates a root stream with default policies.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Configuration`] if the name is empty or the
    /// path template is malformed.
    pub fn new(name: &str, path: &str) -> Result<Self, ExtractError> {
        let name = StreamName::new(name).ok_or_else(|| ExtractError::Configuration {
            message: "stream name must not be empty".into(),
        })?;
        let template = PathTemplate::parse(path).ok_or_else(|| ExtractError::Configuration {
            message: format!("stream '{name}': malformed path template '{path}'"),
        })?;
        Ok(Self {
            name,
            path: template,
            primary_keys: Vec::new(),
            replication_key: None,
            partition_keys: None,
            parent: None,
            ignore_parent_replication_key: false,
            tolerated_http_errors: BTreeSet::new(),
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            since_param: DEFAULT_SINCE_PARAM.to_owned(),
            pagination: PaginationPolicy::default(),
            records_path: None,
            child_context: ChildContextSpec::default(),
            skip_hints: Vec::new(),
            post_process: None,
        })
    }

    /// Sets the primary-key fields.
    #[must_use]
    pub fn with_primary_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the replication key.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Configuration`] if `field` is empty.
    pub fn with_replication_key(mut self, field: &str, kind: ReplicationKind) -> Result<Self, ExtractError> {
        let field = FieldName::new(field).ok_or_else(|| ExtractError::Configuration {
            message: format!("stream '{}': replication key must not be empty", self.name),
        })?;
        self.replication_key = Some(ReplicationKey { field, kind });
        Ok(self)
    }

    /// Sets the partition keys.
    #[must_use]
    pub fn with_partition_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partition_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Declares the parent stream.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Configuration`] if `parent` is empty.
    pub fn with_parent(mut self, parent: &str, ignore_parent_replication_key: bool) -> Result<Self, ExtractError> {
        let parent = StreamName::new(parent).ok_or_else(|| ExtractError::Configuration {
            message: format!("stream '{}': parent name must not be empty", self.name),
        })?;
        self.parent = Some(parent);
        self.ignore_parent_replication_key = ignore_parent_replication_key;
        Ok(self)
    }

    /// Adds HTTP statuses treated as an empty result.
    #[must_use]
    pub fn with_tolerated_http_errors(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.tolerated_http_errors.extend(statuses);
        self
    }

    /// Adds a request header for this stream.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds a static query parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Replaces the pagination policy.
    #[must_use]
    pub fn with_pagination(mut self, pagination: PaginationPolicy) -> Self {
        self.pagination = pagination;
        self
    }

    /// Sets the key holding the record array in object responses.
    #[must_use]
    pub fn with_records_path(mut self, path: impl Into<String>) -> Self {
        self.records_path = Some(path.into());
        self
    }

    /// Sets how child contexts are built.
    #[must_use]
    pub fn with_child_context(mut self, spec: ChildContextSpec) -> Self {
        self.child_context = spec;
        self
    }

    /// Adds a skip hint.
    #[must_use]
    pub fn with_skip_hint(mut self, hint: impl Into<String>) -> Self {
        self.skip_hints.push(hint.into());
        self
    }

    /// Sets the post-process hook.
    #[must_use]
    pub fn with_post_process(mut self, hook: PostProcessFn) -> Self {
        self.post_process = Some(hook);
        self
    }

    /// Returns `true` if the stream has no parent.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Returns the first skip hint that is zero in `context`, if any.
    pub fn skip_reason<'a>(&'a self, context: &Context) -> Option<&'a str> {
        self.skip_hints
            .iter()
            .find(|hint| context.hint(hint).and_then(serde_json::Value::as_u64) == Some(0))
            .map(String::as_str)
    }

    /// Applies the post-process hook, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Decode`] if the hook rejects the payload.
    pub fn post_process(&self, payload: Payload, context: &Context) -> Result<Payload, ExtractError> {
        match self.post_process {
            Some(hook) => hook(payload, context).map_err(|message| ExtractError::Decode {
                stream: self.name.clone(),
                message,
            }),
            None => Ok(payload),
        }
    }
}
