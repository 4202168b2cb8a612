//! The GitHub stream catalog.
//!
//! Every resource is a [`StreamDefinition`] value; the shape of the graph is
//!
//! ```text
//! repositories (search)
//! ├── issues ─────────────── issue_comments
//! ├── issue_events
//! ├── pull_requests ──────── pull_request_files
//! ├── commits
//! ├── stargazers
//! ├── readme
//! └── community_profile
//! ```
//!
//! The search root hands `{org, repo}` to its children. `issues` adds
//! `issue_number` plus a `comments` hint, `pull_requests` adds `pull_number`.

use tap::{
    ChildContextSpec, ContextBase, ContextField, ExtractError, PageSize, PaginationPolicy, ReplicationKind,
    StreamDefinition, StreamGraph,
};

use crate::hooks;

/// Search root; one record per repository matching the query.
pub const REPOSITORIES: &str = "repositories";
/// Issues of a repository, replicated on `updated_at`.
pub const ISSUES: &str = "issues";
/// Comments of one issue; skipped when the issue has none.
pub const ISSUE_COMMENTS: &str = "issue_comments";
/// Issue events of a repository, replicated on `created_at`.
pub const ISSUE_EVENTS: &str = "issue_events";
/// Pull requests of a repository.
pub const PULL_REQUESTS: &str = "pull_requests";
/// Files changed by one pull request.
pub const PULL_REQUEST_FILES: &str = "pull_request_files";
/// Commits of a repository.
pub const COMMITS: &str = "commits";
/// Stargazers of a repository, with starring timestamps.
pub const STARGAZERS: &str = "stargazers";
/// The repository README.
pub const README: &str = "readme";
/// Community health metrics of a repository.
pub const COMMUNITY_PROFILE: &str = "community_profile";

/// Upper bound GitHub enforces on search results, regardless of paging.
pub const SEARCH_RESULT_LIMIT: u64 = 1000;

const REACTIONS_PREVIEW: &str = "application/vnd.github.squirrel-girl-preview";
const STAR_TIMESTAMPS: &str = "application/vnd.github.v3.star+json";

/// Run-level inputs of the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogConfig {
    /// Repository search query (the `q` parameter), e.g. `org:acme`.
    pub search_query: String,
    /// Page size of every stream.
    pub page_size: PageSize,
    /// Cap on repository search results; clamped to [`SEARCH_RESULT_LIMIT`].
    pub max_results: Option<u64>,
}

impl CatalogConfig {
    /// Catalog for `search_query` with the default page size and no result
    /// cap.
    pub fn new(search_query: impl Into<String>) -> Self {
        Self {
            search_query: search_query.into(),
            page_size: PageSize::default(),
            max_results: None,
        }
    }

    fn pagination(&self) -> PaginationPolicy {
        PaginationPolicy {
            page_size: self.page_size,
            ..PaginationPolicy::default()
        }
    }
}

/// Builds and validates the stream graph.
///
/// # Errors
///
/// Returns [`ExtractError::Configuration`] or [`ExtractError::InvalidGraph`]
/// if a definition is inconsistent.
pub fn catalog(config: &CatalogConfig) -> Result<StreamGraph, ExtractError> {
    StreamGraph::new(definitions(config)?)
}

/// Builds the stream definitions in traversal order.
///
/// # Errors
///
/// Returns [`ExtractError::Configuration`] if a definition is malformed.
pub fn definitions(config: &CatalogConfig) -> Result<Vec<StreamDefinition>, ExtractError> {
    let pagination = config.pagination();
    let repo_partition = ["repo", "org"];

    let cap = config
        .max_results
        .map_or(SEARCH_RESULT_LIMIT, |m| m.min(SEARCH_RESULT_LIMIT));
    let repositories = StreamDefinition::new(REPOSITORIES, "/search/repositories")?
        .with_primary_keys(["id"])
        .with_param("q", config.search_query.clone())
        .with_records_path("items")
        .with_pagination(PaginationPolicy {
            max_results: Some(cap),
            ..pagination.clone()
        })
        .with_child_context(ChildContextSpec {
            base: ContextBase::Fresh,
            keys: vec![ContextField::new("org", "owner.login"), ContextField::new("repo", "name")],
            hints: vec![],
        });

    let issues = StreamDefinition::new(ISSUES, "/repos/{org}/{repo}/issues")?
        .with_primary_keys(["id"])
        .with_replication_key("updated_at", ReplicationKind::DateTime)?
        .with_parent(REPOSITORIES, true)?
        .with_header("Accept", REACTIONS_PREVIEW)
        .with_pagination(pagination.clone())
        .with_child_context(ChildContextSpec {
            base: ContextBase::RequireInbound,
            keys: vec![ContextField::new("issue_number", "number")],
            hints: vec![ContextField::same("comments")],
        });

    let issue_comments = StreamDefinition::new(ISSUE_COMMENTS, "/repos/{org}/{repo}/issues/{issue_number}/comments")?
        .with_primary_keys(["id"])
        .with_replication_key("updated_at", ReplicationKind::DateTime)?
        .with_parent(ISSUES, false)?
        .with_partition_keys(repo_partition)
        .with_pagination(pagination.clone())
        .with_skip_hint("comments");

    let issue_events = StreamDefinition::new(ISSUE_EVENTS, "/repos/{org}/{repo}/issues/events")?
        .with_primary_keys(["id"])
        .with_replication_key("created_at", ReplicationKind::DateTime)?
        .with_parent(REPOSITORIES, false)?
        .with_partition_keys(repo_partition)
        .with_pagination(pagination.clone())
        .with_post_process(hooks::issue_event_fields);

    let pull_requests = StreamDefinition::new(PULL_REQUESTS, "/repos/{org}/{repo}/pulls")?
        .with_primary_keys(["id"])
        .with_replication_key("updated_at", ReplicationKind::DateTime)?
        .with_parent(REPOSITORIES, false)?
        .with_partition_keys(repo_partition)
        .with_param("state", "all")
        .with_header("Accept", REACTIONS_PREVIEW)
        .with_pagination(pagination.clone())
        .with_child_context(ChildContextSpec {
            base: ContextBase::RequireInbound,
            keys: vec![ContextField::new("pull_number", "number")],
            hints: vec![],
        });

    let pull_request_files = StreamDefinition::new(PULL_REQUEST_FILES, "/repos/{org}/{repo}/pulls/{pull_number}/files")?
        .with_primary_keys(["filename"])
        .with_parent(PULL_REQUESTS, false)?
        .with_partition_keys(["repo", "org", "pull_number"])
        .with_pagination(pagination.clone());

    let commits = StreamDefinition::new(COMMITS, "/repos/{org}/{repo}/commits")?
        .with_primary_keys(["node_id"])
        .with_replication_key("commit_timestamp", ReplicationKind::DateTime)?
        .with_parent(REPOSITORIES, true)?
        .with_partition_keys(repo_partition)
        .with_pagination(pagination.clone())
        .with_post_process(hooks::commit_timestamp);

    let stargazers = StreamDefinition::new(STARGAZERS, "/repos/{org}/{repo}/stargazers")?
        .with_primary_keys(["repo", "org", "user_id"])
        .with_replication_key("starred_at", ReplicationKind::DateTime)?
        .with_parent(REPOSITORIES, false)?
        .with_partition_keys(repo_partition)
        .with_header("Accept", STAR_TIMESTAMPS)
        .with_pagination(pagination.clone())
        .with_post_process(hooks::stargazer_user_id);

    let readme = StreamDefinition::new(README, "/repos/{org}/{repo}/readme")?
        .with_primary_keys(["repo", "org"])
        .with_parent(REPOSITORIES, false)?
        .with_partition_keys(repo_partition)
        .with_pagination(pagination.clone());

    let community_profile = StreamDefinition::new(COMMUNITY_PROFILE, "/repos/{org}/{repo}/community/profile")?
        .with_primary_keys(["repo", "org"])
        .with_parent(REPOSITORIES, false)?
        .with_partition_keys(repo_partition)
        .with_tolerated_http_errors([404])
        .with_pagination(pagination);

    Ok(vec![
        repositories,
        issues,
        issue_comments,
        issue_events,
        pull_requests,
        pull_request_files,
        commits,
        stargazers,
        readme,
        community_profile,
    ])
}

#[cfg(test)]
mod tests {
    use tap::{Context, StreamName};

    use super::*;

    fn graph() -> StreamGraph {
        catalog(&CatalogConfig::new("org:acme")).unwrap()
    }

    #[test]
    fn catalog_passes_graph_validation() {
        let graph = graph();
        assert_eq!(graph.streams().count(), 10);
        assert_eq!(
            graph.roots().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            [REPOSITORIES]
        );
    }

    #[test]
    fn every_child_gets_org_and_repo() {
        let graph = graph();
        for def in graph.streams().filter(|d| !d.is_root()) {
            let keys = graph.inbound_keys(def);
            assert!(keys.contains("org") && keys.contains("repo"), "{}", def.name);
        }
        let files = graph.inbound_keys(graph.require(PULL_REQUEST_FILES).unwrap());
        assert!(files.contains("pull_number"));
    }

    #[test]
    fn search_cap_is_clamped_to_the_provider_limit() {
        let mut config = CatalogConfig::new("org:acme");
        config.max_results = Some(5000);
        let defs = definitions(&config).unwrap();
        assert_eq!(defs[0].pagination.max_results, Some(SEARCH_RESULT_LIMIT));

        config.max_results = Some(50);
        let defs = definitions(&config).unwrap();
        assert_eq!(defs[0].pagination.max_results, Some(50));
        assert_eq!(defs[0].params.get("q").map(String::as_str), Some("org:acme"));
    }

    #[test]
    fn stream_specific_headers_and_tolerances() {
        let graph = graph();
        assert_eq!(
            graph.require(STARGAZERS).unwrap().headers.get("Accept").map(String::as_str),
            Some(STAR_TIMESTAMPS)
        );
        assert!(graph.require(COMMUNITY_PROFILE).unwrap().tolerated_http_errors.contains(&404));
        assert!(graph.require(ISSUES).unwrap().tolerated_http_errors.is_empty());
    }

    #[test]
    fn comment_fetch_is_skipped_when_issue_has_no_comments() {
        let graph = graph();
        let comments = graph.require(ISSUE_COMMENTS).unwrap();
        let ctx = Context::from_keys([("org", "acme"), ("repo", "widget")]).with_hint("comments", 0);
        assert_eq!(comments.skip_reason(&ctx), Some("comments"));
        assert_eq!(comments.parent, StreamName::new(ISSUES));
    }

    #[test]
    fn issue_events_are_fetched_for_every_repository() {
        let graph = graph();
        let events = graph.require(ISSUE_EVENTS).unwrap();
        assert!(events.skip_hints.is_empty());
        let ctx = Context::from_keys([("org", "acme"), ("repo", "widget")]).with_hint("events", 0);
        assert_eq!(events.skip_reason(&ctx), None);
    }
}
