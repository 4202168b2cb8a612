//! Typed record schemas and the conforming sink.
//!
//! One struct per stream, with nested objects as named sub-structs. Decoding a
//! record into its struct checks field types; re-encoding it drops every field
//! the schema does not declare. Every field is optional: GitHub omits or nulls
//! fields freely, and a present field of the wrong type is what gets rejected.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tap::{Payload, Record, RecordSink, SinkError};

use crate::streams;

type Timestamp = DateTime<Utc>;

// ---------------------------------------------------------------------------
// Shared sub-objects
// ---------------------------------------------------------------------------

/// A GitHub account as embedded in other resources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub login: Option<String>,
    pub id: Option<i64>,
    pub node_id: Option<String>,
    pub avatar_url: Option<String>,
    pub gravatar_id: Option<String>,
    pub html_url: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub site_admin: Option<bool>,
}

/// Name/URL pair used by community profile files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Link {
    pub url: Option<String>,
    pub html_url: Option<String>,
}

// ---------------------------------------------------------------------------
// repositories
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryOwner {
    pub login: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct License {
    pub key: Option<String>,
    pub name: Option<String>,
    pub url: Option<String>,
    pub spdx_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Repository {
    pub id: Option<i64>,
    pub repo: Option<String>,
    pub org: Option<String>,
    pub name: Option<String>,
    pub full_name: Option<String>,
    pub description: Option<String>,
    pub owner: Option<RepositoryOwner>,
    pub license: Option<License>,
    pub master_branch: Option<String>,
    pub default_branch: Option<String>,
    pub updated_at: Option<Timestamp>,
    pub created_at: Option<Timestamp>,
    pub pushed_at: Option<Timestamp>,
    pub private: Option<bool>,
    pub size: Option<i64>,
    pub stargazers_count: Option<i64>,
    pub fork: Option<bool>,
    pub forks: Option<i64>,
    pub forks_count: Option<i64>,
    pub watchers: Option<i64>,
    pub watchers_count: Option<i64>,
    pub open_issues: Option<i64>,
    pub open_issues_count: Option<i64>,
}

// ---------------------------------------------------------------------------
// issues, issue_comments, issue_events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Issue {
    pub id: Option<i64>,
    pub repo: Option<String>,
    pub org: Option<String>,
    pub number: Option<i64>,
    pub issue_number: Option<i64>,
    pub updated_at: Option<Timestamp>,
    pub created_at: Option<Timestamp>,
    pub closed_at: Option<Timestamp>,
    pub state: Option<String>,
    pub title: Option<String>,
    pub comments: Option<i64>,
    pub author_association: Option<String>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueComment {
    pub id: Option<i64>,
    pub repo: Option<String>,
    pub org: Option<String>,
    pub issue_number: Option<i64>,
    pub updated_at: Option<Timestamp>,
    pub created_at: Option<Timestamp>,
    pub author_association: Option<String>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueEvent {
    pub id: Option<i64>,
    pub node_id: Option<String>,
    pub repo: Option<String>,
    pub org: Option<String>,
    pub issue_number: Option<i64>,
    pub issue_url: Option<String>,
    pub event: Option<String>,
    pub commit_id: Option<String>,
    pub commit_url: Option<String>,
    pub created_at: Option<Timestamp>,
    pub actor: Option<User>,
}

// ---------------------------------------------------------------------------
// pull_requests, pull_request_files
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Label {
    pub id: Option<i64>,
    pub node_id: Option<String>,
    pub url: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub default: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Reactions {
    pub url: Option<String>,
    pub total_count: Option<i64>,
    #[serde(rename = "+1")]
    pub plus_one: Option<i64>,
    #[serde(rename = "-1")]
    pub minus_one: Option<i64>,
    pub laugh: Option<i64>,
    pub hooray: Option<i64>,
    pub confused: Option<i64>,
    pub heart: Option<i64>,
    pub rocket: Option<i64>,
    pub eyes: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Milestone {
    pub html_url: Option<String>,
    pub node_id: Option<String>,
    pub id: Option<i64>,
    pub number: Option<i64>,
    pub state: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub creator: Option<User>,
    pub open_issues: Option<i64>,
    pub closed_issues: Option<i64>,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
    pub closed_at: Option<Timestamp>,
    pub due_on: Option<Timestamp>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullRequestUrls {
    pub html_url: Option<String>,
    pub url: Option<String>,
    pub diff_url: Option<String>,
    pub patch_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchRepository {
    pub id: Option<i64>,
    pub node_id: Option<String>,
    pub name: Option<String>,
    pub full_name: Option<String>,
    pub html_url: Option<String>,
}

/// Head or base of a pull request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Branch {
    pub label: Option<String>,
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
    pub sha: Option<String>,
    pub user: Option<User>,
    pub repo: Option<BranchRepository>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullRequest {
    pub repo: Option<String>,
    pub org: Option<String>,
    pub id: Option<i64>,
    pub node_id: Option<String>,
    pub url: Option<String>,
    pub html_url: Option<String>,
    pub diff_url: Option<String>,
    pub patch_url: Option<String>,
    pub number: Option<i64>,
    pub updated_at: Option<Timestamp>,
    pub created_at: Option<Timestamp>,
    pub closed_at: Option<Timestamp>,
    pub merged_at: Option<Timestamp>,
    pub state: Option<String>,
    pub title: Option<String>,
    pub locked: Option<bool>,
    pub comments: Option<i64>,
    pub author_association: Option<String>,
    pub body: Option<String>,
    pub merge_commit_sha: Option<String>,
    pub draft: Option<bool>,
    pub commits_url: Option<String>,
    pub review_comments_url: Option<String>,
    pub review_comment_url: Option<String>,
    pub comments_url: Option<String>,
    pub statuses_url: Option<String>,
    pub user: Option<User>,
    pub labels: Option<Vec<Label>>,
    pub reactions: Option<Reactions>,
    pub assignee: Option<User>,
    pub assignees: Option<Vec<User>>,
    pub requested_reviewers: Option<Vec<User>>,
    pub milestone: Option<Milestone>,
    pub pull_request: Option<PullRequestUrls>,
    pub head: Option<Branch>,
    pub base: Option<Branch>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullRequestFile {
    pub repo: Option<String>,
    pub org: Option<String>,
    pub filename: Option<String>,
    pub pull_number: Option<i64>,
    pub sha: Option<String>,
    pub status: Option<String>,
    pub additions: Option<i64>,
    pub deletions: Option<i64>,
    pub changes: Option<i64>,
    pub blob_url: Option<String>,
    pub raw_url: Option<String>,
    pub contents_url: Option<String>,
    pub patch: Option<String>,
}

// ---------------------------------------------------------------------------
// commits
// ---------------------------------------------------------------------------

/// Git identity and date of an author or committer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Signature {
    pub name: Option<String>,
    pub email: Option<String>,
    pub date: Option<Timestamp>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tree {
    pub url: Option<String>,
    pub sha: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Verification {
    pub verified: Option<bool>,
    pub reason: Option<String>,
    pub signature: Option<String>,
    pub payload: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitDetail {
    pub author: Option<Signature>,
    pub committer: Option<Signature>,
    pub message: Option<String>,
    pub tree: Option<Tree>,
    pub verification: Option<Verification>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Commit {
    pub repo: Option<String>,
    pub org: Option<String>,
    pub node_id: Option<String>,
    pub url: Option<String>,
    pub sha: Option<String>,
    pub html_url: Option<String>,
    pub commit_timestamp: Option<Timestamp>,
    pub commit: Option<CommitDetail>,
    pub author: Option<User>,
    pub committer: Option<User>,
}

// ---------------------------------------------------------------------------
// stargazers, readme, community_profile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stargazer {
    pub repo: Option<String>,
    pub org: Option<String>,
    pub user_id: Option<i64>,
    pub starred_at: Option<Timestamp>,
    pub user: Option<User>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadmeLinks {
    pub git: Option<String>,
    #[serde(rename = "self")]
    pub self_url: Option<String>,
    pub html: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Readme {
    pub repo: Option<String>,
    pub org: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub encoding: Option<String>,
    pub size: Option<i64>,
    pub name: Option<String>,
    pub path: Option<String>,
    pub content: Option<String>,
    pub sha: Option<String>,
    pub url: Option<String>,
    pub git_url: Option<String>,
    pub html_url: Option<String>,
    pub download_url: Option<String>,
    #[serde(rename = "_links")]
    pub links: Option<ReadmeLinks>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeOfConduct {
    pub key: Option<String>,
    pub name: Option<String>,
    pub html_url: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileLicense {
    pub key: Option<String>,
    pub name: Option<String>,
    pub spdx_id: Option<String>,
    pub node_id: Option<String>,
    pub html_url: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunityFiles {
    pub code_of_conduct: Option<CodeOfConduct>,
    pub code_of_conduct_file: Option<Link>,
    pub contributing: Option<Link>,
    pub issue_template: Option<Link>,
    pub pull_request_template: Option<Link>,
    pub license: Option<ProfileLicense>,
    pub readme: Option<Link>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunityProfile {
    pub repo: Option<String>,
    pub org: Option<String>,
    pub health_percentage: Option<i64>,
    pub description: Option<String>,
    pub documentation: Option<String>,
    pub updated_at: Option<Timestamp>,
    pub content_reports_enabled: Option<bool>,
    pub files: Option<CommunityFiles>,
}

// ---------------------------------------------------------------------------
// Conforming
// ---------------------------------------------------------------------------

fn through<T: DeserializeOwned + Serialize>(fields: Payload) -> Result<Value, serde_json::Error> {
    let typed: T = serde_json::from_value(Value::Object(fields))?;
    serde_json::to_value(typed)
}

/// Decodes `fields` into the schema of `stream` and re-encodes it.
///
/// Returns `Ok(None)` for streams without a schema.
///
/// # Errors
///
/// Returns the decoder error when a declared field has the wrong type.
pub fn conform(stream: &str, fields: Payload) -> Result<Option<Payload>, serde_json::Error> {
    let value = match stream {
        streams::REPOSITORIES => through::<Repository>(fields)?,
        streams::ISSUES => through::<Issue>(fields)?,
        streams::ISSUE_COMMENTS => through::<IssueComment>(fields)?,
        streams::ISSUE_EVENTS => through::<IssueEvent>(fields)?,
        streams::PULL_REQUESTS => through::<PullRequest>(fields)?,
        streams::PULL_REQUEST_FILES => through::<PullRequestFile>(fields)?,
        streams::COMMITS => through::<Commit>(fields)?,
        streams::STARGAZERS => through::<Stargazer>(fields)?,
        streams::README => through::<Readme>(fields)?,
        streams::COMMUNITY_PROFILE => through::<CommunityProfile>(fields)?,
        _ => return Ok(None),
    };
    match value {
        Value::Object(map) => Ok(Some(map)),
        _ => Ok(None),
    }
}

/// Sink decorator that conforms every record to its schema before handing it
/// to the inner sink.
pub struct ConformingSink<S> {
    inner: S,
}

impl<S: RecordSink> ConformingSink<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: RecordSink> RecordSink for ConformingSink<S> {
    async fn emit(&self, record: &Record) -> Result<(), SinkError> {
        let stream = record.stream().clone();
        let conformed = conform(stream.as_str(), record.fields().clone()).map_err(|e| SinkError::Schema {
            stream: stream.clone(),
            message: e.to_string(),
        })?;
        let Some(fields) = conformed else {
            return Err(SinkError::Schema {
                stream,
                message: "no schema is declared for this stream".into(),
            });
        };
        self.inner.emit(&Record::finalize(stream, fields, None)).await
    }
}
