//! Parent-to-child context and its propagation.
//!
//! A [`Context`] is built from one parent record and consumed by one child
//! invocation. It carries *identifying keys* (bound into path placeholders and
//! partition keys, and merged into the child's rows) and *hints* (cheap facts
//! about the parent, such as a comment count, that let a child skip its fetch).
//!
//! Contexts are values: every `with_*` method returns a new context and nothing
//! in the engine mutates one after it has been handed to a child.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::{lookup, Payload};
use crate::stream::StreamDefinition;
use crate::{ExtractError, ReplicationValue};

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Identifying keys and hints handed from a parent record to a child stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    keys: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    hints: BTreeMap<String, Value>,
    /// The since-bound the parent fetch ran with, used by children that do
    /// not ignore their parent's replication key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_since: Option<ReplicationValue>,
}

impl Context {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context from identifying key/value pairs.
    pub fn from_keys<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            keys: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            ..Self::default()
        }
    }

    /// Returns a copy of this context with `key` set to `value`.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keys.insert(key.into(), value.into());
        self
    }

    /// Returns a copy of this context with hint `name` set to `value`.
    #[must_use]
    pub fn with_hint(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.hints.insert(name.into(), value.into());
        self
    }

    /// Returns a copy of this context carrying the parent's since-bound.
    #[must_use]
    pub fn with_parent_since(mut self, since: Option<ReplicationValue>) -> Self {
        self.parent_since = since;
        self
    }

    /// Returns the value of an identifying key.
    pub fn key(&self, name: &str) -> Option<&Value> {
        self.keys.get(name)
    }

    /// Returns the value of a hint.
    pub fn hint(&self, name: &str) -> Option<&Value> {
        self.hints.get(name)
    }

    /// Iterates identifying keys in key order.
    pub fn keys(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.keys.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the since-bound the parent fetch ran with, if any.
    pub fn parent_since(&self) -> Option<&ReplicationValue> {
        self.parent_since.as_ref()
    }

    /// Returns `true` when the context carries neither keys nor hints.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.hints.is_empty()
    }

    /// Renders a context value for use in a path or a partition key.
    ///
    /// Strings are used verbatim (no quotes); every other value uses its JSON
    /// representation.
    pub fn render(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl std::fmt::Display for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (k, v) in &self.keys {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            write!(f, "{k}={}", Self::render(v))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Propagation rules
// ---------------------------------------------------------------------------

/// Where a child context starts from before stream-specific fields are added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextBase {
    /// Pass a non-empty inbound context through unchanged; otherwise derive
    /// keys from the parent record's primary-key fields.
    #[default]
    Inherit,
    /// Like `Inherit`, but an absent or empty inbound context is a contract
    /// violation.
    RequireInbound,
    /// Start from an empty context; only the declared fields are propagated.
    Fresh,
}

/// One context entry sourced from a field of the parent record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextField {
    /// Name of the entry in the child context.
    pub name: String,
    /// Path of the source field inside the parent record.
    pub path: Vec<String>,
}

impl ContextField {
    /// Creates a field sourced from a dotted path (e.g. `"owner.login"`).
    pub fn new(name: impl Into<String>, dotted_path: &str) -> Self {
        Self {
            name: name.into(),
            path: dotted_path.split('.').map(str::to_owned).collect(),
        }
    }

    /// Creates a field whose name matches its top-level source field.
    pub fn same(name: &str) -> Self {
        Self::new(name, name)
    }

    fn dotted(&self) -> String {
        self.path.join(".")
    }
}

/// How a stream builds the context it hands to its children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildContextSpec {
    /// Starting point of the child context.
    pub base: ContextBase,
    /// Identifying keys added from the parent record. Missing fields are fatal.
    pub keys: Vec<ContextField>,
    /// Hints added from the parent record. Missing fields are skipped.
    pub hints: Vec<ContextField>,
}

impl ChildContextSpec {
    /// Returns the names of the identifying keys this spec adds.
    pub fn key_names(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|f| f.name.as_str())
    }
}

/// Computes the context `parent`'s record hands to its children.
///
/// `record` is the parent's finalized row; `inbound` is the context the parent
/// invocation itself received. Declared keys and hints are unioned into the
/// base; nothing is removed from it.
///
/// # Errors
///
/// - [`ExtractError::MissingContext`] when the spec requires an inbound context
///   and none was supplied.
/// - [`ExtractError::MissingContextField`] when a declared key (or, for the
///   default base, a primary-key field) is absent from the record.
pub fn propagate(
    parent: &StreamDefinition,
    record: &Payload,
    inbound: Option<&Context>,
) -> Result<Context, ExtractError> {
    let spec = &parent.child_context;
    let inbound = inbound.filter(|ctx| !ctx.is_empty());

    let mut child = match (spec.base, inbound) {
        (ContextBase::Fresh, _) => Context::new(),
        (ContextBase::Inherit | ContextBase::RequireInbound, Some(ctx)) => ctx.clone(),
        (ContextBase::RequireInbound, None) => {
            return Err(ExtractError::MissingContext {
                stream: parent.name.clone(),
            })
        }
        (ContextBase::Inherit, None) => {
            let mut derived = Context::new();
            for key in &parent.primary_keys {
                let value = record.get(key).ok_or_else(|| ExtractError::MissingContextField {
                    stream: parent.name.clone(),
                    path: key.clone(),
                })?;
                derived = derived.with_key(key.clone(), value.clone());
            }
            derived
        }
    };

    for field in &spec.keys {
        let value = lookup(record, &field.path).ok_or_else(|| ExtractError::MissingContextField {
            stream: parent.name.clone(),
            path: field.dotted(),
        })?;
        child = child.with_key(field.name.clone(), value.clone());
    }

    for field in &spec.hints {
        if let Some(value) = lookup(record, &field.path) {
            child = child.with_hint(field.name.clone(), value.clone());
        }
    }

    Ok(child)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::stream::StreamDefinition;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn repositories() -> StreamDefinition {
        StreamDefinition::new("repositories", "/search/repositories")
            .unwrap()
            .with_primary_keys(["id"])
            .with_child_context(ChildContextSpec {
                base: ContextBase::Fresh,
                keys: vec![ContextField::new("org", "owner.login"), ContextField::new("repo", "name")],
                hints: vec![],
            })
    }

    #[test]
    fn fresh_base_builds_org_and_repo_from_nested_fields() {
        let record = payload(json!({"id": 1, "owner": {"login": "acme"}, "name": "widget"}));
        let ctx = propagate(&repositories(), &record, None).unwrap();
        assert_eq!(ctx, Context::from_keys([("org", "acme"), ("repo", "widget")]));
    }

    #[test]
    fn inherit_passes_non_empty_inbound_through() {
        let def = StreamDefinition::new("pull_requests", "/repos/{org}/{repo}/pulls")
            .unwrap()
            .with_primary_keys(["id"])
            .with_child_context(ChildContextSpec {
                base: ContextBase::Inherit,
                keys: vec![ContextField::new("pull_number", "number")],
                hints: vec![],
            });
        let inbound = Context::from_keys([("org", "acme"), ("repo", "widget")]);
        let record = payload(json!({"id": 99, "number": 7}));

        let ctx = propagate(&def, &record, Some(&inbound)).unwrap();

        assert_eq!(ctx.key("org"), Some(&json!("acme")));
        assert_eq!(ctx.key("pull_number"), Some(&json!(7)));
        assert_eq!(ctx.key("id"), None);
    }

    #[test]
    fn inherit_without_inbound_derives_from_primary_keys() {
        let def = StreamDefinition::new("things", "/things").unwrap().with_primary_keys(["id"]);
        let record = payload(json!({"id": 5, "name": "x"}));
        let ctx = propagate(&def, &record, None).unwrap();
        assert_eq!(ctx, Context::from_keys([("id", 5)]));
    }

    #[test]
    fn require_inbound_rejects_missing_context() {
        let def = StreamDefinition::new("issues", "/repos/{org}/{repo}/issues")
            .unwrap()
            .with_child_context(ChildContextSpec {
                base: ContextBase::RequireInbound,
                ..ChildContextSpec::default()
            });
        let err = propagate(&def, &payload(json!({"number": 1})), None).unwrap_err();
        assert!(matches!(err, ExtractError::MissingContext { .. }));
        assert!(err.is_contract_violation());
    }

    #[test]
    fn hints_are_optional_and_kept_apart_from_keys() {
        let def = StreamDefinition::new("issues", "/repos/{org}/{repo}/issues")
            .unwrap()
            .with_child_context(ChildContextSpec {
                base: ContextBase::RequireInbound,
                keys: vec![ContextField::new("issue_number", "number")],
                hints: vec![ContextField::same("comments"), ContextField::same("events")],
            });
        let inbound = Context::from_keys([("org", "acme"), ("repo", "widget")]);
        let ctx = propagate(&def, &payload(json!({"number": 3, "comments": 0})), Some(&inbound)).unwrap();

        assert_eq!(ctx.hint("comments"), Some(&json!(0)));
        assert_eq!(ctx.hint("events"), None);
        assert_eq!(ctx.key("comments"), None);
        assert_eq!(ctx.key("issue_number"), Some(&json!(3)));
    }

    #[test]
    fn missing_declared_key_is_fatal() {
        let record = payload(json!({"id": 1, "name": "widget"}));
        let err = propagate(&repositories(), &record, None).unwrap_err();
        match err {
            ExtractError::MissingContextField { path, .. } => assert_eq!(path, "owner.login"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn display_lists_keys_in_order() {
        let ctx = Context::from_keys([("repo", json!("widget")), ("org", json!("acme")), ("n", json!(4))]);
        assert_eq!(ctx.to_string(), "n=4,org=acme,repo=widget");
    }
}
