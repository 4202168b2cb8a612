//! The stream dependency graph.
//!
//! [`StreamGraph`] owns every [`StreamDefinition`], resolves parent references
//! by name, and checks statically that each child can be driven by what its
//! parent propagates: path placeholders and partition keys must be derivable
//! from the parent's context.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::context::ContextBase;
use crate::stream::StreamDefinition;
use crate::{ExtractError, StreamName};

/// A validated forest of streams.
#[derive(Debug, Clone)]
pub struct StreamGraph {
    streams: Vec<StreamDefinition>,
    index: HashMap<StreamName, usize>,
}

impl StreamGraph {
    /// Builds and validates a graph.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidGraph`] for duplicate names, unknown
    /// parents, cycles, root streams that require an inbound context or
    /// have path placeholders, and children whose placeholders or partition
    /// keys their parent cannot supply.
    pub fn new(streams: Vec<StreamDefinition>) -> Result<Self, ExtractError> {
        let mut index = HashMap::with_capacity(streams.len());
        for (i, def) in streams.iter().enumerate() {
            if index.insert(def.name.clone(), i).is_some() {
                return Err(invalid(format!("duplicate stream '{}'", def.name)));
            }
        }
        let graph = Self { streams, index };

        for def in &graph.streams {
            if let Some(parent) = &def.parent {
                if !graph.index.contains_key(parent) {
                    return Err(invalid(format!("stream '{}' has unknown parent '{parent}'", def.name)));
                }
            }
            graph.check_acyclic(def)?;
        }
        for def in &graph.streams {
            graph.check_derivable(def)?;
        }
        Ok(graph)
    }

    /// Returns a stream by name.
    pub fn get(&self, name: &str) -> Option<&StreamDefinition> {
        self.index.get(name).map(|&i| &self.streams[i])
    }

    /// Returns a stream by name or an [`ExtractError::UnknownStream`].
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::UnknownStream`] if no such stream exists.
    pub fn require(&self, name: &str) -> Result<&StreamDefinition, ExtractError> {
        self.get(name).ok_or_else(|| ExtractError::UnknownStream {
            stream: name.to_owned(),
        })
    }

    /// Iterates all streams in declaration order.
    pub fn streams(&self) -> impl Iterator<Item = &StreamDefinition> {
        self.streams.iter()
    }

    /// Iterates root streams in declaration order.
    pub fn roots(&self) -> impl Iterator<Item = &StreamDefinition> {
        self.streams.iter().filter(|d| d.is_root())
    }

    /// Iterates the direct children of `parent` in declaration order.
    pub fn children<'a>(&'a self, parent: &'a StreamName) -> impl Iterator<Item = &'a StreamDefinition> + 'a {
        self.streams.iter().filter(move |d| d.parent.as_ref() == Some(parent))
    }

    /// Returns the identifying keys the context handed to `stream` will carry.
    ///
    /// Roots receive no context. Children receive what their parent
    /// propagates: its base (inbound keys, primary keys, or nothing) plus the
    /// keys its child-context spec adds.
    pub fn inbound_keys(&self, stream: &StreamDefinition) -> BTreeSet<String> {
        match stream.parent.as_ref().and_then(|p| self.get(p.as_str())) {
            Some(parent) => self.propagated_keys(parent),
            None => BTreeSet::new(),
        }
    }

    fn propagated_keys(&self, parent: &StreamDefinition) -> BTreeSet<String> {
        let inbound = self.inbound_keys(parent);
        let mut keys = match parent.child_context.base {
            ContextBase::Fresh => BTreeSet::new(),
            ContextBase::RequireInbound => inbound,
            ContextBase::Inherit if inbound.is_empty() => parent.primary_keys.iter().cloned().collect(),
            ContextBase::Inherit => inbound,
        };
        keys.extend(parent.child_context.key_names().map(str::to_owned));
        keys
    }

    fn check_acyclic(&self, def: &StreamDefinition) -> Result<(), ExtractError> {
        let mut seen = HashSet::new();
        let mut current = def;
        while let Some(parent) = &current.parent {
            if !seen.insert(parent.clone()) || parent == &def.name {
                return Err(invalid(format!("stream '{}' is part of a parent cycle", def.name)));
            }
            match self.get(parent.as_str()) {
                Some(next) => current = next,
                None => break,
            }
        }
        Ok(())
    }

    fn check_derivable(&self, def: &StreamDefinition) -> Result<(), ExtractError> {
        let available = self.inbound_keys(def);

        if def.is_root() && def.child_context.base == ContextBase::RequireInbound {
            return Err(invalid(format!(
                "root stream '{}' requires an inbound context it can never receive",
                def.name
            )));
        }

        for placeholder in def.path.placeholders() {
            if !available.contains(placeholder) {
                return Err(invalid(format!(
                    "stream '{}': path placeholder '{{{placeholder}}}' is not provided by its parent",
                    def.name
                )));
            }
        }

        if let Some(keys) = &def.partition_keys {
            for key in keys {
                if !available.contains(key) {
                    return Err(invalid(format!(
                        "stream '{}': partition key '{key}' is not provided by its parent",
                        def.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resolves a stream allow-list into a [`Selection`].
    ///
    /// `None` selects every stream.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::UnknownStream`] for names not in the graph.
    pub fn select(&self, names: Option<&[String]>) -> Result<Selection, ExtractError> {
        let selected: HashSet<StreamName> = match names {
            None => self.streams.iter().map(|d| d.name.clone()).collect(),
            Some(names) => names
                .iter()
                .map(|n| self.require(n).map(|d| d.name.clone()))
                .collect::<Result<_, _>>()?,
        };

        let mut traversed = HashSet::new();
        for name in &selected {
            let mut current = self.get(name.as_str());
            while let Some(def) = current {
                if !traversed.insert(def.name.clone()) {
                    break;
                }
                current = def.parent.as_ref().and_then(|p| self.get(p.as_str()));
            }
        }
        Ok(Selection { selected, traversed })
    }
}

fn invalid(message: String) -> ExtractError {
    ExtractError::InvalidGraph { message }
}

/// Which streams are emitted and which are traversed.
///
/// A stream is traversed when it is selected or an ancestor of a selected
/// stream: its records are needed to drive descendants even if they are not
/// emitted. Subtrees without a selected stream are never fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    selected: HashSet<StreamName>,
    traversed: HashSet<StreamName>,
}

impl Selection {
    /// Returns `true` if records of `stream` are emitted.
    pub fn is_selected(&self, stream: &StreamName) -> bool {
        self.selected.contains(stream)
    }

    /// Returns `true` if `stream` must be fetched.
    pub fn is_traversed(&self, stream: &StreamName) -> bool {
        self.traversed.contains(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ChildContextSpec, ContextField};

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

    fn issues() -> StreamDefinition {
        StreamDefinition::new("issues", "/repos/{org}/{repo}/issues")
            .unwrap()
            .with_primary_keys(["id"])
            .with_parent("repositories", true)
            .unwrap()
            .with_child_context(ChildContextSpec {
                base: ContextBase::RequireInbound,
                keys: vec![ContextField::new("issue_number", "number")],
                hints: vec![ContextField::same("comments")],
            })
    }

    fn comments() -> StreamDefinition {
        StreamDefinition::new("issue_comments", "/repos/{org}/{repo}/issues/{issue_number}/comments")
            .unwrap()
            .with_parent("issues", false)
            .unwrap()
            .with_partition_keys(["repo", "org"])
    }

    fn readme() -> StreamDefinition {
        StreamDefinition::new("readme", "/repos/{org}/{repo}/readme")
            .unwrap()
            .with_parent("repositories", false)
            .unwrap()
    }

    #[test]
    fn grandchildren_see_keys_propagated_through_two_levels() {
        let graph = StreamGraph::new(vec![repositories(), issues(), comments()]).unwrap();
        let keys = graph.inbound_keys(graph.get("issue_comments").unwrap());
        assert_eq!(
            keys,
            ["issue_number", "org", "repo"]
                .iter()
                .map(|s| s.to_string())
                .collect::<BTreeSet<String>>()
        );
    }

    #[test]
    fn roots_and_children_are_listed_in_declaration_order() {
        let graph = StreamGraph::new(vec![repositories(), issues(), readme(), comments()]).unwrap();
        let roots: Vec<_> = graph.roots().map(|d| d.name.as_str()).collect();
        assert_eq!(roots, ["repositories"]);
        let repo = StreamName::new("repositories").unwrap();
        let children: Vec<_> = graph.children(&repo).map(|d| d.name.as_str()).collect();
        assert_eq!(children, ["issues", "readme"]);
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let err = StreamGraph::new(vec![comments()]).unwrap_err();
        assert!(matches!(err, ExtractError::InvalidGraph { .. }));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        assert!(StreamGraph::new(vec![repositories(), repositories()]).is_err());
    }

    #[test]
    fn cycles_are_rejected() {
        let a = StreamDefinition::new("a", "/a").unwrap().with_parent("b", false).unwrap();
        let b = StreamDefinition::new("b", "/b").unwrap().with_parent("a", false).unwrap();
        let err = StreamGraph::new(vec![a, b]).unwrap_err();
        assert!(err.to_string().contains("cycle"), "got: {err}");
    }

    #[test]
    fn underivable_partition_key_is_rejected() {
        let bad = comments().with_partition_keys(["repo", "org", "label"]);
        let err = StreamGraph::new(vec![repositories(), issues(), bad]).unwrap_err();
        assert!(err.to_string().contains("label"), "got: {err}");
    }

    #[test]
    fn underivable_placeholder_is_rejected() {
        let bad = StreamDefinition::new("pr_files", "/repos/{org}/{repo}/pulls/{pull_number}/files")
            .unwrap()
            .with_parent("repositories", false)
            .unwrap();
        assert!(StreamGraph::new(vec![repositories(), bad]).is_err());
    }

    #[test]
    fn root_with_placeholders_is_rejected() {
        let bad = StreamDefinition::new("readme", "/repos/{org}/{repo}/readme").unwrap();
        assert!(StreamGraph::new(vec![bad]).is_err());
    }

    #[test]
    fn selecting_a_grandchild_traverses_its_ancestors_only() {
        let graph = StreamGraph::new(vec![repositories(), issues(), readme(), comments()]).unwrap();
        let selection = graph.select(Some(&["issue_comments".to_string()])).unwrap();
        let name = |s: &str| StreamName::new(s).unwrap();

        assert!(selection.is_selected(&name("issue_comments")));
        assert!(!selection.is_selected(&name("issues")));
        assert!(selection.is_traversed(&name("issues")));
        assert!(selection.is_traversed(&name("repositories")));
        assert!(!selection.is_traversed(&name("readme")));
    }

    #[test]
    fn selecting_unknown_stream_fails() {
        let graph = StreamGraph::new(vec![repositories()]).unwrap();
        let err = graph.select(Some(&["nope".to_string()])).unwrap_err();
        assert!(matches!(err, ExtractError::UnknownStream { .. }));
    }
}
