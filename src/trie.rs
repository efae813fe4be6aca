//! Path-pattern trie resolving the grants that apply to an execution path

use std::collections::HashMap;

use crate::path::{ArtifactPath, SUBSTITUTION, WILDCARD};
use crate::permission::PermissionSet;

/// One node of the grant trie.
///
/// Literal children are keyed by segment; the `*` and `?` tokens get the
/// dedicated wildcard and substitution children. A node carries a grant
/// set only when a grant pattern terminates at it, so every leaf holds a
/// grant by construction.
#[derive(Debug, Default)]
pub struct PathNode {
    children: HashMap<String, PathNode>,
    wildcard: Option<Box<PathNode>>,
    substitution: Option<Box<PathNode>>,
    grants: Option<PermissionSet>,
}

impl PathNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk or create nodes along `pattern` and merge `grants` into the
    /// terminal node. Later insertions at the same pattern merge; they
    /// never overwrite.
    pub fn insert(&mut self, pattern: &ArtifactPath, grants: PermissionSet) {
        let mut node = self;
        for segment in pattern.segments() {
            node = match segment.as_str() {
                WILDCARD => node.wildcard.get_or_insert_with(Default::default).as_mut(),
                SUBSTITUTION => node.substitution.get_or_insert_with(Default::default).as_mut(),
                _ => node.children.entry(segment.clone()).or_default(),
            };
        }
        match &mut node.grants {
            Some(existing) => existing.merge(&grants),
            None => node.grants = Some(grants),
        }
    }

    /// Mark a pattern with an empty grant set. Used for presence-only
    /// tries such as the audited-artifact index.
    pub fn mark(&mut self, pattern: &ArtifactPath) {
        self.insert(pattern, PermissionSet::default());
    }

    /// Merge into `found` the grants of every node whose pattern matches
    /// the whole of `path`. All matches contribute; the union is
    /// independent of traversal order.
    pub fn get_permissions(&self, path: &ArtifactPath, found: &mut PermissionSet) {
        self.collect(path.segments(), found);
    }

    fn collect(&self, remaining: &[String], found: &mut PermissionSet) {
        if remaining.is_empty() {
            if let Some(grants) = &self.grants {
                found.merge(grants);
            }
        } else {
            if let Some(child) = self.children.get(remaining[0].as_str()) {
                child.collect(&remaining[1..], found);
            }
            if let Some(subst) = &self.substitution {
                subst.collect(&remaining[1..], found);
            }
        }
        if let Some(wild) = &self.wildcard {
            // `*` consumes any run of segments, including none; try every
            // split point so no matching continuation is missed.
            for skip in 0..=remaining.len() {
                wild.collect(&remaining[skip..], found);
            }
        }
    }

    /// Whether any marked pattern matches the whole of `path`.
    pub fn matches(&self, path: &ArtifactPath) -> bool {
        self.find(path.segments())
    }

    fn find(&self, remaining: &[String]) -> bool {
        if remaining.is_empty() && self.grants.is_some() {
            return true;
        }
        if !remaining.is_empty() {
            if let Some(child) = self.children.get(remaining[0].as_str()) {
                if child.find(&remaining[1..]) {
                    return true;
                }
            }
            if let Some(subst) = &self.substitution {
                if subst.find(&remaining[1..]) {
                    return true;
                }
            }
        }
        if let Some(wild) = &self.wildcard {
            for skip in 0..=remaining.len() {
                if wild.find(&remaining[skip..]) {
                    return true;
                }
            }
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_none()
            && self.children.is_empty()
            && self.wildcard.is_none()
            && self.substitution.is_none()
    }
}
