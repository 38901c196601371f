//! Node removal with cascade.
//!
//! Removing a node can leave its parent with no children. Such a parent is
//! removed as well, and so on upward, until an ancestor with remaining
//! children or the root set is reached. Whether a childless top-level node
//! is itself removed depends on the [`CascadePolicy`] of the pass.

use super::accessor::children_at_mut;
use super::models::Taxonomy;
use crate::error::{Result, TaxonomyError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadePolicy {
    /// Stop the cascade below the top level; top-level nodes are never auto-removed.
    ProtectTopLevel,
    /// Keep going through the top level.
    Unrestricted,
}

/// Remove the first node with `code` (DFS preorder) and cascade upward.
///
/// Returns the removed codes, the requested node first.
pub fn remove_node(tree: &mut Taxonomy, code: &str, policy: CascadePolicy) -> Result<Vec<String>> {
    let path = tree
        .find_by_key(code, None)
        .ok_or_else(|| TaxonomyError::NodeNotFound(code.to_string()))?;
    remove_at(tree, &path, policy)
}

/// Remove the node at `path` and cascade upward.
pub fn remove_at(tree: &mut Taxonomy, path: &[String], policy: CascadePolicy) -> Result<Vec<String>> {
    if tree.get(path).is_none() {
        return Err(TaxonomyError::NodeNotFound(path.join("/")));
    }

    let removed = tree.update_structure(|roots| {
        let mut removed = Vec::new();
        let mut target = path.to_vec();
        while let Some((code, owner)) = target.split_last() {
            let owner = owner.to_vec();
            let Some(level) = children_at_mut(roots, &owner) else {
                break;
            };
            if level.remove(code).is_none() {
                break;
            }
            removed.push(code.clone());

            if owner.is_empty() || !level.is_empty() {
                break;
            }
            if owner.len() == 1 && policy == CascadePolicy::ProtectTopLevel {
                break;
            }
            log::info!("Removing {} as it has no remaining children", owner.join("/"));
            target = owner;
        }
        removed
    });

    log::info!("Removed {}", removed.join(", "));
    Ok(removed)
}
