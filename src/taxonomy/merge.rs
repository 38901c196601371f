//! Node merging
//!
//! One merger, parameterized by a [`MergeStrategy`]. Rounds differ in how the
//! composite key is spelled and in which threshold the merged node carries,
//! so both are explicit strategy fields rather than separate code paths.
//!
//! Every merge validates all lookups before touching the tree: a failed
//! lookup returns an error and leaves the tree exactly as it was.

use super::accessor::children_at_mut;
use super::models::{CategoryNode, Children, NodePath, Taxonomy};
use crate::error::{Result, TaxonomyError};
use serde::{Deserialize, Serialize};

/// Which threshold a merged node carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdPolicy {
    /// Sum of the constituents' thresholds.
    Sum,
    /// The first operand's (the candidate's, or the parent's) threshold.
    CarryFirst,
    /// The larger of the constituents' thresholds.
    Max,
}

impl ThresholdPolicy {
    fn combine(self, acc: Option<u64>, next: Option<u64>) -> Option<u64> {
        match self {
            ThresholdPolicy::Sum => match (acc, next) {
                (None, None) => None,
                (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
            },
            ThresholdPolicy::CarryFirst => acc,
            ThresholdPolicy::Max => acc.max(next),
        }
    }
}

impl std::str::FromStr for ThresholdPolicy {
    type Err = TaxonomyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sum" => Ok(ThresholdPolicy::Sum),
            "carry_first" => Ok(ThresholdPolicy::CarryFirst),
            "max" => Ok(ThresholdPolicy::Max),
            other => Err(TaxonomyError::Config(format!("unknown threshold policy '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStrategy {
    pub key_separator: String,
    pub threshold_policy: ThresholdPolicy,
}

impl MergeStrategy {
    pub fn new(key_separator: impl Into<String>, threshold_policy: ThresholdPolicy) -> Self {
        Self {
            key_separator: key_separator.into(),
            threshold_policy,
        }
    }

    /// `A,B` keys with summed thresholds (first-generation sibling merge).
    pub fn comma() -> Self {
        Self::new(",", ThresholdPolicy::Sum)
    }

    /// `A, B` keys with summed thresholds.
    pub fn comma_space() -> Self {
        Self::new(", ", ThresholdPolicy::Sum)
    }

    /// `A_B` keys carrying the candidate's threshold (count-based merge rounds).
    pub fn underscore() -> Self {
        Self::new("_", ThresholdPolicy::CarryFirst)
    }

    /// `P_C` keys keeping the larger threshold (node absorbed into its parent).
    pub fn parent_collapse() -> Self {
        Self::new("_", ThresholdPolicy::Max)
    }

    pub fn composite_key<S: AsRef<str>>(&self, codes: &[S]) -> String {
        codes
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(&self.key_separator)
    }
}

impl Default for MergeStrategy {
    fn default() -> Self {
        Self::underscore()
    }
}

// ============================================================================
// Sibling merges
// ============================================================================

/// Merge `candidate` with its sibling `sibling` into one node labeled `label`.
///
/// The candidate is located by code (first match in preorder) and its owner
/// through its recorded `parent_code`. Returns the composite key of the new
/// node. Fails without modifying the tree if either node (or the candidate's
/// recorded parent) cannot be found.
pub fn merge_siblings(
    tree: &mut Taxonomy,
    candidate: &str,
    sibling: &str,
    label: &str,
    strategy: &MergeStrategy,
) -> Result<String> {
    let siblings = [sibling.to_string()];
    let owner = locate_owner(tree, candidate, &siblings)?;
    merge_group(tree, &owner, candidate, &siblings, label, strategy, true)
}

/// [`merge_siblings`] inside the children mapping at `owner`.
///
/// Codes are only unique among siblings, so callers that already know the
/// level should use this instead of a code lookup.
pub fn merge_siblings_at(
    tree: &mut Taxonomy,
    owner: &[String],
    candidate: &str,
    sibling: &str,
    label: &str,
    strategy: &MergeStrategy,
) -> Result<String> {
    merge_group(tree, owner, candidate, &[sibling.to_string()], label, strategy, true)
}

/// N-way merge of `candidate` with several siblings.
///
/// Siblings that cannot be found are skipped with a warning; the merge only
/// fails if none of them can be found.
pub fn merge_many(
    tree: &mut Taxonomy,
    candidate: &str,
    siblings: &[String],
    label: &str,
    strategy: &MergeStrategy,
) -> Result<String> {
    let owner = locate_owner(tree, candidate, siblings)?;
    merge_group(tree, &owner, candidate, siblings, label, strategy, false)
}

fn merge_group(
    tree: &mut Taxonomy,
    owner: &[String],
    candidate: &str,
    siblings: &[String],
    label: &str,
    strategy: &MergeStrategy,
    strict: bool,
) -> Result<String> {
    let level = tree
        .children_at(owner)
        .ok_or_else(|| TaxonomyError::NodeNotFound(candidate.to_string()))?;
    let Some(candidate_node) = level.get(candidate) else {
        return Err(TaxonomyError::NodeNotFound(candidate.to_string()));
    };
    let candidate_parent = candidate_node.parent().unwrap_or("");

    let mut members: Vec<String> = vec![candidate.to_string()];
    for sibling in siblings {
        if sibling == candidate {
            return Err(TaxonomyError::InvalidMerge(format!("{} cannot merge with itself", candidate)));
        }
        if members.contains(sibling) {
            continue;
        }
        let err = match level.get(sibling.as_str()) {
            Some(node) if node.parent().unwrap_or("") == candidate_parent => {
                members.push(sibling.clone());
                continue;
            }
            Some(_) => TaxonomyError::NotSiblings(candidate.to_string(), sibling.clone()),
            None => TaxonomyError::SiblingNotFound {
                code: candidate.to_string(),
                sibling: sibling.clone(),
            },
        };
        if strict {
            return Err(err);
        }
        log::warn!("Skipping sibling in merge: {}", err);
    }
    if members.len() < 2 {
        return Err(TaxonomyError::InvalidMerge(format!("no siblings left to merge with {}", candidate)));
    }

    let merged_key = strategy.composite_key(&members);
    if level.contains_key(&merged_key) && !members.contains(&merged_key) {
        return Err(TaxonomyError::KeyCollision(merged_key));
    }

    let policy = strategy.threshold_policy;
    tree.update_structure(|roots| {
        let Some(level) = children_at_mut(roots, owner) else {
            return;
        };
        let mut merged: Option<CategoryNode> = None;
        for code in &members {
            let Some(node) = level.remove(code) else {
                continue;
            };
            merged = Some(match merged.take() {
                None => CategoryNode {
                    label: label.to_string(),
                    count: node.count,
                    threshold: node.threshold,
                    parent_code: node.parent_code,
                    children: node.children,
                    ..Default::default()
                },
                Some(mut acc) => {
                    acc.count += node.count;
                    acc.threshold = policy.combine(acc.threshold, node.threshold);
                    acc.children.extend(node.children);
                    acc
                }
            });
        }
        if let Some(mut merged) = merged {
            reparent_children(&mut merged.children, &merged_key);
            level.insert(merged_key.clone(), merged);
        }
    });

    log::info!("Merged {} into {} with label '{}'", members.join(" + "), merged_key, label);
    Ok(merged_key)
}

/// Path of the mapping that owns `candidate`.
///
/// When the candidate and all siblings sit in the root set the owner is the
/// root set; otherwise the owner is the node named by the candidate's
/// recorded `parent_code`.
fn locate_owner(tree: &Taxonomy, candidate: &str, siblings: &[String]) -> Result<NodePath> {
    let roots = tree.roots();
    if roots.contains_key(candidate) && siblings.iter().all(|s| roots.contains_key(s)) {
        return Ok(Vec::new());
    }

    let path = tree
        .find_by_key(candidate, None)
        .ok_or_else(|| TaxonomyError::NodeNotFound(candidate.to_string()))?;
    let node = tree
        .get(&path)
        .ok_or_else(|| TaxonomyError::NodeNotFound(candidate.to_string()))?;

    match node.parent() {
        None => Ok(Vec::new()),
        Some(parent) => tree
            .find_by_key(parent, None)
            .ok_or_else(|| TaxonomyError::ParentNotFound {
                code: candidate.to_string(),
                parent: parent.to_string(),
            }),
    }
}

fn reparent_children(children: &mut Children, new_parent: &str) {
    for child in children.values_mut() {
        child.parent_code = Some(new_parent.to_string());
    }
}

// ============================================================================
// Parent merges
// ============================================================================

/// Absorb `candidate` into its direct parent.
///
/// The candidate is located by code (first match in preorder). See
/// [`merge_with_parent_at`] for the effect. Returns the parent's new key.
pub fn merge_with_parent(tree: &mut Taxonomy, candidate: &str, strategy: &MergeStrategy) -> Result<String> {
    let path = tree
        .find_by_key(candidate, None)
        .ok_or_else(|| TaxonomyError::NodeNotFound(candidate.to_string()))?;
    let parent_code = tree
        .get(&path)
        .and_then(|node| node.parent())
        .ok_or_else(|| TaxonomyError::TopLevel(candidate.to_string()))?
        .to_string();
    if Taxonomy::owner_of(&path).last() != Some(&parent_code) {
        if tree.find_by_key(&parent_code, None).is_none() {
            return Err(TaxonomyError::ParentNotFound {
                code: candidate.to_string(),
                parent: parent_code,
            });
        }
        return Err(TaxonomyError::NotChildOf {
            code: candidate.to_string(),
            parent: parent_code,
        });
    }
    merge_with_parent_at(tree, &path, strategy)
}

/// Absorb the node at `path` into its direct parent.
///
/// The parent is re-keyed to `parent{sep}candidate`, keeps its own label and
/// count (the parent's count already covers the candidate), takes the
/// candidate's children alongside its remaining ones and carries a threshold
/// chosen by the strategy. Top-level candidates are refused.
///
/// Returns the parent's new key.
pub fn merge_with_parent_at(tree: &mut Taxonomy, path: &[String], strategy: &MergeStrategy) -> Result<String> {
    let Some((candidate, parent_path)) = path.split_last() else {
        return Err(TaxonomyError::NodeNotFound(String::new()));
    };
    let Some(parent_code) = parent_path.last() else {
        return Err(TaxonomyError::TopLevel(candidate.clone()));
    };
    if tree.get(path).is_none() {
        return Err(TaxonomyError::NodeNotFound(candidate.clone()));
    }

    let grand_owner = Taxonomy::owner_of(parent_path);
    let merged_key = strategy.composite_key(&[parent_code.as_str(), candidate.as_str()]);
    let collides = tree
        .children_at(grand_owner)
        .map(|level| level.contains_key(&merged_key))
        .unwrap_or(false);
    if collides {
        return Err(TaxonomyError::KeyCollision(merged_key));
    }

    let policy = strategy.threshold_policy;
    tree.update_structure(|roots| {
        let Some(grand_level) = children_at_mut(roots, grand_owner) else {
            return;
        };
        let Some(mut parent) = grand_level.remove(parent_code) else {
            return;
        };
        if let Some(absorbed) = parent.children.remove(candidate) {
            parent.threshold = policy.combine(parent.threshold, absorbed.threshold);
            parent.children.extend(absorbed.children);
        }
        parent.sibling_threshold = None;
        parent.level_threshold = None;
        reparent_children(&mut parent.children, &merged_key);
        grand_level.insert(merged_key.clone(), parent);
    });

    log::info!("Merged {} into {}, new key: {}", candidate, parent_code, merged_key);
    Ok(merged_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with(roots: Vec<(&str, CategoryNode)>) -> Taxonomy {
        let roots: Children = roots.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        let mut taxonomy = Taxonomy::new(roots);
        taxonomy.add_parent_codes();
        taxonomy
    }

    fn sample() -> Taxonomy {
        tree_with(vec![
            (
                "P",
                CategoryNode::new("Parent", 30)
                    .with_child(
                        "A",
                        CategoryNode::new("Alpha", 5)
                            .with_threshold(3)
                            .with_child("A1", CategoryNode::new("Alpha one", 5))
                            .with_child("X", CategoryNode::new("Shared from A", 1)),
                    )
                    .with_child(
                        "B",
                        CategoryNode::new("Beta", 7)
                            .with_threshold(4)
                            .with_child("B1", CategoryNode::new("Beta one", 7))
                            .with_child("X", CategoryNode::new("Shared from B", 2)),
                    )
                    .with_child("C", CategoryNode::new("Gamma", 18).with_threshold(4)),
            ),
            ("Q", CategoryNode::new("Other", 9)),
        ])
    }

    #[test]
    fn test_merge_siblings_comma() {
        let mut tree = tree_with(vec![
            (
                "A",
                CategoryNode::new("Alpha", 5).with_child("A1", CategoryNode::new("Alpha one", 5)),
            ),
            (
                "B",
                CategoryNode::new("Beta", 7).with_child("B1", CategoryNode::new("Beta one", 7)),
            ),
        ]);

        let key = merge_siblings(&mut tree, "A", "B", "Alpha and beta", &MergeStrategy::comma()).unwrap();

        assert_eq!(key, "A,B");
        let merged = &tree.roots()["A,B"];
        assert_eq!(merged.count, 12);
        assert_eq!(merged.label, "Alpha and beta");
        assert_eq!(merged.children.keys().cloned().collect::<Vec<_>>(), vec!["A1", "B1"]);
        assert!(merged.children.values().all(|c| c.parent() == Some("A,B")));
        assert!(!tree.roots().contains_key("A"));
        assert!(!tree.roots().contains_key("B"));
        assert!(tree.check_parent_links().is_empty());
    }

    #[test]
    fn test_merge_siblings_nested_carries_candidate_threshold() {
        let mut tree = sample();
        let key = merge_siblings(&mut tree, "A", "B", "Alpha beta", &MergeStrategy::underscore()).unwrap();

        assert_eq!(key, "A_B");
        let merged = tree.find_node("A_B", Some("P")).unwrap();
        assert_eq!(merged.count, 12);
        assert_eq!(merged.threshold, Some(3));
        assert_eq!(merged.parent(), Some("P"));
        // the later operand wins on a child key collision
        assert_eq!(merged.children["X"].label, "Shared from B");
        assert_eq!(merged.children.len(), 3);
        assert!(tree.check_parent_links().is_empty());
        assert_eq!(tree.find_by_key("A1", None).unwrap(), vec!["P", "A_B", "A1"]);
    }

    #[test]
    fn test_merge_siblings_sum_threshold() {
        let mut tree = sample();
        merge_siblings(&mut tree, "A", "B", "Alpha beta", &MergeStrategy::comma_space()).unwrap();
        let merged = tree.find_node("A, B", None).unwrap();
        assert_eq!(merged.threshold, Some(7));
    }

    #[test]
    fn test_merge_missing_candidate_leaves_tree_unmodified() {
        let mut tree = sample();
        let before = tree.clone();
        let err = merge_siblings(&mut tree, "Z", "B", "x", &MergeStrategy::default()).unwrap_err();
        assert!(matches!(err, TaxonomyError::NodeNotFound(_)));
        assert!(err.is_lookup_failure());
        assert_eq!(tree, before);
    }

    #[test]
    fn test_merge_missing_sibling_leaves_tree_unmodified() {
        let mut tree = sample();
        let before = tree.clone();
        let err = merge_siblings(&mut tree, "A", "Q", "x", &MergeStrategy::default()).unwrap_err();
        assert!(matches!(err, TaxonomyError::SiblingNotFound { .. }));
        assert_eq!(tree, before);
    }

    #[test]
    fn test_merge_missing_parent_leaves_tree_unmodified() {
        let mut tree = sample();
        if let Some(node) = tree.get_mut(&["P".to_string(), "A".to_string()]) {
            node.parent_code = Some("GONE".to_string());
        }
        let before = tree.clone();
        let err = merge_siblings(&mut tree, "A", "B", "x", &MergeStrategy::default()).unwrap_err();
        assert!(matches!(err, TaxonomyError::ParentNotFound { .. }));
        assert_eq!(tree, before);
    }

    #[test]
    fn test_merge_with_self_is_rejected() {
        let mut tree = sample();
        let err = merge_siblings(&mut tree, "A", "A", "x", &MergeStrategy::default()).unwrap_err();
        assert!(matches!(err, TaxonomyError::InvalidMerge(_)));
    }

    #[test]
    fn test_merge_key_collision_is_rejected() {
        let mut tree = tree_with(vec![
            ("A", CategoryNode::new("a", 1)),
            ("B", CategoryNode::new("b", 1)),
            ("A_B", CategoryNode::new("already merged", 2)),
        ]);
        let before = tree.clone();
        let err = merge_siblings(&mut tree, "A", "B", "x", &MergeStrategy::underscore()).unwrap_err();
        assert!(matches!(err, TaxonomyError::KeyCollision(_)));
        assert_eq!(tree, before);
    }

    #[test]
    fn test_merge_many_accumulates_and_skips_missing() {
        let mut tree = sample();
        let siblings = vec!["B".to_string(), "NOPE".to_string(), "C".to_string()];
        let key = merge_many(&mut tree, "A", &siblings, "Everything", &MergeStrategy::comma()).unwrap();

        assert_eq!(key, "A,B,C");
        let merged = tree.find_node("A,B,C", Some("P")).unwrap();
        assert_eq!(merged.count, 30);
        assert_eq!(merged.threshold, Some(11));
        assert_eq!(tree.children_at(&["P".to_string()]).unwrap().len(), 1);
        assert!(tree.check_parent_links().is_empty());
    }

    #[test]
    fn test_merge_with_parent_rekeys_parent() {
        let mut tree = tree_with(vec![(
            "R",
            CategoryNode::new("Root", 20).with_child(
                "P",
                CategoryNode::new("Parent", 12)
                    .with_threshold(2)
                    .with_child(
                        "C",
                        CategoryNode::new("Only child", 12)
                            .with_threshold(5)
                            .with_child("G", CategoryNode::new("Grandchild", 12)),
                    ),
            ),
        )]);

        let key = merge_with_parent(&mut tree, "C", &MergeStrategy::parent_collapse()).unwrap();

        assert_eq!(key, "P_C");
        let merged = tree.find_node("P_C", Some("R")).unwrap();
        assert_eq!(merged.label, "Parent");
        assert_eq!(merged.count, 12);
        assert_eq!(merged.threshold, Some(5));
        assert!(merged.children.contains_key("G"));
        assert!(!merged.children.contains_key("C"));
        assert!(tree.check_parent_links().is_empty());
    }

    #[test]
    fn test_merge_with_parent_refuses_top_level() {
        let mut tree = sample();
        let err = merge_with_parent(&mut tree, "Q", &MergeStrategy::parent_collapse()).unwrap_err();
        assert!(matches!(err, TaxonomyError::TopLevel(_)));
    }

    fn path(codes: &[&str]) -> NodePath {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_merge_siblings_at_uses_given_level() {
        let mut tree = sample();
        let key = merge_siblings_at(&mut tree, &path(&["P", "B"]), "X", "B1", "Shared", &MergeStrategy::underscore()).unwrap();

        assert_eq!(key, "X_B1");
        let b = tree.find_node("B", Some("P")).unwrap();
        assert_eq!(b.children.keys().cloned().collect::<Vec<_>>(), vec!["X_B1"]);
        assert_eq!(b.children["X_B1"].count, 9);
        let a = tree.find_node("A", Some("P")).unwrap();
        assert_eq!(a.children["X"].label, "Shared from A");
        assert!(tree.check_parent_links().is_empty());
    }

    #[test]
    fn test_merge_siblings_at_missing_sibling() {
        let mut tree = sample();
        let before = tree.clone();
        let err = merge_siblings_at(&mut tree, &path(&["P", "B"]), "X", "A1", "x", &MergeStrategy::default()).unwrap_err();
        assert!(matches!(err, TaxonomyError::SiblingNotFound { .. }));
        assert_eq!(tree, before);
    }

    #[test]
    fn test_merge_with_parent_at_uses_given_path() {
        let mut tree = sample();
        let key = merge_with_parent_at(&mut tree, &path(&["P", "B", "X"]), &MergeStrategy::parent_collapse()).unwrap();

        assert_eq!(key, "B_X");
        let merged = tree.find_node("B_X", Some("P")).unwrap();
        assert_eq!(merged.children.keys().cloned().collect::<Vec<_>>(), vec!["B1"]);
        assert!(tree.find_node("A", Some("P")).unwrap().children.contains_key("X"));
        assert!(tree.check_parent_links().is_empty());

        let err = merge_with_parent_at(&mut tree, &path(&["Q"]), &MergeStrategy::parent_collapse()).unwrap_err();
        assert!(matches!(err, TaxonomyError::TopLevel(_)));
    }

    #[test]
    fn test_threshold_policy_from_str() {
        assert_eq!("carry_first".parse::<ThresholdPolicy>().unwrap(), ThresholdPolicy::CarryFirst);
        assert!("median".parse::<ThresholdPolicy>().is_err());
    }
}
