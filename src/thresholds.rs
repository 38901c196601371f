//! Statistical thresholds for merge candidacy
//!
//! A node becomes a candidate when its count is at or below its threshold.
//! Two populations feed the threshold:
//! - siblings: the literal children of the same parent (the top-level set for roots)
//! - level: every node at the same depth anywhere in the tree
//!
//! The effective threshold is the larger of the two, so a node that looks
//! small through either lens is flagged.

use crate::taxonomy::{Children, Taxonomy};
use std::collections::BTreeMap;

/// `max(0, floor(mean + z * stddev))` over `counts` (population stddev). Empty input yields 0.
pub fn calculate_threshold(counts: &[u64], z_threshold: f64) -> u64 {
    if counts.is_empty() {
        return 0;
    }

    let n = counts.len() as f64;
    let mean = counts.iter().map(|&c| c as f64).sum::<f64>() / n;
    let variance = counts
        .iter()
        .map(|&c| {
            let d = c as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let value = mean + z_threshold * variance.sqrt();

    if value <= 0.0 || !value.is_finite() {
        0
    } else {
        value.floor() as u64
    }
}

/// Write `sibling_threshold` on every node from its siblings' counts.
pub fn add_sibling_thresholds(tree: &mut Taxonomy, z_threshold: f64) {
    fn apply(children: &mut Children, z: f64) {
        let counts: Vec<u64> = children.values().map(|c| c.count).collect();
        let threshold = calculate_threshold(&counts, z);
        for child in children.values_mut() {
            child.sibling_threshold = Some(threshold);
            apply(&mut child.children, z);
        }
    }
    apply(tree.roots_mut_fields(), z_threshold);
}

/// Counts of every node bucketed by depth (top level = 0).
pub fn collect_level_counts(tree: &Taxonomy) -> BTreeMap<usize, Vec<u64>> {
    let mut levels: BTreeMap<usize, Vec<u64>> = BTreeMap::new();
    tree.walk(|_, node, depth| levels.entry(depth).or_default().push(node.count));
    levels
}

/// Write `level_threshold` on every node from the counts of all nodes at its depth.
pub fn add_level_thresholds(tree: &mut Taxonomy, z_threshold: f64) {
    let thresholds: BTreeMap<usize, u64> = collect_level_counts(tree)
        .into_iter()
        .map(|(depth, counts)| (depth, calculate_threshold(&counts, z_threshold)))
        .collect();

    fn apply(children: &mut Children, depth: usize, thresholds: &BTreeMap<usize, u64>) {
        for child in children.values_mut() {
            if let Some(&t) = thresholds.get(&depth) {
                child.level_threshold = Some(t);
            }
            apply(&mut child.children, depth + 1, thresholds);
        }
    }
    apply(tree.roots_mut_fields(), 0, &thresholds);
}

/// Consolidate: `threshold = max(sibling_threshold, level_threshold)` where both
/// exist, dropping the two specialized fields.
pub fn assign_maximum_threshold(tree: &mut Taxonomy) {
    fn apply(children: &mut Children) {
        for child in children.values_mut() {
            if let (Some(s), Some(l)) = (child.sibling_threshold, child.level_threshold) {
                child.threshold = Some(s.max(l));
                child.sibling_threshold = None;
                child.level_threshold = None;
            }
            apply(&mut child.children);
        }
    }
    apply(tree.roots_mut_fields());
}

/// Sibling, level, consolidate. This is what the driver runs between passes.
pub fn recompute_thresholds(tree: &mut Taxonomy, z_threshold: f64) {
    add_sibling_thresholds(tree, z_threshold);
    add_level_thresholds(tree, z_threshold);
    assign_maximum_threshold(tree);
}

/// Sibling-only variant that writes `threshold` directly.
pub fn update_thresholds(tree: &mut Taxonomy, z_threshold: f64) {
    fn apply(children: &mut Children, z: f64) {
        let counts: Vec<u64> = children.values().map(|c| c.count).collect();
        let threshold = calculate_threshold(&counts, z);
        for child in children.values_mut() {
            child.threshold = Some(threshold);
            apply(&mut child.children, z);
        }
    }
    apply(tree.roots_mut_fields(), z_threshold);
}

/// Drop every node (with its subtree) whose count is below `min_count`.
///
/// Returns the removed codes in DFS preorder. No cascade: parents left
/// childless stay.
pub fn remove_low_count_classes(tree: &mut Taxonomy, min_count: u64) -> Vec<String> {
    fn prune(children: &mut Children, min_count: u64, removed: &mut Vec<String>) {
        let doomed: Vec<String> = children
            .iter()
            .filter(|(_, node)| node.count < min_count)
            .map(|(code, _)| code.clone())
            .collect();
        for code in &doomed {
            children.remove(code);
        }
        removed.extend(doomed);
        for child in children.values_mut() {
            prune(&mut child.children, min_count, removed);
        }
    }

    tree.update_structure(|roots| {
        let mut removed = Vec::new();
        prune(roots, min_count, &mut removed);
        removed
    })
}
