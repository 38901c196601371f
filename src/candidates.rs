//! Candidate selection within one tree level.

use crate::taxonomy::{CategoryNode, Children};
use serde::{Deserialize, Serialize};

/// A node picked for a merge/removal decision, snapshotted from its level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub code: String,
    pub label: String,
    pub count: u64,
    pub threshold: Option<u64>,
    pub is_leaf: bool,
}

impl Candidate {
    fn from_node(code: &str, node: &CategoryNode) -> Self {
        Self {
            code: code.to_string(),
            label: node.label.clone(),
            count: node.count,
            threshold: node.threshold,
            is_leaf: node.is_leaf(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidatePolicy {
    /// Every node with `count <= threshold`, smallest first.
    Threshold,
    /// The smallest leaf, plus lone-child nodes smaller than all their siblings.
    MinimalLeaf,
    /// Every node, smallest first.
    All,
}

pub fn select_candidates(level: &Children, policy: CandidatePolicy) -> Vec<Candidate> {
    match policy {
        CandidatePolicy::Threshold => threshold_candidates(level),
        CandidatePolicy::MinimalLeaf => minimal_leaf_candidates(level),
        CandidatePolicy::All => all_candidates(level),
    }
}

/// Nodes at or below their stored threshold, ascending by count.
/// Nodes without a threshold are never candidates.
pub fn threshold_candidates(level: &Children) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = level
        .iter()
        .filter(|(_, node)| node.threshold.map(|t| node.count <= t).unwrap_or(false))
        .map(|(code, node)| Candidate::from_node(code, node))
        .collect();
    candidates.sort_by_key(|c| c.count);
    candidates
}

/// Stricter cleanup selection:
/// - among leaves, only the single smallest (first one on ties)
/// - among nodes with exactly one child, those whose count is strictly below
///   every other sibling's count
pub fn minimal_leaf_candidates(level: &Children) -> Vec<Candidate> {
    let mut candidates = Vec::new();

    if let Some((code, node)) = level
        .iter()
        .filter(|(_, node)| node.is_leaf())
        .min_by_key(|(_, node)| node.count)
    {
        candidates.push(Candidate::from_node(code, node));
    }

    for (code, node) in level.iter().filter(|(_, node)| node.children.len() == 1) {
        let smallest_other = level
            .iter()
            .filter(|(other, _)| *other != code)
            .map(|(_, other)| other.count)
            .min();
        match smallest_other {
            Some(min) if node.count < min => candidates.push(Candidate::from_node(code, node)),
            Some(_) => {}
            None => log::debug!("No sibling of {} for merge", code),
        }
    }

    candidates
}

pub fn all_candidates(level: &Children) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = level
        .iter()
        .map(|(code, node)| Candidate::from_node(code, node))
        .collect();
    candidates.sort_by_key(|c| c.count);
    candidates
}
