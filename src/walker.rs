//! Level walker: one refinement pass over the whole tree.
//!
//! A pass visits the top level first, then every child mapping in DFS order.
//! Within a level it takes the candidates picked by the pass's selection
//! policy (ascending by count), asks the decision port about each one and
//! applies the answer. After every structural change the pending candidates
//! are re-checked against the level as it is now, so nothing is ever
//! decided from a stale snapshot.

use crate::candidates::{select_candidates, Candidate, CandidatePolicy};
use crate::decision::{Decision, DecisionPort, LabelContext, MergeLabelRequest};
use crate::error::TaxonomyError;
use crate::taxonomy::{
    merge_siblings_at, merge_with_parent_at, remove_at, CascadePolicy, MergeStrategy, NodePath, Taxonomy,
};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pass {
    /// Threshold candidates merged with a sibling (or removed) on the port's advice.
    SiblingMerge(MergeStrategy),
    /// Minimal leaves and lone-child nodes absorbed into their parent.
    ParentCollapse,
    /// Every node checked for relevance; `Remove` drops it and cascades upward.
    Relevance,
    /// Every node offered a better label.
    Relabel,
}

impl Pass {
    pub fn name(&self) -> &'static str {
        match self {
            Pass::SiblingMerge(_) => "sibling_merge",
            Pass::ParentCollapse => "parent_collapse",
            Pass::Relevance => "relevance",
            Pass::Relabel => "relabel",
        }
    }

    fn policy(&self) -> CandidatePolicy {
        match self {
            Pass::SiblingMerge(_) => CandidatePolicy::Threshold,
            Pass::ParentCollapse => CandidatePolicy::MinimalLeaf,
            Pass::Relevance | Pass::Relabel => CandidatePolicy::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeRecord {
    pub key: String,
    pub members: Vec<String>,
    pub label: String,
}

/// A node dropped by a pass, with what it took along.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovedGroup {
    pub code: String,
    pub label: String,
    pub children: Vec<String>,
    /// Ancestors removed because they were left without children.
    pub cascaded: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relabel {
    pub code: String,
    pub old_label: String,
    pub new_label: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    pub pass: String,
    pub decisions: usize,
    pub merges: Vec<MergeRecord>,
    pub removed: Vec<RemovedGroup>,
    pub relabeled: Vec<Relabel>,
    /// Mutations abandoned because a lookup failed.
    pub failures: usize,
}

impl PassReport {
    pub fn changed(&self) -> bool {
        !self.merges.is_empty() || !self.removed.is_empty() || !self.relabeled.is_empty()
    }
}

/// What to do with the candidate list after handling one candidate.
enum Step {
    Next,
    Drop,
    /// The level changed: re-check pending candidates and start over.
    Restart,
    /// The candidate disappeared: re-check pending candidates, keep position.
    Continue,
    /// The level's owner was re-keyed.
    Rekeyed(NodePath),
    StopLevel,
}

/// Run one pass over `tree`.
pub fn run_pass(tree: &mut Taxonomy, pass: &Pass, port: &mut dyn DecisionPort) -> PassReport {
    let mut walker = Walker {
        pass,
        port,
        report: PassReport {
            pass: pass.name().to_string(),
            ..Default::default()
        },
    };
    walker.walk(tree, Vec::new(), None);

    let report = walker.report;
    log::info!(
        "Pass {}: {} decisions, {} merges, {} removals, {} relabels, {} failures",
        report.pass,
        report.decisions,
        report.merges.len(),
        report.removed.len(),
        report.relabeled.len(),
        report.failures
    );
    report
}

struct Walker<'a> {
    pass: &'a Pass,
    port: &'a mut dyn DecisionPort,
    report: PassReport,
}

impl Walker<'_> {
    fn walk(&mut self, tree: &mut Taxonomy, owner: NodePath, parent_label: Option<String>) {
        let owner = self.process_level(tree, owner, parent_label.as_deref());

        let Some(level) = tree.children_at(&owner) else {
            return;
        };
        let inner: Vec<String> = level
            .iter()
            .filter(|(_, node)| !node.is_leaf())
            .map(|(code, _)| code.clone())
            .collect();

        for code in inner {
            let mut path = owner.clone();
            path.push(code);
            let Some(label) = tree.get(&path).map(|node| node.label.clone()) else {
                continue;
            };
            self.walk(tree, path, Some(label));
        }
    }

    /// Handle every candidate of one level. Returns the owner's path, which
    /// changes when a parent collapse re-keys the owner.
    fn process_level(&mut self, tree: &mut Taxonomy, mut owner: NodePath, parent_label: Option<&str>) -> NodePath {
        let Some(level) = tree.children_at(&owner) else {
            return owner;
        };
        let mut pending: Vec<Candidate> = select_candidates(level, self.pass.policy());

        let mut i = 0;
        while i < pending.len() {
            let code = pending[i].code.clone();
            let pass = self.pass;
            let step = match pass {
                Pass::SiblingMerge(strategy) => self.merge_step(tree, &owner, &code, parent_label, strategy),
                Pass::ParentCollapse => self.collapse_step(tree, &owner, &code),
                Pass::Relevance => self.relevance_step(tree, &owner, &code, parent_label),
                Pass::Relabel => self.relabel_step(tree, &owner, &code, parent_label),
            };

            match step {
                Step::Next => i += 1,
                Step::Drop => {
                    pending.remove(i);
                }
                Step::StopLevel => break,
                Step::Restart => {
                    i = 0;
                    if !Self::refilter(tree, &owner, &mut pending) {
                        break;
                    }
                }
                Step::Continue => {
                    if !Self::refilter(tree, &owner, &mut pending) {
                        break;
                    }
                }
                Step::Rekeyed(new_owner) => {
                    owner = new_owner;
                    i = 0;
                    if !Self::refilter(tree, &owner, &mut pending) {
                        break;
                    }
                }
            }
        }
        owner
    }

    /// Drop pending candidates that are no longer in the level. False when
    /// the level itself is gone.
    fn refilter(tree: &Taxonomy, owner: &[String], pending: &mut Vec<Candidate>) -> bool {
        let Some(level) = tree.children_at(owner) else {
            return false;
        };
        pending.retain(|c| level.contains_key(&c.code));
        true
    }

    fn context(tree: &Taxonomy, owner: &[String], code: &str, parent_label: Option<&str>) -> Option<LabelContext> {
        tree.children_at(owner)
            .and_then(|level| LabelContext::collect(level, code, parent_label))
    }

    fn merge_step(
        &mut self,
        tree: &mut Taxonomy,
        owner: &[String],
        code: &str,
        parent_label: Option<&str>,
        strategy: &MergeStrategy,
    ) -> Step {
        let Some(ctx) = Self::context(tree, owner, code, parent_label) else {
            return Step::Drop;
        };
        if !ctx.has_siblings() {
            log::debug!("No sibling of {}", code);
            return Step::StopLevel;
        }

        self.report.decisions += 1;
        match self.port.decide_merge(&ctx).validated(&ctx) {
            Decision::NoAction => {
                log::debug!("Decided not to merge {} ({}) with siblings", code, ctx.candidate_label);
                Step::Next
            }
            Decision::Merge(choice) => {
                let sibling_label = ctx
                    .sibling_codes
                    .iter()
                    .position(|c| *c == choice.sibling_code)
                    .map(|idx| ctx.sibling_labels[idx].clone())
                    .unwrap_or_else(|| choice.sibling_label.clone());
                let request = MergeLabelRequest::new(&ctx, &choice, &sibling_label);
                let label = self.port.merged_label(&request);

                match merge_siblings_at(tree, owner, code, &choice.sibling_code, &label, strategy) {
                    Ok(key) => {
                        self.report.merges.push(MergeRecord {
                            key,
                            members: vec![code.to_string(), choice.sibling_code],
                            label,
                        });
                        Step::Restart
                    }
                    Err(e) => {
                        self.abandoned("Merge", code, &e);
                        Step::Next
                    }
                }
            }
            Decision::Remove => {
                if self.remove_candidate(tree, owner, code, CascadePolicy::ProtectTopLevel) {
                    Step::Restart
                } else {
                    Step::Next
                }
            }
        }
    }

    fn collapse_step(&mut self, tree: &mut Taxonomy, owner: &[String], code: &str) -> Step {
        let Some(parent_code) = owner.last() else {
            log::debug!("Skipping merge for top-level node: {}", code);
            return Step::Drop;
        };
        let parent_label = tree.get(owner).map(|n| n.label.clone()).unwrap_or_default();

        let mut path = owner.to_vec();
        path.push(code.to_string());
        match merge_with_parent_at(tree, &path, &MergeStrategy::parent_collapse()) {
            Ok(key) => {
                self.report.merges.push(MergeRecord {
                    key: key.clone(),
                    members: vec![parent_code.clone(), code.to_string()],
                    label: parent_label,
                });
                let mut new_owner = owner.to_vec();
                if let Some(last) = new_owner.last_mut() {
                    *last = key;
                }
                Step::Rekeyed(new_owner)
            }
            Err(e) => {
                self.abandoned("Collapse", code, &e);
                Step::Drop
            }
        }
    }

    fn relevance_step(&mut self, tree: &mut Taxonomy, owner: &[String], code: &str, parent_label: Option<&str>) -> Step {
        let Some(ctx) = Self::context(tree, owner, code, parent_label) else {
            return Step::Drop;
        };

        self.report.decisions += 1;
        match self.port.decide_relevance(&ctx) {
            Decision::Remove => {
                if self.remove_candidate(tree, owner, code, CascadePolicy::Unrestricted) {
                    Step::Continue
                } else {
                    Step::Next
                }
            }
            Decision::Merge(choice) => {
                log::warn!("Ignoring merge suggestion {} for {} in relevance check", choice.sibling_code, code);
                Step::Next
            }
            Decision::NoAction => {
                log::debug!("Decided to retain {}", code);
                Step::Next
            }
        }
    }

    fn relabel_step(&mut self, tree: &mut Taxonomy, owner: &[String], code: &str, parent_label: Option<&str>) -> Step {
        let Some(ctx) = Self::context(tree, owner, code, parent_label) else {
            return Step::Drop;
        };

        self.report.decisions += 1;
        let Some(proposal) = self.port.propose_label(&ctx) else {
            return Step::Next;
        };
        if !proposal.is_new || proposal.label == ctx.candidate_label {
            return Step::Next;
        }

        let mut path = owner.to_vec();
        path.push(code.to_string());
        if let Some(node) = tree.get_mut(&path) {
            log::info!("Relabeled {}: '{}' -> '{}'", code, node.label, proposal.label);
            node.label = proposal.label.clone();
            self.report.relabeled.push(Relabel {
                code: code.to_string(),
                old_label: ctx.candidate_label,
                new_label: proposal.label,
            });
        }
        Step::Next
    }

    /// Count a mutation that failed. Lookup failures are routine once the
    /// tree has shifted under a pass; anything else is worth a warning.
    fn abandoned(&mut self, what: &str, code: &str, e: &TaxonomyError) {
        self.report.failures += 1;
        if e.is_lookup_failure() {
            log::debug!("{} of {} abandoned: {}", what, code, e);
        } else {
            log::warn!("{} of {} abandoned: {}", what, code, e);
        }
    }

    fn remove_candidate(&mut self, tree: &mut Taxonomy, owner: &[String], code: &str, policy: CascadePolicy) -> bool {
        let mut path = owner.to_vec();
        path.push(code.to_string());
        let Some(node) = tree.get(&path) else {
            self.report.failures += 1;
            return false;
        };
        let mut group = RemovedGroup {
            code: code.to_string(),
            label: node.label.clone(),
            children: node.children.keys().cloned().collect(),
            cascaded: Vec::new(),
        };

        match remove_at(tree, &path, policy) {
            Ok(removed) => {
                group.cascaded = removed.into_iter().skip(1).collect();
                self.report.removed.push(group);
                true
            }
            Err(e) => {
                self.abandoned("Removal", code, &e);
                false
            }
        }
    }
}

/// Absorb every lone child into its parent, leaving top-level nodes alone.
///
/// One level per call: a node that just absorbed its child is not revisited.
/// Returns the new keys.
pub fn merge_single_child_nodes(tree: &mut Taxonomy) -> Vec<String> {
    fn collapse_below(tree: &mut Taxonomy, owner: NodePath, merged: &mut Vec<String>) {
        let Some(level) = tree.children_at(&owner) else {
            return;
        };
        let codes: Vec<String> = level.keys().cloned().collect();

        for code in codes {
            let mut path = owner.clone();
            path.push(code);
            let Some(node) = tree.get(&path) else {
                continue;
            };
            match node.children.len() {
                0 => {}
                1 => {
                    let Some(child) = node.children.keys().next().cloned() else {
                        continue;
                    };
                    log::debug!("Identified single child {} for merging", child);
                    let mut child_path = path.clone();
                    child_path.push(child.clone());
                    match merge_with_parent_at(tree, &child_path, &MergeStrategy::parent_collapse()) {
                        Ok(key) => merged.push(key),
                        Err(e) => log::warn!("Single-child merge of {} abandoned: {}", child, e),
                    }
                }
                _ => collapse_below(tree, path, merged),
            }
        }
    }

    let mut merged = Vec::new();
    let roots: Vec<String> = tree.roots().keys().cloned().collect();
    for code in roots {
        collapse_below(tree, vec![code], &mut merged);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{LabelProposal, MergeChoice, RulePort};
    use crate::taxonomy::{CategoryNode, Children};
    use std::collections::HashMap;

    #[derive(Default)]
    struct ScriptedPort {
        merges: HashMap<String, Decision>,
        relevance: HashMap<String, Decision>,
        proposals: HashMap<String, LabelProposal>,
        asked: Vec<String>,
    }

    impl DecisionPort for ScriptedPort {
        fn decide_merge(&mut self, ctx: &LabelContext) -> Decision {
            self.asked.push(ctx.candidate_code.clone());
            self.merges.get(&ctx.candidate_code).cloned().unwrap_or(Decision::NoAction)
        }

        fn decide_relevance(&mut self, ctx: &LabelContext) -> Decision {
            self.asked.push(ctx.candidate_code.clone());
            self.relevance.get(&ctx.candidate_code).cloned().unwrap_or(Decision::NoAction)
        }

        fn merged_label(&mut self, request: &MergeLabelRequest) -> String {
            format!("{} + {}", request.candidate_label, request.sibling_label)
        }

        fn propose_label(&mut self, ctx: &LabelContext) -> Option<LabelProposal> {
            self.proposals.get(&ctx.candidate_code).cloned()
        }
    }

    fn merge_with(code: &str) -> Decision {
        Decision::Merge(MergeChoice { sibling_code: code.into(), sibling_label: String::new() })
    }

    fn food_tree() -> Taxonomy {
        let mut roots = Children::new();
        roots.insert(
            "A".into(),
            CategoryNode::new("Human necessities", 15)
                .with_threshold(100)
                .with_child("A01", CategoryNode::new("Agriculture", 2).with_threshold(3))
                .with_child("A21", CategoryNode::new("Baking", 3).with_threshold(3))
                .with_child("A23", CategoryNode::new("Foods", 10).with_threshold(3)),
        );
        let mut tree = Taxonomy::new(roots);
        tree.add_parent_codes();
        tree
    }

    fn child_keys(tree: &Taxonomy, owner: &[&str]) -> Vec<String> {
        let owner: Vec<String> = owner.iter().map(|s| s.to_string()).collect();
        tree.children_at(&owner).map(|l| l.keys().cloned().collect()).unwrap_or_default()
    }

    #[test]
    fn test_sibling_merge_pass() {
        let mut tree = food_tree();
        let mut port = ScriptedPort::default();
        port.merges.insert("A01".into(), merge_with("A23"));

        let report = run_pass(&mut tree, &Pass::SiblingMerge(MergeStrategy::underscore()), &mut port);

        assert_eq!(report.merges.len(), 1);
        assert_eq!(report.merges[0].key, "A01_A23");
        assert_eq!(child_keys(&tree, &["A"]), vec!["A01_A23", "A21"]);
        let merged = &tree.roots()["A"].children["A01_A23"];
        assert_eq!(merged.count, 12);
        assert_eq!(merged.label, "Agriculture + Foods");
        // A21 is asked after the restart; the lone top-level node is never asked
        assert_eq!(port.asked, vec!["A01", "A21"]);
        assert!(tree.check_parent_links().is_empty());
    }

    #[test]
    fn test_sibling_merge_ignores_unknown_sibling() {
        let mut tree = food_tree();
        let before = tree.clone();
        let mut port = ScriptedPort::default();
        port.merges.insert("A01".into(), merge_with("B99"));

        let report = run_pass(&mut tree, &Pass::SiblingMerge(MergeStrategy::underscore()), &mut port);

        assert!(!report.changed());
        assert_eq!(tree, before);
    }

    #[test]
    fn test_sibling_merge_failure_is_counted() {
        let mut tree = food_tree();
        tree.update_structure(|roots| {
            if let Some(a) = roots.get_mut("A") {
                a.children.insert("A01_A23".into(), CategoryNode::new("Already merged", 12));
            }
        });
        tree.add_parent_codes();
        let before = tree.clone();
        let mut port = ScriptedPort::default();
        port.merges.insert("A01".into(), merge_with("A23"));

        let report = run_pass(&mut tree, &Pass::SiblingMerge(MergeStrategy::underscore()), &mut port);

        assert_eq!(report.failures, 1);
        assert!(report.merges.is_empty());
        assert_eq!(tree, before);
    }

    #[test]
    fn test_sibling_merge_remove_keeps_parent() {
        let mut tree = food_tree();
        let mut port = ScriptedPort::default();
        port.merges.insert("A01".into(), Decision::Remove);

        let report = run_pass(&mut tree, &Pass::SiblingMerge(MergeStrategy::underscore()), &mut port);

        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.removed[0].code, "A01");
        assert!(report.removed[0].cascaded.is_empty());
        assert_eq!(child_keys(&tree, &["A"]), vec!["A21", "A23"]);
    }

    #[test]
    fn test_sibling_merge_stops_level_without_siblings() {
        let mut roots = Children::new();
        roots.insert(
            "A".into(),
            CategoryNode::new("Only root", 5)
                .with_threshold(9)
                .with_child("A01", CategoryNode::new("Only child", 5).with_threshold(9)),
        );
        let mut tree = Taxonomy::new(roots);
        tree.add_parent_codes();
        let mut port = ScriptedPort::default();

        let report = run_pass(&mut tree, &Pass::SiblingMerge(MergeStrategy::underscore()), &mut port);

        assert_eq!(report.decisions, 0);
        assert!(port.asked.is_empty());
    }

    #[test]
    fn test_relevance_pass_cascades_through_top_level() {
        let mut tree = food_tree();
        tree.update_structure(|roots| {
            roots.insert(
                "X".into(),
                CategoryNode::new("Unrelated", 1).with_child("X1", CategoryNode::new("Noise", 1)),
            );
        });
        tree.add_parent_codes();
        let mut port = ScriptedPort::default();
        port.relevance.insert("X1".into(), Decision::Remove);
        port.relevance.insert("A21".into(), Decision::Remove);

        let report = run_pass(&mut tree, &Pass::Relevance, &mut port);

        assert!(!tree.roots().contains_key("X"));
        assert_eq!(child_keys(&tree, &["A"]), vec!["A01", "A23"]);
        let x1 = report.removed.iter().find(|g| g.code == "X1").unwrap();
        assert_eq!(x1.cascaded, vec!["X"]);
        assert_eq!(x1.label, "Noise");
    }

    #[test]
    fn test_relabel_pass() {
        let mut tree = food_tree();
        let mut port = ScriptedPort::default();
        port.proposals.insert("A21".into(), LabelProposal { is_new: true, label: "Bakery".into() });
        port.proposals.insert("A23".into(), LabelProposal { is_new: false, label: "Food stuff".into() });

        let report = run_pass(&mut tree, &Pass::Relabel, &mut port);

        assert_eq!(report.relabeled.len(), 1);
        assert_eq!(tree.roots()["A"].children["A21"].label, "Bakery");
        assert_eq!(tree.roots()["A"].children["A23"].label, "Foods");
    }

    #[test]
    fn test_parent_collapse_pass() {
        let mut roots = Children::new();
        roots.insert(
            "A".into(),
            CategoryNode::new("Human necessities", 10)
                .with_child(
                    "A01",
                    CategoryNode::new("Agriculture", 6)
                        .with_child("A01B", CategoryNode::new("Soil", 1).with_threshold(4))
                        .with_child("A01C", CategoryNode::new("Planting", 5)),
                )
                .with_child("A21", CategoryNode::new("Baking", 4).with_threshold(2)),
        );
        roots.insert("B".into(), CategoryNode::new("Operations", 1));
        let mut tree = Taxonomy::new(roots);
        tree.add_parent_codes();

        let report = run_pass(&mut tree, &Pass::ParentCollapse, &mut RulePort::default());

        assert_eq!(child_keys(&tree, &[]), vec!["A_A21", "B"]);
        assert_eq!(child_keys(&tree, &["A_A21"]), vec!["A01_A01B"]);
        assert_eq!(child_keys(&tree, &["A_A21", "A01_A01B"]), vec!["A01C"]);
        let collapsed = &tree.roots()["A_A21"].children["A01_A01B"];
        assert_eq!(collapsed.count, 6);
        assert_eq!(collapsed.threshold, Some(4));
        assert_eq!(report.merges.len(), 2);
        assert!(tree.check_parent_links().is_empty());
    }

    #[test]
    fn test_parent_collapse_stays_in_its_subtree() {
        let mut roots = Children::new();
        roots.insert(
            "T".into(),
            CategoryNode::new("Top", 125)
                .with_child(
                    "P1",
                    CategoryNode::new("First", 75)
                        .with_child("X", CategoryNode::new("Shared code, first", 40))
                        .with_child("L", CategoryNode::new("Small", 5))
                        .with_child("K", CategoryNode::new("Kept", 30)),
                )
                .with_child(
                    "P2",
                    CategoryNode::new("Second", 50)
                        .with_child("X", CategoryNode::new("Shared code, second", 1))
                        .with_child("M", CategoryNode::new("Large", 49)),
                ),
        );
        let mut tree = Taxonomy::new(roots);
        tree.add_parent_codes();

        let report = run_pass(&mut tree, &Pass::ParentCollapse, &mut RulePort::default());

        assert_eq!(child_keys(&tree, &["T"]), vec!["P1_L", "P2_X"]);
        assert_eq!(child_keys(&tree, &["T", "P1_L"]), vec!["K", "X"]);
        assert_eq!(child_keys(&tree, &["T", "P2_X"]), vec!["M"]);
        assert_eq!(tree.roots()["T"].children["P1_L"].children["X"].count, 40);
        assert_eq!(report.merges.len(), 2);
        assert_eq!(report.merges[1].members, vec!["P2", "X"]);
        assert_eq!(report.failures, 0);
        assert!(tree.check_parent_links().is_empty());
    }

    #[test]
    fn test_sibling_merge_with_code_repeated_elsewhere() {
        let mut roots = Children::new();
        roots.insert(
            "R1".into(),
            CategoryNode::new("First root", 40)
                .with_child("X", CategoryNode::new("Shared code, first", 10).with_threshold(0))
                .with_child("Z", CategoryNode::new("Other", 30).with_threshold(0)),
        );
        roots.insert(
            "R2".into(),
            CategoryNode::new("Second root", 20)
                .with_child("X", CategoryNode::new("Shared code, second", 1).with_threshold(5))
                .with_child("Y", CategoryNode::new("Neighbour", 19).with_threshold(5)),
        );
        let mut tree = Taxonomy::new(roots);
        tree.add_parent_codes();
        let mut port = ScriptedPort::default();
        port.merges.insert("X".into(), merge_with("Y"));

        let report = run_pass(&mut tree, &Pass::SiblingMerge(MergeStrategy::underscore()), &mut port);

        assert_eq!(report.failures, 0);
        assert_eq!(report.merges.len(), 1);
        assert_eq!(child_keys(&tree, &["R1"]), vec!["X", "Z"]);
        assert_eq!(child_keys(&tree, &["R2"]), vec!["X_Y"]);
        assert_eq!(tree.roots()["R2"].children["X_Y"].count, 20);
        assert!(tree.check_parent_links().is_empty());
    }

    #[test]
    fn test_single_child_merge_with_code_repeated_elsewhere() {
        let mut roots = Children::new();
        roots.insert(
            "A".into(),
            CategoryNode::new("Top", 9)
                .with_child(
                    "P",
                    CategoryNode::new("Branch", 4)
                        .with_child("C", CategoryNode::new("Branch leaf", 2))
                        .with_child("D", CategoryNode::new("Branch leaf", 2)),
                )
                .with_child("Q", CategoryNode::new("Thin", 5).with_child("C", CategoryNode::new("Lone", 5))),
        );
        let mut tree = Taxonomy::new(roots);
        tree.add_parent_codes();

        let merged = merge_single_child_nodes(&mut tree);

        assert_eq!(merged, vec!["Q_C"]);
        assert_eq!(child_keys(&tree, &["A"]), vec!["P", "Q_C"]);
        assert_eq!(child_keys(&tree, &["A", "P"]), vec!["C", "D"]);
        assert!(tree.check_parent_links().is_empty());
    }

    #[test]
    fn test_merge_single_child_nodes() {
        let mut roots = Children::new();
        roots.insert(
            "A".into(),
            CategoryNode::new("Top", 4).with_child(
                "A01",
                CategoryNode::new("Mid", 4).with_child(
                    "A01B",
                    CategoryNode::new("Low", 4).with_child("A01B1", CategoryNode::new("Leaf", 4)),
                ),
            ),
        );
        let mut tree = Taxonomy::new(roots);
        tree.add_parent_codes();

        let merged = merge_single_child_nodes(&mut tree);

        assert_eq!(merged, vec!["A01_A01B"]);
        assert_eq!(child_keys(&tree, &["A"]), vec!["A01_A01B"]);
        assert_eq!(child_keys(&tree, &["A", "A01_A01B"]), vec!["A01B1"]);
        assert_eq!(tree.roots()["A"].children["A01_A01B"].label, "Mid");
        assert!(tree.check_parent_links().is_empty());
    }
}
