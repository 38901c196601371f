//! Decision port: who decides whether a candidate is merged, removed or relabeled.
//!
//! The engine never talks to a model directly. It builds a [`LabelContext`]
//! for the candidate, hands it to a [`DecisionPort`] and applies the answer.
//! Replies from text models go through the parsers in this module; anything
//! that does not parse is treated as "no action".

use crate::taxonomy::Children;
use crate::utils::{clean_label, manual_merge_label, strip_code_fence};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

// ============================================================================
// Types
// ============================================================================

/// Everything a decision source sees about one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelContext {
    pub parent_label: Option<String>,
    pub candidate_code: String,
    pub candidate_label: String,
    /// Codes of the other nodes at the candidate's level, in level order.
    pub sibling_codes: Vec<String>,
    pub sibling_labels: Vec<String>,
    pub children_labels: Vec<String>,
}

impl LabelContext {
    /// Snapshot the candidate and its current siblings. `None` when the
    /// candidate is no longer part of `level`.
    pub fn collect(level: &Children, candidate_code: &str, parent_label: Option<&str>) -> Option<Self> {
        let candidate = level.get(candidate_code)?;
        let (sibling_codes, sibling_labels): (Vec<String>, Vec<String>) = level
            .iter()
            .filter(|(code, _)| code.as_str() != candidate_code)
            .map(|(code, node)| (code.clone(), node.label.clone()))
            .unzip();

        Some(Self {
            parent_label: parent_label.map(str::to_string),
            candidate_code: candidate_code.to_string(),
            candidate_label: candidate.label.clone(),
            sibling_codes,
            sibling_labels,
            children_labels: candidate.children.values().map(|c| c.label.clone()).collect(),
        })
    }

    pub fn has_siblings(&self) -> bool {
        !self.sibling_codes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeChoice {
    pub sibling_code: String,
    pub sibling_label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    NoAction,
    Merge(MergeChoice),
    Remove,
}

impl Decision {
    /// Downgrade a merge choice that names a code outside the candidate's
    /// current siblings to [`Decision::NoAction`].
    pub fn validated(self, ctx: &LabelContext) -> Decision {
        match self {
            Decision::Merge(choice) if !ctx.sibling_codes.contains(&choice.sibling_code) => {
                log::warn!(
                    "Ignoring merge of {} with unknown sibling '{}'",
                    ctx.candidate_code,
                    choice.sibling_code
                );
                Decision::NoAction
            }
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelProposal {
    pub is_new: bool,
    pub label: String,
}

/// Input for naming the node produced by a sibling merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeLabelRequest {
    pub candidate_code: String,
    pub candidate_label: String,
    pub sibling_code: String,
    pub sibling_label: String,
    pub parent_label: Option<String>,
}

impl MergeLabelRequest {
    pub fn new(ctx: &LabelContext, choice: &MergeChoice, sibling_label: &str) -> Self {
        Self {
            candidate_code: ctx.candidate_code.clone(),
            candidate_label: ctx.candidate_label.clone(),
            sibling_code: choice.sibling_code.clone(),
            sibling_label: sibling_label.to_string(),
            parent_label: ctx.parent_label.clone(),
        }
    }
}

/// A source of merge/removal/label decisions.
///
/// Calls block. Implementations must answer identically for identical input.
pub trait DecisionPort {
    /// Should the candidate be merged with one of its siblings (or removed)?
    fn decide_merge(&mut self, ctx: &LabelContext) -> Decision;

    /// Does the candidate belong in the taxonomy at all?
    fn decide_relevance(&mut self, ctx: &LabelContext) -> Decision;

    /// Label for the node produced by merging the two categories.
    fn merged_label(&mut self, request: &MergeLabelRequest) -> String;

    /// Optional better label for the candidate.
    fn propose_label(&mut self, ctx: &LabelContext) -> Option<LabelProposal>;

    /// Persist whatever the port keeps between runs.
    fn flush(&mut self) -> crate::error::Result<()> {
        Ok(())
    }
}

impl<P: DecisionPort + ?Sized> DecisionPort for Box<P> {
    fn decide_merge(&mut self, ctx: &LabelContext) -> Decision {
        (**self).decide_merge(ctx)
    }

    fn decide_relevance(&mut self, ctx: &LabelContext) -> Decision {
        (**self).decide_relevance(ctx)
    }

    fn merged_label(&mut self, request: &MergeLabelRequest) -> String {
        (**self).merged_label(request)
    }

    fn propose_label(&mut self, ctx: &LabelContext) -> Option<LabelProposal> {
        (**self).propose_label(ctx)
    }

    fn flush(&mut self) -> crate::error::Result<()> {
        (**self).flush()
    }
}

// ============================================================================
// Reply parsing
// ============================================================================

static SIBLING_CODE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["']sibling_code["']\s*:\s*(?:'([^']*)'|"([^"]*)")"#).unwrap()
});

static SIBLING_LABEL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["']sibling_label["']\s*:\s*(?:'([^']*)'|"([^"]*)")"#).unwrap()
});

static LABEL_PROPOSAL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*(true|false)\s*,\s*(.+?)\s*$").unwrap()
});

fn capture_quoted(regex: &Regex, text: &str) -> Option<String> {
    let caps = regex.captures(text)?;
    caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str().to_string())
}

/// Parse a merge/relevance reply.
///
/// Accepts `none` (any case, optionally quoted), `remove` (any case) or a
/// mapping with both `sibling_code` and `sibling_label` in JSON or
/// Python-literal quoting, optionally wrapped in a markdown code fence. The
/// mapping must be the whole reply.
pub fn parse_decision_reply(reply: &str) -> Result<Decision, String> {
    let text = strip_code_fence(reply);
    let bare = clean_label(&text);
    let bare = bare.trim_end_matches('.');

    if bare.eq_ignore_ascii_case("none") {
        return Ok(Decision::NoAction);
    }
    if bare.eq_ignore_ascii_case("remove") {
        return Ok(Decision::Remove);
    }

    let unrecognized = || format!("Unrecognized decision reply: {}", crate::utils::safe_truncate(text.trim(), 120));
    let mapping = text.trim();
    if !(mapping.starts_with('{') && mapping.ends_with('}')) {
        return Err(unrecognized());
    }

    let choice = match serde_json::from_str::<MergeChoice>(mapping) {
        Ok(choice) => choice,
        Err(_) => {
            let code = capture_quoted(&SIBLING_CODE_REGEX, mapping).ok_or_else(unrecognized)?;
            let label = capture_quoted(&SIBLING_LABEL_REGEX, mapping).ok_or_else(unrecognized)?;
            MergeChoice { sibling_code: code, sibling_label: label }
        }
    };
    Ok(Decision::Merge(MergeChoice {
        sibling_code: choice.sibling_code.trim().to_string(),
        sibling_label: choice.sibling_label.trim().to_string(),
    }))
}

/// Parse a `True, <label>` / `False, <label>` reply.
pub fn parse_label_proposal(reply: &str) -> Result<LabelProposal, String> {
    let text = strip_code_fence(reply);
    let caps = LABEL_PROPOSAL_REGEX
        .captures(&text)
        .ok_or_else(|| format!("Unrecognized label proposal: {}", crate::utils::safe_truncate(text.trim(), 120)))?;
    let is_new = caps[1].eq_ignore_ascii_case("true");
    let label = clean_label(&caps[2]);
    if label.is_empty() {
        return Err("Empty label in proposal".to_string());
    }
    Ok(LabelProposal { is_new, label })
}

// ============================================================================
// Rule-based port
// ============================================================================

/// Offline, deterministic decision source.
///
/// Merges a candidate with the sibling whose label shares the most words
/// with it (Jaccard overlap). Never removes, never relabels.
#[derive(Debug, Clone)]
pub struct RulePort {
    /// Minimum overlap for a merge. At 0.0 every candidate with a sibling merges.
    pub min_overlap: f64,
}

impl Default for RulePort {
    fn default() -> Self {
        Self { min_overlap: 0.0 }
    }
}

fn label_words(label: &str) -> HashSet<String> {
    label
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(|w| w.to_lowercase())
        .collect()
}

pub fn word_overlap(a: &str, b: &str) -> f64 {
    let a = label_words(a);
    let b = label_words(b);
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

impl RulePort {
    pub fn new(min_overlap: f64) -> Self {
        Self { min_overlap }
    }
}

impl DecisionPort for RulePort {
    fn decide_merge(&mut self, ctx: &LabelContext) -> Decision {
        let mut best: Option<(usize, f64)> = None;
        for (i, label) in ctx.sibling_labels.iter().enumerate() {
            let score = word_overlap(&ctx.candidate_label, label);
            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((i, score));
            }
        }
        match best {
            Some((i, score)) if score >= self.min_overlap => Decision::Merge(MergeChoice {
                sibling_code: ctx.sibling_codes[i].clone(),
                sibling_label: ctx.sibling_labels[i].clone(),
            }),
            _ => Decision::NoAction,
        }
    }

    fn decide_relevance(&mut self, _ctx: &LabelContext) -> Decision {
        Decision::NoAction
    }

    fn merged_label(&mut self, request: &MergeLabelRequest) -> String {
        manual_merge_label(&request.candidate_label, &request.sibling_label)
    }

    fn propose_label(&mut self, _ctx: &LabelContext) -> Option<LabelProposal> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::CategoryNode;

    fn level() -> Children {
        let mut level = Children::new();
        level.insert("A01".into(), CategoryNode::new("Agriculture; forestry", 5).with_child("A01B", CategoryNode::new("Soil working", 5)));
        level.insert("A21".into(), CategoryNode::new("Baking", 3));
        level.insert("A23".into(), CategoryNode::new("Foods or foodstuffs", 8));
        level
    }

    fn merge(code: &str, label: &str) -> Decision {
        Decision::Merge(MergeChoice { sibling_code: code.into(), sibling_label: label.into() })
    }

    #[test]
    fn test_collect_context() {
        let ctx = LabelContext::collect(&level(), "A01", Some("Human necessities")).unwrap();
        assert_eq!(ctx.candidate_label, "Agriculture; forestry");
        assert_eq!(ctx.sibling_codes, vec!["A21", "A23"]);
        assert_eq!(ctx.sibling_labels, vec!["Baking", "Foods or foodstuffs"]);
        assert_eq!(ctx.children_labels, vec!["Soil working"]);
        assert_eq!(ctx.parent_label.as_deref(), Some("Human necessities"));
        assert!(LabelContext::collect(&level(), "B01", None).is_none());
    }

    #[test]
    fn test_parse_none_variants() {
        for reply in ["None", "none", "'None'", "\"none\"", "  NONE.  "] {
            assert_eq!(parse_decision_reply(reply).unwrap(), Decision::NoAction, "{}", reply);
        }
    }

    #[test]
    fn test_parse_remove() {
        assert_eq!(parse_decision_reply("Remove").unwrap(), Decision::Remove);
        assert_eq!(parse_decision_reply("'remove'").unwrap(), Decision::Remove);
    }

    #[test]
    fn test_parse_json_choice() {
        let reply = r#"{"sibling_code": "A23 ", "sibling_label": "Foods or foodstuffs "}"#;
        assert_eq!(parse_decision_reply(reply).unwrap(), merge("A23", "Foods or foodstuffs"));
    }

    #[test]
    fn test_parse_python_literal_in_fence() {
        let reply = "```python\n{'sibling_code': 'A21', 'sibling_label': \"Baker's trade\"}\n```";
        assert_eq!(parse_decision_reply(reply).unwrap(), merge("A21", "Baker's trade"));
    }

    #[test]
    fn test_parse_garbage_is_error() {
        assert!(parse_decision_reply("I think they are similar").is_err());
        assert!(parse_decision_reply("").is_err());
    }

    #[test]
    fn test_parse_mapping_must_be_whole_reply() {
        let reply = "I would keep it separate; {'sibling_code': 'A23', 'sibling_label': 'Foods'} is unrelated";
        assert!(parse_decision_reply(reply).is_err());
        assert!(parse_decision_reply("Sure: {\"sibling_code\": \"A23\", \"sibling_label\": \"Foods\"}").is_err());
    }

    #[test]
    fn test_parse_mapping_needs_both_keys() {
        assert!(parse_decision_reply(r#"{"sibling_code": "A23"}"#).is_err());
        assert!(parse_decision_reply("{'sibling_code': 'A23'}").is_err());
        assert!(parse_decision_reply("{'sibling_label': 'Foods'}").is_err());
    }

    #[test]
    fn test_validated_rejects_unknown_sibling() {
        let ctx = LabelContext::collect(&level(), "A21", None).unwrap();
        assert_eq!(merge("A99", "x").validated(&ctx), Decision::NoAction);
        assert_eq!(merge("A23", "Foods").validated(&ctx), merge("A23", "Foods"));
        assert_eq!(Decision::Remove.validated(&ctx), Decision::Remove);
    }

    #[test]
    fn test_parse_label_proposal() {
        let p = parse_label_proposal("True, 'Food science'").unwrap();
        assert_eq!(p, LabelProposal { is_new: true, label: "Food science".into() });
        let p = parse_label_proposal("false,Baking").unwrap();
        assert!(!p.is_new);
        assert_eq!(p.label, "Baking");
        assert!(parse_label_proposal("Food science").is_err());
        assert!(parse_label_proposal("True, ''").is_err());
    }

    #[test]
    fn test_rule_port_prefers_overlap() {
        let mut level = level();
        level.insert("A22".into(), CategoryNode::new("Butchering; meat treatment", 4));
        level.insert("A24".into(), CategoryNode::new("Tobacco; cigars", 2));
        level.get_mut("A21").unwrap().label = "Meat baking".into();

        let ctx = LabelContext::collect(&level, "A21", None).unwrap();
        let mut port = RulePort::default();
        assert_eq!(port.decide_merge(&ctx), merge("A22", "Butchering; meat treatment"));
        assert_eq!(port.decide_relevance(&ctx), Decision::NoAction);
        assert!(port.propose_label(&ctx).is_none());
    }

    #[test]
    fn test_rule_port_min_overlap() {
        let ctx = LabelContext::collect(&level(), "A21", None).unwrap();
        let mut port = RulePort::new(0.5);
        assert_eq!(port.decide_merge(&ctx), Decision::NoAction);
    }

    #[test]
    fn test_rule_port_without_siblings() {
        let mut single = Children::new();
        single.insert("A".into(), CategoryNode::new("Only", 1));
        let ctx = LabelContext::collect(&single, "A", None).unwrap();
        assert_eq!(RulePort::default().decide_merge(&ctx), Decision::NoAction);
    }

    #[test]
    fn test_rule_port_merged_label() {
        let ctx = LabelContext::collect(&level(), "A21", None).unwrap();
        let choice = merge("A23", "Foods or foodstuffs");
        let Decision::Merge(choice) = choice else { unreachable!() };
        let request = MergeLabelRequest::new(&ctx, &choice, "Foods or foodstuffs");
        assert_eq!(RulePort::default().merged_label(&request), "Baking; Foods or foodstuffs");
    }
}
