//! Prompt templates for text-model decision sources.
//!
//! Each template has a namespace, which is also the name of its cache file.

use crate::decision::{LabelContext, MergeLabelRequest};

pub const MERGE_DECISION: &str = "merge_decision";
pub const MERGE_LABEL: &str = "representative_label_for_merge";
pub const RELEVANCE_DECISION: &str = "decision_on_meta_characteristics";
pub const LABEL_PROPOSAL: &str = "representative_label";

/// Render a list the way the model sees it: `['a', 'b']`.
fn list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| format!("'{}'", s)).collect();
    format!("[{}]", quoted.join(", "))
}

fn parent(parent_label: &Option<String>) -> &str {
    parent_label.as_deref().unwrap_or("None")
}

pub fn merge_decision(ctx: &LabelContext) -> String {
    format!(
        r#"Your task is to develop a taxonomy of innovations, using knowledge fields as the meta-characteristic.

### When to merge
- Merge if the candidate category overlaps in knowledge, meaning or area with one of its siblings.
- Merging should reduce redundancy and give a more abstract, better organized structure.
- Keep the candidate separate if it is a distinctly different field from every sibling.

### Output format
- To merge with the most similar sibling, answer with a dictionary only:
  {{"sibling_code": "<code of closest sibling>", "sibling_label": "<label of closest sibling>"}}
- To keep the candidate separate, answer with the text None.
Do not add any explanation.

### Input
Parent Label: {parent}
Candidate Label: {candidate}
Sibling Labels: {labels}
Sibling codes: {codes}
"#,
        parent = parent(&ctx.parent_label),
        candidate = ctx.candidate_label,
        labels = list(&ctx.sibling_labels),
        codes = list(&ctx.sibling_codes),
    )
}

pub fn merge_label(request: &MergeLabelRequest) -> String {
    format!(
        r#"Your task is to develop a taxonomy of innovations, using knowledge fields as the meta-characteristic.
The following two categories are merged into one, more abstract class.

- Candidate Code: {candidate_code}
- Candidate label: {candidate_label}
- Sibling Code: {sibling_code}
- Sibling label: {sibling_label}
- Parent Label: {parent} (not provided for first-level classes)

Suggest a representative label for the merged category, at most 10 words,
reflecting the combined knowledge of both classes.
Output only the label.
"#,
        candidate_code = request.candidate_code,
        candidate_label = request.candidate_label,
        sibling_code = request.sibling_code,
        sibling_label = request.sibling_label,
        parent = parent(&request.parent_label),
    )
}

pub fn relevance_decision(ctx: &LabelContext) -> String {
    format!(
        r#"Your task is to refine a taxonomy of innovations, using knowledge fields as the meta-characteristic.
Retain the category if it aligns with the meta-characteristic, remove it if it does not.

### Output format
- To retain the category, answer with the text None.
- To remove the category, answer with the text Remove.
Do not add any explanation.

### Input
Parent Label: {parent}
Candidate Label: {candidate}
Sibling Labels: {labels}
Sibling codes: {codes}
"#,
        parent = parent(&ctx.parent_label),
        candidate = ctx.candidate_label,
        labels = list(&ctx.sibling_labels),
        codes = list(&ctx.sibling_codes),
    )
}

pub fn label_proposal(ctx: &LabelContext) -> String {
    format!(
        r#"Your task is to refine a taxonomy of innovations, using knowledge fields as the meta-characteristic.
Propose a representative label for the category below. If the current label fits and has at most
15 words, you may return it unchanged.

- Candidate label: {candidate}
- Sibling labels: {labels}
- Parent Label: {parent} (not provided for first-level classes)

The label must have at most 15 words, must not mention the parent or the hierarchy,
and must not contain commas.

### Output format
- A new label: True, <label>
- The current label: False, <label>
Output nothing else.
"#,
        candidate = ctx.candidate_label,
        labels = list(&ctx.sibling_labels),
        parent = parent(&ctx.parent_label),
    )
}
