/// Shared utility functions

/// Safely truncate a string at a UTF-8 boundary
pub fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if max_bytes >= s.len() { return s; }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Strip surrounding whitespace, quotes and backticks from a model-proposed label
pub fn clean_label(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '\'' || c == '"' || c == '`')
        .trim()
        .to_string()
}

/// Fallback label for a merge when no model is available: `"a; b"`
pub fn manual_merge_label(candidate_label: &str, sibling_label: &str) -> String {
    let candidate_label = candidate_label.trim();
    let sibling_label = sibling_label.trim();
    match (candidate_label.is_empty(), sibling_label.is_empty()) {
        (true, true) => String::new(),
        (true, false) => sibling_label.to_string(),
        (false, true) => candidate_label.to_string(),
        (false, false) => format!("{}; {}", candidate_label, sibling_label),
    }
}

/// Remove a surrounding markdown code fence, if any
pub fn strip_code_fence(text: &str) -> String {
    let text = text.trim();
    if text.starts_with("```") {
        text.lines()
            .skip(1)
            .take_while(|l| !l.starts_with("```"))
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        text.to_string()
    }
}
