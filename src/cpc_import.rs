//! CPC title-file import.
//!
//! Title files have one scheme entry per line: the symbol, two or more
//! whitespace characters, then the title. Only sections (`A`), classes
//! (`A01`) and subclasses (`A01B`) are kept; group symbols are longer and
//! skipped. Text from the first `(` on is a reference list and is dropped.

use crate::error::Result;
use crate::taxonomy::{CategoryNode, Children, Taxonomy};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

static COLUMN_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s{2,}").unwrap());
static REFERENCE_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\(").unwrap());

/// Code -> title for every section, class and subclass line in `text`.
pub fn parse_cpc_titles(text: &str) -> BTreeMap<String, String> {
    let mut titles = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = COLUMN_SPLIT.splitn(line, 2);
        let code = parts.next().unwrap_or("").trim();
        let title = parts.next().unwrap_or("").trim();
        let title = REFERENCE_SPLIT.split(title).next().unwrap_or("").trim();

        if code.is_empty() || code.len() > 4 || !code.is_ascii() {
            continue;
        }
        titles.insert(code.to_string(), title.to_string());
    }
    titles
}

/// Read one title file, or every `.txt` file in a directory (in name order).
pub fn read_cpc_titles(path: &Path) -> Result<BTreeMap<String, String>> {
    if path.is_file() {
        return Ok(parse_cpc_titles(&fs::read_to_string(path)?));
    }

    let mut files: Vec<_> = fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().map(|ext| ext == "txt").unwrap_or(false))
        .collect();
    files.sort();

    let mut titles = BTreeMap::new();
    for file in files {
        log::info!("Processing {:?}...", file.file_name().unwrap_or_default());
        titles.extend(parse_cpc_titles(&fs::read_to_string(&file)?));
    }
    Ok(titles)
}

/// Nest flat codes by shape: section > class > subclass.
///
/// Missing intermediate levels are created with an empty label. Every node
/// gets its `parent_code`.
pub fn nest_codes(titles: &BTreeMap<String, String>) -> Taxonomy {
    fn entry<'a>(level: &'a mut Children, code: &str, titles: &BTreeMap<String, String>) -> &'a mut CategoryNode {
        level
            .entry(code.to_string())
            .or_insert_with(|| CategoryNode::new(titles.get(code).cloned().unwrap_or_default(), 0))
    }

    let mut roots = Children::new();
    for code in titles.keys() {
        match code.len() {
            1 => {
                entry(&mut roots, code, titles);
            }
            3 => {
                let section = entry(&mut roots, &code[..1], titles);
                entry(&mut section.children, code, titles);
            }
            4 => {
                let section = entry(&mut roots, &code[..1], titles);
                let class = entry(&mut section.children, &code[..3], titles);
                entry(&mut class.children, code, titles);
            }
            _ => log::debug!("Skipping code with unexpected shape: {}", code),
        }
    }

    let mut tree = Taxonomy::new(roots);
    tree.add_parent_codes();
    tree
}

pub fn load_counts(path: &Path) -> Result<HashMap<String, u64>> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

/// Set `count` on every node whose code appears in `counts`. Returns the
/// codes that matched no node.
pub fn apply_counts(tree: &mut Taxonomy, counts: &HashMap<String, u64>) -> Vec<String> {
    fn apply(children: &mut Children, counts: &HashMap<String, u64>, seen: &mut Vec<String>) {
        for (code, node) in children.iter_mut() {
            if let Some(&count) = counts.get(code) {
                node.count = count;
                seen.push(code.clone());
            }
            apply(&mut node.children, counts, seen);
        }
    }

    let mut seen = Vec::new();
    apply(tree.roots_mut_fields(), counts, &mut seen);

    let mut unmatched: Vec<String> = counts.keys().filter(|code| !seen.contains(*code)).cloned().collect();
    unmatched.sort();
    if !unmatched.is_empty() {
        log::warn!("{} counted codes are not in the taxonomy", unmatched.len());
    }
    unmatched
}

/// Give every inner node without a count of its own the sum of its children.
pub fn aggregate_counts(tree: &mut Taxonomy) {
    fn aggregate(node: &mut CategoryNode) -> u64 {
        let sum: u64 = node.children.values_mut().map(aggregate).sum();
        if node.count == 0 && !node.children.is_empty() {
            node.count = sum;
        }
        node.count
    }

    for node in tree.roots_mut_fields().values_mut() {
        aggregate(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = "A\t\tHUMAN NECESSITIES\n\
A01  AGRICULTURE; FORESTRY; ANIMAL HUSBANDRY; HUNTING; TRAPPING; FISHING\n\
A01B    SOIL WORKING IN AGRICULTURE OR FORESTRY (making or covering furrows A01C 5/00)\n\
A01B1/00  Hand tools\n\
A21D   TREATMENT OF FLOUR OR DOUGH\n\
\n";

    #[test]
    fn test_parse_titles() {
        let titles = parse_cpc_titles(SAMPLE);
        assert_eq!(titles.len(), 4);
        assert_eq!(titles["A"], "HUMAN NECESSITIES");
        assert_eq!(titles["A01B"], "SOIL WORKING IN AGRICULTURE OR FORESTRY");
        assert!(!titles.contains_key("A01B1/00"));
    }

    #[test]
    fn test_nest_codes_creates_missing_levels() {
        let tree = nest_codes(&parse_cpc_titles(SAMPLE));

        let a = &tree.roots()["A"];
        assert_eq!(a.children.keys().cloned().collect::<Vec<_>>(), vec!["A01", "A21"]);
        assert_eq!(a.children["A21"].label, "");
        assert_eq!(a.children["A21"].children["A21D"].label, "TREATMENT OF FLOUR OR DOUGH");
        assert_eq!(a.children["A01"].children["A01B"].parent(), Some("A01"));
        assert!(tree.check_parent_links().is_empty());
    }

    #[test]
    fn test_counts_apply_and_aggregate() {
        let mut tree = nest_codes(&parse_cpc_titles(SAMPLE));
        let counts: HashMap<String, u64> = [("A01B", 7), ("A21D", 5), ("A21", 9), ("Z99Z", 1)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let unmatched = apply_counts(&mut tree, &counts);
        aggregate_counts(&mut tree);

        assert_eq!(unmatched, vec!["Z99Z"]);
        let a = &tree.roots()["A"];
        assert_eq!(a.children["A01"].count, 7);
        // A21 has its own count
        assert_eq!(a.children["A21"].count, 9);
        assert_eq!(a.count, 16);
    }

    #[test]
    fn test_read_titles_from_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("cpc-section-A.txt"), "A  HUMAN NECESSITIES\nA01  AGRICULTURE\n").unwrap();
        fs::write(dir.path().join("cpc-section-B.txt"), "B  OPERATIONS\n").unwrap();
        fs::write(dir.path().join("notes.md"), "C  IGNORED\n").unwrap();

        let titles = read_cpc_titles(dir.path()).unwrap();
        assert_eq!(titles.keys().cloned().collect::<Vec<_>>(), vec!["A", "A01", "B"]);
    }

    #[test]
    fn test_load_counts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counts.json");
        fs::write(&path, r#"{"A01B": 12, "A21D": 3}"#).unwrap();
        assert_eq!(load_counts(&path).unwrap()["A01B"], 12);
    }
}
