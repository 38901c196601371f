//! Flat three-level view of the taxonomy.
//!
//! Each row is one path through the first three levels. A node at depth 0-2
//! without children ends its own row; a node at depth 2 with children
//! contributes one row per child, shown in the third column. The row count is
//! the size measure the convergence driver works against.

use crate::error::Result;
use crate::taxonomy::{CategoryNode, Taxonomy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyRow {
    pub code0: String,
    pub label0: String,
    pub count0: u64,
    pub code1: String,
    pub label1: String,
    pub count1: u64,
    pub code2: String,
    pub label2: String,
    pub count2: u64,
}

impl HierarchyRow {
    fn set(&mut self, column: usize, code: &str, node: &CategoryNode) {
        let (c, l, n) = match column {
            0 => (&mut self.code0, &mut self.label0, &mut self.count0),
            1 => (&mut self.code1, &mut self.label1, &mut self.count1),
            _ => (&mut self.code2, &mut self.label2, &mut self.count2),
        };
        *c = code.to_string();
        *l = node.label.clone();
        *n = node.count;
    }
}

pub fn hierarchy_rows(tree: &Taxonomy) -> Vec<HierarchyRow> {
    fn visit(code: &str, node: &CategoryNode, depth: usize, row: &HierarchyRow, rows: &mut Vec<HierarchyRow>) {
        let mut row = row.clone();
        row.set(depth, code, node);

        if node.is_leaf() {
            rows.push(row);
        } else if depth == 2 {
            for (child_code, child) in &node.children {
                let mut child_row = row.clone();
                child_row.set(2, child_code, child);
                rows.push(child_row);
            }
        } else {
            for (child_code, child) in &node.children {
                visit(child_code, child, depth + 1, &row, rows);
            }
        }
    }

    let mut rows = Vec::new();
    for (code, node) in tree.roots() {
        visit(code, node, 0, &HierarchyRow::default(), &mut rows);
    }
    rows
}

/// Number of rows without building them.
pub fn row_count(tree: &Taxonomy) -> usize {
    fn count(node: &CategoryNode, depth: usize) -> usize {
        match (node.is_leaf(), depth) {
            (true, _) => 1,
            (false, 2) => node.children.len(),
            (false, _) => node.children.values().map(|c| count(c, depth + 1)).sum(),
        }
    }
    tree.roots().values().map(|n| count(n, 0)).sum()
}

pub fn write_rows(rows: &[HierarchyRow], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(rows)?)?;
    Ok(())
}
