//! Code lookups over the category tree.
//!
//! Lookups are code-exact: two nodes may share a label, and a merged node's
//! code is a composite of its constituents, so labels are never used to
//! locate anything.

use super::models::{CategoryNode, Children, NodePath, Taxonomy};

impl Taxonomy {
    /// Locate a node by code, optionally constrained to a recorded parent.
    ///
    /// Returns the path of the first match in DFS preorder. With
    /// `parent_code`, a node only matches when its own `parent_code` equals it
    /// (`Some("")` asks for a top-level node). The position of the node is
    /// never checked against `parent_code`; callers rely on parent pointers
    /// being correct.
    pub fn find_by_key(&self, key: &str, parent_code: Option<&str>) -> Option<NodePath> {
        self.index_paths(key)
            .iter()
            .find(|path| match parent_code {
                None => true,
                Some(wanted) => self
                    .get(path)
                    .map(|node| node.parent().unwrap_or("") == wanted)
                    .unwrap_or(false),
            })
            .cloned()
    }

    /// Same as [`find_by_key`](Self::find_by_key) but returns the node itself.
    pub fn find_node(&self, key: &str, parent_code: Option<&str>) -> Option<&CategoryNode> {
        self.find_by_key(key, parent_code).and_then(|path| self.get(&path))
    }

    /// Node at `path`, or `None` for the empty path or a dangling one.
    pub fn get(&self, path: &[String]) -> Option<&CategoryNode> {
        let (last, owner) = path.split_last()?;
        self.children_at(owner)?.get(last)
    }

    pub(crate) fn get_mut(&mut self, path: &[String]) -> Option<&mut CategoryNode> {
        let (first, rest) = path.split_first()?;
        let mut node = self.roots_mut_fields().get_mut(first)?;
        for code in rest {
            node = node.children.get_mut(code)?;
        }
        Some(node)
    }

    /// The children mapping owned by `owner`; the empty path is the root set.
    pub fn children_at(&self, owner: &[String]) -> Option<&Children> {
        let mut level = self.roots();
        for code in owner {
            level = &level.get(code)?.children;
        }
        Some(level)
    }

    /// Parent path of a node path (the path minus its last code).
    pub fn owner_of(path: &[String]) -> &[String] {
        path.split_last().map(|(_, owner)| owner).unwrap_or(&[])
    }

    /// Visit every node in DFS preorder with its path and depth (top level = 0).
    pub fn walk(&self, mut visit: impl FnMut(&[String], &CategoryNode, usize)) {
        fn go(children: &Children, path: &mut NodePath, visit: &mut dyn FnMut(&[String], &CategoryNode, usize)) {
            for (code, node) in children {
                path.push(code.clone());
                let depth = path.len() - 1;
                visit(path.as_slice(), node, depth);
                go(&node.children, path, visit);
                path.pop();
            }
        }
        go(self.roots(), &mut Vec::new(), &mut visit);
    }
}

/// Mutable children mapping at `owner` inside a raw root mapping.
pub(crate) fn children_at_mut<'a>(roots: &'a mut Children, owner: &[String]) -> Option<&'a mut Children> {
    let mut level = roots;
    for code in owner {
        level = &mut level.get_mut(code)?.children;
    }
    Some(level)
}
