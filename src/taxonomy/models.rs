use crate::error::Result;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

/// Children of a node, keyed by code. Keys are unique within one mapping.
pub type Children = BTreeMap<String, CategoryNode>;

/// Codes from the top level down to a node (inclusive). The empty path is the root set.
pub type NodePath = Vec<String>;

/// One category in the taxonomy.
///
/// `count` is carried forward through merges rather than recomputed from
/// leaves, so an internal node's count is the sum of everything ever merged
/// into it, not necessarily the live sum of its children.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryNode {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sibling_threshold: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level_threshold: Option<u64>,
    /// Code of the owning node; `None` for top-level nodes. Lookup only, never ownership.
    #[serde(
        default,
        deserialize_with = "deserialize_parent_code",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_code: Option<String>,
    #[serde(default)]
    pub children: Children,
}

/// Snapshots written by older tools use `""` (or null) for top-level nodes.
fn deserialize_parent_code<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|code| !code.is_empty()))
}

impl CategoryNode {
    pub fn new(label: impl Into<String>, count: u64) -> Self {
        Self {
            label: label.into(),
            count,
            ..Default::default()
        }
    }

    /// Builder used by importers and tests. Does not touch `parent_code`;
    /// call [`Taxonomy::add_parent_codes`] once the tree is assembled.
    pub fn with_child(mut self, code: impl Into<String>, child: CategoryNode) -> Self {
        self.children.insert(code.into(), child);
        self
    }

    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent_code.as_deref()
    }
}

/// The whole tree: the top-level mapping plus a code index.
///
/// The index maps each code to every path that owns a node with that code,
/// in DFS preorder, so lookups give the same first match a full recursive
/// scan would. It is rebuilt after every structural mutation.
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    roots: Children,
    index: HashMap<String, Vec<NodePath>>,
}

impl Taxonomy {
    pub fn new(roots: Children) -> Self {
        let mut taxonomy = Self {
            roots,
            index: HashMap::new(),
        };
        taxonomy.reindex();
        taxonomy
    }

    pub fn roots(&self) -> &Children {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Total number of nodes at every depth.
    pub fn node_count(&self) -> usize {
        self.index.values().map(Vec::len).sum()
    }

    /// Rebuild the code index from the current structure.
    pub fn reindex(&mut self) {
        self.index.clear();
        let mut path = Vec::new();
        index_level(&self.roots, &mut path, &mut self.index);
    }

    /// Run a structural mutation against the root mapping and reindex afterwards.
    pub fn update_structure<R>(&mut self, mutate: impl FnOnce(&mut Children) -> R) -> R {
        let result = mutate(&mut self.roots);
        self.reindex();
        result
    }

    /// Mutable access for in-place field updates (labels, thresholds).
    /// Callers must not add, remove or rename nodes through this.
    pub(crate) fn roots_mut_fields(&mut self) -> &mut Children {
        &mut self.roots
    }

    pub(crate) fn index_paths(&self, code: &str) -> &[NodePath] {
        self.index.get(code).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Rewrite every `parent_code` from the actual structure.
    pub fn add_parent_codes(&mut self) {
        fn assign(children: &mut Children, parent: Option<&str>) {
            for (code, node) in children.iter_mut() {
                node.parent_code = parent.map(str::to_string);
                assign(&mut node.children, Some(code));
            }
        }
        assign(&mut self.roots, None);
    }

    /// Codes (as paths joined by `/`) whose `parent_code` does not name their actual owner.
    pub fn check_parent_links(&self) -> Vec<String> {
        fn walk(children: &Children, owner: Option<&str>, path: &mut Vec<String>, bad: &mut Vec<String>) {
            for (code, node) in children {
                path.push(code.clone());
                if node.parent() != owner {
                    bad.push(path.join("/"));
                }
                walk(&node.children, Some(code), path, bad);
                path.pop();
            }
        }
        let mut bad = Vec::new();
        walk(&self.roots, None, &mut Vec::new(), &mut bad);
        bad
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a tree snapshot from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Write a tree snapshot, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}

fn index_level(children: &Children, path: &mut NodePath, index: &mut HashMap<String, Vec<NodePath>>) {
    for (code, node) in children {
        path.push(code.clone());
        index.entry(code.clone()).or_default().push(path.clone());
        index_level(&node.children, path, index);
        path.pop();
    }
}

impl PartialEq for Taxonomy {
    fn eq(&self, other: &Self) -> bool {
        self.roots == other.roots
    }
}

impl From<Children> for Taxonomy {
    fn from(roots: Children) -> Self {
        Taxonomy::new(roots)
    }
}

impl Serialize for Taxonomy {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.roots.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Taxonomy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let roots = Children::deserialize(deserializer)?;
        Ok(Taxonomy::new(roots))
    }
}
