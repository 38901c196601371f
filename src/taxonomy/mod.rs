//! The category tree and its structural operations.

pub mod accessor;
pub mod merge;
pub mod models;
pub mod remove;

pub use merge::{
    merge_many, merge_siblings, merge_siblings_at, merge_with_parent, merge_with_parent_at, MergeStrategy,
    ThresholdPolicy,
};
pub use models::{CategoryNode, Children, NodePath, Taxonomy};
pub use remove::{remove_at, remove_node, CascadePolicy};
