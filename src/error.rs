use thiserror::Error;

pub type Result<T> = std::result::Result<T, TaxonomyError>;

#[derive(Error, Debug)]
pub enum TaxonomyError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Parent {parent} of node {code} not found")]
    ParentNotFound { code: String, parent: String },

    #[error("Sibling {sibling} of node {code} not found")]
    SiblingNotFound { code: String, sibling: String },

    #[error("Nodes {0} and {1} do not share an owner")]
    NotSiblings(String, String),

    #[error("Node {code} is not a child of {parent}")]
    NotChildOf { code: String, parent: String },

    #[error("Merged key {0} already exists among siblings")]
    KeyCollision(String),

    #[error("Top-level node {0} cannot be merged into a parent")]
    TopLevel(String),

    #[error("Invalid merge: {0}")]
    InvalidMerge(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TaxonomyError {
    /// Lookup failures are recoverable: the walker leaves the node alone and moves on.
    pub fn is_lookup_failure(&self) -> bool {
        matches!(
            self,
            TaxonomyError::NodeNotFound(_)
                | TaxonomyError::ParentNotFound { .. }
                | TaxonomyError::SiblingNotFound { .. }
                | TaxonomyError::NotSiblings(..)
                | TaxonomyError::NotChildOf { .. }
        )
    }
}

impl From<reqwest::Error> for TaxonomyError {
    fn from(e: reqwest::Error) -> Self {
        TaxonomyError::Http(e.to_string())
    }
}
