pub mod ai_client;
pub mod candidates;
pub mod convergence;
pub mod cpc_import;
pub mod decision;
pub mod error;
pub mod prompt_cache;
pub mod prompts;
pub mod rows;
pub mod settings;
pub mod taxonomy;
pub mod thresholds;
pub mod utils;
pub mod walker;

pub use error::{Result, TaxonomyError};
pub use taxonomy::{CategoryNode, Taxonomy};
