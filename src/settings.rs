//! Settings storage
//!
//! Engine parameters and model credentials in a JSON file under the user's
//! config directory. Every field has a default so partial files load.

use crate::taxonomy::{MergeStrategy, ThresholdPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// z multiplier in `mean + z * stddev` (default: -2.0)
    #[serde(default = "default_z_threshold")]
    pub z_threshold: f64,
    /// Stop refining once the hierarchy has at most this many rows (default: 100)
    #[serde(default = "default_row_floor")]
    pub row_floor: usize,
    /// Merge passes per round before giving up on the round (default: 100)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Refinement rounds before giving up (default: 50)
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(default = "default_merge_separator")]
    pub merge_separator: String,
    #[serde(default = "default_threshold_policy")]
    pub merge_threshold_policy: ThresholdPolicy,
    /// Decision backend: "openai", "anthropic", "ollama" or "rule" (default: "rule")
    #[serde(default = "default_llm_backend")]
    pub llm_backend: String,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    #[serde(default = "default_anthropic_model")]
    pub anthropic_model: String,
    #[serde(default = "default_ollama_model")]
    pub ollama_model: String,
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    /// Prompt cache directory (None = in-memory only)
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Minimum label overlap for the rule backend to merge
    #[serde(default)]
    pub rule_min_overlap: f64,
}

fn default_z_threshold() -> f64 {
    -2.0
}

fn default_row_floor() -> usize {
    100
}

fn default_max_iterations() -> usize {
    100
}

fn default_max_rounds() -> usize {
    50
}

fn default_merge_separator() -> String {
    "_".to_string()
}

fn default_threshold_policy() -> ThresholdPolicy {
    ThresholdPolicy::CarryFirst
}

fn default_llm_backend() -> String {
    "rule".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

fn default_anthropic_model() -> String {
    "claude-haiku-4-5-20251001".to_string()
}

fn default_ollama_model() -> String {
    "qwen2.5:7b".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            z_threshold: default_z_threshold(),
            row_floor: default_row_floor(),
            max_iterations: default_max_iterations(),
            max_rounds: default_max_rounds(),
            merge_separator: default_merge_separator(),
            merge_threshold_policy: default_threshold_policy(),
            llm_backend: default_llm_backend(),
            openai_model: default_openai_model(),
            anthropic_model: default_anthropic_model(),
            ollama_model: default_ollama_model(),
            ollama_url: default_ollama_url(),
            openai_api_key: None,
            anthropic_api_key: None,
            cache_dir: None,
            request_timeout_secs: default_request_timeout(),
            rule_min_overlap: 0.0,
        }
    }
}

/// `<config dir>/taxorefine/settings.json`, falling back to the working directory.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("taxorefine"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("settings.json")
}

impl Settings {
    /// Load settings from disk or create default
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Settings::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                log::warn!("Ignoring unreadable settings file {:?}: {}", path, e);
                Settings::default()
            }),
            Err(_) => Settings::default(),
        }
    }

    /// Save settings to disk
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(path, content)
            .map_err(|e| format!("Failed to write settings: {}", e))?;

        Ok(())
    }

    /// Strategy for count-based sibling merges.
    pub fn merge_strategy(&self) -> MergeStrategy {
        MergeStrategy::new(self.merge_separator.clone(), self.merge_threshold_policy)
    }

    /// Set one field from its string form, as given on the command line.
    pub fn set_field(&mut self, key: &str, value: &str) -> Result<(), String> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
            value.parse().map_err(|_| format!("Invalid value for {}: {}", key, value))
        }
        fn optional(value: &str) -> Option<String> {
            if value.is_empty() { None } else { Some(value.to_string()) }
        }

        match key {
            "z_threshold" => self.z_threshold = parse(key, value)?,
            "row_floor" => self.row_floor = parse(key, value)?,
            "max_iterations" => self.max_iterations = parse(key, value)?,
            "max_rounds" => self.max_rounds = parse(key, value)?,
            "merge_separator" => self.merge_separator = value.to_string(),
            "merge_threshold_policy" => {
                self.merge_threshold_policy = value.parse().map_err(|e: crate::error::TaxonomyError| e.to_string())?
            }
            "llm_backend" => match value {
                "openai" | "anthropic" | "ollama" | "rule" => self.llm_backend = value.to_string(),
                other => return Err(format!("Unknown backend: {} (expected openai, anthropic, ollama or rule)", other)),
            },
            "openai_model" => self.openai_model = value.to_string(),
            "anthropic_model" => self.anthropic_model = value.to_string(),
            "ollama_model" => self.ollama_model = value.to_string(),
            "ollama_url" => self.ollama_url = value.to_string(),
            "openai_api_key" => self.openai_api_key = optional(value),
            "anthropic_api_key" => self.anthropic_api_key = optional(value),
            "cache_dir" => self.cache_dir = optional(value),
            "request_timeout_secs" => self.request_timeout_secs = parse(key, value)?,
            "rule_min_overlap" => self.rule_min_overlap = parse(key, value)?,
            other => return Err(format!("Unknown setting: {}", other)),
        }
        Ok(())
    }
}

// ==================== API keys ====================

fn key_from_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|k| !k.is_empty())
}

impl Settings {
    /// OpenAI key (env var first, then stored setting)
    pub fn openai_key(&self) -> Option<String> {
        key_from_env("OPENAI_API_KEY").or_else(|| self.openai_api_key.clone().filter(|k| !k.is_empty()))
    }

    /// Anthropic key (env var first, then stored setting)
    pub fn anthropic_key(&self) -> Option<String> {
        key_from_env("ANTHROPIC_API_KEY").or_else(|| self.anthropic_api_key.clone().filter(|k| !k.is_empty()))
    }
}

/// Masked API key for display (first 8 and last 4 characters)
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 12 {
        let head: String = chars[..8].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        "*".repeat(chars.len())
    }
}
