//! Disk-backed cache of model replies keyed by prompt text.
//!
//! One JSON file per namespace (`<namespace>_prompts.json`) mapping the
//! SHA-256 hex digest of the exact prompt to the reply. The cache is loaded
//! explicitly and saved explicitly; nothing is written behind the caller's back.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

pub fn prompt_key(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Default)]
pub struct PromptCache {
    dir: Option<PathBuf>,
    namespaces: HashMap<String, BTreeMap<String, String>>,
    dirty: bool,
    hits: u64,
    misses: u64,
}

impl PromptCache {
    /// In-memory cache that never touches disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Cache backed by `dir`. Namespaces are read lazily on first use.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            ..Default::default()
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn file_for(dir: &Path, namespace: &str) -> PathBuf {
        dir.join(format!("{}_prompts.json", namespace))
    }

    /// Read one namespace file. Missing files give an empty map; corrupt
    /// files are reported and also give an empty map.
    pub fn load(&mut self, namespace: &str) -> &mut BTreeMap<String, String> {
        if !self.namespaces.contains_key(namespace) {
            let entries = match &self.dir {
                Some(dir) => read_namespace(&Self::file_for(dir, namespace)),
                None => BTreeMap::new(),
            };
            self.namespaces.insert(namespace.to_string(), entries);
        }
        self.namespaces.entry(namespace.to_string()).or_default()
    }

    pub fn get(&mut self, namespace: &str, prompt: &str) -> Option<String> {
        let key = prompt_key(prompt);
        let found = self.load(namespace).get(&key).cloned();
        match found {
            Some(reply) => {
                self.hits += 1;
                log::debug!("Cache hit for prompt in {}", namespace);
                Some(reply)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, namespace: &str, prompt: &str, reply: &str) {
        let key = prompt_key(prompt);
        self.load(namespace).insert(key, reply.to_string());
        self.dirty = true;
    }

    pub fn len(&self, namespace: &str) -> usize {
        self.namespaces.get(namespace).map(|m| m.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    /// Write every loaded namespace back to disk. No-op for in-memory caches
    /// or when nothing changed.
    pub fn save(&mut self) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        fs::create_dir_all(dir)?;
        for (namespace, entries) in &self.namespaces {
            let json = serde_json::to_string_pretty(entries)?;
            fs::write(Self::file_for(dir, namespace), json)?;
        }
        self.dirty = false;
        log::debug!("Saved prompt cache to {:?}", dir);
        Ok(())
    }
}

fn read_namespace(path: &Path) -> BTreeMap<String, String> {
    if !path.exists() {
        return BTreeMap::new();
    }
    match fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
            log::warn!("Cache file {:?} is corrupted ({}), reinitializing", path, e);
            BTreeMap::new()
        }),
        Err(e) => {
            log::warn!("Failed to read cache file {:?}: {}", path, e);
            BTreeMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prompt_key_is_sha256_hex() {
        let key = prompt_key("hello");
        assert_eq!(key.len(), 64);
        assert_eq!(key, "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824");
    }

    #[test]
    fn test_in_memory_hit_and_miss() {
        let mut cache = PromptCache::in_memory();
        assert_eq!(cache.get("merge_decision", "p"), None);
        cache.insert("merge_decision", "p", "None");
        assert_eq!(cache.get("merge_decision", "p").as_deref(), Some("None"));
        assert_eq!(cache.get("other", "p"), None);
        assert_eq!(cache.stats(), (1, 2));
        assert!(cache.save().is_ok());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let mut cache = PromptCache::open(dir.path());
        cache.insert("merge_decision", "prompt one", "Remove");
        cache.save().unwrap();
        assert!(dir.path().join("merge_decision_prompts.json").exists());

        let mut reloaded = PromptCache::open(dir.path());
        assert_eq!(reloaded.get("merge_decision", "prompt one").as_deref(), Some("Remove"));
        assert_eq!(reloaded.len("merge_decision"), 1);
    }

    #[test]
    fn test_corrupt_file_reinitializes() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("merge_decision_prompts.json"), "{ not json").unwrap();

        let mut cache = PromptCache::open(dir.path());
        assert_eq!(cache.get("merge_decision", "anything"), None);
        cache.insert("merge_decision", "anything", "None");
        cache.save().unwrap();

        let mut reloaded = PromptCache::open(dir.path());
        assert_eq!(reloaded.get("merge_decision", "anything").as_deref(), Some("None"));
    }
}
