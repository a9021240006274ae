//! Long-term memory collaborator.
//!
//! Each completed command is written here as one block of text, and the
//! loop asks for relevant past events when it assembles the next context.
//! Retrieval is plain term overlap, good enough for a local store.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// Number of memories returned by [`MemoryStore::get`] for one query.
const RELEVANT_COUNT: usize = 5;

pub trait MemoryStore: Send + Sync {
    /// Store a block of text.
    fn add(&self, text: &str);

    /// Return the stored text most relevant to `query`, joined by blank
    /// lines. Empty when nothing matches.
    fn get(&self, query: &str) -> String;
}

#[derive(Debug, Serialize, Deserialize)]
struct MemoryRecord {
    timestamp: String,
    text: String,
}

/// In-process memory, optionally mirrored to a JSONL file so a later run
/// starts with what an earlier one learned.
pub struct LocalMemory {
    entries: RwLock<Vec<(String, HashSet<String>)>>,
    max_entries: usize,
    path: Option<PathBuf>,
}

impl LocalMemory {
    /// Memory that lives only as long as this value. Sub-agents get one of
    /// these, never a handle to their parent's store.
    pub fn ephemeral() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            max_entries: 1000,
            path: None,
        }
    }

    /// Memory backed by a JSONL file. Existing records are loaded; a missing
    /// file is created on first write.
    pub fn persistent(path: &Path) -> anyhow::Result<Self> {
        let mut entries = Vec::new();
        if path.exists() {
            let file = fs::File::open(path)?;
            for (index, line) in BufReader::new(file).lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<MemoryRecord>(&line) {
                    Ok(record) => {
                        let terms = terms(&record.text);
                        entries.push((record.text, terms));
                    }
                    Err(e) => tracing::warn!(line = index + 1, "Skipping bad memory record: {e}"),
                }
            }
        }
        tracing::debug!(path = %path.display(), count = entries.len(), "Loaded memory");

        Ok(Self {
            entries: RwLock::new(entries),
            max_entries: 1000,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append_to_file(&self, path: &Path, text: &str) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let record = MemoryRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            text: text.to_string(),
        };
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", serde_json::to_string(&record)?)?;
        Ok(())
    }
}

impl MemoryStore for LocalMemory {
    fn add(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            entries.push((text.to_string(), terms(text)));
            let overflow = entries.len().saturating_sub(self.max_entries);
            entries.drain(..overflow);
        }

        if let Some(path) = &self.path {
            if let Err(e) = self.append_to_file(path, text) {
                tracing::warn!(path = %path.display(), "Failed to persist memory: {e}");
            }
        }
    }

    fn get(&self, query: &str) -> String {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return String::new();
        }

        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        // Newer entries win ties.
        let mut scored: Vec<(usize, usize, &str)> = entries
            .iter()
            .enumerate()
            .map(|(i, (text, doc))| (query_terms.intersection(doc).count(), i, text.as_str()))
            .filter(|(score, _, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));

        scored
            .into_iter()
            .take(RELEVANT_COUNT)
            .map(|(_, _, text)| text)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn get_returns_overlapping_entries_only() {
        let memory = LocalMemory::ephemeral();
        memory.add("Assistant Reply: wrote recipes.html \nResult: ok");
        memory.add("Unrelated note about weather");

        let found = memory.get("check recipes.html contents");
        assert!(found.contains("recipes"));
        assert!(!found.contains("weather"));
        assert_eq!(memory.get("zzz qqq"), "");
    }

    #[test]
    fn blank_text_is_ignored() {
        let memory = LocalMemory::ephemeral();
        memory.add("   ");
        assert!(memory.is_empty());
    }

    #[test]
    fn persistent_memory_survives_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("memory.jsonl");

        let memory = LocalMemory::persistent(&path).unwrap();
        memory.add("the deployment target is staging");
        drop(memory);

        let reloaded = LocalMemory::persistent(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.get("deployment target").contains("staging"));
    }
}
