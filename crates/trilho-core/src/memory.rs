use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrilhoError};

/// One recorded write to a memory key.
///
/// The provenance log is append-only: overwriting a key adds a new entry,
/// it never removes the old one. This is what lets a trace reconstruct
/// exactly which step produced the value a later step read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryWrite {
    pub writer_step_id: String,
    pub value: serde_json::Value,
    pub written_at: DateTime<Utc>,
}

/// Shared key-value state for one workflow run.
///
/// Every step reads previous outputs from here and writes its own output
/// under its declared key. Keys are never deleted mid-run; overwrites
/// preserve the full write history per key. Each run owns its memory;
/// nothing is shared across concurrent runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowMemory {
    entries: HashMap<String, serde_json::Value>,
    provenance: HashMap<String, Vec<MemoryWrite>>,
}

impl WorkflowMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the most recent value for a key.
    pub fn get(&self, key: &str) -> Result<&serde_json::Value> {
        self.entries
            .get(key)
            .ok_or_else(|| TrilhoError::MissingKey(key.to_string()))
    }

    /// Get a value if present, without treating absence as an error.
    pub fn try_get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }

    /// Dot-path access into nested JSON: `get_path("classification.urgencia")`.
    pub fn get_path(&self, path: &str) -> Option<&serde_json::Value> {
        let mut parts = path.split('.');
        let mut current = self.entries.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Write a value, attributed to the step that produced it.
    ///
    /// Always succeeds. An existing value is overwritten, but the prior
    /// write stays in the provenance log.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: serde_json::Value,
        writer_step_id: impl Into<String>,
    ) {
        let key = key.into();
        let write = MemoryWrite {
            writer_step_id: writer_step_id.into(),
            value: value.clone(),
            written_at: Utc::now(),
        };
        self.provenance.entry(key.clone()).or_default().push(write);
        self.entries.insert(key, value);
    }

    /// Bulk write, attributed to a single writer (used for initial input).
    pub fn update(
        &mut self,
        data: HashMap<String, serde_json::Value>,
        writer_step_id: &str,
    ) {
        for (k, v) in data {
            self.set(k, v, writer_step_id);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Read-only deep copy of the given keys, for trace input recording.
    ///
    /// Keys absent from memory are omitted. The copy is detached: later
    /// writes cannot retroactively alter a recorded snapshot.
    pub fn snapshot(&self, keys: &[String]) -> HashMap<String, serde_json::Value> {
        keys.iter()
            .filter_map(|k| self.entries.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// Deep copy of the entire store.
    pub fn snapshot_all(&self) -> HashMap<String, serde_json::Value> {
        self.entries.clone()
    }

    /// The write history for a key, oldest first. Empty if never written.
    pub fn provenance(&self, key: &str) -> &[MemoryWrite] {
        self.provenance.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// All keys currently present.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }
}
