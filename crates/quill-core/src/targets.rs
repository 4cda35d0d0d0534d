//! Streamed-target registry
//!
//! A streamed target is a lazily populated, identifier-keyed slot filled by
//! the JSON body of a data fence. Targets are registered by executed code
//! (the `StreamedData` global); the interaction loop writes them. A slot
//! moves through three forms: unset, streaming (a partial JSON text is
//! pending), and set. Reads always see the last committed contents, so a
//! replacement that fails to parse leaves the target untouched.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{QuillError, QuillResult};

#[derive(Debug, Default)]
struct TargetSlot {
    current: Option<Value>,
    pending: Option<String>,
}

/// Registry of streamed targets for one session
#[derive(Clone, Default)]
pub struct TargetRegistry {
    inner: Arc<Mutex<HashMap<String, TargetSlot>>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an identifier. Idempotent; an existing slot keeps its
    /// contents.
    pub fn open(&self, id: &str) {
        self.inner.lock().entry(id.to_string()).or_default();
    }

    /// Whether the identifier has been registered
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().contains_key(id)
    }

    /// Start buffering a replacement body for a registered target
    pub fn begin_stream(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.get_mut(id) {
            Some(slot) => {
                slot.pending = Some(String::new());
                true
            }
            None => false,
        }
    }

    /// Append a chunk of the pending body
    pub fn append_chunk(&self, id: &str, chunk: &str) {
        if let Some(slot) = self.inner.lock().get_mut(id) {
            if let Some(pending) = slot.pending.as_mut() {
                pending.push_str(chunk);
            }
        }
    }

    /// Parse the pending body and wholly replace the target's contents.
    /// On parse failure the pending text is discarded and the previous
    /// contents stay in place.
    pub fn commit(&self, id: &str) -> QuillResult<()> {
        let mut inner = self.inner.lock();
        let slot = inner
            .get_mut(id)
            .ok_or_else(|| QuillError::json(format!("unknown target {id}")))?;
        let Some(pending) = slot.pending.take() else {
            return Ok(());
        };
        let value: Value =
            serde_json::from_str(&pending).map_err(|e| QuillError::json(e.to_string()))?;
        slot.current = Some(value);
        Ok(())
    }

    /// Read one top-level key of the target; `None` before any body has
    /// been committed or when the key is absent
    pub fn get(&self, id: &str, key: &str) -> Option<Value> {
        let inner = self.inner.lock();
        let slot = inner.get(id)?;
        slot.current.as_ref()?.get(key).cloned()
    }

    /// Full committed contents, if any
    pub fn snapshot(&self, id: &str) -> Option<Value> {
        self.inner.lock().get(id)?.current.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_before_any_commit_are_absent() {
        let targets = TargetRegistry::new();
        targets.open("chart");
        assert!(targets.get("chart", "a").is_none());
        assert!(targets.snapshot("chart").is_none());
    }

    #[test]
    fn commit_replaces_wholly() {
        let targets = TargetRegistry::new();
        targets.open("chart");

        assert!(targets.begin_stream("chart"));
        targets.append_chunk("chart", r#"{"a": 1, "#);
        targets.append_chunk("chart", r#""b": 2}"#);
        targets.commit("chart").unwrap();
        assert_eq!(targets.get("chart", "a"), Some(json!(1)));

        // No merge: a second body replaces everything.
        targets.begin_stream("chart");
        targets.append_chunk("chart", r#"{"c": 3}"#);
        targets.commit("chart").unwrap();
        assert!(targets.get("chart", "a").is_none());
        assert_eq!(targets.get("chart", "c"), Some(json!(3)));
    }

    #[test]
    fn parse_failure_leaves_target_untouched() {
        let targets = TargetRegistry::new();
        targets.open("chart");
        targets.begin_stream("chart");
        targets.append_chunk("chart", r#"{"a": 1}"#);
        targets.commit("chart").unwrap();

        targets.begin_stream("chart");
        targets.append_chunk("chart", "{not json");
        assert!(targets.commit("chart").is_err());
        assert_eq!(targets.get("chart", "a"), Some(json!(1)));
    }

    #[test]
    fn unknown_identifier_does_not_stream() {
        let targets = TargetRegistry::new();
        assert!(!targets.begin_stream("ghost"));
        assert!(!targets.contains("ghost"));
    }
}
