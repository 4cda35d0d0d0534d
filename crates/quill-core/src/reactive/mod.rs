//! Reactive state registry
//!
//! Wraps plain JSON records as observably-mutable documents. Each document
//! carries a hidden identity that never appears in snapshots; every mutation
//! at any nested path emits exactly one [`Patch`]. Observers of one record
//! share a single underlying subscription: the record's patch tap is opened
//! when the first observer attaches and released when the last detaches.
//!
//! Executed code never touches documents directly; it goes through the
//! explicit `get`/`set`/`delete`/`snapshot` surface on this registry via the
//! interpreter's `Data` global.

mod patch;

pub use patch::{apply_patch, Patch, PatchOp, PathSeg};

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Hidden identity of a reactive document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocId(Uuid);

impl DocId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an identity previously rendered with `to_string`
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

struct RecordEntry {
    doc: Value,
    observers: HashMap<u64, mpsc::UnboundedSender<Patch>>,
    next_observer: u64,
    /// The record's single underlying patch tap; opened on first observer,
    /// released on last detach.
    tap_open: bool,
}

/// Registry of reactive documents for one session
#[derive(Clone, Default)]
pub struct ReactiveRegistry {
    inner: Arc<Mutex<HashMap<DocId, RecordEntry>>>,
}

/// Observer handle; detaches on drop
pub struct Subscription {
    registry: ReactiveRegistry,
    doc: DocId,
    key: u64,
    detached: bool,
}

impl Subscription {
    /// Explicitly detach this observer
    pub fn detach(mut self) {
        self.detach_inner();
    }

    fn detach_inner(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        let mut inner = self.registry.inner.lock();
        if let Some(entry) = inner.get_mut(&self.doc) {
            entry.observers.remove(&self.key);
            if entry.observers.is_empty() {
                entry.tap_open = false;
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach_inner();
    }
}

impl ReactiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an initial record, returning its hidden identity
    pub fn wrap(&self, initial: Value) -> DocId {
        let id = DocId::new();
        self.inner.lock().insert(
            id,
            RecordEntry {
                doc: initial,
                observers: HashMap::new(),
                next_observer: 0,
                tap_open: false,
            },
        );
        id
    }

    /// Deep copy of the record. The identity lives outside the document, so
    /// snapshots never contain it.
    pub fn snapshot(&self, id: DocId) -> Option<Value> {
        self.inner.lock().get(&id).map(|e| e.doc.clone())
    }

    /// Attach an observer. Observers form a set; each receives every patch
    /// in mutation order on its own channel.
    pub fn subscribe(&self, id: DocId) -> Option<(Subscription, mpsc::UnboundedReceiver<Patch>)> {
        let mut inner = self.inner.lock();
        let entry = inner.get_mut(&id)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let key = entry.next_observer;
        entry.next_observer += 1;
        entry.observers.insert(key, tx);
        entry.tap_open = true;
        Some((
            Subscription {
                registry: self.clone(),
                doc: id,
                key,
                detached: false,
            },
            rx,
        ))
    }

    /// Whether the record's underlying patch tap is currently held open
    pub fn has_subscription(&self, id: DocId) -> bool {
        self.inner.lock().get(&id).is_some_and(|e| e.tap_open)
    }

    /// Read the value at a path; `None` when the record or path is absent
    pub fn get(&self, id: DocId, path: &[PathSeg]) -> Option<Value> {
        let inner = self.inner.lock();
        let entry = inner.get(&id)?;
        resolve(&entry.doc, path).cloned()
    }

    /// Set the value at a non-empty path, creating intermediate objects for
    /// missing record keys. Emits one patch.
    pub fn set(&self, id: DocId, path: Vec<PathSeg>, value: Value) {
        if path.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        let Some(entry) = inner.get_mut(&id) else {
            return;
        };
        let Some(prev) = set_at(&mut entry.doc, &path, value.clone()) else {
            return;
        };
        emit(entry, Patch::set(path, value, prev));
    }

    /// Delete the value at a non-empty path. Arrays splice; records remove
    /// the key. Emits one patch when something was actually removed.
    pub fn delete(&self, id: DocId, path: Vec<PathSeg>) {
        if path.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        let Some(entry) = inner.get_mut(&id) else {
            return;
        };
        let Some(prev) = delete_at(&mut entry.doc, &path) else {
            return;
        };
        emit(entry, Patch::delete(path, Some(prev)));
    }

    /// Drop a record and all its observers
    pub fn release(&self, id: DocId) {
        self.inner.lock().remove(&id);
    }
}

fn emit(entry: &mut RecordEntry, patch: Patch) {
    entry
        .observers
        .retain(|_, tx| tx.send(patch.clone()).is_ok());
    if entry.observers.is_empty() {
        entry.tap_open = false;
    }
}

fn resolve<'a>(doc: &'a Value, path: &[PathSeg]) -> Option<&'a Value> {
    let mut node = doc;
    for seg in path {
        node = match (seg, node) {
            (PathSeg::Key(k), Value::Object(map)) => map.get(k)?,
            (PathSeg::Index(i), Value::Array(items)) => items.get(*i)?,
            _ => return None,
        };
    }
    Some(node)
}

/// Returns `Some(prev)` on success (`prev` is `None` when the slot was new)
fn set_at(doc: &mut Value, path: &[PathSeg], value: Value) -> Option<Option<Value>> {
    let (last, parents) = path.split_last()?;
    let mut node = doc;
    for seg in parents {
        node = match (seg, node) {
            (PathSeg::Key(k), Value::Object(map)) => map
                .entry(k.clone())
                .or_insert_with(|| Value::Object(Default::default())),
            (PathSeg::Index(i), Value::Array(items)) => items.get_mut(*i)?,
            _ => return None,
        };
    }
    match (last, node) {
        (PathSeg::Key(k), Value::Object(map)) => Some(map.insert(k.clone(), value)),
        (PathSeg::Index(i), Value::Array(items)) => {
            if *i < items.len() {
                Some(Some(std::mem::replace(&mut items[*i], value)))
            } else if *i == items.len() {
                items.push(value);
                Some(None)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn delete_at(doc: &mut Value, path: &[PathSeg]) -> Option<Value> {
    let (last, parents) = path.split_last()?;
    let mut node = doc;
    for seg in parents {
        node = match (seg, node) {
            (PathSeg::Key(k), Value::Object(map)) => map.get_mut(k)?,
            (PathSeg::Index(i), Value::Array(items)) => items.get_mut(*i)?,
            _ => return None,
        };
    }
    match (last, node) {
        (PathSeg::Key(k), Value::Object(map)) => map.remove(k),
        (PathSeg::Index(i), Value::Array(items)) => {
            if *i < items.len() {
                Some(items.remove(*i))
            } else {
                None
            }
        }
        _ => None,
    }
}
