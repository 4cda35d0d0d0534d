//! Mutation patches
//!
//! A patch is the wire tuple `[op, path, value, prev]`. The last write along
//! a path wins; deletions splice arrays and remove record keys.

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Mutation operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Set,
    Delete,
}

/// One step of a mutation path: a record key or an array index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSeg {
    Key(String),
    Index(usize),
}

impl PathSeg {
    pub fn key(s: impl Into<String>) -> Self {
        Self::Key(s.into())
    }
}

impl fmt::Display for PathSeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSeg::Key(k) => write!(f, "{}", k),
            PathSeg::Index(i) => write!(f, "{}", i),
        }
    }
}

/// A single mutation on a reactive record
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub op: PatchOp,
    /// Non-empty sequence of keys from the record root
    pub path: Vec<PathSeg>,
    /// New value at the path (`None` for deletions)
    pub value: Option<Value>,
    /// Prior value at the path, if any
    pub prev: Option<Value>,
}

impl Patch {
    pub fn set(path: Vec<PathSeg>, value: Value, prev: Option<Value>) -> Self {
        Self {
            op: PatchOp::Set,
            path,
            value: Some(value),
            prev,
        }
    }

    pub fn delete(path: Vec<PathSeg>, prev: Option<Value>) -> Self {
        Self {
            op: PatchOp::Delete,
            path,
            value: None,
            prev,
        }
    }
}

// Wire form is a fixed-arity tuple, not a map.
impl Serialize for Patch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(4))?;
        seq.serialize_element(&self.op)?;
        seq.serialize_element(&self.path)?;
        seq.serialize_element(&self.value)?;
        seq.serialize_element(&self.prev)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Patch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PatchVisitor;

        impl<'de> Visitor<'de> for PatchVisitor {
            type Value = Patch;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a [op, path, value, prev] tuple")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Patch, A::Error> {
                let op = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let path = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let value: Option<Value> = seq.next_element()?.unwrap_or(None);
                let prev: Option<Value> = seq.next_element()?.unwrap_or(None);
                Ok(Patch {
                    op,
                    path,
                    value,
                    prev,
                })
            }
        }

        deserializer.deserialize_seq(PatchVisitor)
    }
}

/// Replay a patch onto a document. Used to verify patch faithfulness: a
/// snapshot plus the emitted patch stream must reproduce the live record.
pub fn apply_patch(doc: &mut Value, patch: &Patch) {
    let Some((last, parents)) = patch.path.split_last() else {
        return;
    };

    let mut node = doc;
    for seg in parents {
        let next = match (seg, &mut *node) {
            (PathSeg::Key(k), Value::Object(map)) => map
                .entry(k.clone())
                .or_insert_with(|| Value::Object(Default::default())),
            (PathSeg::Index(i), Value::Array(items)) => match items.get_mut(*i) {
                Some(item) => item,
                None => return,
            },
            _ => return,
        };
        node = next;
    }

    match (&patch.op, last, node) {
        (PatchOp::Set, PathSeg::Key(k), Value::Object(map)) => {
            map.insert(k.clone(), patch.value.clone().unwrap_or(Value::Null));
        }
        (PatchOp::Set, PathSeg::Index(i), Value::Array(items)) => {
            let value = patch.value.clone().unwrap_or(Value::Null);
            if *i < items.len() {
                items[*i] = value;
            } else if *i == items.len() {
                items.push(value);
            }
        }
        (PatchOp::Delete, PathSeg::Key(k), Value::Object(map)) => {
            map.remove(k);
        }
        (PatchOp::Delete, PathSeg::Index(i), Value::Array(items)) => {
            if *i < items.len() {
                items.remove(*i);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_form_is_a_tuple() {
        let patch = Patch::set(vec![PathSeg::key("n")], json!(7), Some(json!(0)));
        let wire = serde_json::to_value(&patch).unwrap();
        assert_eq!(wire, json!(["set", ["n"], 7, 0]));
    }

    #[test]
    fn roundtrip_with_index_path() {
        let patch = Patch::delete(vec![PathSeg::key("items"), PathSeg::Index(2)], Some(json!("c")));
        let wire = serde_json::to_string(&patch).unwrap();
        let back: Patch = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, patch);
    }

    #[test]
    fn replay_set_and_delete() {
        let mut doc = json!({"a": {"b": [1, 2, 3]}});
        apply_patch(
            &mut doc,
            &Patch::set(
                vec![PathSeg::key("a"), PathSeg::key("b"), PathSeg::Index(1)],
                json!(9),
                Some(json!(2)),
            ),
        );
        apply_patch(
            &mut doc,
            &Patch::delete(
                vec![PathSeg::key("a"), PathSeg::key("b"), PathSeg::Index(0)],
                Some(json!(1)),
            ),
        );
        assert_eq!(doc, json!({"a": {"b": [9, 3]}}));
    }
}
