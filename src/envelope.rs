//! The tuple envelope: the uniform record format exchanged between nodes.
//!
//! Every record flowing through a topology is an ordered pair of an entity
//! tag (the record's semantic type) and a structured JSON payload. Nodes
//! address fields with dot-delimited paths:
//!
//! ```rust
//! use weir::envelope::TupleEnvelope;
//!
//! let mut env = TupleEnvelope::new("order");
//! env.set("user.name", "Ann");
//! assert_eq!(env.get("user.name").and_then(|v| v.as_str()), Some("Ann"));
//! ```
//!
//! Reads propagate "absent" through every missing intermediate segment;
//! writes create missing intermediate objects on the way down.

use crate::error::Result;
use serde_json::{Map, Value};

/// A record envelope: entity tag plus structured payload.
///
/// The payload always round-trips losslessly through its canonical wire
/// string form ([`TupleEnvelope::to_wire`] / [`TupleEnvelope::from_wire`]).
///
/// An envelope is owned exclusively by the task instance currently
/// processing it and must not be retained after acknowledgment.
#[derive(Debug, Clone, PartialEq)]
pub struct TupleEnvelope {
    entity: String,
    payload: Map<String, Value>,
}

impl TupleEnvelope {
    /// Create an empty envelope with the given entity tag.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            payload: Map::new(),
        }
    }

    /// Create an envelope from an entity tag and an existing payload.
    pub fn with_payload(entity: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            entity: entity.into(),
            payload,
        }
    }

    /// Get the entity tag.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Replace the entity tag.
    pub fn set_entity(&mut self, entity: impl Into<String>) {
        self.entity = entity.into();
    }

    /// Get a field by dot-delimited path.
    ///
    /// Returns `None` if any segment along the path is missing or if an
    /// intermediate segment is not an object. A missing leaf is absent,
    /// never an error.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.payload.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Set a field by dot-delimited path.
    ///
    /// Missing intermediate objects are created; an intermediate that holds
    /// a non-object value is replaced by an object so the write always
    /// lands. The final segment is overwritten unconditionally.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        let mut parts: Vec<&str> = path.split('.').collect();
        // split always yields at least one segment
        let last = parts.pop().unwrap_or(path);
        let mut current = &mut self.payload;
        for part in parts {
            let slot = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            match slot {
                Value::Object(map) => current = map,
                _ => unreachable!("intermediate segment was just made an object"),
            }
        }
        current.insert(last.to_string(), value.into());
    }

    /// Remove a field by dot-delimited path, returning the removed value.
    ///
    /// Traversal follows existing intermediates only; removing a key that
    /// never existed is a no-op returning `None`.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let mut parts: Vec<&str> = path.split('.').collect();
        let last = parts.pop()?;
        let mut current = &mut self.payload;
        for part in parts {
            current = match current.get_mut(part) {
                Some(Value::Object(map)) => map,
                _ => return None,
            };
        }
        current.remove(last)
    }

    /// Check whether a field exists at the given path.
    pub fn exists(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Serialize the payload to its canonical wire string form.
    pub fn to_wire(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.payload)?)
    }

    /// Reconstruct an envelope from an entity tag and a wire string.
    pub fn from_wire(entity: impl Into<String>, wire: &str) -> Result<Self> {
        let payload: Map<String, Value> = serde_json::from_str(wire)?;
        Ok(Self {
            entity: entity.into(),
            payload,
        })
    }

    /// Get the whole payload.
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Replace the whole payload. Useful after deep restructuring.
    pub fn set_payload(&mut self, payload: Map<String, Value>) {
        self.payload = payload;
    }

    /// Check if the payload has no fields.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Clear all payload fields, keeping the entity tag.
    pub fn clear(&mut self) {
        self.payload.clear();
    }
}
