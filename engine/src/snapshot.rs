//! Snapshots: plain-JSON images of a subtree.
//!
//! [`Tree::get_snapshot`] serializes a node recursively. [`Tree::apply_snapshot`]
//! goes the other way, reconciling a live node against a snapshot in place so
//! that nodes whose keys survive keep their identity and only the entries that
//! actually differ produce patches.

use crate::node::Content;
use crate::node::Field;
use crate::{error::Result, Error, FactoryKind, FieldShape, ListenerId, NodeId, Tree};
use serde_json::{Map, Value};

/// Short JSON type name used in shape errors.
pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Tree {
    /// Plain JSON image of `node` and its descendants.
    pub fn get_snapshot(&self, node: NodeId) -> Result<Value> {
        let snapshot = match &self.slot(node)?.content {
            Content::Model(fields) => {
                let mut out = Map::new();
                for (name, field) in fields {
                    let value = match field {
                        Field::Value(v) => v.clone(),
                        Field::Node(child) => self.get_snapshot(*child)?,
                    };
                    out.insert(name.clone(), value);
                }
                Value::Object(out)
            }
            Content::Map(entries) => {
                let mut out = Map::new();
                for (key, child) in entries {
                    out.insert(key.clone(), self.get_snapshot(*child)?);
                }
                Value::Object(out)
            }
            Content::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|child| self.get_snapshot(*child))
                    .collect::<Result<Vec<_>>>()?,
            ),
        };
        Ok(snapshot)
    }

    /// Reconcile `node` against `snapshot` in place.
    ///
    /// Afterwards `get_snapshot(node)` equals `snapshot`, modulo defaults
    /// filled in for declared model fields the snapshot leaves out. Patches
    /// are emitted for each entry that changed and snapshot listeners fire
    /// once.
    pub fn apply_snapshot(&mut self, node: NodeId, snapshot: &Value) -> Result<NodeId> {
        tracing::debug!(node = %node, "applying snapshot");
        self.batch(|tree| tree.reconcile(node, snapshot))?;
        Ok(node)
    }

    /// Observe the full snapshot of `node` after each operation that changed
    /// it or anything beneath it.
    pub fn on_snapshot<F>(&mut self, node: NodeId, listener: F) -> Result<ListenerId>
    where
        F: FnMut(&Value) + Send + 'static,
    {
        self.slot(node)?;
        let id = self.next_listener_id();
        self.snapshot_listeners.subscribe(node, id, Box::new(listener));
        Ok(id)
    }

    pub(crate) fn reconcile(&mut self, node: NodeId, snapshot: &Value) -> Result<()> {
        let factory = self.slot(node)?.factory.clone();
        let empty = Map::new();
        let incoming_object = match snapshot {
            Value::Object(obj) => Some(obj),
            Value::Null => Some(&empty),
            _ => None,
        };

        match factory.kind() {
            FactoryKind::Map(_) => {
                let incoming = incoming_object
                    .ok_or_else(|| self.snapshot_mismatch(node, "object", snapshot))?;
                incoming.keys().try_for_each(|key| self.require_key(node, key))?;
                for key in self.keys(node)? {
                    if !incoming.contains_key(&key) {
                        self.delete_entry(node, &key, true)?;
                    }
                }
                for (key, value) in incoming {
                    match self.child(node, key)? {
                        Some(child) => self.reconcile(child, value)?,
                        None => self.set_entry(node, key, value.clone().into())?,
                    }
                }
            }
            FactoryKind::Model(fields) => {
                let incoming = incoming_object
                    .ok_or_else(|| self.snapshot_mismatch(node, "object", snapshot))?;
                incoming.keys().try_for_each(|key| self.require_key(node, key))?;
                for key in self.keys(node)? {
                    if incoming.contains_key(&key) {
                        continue;
                    }
                    match fields.get(&key) {
                        Some(FieldShape::Value(default)) => {
                            self.assign_value(node, &key, default)?;
                        }
                        Some(FieldShape::Factory(_)) => match self.child(node, &key)? {
                            Some(child) => self.reconcile(child, &Value::Null)?,
                            None => self.set_entry(node, &key, Value::Null.into())?,
                        },
                        None => {
                            self.delete_entry(node, &key, true)?;
                        }
                    }
                }
                // Declared fields deleted earlier come back with their default.
                for (name, shape) in fields {
                    if incoming.contains_key(name) || self.get(node, name)?.is_some() {
                        continue;
                    }
                    let restored = match shape {
                        FieldShape::Value(default) => default.clone(),
                        FieldShape::Factory(_) => Value::Null,
                    };
                    self.set_entry(node, name, restored.into())?;
                }
                for (key, value) in incoming {
                    let nested = matches!(fields.get(key), Some(FieldShape::Factory(_)));
                    match self.child(node, key)? {
                        Some(child) if nested => self.reconcile(child, value)?,
                        _ => self.assign_value(node, key, value)?,
                    }
                }
            }
            FactoryKind::Array(_) => {
                let incoming = match snapshot {
                    Value::Array(items) => items.as_slice(),
                    Value::Null => &[][..],
                    _ => return Err(self.snapshot_mismatch(node, "array", snapshot)),
                };
                let current: Vec<NodeId> = match &self.slot(node)?.content {
                    Content::Array(items) => items.clone(),
                    _ => Vec::new(),
                };

                for (child, value) in current.iter().zip(incoming) {
                    self.reconcile(*child, value)?;
                }
                if incoming.len() > current.len() {
                    for (offset, value) in incoming[current.len()..].iter().enumerate() {
                        self.insert_entry(node, current.len() + offset, value.clone().into())?;
                    }
                } else {
                    for index in (incoming.len()..current.len()).rev() {
                        self.delete_entry(node, &index.to_string(), true)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn snapshot_mismatch(&self, node: NodeId, expected: &str, found: &Value) -> Error {
        Error::shape_mismatch(
            self.get_path(node).unwrap_or_default(),
            expected,
            json_type_name(found),
        )
    }

    /// Set a model entry unless it already holds an equal plain value.
    fn assign_value(&mut self, node: NodeId, key: &str, value: &Value) -> Result<()> {
        if self.value(node, key)? == Some(value) {
            return Ok(());
        }
        self.set_entry(node, key, value.clone().into())
    }
}
