//! Node storage.
//!
//! Nodes live in a generational arena owned by the [`Tree`](crate::Tree).
//! Each slot records the factory that produced the node, the parent it is
//! attached to (if any), the key it is stored under, and its content.
//! Parent links are plain indices, so computing a path is an arena walk.

use crate::Factory;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Stable handle to a node in a tree.
///
/// Handles carry a generation so that a handle to a freed node is detected
/// instead of silently aliasing whatever reuses its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// A model field: either a plain value or a child node.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Field {
    Value(Value),
    Node(NodeId),
}

/// Node content, tagged by factory kind.
#[derive(Debug, Clone)]
pub(crate) enum Content {
    Model(IndexMap<String, Field>),
    Map(IndexMap<String, NodeId>),
    Array(Vec<NodeId>),
}

impl Content {
    /// Child nodes directly owned by this content.
    pub(crate) fn children(&self) -> Vec<NodeId> {
        match self {
            Content::Model(fields) => fields
                .values()
                .filter_map(|field| match field {
                    Field::Node(id) => Some(*id),
                    Field::Value(_) => None,
                })
                .collect(),
            Content::Map(entries) => entries.values().copied().collect(),
            Content::Array(items) => items.clone(),
        }
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Content::Model(_) => "model",
            Content::Map(_) => "map",
            Content::Array(_) => "array",
        }
    }
}

/// One live node.
#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) factory: Factory,
    pub(crate) parent: Option<NodeId>,
    pub(crate) key: Option<String>,
    pub(crate) content: Content,
}

#[derive(Debug)]
struct Entry {
    generation: u32,
    slot: Option<Slot>,
}

/// Generational arena of node slots.
#[derive(Debug, Default)]
pub(crate) struct Arena {
    entries: Vec<Entry>,
    free: Vec<u32>,
    live: usize,
}

impl Arena {
    pub(crate) fn insert(&mut self, slot: Slot) -> NodeId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.slot = Some(slot);
            return NodeId {
                index,
                generation: entry.generation,
            };
        }

        let index = self.entries.len() as u32;
        self.entries.push(Entry {
            generation: 0,
            slot: Some(slot),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Slot> {
        self.entries
            .get(id.index as usize)
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.slot.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Slot> {
        self.entries
            .get_mut(id.index as usize)
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.slot.as_mut())
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Free a slot. The generation is bumped so old handles go stale.
    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Slot> {
        let entry = self.entries.get_mut(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        let slot = entry.slot.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(slot)
    }

    /// Number of live nodes.
    pub(crate) fn len(&self) -> usize {
        self.live
    }
}
