//! Tree - the owner of every live node.
//!
//! All mutation goes through the methods on [`Tree`]. Each structural change
//! is published to patch listeners before the mutating call returns, and
//! snapshot listeners are notified once the outermost operation completes.

use crate::listener::Registry;
use crate::node::{Arena, Content, Field, Slot};
use crate::patch::Change;
use crate::snapshot::json_type_name;
use crate::{
    error::Result, Action, Error, Factory, FactoryKind, FieldShape, ListenerId, NodeId, Patch,
    Path,
};
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use std::fmt;

/// A value being stored into a container.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// An existing, unattached node.
    Node(NodeId),
    /// A plain value, lifted through the element factory where one applies.
    Value(Value),
}

impl From<NodeId> for Input {
    fn from(id: NodeId) -> Self {
        Input::Node(id)
    }
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Input::Value(value)
    }
}

/// A container entry as seen by readers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Child<'a> {
    Node(NodeId),
    Value(&'a Value),
}

impl<'a> Child<'a> {
    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Child::Node(id) => Some(*id),
            Child::Value(_) => None,
        }
    }

    pub fn as_value(&self) -> Option<&'a Value> {
        match self {
            Child::Value(v) => Some(v),
            Child::Node(_) => None,
        }
    }
}

/// Arena of nodes plus the listener registries observing them.
pub struct Tree {
    pub(crate) nodes: Arena,
    pub(crate) patch_listeners: Registry<Patch>,
    pub(crate) deep_patch_listeners: Registry<Patch>,
    pub(crate) snapshot_listeners: Registry<Value>,
    pub(crate) action_listeners: Registry<Action>,
    pub(crate) action_depth: usize,
    next_listener: u64,
    batch_depth: usize,
    pending_snapshots: IndexSet<NodeId>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("nodes", &self.nodes.len())
            .field("patch_listeners", &self.patch_listeners.len())
            .field("deep_patch_listeners", &self.deep_patch_listeners.len())
            .field("snapshot_listeners", &self.snapshot_listeners.len())
            .field("action_listeners", &self.action_listeners.len())
            .finish()
    }
}

impl Tree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self {
            nodes: Arena::default(),
            patch_listeners: Registry::new("patch"),
            deep_patch_listeners: Registry::new("deep_patch"),
            snapshot_listeners: Registry::new("snapshot"),
            action_listeners: Registry::new("action"),
            action_depth: 0,
            next_listener: 0,
            batch_depth: 0,
            pending_snapshots: IndexSet::new(),
        }
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Build a new root node from `factory`.
    ///
    /// With no snapshot (or `null`) the node takes the factory's defaults.
    /// Otherwise supplied fields override defaults, nested factory fields are
    /// built from their sub-snapshot, and unknown fields pass through as
    /// plain values.
    pub fn create(&mut self, factory: &Factory, snapshot: Option<&Value>) -> Result<NodeId> {
        self.instantiate(factory, snapshot, None, None)
    }

    pub(crate) fn instantiate(
        &mut self,
        factory: &Factory,
        snapshot: Option<&Value>,
        parent: Option<NodeId>,
        key: Option<&str>,
    ) -> Result<NodeId> {
        let snapshot = snapshot.filter(|v| !v.is_null());

        let (content, expected) = match factory.kind() {
            FactoryKind::Model(_) => (Content::Model(IndexMap::new()), "object"),
            FactoryKind::Map(_) => (Content::Map(IndexMap::new()), "object"),
            FactoryKind::Array(_) => (Content::Array(Vec::new()), "array"),
        };
        if let Some(value) = snapshot {
            let fits = match content {
                Content::Array(_) => value.is_array(),
                _ => value.is_object(),
            };
            if !fits {
                return Err(Error::shape_mismatch(
                    self.display_path(parent, key),
                    expected,
                    json_type_name(value),
                ));
            }
        }

        let id = self.nodes.insert(Slot {
            factory: factory.clone(),
            parent,
            key: key.map(str::to_string),
            content,
        });

        if let Err(e) = self.populate(id, factory, snapshot) {
            self.free_subtree(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Fill a freshly inserted node. Children are linked into the content as
    /// they are built so a failure part way frees everything built so far.
    fn populate(&mut self, id: NodeId, factory: &Factory, snapshot: Option<&Value>) -> Result<()> {
        match factory.kind() {
            FactoryKind::Model(fields) => {
                let provided = snapshot.and_then(Value::as_object);
                for (name, shape) in fields {
                    let supplied = provided.and_then(|obj| obj.get(name));
                    let field = match shape {
                        FieldShape::Value(default) => {
                            Field::Value(supplied.cloned().unwrap_or_else(|| default.clone()))
                        }
                        FieldShape::Factory(nested) => {
                            Field::Node(self.instantiate(nested, supplied, Some(id), Some(name))?)
                        }
                    };
                    if let Content::Model(content) = &mut self.slot_mut(id)?.content {
                        content.insert(name.clone(), field);
                    }
                }
                // Unknown fields pass through untouched.
                for (name, value) in provided.into_iter().flatten() {
                    if fields.contains_key(name) {
                        continue;
                    }
                    self.require_key(id, name)?;
                    if let Content::Model(content) = &mut self.slot_mut(id)?.content {
                        content.insert(name.clone(), Field::Value(value.clone()));
                    }
                }
            }
            FactoryKind::Map(element) => {
                for (key, value) in snapshot.and_then(Value::as_object).into_iter().flatten() {
                    self.require_key(id, key)?;
                    let child = self.instantiate(element, Some(value), Some(id), Some(key))?;
                    if let Content::Map(entries) = &mut self.slot_mut(id)?.content {
                        entries.insert(key.clone(), child);
                    }
                }
            }
            FactoryKind::Array(element) => {
                for (index, value) in snapshot
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .enumerate()
                {
                    let key = index.to_string();
                    let child = self.instantiate(element, Some(value), Some(id), Some(&key))?;
                    if let Content::Array(items) = &mut self.slot_mut(id)?.content {
                        items.push(child);
                    }
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Reading
    // ========================================================================

    pub(crate) fn slot(&self, id: NodeId) -> Result<&Slot> {
        self.nodes.get(id).ok_or(Error::StaleNode(id))
    }

    pub(crate) fn slot_mut(&mut self, id: NodeId) -> Result<&mut Slot> {
        self.nodes.get_mut(id).ok_or(Error::StaleNode(id))
    }

    /// Whether `id` refers to a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(id)
    }

    /// Number of live nodes across all roots.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The factory that produced `node`.
    pub fn factory_of(&self, node: NodeId) -> Result<&Factory> {
        Ok(&self.slot(node)?.factory)
    }

    /// The node `node` is attached to, if any.
    pub fn parent(&self, node: NodeId) -> Result<Option<NodeId>> {
        Ok(self.slot(node)?.parent)
    }

    /// The key `node` is stored under in its parent.
    pub fn key(&self, node: NodeId) -> Result<Option<&str>> {
        Ok(self.slot(node)?.key.as_deref())
    }

    /// The root of the tree containing `node`.
    pub fn root_of(&self, node: NodeId) -> Result<NodeId> {
        let mut current = node;
        while let Some(parent) = self.slot(current)?.parent {
            current = parent;
        }
        Ok(current)
    }

    /// Read the entry stored under `key`.
    pub fn get(&self, node: NodeId, key: &str) -> Result<Option<Child<'_>>> {
        let child = match &self.slot(node)?.content {
            Content::Model(fields) => fields.get(key).map(|field| match field {
                Field::Value(v) => Child::Value(v),
                Field::Node(id) => Child::Node(*id),
            }),
            Content::Map(entries) => entries.get(key).copied().map(Child::Node),
            Content::Array(items) => key
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index))
                .copied()
                .map(Child::Node),
        };
        Ok(child)
    }

    /// The child node stored under `key`, if the entry is a node.
    pub fn child(&self, node: NodeId, key: &str) -> Result<Option<NodeId>> {
        Ok(self.get(node, key)?.and_then(|child| child.as_node()))
    }

    /// The plain value stored under `key`, if the entry is a value.
    pub fn value(&self, node: NodeId, key: &str) -> Result<Option<&Value>> {
        Ok(self.get(node, key)?.and_then(|child| child.as_value()))
    }

    /// Keys of `node` in storage order; array indices for arrays.
    pub fn keys(&self, node: NodeId) -> Result<Vec<String>> {
        let keys = match &self.slot(node)?.content {
            Content::Model(fields) => fields.keys().cloned().collect(),
            Content::Map(entries) => entries.keys().cloned().collect(),
            Content::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
        };
        Ok(keys)
    }

    /// Number of entries in `node`.
    pub fn len(&self, node: NodeId) -> Result<usize> {
        let len = match &self.slot(node)?.content {
            Content::Model(fields) => fields.len(),
            Content::Map(entries) => entries.len(),
            Content::Array(items) => items.len(),
        };
        Ok(len)
    }

    pub fn is_empty(&self, node: NodeId) -> Result<bool> {
        Ok(self.len(node)? == 0)
    }

    // ========================================================================
    // Paths
    // ========================================================================

    /// Absolute path from the tree root to `node`; `""` for a root.
    pub fn get_path(&self, node: NodeId) -> Result<String> {
        Ok(self.path_of(node)?.to_string())
    }

    /// Like [`Tree::get_path`] but returns the parsed [`Path`].
    pub fn path_of(&self, node: NodeId) -> Result<Path> {
        let mut segments = Vec::new();
        let mut current = node;
        loop {
            let slot = self.slot(current)?;
            match (slot.parent, &slot.key) {
                (Some(parent), Some(key)) => {
                    segments.push(key.clone());
                    current = parent;
                }
                _ => break,
            }
        }
        segments.reverse();
        Ok(Path::from_segments(segments))
    }

    /// Path of `node` relative to `ancestor`, or `None` if `ancestor` is not
    /// `node` or one of its ancestors.
    pub fn relative_path(&self, ancestor: NodeId, node: NodeId) -> Result<Option<Path>> {
        let mut segments = Vec::new();
        let mut current = node;
        loop {
            if current == ancestor {
                segments.reverse();
                return Ok(Some(Path::from_segments(segments)));
            }
            let slot = self.slot(current)?;
            match (slot.parent, &slot.key) {
                (Some(parent), Some(key)) => {
                    segments.push(key.clone());
                    current = parent;
                }
                _ => return Ok(None),
            }
        }
    }

    /// Resolve `path` (relative to `root`) to a live node.
    pub fn resolve(&self, root: NodeId, path: &str) -> Result<NodeId> {
        self.resolve_path(root, &Path::parse(path))
    }

    pub fn resolve_path(&self, root: NodeId, path: &Path) -> Result<NodeId> {
        let mut current = root;
        self.slot(current)?;
        for segment in path.segments() {
            current = self
                .child(current, segment)?
                .ok_or_else(|| Error::PathNotFound(path.to_string()))?;
        }
        Ok(current)
    }

    /// `node` and each of its ancestors, innermost first, paired with the
    /// path from that ancestor down to `node`.
    pub(crate) fn lineage(&self, node: NodeId) -> Result<Vec<(NodeId, Path)>> {
        let mut chain = Vec::new();
        let mut segments: Vec<String> = Vec::new();
        let mut current = node;
        loop {
            let mut relative = segments.clone();
            relative.reverse();
            chain.push((current, Path::from_segments(relative)));

            let slot = self.slot(current)?;
            match (slot.parent, &slot.key) {
                (Some(parent), Some(key)) => {
                    segments.push(key.clone());
                    current = parent;
                }
                _ => break,
            }
        }
        Ok(chain)
    }

    fn display_path(&self, parent: Option<NodeId>, key: Option<&str>) -> String {
        let base = parent
            .and_then(|p| self.path_of(p).ok())
            .unwrap_or_default();
        match key {
            Some(key) => base.join(key).to_string(),
            None => base.to_string(),
        }
    }

    /// Map keys and model fields must be non-empty: `"/"` addresses the root.
    pub(crate) fn require_key(&self, node: NodeId, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::shape_mismatch(
                self.get_path(node)?,
                "non-empty key",
                "empty key",
            ));
        }
        Ok(())
    }

    fn entry_path(&self, node: NodeId, key: &str) -> String {
        self.display_path(Some(node), Some(key))
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Store `input` under `key`.
    ///
    /// Maps insert or overwrite. Models set the field, lifting plain values
    /// through a nested factory if the field declares one. Arrays overwrite
    /// the element at `key`, or append when `key` equals the length.
    pub fn set(&mut self, node: NodeId, key: &str, input: impl Into<Input>) -> Result<()> {
        let input = input.into();
        self.batch(|tree| tree.set_entry(node, key, input))
    }

    /// Remove the entry under `key`. Returns false if there was none.
    pub fn delete(&mut self, node: NodeId, key: &str) -> Result<bool> {
        self.batch(|tree| tree.delete_entry(node, key, true))
    }

    /// Append to an array, returning the new element's index.
    pub fn push(&mut self, node: NodeId, input: impl Into<Input>) -> Result<usize> {
        let input = input.into();
        self.batch(|tree| {
            let index = tree.array_len(node)?;
            tree.insert_entry(node, index, input)?;
            Ok(index)
        })
    }

    /// Insert into an array at `index`, shifting later elements.
    pub fn insert(&mut self, node: NodeId, index: usize, input: impl Into<Input>) -> Result<()> {
        let input = input.into();
        self.batch(|tree| tree.insert_entry(node, index, input))
    }

    /// Remove the array element at `index`, shifting later elements.
    pub fn remove(&mut self, node: NodeId, index: usize) -> Result<()> {
        self.batch(|tree| tree.remove_entry(node, index))
    }

    /// Remove every entry of `node`.
    pub fn clear(&mut self, node: NodeId) -> Result<()> {
        self.batch(|tree| tree.clear_entries(node))
    }

    /// Unlink `node` from its parent, keeping it alive as a new root.
    pub fn detach(&mut self, node: NodeId) -> Result<()> {
        self.batch(|tree| tree.detach_node(node))
    }

    /// Detach `node` if needed and free it and all its descendants.
    pub fn destroy(&mut self, node: NodeId) -> Result<()> {
        self.batch(|tree| {
            tree.detach_node(node)?;
            tree.free_subtree(node);
            Ok(())
        })
    }

    pub(crate) fn set_entry(&mut self, node: NodeId, key: &str, input: Input) -> Result<()> {
        let factory = self.slot(node)?.factory.clone();
        match factory.kind() {
            FactoryKind::Map(element) => {
                self.require_key(node, key)?;
                let child = self.lift(element, input, node, key)?;
                let previous = match &mut self.slot_mut(node)?.content {
                    Content::Map(entries) => entries.insert(key.to_string(), child),
                    other => return Err(Error::shape_mismatch(key, "map", other.type_name())),
                };
                let change = self.settle(previous.map(Field::Node));
                self.publish(node, key, change)
            }
            FactoryKind::Model(fields) => {
                self.require_key(node, key)?;
                let field = match (fields.get(key), input) {
                    (Some(FieldShape::Factory(nested)), input) => {
                        Field::Node(self.lift(nested, input, node, key)?)
                    }
                    (_, Input::Value(value)) => Field::Value(value),
                    (_, Input::Node(child)) => {
                        self.attach(child, node, key)?;
                        Field::Node(child)
                    }
                };
                let previous = match &mut self.slot_mut(node)?.content {
                    Content::Model(content) => content.insert(key.to_string(), field),
                    other => return Err(Error::shape_mismatch(key, "model", other.type_name())),
                };
                let change = self.settle(previous);
                self.publish(node, key, change)
            }
            FactoryKind::Array(element) => {
                let index = self.parse_index(node, key)?;
                let len = self.array_len(node)?;
                if index > len {
                    return Err(Error::IndexOutOfBounds {
                        path: self.get_path(node)?,
                        index,
                        len,
                    });
                }
                let key = index.to_string();
                let child = self.lift(element, input, node, &key)?;
                let previous = match &mut self.slot_mut(node)?.content {
                    Content::Array(items) if index == len => {
                        items.push(child);
                        None
                    }
                    Content::Array(items) => Some(std::mem::replace(&mut items[index], child)),
                    other => return Err(Error::shape_mismatch(key, "array", other.type_name())),
                };
                let change = self.settle(previous.map(Field::Node));
                self.publish(node, &key, change)
            }
        }
    }

    /// Free a replaced entry and report what kind of change the write was.
    fn settle(&mut self, previous: Option<Field>) -> Change {
        match previous {
            Some(Field::Node(old)) => {
                self.free_subtree(old);
                Change::Replaced
            }
            Some(Field::Value(_)) => Change::Replaced,
            None => Change::Added,
        }
    }

    pub(crate) fn insert_entry(&mut self, node: NodeId, index: usize, input: Input) -> Result<()> {
        let factory = self.slot(node)?.factory.clone();
        let FactoryKind::Array(element) = factory.kind() else {
            return Err(Error::shape_mismatch(
                self.get_path(node)?,
                "array",
                factory.kind().type_name(),
            ));
        };

        let len = self.array_len(node)?;
        if index > len {
            return Err(Error::IndexOutOfBounds {
                path: self.get_path(node)?,
                index,
                len,
            });
        }

        let key = index.to_string();
        let child = self.lift(element, input, node, &key)?;
        if let Content::Array(items) = &mut self.slot_mut(node)?.content {
            items.insert(index, child);
        }
        self.reindex(node, index + 1)?;
        self.publish(node, &key, Change::Added)
    }

    pub(crate) fn remove_entry(&mut self, node: NodeId, index: usize) -> Result<()> {
        let len = self.array_len(node)?;
        if index >= len {
            return Err(Error::IndexOutOfBounds {
                path: self.get_path(node)?,
                index,
                len,
            });
        }
        self.delete_entry(node, &index.to_string(), true)?;
        Ok(())
    }

    pub(crate) fn delete_entry(&mut self, node: NodeId, key: &str, free: bool) -> Result<bool> {
        let removed = match &mut self.slot_mut(node)?.content {
            Content::Model(fields) => fields.shift_remove(key),
            Content::Map(entries) => entries.shift_remove(key).map(Field::Node),
            Content::Array(items) => match key.parse::<usize>() {
                Ok(index) if index < items.len() => Some(Field::Node(items.remove(index))),
                _ => None,
            },
        };
        let Some(removed) = removed else {
            return Ok(false);
        };

        if let Ok(index) = key.parse::<usize>() {
            if matches!(self.slot(node)?.content, Content::Array(_)) {
                self.reindex(node, index)?;
            }
        }

        if let Field::Node(child) = removed {
            if free {
                self.free_subtree(child);
            } else {
                let slot = self.slot_mut(child)?;
                slot.parent = None;
                slot.key = None;
            }
        }

        self.publish(node, key, Change::Removed)?;
        Ok(true)
    }

    pub(crate) fn clear_entries(&mut self, node: NodeId) -> Result<()> {
        let mut keys = self.keys(node)?;
        if matches!(self.slot(node)?.content, Content::Array(_)) {
            // Highest index first so every emitted path is still valid on replay.
            keys.reverse();
        }
        for key in keys {
            self.delete_entry(node, &key, true)?;
        }
        Ok(())
    }

    fn detach_node(&mut self, node: NodeId) -> Result<()> {
        let slot = self.slot(node)?;
        match (slot.parent, slot.key.clone()) {
            (Some(parent), Some(key)) => {
                self.delete_entry(parent, &key, false)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Turn `input` into a node made by `expected`, attached under `parent`.
    fn lift(
        &mut self,
        expected: &Factory,
        input: Input,
        parent: NodeId,
        key: &str,
    ) -> Result<NodeId> {
        match input {
            Input::Value(value) => {
                self.instantiate(expected, Some(&value), Some(parent), Some(key))
            }
            Input::Node(child) => {
                let factory = &self.slot(child)?.factory;
                if !factory.same(expected) {
                    return Err(Error::shape_mismatch(
                        self.entry_path(parent, key),
                        expected.name(),
                        factory.name(),
                    ));
                }
                self.attach(child, parent, key)?;
                Ok(child)
            }
        }
    }

    fn attach(&mut self, child: NodeId, parent: NodeId, key: &str) -> Result<()> {
        if self.slot(child)?.parent.is_some() {
            return Err(Error::AlreadyAttached(self.get_path(child)?));
        }
        // `child` is a root, so it is an ancestor of `parent` only if it is
        // the root of `parent`'s tree.
        if self.root_of(parent)? == child {
            return Err(Error::CyclicTree);
        }
        let slot = self.slot_mut(child)?;
        slot.parent = Some(parent);
        slot.key = Some(key.to_string());
        Ok(())
    }

    /// Rewrite the keys of array elements from `start` onwards.
    fn reindex(&mut self, node: NodeId, start: usize) -> Result<()> {
        let shifted: Vec<NodeId> = match &self.slot(node)?.content {
            Content::Array(items) => items.iter().skip(start).copied().collect(),
            _ => return Ok(()),
        };
        for (offset, child) in shifted.into_iter().enumerate() {
            self.slot_mut(child)?.key = Some((start + offset).to_string());
        }
        Ok(())
    }

    fn array_len(&self, node: NodeId) -> Result<usize> {
        match &self.slot(node)?.content {
            Content::Array(items) => Ok(items.len()),
            other => Err(Error::shape_mismatch(
                self.get_path(node)?,
                "array",
                other.type_name(),
            )),
        }
    }

    fn parse_index(&self, node: NodeId, key: &str) -> Result<usize> {
        key.parse::<usize>()
            .map_err(|_| Error::shape_mismatch(self.entry_path(node, key), "array index", key))
    }

    /// Free `node` and everything beneath it, dropping their listeners.
    pub(crate) fn free_subtree(&mut self, node: NodeId) {
        let mut stack = vec![node];
        while let Some(next) = stack.pop() {
            if let Some(slot) = self.nodes.remove(next) {
                stack.extend(slot.content.children());
                self.patch_listeners.forget(next);
                self.deep_patch_listeners.forget(next);
                self.snapshot_listeners.forget(next);
                self.action_listeners.forget(next);
                self.pending_snapshots.shift_remove(&next);
            }
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    pub(crate) fn next_listener_id(&mut self) -> ListenerId {
        self.next_listener += 1;
        ListenerId(self.next_listener)
    }

    /// Remove a listener registered with any `on_*` method.
    ///
    /// Returns false if the listener was already removed.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.patch_listeners.unsubscribe(id)
            || self.deep_patch_listeners.unsubscribe(id)
            || self.snapshot_listeners.unsubscribe(id)
            || self.action_listeners.unsubscribe(id)
    }

    /// Run `f` as one operation: snapshot listeners fire once, after the
    /// outermost batch finishes, even if `f` fails part way.
    pub(crate) fn batch<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.batch_depth += 1;
        let result = f(self);
        self.batch_depth -= 1;
        if self.batch_depth == 0 {
            self.flush_snapshots();
        }
        result
    }

    fn flush_snapshots(&mut self) {
        let pending = std::mem::take(&mut self.pending_snapshots);
        for node in pending {
            match self.get_snapshot(node) {
                Ok(snapshot) => self.snapshot_listeners.emit(node, &snapshot),
                Err(e) => tracing::warn!(node = %node, error = %e, "skipping snapshot emission"),
            }
        }
    }

    /// Report a change to the entry `key` of `container`.
    fn publish(&mut self, container: NodeId, key: &str, change: Change) -> Result<()> {
        let lineage = self.lineage(container)?;

        let wants_patch = self.patch_listeners.has_listeners(container)
            || lineage
                .iter()
                .any(|(node, _)| self.deep_patch_listeners.has_listeners(*node));

        if wants_patch {
            let value = match change {
                Change::Removed => None,
                Change::Added | Change::Replaced => Some(self.entry_snapshot(container, key)?),
            };
            let patch = Patch::from_change(change, Path::root().join(key), value);
            tracing::trace!(
                node = %container,
                op = patch.op(),
                path = %patch.path(),
                "publishing patch"
            );

            self.patch_listeners.emit(container, &patch);
            for (ancestor, prefix) in &lineage {
                if self.deep_patch_listeners.has_listeners(*ancestor) {
                    let rebased = patch.rebase(prefix);
                    self.deep_patch_listeners.emit(*ancestor, &rebased);
                }
            }
        }

        for (node, _) in lineage {
            if self.snapshot_listeners.has_listeners(node) {
                self.pending_snapshots.insert(node);
            }
        }
        Ok(())
    }

    fn entry_snapshot(&self, node: NodeId, key: &str) -> Result<Value> {
        match self.get(node, key)? {
            Some(Child::Node(id)) => self.get_snapshot(id),
            Some(Child::Value(value)) => Ok(value.clone()),
            None => Err(Error::PathNotFound(self.entry_path(node, key))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{array_of, create_factory, map_of};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn item() -> Factory {
        create_factory(json!({"to": "world"}))
    }

    fn collect_patches(tree: &mut Tree, node: NodeId) -> Arc<Mutex<Vec<Patch>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        tree.on_patch(node, move |p| sink.lock().unwrap().push(p.clone()))
            .unwrap();
        log
    }

    #[test]
    fn create_with_defaults() {
        let mut tree = Tree::new();
        let node = tree.create(&item(), None).unwrap();
        assert_eq!(tree.value(node, "to").unwrap(), Some(&json!("world")));
        assert_eq!(tree.get_path(node).unwrap(), "");
        assert_eq!(tree.parent(node).unwrap(), None);
    }

    #[test]
    fn create_with_partial_snapshot() {
        let factory = Factory::builder("Todo")
            .field("title", "")
            .field("done", false)
            .build();
        let mut tree = Tree::new();
        let node = tree.create(&factory, Some(&json!({"title": "milk"}))).unwrap();

        assert_eq!(
            tree.get_snapshot(node).unwrap(),
            json!({"title": "milk", "done": false})
        );
    }

    #[test]
    fn create_rejects_wrong_kind() {
        let mut tree = Tree::new();
        let result = tree.create(&map_of(&item()), Some(&json!([1, 2])));
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
        assert_eq!(tree.node_count(), 0);
    }

    #[test]
    fn failed_nested_create_frees_partial_nodes() {
        let doc = map_of(&item());
        let mut tree = Tree::new();
        let result = tree.create(&doc, Some(&json!({"a": {"to": "x"}, "b": 7})));
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
        assert_eq!(tree.node_count(), 0);
    }

    #[test]
    fn set_lifts_plain_values() {
        let mut tree = Tree::new();
        let doc = tree.create(&map_of(&item()), None).unwrap();
        tree.set(doc, "hello", json!({"to": "mars"})).unwrap();

        let child = tree.child(doc, "hello").unwrap().unwrap();
        assert_eq!(tree.factory_of(child).unwrap().name(), "Model");
        assert_eq!(tree.get_path(child).unwrap(), "/hello");
        assert_eq!(tree.parent(child).unwrap(), Some(doc));
    }

    #[test]
    fn set_rejects_foreign_factory_node() {
        let mut tree = Tree::new();
        let doc = tree.create(&map_of(&item()), None).unwrap();
        let stranger = tree.create(&item(), None).unwrap();

        let result = tree.set(doc, "x", stranger);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn attached_node_cannot_be_attached_twice() {
        let element = item();
        let mut tree = Tree::new();
        let doc = tree.create(&map_of(&element), None).unwrap();
        let node = tree.create(&element, None).unwrap();

        tree.set(doc, "a", node).unwrap();
        let result = tree.set(doc, "b", node);
        assert_eq!(result, Err(Error::AlreadyAttached("/a".into())));
    }

    #[test]
    fn cyclic_attach_fails_fast() {
        let mut tree = Tree::new();
        let container = create_factory(json!({}));
        let outer = tree.create(&container, None).unwrap();
        let inner = tree.create(&container, None).unwrap();

        tree.set(outer, "inner", inner).unwrap();
        assert_eq!(tree.set(inner, "outer", outer), Err(Error::CyclicTree));
        assert_eq!(tree.set(outer, "self", outer), Err(Error::CyclicTree));
    }

    #[test]
    fn replaced_nodes_go_stale() {
        let mut tree = Tree::new();
        let doc = tree.create(&map_of(&item()), None).unwrap();
        tree.set(doc, "a", json!({})).unwrap();
        let first = tree.child(doc, "a").unwrap().unwrap();

        tree.set(doc, "a", json!({"to": "b"})).unwrap();
        assert!(!tree.contains(first));
        assert_eq!(tree.get_path(first), Err(Error::StaleNode(first)));
    }

    #[test]
    fn delete_missing_key_is_noop() {
        let mut tree = Tree::new();
        let doc = tree.create(&map_of(&item()), None).unwrap();
        let patches = collect_patches(&mut tree, doc);

        assert!(!tree.delete(doc, "nope").unwrap());
        assert!(patches.lock().unwrap().is_empty());
    }

    #[test]
    fn array_paths_follow_positions() {
        let mut tree = Tree::new();
        let list = tree.create(&array_of(&item()), None).unwrap();
        tree.push(list, json!({"to": "a"})).unwrap();
        tree.push(list, json!({"to": "b"})).unwrap();
        tree.insert(list, 0, json!({"to": "z"})).unwrap();

        let b = tree.child(list, "2").unwrap().unwrap();
        assert_eq!(tree.get_path(b).unwrap(), "/2");

        tree.remove(list, 0).unwrap();
        assert_eq!(tree.get_path(b).unwrap(), "/1");
        assert_eq!(
            tree.get_snapshot(list).unwrap(),
            json!([{"to": "a"}, {"to": "b"}])
        );
    }

    #[test]
    fn array_set_out_of_bounds() {
        let mut tree = Tree::new();
        let list = tree.create(&array_of(&item()), None).unwrap();
        let result = tree.set(list, "3", json!({}));
        assert!(matches!(
            result,
            Err(Error::IndexOutOfBounds { index: 3, len: 0, .. })
        ));
    }

    #[test]
    fn array_set_non_index_key() {
        let mut tree = Tree::new();
        let list = tree.create(&array_of(&item()), None).unwrap();
        let result = tree.set(list, "first", json!({}));
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn array_patches() {
        let mut tree = Tree::new();
        let list = tree.create(&array_of(&item()), None).unwrap();
        let patches = collect_patches(&mut tree, list);

        tree.push(list, json!({"to": "a"})).unwrap();
        tree.set(list, "0", json!({"to": "b"})).unwrap();
        tree.remove(list, 0).unwrap();

        assert_eq!(
            *patches.lock().unwrap(),
            vec![
                Patch::add("/0", json!({"to": "a"})),
                Patch::replace("/0", json!({"to": "b"})),
                Patch::remove("/0"),
            ]
        );
    }

    #[test]
    fn clear_array_removes_from_the_end() {
        let mut tree = Tree::new();
        let list = tree
            .create(&array_of(&item()), Some(&json!([{}, {}])))
            .unwrap();
        let patches = collect_patches(&mut tree, list);

        tree.clear(list).unwrap();

        assert_eq!(
            *patches.lock().unwrap(),
            vec![Patch::remove("/1"), Patch::remove("/0")]
        );
        assert!(tree.is_empty(list).unwrap());
    }

    #[test]
    fn detach_keeps_node_alive() {
        let mut tree = Tree::new();
        let doc = tree
            .create(&map_of(&item()), Some(&json!({"a": {"to": "x"}})))
            .unwrap();
        let a = tree.child(doc, "a").unwrap().unwrap();
        let patches = collect_patches(&mut tree, doc);

        tree.detach(a).unwrap();

        assert!(tree.contains(a));
        assert_eq!(tree.parent(a).unwrap(), None);
        assert_eq!(tree.get_snapshot(a).unwrap(), json!({"to": "x"}));
        assert_eq!(tree.get_snapshot(doc).unwrap(), json!({}));
        assert_eq!(*patches.lock().unwrap(), vec![Patch::remove("/a")]);

        // A detached node can be attached again.
        tree.set(doc, "b", a).unwrap();
        assert_eq!(tree.get_path(a).unwrap(), "/b");
    }

    #[test]
    fn destroy_frees_subtree() {
        let mut tree = Tree::new();
        let doc = tree
            .create(&map_of(&item()), Some(&json!({"a": {}, "b": {}})))
            .unwrap();
        assert_eq!(tree.node_count(), 3);

        tree.destroy(doc).unwrap();
        assert_eq!(tree.node_count(), 0);
    }

    #[test]
    fn model_field_with_nested_factory_lifts_values() {
        let point = Factory::builder("Point").field("x", 0).field("y", 0).build();
        let shape = Factory::builder("Shape").child("at", &point).build();
        let mut tree = Tree::new();
        let node = tree.create(&shape, None).unwrap();

        tree.set(node, "at", json!({"x": 3})).unwrap();

        let at = tree.child(node, "at").unwrap().unwrap();
        assert_eq!(tree.factory_of(at).unwrap(), &point);
        assert_eq!(tree.get_snapshot(node).unwrap(), json!({"at": {"x": 3, "y": 0}}));
    }

    #[test]
    fn resolve_and_relative_paths() {
        let mut tree = Tree::new();
        let doc = tree
            .create(
                &map_of(&array_of(&item())),
                Some(&json!({"list": [{"to": "a"}, {"to": "b"}]})),
            )
            .unwrap();

        let second = tree.resolve(doc, "/list/1").unwrap();
        assert_eq!(tree.get_path(second).unwrap(), "/list/1");
        assert_eq!(tree.resolve(doc, "").unwrap(), doc);
        assert_eq!(tree.resolve(doc, "/").unwrap(), doc);

        let list = tree.resolve(doc, "/list").unwrap();
        assert_eq!(
            tree.relative_path(list, second).unwrap().unwrap().to_string(),
            "/1"
        );
        assert_eq!(tree.relative_path(second, list).unwrap(), None);

        assert_eq!(
            tree.resolve(doc, "/list/9"),
            Err(Error::PathNotFound("/list/9".into()))
        );
        assert_eq!(
            tree.resolve(doc, "/missing/0"),
            Err(Error::PathNotFound("/missing/0".into()))
        );
    }

    #[test]
    fn escaped_keys_roundtrip_through_paths() {
        let mut tree = Tree::new();
        let doc = tree.create(&map_of(&item()), None).unwrap();
        tree.set(doc, "a/b", json!({})).unwrap();

        let child = tree.child(doc, "a/b").unwrap().unwrap();
        let path = tree.get_path(child).unwrap();
        assert_eq!(path, "/a~1b");
        assert_eq!(tree.resolve(doc, &path).unwrap(), child);
    }

    #[test]
    fn unsubscribe_is_effective() {
        let mut tree = Tree::new();
        let doc = tree.create(&map_of(&item()), None).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let id = tree
            .on_patch(doc, move |p| sink.lock().unwrap().push(p.clone()))
            .unwrap();

        tree.set(doc, "a", json!({})).unwrap();
        assert!(tree.unsubscribe(id));
        tree.set(doc, "b", json!({})).unwrap();

        assert_eq!(log.lock().unwrap().len(), 1);
        assert!(!tree.unsubscribe(id));
    }

    #[test]
    fn patch_listener_panic_does_not_block_mutation() {
        let mut tree = Tree::new();
        let doc = tree.create(&map_of(&item()), None).unwrap();
        tree.on_patch(doc, |_| panic!("bad subscriber")).unwrap();
        let patches = collect_patches(&mut tree, doc);

        tree.set(doc, "a", json!({})).unwrap();

        assert_eq!(patches.lock().unwrap().len(), 1);
        assert_eq!(tree.get_snapshot(doc).unwrap(), json!({"a": {"to": "world"}}));
    }
}
