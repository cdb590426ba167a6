//! A tree with one distinguished root and an outbox of the patches it emits.
//!
//! This is the unit hosts work with: the FFI layer hands out `Document`
//! pointers, and the relay server keeps one per hosted document.

use crate::{error::Result, Action, Factory, FactoryDef, NodeId, Patch, Tree};
use serde_json::Value;
use std::sync::{Arc, Mutex};

pub struct Document {
    factory: Factory,
    tree: Tree,
    root: NodeId,
    outbox: Arc<Mutex<Vec<Patch>>>,
}

impl Document {
    /// Create a document whose root is built by `factory` from `snapshot`.
    pub fn new(factory: &Factory, snapshot: Option<&Value>) -> Result<Self> {
        let mut tree = Tree::new();
        let root = tree.create(factory, snapshot)?;

        let outbox = Arc::new(Mutex::new(Vec::new()));
        let sink = outbox.clone();
        tree.on_patch_deep(root, move |patch| {
            if let Ok(mut pending) = sink.lock() {
                pending.push(patch.clone());
            }
        })?;

        Ok(Self {
            factory: factory.clone(),
            tree,
            root,
            outbox,
        })
    }

    pub fn from_def(def: &FactoryDef, snapshot: Option<&Value>) -> Result<Self> {
        Self::new(&def.build(), snapshot)
    }

    pub fn factory(&self) -> &Factory {
        &self.factory
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    pub fn snapshot(&self) -> Result<Value> {
        self.tree.get_snapshot(self.root)
    }

    pub fn apply_snapshot(&mut self, snapshot: &Value) -> Result<()> {
        self.tree.apply_snapshot(self.root, snapshot)?;
        Ok(())
    }

    pub fn apply_patches(&mut self, patches: &[Patch]) -> Result<()> {
        self.tree.apply_patches(self.root, patches)?;
        Ok(())
    }

    pub fn apply_actions(&mut self, actions: &[Action]) -> Result<Vec<Value>> {
        self.tree.apply_actions(self.root, actions)
    }

    /// Drain the patches emitted since the last call, paths relative to the
    /// root.
    pub fn take_patches(&mut self) -> Vec<Patch> {
        match self.outbox.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("factory", &self.factory.name())
            .field("root", &self.root)
            .field("tree", &self.tree)
            .finish()
    }
}
