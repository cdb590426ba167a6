//! JSON-Patch style change records.
//!
//! Every structural mutation produces exactly one [`Patch`]. Paths are
//! relative to the node whose listener receives them, so a patch emitted by
//! one tree can be applied to an equivalent node in another.

use crate::{error::Result, Error, FactoryKind, ListenerId, NodeId, Path, Tree};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single change.
///
/// ```
/// use grove_engine::Patch;
/// use serde_json::json;
///
/// let json = r#"{"op": "add", "path": "/hello", "value": {"to": "world"}}"#;
/// let patch = Patch::from_json(json).unwrap();
/// assert_eq!(patch, Patch::add("/hello", json!({"to": "world"})));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Patch {
    Add { path: Path, value: Value },
    Replace { path: Path, value: Value },
    Remove { path: Path },
}

/// Kind of change a mutation made to one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Change {
    Added,
    Replaced,
    Removed,
}

impl Patch {
    pub fn add(path: impl Into<Path>, value: Value) -> Self {
        Patch::Add {
            path: path.into(),
            value,
        }
    }

    pub fn replace(path: impl Into<Path>, value: Value) -> Self {
        Patch::Replace {
            path: path.into(),
            value,
        }
    }

    pub fn remove(path: impl Into<Path>) -> Self {
        Patch::Remove { path: path.into() }
    }

    pub(crate) fn from_change(change: Change, path: Path, value: Option<Value>) -> Self {
        match change {
            Change::Added => Patch::Add {
                path,
                value: value.unwrap_or(Value::Null),
            },
            Change::Replaced => Patch::Replace {
                path,
                value: value.unwrap_or(Value::Null),
            },
            Change::Removed => Patch::Remove { path },
        }
    }

    /// Operation name as it appears on the wire.
    pub fn op(&self) -> &'static str {
        match self {
            Patch::Add { .. } => "add",
            Patch::Replace { .. } => "replace",
            Patch::Remove { .. } => "remove",
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Patch::Add { path, .. } | Patch::Replace { path, .. } | Patch::Remove { path } => path,
        }
    }

    /// The new value, for `add` and `replace`.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Patch::Add { value, .. } | Patch::Replace { value, .. } => Some(value),
            Patch::Remove { .. } => None,
        }
    }

    /// The same change with `prefix` prepended to its path.
    pub fn rebase(&self, prefix: &Path) -> Self {
        let path = prefix.concat(self.path());
        match self {
            Patch::Add { value, .. } => Patch::Add {
                path,
                value: value.clone(),
            },
            Patch::Replace { value, .. } => Patch::Replace {
                path,
                value: value.clone(),
            },
            Patch::Remove { .. } => Patch::Remove { path },
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidPatch(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidPatch(e.to_string()))
    }
}

impl TryFrom<Value> for Patch {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::InvalidPatch(e.to_string()))
    }
}

impl Tree {
    /// Observe changes to the direct entries of `node`.
    ///
    /// Paths are relative to `node`, e.g. `/hello` for an entry of a map.
    pub fn on_patch<F>(&mut self, node: NodeId, listener: F) -> Result<ListenerId>
    where
        F: FnMut(&Patch) + Send + 'static,
    {
        self.slot(node)?;
        let id = self.next_listener_id();
        self.patch_listeners.subscribe(node, id, Box::new(listener));
        Ok(id)
    }

    /// Observe changes anywhere in the subtree rooted at `node`.
    ///
    /// Paths are relative to `node`. Replaying the received patches, in
    /// order, on a node holding the same starting snapshot reproduces the
    /// subtree.
    pub fn on_patch_deep<F>(&mut self, node: NodeId, listener: F) -> Result<ListenerId>
    where
        F: FnMut(&Patch) + Send + 'static,
    {
        self.slot(node)?;
        let id = self.next_listener_id();
        self.deep_patch_listeners.subscribe(node, id, Box::new(listener));
        Ok(id)
    }

    /// Apply one patch with paths relative to `root`.
    pub fn apply_patch(&mut self, root: NodeId, patch: &Patch) -> Result<NodeId> {
        self.batch(|tree| tree.apply_one(root, patch))?;
        Ok(root)
    }

    /// Apply patches in order, stopping at the first failure.
    ///
    /// Patches before the failing one stay applied.
    pub fn apply_patches(&mut self, root: NodeId, patches: &[Patch]) -> Result<NodeId> {
        tracing::debug!(root = %root, count = patches.len(), "applying patches");
        self.batch(|tree| {
            for (index, patch) in patches.iter().enumerate() {
                if let Err(e) = tree.apply_one(root, patch) {
                    tracing::debug!(
                        index,
                        op = patch.op(),
                        path = %patch.path(),
                        error = %e,
                        "patch rejected"
                    );
                    return Err(e);
                }
            }
            Ok(())
        })?;
        Ok(root)
    }

    fn apply_one(&mut self, root: NodeId, patch: &Patch) -> Result<()> {
        let Some((parent_path, last)) = patch.path().split_last() else {
            return match patch {
                Patch::Add { value, .. } | Patch::Replace { value, .. } => {
                    self.reconcile(root, value)
                }
                Patch::Remove { .. } => Err(Error::InvalidPatch("cannot remove the root".into())),
            };
        };

        let target = self.resolve_path(root, &parent_path)?;
        let is_array = matches!(self.factory_of(target)?.kind(), FactoryKind::Array(_));

        match patch {
            Patch::Add { value, .. } if is_array => {
                let index = if last == "-" {
                    self.len(target)?
                } else {
                    array_index(patch, last)?
                };
                self.insert_entry(target, index, value.clone().into())
            }
            Patch::Add { value, .. } | Patch::Replace { value, .. } => {
                self.set_entry(target, last, value.clone().into())
            }
            Patch::Remove { .. } if is_array => {
                let index = array_index(patch, last)?;
                self.remove_entry(target, index)
            }
            Patch::Remove { .. } => self.delete_entry(target, last, true).map(|_| ()),
        }
    }
}

fn array_index(patch: &Patch, segment: &str) -> Result<usize> {
    segment.parse::<usize>().map_err(|_| {
        Error::InvalidPatch(format!(
            "'{segment}' is not an array index in {} {}",
            patch.op(),
            patch.path()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{array_of, create_factory, map_of};
    use serde_json::json;

    #[test]
    fn wire_format() {
        let patch = Patch::replace("/a~1b", json!(1));
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, json!({"op": "replace", "path": "/a~1b", "value": 1}));

        let remove = serde_json::to_value(Patch::remove("/x")).unwrap();
        assert_eq!(remove, json!({"op": "remove", "path": "/x"}));
    }

    #[test]
    fn malformed_patches() {
        for bad in [
            json!({"op": "move", "path": "/a"}),
            json!({"op": "add", "path": "/a"}),
            json!({"path": "/a", "value": 1}),
            json!("add"),
        ] {
            assert!(matches!(Patch::try_from(bad), Err(Error::InvalidPatch(_))));
        }
        assert!(matches!(Patch::from_json("{"), Err(Error::InvalidPatch(_))));
    }

    #[test]
    fn rebase_prefixes_path() {
        let patch = Patch::add("/to", json!("x"));
        let rebased = patch.rebase(&Path::parse("/hello"));
        assert_eq!(rebased, Patch::add("/hello/to", json!("x")));
    }

    #[test]
    fn apply_to_nested_path() {
        let item = create_factory(json!({"to": "world"}));
        let mut tree = Tree::new();
        let doc = tree
            .create(&map_of(&item), Some(&json!({"hello": {}})))
            .unwrap();

        tree.apply_patch(doc, &Patch::replace("/hello/to", json!("mars")))
            .unwrap();
        assert_eq!(
            tree.get_snapshot(doc).unwrap(),
            json!({"hello": {"to": "mars"}})
        );
    }

    #[test]
    fn apply_to_array() {
        let mut tree = Tree::new();
        let list = tree
            .create(&array_of(&create_factory(json!({}))), None)
            .unwrap();

        tree.apply_patches(
            list,
            &[
                Patch::add("/-", json!({"n": 1})),
                Patch::add("/0", json!({"n": 0})),
                Patch::add("/2", json!({"n": 2})),
                Patch::remove("/1"),
            ],
        )
        .unwrap();

        assert_eq!(
            tree.get_snapshot(list).unwrap(),
            json!([{"n": 0}, {"n": 2}])
        );
    }

    #[test]
    fn root_patches() {
        let item = create_factory(json!({"to": "world"}));
        let mut tree = Tree::new();
        let doc = tree.create(&map_of(&item), None).unwrap();

        tree.apply_patch(doc, &Patch::replace("", json!({"a": {"to": "x"}})))
            .unwrap();
        assert_eq!(tree.get_snapshot(doc).unwrap(), json!({"a": {"to": "x"}}));

        let result = tree.apply_patch(doc, &Patch::remove(""));
        assert!(matches!(result, Err(Error::InvalidPatch(_))));
    }

    #[test]
    fn unresolvable_parent() {
        let item = create_factory(json!({}));
        let mut tree = Tree::new();
        let doc = tree.create(&map_of(&item), None).unwrap();

        let result = tree.apply_patch(doc, &Patch::add("/missing/x", json!(1)));
        assert_eq!(result, Err(Error::PathNotFound("/missing".into())));
    }

    #[test]
    fn bad_array_segment() {
        let mut tree = Tree::new();
        let list = tree
            .create(&array_of(&create_factory(json!({}))), None)
            .unwrap();
        let result = tree.apply_patch(list, &Patch::remove("/first"));
        assert!(matches!(result, Err(Error::InvalidPatch(_))));
    }

    #[test]
    fn deep_listener_sees_nested_changes() {
        let item = create_factory(json!({"to": "world"}));
        let mut tree = Tree::new();
        let doc = tree
            .create(&map_of(&item), Some(&json!({"hello": {}})))
            .unwrap();
        let shallow = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let deep = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        {
            let shallow = shallow.clone();
            tree.on_patch(doc, move |p| shallow.lock().unwrap().push(p.clone()))
                .unwrap();
            let deep = deep.clone();
            tree.on_patch_deep(doc, move |p| deep.lock().unwrap().push(p.clone()))
                .unwrap();
        }

        let hello = tree.child(doc, "hello").unwrap().unwrap();
        tree.set(hello, "to", json!("mars")).unwrap();

        assert!(shallow.lock().unwrap().is_empty());
        assert_eq!(
            *deep.lock().unwrap(),
            vec![Patch::replace("/hello/to", json!("mars"))]
        );
    }
}
