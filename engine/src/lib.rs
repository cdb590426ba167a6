//! # Grove Engine
//!
//! Structural synchronization for typed, mutable trees.
//!
//! A tree is built from **factories** that describe the default shape of each
//! node. Every node can be turned into a plain-JSON **snapshot**, every
//! mutation is reported as a JSON-Patch style **patch**, and named **actions**
//! can be recorded and replayed. Snapshots, patches and actions can each be
//! applied back onto a tree to reconstruct equivalent state, which is what
//! undo/redo, persistence and multi-client sync are built on.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine knows nothing of files, network or platform
//! - **Synchronous**: listeners run before the mutating call returns
//! - **Arena-backed**: nodes are generational handles into a [`Tree`], parent
//!   links are plain relations
//! - **Portable**: exposed over a C ABI through [`ffi`]
//!
//! ## Core Concepts
//!
//! ### Factories
//!
//! - [`create_factory`] / [`Factory::builder`] - a model with fixed fields
//! - [`map_of`] - a keyed collection of one element factory
//! - [`array_of`] - an ordered collection of one element factory
//!
//! ### Paths
//!
//! Nodes are addressed with JSON Pointers relative to some root; the root
//! itself is `""`. See [`Path`].
//!
//! ### Listeners
//!
//! [`Tree::on_patch`], [`Tree::on_patch_deep`], [`Tree::on_snapshot`] and
//! [`Tree::on_action`] return a [`ListenerId`] for [`Tree::unsubscribe`].
//!
//! ## Quick Start
//!
//! ```rust
//! use grove_engine::{create_factory, map_of, Patch, Tree};
//! use serde_json::json;
//! use std::sync::{Arc, Mutex};
//!
//! // 1. Describe the shape
//! let item = create_factory(json!({"to": "world"}));
//! let factory = map_of(&item);
//!
//! // 2. Build a tree
//! let mut tree = Tree::new();
//! let doc = tree.create(&factory, None).unwrap();
//!
//! // 3. Observe patches
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! tree.on_patch(doc, move |p| sink.lock().unwrap().push(p.clone())).unwrap();
//!
//! // 4. Mutate
//! tree.set(doc, "hello", json!({})).unwrap();
//! assert_eq!(
//!     *seen.lock().unwrap(),
//!     vec![Patch::add("/hello", json!({"to": "world"}))]
//! );
//!
//! // 5. Replay onto another tree
//! let mut replica = Tree::new();
//! let copy = replica.create(&factory, None).unwrap();
//! replica.apply_patches(copy, &seen.lock().unwrap()).unwrap();
//! assert_eq!(replica.get_snapshot(copy).unwrap(), tree.get_snapshot(doc).unwrap());
//! ```

pub mod action;
pub mod document;
pub mod error;
pub mod factory;
pub mod ffi;
pub mod listener;
pub mod node;
pub mod patch;
pub mod path;
pub mod snapshot;
pub mod tree;

// Re-export main types at crate root
pub use action::{Action, ActionHandler};
pub use document::Document;
pub use error::{Error, Result};
pub use factory::{
    array_of, create_factory, map_of, Factory, FactoryBuilder, FactoryDef, FactoryKind, FieldDef,
    FieldShape,
};
pub use listener::{Listener, ListenerId};
pub use node::NodeId;
pub use patch::Patch;
pub use path::Path;
pub use tree::{Child, Input, Tree};

/// Engine version, as reported over FFI and by the relay's health check.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
