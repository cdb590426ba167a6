//! Per-node listener lists.
//!
//! Listeners are invoked synchronously, in subscription order. A listener
//! that panics is logged and skipped; the remaining listeners still run and
//! the tree stays consistent.

use crate::NodeId;
use indexmap::IndexMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Handle returned by every `on_*` subscription; pass it to
/// [`Tree::unsubscribe`](crate::Tree::unsubscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Boxed listener callback.
pub type Listener<E> = Box<dyn FnMut(&E) + Send>;

/// Listeners for one event type, grouped by observed node.
pub(crate) struct Registry<E> {
    kind: &'static str,
    by_node: IndexMap<NodeId, Vec<(ListenerId, Listener<E>)>>,
}

impl<E> Registry<E> {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            kind,
            by_node: IndexMap::new(),
        }
    }

    pub(crate) fn subscribe(&mut self, node: NodeId, id: ListenerId, listener: Listener<E>) {
        self.by_node.entry(node).or_default().push((id, listener));
    }

    /// Remove a listener. Returns false if it is not registered here.
    pub(crate) fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let mut emptied = None;
        let mut found = false;

        for (node, listeners) in self.by_node.iter_mut() {
            if let Some(pos) = listeners.iter().position(|(lid, _)| *lid == id) {
                listeners.remove(pos);
                if listeners.is_empty() {
                    emptied = Some(*node);
                }
                found = true;
                break;
            }
        }

        if let Some(node) = emptied {
            self.by_node.shift_remove(&node);
        }
        found
    }

    pub(crate) fn has_listeners(&self, node: NodeId) -> bool {
        self.by_node.contains_key(&node)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }

    /// Drop every listener observing `node`.
    pub(crate) fn forget(&mut self, node: NodeId) {
        self.by_node.shift_remove(&node);
    }

    pub(crate) fn len(&self) -> usize {
        self.by_node.values().map(Vec::len).sum()
    }

    /// Deliver `event` to every listener on `node`, in subscription order.
    pub(crate) fn emit(&mut self, node: NodeId, event: &E) {
        let Some(listeners) = self.by_node.get_mut(&node) else {
            return;
        };

        for (id, listener) in listeners.iter_mut() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(event)));
            if let Err(payload) = outcome {
                tracing::error!(
                    listener = %id,
                    node = %node,
                    kind = self.kind,
                    reason = panic_message(payload.as_ref()),
                    "listener panicked; continuing dispatch"
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn node() -> NodeId {
        serde_json::from_str(r#"{"index": 0, "generation": 0}"#).unwrap()
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> Listener<u32>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = log.clone();
            move |tag: &'static str| -> Listener<u32> {
                let log = log.clone();
                Box::new(move |event: &u32| log.lock().unwrap().push(format!("{tag}:{event}")))
            }
        };
        (log, make)
    }

    #[test]
    fn emits_in_subscription_order() {
        let (log, make) = recorder();
        let mut registry = Registry::new("test");
        registry.subscribe(node(), ListenerId(1), make("a"));
        registry.subscribe(node(), ListenerId(2), make("b"));

        registry.emit(node(), &7);

        assert_eq!(*log.lock().unwrap(), vec!["a:7", "b:7"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let (log, make) = recorder();
        let mut registry = Registry::new("test");
        registry.subscribe(node(), ListenerId(1), make("a"));

        assert!(registry.unsubscribe(ListenerId(1)));
        assert!(!registry.unsubscribe(ListenerId(1)));
        assert!(!registry.has_listeners(node()));

        registry.emit(node(), &1);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn panicking_listener_is_isolated() {
        let (log, make) = recorder();
        let mut registry = Registry::new("test");
        registry.subscribe(node(), ListenerId(1), Box::new(|_: &u32| panic!("boom")));
        registry.subscribe(node(), ListenerId(2), make("after"));

        registry.emit(node(), &3);
        registry.emit(node(), &4);

        assert_eq!(*log.lock().unwrap(), vec!["after:3", "after:4"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn forget_drops_node_listeners() {
        let (_log, make) = recorder();
        let mut registry = Registry::new("test");
        registry.subscribe(node(), ListenerId(1), make("a"));
        registry.forget(node());
        assert!(registry.is_empty());
    }
}
