//! Named, interceptable operations.
//!
//! Factories can register action handlers; maps and arrays also carry a set
//! of built-in actions (`set`, `delete`, `push`, ...). Invoking an action
//! announces it to action listeners on the node and its ancestors, then runs
//! the handler as a single operation. Actions invoked from inside another
//! action's handler are not announced, so replaying the recorded actions does
//! not apply nested work twice.

use crate::{error::Result, Error, FactoryKind, ListenerId, NodeId, Path, Tree};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Action handler: receives the tree, the node the action was invoked on,
/// and the call arguments.
pub type ActionHandler = Arc<dyn Fn(&mut Tree, NodeId, &[Value]) -> Result<Value> + Send + Sync>;

/// A recorded action invocation.
///
/// `path` is relative to the node whose listener recorded it, so the record
/// can be replayed on an equivalent node with [`Tree::apply_action`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub path: Path,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Action {
    pub fn new(name: impl Into<String>, path: impl Into<Path>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Set,
    Delete,
    Clear,
    Push,
    Insert,
    Remove,
}

impl Builtin {
    fn lookup(kind: &FactoryKind, name: &str) -> Option<Self> {
        match (kind, name) {
            (FactoryKind::Map(_) | FactoryKind::Array(_), "set") => Some(Builtin::Set),
            (FactoryKind::Map(_) | FactoryKind::Array(_), "clear") => Some(Builtin::Clear),
            (FactoryKind::Map(_), "delete") => Some(Builtin::Delete),
            (FactoryKind::Array(_), "push") => Some(Builtin::Push),
            (FactoryKind::Array(_), "insert") => Some(Builtin::Insert),
            (FactoryKind::Array(_), "remove") => Some(Builtin::Remove),
            _ => None,
        }
    }

    /// Check arity and argument types, producing the call to run.
    fn bind(self, name: &str, args: &[Value]) -> Result<BuiltinCall> {
        let call = match self {
            Builtin::Set => {
                expect_arity(name, args, 2)?;
                BuiltinCall::Set(key_arg(name, &args[0])?, args[1].clone())
            }
            Builtin::Delete => {
                expect_arity(name, args, 1)?;
                BuiltinCall::Delete(key_arg(name, &args[0])?)
            }
            Builtin::Clear => {
                expect_arity(name, args, 0)?;
                BuiltinCall::Clear
            }
            Builtin::Push => {
                expect_arity(name, args, 1)?;
                BuiltinCall::Push(args[0].clone())
            }
            Builtin::Insert => {
                expect_arity(name, args, 2)?;
                BuiltinCall::Insert(index_arg(name, &args[0])?, args[1].clone())
            }
            Builtin::Remove => {
                expect_arity(name, args, 1)?;
                BuiltinCall::Remove(index_arg(name, &args[0])?)
            }
        };
        Ok(call)
    }
}

/// A built-in action with validated arguments.
#[derive(Debug, Clone)]
enum BuiltinCall {
    Set(String, Value),
    Delete(String),
    Clear,
    Push(Value),
    Insert(usize, Value),
    Remove(usize),
}

enum Handler {
    Custom(ActionHandler),
    Builtin(BuiltinCall),
}

impl Tree {
    /// Invoke the action `name` on `node`.
    ///
    /// Factory-defined actions take precedence over built-ins of the same
    /// name. Snapshot listeners fire once, after the handler returns.
    pub fn invoke(&mut self, node: NodeId, name: &str, args: Vec<Value>) -> Result<Value> {
        let factory = self.slot(node)?.factory.clone();
        let handler = match factory.action(name) {
            Some(handler) => Handler::Custom(handler.clone()),
            None => match Builtin::lookup(factory.kind(), name) {
                // Bad arguments fail before the action is announced.
                Some(builtin) => Handler::Builtin(builtin.bind(name, &args)?),
                None => {
                    return Err(Error::UnknownAction {
                        name: name.to_string(),
                        path: self.get_path(node)?,
                    })
                }
            },
        };

        if self.action_depth == 0 {
            self.announce(node, name, &args)?;
        }

        self.action_depth += 1;
        let result = self.batch(|tree| match &handler {
            Handler::Custom(handler) => handler(tree, node, &args),
            Handler::Builtin(call) => tree.run_builtin(call.clone(), node),
        });
        self.action_depth -= 1;
        result
    }

    /// Observe actions invoked on `node` or anything beneath it.
    pub fn on_action<F>(&mut self, node: NodeId, listener: F) -> Result<ListenerId>
    where
        F: FnMut(&Action) + Send + 'static,
    {
        self.slot(node)?;
        let id = self.next_listener_id();
        self.action_listeners.subscribe(node, id, Box::new(listener));
        Ok(id)
    }

    /// Replay a recorded action relative to `root`.
    pub fn apply_action(&mut self, root: NodeId, action: &Action) -> Result<Value> {
        let target = self.resolve_path(root, &action.path)?;
        self.invoke(target, &action.name, action.args.clone())
    }

    /// Replay actions in order, stopping at the first failure.
    pub fn apply_actions(&mut self, root: NodeId, actions: &[Action]) -> Result<Vec<Value>> {
        tracing::debug!(root = %root, count = actions.len(), "applying actions");
        self.batch(|tree| {
            actions
                .iter()
                .map(|action| tree.apply_action(root, action))
                .collect()
        })
    }

    fn announce(&mut self, node: NodeId, name: &str, args: &[Value]) -> Result<()> {
        if self.action_listeners.is_empty() {
            return Ok(());
        }
        for (ancestor, path) in self.lineage(node)? {
            if self.action_listeners.has_listeners(ancestor) {
                let action = Action {
                    name: name.to_string(),
                    path,
                    args: args.to_vec(),
                };
                self.action_listeners.emit(ancestor, &action);
            }
        }
        Ok(())
    }

    fn run_builtin(&mut self, call: BuiltinCall, node: NodeId) -> Result<Value> {
        match call {
            BuiltinCall::Set(key, value) => {
                self.set_entry(node, &key, value.into())?;
                Ok(Value::Null)
            }
            BuiltinCall::Delete(key) => Ok(Value::Bool(self.delete_entry(node, &key, true)?)),
            BuiltinCall::Clear => {
                self.clear_entries(node)?;
                Ok(Value::Null)
            }
            BuiltinCall::Push(value) => {
                let index = self.len(node)?;
                self.insert_entry(node, index, value.into())?;
                Ok(Value::from(index))
            }
            BuiltinCall::Insert(index, value) => {
                self.insert_entry(node, index, value.into())?;
                Ok(Value::Null)
            }
            BuiltinCall::Remove(index) => {
                self.remove_entry(node, index)?;
                Ok(Value::Null)
            }
        }
    }
}

fn expect_arity(name: &str, args: &[Value], expected: usize) -> Result<()> {
    if args.len() != expected {
        return Err(Error::invalid_arguments(
            name,
            format!("expected {expected} argument(s), got {}", args.len()),
        ));
    }
    Ok(())
}

/// Keys may be given as non-empty strings or, for arrays, as non-negative
/// integers.
fn key_arg(name: &str, arg: &Value) -> Result<String> {
    match arg {
        Value::String(s) if !s.is_empty() => Ok(s.clone()),
        Value::Number(n) if n.is_u64() => Ok(n.to_string()),
        other => Err(Error::invalid_arguments(
            name,
            format!("expected a non-empty string key, got {other}"),
        )),
    }
}

fn index_arg(name: &str, arg: &Value) -> Result<usize> {
    arg.as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| {
            Error::invalid_arguments(name, format!("expected a non-negative index, got {arg}"))
        })
}
