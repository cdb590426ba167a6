//! Factories describe what a valid node looks like.
//!
//! A [`Factory`] is an immutable, cheaply clonable description of a node's
//! default shape and of the named actions that can be invoked on it. Factory
//! identity is handle identity: two factories are equal only if they are
//! clones of the same handle.
//!
//! There are three kinds of factory:
//!
//! - **model**: a fixed field map; each field is either a default JSON value or
//!   a nested factory.
//! - **map**: a keyed collection whose values are all made by one element factory.
//! - **array**: an ordered collection whose elements are all made by one
//!   element factory.
//!
//! Factories can also be described as JSON through [`FactoryDef`].

use crate::action::ActionHandler;
use crate::{error::Result, Error, NodeId, Tree};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// The default of a single model field.
#[derive(Clone)]
pub enum FieldShape {
    /// A plain JSON value, copied into each new node.
    Value(Value),
    /// A nested node built by another factory.
    Factory(Factory),
}

impl fmt::Debug for FieldShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldShape::Value(v) => f.debug_tuple("Value").field(v).finish(),
            FieldShape::Factory(factory) => {
                f.debug_tuple("Factory").field(&factory.name()).finish()
            }
        }
    }
}

/// What kind of node a factory produces.
#[derive(Clone, Debug)]
pub enum FactoryKind {
    Model(IndexMap<String, FieldShape>),
    Map(Factory),
    Array(Factory),
}

impl FactoryKind {
    /// Short name used in shape errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            FactoryKind::Model(_) => "model",
            FactoryKind::Map(_) => "map",
            FactoryKind::Array(_) => "array",
        }
    }
}

struct FactoryInner {
    name: String,
    kind: FactoryKind,
    actions: IndexMap<String, ActionHandler>,
}

/// Handle to an immutable node description.
#[derive(Clone)]
pub struct Factory(Arc<FactoryInner>);

impl Factory {
    fn from_parts(
        name: String,
        kind: FactoryKind,
        actions: IndexMap<String, ActionHandler>,
    ) -> Self {
        Self(Arc::new(FactoryInner {
            name,
            kind,
            actions,
        }))
    }

    /// Start building a model factory.
    pub fn builder(name: impl Into<String>) -> FactoryBuilder {
        FactoryBuilder::new(name)
    }

    /// Create a model factory from a JSON object of field defaults.
    ///
    /// Non-object values produce a model with no declared fields.
    pub fn model(default_shape: Value) -> Self {
        let mut builder = FactoryBuilder::new("Model");
        if let Value::Object(fields) = default_shape {
            for (name, default) in fields {
                builder = builder.field(name, default);
            }
        }
        builder.build()
    }

    /// Create a keyed-collection factory over `element`.
    pub fn map_of(element: &Factory) -> Self {
        Self::from_parts(
            format!("Map<{}>", element.name()),
            FactoryKind::Map(element.clone()),
            IndexMap::new(),
        )
    }

    /// Create an ordered-collection factory over `element`.
    pub fn array_of(element: &Factory) -> Self {
        Self::from_parts(
            format!("Array<{}>", element.name()),
            FactoryKind::Array(element.clone()),
            IndexMap::new(),
        )
    }

    /// Return a new factory identical to this one plus an extra action.
    ///
    /// The result is a distinct factory; the receiver is unchanged.
    pub fn with_action<F>(&self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut Tree, NodeId, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        let mut actions = self.0.actions.clone();
        actions.insert(name.into(), Arc::new(handler));
        Self::from_parts(self.0.name.clone(), self.0.kind.clone(), actions)
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn kind(&self) -> &FactoryKind {
        &self.0.kind
    }

    /// The element factory of a map or array factory.
    pub fn element(&self) -> Option<&Factory> {
        match &self.0.kind {
            FactoryKind::Map(element) | FactoryKind::Array(element) => Some(element),
            FactoryKind::Model(_) => None,
        }
    }

    /// Declared shape of a model field.
    pub fn field(&self, name: &str) -> Option<&FieldShape> {
        match &self.0.kind {
            FactoryKind::Model(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Look up a factory-defined action handler.
    pub fn action(&self, name: &str) -> Option<&ActionHandler> {
        self.0.actions.get(name)
    }

    /// Names of the factory-defined actions, in registration order.
    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.0.actions.keys().map(String::as_str)
    }

    /// The snapshot of a freshly created, untouched node.
    pub fn default_snapshot(&self) -> Value {
        match &self.0.kind {
            FactoryKind::Model(fields) => {
                let mut out = Map::new();
                for (name, shape) in fields {
                    let value = match shape {
                        FieldShape::Value(v) => v.clone(),
                        FieldShape::Factory(factory) => factory.default_snapshot(),
                    };
                    out.insert(name.clone(), value);
                }
                Value::Object(out)
            }
            FactoryKind::Map(_) => Value::Object(Map::new()),
            FactoryKind::Array(_) => Value::Array(Vec::new()),
        }
    }

    /// Whether two handles refer to the same factory.
    pub fn same(&self, other: &Factory) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Factory {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for Factory {}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("name", &self.0.name)
            .field("kind", &self.0.kind.type_name())
            .field("actions", &self.0.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// `createFactory(defaultShape)`.
pub fn create_factory(default_shape: Value) -> Factory {
    Factory::model(default_shape)
}

/// `mapOf(Factory)`.
pub fn map_of(element: &Factory) -> Factory {
    Factory::map_of(element)
}

/// `arrayOf(Factory)`.
pub fn array_of(element: &Factory) -> Factory {
    Factory::array_of(element)
}

/// Builder for model factories.
pub struct FactoryBuilder {
    name: String,
    fields: IndexMap<String, FieldShape>,
    actions: IndexMap<String, ActionHandler>,
}

impl FactoryBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
            actions: IndexMap::new(),
        }
    }

    /// Declare a field with a plain default value.
    pub fn field(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.fields
            .insert(name.into(), FieldShape::Value(default.into()));
        self
    }

    /// Declare a field holding a node made by `factory`.
    pub fn child(mut self, name: impl Into<String>, factory: &Factory) -> Self {
        self.fields
            .insert(name.into(), FieldShape::Factory(factory.clone()));
        self
    }

    /// Register a named, interceptable action.
    pub fn action<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut Tree, NodeId, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn build(self) -> Factory {
        Factory::from_parts(self.name, FactoryKind::Model(self.fields), self.actions)
    }
}

/// JSON description of a factory.
///
/// ```json
/// {"type": "map", "of": {"type": "model", "name": "Item",
///   "fields": {"to": {"default": "world"}}}}
/// ```
///
/// Actions cannot be described; built factories carry only the built-in
/// collection actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FactoryDef {
    Model {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        fields: IndexMap<String, FieldDef>,
    },
    Map {
        of: Box<FactoryDef>,
    },
    Array {
        of: Box<FactoryDef>,
    },
}

/// JSON description of a single model field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldDef {
    Default(Value),
    Factory(FactoryDef),
}

impl FactoryDef {
    /// Parse a definition from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidFactory(e.to_string()))
    }

    /// Build the described factory.
    pub fn build(&self) -> Factory {
        match self {
            FactoryDef::Model { name, fields } => {
                let mut builder =
                    FactoryBuilder::new(name.clone().unwrap_or_else(|| "Model".to_string()));
                for (field, def) in fields {
                    builder = match def {
                        FieldDef::Default(value) => builder.field(field.clone(), value.clone()),
                        FieldDef::Factory(nested) => builder.child(field.clone(), &nested.build()),
                    };
                }
                builder.build()
            }
            FactoryDef::Map { of } => Factory::map_of(&of.build()),
            FactoryDef::Array { of } => Factory::array_of(&of.build()),
        }
    }
}

impl From<&Factory> for FactoryDef {
    fn from(factory: &Factory) -> Self {
        match factory.kind() {
            FactoryKind::Model(fields) => FactoryDef::Model {
                name: Some(factory.name().to_string()),
                fields: fields
                    .iter()
                    .map(|(name, shape)| {
                        let def = match shape {
                            FieldShape::Value(v) => FieldDef::Default(v.clone()),
                            FieldShape::Factory(nested) => FieldDef::Factory(nested.into()),
                        };
                        (name.clone(), def)
                    })
                    .collect(),
            },
            FactoryKind::Map(element) => FactoryDef::Map {
                of: Box::new(element.into()),
            },
            FactoryKind::Array(element) => FactoryDef::Array {
                of: Box::new(element.into()),
            },
        }
    }
}
