//! Error types for the Grove engine.

use crate::NodeId;
use thiserror::Error;

/// All possible errors from the Grove engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Addressing errors
    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("index {index} out of bounds (len: {len}) at '{path}'")]
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },

    #[error("stale node handle: {0}")]
    StaleNode(NodeId),

    // Patch and action errors
    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    #[error("unknown action '{name}' on node at '{path}'")]
    UnknownAction { name: String, path: String },

    #[error("invalid arguments for action '{action}': {reason}")]
    InvalidArguments { action: String, reason: String },

    // Shape errors
    #[error("shape mismatch at '{path}': expected {expected}, got {found}")]
    ShapeMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("invalid factory definition: {0}")]
    InvalidFactory(String),

    // Tree structure errors
    #[error("node is already attached at '{0}'")]
    AlreadyAttached(String),

    #[error("attaching a node beneath itself would create a cycle")]
    CyclicTree,
}

impl Error {
    pub(crate) fn shape_mismatch(
        path: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Error::ShapeMismatch {
            path: path.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub(crate) fn invalid_arguments(action: &str, reason: impl Into<String>) -> Self {
        Error::InvalidArguments {
            action: action.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::PathNotFound("/todos/7".into());
        assert_eq!(err.to_string(), "path not found: /todos/7");

        let err = Error::UnknownAction {
            name: "toggle".into(),
            path: "/todos/0".into(),
        };
        assert_eq!(
            err.to_string(),
            "unknown action 'toggle' on node at '/todos/0'"
        );

        let err = Error::ShapeMismatch {
            path: "/hello".into(),
            expected: "object".into(),
            found: "array".into(),
        };
        assert_eq!(
            err.to_string(),
            "shape mismatch at '/hello': expected object, got array"
        );
    }

    #[test]
    fn index_out_of_bounds_display() {
        let err = Error::IndexOutOfBounds {
            path: "/items".into(),
            index: 4,
            len: 2,
        };
        assert_eq!(
            err.to_string(),
            "index 4 out of bounds (len: 2) at '/items'"
        );
    }
}
