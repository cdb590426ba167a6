//! Slash-delimited node addresses.
//!
//! Paths are formatted as JSON Pointers (RFC 6901): each segment is prefixed
//! with `/`, and `~` / `/` inside a segment are escaped as `~0` / `~1`.
//! The root is the empty path, formatted as `""`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Escape a single segment for use in a pointer string.
pub fn escape_segment(segment: &str) -> String {
    if !segment.contains('/') && !segment.contains('~') {
        return segment.to_string();
    }
    segment.replace('~', "~0").replace('/', "~1")
}

/// Reverse [`escape_segment`].
pub fn unescape_segment(segment: &str) -> String {
    if !segment.contains('~') {
        return segment.to_string();
    }
    segment.replace("~1", "/").replace("~0", "~")
}

/// A parsed address, relative to some tree root.
///
/// ```
/// use grove_engine::Path;
///
/// let path: Path = "/todos/0/title".parse().unwrap();
/// assert_eq!(path.len(), 3);
/// assert_eq!(path.last(), Some("title"));
/// assert_eq!(path.to_string(), "/todos/0/title");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(Vec<String>);

impl Path {
    /// The empty (root) path.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from raw (unescaped) segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parse a pointer string.
    ///
    /// Both `""` and `"/"` denote the root. A leading `/` is optional.
    pub fn parse(pointer: &str) -> Self {
        let trimmed = pointer.strip_prefix('/').unwrap_or(pointer);
        if trimmed.is_empty() {
            return Self::root();
        }
        Self(trimmed.split('/').map(unescape_segment).collect())
    }

    /// Append a segment, builder style.
    pub fn join(mut self, segment: impl Into<String>) -> Self {
        self.0.push(segment.into());
        self
    }

    /// Append a segment in place.
    pub fn push(&mut self, segment: impl Into<String>) {
        self.0.push(segment.into());
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The final segment, if any.
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Split into the parent path and the final segment.
    ///
    /// Returns `None` for the root.
    pub fn split_last(&self) -> Option<(Path, &str)> {
        let (last, parent) = self.0.split_last()?;
        Some((Path(parent.to_vec()), last.as_str()))
    }

    /// Concatenate two paths.
    pub fn concat(&self, other: &Path) -> Path {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Path(segments)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.0 {
            write!(f, "/{}", escape_segment(segment))?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Path::parse(s))
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        Path::parse(s)
    }
}

impl Serialize for Path {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Path::parse(&raw))
    }
}
