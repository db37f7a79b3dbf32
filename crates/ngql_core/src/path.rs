//! Response paths.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A path segment: an output key or a list index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A path from the response root to a value.
pub type ResponsePath = Vec<PathSegment>;

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Renders a path as `a/0/b`, for log lines.
pub fn display_path(path: &[PathSegment]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_serialization() {
        let path: ResponsePath = vec!["things".into(), 1.into(), "name".into()];
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, r#"["things",1,"name"]"#);
        assert_eq!(display_path(&path), "things/1/name");
    }
}
