//! Source location representation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A position in the request text, 1-based, as reported in `errors[].locations`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Line number (1-based).
    pub line: u32,
    /// Column number (1-based).
    pub column: u32,
}

impl SourceLocation {
    /// The first character of a document.
    pub const START: Self = Self::new(1, 1);

    /// Creates a new location.
    #[must_use]
    #[inline]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// Returns true if this location comes before another one.
    #[must_use]
    #[inline]
    pub const fn precedes(&self, other: &Self) -> bool {
        self.line < other.line || (self.line == other.line && self.column < other.column)
    }
}

impl Default for SourceLocation {
    fn default() -> Self {
        Self::START
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.line, self.column)
    }
}

impl From<(u32, u32)> for SourceLocation {
    fn from((line, column): (u32, u32)) -> Self {
        Self::new(line, column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_new() {
        let loc = SourceLocation::new(3, 7);
        assert_eq!(loc.line, 3);
        assert_eq!(loc.column, 7);
        assert_eq!(loc.to_string(), "(3, 7)");
    }

    #[test]
    fn test_location_ordering() {
        let a = SourceLocation::new(1, 10);
        let b = SourceLocation::new(2, 1);
        assert!(a.precedes(&b));
        assert!(!b.precedes(&a));
        assert!(!a.precedes(&a));
        assert_eq!(SourceLocation::default(), SourceLocation::START);
    }

    #[test]
    fn test_location_serialization() {
        let json = serde_json::to_string(&SourceLocation::new(4, 2)).unwrap();
        assert_eq!(json, r#"{"line":4,"column":2}"#);
    }
}
