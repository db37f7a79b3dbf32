//! Response errors.
//!
//! Every failure a request can hit ends up as a [`GraphQLError`] in the
//! response envelope. The error code is carried in `extensions.code`.

use crate::location::SourceLocation;
use crate::path::{PathSegment, ResponsePath};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    /// Malformed request: unknown field, fragment, operation, directive.
    BadRequest,
    /// Argument or variable value does not fit its declared type.
    InputError,
    /// A resolver failed or reported an error.
    ResolverError,
    /// Internal failure; signals a bug rather than a bad request.
    ServerError,
    /// A request quota was exceeded.
    Quota,
    /// The caller cancelled the request.
    Cancelled,
    ObjectNotFound,
    TooManyErrors,
    Custom,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::InputError => "INPUT_ERROR",
            Self::ResolverError => "RESOLVER_ERROR",
            Self::ServerError => "SERVER_ERROR",
            Self::Quota => "QUOTA",
            Self::Cancelled => "CANCELLED",
            Self::ObjectNotFound => "OBJECT_NOT_FOUND",
            Self::TooManyErrors => "TOO_MANY_ERRORS",
            Self::Custom => "CUSTOM",
        }
    }

    /// Returns true if the caller can fix the error by changing the request.
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::BadRequest | Self::InputError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error entry of the response `errors` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<SourceLocation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: ResponsePath,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub extensions: IndexMap<String, serde_json::Value>,
}

impl GraphQLError {
    /// Creates an error without a code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: Vec::new(),
            extensions: IndexMap::new(),
        }
    }

    /// Creates an error with the given code.
    pub fn coded(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(message).with_code(code)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::coded(ErrorCode::BadRequest, message)
    }

    pub fn input_error(message: impl Into<String>) -> Self {
        Self::coded(ErrorCode::InputError, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::coded(ErrorCode::ServerError, message)
    }

    /// Sets `extensions.code`.
    #[must_use]
    pub fn with_code(self, code: ErrorCode) -> Self {
        self.with_extension("code", code.as_str())
    }

    #[must_use]
    pub fn with_path(mut self, path: ResponsePath) -> Self {
        self.path = path;
        self
    }

    #[must_use]
    pub fn with_path_segment(mut self, segment: impl Into<PathSegment>) -> Self {
        self.path.push(segment.into());
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: SourceLocation) -> Self {
        if !self.locations.contains(&location) {
            self.locations.push(location);
        }
        self
    }

    #[must_use]
    pub fn with_extension(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    /// Returns the error code, if one was set and is known.
    pub fn code(&self) -> Option<ErrorCode> {
        self.extensions
            .get("code")
            .and_then(|code| serde_json::from_value(code.clone()).ok())
    }

    /// Returns true if `extensions.code` equals the given code.
    pub fn has_code(&self, code: ErrorCode) -> bool {
        self.code() == Some(code)
    }
}

impl fmt::Display for GraphQLError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code() {
            write!(f, "[{code}] ")?;
        }
        f.write_str(&self.message)?;
        if let Some(location) = self.locations.first() {
            write!(f, " at {location}")?;
        }
        Ok(())
    }
}

impl std::error::Error for GraphQLError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::TooManyErrors.to_string(), "TOO_MANY_ERRORS");
        assert_eq!(ErrorCode::Quota.as_str(), "QUOTA");
        assert!(ErrorCode::InputError.is_client_error());
        assert!(!ErrorCode::ServerError.is_client_error());
    }

    #[test]
    fn test_error_serialization() {
        let err = GraphQLError::coded(ErrorCode::ResolverError, "boom")
            .with_location(SourceLocation::new(2, 5))
            .with_path(vec!["things".into(), 0.into(), "name".into()]);

        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "message": "boom",
                "locations": [{"line": 2, "column": 5}],
                "path": ["things", 0, "name"],
                "extensions": {"code": "RESOLVER_ERROR"}
            })
        );
    }

    #[test]
    fn test_error_without_path_omits_fields() {
        let err = GraphQLError::new("plain");
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, r#"{"message":"plain"}"#);
        assert_eq!(err.code(), None);
    }

    #[test]
    fn test_error_code_roundtrip_from_extensions() {
        let err = GraphQLError::bad_request("x");
        assert!(err.has_code(ErrorCode::BadRequest));
        assert_eq!(err.to_string(), "[BAD_REQUEST] x");
    }
}
