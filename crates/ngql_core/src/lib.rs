//! Core types for ngql.
//!
//! This crate provides the leaf types shared by the runtime and the server:
//! - `location`: Source line/column tracking for request nodes
//! - `path`: Response paths (field keys and list indices)
//! - `error`: The response error type and its error codes
//! - `value`: Input values as they appear in a parsed request

pub mod error;
pub mod location;
pub mod path;
pub mod value;

pub use error::{ErrorCode, GraphQLError};
pub use location::SourceLocation;
pub use path::{PathSegment, ResponsePath};
pub use value::InputValue;
