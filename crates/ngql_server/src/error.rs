//! Server errors.

use ngql_runtime::SchemaError;
use thiserror::Error;

/// Errors raised while setting up a server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid server settings: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("invalid schema: {0}")]
    Schema(#[from] SchemaError),
}

pub type ServerResult<T> = Result<T, ServerError>;
