//! Server facade for ngql.
//!
//! Wraps a schema with server settings, executes requests and drives
//! subscription sessions for a transport:
//! - `settings`: Options and default quota, loadable from JSON
//! - `server`: Request execution and subscription routing
//! - `session`: Per-connection subscription message handling

pub mod error;
pub mod server;
pub mod session;
pub mod settings;

pub use error::{ServerError, ServerResult};
pub use server::GraphQLServer;
pub use session::{ClientMessage, ServerMessage, SubscriptionSession};
pub use settings::ServerSettings;

pub use ngql_runtime as runtime;
