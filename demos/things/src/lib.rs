//! Things: a demo app exercising the ngql engine.
//!
//! Covers batched fields (`mainOtherThing`, `otherThings`), async and
//! failing resolvers, an interface and a union, input objects, mutations
//! that publish updates and a subscription to them.

pub mod domain;
pub mod resolvers;
pub mod schema;

pub use domain::{OtherThingEntity, ThingEntity, ThingKind, ThingsApp, WaitValue};
pub use resolvers::thing_update_topic;

use ngql_runtime::{Schema, SchemaError};
use ngql_server::{GraphQLServer, ServerResult, ServerSettings};
use std::sync::Arc;

/// Builds the Things schema with resolvers bound to `app`.
pub fn build_schema(app: &Arc<ThingsApp>) -> Result<Schema, SchemaError> {
    resolvers::bind(schema::types(), app).build()
}

/// Creates a server for `app`.
pub fn build_server(app: &Arc<ThingsApp>, settings: ServerSettings) -> ServerResult<GraphQLServer> {
    GraphQLServer::build(resolvers::bind(schema::types(), app), settings)
}
