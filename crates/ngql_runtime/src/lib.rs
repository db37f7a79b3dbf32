//! Runtime for ngql.
//!
//! This crate provides the GraphQL execution runtime:
//! - `schema`: Type model and schema building
//! - `request`: Parsed request documents
//! - `mapping`: Binding requests to the schema before execution
//! - `input`: Argument and variable coercion
//! - `executor`: Wave-based execution with resolver batching
//! - `context`: Per-request errors, quota and cancellation
//! - `field`: The context resolvers receive
//! - `subscription`: Topic-based subscriptions
//! - `directives`: Directive handlers (`@include`, `@skip`)

pub mod config;
pub mod context;
pub mod directives;
mod executor;
pub mod field;
pub mod handler;
pub mod input;
pub mod mapping;
pub mod request;
pub mod resolver;
pub mod schema;
pub mod scope;
pub mod subscription;

pub use config::{RequestQuota, ServerOptions};
pub use context::{CancelReason, CustomData, RequestAborted, RequestContext, RequestMetrics, RequestOptions};
pub use directives::{
    DirectiveDefinition, DirectiveHandler, DirectiveLocation, DirectiveRegistry, IncludeDirective,
    SkipDirective, SkipDirectiveAction,
};
pub use field::FieldContext;
pub use handler::{execute_request, GraphQLRequest, Response};
pub use mapping::{map_operation, MappedField, MappedOperation};
pub use request::{
    Argument, Directive, Document, FragmentDef, FragmentSpread, Operation, OperationKind, Selection,
    SelectionField, SelectionSet, VariableDef, Variables,
};
pub use resolver::{
    downcast, AsyncFnResolver, DefaultResolver, Entity, FnResolver, GraphQLObject, ResolvedValue,
    Resolver, ResolverArgs, ResolverError, ResolverFuture, ResolverMap, ResolverResult,
};
pub use schema::{
    EnumDef, FieldDef, InputFieldDef, InputObjectDef, InterfaceDef, ObjectDef, ScalarDef, Schema,
    SchemaBuilder, SchemaError, TypeDef, TypeKind, TypeRef, UnionDef,
};
pub use subscription::{EventSender, SubscriptionEvent, SubscriptionHandle, SubscriptionId, SubscriptionRegistry};

pub use ngql_core::{ErrorCode, GraphQLError, InputValue, PathSegment, ResponsePath, SourceLocation};
