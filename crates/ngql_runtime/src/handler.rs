//! Request handling: operation selection, variable coercion, mapping and
//! execution of the top-level fields.

use crate::context::{RequestContext, RequestMetrics};
use crate::executor::{collect_fields, OperationFieldExecutor};
use crate::input::InputCoercer;
use crate::mapping::{map_operation, MappedOperation};
use crate::request::{Document, OperationKind};
use crate::resolver::ResolvedValue;
use crate::schema::Schema;
use futures::future::join_all;
use indexmap::IndexMap;
use ngql_core::GraphQLError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info_span, Instrument};

/// A request: a parsed document, the operation to run and raw variables.
#[derive(Debug, Clone)]
pub struct GraphQLRequest {
    pub document: Arc<Document>,
    pub operation_name: Option<String>,
    pub variables: IndexMap<String, Value>,
}

impl GraphQLRequest {
    pub fn new(document: Document) -> Self {
        Self {
            document: Arc::new(document),
            operation_name: None,
            variables: IndexMap::new(),
        }
    }

    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// Sets variables from a JSON object; other values are ignored.
    pub fn variables(mut self, variables: Value) -> Self {
        if let Value::Object(map) = variables {
            self.variables.extend(map);
        }
        self
    }
}

/// A response: `data` is absent when the request failed before execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
    #[serde(skip)]
    pub metrics: RequestMetrics,
}

impl Response {
    pub(crate) fn from_context(data: Option<Value>, ctx: &RequestContext) -> Self {
        Self {
            data,
            errors: ctx.errors(),
            metrics: ctx.metrics(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Executes a request against `schema`.
pub async fn execute_request(schema: &Schema, request: &GraphQLRequest, ctx: &RequestContext) -> Response {
    let span = info_span!(
        "graphql_request",
        operation = request.operation_name.as_deref().unwrap_or("<anonymous>")
    );
    async {
        let Some(operation) = prepare(schema, request, ctx) else {
            return Response::from_context(None, ctx);
        };
        let data = execute_operation(&operation, ctx, None).await;
        let response = Response::from_context(Some(data), ctx);
        debug!(
            errors = response.errors.len(),
            resolver_calls = response.metrics.resolver_calls,
            waves = response.metrics.waves,
            "request executed"
        );
        response
    }
    .instrument(span)
    .await
}

/// Selects the operation, coerces variables and maps the request. Returns
/// `None` once any error is recorded.
pub(crate) fn prepare(schema: &Schema, request: &GraphQLRequest, ctx: &RequestContext) -> Option<MappedOperation> {
    let document = &request.document;
    let index = match select_operation(document, request.operation_name.as_deref()) {
        Ok(index) => index,
        Err(error) => {
            let _ = ctx.add_error(error);
            return None;
        }
    };

    let operation = &document.operations[index];
    let coercer = InputCoercer::new(schema, ctx.options());
    match coercer.coerce_variables(&operation.variables, &request.variables) {
        Ok(variables) => ctx.set_variables(variables),
        Err(errors) => {
            let _ = ctx.add_errors(errors);
            return None;
        }
    }

    map_operation(schema, document, index, ctx)
}

fn select_operation(document: &Document, name: Option<&str>) -> Result<usize, GraphQLError> {
    match name {
        Some(name) => document
            .operations
            .iter()
            .position(|op| op.name.as_deref() == Some(name))
            .ok_or_else(|| GraphQLError::bad_request(format!("Operation '{name}' not found in request."))),
        None => match document.operations.len() {
            0 => Err(GraphQLError::bad_request("Request contains no operations.")),
            1 => Ok(0),
            _ => Err(GraphQLError::bad_request(
                "Request contains multiple operations, operation name must be specified.",
            )),
        },
    }
}

/// Runs the top-level fields. Mutation fields run one after another; the
/// others run concurrently. A field whose execution was aborted is null.
pub(crate) async fn execute_operation(
    operation: &MappedOperation,
    ctx: &RequestContext,
    preset: Option<ResolvedValue>,
) -> Value {
    let Some(root) = operation.root_subset() else {
        let _ = ctx.fail_fatal("FATAL: root selection subset was not mapped.");
        return Value::Null;
    };
    let fields = match collect_fields(operation, root, &ctx.variables()) {
        Ok(fields) => fields,
        Err(message) => {
            let _ = ctx.fail_fatal(message);
            return Value::Null;
        }
    };

    let results = if operation.kind == OperationKind::Mutation {
        let mut results = Vec::with_capacity(fields.len());
        for field in &fields {
            if ctx.is_aborted() {
                results.push(Ok(Value::Null));
                continue;
            }
            results.push(OperationFieldExecutor::new(operation, ctx, Arc::clone(field)).execute(None).await);
        }
        results
    } else {
        join_all(
            fields
                .iter()
                .map(|field| OperationFieldExecutor::new(operation, ctx, Arc::clone(field)).execute(preset.clone())),
        )
        .await
    };

    let mut data = Map::new();
    for (field, result) in fields.iter().zip(results) {
        data.insert(field.key().to_string(), result.unwrap_or(Value::Null));
    }
    Value::Object(data)
}
