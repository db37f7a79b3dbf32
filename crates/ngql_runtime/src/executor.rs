//! Wave-based execution of one top-level field.
//!
//! An [`OperationFieldExecutor`] owns the output tree of one operation
//! field. Wave 0 resolves the top-level field; each following wave takes
//! the objects produced by the previous one, groups them by field and
//! resolves every field of their selection subset across all of them at
//! once. That is what lets a resolver batch: the first invocation for a
//! field sees every parent and may post all results together.

use crate::context::{RequestAborted, RequestContext};
use crate::field::{FieldContext, FieldState};
use crate::input::evaluate_arguments;
use crate::mapping::{MappedDirective, MappedField, MappedItem, MappedOperation, MappedSubSet};
use crate::config::ServerOptions;
use crate::request::Variables;
use crate::resolver::{Entity, ResolvedValue, ResolverError};
use crate::schema::TypeRef;
use crate::scope::{OutputTree, OutputValue, ScopeId};
use futures::future::join_all;
use futures::FutureExt;
use indexmap::IndexMap;
use ngql_core::{ErrorCode, GraphQLError, PathSegment, ResponsePath};
use rustc_hash::FxHashSet;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{trace, warn};

/// Objects produced by one field in the previous wave, awaiting their subset.
struct PendingFieldResults {
    field: Arc<MappedField>,
    scopes: Vec<ScopeId>,
}

pub(crate) struct OperationFieldExecutor<'a> {
    operation: &'a MappedOperation,
    ctx: &'a RequestContext,
    variables: Arc<Variables>,
    field: Arc<MappedField>,
    tree: OutputTree,
    pending: Vec<PendingFieldResults>,
    failed: bool,
}

impl<'a> OperationFieldExecutor<'a> {
    pub(crate) fn new(operation: &'a MappedOperation, ctx: &'a RequestContext, field: Arc<MappedField>) -> Self {
        Self {
            operation,
            ctx,
            variables: ctx.variables(),
            field,
            tree: OutputTree::new(),
            pending: Vec::new(),
            failed: false,
        }
    }

    /// Runs all waves and returns the value for the field's key. With
    /// `preset`, the top-level value is taken as given instead of resolved.
    pub(crate) async fn execute(mut self, preset: Option<ResolvedValue>) -> Result<Value, RequestAborted> {
        let root = self.tree.add_root(self.operation.root_type.clone());
        let field = Arc::clone(&self.field);

        self.ctx.check_cancelled()?;
        self.ctx.count_wave();
        match preset {
            Some(value) => {
                let mut children = Vec::new();
                let mut segments = vec![PathSegment::from(field.key())];
                let output = self.complete(root, &field, &mut segments, field.ty(), value, &mut children)?;
                self.tree.scope_mut(root).set_value(field.key(), output);
                self.queue_children(&field, children);
            }
            None => self.execute_field(&field, &[root]).await?,
        }

        let mut wave = 1;
        while !self.pending.is_empty() {
            if self.failed {
                self.prune_pending();
                break;
            }
            self.ctx.check_cancelled()?;
            self.ctx.count_wave();
            let entries = std::mem::take(&mut self.pending);
            trace!(field = field.key(), wave, entries = entries.len(), "executing wave");
            for entry in entries {
                self.execute_subsets(entry).await?;
            }
            wave += 1;
        }

        Ok(self
            .tree
            .scope(root)
            .get(field.key())
            .map_or(Value::Null, |value| self.tree.render(value)))
    }

    fn prune_pending(&mut self) {
        for entry in std::mem::take(&mut self.pending) {
            for scope in entry.scopes {
                self.tree.prune(scope);
            }
        }
    }

    fn queue_children(&mut self, field: &Arc<MappedField>, children: Vec<ScopeId>) {
        if !children.is_empty() {
            self.pending.push(PendingFieldResults {
                field: Arc::clone(field),
                scopes: children,
            });
        }
    }

    async fn execute_subsets(&mut self, entry: PendingFieldResults) -> Result<(), RequestAborted> {
        let Some(set) = entry.field.selection_set() else {
            return Err(self.ctx.fail_fatal(format!(
                "FATAL: field '{}' produced objects but has no selection subset.",
                entry.field.key()
            )));
        };

        let mut groups: IndexMap<String, Vec<ScopeId>> = IndexMap::new();
        for scope in entry.scopes {
            groups
                .entry(self.tree.scope(scope).type_name.clone())
                .or_default()
                .push(scope);
        }

        for (type_name, scopes) in groups {
            let Some(subset) = self.operation.subset(set, &type_name) else {
                return Err(self.ctx.fail_fatal(format!(
                    "FATAL: failed to find mapped selection subset for field '{}' on type '{type_name}'.",
                    entry.field.key()
                )));
            };
            let fields = collect_fields(self.operation, subset, &self.variables)
                .map_err(|message| self.ctx.fail_fatal(message))?;
            for field in fields {
                self.execute_field(&field, &scopes).await?;
            }
        }
        Ok(())
    }

    /// Resolves one field for every scope and stores the completed values.
    async fn execute_field(&mut self, field: &Arc<MappedField>, scopes: &[ScopeId]) -> Result<(), RequestAborted> {
        let key = field.key();
        if field.is_typename() {
            for &scope in scopes {
                let type_name = self.tree.scope(scope).type_name.clone();
                self.tree
                    .scope_mut(scope)
                    .set_value(key, OutputValue::Scalar(Value::String(type_name)));
            }
            return Ok(());
        }

        let parents: Vec<Option<Entity>> = scopes.iter().map(|&s| self.tree.scope(s).entity.clone()).collect();
        let paths: Vec<ResponsePath> = scopes
            .iter()
            .map(|&s| {
                let mut path = self.tree.path_of(s);
                path.push(PathSegment::from(key));
                path
            })
            .collect();
        let state = Arc::new(FieldState::new(
            Arc::clone(field),
            parents.iter().flatten().cloned().collect(),
            evaluate_arguments(&field.arguments, &self.variables),
        ));

        let (Some(first_parent), Some(first_path)) = (parents.first(), paths.first()) else {
            return Ok(());
        };
        let first = invoke_resolver(self.ctx, &state, first_parent.clone(), first_path.clone()).await?;
        let results: Vec<Option<ResolvedValue>> = if state.has_batch() {
            parents.iter().map(|p| Some(state.batched_value(p.as_ref()))).collect()
        } else {
            let ctx = self.ctx;
            let rest = join_all(
                parents
                    .iter()
                    .zip(&paths)
                    .skip(1)
                    .map(|(parent, path)| invoke_resolver(ctx, &state, parent.clone(), path.clone())),
            )
            .await;
            let mut results = Vec::with_capacity(scopes.len());
            results.push(first);
            for result in rest {
                results.push(result?);
            }
            results
        };

        let mut children = Vec::new();
        for (&scope, result) in scopes.iter().zip(results) {
            let output = match result {
                Some(value) => {
                    let mut segments = vec![PathSegment::from(key)];
                    self.complete(scope, field, &mut segments, field.ty(), value, &mut children)?
                }
                None => OutputValue::Null,
            };
            self.tree.scope_mut(scope).set_value(key, output);
        }

        if state.failed() {
            self.failed = true;
        }
        self.queue_children(field, children);
        Ok(())
    }

    /// Completes a resolved value against `ty`. Objects get a new scope and
    /// are collected in `children` for the next wave.
    fn complete(
        &mut self,
        parent: ScopeId,
        field: &MappedField,
        segments: &mut Vec<PathSegment>,
        ty: &TypeRef,
        value: ResolvedValue,
        children: &mut Vec<ScopeId>,
    ) -> Result<OutputValue, RequestAborted> {
        match ty {
            TypeRef::NonNull(inner) => {
                if value.is_null() {
                    if !self.ctx.options().contains(ServerOptions::IGNORE_OUT_NULL_FAULTS) {
                        self.field_error(
                            parent,
                            segments,
                            field,
                            format!("Non-null field '{}.{}' resolved to null.", field.owner_type, field.name()),
                        )?;
                    }
                    return Ok(OutputValue::Null);
                }
                self.complete(parent, field, segments, inner, value, children)
            }
            TypeRef::List(inner) => match value {
                ResolvedValue::Null => Ok(OutputValue::Null),
                ResolvedValue::List(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for (index, item) in items.into_iter().enumerate() {
                        segments.push(PathSegment::Index(index));
                        let completed = self.complete(parent, field, segments, inner, item, children);
                        segments.pop();
                        out.push(completed?);
                    }
                    Ok(OutputValue::List(out))
                }
                _ => {
                    self.field_error(
                        parent,
                        segments,
                        field,
                        format!("Field '{}.{}' expected a list value.", field.owner_type, field.name()),
                    )?;
                    Ok(OutputValue::Null)
                }
            },
            TypeRef::Named(type_name) => match value {
                ResolvedValue::Null => Ok(OutputValue::Null),
                ResolvedValue::Scalar(v) if !field.result_kind.is_composite() => Ok(OutputValue::Scalar(v)),
                ResolvedValue::Object(entity) if field.result_kind.is_composite() => {
                    self.ctx.count_output_object()?;
                    let scope = self.tree.add(parent, segments.clone(), entity);
                    children.push(scope);
                    Ok(OutputValue::Object(scope))
                }
                _ => {
                    self.field_error(
                        parent,
                        segments,
                        field,
                        format!(
                            "Field '{}.{}' resolved to a value incompatible with type '{type_name}'.",
                            field.owner_type,
                            field.name()
                        ),
                    )?;
                    Ok(OutputValue::Null)
                }
            },
        }
    }

    fn field_error(
        &mut self,
        parent: ScopeId,
        segments: &[PathSegment],
        field: &MappedField,
        message: String,
    ) -> Result<(), RequestAborted> {
        self.failed = true;
        let mut path = self.tree.path_of(parent);
        path.extend_from_slice(segments);
        self.ctx.add_error(
            GraphQLError::server_error(message)
                .with_path(path)
                .with_location(field.location()),
        )
    }
}

/// Invokes a field's resolver for one parent. Returns `None` when the
/// resolver failed; its errors are already recorded.
pub(crate) async fn invoke_resolver(
    ctx: &RequestContext,
    state: &Arc<FieldState>,
    parent: Option<Entity>,
    path: ResponsePath,
) -> Result<Option<ResolvedValue>, RequestAborted> {
    let field = FieldContext::new(Arc::clone(state), parent, path, ctx.clone());
    let Some(resolver) = field.mapped_field().resolver.clone() else {
        return Ok(Some(ResolvedValue::Null));
    };
    ctx.count_resolver_call();

    let outcome = ctx
        .guard(AssertUnwindSafe(resolver.resolve(&field)).catch_unwind())
        .await?;
    let result = match outcome {
        Ok(Ok(value)) => Some(value),
        Ok(Err(error)) => {
            report_resolver_error(&field, error)?;
            None
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(field = field.field_name(), %message, "resolver panicked");
            field.post_error(
                ErrorCode::ServerError,
                format!("Resolver for field '{}' failed: {message}", field.field_name()),
            )?;
            None
        }
    };
    if ctx.is_aborted() {
        return Err(RequestAborted);
    }
    Ok(result)
}

fn report_resolver_error(field: &FieldContext, error: ResolverError) -> Result<(), RequestAborted> {
    match error {
        ResolverError::Aborted => {
            field.state().mark_failed();
            Ok(())
        }
        ResolverError::Multiple(messages) => {
            for message in messages {
                field.post_error(ErrorCode::ResolverError, message)?;
            }
            Ok(())
        }
        other => field.post_error(other.code(), other.to_string()),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}

/// Flattens a subset into the fields to execute: fragments are expanded
/// for the subset's type, skipped items dropped, and for duplicate keys
/// the first occurrence kept.
pub(crate) fn collect_fields(
    operation: &MappedOperation,
    subset: &MappedSubSet,
    variables: &Variables,
) -> Result<Vec<Arc<MappedField>>, String> {
    let mut fields = Vec::new();
    let mut seen = FxHashSet::default();
    collect_into(operation, subset, variables, &mut fields, &mut seen)?;
    Ok(fields)
}

fn collect_into(
    operation: &MappedOperation,
    subset: &MappedSubSet,
    variables: &Variables,
    fields: &mut Vec<Arc<MappedField>>,
    seen: &mut FxHashSet<String>,
) -> Result<(), String> {
    for item in &subset.items {
        match item {
            MappedItem::Field(field) => {
                if !should_skip(&field.directives, variables) && seen.insert(field.key().to_string()) {
                    fields.push(Arc::clone(field));
                }
            }
            MappedItem::FragmentSpread(spread) => {
                if should_skip(&spread.directives, variables) {
                    continue;
                }
                let inner = operation
                    .subset(&spread.selection_set, &subset.object_type)
                    .ok_or_else(|| {
                        format!(
                            "FATAL: failed to find mapped fragment subset on type '{}'.",
                            subset.object_type
                        )
                    })?;
                collect_into(operation, inner, variables, fields, seen)?;
            }
        }
    }
    Ok(())
}

fn should_skip(directives: &[MappedDirective], variables: &Variables) -> bool {
    directives.iter().any(|directive| {
        directive
            .handler
            .skip_action()
            .is_some_and(|action| action.should_skip(&evaluate_arguments(&directive.arguments, variables)))
    })
}
