//! Context handed to resolvers.

use crate::context::{CustomData, RequestAborted, RequestContext};
use crate::mapping::MappedField;
use crate::resolver::{downcast, entity_key, Entity, GraphQLObject, ResolvedValue, ResolverArgs, ResolverError};
use ngql_core::{ErrorCode, GraphQLError, ResponsePath, SourceLocation};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct BatchedResults {
    values: FxHashMap<usize, ResolvedValue>,
    default: ResolvedValue,
}

/// State shared by every invocation of one field within one wave.
pub(crate) struct FieldState {
    field: Arc<MappedField>,
    parents: Vec<Entity>,
    args: ResolverArgs,
    batch: Mutex<Option<BatchedResults>>,
    failed: AtomicBool,
}

impl FieldState {
    pub(crate) fn new(field: Arc<MappedField>, parents: Vec<Entity>, args: ResolverArgs) -> Self {
        Self {
            field,
            parents,
            args,
            batch: Mutex::new(None),
            failed: AtomicBool::new(false),
        }
    }

    pub(crate) fn has_batch(&self) -> bool {
        self.batch.lock().is_some()
    }

    /// Value posted for `parent` by a batching resolver, or the batch default.
    pub(crate) fn batched_value(&self, parent: Option<&Entity>) -> ResolvedValue {
        let batch = self.batch.lock();
        let Some(batch) = batch.as_ref() else {
            return ResolvedValue::Null;
        };
        parent
            .and_then(|entity| batch.values.get(&entity_key(entity)))
            .unwrap_or(&batch.default)
            .clone()
    }

    pub(crate) fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    pub(crate) fn failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

/// Everything a resolver may see or do for one field invocation.
#[derive(Clone)]
pub struct FieldContext {
    state: Arc<FieldState>,
    parent: Option<Entity>,
    path: ResponsePath,
    request: RequestContext,
}

impl FieldContext {
    pub(crate) fn new(
        state: Arc<FieldState>,
        parent: Option<Entity>,
        path: ResponsePath,
        request: RequestContext,
    ) -> Self {
        Self {
            state,
            parent,
            path,
            request,
        }
    }

    pub fn field_name(&self) -> &str {
        self.state.field.name()
    }

    /// Response key (alias or name).
    pub fn key(&self) -> &str {
        self.state.field.key()
    }

    pub fn mapped_field(&self) -> &MappedField {
        &self.state.field
    }

    pub fn location(&self) -> SourceLocation {
        self.state.field.location()
    }

    /// Response path of the value being resolved.
    pub fn path(&self) -> &ResponsePath {
        &self.path
    }

    pub fn args(&self) -> &ResolverArgs {
        &self.state.args
    }

    pub fn parent(&self) -> Option<&Entity> {
        self.parent.as_ref()
    }

    /// The parent entity as its concrete type.
    pub fn parent_as<T: GraphQLObject>(&self) -> Result<&T, ResolverError> {
        let parent = self
            .parent
            .as_ref()
            .ok_or_else(|| ResolverError::Internal(format!("field '{}' has no parent", self.field_name())))?;
        downcast::<T>(parent).ok_or_else(|| {
            ResolverError::Internal(format!(
                "parent of field '{}' is a '{}' entity",
                self.field_name(),
                parent.type_name()
            ))
        })
    }

    /// Every parent this field is resolved for in the current wave.
    pub fn all_parents(&self) -> &[Entity] {
        &self.state.parents
    }

    /// [`FieldContext::all_parents`] downcast to `T`; parents of other types are skipped.
    pub fn all_parents_as<T: GraphQLObject>(&self) -> impl Iterator<Item = (&Entity, &T)> {
        self.state
            .parents
            .iter()
            .filter_map(|entity| downcast::<T>(entity).map(|t| (entity, t)))
    }

    /// Posts results for all parents at once. The resolver is then not
    /// called again for this field in this wave; parents missing from
    /// `results` receive `default`.
    pub fn set_batched_results<I>(&self, results: I, default: impl Into<ResolvedValue>)
    where
        I: IntoIterator<Item = (Entity, ResolvedValue)>,
    {
        let values = results
            .into_iter()
            .map(|(entity, value)| (entity_key(&entity), value))
            .collect();
        *self.state.batch.lock() = Some(BatchedResults {
            values,
            default: default.into(),
        });
    }

    pub fn batch_result_was_set(&self) -> bool {
        self.state.has_batch()
    }

    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    pub fn custom_data(&self) -> &Arc<CustomData> {
        self.request.custom_data()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        self.request.cancellation_token()
    }

    pub fn is_cancelled(&self) -> bool {
        self.request.cancellation_token().is_cancelled()
    }

    /// Records an error for this field. The field resolves to null.
    pub fn add_error(&self, message: impl Into<String>) -> Result<(), ResolverError> {
        self.add_error_with_code(message, ErrorCode::ResolverError)
    }

    pub fn add_error_with_code(&self, message: impl Into<String>, code: ErrorCode) -> Result<(), ResolverError> {
        self.post_error(code, message.into())?;
        Ok(())
    }

    pub fn add_error_if(&self, condition: bool, message: impl Into<String>) -> Result<(), ResolverError> {
        if condition {
            self.add_error(message)?;
        }
        Ok(())
    }

    /// Fails with [`ResolverError::Aborted`] if this field has errors.
    pub fn abort_if_errors(&self) -> Result<(), ResolverError> {
        if self.state.failed() {
            return Err(ResolverError::Aborted);
        }
        Ok(())
    }

    /// Records an error and fails with [`ResolverError::Aborted`] when `condition` holds.
    pub fn abort_if(&self, condition: bool, message: impl Into<String>, code: ErrorCode) -> Result<(), ResolverError> {
        if condition {
            self.post_error(code, message.into())?;
            return Err(ResolverError::Aborted);
        }
        Ok(())
    }

    /// Binds the subscription topic. Only meaningful in the root resolver
    /// of a subscription.
    pub fn subscribe_to(&self, topic: impl Into<String>) {
        self.request.set_topic(topic.into());
    }

    /// Publishes `payload` to a topic's subscribers. Returns how many
    /// received the event.
    pub async fn publish(&self, topic: &str, payload: Entity) -> usize {
        match self.request.subscriptions() {
            Some(registry) => registry.publish(topic, payload).await,
            None => 0,
        }
    }

    pub(crate) fn post_error(&self, code: ErrorCode, message: String) -> Result<(), RequestAborted> {
        self.state.mark_failed();
        self.request.add_error(
            GraphQLError::coded(code, message)
                .with_path(self.path.clone())
                .with_location(self.location()),
        )
    }

    pub(crate) fn state(&self) -> &FieldState {
        &self.state
    }
}
