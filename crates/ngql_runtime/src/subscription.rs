//! Topic-based subscriptions.
//!
//! Subscribing maps the request and invokes the root field's resolver
//! once; the resolver binds a topic with [`FieldContext::subscribe_to`].
//! Publishing a payload to a topic re-executes each subscriber's mapped
//! operation with the payload as the root field's value and sends the
//! result down the subscriber's channel.
//!
//! [`FieldContext::subscribe_to`]: crate::field::FieldContext::subscribe_to

use crate::config::{RequestQuota, ServerOptions};
use crate::context::{RequestContext, RequestOptions};
use crate::executor::{collect_fields, invoke_resolver};
use crate::field::FieldState;
use crate::handler::{execute_operation, prepare, GraphQLRequest, Response};
use crate::input::evaluate_arguments;
use crate::mapping::MappedOperation;
use crate::request::{OperationKind, Variables};
use crate::resolver::{Entity, ResolvedValue};
use crate::schema::Schema;
use dashmap::DashMap;
use futures::future::join_all;
use indexmap::IndexMap;
use ngql_core::{GraphQLError, PathSegment};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub type SubscriptionId = u64;

/// A message delivered to a subscriber.
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    /// Result of executing the subscription for one published payload.
    Next { id: SubscriptionId, response: Response },
    /// Execution for a payload failed before producing data.
    Error { id: SubscriptionId, errors: Vec<GraphQLError> },
}

impl SubscriptionEvent {
    pub fn id(&self) -> SubscriptionId {
        match self {
            Self::Next { id, .. } | Self::Error { id, .. } => *id,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<SubscriptionEvent>;

/// An accepted subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub topic: String,
}

struct Subscriber {
    id: SubscriptionId,
    operation: MappedOperation,
    variables: Variables,
    /// Subscribe-time options; each publish starts its own quota clock.
    options: RequestOptions,
    sink: EventSender,
}

/// Active subscriptions grouped by topic.
pub struct SubscriptionRegistry {
    schema: Arc<Schema>,
    quota: RequestQuota,
    options: ServerOptions,
    topics: DashMap<String, IndexMap<SubscriptionId, Arc<Subscriber>>>,
    index: DashMap<SubscriptionId, String>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new(schema: Arc<Schema>, quota: RequestQuota, options: ServerOptions) -> Self {
        Self {
            schema,
            quota,
            options,
            topics: DashMap::new(),
            index: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Validates and registers a subscription. Events for it are sent to `sink`.
    pub async fn subscribe(
        &self,
        request: &GraphQLRequest,
        options: RequestOptions,
        sink: EventSender,
    ) -> Result<SubscriptionHandle, Vec<GraphQLError>> {
        let ctx = RequestContext::new(&self.quota, self.options, options.clone());
        let Some(operation) = prepare(&self.schema, request, &ctx) else {
            return Err(ctx.errors());
        };
        if operation.kind != OperationKind::Subscription {
            return Err(vec![GraphQLError::bad_request(format!(
                "Expected a subscription operation, found {}.",
                operation.kind
            ))]);
        }

        let variables = ctx.variables();
        let root = operation
            .root_subset()
            .and_then(|root| collect_fields(&operation, root, &variables).ok())
            .and_then(|fields| fields.into_iter().next());
        let Some(field) = root else {
            return Err(vec![GraphQLError::bad_request(
                "Subscription operation has no root field to execute.",
            )]);
        };

        let state = Arc::new(FieldState::new(
            Arc::clone(&field),
            Vec::new(),
            evaluate_arguments(&field.arguments, &variables),
        ));
        let path = vec![PathSegment::from(field.key())];
        if invoke_resolver(&ctx, &state, None, path).await.is_err() || ctx.failed() {
            return Err(ctx.errors());
        }
        let Some(topic) = ctx.take_topic() else {
            return Err(vec![GraphQLError::server_error(format!(
                "Resolver for subscription field '{}' did not bind a topic.",
                field.name()
            ))]);
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber {
            id,
            operation,
            variables: (*variables).clone(),
            options,
            sink,
        });
        self.topics.entry(topic.clone()).or_default().insert(id, subscriber);
        self.index.insert(id, topic.clone());
        debug!(id, %topic, "subscription added");
        Ok(SubscriptionHandle { id, topic })
    }

    /// Removes a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Some((_, topic)) = self.index.remove(&id) else {
            return false;
        };
        if let Some(mut subscribers) = self.topics.get_mut(&topic) {
            subscribers.shift_remove(&id);
        }
        self.topics.remove_if(&topic, |_, subscribers| subscribers.is_empty());
        debug!(id, %topic, "subscription removed");
        true
    }

    /// Publishes a payload to every subscriber of `topic`. Returns the
    /// number of subscribers the event was delivered to; subscribers
    /// whose channel is closed are removed.
    pub async fn publish(&self, topic: &str, payload: Entity) -> usize {
        let subscribers: Vec<Arc<Subscriber>> = self
            .topics
            .get(topic)
            .map(|entry| entry.values().cloned().collect())
            .unwrap_or_default();
        if subscribers.is_empty() {
            return 0;
        }
        debug!(%topic, subscribers = subscribers.len(), "publishing");

        let delivered = join_all(
            subscribers
                .iter()
                .map(|subscriber| self.deliver(subscriber, Arc::clone(&payload))),
        )
        .await;

        let mut count = 0;
        for (subscriber, ok) in subscribers.iter().zip(delivered) {
            if ok {
                count += 1;
            } else {
                warn!(id = subscriber.id, %topic, "subscriber channel closed, removing subscription");
                self.unsubscribe(subscriber.id);
            }
        }
        count
    }

    async fn deliver(&self, subscriber: &Subscriber, payload: Entity) -> bool {
        let ctx = RequestContext::new(&self.quota, self.options, subscriber.options.clone());
        ctx.set_variables(subscriber.variables.clone());
        let data = execute_operation(&subscriber.operation, &ctx, Some(ResolvedValue::Object(payload))).await;

        let event = if ctx.is_aborted() {
            SubscriptionEvent::Error {
                id: subscriber.id,
                errors: ctx.errors(),
            }
        } else {
            SubscriptionEvent::Next {
                id: subscriber.id,
                response: Response::from_context(Some(data), &ctx),
            }
        };
        subscriber.sink.send(event).is_ok()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |entry| entry.len())
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn topic_of(&self, id: SubscriptionId) -> Option<String> {
        self.index.get(&id).map(|entry| entry.value().clone())
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("topics", &self.topics.len())
            .field("subscriptions", &self.index.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CustomData;
    use crate::request::{Document, Operation, SelectionField};
    use ngql_core::ErrorCode;
    use tokio_util::sync::CancellationToken;
    use crate::resolver::{FnResolver, GraphQLObject};
    use crate::schema::{FieldDef, InputFieldDef, ObjectDef, SchemaBuilder, TypeRef};
    use serde_json::json;

    struct Update {
        id: i64,
    }

    impl GraphQLObject for Update {
        fn type_name(&self) -> &str {
            "Update"
        }

        fn field(&self, name: &str) -> Option<ResolvedValue> {
            (name == "id").then(|| self.id.into())
        }
    }

    fn registry() -> SubscriptionRegistry {
        let schema = SchemaBuilder::new()
            .query_type("Query")
            .subscription_type("Subscription")
            .add_type(ObjectDef::new("Query").field(FieldDef::new("ok", TypeRef::named("Boolean"))))
            .add_type(
                ObjectDef::new("Update")
                    .field(FieldDef::new("id", TypeRef::named("Int").non_null()))
                    .field(FieldDef::new("tag", TypeRef::named("String"))),
            )
            .add_type(
                ObjectDef::new("Subscription")
                    .field(
                        FieldDef::new("updates", TypeRef::named("Update"))
                            .argument(InputFieldDef::new("topic", TypeRef::named("String").non_null())),
                    )
                    .field(FieldDef::new("unbound", TypeRef::named("Update"))),
            )
            .resolver(
                "Subscription",
                "updates",
                FnResolver::new(|ctx| {
                    ctx.subscribe_to(ctx.args().require::<String>("topic")?);
                    Ok(ResolvedValue::Null)
                }),
            )
            .resolver("Subscription", "unbound", FnResolver::new(|_| Ok(ResolvedValue::Null)))
            .resolver(
                "Update",
                "tag",
                FnResolver::new(|ctx| Ok(ctx.custom_data().get::<Tag>().map(|tag| tag.0.clone()).into())),
            )
            .build()
            .unwrap();
        SubscriptionRegistry::new(Arc::new(schema), RequestQuota::default(), ServerOptions::default())
    }

    struct Tag(String);

    fn request(field: SelectionField) -> GraphQLRequest {
        GraphQLRequest::new(Document::new().with_operation(Operation::subscription([field])))
    }

    #[tokio::test]
    async fn test_subscribe_publish_unsubscribe() {
        let registry = registry();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = registry
            .subscribe(
                &request(SelectionField::new("updates").arg("topic", "t1").select(["id"])),
                RequestOptions::default(),
                tx,
            )
            .await
            .unwrap();
        assert_eq!(handle.topic, "t1");
        assert_eq!(registry.subscriber_count("t1"), 1);

        assert_eq!(registry.publish("t1", Arc::new(Update { id: 7 })).await, 1);
        assert_eq!(registry.publish("other", Arc::new(Update { id: 8 })).await, 0);

        match rx.recv().await.unwrap() {
            SubscriptionEvent::Next { id, response } => {
                assert_eq!(id, handle.id);
                assert_eq!(response.to_json(), json!({"data": {"updates": {"id": 7}}}));
            }
            other => panic!("unexpected event {other:?}"),
        }

        assert!(registry.unsubscribe(handle.id));
        assert!(!registry.unsubscribe(handle.id));
        assert_eq!(registry.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_requires_topic() {
        let registry = registry();
        let (tx, _rx) = mpsc::unbounded_channel();
        let errors = registry
            .subscribe(&request(SelectionField::new("unbound").select(["id"])), RequestOptions::default(), tx)
            .await
            .unwrap_err();
        assert_eq!(
            errors[0].message,
            "Resolver for subscription field 'unbound' did not bind a topic."
        );
    }

    #[tokio::test]
    async fn test_closed_channel_removes_subscriber() {
        let registry = registry();
        let (tx, rx) = mpsc::unbounded_channel();
        registry
            .subscribe(
                &request(SelectionField::new("updates").arg("topic", "t").select(["id"])),
                RequestOptions::default(),
                tx,
            )
            .await
            .unwrap();
        drop(rx);

        assert_eq!(registry.publish("t", Arc::new(Update { id: 1 })).await, 0);
        assert_eq!(registry.subscriber_count("t"), 0);
    }

    #[tokio::test]
    async fn test_publish_uses_subscribe_options() {
        let registry = registry();
        let data = Arc::new(CustomData::new());
        data.insert(Tag("from-subscriber".to_string()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry
            .subscribe(
                &request(SelectionField::new("updates").arg("topic", "t").select(["id", "tag"])),
                RequestOptions::new().with_custom_data(data),
                tx,
            )
            .await
            .unwrap();

        registry.publish("t", Arc::new(Update { id: 3 })).await;
        match rx.recv().await.unwrap() {
            SubscriptionEvent::Next { response, .. } => {
                assert_eq!(
                    response.to_json(),
                    json!({"data": {"updates": {"id": 3, "tag": "from-subscriber"}}})
                );
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_subscriber_gets_error() {
        let registry = registry();
        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry
            .subscribe(
                &request(SelectionField::new("updates").arg("topic", "t").select(["id"])),
                RequestOptions::new().with_cancellation(token.clone()),
                tx,
            )
            .await
            .unwrap();
        token.cancel();

        registry.publish("t", Arc::new(Update { id: 1 })).await;
        match rx.recv().await.unwrap() {
            SubscriptionEvent::Error { errors, .. } => {
                assert!(errors[0].has_code(ErrorCode::Cancelled));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
