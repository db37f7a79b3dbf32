//! Transport-neutral subscription sessions.
//!
//! A session belongs to one client connection. The transport feeds it
//! [`ClientMessage`]s and writes out the [`ServerMessage`]s it returns.
//! Client-chosen ids are mapped to registry ids; all subscriptions of the
//! session end when it is closed or dropped.

use crate::server::GraphQLServer;
use indexmap::IndexMap;
use ngql_core::GraphQLError;
use ngql_runtime::{GraphQLRequest, Response, SubscriptionEvent, SubscriptionId};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Messages a client sends.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Subscribe { id: String, payload: GraphQLRequest },
    Complete { id: String },
    Ping,
}

/// Messages sent to a client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ack { id: String },
    Next { id: String, payload: Response },
    Error { id: String, payload: Vec<GraphQLError> },
    Complete { id: String },
    Pong,
}

pub struct SubscriptionSession {
    server: Arc<GraphQLServer>,
    active: IndexMap<String, SubscriptionId>,
    client_ids: FxHashMap<SubscriptionId, String>,
    events_tx: mpsc::UnboundedSender<SubscriptionEvent>,
    events_rx: mpsc::UnboundedReceiver<SubscriptionEvent>,
}

impl SubscriptionSession {
    pub fn new(server: Arc<GraphQLServer>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            server,
            active: IndexMap::new(),
            client_ids: FxHashMap::default(),
            events_tx,
            events_rx,
        }
    }

    /// Handles one client message and returns the reply, if any.
    pub async fn handle(&mut self, message: ClientMessage) -> Option<ServerMessage> {
        match message {
            ClientMessage::Subscribe { id, payload } => Some(self.subscribe(id, &payload).await),
            ClientMessage::Complete { id } => {
                if let Some(subscription) = self.active.shift_remove(&id) {
                    self.client_ids.remove(&subscription);
                    self.server.unsubscribe(subscription);
                }
                Some(ServerMessage::Complete { id })
            }
            ClientMessage::Ping => Some(ServerMessage::Pong),
        }
    }

    async fn subscribe(&mut self, id: String, request: &GraphQLRequest) -> ServerMessage {
        if self.active.contains_key(&id) {
            return ServerMessage::Error {
                payload: vec![GraphQLError::bad_request(format!("Subscriber for '{id}' already exists."))],
                id,
            };
        }
        match self.server.subscribe(request, self.events_tx.clone()).await {
            Ok(handle) => {
                debug!(client_id = %id, id = handle.id, topic = %handle.topic, "session subscribed");
                self.active.insert(id.clone(), handle.id);
                self.client_ids.insert(handle.id, id.clone());
                ServerMessage::Ack { id }
            }
            Err(errors) => ServerMessage::Error { id, payload: errors },
        }
    }

    /// Waits for the next published event of this session.
    pub async fn next_message(&mut self) -> Option<ServerMessage> {
        loop {
            let event = self.events_rx.recv().await?;
            if let Some(message) = self.to_message(event) {
                return Some(message);
            }
        }
    }

    /// Returns a published event if one is queued.
    pub fn try_next_message(&mut self) -> Option<ServerMessage> {
        while let Ok(event) = self.events_rx.try_recv() {
            if let Some(message) = self.to_message(event) {
                return Some(message);
            }
        }
        None
    }

    fn to_message(&self, event: SubscriptionEvent) -> Option<ServerMessage> {
        // Events of completed subscriptions may still be queued.
        let id = self.client_ids.get(&event.id())?.clone();
        Some(match event {
            SubscriptionEvent::Next { response, .. } => ServerMessage::Next { id, payload: response },
            SubscriptionEvent::Error { errors, .. } => ServerMessage::Error { id, payload: errors },
        })
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Ends every subscription of the session.
    pub fn close(&mut self) {
        for (_, subscription) in self.active.drain(..) {
            self.server.unsubscribe(subscription);
        }
        self.client_ids.clear();
    }
}

impl Drop for SubscriptionSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ngql_runtime::{
        Document, FieldDef, FnResolver, GraphQLObject, InputFieldDef, ObjectDef, Operation, ResolvedValue,
        SchemaBuilder, SelectionField, TypeRef,
    };
    use serde_json::json;

    struct Tick(i64);

    impl GraphQLObject for Tick {
        fn type_name(&self) -> &str {
            "Tick"
        }

        fn field(&self, name: &str) -> Option<ResolvedValue> {
            (name == "n").then(|| self.0.into())
        }
    }

    fn server() -> Arc<GraphQLServer> {
        let schema = SchemaBuilder::new()
            .query_type("Query")
            .subscription_type("Subscription")
            .add_type(ObjectDef::new("Query").field(FieldDef::new("ok", TypeRef::named("Boolean"))))
            .add_type(ObjectDef::new("Tick").field(FieldDef::new("n", TypeRef::named("Int"))))
            .add_type(
                ObjectDef::new("Subscription").field(
                    FieldDef::new("ticks", TypeRef::named("Tick"))
                        .argument(InputFieldDef::new("clock", TypeRef::named("String").non_null())),
                ),
            )
            .resolver(
                "Subscription",
                "ticks",
                FnResolver::new(|ctx| {
                    ctx.subscribe_to(format!("clock/{}", ctx.args().require::<String>("clock")?));
                    Ok(ResolvedValue::Null)
                }),
            )
            .build()
            .unwrap();
        Arc::new(GraphQLServer::new(schema))
    }

    fn subscribe(id: &str, field: SelectionField) -> ClientMessage {
        ClientMessage::Subscribe {
            id: id.to_string(),
            payload: GraphQLRequest::new(Document::new().with_operation(Operation::subscription([field]))),
        }
    }

    #[tokio::test]
    async fn test_session_flow() {
        let server = server();
        let mut session = SubscriptionSession::new(Arc::clone(&server));

        let ack = session
            .handle(subscribe("a", SelectionField::new("ticks").arg("clock", "x").select(["n"])))
            .await;
        assert!(matches!(ack, Some(ServerMessage::Ack { ref id }) if id == "a"));

        let duplicate = session
            .handle(subscribe("a", SelectionField::new("ticks").arg("clock", "x").select(["n"])))
            .await;
        assert!(matches!(duplicate, Some(ServerMessage::Error { .. })));

        assert_eq!(server.publish("clock/x", Arc::new(Tick(1))).await, 1);
        let next = session.next_message().await.unwrap();
        assert_eq!(
            serde_json::to_value(&next).unwrap(),
            json!({"type": "next", "id": "a", "payload": {"data": {"ticks": {"n": 1}}}})
        );

        assert!(matches!(session.handle(ClientMessage::Ping).await, Some(ServerMessage::Pong)));
        let complete = session.handle(ClientMessage::Complete { id: "a".into() }).await;
        assert!(matches!(complete, Some(ServerMessage::Complete { .. })));
        assert!(session.is_empty());
        assert_eq!(server.publish("clock/x", Arc::new(Tick(2))).await, 0);
        assert!(session.try_next_message().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_failure_is_error_message() {
        let mut session = SubscriptionSession::new(server());
        let reply = session
            .handle(subscribe("b", SelectionField::new("ticks").select(["n"])))
            .await
            .unwrap();
        let ServerMessage::Error { id, payload } = reply else {
            panic!("expected error message");
        };
        assert_eq!(id, "b");
        assert!(payload[0].message.contains("Missing required argument 'clock'"));
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let server = server();
        {
            let mut session = SubscriptionSession::new(Arc::clone(&server));
            session
                .handle(subscribe("c", SelectionField::new("ticks").arg("clock", "y").select(["n"])))
                .await;
            assert_eq!(server.subscriptions().subscriber_count("clock/y"), 1);
        }
        assert_eq!(server.subscriptions().subscriber_count("clock/y"), 0);
    }

    #[test]
    fn test_error_message_shape() {
        let message = ServerMessage::Error {
            id: "1".to_string(),
            payload: vec![GraphQLError::bad_request("Subscriber for '1' already exists.")],
        };
        insta::assert_json_snapshot!(message, @r###"
        {
          "type": "error",
          "id": "1",
          "payload": [
            {
              "message": "Subscriber for '1' already exists.",
              "extensions": {
                "code": "BAD_REQUEST"
              }
            }
          ]
        }
        "###);
    }
}
