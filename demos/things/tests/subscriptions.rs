use ngql_runtime::{Document, Entity, GraphQLRequest, InputValue, Operation, SelectionField, TypeRef, VariableDef};
use ngql_server::{ClientMessage, GraphQLServer, ServerMessage, ServerSettings, SubscriptionSession};
use serde_json::json;
use std::sync::Arc;
use things::{build_server, thing_update_topic, ThingEntity, ThingKind, ThingsApp};

fn server() -> Arc<GraphQLServer> {
    Arc::new(build_server(&ThingsApp::seeded(), ServerSettings::dev()).unwrap())
}

fn subscribe(id: &str, field: SelectionField) -> ClientMessage {
    ClientMessage::Subscribe {
        id: id.to_string(),
        payload: GraphQLRequest::new(Document::new().with_operation(Operation::subscription([field]))),
    }
}

fn thing_updates(thing_id: i64) -> SelectionField {
    SelectionField::new("subscribeToThingUpdates")
        .arg("thingId", thing_id)
        .select(["id", "name"])
}

fn rename(id: i64, name: &str) -> GraphQLRequest {
    GraphQLRequest::new(Document::new().with_operation(Operation::mutation([SelectionField::new("mutateThing")
        .arg("id", id)
        .arg("newName", name)
        .select(["id"])])))
}

#[tokio::test]
async fn test_mutation_is_published_to_subscriber() {
    let server = server();
    let mut session = SubscriptionSession::new(Arc::clone(&server));

    let ack = session.handle(subscribe("s1", thing_updates(1))).await.unwrap();
    assert!(matches!(ack, ServerMessage::Ack { ref id } if id == "s1"));
    assert_eq!(server.subscriptions().subscriber_count(&thing_update_topic(1)), 1);

    let response = server.execute(&rename(1, "Updated")).await;
    assert!(response.is_ok(), "{:?}", response.errors);

    let message = session.next_message().await.unwrap();
    insta::assert_json_snapshot!(message, @r###"
    {
      "type": "next",
      "id": "s1",
      "payload": {
        "data": {
          "subscribeToThingUpdates": {
            "id": 1,
            "name": "Updated"
          }
        }
      }
    }
    "###);
}

#[tokio::test]
async fn test_only_matching_topic_is_notified() {
    let server = server();
    let mut session = SubscriptionSession::new(Arc::clone(&server));
    session.handle(subscribe("two", thing_updates(2))).await;

    server.execute(&rename(1, "Other")).await;
    assert!(session.try_next_message().is_none());

    server.execute(&rename(2, "Mine")).await;
    let Some(ServerMessage::Next { id, payload }) = session.try_next_message() else {
        panic!("expected a next message");
    };
    assert_eq!(id, "two");
    assert_eq!(payload.data, Some(json!({"subscribeToThingUpdates": {"id": 2, "name": "Mine"}})));
}

#[tokio::test]
async fn test_subscription_with_variables_and_nested_batch() {
    let app = ThingsApp::seeded();
    let server = Arc::new(build_server(&app, ServerSettings::dev()).unwrap());
    let mut session = SubscriptionSession::new(Arc::clone(&server));

    let operation = Operation::subscription([SelectionField::new("subscribeToThingUpdates")
        .arg("thingId", InputValue::variable("thing"))
        .select([
            SelectionField::new("name"),
            SelectionField::new("otherThings").select(["name"]),
        ])])
    .with_variable(VariableDef::new("thing", TypeRef::named("Int").non_null()));
    let request = GraphQLRequest::new(Document::new().with_operation(operation)).variable("thing", json!(1));
    let ack = session
        .handle(ClientMessage::Subscribe {
            id: "vars".to_string(),
            payload: request,
        })
        .await;
    assert!(matches!(ack, Some(ServerMessage::Ack { .. })));

    server.execute(&rename(1, "Nested")).await;
    let Some(ServerMessage::Next { payload, .. }) = session.next_message().await else {
        panic!("expected a next message");
    };
    assert_eq!(
        payload.data,
        Some(json!({"subscribeToThingUpdates": {
            "name": "Nested",
            "otherThings": [{"name": "Other4"}, {"name": "Other5"}]
        }}))
    );
    assert_eq!(app.batch_loads(), 1);
}

#[tokio::test]
async fn test_invalid_subscription_is_error_message() {
    let server = server();
    let mut session = SubscriptionSession::new(Arc::clone(&server));

    let reply = session
        .handle(subscribe("bad", SelectionField::new("things").select(["id"])))
        .await
        .unwrap();
    let ServerMessage::Error { id, payload } = reply else {
        panic!("expected an error message");
    };
    assert_eq!(id, "bad");
    assert_eq!(payload[0].message, "Field 'things' not found on type 'Subscription'.");
    assert!(session.is_empty());
    assert_eq!(server.subscriptions().topic_count(), 0);
}

#[tokio::test]
async fn test_complete_and_close() {
    let server = server();
    let mut session = SubscriptionSession::new(Arc::clone(&server));
    session.handle(subscribe("a", thing_updates(1))).await;
    session.handle(subscribe("b", thing_updates(3))).await;
    assert_eq!(session.len(), 2);

    let reply = session.handle(ClientMessage::Complete { id: "a".to_string() }).await;
    assert!(matches!(reply, Some(ServerMessage::Complete { ref id }) if id == "a"));
    assert_eq!(server.subscriptions().subscriber_count(&thing_update_topic(1)), 0);
    assert_eq!(server.subscriptions().subscriber_count(&thing_update_topic(3)), 1);

    session.close();
    assert!(session.is_empty());
    assert_eq!(server.subscriptions().topic_count(), 0);
}

#[tokio::test]
async fn test_delivery_counts_per_topic() {
    let server = server();
    let mut four = SubscriptionSession::new(Arc::clone(&server));
    let mut five = SubscriptionSession::new(Arc::clone(&server));
    four.handle(subscribe("four", thing_updates(4))).await;
    five.handle(subscribe("five", thing_updates(5))).await;

    let thing = |id: i64, name: &str| -> Entity { Arc::new(ThingEntity::new(id, name, ThingKind::KindOne)) };
    assert_eq!(server.publish(&thing_update_topic(4), thing(4, "A")).await, 1);
    assert_eq!(server.publish(&thing_update_topic(4), thing(4, "B")).await, 1);
    assert_eq!(server.publish(&thing_update_topic(5), thing(5, "C")).await, 1);

    let mut names = Vec::new();
    while let Some(ServerMessage::Next { payload, .. }) = four.try_next_message() {
        names.push(payload.data.unwrap_or_default()["subscribeToThingUpdates"]["name"].clone());
    }
    assert_eq!(names, [json!("A"), json!("B")]);
    let Some(ServerMessage::Next { id, payload }) = five.try_next_message() else {
        panic!("expected a next message");
    };
    assert_eq!(id, "five");
    assert_eq!(payload.data, Some(json!({"subscribeToThingUpdates": {"id": 5, "name": "C"}})));
    assert!(five.try_next_message().is_none());

    four.handle(ClientMessage::Complete { id: "four".to_string() }).await;
    assert_eq!(server.publish(&thing_update_topic(4), thing(4, "D")).await, 0);
    assert!(four.try_next_message().is_none());
    assert!(five.try_next_message().is_none());
}
