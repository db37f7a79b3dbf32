use ngql_runtime::{Document, GraphQLRequest, Operation, SelectionField};
use ngql_server::{GraphQLServer, ServerSettings};
use serde_json::json;
use std::sync::Arc;
use things::{build_server, ThingsApp};

fn setup() -> (Arc<ThingsApp>, GraphQLServer) {
    let app = ThingsApp::seeded();
    let server = build_server(&app, ServerSettings::dev()).unwrap();
    (app, server)
}

fn query(field: SelectionField) -> GraphQLRequest {
    GraphQLRequest::new(Document::new().with_operation(Operation::query([field])))
}

#[tokio::test]
async fn test_main_other_thing_loaded_once() {
    let (app, server) = setup();
    let response = server
        .execute(&query(SelectionField::new("things").select([
            SelectionField::new("id"),
            SelectionField::new("mainOtherThing").select(["name"]),
        ])))
        .await;
    assert!(response.is_ok(), "{:?}", response.errors);
    assert_eq!(
        response.data,
        Some(json!({"things": [
            {"id": 1, "mainOtherThing": {"name": "Other4"}},
            {"id": 2, "mainOtherThing": {"name": "Other6"}},
            {"id": 3, "mainOtherThing": null}
        ]}))
    );
    assert_eq!(app.batch_loads(), 1);
    assert_eq!(response.metrics.waves, 3);
}

#[tokio::test]
async fn test_batched_lists_use_default_for_missing_parents() {
    let (app, server) = setup();
    let response = server
        .execute(&query(SelectionField::new("things").select([
            SelectionField::new("otherThings").select(["id"]),
            SelectionField::new("mainOtherThing").select(["id"]),
        ])))
        .await;
    assert_eq!(
        response.data,
        Some(json!({"things": [
            {"otherThings": [{"id": 4}, {"id": 5}], "mainOtherThing": {"id": 4}},
            {"otherThings": [{"id": 6}], "mainOtherThing": {"id": 6}},
            {"otherThings": [], "mainOtherThing": null}
        ]}))
    );
    assert_eq!(app.batch_loads(), 2);
}

#[tokio::test]
async fn test_batch_spans_nested_lists() {
    let (app, server) = setup();
    let response = server
        .execute(&query(
            SelectionField::new("thingsListRank2").select([SelectionField::new("mainOtherThing").select(["id"])]),
        ))
        .await;
    assert_eq!(
        response.data,
        Some(json!({"thingsListRank2": [
            [{"mainOtherThing": {"id": 4}}, {"mainOtherThing": {"id": 6}}],
            [{"mainOtherThing": {"id": 6}}, {"mainOtherThing": null}]
        ]}))
    );
    assert_eq!(app.batch_loads(), 1);
}

#[tokio::test]
async fn test_each_request_batches_separately() {
    let (app, server) = setup();
    let request = query(SelectionField::new("things").select([SelectionField::new("mainOtherThing").select(["id"])]));
    server.execute(&request).await;
    server.execute(&request).await;
    assert_eq!(app.batch_loads(), 2);
}
