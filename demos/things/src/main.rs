//! Things demo
//!
//! Runs a scripted session against the Things API: a batched query, a
//! subscription and a mutation that publishes to it.
//!
//! # Running
//! ```bash
//! RUST_LOG=ngql_runtime=debug cargo run -p things
//! ```

use ngql_runtime::{Document, GraphQLRequest, Operation, SelectionField};
use ngql_server::{ClientMessage, ServerSettings, SubscriptionSession};
use std::sync::Arc;
use things::{build_server, ThingsApp};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("things=info".parse()?))
        .with_target(false)
        .compact()
        .init();

    let app = ThingsApp::seeded();
    let server = Arc::new(build_server(&app, ServerSettings::dev())?);
    info!("Things server ready");

    // Batched query
    let query = GraphQLRequest::new(Document::new().with_operation(Operation::query([SelectionField::new(
        "things",
    )
    .select([
        SelectionField::new("id"),
        SelectionField::new("name"),
        SelectionField::new("mainOtherThing").select(["id", "name"]),
        SelectionField::new("otherThings").select(["name"]),
    ])])));
    let response = server.execute(&query).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    info!(batch_loads = app.batch_loads(), "batched query done");

    // Subscription
    let mut session = SubscriptionSession::new(Arc::clone(&server));
    let subscribe = ClientMessage::Subscribe {
        id: "updates-1".to_string(),
        payload: GraphQLRequest::new(Document::new().with_operation(Operation::subscription([
            SelectionField::new("subscribeToThingUpdates")
                .arg("thingId", 1)
                .select(["id", "name"]),
        ]))),
    };
    if let Some(reply) = session.handle(subscribe).await {
        println!("{}", serde_json::to_string(&reply)?);
    }

    // Mutation publishing to the subscription
    let mutation = GraphQLRequest::new(Document::new().with_operation(Operation::mutation([
        SelectionField::new("mutateThing")
            .arg("id", 1)
            .arg("newName", "Renamed")
            .select(["id", "name"]),
    ])));
    let response = server.execute(&mutation).await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if let Some(update) = session.try_next_message() {
        println!("{}", serde_json::to_string(&update)?);
    }
    session.close();
    Ok(())
}
