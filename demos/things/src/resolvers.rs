//! Resolvers of the Things API.

use crate::domain::{OtherThingEntity, ThingEntity, ThingKind, ThingsApp, WaitValue};
use ngql_runtime::{
    AsyncFnResolver, Entity, ErrorCode, FieldContext, FnResolver, ResolvedValue, ResolverError, ResolverResult,
    SchemaBuilder,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Topic a thing's updates are published to.
pub fn thing_update_topic(id: i64) -> String {
    format!("ThingUpdate/{id}")
}

/// Binds every Things resolver to `builder`.
pub fn bind(builder: SchemaBuilder, app: &Arc<ThingsApp>) -> SchemaBuilder {
    let query = bind_query(builder, app);
    let objects = bind_objects(query, app);
    bind_mutations(objects, app)
        .resolver("Subscription", "subscribeToThingUpdates", FnResolver::new(subscribe_to_thing_updates))
}

fn bind_query(builder: SchemaBuilder, app: &Arc<ThingsApp>) -> SchemaBuilder {
    let things = Arc::clone(app);
    let get_thing = Arc::clone(app);
    let rank2 = Arc::clone(app);
    let union = Arc::clone(app);
    let named = Arc::clone(app);
    builder
        .resolver(
            "Query",
            "things",
            FnResolver::new(move |_| Ok(entities(&things.things))),
        )
        .resolver(
            "Query",
            "getThing",
            FnResolver::new(move |ctx| {
                let id: i64 = ctx.args().require("id")?;
                Ok(get_thing.thing(id).cloned().into())
            }),
        )
        .resolver(
            "Query",
            "getInvalidThing",
            FnResolver::new(|_| {
                let thing = ThingEntity::new(100, "", ThingKind::KindOne);
                *thing.name.write() = None;
                Ok(ResolvedValue::object(thing))
            }),
        )
        .resolver("Query", "waitForPositiveValue", AsyncFnResolver::new(wait_for_positive_value))
        .resolver("Query", "echoInputValues", FnResolver::new(echo_input_values))
        .resolver(
            "Query",
            "echoIntArray",
            FnResolver::new(|ctx| {
                let values: Option<Vec<i64>> = ctx.args().get_as("intVals");
                Ok(values
                    .map(|v| v.iter().map(ToString::to_string).collect::<Vec<_>>().join(","))
                    .into())
            }),
        )
        .resolver("Query", "echoInputObj", FnResolver::new(echo_input_obj))
        .resolver(
            "Query",
            "intListRank2",
            FnResolver::new(|_| Ok(vec![vec![3_i64, 2, 1], vec![6_i64, 5, 4]].into())),
        )
        .resolver(
            "Query",
            "thingsListRank2",
            FnResolver::new(move |_| {
                let things = &rank2.things;
                Ok(ResolvedValue::List(vec![
                    entities(things.get(0..2).unwrap_or_default()),
                    entities(things.get(1..3).unwrap_or_default()),
                ]))
            }),
        )
        .resolver(
            "Query",
            "allKinds",
            FnResolver::new(|_| Ok(ThingKind::ALL.iter().map(ThingKind::graphql_name).collect::<Vec<_>>().into())),
        )
        .resolver(
            "Query",
            "thingsUnionList",
            FnResolver::new(move |_| Ok(first_thing_and_other(&union))),
        )
        .resolver(
            "Query",
            "someNamedObjects",
            FnResolver::new(move |_| Ok(first_thing_and_other(&named))),
        )
        .resolver(
            "Query",
            "throwAggrExc",
            FnResolver::new(|_| {
                Err(ResolverError::Multiple(vec![
                    "Error1".to_string(),
                    "Error2".to_string(),
                    "Error3".to_string(),
                ]))
            }),
        )
}

fn bind_objects(builder: SchemaBuilder, app: &Arc<ThingsApp>) -> SchemaBuilder {
    let main_loads = Arc::clone(app);
    let list_loads = Arc::clone(app);
    builder
        .resolver(
            "Thing",
            "idStr",
            FnResolver::new(|ctx| {
                let thing = ctx.parent_as::<ThingEntity>()?;
                let prefix: String = ctx.args().get_as("prefix").unwrap_or_default();
                Ok(format!("{prefix}{}", thing.id).into())
            }),
        )
        .resolver(
            "Thing",
            "mainOtherThing",
            FnResolver::new(move |ctx| {
                main_loads.count_batch_load();
                let results: Vec<(Entity, ResolvedValue)> = ctx
                    .all_parents_as::<ThingEntity>()
                    .map(|(entity, thing)| (Arc::clone(entity), ResolvedValue::from(thing.main_other_thing.clone())))
                    .collect();
                debug!(parents = results.len(), "loaded main other things");
                ctx.set_batched_results(results, ResolvedValue::Null);
                Ok(ResolvedValue::Null)
            }),
        )
        .resolver(
            "Thing",
            "otherThings",
            FnResolver::new(move |ctx| {
                list_loads.count_batch_load();
                let results: Vec<(Entity, ResolvedValue)> = ctx
                    .all_parents_as::<ThingEntity>()
                    .map(|(entity, thing)| (Arc::clone(entity), ResolvedValue::from(thing.other_things.clone())))
                    .collect();
                ctx.set_batched_results(results, ResolvedValue::List(Vec::new()));
                Ok(ResolvedValue::Null)
            }),
        )
        .resolver("OtherThing", "nameOrThrow", FnResolver::new(name_or_throw))
        .resolver(
            "OtherThing",
            "nameOrThrowAsync",
            AsyncFnResolver::new(name_or_throw_async),
        )
}

fn bind_mutations(builder: SchemaBuilder, app: &Arc<ThingsApp>) -> SchemaBuilder {
    let mutate = Arc::clone(app);
    let validated = Arc::clone(app);
    builder
        .resolver(
            "Mutation",
            "mutateThing",
            AsyncFnResolver::new(move |ctx| mutate_thing(Arc::clone(&mutate), ctx)),
        )
        .resolver(
            "Mutation",
            "mutateThingWithValidation",
            FnResolver::new(move |ctx| {
                let id: i64 = ctx.args().require("id")?;
                let new_name: String = ctx.args().require("newName")?;
                ctx.add_error_if(id < 0, "Id value may not be negative.")?;
                ctx.add_error_if(new_name.is_empty(), "newName may not be empty.")?;
                ctx.add_error_if(new_name.len() > 10, "newName too long, max size = 10.")?;
                ctx.abort_if_errors()?;
                let thing = validated.thing(id);
                ctx.abort_if(thing.is_none(), format!("Thing with Id={id} not found."), ErrorCode::ObjectNotFound)?;
                let Some(thing) = thing else {
                    return Err(ResolverError::Aborted);
                };
                thing.rename(new_name);
                Ok(Arc::clone(thing).into())
            }),
        )
}

fn entities(things: &[Arc<ThingEntity>]) -> ResolvedValue {
    ResolvedValue::objects(things.iter().map(|t| Arc::clone(t) as Entity))
}

fn first_thing_and_other(app: &ThingsApp) -> ResolvedValue {
    let Some(thing) = app.things.first() else {
        return ResolvedValue::List(Vec::new());
    };
    let mut items: Vec<Entity> = vec![Arc::clone(thing) as Entity];
    if let Some(other) = thing.other_things.first() {
        items.push(Arc::clone(other) as Entity);
    }
    ResolvedValue::objects(items)
}

/// Returns the `WaitValue` of the request's custom data once it turns
/// non-negative, or as is when the request is cancelled.
async fn wait_for_positive_value(ctx: FieldContext) -> ResolverResult {
    let wait = ctx.custom_data().get_or_insert_with(WaitValue::default);
    while wait.get() < 0 && !ctx.is_cancelled() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(wait.get().into())
}

fn echo_input_values(ctx: &FieldContext) -> ResolverResult {
    let args = ctx.args();
    let mut parts = ["boolVal", "intVal", "floatVal", "strVal"]
        .iter()
        .map(|name| args.get(name).map(plain).unwrap_or_default())
        .collect::<Vec<_>>();
    let kind: Option<ThingKind> = args.get_as("kindVal");
    parts.push(kind.map(|k| k.as_str().to_string()).unwrap_or_default());
    Ok(parts.join("|").into())
}

#[derive(Debug, Deserialize)]
struct InputObj {
    id: i64,
    name: String,
    num: Option<i64>,
    kind: Option<ThingKind>,
}

fn echo_input_obj(ctx: &FieldContext) -> ResolverResult {
    let input: InputObj = ctx.args().require("inpObj")?;
    let num = input.num.map(|n| n.to_string()).unwrap_or_default();
    let kind = input.kind.map(|k| k.as_str()).unwrap_or_default();
    Ok(format!("id:{},name:{},num:{num},kind:{kind}", input.id, input.name).into())
}

fn name_or_throw(ctx: &FieldContext) -> ResolverResult {
    let other = ctx.parent_as::<OtherThingEntity>()?;
    if other.id == 5 {
        return Err(ResolverError::custom("Exception thrown by nameOrThrow."));
    }
    Ok(other.name.as_str().into())
}

async fn name_or_throw_async(ctx: FieldContext) -> ResolverResult {
    tokio::task::yield_now().await;
    let other = ctx.parent_as::<OtherThingEntity>()?;
    if other.id == 5 {
        return Err(ResolverError::custom("Exception thrown by nameOrThrowAsync."));
    }
    Ok(other.name.as_str().into())
}

/// Renames a thing and publishes it to the thing's update topic.
async fn mutate_thing(app: Arc<ThingsApp>, ctx: FieldContext) -> ResolverResult {
    let id: i64 = ctx.args().require("id")?;
    let new_name: String = ctx.args().require("newName")?;
    let Some(thing) = app.thing(id).cloned() else {
        ctx.add_error_with_code(format!("Thing with Id={id} not found."), ErrorCode::ObjectNotFound)?;
        return Err(ResolverError::Aborted);
    };
    thing.rename(new_name);
    let delivered = ctx.publish(&thing_update_topic(id), Arc::clone(&thing) as Entity).await;
    debug!(id, delivered, "thing updated");
    Ok(thing.into())
}

fn subscribe_to_thing_updates(ctx: &FieldContext) -> ResolverResult {
    let thing_id: i64 = ctx.args().require("thingId")?;
    ctx.subscribe_to(thing_update_topic(thing_id));
    Ok(ResolvedValue::Null)
}

/// Renders a scalar without JSON quoting.
fn plain(value: &Value) -> String {
    match value {
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
