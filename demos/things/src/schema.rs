//! Type definitions of the Things API.

use ngql_runtime::{
    EnumDef, FieldDef, InputFieldDef, InputObjectDef, InterfaceDef, ObjectDef, SchemaBuilder, TypeRef, UnionDef,
};
use serde_json::json;

fn named(name: &str) -> TypeRef {
    TypeRef::named(name)
}

fn required(name: &str) -> TypeRef {
    TypeRef::named(name).non_null()
}

/// `[name!]!`
fn required_list(name: &str) -> TypeRef {
    required(name).list().non_null()
}

/// Returns a builder holding every Things type, without resolvers.
pub fn types() -> SchemaBuilder {
    SchemaBuilder::new()
        .query_type("Query")
        .mutation_type("Mutation")
        .subscription_type("Subscription")
        .add_type(EnumDef::new("ThingKind", ["KIND_ONE", "KIND_TWO", "KIND_THREE"]))
        .add_type(InterfaceDef::new("NamedObj").field(FieldDef::new("name", named("String"))))
        .add_type(
            ObjectDef::new("Thing")
                .implements("NamedObj")
                .field(FieldDef::new("id", required("Int")))
                .field(FieldDef::new("name", required("String")))
                .field(FieldDef::new("description", named("String")))
                .field(FieldDef::new("kind", required("ThingKind")))
                .field(
                    FieldDef::new("idStr", required("String"))
                        .argument(InputFieldDef::new("prefix", named("String")).with_default(json!("Thing-"))),
                )
                .field(FieldDef::new("mainOtherThing", named("OtherThing")))
                .field(FieldDef::new("otherThings", required_list("OtherThing")))
                .field(FieldDef::new("legacyCode", named("String")).hidden()),
        )
        .add_type(
            ObjectDef::new("OtherThing")
                .implements("NamedObj")
                .field(FieldDef::new("id", required("Int")))
                .field(FieldDef::new("name", named("String")))
                .field(FieldDef::new("nameOrThrow", named("String")))
                .field(FieldDef::new("nameOrThrowAsync", named("String"))),
        )
        .add_type(UnionDef::new("ThingsUnion", ["Thing", "OtherThing"]))
        .add_type(
            InputObjectDef::new("InputObj")
                .field(InputFieldDef::new("id", required("Int")))
                .field(InputFieldDef::new("name", required("String")))
                .field(InputFieldDef::new("num", named("Int")))
                .field(InputFieldDef::new("kind", named("ThingKind")).with_default(json!("KIND_ONE"))),
        )
        .add_type(query())
        .add_type(mutation())
        .add_type(subscription())
}

fn query() -> ObjectDef {
    ObjectDef::new("Query")
        .field(FieldDef::new("things", required_list("Thing")))
        .field(FieldDef::new("getThing", named("Thing")).argument(InputFieldDef::new("id", required("Int"))))
        .field(FieldDef::new("getInvalidThing", named("Thing")))
        .field(FieldDef::new("waitForPositiveValue", required("Int")))
        .field(
            FieldDef::new("echoInputValues", named("String"))
                .argument(InputFieldDef::new("boolVal", required("Boolean")))
                .argument(InputFieldDef::new("intVal", required("Int")))
                .argument(InputFieldDef::new("floatVal", required("Float")))
                .argument(InputFieldDef::new("strVal", required("String")))
                .argument(InputFieldDef::new("kindVal", required("ThingKind"))),
        )
        .field(
            FieldDef::new("echoIntArray", named("String"))
                .argument(InputFieldDef::new("intVals", required("Int").list())),
        )
        .field(FieldDef::new("echoInputObj", named("String")).argument(InputFieldDef::new("inpObj", required("InputObj"))))
        .field(FieldDef::new("intListRank2", required("Int").list().non_null().list().non_null()))
        .field(FieldDef::new("thingsListRank2", required("Thing").list().non_null().list().non_null()))
        .field(FieldDef::new("allKinds", required_list("ThingKind")))
        .field(FieldDef::new("thingsUnionList", required_list("ThingsUnion")))
        .field(FieldDef::new("someNamedObjects", required_list("NamedObj")))
        .field(FieldDef::new("throwAggrExc", named("Int")))
}

fn mutation() -> ObjectDef {
    let rename = |name: &str| {
        FieldDef::new(name, named("Thing"))
            .argument(InputFieldDef::new("id", required("Int")))
            .argument(InputFieldDef::new("newName", required("String")))
    };
    ObjectDef::new("Mutation")
        .field(rename("mutateThing"))
        .field(rename("mutateThingWithValidation"))
}

fn subscription() -> ObjectDef {
    ObjectDef::new("Subscription").field(
        FieldDef::new("subscribeToThingUpdates", named("Thing"))
            .argument(InputFieldDef::new("thingId", required("Int"))),
    )
}
