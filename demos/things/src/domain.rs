//! Domain entities of the Things app.

use ngql_runtime::{GraphQLObject, ResolvedValue};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThingKind {
    KindOne,
    KindTwo,
    KindThree,
}

impl ThingKind {
    pub const ALL: [ThingKind; 3] = [ThingKind::KindOne, ThingKind::KindTwo, ThingKind::KindThree];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThingKind::KindOne => "KindOne",
            ThingKind::KindTwo => "KindTwo",
            ThingKind::KindThree => "KindThree",
        }
    }

    /// Name of the value in the `ThingKind` GraphQL enum.
    pub fn graphql_name(&self) -> &'static str {
        match self {
            ThingKind::KindOne => "KIND_ONE",
            ThingKind::KindTwo => "KIND_TWO",
            ThingKind::KindThree => "KIND_THREE",
        }
    }
}

impl fmt::Display for ThingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct OtherThingEntity {
    pub id: i64,
    pub name: String,
}

impl OtherThingEntity {
    pub fn new(id: i64, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { id, name: name.into() })
    }
}

impl GraphQLObject for OtherThingEntity {
    fn type_name(&self) -> &str {
        "OtherThing"
    }

    fn field(&self, name: &str) -> Option<ResolvedValue> {
        match name {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.as_str().into()),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct ThingEntity {
    pub id: i64,
    /// Mutable through `mutateThing`; `None` only for the invalid thing.
    pub name: RwLock<Option<String>>,
    pub description: Option<String>,
    pub kind: ThingKind,
    pub main_other_thing: Option<Arc<OtherThingEntity>>,
    pub other_things: Vec<Arc<OtherThingEntity>>,
}

impl ThingEntity {
    pub fn new(id: i64, name: impl Into<String>, kind: ThingKind) -> Self {
        Self {
            id,
            name: RwLock::new(Some(name.into())),
            description: None,
            kind,
            main_other_thing: None,
            other_things: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the other things; the first one becomes the main one.
    pub fn with_other_things(mut self, others: Vec<Arc<OtherThingEntity>>) -> Self {
        self.main_other_thing = others.first().cloned();
        self.other_things = others;
        self
    }

    pub fn name(&self) -> Option<String> {
        self.name.read().clone()
    }

    pub fn rename(&self, name: impl Into<String>) {
        *self.name.write() = Some(name.into());
    }
}

impl GraphQLObject for ThingEntity {
    fn type_name(&self) -> &str {
        "Thing"
    }

    fn field(&self, name: &str) -> Option<ResolvedValue> {
        match name {
            "id" => Some(self.id.into()),
            "name" => Some(self.name().into()),
            "description" => Some(self.description.clone().into()),
            "kind" => Some(self.kind.graphql_name().into()),
            _ => None,
        }
    }
}

/// Value `waitForPositiveValue` polls, kept in the request's custom data.
#[derive(Debug)]
pub struct WaitValue(AtomicI64);

impl WaitValue {
    pub fn new(value: i64) -> Self {
        Self(AtomicI64::new(value))
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Release);
    }
}

impl Default for WaitValue {
    fn default() -> Self {
        Self::new(-1)
    }
}

/// The app: seeded things plus load counters for the batched fields.
#[derive(Debug)]
pub struct ThingsApp {
    pub things: Vec<Arc<ThingEntity>>,
    pub batch_loads: AtomicUsize,
}

impl ThingsApp {
    /// Three things. Thing 1 owns other things 4 and 5, thing 2 owns 6,
    /// thing 3 owns none.
    pub fn seeded() -> Arc<Self> {
        let things = vec![
            ThingEntity::new(1, "Name1", ThingKind::KindOne)
                .with_description("Some Thing #1")
                .with_other_things(vec![
                    OtherThingEntity::new(4, "Other4"),
                    OtherThingEntity::new(5, "Other5"),
                ]),
            ThingEntity::new(2, "Name2", ThingKind::KindTwo)
                .with_other_things(vec![OtherThingEntity::new(6, "Other6")]),
            ThingEntity::new(3, "Name3", ThingKind::KindThree),
        ];
        Arc::new(Self {
            things: things.into_iter().map(Arc::new).collect(),
            batch_loads: AtomicUsize::new(0),
        })
    }

    pub fn thing(&self, id: i64) -> Option<&Arc<ThingEntity>> {
        self.things.iter().find(|t| t.id == id)
    }

    pub fn batch_loads(&self) -> usize {
        self.batch_loads.load(Ordering::Relaxed)
    }

    pub(crate) fn count_batch_load(&self) {
        self.batch_loads.fetch_add(1, Ordering::Relaxed);
    }
}
