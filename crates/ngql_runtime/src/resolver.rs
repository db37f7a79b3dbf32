//! Resolver types and utilities.

use crate::field::FieldContext;
use crate::context::RequestAborted;
use ngql_core::ErrorCode;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::any::Any;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Upcast to `Any` for downcasting entities.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An application entity that backs an output object.
pub trait GraphQLObject: AsAny {
    /// Name of the object type this entity is rendered as.
    fn type_name(&self) -> &str;

    /// Reads a plain property, used for fields without a bound resolver.
    fn field(&self, name: &str) -> Option<ResolvedValue> {
        let _ = name;
        None
    }
}

/// A shared entity reference. Identity of the `Arc` is the batching key.
pub type Entity = Arc<dyn GraphQLObject>;

/// Identity key of an entity.
pub(crate) fn entity_key(entity: &Entity) -> usize {
    Arc::as_ptr(entity).cast::<()>() as usize
}

/// Downcasts an entity to its concrete type.
pub fn downcast<T: GraphQLObject>(entity: &Entity) -> Option<&T> {
    let object: &dyn GraphQLObject = &**entity;
    object.as_any().downcast_ref::<T>()
}

/// A value produced by a resolver, before completion against the field type.
#[derive(Clone)]
pub enum ResolvedValue {
    Null,
    Scalar(Value),
    Object(Entity),
    List(Vec<ResolvedValue>),
}

impl ResolvedValue {
    /// Wraps an entity.
    pub fn object<T: GraphQLObject>(entity: T) -> Self {
        Self::Object(Arc::new(entity))
    }

    /// Wraps a list of entities.
    pub fn objects<I: IntoIterator<Item = Entity>>(entities: I) -> Self {
        Self::List(entities.into_iter().map(Self::Object).collect())
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl Debug for ResolvedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Scalar(v) => f.debug_tuple("Scalar").field(v).finish(),
            Self::Object(e) => f.debug_tuple("Object").field(&e.type_name()).finish(),
            Self::List(items) => f.debug_tuple("List").field(items).finish(),
        }
    }
}

impl From<Value> for ResolvedValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            other => Self::Scalar(other),
        }
    }
}

macro_rules! scalar_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for ResolvedValue {
            fn from(value: $ty) -> Self {
                Self::Scalar(Value::from(value))
            }
        })*
    };
}

scalar_from!(bool, i32, i64, u32, u64, f64, String, &str);

impl<T: GraphQLObject> From<Arc<T>> for ResolvedValue {
    fn from(entity: Arc<T>) -> Self {
        Self::Object(entity)
    }
}

impl<T: Into<ResolvedValue>> From<Option<T>> for ResolvedValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<ResolvedValue>> From<Vec<T>> for ResolvedValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

/// Result type for resolvers.
pub type ResolverResult = Result<ResolvedValue, ResolverError>;

/// Future type for async resolvers.
pub type ResolverFuture<'a> = Pin<Box<dyn Future<Output = ResolverResult> + Send + 'a>>;

/// Error from a resolver.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolverError {
    #[error("{0}")]
    Custom(String),

    #[error("{message}")]
    Coded { code: ErrorCode, message: String },

    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    #[error("Failed to parse argument '{0}': {1}")]
    ArgumentParse(String, String),

    /// Several failures at once; each message becomes its own error.
    #[error("{}", .0.join("; "))]
    Multiple(Vec<String>),

    /// The resolver already posted its errors and gave up.
    #[error("request aborted")]
    Aborted,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResolverError {
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    pub fn coded(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Coded {
            code,
            message: message.into(),
        }
    }

    /// Error code reported in the response.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Coded { code, .. } => *code,
            Self::MissingArgument(_) | Self::ArgumentParse(..) => ErrorCode::InputError,
            Self::Internal(_) => ErrorCode::ServerError,
            Self::Custom(_) | Self::Multiple(_) | Self::Aborted => ErrorCode::ResolverError,
        }
    }
}

impl From<RequestAborted> for ResolverError {
    fn from(_: RequestAborted) -> Self {
        Self::Aborted
    }
}

/// Coerced argument values of a field.
#[derive(Debug, Clone, Default)]
pub struct ResolverArgs {
    args: indexmap::IndexMap<String, Value>,
}

impl ResolverArgs {
    /// Creates new resolver args.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates resolver args from a list of (name, value) pairs.
    pub fn from_pairs(pairs: Vec<(String, Value)>) -> Self {
        Self {
            args: pairs.into_iter().collect(),
        }
    }

    /// Gets an argument by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    /// Gets an argument as a specific type.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.args
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Gets a required argument, returning an error if not found.
    pub fn require<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T, ResolverError> {
        self.args
            .get(name)
            .ok_or_else(|| ResolverError::MissingArgument(name.to_string()))
            .and_then(|v| {
                serde_json::from_value(v.clone())
                    .map_err(|e| ResolverError::ArgumentParse(name.to_string(), e.to_string()))
            })
    }

    /// Returns all arguments in declaration order.
    pub fn all(&self) -> &indexmap::IndexMap<String, Value> {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Sets an argument.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.args.insert(name.into(), value);
    }
}

/// Trait for field resolvers.
pub trait Resolver: Send + Sync {
    /// Resolves a field value for the context's current parent.
    fn resolve<'a>(&'a self, ctx: &'a FieldContext) -> ResolverFuture<'a>;
}

/// A sync resolver function.
pub type SyncResolverFn = Arc<dyn Fn(&FieldContext) -> ResolverResult + Send + Sync>;

/// A wrapper for sync resolver functions.
pub struct FnResolver {
    func: SyncResolverFn,
}

impl FnResolver {
    /// Creates a new function resolver.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&FieldContext) -> ResolverResult + Send + Sync + 'static,
    {
        Self { func: Arc::new(f) }
    }
}

impl Resolver for FnResolver {
    fn resolve<'a>(&'a self, ctx: &'a FieldContext) -> ResolverFuture<'a> {
        Box::pin(async move { (self.func)(ctx) })
    }
}

/// An async resolver function type.
pub type AsyncResolverFn = Arc<dyn Fn(FieldContext) -> ResolverFuture<'static> + Send + Sync>;

/// A wrapper for async resolver functions.
pub struct AsyncFnResolver {
    func: AsyncResolverFn,
}

impl AsyncFnResolver {
    /// Creates a new async function resolver.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(FieldContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResolverResult> + Send + 'static,
    {
        Self {
            func: Arc::new(move |ctx| Box::pin(f(ctx))),
        }
    }
}

impl Resolver for AsyncFnResolver {
    fn resolve<'a>(&'a self, ctx: &'a FieldContext) -> ResolverFuture<'a> {
        (self.func)(ctx.clone())
    }
}

/// Reads the field from the parent entity by name, then by its snake_case form.
pub struct DefaultResolver;

impl Resolver for DefaultResolver {
    fn resolve<'a>(&'a self, ctx: &'a FieldContext) -> ResolverFuture<'a> {
        let field_name = ctx.field_name();
        let result = match ctx.parent() {
            Some(parent) => parent
                .field(field_name)
                .or_else(|| parent.field(&to_snake_case(field_name)))
                .ok_or_else(|| {
                    ResolverError::Internal(format!(
                        "entity '{}' does not expose field '{field_name}'",
                        parent.type_name()
                    ))
                }),
            None => Ok(ResolvedValue::Null),
        };
        Box::pin(async move { result })
    }
}

/// Converts camelCase to snake_case.
fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(c.to_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}

/// Resolvers keyed by (type, field).
pub struct ResolverMap {
    resolvers: FxHashMap<(String, String), Arc<dyn Resolver>>,
    default_resolver: Arc<dyn Resolver>,
}

impl Default for ResolverMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverMap {
    /// Creates a new resolver map.
    pub fn new() -> Self {
        Self {
            resolvers: FxHashMap::default(),
            default_resolver: Arc::new(DefaultResolver),
        }
    }

    /// Registers a resolver for a specific type and field.
    pub fn register<R: Resolver + 'static>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        resolver: R,
    ) {
        self.resolvers
            .insert((type_name.into(), field_name.into()), Arc::new(resolver));
    }

    /// Gets the resolver for a type and field, falling back to the default.
    pub fn get(&self, type_name: &str, field_name: &str) -> Arc<dyn Resolver> {
        self.resolvers
            .get(&(type_name.to_string(), field_name.to_string()))
            .map_or_else(|| Arc::clone(&self.default_resolver), Arc::clone)
    }

    /// Returns true if a resolver is bound to the field.
    pub fn contains(&self, type_name: &str, field_name: &str) -> bool {
        self.resolvers
            .contains_key(&(type_name.to_string(), field_name.to_string()))
    }

    /// All explicit (type, field) bindings.
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.resolvers
            .keys()
            .map(|(t, f)| (t.as_str(), f.as_str()))
    }

    /// Replaces the default resolver.
    pub fn set_default<R: Resolver + 'static>(&mut self, resolver: R) {
        self.default_resolver = Arc::new(resolver);
    }
}

impl Debug for ResolverMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverMap")
            .field("resolver_count", &self.resolvers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct User {
        first_name: String,
    }

    impl GraphQLObject for User {
        fn type_name(&self) -> &str {
            "User"
        }

        fn field(&self, name: &str) -> Option<ResolvedValue> {
            match name {
                "first_name" => Some(self.first_name.clone().into()),
                _ => None,
            }
        }
    }

    #[test]
    fn test_resolver_args() {
        let mut args = ResolverArgs::new();
        args.set("id", serde_json::json!(123));
        args.set("name", serde_json::json!("test"));

        assert_eq!(args.get_as::<i64>("id"), Some(123));
        assert_eq!(args.get_as::<String>("name"), Some("test".to_string()));
        assert_eq!(args.get_as::<i64>("missing"), None);
        assert_eq!(
            args.require::<i64>("missing"),
            Err(ResolverError::MissingArgument("missing".to_string()))
        );
        assert!(matches!(
            args.require::<i64>("name"),
            Err(ResolverError::ArgumentParse(..))
        ));
    }

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("firstName"), "first_name");
        assert_eq!(to_snake_case("lastName"), "last_name");
        assert_eq!(to_snake_case("id"), "id");
    }

    #[test]
    fn test_downcast_entity() {
        let entity: Entity = Arc::new(User {
            first_name: "Alice".into(),
        });
        assert_eq!(downcast::<User>(&entity).map(|u| u.first_name.as_str()), Some("Alice"));

        let same = Arc::clone(&entity);
        assert_eq!(entity_key(&entity), entity_key(&same));
        let other: Entity = Arc::new(User {
            first_name: "Alice".into(),
        });
        assert_ne!(entity_key(&entity), entity_key(&other));
    }

    #[test]
    fn test_resolved_value_conversions() {
        assert!(ResolvedValue::from(None::<i32>).is_null());
        assert!(matches!(ResolvedValue::from(Value::Null), ResolvedValue::Null));
        assert!(matches!(
            ResolvedValue::from(vec![1, 2]),
            ResolvedValue::List(ref items) if items.len() == 2
        ));
        let user = Arc::new(User {
            first_name: "Bob".into(),
        });
        assert!(matches!(ResolvedValue::from(user), ResolvedValue::Object(_)));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ResolverError::custom("x").code(), ErrorCode::ResolverError);
        assert_eq!(
            ResolverError::coded(ErrorCode::ObjectNotFound, "gone").code(),
            ErrorCode::ObjectNotFound
        );
        assert_eq!(ResolverError::Internal("x".into()).code(), ErrorCode::ServerError);
        assert_eq!(
            ResolverError::Multiple(vec!["a".into(), "b".into()]).to_string(),
            "a; b"
        );
    }

    #[test]
    fn test_resolver_map_fallback() {
        let mut map = ResolverMap::new();
        map.register("Query", "hello", FnResolver::new(|_| Ok("Hello".into())));

        assert!(map.contains("Query", "hello"));
        assert!(!map.contains("User", "name"));
        assert_eq!(map.bindings().collect::<Vec<_>>(), [("Query", "hello")]);
    }
}
