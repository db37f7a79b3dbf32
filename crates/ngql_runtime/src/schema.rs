//! Schema model.
//!
//! The schema is built once at startup and is read-only afterwards; every
//! request shares it through an `Arc` without locking.

use crate::directives::{DirectiveHandler, DirectiveRegistry, IncludeDirective, SkipDirective};
use crate::request::OperationKind;
use crate::resolver::{Resolver, ResolverMap};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Built-in scalar names.
pub const BUILTIN_SCALARS: [&str; 5] = ["Int", "Float", "String", "Boolean", "ID"];

/// Kind tag of a type definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
}

impl TypeKind {
    /// Object, Interface and Union values need a selection subset.
    pub const fn is_composite(&self) -> bool {
        match self {
            Self::Object | Self::Interface | Self::Union => true,
            Self::Scalar | Self::Enum | Self::InputObject => false,
        }
    }

    /// Interface and Union resolve to one of several object types.
    pub const fn is_abstract(&self) -> bool {
        match self {
            Self::Interface | Self::Union => true,
            Self::Scalar | Self::Object | Self::Enum | Self::InputObject => false,
        }
    }
}

/// A type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TypeDef {
    Scalar(ScalarDef),
    Object(ObjectDef),
    Interface(InterfaceDef),
    Union(UnionDef),
    Enum(EnumDef),
    InputObject(InputObjectDef),
}

impl TypeDef {
    pub fn name(&self) -> &str {
        match self {
            Self::Scalar(s) => &s.name,
            Self::Object(o) => &o.name,
            Self::Interface(i) => &i.name,
            Self::Union(u) => &u.name,
            Self::Enum(e) => &e.name,
            Self::InputObject(i) => &i.name,
        }
    }

    pub const fn kind(&self) -> TypeKind {
        match self {
            Self::Scalar(_) => TypeKind::Scalar,
            Self::Object(_) => TypeKind::Object,
            Self::Interface(_) => TypeKind::Interface,
            Self::Union(_) => TypeKind::Union,
            Self::Enum(_) => TypeKind::Enum,
            Self::InputObject(_) => TypeKind::InputObject,
        }
    }

    /// Output fields of an object or interface.
    pub fn fields(&self) -> Option<&IndexMap<String, FieldDef>> {
        match self {
            Self::Object(o) => Some(&o.fields),
            Self::Interface(i) => Some(&i.fields),
            Self::Scalar(_) | Self::Union(_) | Self::Enum(_) | Self::InputObject(_) => None,
        }
    }

    /// Looks up a visible output field.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields()
            .and_then(|fields| fields.get(name))
            .filter(|f| !f.hidden)
    }
}

/// Scalar type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalarDef {
    pub name: String,
    pub description: Option<String>,
}

impl ScalarDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }
}

/// Object type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectDef {
    pub name: String,
    pub description: Option<String>,
    pub fields: IndexMap<String, FieldDef>,
    pub implements: Vec<String>,
}

impl ObjectDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: IndexMap::new(),
            implements: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.implements.push(interface.into());
        self
    }
}

/// Interface type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceDef {
    pub name: String,
    pub description: Option<String>,
    pub fields: IndexMap<String, FieldDef>,
}

impl InterfaceDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: IndexMap::new(),
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }
}

/// Union type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnionDef {
    pub name: String,
    pub description: Option<String>,
    pub members: Vec<String>,
}

impl UnionDef {
    pub fn new<I, S>(name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            description: None,
            members: members.into_iter().map(Into::into).collect(),
        }
    }
}

/// Enum type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: String,
    pub description: Option<String>,
    pub values: Vec<EnumValueDef>,
}

impl EnumDef {
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            description: None,
            values: values
                .into_iter()
                .map(|v| EnumValueDef {
                    name: v.into(),
                    description: None,
                    deprecated: false,
                    deprecation_reason: None,
                })
                .collect(),
        }
    }

    pub fn has_value(&self, name: &str) -> bool {
        self.values.iter().any(|v| v.name == name)
    }
}

/// Enum value definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumValueDef {
    pub name: String,
    pub description: Option<String>,
    pub deprecated: bool,
    pub deprecation_reason: Option<String>,
}

/// Input object type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputObjectDef {
    pub name: String,
    pub description: Option<String>,
    pub fields: IndexMap<String, InputFieldDef>,
}

impl InputObjectDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: IndexMap::new(),
        }
    }

    pub fn field(mut self, field: InputFieldDef) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }
}

/// Output field definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub description: Option<String>,
    pub ty: TypeRef,
    pub arguments: IndexMap<String, InputFieldDef>,
    /// Hidden fields exist in the model but cannot be selected.
    pub hidden: bool,
    pub deprecated: bool,
    pub deprecation_reason: Option<String>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            description: None,
            ty,
            arguments: IndexMap::new(),
            hidden: false,
            deprecated: false,
            deprecation_reason: None,
        }
    }

    pub fn argument(mut self, argument: InputFieldDef) -> Self {
        self.arguments.insert(argument.name.clone(), argument);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn deprecated(mut self, reason: impl Into<String>) -> Self {
        self.deprecated = true;
        self.deprecation_reason = Some(reason.into());
        self
    }
}

/// Argument or input field definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputFieldDef {
    pub name: String,
    pub description: Option<String>,
    pub ty: TypeRef,
    pub default_value: Option<serde_json::Value>,
}

impl InputFieldDef {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            description: None,
            ty,
            default_value: None,
        }
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Non-null without a default: the value must be supplied.
    pub fn is_required(&self) -> bool {
        self.ty.is_non_null() && self.default_value.is_none()
    }
}

/// Type reference: a named type wrapped in any number of List/NonNull layers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    Named(String),
    NonNull(Box<TypeRef>),
    List(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Wraps this type in NonNull.
    pub fn non_null(self) -> Self {
        match self {
            Self::NonNull(_) => self,
            other => Self::NonNull(Box::new(other)),
        }
    }

    /// Wraps this type in a List.
    pub fn list(self) -> Self {
        Self::List(Box::new(self))
    }

    pub const fn is_non_null(&self) -> bool {
        matches!(self, Self::NonNull(_))
    }

    /// Strips an outer NonNull.
    pub fn nullable(&self) -> &TypeRef {
        match self {
            Self::NonNull(inner) => inner,
            other => other,
        }
    }

    /// Name of the innermost named type.
    pub fn base_name(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::NonNull(inner) | Self::List(inner) => inner.base_name(),
        }
    }

    /// Number of List layers.
    pub fn list_rank(&self) -> usize {
        match self {
            Self::Named(_) => 0,
            Self::NonNull(inner) => inner.list_rank(),
            Self::List(inner) => inner.list_rank() + 1,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.write_str(name),
            Self::NonNull(inner) => write!(f, "{inner}!"),
            Self::List(inner) => write!(f, "[{inner}]"),
        }
    }
}

/// Schema build failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema has no query type")]
    MissingQueryType,
    #[error("root type '{0}' is not an object type")]
    InvalidRootType(String),
    #[error("unknown type '{type_name}' referenced by '{referenced_by}'")]
    UnknownType {
        type_name: String,
        referenced_by: String,
    },
    #[error("union '{union}' member '{member}' is not an object type")]
    InvalidUnionMember { union: String, member: String },
    #[error("type '{object}' implements '{interface}', which is not an interface")]
    NotAnInterface { object: String, interface: String },
    #[error("type '{object}' does not declare field '{field}' of interface '{interface}'")]
    MissingInterfaceField {
        object: String,
        interface: String,
        field: String,
    },
    #[error("resolver bound to unknown field '{type_name}.{field}'")]
    UnknownResolverField { type_name: String, field: String },
}

/// A built schema.
#[derive(Debug)]
pub struct Schema {
    pub query_type: Option<String>,
    pub mutation_type: Option<String>,
    pub subscription_type: Option<String>,
    pub types: IndexMap<String, TypeDef>,
    possible_types: FxHashMap<String, Vec<String>>,
    resolvers: ResolverMap,
    directives: DirectiveRegistry,
}

impl Schema {
    /// Gets a type by name.
    pub fn get_type(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    /// Returns all types.
    pub fn types(&self) -> impl Iterator<Item = (&String, &TypeDef)> {
        self.types.iter()
    }

    /// Root object type name for an operation kind.
    pub fn root_type_name(&self, kind: OperationKind) -> Option<&str> {
        match kind {
            OperationKind::Query => self.query_type.as_deref(),
            OperationKind::Mutation => self.mutation_type.as_deref(),
            OperationKind::Subscription => self.subscription_type.as_deref(),
        }
    }

    /// Concrete object types an abstract type can resolve to. An object
    /// type is its own only possible type.
    pub fn possible_types(&self, name: &str) -> &[String] {
        self.possible_types
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_possible_type(&self, abstract_type: &str, object_type: &str) -> bool {
        self.possible_types(abstract_type)
            .iter()
            .any(|t| t == object_type)
    }

    /// Resolver bound to a field, or the default property reader.
    pub fn resolver(&self, type_name: &str, field_name: &str) -> Arc<dyn Resolver> {
        self.resolvers.get(type_name, field_name)
    }

    pub fn directive(&self, name: &str) -> Option<&Arc<dyn DirectiveHandler>> {
        self.directives.get(name)
    }

    pub fn directives(&self) -> &DirectiveRegistry {
        &self.directives
    }
}

/// Schema builder.
#[derive(Debug)]
pub struct SchemaBuilder {
    query_type: Option<String>,
    mutation_type: Option<String>,
    subscription_type: Option<String>,
    types: IndexMap<String, TypeDef>,
    resolvers: ResolverMap,
    directives: DirectiveRegistry,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaBuilder {
    /// Creates a builder with the built-in scalars and `@include`/`@skip`.
    pub fn new() -> Self {
        let mut types = IndexMap::new();
        for name in BUILTIN_SCALARS {
            types.insert(
                name.to_string(),
                TypeDef::Scalar(ScalarDef {
                    name: name.to_string(),
                    description: Some(format!("Built-in {name} scalar")),
                }),
            );
        }
        let mut directives = DirectiveRegistry::new();
        directives.register(IncludeDirective::new());
        directives.register(SkipDirective::new());
        Self {
            query_type: None,
            mutation_type: None,
            subscription_type: None,
            types,
            resolvers: ResolverMap::new(),
            directives,
        }
    }

    pub fn query_type(mut self, name: impl Into<String>) -> Self {
        self.query_type = Some(name.into());
        self
    }

    pub fn mutation_type(mut self, name: impl Into<String>) -> Self {
        self.mutation_type = Some(name.into());
        self
    }

    pub fn subscription_type(mut self, name: impl Into<String>) -> Self {
        self.subscription_type = Some(name.into());
        self
    }

    /// Adds a type.
    pub fn add_type(mut self, type_def: impl Into<TypeDef>) -> Self {
        let type_def = type_def.into();
        self.types.insert(type_def.name().to_string(), type_def);
        self
    }

    /// Binds a resolver to `type_name.field_name`.
    pub fn resolver<R: Resolver + 'static>(
        mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        resolver: R,
    ) -> Self {
        self.resolvers.register(type_name, field_name, resolver);
        self
    }

    /// Registers a custom directive handler.
    pub fn directive<D: DirectiveHandler + 'static>(mut self, handler: D) -> Self {
        self.directives.register(handler);
        self
    }

    /// Validates type references and computes possible types.
    pub fn build(self) -> Result<Schema, SchemaError> {
        let query = self.query_type.as_deref().ok_or(SchemaError::MissingQueryType)?;
        for root in [Some(query), self.mutation_type.as_deref(), self.subscription_type.as_deref()]
            .into_iter()
            .flatten()
        {
            match self.types.get(root) {
                Some(TypeDef::Object(_)) => {}
                Some(_) => return Err(SchemaError::InvalidRootType(root.to_string())),
                None => {
                    return Err(SchemaError::UnknownType {
                        type_name: root.to_string(),
                        referenced_by: "schema".to_string(),
                    })
                }
            }
        }

        let mut possible_types: FxHashMap<String, Vec<String>> = FxHashMap::default();
        for type_def in self.types.values() {
            self.check_references(type_def)?;
            match type_def {
                TypeDef::Object(obj) => {
                    possible_types
                        .entry(obj.name.clone())
                        .or_default()
                        .push(obj.name.clone());
                    for iface in &obj.implements {
                        let Some(TypeDef::Interface(iface_def)) = self.types.get(iface) else {
                            return Err(SchemaError::NotAnInterface {
                                object: obj.name.clone(),
                                interface: iface.clone(),
                            });
                        };
                        if let Some(missing) =
                            iface_def.fields.keys().find(|f| !obj.fields.contains_key(*f))
                        {
                            return Err(SchemaError::MissingInterfaceField {
                                object: obj.name.clone(),
                                interface: iface.clone(),
                                field: missing.clone(),
                            });
                        }
                        possible_types
                            .entry(iface.clone())
                            .or_default()
                            .push(obj.name.clone());
                    }
                }
                TypeDef::Union(union) => {
                    for member in &union.members {
                        if !matches!(self.types.get(member), Some(TypeDef::Object(_))) {
                            return Err(SchemaError::InvalidUnionMember {
                                union: union.name.clone(),
                                member: member.clone(),
                            });
                        }
                    }
                    possible_types.insert(union.name.clone(), union.members.clone());
                }
                TypeDef::Scalar(_)
                | TypeDef::Interface(_)
                | TypeDef::Enum(_)
                | TypeDef::InputObject(_) => {}
            }
        }

        for (type_name, field_name) in self.resolvers.bindings() {
            let bound = self
                .types
                .get(type_name)
                .and_then(|t| t.fields())
                .is_some_and(|fields| fields.contains_key(field_name));
            if !bound {
                return Err(SchemaError::UnknownResolverField {
                    type_name: type_name.to_string(),
                    field: field_name.to_string(),
                });
            }
        }

        Ok(Schema {
            query_type: self.query_type,
            mutation_type: self.mutation_type,
            subscription_type: self.subscription_type,
            types: self.types,
            possible_types,
            resolvers: self.resolvers,
            directives: self.directives,
        })
    }

    fn check_references(&self, type_def: &TypeDef) -> Result<(), SchemaError> {
        let check = |ty: &TypeRef, owner: String| {
            if self.types.contains_key(ty.base_name()) {
                Ok(())
            } else {
                Err(SchemaError::UnknownType {
                    type_name: ty.base_name().to_string(),
                    referenced_by: owner,
                })
            }
        };
        if let Some(fields) = type_def.fields() {
            for field in fields.values() {
                check(&field.ty, format!("{}.{}", type_def.name(), field.name))?;
                for arg in field.arguments.values() {
                    check(
                        &arg.ty,
                        format!("{}.{}({})", type_def.name(), field.name, arg.name),
                    )?;
                }
            }
        }
        if let TypeDef::InputObject(input) = type_def {
            for field in input.fields.values() {
                check(&field.ty, format!("{}.{}", input.name, field.name))?;
            }
        }
        Ok(())
    }
}

impl From<ScalarDef> for TypeDef {
    fn from(def: ScalarDef) -> Self {
        Self::Scalar(def)
    }
}

impl From<ObjectDef> for TypeDef {
    fn from(def: ObjectDef) -> Self {
        Self::Object(def)
    }
}

impl From<InterfaceDef> for TypeDef {
    fn from(def: InterfaceDef) -> Self {
        Self::Interface(def)
    }
}

impl From<UnionDef> for TypeDef {
    fn from(def: UnionDef) -> Self {
        Self::Union(def)
    }
}

impl From<EnumDef> for TypeDef {
    fn from(def: EnumDef) -> Self {
        Self::Enum(def)
    }
}

impl From<InputObjectDef> for TypeDef {
    fn from(def: InputObjectDef) -> Self {
        Self::InputObject(def)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{FnResolver, ResolvedValue};

    fn int() -> TypeRef {
        TypeRef::named("Int")
    }

    fn pet_schema() -> SchemaBuilder {
        SchemaBuilder::new()
            .query_type("Query")
            .add_type(InterfaceDef::new("Named").field(FieldDef::new("name", TypeRef::named("String"))))
            .add_type(
                ObjectDef::new("Dog")
                    .implements("Named")
                    .field(FieldDef::new("name", TypeRef::named("String")))
                    .field(FieldDef::new("barks", TypeRef::named("Boolean"))),
            )
            .add_type(
                ObjectDef::new("Cat")
                    .implements("Named")
                    .field(FieldDef::new("name", TypeRef::named("String"))),
            )
            .add_type(UnionDef::new("Pet", ["Dog", "Cat"]))
            .add_type(
                ObjectDef::new("Query")
                    .field(FieldDef::new("pets", TypeRef::named("Pet").non_null().list()))
                    .field(FieldDef::new("count", int().non_null())),
            )
    }

    #[test]
    fn test_type_ref_display() {
        let ty = int().non_null().list().non_null();
        assert_eq!(ty.to_string(), "[Int!]!");
        assert_eq!(ty.base_name(), "Int");
        assert_eq!(ty.list_rank(), 1);
        assert_eq!(ty.nullable().to_string(), "[Int!]");
        assert_eq!(int().non_null().non_null(), int().non_null());
    }

    #[test]
    fn test_possible_types() {
        let schema = pet_schema().build().unwrap();
        assert_eq!(schema.possible_types("Named"), ["Dog", "Cat"]);
        assert_eq!(schema.possible_types("Pet"), ["Dog", "Cat"]);
        assert_eq!(schema.possible_types("Dog"), ["Dog"]);
        assert!(schema.is_possible_type("Pet", "Cat"));
        assert!(!schema.is_possible_type("Pet", "Query"));
        assert_eq!(schema.root_type_name(OperationKind::Query), Some("Query"));
        assert_eq!(schema.root_type_name(OperationKind::Mutation), None);
    }

    #[test]
    fn test_builtins_and_directives() {
        let schema = pet_schema().build().unwrap();
        for name in BUILTIN_SCALARS {
            assert_eq!(schema.get_type(name).map(TypeDef::kind), Some(TypeKind::Scalar));
        }
        assert!(schema.directive("include").is_some());
        assert!(schema.directive("skip").is_some());
        assert!(schema.directive("defer").is_none());
    }

    #[test]
    fn test_build_errors() {
        let err = SchemaBuilder::new().build().unwrap_err();
        assert_eq!(err, SchemaError::MissingQueryType);

        let err = pet_schema()
            .add_type(ObjectDef::new("Bird").field(FieldDef::new("wings", TypeRef::named("Wing"))))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownType { ref type_name, .. } if type_name == "Wing"));

        let err = pet_schema()
            .add_type(ObjectDef::new("Fish").implements("Named"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::MissingInterfaceField { .. }));

        let err = pet_schema()
            .resolver("Query", "nothing", FnResolver::new(|_| Ok(ResolvedValue::Null)))
            .build()
            .unwrap_err();
        assert_eq!(err.to_string(), "resolver bound to unknown field 'Query.nothing'");
    }

    #[test]
    fn test_hidden_field_not_visible() {
        let obj = TypeDef::from(
            ObjectDef::new("Thing").field(FieldDef::new("secret", int()).hidden()),
        );
        assert!(obj.field("secret").is_none());
        assert!(obj.fields().is_some_and(|f| f.contains_key("secret")));
    }
}
