//! Parsed request tree.
//!
//! This is the shape a parser hands to the runtime: operations, selection
//! sets, fragments and directives, each node carrying its source location.
//! Selection sets are shared through `Arc` so the mapper can key mapped
//! subsets on their identity.

use crate::schema::TypeRef;
use indexmap::IndexMap;
use ngql_core::{InputValue, SourceLocation};
use std::fmt;
use std::sync::Arc;

/// Coerced variable values of one request.
pub type Variables = IndexMap<String, serde_json::Value>;

/// Kind of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed request document.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub operations: Vec<Operation>,
    pub fragments: IndexMap<String, Arc<FragmentDef>>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn with_fragment(mut self, fragment: FragmentDef) -> Self {
        self.fragments
            .insert(fragment.name.clone(), Arc::new(fragment));
        self
    }

    /// Looks up a fragment definition by name.
    pub fn fragment(&self, name: &str) -> Option<&Arc<FragmentDef>> {
        self.fragments.get(name)
    }
}

/// An operation definition.
#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub variables: Vec<VariableDef>,
    pub directives: Vec<Directive>,
    pub selection_set: Arc<SelectionSet>,
    pub location: SourceLocation,
}

impl Operation {
    pub fn new<I, S>(kind: OperationKind, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Selection>,
    {
        Self {
            kind,
            name: None,
            variables: Vec::new(),
            directives: Vec::new(),
            selection_set: SelectionSet::new(items),
            location: SourceLocation::START,
        }
    }

    pub fn query<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Selection>,
    {
        Self::new(OperationKind::Query, items)
    }

    pub fn mutation<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Selection>,
    {
        Self::new(OperationKind::Mutation, items)
    }

    pub fn subscription<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Selection>,
    {
        Self::new(OperationKind::Subscription, items)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_variable(mut self, variable: VariableDef) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn with_directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    pub fn variable(&self, name: &str) -> Option<&VariableDef> {
        self.variables.iter().find(|v| v.name == name)
    }
}

/// A variable definition: `$name: Type = default`.
#[derive(Debug, Clone)]
pub struct VariableDef {
    pub name: String,
    pub ty: TypeRef,
    pub default_value: Option<InputValue>,
    pub location: SourceLocation,
}

impl VariableDef {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            default_value: None,
            location: SourceLocation::START,
        }
    }

    pub fn with_default(mut self, value: impl Into<InputValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

/// A `{ ... }` block.
#[derive(Debug, Clone, Default)]
pub struct SelectionSet {
    pub items: Vec<Selection>,
}

impl SelectionSet {
    pub fn new<I, S>(items: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<Selection>,
    {
        Arc::new(Self {
            items: items.into_iter().map(Into::into).collect(),
        })
    }

    /// Identity of a shared selection set.
    pub fn id(set: &Arc<Self>) -> usize {
        Arc::as_ptr(set) as usize
    }
}

/// A selection item.
#[derive(Debug, Clone)]
pub enum Selection {
    Field(SelectionField),
    FragmentSpread(FragmentSpread),
}

impl From<SelectionField> for Selection {
    fn from(field: SelectionField) -> Self {
        Self::Field(field)
    }
}

impl From<FragmentSpread> for Selection {
    fn from(spread: FragmentSpread) -> Self {
        Self::FragmentSpread(spread)
    }
}

impl From<&str> for Selection {
    fn from(name: &str) -> Self {
        Self::Field(SelectionField::new(name))
    }
}

/// A field selection.
#[derive(Debug, Clone)]
pub struct SelectionField {
    pub name: String,
    pub alias: Option<String>,
    pub arguments: Vec<Argument>,
    pub directives: Vec<Directive>,
    pub selection_set: Option<Arc<SelectionSet>>,
    pub location: SourceLocation,
}

impl SelectionField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            arguments: Vec::new(),
            directives: Vec::new(),
            selection_set: None,
            location: SourceLocation::START,
        }
    }

    /// The output key: the alias if present, else the name.
    pub fn key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<InputValue>) -> Self {
        self.arguments.push(Argument::new(name, value));
        self
    }

    pub fn directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    pub fn select<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Selection>,
    {
        self.selection_set = Some(SelectionSet::new(items));
        self
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.location = SourceLocation::new(line, column);
        self
    }
}

/// A fragment spread, named (`...Name`) or inline (`... on Type { }`).
#[derive(Debug, Clone)]
pub struct FragmentSpread {
    /// `None` for inline fragments.
    pub fragment_name: Option<String>,
    /// Type condition of an inline fragment.
    pub type_condition: Option<String>,
    pub directives: Vec<Directive>,
    /// Own selection set of an inline fragment.
    pub selection_set: Option<Arc<SelectionSet>>,
    pub location: SourceLocation,
}

impl FragmentSpread {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            fragment_name: Some(name.into()),
            type_condition: None,
            directives: Vec::new(),
            selection_set: None,
            location: SourceLocation::START,
        }
    }

    pub fn inline<I, S>(type_condition: Option<&str>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Selection>,
    {
        Self {
            fragment_name: None,
            type_condition: type_condition.map(str::to_string),
            directives: Vec::new(),
            selection_set: Some(SelectionSet::new(items)),
            location: SourceLocation::START,
        }
    }

    pub fn is_inline(&self) -> bool {
        self.fragment_name.is_none()
    }

    pub fn directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.location = SourceLocation::new(line, column);
        self
    }
}

/// A named fragment definition.
#[derive(Debug, Clone)]
pub struct FragmentDef {
    pub name: String,
    pub type_condition: String,
    pub directives: Vec<Directive>,
    pub selection_set: Arc<SelectionSet>,
    pub location: SourceLocation,
}

impl FragmentDef {
    pub fn new<I, S>(name: impl Into<String>, type_condition: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Selection>,
    {
        Self {
            name: name.into(),
            type_condition: type_condition.into(),
            directives: Vec::new(),
            selection_set: SelectionSet::new(items),
            location: SourceLocation::START,
        }
    }
}

/// A directive use: `@name(args)`.
#[derive(Debug, Clone)]
pub struct Directive {
    pub name: String,
    pub arguments: Vec<Argument>,
    pub location: SourceLocation,
}

impl Directive {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
            location: SourceLocation::START,
        }
    }

    pub fn include(condition: impl Into<InputValue>) -> Self {
        Self::new("include").arg("if", condition)
    }

    pub fn skip(condition: impl Into<InputValue>) -> Self {
        Self::new("skip").arg("if", condition)
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<InputValue>) -> Self {
        self.arguments.push(Argument::new(name, value));
        self
    }
}

/// An argument use: `name: value`.
#[derive(Debug, Clone)]
pub struct Argument {
    pub name: String,
    pub value: InputValue,
    pub location: SourceLocation,
}

impl Argument {
    pub fn new(name: impl Into<String>, value: impl Into<InputValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            location: SourceLocation::START,
        }
    }
}
