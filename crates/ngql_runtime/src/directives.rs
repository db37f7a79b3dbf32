//! Directive handlers.
//!
//! Handlers are registered once while the schema is built and dispatched by
//! name. A request using a directive with no registered handler fails at
//! mapping time. Capabilities are exposed through accessor methods; today
//! the only one is skipping a selection item (`@include`, `@skip`).

use crate::resolver::ResolverArgs;
use crate::schema::{InputFieldDef, TypeRef};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Places a directive may appear in a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectiveLocation {
    Query,
    Mutation,
    Subscription,
    Field,
    FragmentSpread,
    InlineFragment,
}

/// Directive definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectiveDefinition {
    pub name: String,
    pub description: Option<String>,
    pub arguments: IndexMap<String, InputFieldDef>,
    pub locations: Vec<DirectiveLocation>,
}

impl DirectiveDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            arguments: IndexMap::new(),
            locations: Vec::new(),
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn argument(mut self, argument: InputFieldDef) -> Self {
        self.arguments.insert(argument.name.clone(), argument);
        self
    }

    pub fn locations(mut self, locations: impl IntoIterator<Item = DirectiveLocation>) -> Self {
        self.locations.extend(locations);
        self
    }

    pub fn allows(&self, location: DirectiveLocation) -> bool {
        self.locations.contains(&location)
    }
}

/// A directive handler.
pub trait DirectiveHandler: Send + Sync {
    fn definition(&self) -> &DirectiveDefinition;

    /// Returns the skip capability, if this directive can suppress items.
    fn skip_action(&self) -> Option<&dyn SkipDirectiveAction> {
        None
    }
}

/// Decides whether a selection item is evaluated.
pub trait SkipDirectiveAction: Send + Sync {
    fn should_skip(&self, args: &ResolverArgs) -> bool;
}

fn condition_definition(name: &str, description: &str) -> DirectiveDefinition {
    DirectiveDefinition::new(name)
        .with_description(description)
        .argument(InputFieldDef::new("if", TypeRef::named("Boolean").non_null()))
        .locations([
            DirectiveLocation::Field,
            DirectiveLocation::FragmentSpread,
            DirectiveLocation::InlineFragment,
        ])
}

/// `@include(if: Boolean!)`
#[derive(Debug, Clone)]
pub struct IncludeDirective {
    definition: DirectiveDefinition,
}

impl IncludeDirective {
    pub fn new() -> Self {
        Self {
            definition: condition_definition("include", "Includes the item only when `if` is true"),
        }
    }
}

impl Default for IncludeDirective {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectiveHandler for IncludeDirective {
    fn definition(&self) -> &DirectiveDefinition {
        &self.definition
    }

    fn skip_action(&self) -> Option<&dyn SkipDirectiveAction> {
        Some(self)
    }
}

impl SkipDirectiveAction for IncludeDirective {
    fn should_skip(&self, args: &ResolverArgs) -> bool {
        !args.get_as::<bool>("if").unwrap_or(true)
    }
}

/// `@skip(if: Boolean!)`
#[derive(Debug, Clone)]
pub struct SkipDirective {
    definition: DirectiveDefinition,
}

impl SkipDirective {
    pub fn new() -> Self {
        Self {
            definition: condition_definition("skip", "Skips the item when `if` is true"),
        }
    }
}

impl Default for SkipDirective {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectiveHandler for SkipDirective {
    fn definition(&self) -> &DirectiveDefinition {
        &self.definition
    }

    fn skip_action(&self) -> Option<&dyn SkipDirectiveAction> {
        Some(self)
    }
}

impl SkipDirectiveAction for SkipDirective {
    fn should_skip(&self, args: &ResolverArgs) -> bool {
        args.get_as::<bool>("if").unwrap_or(false)
    }
}

/// Directive handlers by name.
#[derive(Default, Clone)]
pub struct DirectiveRegistry {
    handlers: IndexMap<String, Arc<dyn DirectiveHandler>>,
}

impl DirectiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under its definition's name, replacing any
    /// previous one.
    pub fn register<D: DirectiveHandler + 'static>(&mut self, handler: D) {
        let name = handler.definition().name.clone();
        self.handlers.insert(name, Arc::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn DirectiveHandler>> {
        self.handlers.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for DirectiveRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectiveRegistry")
            .field("directives", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: bool) -> ResolverArgs {
        let mut args = ResolverArgs::new();
        args.set("if", serde_json::json!(value));
        args
    }

    #[test]
    fn test_include_and_skip() {
        let include = IncludeDirective::new();
        let skip = SkipDirective::new();

        assert!(!include.should_skip(&args(true)));
        assert!(include.should_skip(&args(false)));
        assert!(skip.should_skip(&args(true)));
        assert!(!skip.should_skip(&args(false)));
    }

    #[test]
    fn test_registry_dispatch() {
        let mut registry = DirectiveRegistry::new();
        registry.register(IncludeDirective::new());
        registry.register(SkipDirective::new());

        let handler = registry.get("skip").unwrap();
        assert!(handler.definition().allows(DirectiveLocation::InlineFragment));
        assert!(!handler.definition().allows(DirectiveLocation::Query));
        assert!(handler
            .skip_action()
            .is_some_and(|action| action.should_skip(&args(true))));
        assert_eq!(registry.names().collect::<Vec<_>>(), ["include", "skip"]);
    }

    #[test]
    fn test_handler_without_skip_capability() {
        struct Audit(DirectiveDefinition);
        impl DirectiveHandler for Audit {
            fn definition(&self) -> &DirectiveDefinition {
                &self.0
            }
        }

        let mut registry = DirectiveRegistry::new();
        registry.register(Audit(
            DirectiveDefinition::new("audit").locations([DirectiveLocation::Field]),
        ));
        assert!(registry.get("audit").unwrap().skip_action().is_none());
    }
}
