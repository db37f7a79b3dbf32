//! Request mapping.
//!
//! Binds a request's selection sets to the schema before anything runs.
//! Every (selection set, object type) pair reachable from the operation
//! becomes one [`MappedSubSet`]; an interface or union selection is mapped
//! once per possible object type. Fragment spreads are mapped in place so
//! the executor can flatten them per concrete type.
//!
//! Errors are recorded on the request context. A field whose mapping fails
//! is left out of its subset and its nested selection is not mapped.

use crate::context::RequestContext;
use crate::directives::{DirectiveHandler, DirectiveLocation};
use crate::input::{mapped_argument, InputCoercer, MappedArgument};
use crate::request::{Argument, Directive, Document, FragmentSpread, Operation, OperationKind, Selection, SelectionField, SelectionSet};
use crate::resolver::Resolver;
use crate::schema::{FieldDef, InputFieldDef, ObjectDef, Schema, TypeDef, TypeKind, TypeRef};
use crate::config::ServerOptions;
use indexmap::IndexMap;
use ngql_core::{GraphQLError, SourceLocation};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A directive bound to its handler.
#[derive(Clone)]
pub struct MappedDirective {
    pub handler: Arc<dyn DirectiveHandler>,
    pub arguments: Vec<MappedArgument>,
    pub location: SourceLocation,
}

impl fmt::Debug for MappedDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedDirective")
            .field("name", &self.handler.definition().name)
            .field("arguments", &self.arguments)
            .finish()
    }
}

/// A field selection bound to its definition on one object type.
pub struct MappedField {
    pub selection: SelectionField,
    pub field_def: FieldDef,
    /// Object type the field is read from.
    pub owner_type: String,
    /// Kind of the field's named result type.
    pub result_kind: TypeKind,
    /// Position in the enclosing selection set.
    pub index: usize,
    pub arguments: Vec<MappedArgument>,
    pub directives: Vec<MappedDirective>,
    /// `None` for `__typename`.
    pub resolver: Option<Arc<dyn Resolver>>,
}

impl MappedField {
    pub fn name(&self) -> &str {
        &self.selection.name
    }

    pub fn key(&self) -> &str {
        self.selection.key()
    }

    pub fn location(&self) -> SourceLocation {
        self.selection.location
    }

    pub fn ty(&self) -> &TypeRef {
        &self.field_def.ty
    }

    pub fn selection_set(&self) -> Option<&Arc<SelectionSet>> {
        self.selection.selection_set.as_ref()
    }

    pub fn is_typename(&self) -> bool {
        self.resolver.is_none()
    }
}

impl fmt::Debug for MappedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedField")
            .field("key", &self.key())
            .field("owner_type", &self.owner_type)
            .field("ty", &self.field_def.ty)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

/// A fragment spread whose selection set is mapped for the enclosing type.
#[derive(Debug, Clone)]
pub struct MappedFragmentSpread {
    pub selection_set: Arc<SelectionSet>,
    pub directives: Vec<MappedDirective>,
    pub index: usize,
    pub location: SourceLocation,
}

#[derive(Debug, Clone)]
pub enum MappedItem {
    Field(Arc<MappedField>),
    FragmentSpread(MappedFragmentSpread),
}

/// One selection set mapped for one object type.
#[derive(Debug)]
pub struct MappedSubSet {
    pub object_type: String,
    pub items: Vec<MappedItem>,
}

/// A fully mapped operation, ready to execute.
#[derive(Debug)]
pub struct MappedOperation {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub root_type: String,
    document: Arc<Document>,
    root: Arc<SelectionSet>,
    subsets: FxHashMap<usize, Vec<Arc<MappedSubSet>>>,
}

impl MappedOperation {
    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    pub fn root_subset(&self) -> Option<&Arc<MappedSubSet>> {
        self.subset(&self.root, &self.root_type)
    }

    /// The mapping of `set` for `object_type`.
    pub fn subset(&self, set: &Arc<SelectionSet>, object_type: &str) -> Option<&Arc<MappedSubSet>> {
        self.subsets
            .get(&SelectionSet::id(set))?
            .iter()
            .find(|s| s.object_type == object_type)
    }

    pub fn subset_count(&self) -> usize {
        self.subsets.values().map(Vec::len).sum()
    }
}

/// Maps operation `index` of `document`. Returns `None` if any mapping
/// error was recorded on `ctx`.
pub fn map_operation(
    schema: &Schema,
    document: &Arc<Document>,
    index: usize,
    ctx: &RequestContext,
) -> Option<MappedOperation> {
    let operation = document.operations.get(index)?;
    let mut mapper = RequestMapper::new(schema, document, operation, ctx);
    let root_type = mapper.map_root()?;
    if mapper.errors > 0 {
        warn!(errors = mapper.errors, "request mapping failed");
        return None;
    }
    debug!(subsets = mapper.subsets.len(), kind = %operation.kind, "request mapped");
    Some(MappedOperation {
        kind: operation.kind,
        name: operation.name.clone(),
        root_type,
        document: Arc::clone(document),
        root: Arc::clone(&operation.selection_set),
        subsets: mapper.subsets,
    })
}

type SubsetKey = (usize, String);

struct Pending {
    set: Arc<SelectionSet>,
    object_type: String,
    strict: bool,
}

struct RequestMapper<'a> {
    schema: &'a Schema,
    document: &'a Document,
    operation: &'a Operation,
    ctx: &'a RequestContext,
    coercer: InputCoercer<'a>,
    fail_fast: bool,
    subsets: FxHashMap<usize, Vec<Arc<MappedSubSet>>>,
    queued: FxHashSet<SubsetKey>,
    in_progress: FxHashSet<SubsetKey>,
    validated: FxHashSet<SubsetKey>,
    pending: Vec<Pending>,
    reported: FxHashSet<(String, Vec<SourceLocation>)>,
    errors: usize,
    halted: bool,
}

impl<'a> RequestMapper<'a> {
    fn new(schema: &'a Schema, document: &'a Document, operation: &'a Operation, ctx: &'a RequestContext) -> Self {
        let options = ctx.options();
        Self {
            schema,
            document,
            operation,
            ctx,
            coercer: InputCoercer::new(schema, options),
            fail_fast: options.contains(ServerOptions::FAIL_FAST_ARGUMENTS),
            subsets: FxHashMap::default(),
            queued: FxHashSet::default(),
            in_progress: FxHashSet::default(),
            validated: FxHashSet::default(),
            pending: Vec::new(),
            reported: FxHashSet::default(),
            errors: 0,
            halted: false,
        }
    }

    fn error(&mut self, error: GraphQLError) {
        if !self.reported.insert((error.message.clone(), error.locations.clone())) {
            return;
        }
        self.errors += 1;
        if self.ctx.add_error(error).is_err() {
            self.halted = true;
        }
    }

    fn bad_request(&mut self, message: String, location: SourceLocation) {
        self.error(GraphQLError::bad_request(message).with_location(location));
    }

    fn map_root(&mut self) -> Option<String> {
        let operation = self.operation;
        let Some(root_type) = self.schema.root_type_name(operation.kind).map(str::to_string) else {
            self.bad_request(
                format!("Schema does not support {} operations.", operation.kind),
                operation.location,
            );
            return None;
        };

        let location = match operation.kind {
            OperationKind::Query => DirectiveLocation::Query,
            OperationKind::Mutation => DirectiveLocation::Mutation,
            OperationKind::Subscription => DirectiveLocation::Subscription,
        };
        self.map_directives(&operation.directives, location);

        if operation.kind == OperationKind::Subscription {
            self.validate_subscription();
        }

        self.enqueue(&operation.selection_set, &root_type);
        while !self.pending.is_empty() && !self.halted {
            for pending in std::mem::take(&mut self.pending) {
                if self.halted {
                    break;
                }
                self.map_subset(&pending.set, &pending.object_type, pending.strict);
            }
        }
        Some(root_type)
    }

    /// Queues `set` for every object type `type_name` can resolve to.
    fn enqueue(&mut self, set: &Arc<SelectionSet>, type_name: &str) {
        let schema = self.schema;
        let Some(type_def) = schema.get_type(type_name) else {
            return;
        };
        match type_def.kind() {
            TypeKind::Object => self.queue(set, type_name, true),
            TypeKind::Interface | TypeKind::Union => {
                if type_def.kind() == TypeKind::Interface {
                    self.validate_abstract(set, type_name);
                }
                for object_type in schema.possible_types(type_name) {
                    self.queue(set, object_type, false);
                }
            }
            TypeKind::Scalar | TypeKind::Enum | TypeKind::InputObject => {}
        }
    }

    fn queue(&mut self, set: &Arc<SelectionSet>, object_type: &str, strict: bool) {
        if self.queued.insert((SelectionSet::id(set), object_type.to_string())) {
            self.pending.push(Pending {
                set: Arc::clone(set),
                object_type: object_type.to_string(),
                strict,
            });
        }
    }

    /// Checks field names selected directly on an interface, including
    /// through inline fragments without a narrower type condition.
    fn validate_abstract(&mut self, set: &Arc<SelectionSet>, interface: &str) {
        if !self.validated.insert((SelectionSet::id(set), interface.to_string())) {
            return;
        }
        let schema = self.schema;
        let Some(type_def) = schema.get_type(interface) else {
            return;
        };
        for item in &set.items {
            match item {
                Selection::Field(field) => {
                    if field.name != "__typename" && type_def.field(&field.name).is_none() {
                        self.bad_request(
                            format!("Field '{}' not found on type '{interface}'.", field.name),
                            field.location,
                        );
                    }
                }
                Selection::FragmentSpread(spread) => {
                    let same_type = spread.type_condition.as_deref().map_or(true, |t| t == interface);
                    if let (true, Some(inner)) = (same_type, &spread.selection_set) {
                        self.validate_abstract(inner, interface);
                    }
                }
            }
        }
    }

    fn has_subset(&self, set: &Arc<SelectionSet>, object_type: &str) -> bool {
        self.subsets
            .get(&SelectionSet::id(set))
            .is_some_and(|list| list.iter().any(|s| s.object_type == object_type))
    }

    fn map_subset(&mut self, set: &Arc<SelectionSet>, object_type: &str, strict: bool) {
        if self.has_subset(set, object_type) {
            return;
        }
        let schema = self.schema;
        let Some(TypeDef::Object(object)) = schema.get_type(object_type) else {
            return;
        };

        let mut items = Vec::with_capacity(set.items.len());
        for (index, selection) in set.items.iter().enumerate() {
            if self.halted {
                break;
            }
            let mapped = match selection {
                Selection::Field(field) => self
                    .map_field(field, object, index, strict)
                    .map(|f| MappedItem::Field(Arc::new(f))),
                Selection::FragmentSpread(spread) => self
                    .map_spread(spread, object, index, strict)
                    .map(MappedItem::FragmentSpread),
            };
            items.extend(mapped);
        }

        self.subsets
            .entry(SelectionSet::id(set))
            .or_default()
            .push(Arc::new(MappedSubSet {
                object_type: object_type.to_string(),
                items,
            }));
    }

    fn map_field(&mut self, field: &SelectionField, object: &ObjectDef, index: usize, strict: bool) -> Option<MappedField> {
        let directives = self.map_directives(&field.directives, DirectiveLocation::Field)?;

        if field.name == "__typename" {
            if field.selection_set.is_some() {
                self.bad_request(
                    "Field '__typename' may not have a selection subset.".to_string(),
                    field.location,
                );
                return None;
            }
            return Some(MappedField {
                selection: field.clone(),
                field_def: FieldDef::new("__typename", TypeRef::named("String").non_null()),
                owner_type: object.name.clone(),
                result_kind: TypeKind::Scalar,
                index,
                arguments: Vec::new(),
                directives,
                resolver: None,
            });
        }

        let Some(field_def) = object.fields.get(&field.name).filter(|f| !f.hidden) else {
            if strict {
                self.bad_request(
                    format!("Field '{}' not found on type '{}'.", field.name, object.name),
                    field.location,
                );
            }
            return None;
        };

        let result_type = field_def.ty.base_name();
        let result_kind = self.schema.get_type(result_type)?.kind();
        match (result_kind.is_composite(), &field.selection_set) {
            (true, None) => {
                self.bad_request(
                    format!("Field '{}' of type '{}' must have a selection subset.", field.name, field_def.ty),
                    field.location,
                );
                return None;
            }
            (false, Some(_)) => {
                self.bad_request(
                    format!("Field '{}' of type '{}' may not have a selection subset.", field.name, field_def.ty),
                    field.location,
                );
                return None;
            }
            _ => {}
        }

        let owner = format!("field '{}.{}'", object.name, field.name);
        let arguments = self.map_arguments(&field.arguments, &field_def.arguments, &owner, field.location)?;

        if let Some(set) = &field.selection_set {
            self.enqueue(set, result_type);
        }

        Some(MappedField {
            selection: field.clone(),
            field_def: field_def.clone(),
            owner_type: object.name.clone(),
            result_kind,
            index,
            arguments,
            directives,
            resolver: Some(self.schema.resolver(&object.name, &field.name)),
        })
    }

    fn map_arguments(
        &mut self,
        arguments: &[Argument],
        definitions: &IndexMap<String, InputFieldDef>,
        owner: &str,
        location: SourceLocation,
    ) -> Option<Vec<MappedArgument>> {
        let mut mapped = Vec::with_capacity(definitions.len());
        let mut ok = true;

        for argument in arguments {
            if !definitions.contains_key(&argument.name) {
                ok = false;
                self.argument_error(format!("Unknown argument '{}' on {owner}.", argument.name), location);
            }
        }

        for (name, def) in definitions {
            if self.halted {
                return None;
            }
            match arguments.iter().find(|a| a.name == *name) {
                Some(argument) => {
                    match self.coercer.coerce_literal(&def.ty, &argument.value, &self.operation.variables) {
                        Ok(value) => mapped.push(mapped_argument(name, value, def.default_value.clone())),
                        Err(message) => {
                            ok = false;
                            self.argument_error(
                                format!("Invalid value for argument '{name}' on {owner}: {message}."),
                                location,
                            );
                        }
                    }
                }
                None => match &def.default_value {
                    Some(default) => mapped.push(mapped_argument(
                        name,
                        ngql_core::InputValue::from_json(default),
                        None,
                    )),
                    None if def.ty.is_non_null() => {
                        ok = false;
                        self.argument_error(
                            format!("Missing required argument '{name}' of type '{}' on {owner}.", def.ty),
                            location,
                        );
                    }
                    None => {}
                },
            }
        }
        (ok && !self.halted).then_some(mapped)
    }

    fn argument_error(&mut self, message: String, location: SourceLocation) {
        self.error(GraphQLError::input_error(message).with_location(location));
        if self.fail_fast {
            self.halted = true;
        }
    }

    fn map_directives(&mut self, directives: &[Directive], location: DirectiveLocation) -> Option<Vec<MappedDirective>> {
        let mut mapped = Vec::with_capacity(directives.len());
        let mut ok = true;
        for directive in directives {
            let Some(handler) = self.schema.directive(&directive.name).cloned() else {
                ok = false;
                self.bad_request(format!("Directive '@{}' is not defined.", directive.name), directive.location);
                continue;
            };
            let definition = handler.definition();
            if !definition.allows(location) {
                ok = false;
                self.bad_request(
                    format!("Directive '@{}' may not be used on {location:?}.", directive.name),
                    directive.location,
                );
                continue;
            }
            let owner = format!("directive '@{}'", directive.name);
            match self.map_arguments(&directive.arguments, &definition.arguments, &owner, directive.location) {
                Some(arguments) => mapped.push(MappedDirective {
                    handler: Arc::clone(&handler),
                    arguments,
                    location: directive.location,
                }),
                None => ok = false,
            }
        }
        ok.then_some(mapped)
    }

    fn map_spread(
        &mut self,
        spread: &FragmentSpread,
        object: &ObjectDef,
        index: usize,
        strict: bool,
    ) -> Option<MappedFragmentSpread> {
        let location = if spread.is_inline() {
            DirectiveLocation::InlineFragment
        } else {
            DirectiveLocation::FragmentSpread
        };
        let directives = self.map_directives(&spread.directives, location)?;

        let (set, condition, label) = match (&spread.fragment_name, &spread.selection_set) {
            (Some(name), _) => {
                let Some(fragment) = self.document.fragment(name) else {
                    self.bad_request(format!("Fragment '{name}' is not defined."), spread.location);
                    return None;
                };
                (
                    Arc::clone(&fragment.selection_set),
                    Some(fragment.type_condition.clone()),
                    format!("Fragment '{name}'"),
                )
            }
            (None, Some(set)) => (Arc::clone(set), spread.type_condition.clone(), "Inline fragment".to_string()),
            (None, None) => return None,
        };

        let mut strict = strict;
        if let Some(condition) = &condition {
            let Some(condition_def) = self.schema.get_type(condition) else {
                self.bad_request(
                    format!("{label} has unknown type condition '{condition}'."),
                    spread.location,
                );
                return None;
            };
            let condition_kind = condition_def.kind();
            if !condition_kind.is_composite() {
                self.bad_request(
                    format!("{label} cannot condition on non-composite type '{condition}'."),
                    spread.location,
                );
                return None;
            }
            if condition != &object.name && !self.schema.is_possible_type(condition, &object.name) {
                return None;
            }
            if condition_kind == TypeKind::Interface {
                self.validate_abstract(&set, condition);
            }
            strict = condition_kind == TypeKind::Object;
        }

        if !self.has_subset(&set, &object.name) {
            let key = (SelectionSet::id(&set), object.name.clone());
            if !self.in_progress.insert(key.clone()) {
                self.bad_request(format!("{label} spreads itself."), spread.location);
                return None;
            }
            self.map_subset(&set, &object.name, strict);
            self.in_progress.remove(&key);
        }

        Some(MappedFragmentSpread {
            selection_set: set,
            directives,
            index,
            location: spread.location,
        })
    }

    /// A subscription selects exactly one root field, and its nested
    /// selection may not reference variables.
    fn validate_subscription(&mut self) {
        let items = &self.operation.selection_set.items;
        let root = match items.as_slice() {
            [Selection::Field(field)] => field,
            _ => {
                self.bad_request(
                    "Subscription operation must select exactly one root field.".to_string(),
                    self.operation.location,
                );
                return;
            }
        };
        if let Some(set) = &root.selection_set {
            let mut visited = FxHashSet::default();
            if self.uses_variables(set, &mut visited) {
                self.bad_request(
                    format!("Variables may not be used in the selection subset of subscription field '{}'.", root.name),
                    root.location,
                );
            }
        }
    }

    fn uses_variables(&self, set: &SelectionSet, visited: &mut FxHashSet<String>) -> bool {
        let in_directives =
            |directives: &[Directive]| directives.iter().flat_map(|d| &d.arguments).any(|a| a.value.contains_variables());
        set.items.iter().any(|item| match item {
            Selection::Field(field) => {
                in_directives(&field.directives)
                    || field.arguments.iter().any(|a| a.value.contains_variables())
                    || field
                        .selection_set
                        .as_ref()
                        .is_some_and(|inner| self.uses_variables(inner, visited))
            }
            Selection::FragmentSpread(spread) => {
                if in_directives(&spread.directives) {
                    return true;
                }
                match (&spread.fragment_name, &spread.selection_set) {
                    (Some(name), _) => {
                        visited.insert(name.clone())
                            && self
                                .document
                                .fragment(name)
                                .is_some_and(|f| self.uses_variables(&f.selection_set, visited))
                    }
                    (None, Some(inner)) => self.uses_variables(inner, visited),
                    (None, None) => false,
                }
            }
        })
    }
}
