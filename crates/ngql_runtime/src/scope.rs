//! Output scopes.
//!
//! Each output object produced while executing one operation field gets a
//! scope in an [`OutputTree`]. Scopes know their parent and the path
//! segments leading to them, so error paths are computed on demand.

use crate::resolver::Entity;
use indexmap::IndexMap;
use ngql_core::{PathSegment, ResponsePath};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

/// A completed value in the output tree.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputValue {
    Null,
    Scalar(Value),
    Object(ScopeId),
    List(Vec<OutputValue>),
}

/// One output object under construction.
pub struct OutputScope {
    pub parent: Option<ScopeId>,
    /// Segments from the parent scope to this one: a key plus list indices.
    pub segments: Vec<PathSegment>,
    pub entity: Option<Entity>,
    pub type_name: String,
    values: IndexMap<String, OutputValue>,
    pruned: bool,
}

impl OutputScope {
    pub fn get(&self, key: &str) -> Option<&OutputValue> {
        self.values.get(key)
    }

    /// Stores a value under `key`. The first value written for a key wins.
    pub fn set_value(&mut self, key: &str, value: OutputValue) -> bool {
        if self.values.contains_key(key) {
            return false;
        }
        self.values.insert(key.to_string(), value);
        true
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_pruned(&self) -> bool {
        self.pruned
    }
}

impl fmt::Debug for OutputScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputScope")
            .field("parent", &self.parent)
            .field("type_name", &self.type_name)
            .field("values", &self.values)
            .field("pruned", &self.pruned)
            .finish_non_exhaustive()
    }
}

/// Arena of output scopes for one operation field.
#[derive(Debug, Default)]
pub struct OutputTree {
    scopes: Vec<OutputScope>,
}

impl OutputTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a scope with no parent.
    pub fn add_root(&mut self, type_name: impl Into<String>) -> ScopeId {
        self.push(OutputScope {
            parent: None,
            segments: Vec::new(),
            entity: None,
            type_name: type_name.into(),
            values: IndexMap::new(),
            pruned: false,
        })
    }

    pub fn add(&mut self, parent: ScopeId, segments: Vec<PathSegment>, entity: Entity) -> ScopeId {
        let type_name = entity.type_name().to_string();
        self.push(OutputScope {
            parent: Some(parent),
            segments,
            entity: Some(entity),
            type_name,
            values: IndexMap::new(),
            pruned: false,
        })
    }

    fn push(&mut self, scope: OutputScope) -> ScopeId {
        self.scopes.push(scope);
        ScopeId(self.scopes.len() - 1)
    }

    pub fn scope(&self, id: ScopeId) -> &OutputScope {
        &self.scopes[id.0]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut OutputScope {
        &mut self.scopes[id.0]
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Marks a scope whose fields will never be filled; it renders as null.
    pub fn prune(&mut self, id: ScopeId) {
        self.scopes[id.0].pruned = true;
    }

    /// Response path from the root to `id`.
    pub fn path_of(&self, id: ScopeId) -> ResponsePath {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(id) = current {
            let scope = self.scope(id);
            chain.push(&scope.segments);
            current = scope.parent;
        }
        chain.into_iter().rev().flatten().cloned().collect()
    }

    pub fn render(&self, value: &OutputValue) -> Value {
        match value {
            OutputValue::Null => Value::Null,
            OutputValue::Scalar(v) => v.clone(),
            OutputValue::Object(id) => self.render_scope(*id),
            OutputValue::List(items) => Value::Array(items.iter().map(|item| self.render(item)).collect()),
        }
    }

    pub fn render_scope(&self, id: ScopeId) -> Value {
        let scope = self.scope(id);
        if scope.pruned {
            return Value::Null;
        }
        let map: Map<String, Value> = scope
            .values
            .iter()
            .map(|(key, value)| (key.clone(), self.render(value)))
            .collect();
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::GraphQLObject;
    use serde_json::json;
    use std::sync::Arc;

    struct Item;

    impl GraphQLObject for Item {
        fn type_name(&self) -> &str {
            "Item"
        }
    }

    #[test]
    fn test_paths_and_rendering() {
        let mut tree = OutputTree::new();
        let root = tree.add_root("Query");
        let first = tree.add(root, vec!["items".into(), 0usize.into()], Arc::new(Item));
        let second = tree.add(root, vec!["items".into(), 1usize.into()], Arc::new(Item));
        let nested = tree.add(second, vec!["child".into()], Arc::new(Item));

        assert_eq!(tree.scope(first).type_name, "Item");
        assert_eq!(
            tree.path_of(nested),
            vec![PathSegment::from("items"), PathSegment::from(1usize), PathSegment::from("child")]
        );

        tree.scope_mut(first).set_value("name", OutputValue::Scalar(json!("a")));
        tree.scope_mut(second).set_value("name", OutputValue::Scalar(json!("b")));
        tree.scope_mut(second).set_value("child", OutputValue::Object(nested));
        tree.scope_mut(root).set_value(
            "items",
            OutputValue::List(vec![OutputValue::Object(first), OutputValue::Object(second)]),
        );
        tree.prune(nested);

        assert_eq!(
            tree.render_scope(root),
            json!({"items": [{"name": "a"}, {"name": "b", "child": null}]})
        );
    }

    #[test]
    fn test_first_value_wins() {
        let mut tree = OutputTree::new();
        let root = tree.add_root("Query");
        assert!(tree.scope_mut(root).set_value("a", OutputValue::Scalar(json!(1))));
        assert!(!tree.scope_mut(root).set_value("a", OutputValue::Scalar(json!(2))));
        assert_eq!(tree.scope(root).get("a"), Some(&OutputValue::Scalar(json!(1))));
        assert_eq!(tree.scope(root).keys().collect::<Vec<_>>(), ["a"]);
    }
}
