//! Input coercion.
//!
//! Argument literals are checked against their declared types while the
//! request is mapped; variable values are coerced once at request start;
//! argument values referencing variables are evaluated when the field runs.

use crate::config::ServerOptions;
use crate::request::{VariableDef, Variables};
use crate::resolver::ResolverArgs;
use crate::schema::{Schema, TypeDef, TypeRef};
use indexmap::IndexMap;
use ngql_core::{GraphQLError, InputValue};
use serde_json::Value;

/// A mapped argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentValue {
    /// Fully known at mapping time.
    Const(Value),
    /// References request variables; evaluated per request.
    Dynamic(InputValue),
}

/// An argument bound to its definition.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedArgument {
    pub name: String,
    pub value: ArgumentValue,
    /// Declared default, used when a referenced variable is absent.
    pub default: Option<Value>,
}

enum Source<'a> {
    /// A literal in the request text; variables are checked against their definitions.
    Literal(&'a [VariableDef]),
    /// A JSON variable value; enum values arrive as strings.
    Variables,
}

/// Coerces input values against schema types.
pub(crate) struct InputCoercer<'a> {
    schema: &'a Schema,
    options: ServerOptions,
}

impl<'a> InputCoercer<'a> {
    pub(crate) fn new(schema: &'a Schema, options: ServerOptions) -> Self {
        Self { schema, options }
    }

    /// Checks a literal against `ty`, returning it normalized
    /// (Int widened to Float, Int IDs as strings, defaults filled in).
    pub(crate) fn coerce_literal(
        &self,
        ty: &TypeRef,
        value: &InputValue,
        variables: &[VariableDef],
    ) -> Result<InputValue, String> {
        self.coerce(ty, value, &Source::Literal(variables))
    }

    /// Coerces a JSON variable value against its declared type.
    pub(crate) fn coerce_variable(&self, ty: &TypeRef, value: &Value) -> Result<Value, String> {
        let coerced = self.coerce(ty, &InputValue::from_json(value), &Source::Variables)?;
        Ok(evaluate(&coerced, None).unwrap_or(Value::Null))
    }

    /// Coerces the raw variable values of an operation.
    pub(crate) fn coerce_variables(
        &self,
        definitions: &[VariableDef],
        raw: &IndexMap<String, Value>,
    ) -> Result<Variables, Vec<GraphQLError>> {
        let mut variables = Variables::new();
        let mut errors = Vec::new();
        for def in definitions {
            let result = match (raw.get(&def.name), &def.default_value) {
                (Some(value), _) => self.coerce_variable(&def.ty, value).map(Some),
                (None, Some(default)) => self
                    .coerce_literal(&def.ty, default, &[])
                    .map(|v| evaluate(&v, None)),
                (None, None) if def.ty.is_non_null() => Err(format!(
                    "value of required type '{}' was not provided",
                    def.ty
                )),
                (None, None) => Ok(None),
            };
            match result {
                Ok(Some(value)) => {
                    variables.insert(def.name.clone(), value);
                }
                Ok(None) => {}
                Err(message) => errors.push(
                    GraphQLError::input_error(format!("Variable ${}: {message}.", def.name))
                        .with_location(def.location),
                ),
            }
        }
        if errors.is_empty() {
            Ok(variables)
        } else {
            Err(errors)
        }
    }

    fn coerce(&self, ty: &TypeRef, value: &InputValue, source: &Source<'_>) -> Result<InputValue, String> {
        if let InputValue::Variable(name) = value {
            return match source {
                Source::Literal(definitions) => {
                    let def = definitions
                        .iter()
                        .find(|d| d.name == *name)
                        .ok_or_else(|| format!("variable ${name} is not defined"))?;
                    check_variable_usage(def, ty)?;
                    Ok(value.clone())
                }
                Source::Variables => Err(format!("unexpected variable reference ${name}")),
            };
        }

        match ty {
            TypeRef::NonNull(inner) => {
                if value.is_null() {
                    return Err(format!("expected non-null value of type '{ty}', found null"));
                }
                self.coerce(inner, value, source)
            }
            TypeRef::List(inner) => match value {
                InputValue::Null => Ok(InputValue::Null),
                InputValue::List(items) => items
                    .iter()
                    .map(|item| self.coerce(inner, item, source))
                    .collect::<Result<Vec<_>, _>>()
                    .map(InputValue::List),
                single => Ok(InputValue::List(vec![self.coerce(inner, single, source)?])),
            },
            TypeRef::Named(name) => {
                if value.is_null() {
                    return Ok(InputValue::Null);
                }
                match self.schema.get_type(name) {
                    Some(TypeDef::Scalar(_)) => coerce_scalar(name, value),
                    Some(TypeDef::Enum(def)) => {
                        let enum_value = match (value, source) {
                            (InputValue::Enum(v), _) | (InputValue::String(v), Source::Variables) => v,
                            _ => return Err(format!("expected value of enum '{name}', found {value}")),
                        };
                        if def.has_value(enum_value) {
                            Ok(InputValue::Enum(enum_value.clone()))
                        } else {
                            Err(format!("'{enum_value}' is not a value of enum '{name}'"))
                        }
                    }
                    Some(TypeDef::InputObject(def)) => {
                        let InputValue::Object(fields) = value else {
                            return Err(format!("expected input object '{name}', found {value}"));
                        };
                        let mut out = IndexMap::new();
                        for (key, field_value) in fields {
                            match def.fields.get(key) {
                                Some(field_def) => {
                                    let coerced = self
                                        .coerce(&field_def.ty, field_value, source)
                                        .map_err(|e| format!("field '{name}.{key}': {e}"))?;
                                    out.insert(key.clone(), coerced);
                                }
                                None if self
                                    .options
                                    .contains(ServerOptions::IGNORE_UNKNOWN_INPUT_FIELDS) => {}
                                None => {
                                    return Err(format!(
                                        "field '{key}' is not defined on input type '{name}'"
                                    ))
                                }
                            }
                        }
                        for (key, field_def) in &def.fields {
                            if out.contains_key(key) {
                                continue;
                            }
                            if let Some(default) = &field_def.default_value {
                                out.insert(key.clone(), InputValue::from_json(default));
                            } else if field_def.ty.is_non_null() {
                                return Err(format!(
                                    "missing required field '{key}' of input type '{name}'"
                                ));
                            }
                        }
                        Ok(InputValue::Object(out))
                    }
                    Some(other) => Err(format!("type '{}' is not an input type", other.name())),
                    None => Err(format!("unknown type '{name}'")),
                }
            }
        }
    }
}

fn coerce_scalar(name: &str, value: &InputValue) -> Result<InputValue, String> {
    let mismatch = || Err(format!("expected value of type '{name}', found {value}"));
    match (name, value) {
        ("Int", InputValue::Int(i)) => {
            if i32::try_from(*i).is_ok() {
                Ok(value.clone())
            } else {
                Err(format!("value {i} is out of range for type 'Int'"))
            }
        }
        #[allow(clippy::cast_precision_loss)]
        ("Float", InputValue::Int(i)) => Ok(InputValue::Float(*i as f64)),
        ("Float", InputValue::Float(_))
        | ("String", InputValue::String(_))
        | ("Boolean", InputValue::Boolean(_))
        | ("ID", InputValue::String(_)) => Ok(value.clone()),
        ("ID", InputValue::Int(i)) => Ok(InputValue::String(i.to_string())),
        ("Int" | "Float" | "String" | "Boolean" | "ID", _) => mismatch(),
        (_, InputValue::Enum(_)) => mismatch(),
        // Custom scalars take any literal.
        _ => Ok(value.clone()),
    }
}

/// A variable may be used where its type fits the expected type: same
/// base type (Int also fits Float) and list shape; a nullable variable
/// without default does not fit a non-null position.
fn check_variable_usage(def: &VariableDef, expected: &TypeRef) -> Result<(), String> {
    let nullable_into_non_null =
        expected.is_non_null() && !def.ty.is_non_null() && def.default_value.is_none();
    if nullable_into_non_null || !types_compatible(def.ty.nullable(), expected.nullable()) {
        return Err(format!(
            "variable ${} of type '{}' cannot be used where '{}' is expected",
            def.name, def.ty, expected
        ));
    }
    Ok(())
}

fn types_compatible(variable: &TypeRef, expected: &TypeRef) -> bool {
    match (variable, expected) {
        (TypeRef::List(v), TypeRef::List(e)) => {
            (v.is_non_null() || !e.is_non_null()) && types_compatible(v.nullable(), e.nullable())
        }
        (TypeRef::Named(v), TypeRef::Named(e)) => v == e || (v == "Int" && e == "Float"),
        _ => false,
    }
}

/// Converts a normalized value to JSON, substituting variables. Returns
/// `None` for a variable that has no value.
pub(crate) fn evaluate(value: &InputValue, variables: Option<&Variables>) -> Option<Value> {
    Some(match value {
        InputValue::Variable(name) => return variables.and_then(|vars| vars.get(name)).cloned(),
        InputValue::Null => Value::Null,
        InputValue::Boolean(b) => Value::Bool(*b),
        InputValue::Int(i) => Value::from(*i),
        InputValue::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
        InputValue::String(s) | InputValue::Enum(s) => Value::String(s.clone()),
        InputValue::List(items) => Value::Array(
            items
                .iter()
                .map(|item| evaluate(item, variables).unwrap_or(Value::Null))
                .collect(),
        ),
        InputValue::Object(fields) => Value::Object(
            fields
                .iter()
                .filter_map(|(k, v)| evaluate(v, variables).map(|v| (k.clone(), v)))
                .collect(),
        ),
    })
}

/// Builds a mapped argument from a normalized value.
pub(crate) fn mapped_argument(name: &str, value: InputValue, default: Option<Value>) -> MappedArgument {
    let value = if value.contains_variables() {
        ArgumentValue::Dynamic(value)
    } else {
        ArgumentValue::Const(evaluate(&value, None).unwrap_or(Value::Null))
    };
    MappedArgument {
        name: name.to_string(),
        value,
        default,
    }
}

/// Evaluates mapped arguments for one request.
pub(crate) fn evaluate_arguments(arguments: &[MappedArgument], variables: &Variables) -> ResolverArgs {
    let mut args = ResolverArgs::new();
    for arg in arguments {
        let value = match &arg.value {
            ArgumentValue::Const(value) => Some(value.clone()),
            ArgumentValue::Dynamic(value) => {
                evaluate(value, Some(variables)).or_else(|| arg.default.clone())
            }
        };
        if let Some(value) = value {
            args.set(arg.name.clone(), value);
        }
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EnumDef, FieldDef, InputFieldDef, InputObjectDef, ObjectDef, SchemaBuilder};
    use serde_json::json;

    fn schema() -> Schema {
        SchemaBuilder::new()
            .query_type("Query")
            .add_type(EnumDef::new("Kind", ["KIND_ONE", "KIND_TWO"]))
            .add_type(
                InputObjectDef::new("Filter")
                    .field(InputFieldDef::new("name", TypeRef::named("String").non_null()))
                    .field(
                        InputFieldDef::new("limit", TypeRef::named("Int"))
                            .with_default(json!(10)),
                    ),
            )
            .add_type(ObjectDef::new("Query").field(FieldDef::new("ok", TypeRef::named("Boolean"))))
            .build()
            .unwrap()
    }

    fn coercer(schema: &Schema) -> InputCoercer<'_> {
        InputCoercer::new(schema, ServerOptions::default())
    }

    #[test]
    fn test_scalar_literals() {
        let schema = schema();
        let c = coercer(&schema);
        let float = TypeRef::named("Float");

        assert_eq!(c.coerce_literal(&float, &InputValue::Int(1), &[]), Ok(InputValue::Float(1.0)));
        assert_eq!(
            c.coerce_literal(&TypeRef::named("ID"), &InputValue::Int(7), &[]),
            Ok(InputValue::from("7"))
        );
        assert!(c
            .coerce_literal(&TypeRef::named("Int"), &InputValue::from("x"), &[])
            .is_err());
        assert!(c
            .coerce_literal(&TypeRef::named("Int"), &InputValue::Int(i64::MAX), &[])
            .unwrap_err()
            .contains("out of range"));
        assert_eq!(
            c.coerce_literal(&TypeRef::named("Int").non_null(), &InputValue::Null, &[]),
            Err("expected non-null value of type 'Int!', found null".to_string())
        );
    }

    #[test]
    fn test_enum_literal_and_variable() {
        let schema = schema();
        let c = coercer(&schema);
        let kind = TypeRef::named("Kind");

        assert!(c.coerce_literal(&kind, &InputValue::enum_value("KIND_ONE"), &[]).is_ok());
        assert!(c.coerce_literal(&kind, &InputValue::from("KIND_ONE"), &[]).is_err());
        assert!(c.coerce_literal(&kind, &InputValue::enum_value("KIND_NINE"), &[]).is_err());
        assert_eq!(c.coerce_variable(&kind, &json!("KIND_TWO")), Ok(json!("KIND_TWO")));
    }

    #[test]
    fn test_list_wrapping() {
        let schema = schema();
        let c = coercer(&schema);
        let ty = TypeRef::named("Int").non_null().list();
        assert_eq!(c.coerce_variable(&ty, &json!(3)), Ok(json!([3])));
        assert_eq!(c.coerce_variable(&ty, &json!([1, 2])), Ok(json!([1, 2])));
        assert!(c.coerce_variable(&ty, &json!([1, null])).is_err());
    }

    #[test]
    fn test_input_object_fields() {
        let schema = schema();
        let filter = TypeRef::named("Filter");

        let strict = coercer(&schema);
        assert_eq!(
            strict.coerce_variable(&filter, &json!({"name": "a"})),
            Ok(json!({"name": "a", "limit": 10}))
        );
        assert!(strict.coerce_variable(&filter, &json!({"limit": 1})).is_err());
        assert_eq!(
            strict.coerce_variable(&filter, &json!({"name": "a", "color": "red"})),
            Err("field 'color' is not defined on input type 'Filter'".to_string())
        );

        let lenient = InputCoercer::new(&schema, ServerOptions::IGNORE_UNKNOWN_INPUT_FIELDS);
        assert_eq!(
            lenient.coerce_variable(&filter, &json!({"name": "a", "color": "red"})),
            Ok(json!({"name": "a", "limit": 10}))
        );
    }

    #[test]
    fn test_variable_usage() {
        let schema = schema();
        let c = coercer(&schema);
        let defs = [
            VariableDef::new("n", TypeRef::named("Int")),
            VariableDef::new("req", TypeRef::named("Int").non_null()),
            VariableDef::new("withDefault", TypeRef::named("Int")).with_default(3),
        ];
        let non_null_float = TypeRef::named("Float").non_null();

        assert!(c
            .coerce_literal(&non_null_float, &InputValue::variable("req"), &defs)
            .is_ok());
        assert!(c
            .coerce_literal(&non_null_float, &InputValue::variable("withDefault"), &defs)
            .is_ok());
        assert!(c
            .coerce_literal(&non_null_float, &InputValue::variable("n"), &defs)
            .unwrap_err()
            .contains("cannot be used"));
        assert!(c
            .coerce_literal(&TypeRef::named("String"), &InputValue::variable("n"), &defs)
            .is_err());
        assert_eq!(
            c.coerce_literal(&TypeRef::named("Int"), &InputValue::variable("missing"), &defs),
            Err("variable $missing is not defined".to_string())
        );
    }

    #[test]
    fn test_coerce_variables() {
        let schema = schema();
        let c = coercer(&schema);
        let defs = [
            VariableDef::new("id", TypeRef::named("Int").non_null()),
            VariableDef::new("kind", TypeRef::named("Kind")).with_default(InputValue::enum_value("KIND_ONE")),
            VariableDef::new("name", TypeRef::named("String")),
        ];

        let mut raw = IndexMap::new();
        raw.insert("id".to_string(), json!(5));
        let vars = c.coerce_variables(&defs, &raw).unwrap();
        assert_eq!(vars.get("id"), Some(&json!(5)));
        assert_eq!(vars.get("kind"), Some(&json!("KIND_ONE")));
        assert!(!vars.contains_key("name"));

        let errors = c.coerce_variables(&defs, &IndexMap::new()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.starts_with("Variable $id:"));
    }

    #[test]
    fn test_evaluate_arguments() {
        let mut vars = Variables::new();
        vars.insert("id".to_string(), json!(4));

        let args = [
            mapped_argument("a", InputValue::Int(1), None),
            mapped_argument("b", InputValue::variable("id"), None),
            mapped_argument("c", InputValue::variable("absent"), Some(json!("dflt"))),
            mapped_argument("d", InputValue::variable("absent"), None),
            mapped_argument(
                "e",
                InputValue::object([("x", InputValue::variable("id")), ("y", InputValue::variable("absent"))]),
                None,
            ),
        ];
        assert_eq!(args[0].value, ArgumentValue::Const(json!(1)));

        let resolved = evaluate_arguments(&args, &vars);
        assert_eq!(resolved.get("a"), Some(&json!(1)));
        assert_eq!(resolved.get("b"), Some(&json!(4)));
        assert_eq!(resolved.get("c"), Some(&json!("dflt")));
        assert_eq!(resolved.get("d"), None);
        assert_eq!(resolved.get("e"), Some(&json!({"x": 4})));
    }
}
