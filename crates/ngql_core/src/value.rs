//! Input values as they appear in a parsed request.

use indexmap::IndexMap;
use std::fmt;

/// A literal argument value, possibly referencing request variables.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Null,
    Boolean(bool),
    Int(i64),
    Float(f64),
    String(String),
    Enum(String),
    List(Vec<InputValue>),
    Object(IndexMap<String, InputValue>),
    /// `$name`
    Variable(String),
}

impl InputValue {
    pub fn enum_value(name: impl Into<String>) -> Self {
        Self::Enum(name.into())
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    pub fn object<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, InputValue)>,
    {
        Self::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Converts a JSON value. Strings stay strings; enum coercion happens
    /// later against the declared type.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            serde_json::Value::Object(fields) => Self::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns true if this value or any nested value is a variable reference.
    pub fn contains_variables(&self) -> bool {
        match self {
            Self::Variable(_) => true,
            Self::List(items) => items.iter().any(Self::contains_variables),
            Self::Object(fields) => fields.values().any(Self::contains_variables),
            _ => false,
        }
    }

    /// Names of all variables referenced by this value.
    pub fn variable_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Variable(name) => out.push(name),
            Self::List(items) => items.iter().for_each(|v| v.collect_variables(out)),
            Self::Object(fields) => fields.values().for_each(|v| v.collect_variables(out)),
            _ => {}
        }
    }
}

impl From<bool> for InputValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i32> for InputValue {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<i64> for InputValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for InputValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for InputValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for InputValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl<T: Into<InputValue>> From<Vec<T>> for InputValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

/// Renders the value in request syntax, for error messages.
impl fmt::Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Enum(name) => f.write_str(name),
            Self::Variable(name) => write!(f, "${name}"),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Object(fields) => {
                f.write_str("{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json() {
        let json = serde_json::json!({"a": [1, 2.5, "x"], "b": null, "c": true});
        let value = InputValue::from_json(&json);
        assert_eq!(
            value,
            InputValue::object([
                (
                    "a",
                    InputValue::List(vec![
                        InputValue::Int(1),
                        InputValue::Float(2.5),
                        InputValue::from("x"),
                    ])
                ),
                ("b", InputValue::Null),
                ("c", InputValue::Boolean(true)),
            ])
        );
    }

    #[test]
    fn test_variables() {
        let value = InputValue::object([
            ("id", InputValue::variable("thingId")),
            ("tags", InputValue::List(vec![InputValue::variable("tag"), "x".into()])),
        ]);
        assert!(value.contains_variables());
        assert_eq!(value.variable_names(), vec!["thingId", "tag"]);
        assert!(!InputValue::from(3).contains_variables());
    }

    #[test]
    fn test_display() {
        let value = InputValue::object([
            ("kind", InputValue::enum_value("KIND_ONE")),
            ("name", "x".into()),
            ("ids", vec![1, 2].into()),
        ]);
        assert_eq!(value.to_string(), r#"{kind: KIND_ONE, name: "x", ids: [1, 2]}"#);
    }
}
