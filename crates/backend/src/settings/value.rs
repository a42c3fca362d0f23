use serde::{Deserialize, Serialize};

/// A dynamically typed setting value.
///
/// `List` is the accepted input form for sequences; the store normalizes it to
/// `Tuple`, which has no mutating API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
  #[default]
  None,
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(String),
  Tuple(Box<[Value]>),
  List(Vec<Value>),
}

impl Value {
  pub fn is_none(&self) -> bool {
    matches!(self, Value::None)
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::Str(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Value::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn as_int(&self) -> Option<i64> {
    match self {
      Value::Int(i) => Some(*i),
      _ => None,
    }
  }

  /// Elements of a sequence value, in order.
  pub fn as_slice(&self) -> Option<&[Value]> {
    match self {
      Value::Tuple(items) => Some(items),
      Value::List(items) => Some(items),
      _ => None,
    }
  }

  /// Truthiness in the loose sense used by flag-like fields.
  pub fn is_truthy(&self) -> bool {
    match self {
      Value::None => false,
      Value::Bool(b) => *b,
      Value::Int(i) => *i != 0,
      Value::Float(f) => *f != 0.0,
      Value::Str(s) => !s.is_empty(),
      Value::Tuple(items) => !items.is_empty(),
      Value::List(items) => !items.is_empty(),
    }
  }

  /// Converts the input list form into the stored tuple form.
  pub(crate) fn normalize(self) -> Value {
    match self {
      Value::List(items) => Value::Tuple(items.into_iter().map(Value::normalize).collect()),
      other => other,
    }
  }

  /// Splits a comma separated string into a list.
  pub fn comma_list(raw: &str) -> Value {
    Value::List(raw.split(',').map(|s| Value::Str(s.to_string())).collect())
  }
}

impl std::fmt::Display for Value {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Value::None => f.write_str("None"),
      Value::Bool(b) => write!(f, "{b}"),
      Value::Int(i) => write!(f, "{i}"),
      Value::Float(x) => write!(f, "{x}"),
      Value::Str(s) => f.write_str(s),
      Value::Tuple(items) => write_seq(f, items),
      Value::List(items) => write_seq(f, items),
    }
  }
}

fn write_seq(f: &mut std::fmt::Formatter<'_>, items: &[Value]) -> std::fmt::Result {
  f.write_str("(")?;
  for (i, item) in items.iter().enumerate() {
    if i > 0 {
      f.write_str(", ")?;
    }
    write!(f, "{item}")?;
  }
  f.write_str(")")
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Value::Str(s.to_string())
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Value::Str(s)
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Value::Bool(b)
  }
}

impl From<i64> for Value {
  fn from(i: i64) -> Self {
    Value::Int(i)
  }
}

impl From<i32> for Value {
  fn from(i: i32) -> Self {
    Value::Int(i64::from(i))
  }
}

impl From<f64> for Value {
  fn from(x: f64) -> Self {
    Value::Float(x)
  }
}

impl From<Vec<&str>> for Value {
  fn from(items: Vec<&str>) -> Self {
    Value::List(items.into_iter().map(Value::from).collect())
  }
}

impl From<Vec<String>> for Value {
  fn from(items: Vec<String>) -> Self {
    Value::List(items.into_iter().map(Value::from).collect())
  }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(v: Option<T>) -> Self {
    v.map(Into::into).unwrap_or(Value::None)
  }
}
