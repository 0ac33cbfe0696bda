//! Typed argument values and the conversion from raw user text.
//!
//! Raw argument text is kept verbatim in the model; conversion happens once,
//! right before a generation request is built.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{RawArguments, VariableDescriptor};
use crate::error::{Error, Result};

/// Converted argument value. Serialized as the bare JSON value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(String),
  Json(Value),
}

pub type TypedArguments = BTreeMap<String, BTreeMap<String, ArgValue>>;

/// Convert one raw value according to its declared type.
///
/// `int` and `float` must parse; `bool` is true only for the literal `true`;
/// anything else is tried as JSON and falls back to the raw text.
pub fn convert_argument_value(ty: &str, raw: &str) -> Result<ArgValue> {
  match ty.trim() {
    "int" => raw
      .trim()
      .parse::<i64>()
      .map(ArgValue::Int)
      .map_err(|_| Error::validation(format!("'{raw}' is not a valid int"))),
    "float" => raw
      .trim()
      .parse::<f64>()
      .map(ArgValue::Float)
      .map_err(|_| Error::validation(format!("'{raw}' is not a valid float"))),
    "bool" => Ok(ArgValue::Bool(raw == "true")),
    _ => Ok(match serde_json::from_str::<Value>(raw) {
      Ok(Value::String(s)) => ArgValue::Str(s),
      Ok(v) => ArgValue::Json(v),
      Err(_) => ArgValue::Str(raw.to_string()),
    }),
  }
}

/// Convert every raw argument of every variable. Arguments that are not
/// declared on the variable (or its chosen subclass) go through the JSON path.
pub fn convert_arguments(
  variables: &[VariableDescriptor],
  subclasses: &BTreeMap<String, String>,
  raw: &RawArguments,
) -> Result<TypedArguments> {
  let mut out = TypedArguments::new();
  for (var_name, args) in raw {
    let var = variables.iter().find(|v| &v.name == var_name);
    let subclass = subclasses.get(var_name).map(String::as_str);
    let mut typed = BTreeMap::new();
    for (arg_name, value) in args {
      let ty = var
        .and_then(|v| v.argument_type(subclass, arg_name))
        .unwrap_or("");
      let converted = convert_argument_value(ty, value)
        .map_err(|e| Error::validation(format!("{var_name}.{arg_name}: {e}")))?;
      typed.insert(arg_name.clone(), converted);
    }
    out.insert(var_name.clone(), typed);
  }
  Ok(out)
}

/// Text form of a generated value, as it would have been typed by hand.
pub fn render_raw(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{ArgumentDecl, SubclassDecl};
  use serde_json::json;

  #[test]
  fn converts_declared_scalar_types() {
    assert_eq!(convert_argument_value("int", "42").unwrap(), ArgValue::Int(42));
    assert_eq!(convert_argument_value("float", "2.5").unwrap(), ArgValue::Float(2.5));
    assert_eq!(convert_argument_value("bool", "true").unwrap(), ArgValue::Bool(true));
    assert_eq!(convert_argument_value("bool", "false").unwrap(), ArgValue::Bool(false));
    assert_eq!(convert_argument_value("bool", "TRUE").unwrap(), ArgValue::Bool(false));
  }

  #[test]
  fn other_types_parse_json_or_keep_text() {
    assert_eq!(convert_argument_value("other", "\"x\"").unwrap(), ArgValue::Str("x".into()));
    assert_eq!(
      convert_argument_value("other", "not-json").unwrap(),
      ArgValue::Str("not-json".into())
    );
    assert_eq!(
      convert_argument_value("list", "[1, 2]").unwrap(),
      ArgValue::Json(json!([1, 2]))
    );
  }

  #[test]
  fn malformed_numbers_are_validation_errors() {
    assert!(matches!(convert_argument_value("int", "4x"), Err(Error::Validation(_))));
    assert!(matches!(convert_argument_value("float", ""), Err(Error::Validation(_))));
  }

  #[test]
  fn typed_values_serialize_as_plain_json() {
    let v = serde_json::to_value(vec![
      ArgValue::Int(1),
      ArgValue::Bool(true),
      ArgValue::Str("a".into()),
      ArgValue::Json(json!({"k": 1})),
    ])
    .unwrap();
    assert_eq!(v, json!([1, true, "a", {"k": 1}]));
  }

  #[test]
  fn converts_using_subclass_declarations() {
    let vars = vec![VariableDescriptor {
      name: "g".into(),
      ty: "Graph".into(),
      arguments: vec![],
      subclasses: vec![SubclassDecl {
        name: "Tree".into(),
        arguments: vec![ArgumentDecl { name: "depth".into(), ty: "int".into() }],
      }],
    }];
    let subclasses = BTreeMap::from([("g".to_string(), "Tree".to_string())]);
    let raw = RawArguments::from([(
      "g".to_string(),
      BTreeMap::from([("depth".to_string(), "3".to_string())]),
    )]);

    let typed = convert_arguments(&vars, &subclasses, &raw).unwrap();
    assert_eq!(typed["g"]["depth"], ArgValue::Int(3));
  }

  #[test]
  fn conversion_error_names_the_argument() {
    let vars = vec![VariableDescriptor {
      name: "n".into(),
      ty: "Number".into(),
      arguments: vec![ArgumentDecl { name: "value".into(), ty: "int".into() }],
      subclasses: vec![],
    }];
    let raw = RawArguments::from([(
      "n".to_string(),
      BTreeMap::from([("value".to_string(), "ten".to_string())]),
    )]);
    let err = convert_arguments(&vars, &BTreeMap::new(), &raw).unwrap_err();
    assert!(err.to_string().contains("n.value"));
  }
}
