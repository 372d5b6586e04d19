//! Path-tracking JSON decoder used by every GQL response parser and every
//! PubSub message parser. Never let a raw `serde_json::Value` escape past
//! the boundary this module defines — decode it into a concrete type here.

use serde_json::Value;
use std::fmt;

/// One segment of the path leading to a decode failure, closest-to-root
/// first once rendered (errors are built leaf-to-root and reversed on
/// display, see [`DecodeError::path_string`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => write!(f, ".{k}"),
            PathSegment::Index(i) => write!(f, "[{i}]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("{}: expected {expected}, got {actual}", render_path(path))]
    WrongType {
        path: Vec<PathSegment>,
        expected: &'static str,
        actual: String,
    },
    #[error("{}: missing property", render_path(path))]
    NonExistentProperty { path: Vec<PathSegment> },
    #[error("{}: no variant matched: [{}]", render_path(path), errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Union {
        path: Vec<PathSegment>,
        errors: Vec<DecodeError>,
    },
}

fn render_path(path: &[PathSegment]) -> String {
    if path.is_empty() {
        return "$".to_owned();
    }
    path.iter().rev().map(|s| s.to_string()).collect::<String>()
}

impl DecodeError {
    /// Root-to-leaf rendering of where the error occurred, e.g. `"foo"."bar"[3]`.
    pub fn path_string(&self) -> String {
        match self {
            DecodeError::WrongType { path, .. }
            | DecodeError::NonExistentProperty { path }
            | DecodeError::Union { path, .. } => render_path(path),
        }
    }

    fn prepend(self, segment: PathSegment) -> Self {
        match self {
            DecodeError::WrongType {
                mut path,
                expected,
                actual,
            } => {
                path.push(segment);
                DecodeError::WrongType {
                    path,
                    expected,
                    actual,
                }
            }
            DecodeError::NonExistentProperty { mut path } => {
                path.push(segment);
                DecodeError::NonExistentProperty { path }
            }
            DecodeError::Union { mut path, errors } => {
                path.push(segment);
                DecodeError::Union { path, errors }
            }
        }
    }
}

fn type_name(v: &Value) -> String {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
    .to_owned()
}

fn wrong_type(expected: &'static str, actual: &Value) -> DecodeError {
    DecodeError::WrongType {
        path: Vec::new(),
        expected,
        actual: type_name(actual),
    }
}

/// Validated, structural primitives. Note: a JSON bool is never coerced
/// into an integer, even though `serde_json::Number` would technically
/// allow it via `as_i64` on some implementations.
pub fn decode_i64(v: &Value) -> Result<i64, DecodeError> {
    if v.is_boolean() {
        return Err(wrong_type("integer", v));
    }
    v.as_i64().ok_or_else(|| wrong_type("integer", v))
}

pub fn decode_u64(v: &Value) -> Result<u64, DecodeError> {
    if v.is_boolean() {
        return Err(wrong_type("unsigned integer", v));
    }
    v.as_u64().ok_or_else(|| wrong_type("unsigned integer", v))
}

pub fn decode_f64(v: &Value) -> Result<f64, DecodeError> {
    if v.is_boolean() {
        return Err(wrong_type("float", v));
    }
    v.as_f64().ok_or_else(|| wrong_type("float", v))
}

pub fn decode_str(v: &Value) -> Result<&str, DecodeError> {
    v.as_str().ok_or_else(|| wrong_type("string", v))
}

pub fn decode_bool(v: &Value) -> Result<bool, DecodeError> {
    v.as_bool().ok_or_else(|| wrong_type("bool", v))
}

pub fn decode_null(v: &Value) -> Result<(), DecodeError> {
    if v.is_null() {
        Ok(())
    } else {
        Err(wrong_type("null", v))
    }
}

pub fn decode_array(v: &Value) -> Result<&Vec<Value>, DecodeError> {
    v.as_array().ok_or_else(|| wrong_type("array", v))
}

pub fn decode_object(v: &Value) -> Result<&serde_json::Map<String, Value>, DecodeError> {
    v.as_object().ok_or_else(|| wrong_type("object", v))
}

/// `decode_property(container, key, f)` — look up `key`, failing with
/// [`DecodeError::NonExistentProperty`] if absent, then run `f` on the
/// value, attaching `key` to the error path on failure.
pub fn decode_property<T>(
    container: &Value,
    key: &str,
    f: impl FnOnce(&Value) -> Result<T, DecodeError>,
) -> Result<T, DecodeError> {
    let obj = decode_object(container)?;
    let value = obj
        .get(key)
        .ok_or_else(|| DecodeError::NonExistentProperty { path: Vec::new() })
        .map_err(|e| e.prepend(PathSegment::Key(key.to_owned())))?;
    f(value).map_err(|e| e.prepend(PathSegment::Key(key.to_owned())))
}

/// A present-but-invalid value is still an error; a missing key yields
/// `None` rather than failing.
pub fn decode_optional_property<T>(
    container: &Value,
    key: &str,
    f: impl FnOnce(&Value) -> Result<T, DecodeError>,
) -> Result<Option<T>, DecodeError> {
    let obj = decode_object(container)?;
    match obj.get(key) {
        None => Ok(None),
        Some(value) => f(value)
            .map(Some)
            .map_err(|e| e.prepend(PathSegment::Key(key.to_owned()))),
    }
}

pub fn decode_list<T>(
    v: &Value,
    f: impl Fn(&Value) -> Result<T, DecodeError>,
) -> Result<Vec<T>, DecodeError> {
    let arr = decode_array(v)?;
    arr.iter()
        .enumerate()
        .map(|(idx, item)| f(item).map_err(|e| e.prepend(PathSegment::Index(idx))))
        .collect()
}

/// Try each decoder in order; if all fail, bundle every inner error into
/// a [`DecodeError::Union`].
pub fn decode_union<T>(
    v: &Value,
    decoders: &[&dyn Fn(&Value) -> Result<T, DecodeError>],
) -> Result<T, DecodeError> {
    let mut errors = Vec::new();
    for decoder in decoders {
        match decoder(v) {
            Ok(t) => return Ok(t),
            Err(e) => errors.push(e),
        }
    }
    Err(DecodeError::Union {
        path: Vec::new(),
        errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bool_is_not_an_integer() {
        let v = json!(true);
        assert!(decode_i64(&v).is_err());
        assert!(decode_u64(&v).is_err());
    }

    #[test]
    fn missing_property_path_points_to_key() {
        let v = json!({"foo": {}});
        let err = decode_property(&v, "foo", |inner| decode_property(inner, "bar", decode_str));
        let err = err.unwrap_err();
        assert_eq!(err.path_string(), ".foo.bar");
    }

    #[test]
    fn malformed_nested_value_path_is_root_to_leaf() {
        let v = json!({"foo": {"bar": [1, 2, "oops"]}});
        let err = decode_property(&v, "foo", |inner| {
            decode_property(inner, "bar", |arr| decode_list(arr, decode_i64))
        });
        let err = err.unwrap_err();
        assert_eq!(err.path_string(), ".foo.bar[2]");
    }

    #[test]
    fn well_formed_input_round_trips() {
        let v = json!({"a": 1, "b": [true, false]});
        let a = decode_property(&v, "a", decode_i64).unwrap();
        let b = decode_property(&v, "b", |x| decode_list(x, decode_bool)).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, vec![true, false]);
    }

    #[test]
    fn optional_property_missing_is_not_an_error() {
        let v = json!({});
        let a = decode_optional_property(&v, "a", decode_i64).unwrap();
        assert_eq!(a, None);
    }

    #[test]
    fn optional_property_present_but_invalid_is_an_error() {
        let v = json!({"a": "not a number"});
        let a = decode_optional_property(&v, "a", decode_i64);
        assert!(a.is_err());
    }

    #[test]
    fn union_aggregates_all_branch_errors() {
        let v = json!("hello");
        let err = decode_union(&v, &[&decode_i64, &decode_bool]).unwrap_err();
        match err {
            DecodeError::Union { errors, .. } => assert_eq!(errors.len(), 2),
            _ => panic!("expected union error"),
        }
    }
}
