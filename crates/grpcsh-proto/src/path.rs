//! The `node[key=value]` path grammar and YANG-to-JSON value coercion.
//!
//! Paths arrive from the command line as delimited strings like
//! `interface[name=eth0]/statistics`. Parsing is deliberately forgiving: an
//! element with unbalanced brackets or trailing junk after the last `]` is
//! kept verbatim as a name with no keys, so a typo still produces a request
//! the target can reject with a real error message.

use crate::gnmi::{Path, PathElem};
use grpcsh_core::Error;
use serde_json::Value;
use std::collections::HashMap;

/// Splits `path` on `delimiter`, dropping empty segments, and parses each
/// segment as one element. Leading and trailing delimiters are harmless.
pub fn parse_path(path: &str, delimiter: char) -> Path {
    Path {
        elem: path
            .split(delimiter)
            .filter(|segment| !segment.is_empty())
            .map(parse_elem)
            .collect(),
    }
}

/// Parses one `name[key1=val1][key2=val2]` segment.
pub fn parse_elem(segment: &str) -> PathElem {
    let Some((name, keys)) = segment.split_once('[') else {
        return PathElem {
            name: segment.to_string(),
            key: HashMap::new(),
        };
    };
    // Everything up to the last closing bracket is key text; anything after
    // it (or no bracket at all) makes the segment malformed.
    let Some((keys, rest)) = keys.rsplit_once(']') else {
        return PathElem {
            name: segment.to_string(),
            key: HashMap::new(),
        };
    };
    if !rest.is_empty() || keys.is_empty() {
        return PathElem {
            name: segment.to_string(),
            key: HashMap::new(),
        };
    }
    let key = keys
        .split("][")
        .map(|keyval| match keyval.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (keyval.to_string(), String::new()),
        })
        .collect();
    PathElem {
        name: name.to_string(),
        key,
    }
}

/// JSON shapes a YANG leaf type maps onto.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JsonShape {
    String,
    Number,
    Boolean,
    Null,
}

fn yang_shape(yang_type: &str) -> Option<JsonShape> {
    match yang_type {
        "string" | "enumeration" | "bits" | "instance-identifier" => Some(JsonShape::String),
        // 64-bit and decimal leaves travel as strings per RFC 7951.
        "int64" | "uint64" | "decimal64" => Some(JsonShape::String),
        "int8" | "int16" | "int32" | "uint8" | "uint16" | "uint32" => Some(JsonShape::Number),
        "boolean" => Some(JsonShape::Boolean),
        "empty" => Some(JsonShape::Null),
        _ => None,
    }
}

/// Builds the JSON object for one update from parallel `name=value` pairs and
/// optional YANG type names. A missing type falls back to [`guess_value`].
///
/// # Errors
///
/// [`Error::Configuration`] for an unknown YANG type or a value that does not
/// fit the declared one.
pub fn coerce_values(
    values: &[(String, String)],
    types: &[String],
) -> grpcsh_core::Result<serde_json::Map<String, Value>> {
    let mut object = serde_json::Map::with_capacity(values.len());
    for (i, (name, value)) in values.iter().enumerate() {
        let coerced = match types.get(i) {
            Some(yang_type) => {
                let shape = yang_shape(yang_type).ok_or_else(|| Error::Configuration {
                    reason: format!("unknown YANG type <{yang_type}>"),
                })?;
                coerce_typed(value, shape).ok_or_else(|| Error::Configuration {
                    reason: format!("value <{value}> does not fit YANG type <{yang_type}>"),
                })?
            }
            None => guess_value(value),
        };
        object.insert(name.clone(), coerced);
    }
    Ok(object)
}

fn coerce_typed(value: &str, shape: JsonShape) -> Option<Value> {
    match shape {
        JsonShape::String => Some(Value::String(value.to_string())),
        JsonShape::Number => value.parse::<i64>().ok().map(Value::from),
        JsonShape::Boolean => match value.to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        JsonShape::Null => Some(Value::Null),
    }
}

/// Untyped fallback: integers stay numbers up to the unsigned 32-bit range,
/// anything larger is kept as a string (64-bit leaves travel as strings),
/// `true`/`false`/`null` become their JSON selves, the rest is a string.
pub fn guess_value(value: &str) -> Value {
    if let Ok(n) = value.parse::<i64>() {
        if n > 4_294_967_295 {
            return Value::String(value.to_string());
        }
        return Value::from(n);
    }
    match value {
        "true" | "True" | "TRUE" => Value::Bool(true),
        "false" | "False" | "FALSE" => Value::Bool(false),
        "null" => Value::Null,
        other => Value::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_segments_have_no_keys() {
        let path = parse_path("/state/port/statistics/", '/');
        let names: Vec<&str> = path.elem.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["state", "port", "statistics"]);
        assert!(path.elem.iter().all(|e| e.key.is_empty()));
    }

    #[test]
    fn key_attributes_parse_into_the_element_map() {
        let path = parse_path("interface[name=eth0][unit=0]/statistics", '/');
        assert_eq!(path.elem.len(), 2);
        let elem = &path.elem[0];
        assert_eq!(elem.name, "interface");
        assert_eq!(elem.key["name"], "eth0");
        assert_eq!(elem.key["unit"], "0");
    }

    #[test]
    fn key_values_may_contain_equals_signs() {
        let elem = parse_elem("entry[filter=a=b]");
        assert_eq!(elem.key["filter"], "a=b");
    }

    #[test]
    fn malformed_brackets_keep_the_segment_verbatim() {
        for segment in ["port[id=1", "port[id=1]x", "port[]"] {
            let elem = parse_elem(segment);
            assert_eq!(elem.name, segment);
            assert!(elem.key.is_empty());
        }
    }

    #[test]
    fn keyval_without_equals_gets_an_empty_value() {
        let elem = parse_elem("port[flag]");
        assert_eq!(elem.key["flag"], "");
    }

    #[test]
    fn typed_coercion_follows_the_yang_map() {
        let values = [
            ("mtu".to_string(), "9000".to_string()),
            ("counter".to_string(), "12345678901".to_string()),
            ("enabled".to_string(), "TRUE".to_string()),
            ("present".to_string(), "whatever".to_string()),
        ];
        let types = ["uint16", "uint64", "boolean", "empty"].map(String::from);
        let object = coerce_values(&values, &types).expect("all values fit");
        assert_eq!(
            Value::Object(object),
            json!({
                "mtu": 9000,
                "counter": "12345678901",
                "enabled": true,
                "present": null,
            })
        );
    }

    #[test]
    fn typed_coercion_rejects_unknown_types_and_misfits() {
        let values = [("mtu".to_string(), "jumbo".to_string())];
        assert!(coerce_values(&values, &["uint16".to_string()]).is_err());
        assert!(coerce_values(&values, &["float128".to_string()]).is_err());
    }

    #[test]
    fn untyped_guessing_keeps_wide_integers_as_strings() {
        assert_eq!(guess_value("42"), json!(42));
        assert_eq!(guess_value("0"), json!(0));
        assert_eq!(guess_value("4294967295"), json!(4294967295u64));
        assert_eq!(guess_value("4294967296"), json!("4294967296"));
        assert_eq!(guess_value("true"), json!(true));
        assert_eq!(guess_value("null"), json!(null));
        assert_eq!(guess_value("eth0"), json!("eth0"));
    }
}
