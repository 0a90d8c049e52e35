//! The platform's JSON wire dialect.
//!
//! Native values travel as the platform's natural JSON, with platform files
//! rendered as `{"$dnanexus_link": ...}` objects. Composite values travel as
//! two sibling fields per logical parameter: the value itself wrapped under
//! the reserved `___` key, and a `<name>___dxfiles` flat array of every file
//! link found inside the wrapped JSON (the platform stages and closes files
//! from it).
//!
//! `Pair` and `Map` exist only in the source languages; their front-ends
//! lower them to the fixed schemas built by [`pair_schema`] and
//! [`map_schema`] before values reach this module.

use indexmap::IndexMap;
use serde_json::{Value as Json, json};

use crate::types::Type;
use crate::value::{FileValue, Value};

/// The reserved key marking a platform object link.
pub const LINK_KEY: &str = "$dnanexus_link";

/// The reserved key wrapping a composite value.
pub const COMPOSITE_KEY: &str = "___";

/// The suffix of the companion flat-files field of a composite parameter.
pub const FLAT_FILES_SUFFIX: &str = "___dxfiles";

/// The URI scheme of platform files and folders.
pub const DX_URI_PREFIX: &str = "dx://";

/// Possible errors when moving values across the wire.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum WireError {
    /// The value cannot be expressed on the wire with the given type.
    #[error("cannot serialize `{value}` as {target}")]
    Unserializable {
        /// Short rendering of the offending value.
        value: String,
        /// The target type.
        target: String,
    },
    /// The JSON does not decode as the expected type.
    #[error("cannot read {json} back as {target}")]
    Unreadable {
        /// The offending JSON, compactly rendered.
        json: String,
        /// The expected type.
        target: String,
    },
    /// A `$dnanexus_link` object has an unrecognized shape.
    #[error("malformed object link: {0}")]
    MalformedLink(String),
}

impl WireError {
    fn unserializable(value: &Value, target: &Type) -> Self {
        WireError::Unserializable {
            value: value.to_string(),
            target: target.to_string(),
        }
    }

    fn unreadable(json: &Json, target: &Type) -> Self {
        WireError::Unreadable {
            json: json.to_string(),
            target: target.to_string(),
        }
    }
}

/// Builds the schema a source-level `Pair(left, right)` lowers to.
pub fn pair_schema(left: &Type, right: &Type) -> Type {
    Type::Schema {
        name: format!("Pair___({left},{right})"),
        fields: IndexMap::from([
            ("left".to_string(), left.clone()),
            ("right".to_string(), right.clone()),
        ]),
    }
}

/// Builds the schema a source-level `Map[key, value]` lowers to.
///
/// Keys and values travel as two equal-length arrays; pairwise index defines
/// the mapping.
pub fn map_schema(key: &Type, value: &Type) -> Type {
    Type::Schema {
        name: format!("Map___[{key},{value}]"),
        fields: IndexMap::from([
            (
                "keys".to_string(),
                Type::Array {
                    items: Box::new(key.clone()),
                    non_empty: false,
                },
            ),
            (
                "values".to_string(),
                Type::Array {
                    items: Box::new(value.clone()),
                    non_empty: false,
                },
            ),
        ]),
    }
}

fn file_link(file: &FileValue) -> Json {
    match file.uri.strip_prefix(DX_URI_PREFIX) {
        Some(rest) => match rest.split_once(':') {
            Some((project, id)) => json!({ LINK_KEY: { "project": project, "id": id } }),
            None => json!({ LINK_KEY: rest }),
        },
        // External URLs stay as plain strings; the runtime resolves them.
        None => Json::String(file.uri.clone()),
    }
}

/// Serializes a typed value into the platform's natural JSON.
///
/// Composite parameters additionally need [`composite_parts`] to produce the
/// wrapped form and its companion file-link array; this function produces
/// the unwrapped JSON in both cases.
pub fn to_wire(value: &Value, ty: &Type) -> Result<Json, WireError> {
    match (value, ty) {
        (Value::Null, _) => Ok(Json::Null),
        (_, Type::Optional(inner)) => to_wire(value, inner),
        (_, Type::Any | Type::Hash) => untyped_to_wire(value),

        (Value::Boolean(b), Type::Boolean) => Ok(json!(b)),
        (Value::Int(i), Type::Int) => Ok(json!(i)),
        (Value::Int(i), Type::Float) => Ok(json!(*i as f64)),
        (Value::Float(x), Type::Float) => Ok(json!(x)),
        (Value::String(s), Type::String | Type::File | Type::Directory) => {
            Ok(Json::String(s.clone()))
        }
        (Value::String(s), Type::Enum { symbols }) if symbols.contains(s) => {
            Ok(Json::String(s.clone()))
        }

        (Value::File(file), Type::File) => Ok(file_link(file)),
        (Value::Folder { uri, .. } | Value::Archive { uri, .. }, Type::Directory) => {
            Ok(Json::String(uri.clone()))
        }

        (Value::Array(items), Type::Array { items: item_ty, .. }) => {
            let items = items
                .iter()
                .map(|item| to_wire(item, item_ty))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Json::Array(items))
        }

        (Value::Hash(members), Type::Schema { fields, .. }) => {
            let mut object = serde_json::Map::new();
            for (field, field_ty) in fields {
                if let Some(member) = members.get(field) {
                    object.insert(field.clone(), to_wire(member, field_ty)?);
                }
            }
            Ok(Json::Object(object))
        }

        (_, Type::Multi(members)) => {
            for member in members {
                if let Ok(fitted) = value.coerce(member) {
                    return to_wire(&fitted, member);
                }
            }
            Err(WireError::unserializable(value, ty))
        }

        _ => Err(WireError::unserializable(value, ty)),
    }
}

fn untyped_to_wire(value: &Value) -> Result<Json, WireError> {
    match value {
        Value::Null => Ok(Json::Null),
        Value::Boolean(b) => Ok(json!(b)),
        Value::Int(i) => Ok(json!(i)),
        Value::Float(x) => Ok(json!(x)),
        Value::String(s) => Ok(Json::String(s.clone())),
        Value::File(file) => Ok(file_link(file)),
        Value::Folder { uri, .. } | Value::Archive { uri, .. } => Ok(Json::String(uri.clone())),
        Value::Listing { .. } => Err(WireError::Unserializable {
            value: value.to_string(),
            target: Type::Directory.to_string(),
        }),
        Value::Array(items) => {
            let items = items
                .iter()
                .map(untyped_to_wire)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Json::Array(items))
        }
        Value::Hash(members) => {
            let mut object = serde_json::Map::new();
            for (key, member) in members {
                object.insert(key.clone(), untyped_to_wire(member)?);
            }
            Ok(Json::Object(object))
        }
    }
}

/// Serializes a composite value into its two wire parts: the JSON wrapped
/// under [`COMPOSITE_KEY`], and the flat array of file links inside it.
pub fn composite_parts(value: &Value, ty: &Type) -> Result<(Json, Vec<Json>), WireError> {
    let inner = to_wire(value, ty)?;
    let links = collect_file_links(&inner);
    Ok((json!({ COMPOSITE_KEY: inner }), links))
}

/// Collects every `$dnanexus_link` object inside `json`, depth-first.
///
/// Link objects are collected whole and not descended into.
pub fn collect_file_links(json: &Json) -> Vec<Json> {
    let mut links = Vec::new();
    walk_links(json, &mut links);
    links
}

fn walk_links(json: &Json, links: &mut Vec<Json>) {
    match json {
        Json::Object(object) if object.contains_key(LINK_KEY) => links.push(json.clone()),
        Json::Object(object) => {
            for member in object.values() {
                walk_links(member, links);
            }
        }
        Json::Array(items) => {
            for item in items {
                walk_links(item, links);
            }
        }
        _ => (),
    }
}

fn link_to_file(json: &Json) -> Result<FileValue, WireError> {
    match &json[LINK_KEY] {
        Json::String(id) => Ok(FileValue::from_uri(format!("{DX_URI_PREFIX}{id}"))),
        Json::Object(fields) => match (fields.get("project"), fields.get("id")) {
            (Some(Json::String(project)), Some(Json::String(id))) => Ok(FileValue::from_uri(
                format!("{DX_URI_PREFIX}{project}:{id}"),
            )),
            _ => Err(WireError::MalformedLink(json.to_string())),
        },
        _ => Err(WireError::MalformedLink(json.to_string())),
    }
}

/// Reads a typed value back from platform JSON.
///
/// Accepts both the unwrapped form and the composite-wrapped form (a single
/// object under [`COMPOSITE_KEY`]).
pub fn from_wire(json: &Json, ty: &Type) -> Result<Value, WireError> {
    // Unwrap the composite layer, wherever it appears.
    if let Json::Object(object) = json
        && object.len() == 1
        && let Some(inner) = object.get(COMPOSITE_KEY)
    {
        return from_wire(inner, ty);
    }

    match (json, ty) {
        (Json::Null, _) => Ok(Value::Null),
        (_, Type::Optional(inner)) => from_wire(json, inner),
        (_, Type::Any | Type::Hash) => Ok(untyped_from_wire(json)),

        (Json::Bool(b), Type::Boolean) => Ok(Value::Boolean(*b)),
        (Json::Number(n), Type::Int) => n
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| WireError::unreadable(json, ty)),
        (Json::Number(n), Type::Float) => n
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| WireError::unreadable(json, ty)),
        (Json::String(s), Type::String) => Ok(Value::String(s.clone())),
        (Json::String(s), Type::Enum { symbols }) if symbols.contains(s) => {
            Ok(Value::String(s.clone()))
        }

        (Json::String(uri), Type::File) => Ok(Value::File(FileValue::from_uri(uri))),
        (Json::Object(_), Type::File) => link_to_file(json).map(Value::File),
        (Json::String(uri), Type::Directory) => Ok(Value::Folder {
            uri: uri.clone(),
            basename: None,
        }),

        (Json::Array(items), Type::Array { items: item_ty, .. }) => {
            let items = items
                .iter()
                .map(|item| from_wire(item, item_ty))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(items))
        }

        (Json::Object(object), Type::Schema { fields, .. }) => {
            let mut members = IndexMap::new();
            for (field, field_ty) in fields {
                if let Some(member) = object.get(field) {
                    members.insert(field.clone(), from_wire(member, field_ty)?);
                }
            }
            Ok(Value::Hash(members))
        }

        (_, Type::Multi(members)) => members
            .iter()
            .find_map(|member| from_wire(json, member).ok())
            .ok_or_else(|| WireError::unreadable(json, ty)),

        _ => Err(WireError::unreadable(json, ty)),
    }
}

fn untyped_from_wire(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Boolean(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::Array(items.iter().map(untyped_from_wire).collect()),
        Json::Object(object) if object.contains_key(LINK_KEY) => match link_to_file(json) {
            Ok(file) => Value::File(file),
            Err(_) => Value::Hash(
                object
                    .iter()
                    .map(|(k, v)| (k.clone(), untyped_from_wire(v)))
                    .collect(),
            ),
        },
        Json::Object(object) => Value::Hash(
            object
                .iter()
                .map(|(k, v)| (k.clone(), untyped_from_wire(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_platform_file_links() {
        let file = Value::File(FileValue::from_uri("dx://project-42:file-xyz"));
        assert_eq!(
            to_wire(&file, &Type::File).unwrap(),
            json!({ LINK_KEY: { "project": "project-42", "id": "file-xyz" } })
        );

        let bare = Value::File(FileValue::from_uri("dx://file-xyz"));
        assert_eq!(
            to_wire(&bare, &Type::File).unwrap(),
            json!({ LINK_KEY: "file-xyz" })
        );

        // External URLs stay plain strings.
        let url = Value::File(FileValue::from_uri("https://example.com/ref.fa"));
        assert_eq!(
            to_wire(&url, &Type::File).unwrap(),
            json!("https://example.com/ref.fa")
        );
    }

    #[test]
    fn test_wire_roundtrip() {
        let array_of_files = Type::Array {
            items: Box::new(Type::File),
            non_empty: false,
        };
        let value = Value::Array(vec![
            Value::File(FileValue::from_uri("dx://project-1:file-1")),
            Value::File(FileValue::from_uri("dx://file-2")),
        ]);

        let wire = to_wire(&value, &array_of_files).unwrap();
        assert_eq!(from_wire(&wire, &array_of_files).unwrap(), value);
    }

    #[test]
    fn test_composite_parts_collects_links() {
        let stats = Type::Schema {
            name: "Aligned".into(),
            fields: IndexMap::from([
                ("bam".to_string(), Type::File),
                (
                    "logs".to_string(),
                    Type::Array {
                        items: Box::new(Type::File),
                        non_empty: false,
                    },
                ),
                ("count".to_string(), Type::Int),
            ]),
        };
        let value = Value::Hash(IndexMap::from([
            (
                "bam".to_string(),
                Value::File(FileValue::from_uri("dx://file-bam")),
            ),
            (
                "logs".to_string(),
                Value::Array(vec![Value::File(FileValue::from_uri("dx://file-log"))]),
            ),
            ("count".to_string(), Value::Int(3)),
        ]));

        let (wrapped, links) = composite_parts(&value, &stats).unwrap();
        assert_eq!(
            wrapped,
            json!({ COMPOSITE_KEY: {
                "bam": { LINK_KEY: "file-bam" },
                "logs": [{ LINK_KEY: "file-log" }],
                "count": 3,
            }})
        );
        assert_eq!(
            links,
            vec![json!({ LINK_KEY: "file-bam" }), json!({ LINK_KEY: "file-log" })]
        );

        // The wrapped form reads back to the same value.
        assert_eq!(from_wire(&wrapped, &stats).unwrap(), value);
    }

    #[test]
    fn test_pair_and_map_schemas() {
        let pair = pair_schema(&Type::Int, &Type::File);
        assert_eq!(pair.to_string(), "Pair___(Int,File)");

        let map = map_schema(&Type::String, &Type::Int);
        let Type::Schema { fields, .. } = &map else {
            panic!("expected schema");
        };
        assert_eq!(
            fields.get("keys"),
            Some(&Type::Array {
                items: Box::new(Type::String),
                non_empty: false
            })
        );

        let value = Value::Hash(IndexMap::from([
            (
                "keys".to_string(),
                Value::Array(vec![Value::String("a".into())]),
            ),
            ("values".to_string(), Value::Array(vec![Value::Int(1)])),
        ]));
        let wire = to_wire(&value, &map).unwrap();
        assert_eq!(wire, json!({ "keys": ["a"], "values": [1] }));
    }

    #[test]
    fn test_unreadable_json_is_an_error() {
        assert!(from_wire(&json!("five"), &Type::Int).is_err());
        assert!(from_wire(&json!({ LINK_KEY: 3 }), &Type::File).is_err());
    }
}
