//! The compiler's value model and the value/type fitting rules.
//!
//! Values mirror [`crate::types::Type`], plus the unmaterialized directory
//! forms (`Folder`, `Archive`, `Listing`) and `Null`. Coercion implements
//! the fitting rules shared by the translator (lifting constant defaults)
//! and the runtime (checking caller-supplied inputs); it is idempotent.

use std::fmt::{self, Display};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::types::Type;

/// A file value: a URI plus whatever else is known about the file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileValue {
    /// The file's URI (`dx://...` for platform files, otherwise a URL).
    pub uri: String,
    /// The basename to localize the file under, when it differs from the
    /// URI's final segment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basename: Option<String>,
    /// Literal contents, for files synthesized by the compiler.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    /// A content checksum, if the source declared one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// The file's size in bytes, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    /// Secondary files that travel alongside this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary_files: Vec<Value>,
}

impl FileValue {
    /// A file value carrying only a URI.
    pub fn from_uri(uri: impl Into<String>) -> Self {
        FileValue {
            uri: uri.into(),
            ..Default::default()
        }
    }
}

/// A language-neutral value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// The null value.
    Null,
    /// A boolean.
    Boolean(bool),
    /// An integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// A string.
    String(String),
    /// A file.
    File(FileValue),
    /// A directory backed by a platform folder.
    Folder {
        /// The folder URI.
        uri: String,
        /// An overriding basename, if any.
        basename: Option<String>,
    },
    /// A directory backed by an archive object.
    Archive {
        /// The archive URI.
        uri: String,
        /// An overriding basename, if any.
        basename: Option<String>,
    },
    /// An unmaterialized directory described by an explicit listing.
    Listing {
        /// The directory's basename.
        basename: String,
        /// The files and sub-listings inside.
        items: Vec<Value>,
    },
    /// An array of values.
    Array(Vec<Value>),
    /// An ordered string-keyed mapping.
    Hash(IndexMap<String, Value>),
}

/// Possible errors when fitting a value to a type.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum CoercionError {
    /// The value does not fit the target type at all.
    #[error("`{value}` does not fit type {target}")]
    Mismatch {
        /// Short rendering of the offending value.
        value: String,
        /// The target type.
        target: String,
    },
    /// A float with a fractional part cannot narrow to an integer.
    #[error("`{0}` has a fractional part and cannot narrow to Int")]
    InexactNarrowing(f64),
    /// An empty array cannot fit a non-empty array type.
    #[error("an empty array does not fit {0}")]
    EmptyNonEmptyArray(String),
    /// A hash member is not a field of the target schema.
    #[error("`{field}` is not a field of schema {schema}")]
    UnknownField {
        /// The offending key.
        field: String,
        /// The schema name.
        schema: String,
    },
    /// A non-optional schema field is missing from the hash.
    #[error("schema {schema} requires field `{field}`")]
    MissingField {
        /// The missing field.
        field: String,
        /// The schema name.
        schema: String,
    },
    /// A string is not one of an enum's symbols.
    #[error("`{value}` is not one of {symbols:?}")]
    NotASymbol {
        /// The offending string.
        value: String,
        /// The allowed symbols.
        symbols: Vec<String>,
    },
}

impl CoercionError {
    fn mismatch(value: &Value, target: &Type) -> Self {
        CoercionError::Mismatch {
            value: value.to_string(),
            target: target.to_string(),
        }
    }
}

impl Value {
    /// Fits this value to `target`, applying the coercion rules:
    ///
    /// - `Null` fits any optional type and `Any`;
    /// - `Int` widens to `Float`; `Float` narrows to `Int` only when exact;
    /// - `String` converts to `File`/`Directory` (URI interpretation), and a
    ///   plain-URI file or folder converts back to `String`;
    /// - arrays fit item-wise, and empty arrays never fit a non-empty type;
    /// - hashes fit a schema when their keys are a subset of the schema's
    ///   fields and every absent field is optional;
    /// - a `Multi` target accepts the first member the value fits.
    ///
    /// Coercion is idempotent: re-fitting a result to the same type is a
    /// no-op.
    pub fn coerce(&self, target: &Type) -> Result<Value, CoercionError> {
        match (self, target) {
            (_, Type::Any) => Ok(self.clone()),
            (Value::Null, Type::Optional(_)) => Ok(Value::Null),
            (Value::Null, _) => Err(CoercionError::mismatch(self, target)),
            (_, Type::Optional(inner)) => self.coerce(inner),

            (Value::Boolean(_), Type::Boolean)
            | (Value::Int(_), Type::Int)
            | (Value::Float(_), Type::Float)
            | (Value::String(_), Type::String) => Ok(self.clone()),

            (Value::Int(i), Type::Float) => Ok(Value::Float(*i as f64)),
            (Value::Float(f), Type::Int) => {
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Ok(Value::Int(*f as i64))
                } else {
                    Err(CoercionError::InexactNarrowing(*f))
                }
            }

            (Value::String(s), Type::File) => Ok(Value::File(FileValue::from_uri(s))),
            (Value::String(s), Type::Directory) => Ok(Value::Folder {
                uri: s.clone(),
                basename: None,
            }),
            (Value::String(s), Type::Enum { symbols }) => {
                if symbols.contains(s) {
                    Ok(self.clone())
                } else {
                    Err(CoercionError::NotASymbol {
                        value: s.clone(),
                        symbols: symbols.clone(),
                    })
                }
            }
            (Value::File(file), Type::String) => {
                // Only a bare URI reads back as a string; a file with
                // synthesized contents has no path to name.
                if file.contents.is_none() {
                    Ok(Value::String(file.uri.clone()))
                } else {
                    Err(CoercionError::mismatch(self, target))
                }
            }
            (Value::Folder { uri, .. }, Type::String) => Ok(Value::String(uri.clone())),

            (Value::File(_), Type::File) => Ok(self.clone()),
            (
                Value::Folder { .. } | Value::Archive { .. } | Value::Listing { .. },
                Type::Directory,
            ) => Ok(self.clone()),

            (Value::Array(items), Type::Array { items: ty, non_empty }) => {
                if items.is_empty() && *non_empty {
                    return Err(CoercionError::EmptyNonEmptyArray(target.to_string()));
                }
                let items = items
                    .iter()
                    .map(|item| item.coerce(ty))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(items))
            }

            (Value::Hash(members), Type::Schema { name, fields }) => {
                for key in members.keys() {
                    if !fields.contains_key(key) {
                        return Err(CoercionError::UnknownField {
                            field: key.clone(),
                            schema: name.clone(),
                        });
                    }
                }

                // Members are re-emitted in schema field order so that two
                // equal hashes coerce to identical results.
                let mut coerced = IndexMap::new();
                for (field, ty) in fields {
                    match members.get(field) {
                        Some(member) => {
                            coerced.insert(field.clone(), member.coerce(ty)?);
                        }
                        None if ty.is_optional() => (),
                        None => {
                            return Err(CoercionError::MissingField {
                                field: field.clone(),
                                schema: name.clone(),
                            });
                        }
                    }
                }
                Ok(Value::Hash(coerced))
            }
            (Value::Hash(_), Type::Hash) => Ok(self.clone()),

            (_, Type::Multi(members)) => members
                .iter()
                .find_map(|member| self.coerce(member).ok())
                .ok_or_else(|| CoercionError::mismatch(self, target)),

            _ => Err(CoercionError::mismatch(self, target)),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::File(file) => write!(f, "File({})", file.uri),
            Value::Folder { uri, .. } => write!(f, "Folder({uri})"),
            Value::Archive { uri, .. } => write!(f, "Archive({uri})"),
            Value::Listing { basename, items } => {
                write!(f, "Listing({basename}, {} items)", items.len())
            }
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Hash(members) => {
                write!(f, "{{")?;
                for (i, (key, member)) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {member}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn schema(name: &str, fields: &[(&str, Type)]) -> Type {
        Type::Schema {
            name: name.into(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn test_null_fits_optionals_only() {
        assert_eq!(
            Value::Null.coerce(&Type::Optional(Box::new(Type::Int))),
            Ok(Value::Null)
        );
        assert_eq!(Value::Null.coerce(&Type::Any), Ok(Value::Null));
        assert!(Value::Null.coerce(&Type::Int).is_err());
    }

    #[test]
    fn test_numeric_widening() {
        assert_eq!(Value::Int(3).coerce(&Type::Float), Ok(Value::Float(3.0)));
        assert_eq!(Value::Float(4.0).coerce(&Type::Int), Ok(Value::Int(4)));
        assert_eq!(
            Value::Float(4.5).coerce(&Type::Int),
            Err(CoercionError::InexactNarrowing(4.5))
        );
    }

    #[test]
    fn test_string_file_conversions() {
        let file = Value::String("dx://project-1:file-1".into())
            .coerce(&Type::File)
            .unwrap();
        assert_eq!(
            file,
            Value::File(FileValue::from_uri("dx://project-1:file-1"))
        );

        // A plain-URI file reads back as its URI string.
        assert_eq!(
            file.coerce(&Type::String),
            Ok(Value::String("dx://project-1:file-1".into()))
        );

        // A synthesized file has no path to read back.
        let synthesized = Value::File(FileValue {
            uri: "out.txt".into(),
            contents: Some("hello".into()),
            ..Default::default()
        });
        assert!(synthesized.coerce(&Type::String).is_err());
    }

    #[test]
    fn test_array_fitting() {
        let ints = Type::Array {
            items: Box::new(Type::Float),
            non_empty: true,
        };

        assert_eq!(
            Value::Array(vec![Value::Int(1), Value::Int(2)]).coerce(&ints),
            Ok(Value::Array(vec![Value::Float(1.0), Value::Float(2.0)]))
        );
        assert!(matches!(
            Value::Array(vec![]).coerce(&ints),
            Err(CoercionError::EmptyNonEmptyArray(_))
        ));
    }

    #[test]
    fn test_hash_fits_schema() {
        let stats = schema(
            "Stats",
            &[
                ("count", Type::Int),
                ("mean", Type::Optional(Box::new(Type::Float))),
            ],
        );

        let full = Value::Hash(IndexMap::from([
            ("mean".to_string(), Value::Int(2)),
            ("count".to_string(), Value::Int(7)),
        ]));
        // Fields come back in schema order, coerced member-wise.
        assert_eq!(
            full.coerce(&stats),
            Ok(Value::Hash(IndexMap::from([
                ("count".to_string(), Value::Int(7)),
                ("mean".to_string(), Value::Float(2.0)),
            ])))
        );

        // A missing optional field is fine; a missing required one is not.
        let partial = Value::Hash(IndexMap::from([("count".to_string(), Value::Int(7))]));
        assert!(partial.coerce(&stats).is_ok());

        let empty = Value::Hash(IndexMap::new());
        assert_eq!(
            empty.coerce(&stats),
            Err(CoercionError::MissingField {
                field: "count".into(),
                schema: "Stats".into()
            })
        );

        // Unknown keys are rejected.
        let extra = Value::Hash(IndexMap::from([
            ("count".to_string(), Value::Int(7)),
            ("median".to_string(), Value::Int(1)),
        ]));
        assert_eq!(
            extra.coerce(&stats),
            Err(CoercionError::UnknownField {
                field: "median".into(),
                schema: "Stats".into()
            })
        );
    }

    #[test]
    fn test_multi_takes_first_fitting_member() {
        let multi = Type::Multi(vec![Type::Int, Type::String]);
        assert_eq!(Value::Int(1).coerce(&multi), Ok(Value::Int(1)));
        assert_eq!(
            Value::String("x".into()).coerce(&multi),
            Ok(Value::String("x".into()))
        );
        assert!(Value::Boolean(true).coerce(&multi).is_err());
    }

    #[test]
    fn test_coercion_is_idempotent() {
        let stats = schema("Stats", &[("count", Type::Int), ("mean", Type::Float)]);
        let cases = [
            (Value::Int(3), Type::Float),
            (Value::String("dx://p:f".into()), Type::File),
            (
                Value::Array(vec![Value::Int(1)]),
                Type::Array {
                    items: Box::new(Type::Float),
                    non_empty: false,
                },
            ),
            (
                Value::Hash(IndexMap::from([
                    ("mean".to_string(), Value::Int(1)),
                    ("count".to_string(), Value::Int(2)),
                ])),
                stats,
            ),
        ];

        for (value, ty) in cases {
            let once = value.coerce(&ty).unwrap();
            assert_eq!(once.coerce(&ty).unwrap(), once);
        }
    }
}
