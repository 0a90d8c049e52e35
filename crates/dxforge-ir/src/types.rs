//! The compiler's type model.
//!
//! Types mirror what both source languages can express, reduced to a common
//! sum. A type is *native* when it maps onto a single platform parameter
//! class; everything else is a composite and travels on the wire with the
//! two-field encoding described in [`crate::wire`].

use std::fmt::{self, Display};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A language-neutral type.
///
/// Invariants, restored by [`Type::normalize`]:
/// - `Optional` never directly wraps another `Optional`;
/// - `Multi` members are distinct and non-optional (an optional member
///   lifts the whole `Multi` into an `Optional`);
/// - a non-empty `Array` whose reachable item type admits null degrades to
///   an ordinary `Array`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Type {
    /// A boolean.
    Boolean,
    /// A 64-bit signed integer.
    Int,
    /// A 64-bit float.
    Float,
    /// A string.
    String,
    /// A platform file (or an external URL resolving to one).
    File,
    /// A directory-like object: a platform folder, an archive, or a listing.
    Directory,
    /// An array of items, optionally guaranteed non-empty.
    Array {
        /// The item type.
        items: Box<Type>,
        /// Whether the array is guaranteed to hold at least one item.
        non_empty: bool,
    },
    /// A type that additionally admits null.
    Optional(Box<Type>),
    /// A union of distinct non-optional member types.
    Multi(Vec<Type>),
    /// Any type at all; every value fits.
    Any,
    /// A named record with ordered fields.
    ///
    /// Field order is presentation order only: two schemas with the same
    /// name and the same fields are equal regardless of field order
    /// (`IndexMap` equality is order-insensitive).
    Schema {
        /// The schema's source-level name.
        name: String,
        /// The ordered field name/type pairs.
        fields: IndexMap<String, Type>,
    },
    /// A closed set of string symbols.
    Enum {
        /// The allowed symbols, in declaration order.
        symbols: Vec<String>,
    },
    /// An anonymous schema: a string-keyed mapping with untyped members.
    Hash,
}

impl Type {
    /// Restores the type invariants listed on [`Type`]. Idempotent.
    pub fn normalize(&self) -> Type {
        match self {
            Type::Optional(inner) => match inner.normalize() {
                Type::Optional(t) => Type::Optional(t),
                t => Type::Optional(Box::new(t)),
            },
            Type::Array { items, non_empty } => {
                let items = items.normalize();
                let non_empty = *non_empty && !items.admits_null_item();
                Type::Array {
                    items: Box::new(items),
                    non_empty,
                }
            }
            Type::Multi(members) => {
                let mut optional = false;
                let mut seen: Vec<Type> = Vec::new();

                for member in members {
                    let member = match member.normalize() {
                        Type::Optional(t) => {
                            optional = true;
                            *t
                        }
                        t => t,
                    };
                    if !seen.contains(&member) {
                        seen.push(member);
                    }
                }

                let multi = if seen.len() == 1 {
                    seen.remove(0)
                } else {
                    Type::Multi(seen)
                };

                if optional {
                    multi.ensure_optional()
                } else {
                    multi
                }
            }
            Type::Schema { name, fields } => Type::Schema {
                name: name.clone(),
                fields: fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.normalize()))
                    .collect(),
            },
            other => other.clone(),
        }
    }

    /// Wraps the type in `Optional` unless it already is one. Idempotent.
    pub fn ensure_optional(&self) -> Type {
        match self {
            Type::Optional(_) => self.clone(),
            other => Type::Optional(Box::new(other.clone())),
        }
    }

    /// Returns the type with at most one layer of `Optional` removed.
    pub fn unwrap_optional(&self) -> &Type {
        match self {
            Type::Optional(inner) => inner,
            other => other,
        }
    }

    /// Returns whether the type admits null.
    pub fn is_optional(&self) -> bool {
        matches!(self, Type::Optional(_) | Type::Any)
    }

    /// Returns whether the type maps onto a single platform parameter class.
    ///
    /// Natives are the primitives, `File`, `Directory`, optionals thereof,
    /// and single-level arrays of them (the platform has no nested-array
    /// class). Composites need the companion flat-files field on the wire.
    pub fn is_native(&self) -> bool {
        match self {
            Type::Array { items, .. } => items.is_scalar_native(),
            Type::Optional(inner) => inner.is_native(),
            other => other.is_scalar_native(),
        }
    }

    fn is_scalar_native(&self) -> bool {
        matches!(
            self,
            Type::Boolean
                | Type::Int
                | Type::Float
                | Type::String
                | Type::File
                | Type::Directory
        )
    }

    /// Whether a *item* of this type could be null, looking through nested
    /// arrays and unions. Used to degrade the non-empty array guarantee.
    fn admits_null_item(&self) -> bool {
        match self {
            Type::Optional(_) => true,
            Type::Array { items, .. } => items.admits_null_item(),
            Type::Multi(members) => members.iter().any(Type::admits_null_item),
            _ => false,
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Boolean => write!(f, "Boolean"),
            Type::Int => write!(f, "Int"),
            Type::Float => write!(f, "Float"),
            Type::String => write!(f, "String"),
            Type::File => write!(f, "File"),
            Type::Directory => write!(f, "Directory"),
            Type::Array { items, non_empty } => {
                write!(f, "Array[{items}]{}", if *non_empty { "+" } else { "" })
            }
            Type::Optional(inner) => write!(f, "{inner}?"),
            Type::Multi(members) => {
                write!(f, "Multi[")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, "|")?;
                    }
                    write!(f, "{member}")?;
                }
                write!(f, "]")
            }
            Type::Any => write!(f, "Any"),
            Type::Schema { name, .. } => write!(f, "{name}"),
            Type::Enum { symbols } => write!(f, "Enum[{}]", symbols.join(",")),
            Type::Hash => write!(f, "Hash"),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn array(items: Type, non_empty: bool) -> Type {
        Type::Array {
            items: Box::new(items),
            non_empty,
        }
    }

    #[test]
    fn test_normalize_collapses_nested_optionals() {
        let nested = Type::Optional(Box::new(Type::Optional(Box::new(Type::Int))));
        assert_eq!(nested.normalize(), Type::Optional(Box::new(Type::Int)));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let cases = [
            Type::Optional(Box::new(Type::Optional(Box::new(Type::File)))),
            array(Type::Optional(Box::new(Type::Int)), true),
            Type::Multi(vec![Type::Int, Type::Optional(Box::new(Type::String))]),
            array(array(Type::Optional(Box::new(Type::Int)), false), true),
        ];

        for case in cases {
            let once = case.normalize();
            assert_eq!(once.normalize(), once, "normalize({case}) not idempotent");
        }
    }

    #[test]
    fn test_non_empty_degrades_over_optional_items() {
        // A "non-empty" array of optional items makes no such guarantee.
        let ty = array(Type::Optional(Box::new(Type::Int)), true);
        assert_eq!(
            ty.normalize(),
            array(Type::Optional(Box::new(Type::Int)), false)
        );

        // The optional item may be buried below further array layers.
        let ty = array(array(Type::Optional(Box::new(Type::Int)), false), true);
        let Type::Array { non_empty, .. } = ty.normalize() else {
            panic!("expected array");
        };
        assert!(!non_empty);
    }

    #[test]
    fn test_multi_lifts_optional_members() {
        let ty = Type::Multi(vec![Type::Int, Type::Optional(Box::new(Type::String))]);
        assert_eq!(
            ty.normalize(),
            Type::Optional(Box::new(Type::Multi(vec![Type::Int, Type::String])))
        );
    }

    #[test]
    fn test_ensure_optional_never_double_wraps() {
        let once = Type::Int.ensure_optional();
        assert_eq!(once, Type::Optional(Box::new(Type::Int)));
        assert_eq!(once.ensure_optional(), once);
    }

    #[test]
    fn test_native_classification() {
        for (ty, native) in [
            (Type::Int, true),
            (Type::File, true),
            (Type::Directory, true),
            (array(Type::File, false), true),
            (Type::Optional(Box::new(array(Type::Int, true))), true),
            (array(array(Type::Int, false), false), false),
            (array(Type::Optional(Box::new(Type::Int)), false), false),
            (Type::Hash, false),
            (Type::Any, false),
            (Type::Multi(vec![Type::Int, Type::File]), false),
            (array(Type::Hash, false), false),
            (
                Type::Schema {
                    name: "Stats".into(),
                    fields: IndexMap::new(),
                },
                false,
            ),
            (
                Type::Enum {
                    symbols: vec!["a".into()],
                },
                false,
            ),
        ] {
            assert_eq!(ty.is_native(), native, "is_native({ty})");
        }
    }

    #[test]
    fn test_schema_equality_ignores_field_order() {
        let ab = Type::Schema {
            name: "Pair".into(),
            fields: IndexMap::from([("a".to_string(), Type::Int), ("b".to_string(), Type::File)]),
        };
        let ba = Type::Schema {
            name: "Pair".into(),
            fields: IndexMap::from([("b".to_string(), Type::File), ("a".to_string(), Type::Int)]),
        };
        assert_eq!(ab, ba);
    }
}
