//! Typed expression trees and the oracle operations the engine consumes.
//!
//! Every node carries the type the front-end's checker assigned to it. The
//! engine treats the tree as opaque: it only ever asks for constant folding
//! ([`Expr::const_eval`]), free variables ([`Expr::free_variables`]),
//! triviality ([`Expr::is_trivial`]), and pretty-printing ([`std::fmt::Display`]).

use std::fmt::{self, Display};

use dxforge_ir::types::Type;
use dxforge_ir::value::Value;
use indexmap::IndexMap;

/// Operations whose arguments tolerate absent values.
///
/// A bare identifier passed to one of these reads as "may be missing"
/// rather than "must be present", so the free-variable walk demotes such
/// references to [`RefKind::Optional`].
const ABSENCE_TOLERANT_OPS: &[&str] = &["defined", "select_first", "select_all"];

/// A typed expression.
#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    /// The node itself.
    pub kind: ExprKind,
    /// The type the front-end checker assigned to this node.
    pub ty: Type,
}

/// The expression node variants.
#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    /// A literal value.
    Literal(Value),
    /// A reference to a binding in scope.
    Ident(String),
    /// A field read: a call output, or a member of a pair/struct.
    FieldAccess {
        /// The expression the field is read from.
        base: Box<Expr>,
        /// The field name.
        field: String,
    },
    /// An array literal.
    ArrayLit(Vec<Expr>),
    /// A pair literal.
    PairLit {
        /// The left member.
        left: Box<Expr>,
        /// The right member.
        right: Box<Expr>,
    },
    /// A hash/struct literal with ordered members.
    HashLit(IndexMap<String, Expr>),
    /// Any other operation, kept opaque: operators, stdlib calls,
    /// interpolations. `op` is the operation's source-level name.
    Apply {
        /// The operation name.
        op: String,
        /// The operand expressions.
        args: Vec<Expr>,
    },
}

/// The result of asking whether an expression folds to a constant.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstEval {
    /// The expression folded, and the value fits the requested type.
    Constant(Value),
    /// The expression must be evaluated at runtime; the payload says why.
    NonConstant(String),
}

impl ConstEval {
    /// The folded value, if any.
    pub fn constant(self) -> Option<Value> {
        match self {
            ConstEval::Constant(value) => Some(value),
            ConstEval::NonConstant(_) => None,
        }
    }
}

/// How strongly an expression needs a referenced binding.
///
/// Merging the same identifier across several references keeps the
/// *minimum* kind: a single `Required` reference makes the whole binding
/// required.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RefKind {
    /// The value must be present.
    Required,
    /// The reference tolerates an absent value.
    Optional,
    /// The binding is produced by the surrounding construct (a scatter
    /// variable), not supplied by the caller.
    Computed,
}

/// One free-variable reference inside an expression.
#[derive(Clone, Debug, PartialEq)]
pub struct ExprRef {
    /// The dotted identifier path, e.g. `["bam_stats", "coverage"]`.
    pub path: Vec<String>,
    /// The type of the referenced binding.
    pub ty: Type,
    /// How strongly the expression needs the binding.
    pub kind: RefKind,
}

impl ExprRef {
    /// The dotted source form of the path.
    pub fn source_name(&self) -> String {
        self.path.join(".")
    }
}

impl Expr {
    /// A literal expression; the type is taken from the shape of the value
    /// where unambiguous, so the common cases read tersely in tests.
    pub fn literal(value: Value, ty: Type) -> Self {
        Expr {
            kind: ExprKind::Literal(value),
            ty,
        }
    }

    /// Convenience: an `Int` literal.
    pub fn int(i: i64) -> Self {
        Self::literal(Value::Int(i), Type::Int)
    }

    /// Convenience: a `Boolean` literal.
    pub fn boolean(b: bool) -> Self {
        Self::literal(Value::Boolean(b), Type::Boolean)
    }

    /// Convenience: a `String` literal.
    pub fn str(s: impl Into<String>) -> Self {
        Self::literal(Value::String(s.into()), Type::String)
    }

    /// Convenience: a typed identifier reference.
    pub fn ident(name: impl Into<String>, ty: Type) -> Self {
        Expr {
            kind: ExprKind::Ident(name.into()),
            ty,
        }
    }

    /// Convenience: a typed field read.
    pub fn field(base: Expr, field: impl Into<String>, ty: Type) -> Self {
        Expr {
            kind: ExprKind::FieldAccess {
                base: Box::new(base),
                field: field.into(),
            },
            ty,
        }
    }

    /// Convenience: an array literal of `Int`-typed items.
    pub fn int_array(items: impl IntoIterator<Item = i64>, non_empty: bool) -> Self {
        let items: Vec<_> = items.into_iter().map(Expr::int).collect();
        Expr {
            ty: Type::Array {
                items: Box::new(Type::Int),
                non_empty,
            },
            kind: ExprKind::ArrayLit(items),
        }
    }

    /// Convenience: an opaque application.
    pub fn apply(op: impl Into<String>, args: Vec<Expr>, ty: Type) -> Self {
        Expr {
            kind: ExprKind::Apply {
                op: op.into(),
                args,
            },
            ty,
        }
    }

    /// Tries to fold this expression to a constant fitting `target`.
    ///
    /// Literals fold to themselves; literal collections fold member-wise;
    /// everything touching a binding or an operation is non-constant (the
    /// runtime evaluates it instead). A folded value that does not fit
    /// `target` also reports as non-constant, carrying the fitting error
    /// as its reason.
    pub fn const_eval(&self, target: &Type) -> ConstEval {
        match self.fold() {
            Ok(value) => match value.coerce(target) {
                Ok(fitted) => ConstEval::Constant(fitted),
                Err(err) => ConstEval::NonConstant(err.to_string()),
            },
            Err(reason) => ConstEval::NonConstant(reason),
        }
    }

    fn fold(&self) -> Result<Value, String> {
        match &self.kind {
            ExprKind::Literal(value) => Ok(value.clone()),
            ExprKind::Ident(name) => Err(format!("references `{name}`")),
            ExprKind::FieldAccess { base, field } => {
                Err(format!("reads field `{field}` of `{base}`"))
            }
            ExprKind::ArrayLit(items) => {
                let items = items
                    .iter()
                    .map(Expr::fold)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(items))
            }
            ExprKind::PairLit { left, right } => Ok(Value::Hash(IndexMap::from([
                ("left".to_string(), left.fold()?),
                ("right".to_string(), right.fold()?),
            ]))),
            ExprKind::HashLit(members) => {
                let mut folded = IndexMap::with_capacity(members.len());
                for (key, member) in members {
                    folded.insert(key.clone(), member.fold()?);
                }
                Ok(Value::Hash(folded))
            }
            ExprKind::Apply { op, .. } => Err(format!("applies `{op}`")),
        }
    }

    /// Collects the free variables of this expression, in source order.
    ///
    /// Each reference reports the dotted identifier path, the type of the
    /// referenced node, and a [`RefKind`]. `expand_field_access` controls
    /// what a trailing field read on a call namespace reports: with it,
    /// `c.out` reports the path `["c", "out"]` typed as the output (used
    /// for call outputs); without it, the same read reports `["c"]`. A
    /// member read on a real value binding (`p.left` on a pair) always
    /// reports the binding itself, under either setting.
    ///
    /// Duplicates are *not* merged here; the closure analyzer merges kinds
    /// and checks type agreement across all references.
    pub fn free_variables(&self, expand_field_access: bool) -> Vec<ExprRef> {
        let mut refs = Vec::new();
        self.walk_refs(expand_field_access, RefKind::Required, &mut refs);
        refs
    }

    fn walk_refs(&self, expand: bool, kind: RefKind, refs: &mut Vec<ExprRef>) {
        match &self.kind {
            ExprKind::Literal(_) => (),
            ExprKind::Ident(name) => refs.push(ExprRef {
                path: vec![name.clone()],
                ty: self.ty.clone(),
                kind,
            }),
            ExprKind::FieldAccess { base, .. } => {
                let target = if expand {
                    self.binding_prefix()
                } else {
                    base.binding_prefix()
                };
                match target {
                    Some((path, ty)) => refs.push(ExprRef {
                        path,
                        ty: ty.clone(),
                        kind,
                    }),
                    // The base is itself a compound expression; the field
                    // read adds no new bindings of its own.
                    None => base.walk_refs(expand, kind, refs),
                }
            }
            ExprKind::ArrayLit(items) => {
                for item in items {
                    item.walk_refs(expand, kind, refs);
                }
            }
            ExprKind::PairLit { left, right } => {
                left.walk_refs(expand, kind, refs);
                right.walk_refs(expand, kind, refs);
            }
            ExprKind::HashLit(members) => {
                for member in members.values() {
                    member.walk_refs(expand, kind, refs);
                }
            }
            ExprKind::Apply { op, args } => {
                let arg_kind = if ABSENCE_TOLERANT_OPS.contains(&op.as_str()) {
                    kind.max(RefKind::Optional)
                } else {
                    kind
                };
                for arg in args {
                    arg.walk_refs(expand, arg_kind, refs);
                }
            }
        }
    }

    /// The full dotted path of an identifier/field-access chain, or `None`
    /// if the expression is anything else.
    fn ident_path(&self) -> Option<Vec<String>> {
        match &self.kind {
            ExprKind::Ident(name) => Some(vec![name.clone()]),
            ExprKind::FieldAccess { base, field } => {
                let mut path = base.ident_path()?;
                path.push(field.clone());
                Some(path)
            }
            _ => None,
        }
    }

    /// The *value binding* an identifier/field-access chain reads, with its
    /// type.
    ///
    /// Call namespaces are typed [`Type::Hash`] by convention, so `c.out`
    /// resolves to the binding `["c", "out"]` (the call output), while a
    /// member read on a real value such as `p.left` resolves to `["p"]`
    /// (the pair itself). Longer chains collapse the same way: `c.out.len`
    /// resolves to `["c", "out"]` when `c` is a call namespace.
    fn binding_prefix(&self) -> Option<(Vec<String>, &Type)> {
        match &self.kind {
            ExprKind::Ident(_) => Some((self.ident_path()?, &self.ty)),
            ExprKind::FieldAccess { base, .. } => {
                if base.ty == Type::Hash {
                    Some((self.ident_path()?, &self.ty))
                } else {
                    base.binding_prefix()
                }
            }
            _ => None,
        }
    }

    /// Whether the expression needs no runtime evaluation beyond lookup:
    /// a literal, a bare identifier, a literal collection of literals, or
    /// a single field read on a call result.
    pub fn is_trivial(&self) -> bool {
        fn is_literal(expr: &Expr) -> bool {
            matches!(expr.kind, ExprKind::Literal(_))
        }

        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Ident(_) => true,
            ExprKind::FieldAccess { base, .. } => matches!(base.kind, ExprKind::Ident(_)),
            ExprKind::ArrayLit(items) => items.iter().all(is_literal),
            ExprKind::PairLit { left, right } => is_literal(left) && is_literal(right),
            ExprKind::HashLit(members) => members.values().all(is_literal),
            ExprKind::Apply { .. } => false,
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Literal(value) => write!(f, "{value}"),
            ExprKind::Ident(name) => write!(f, "{name}"),
            ExprKind::FieldAccess { base, field } => write!(f, "{base}.{field}"),
            ExprKind::ArrayLit(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            ExprKind::PairLit { left, right } => write!(f, "({left}, {right})"),
            ExprKind::HashLit(members) => {
                write!(f, "{{")?;
                for (i, (key, member)) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {member}")?;
                }
                write!(f, "}}")
            }
            ExprKind::Apply { op, args } => {
                write!(f, "{op}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_const_eval() {
        for (expr, target, expected) in [
            (Expr::int(5), Type::Int, Some(Value::Int(5))),
            (Expr::int(5), Type::Float, Some(Value::Float(5.0))),
            (
                Expr::int_array([1, 2, 3], true),
                Type::Array {
                    items: Box::new(Type::Int),
                    non_empty: true,
                },
                Some(Value::Array(vec![
                    Value::Int(1),
                    Value::Int(2),
                    Value::Int(3),
                ])),
            ),
            (Expr::ident("x", Type::Int), Type::Int, None),
            (
                Expr::apply("add", vec![Expr::int(1), Expr::int(2)], Type::Int),
                Type::Int,
                None,
            ),
            // A folded value that doesn't fit the target is non-constant.
            (Expr::str("abc"), Type::Int, None),
        ] {
            assert_eq!(expr.const_eval(&target).constant(), expected, "{expr}");
        }
    }

    #[test]
    fn test_free_variables_expand_call_outputs() {
        // add.result + 1
        let expr = Expr::apply(
            "add",
            vec![
                Expr::field(
                    Expr::ident("add", Type::Hash),
                    "result",
                    Type::Int,
                ),
                Expr::int(1),
            ],
            Type::Int,
        );

        let refs = expr.free_variables(true);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].path, vec!["add", "result"]);
        assert_eq!(refs[0].ty, Type::Int);
        assert_eq!(refs[0].kind, RefKind::Required);
    }

    #[test]
    fn test_free_variables_drop_member_reads() {
        // p.left, with p a pair-shaped schema
        let pair_ty = dxforge_ir::wire::pair_schema(&Type::Int, &Type::File);
        let expr = Expr::field(Expr::ident("p", pair_ty.clone()), "left", Type::Int);

        let refs = expr.free_variables(false);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].path, vec!["p"]);
        assert_eq!(refs[0].ty, pair_ty);

        // Member reads collapse to the binding even when call outputs are
        // being expanded: `p` is a value, not a call namespace.
        let refs = expr.free_variables(true);
        assert_eq!(refs[0].path, vec!["p"]);
    }

    #[test]
    fn test_absence_tolerant_ops_demote_to_optional() {
        let opt_int = Type::Optional(Box::new(Type::Int));
        let expr = Expr::apply(
            "select_first",
            vec![
                Expr {
                    kind: ExprKind::ArrayLit(vec![
                        Expr::ident("maybe", opt_int.clone()),
                        Expr::int(0),
                    ]),
                    ty: Type::Array {
                        items: Box::new(opt_int.clone()),
                        non_empty: true,
                    },
                },
            ],
            Type::Int,
        );

        let refs = expr.free_variables(true);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, RefKind::Optional);
    }

    #[test]
    fn test_triviality() {
        for (expr, trivial) in [
            (Expr::int(1), true),
            (Expr::ident("x", Type::Int), true),
            (Expr::int_array([1, 2], false), true),
            (
                Expr::field(Expr::ident("c", Type::Hash), "out", Type::Int),
                true,
            ),
            (
                Expr {
                    kind: ExprKind::ArrayLit(vec![Expr::ident("x", Type::Int)]),
                    ty: Type::Array {
                        items: Box::new(Type::Int),
                        non_empty: false,
                    },
                },
                false,
            ),
            (
                Expr::apply("add", vec![Expr::int(1), Expr::int(2)], Type::Int),
                false,
            ),
        ] {
            assert_eq!(expr.is_trivial(), trivial, "{expr}");
        }
    }

    #[test]
    fn test_display() {
        let expr = Expr::apply(
            "sub",
            vec![
                Expr::field(Expr::ident("mul", Type::Hash), "result", Type::Int),
                Expr::int(2),
            ],
            Type::Int,
        );
        assert_eq!(expr.to_string(), "sub(mul.result, 2)");
    }
}
