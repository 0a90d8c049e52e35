//! Input/output closure analysis over workflow elements.
//!
//! For any element sequence (a block, a conditional or scatter body, or a
//! whole workflow body) this module computes what the sequence *publishes*
//! (outputs: declarations, call results, lifted through conditionals and
//! scatters) and what it *reads from outside itself* (inputs: free
//! variables whose binding site is elsewhere).
//!
//! Outputs are computed first; the input walk then filters out every
//! reference to a name bound anywhere inside the sequence, which also
//! covers forward references.

use dxforge_ir::types::Type;
use dxforge_lang::ast::WorkflowElement;
use dxforge_lang::expr::{Expr, ExprRef, RefKind};
use indexmap::IndexMap;
use std::collections::HashSet;

/// Possible closure-analysis failures.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ClosureError {
    /// The same free variable is referenced with two incompatible types.
    #[error("`{name}` is referenced both as {first} and as {second}")]
    ConflictingTypes {
        /// The variable's dotted source name.
        name: String,
        /// The type of the first reference.
        first: String,
        /// The type of the conflicting reference.
        second: String,
    },
    /// Two bindings publish the same name with different types.
    #[error("`{name}` is published both as {first} and as {second}")]
    OutputCollision {
        /// The output's dotted source name.
        name: String,
        /// The type of the first binding.
        first: String,
        /// The type of the colliding binding.
        second: String,
    },
}

/// One value a sequence reads from outside itself.
#[derive(Clone, Debug, PartialEq)]
pub struct ClosureInput {
    /// The dotted source name, e.g. `add.result`.
    pub name: String,
    /// The referenced binding's type.
    pub ty: Type,
    /// How strongly the sequence needs the binding. Merged across all
    /// references by minimum, so one plain read keeps a binding required.
    pub kind: RefKind,
}

/// One value a sequence publishes.
#[derive(Clone, Debug, PartialEq)]
pub struct ClosureOutput {
    /// The dotted source name: a declaration's name, or `alias.output` for
    /// a call result.
    pub name: String,
    /// The published type, already lifted through any conditional
    /// (`Optional`) or scatter (`Array`) the binding sits inside.
    pub ty: Type,
    /// The defining expression, for outputs the runtime re-evaluates.
    pub expr: Option<Expr>,
}

/// Computes everything `elements` publishes, in source order.
///
/// Declarations publish themselves; calls publish one output per callee
/// output under `alias.output`; conditional bodies republish their outputs
/// as `Optional`; scatter bodies republish theirs as arrays, non-empty
/// exactly when the scattered collection is.
pub fn outputs(elements: &[WorkflowElement]) -> Result<Vec<ClosureOutput>, ClosureError> {
    let mut published: IndexMap<String, ClosureOutput> = IndexMap::new();

    fn publish(
        published: &mut IndexMap<String, ClosureOutput>,
        output: ClosureOutput,
    ) -> Result<(), ClosureError> {
        match published.get(&output.name) {
            None => {
                published.insert(output.name.clone(), output);
                Ok(())
            }
            Some(existing) if existing.ty == output.ty => Ok(()),
            Some(existing) => Err(ClosureError::OutputCollision {
                name: output.name,
                first: existing.ty.to_string(),
                second: output.ty.to_string(),
            }),
        }
    }

    fn walk(
        published: &mut IndexMap<String, ClosureOutput>,
        elements: &[WorkflowElement],
        lift: &dyn Fn(&Type) -> Type,
    ) -> Result<(), ClosureError> {
        for element in elements {
            match element {
                WorkflowElement::Declaration(decl) => publish(
                    published,
                    ClosureOutput {
                        name: decl.name.clone(),
                        ty: lift(&decl.ty),
                        expr: decl.expr.clone(),
                    },
                )?,
                WorkflowElement::Call(call) => {
                    for (output, ty) in &call.callee.outputs {
                        publish(
                            published,
                            ClosureOutput {
                                name: format!("{}.{output}", call.addressed_name()),
                                ty: lift(ty),
                                expr: None,
                            },
                        )?;
                    }
                }
                WorkflowElement::Conditional(cond) => {
                    let lift = move |ty: &Type| lift(&ty.ensure_optional());
                    walk(published, &cond.body, &lift)?;
                }
                WorkflowElement::Scatter(scatter) => {
                    let non_empty = scatter.non_empty();
                    let lift = move |ty: &Type| {
                        lift(
                            &Type::Array {
                                items: Box::new(ty.clone()),
                                non_empty,
                            }
                            .normalize(),
                        )
                    };
                    walk(published, &scatter.body, &lift)?;
                }
            }
        }
        Ok(())
    }

    walk(&mut published, elements, &|ty| ty.clone())?;
    Ok(published.into_values().collect())
}

/// Computes everything `elements` reads from outside itself, in source
/// order.
///
/// `computed` names bindings supplied by the *surrounding construct* (a
/// scatter variable, when analyzing the scatter's body on its own); they
/// report as [`RefKind::Computed`] inputs rather than being dropped.
pub fn inputs(
    elements: &[WorkflowElement],
    computed: &[(String, Type)],
) -> Result<Vec<ClosureInput>, ClosureError> {
    let mut bound = HashSet::new();
    collect_bound_names(elements, &mut bound);

    let mut merged: IndexMap<String, ClosureInput> = IndexMap::new();
    let mut refs = Vec::new();
    collect_refs(elements, &mut refs);

    for r in refs {
        let head = r.path[0].clone();
        if bound.contains(&head) {
            continue;
        }

        let (name, ty, kind) = match computed.iter().find(|(name, _)| *name == head) {
            // A reference to a construct-supplied binding: reported whole,
            // under the binding's own name and type.
            Some((name, ty)) => (name.clone(), ty.clone(), RefKind::Computed),
            None => (r.path.join("."), r.ty, r.kind),
        };

        match merged.get_mut(&name) {
            None => {
                merged.insert(name.clone(), ClosureInput { name, ty, kind });
            }
            Some(existing) if existing.ty == ty => {
                existing.kind = existing.kind.min(kind);
            }
            Some(existing) => {
                return Err(ClosureError::ConflictingTypes {
                    name,
                    first: existing.ty.to_string(),
                    second: ty.to_string(),
                });
            }
        }
    }

    Ok(merged.into_values().collect())
}

/// Computes both halves of the closure: what `elements` needs and what it
/// publishes.
pub fn closure(
    elements: &[WorkflowElement],
) -> Result<(Vec<ClosureInput>, Vec<ClosureOutput>), ClosureError> {
    Ok((inputs(elements, &[])?, outputs(elements)?))
}

/// Every name bound anywhere inside `elements`: declarations, call
/// aliases, and scatter variables (within their own bodies, but a sibling
/// reference to one is a front-end bug, so the whole set is safe to use
/// for filtering).
fn collect_bound_names(elements: &[WorkflowElement], bound: &mut HashSet<String>) {
    for element in elements {
        match element {
            WorkflowElement::Declaration(decl) => {
                bound.insert(decl.name.clone());
            }
            WorkflowElement::Call(call) => {
                bound.insert(call.addressed_name().to_string());
            }
            WorkflowElement::Conditional(cond) => collect_bound_names(&cond.body, bound),
            WorkflowElement::Scatter(scatter) => {
                bound.insert(scatter.variable.clone());
                collect_bound_names(&scatter.body, bound);
            }
        }
    }
}

/// Every free-variable reference in `elements`' expressions, in source
/// order, call outputs expanded.
fn collect_refs(elements: &[WorkflowElement], refs: &mut Vec<ExprRef>) {
    for element in elements {
        match element {
            WorkflowElement::Declaration(decl) => {
                if let Some(expr) = &decl.expr {
                    refs.extend(expr.free_variables(true));
                }
            }
            WorkflowElement::Call(call) => {
                for expr in call.inputs.values() {
                    refs.extend(expr.free_variables(true));
                }
            }
            WorkflowElement::Conditional(cond) => {
                refs.extend(cond.expr.free_variables(true));
                collect_refs(&cond.body, refs);
            }
            WorkflowElement::Scatter(scatter) => {
                refs.extend(scatter.collection.free_variables(true));
                collect_refs(&scatter.body, refs);
            }
        }
    }
}
