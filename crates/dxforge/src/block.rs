//! Decomposition of a workflow body into blocks.
//!
//! A block is a maximal contiguous run of body elements executable as a
//! single platform stage. The walk keeps an open block, appends elements
//! left to right, and seals the block after any element that (transitively)
//! contains a call, so a call site is always the *last* element of its
//! block and every block holds at most one stage-addressable call.

use std::fmt::{self, Display};

use dxforge_ir::callable::Parameter;
use dxforge_ir::types::Type;
use dxforge_ir::value::Value;
use dxforge_lang::ast::{Call, Declaration, WorkflowElement};
use dxforge_lang::expr::{ConstEval, Expr, RefKind};
use dxname::EncodedName;

use crate::closure::{self, ClosureInput, ClosureOutput};
use crate::error::{Error, Result};

/// How a block executes on the platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    /// Declarations only; a fragment evaluates them, no call is launched.
    ExpressionsOnly,
    /// A lone call whose inputs are all trivial; becomes a plain stage
    /// referencing the callee directly.
    CallDirect,
    /// A lone call with at least one non-trivial input; a fragment
    /// evaluates the inputs and launches the callee.
    CallWithSubexpressions,
    /// Declarations followed by a call; a fragment evaluates everything
    /// and launches the callee.
    CallFragment,
    /// A conditional whose body is a single simple call.
    ConditionalOneCall,
    /// A conditional needing a sub-workflow for its body.
    ConditionalComplex,
    /// A scatter whose body is a single simple call.
    ScatterOneCall,
    /// A scatter needing a sub-workflow for its body.
    ScatterComplex,
}

impl BlockKind {
    /// Whether blocks of this kind compile to a plain stage without a
    /// runtime fragment helper.
    pub fn is_direct(&self) -> bool {
        matches!(self, BlockKind::CallDirect)
    }

    /// Whether the block's last element needs a generated sub-workflow.
    pub fn needs_subworkflow(&self) -> bool {
        matches!(
            self,
            BlockKind::ConditionalComplex | BlockKind::ScatterComplex
        )
    }
}

impl Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockKind::ExpressionsOnly => "expressions-only",
            BlockKind::CallDirect => "call-direct",
            BlockKind::CallWithSubexpressions => "call-with-subexpressions",
            BlockKind::CallFragment => "call-fragment",
            BlockKind::ConditionalOneCall => "conditional-one-call",
            BlockKind::ConditionalComplex => "conditional-complex",
            BlockKind::ScatterOneCall => "scatter-one-call",
            BlockKind::ScatterComplex => "scatter-complex",
        };
        write!(f, "{name}")
    }
}

/// How one block input is supplied.
#[derive(Clone, Debug, PartialEq)]
pub enum BlockInput {
    /// The caller must supply the value.
    Required {
        /// The platform-safe input name.
        name: EncodedName,
        /// The input's type.
        ty: Type,
    },
    /// The caller may omit the value; the declared default folded to a
    /// constant at compile time.
    StaticDefault {
        /// The platform-safe input name.
        name: EncodedName,
        /// The input's type.
        ty: Type,
        /// The folded default.
        default: Value,
    },
    /// The caller may omit the value; the default expression did not fold,
    /// so the runtime evaluates it when the value is absent. The type is
    /// optional-lifted accordingly.
    DynamicDefault {
        /// The platform-safe input name.
        name: EncodedName,
        /// The optional-lifted type.
        ty: Type,
        /// The default expression, evaluated at runtime on omission.
        expr: Expr,
    },
    /// The caller may omit the value and there is no default.
    Optional {
        /// The platform-safe input name.
        name: EncodedName,
        /// The (optional) type.
        ty: Type,
    },
}

impl BlockInput {
    /// Classifies a workflow-level input declaration.
    pub fn from_declaration(decl: &Declaration) -> Result<Self> {
        let name = EncodedName::encode(&decl.name)?;

        match &decl.expr {
            None if decl.ty.is_optional() => Ok(BlockInput::Optional {
                name,
                ty: decl.ty.clone(),
            }),
            None => Ok(BlockInput::Required {
                name,
                ty: decl.ty.clone(),
            }),
            Some(expr) => match expr.const_eval(&decl.ty) {
                ConstEval::Constant(default) if !references_local_path(&default) => {
                    Ok(BlockInput::StaticDefault {
                        name,
                        ty: decl.ty.clone(),
                        default,
                    })
                }
                // Either genuinely dynamic, or a constant naming a local
                // path the built object could not resolve; both demote to
                // an optional the runtime fills in.
                _ => Ok(BlockInput::DynamicDefault {
                    name,
                    ty: decl.ty.ensure_optional(),
                    expr: expr.clone(),
                }),
            },
        }
    }

    /// Classifies a closure input of a block or body.
    pub fn from_closure(input: &ClosureInput) -> Result<Self> {
        let name = EncodedName::encode(&input.name)?;
        match input.kind {
            RefKind::Optional => Ok(BlockInput::Optional {
                name,
                ty: input.ty.ensure_optional(),
            }),
            RefKind::Required | RefKind::Computed if input.ty.is_optional() => {
                Ok(BlockInput::Optional {
                    name,
                    ty: input.ty.clone(),
                })
            }
            RefKind::Required | RefKind::Computed => Ok(BlockInput::Required {
                name,
                ty: input.ty.clone(),
            }),
        }
    }

    /// The input's platform-safe name.
    pub fn name(&self) -> &EncodedName {
        match self {
            BlockInput::Required { name, .. }
            | BlockInput::StaticDefault { name, .. }
            | BlockInput::DynamicDefault { name, .. }
            | BlockInput::Optional { name, .. } => name,
        }
    }

    /// The input's type, defaults applied.
    pub fn ty(&self) -> &Type {
        match self {
            BlockInput::Required { ty, .. }
            | BlockInput::StaticDefault { ty, .. }
            | BlockInput::DynamicDefault { ty, .. }
            | BlockInput::Optional { ty, .. } => ty,
        }
    }

    /// Renders the input as an applet/workflow parameter.
    pub fn to_parameter(&self) -> Parameter {
        let mut parameter = Parameter::new(self.name().clone(), self.ty().clone());
        if let BlockInput::StaticDefault { default, .. } = self {
            parameter.default = Some(default.clone());
        }
        parameter
    }
}

/// Whether a constant references a local filesystem path, which a built
/// object cannot resolve at runtime.
pub(crate) fn references_local_path(value: &Value) -> bool {
    fn is_local(uri: &str) -> bool {
        !uri.contains("://")
    }

    match value {
        Value::File(file) => is_local(&file.uri),
        Value::Folder { uri, .. } | Value::Archive { uri, .. } => is_local(uri),
        Value::Listing { items, .. } | Value::Array(items) => {
            items.iter().any(references_local_path)
        }
        Value::Hash(members) => members.values().any(references_local_path),
        _ => false,
    }
}

/// One block: its elements, its kind, and its computed closure.
#[derive(Clone, Debug)]
pub struct Block {
    /// The elements, in source order; any call site is in the last one.
    pub elements: Vec<WorkflowElement>,
    /// The block's execution kind.
    pub kind: BlockKind,
    /// What the block reads from its surroundings.
    pub inputs: Vec<BlockInput>,
    /// What the block publishes.
    pub outputs: Vec<ClosureOutput>,
}

impl Block {
    /// The single stage-addressable call of a non-complex call block.
    ///
    /// Complex conditional/scatter blocks delegate their calls to a
    /// sub-workflow and have no directly addressable call.
    pub fn single_call(&self) -> Option<&Call> {
        match (self.kind, self.elements.last()) {
            (
                BlockKind::CallDirect | BlockKind::CallWithSubexpressions | BlockKind::CallFragment,
                Some(WorkflowElement::Call(call)),
            ) => Some(call),
            (BlockKind::ConditionalOneCall, Some(WorkflowElement::Conditional(cond))) => {
                match cond.body.as_slice() {
                    [WorkflowElement::Call(call)] => Some(call),
                    _ => None,
                }
            }
            (BlockKind::ScatterOneCall, Some(WorkflowElement::Scatter(scatter))) => {
                match scatter.body.as_slice() {
                    [WorkflowElement::Call(call)] => Some(call),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// Partitions a workflow body into blocks.
///
/// Walks the elements left to right, sealing the open block after every
/// element that transitively contains a call; empty partitions are dropped
/// after the walk. Each block's kind and closure are computed on the way
/// out.
pub fn split_into_blocks(elements: &[WorkflowElement]) -> Result<Vec<Block>> {
    let mut partitions: Vec<Vec<WorkflowElement>> = Vec::new();
    let mut open: Vec<WorkflowElement> = Vec::new();

    for element in elements {
        let seals = element.contains_call();
        open.push(element.clone());
        if seals {
            partitions.push(std::mem::take(&mut open));
        }
    }
    if !open.is_empty() {
        partitions.push(open);
    }

    partitions
        .into_iter()
        .map(|elements| {
            let kind = classify(&elements)?;
            tracing::debug!(%kind, elements = elements.len(), "sealed block");

            let (closure_inputs, outputs) = closure::closure(&elements)?;
            let inputs = closure_inputs
                .iter()
                .map(BlockInput::from_closure)
                .collect::<Result<Vec<_>>>()?;

            Ok(Block {
                elements,
                kind,
                inputs,
                outputs,
            })
        })
        .collect()
}

fn classify(elements: &[WorkflowElement]) -> Result<BlockKind> {
    let Some((last, init)) = elements.split_last() else {
        return Err(Error::Internal("empty block partition".into()));
    };

    // The walk seals a block on the first call-containing element, so a
    // call anywhere earlier is a builder invariant violation.
    if init.iter().any(WorkflowElement::contains_call) {
        return Err(Error::BlockShape(
            "a call-containing element is not the last element of its block".into(),
        ));
    }

    if !last.contains_call() {
        return Ok(BlockKind::ExpressionsOnly);
    }

    Ok(match last {
        WorkflowElement::Call(call) if init.is_empty() && call.all_inputs_trivial() => {
            BlockKind::CallDirect
        }
        WorkflowElement::Call(_) if init.is_empty() => BlockKind::CallWithSubexpressions,
        WorkflowElement::Call(_) => BlockKind::CallFragment,
        WorkflowElement::Conditional(cond) => {
            if is_single_simple_call(&cond.body) {
                BlockKind::ConditionalOneCall
            } else {
                BlockKind::ConditionalComplex
            }
        }
        WorkflowElement::Scatter(scatter) => {
            if is_single_simple_call(&scatter.body) {
                BlockKind::ScatterOneCall
            } else {
                BlockKind::ScatterComplex
            }
        }
        WorkflowElement::Declaration(_) => {
            return Err(Error::Internal(
                "declaration classified as call-containing".into(),
            ));
        }
    })
}

fn is_single_simple_call(body: &[WorkflowElement]) -> bool {
    matches!(body, [WorkflowElement::Call(call)] if call.all_inputs_trivial())
}
