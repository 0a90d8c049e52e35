//! The typed document models the front-ends hand to the engine.
//!
//! These are post-type-checking shapes: every declaration and expression
//! carries its checked type, and every call site carries the resolved
//! signature of its callee. Grammar-level concerns (imports, syntax
//! versions, placeholder options) never reach this layer.

use std::fmt::{self, Display};

use dxforge_ir::callable::{CallableAttribute, NativeRef, ParameterAttribute};
use dxforge_ir::types::Type;
use indexmap::IndexMap;

use crate::expr::Expr;

/// The source language a document was written in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceLanguage {
    /// The statically-typed task/workflow language.
    Wdl,
    /// The JSON/YAML tool/step language.
    Cwl,
}

impl Display for SourceLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLanguage::Wdl => write!(f, "wdl"),
            SourceLanguage::Cwl => write!(f, "cwl"),
        }
    }
}

/// A typed variable declaration, with its defining expression when the
/// source provides one.
#[derive(Clone, Debug, PartialEq)]
pub struct Declaration {
    /// The declared name.
    pub name: String,
    /// The declared type.
    pub ty: Type,
    /// The defining (or default) expression, if any.
    pub expr: Option<Expr>,
}

impl Declaration {
    /// A declaration with no defining expression.
    pub fn input(name: impl Into<String>, ty: Type) -> Self {
        Declaration {
            name: name.into(),
            ty,
            expr: None,
        }
    }

    /// A declaration bound to an expression.
    pub fn bound(name: impl Into<String>, ty: Type, expr: Expr) -> Self {
        Declaration {
            name: name.into(),
            ty,
            expr: Some(expr),
        }
    }
}

/// The resolved interface of a call's target, as the front-end's resolver
/// found it. Carrying the signature here keeps the engine free of any
/// name-resolution logic.
#[derive(Clone, Debug, PartialEq)]
pub struct CalleeSignature {
    /// The callee's name in the bundle.
    pub name: String,
    /// Input names and types, in declaration order.
    pub inputs: Vec<(String, Type)>,
    /// Output names and types, in declaration order.
    pub outputs: Vec<(String, Type)>,
}

/// A call site.
#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    /// The resolved callee.
    pub callee: CalleeSignature,
    /// The alias the call is addressed by, when the source renames it.
    pub alias: Option<String>,
    /// The supplied inputs, keyed by callee input name, in source order.
    pub inputs: IndexMap<String, Expr>,
}

impl Call {
    /// The name this call's outputs are addressed by: the alias when
    /// present, the callee name otherwise.
    pub fn addressed_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.callee.name)
    }

    /// Whether every supplied input is trivial (and the call can become a
    /// plain stage with no helper applet).
    pub fn all_inputs_trivial(&self) -> bool {
        self.inputs.values().all(Expr::is_trivial)
    }
}

/// A conditional section.
#[derive(Clone, Debug, PartialEq)]
pub struct Conditional {
    /// The condition.
    pub expr: Expr,
    /// The guarded body.
    pub body: Vec<WorkflowElement>,
}

/// A scatter section.
#[derive(Clone, Debug, PartialEq)]
pub struct Scatter {
    /// The loop variable bound inside the body.
    pub variable: String,
    /// The collection iterated over.
    pub collection: Expr,
    /// The repeated body.
    pub body: Vec<WorkflowElement>,
}

impl Scatter {
    /// The item type the loop variable takes inside the body.
    pub fn item_type(&self) -> Type {
        match &self.collection.ty {
            Type::Array { items, .. } => (**items).clone(),
            // The checker guarantees an array; anything else reads as Any.
            _ => Type::Any,
        }
    }

    /// Whether the source collection is known non-empty, which propagates
    /// to gathered output arrays.
    pub fn non_empty(&self) -> bool {
        matches!(
            self.collection.ty,
            Type::Array { non_empty: true, .. }
        )
    }
}

/// One element of a workflow body.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkflowElement {
    /// A declaration.
    Declaration(Declaration),
    /// A call.
    Call(Call),
    /// A conditional section.
    Conditional(Conditional),
    /// A scatter section.
    Scatter(Scatter),
}

impl WorkflowElement {
    /// Whether this element, or anything nested inside it, is a call.
    pub fn contains_call(&self) -> bool {
        match self {
            WorkflowElement::Declaration(_) => false,
            WorkflowElement::Call(_) => true,
            WorkflowElement::Conditional(cond) => {
                cond.body.iter().any(WorkflowElement::contains_call)
            }
            WorkflowElement::Scatter(scatter) => {
                scatter.body.iter().any(WorkflowElement::contains_call)
            }
        }
    }

    /// The number of call sites in this element, counted transitively.
    pub fn call_count(&self) -> usize {
        match self {
            WorkflowElement::Declaration(_) => 0,
            WorkflowElement::Call(_) => 1,
            WorkflowElement::Conditional(cond) => {
                cond.body.iter().map(WorkflowElement::call_count).sum()
            }
            WorkflowElement::Scatter(scatter) => {
                scatter.body.iter().map(WorkflowElement::call_count).sum()
            }
        }
    }
}

/// Resource hints from a task's runtime/requirements section, each either
/// constant-foldable or not.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RuntimeHints {
    /// A hard-coded platform instance name.
    pub instance_name: Option<Expr>,
    /// Requested CPU cores.
    pub cpu: Option<Expr>,
    /// Requested memory, in mebibytes.
    pub memory_mb: Option<Expr>,
    /// Requested disk, in gibibytes.
    pub disk_gb: Option<Expr>,
}

impl RuntimeHints {
    /// Whether no hint was given at all.
    pub fn is_empty(&self) -> bool {
        self.instance_name.is_none()
            && self.cpu.is_none()
            && self.memory_mb.is_none()
            && self.disk_gb.is_none()
    }
}

/// A typed task (or tool): one command with typed I/O.
#[derive(Clone, Debug, PartialEq)]
pub struct Task {
    /// The task name.
    pub name: String,
    /// Input declarations, in source order.
    pub inputs: Vec<Declaration>,
    /// Output declarations, in source order.
    pub outputs: Vec<Declaration>,
    /// Resource hints.
    pub runtime: RuntimeHints,
    /// The container image expression, if the task declares one.
    pub container: Option<Expr>,
    /// A pre-existing platform executable this task merely wraps.
    pub native: Option<NativeRef>,
    /// Human-facing metadata from the task's meta section.
    pub attributes: Vec<CallableAttribute>,
    /// Per-parameter attributes from the parameter-meta section.
    pub parameter_attributes: IndexMap<String, Vec<ParameterAttribute>>,
    /// The extracted stand-alone source for this task, including every
    /// schema it references.
    pub source: String,
}

/// A typed workflow definition.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkflowDefinition {
    /// The workflow name.
    pub name: String,
    /// Workflow input declarations.
    pub inputs: Vec<Declaration>,
    /// Workflow output declarations.
    pub outputs: Vec<Declaration>,
    /// The body elements, in source order.
    pub body: Vec<WorkflowElement>,
    /// Human-facing metadata from the workflow's meta section.
    pub attributes: Vec<CallableAttribute>,
    /// The extracted stand-alone source for this workflow.
    pub source: String,
}

/// A fully type-checked source document.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    /// The language the document was written in.
    pub language: SourceLanguage,
    /// The language version string, e.g. `1.1`.
    pub version: String,
    /// Every task in the document (and its imports), in definition order.
    pub tasks: Vec<Task>,
    /// The document's workflow, if it has one.
    pub workflow: Option<WorkflowDefinition>,
    /// Named schema types referenced anywhere in the document.
    pub type_aliases: IndexMap<String, Type>,
}

impl Document {
    /// The name of the document's primary callable: its workflow when it
    /// has one, otherwise its single task.
    pub fn primary_name(&self) -> Option<&str> {
        match (&self.workflow, self.tasks.as_slice()) {
            (Some(wf), _) => Some(&wf.name),
            (None, [task]) => Some(&task.name),
            (None, _) => None,
        }
    }
}
