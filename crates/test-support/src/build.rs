//! Builders for the typed-AST shapes a front-end normally produces.
//!
//! Tests assemble small but realistic documents from these: `Int`-typed
//! tasks with a single `result` output, calls wired by name, and workflows
//! around them.

use dxforge_ir::types::Type;
use dxforge_lang::ast::{
    Call, CalleeSignature, Declaration, Document, RuntimeHints, SourceLanguage, Task,
    WorkflowDefinition, WorkflowElement,
};
use dxforge_lang::expr::Expr;
use indexmap::IndexMap;

/// A task with `Int` inputs and a single `Int` output named `result`.
pub fn int_task(name: &str, inputs: &[&str]) -> Task {
    Task {
        name: name.into(),
        inputs: inputs
            .iter()
            .map(|input| Declaration::input(*input, Type::Int))
            .collect(),
        outputs: vec![Declaration::bound(
            "result",
            Type::Int,
            Expr::apply("read_int", vec![], Type::Int),
        )],
        runtime: RuntimeHints::default(),
        container: None,
        native: None,
        attributes: Vec::new(),
        parameter_attributes: IndexMap::new(),
        source: format!("task {name} {{ }}"),
    }
}

/// The resolved signature of a task, as a call site carries it.
pub fn signature_of(task: &Task) -> CalleeSignature {
    CalleeSignature {
        name: task.name.clone(),
        inputs: task
            .inputs
            .iter()
            .map(|decl| (decl.name.clone(), decl.ty.clone()))
            .collect(),
        outputs: task
            .outputs
            .iter()
            .map(|decl| (decl.name.clone(), decl.ty.clone()))
            .collect(),
    }
}

/// A call to `task`, inputs supplied in declaration order.
pub fn call(task: &Task, args: &[(&str, Expr)]) -> WorkflowElement {
    WorkflowElement::Call(Call {
        callee: signature_of(task),
        alias: None,
        inputs: args
            .iter()
            .map(|(name, expr)| (name.to_string(), expr.clone()))
            .collect(),
    })
}

/// A reference to a call output, e.g. `add.result`.
pub fn call_output(call_name: &str, output: &str, ty: Type) -> Expr {
    Expr::field(Expr::ident(call_name, Type::Hash), output, ty)
}

/// A workflow definition around `body`.
pub fn workflow(
    name: &str,
    inputs: Vec<Declaration>,
    outputs: Vec<Declaration>,
    body: Vec<WorkflowElement>,
) -> WorkflowDefinition {
    WorkflowDefinition {
        name: name.into(),
        inputs,
        outputs,
        body,
        attributes: Vec::new(),
        source: format!("workflow {name} {{ }}"),
    }
}

/// A one-language document holding `tasks` and an optional workflow.
pub fn document(tasks: Vec<Task>, workflow: Option<WorkflowDefinition>) -> Document {
    Document {
        language: SourceLanguage::Wdl,
        version: "1.1".into(),
        tasks,
        workflow,
        type_aliases: IndexMap::new(),
    }
}
