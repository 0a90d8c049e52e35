//! The typed AST facade between the source-language front-ends and the
//! compiler engine.
//!
//! Both front-ends (the statically-typed task/workflow language and the
//! JSON/YAML tool/step language) type-check their documents and lower them
//! into the models here. The engine never re-inspects source text: it sees
//! documents, tasks, workflows, workflow elements, and expression trees,
//! and it consumes expressions exclusively through the oracle surface on
//! [`expr::Expr`] (constant folding, free variables, triviality).

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod ast;
pub mod expr;

pub use ast::{Document, SourceLanguage, Task, WorkflowDefinition, WorkflowElement};
pub use expr::{ConstEval, Expr, ExprKind, ExprRef, RefKind};
