//! Language-neutral intermediate representation for workflow compilation.
//!
//! Both source-language front-ends lower their documents into the models in
//! this crate: a [`types::Type`]/[`value::Value`] pair describing data, a
//! [`callable::Callable`] per executable unit (an applet-shaped
//! [`callable::Application`] or a staged [`callable::Workflow`]), and a
//! [`bundle::Bundle`] aggregating the callables of one compilation in
//! dependency order.
//!
//! Everything here is purely functional: values are created during
//! translation and never mutated afterwards.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod bundle;
pub mod callable;
pub mod types;
pub mod value;
pub mod wire;

pub use bundle::Bundle;
pub use callable::{Application, Callable, Parameter, Stage, StageInput, Workflow};
pub use types::Type;
pub use value::Value;
