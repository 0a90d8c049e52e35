//! Lowering of typed documents into the IR bundle.
//!
//! Task translation and workflow translation live in their own modules;
//! this module owns the per-language dispatch and the document-level
//! assembly into a [`Bundle`].

use dxforge_ir::bundle::Bundle;
use dxforge_ir::callable::Callable;
use dxforge_lang::ast::{Document, SourceLanguage};

use crate::config::CompileOptions;
use crate::error::Result;

pub(crate) mod task;
pub(crate) mod workflow;

/// Per-language translation conventions.
///
/// Both languages share the whole lowering machinery; what differs is
/// document-level convention, selected here rather than probed for.
struct LanguageRules {
    /// Whether workflows in this language always compile locked,
    /// regardless of the `locked` option.
    always_locked: bool,
}

fn rules_for(language: SourceLanguage) -> LanguageRules {
    match language {
        SourceLanguage::Wdl => LanguageRules {
            always_locked: false,
        },
        SourceLanguage::Cwl => LanguageRules {
            always_locked: true,
        },
    }
}

/// Lowers a type-checked document into a bundle: one application per task,
/// the workflow (with its generated helpers and sub-workflows) when
/// present, dependency-ordered with the document's primary on top.
pub fn translate_document(doc: &Document, options: &CompileOptions) -> Result<Bundle> {
    let rules = rules_for(doc.language);

    let mut callables: Vec<Callable> = Vec::new();
    for task_def in &doc.tasks {
        callables.push(Callable::Application(task::translate_task(
            task_def,
            options,
            doc.language,
        )?));
    }

    if let Some(wf) = &doc.workflow {
        let locked = options.locked || rules.always_locked;
        let translator = workflow::WorkflowTranslator::new(options, doc.language);
        callables.extend(translator.translate_top(wf, locked)?);
    }

    let primary = doc.primary_name().map(String::from);
    tracing::debug!(
        language = %doc.language,
        callables = callables.len(),
        primary = ?primary,
        "document translated"
    );

    Bundle::new(callables, primary, doc.type_aliases.clone()).map_err(Into::into)
}
