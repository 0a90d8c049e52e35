//! dxforge compiles typed workflow documents into the execution platform's
//! native object model: *applets* (single-executable units) and *workflows*
//! (DAGs of stages referencing applets or sub-workflows).
//!
//! The pipeline, front to back:
//!
//! 1. a source-language front-end type-checks the source and hands over a
//!    [`dxforge_lang::ast::Document`];
//! 2. [`block`] partitions each workflow body into the coarsest units
//!    executable as single stages;
//! 3. [`closure`] computes what every block reads and publishes;
//! 4. [`translate`] lowers tasks and workflows into a
//!    [`dxforge_ir::Bundle`] of callables in dependency order;
//! 5. [`planner`] walks the bundle, digesting each build request
//!    ([`digest`]) and consulting the folder's [`directory`] to reuse,
//!    archive, delete, or build through the [`platform`] API.
//!
//! The core is one logical thread; the only suspension points are the
//! blocking platform calls, and the in-process state a compilation mutates
//! is confined to the object directory cache, the planner's result map,
//! and a lazily created scratch directory removed when the [`Compiler`]
//! drops.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use std::cell::OnceCell;
use std::path::Path;

use dxforge_ir::bundle::Bundle;
use dxforge_lang::ast::Document;
use tempfile::TempDir;

pub mod block;
pub mod closure;
pub mod config;
pub mod digest;
pub mod directory;
pub mod error;
pub mod planner;
pub mod platform;
pub mod source;
pub mod translate;

mod render;

pub use config::{CompileOptions, ConflictPolicy, Extras, InstanceTypeSelection, ReorgSetting};
pub use error::{Error, Result};
pub use planner::CompiledExecutable;
pub use platform::PlatformApi;

use directory::ObjectDirectory;
use planner::BuildPlanner;

/// One compilation session: options plus the session-owned scratch space.
///
/// The scratch directory is created on first need and removed when the
/// session drops, on success and error paths alike.
pub struct Compiler {
    options: CompileOptions,
    scratch: OnceCell<TempDir>,
}

impl Compiler {
    /// A session with the given options.
    pub fn new(options: CompileOptions) -> Self {
        Compiler {
            options,
            scratch: OnceCell::new(),
        }
    }

    /// The session's options.
    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Lowers a type-checked document into an IR bundle.
    pub fn compile(&self, doc: &Document) -> Result<Bundle> {
        translate::translate_document(doc, &self.options)
    }

    /// Builds (or reuses) every callable of a compiled bundle on the
    /// platform, in dependency order.
    pub fn deploy(
        &self,
        bundle: &Bundle,
        api: &dyn PlatformApi,
    ) -> Result<Vec<CompiledExecutable>> {
        let directory = ObjectDirectory::initialize(
            api,
            &self.options.project,
            &self.options.folder,
            self.options.project_wide_reuse,
        )?;

        let mut planner = BuildPlanner::new(api, &self.options, directory, self.scratch_dir());
        planner.apply(bundle)
    }

    /// Compiles and deploys in one step.
    pub fn compile_and_deploy(
        &self,
        doc: &Document,
        api: &dyn PlatformApi,
    ) -> Result<(Bundle, Vec<CompiledExecutable>)> {
        let bundle = self.compile(doc)?;
        let executables = self.deploy(&bundle, api)?;
        Ok((bundle, executables))
    }

    /// The lazily created scratch directory, or `None` if the filesystem
    /// refuses one (the compilation proceeds without request recording).
    fn scratch_dir(&self) -> Option<&Path> {
        if self.scratch.get().is_none() {
            match tempfile::tempdir() {
                Ok(dir) => {
                    let _ = self.scratch.set(dir);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "no scratch directory for this session");
                    return None;
                }
            }
        }
        self.scratch.get().map(|dir| dir.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_dir_is_created_once() {
        let compiler = Compiler::new(CompileOptions::new("project-1", "/builds"));
        let first = compiler.scratch_dir().map(Path::to_path_buf);
        let second = compiler.scratch_dir().map(Path::to_path_buf);
        assert!(first.is_some());
        assert_eq!(first, second);
        assert!(first.as_deref().is_some_and(Path::exists));
    }

    #[test]
    fn test_scratch_dir_is_removed_on_drop() {
        let compiler = Compiler::new(CompileOptions::new("project-1", "/builds"));
        let path = compiler.scratch_dir().map(Path::to_path_buf);
        drop(compiler);
        assert!(path.as_deref().is_some_and(|p| !p.exists()));
    }
}
