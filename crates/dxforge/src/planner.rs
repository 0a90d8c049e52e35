//! The build planner: content-addressed reuse, conflict handling, and
//! dependency-ordered building.
//!
//! The planner walks `bundle.dependencies()` front to back, so every
//! callee is compiled (or resolved) before anything that launches it.
//! Each non-native callable is rendered, digested, and either reused from
//! the object directory or built through the platform API. The planner is
//! single-threaded and deterministic given the same bundle and directory
//! state.

use std::path::Path;

use dxforge_ir::bundle::Bundle;
use dxforge_ir::callable::{ApplicationKind, Callable, NativeRef};
use indexmap::IndexMap;
use serde_json::{Value as Json, json};

use crate::config::{CompileOptions, ConflictPolicy};
use crate::digest::digest_request;
use crate::directory::{ObjectDirectory, ObjectRecord};
use crate::error::{Error, Result};
use crate::platform::{ObjectClass, PlatformApi, retry};
use crate::render;

/// One callable after planning: its platform id plus how it was wired.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledExecutable {
    /// The callable's bundle name.
    pub name: String,
    /// The platform id it resolved or built to.
    pub id: String,
    /// The build-request digest; absent for native references.
    pub digest: Option<String>,
    /// Platform ids of the callable's direct callees.
    pub dependency_links: IndexMap<String, String>,
    /// For workflows, the nested tree of stages and executables.
    pub execution_tree: Option<Json>,
}

/// Plans and executes the builds for one bundle.
pub struct BuildPlanner<'a> {
    api: &'a dyn PlatformApi,
    options: &'a CompileOptions,
    directory: ObjectDirectory<'a>,
    scratch: Option<&'a Path>,
}

impl<'a> BuildPlanner<'a> {
    /// A planner over an initialized object directory. `scratch`, when
    /// available, receives a copy of every rendered build request for
    /// postmortems.
    pub fn new(
        api: &'a dyn PlatformApi,
        options: &'a CompileOptions,
        directory: ObjectDirectory<'a>,
        scratch: Option<&'a Path>,
    ) -> Self {
        BuildPlanner {
            api,
            options,
            directory,
            scratch,
        }
    }

    /// Builds (or reuses) every callable in dependency order.
    ///
    /// On failure at callable *k*, callables before *k* remain built on
    /// the platform; content-addressed reuse makes the next compilation
    /// pick them up for free.
    pub fn apply(&mut self, bundle: &Bundle) -> Result<Vec<CompiledExecutable>> {
        let mut compiled: IndexMap<String, CompiledExecutable> = IndexMap::new();

        for name in bundle.dependencies() {
            let callable = bundle
                .get(name)
                .ok_or_else(|| Error::Internal(format!("`{name}` missing from bundle")))?;
            let executable = self.plan_one(bundle, callable, &compiled)?;
            compiled.insert(name.clone(), executable);
        }

        Ok(compiled.into_values().collect())
    }

    fn plan_one(
        &mut self,
        bundle: &Bundle,
        callable: &Callable,
        compiled: &IndexMap<String, CompiledExecutable>,
    ) -> Result<CompiledExecutable> {
        let name = callable.name().to_string();

        // Pre-existing executables are resolved, never built.
        if let Callable::Application(app) = callable {
            match &app.kind {
                ApplicationKind::Native(reference) => {
                    return self.resolve_native(&name, reference);
                }
                ApplicationKind::WorkflowCustomReorg { applet_id } => {
                    let found = retry("describe", || self.api.describe(applet_id))?;
                    return Ok(CompiledExecutable {
                        name,
                        id: found.id,
                        digest: None,
                        dependency_links: IndexMap::new(),
                        execution_tree: None,
                    });
                }
                _ => (),
            }
        }

        let dependency_links = callable
            .callees()
            .into_iter()
            .map(|callee| {
                compiled
                    .get(callee)
                    .map(|c| (callee.to_string(), c.id.clone()))
                    .ok_or_else(|| {
                        Error::Internal(format!("`{callee}` was not compiled before `{name}`"))
                    })
            })
            .collect::<Result<IndexMap<_, _>>>()?;

        let request = match callable {
            Callable::Application(app) => {
                render::applet_request(app, self.options, &dependency_links)?
            }
            Callable::Workflow(wf) => {
                render::workflow_request(wf, self.options, &dependency_links, bundle)?
            }
        };
        let (request, digest) = digest_request(&request);
        self.record_request(&name, &request);

        // Exact-match reuse.
        if !self.options.reuse_disabled(&name)
            && let Some(record) = self.directory.lookup_reusable(&name, &digest)
        {
            tracing::debug!(name = %name, id = %record.id, "reusing existing executable");
            let id = record.id.clone();
            return Ok(CompiledExecutable {
                execution_tree: self.execution_tree(callable, &id, &dependency_links, compiled),
                name,
                id,
                digest: Some(digest),
                dependency_links,
            });
        }

        // Same name, different digest: the conflict policy decides.
        let stale: Vec<ObjectRecord> = self
            .directory
            .lookup(&name)
            .iter()
            .filter(|record| record.digest.as_deref() != Some(digest.as_str()))
            .cloned()
            .collect();
        if !stale.is_empty() {
            match self.options.conflict_policy {
                ConflictPolicy::Archive => {
                    tracing::debug!(name = %name, count = stale.len(), "archiving conflicting builds");
                    self.directory.archive(&name, &stale)?;
                }
                ConflictPolicy::ForceDelete => {
                    tracing::debug!(name = %name, count = stale.len(), "deleting conflicting builds");
                    self.directory.remove(&name, &stale)?;
                }
                ConflictPolicy::Strict => {
                    return Err(Error::ExecutableConflict(format!(
                        "`{name}` already exists in {}:{} with a different digest",
                        self.options.project, self.options.folder
                    )));
                }
            }
        }

        let (id, class) = match callable {
            Callable::Application(_) => {
                let id = retry("applet-new", || {
                    self.api.applet_new(&self.options.project, &request)
                })?;
                (id, ObjectClass::Applet)
            }
            Callable::Workflow(_) => {
                let id = retry("workflow-new", || {
                    self.api.workflow_new(&self.options.project, &request)
                })?;
                if !self.options.leave_workflows_open {
                    retry("close", || self.api.close(&id))?;
                }
                (id, ObjectClass::Workflow)
            }
        };
        tracing::debug!(name = %name, id = %id, "built executable");

        self.directory
            .insert(&name, &id, &digest, &self.options.folder, class);

        Ok(CompiledExecutable {
            execution_tree: self.execution_tree(callable, &id, &dependency_links, compiled),
            name,
            id,
            digest: Some(digest),
            dependency_links,
        })
    }

    fn resolve_native(&self, name: &str, reference: &NativeRef) -> Result<CompiledExecutable> {
        let found = match reference {
            NativeRef::Id(id) => retry("describe", || self.api.describe(id))?,
            NativeRef::Path(path) => retry("resolveDataObjects", || {
                self.api.resolve_path(&self.options.project, path)
            })?,
            NativeRef::AppName(app) => retry("findApps", || self.api.resolve_app(app))?,
        };

        tracing::debug!(name = %name, id = %found.id, "resolved native executable");
        Ok(CompiledExecutable {
            name: name.into(),
            id: found.id,
            digest: None,
            dependency_links: IndexMap::new(),
            execution_tree: None,
        })
    }

    /// The nested stage/executable tree of a compiled workflow, for
    /// user-facing inspection.
    fn execution_tree(
        &self,
        callable: &Callable,
        id: &str,
        dependency_links: &IndexMap<String, String>,
        compiled: &IndexMap<String, CompiledExecutable>,
    ) -> Option<Json> {
        let Callable::Workflow(wf) = callable else {
            return None;
        };

        let stages: Vec<Json> = wf
            .stages
            .iter()
            .map(|stage| {
                let mut entry = json!({
                    "id": stage.id.as_str(),
                    "callee": stage.callee,
                    "executable": dependency_links.get(&stage.callee),
                });
                if let Some(subtree) = compiled
                    .get(&stage.callee)
                    .and_then(|c| c.execution_tree.clone())
                    && let Some(object) = entry.as_object_mut()
                {
                    object.insert("tree".into(), subtree);
                }
                entry
            })
            .collect();

        Some(json!({
            "name": wf.name,
            "id": id,
            "stages": stages,
        }))
    }

    fn record_request(&self, name: &str, request: &Json) {
        let Some(scratch) = self.scratch else {
            return;
        };
        let path = scratch.join(format!("{name}.json"));
        if let Err(err) = std::fs::write(&path, request.to_string()) {
            tracing::warn!(name = %name, error = %err, "could not record build request");
        }
    }
}
