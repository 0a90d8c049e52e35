//! Shared plumbing for dxforge's tests: an in-memory platform double that
//! records every API interaction, and builders for the typed-AST shapes
//! the front-ends normally produce.

use std::cell::RefCell;

use dxforge::digest::CHECKSUM_PROPERTY;
use dxforge::platform::{FoundObject, ObjectClass, PlatformApi, PlatformError};
use serde_json::Value as Json;

pub mod build;

#[derive(Default)]
struct State {
    objects: Vec<FoundObject>,
    calls: Vec<&'static str>,
    requests: Vec<(&'static str, Json)>,
    archived: Vec<String>,
    removed: Vec<String>,
    closed: Vec<String>,
    counter: u64,
    clock: i64,
}

/// An in-memory platform.
///
/// Objects "built" through it become findable, with their digest read back
/// out of the request's checksum property, so reuse and conflict flows
/// behave like the real service. Every call is recorded for assertions.
#[derive(Default)]
pub struct MemoryPlatform {
    state: RefCell<State>,
}

impl MemoryPlatform {
    /// An empty platform.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a pre-existing executable, as if a previous compilation had
    /// published it.
    pub fn seed_object(
        &self,
        name: &str,
        id: &str,
        digest: Option<&str>,
        created: i64,
        folder: &str,
    ) {
        self.state.borrow_mut().objects.push(FoundObject {
            name: name.into(),
            id: id.into(),
            digest: digest.map(String::from),
            created,
            folder: folder.into(),
            class: if id.starts_with("workflow-") {
                ObjectClass::Workflow
            } else {
                ObjectClass::Applet
            },
        });
    }

    /// How many times the given API route was called.
    pub fn calls_of(&self, route: &str) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|c| **c == route)
            .count()
    }

    /// How many objects were created (applets and workflows).
    pub fn created_count(&self) -> usize {
        self.calls_of("applet-new") + self.calls_of("workflow-new")
    }

    /// The build requests recorded for a route, in call order.
    pub fn requests_of(&self, route: &str) -> Vec<Json> {
        self.state
            .borrow()
            .requests
            .iter()
            .filter(|(r, _)| *r == route)
            .map(|(_, json)| json.clone())
            .collect()
    }

    /// The recorded build request with the given `name`, if any.
    pub fn request_named(&self, name: &str) -> Option<Json> {
        self.state
            .borrow()
            .requests
            .iter()
            .map(|(_, json)| json)
            .find(|json| json["name"] == Json::String(name.into()))
            .cloned()
    }

    /// Ids archived so far.
    pub fn archived_ids(&self) -> Vec<String> {
        self.state.borrow().archived.clone()
    }

    /// Ids removed so far.
    pub fn removed_ids(&self) -> Vec<String> {
        self.state.borrow().removed.clone()
    }

    /// Ids closed so far.
    pub fn closed_ids(&self) -> Vec<String> {
        self.state.borrow().closed.clone()
    }

    fn create(&self, route: &'static str, prefix: &str, request: &Json) -> String {
        let mut state = self.state.borrow_mut();
        state.calls.push(route);
        state.requests.push((route, request.clone()));

        state.counter += 1;
        state.clock += 1;
        let id = format!("{prefix}-{:04}", state.counter);

        let name = request["name"].as_str().unwrap_or_default().to_string();
        let digest = request["properties"][CHECKSUM_PROPERTY]
            .as_str()
            .map(String::from);
        let folder = request["folder"].as_str().unwrap_or("/").to_string();
        let created = state.clock;

        state.objects.push(FoundObject {
            name,
            id: id.clone(),
            digest,
            created,
            folder,
            class: if prefix == "workflow" {
                ObjectClass::Workflow
            } else {
                ObjectClass::Applet
            },
        });

        id
    }
}

impl PlatformApi for MemoryPlatform {
    fn applet_new(&self, _project: &str, request: &Json) -> Result<String, PlatformError> {
        Ok(self.create("applet-new", "applet", request))
    }

    fn workflow_new(&self, _project: &str, request: &Json) -> Result<String, PlatformError> {
        Ok(self.create("workflow-new", "workflow", request))
    }

    fn close(&self, id: &str) -> Result<(), PlatformError> {
        let mut state = self.state.borrow_mut();
        state.calls.push("close");
        state.closed.push(id.into());
        Ok(())
    }

    fn find_by_property(
        &self,
        _project: &str,
        folder: Option<&str>,
        _property: &str,
    ) -> Result<Vec<FoundObject>, PlatformError> {
        let mut state = self.state.borrow_mut();
        state.calls.push("find");
        Ok(state
            .objects
            .iter()
            .filter(|object| object.digest.is_some())
            .filter(|object| folder.is_none_or(|folder| object.folder == folder))
            .cloned()
            .collect())
    }

    fn archive(&self, _project: &str, ids: &[String]) -> Result<(), PlatformError> {
        let mut state = self.state.borrow_mut();
        state.calls.push("archive");
        state.archived.extend(ids.iter().cloned());
        state.objects.retain(|object| !ids.contains(&object.id));
        Ok(())
    }

    fn remove(&self, _project: &str, ids: &[String]) -> Result<(), PlatformError> {
        let mut state = self.state.borrow_mut();
        state.calls.push("remove");
        state.removed.extend(ids.iter().cloned());
        state.objects.retain(|object| !ids.contains(&object.id));
        Ok(())
    }

    fn resolve_path(&self, _project: &str, path: &str) -> Result<FoundObject, PlatformError> {
        self.state.borrow_mut().calls.push("resolve-path");
        let name = path.rsplit('/').next().unwrap_or(path);
        self.state
            .borrow()
            .objects
            .iter()
            .find(|object| object.name == name)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(path.into()))
    }

    fn resolve_app(&self, name: &str) -> Result<FoundObject, PlatformError> {
        self.state.borrow_mut().calls.push("resolve-app");
        self.state
            .borrow()
            .objects
            .iter()
            .find(|object| object.name == name)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(name.into()))
    }

    fn describe(&self, id: &str) -> Result<FoundObject, PlatformError> {
        self.state.borrow_mut().calls.push("describe");
        self.state
            .borrow()
            .objects
            .iter()
            .find(|object| object.id == id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(id.into()))
    }
}
