//! The directory of already-published executables in the target folder.
//!
//! Populated by a single find call for objects carrying the checksum
//! property, then cached for the whole compilation. The build planner is
//! the only consumer; all mutation (archive, remove, insert-after-build)
//! goes through this one owner.

use indexmap::IndexMap;

use crate::digest::CHECKSUM_PROPERTY;
use crate::platform::{FoundObject, ObjectClass, PlatformApi, PlatformError, retry};

/// One known platform executable with a checksum property.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectRecord {
    /// The object's name.
    pub name: String,
    /// The object's platform id.
    pub id: String,
    /// The recorded digest, if its property parsed.
    pub digest: Option<String>,
    /// Creation time, in milliseconds since the epoch.
    pub created: i64,
    /// The folder the object lives in.
    pub folder: String,
    /// Applet or workflow.
    pub class: ObjectClass,
}

impl From<FoundObject> for ObjectRecord {
    fn from(found: FoundObject) -> Self {
        ObjectRecord {
            name: found.name,
            id: found.id,
            digest: found.digest,
            created: found.created,
            folder: found.folder,
            class: found.class,
        }
    }
}

/// The per-compilation index of existing executables.
pub struct ObjectDirectory<'a> {
    api: &'a dyn PlatformApi,
    project: String,
    records: IndexMap<String, Vec<ObjectRecord>>,
}

impl<'a> ObjectDirectory<'a> {
    /// Queries the platform once and builds the index.
    ///
    /// The query is scoped to `folder` unless `project_wide` extends reuse
    /// lookup to the whole project.
    pub fn initialize(
        api: &'a dyn PlatformApi,
        project: &str,
        folder: &str,
        project_wide: bool,
    ) -> Result<Self, PlatformError> {
        let scope = (!project_wide).then_some(folder);
        let found = retry("findDataObjects", || {
            api.find_by_property(project, scope, CHECKSUM_PROPERTY)
        })?;

        let mut records: IndexMap<String, Vec<ObjectRecord>> = IndexMap::new();
        for object in found {
            records
                .entry(object.name.clone())
                .or_default()
                .push(object.into());
        }

        tracing::debug!(
            project,
            folder,
            project_wide,
            names = records.len(),
            "object directory initialized"
        );

        Ok(ObjectDirectory {
            api,
            project: project.into(),
            records,
        })
    }

    /// All known records under `name`, regardless of digest.
    pub fn lookup(&self, name: &str) -> &[ObjectRecord] {
        self.records.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The record to reuse for `name` at `digest`, if any: an exact digest
    /// match, preferring the most recently created when several match.
    pub fn lookup_reusable(&self, name: &str, digest: &str) -> Option<&ObjectRecord> {
        self.lookup(name)
            .iter()
            .filter(|record| record.digest.as_deref() == Some(digest))
            .max_by_key(|record| record.created)
    }

    /// Archives the given records and forgets them.
    pub fn archive(&mut self, name: &str, records: &[ObjectRecord]) -> Result<(), PlatformError> {
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        retry("archive", || self.api.archive(&self.project, &ids))?;
        self.forget(name, &ids);
        Ok(())
    }

    /// Removes the given records from the platform and forgets them.
    pub fn remove(&mut self, name: &str, records: &[ObjectRecord]) -> Result<(), PlatformError> {
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        retry("removeObjects", || self.api.remove(&self.project, &ids))?;
        self.forget(name, &ids);
        Ok(())
    }

    /// Records a successful build so later lookups within the same
    /// compilation can reuse it.
    pub fn insert(
        &mut self,
        name: &str,
        id: &str,
        digest: &str,
        folder: &str,
        class: ObjectClass,
    ) {
        self.records.entry(name.into()).or_default().push(ObjectRecord {
            name: name.into(),
            id: id.into(),
            digest: Some(digest.into()),
            // Newest by construction; later same-compilation lookups should
            // prefer it over anything previously found.
            created: i64::MAX,
            folder: folder.into(),
            class,
        });
    }

    fn forget(&mut self, name: &str, ids: &[String]) {
        if let Some(records) = self.records.get_mut(name) {
            records.retain(|record| !ids.contains(&record.id));
        }
    }
}

// Tests for this module live in `tests/directory.rs`: they depend on
// `test-support`, which has a dev-dependency cycle back onto `dxforge`,
// and inline unit tests here would duplicate the crate across
// compilation units.
