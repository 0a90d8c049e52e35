//! Compilation options and the extras side-file.
//!
//! Options arrive from the embedding CLI already parsed; the extras file is
//! the one piece of configuration the core reads itself, since its contents
//! (runtime attribute defaults, custom reorg settings, reuse exclusions)
//! feed directly into translation and planning.

use dxforge_ir::callable::InstanceRequest;
use serde::Deserialize;

use crate::error::{Error, Result};

/// What to do when the target folder already holds an executable with the
/// same name but a different digest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Archive the old entries, then build.
    #[default]
    Archive,
    /// Delete the old entries, then build.
    ForceDelete,
    /// Fail the compilation.
    Strict,
}

/// Whether all-constant resource hints resolve at compile time or at
/// runtime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InstanceTypeSelection {
    /// Fold constant hints into a static instance choice.
    #[default]
    Static,
    /// Defer every non-hardcoded choice to the runtime.
    Dynamic,
}

/// The terminal reorganization stage, if any.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ReorgSetting {
    /// No reorg stage.
    #[default]
    None,
    /// Append the built-in reorg helper.
    Standard,
    /// Append the user's own reorg applet.
    Custom {
        /// The platform id of the user's applet.
        applet_id: String,
        /// An optional configuration file passed to it, as a platform URI.
        config_uri: Option<String>,
    },
}

/// All the knobs the compiler core recognizes.
#[derive(Clone, Debug)]
pub struct CompileOptions {
    /// The target project.
    pub project: String,
    /// The target folder within the project.
    pub folder: String,
    /// Emit the top-level workflow in locked mode.
    pub locked: bool,
    /// Skip the terminal `close` on newly built workflows.
    pub leave_workflows_open: bool,
    /// The terminal reorg stage.
    pub reorg: ReorgSetting,
    /// Extend executable reuse lookup beyond the target folder.
    pub project_wide_reuse: bool,
    /// The digest-mismatch policy.
    pub conflict_policy: ConflictPolicy,
    /// The chunk size handed to scatter fragments, when bounded.
    pub scatter_chunk_size: Option<u64>,
    /// Resource defaults applied when a task specifies nothing.
    pub default_runtime_attrs: Option<InstanceRequest>,
    /// Compile-time vs runtime resolution for all-constant resource hints.
    pub instance_type_selection: InstanceTypeSelection,
    /// Callable names whose existing builds are never reused. The single
    /// entry `*` disables reuse entirely.
    pub ignore_reuse: Vec<String>,
}

impl CompileOptions {
    /// Options targeting `project:folder`, everything else defaulted.
    pub fn new(project: impl Into<String>, folder: impl Into<String>) -> Self {
        CompileOptions {
            project: project.into(),
            folder: folder.into(),
            locked: false,
            leave_workflows_open: false,
            reorg: ReorgSetting::None,
            project_wide_reuse: false,
            conflict_policy: ConflictPolicy::default(),
            scatter_chunk_size: None,
            default_runtime_attrs: None,
            instance_type_selection: InstanceTypeSelection::default(),
            ignore_reuse: Vec::new(),
        }
    }

    /// Whether reuse is disabled for the named callable.
    pub fn reuse_disabled(&self, name: &str) -> bool {
        self.ignore_reuse
            .iter()
            .any(|entry| entry == "*" || entry == name)
    }

    /// Folds an extras file into these options, checking for incompatible
    /// combinations.
    pub fn apply_extras(&mut self, extras: &Extras) -> Result<()> {
        if let Some(custom) = &extras.custom_reorg {
            if self.reorg == ReorgSetting::Standard {
                return Err(Error::Configuration(
                    "the reorg option and a custom reorg attribute cannot be combined".into(),
                ));
            }
            self.reorg = ReorgSetting::Custom {
                applet_id: custom.applet_id.clone(),
                config_uri: custom.config_uri.clone(),
            };
        }

        if let Some(attrs) = &extras.default_runtime_attributes {
            self.default_runtime_attrs = Some(attrs.clone());
        }

        if let Some(ignore) = &extras.ignore_reuse {
            self.ignore_reuse = ignore.clone();
        }

        Ok(())
    }
}

/// A custom reorg declaration in the extras file.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CustomReorgSettings {
    /// The platform id of the user's reorg applet.
    #[serde(rename = "appUri")]
    pub applet_id: String,
    /// An optional configuration file passed through to the applet.
    #[serde(rename = "confUri", default)]
    pub config_uri: Option<String>,
}

/// The extras side-file: optional compiler settings too structured for
/// command-line flags. Accepted as JSON or YAML.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Extras {
    /// Resource defaults for tasks that specify nothing.
    #[serde(default)]
    pub default_runtime_attributes: Option<InstanceRequest>,
    /// A custom reorg applet to append to compiled workflows.
    #[serde(default)]
    pub custom_reorg: Option<CustomReorgSettings>,
    /// Callable names excluded from executable reuse.
    #[serde(default)]
    pub ignore_reuse: Option<Vec<String>>,
}

impl Extras {
    /// Parses an extras file from JSON.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|err| Error::Configuration(format!("malformed extras file: {err}")))
    }

    /// Parses an extras file from YAML.
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|err| Error::Configuration(format!("malformed extras file: {err}")))
    }
}
