//! The executable object models: applications (applet-shaped) and workflows
//! (staged DAGs), plus the parameter and stage plumbing they share.
//!
//! Workflows reference their callees by *name*; the bundle's callables map
//! is the single source of truth, and platform ids are attached only by the
//! build planner. This keeps the model acyclic and serializable.

use std::fmt::{self, Display};

use dxname::EncodedName;
use serde::{Deserialize, Serialize};

use crate::types::Type;
use crate::value::Value;

/// A single typed input or output of a callable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// The platform-safe parameter name.
    pub name: EncodedName,
    /// The parameter's type.
    pub ty: Type,
    /// A constant default, when the source default folded at compile time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Presentation and validation attributes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<ParameterAttribute>,
}

impl Parameter {
    /// A parameter with no default and no attributes.
    pub fn new(name: EncodedName, ty: Type) -> Self {
        Parameter {
            name,
            ty,
            default: None,
            attributes: Vec::new(),
        }
    }

    /// Whether callers may omit this parameter.
    pub fn is_optional(&self) -> bool {
        self.ty.is_optional() || self.default.is_some()
    }
}

/// A presentation or validation attribute on a parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ParameterAttribute {
    /// A short human label.
    Label(String),
    /// Longer help text.
    Help(String),
    /// The input group the parameter is presented under.
    Group(String),
    /// The closed set of allowed values.
    Choices(Vec<Value>),
    /// Filename patterns the platform suggests files by.
    Patterns(Vec<String>),
    /// Suggested (but not enforced) values.
    Suggestions(Vec<Value>),
    /// The file parameter should be streamed rather than localized.
    Stream,
}

/// How the instance an application runs on is chosen.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum InstanceType {
    /// No hints; the platform default applies.
    Default,
    /// Resource hints exist but do not fold at compile time; the runtime
    /// evaluates them and re-launches on the selected instance.
    Dynamic,
    /// The choice is fully resolved at compile time.
    Static(InstanceRequest),
}

/// A compile-time-resolved instance selection: either a hard-coded platform
/// instance name, or folded resource hints for the platform to match.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceRequest {
    /// A hard-coded platform instance name, e.g. `mem2_ssd1_v2_x4`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Requested CPU cores.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    /// Requested memory, in mebibytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<i64>,
    /// Requested scratch disk, in gibibytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_gb: Option<i64>,
}

impl InstanceRequest {
    /// Whether no field of the request is set.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.cpu.is_none()
            && self.memory_mb.is_none()
            && self.disk_gb.is_none()
    }
}

/// The container an application's command runs in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ContainerImage {
    /// No container; the command runs on the bare instance.
    NoImage,
    /// An image stored as a platform file (`dx://project:file`); the
    /// compiler guarantees runtime access to it.
    PlatformFile(String),
    /// A network-fetched image reference, e.g. a registry path.
    Network(String),
}

/// A reference to a pre-existing platform executable not built by us.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NativeRef {
    /// A concrete object id, e.g. `applet-xxxx`.
    Id(String),
    /// A project-relative path to resolve.
    Path(String),
    /// A published app name.
    AppName(String),
}

/// What an application *is*: a user task, a native reference, or one of the
/// compiler-generated workflow helpers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ApplicationKind {
    /// An ordinary applet compiled from a source task/tool.
    Applet,
    /// A reference to an executable that already exists on the platform.
    Native(NativeRef),
    /// The helper that evaluates an unlocked workflow's input expressions.
    WfCommonInputs,
    /// A runtime fragment: evaluates one block's expressions and launches
    /// its single call site.
    WfFragment {
        /// Names of the callables this fragment may launch.
        call_names: Vec<String>,
        /// The block's path from the workflow body root.
        block_path: Vec<usize>,
        /// The scatter variable, for scatter blocks.
        scatter_variable: Option<String>,
        /// The scatter chunk size, for scatter blocks.
        scatter_chunk_size: Option<u64>,
    },
    /// The helper that evaluates a workflow's output expressions.
    WfOutputs {
        /// The body path the outputs are collected at.
        block_path: Vec<usize>,
    },
    /// The output helper variant that also prepares custom-reorg inputs.
    WfCustomReorgOutputs,
    /// The built-in helper that reorganizes a finished workflow's outputs
    /// into folders, appended as the final stage.
    WfOutputReorg,
    /// A user-supplied reorganization applet appended as the final stage.
    WorkflowCustomReorg {
        /// The platform id of the user's reorg applet.
        applet_id: String,
    },
}

/// Human-facing metadata on a callable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CallableAttribute {
    /// A short title.
    Title(String),
    /// A one-line summary.
    Summary(String),
    /// A long description.
    Description(String),
    /// Notes addressed to developers rather than users.
    DeveloperNotes(String),
    /// The source-declared version of the callable.
    Version(String),
}

/// A platform capability an application needs at runtime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Requirement {
    /// Outbound network access to the given hosts (`*` for all).
    Network(Vec<String>),
    /// Access to the parent project.
    ProjectAccess(AccessLevel),
    /// Access to all of the user's projects.
    AllProjectsAccess(AccessLevel),
    /// Developer access to the executing user's apps.
    Developer,
    /// Permission to create new projects.
    ProjectCreation,
}

/// A platform access level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessLevel {
    /// Read-only visibility.
    View,
    /// Upload of new objects.
    Upload,
    /// Contribute-level write access.
    Contribute,
    /// Full administration.
    Administer,
}

impl Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessLevel::View => write!(f, "VIEW"),
            AccessLevel::Upload => write!(f, "UPLOAD"),
            AccessLevel::Contribute => write!(f, "CONTRIBUTE"),
            AccessLevel::Administer => write!(f, "ADMINISTER"),
        }
    }
}

/// The stand-alone source embedded into a built object, so the runtime can
/// re-evaluate the callable without any other context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// The source language tag (`wdl` or `cwl`).
    pub language: String,
    /// The extracted, self-contained source text.
    pub text: String,
}

/// A single-executable unit: one applet on the platform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Application {
    /// The applet name (unique within the bundle).
    pub name: String,
    /// Input parameters, in declaration order.
    pub inputs: Vec<Parameter>,
    /// Output parameters, in declaration order.
    pub outputs: Vec<Parameter>,
    /// How the run instance is chosen.
    pub instance_type: InstanceType,
    /// The container the command runs in.
    pub container: ContainerImage,
    /// What this application is.
    pub kind: ApplicationKind,
    /// The embedded stand-alone source, absent for native references.
    pub document: Option<SourceDocument>,
    /// Human-facing metadata.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<CallableAttribute>,
    /// Runtime capability requirements.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<Requirement>,
    /// Platform tags applied to the built object.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// The identifier of a stage within one workflow.
///
/// Ids are assigned deterministically from block order (`stage-0`,
/// `stage-1`, ...) so that workflow digests do not depend on iteration
/// order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(String);

impl StageId {
    /// The id of the `index`-th body stage.
    pub fn at(index: usize) -> Self {
        StageId(format!("stage-{index}"))
    }

    /// The id of the common-inputs helper stage.
    pub fn common() -> Self {
        StageId("stage-common".into())
    }

    /// The id of the outputs helper stage.
    pub fn outputs() -> Self {
        StageId("stage-outputs".into())
    }

    /// The id of the terminal reorg stage.
    pub fn reorg() -> Self {
        StageId("stage-reorg".into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where one stage input's value comes from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StageInput {
    /// Not wired at compile time (supplied by the launcher or the common
    /// stage at runtime).
    Empty,
    /// A constant.
    Static(Value),
    /// The named output of an earlier stage.
    Link {
        /// The producing stage.
        stage: StageId,
        /// The producing stage's output name.
        name: EncodedName,
    },
    /// A workflow-level input, by name (locked workflows only).
    WorkflowInput(EncodedName),
    /// An array assembled from several sources.
    ArrayLink(Vec<StageInput>),
}

/// One node of a workflow's DAG.
///
/// `inputs` is positional, parallel to the callee's input parameters;
/// unwired positions hold [`StageInput::Empty`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// The stage id, unique within the workflow.
    pub id: StageId,
    /// A human-readable stage name, shown by the platform.
    pub description: String,
    /// The bundle name of the callee (applet or sub-workflow).
    pub callee: String,
    /// The callee's inputs, positionally.
    pub inputs: Vec<StageInput>,
    /// The callee's outputs, copied for link resolution.
    pub outputs: Vec<Parameter>,
}

/// Whether a workflow is the compilation's entry point or a generated
/// sub-workflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowLevel {
    /// The top-level workflow the user asked to compile.
    Top,
    /// A generated, always-locked sub-workflow.
    Sub,
}

/// A DAG of stages referencing applets or sub-workflows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// The workflow name (unique within the bundle).
    pub name: String,
    /// Workflow inputs with their compile-time wiring.
    pub inputs: Vec<(Parameter, StageInput)>,
    /// Workflow outputs with the stage output each one reads.
    pub outputs: Vec<(Parameter, StageInput)>,
    /// The stages, in topological (block) order.
    pub stages: Vec<Stage>,
    /// The embedded stand-alone source.
    pub document: Option<SourceDocument>,
    /// Whether inputs/outputs are locked to the declared interface.
    pub locked: bool,
    /// Top-level or generated sub-workflow.
    pub level: WorkflowLevel,
    /// Human-facing metadata.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<CallableAttribute>,
    /// Platform tags applied to the built object.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Any compilable unit: an application or a workflow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Callable {
    /// An applet-shaped unit.
    Application(Application),
    /// A staged workflow.
    Workflow(Workflow),
}

impl Callable {
    /// The callable's bundle-unique name.
    pub fn name(&self) -> &str {
        match self {
            Callable::Application(app) => &app.name,
            Callable::Workflow(wf) => &wf.name,
        }
    }

    /// The callable's input parameters.
    pub fn input_parameters(&self) -> Vec<&Parameter> {
        match self {
            Callable::Application(app) => app.inputs.iter().collect(),
            Callable::Workflow(wf) => wf.inputs.iter().map(|(p, _)| p).collect(),
        }
    }

    /// The callable's output parameters.
    pub fn output_parameters(&self) -> Vec<&Parameter> {
        match self {
            Callable::Application(app) => app.outputs.iter().collect(),
            Callable::Workflow(wf) => wf.outputs.iter().map(|(p, _)| p).collect(),
        }
    }

    /// The bundle names of the callables this one launches.
    ///
    /// Workflows depend on their stages' callees; fragments depend on the
    /// callables they may launch at runtime. Order follows first
    /// appearance; duplicates are dropped.
    pub fn callees(&self) -> Vec<&str> {
        let mut callees: Vec<&str> = Vec::new();

        match self {
            Callable::Application(app) => {
                if let ApplicationKind::WfFragment { call_names, .. } = &app.kind {
                    for name in call_names {
                        if !callees.contains(&name.as_str()) {
                            callees.push(name);
                        }
                    }
                }
            }
            Callable::Workflow(wf) => {
                for stage in &wf.stages {
                    if !callees.contains(&stage.callee.as_str()) {
                        callees.push(&stage.callee);
                    }
                }
            }
        }

        callees
    }

    /// Whether this callable is a reference to a pre-existing executable.
    pub fn is_native(&self) -> bool {
        matches!(
            self,
            Callable::Application(Application {
                kind: ApplicationKind::Native(_),
                ..
            })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_ids_are_deterministic() {
        assert_eq!(StageId::at(0).as_str(), "stage-0");
        assert_eq!(StageId::at(12).as_str(), "stage-12");
    }

    #[test]
    fn test_callees_deduplicate_in_order() {
        let stage = |id: usize, callee: &str| Stage {
            id: StageId::at(id),
            description: callee.into(),
            callee: callee.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        };

        let wf = Callable::Workflow(Workflow {
            name: "wf".into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            stages: vec![stage(0, "add"), stage(1, "mul"), stage(2, "add")],
            document: None,
            locked: true,
            level: WorkflowLevel::Top,
            attributes: Vec::new(),
            tags: Vec::new(),
        });

        assert_eq!(wf.callees(), vec!["add", "mul"]);
    }
}
