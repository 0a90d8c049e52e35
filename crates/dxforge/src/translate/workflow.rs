//! Lowering of a workflow body into a staged platform workflow.
//!
//! Each block from the decomposition becomes one stage. A block that is a
//! lone trivially-wired call references its callee directly; every other
//! block gets a generated *fragment* applet that evaluates the block's
//! expressions at runtime and launches its one call site. Complex
//! conditional/scatter bodies are first folded into a generated locked
//! sub-workflow, which the fragment then launches.
//!
//! Values flow between stages through an environment mapping dotted source
//! names to compile-time wiring ([`StageInput`]); stage ids come from block
//! order, so the emitted workflow is deterministic for a given body.

use dxforge_ir::callable::{
    Application, ApplicationKind, Callable, CallableAttribute, ContainerImage, InstanceType,
    Parameter, SourceDocument, Stage, StageId, StageInput, Workflow, WorkflowLevel,
};
use dxforge_ir::types::Type;
use dxforge_ir::value::{FileValue, Value};
use dxforge_ir::wire::FLAT_FILES_SUFFIX;
use dxforge_lang::ast::{Declaration, SourceLanguage, WorkflowDefinition, WorkflowElement};
use dxforge_lang::expr::{ConstEval, Expr, ExprKind};
use dxname::EncodedName;
use indexmap::IndexMap;

use crate::block::{self, Block, BlockInput};
use crate::closure;
use crate::config::{CompileOptions, ReorgSetting};
use crate::error::{Error, Result};

/// The compile-time wiring environment: every dotted source name in scope,
/// with its type and where its value comes from.
#[derive(Default)]
struct Env {
    bindings: IndexMap<String, (Type, StageInput)>,
}

impl Env {
    fn insert(&mut self, name: impl Into<String>, ty: Type, input: StageInput) {
        self.bindings.insert(name.into(), (ty, input));
    }

    fn wiring(&self, name: &str) -> Result<StageInput> {
        self.bindings
            .get(name)
            .map(|(_, input)| input.clone())
            .ok_or_else(|| Error::Internal(format!("`{name}` has no binding in scope")))
    }
}

/// Translates workflow definitions (and, recursively, generated
/// sub-workflow bodies) into callables.
pub(crate) struct WorkflowTranslator<'a> {
    options: &'a CompileOptions,
    language: SourceLanguage,
}

impl<'a> WorkflowTranslator<'a> {
    pub(crate) fn new(options: &'a CompileOptions, language: SourceLanguage) -> Self {
        WorkflowTranslator { options, language }
    }

    /// Translates the document's workflow. Returns the generated helper
    /// applets and sub-workflows followed by the workflow itself.
    pub(crate) fn translate_top(
        &self,
        wf: &WorkflowDefinition,
        locked: bool,
    ) -> Result<Vec<Callable>> {
        self.translate(
            &wf.name,
            &wf.inputs,
            &wf.outputs,
            &wf.body,
            locked,
            WorkflowLevel::Top,
            &[],
            &wf.source,
            &wf.attributes,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn translate(
        &self,
        name: &str,
        input_decls: &[Declaration],
        output_decls: &[Declaration],
        body: &[WorkflowElement],
        locked: bool,
        level: WorkflowLevel,
        path_prefix: &[usize],
        source: &str,
        attributes: &[CallableAttribute],
    ) -> Result<Vec<Callable>> {
        let blocks = block::split_into_blocks(body)?;
        tracing::debug!(workflow = name, blocks = blocks.len(), locked, "translating workflow");

        let mut callables: Vec<Callable> = Vec::new();
        let mut stages: Vec<Stage> = Vec::new();
        let mut env = Env::default();

        let custom_reorg = level == WorkflowLevel::Top
            && matches!(self.options.reorg, ReorgSetting::Custom { .. });

        // Workflow inputs, classified by how their defaults behave.
        let block_inputs = input_decls
            .iter()
            .map(BlockInput::from_declaration)
            .collect::<Result<Vec<_>>>()?;

        let needs_common = !locked
            || block_inputs
                .iter()
                .any(|input| matches!(input, BlockInput::DynamicDefault { .. }));

        let wf_inputs: Vec<(Parameter, StageInput)> = block_inputs
            .iter()
            .map(|input| {
                let wiring = if locked {
                    StageInput::WorkflowInput(input.name().clone())
                } else {
                    StageInput::Empty
                };
                (input.to_parameter(), wiring)
            })
            .collect();

        if needs_common {
            // The common helper takes the raw workflow inputs, evaluates
            // any defaults the caller omitted, and republishes everything.
            let common = Application {
                name: format!("{name}_common"),
                inputs: block_inputs.iter().map(BlockInput::to_parameter).collect(),
                outputs: input_decls
                    .iter()
                    .map(|decl| {
                        Ok(Parameter::new(EncodedName::encode(&decl.name)?, decl.ty.clone()))
                    })
                    .collect::<Result<Vec<_>>>()?,
                instance_type: InstanceType::Default,
                container: ContainerImage::NoImage,
                kind: ApplicationKind::WfCommonInputs,
                document: Some(self.document(source)),
                attributes: Vec::new(),
                requirements: Vec::new(),
                tags: Vec::new(),
            };

            let stage_inputs = block_inputs
                .iter()
                .map(|input| {
                    if locked {
                        StageInput::WorkflowInput(input.name().clone())
                    } else {
                        StageInput::Empty
                    }
                })
                .collect();

            let stage_id = StageId::common();
            stages.push(Stage {
                id: stage_id.clone(),
                description: "common".into(),
                callee: common.name.clone(),
                inputs: stage_inputs,
                outputs: common.outputs.clone(),
            });

            for decl in input_decls {
                env.insert(
                    decl.name.clone(),
                    decl.ty.clone(),
                    StageInput::Link {
                        stage: stage_id.clone(),
                        name: EncodedName::encode(&decl.name)?,
                    },
                );
            }

            callables.push(Callable::Application(common));
        } else {
            for input in &block_inputs {
                env.insert(
                    input.name().decode(),
                    input.ty().clone(),
                    StageInput::WorkflowInput(input.name().clone()),
                );
            }
        }

        // One stage per block.
        for (index, blk) in blocks.iter().enumerate() {
            let stage_id = StageId::at(index);
            if blk.kind.is_direct() {
                stages.push(self.direct_stage(blk, stage_id.clone(), &mut env)?);
            } else {
                let mut block_path = path_prefix.to_vec();
                block_path.push(index);

                let fragment = self.fragment_for(
                    name,
                    blk,
                    index,
                    block_path,
                    source,
                    &mut callables,
                )?;
                stages.push(self.fragment_stage(&fragment, blk, stage_id.clone(), &mut env)?);
                callables.push(Callable::Application(fragment));
            }
        }

        // Workflow outputs: wired straight from the environment when every
        // output expression is trivial, through an outputs helper
        // otherwise (and always, in unlocked mode).
        let effective_outputs: Vec<Declaration> = output_decls
            .iter()
            .map(|decl| Declaration {
                name: decl.name.clone(),
                ty: decl.ty.clone(),
                expr: Some(match &decl.expr {
                    Some(expr) => expr.clone(),
                    // An expressionless output republishes the same-named
                    // binding.
                    None => Expr::ident(decl.name.clone(), decl.ty.clone()),
                }),
            })
            .collect();

        let needs_outputs_applet = !locked
            || custom_reorg
            || effective_outputs
                .iter()
                .any(|decl| !decl.expr.as_ref().is_some_and(Expr::is_trivial));

        let wf_outputs = if needs_outputs_applet {
            let outputs_stage_path = {
                let mut path = path_prefix.to_vec();
                path.push(blocks.len());
                path
            };
            self.outputs_stage(
                name,
                &effective_outputs,
                outputs_stage_path,
                custom_reorg,
                source,
                &mut callables,
                &mut stages,
                &env,
            )?
        } else {
            effective_outputs
                .iter()
                .map(|decl| {
                    let parameter =
                        Parameter::new(EncodedName::encode(&decl.name)?, decl.ty.clone());
                    let expr = decl.expr.as_ref().ok_or_else(|| {
                        Error::Internal("effective output without expression".into())
                    })?;
                    Ok((parameter, self.resolve_trivial(expr, &decl.ty, &env)?))
                })
                .collect::<Result<Vec<_>>>()?
        };

        // The terminal reorg stage, on the top-level workflow only.
        if level == WorkflowLevel::Top {
            match &self.options.reorg {
                ReorgSetting::None => (),
                ReorgSetting::Standard => {
                    self.standard_reorg(name, &wf_outputs, source, &mut callables, &mut stages)?;
                }
                ReorgSetting::Custom {
                    applet_id,
                    config_uri,
                } => {
                    self.custom_reorg(
                        name,
                        applet_id,
                        config_uri.as_deref(),
                        &mut callables,
                        &mut stages,
                    )?;
                }
            }
        }

        callables.push(Callable::Workflow(Workflow {
            name: name.into(),
            inputs: wf_inputs,
            outputs: wf_outputs,
            stages,
            document: Some(self.document(source)),
            locked,
            level,
            attributes: attributes.to_vec(),
            tags: Vec::new(),
        }));

        Ok(callables)
    }

    /// A stage referencing the callee applet directly, inputs wired
    /// verbatim from the call site.
    fn direct_stage(&self, blk: &Block, stage_id: StageId, env: &mut Env) -> Result<Stage> {
        let call = blk
            .single_call()
            .ok_or_else(|| Error::Internal("direct block without a call".into()))?;

        let inputs = call
            .callee
            .inputs
            .iter()
            .map(|(input_name, input_ty)| match call.inputs.get(input_name) {
                Some(expr) => self.resolve_trivial(expr, input_ty, env),
                None => Ok(StageInput::Empty),
            })
            .collect::<Result<Vec<_>>>()?;

        let outputs = call
            .callee
            .outputs
            .iter()
            .map(|(output, ty)| Ok(Parameter::new(EncodedName::encode(output)?, ty.clone())))
            .collect::<Result<Vec<_>>>()?;

        for (output, ty) in &call.callee.outputs {
            env.insert(
                format!("{}.{output}", call.addressed_name()),
                ty.clone(),
                StageInput::Link {
                    stage: stage_id.clone(),
                    name: EncodedName::encode(output)?,
                },
            );
        }

        Ok(Stage {
            id: stage_id,
            description: call.addressed_name().to_string(),
            callee: call.callee.name.clone(),
            inputs,
            outputs,
        })
    }

    /// The fragment applet for a non-direct block. Complex conditional and
    /// scatter bodies additionally produce a locked sub-workflow the
    /// fragment launches.
    fn fragment_for(
        &self,
        workflow_name: &str,
        blk: &Block,
        index: usize,
        block_path: Vec<usize>,
        source: &str,
        callables: &mut Vec<Callable>,
    ) -> Result<Application> {
        let (scatter_variable, scatter_chunk_size) = match blk.elements.last() {
            Some(WorkflowElement::Scatter(scatter)) => (
                Some(scatter.variable.clone()),
                self.options.scatter_chunk_size,
            ),
            _ => (None, None),
        };

        let call_names = if blk.kind.needs_subworkflow() {
            let sub_name = format!("{workflow_name}_block_{index}");
            self.subworkflow(&sub_name, blk, &block_path, source, callables)?;
            vec![sub_name]
        } else {
            blk.single_call()
                .map(|call| vec![call.callee.name.clone()])
                .unwrap_or_default()
        };

        Ok(Application {
            name: format!("{workflow_name}_frag_{index}"),
            inputs: blk.inputs.iter().map(BlockInput::to_parameter).collect(),
            outputs: blk
                .outputs
                .iter()
                .map(|output| {
                    Ok(Parameter::new(
                        EncodedName::encode(&output.name)?,
                        output.ty.clone(),
                    ))
                })
                .collect::<Result<Vec<_>>>()?,
            instance_type: InstanceType::Default,
            container: ContainerImage::NoImage,
            kind: ApplicationKind::WfFragment {
                call_names,
                block_path,
                scatter_variable,
                scatter_chunk_size,
            },
            document: Some(self.document(source)),
            attributes: Vec::new(),
            requirements: Vec::new(),
            tags: Vec::new(),
        })
    }

    /// Folds a complex conditional/scatter body into a locked
    /// sub-workflow, interfaced by the body's own closure.
    fn subworkflow(
        &self,
        sub_name: &str,
        blk: &Block,
        block_path: &[usize],
        source: &str,
        callables: &mut Vec<Callable>,
    ) -> Result<()> {
        let (body, computed) = match blk.elements.last() {
            Some(WorkflowElement::Conditional(cond)) => (&cond.body, Vec::new()),
            Some(WorkflowElement::Scatter(scatter)) => (
                &scatter.body,
                vec![(scatter.variable.clone(), scatter.item_type())],
            ),
            _ => {
                return Err(Error::Internal(
                    "complex block does not end in a conditional or scatter".into(),
                ));
            }
        };

        let body_inputs = closure::inputs(body, &computed)?;
        let body_outputs = closure::outputs(body)?;

        let input_decls: Vec<Declaration> = body_inputs
            .iter()
            .map(|input| Declaration {
                name: input.name.clone(),
                ty: input.ty.clone(),
                expr: None,
            })
            .collect();

        // Each body output republishes itself under its own (dotted) name.
        let output_decls: Vec<Declaration> = body_outputs
            .iter()
            .map(|output| Declaration {
                name: output.name.clone(),
                ty: output.ty.clone(),
                expr: Some(reference_to(&output.name, &output.ty)),
            })
            .collect();

        let translated = self.translate(
            sub_name,
            &input_decls,
            &output_decls,
            body,
            true,
            WorkflowLevel::Sub,
            block_path,
            source,
            &[],
        )?;
        callables.extend(translated);
        Ok(())
    }

    /// The stage launching a fragment, inputs wired from the environment.
    fn fragment_stage(
        &self,
        fragment: &Application,
        blk: &Block,
        stage_id: StageId,
        env: &mut Env,
    ) -> Result<Stage> {
        let inputs = blk
            .inputs
            .iter()
            .map(|input| env.wiring(&input.name().decode()))
            .collect::<Result<Vec<_>>>()?;

        for output in &blk.outputs {
            env.insert(
                output.name.clone(),
                output.ty.clone(),
                StageInput::Link {
                    stage: stage_id.clone(),
                    name: EncodedName::encode(&output.name)?,
                },
            );
        }

        Ok(Stage {
            id: stage_id,
            description: format!("frag {}", blk.kind),
            callee: fragment.name.clone(),
            inputs,
            outputs: fragment.outputs.clone(),
        })
    }

    /// The outputs helper: evaluates the workflow's output expressions and
    /// republishes them. With a custom reorg configured it also emits the
    /// reorg status handle.
    #[allow(clippy::too_many_arguments)]
    fn outputs_stage(
        &self,
        name: &str,
        effective_outputs: &[Declaration],
        block_path: Vec<usize>,
        custom_reorg: bool,
        source: &str,
        callables: &mut Vec<Callable>,
        stages: &mut Vec<Stage>,
        env: &Env,
    ) -> Result<Vec<(Parameter, StageInput)>> {
        let synthetic: Vec<WorkflowElement> = effective_outputs
            .iter()
            .cloned()
            .map(WorkflowElement::Declaration)
            .collect();
        let closure_inputs = closure::inputs(&synthetic, &[])?;

        let mut outputs = effective_outputs
            .iter()
            .map(|decl| Ok(Parameter::new(EncodedName::encode(&decl.name)?, decl.ty.clone())))
            .collect::<Result<Vec<_>>>()?;
        if custom_reorg {
            outputs.push(Parameter::new(
                EncodedName::encode("reorg_status")?,
                Type::String,
            ));
        }

        let applet = Application {
            name: format!("{name}_outputs"),
            inputs: closure_inputs
                .iter()
                .map(|input| Ok(BlockInput::from_closure(input)?.to_parameter()))
                .collect::<Result<Vec<_>>>()?,
            outputs,
            instance_type: InstanceType::Default,
            container: ContainerImage::NoImage,
            kind: if custom_reorg {
                ApplicationKind::WfCustomReorgOutputs
            } else {
                ApplicationKind::WfOutputs { block_path }
            },
            document: Some(self.document(source)),
            attributes: Vec::new(),
            requirements: Vec::new(),
            tags: Vec::new(),
        };

        let stage_inputs = closure_inputs
            .iter()
            .map(|input| env.wiring(&input.name))
            .collect::<Result<Vec<_>>>()?;

        let stage_id = StageId::outputs();
        stages.push(Stage {
            id: stage_id.clone(),
            description: "outputs".into(),
            callee: applet.name.clone(),
            inputs: stage_inputs,
            outputs: applet.outputs.clone(),
        });
        callables.push(Callable::Application(applet));

        effective_outputs
            .iter()
            .map(|decl| {
                let encoded = EncodedName::encode(&decl.name)?;
                Ok((
                    Parameter::new(encoded.clone(), decl.ty.clone()),
                    StageInput::Link {
                        stage: stage_id.clone(),
                        name: encoded,
                    },
                ))
            })
            .collect()
    }

    /// The built-in reorg helper: one terminal stage reading every
    /// file-typed workflow output, so it can move finished results into
    /// their folders.
    fn standard_reorg(
        &self,
        name: &str,
        wf_outputs: &[(Parameter, StageInput)],
        source: &str,
        callables: &mut Vec<Callable>,
        stages: &mut Vec<Stage>,
    ) -> Result<()> {
        let mut file_links: Vec<StageInput> = Vec::new();
        for (parameter, wiring) in wf_outputs {
            let ty = parameter.ty.normalize();
            if !holds_files(&ty) {
                continue;
            }
            if ty.is_native() {
                // Directory outputs travel as URI strings, not file links;
                // only file-classed slots wire over verbatim.
                if file_classed(&ty) {
                    file_links.push(wiring.clone());
                }
            } else {
                // The files nested inside a composite output are only
                // discoverable through its companion flat-files field, so
                // the reorg stage reads that, never the hash-classed value
                // field.
                file_links.extend(companion_wiring(wiring)?);
            }
        }

        let applet = Application {
            name: format!("{name}_reorg"),
            inputs: vec![Parameter::new(
                EncodedName::encode("upstream_files")?,
                Type::Array {
                    items: Box::new(Type::File),
                    non_empty: false,
                }
                .ensure_optional(),
            )],
            outputs: Vec::new(),
            instance_type: InstanceType::Default,
            container: ContainerImage::NoImage,
            kind: ApplicationKind::WfOutputReorg,
            document: Some(self.document(source)),
            attributes: Vec::new(),
            requirements: Vec::new(),
            tags: Vec::new(),
        };

        stages.push(Stage {
            id: StageId::reorg(),
            description: "reorg".into(),
            callee: applet.name.clone(),
            inputs: vec![StageInput::ArrayLink(file_links)],
            outputs: Vec::new(),
        });
        callables.push(Callable::Application(applet));
        Ok(())
    }

    /// The user-supplied reorg applet as the terminal stage, fed the
    /// status handle from the outputs helper plus its configuration file.
    fn custom_reorg(
        &self,
        name: &str,
        applet_id: &str,
        config_uri: Option<&str>,
        callables: &mut Vec<Callable>,
        stages: &mut Vec<Stage>,
    ) -> Result<()> {
        let applet = Application {
            name: format!("{name}_reorg"),
            inputs: vec![
                Parameter::new(
                    EncodedName::encode("reorg_conf")?,
                    Type::File.ensure_optional(),
                ),
                Parameter::new(
                    EncodedName::encode("reorg_status")?,
                    Type::String.ensure_optional(),
                ),
            ],
            outputs: Vec::new(),
            instance_type: InstanceType::Default,
            container: ContainerImage::NoImage,
            kind: ApplicationKind::WorkflowCustomReorg {
                applet_id: applet_id.into(),
            },
            document: None,
            attributes: Vec::new(),
            requirements: Vec::new(),
            tags: Vec::new(),
        };

        let conf = match config_uri {
            Some(uri) => StageInput::Static(Value::File(FileValue::from_uri(uri))),
            None => StageInput::Empty,
        };

        stages.push(Stage {
            id: StageId::reorg(),
            description: "reorg".into(),
            callee: applet.name.clone(),
            inputs: vec![
                conf,
                StageInput::Link {
                    stage: StageId::outputs(),
                    name: EncodedName::encode("reorg_status")?,
                },
            ],
            outputs: Vec::new(),
        });
        callables.push(Callable::Application(applet));
        Ok(())
    }

    /// Wires one trivial expression: constants become static inputs,
    /// references resolve through the environment.
    fn resolve_trivial(&self, expr: &Expr, target: &Type, env: &Env) -> Result<StageInput> {
        match expr.const_eval(target) {
            ConstEval::Constant(value) => return Ok(StageInput::Static(value)),
            // A literal that folds but does not fit its target is a type
            // fault in the source, not a wiring problem.
            ConstEval::NonConstant(reason) if matches!(expr.kind, ExprKind::Literal(_)) => {
                return Err(Error::Type(reason));
            }
            ConstEval::NonConstant(_) => (),
        }

        let refs = expr.free_variables(true);
        match refs.as_slice() {
            [single] => env.wiring(&single.source_name()),
            _ => Err(Error::Internal(format!(
                "`{expr}` is not a trivially wirable expression"
            ))),
        }
    }

    fn document(&self, source: &str) -> SourceDocument {
        SourceDocument {
            language: self.language.to_string(),
            text: source.into(),
        }
    }
}

/// Whether values of this type carry platform files.
fn holds_files(ty: &Type) -> bool {
    match ty {
        Type::File | Type::Directory => true,
        Type::Array { items, .. } => holds_files(items),
        Type::Optional(inner) => holds_files(inner),
        Type::Multi(members) => members.iter().any(holds_files),
        Type::Schema { fields, .. } => fields.values().any(holds_files),
        _ => false,
    }
}

/// Whether a native type's wire class is `file` or `array:file`.
fn file_classed(ty: &Type) -> bool {
    match ty.unwrap_optional() {
        Type::File => true,
        Type::Array { items, .. } => matches!(&**items, Type::File),
        _ => false,
    }
}

/// The wiring of a composite output's companion flat-files field, which
/// the producing side fills with every file link inside the value.
///
/// Links and workflow-input references shift to the companion field name;
/// a constant carries its files inline, so they are extracted directly.
fn companion_wiring(wiring: &StageInput) -> Result<Vec<StageInput>> {
    fn companion(field: &EncodedName) -> Result<EncodedName> {
        EncodedName::from_encoded(&format!("{}{FLAT_FILES_SUFFIX}", field.as_str()))
            .map_err(|err| Error::Internal(format!("malformed companion field name: {err}")))
    }

    Ok(match wiring {
        StageInput::Link { stage, name } => vec![StageInput::Link {
            stage: stage.clone(),
            name: companion(name)?,
        }],
        StageInput::WorkflowInput(name) => vec![StageInput::WorkflowInput(companion(name)?)],
        StageInput::Static(value) => file_values(value)
            .into_iter()
            .map(StageInput::Static)
            .collect(),
        StageInput::Empty | StageInput::ArrayLink(_) => Vec::new(),
    })
}

/// Every file value inside a constant, depth-first.
fn file_values(value: &Value) -> Vec<Value> {
    fn walk(value: &Value, files: &mut Vec<Value>) {
        match value {
            Value::File(_) => files.push(value.clone()),
            Value::Array(items) | Value::Listing { items, .. } => {
                for item in items {
                    walk(item, files);
                }
            }
            Value::Hash(members) => {
                for member in members.values() {
                    walk(member, files);
                }
            }
            _ => (),
        }
    }

    let mut files = Vec::new();
    walk(value, &mut files);
    files
}

/// A reference expression for a dotted name: a bare identifier, or a field
/// read on a call namespace.
fn reference_to(name: &str, ty: &Type) -> Expr {
    match name.split_once('.') {
        None => Expr::ident(name, ty.clone()),
        Some((head, rest)) => Expr {
            kind: ExprKind::FieldAccess {
                base: Box::new(Expr::ident(head, Type::Hash)),
                field: rest.into(),
            },
            ty: ty.clone(),
        },
    }
}
