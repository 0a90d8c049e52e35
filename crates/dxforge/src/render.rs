//! Rendering of IR callables into platform build requests.
//!
//! These are the JSON bodies sent to `applet-new` and `workflow-new`. The
//! digest engine canonicalizes and hashes exactly these objects, so
//! everything here must be deterministic: parameter order follows the IR,
//! and no map is keyed by anything with unstable iteration order.

use dxforge_ir::bundle::Bundle;
use dxforge_ir::callable::{
    Application, ApplicationKind, CallableAttribute, ContainerImage, InstanceType, Parameter,
    Requirement, SourceDocument, Stage, StageInput, Workflow, WorkflowLevel,
};
use dxforge_ir::types::Type;
use dxforge_ir::value::{FileValue, Value};
use dxforge_ir::wire::{self, FLAT_FILES_SUFFIX};
use indexmap::IndexMap;
use serde_json::{Value as Json, json};

use crate::config::CompileOptions;
use crate::error::{Error, Result};
use crate::source::encode_source;

/// The single platform parameter class of a native type.
///
/// Directories travel as URI strings. Composites have no single class and
/// use the two-field hash encoding instead.
fn class_of(ty: &Type) -> Option<String> {
    fn scalar(ty: &Type) -> Option<&'static str> {
        match ty {
            Type::Boolean => Some("boolean"),
            Type::Int => Some("int"),
            Type::Float => Some("float"),
            Type::String | Type::Directory => Some("string"),
            Type::File => Some("file"),
            _ => None,
        }
    }

    match ty.unwrap_optional() {
        Type::Array { items, .. } => scalar(items).map(|class| format!("array:{class}")),
        other => scalar(other).map(String::from),
    }
}

/// The inputSpec/outputSpec entries for one parameter: one entry for a
/// native type, two (value + flat file links) for a composite.
fn parameter_specs(parameter: &Parameter) -> Result<Vec<Json>> {
    let name = parameter.name.as_str();
    let ty = parameter.ty.normalize();

    let mut entry = json!({ "name": name });
    let object = entry.as_object_mut().ok_or_else(|| {
        Error::Internal("parameter spec must be an object".into())
    })?;

    let composite = match class_of(&ty) {
        Some(class) => {
            object.insert("class".into(), json!(class));
            false
        }
        None => {
            object.insert("class".into(), json!("hash"));
            true
        }
    };

    if parameter.is_optional() {
        object.insert("optional".into(), json!(true));
    }

    if let Some(default) = &parameter.default {
        let rendered = if composite {
            wire::composite_parts(default, &ty)?.0
        } else {
            wire::to_wire(default, &ty)?
        };
        object.insert("default".into(), json!(rendered));
    }

    for attribute in &parameter.attributes {
        use dxforge_ir::callable::ParameterAttribute::*;
        match attribute {
            Label(label) => {
                object.insert("label".into(), json!(label));
            }
            Help(help) => {
                object.insert("help".into(), json!(help));
            }
            Group(group) => {
                object.insert("group".into(), json!(group));
            }
            Choices(choices) => {
                let choices = choices
                    .iter()
                    .map(|choice| wire::to_wire(choice, &ty))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                object.insert("choices".into(), json!(choices));
            }
            Patterns(patterns) => {
                object.insert("patterns".into(), json!(patterns));
            }
            Suggestions(suggestions) => {
                let suggestions = suggestions
                    .iter()
                    .map(|suggestion| wire::to_wire(suggestion, &ty))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                object.insert("suggestions".into(), json!(suggestions));
            }
            Stream => {
                object.insert("streaming".into(), json!(true));
            }
        }
    }

    let mut specs = vec![entry];
    if composite {
        specs.push(json!({
            "name": format!("{name}{FLAT_FILES_SUFFIX}"),
            "class": "array:file",
            "optional": true,
        }));
    }
    Ok(specs)
}

fn spec_array(parameters: &[Parameter]) -> Result<Json> {
    let mut entries = Vec::new();
    for parameter in parameters {
        entries.extend(parameter_specs(parameter)?);
    }
    Ok(Json::Array(entries))
}

/// The subcommand of the runtime agent an application's trampoline runs.
fn agent_command(kind: &ApplicationKind) -> &'static str {
    match kind {
        ApplicationKind::Applet => "run-task",
        ApplicationKind::WfFragment { .. } => "run-fragment",
        ApplicationKind::WfCommonInputs => "eval-inputs",
        ApplicationKind::WfOutputs { .. } => "eval-outputs",
        ApplicationKind::WfCustomReorgOutputs => "eval-outputs",
        ApplicationKind::WfOutputReorg => "reorg-outputs",
        // Natives and custom reorg applets already exist; they are never
        // rendered into build requests.
        ApplicationKind::Native(_) | ApplicationKind::WorkflowCustomReorg { .. } => "run-task",
    }
}

fn run_spec(app: &Application) -> Json {
    let code = format!(
        "#!/bin/bash -e\nexec dxforge-agent {} '{}' \"$@\"\n",
        agent_command(&app.kind),
        app.name,
    );

    let mut spec = json!({
        "interpreter": "bash",
        "code": code,
        "distribution": "Ubuntu",
        "release": "24.04",
        "version": "0",
    });
    let object = spec.as_object_mut().expect("literal object");

    if let InstanceType::Static(request) = &app.instance_type {
        // With a named instance the platform takes it verbatim; with bare
        // resource figures it matches the smallest satisfying instance.
        let requirements = match &request.name {
            Some(name) => json!({ "instanceType": name }),
            None => json!({
                "cpu": request.cpu,
                "memoryMB": request.memory_mb,
                "diskGB": request.disk_gb,
            }),
        };
        object.insert("systemRequirements".into(), json!({ "*": requirements }));
    }

    if !app.requirements.is_empty() {
        let mut access = serde_json::Map::new();
        for requirement in &app.requirements {
            match requirement {
                Requirement::Network(hosts) => {
                    access.insert("network".into(), json!(hosts));
                }
                Requirement::ProjectAccess(level) => {
                    access.insert("project".into(), json!(level.to_string()));
                }
                Requirement::AllProjectsAccess(level) => {
                    access.insert("allProjects".into(), json!(level.to_string()));
                }
                Requirement::Developer => {
                    access.insert("developer".into(), json!(true));
                }
                Requirement::ProjectCreation => {
                    access.insert("projectCreation".into(), json!(true));
                }
            }
        }
        object.insert("access".into(), Json::Object(access));
    }

    spec
}

fn details(
    document: Option<&SourceDocument>,
    attributes: &[CallableAttribute],
    extra: Vec<(String, Json)>,
) -> Result<Json> {
    let mut details = serde_json::Map::new();

    if let Some(document) = document {
        details.insert(
            crate::digest::DETAILS_SOURCE_KEY.into(),
            json!(encode_source(&document.text)?),
        );
        details.insert("sourceLanguage".into(), json!(document.language));
    }

    for attribute in attributes {
        let (key, value) = match attribute {
            CallableAttribute::Title(title) => ("title", title),
            CallableAttribute::Summary(summary) => ("summary", summary),
            CallableAttribute::Description(description) => ("description", description),
            CallableAttribute::DeveloperNotes(notes) => ("developerNotes", notes),
            CallableAttribute::Version(version) => ("sourceVersion", version),
        };
        details.insert(key.into(), json!(value));
    }

    for (key, value) in extra {
        details.insert(key, value);
    }

    Ok(Json::Object(details))
}

/// Renders an applet build request.
///
/// `executable_links` maps callee names to their already-compiled platform
/// ids; fragments carry them in `details` so the runtime agent can launch
/// child jobs.
pub(crate) fn applet_request(
    app: &Application,
    options: &CompileOptions,
    executable_links: &IndexMap<String, String>,
) -> Result<Json> {
    let mut extra = vec![(
        "execKind".to_string(),
        serde_json::to_value(&app.kind)
            .map_err(|err| Error::Internal(format!("unserializable kind: {err}")))?,
    )];

    if !executable_links.is_empty() {
        extra.push((
            "executableLinks".into(),
            json!(executable_links
                .iter()
                .map(|(name, id)| (name.clone(), json!(id)))
                .collect::<serde_json::Map<_, _>>()),
        ));
    }

    match &app.container {
        ContainerImage::NoImage => (),
        ContainerImage::PlatformFile(uri) => {
            let link = wire::to_wire(&Value::File(FileValue::from_uri(uri)), &Type::File)?;
            extra.push(("dockerImage".into(), link));
        }
        ContainerImage::Network(reference) => {
            extra.push(("dockerRef".into(), json!(reference)));
        }
    }

    let hidden = !matches!(app.kind, ApplicationKind::Applet);

    Ok(json!({
        "name": app.name,
        "project": options.project,
        "folder": options.folder,
        "parents": true,
        "hidden": hidden,
        "tags": app.tags,
        "inputSpec": spec_array(&app.inputs)?,
        "outputSpec": spec_array(&app.outputs)?,
        "runSpec": run_spec(app),
        "details": details(app.document.as_ref(), &app.attributes, extra)?,
    }))
}

/// One stage input's JSON, plus the companion flat-files entry when the
/// parameter is composite.
fn stage_input_json(
    input: &StageInput,
    parameter: &Parameter,
) -> Result<Vec<(String, Json)>> {
    let name = parameter.name.as_str();
    let composite = class_of(&parameter.ty.normalize()).is_none();

    let mut fields = Vec::new();
    match input {
        StageInput::Empty => (),
        StageInput::Static(value) => {
            if composite {
                let (wrapped, links) = wire::composite_parts(value, &parameter.ty)?;
                fields.push((name.to_string(), wrapped));
                fields.push((format!("{name}{FLAT_FILES_SUFFIX}"), Json::Array(links)));
            } else {
                fields.push((name.to_string(), wire::to_wire(value, &parameter.ty)?));
            }
        }
        StageInput::Link { stage, name: field } => {
            fields.push((
                name.to_string(),
                json!({ wire::LINK_KEY: { "stage": stage.as_str(), "outputField": field.as_str() } }),
            ));
            if composite {
                fields.push((
                    format!("{name}{FLAT_FILES_SUFFIX}"),
                    json!({ wire::LINK_KEY: {
                        "stage": stage.as_str(),
                        "outputField": format!("{}{FLAT_FILES_SUFFIX}", field.as_str()),
                    }}),
                ));
            }
        }
        StageInput::WorkflowInput(field) => {
            fields.push((
                name.to_string(),
                json!({ wire::LINK_KEY: { "workflowInputField": field.as_str() } }),
            ));
            if composite {
                fields.push((
                    format!("{name}{FLAT_FILES_SUFFIX}"),
                    json!({ wire::LINK_KEY: {
                        "workflowInputField": format!("{}{FLAT_FILES_SUFFIX}", field.as_str()),
                    }}),
                ));
            }
        }
        StageInput::ArrayLink(sources) => {
            // Members are element-valued (one link or constant each), so
            // they render against the element type, not the array-typed
            // slot they assemble into.
            let ty = parameter.ty.normalize();
            let element_ty = match ty.unwrap_optional() {
                Type::Array { items, .. } => (**items).clone(),
                other => other.clone(),
            };
            let element = Parameter::new(parameter.name.clone(), element_ty);

            let items = sources
                .iter()
                .map(|source| {
                    let rendered = stage_input_json(source, &element)?;
                    rendered
                        .into_iter()
                        .next()
                        .map(|(_, json)| json)
                        .ok_or_else(|| Error::Internal("empty array link member".into()))
                })
                .collect::<Result<Vec<_>>>()?;
            fields.push((name.to_string(), Json::Array(items)));
        }
    }
    Ok(fields)
}

fn stage_json(stage: &Stage, bundle: &Bundle, ids: &IndexMap<String, String>) -> Result<Json> {
    let callee = bundle
        .get(&stage.callee)
        .ok_or_else(|| Error::Internal(format!("stage callee `{}` not in bundle", stage.callee)))?;
    let executable = ids
        .get(&stage.callee)
        .ok_or_else(|| Error::Internal(format!("`{}` compiled out of order", stage.callee)))?;

    let callee_inputs = callee.input_parameters();
    if stage.inputs.len() > callee_inputs.len() {
        return Err(Error::Internal(format!(
            "stage `{}` wires more inputs than `{}` declares",
            stage.id, stage.callee
        )));
    }

    let mut input = serde_json::Map::new();
    for (wiring, parameter) in stage.inputs.iter().zip(callee_inputs) {
        for (key, value) in stage_input_json(wiring, parameter)? {
            input.insert(key, value);
        }
    }

    Ok(json!({
        "id": stage.id.as_str(),
        "name": stage.description,
        "executable": executable,
        "input": Json::Object(input),
    }))
}

/// Renders a workflow build request. Stage callees must already be
/// compiled; their ids come through `ids`.
pub(crate) fn workflow_request(
    wf: &Workflow,
    options: &CompileOptions,
    ids: &IndexMap<String, String>,
    bundle: &Bundle,
) -> Result<Json> {
    let stages = wf
        .stages
        .iter()
        .map(|stage| stage_json(stage, bundle, ids))
        .collect::<Result<Vec<_>>>()?;

    let mut request = json!({
        "name": wf.name,
        "project": options.project,
        "folder": options.folder,
        "parents": true,
        "hidden": wf.level == WorkflowLevel::Sub,
        "tags": wf.tags,
        "stages": stages,
        "details": details(wf.document.as_ref(), &wf.attributes, Vec::new())?,
    });
    let object = request.as_object_mut().expect("literal object");

    if wf.locked {
        let mut inputs = Vec::new();
        for (parameter, _) in &wf.inputs {
            inputs.extend(parameter_specs(parameter)?);
        }

        let mut outputs = Vec::new();
        for (parameter, wiring) in &wf.outputs {
            for (index, mut entry) in parameter_specs(parameter)?.into_iter().enumerate() {
                // Only the value entry gets an outputSource; the companion
                // flat-files field is filled by the producing stage.
                if index == 0
                    && let Some(entry) = entry.as_object_mut()
                    && let Some((_, source)) =
                        stage_input_json(wiring, parameter)?.into_iter().next()
                {
                    entry.insert("outputSource".into(), source);
                }
                outputs.push(entry);
            }
        }

        object.insert("inputs".into(), Json::Array(inputs));
        object.insert("outputs".into(), Json::Array(outputs));
    }

    Ok(request)
}

#[cfg(test)]
mod tests {
    use dxforge_ir::callable::StageId;
    use dxname::EncodedName;
    use pretty_assertions::assert_eq;

    use super::*;

    fn parameter(name: &str, ty: Type) -> Parameter {
        Parameter::new(EncodedName::from_encoded(name).unwrap(), ty)
    }

    #[test]
    fn test_native_parameter_spec() {
        let mut param = parameter("min_len", Type::Int);
        param.default = Some(Value::Int(20));

        let specs = parameter_specs(&param).unwrap();
        assert_eq!(
            specs,
            vec![json!({ "name": "min_len", "class": "int", "optional": true, "default": 20 })]
        );
    }

    #[test]
    fn test_composite_parameter_gets_companion() {
        let stats = Type::Schema {
            name: "Stats".into(),
            fields: [("bam".to_string(), Type::File)].into_iter().collect(),
        };
        let specs = parameter_specs(&parameter("stats", stats)).unwrap();

        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0]["class"], json!("hash"));
        assert_eq!(specs[1]["name"], json!("stats___dxfiles"));
        assert_eq!(specs[1]["class"], json!("array:file"));
    }

    #[test]
    fn test_class_mapping() {
        for (ty, class) in [
            (Type::Boolean, Some("boolean")),
            (Type::Directory, Some("string")),
            (
                Type::Array {
                    items: Box::new(Type::File),
                    non_empty: true,
                },
                Some("array:file"),
            ),
            (Type::Optional(Box::new(Type::Int)), Some("int")),
            (Type::Hash, None),
            (
                Type::Array {
                    items: Box::new(Type::Optional(Box::new(Type::Int))),
                    non_empty: false,
                },
                None,
            ),
        ] {
            assert_eq!(class_of(&ty).as_deref(), class, "{ty}");
        }
    }

    #[test]
    fn test_stage_link_rendering() {
        let wiring = StageInput::Link {
            stage: StageId::at(0),
            name: EncodedName::from_encoded("result").unwrap(),
        };
        let fields = stage_input_json(&wiring, &parameter("a", Type::Int)).unwrap();
        assert_eq!(
            fields,
            vec![(
                "a".to_string(),
                json!({ "$dnanexus_link": { "stage": "stage-0", "outputField": "result" } })
            )]
        );
    }

    #[test]
    fn test_array_link_members_render_as_elements() {
        let array_of_files = Type::Array {
            items: Box::new(Type::File),
            non_empty: false,
        };
        let wiring = StageInput::ArrayLink(vec![
            StageInput::Link {
                stage: StageId::at(2),
                name: EncodedName::from_encoded("result___dxfiles").unwrap(),
            },
            StageInput::Static(Value::File(FileValue::from_uri("dx://file-extra"))),
        ]);

        let fields = stage_input_json(&wiring, &parameter("upstream_files", array_of_files))
            .unwrap();
        assert_eq!(
            fields,
            vec![(
                "upstream_files".to_string(),
                json!([
                    { "$dnanexus_link": { "stage": "stage-2", "outputField": "result___dxfiles" } },
                    { "$dnanexus_link": "file-extra" },
                ])
            )]
        );
    }
}
