//! Lowering of a single task (or tool) into an applet-shaped application.

use dxforge_ir::callable::{
    Application, ApplicationKind, ContainerImage, InstanceRequest, InstanceType, Parameter,
    Requirement, SourceDocument,
};
use dxforge_ir::types::Type;
use dxforge_ir::value::Value;
use dxforge_ir::wire::DX_URI_PREFIX;
use dxforge_lang::ast::{Declaration, RuntimeHints, SourceLanguage, Task};
use dxforge_lang::expr::{ConstEval, Expr};
use dxname::EncodedName;

use crate::block::references_local_path;
use crate::config::{CompileOptions, InstanceTypeSelection};
use crate::error::Result;

/// Lowers one task into an [`Application`].
pub(crate) fn translate_task(
    task: &Task,
    options: &CompileOptions,
    language: SourceLanguage,
) -> Result<Application> {
    let inputs = task
        .inputs
        .iter()
        .map(|decl| parameter_from(decl, task))
        .collect::<Result<Vec<_>>>()?;
    let outputs = task
        .outputs
        .iter()
        .map(|decl| parameter_from(decl, task))
        .collect::<Result<Vec<_>>>()?;

    let container = container_image(task);

    // A network-fetched image needs outbound access at runtime; a platform
    // file does not.
    let mut requirements = Vec::new();
    if matches!(container, ContainerImage::Network(_)) {
        requirements.push(Requirement::Network(vec!["*".into()]));
    }

    let (kind, document) = match &task.native {
        Some(native) => (ApplicationKind::Native(native.clone()), None),
        None => (
            ApplicationKind::Applet,
            Some(SourceDocument {
                language: language.to_string(),
                text: task.source.clone(),
            }),
        ),
    };

    Ok(Application {
        name: task.name.clone(),
        inputs,
        outputs,
        instance_type: instance_type(&task.runtime, options),
        container,
        kind,
        document,
        attributes: task.attributes.clone(),
        requirements,
        tags: Vec::new(),
    })
}

/// Builds one parameter from a declaration, folding its default when that
/// is safe to embed.
fn parameter_from(decl: &Declaration, task: &Task) -> Result<Parameter> {
    // A default that does not fold, or that names a local path the built
    // object could not resolve, is omitted; the runtime re-evaluates the
    // declaration when the caller supplies nothing.
    let default = decl.expr.as_ref().and_then(|expr| {
        match expr.const_eval(&decl.ty) {
            ConstEval::Constant(value) if !references_local_path(&value) => Some(value),
            _ => None,
        }
    });

    Ok(Parameter {
        name: EncodedName::encode(&decl.name)?,
        ty: decl.ty.clone(),
        default,
        attributes: task
            .parameter_attributes
            .get(&decl.name)
            .cloned()
            .unwrap_or_default(),
    })
}

/// Classifies how the run instance is chosen, per the hints and the
/// configured defaults.
fn instance_type(hints: &RuntimeHints, options: &CompileOptions) -> InstanceType {
    // A hard-coded instance name short-circuits everything else.
    if let Some(name) = &hints.instance_name {
        return match name.const_eval(&Type::String) {
            ConstEval::Constant(Value::String(name)) => InstanceType::Static(InstanceRequest {
                name: Some(name),
                ..Default::default()
            }),
            _ => InstanceType::Dynamic,
        };
    }

    let fold_float = |expr: &Option<Expr>| -> Option<std::result::Result<f64, ()>> {
        expr.as_ref().map(|e| match e.const_eval(&Type::Float) {
            ConstEval::Constant(Value::Float(x)) => Ok(x),
            _ => Err(()),
        })
    };
    let fold_int = |expr: &Option<Expr>| -> Option<std::result::Result<i64, ()>> {
        expr.as_ref().map(|e| match e.const_eval(&Type::Int) {
            ConstEval::Constant(Value::Int(i)) => Ok(i),
            _ => Err(()),
        })
    };

    let folded = (
        fold_float(&hints.cpu).transpose(),
        fold_int(&hints.memory_mb).transpose(),
        fold_int(&hints.disk_gb).transpose(),
    );

    // Any hint that refuses to fold defers the whole choice to the runtime.
    let (Ok(cpu), Ok(memory_mb), Ok(disk_gb)) = folded else {
        return InstanceType::Dynamic;
    };

    let defaults = options.default_runtime_attrs.clone().unwrap_or_default();
    let request = InstanceRequest {
        name: defaults.name,
        cpu: cpu.or(defaults.cpu),
        memory_mb: memory_mb.or(defaults.memory_mb),
        disk_gb: disk_gb.or(defaults.disk_gb),
    };

    if request.is_empty() {
        InstanceType::Default
    } else {
        match options.instance_type_selection {
            InstanceTypeSelection::Static => InstanceType::Static(request),
            InstanceTypeSelection::Dynamic => InstanceType::Dynamic,
        }
    }
}

fn container_image(task: &Task) -> ContainerImage {
    let Some(expr) = &task.container else {
        return ContainerImage::NoImage;
    };

    match expr.const_eval(&Type::String) {
        ConstEval::Constant(Value::String(uri)) if uri.starts_with(DX_URI_PREFIX) => {
            ContainerImage::PlatformFile(uri)
        }
        ConstEval::Constant(Value::String(reference)) => ContainerImage::Network(reference),
        // A dynamic image expression resolves at runtime; record its source
        // form as the network reference.
        _ => ContainerImage::Network(expr.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use dxforge_lang::ast::Task;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;

    use super::*;

    fn bare_task(name: &str) -> Task {
        Task {
            name: name.into(),
            inputs: vec![
                Declaration::input("reads", Type::File),
                Declaration::bound("min_len", Type::Int, Expr::int(20)),
            ],
            outputs: vec![Declaration::bound(
                "trimmed",
                Type::File,
                Expr::apply("read_file", vec![], Type::File),
            )],
            runtime: RuntimeHints::default(),
            container: None,
            native: None,
            attributes: Vec::new(),
            parameter_attributes: IndexMap::new(),
            source: format!("task {name} {{}}"),
        }
    }

    fn options() -> CompileOptions {
        CompileOptions::new("project-1", "/builds")
    }

    #[test]
    fn test_constant_defaults_are_embedded() {
        let app = translate_task(&bare_task("trim"), &options(), SourceLanguage::Wdl).unwrap();

        assert_eq!(app.inputs[0].default, None);
        assert_eq!(app.inputs[1].default, Some(Value::Int(20)));
        // Output expressions never become defaults.
        assert_eq!(app.outputs[0].default, None);
        assert_eq!(app.kind, ApplicationKind::Applet);
        assert!(app.document.is_some());
    }

    #[test]
    fn test_local_path_defaults_are_omitted() {
        let mut task = bare_task("trim");
        task.inputs.push(Declaration::bound(
            "adapters",
            Type::File,
            Expr::literal(Value::String("assets/adapters.fa".into()), Type::String),
        ));

        let app = translate_task(&task, &options(), SourceLanguage::Wdl).unwrap();
        assert_eq!(app.inputs[2].default, None);
    }

    #[test]
    fn test_instance_type_classification() {
        let mut opts = options();

        // Nothing specified, no defaults.
        assert_eq!(
            instance_type(&RuntimeHints::default(), &opts),
            InstanceType::Default
        );

        // Hard-coded instance name.
        let named = RuntimeHints {
            instance_name: Some(Expr::str("mem2_ssd1_v2_x4")),
            ..Default::default()
        };
        assert_eq!(
            instance_type(&named, &opts),
            InstanceType::Static(InstanceRequest {
                name: Some("mem2_ssd1_v2_x4".into()),
                ..Default::default()
            })
        );

        // All hints fold.
        let constant = RuntimeHints {
            cpu: Some(Expr::int(4)),
            memory_mb: Some(Expr::int(8192)),
            ..Default::default()
        };
        assert_eq!(
            instance_type(&constant, &opts),
            InstanceType::Static(InstanceRequest {
                name: None,
                cpu: Some(4.0),
                memory_mb: Some(8192),
                disk_gb: None,
            })
        );

        // A non-folding hint defers to the runtime.
        let dynamic = RuntimeHints {
            cpu: Some(Expr::apply(
                "mul",
                vec![Expr::ident("threads", Type::Int)],
                Type::Int,
            )),
            ..Default::default()
        };
        assert_eq!(instance_type(&dynamic, &opts), InstanceType::Dynamic);

        // Constant hints under dynamic selection also defer.
        opts.instance_type_selection = InstanceTypeSelection::Dynamic;
        assert_eq!(instance_type(&constant, &opts), InstanceType::Dynamic);
    }

    #[test]
    fn test_runtime_defaults_fill_missing_hints() {
        let mut opts = options();
        opts.default_runtime_attrs = Some(InstanceRequest {
            name: None,
            cpu: Some(2.0),
            memory_mb: Some(4096),
            disk_gb: Some(50),
        });

        let hints = RuntimeHints {
            cpu: Some(Expr::int(16)),
            ..Default::default()
        };
        assert_eq!(
            instance_type(&hints, &opts),
            InstanceType::Static(InstanceRequest {
                name: None,
                cpu: Some(16.0),
                memory_mb: Some(4096),
                disk_gb: Some(50),
            })
        );
    }

    #[test]
    fn test_container_classification() {
        let mut task = bare_task("trim");

        assert_eq!(container_image(&task), ContainerImage::NoImage);

        task.container = Some(Expr::str("dx://project-1:file-img"));
        assert_eq!(
            container_image(&task),
            ContainerImage::PlatformFile("dx://project-1:file-img".into())
        );
        let app = translate_task(&task, &options(), SourceLanguage::Wdl).unwrap();
        assert!(app.requirements.is_empty());

        task.container = Some(Expr::str("quay.io/biocontainers/cutadapt:4.4"));
        assert_eq!(
            container_image(&task),
            ContainerImage::Network("quay.io/biocontainers/cutadapt:4.4".into())
        );
        let app = translate_task(&task, &options(), SourceLanguage::Wdl).unwrap();
        assert_eq!(app.requirements, vec![Requirement::Network(vec!["*".into()])]);
    }
}
