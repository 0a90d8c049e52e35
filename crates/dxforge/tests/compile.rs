//! End-to-end translation tests: typed documents in, IR bundles out.

use dxforge::{CompileOptions, Compiler};
use dxforge_ir::callable::{
    ApplicationKind, Callable, StageId, StageInput, WorkflowLevel,
};
use dxforge_ir::types::Type;
use dxforge_ir::value::Value;
use dxforge_lang::ast::{Conditional, Declaration, Scatter, WorkflowElement};
use dxforge_lang::expr::Expr;
use dxname::EncodedName;
use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use test_support::build;

fn compiler(locked: bool) -> Compiler {
    let mut options = CompileOptions::new("project-1", "/builds");
    options.locked = locked;
    Compiler::new(options)
}

fn encoded(name: &str) -> EncodedName {
    EncodedName::encode(name).unwrap()
}

/// A three-call linear workflow:
/// `linear(x, y) { add(x, y); mul(add.result, 2); inc(mul.result) }`.
fn linear_document() -> dxforge_lang::ast::Document {
    let add = build::int_task("add", &["a", "b"]);
    let mul = build::int_task("mul", &["a", "b"]);
    let inc = build::int_task("inc", &["a"]);

    let body = vec![
        build::call(
            &add,
            &[
                ("a", Expr::ident("x", Type::Int)),
                ("b", Expr::ident("y", Type::Int)),
            ],
        ),
        build::call(
            &mul,
            &[
                ("a", build::call_output("add", "result", Type::Int)),
                ("b", Expr::int(2)),
            ],
        ),
        build::call(&inc, &[("a", build::call_output("mul", "result", Type::Int))]),
    ];

    let wf = build::workflow(
        "linear",
        vec![
            Declaration::input("x", Type::Int),
            Declaration::input("y", Type::Int),
        ],
        vec![Declaration::bound(
            "r",
            Type::Int,
            build::call_output("inc", "result", Type::Int),
        )],
        body,
    );

    build::document(vec![add, mul, inc], Some(wf))
}

#[test]
fn test_linear_workflow_locked() {
    let bundle = compiler(true).compile(&linear_document()).unwrap();

    // Dependency order: callees strictly before callers.
    assert_eq!(bundle.dependencies(), &["add", "mul", "inc", "linear"]);

    let Some(Callable::Workflow(wf)) = bundle.get("linear") else {
        panic!("primary is not a workflow");
    };
    assert!(wf.locked);
    assert_eq!(wf.level, WorkflowLevel::Top);

    // Three direct stages; no fragments, no common/outputs helpers.
    assert_eq!(wf.stages.len(), 3);
    assert_eq!(
        wf.stages.iter().map(|s| s.callee.as_str()).collect::<Vec<_>>(),
        vec!["add", "mul", "inc"]
    );

    assert_eq!(
        wf.stages[0].inputs,
        vec![
            StageInput::WorkflowInput(encoded("x")),
            StageInput::WorkflowInput(encoded("y")),
        ]
    );
    assert_eq!(
        wf.stages[1].inputs,
        vec![
            StageInput::Link {
                stage: StageId::at(0),
                name: encoded("result"),
            },
            StageInput::Static(Value::Int(2)),
        ]
    );
    assert_eq!(
        wf.stages[2].inputs,
        vec![StageInput::Link {
            stage: StageId::at(1),
            name: encoded("result"),
        }]
    );

    // The single output reads the last stage directly.
    assert_eq!(wf.outputs.len(), 1);
    assert_eq!(
        wf.outputs[0].1,
        StageInput::Link {
            stage: StageId::at(2),
            name: encoded("result"),
        }
    );
}

#[test]
fn test_linear_workflow_unlocked_gets_helpers() {
    let bundle = compiler(false).compile(&linear_document()).unwrap();

    let Some(Callable::Workflow(wf)) = bundle.get("linear") else {
        panic!("primary is not a workflow");
    };
    assert!(!wf.locked);

    // common + three calls + outputs.
    assert_eq!(wf.stages.len(), 5);
    assert_eq!(wf.stages[0].callee, "linear_common");
    assert_eq!(wf.stages[4].callee, "linear_outputs");

    let Some(Callable::Application(common)) = bundle.get("linear_common") else {
        panic!("missing common helper");
    };
    assert_eq!(common.kind, ApplicationKind::WfCommonInputs);

    // Unlocked inputs are unwired at compile time; body stages read the
    // common stage instead of workflow inputs.
    assert!(wf.inputs.iter().all(|(_, w)| *w == StageInput::Empty));
    assert_eq!(
        wf.stages[1].inputs[0],
        StageInput::Link {
            stage: StageId::common(),
            name: encoded("x"),
        }
    );

    // The output comes from the outputs helper.
    assert_eq!(
        wf.outputs[0].1,
        StageInput::Link {
            stage: StageId::outputs(),
            name: encoded("r"),
        }
    );
}

#[test]
fn test_expression_block_becomes_fragment() {
    // add(x, y); Int z = add.result + 1; mul(z, 5)
    let add = build::int_task("add", &["a", "b"]);
    let mul = build::int_task("mul", &["a", "b"]);

    let body = vec![
        build::call(
            &add,
            &[
                ("a", Expr::ident("x", Type::Int)),
                ("b", Expr::ident("y", Type::Int)),
            ],
        ),
        WorkflowElement::Declaration(Declaration::bound(
            "z",
            Type::Int,
            Expr::apply(
                "add",
                vec![build::call_output("add", "result", Type::Int), Expr::int(1)],
                Type::Int,
            ),
        )),
        build::call(
            &mul,
            &[("a", Expr::ident("z", Type::Int)), ("b", Expr::int(5))],
        ),
    ];

    let wf = build::workflow(
        "expr_wf",
        vec![
            Declaration::input("x", Type::Int),
            Declaration::input("y", Type::Int),
        ],
        vec![Declaration::bound(
            "m",
            Type::Int,
            build::call_output("mul", "result", Type::Int),
        )],
        body,
    );
    let bundle = compiler(true)
        .compile(&build::document(vec![add, mul], Some(wf)))
        .unwrap();

    let Some(Callable::Application(fragment)) = bundle.get("expr_wf_frag_1") else {
        panic!("missing fragment applet");
    };

    // The fragment's closure: reads the first call's result, publishes the
    // declaration and the second call's result.
    assert_eq!(
        fragment
            .inputs
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>(),
        vec!["add___result"]
    );
    assert_eq!(
        fragment
            .outputs
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>(),
        vec!["z", "mul___result"]
    );

    let ApplicationKind::WfFragment {
        call_names,
        block_path,
        scatter_variable,
        ..
    } = &fragment.kind
    else {
        panic!("not a fragment kind");
    };
    assert_eq!(call_names, &["mul"]);
    assert_eq!(block_path, &[1]);
    assert_eq!(*scatter_variable, None);

    // Fragment closure completeness: every free variable of the block is
    // a fragment input.
    let Some(Callable::Workflow(wf)) = bundle.get("expr_wf") else {
        panic!("missing workflow");
    };
    assert_eq!(
        wf.stages[1].inputs,
        vec![StageInput::Link {
            stage: StageId::at(0),
            name: encoded("result"),
        }]
    );
}

#[test]
fn test_conditional_one_call_lifts_to_optional() {
    // if (flag) { inc(x) }
    let inc = build::int_task("inc", &["a"]);
    let body = vec![WorkflowElement::Conditional(Conditional {
        expr: Expr::ident("flag", Type::Boolean),
        body: vec![build::call(&inc, &[("a", Expr::ident("x", Type::Int))])],
    })];

    let wf = build::workflow(
        "cond_wf",
        vec![
            Declaration::input("flag", Type::Boolean),
            Declaration::input("x", Type::Int),
        ],
        vec![Declaration::bound(
            "r",
            Type::Optional(Box::new(Type::Int)),
            build::call_output("inc", "result", Type::Optional(Box::new(Type::Int))),
        )],
        body,
    );
    let bundle = compiler(true)
        .compile(&build::document(vec![inc], Some(wf)))
        .unwrap();

    let Some(Callable::Application(fragment)) = bundle.get("cond_wf_frag_0") else {
        panic!("missing fragment applet");
    };

    let ApplicationKind::WfFragment { call_names, .. } = &fragment.kind else {
        panic!("not a fragment kind");
    };
    assert_eq!(call_names, &["inc"]);

    // The call's output, seen from outside the conditional, is optional.
    assert_eq!(fragment.outputs.len(), 1);
    assert_eq!(fragment.outputs[0].name.as_str(), "inc___result");
    assert_eq!(fragment.outputs[0].ty, Type::Optional(Box::new(Type::Int)));
}

#[test]
fn test_scatter_one_call_lifts_to_array() {
    // scatter (i in [1,2,3]) { sq(i) }
    let sq = build::int_task("sq", &["a"]);
    let body = vec![WorkflowElement::Scatter(Scatter {
        variable: "i".into(),
        collection: Expr::int_array([1, 2, 3], true),
        body: vec![build::call(&sq, &[("a", Expr::ident("i", Type::Int))])],
    })];

    let wf = build::workflow("scat_wf", vec![], vec![], body);

    let mut options = CompileOptions::new("project-1", "/builds");
    options.locked = true;
    options.scatter_chunk_size = Some(500);
    let bundle = Compiler::new(options)
        .compile(&build::document(vec![sq], Some(wf)))
        .unwrap();

    let Some(Callable::Application(fragment)) = bundle.get("scat_wf_frag_0") else {
        panic!("missing fragment applet");
    };

    let ApplicationKind::WfFragment {
        call_names,
        scatter_variable,
        scatter_chunk_size,
        ..
    } = &fragment.kind
    else {
        panic!("not a fragment kind");
    };
    assert_eq!(call_names, &["sq"]);
    assert_eq!(scatter_variable.as_deref(), Some("i"));
    assert_eq!(*scatter_chunk_size, Some(500));

    // A scatter over a non-empty collection gathers into a non-empty array.
    assert_eq!(
        fragment.outputs[0].ty,
        Type::Array {
            items: Box::new(Type::Int),
            non_empty: true
        }
    );
}

#[test]
fn test_complex_conditional_goes_through_subworkflow() {
    // if (flag) { inc(x); dec(inc.result) }
    let inc = build::int_task("inc", &["a"]);
    let dec = build::int_task("dec", &["a"]);

    let body = vec![WorkflowElement::Conditional(Conditional {
        expr: Expr::ident("flag", Type::Boolean),
        body: vec![
            build::call(&inc, &[("a", Expr::ident("x", Type::Int))]),
            build::call(&dec, &[("a", build::call_output("inc", "result", Type::Int))]),
        ],
    })];

    let wf = build::workflow(
        "nested",
        vec![
            Declaration::input("flag", Type::Boolean),
            Declaration::input("x", Type::Int),
        ],
        vec![],
        body,
    );
    let bundle = compiler(true)
        .compile(&build::document(vec![inc, dec], Some(wf)))
        .unwrap();

    // The body folds into a locked sub-workflow launched by the fragment.
    assert_eq!(
        bundle.dependencies(),
        &["inc", "dec", "nested_block_0", "nested_frag_0", "nested"]
    );

    let Some(Callable::Workflow(sub)) = bundle.get("nested_block_0") else {
        panic!("missing sub-workflow");
    };
    assert!(sub.locked);
    assert_eq!(sub.level, WorkflowLevel::Sub);
    assert_eq!(sub.stages.len(), 2);

    // The sub-workflow republishes both call results, unlifted.
    assert_eq!(
        sub.outputs
            .iter()
            .map(|(p, _)| (p.name.as_str(), p.ty.clone()))
            .collect::<Vec<_>>(),
        vec![
            ("inc___result", Type::Int),
            ("dec___result", Type::Int),
        ]
    );

    // The fragment lifts them to optional.
    let Some(Callable::Application(fragment)) = bundle.get("nested_frag_0") else {
        panic!("missing fragment");
    };
    let ApplicationKind::WfFragment { call_names, .. } = &fragment.kind else {
        panic!("not a fragment kind");
    };
    assert_eq!(call_names, &["nested_block_0"]);
    assert!(fragment.outputs.iter().all(|p| p.ty.is_optional()));
}

#[test]
fn test_reorg_appends_terminal_stage() {
    let mut options = CompileOptions::new("project-1", "/builds");
    options.locked = true;
    options.reorg = dxforge::ReorgSetting::Standard;

    let bundle = Compiler::new(options)
        .compile(&linear_document())
        .unwrap();

    let Some(Callable::Application(reorg)) = bundle.get("linear_reorg") else {
        panic!("missing reorg helper");
    };
    assert_eq!(reorg.kind, ApplicationKind::WfOutputReorg);

    let Some(Callable::Workflow(wf)) = bundle.get("linear") else {
        panic!("missing workflow");
    };
    let last = wf.stages.last().unwrap();
    assert_eq!(last.id, StageId::reorg());
    assert_eq!(last.callee, "linear_reorg");
    // No file-typed outputs here, so the reorg stage reads an empty set.
    assert_eq!(last.inputs, vec![StageInput::ArrayLink(vec![])]);
}

#[test]
fn test_reorg_links_composite_outputs_through_companions() {
    // A schema-typed output holding a file: the files inside it are only
    // reachable through the companion flat-files field, so that is what
    // the reorg stage must read, never the hash-classed value field.
    let aligned = Type::Schema {
        name: "Aligned".into(),
        fields: IndexMap::from([("bam".to_string(), Type::File)]),
    };

    let mut stats = build::int_task("stats", &["a"]);
    stats.outputs[0].ty = aligned.clone();

    let wf = build::workflow(
        "ro",
        vec![Declaration::input("a", Type::Int)],
        vec![Declaration::bound(
            "s",
            aligned.clone(),
            build::call_output("stats", "result", aligned),
        )],
        vec![build::call(&stats, &[("a", Expr::ident("a", Type::Int))])],
    );

    let mut options = CompileOptions::new("project-1", "/builds");
    options.locked = true;
    options.reorg = dxforge::ReorgSetting::Standard;
    let bundle = Compiler::new(options)
        .compile(&build::document(vec![stats], Some(wf)))
        .unwrap();

    let Some(Callable::Workflow(wf)) = bundle.get("ro") else {
        panic!("missing workflow");
    };
    let reorg = wf.stages.last().unwrap();
    assert_eq!(
        reorg.inputs,
        vec![StageInput::ArrayLink(vec![StageInput::Link {
            stage: StageId::at(0),
            name: EncodedName::from_encoded("result___dxfiles").unwrap(),
        }])]
    );
}

#[test]
fn test_dynamic_input_default_needs_common_helper() {
    // Int y = x + 1 as a workflow input default does not fold, so even a
    // locked workflow gets the common helper to evaluate it.
    let inc = build::int_task("inc", &["a"]);
    let wf = build::workflow(
        "defaults",
        vec![
            Declaration::input("x", Type::Int),
            Declaration::bound(
                "y",
                Type::Int,
                Expr::apply(
                    "add",
                    vec![Expr::ident("x", Type::Int), Expr::int(1)],
                    Type::Int,
                ),
            ),
        ],
        vec![],
        vec![build::call(&inc, &[("a", Expr::ident("y", Type::Int))])],
    );
    let bundle = compiler(true)
        .compile(&build::document(vec![inc], Some(wf)))
        .unwrap();

    let Some(Callable::Application(common)) = bundle.get("defaults_common") else {
        panic!("expected a common helper for the dynamic default");
    };
    assert_eq!(common.kind, ApplicationKind::WfCommonInputs);

    // The demoted input is optional on the workflow interface.
    let Some(Callable::Workflow(wf)) = bundle.get("defaults") else {
        panic!("missing workflow");
    };
    let y = wf
        .inputs
        .iter()
        .find(|(p, _)| p.name.as_str() == "y")
        .map(|(p, _)| p)
        .unwrap();
    assert!(y.ty.is_optional());
}
