//! End-to-end pipeline runs: AST in, binary artifacts out, with
//! diagnostics gating and the write-once annotation-slot contract.

mod common;

use common::*;
use nova_core::ast::statement::Declaration;
use nova_core::config::{CompilerOptions, OptimizationLevel};
use nova_core::diagnostics::{CollectingDiagnosticHandler, DiagnosticHandler, DiagnosticLevel};
use nova_core::pipeline::Pipeline;
use nova_core::sema::SemanticAnalyzer;
use nova_core::CompileError;
use std::sync::Arc;

fn pipeline() -> (Pipeline, Arc<CollectingDiagnosticHandler>) {
    let handler = Arc::new(CollectingDiagnosticHandler::new());
    (
        Pipeline::new(CompilerOptions::default(), handler.clone()),
        handler,
    )
}

fn demo_module() -> nova_core::ast::Module {
    // class Box<T>(val value: T)
    // fun main() { val b = Box(42); println(b.value) }
    module(
        "demo",
        vec![
            Declaration::Class(generic_value_class("Box", "T")),
            Declaration::Function(function(
                "main",
                Vec::new(),
                None,
                block(vec![
                    val("b", None, call("Box", vec![int(42)])),
                    expr_stmt(call("println", vec![member(var("b"), "value")])),
                ]),
            )),
        ],
    )
}

#[test]
fn test_compiles_to_one_blob_per_class() {
    let (pipeline, _) = pipeline();
    let mut module = demo_module();
    let unit = pipeline.compile(&mut module).expect("compilation failed");

    assert!(unit.has_artifacts());
    let names: Vec<&String> = unit.artifacts.keys().collect();
    assert_eq!(names, vec!["demo.Module", "demo.Box"]);
}

#[test]
fn test_blobs_carry_the_container_magic() {
    let (pipeline, _) = pipeline();
    let mut module = demo_module();
    let unit = pipeline.compile(&mut module).unwrap();

    for blob in unit.artifacts.values() {
        assert_eq!(&blob[0..4], b"NOVA");
    }
}

#[test]
fn test_output_is_deterministic_across_runs() {
    let (pipeline_a, _) = pipeline();
    let mut module_a = demo_module();
    let unit_a = pipeline_a.compile(&mut module_a).unwrap();

    let (pipeline_b, _) = pipeline();
    let mut module_b = demo_module();
    let unit_b = pipeline_b.compile(&mut module_b).unwrap();

    let keys_a: Vec<&String> = unit_a.artifacts.keys().collect();
    let keys_b: Vec<&String> = unit_b.artifacts.keys().collect();
    assert_eq!(keys_a, keys_b);
    for (key, blob) in &unit_a.artifacts {
        assert_eq!(Some(blob), unit_b.artifacts.get(key));
    }
}

#[test]
fn test_analysis_errors_gate_code_generation() {
    let (pipeline, handler) = pipeline();
    let mut module = module(
        "demo",
        vec![Declaration::Function(function(
            "main",
            Vec::new(),
            None,
            block(vec![expr_stmt(var("missing"))]),
        ))],
    );
    let unit = pipeline.compile(&mut module).expect("pipeline errored");

    assert!(!unit.has_artifacts());
    assert!(handler.has_errors());
    assert!(unit
        .diagnostics
        .iter()
        .any(|d| d.level == DiagnosticLevel::Error));
}

#[test]
fn test_warnings_do_not_gate_code_generation() {
    let (pipeline, handler) = pipeline();
    let mut module = module(
        "demo",
        vec![Declaration::Function(function(
            "main",
            Vec::new(),
            None,
            block(vec![val("x", Some(named_type("Int")), double(1.5))]),
        ))],
    );
    let unit = pipeline.compile(&mut module).unwrap();

    assert!(unit.has_artifacts());
    assert_eq!(handler.warning_count(), 1);
    assert!(!handler.has_errors());
}

#[test]
fn test_no_emit_skips_artifacts_but_keeps_diagnostics() {
    let handler = Arc::new(CollectingDiagnosticHandler::new());
    let options = CompilerOptions {
        emit: false,
        ..CompilerOptions::default()
    };
    let pipeline = Pipeline::new(options, handler.clone());

    let mut module = demo_module();
    let unit = pipeline.compile(&mut module).unwrap();
    assert!(!unit.has_artifacts());
}

#[test]
fn test_reified_function_compiles_end_to_end() {
    use nova_core::ast::statement::FunctionDeclaration;

    // inline fun <reified T> describe(value: T): String { return "x" }
    // fun main() { describe(1); describe("s") }
    let describe = FunctionDeclaration {
        name: ident("describe"),
        type_parameters: vec![reified_type_param("T")],
        receiver: None,
        parameters: vec![param("value", named_type("T"))],
        return_type: Some(named_type("String")),
        body: block(vec![ret(Some(string("x")))]),
        is_inline: true,
        span: span(),
    };
    let mut module = module(
        "demo",
        vec![
            Declaration::Function(describe),
            Declaration::Function(function(
                "main",
                Vec::new(),
                None,
                block(vec![
                    expr_stmt(call("describe", vec![int(1)])),
                    expr_stmt(call("describe", vec![string("s")])),
                ]),
            )),
        ],
    );

    let (pipeline, handler) = pipeline();
    let unit = pipeline.compile(&mut module).expect("compilation failed");

    assert!(unit.has_artifacts());
    assert!(!handler.has_errors());
}

#[test]
fn test_annotation_slots_are_filled_after_compilation() {
    let (pipeline, _) = pipeline();
    let mut module = demo_module();
    pipeline.compile(&mut module).unwrap();

    let Declaration::Function(main) = &module.declarations[1] else {
        panic!("expected main");
    };
    let nova_core::ast::statement::Statement::Variable(declaration) = &main.body.statements[0]
    else {
        panic!("expected val b");
    };

    // Both channels were written: the analyzer's structural type and the
    // lowering's HIR type.
    assert!(declaration.initializer.resolved_type().is_some());
    assert!(declaration.initializer.hir_type().is_some());
}

#[test]
fn test_resolved_type_slot_is_write_once() {
    let (pipeline, _) = pipeline();
    let mut module = demo_module();
    pipeline.compile(&mut module).unwrap();

    // Re-running analysis on the same AST must trip the write-once check
    let handler = Arc::new(CollectingDiagnosticHandler::new());
    let analyzer = SemanticAnalyzer::new(handler);
    let result = analyzer.analyze(&mut module);
    assert!(matches!(result, Err(CompileError::Internal { .. })));
}

#[test]
fn test_optimization_level_preserves_output_shape() {
    for level in [
        OptimizationLevel::O0,
        OptimizationLevel::O1,
        OptimizationLevel::O2,
        OptimizationLevel::O3,
    ] {
        let handler = Arc::new(CollectingDiagnosticHandler::new());
        let options = CompilerOptions {
            optimization_level: level,
            ..CompilerOptions::default()
        };
        let pipeline = Pipeline::new(options, handler);
        let mut module = demo_module();
        let unit = pipeline.compile(&mut module).unwrap();

        let names: Vec<&String> = unit.artifacts.keys().collect();
        assert_eq!(names, vec!["demo.Module", "demo.Box"], "level {:?}", level);
    }
}
