//! MIR lowering and binary emission: descriptor discipline, the fatal
//! unmapped-type guard, and container structure.

use nova_core::codegen::builder::{FORMAT_VERSION, MAGIC, TAG_UTF8};
use nova_core::codegen::CodeGenerator;
use nova_core::hir::{
    HirBlock, HirDecl, HirExpr, HirExprKind, HirField, HirFunction, HirFunctionKind, HirLiteral,
    HirModule, HirParameter, HirReturn, HirStmt, HirType,
};
use nova_core::mir::MirLowering;
use nova_core::CompileError;
use nova_core::span::Span;
use std::rc::Rc;

fn sp() -> Span {
    Span::synthetic()
}

fn simple_function(name: &str, parameters: Vec<HirParameter>, return_type: HirType) -> HirFunction {
    let value = HirExpr::literal(HirLiteral::Int(1), HirType::int(), sp());
    let body = Rc::new(HirStmt::Block(HirBlock {
        statements: vec![Rc::new(HirStmt::Return(HirReturn {
            value: Some(value),
            span: sp(),
        }))],
        span: sp(),
    }));
    HirFunction {
        name: name.to_string(),
        kind: HirFunctionKind::Function,
        type_parameters: Vec::new(),
        parameters,
        return_type,
        body: Some(body),
        is_inline: false,
        span: sp(),
    }
}

#[test]
fn test_module_functions_become_static_methods() {
    let module = HirModule::new(
        "demo",
        vec![Rc::new(HirDecl::Function(simple_function(
            "answer",
            Vec::new(),
            HirType::int(),
        )))],
        sp(),
    );

    let mir = MirLowering::new().lower_module(&module).unwrap();
    assert_eq!(mir.classes.len(), 1);
    assert_eq!(mir.classes[0].name, "demo.Module");

    let method = &mir.classes[0].methods[0];
    assert_eq!(method.name, "answer");
    assert_eq!(method.descriptor, "()I");
}

#[test]
fn test_stray_type_variable_is_a_fatal_unmapped_type() {
    // A function whose signature leaks an undeclared type variable: the
    // mapping table must refuse it.
    let module = HirModule::new(
        "demo",
        vec![Rc::new(HirDecl::Function(simple_function(
            "broken",
            vec![HirParameter {
                name: "value".to_string(),
                ty: HirType::unresolved("T"),
                span: sp(),
            }],
            HirType::unit(),
        )))],
        sp(),
    );

    let result = MirLowering::new().lower_module(&module);
    assert!(matches!(result, Err(CompileError::UnmappedType { name, .. }) if name == "T"));
}

#[test]
fn test_declared_type_parameters_erase_to_the_top_type() {
    // The same signature is fine when the function declares T: it erases.
    let mut function = simple_function(
        "generic",
        vec![HirParameter {
            name: "value".to_string(),
            ty: HirType::unresolved("T"),
            span: sp(),
        }],
        HirType::unit(),
    );
    function.type_parameters = vec![nova_core::hir::HirTypeParameter {
        name: "T".to_string(),
        is_reified: false,
    }];

    let module = HirModule::new(
        "demo",
        vec![Rc::new(HirDecl::Function(function))],
        sp(),
    );
    let mir = MirLowering::new().lower_module(&module).unwrap();

    let method = &mir.classes[0].methods[0];
    assert_eq!(method.descriptor, "(Lnova/lang/Any;)V");
}

#[test]
fn test_module_fields_get_a_static_initializer() {
    let field = HirField {
        name: "answer".to_string(),
        ty: HirType::int(),
        mutable: false,
        initializer: Some(HirExpr::literal(HirLiteral::Int(42), HirType::int(), sp())),
        span: sp(),
    };
    let module = HirModule::new(
        "demo",
        vec![Rc::new(HirDecl::Field(field))],
        sp(),
    );

    let mir = MirLowering::new().lower_module(&module).unwrap();
    let class = &mir.classes[0];

    assert_eq!(class.fields.len(), 1);
    assert_eq!(class.fields[0].descriptor, "I");
    assert!(class.methods.iter().any(|m| m.name == "<clinit>"));
}

#[test]
fn test_container_header_layout() {
    let module = HirModule::new(
        "demo",
        vec![Rc::new(HirDecl::Function(simple_function(
            "answer",
            Vec::new(),
            HirType::int(),
        )))],
        sp(),
    );
    let mir = MirLowering::new().lower_module(&module).unwrap();
    let artifacts = CodeGenerator::new().emit_module(&mir).unwrap();
    let blob = artifacts.get("demo.Module").expect("missing artifact");

    assert_eq!(&blob[0..4], &MAGIC.to_be_bytes());
    assert_eq!(u16::from_be_bytes([blob[4], blob[5]]), FORMAT_VERSION);

    // The first pool entry follows the count and must be a utf8 tag
    let pool_count = u16::from_be_bytes([blob[6], blob[7]]);
    assert!(pool_count > 0);
    assert_eq!(blob[8], TAG_UTF8);
}

#[test]
fn test_blobs_are_independent_per_class() {
    let module = HirModule::new(
        "demo",
        vec![
            Rc::new(HirDecl::Function(simple_function(
                "one",
                Vec::new(),
                HirType::int(),
            ))),
            Rc::new(HirDecl::Class(nova_core::hir::HirClass {
                name: "Thing".to_string(),
                type_parameters: Vec::new(),
                superclass: None,
                fields: Vec::new(),
                constructor: None,
                methods: Vec::new(),
                is_enum: false,
                enum_entries: Vec::new(),
                span: sp(),
            })),
        ],
        sp(),
    );

    let mir = MirLowering::new().lower_module(&module).unwrap();
    let artifacts = CodeGenerator::new().emit_module(&mir).unwrap();

    assert_eq!(artifacts.len(), 2);
    assert!(artifacts.contains_key("demo.Module"));
    assert!(artifacts.contains_key("demo.Thing"));
    // Each blob stands alone with its own header
    for blob in artifacts.values() {
        assert_eq!(&blob[0..4], &MAGIC.to_be_bytes());
    }
}
