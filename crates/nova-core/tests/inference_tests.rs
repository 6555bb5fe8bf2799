//! Semantic-analysis scenarios: collection-factory inference, generic
//! constructor inference, numeric promotion and the compatibility
//! warnings around declared types.

mod common;

use common::*;
use nova_core::ast::expression::BinaryOp;
use nova_core::ast::statement::Declaration;
use nova_core::diagnostics::{DiagnosticHandler, DiagnosticLevel};
use nova_core::sema::NovaType;

/// Analyze `fun test() { <statements> }` and return the handler.
fn analyze_body(
    statements: Vec<nova_core::ast::statement::Statement>,
) -> (
    nova_core::ast::Module,
    std::sync::Arc<nova_core::diagnostics::CollectingDiagnosticHandler>,
) {
    let mut module = module(
        "test",
        vec![Declaration::Function(function(
            "test",
            Vec::new(),
            None,
            block(statements),
        ))],
    );
    let (_, handler) = analyze(&mut module);
    (module, handler)
}

/// The resolved type of the initializer of the first `val` in the body.
fn first_initializer_type(module: &nova_core::ast::Module) -> NovaType {
    let Declaration::Function(function) = &module.declarations[0] else {
        panic!("expected a function");
    };
    for statement in &function.body.statements {
        if let nova_core::ast::statement::Statement::Variable(declaration) = statement {
            return declaration
                .initializer
                .resolved_type()
                .expect("initializer was not annotated")
                .clone();
        }
    }
    panic!("no variable declaration in body");
}

#[test]
fn test_list_of_promotes_numeric_elements() {
    let (module, handler) = analyze_body(vec![val(
        "xs",
        None,
        call("listOf", vec![int(1), double(2.0)]),
    )]);

    assert!(!handler.has_errors());
    assert_eq!(
        first_initializer_type(&module),
        NovaType::list_of(NovaType::DOUBLE)
    );
}

#[test]
fn test_list_of_mixed_elements_widens_to_any() {
    let (module, _) = analyze_body(vec![val(
        "xs",
        None,
        call("listOf", vec![int(1), string("x")]),
    )]);

    assert_eq!(
        first_initializer_type(&module),
        NovaType::list_of(NovaType::Any)
    );
}

#[test]
fn test_empty_list_infers_container_of_any() {
    let (module, _) = analyze_body(vec![val("xs", None, call("listOf", Vec::new()))]);

    assert_eq!(
        first_initializer_type(&module),
        NovaType::list_of(NovaType::Any)
    );
}

#[test]
fn test_explicit_type_argument_overrides_inference() {
    let (module, _) = analyze_body(vec![val(
        "xs",
        None,
        call_with_type_args("listOf", Vec::new(), vec![named_type("Int")]),
    )]);

    assert_eq!(
        first_initializer_type(&module),
        NovaType::list_of(NovaType::INT)
    );
}

#[test]
fn test_map_of_infers_key_and_value_types() {
    let (module, handler) = analyze_body(vec![val(
        "m",
        None,
        call(
            "mapOf",
            vec![pair(int(1), string("a")), pair(int(2), string("b"))],
        ),
    )]);

    assert!(!handler.has_errors());
    assert_eq!(
        first_initializer_type(&module),
        NovaType::map_of(NovaType::INT, NovaType::String)
    );
}

#[test]
fn test_set_of_folds_elements() {
    let (module, _) = analyze_body(vec![val(
        "s",
        None,
        call("setOf", vec![int(1), long(2)]),
    )]);

    assert_eq!(
        first_initializer_type(&module),
        NovaType::class("Set", vec![NovaType::LONG])
    );
}

#[test]
fn test_generic_constructor_inference() {
    let mut module = module(
        "test",
        vec![
            Declaration::Class(generic_value_class("Box", "T")),
            Declaration::Function(function(
                "test",
                Vec::new(),
                None,
                block(vec![
                    val("a", None, call("Box", vec![int(42)])),
                    val("b", None, call("Box", vec![string("hello")])),
                ]),
            )),
        ],
    );
    let (_, handler) = analyze(&mut module);
    assert!(!handler.has_errors());

    let Declaration::Function(function) = &module.declarations[1] else {
        panic!("expected a function");
    };
    let types: Vec<NovaType> = function
        .body
        .statements
        .iter()
        .map(|statement| {
            let nova_core::ast::statement::Statement::Variable(declaration) = statement else {
                panic!("expected val");
            };
            declaration.initializer.resolved_type().unwrap().clone()
        })
        .collect();

    assert_eq!(types[0], NovaType::class("Box", vec![NovaType::INT]));
    assert_eq!(types[1], NovaType::class("Box", vec![NovaType::String]));
}

#[test]
fn test_numeric_binary_promotion() {
    let (module, handler) = analyze_body(vec![val(
        "x",
        None,
        binary(BinaryOp::Add, int(1), double(2.0)),
    )]);

    assert!(!handler.has_errors());
    assert_eq!(first_initializer_type(&module), NovaType::DOUBLE);
}

#[test]
fn test_string_concatenation_special_case() {
    let (module, handler) = analyze_body(vec![val(
        "s",
        None,
        binary(BinaryOp::Add, string("n = "), int(1)),
    )]);

    assert!(!handler.has_errors());
    assert_eq!(first_initializer_type(&module), NovaType::String);
}

#[test]
fn test_comparison_yields_boolean() {
    let (module, _) = analyze_body(vec![val(
        "b",
        None,
        binary(BinaryOp::LessThan, int(1), double(2.0)),
    )]);

    assert_eq!(first_initializer_type(&module), NovaType::Boolean);
}

// -----------------------------------------------------------------------------
// Declared types stay authoritative; mismatches are warnings
// -----------------------------------------------------------------------------

#[test]
fn test_declared_type_is_authoritative() {
    let (module, handler) = analyze_body(vec![val(
        "x",
        Some(named_type("Double")),
        int(1),
    )]);

    // Int widens into Double without complaint
    assert_eq!(handler.warning_count(), 0);
    let Declaration::Function(function) = &module.declarations[0] else {
        panic!();
    };
    let nova_core::ast::statement::Statement::Variable(_declaration) = &function.body.statements[0]
    else {
        panic!();
    };
}

#[test]
fn test_null_to_non_nullable_warns() {
    let (_, handler) = analyze_body(vec![val("x", Some(named_type("String")), null())]);

    let warnings = warnings(&handler);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("type mismatch"));
    assert!(warnings[0].contains("non-nullable"));
}

#[test]
fn test_null_into_nullable_is_fine() {
    let (_, handler) = analyze_body(vec![val(
        "x",
        Some(nullable_type(named_type("String"))),
        null(),
    )]);

    assert_eq!(handler.warning_count(), 0);
}

#[test]
fn test_numeric_narrowing_warns() {
    let (_, handler) = analyze_body(vec![val("x", Some(named_type("Int")), double(1.5))]);

    let warnings = warnings(&handler);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("type mismatch"));
    assert!(warnings[0].contains("narrows"));
}

#[test]
fn test_incompatible_types_warn() {
    let (_, handler) = analyze_body(vec![val("x", Some(named_type("Boolean")), string("no"))]);

    let warnings = warnings(&handler);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("type mismatch"));
    assert!(warnings[0].contains("expected 'Boolean'"));
}

#[test]
fn test_type_mismatches_never_error() {
    let (_, handler) = analyze_body(vec![
        val("a", Some(named_type("Int")), string("x")),
        val("b", Some(named_type("String")), null()),
    ]);

    assert!(!handler.has_errors());
    assert_eq!(handler.warning_count(), 2);
}

#[test]
fn test_unresolved_identifier_is_an_error() {
    let (_, handler) = analyze_body(vec![expr_stmt(var("missing"))]);

    assert!(handler.has_errors());
    let errors: Vec<_> = handler
        .get_diagnostics()
        .into_iter()
        .filter(|d| d.level == DiagnosticLevel::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("unresolved identifier 'missing'"));
}

#[test]
fn test_shadowing_resolves_to_innermost() {
    use nova_core::ast::statement::Statement;

    // val x = 1; { val x = "s"; val y = x }  =>  y: String
    let inner = Statement::Block(block(vec![
        val("x", None, string("s")),
        val("y", None, var("x")),
    ]));
    let (module, handler) = analyze_body(vec![val("x", None, int(1)), inner]);

    assert!(!handler.has_errors());
    let Declaration::Function(function) = &module.declarations[0] else {
        panic!();
    };
    let Statement::Block(inner_block) = &function.body.statements[1] else {
        panic!();
    };
    let Statement::Variable(y_declaration) = &inner_block.statements[1] else {
        panic!();
    };
    assert_eq!(
        y_declaration.initializer.resolved_type(),
        Some(&NovaType::String)
    );
}

#[test]
fn test_reassignment_of_val_warns() {
    use nova_core::ast::expression::{Expression, ExpressionKind};

    let assignment = Expression::new(
        ExpressionKind::Assignment(Box::new(var("x")), Box::new(int(2))),
        span(),
    );
    let (_, handler) = analyze_body(vec![val("x", None, int(1)), expr_stmt(assignment)]);

    let warnings = warnings(&handler);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("reassignment of immutable value 'x'"));
}

#[test]
fn test_condition_must_be_boolean() {
    use nova_core::ast::expression::{Expression, ExpressionKind, IfExpression};

    let if_expr = Expression::new(
        ExpressionKind::If(IfExpression {
            condition: Box::new(int(1)),
            then_branch: block(vec![expr_stmt(int(1))]),
            else_branch: None,
            span: span(),
        }),
        span(),
    );
    let (_, handler) = analyze_body(vec![expr_stmt(if_expr)]);

    let warnings = warnings(&handler);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("condition must be 'Boolean'"));
}
