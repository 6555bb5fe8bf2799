//! AST-to-HIR lowering: desugaring of interpolation, safe calls, `when`,
//! destructuring, guard statements and extension functions, plus the
//! write-once annotation-slot contract.

mod common;

use common::*;
use nova_core::ast::expression::{
    Expression, ExpressionKind, IfExpression, InterpolationPart, WhenBranch, WhenCondition,
    WhenExpression,
};
use nova_core::ast::statement::{
    Declaration, DestructuringDeclaration, GuardStatement, ReturnStatement, Statement,
};
use nova_core::ast::Module;
use nova_core::hir::{
    HirBinaryOp, HirCallee, HirDecl, HirExprKind, HirLiteral, HirModule, HirStmt, HirTypeKind,
};
use nova_core::lower::HirLowering;
use nova_core::CompileError;
use std::rc::Rc;

fn lower(module: &mut Module) -> Rc<HirModule> {
    let (analysis, handler) = analyze(module);
    assert!(
        !nova_core::diagnostics::DiagnosticHandler::has_errors(handler.as_ref()),
        "unexpected analysis errors"
    );
    HirLowering::new(&analysis)
        .lower_module(module)
        .expect("lowering failed")
}

fn lower_body(statements: Vec<Statement>) -> Rc<HirModule> {
    let mut module = module(
        "test",
        vec![Declaration::Function(function(
            "test",
            Vec::new(),
            None,
            block(statements),
        ))],
    );
    lower(&mut module)
}

fn function_body<'a>(hir: &'a HirModule, name: &str) -> &'a [Rc<HirStmt>] {
    for decl in &hir.declarations {
        if let HirDecl::Function(function) = decl.as_ref() {
            if function.name == name {
                let body = function.body.as_ref().expect("missing body");
                let HirStmt::Block(block) = body.as_ref() else {
                    panic!("body is not a block");
                };
                return &block.statements;
            }
        }
    }
    panic!("function '{}' not found", name);
}

fn local_initializer(stmt: &Rc<HirStmt>) -> &Rc<nova_core::hir::HirExpr> {
    let HirStmt::Local(local) = stmt.as_ref() else {
        panic!("expected a local declaration");
    };
    local.initializer.as_ref().expect("missing initializer")
}

#[test]
fn test_interpolation_lowers_to_concat_calls() {
    // "n = ${1}" => "n = ".concat(1.toString())
    let interpolation = Expression::new(
        ExpressionKind::Interpolation(vec![
            InterpolationPart::Literal("n = ".to_string()),
            InterpolationPart::Expression(int(1)),
        ]),
        span(),
    );
    let hir = lower_body(vec![val("s", None, interpolation)]);

    let body = function_body(&hir, "test");
    let initializer = local_initializer(&body[0]);

    let HirExprKind::Call(call) = &initializer.kind else {
        panic!("expected a call, got {:?}", initializer.kind);
    };
    let HirCallee::Method { receiver, name } = &call.callee else {
        panic!("expected a method callee");
    };
    assert_eq!(name, "concat");
    assert_eq!(
        receiver.as_literal(),
        Some(&HirLiteral::String("n = ".to_string()))
    );

    // The argument is 1.toString()
    let HirExprKind::Call(inner) = &call.args[0].kind else {
        panic!("expected a toString call");
    };
    let HirCallee::Method { name, .. } = &inner.callee else {
        panic!("expected a method callee");
    };
    assert_eq!(name, "toString");
}

#[test]
fn test_string_plus_lowers_to_concat() {
    use nova_core::ast::expression::BinaryOp;

    let hir = lower_body(vec![val(
        "s",
        None,
        binary(BinaryOp::Add, string("a"), string("b")),
    )]);

    let initializer = local_initializer(&function_body(&hir, "test")[0]);
    let HirExprKind::Call(call) = &initializer.kind else {
        panic!("string + should lower to a concat call");
    };
    let HirCallee::Method { name, .. } = &call.callee else {
        panic!("expected a method callee");
    };
    assert_eq!(name, "concat");
}

#[test]
fn test_safe_member_lowers_to_null_check_conditional() {
    // val n: String? = null; val l = n?.length
    let safe_member = Expression::new(
        ExpressionKind::SafeMember(Box::new(var("n")), ident("length")),
        span(),
    );
    let hir = lower_body(vec![
        val("n", Some(nullable_type(named_type("String"))), null()),
        val("l", None, safe_member),
    ]);

    let initializer = local_initializer(&function_body(&hir, "test")[1]);
    assert!(initializer.ty.nullable);

    let HirExprKind::If(hir_if) = &initializer.kind else {
        panic!("safe access should lower to a conditional");
    };
    let HirExprKind::Binary(condition) = &hir_if.condition.kind else {
        panic!("expected a null comparison");
    };
    assert_eq!(condition.op, HirBinaryOp::Eq);
    assert_eq!(condition.rhs.as_literal(), Some(&HirLiteral::Null));

    assert_eq!(hir_if.then_branch.as_literal(), Some(&HirLiteral::Null));
    let else_branch = hir_if.else_branch.as_ref().expect("missing access arm");
    assert!(matches!(else_branch.kind, HirExprKind::Member(_)));
}

#[test]
fn test_if_expression_lowers_to_conditional() {
    let if_expr = Expression::new(
        ExpressionKind::If(IfExpression {
            condition: Box::new(boolean(true)),
            then_branch: block(vec![expr_stmt(int(1))]),
            else_branch: Some(block(vec![expr_stmt(int(2))])),
            span: span(),
        }),
        span(),
    );
    let hir = lower_body(vec![val("x", None, if_expr)]);

    let initializer = local_initializer(&function_body(&hir, "test")[0]);
    assert_eq!(initializer.ty.kind, HirTypeKind::Int);
    let HirExprKind::If(hir_if) = &initializer.kind else {
        panic!("expected a conditional");
    };
    assert!(hir_if.else_branch.is_some());
}

#[test]
fn test_when_with_multiple_conditions_lowers_to_disjunction() {
    // when (x) { 1, 2 -> "low"; else -> "high" }
    let when_expr = Expression::new(
        ExpressionKind::When(WhenExpression {
            subject: Some(Box::new(var("x"))),
            branches: vec![WhenBranch {
                conditions: vec![
                    WhenCondition::Expression(int(1)),
                    WhenCondition::Expression(int(2)),
                ],
                body: block(vec![expr_stmt(string("low"))]),
                span: span(),
            }],
            else_branch: Some(block(vec![expr_stmt(string("high"))])),
            span: span(),
        }),
        span(),
    );
    let hir = lower_body(vec![val("x", None, int(1)), val("r", None, when_expr)]);

    let initializer = local_initializer(&function_body(&hir, "test")[1]);

    // The subject is bound once in a block, then tested
    let HirExprKind::Block(outer) = &initializer.kind else {
        panic!("when should bind its subject in a block");
    };
    assert!(matches!(outer.statements[0].as_ref(), HirStmt::Local(_)));
    let value = outer.value.as_ref().expect("missing when chain");

    let HirExprKind::If(hir_if) = &value.kind else {
        panic!("expected a conditional chain");
    };
    let HirExprKind::Binary(condition) = &hir_if.condition.kind else {
        panic!("expected a disjunction");
    };
    assert_eq!(condition.op, HirBinaryOp::Or);
}

#[test]
fn test_destructuring_lowers_to_component_calls() {
    // val p = 1 to "a"; val (k, v) = p
    let destructuring = Statement::Destructuring(DestructuringDeclaration {
        mutable: false,
        names: vec![ident("k"), ident("v")],
        initializer: var("p"),
        span: span(),
    });
    let hir = lower_body(vec![val("p", None, pair(int(1), string("a"))), destructuring]);

    let body = function_body(&hir, "test");
    // p, fresh temp, k, v
    assert_eq!(body.len(), 4);

    for (index, name) in [(2usize, "component1"), (3usize, "component2")] {
        let initializer = local_initializer(&body[index]);
        let HirExprKind::Call(call) = &initializer.kind else {
            panic!("expected a component call");
        };
        let HirCallee::Method { name: method, .. } = &call.callee else {
            panic!("expected a method callee");
        };
        assert_eq!(method, name);
    }

    // Component types come from the Pair's arguments
    let HirStmt::Local(k) = body[2].as_ref() else {
        panic!();
    };
    assert_eq!(k.name, "k");
    assert_eq!(k.ty.kind, HirTypeKind::Int);
}

#[test]
fn test_guard_lowers_to_negated_check_and_binding() {
    // guard val x = n else { return }
    let guard = Statement::Guard(GuardStatement {
        name: ident("x"),
        type_annotation: None,
        initializer: var("n"),
        else_branch: block(vec![Statement::Return(ReturnStatement {
            value: None,
            span: span(),
        })]),
        span: span(),
    });
    let hir = lower_body(vec![
        val("n", Some(nullable_type(named_type("String"))), null()),
        guard,
        expr_stmt(var("x")),
    ]);

    let body = function_body(&hir, "test");
    // n, $tmp, if-check, x
    assert_eq!(body.len(), 5);

    let HirStmt::Expr(check) = body[2].as_ref() else {
        panic!("expected the null check");
    };
    let HirExprKind::If(hir_if) = &check.expr.kind else {
        panic!("expected a conditional");
    };
    let HirExprKind::Binary(condition) = &hir_if.condition.kind else {
        panic!("expected a null comparison");
    };
    assert_eq!(condition.op, HirBinaryOp::Eq);

    // The exit branch contains the return
    let HirExprKind::Block(exit) = &hir_if.then_branch.kind else {
        panic!("expected the exit block");
    };
    assert!(matches!(exit.statements[0].as_ref(), HirStmt::Return(_)));

    // The binding is the non-null view
    let HirStmt::Local(binding) = body[3].as_ref() else {
        panic!("expected the guard binding");
    };
    assert_eq!(binding.name, "x");
    assert!(!binding.ty.nullable);
    let cast = binding.initializer.as_ref().unwrap();
    assert!(matches!(cast.kind, HirExprKind::TypeCast(_)));
}

#[test]
fn test_extension_function_lowers_to_static_style_call() {
    // fun String.shout(): String { return "!" }   "hi".shout()
    let mut extension = function(
        "shout",
        Vec::new(),
        Some(named_type("String")),
        block(vec![ret(Some(string("!")))]),
    );
    extension.receiver = Some(named_type("String"));

    let call_site = method_call(string("hi"), "shout", Vec::new());
    let mut module = module(
        "test",
        vec![
            Declaration::Function(extension),
            Declaration::Function(function(
                "test",
                Vec::new(),
                None,
                block(vec![val("s", None, call_site)]),
            )),
        ],
    );
    let hir = lower(&mut module);

    // The declaration became a static-style function with a self parameter
    let HirDecl::Function(lowered) = hir.declarations[0].as_ref() else {
        panic!("expected a function");
    };
    assert_eq!(lowered.name, "String$shout");
    assert_eq!(lowered.parameters.len(), 1);
    assert_eq!(lowered.parameters[0].name, "self");

    // The call site passes the receiver as the first argument
    let initializer = local_initializer(&function_body(&hir, "test")[0]);
    let HirExprKind::Call(call) = &initializer.kind else {
        panic!("expected a call");
    };
    let HirCallee::Function(name) = &call.callee else {
        panic!("expected a direct call");
    };
    assert_eq!(name, "String$shout");
    assert_eq!(call.args.len(), 1);
    assert_eq!(
        call.args[0].as_literal(),
        Some(&HirLiteral::String("hi".to_string()))
    );
}

#[test]
fn test_collection_factory_lowers_to_collection_literal() {
    let hir = lower_body(vec![val("xs", None, call("listOf", vec![int(1), int(2)]))]);

    let initializer = local_initializer(&function_body(&hir, "test")[0]);
    let HirExprKind::CollectionLiteral(collection) = &initializer.kind else {
        panic!("expected a collection literal");
    };
    assert_eq!(collection.elements.len(), 2);
    assert_eq!(initializer.ty.class_name(), Some("List"));
}

#[test]
fn test_pair_factory_entries_reach_map_literal() {
    let hir = lower_body(vec![val(
        "m",
        None,
        call("mapOf", vec![pair(int(1), string("a"))]),
    )]);

    let initializer = local_initializer(&function_body(&hir, "test")[0]);
    let HirExprKind::CollectionLiteral(collection) = &initializer.kind else {
        panic!("expected a collection literal");
    };
    assert_eq!(collection.entries.len(), 1);
    assert!(collection.elements.is_empty());
}

#[test]
fn test_hir_type_slot_written_exactly_once() {
    let mut module = module(
        "test",
        vec![Declaration::Function(function(
            "test",
            Vec::new(),
            None,
            block(vec![val("x", None, int(1))]),
        ))],
    );
    let (analysis, _) = analyze(&mut module);
    HirLowering::new(&analysis)
        .lower_module(&mut module)
        .expect("first lowering failed");

    // A second lowering would double-write the hir-type slots
    let result = HirLowering::new(&analysis).lower_module(&mut module);
    assert!(matches!(result, Err(CompileError::Internal { .. })));
}
