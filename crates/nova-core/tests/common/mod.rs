//! Shared AST construction helpers for the integration suites.
//!
//! Every node gets a distinct span, matching the front-end contract the
//! analyzer's side tables rely on.

#![allow(dead_code)]

use nova_core::ast::expression::{BinaryOp, Expression, ExpressionKind, Literal};
use nova_core::ast::statement::{
    Block, ClassDeclaration, ConstructorParameter, Declaration, FunctionDeclaration, Parameter,
    Statement, TypeParameter, VariableDeclaration,
};
use nova_core::ast::types::{Type, TypeArgument, TypeKind, TypeReference, Variance};
use nova_core::ast::{Ident, Module, Spanned};
use nova_core::diagnostics::CollectingDiagnosticHandler;
use nova_core::sema::{Analysis, SemanticAnalyzer};
use nova_core::span::Span;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

static NEXT_SPAN: AtomicUsize = AtomicUsize::new(1);

pub fn span() -> Span {
    let n = NEXT_SPAN.fetch_add(1, Ordering::Relaxed);
    Span::new(n * 16, n * 16 + 8, n as u32, 1)
}

pub fn ident(name: &str) -> Ident {
    Spanned::new(name.to_string(), span())
}

// -----------------------------------------------------------------------------
// Expressions
// -----------------------------------------------------------------------------

pub fn int(value: i32) -> Expression {
    Expression::new(ExpressionKind::Literal(Literal::Int(value)), span())
}

pub fn long(value: i64) -> Expression {
    Expression::new(ExpressionKind::Literal(Literal::Long(value)), span())
}

pub fn double(value: f64) -> Expression {
    Expression::new(ExpressionKind::Literal(Literal::Double(value)), span())
}

pub fn string(value: &str) -> Expression {
    Expression::new(
        ExpressionKind::Literal(Literal::String(value.to_string())),
        span(),
    )
}

pub fn boolean(value: bool) -> Expression {
    Expression::new(ExpressionKind::Literal(Literal::Boolean(value)), span())
}

pub fn null() -> Expression {
    Expression::new(ExpressionKind::Literal(Literal::Null), span())
}

pub fn var(name: &str) -> Expression {
    Expression::new(ExpressionKind::Identifier(name.to_string()), span())
}

pub fn binary(op: BinaryOp, lhs: Expression, rhs: Expression) -> Expression {
    Expression::new(
        ExpressionKind::Binary(op, Box::new(lhs), Box::new(rhs)),
        span(),
    )
}

pub fn call(name: &str, args: Vec<Expression>) -> Expression {
    Expression::new(
        ExpressionKind::Call(Box::new(var(name)), args, Vec::new()),
        span(),
    )
}

pub fn call_with_type_args(name: &str, args: Vec<Expression>, type_args: Vec<Type>) -> Expression {
    Expression::new(
        ExpressionKind::Call(Box::new(var(name)), args, type_args),
        span(),
    )
}

pub fn method_call(receiver: Expression, name: &str, args: Vec<Expression>) -> Expression {
    let callee = Expression::new(
        ExpressionKind::Member(Box::new(receiver), ident(name)),
        span(),
    );
    Expression::new(ExpressionKind::Call(Box::new(callee), args, Vec::new()), span())
}

pub fn member(receiver: Expression, name: &str) -> Expression {
    Expression::new(
        ExpressionKind::Member(Box::new(receiver), ident(name)),
        span(),
    )
}

/// `a to b`
pub fn pair(first: Expression, second: Expression) -> Expression {
    method_call(first, "to", vec![second])
}

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

pub fn named_type(name: &str) -> Type {
    Type::new(
        TypeKind::Named(TypeReference {
            name: ident(name),
            type_arguments: Vec::new(),
            span: span(),
        }),
        span(),
    )
}

pub fn generic_type(name: &str, arguments: Vec<Type>) -> Type {
    Type::new(
        TypeKind::Named(TypeReference {
            name: ident(name),
            type_arguments: arguments.into_iter().map(TypeArgument::invariant).collect(),
            span: span(),
        }),
        span(),
    )
}

pub fn nullable_type(inner: Type) -> Type {
    Type::new(TypeKind::Nullable(Box::new(inner)), span())
}

// -----------------------------------------------------------------------------
// Statements and declarations
// -----------------------------------------------------------------------------

pub fn block(statements: Vec<Statement>) -> Block {
    Block::new(statements, span())
}

pub fn val(name: &str, annotation: Option<Type>, initializer: Expression) -> Statement {
    Statement::Variable(VariableDeclaration {
        mutable: false,
        name: ident(name),
        type_annotation: annotation,
        initializer,
        span: span(),
    })
}

pub fn var_stmt(name: &str, annotation: Option<Type>, initializer: Expression) -> Statement {
    Statement::Variable(VariableDeclaration {
        mutable: true,
        name: ident(name),
        type_annotation: annotation,
        initializer,
        span: span(),
    })
}

pub fn expr_stmt(expression: Expression) -> Statement {
    Statement::Expression(expression)
}

pub fn ret(value: Option<Expression>) -> Statement {
    Statement::Return(nova_core::ast::statement::ReturnStatement { value, span: span() })
}

pub fn param(name: &str, annotation: Type) -> Parameter {
    Parameter {
        name: ident(name),
        type_annotation: Some(annotation),
        span: span(),
    }
}

pub fn type_param(name: &str) -> TypeParameter {
    TypeParameter::invariant(ident(name))
}

pub fn reified_type_param(name: &str) -> TypeParameter {
    TypeParameter {
        name: ident(name),
        variance: Variance::Invariant,
        is_reified: true,
        span: span(),
    }
}

pub fn function(
    name: &str,
    parameters: Vec<Parameter>,
    return_type: Option<Type>,
    body: Block,
) -> FunctionDeclaration {
    FunctionDeclaration {
        name: ident(name),
        type_parameters: Vec::new(),
        receiver: None,
        parameters,
        return_type,
        body,
        is_inline: false,
        span: span(),
    }
}

/// `class Box<T>(val value: T)`
pub fn generic_value_class(class_name: &str, type_param_name: &str) -> ClassDeclaration {
    ClassDeclaration {
        name: ident(class_name),
        type_parameters: vec![type_param(type_param_name)],
        primary_constructor: vec![ConstructorParameter {
            name: ident("value"),
            type_annotation: named_type(type_param_name),
            mutable: false,
            is_property: true,
            span: span(),
        }],
        superclass: None,
        members: Vec::new(),
        is_enum: false,
        enum_entries: Vec::new(),
        span: span(),
    }
}

pub fn module(name: &str, declarations: Vec<Declaration>) -> Module {
    Module::new(name, declarations, span())
}

// -----------------------------------------------------------------------------
// Driving the stages
// -----------------------------------------------------------------------------

pub fn analyze(module: &mut Module) -> (Analysis, Arc<CollectingDiagnosticHandler>) {
    let handler = Arc::new(CollectingDiagnosticHandler::new());
    let analyzer = SemanticAnalyzer::new(handler.clone());
    let analysis = analyzer.analyze(module).expect("analysis failed");
    (analysis, handler)
}

pub fn warnings(handler: &CollectingDiagnosticHandler) -> Vec<String> {
    use nova_core::diagnostics::{DiagnosticHandler, DiagnosticLevel};
    handler
        .get_diagnostics()
        .into_iter()
        .filter(|d| d.level == DiagnosticLevel::Warning)
        .map(|d| d.message)
        .collect()
}
