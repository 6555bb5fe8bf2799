pub mod expression;
pub mod statement;
pub mod types;

use crate::span::Span;

/// Wrapper for AST nodes with span information
#[derive(Debug, Clone)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Spanned { node, span }
    }
}

/// Identifier
pub type Ident = Spanned<String>;

/// A single compilation unit: one source file's declarations.
///
/// `name` doubles as the package name of everything declared inside.
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub declarations: Vec<statement::Declaration>,
    pub span: Span,
}

impl Module {
    pub fn new(name: impl Into<String>, declarations: Vec<statement::Declaration>, span: Span) -> Self {
        Module {
            name: name.into(),
            declarations,
            span,
        }
    }
}
