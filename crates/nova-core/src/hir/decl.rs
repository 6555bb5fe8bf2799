use super::expr::HirExpr;
use super::stmt::HirStmt;
use super::types::HirType;
use crate::span::Span;
use std::rc::Rc;

/// A lowered compilation unit.
#[derive(Debug)]
pub struct HirModule {
    pub name: String,
    pub declarations: Vec<Rc<HirDecl>>,
    pub span: Span,
}

impl HirModule {
    pub fn new(name: impl Into<String>, declarations: Vec<Rc<HirDecl>>, span: Span) -> Rc<Self> {
        Rc::new(HirModule {
            name: name.into(),
            declarations,
            span,
        })
    }
}

/// An HIR declaration. Same immutability contract as `HirExpr`.
#[derive(Debug)]
pub enum HirDecl {
    Import(HirImport),
    TypeAlias(HirTypeAlias),
    Class(HirClass),
    /// A module-level field (top-level property without custom accessors)
    Field(HirField),
    Function(HirFunction),
}

#[derive(Debug)]
pub struct HirImport {
    pub path: String,
    pub alias: Option<String>,
    pub span: Span,
}

#[derive(Debug)]
pub struct HirTypeAlias {
    pub name: String,
    pub target: HirType,
    pub span: Span,
}

#[derive(Debug)]
pub struct HirClass {
    pub name: String,
    pub type_parameters: Vec<HirTypeParameter>,
    pub superclass: Option<HirType>,
    pub fields: Vec<Rc<HirField>>,
    /// The primary constructor, if the class declares one
    pub constructor: Option<Rc<HirFunction>>,
    pub methods: Vec<Rc<HirFunction>>,
    pub is_enum: bool,
    pub enum_entries: Vec<HirEnumEntry>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HirTypeParameter {
    pub name: String,
    pub is_reified: bool,
}

#[derive(Debug)]
pub struct HirEnumEntry {
    pub name: String,
    pub ordinal: u32,
    pub arguments: Vec<Rc<HirExpr>>,
    pub span: Span,
}

#[derive(Debug)]
pub struct HirField {
    pub name: String,
    pub ty: HirType,
    pub mutable: bool,
    pub initializer: Option<Rc<HirExpr>>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HirFunctionKind {
    Function,
    Constructor,
    /// A lowered property getter (`get_x`)
    Getter,
    /// A lowered property setter (`set_x`)
    Setter,
}

#[derive(Debug)]
pub struct HirFunction {
    pub name: String,
    pub kind: HirFunctionKind,
    pub type_parameters: Vec<HirTypeParameter>,
    pub parameters: Vec<HirParameter>,
    pub return_type: HirType,
    /// Always a `Block` statement when present
    pub body: Option<Rc<HirStmt>>,
    pub is_inline: bool,
    pub span: Span,
}

impl HirFunction {
    /// True for the specialization candidates: inline functions with at
    /// least one reified type parameter.
    pub fn has_reified_parameters(&self) -> bool {
        self.is_inline && self.type_parameters.iter().any(|p| p.is_reified)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HirParameter {
    pub name: String,
    pub ty: HirType,
    pub span: Span,
}
