//! AST to HIR lowering.
//!
//! A single structural pass over the type-annotated AST. Every surface
//! sugar construct (string interpolation, safe calls, `if`/`when`
//! expressions, destructuring, extension functions and properties, custom
//! accessors, guard statements) is desugared into the uniform HIR node
//! set. Lowering is total: an AST shape with no defined image here is a
//! fatal `CompileError`, never a silent drop.

use crate::ast::expression::{
    Expression, ExpressionKind, InterpolationPart, Literal, WhenCondition,
};
use crate::ast::statement::{
    AccessorDeclaration, Block, ClassDeclaration, ClassMember, Declaration, FunctionDeclaration,
    PropertyDeclaration, Statement,
};
use crate::ast::types::{Type, TypeKind};
use crate::ast::Module;
use crate::errors::CompileError;
use crate::hir::{
    HirAssign, HirBinary, HirBinaryOp, HirBlock, HirBlockExpr, HirCall, HirCallee, HirCatch,
    HirClass, HirCollectionKind, HirCollectionLiteral, HirConstructorCall, HirDecl, HirEnumEntry,
    HirExpr, HirExprKind, HirExprStmt, HirField, HirFunction, HirFunctionKind, HirIf, HirImport,
    HirIndex, HirLambda, HirLiteral, HirLocal, HirLoop, HirLoopKind, HirMember, HirModule,
    HirParameter, HirReturn, HirStmt, HirThrow, HirTry, HirType, HirTypeAlias, HirTypeCast,
    HirTypeCheck, HirTypeKind, HirTypeParameter, HirUnary, HirUnaryOp,
};
use crate::sema::analyzer::Analysis;
use crate::sema::nova_type::NovaType;
use crate::span::Span;
use rustc_hash::{FxHashMap, FxHashSet};
use std::rc::Rc;
use tracing::debug;

const STAGE: &str = "hir-lowering";

/// The canonical structural-type to HIR-type conversion. Total and
/// loss-aware: type variables survive as `Unresolved` names, nullability
/// collapses into the flag.
pub fn lower_nova_type(ty: &NovaType) -> HirType {
    match ty {
        NovaType::Numeric(kind) => {
            use crate::sema::nova_type::NumericKind;
            match kind {
                NumericKind::Int => HirType::int(),
                NumericKind::Long => HirType::long(),
                NumericKind::Float => HirType::float(),
                NumericKind::Double => HirType::double(),
            }
        }
        NovaType::Boolean => HirType::boolean(),
        NovaType::Char => HirType::char(),
        NovaType::String => HirType::string(),
        NovaType::Unit => HirType::unit(),
        NovaType::Nothing => HirType::nothing(),
        NovaType::Any => HirType::any(),
        NovaType::Nullable(inner) => lower_nova_type(inner).with_nullability(true),
        NovaType::Class(class) => HirType::class(
            class.name.clone(),
            class.type_args.iter().map(lower_nova_type).collect(),
        ),
        NovaType::Function(sig) => {
            let mut args: Vec<HirType> = sig.parameters.iter().map(lower_nova_type).collect();
            args.push(lower_nova_type(&sig.return_type));
            HirType::class(format!("Function{}", sig.parameters.len()), args)
        }
        NovaType::TypeVar(name) => HirType::unresolved(name.clone()),
    }
}

pub struct HirLowering<'a> {
    analysis: &'a Analysis,
    aliases: FxHashMap<String, Type>,
    /// Classes declared in this module
    classes: FxHashSet<String>,
    /// Class properties with a custom getter/setter: (class, property)
    custom_accessors: FxHashSet<(String, String)>,
    /// Top-level properties with custom accessors
    module_accessors: FxHashSet<String>,
    /// Lexical scopes of local names, innermost last
    locals: Vec<FxHashSet<String>>,
    type_params: Vec<String>,
    temp_counter: u32,
}

impl<'a> HirLowering<'a> {
    pub fn new(analysis: &'a Analysis) -> Self {
        Self {
            analysis,
            aliases: FxHashMap::default(),
            classes: FxHashSet::default(),
            custom_accessors: FxHashSet::default(),
            module_accessors: FxHashSet::default(),
            locals: Vec::new(),
            type_params: Vec::new(),
            temp_counter: 0,
        }
    }

    pub fn lower_module(&mut self, module: &mut Module) -> Result<Rc<HirModule>, CompileError> {
        debug!(module = %module.name, "lowering to HIR");

        // Pre-pass: names the lowering of call sites and member accesses
        // depends on.
        for declaration in &module.declarations {
            match declaration {
                Declaration::Class(class) => {
                    self.classes.insert(class.name.node.clone());
                    for member in &class.members {
                        if let ClassMember::Property(property) = member {
                            if property.getter.is_some() || property.setter.is_some() {
                                self.custom_accessors.insert((
                                    class.name.node.clone(),
                                    property.name.node.clone(),
                                ));
                            }
                        }
                    }
                }
                Declaration::Property(property) if property.receiver.is_none() => {
                    if property.getter.is_some() || property.setter.is_some() {
                        self.module_accessors.insert(property.name.node.clone());
                    }
                }
                Declaration::TypeAlias(alias) => {
                    self.aliases
                        .insert(alias.name.node.clone(), alias.target.clone());
                }
                _ => {}
            }
        }

        let mut declarations = Vec::new();
        for declaration in &mut module.declarations {
            self.lower_declaration(declaration, &mut declarations)?;
        }

        Ok(HirModule::new(
            module.name.clone(),
            declarations,
            module.span,
        ))
    }

    // -------------------------------------------------------------------------
    // Declarations
    // -------------------------------------------------------------------------

    fn lower_declaration(
        &mut self,
        declaration: &mut Declaration,
        out: &mut Vec<Rc<HirDecl>>,
    ) -> Result<(), CompileError> {
        match declaration {
            Declaration::Import(import) => {
                out.push(Rc::new(HirDecl::Import(HirImport {
                    path: import.path.clone(),
                    alias: import.alias.as_ref().map(|a| a.node.clone()),
                    span: import.span,
                })));
                Ok(())
            }
            Declaration::TypeAlias(alias) => {
                let target = self.lower_declared_type(&alias.target);
                out.push(Rc::new(HirDecl::TypeAlias(HirTypeAlias {
                    name: alias.name.node.clone(),
                    target,
                    span: alias.span,
                })));
                Ok(())
            }
            Declaration::Function(function) => {
                let lowered = self.lower_function(function, HirFunctionKind::Function)?;
                out.push(Rc::new(HirDecl::Function(lowered)));
                Ok(())
            }
            Declaration::Property(property) => self.lower_top_level_property(property, out),
            Declaration::Class(class) => {
                let lowered = self.lower_class(class)?;
                out.push(Rc::new(HirDecl::Class(lowered)));
                Ok(())
            }
        }
    }

    fn lower_function(
        &mut self,
        function: &mut FunctionDeclaration,
        kind: HirFunctionKind,
    ) -> Result<HirFunction, CompileError> {
        let outer_params = self.type_params.len();
        for tp in &function.type_parameters {
            self.type_params.push(tp.name.node.clone());
        }

        let mut parameters = Vec::new();
        let name = match &function.receiver {
            Some(receiver) => {
                // Extension function: the receiver becomes an ordinary
                // first parameter of a static-style function.
                let receiver_ty = self.lower_declared_type(receiver);
                let simple = simple_type_name(&receiver_ty);
                parameters.push(HirParameter {
                    name: "self".to_string(),
                    ty: receiver_ty,
                    span: function.span,
                });
                format!("{}${}", simple, function.name.node)
            }
            None => function.name.node.clone(),
        };

        for parameter in &function.parameters {
            let ty = parameter
                .type_annotation
                .as_ref()
                .map(|t| self.lower_declared_type(t))
                .unwrap_or_else(HirType::any);
            parameters.push(HirParameter {
                name: parameter.name.node.clone(),
                ty,
                span: parameter.span,
            });
        }

        let return_type = function
            .return_type
            .as_ref()
            .map(|t| self.lower_declared_type(t))
            .unwrap_or_else(HirType::unit);

        self.enter_scope();
        for parameter in &parameters {
            self.define_local(&parameter.name);
        }
        let body = self.lower_block_stmt(&mut function.body)?;
        self.exit_scope();

        let type_parameters = function
            .type_parameters
            .iter()
            .map(|tp| HirTypeParameter {
                name: tp.name.node.clone(),
                is_reified: tp.is_reified,
            })
            .collect();

        self.type_params.truncate(outer_params);

        Ok(HirFunction {
            name,
            kind,
            type_parameters,
            parameters,
            return_type,
            body: Some(body),
            is_inline: function.is_inline,
            span: function.span,
        })
    }

    fn lower_top_level_property(
        &mut self,
        property: &mut PropertyDeclaration,
        out: &mut Vec<Rc<HirDecl>>,
    ) -> Result<(), CompileError> {
        let ty = self.property_type(property)?;

        if property.getter.is_none() && property.setter.is_none() && property.receiver.is_none() {
            let initializer = match &mut property.initializer {
                Some(initializer) => Some(self.lower_expr(initializer)?),
                None => None,
            };
            out.push(Rc::new(HirDecl::Field(HirField {
                name: property.name.node.clone(),
                ty,
                mutable: property.mutable,
                initializer,
                span: property.span,
            })));
            return Ok(());
        }

        // Custom accessors (and every extension property) lower to
        // getter/setter functions.
        let prefix = match &property.receiver {
            Some(receiver) => {
                let receiver_ty = self.lower_declared_type(receiver);
                format!("{}$", simple_type_name(&receiver_ty))
            }
            None => String::new(),
        };
        let receiver_param = property.receiver.as_ref().map(|receiver| HirParameter {
            name: "self".to_string(),
            ty: self.lower_declared_type(receiver),
            span: property.span,
        });

        if let Some(getter) = &mut property.getter {
            let mut parameters = Vec::new();
            if let Some(receiver_param) = &receiver_param {
                parameters.push(receiver_param.clone());
            }
            let body = self.lower_accessor_body(getter, &parameters)?;
            out.push(Rc::new(HirDecl::Function(HirFunction {
                name: format!("{}get_{}", prefix, property.name.node),
                kind: HirFunctionKind::Getter,
                type_parameters: Vec::new(),
                parameters,
                return_type: ty.clone(),
                body: Some(body),
                is_inline: false,
                span: getter.span,
            })));
        }

        if let Some(setter) = &mut property.setter {
            let mut parameters = Vec::new();
            if let Some(receiver_param) = &receiver_param {
                parameters.push(receiver_param.clone());
            }
            let value_name = setter
                .parameter
                .as_ref()
                .map(|p| p.node.clone())
                .unwrap_or_else(|| "value".to_string());
            parameters.push(HirParameter {
                name: value_name,
                ty: ty.clone(),
                span: setter.span,
            });
            let body = self.lower_accessor_body(setter, &parameters)?;
            out.push(Rc::new(HirDecl::Function(HirFunction {
                name: format!("{}set_{}", prefix, property.name.node),
                kind: HirFunctionKind::Setter,
                type_parameters: Vec::new(),
                parameters,
                return_type: HirType::unit(),
                body: Some(body),
                is_inline: false,
                span: setter.span,
            })));
        }

        Ok(())
    }

    fn lower_accessor_body(
        &mut self,
        accessor: &mut AccessorDeclaration,
        parameters: &[HirParameter],
    ) -> Result<Rc<HirStmt>, CompileError> {
        self.enter_scope();
        for parameter in parameters {
            self.define_local(&parameter.name);
        }
        let body = self.lower_block_stmt(&mut accessor.body)?;
        self.exit_scope();
        Ok(body)
    }

    fn property_type(&mut self, property: &PropertyDeclaration) -> Result<HirType, CompileError> {
        if let Some(annotation) = &property.type_annotation {
            return Ok(self.lower_declared_type(annotation));
        }
        if let Some(initializer) = &property.initializer {
            if let Some(resolved) = initializer.resolved_type() {
                return Ok(lower_nova_type(resolved));
            }
        }
        Ok(HirType::any())
    }

    fn lower_class(&mut self, class: &mut ClassDeclaration) -> Result<HirClass, CompileError> {
        let outer_params = self.type_params.len();
        for tp in &class.type_parameters {
            self.type_params.push(tp.name.node.clone());
        }

        let mut fields = Vec::new();
        let mut methods = Vec::new();

        // Primary-constructor properties become fields
        for parameter in &class.primary_constructor {
            if parameter.is_property {
                fields.push(Rc::new(HirField {
                    name: parameter.name.node.clone(),
                    ty: self.lower_declared_type(&parameter.type_annotation),
                    mutable: parameter.mutable,
                    initializer: None,
                    span: parameter.span,
                }));
            }
        }

        let constructor = if class.primary_constructor.is_empty() {
            None
        } else {
            let parameters = class
                .primary_constructor
                .iter()
                .map(|p| HirParameter {
                    name: p.name.node.clone(),
                    ty: self.lower_declared_type(&p.type_annotation),
                    span: p.span,
                })
                .collect();
            Some(Rc::new(HirFunction {
                name: "<init>".to_string(),
                kind: HirFunctionKind::Constructor,
                type_parameters: Vec::new(),
                parameters,
                return_type: HirType::unit(),
                body: None,
                is_inline: false,
                span: class.span,
            }))
        };

        for member in &mut class.members {
            match member {
                ClassMember::Function(function) => {
                    let lowered = self.lower_function(function, HirFunctionKind::Function)?;
                    methods.push(Rc::new(lowered));
                }
                ClassMember::Property(property) => {
                    if property.getter.is_none() && property.setter.is_none() {
                        let ty = self.property_type(property)?;
                        let initializer = match &mut property.initializer {
                            Some(initializer) => Some(self.lower_expr(initializer)?),
                            None => None,
                        };
                        fields.push(Rc::new(HirField {
                            name: property.name.node.clone(),
                            ty,
                            mutable: property.mutable,
                            initializer,
                            span: property.span,
                        }));
                    } else {
                        let mut accessor_decls = Vec::new();
                        self.lower_top_level_property(property, &mut accessor_decls)?;
                        for decl in accessor_decls {
                            if let HirDecl::Function(function) = decl.as_ref() {
                                methods.push(Rc::new(HirFunction {
                                    name: function.name.clone(),
                                    kind: function.kind,
                                    type_parameters: function.type_parameters.clone(),
                                    parameters: function.parameters.clone(),
                                    return_type: function.return_type.clone(),
                                    body: function.body.clone(),
                                    is_inline: function.is_inline,
                                    span: function.span,
                                }));
                            }
                        }
                    }
                }
            }
        }

        let mut enum_entries = Vec::new();
        for (ordinal, entry) in class.enum_entries.iter_mut().enumerate() {
            let mut arguments = Vec::new();
            for argument in &mut entry.arguments {
                arguments.push(self.lower_expr(argument)?);
            }
            enum_entries.push(HirEnumEntry {
                name: entry.name.node.clone(),
                ordinal: ordinal as u32,
                arguments,
                span: entry.span,
            });
        }

        let superclass = class
            .superclass
            .as_ref()
            .map(|t| self.lower_declared_type(t));

        let type_parameters = class
            .type_parameters
            .iter()
            .map(|tp| HirTypeParameter {
                name: tp.name.node.clone(),
                is_reified: tp.is_reified,
            })
            .collect();

        self.type_params.truncate(outer_params);

        Ok(HirClass {
            name: class.name.node.clone(),
            type_parameters,
            superclass,
            fields,
            constructor,
            methods,
            is_enum: class.is_enum,
            enum_entries,
            span: class.span,
        })
    }

    // -------------------------------------------------------------------------
    // Statements
    // -------------------------------------------------------------------------

    fn lower_block_stmt(&mut self, block: &mut Block) -> Result<Rc<HirStmt>, CompileError> {
        self.enter_scope();
        let mut statements = Vec::new();
        for statement in &mut block.statements {
            self.lower_statement(statement, &mut statements)?;
        }
        self.exit_scope();
        Ok(Rc::new(HirStmt::Block(HirBlock {
            statements,
            span: block.span,
        })))
    }

    fn lower_statement(
        &mut self,
        statement: &mut Statement,
        out: &mut Vec<Rc<HirStmt>>,
    ) -> Result<(), CompileError> {
        match statement {
            Statement::Variable(declaration) => {
                let initializer = self.lower_expr(&mut declaration.initializer)?;
                let ty = match &declaration.type_annotation {
                    Some(annotation) => self.lower_declared_type(annotation),
                    None => initializer.ty.clone(),
                };
                self.define_local(&declaration.name.node);
                out.push(Rc::new(HirStmt::Local(HirLocal {
                    name: declaration.name.node.clone(),
                    ty,
                    mutable: declaration.mutable,
                    initializer: Some(initializer),
                    span: declaration.span,
                })));
                Ok(())
            }
            Statement::Destructuring(declaration) => {
                // `val (a, b) = e` becomes a fresh local plus one
                // componentN() call per name.
                let initializer = self.lower_expr(&mut declaration.initializer)?;
                let component_types: Vec<HirType> = self
                    .analysis
                    .tables
                    .component_types
                    .get(&declaration.span)
                    .map(|types| types.iter().map(lower_nova_type).collect())
                    .unwrap_or_else(|| vec![HirType::any(); declaration.names.len()]);

                let temp = self.fresh_temp();
                let temp_ty = initializer.ty.clone();
                self.define_local(&temp);
                out.push(Rc::new(HirStmt::Local(HirLocal {
                    name: temp.clone(),
                    ty: temp_ty.clone(),
                    mutable: false,
                    initializer: Some(initializer),
                    span: declaration.span,
                })));

                for (index, name) in declaration.names.iter().enumerate() {
                    let component_ty = component_types
                        .get(index)
                        .cloned()
                        .unwrap_or_else(HirType::any);
                    let receiver =
                        HirExpr::new(HirExprKind::Local(temp.clone()), temp_ty.clone(), name.span);
                    let call = HirExpr::new(
                        HirExprKind::Call(HirCall {
                            callee: HirCallee::Method {
                                receiver,
                                name: format!("component{}", index + 1),
                            },
                            args: Vec::new(),
                            type_args: Vec::new(),
                        }),
                        component_ty.clone(),
                        name.span,
                    );
                    self.define_local(&name.node);
                    out.push(Rc::new(HirStmt::Local(HirLocal {
                        name: name.node.clone(),
                        ty: component_ty,
                        mutable: declaration.mutable,
                        initializer: Some(call),
                        span: name.span,
                    })));
                }
                Ok(())
            }
            Statement::Expression(expression) => {
                let span = expression.span;
                let expr = self.lower_expr(expression)?;
                out.push(Rc::new(HirStmt::Expr(HirExprStmt { expr, span })));
                Ok(())
            }
            Statement::Return(ret) => {
                let value = match &mut ret.value {
                    Some(value) => Some(self.lower_expr(value)?),
                    None => None,
                };
                out.push(Rc::new(HirStmt::Return(HirReturn {
                    value,
                    span: ret.span,
                })));
                Ok(())
            }
            Statement::Throw(throw) => {
                let value = self.lower_expr(&mut throw.value)?;
                out.push(Rc::new(HirStmt::Throw(HirThrow {
                    value,
                    span: throw.span,
                })));
                Ok(())
            }
            Statement::Break(span) => {
                out.push(Rc::new(HirStmt::Break(*span)));
                Ok(())
            }
            Statement::Continue(span) => {
                out.push(Rc::new(HirStmt::Continue(*span)));
                Ok(())
            }
            Statement::While(while_stmt) => {
                let condition = self.lower_expr(&mut while_stmt.condition)?;
                let body = self.lower_block_stmt(&mut while_stmt.body)?;
                out.push(Rc::new(HirStmt::Loop(HirLoop {
                    kind: HirLoopKind::While { condition },
                    body,
                    span: while_stmt.span,
                })));
                Ok(())
            }
            Statement::For(for_stmt) => {
                let iterable = self.lower_expr(&mut for_stmt.iterable)?;
                let binding_ty = hir_element_type(&iterable.ty);
                self.enter_scope();
                self.define_local(&for_stmt.binding.node);
                let body = self.lower_block_stmt(&mut for_stmt.body)?;
                self.exit_scope();
                out.push(Rc::new(HirStmt::Loop(HirLoop {
                    kind: HirLoopKind::Iterate {
                        binding: for_stmt.binding.node.clone(),
                        binding_ty,
                        iterable,
                    },
                    body,
                    span: for_stmt.span,
                })));
                Ok(())
            }
            Statement::Guard(guard) => {
                // `guard val x = e else { exit }` becomes:
                //   val $tmp = e
                //   if ($tmp == null) { exit }
                //   val x = $tmp as T
                let span = guard.span;
                let initializer = self.lower_expr(&mut guard.initializer)?;
                let init_ty = initializer.ty.clone();

                let temp = self.fresh_temp();
                self.define_local(&temp);
                out.push(Rc::new(HirStmt::Local(HirLocal {
                    name: temp.clone(),
                    ty: init_ty.clone(),
                    mutable: false,
                    initializer: Some(initializer),
                    span,
                })));

                let else_block = self.lower_block_expr(&mut guard.else_branch)?;
                let condition = HirExpr::new(
                    HirExprKind::Binary(HirBinary {
                        op: HirBinaryOp::Eq,
                        lhs: HirExpr::new(
                            HirExprKind::Local(temp.clone()),
                            init_ty.clone(),
                            span,
                        ),
                        rhs: null_literal(span),
                    }),
                    HirType::boolean(),
                    span,
                );
                let guard_if = HirExpr::new(
                    HirExprKind::If(HirIf {
                        condition,
                        then_branch: else_block,
                        else_branch: None,
                    }),
                    HirType::unit(),
                    span,
                );
                out.push(Rc::new(HirStmt::Expr(HirExprStmt {
                    expr: guard_if,
                    span,
                })));

                let binding_ty = match &guard.type_annotation {
                    Some(annotation) => self.lower_declared_type(annotation),
                    None => init_ty.with_nullability(false),
                };
                let cast = HirExpr::new(
                    HirExprKind::TypeCast(HirTypeCast {
                        operand: HirExpr::new(HirExprKind::Local(temp), init_ty, span),
                        target: binding_ty.clone(),
                        safe: false,
                    }),
                    binding_ty.clone(),
                    span,
                );
                self.define_local(&guard.name.node);
                out.push(Rc::new(HirStmt::Local(HirLocal {
                    name: guard.name.node.clone(),
                    ty: binding_ty,
                    mutable: false,
                    initializer: Some(cast),
                    span,
                })));
                Ok(())
            }
            Statement::Try(try_stmt) => {
                let body = self.lower_block_stmt(&mut try_stmt.body)?;
                let mut catches = Vec::new();
                for catch in &mut try_stmt.catches {
                    let exception_type = self.lower_declared_type(&catch.exception_type);
                    self.enter_scope();
                    self.define_local(&catch.binding.node);
                    let catch_body = self.lower_block_stmt(&mut catch.body)?;
                    self.exit_scope();
                    catches.push(HirCatch {
                        binding: catch.binding.node.clone(),
                        exception_type,
                        body: catch_body,
                        span: catch.span,
                    });
                }
                let finally = match &mut try_stmt.finally {
                    Some(finally) => Some(self.lower_block_stmt(finally)?),
                    None => None,
                };
                out.push(Rc::new(HirStmt::Try(HirTry {
                    body,
                    catches,
                    finally,
                    span: try_stmt.span,
                })));
                Ok(())
            }
            Statement::Block(block) => {
                let lowered = self.lower_block_stmt(block)?;
                out.push(lowered);
                Ok(())
            }
        }
    }

    // -------------------------------------------------------------------------
    // Expressions
    // -------------------------------------------------------------------------

    fn lower_expr(&mut self, expr: &mut Expression) -> Result<Rc<HirExpr>, CompileError> {
        let span = expr.span;
        let resolved = expr.resolved_type().cloned().ok_or_else(|| {
            CompileError::internal(STAGE, span, "expression was not annotated by the analyzer")
        })?;
        let ty = lower_nova_type(&resolved);

        let lowered = match &mut expr.kind {
            ExpressionKind::Literal(literal) => {
                HirExpr::literal(lower_literal(literal), ty, span)
            }
            ExpressionKind::Identifier(name) => {
                if !self.is_local(name) && self.module_accessors.contains(name.as_str()) {
                    // A module property with a custom getter reads through it
                    HirExpr::new(
                        HirExprKind::Call(HirCall {
                            callee: HirCallee::Function(format!("get_{}", name)),
                            args: Vec::new(),
                            type_args: Vec::new(),
                        }),
                        ty,
                        span,
                    )
                } else {
                    HirExpr::new(HirExprKind::Local(name.clone()), ty, span)
                }
            }
            ExpressionKind::This => HirExpr::new(HirExprKind::Local("self".to_string()), ty, span),
            ExpressionKind::Interpolation(parts) => self.lower_interpolation(parts, span)?,
            ExpressionKind::Binary(op, lhs, rhs) => {
                let op = lower_binary_op(*op);
                let lhs = self.lower_expr(lhs)?;
                let rhs = self.lower_expr(rhs)?;
                // String `+` is concatenation, desugared to concat calls
                if op == HirBinaryOp::Add && ty.class_name() == Some("String") {
                    self.concat(lhs, rhs, span)
                } else {
                    HirExpr::new(HirExprKind::Binary(HirBinary { op, lhs, rhs }), ty, span)
                }
            }
            ExpressionKind::Unary(op, operand) => {
                let op = match op {
                    crate::ast::expression::UnaryOp::Not => HirUnaryOp::Not,
                    crate::ast::expression::UnaryOp::Negate => HirUnaryOp::Neg,
                };
                let operand = self.lower_expr(operand)?;
                HirExpr::new(HirExprKind::Unary(HirUnary { op, operand }), ty, span)
            }
            ExpressionKind::Assignment(target, value) => {
                self.lower_assignment(target, value, ty, span)?
            }
            ExpressionKind::Member(receiver, member) => {
                let member_name = member.node.clone();

                // Enum entry / static access through a class name
                let static_class = match &receiver.kind {
                    ExpressionKind::Identifier(class_name)
                        if self.classes.contains(class_name.as_str())
                            && !self.is_local(class_name) =>
                    {
                        Some(class_name.clone())
                    }
                    _ => None,
                };

                if let Some(class_name) = static_class {
                    let receiver_hir_ty =
                        lower_nova_type(receiver.resolved_type().ok_or_else(|| {
                            CompileError::internal(STAGE, span, "un-annotated receiver")
                        })?);
                    receiver.set_hir_type(receiver_hir_ty.clone())?;
                    let class_ref = HirExpr::new(
                        HirExprKind::ClassRef(HirType::class(class_name, Vec::new())),
                        receiver_hir_ty,
                        receiver.span,
                    );
                    HirExpr::new(
                        HirExprKind::Member(HirMember {
                            receiver: class_ref,
                            name: member_name,
                        }),
                        ty,
                        span,
                    )
                } else {
                    let receiver_ty = receiver.resolved_type().cloned();
                    let receiver = self.lower_expr(receiver)?;

                    // Extension property access reads through its getter
                    if let Some(getter) = self.analysis.tables.extension_calls.get(&span) {
                        HirExpr::new(
                            HirExprKind::Call(HirCall {
                                callee: HirCallee::Function(getter.clone()),
                                args: vec![receiver],
                                type_args: Vec::new(),
                            }),
                            ty,
                            span,
                        )
                    } else if receiver_ty
                        .as_ref()
                        .and_then(class_of_receiver)
                        .is_some_and(|class_name| {
                            self.custom_accessors
                                .contains(&(class_name, member_name.clone()))
                        })
                    {
                        HirExpr::new(
                            HirExprKind::Call(HirCall {
                                callee: HirCallee::Method {
                                    receiver,
                                    name: format!("get_{}", member_name),
                                },
                                args: Vec::new(),
                                type_args: Vec::new(),
                            }),
                            ty,
                            span,
                        )
                    } else {
                        HirExpr::new(
                            HirExprKind::Member(HirMember {
                                receiver,
                                name: member_name,
                            }),
                            ty,
                            span,
                        )
                    }
                }
            }
            ExpressionKind::SafeMember(receiver, member) => {
                // `a?.b` becomes `if (a == null) null else a.b`
                let member_name = member.node.clone();
                let receiver = self.lower_expr(receiver)?;
                let access = HirExpr::new(
                    HirExprKind::Member(HirMember {
                        receiver: receiver.clone(),
                        name: member_name,
                    }),
                    ty.with_nullability(false),
                    span,
                );
                self.null_guard(receiver, access, ty, span)
            }
            ExpressionKind::Index(receiver, index) => {
                let receiver = self.lower_expr(receiver)?;
                let index = self.lower_expr(index)?;
                HirExpr::new(HirExprKind::Index(HirIndex { receiver, index }), ty, span)
            }
            ExpressionKind::Call(callee, args, _) => self.lower_call(callee, args, ty, span)?,
            ExpressionKind::Lambda(lambda) => {
                let sig = match &resolved {
                    NovaType::Function(sig) => sig.clone(),
                    _ => {
                        return Err(CompileError::internal(
                            STAGE,
                            span,
                            "lambda was not annotated with a function type",
                        ))
                    }
                };
                let parameters: Vec<(String, HirType)> = lambda
                    .parameters
                    .iter()
                    .zip(sig.parameters.iter())
                    .map(|(p, t)| (p.name.node.clone(), lower_nova_type(t)))
                    .collect();
                let return_type = lower_nova_type(&sig.return_type);

                self.enter_scope();
                for (name, _) in &parameters {
                    self.define_local(name);
                }
                let (mut body, value) = self.lower_block_parts(&mut lambda.body)?;
                self.exit_scope();

                // The trailing expression is the lambda's return value
                if let Some(value) = value {
                    if return_type.is_unit() {
                        let value_span = value.span;
                        body.push(Rc::new(HirStmt::Expr(HirExprStmt {
                            expr: value,
                            span: value_span,
                        })));
                    } else {
                        let value_span = value.span;
                        body.push(Rc::new(HirStmt::Return(HirReturn {
                            value: Some(value),
                            span: value_span,
                        })));
                    }
                }

                HirExpr::new(
                    HirExprKind::Lambda(HirLambda {
                        parameters,
                        body,
                        return_type,
                    }),
                    ty,
                    span,
                )
            }
            ExpressionKind::If(if_expr) => {
                let condition = self.lower_expr(&mut if_expr.condition)?;
                let then_branch = self.lower_block_expr(&mut if_expr.then_branch)?;
                let else_branch = match &mut if_expr.else_branch {
                    Some(else_branch) => Some(self.lower_block_expr(else_branch)?),
                    None => None,
                };
                HirExpr::new(
                    HirExprKind::If(HirIf {
                        condition,
                        then_branch,
                        else_branch,
                    }),
                    ty,
                    span,
                )
            }
            ExpressionKind::When(when_expr) => {
                let result_ty = ty.clone();

                match &mut when_expr.subject {
                    Some(subject) => {
                        let subject_expr = self.lower_expr(subject)?;
                        let subject_ty = subject_expr.ty.clone();
                        let temp = self.fresh_temp();
                        self.define_local(&temp);
                        let temp_local = Rc::new(HirStmt::Local(HirLocal {
                            name: temp.clone(),
                            ty: subject_ty.clone(),
                            mutable: false,
                            initializer: Some(subject_expr),
                            span,
                        }));

                        let subject_ref = |at: Span| {
                            HirExpr::new(
                                HirExprKind::Local(temp.clone()),
                                subject_ty.clone(),
                                at,
                            )
                        };

                        let mut chain: Option<Rc<HirExpr>> = match &mut when_expr.else_branch {
                            Some(else_branch) => Some(self.lower_block_expr(else_branch)?),
                            None => None,
                        };

                        for branch in when_expr.branches.iter_mut().rev() {
                            let body = self.lower_block_expr(&mut branch.body)?;
                            let mut condition: Option<Rc<HirExpr>> = None;
                            // Multiple conditions per branch become a disjunction
                            for when_condition in &mut branch.conditions {
                                let this_condition = match when_condition {
                                    WhenCondition::Expression(expression) => {
                                        let value = self.lower_expr(expression)?;
                                        let value_span = value.span;
                                        HirExpr::new(
                                            HirExprKind::Binary(HirBinary {
                                                op: HirBinaryOp::Eq,
                                                lhs: subject_ref(value_span),
                                                rhs: value,
                                            }),
                                            HirType::boolean(),
                                            value_span,
                                        )
                                    }
                                    WhenCondition::Is(target) => {
                                        let target_ty = self.lower_declared_type(target);
                                        HirExpr::new(
                                            HirExprKind::TypeCheck(HirTypeCheck {
                                                operand: subject_ref(branch.span),
                                                target: target_ty,
                                                negated: false,
                                            }),
                                            HirType::boolean(),
                                            branch.span,
                                        )
                                    }
                                };
                                condition = Some(match condition {
                                    Some(previous) => HirExpr::new(
                                        HirExprKind::Binary(HirBinary {
                                            op: HirBinaryOp::Or,
                                            lhs: previous,
                                            rhs: this_condition,
                                        }),
                                        HirType::boolean(),
                                        branch.span,
                                    ),
                                    None => this_condition,
                                });
                            }

                            let condition = condition.ok_or_else(|| {
                                CompileError::unhandled(STAGE, branch.span, "when branch without conditions")
                            })?;
                            chain = Some(HirExpr::new(
                                HirExprKind::If(HirIf {
                                    condition,
                                    then_branch: body,
                                    else_branch: chain,
                                }),
                                result_ty.clone(),
                                branch.span,
                            ));
                        }

                        let value = chain.ok_or_else(|| {
                            CompileError::unhandled(STAGE, span, "when expression without branches")
                        })?;
                        HirExpr::new(
                            HirExprKind::Block(HirBlockExpr {
                                statements: vec![temp_local],
                                value: Some(value),
                            }),
                            result_ty,
                            span,
                        )
                    }
                    None => {
                        // Subjectless when: conditions are already boolean
                        let mut chain: Option<Rc<HirExpr>> = match &mut when_expr.else_branch {
                            Some(else_branch) => Some(self.lower_block_expr(else_branch)?),
                            None => None,
                        };

                        for branch in when_expr.branches.iter_mut().rev() {
                            let body = self.lower_block_expr(&mut branch.body)?;
                            let mut condition: Option<Rc<HirExpr>> = None;
                            for when_condition in &mut branch.conditions {
                                let this_condition = match when_condition {
                                    WhenCondition::Expression(expression) => {
                                        self.lower_expr(expression)?
                                    }
                                    WhenCondition::Is(_) => {
                                        return Err(CompileError::unhandled(
                                            STAGE,
                                            branch.span,
                                            "'is' condition in subjectless when",
                                        ))
                                    }
                                };
                                condition = Some(match condition {
                                    Some(previous) => HirExpr::new(
                                        HirExprKind::Binary(HirBinary {
                                            op: HirBinaryOp::Or,
                                            lhs: previous,
                                            rhs: this_condition,
                                        }),
                                        HirType::boolean(),
                                        branch.span,
                                    ),
                                    None => this_condition,
                                });
                            }
                            let condition = condition.ok_or_else(|| {
                                CompileError::unhandled(STAGE, branch.span, "when branch without conditions")
                            })?;
                            chain = Some(HirExpr::new(
                                HirExprKind::If(HirIf {
                                    condition,
                                    then_branch: body,
                                    else_branch: chain,
                                }),
                                result_ty.clone(),
                                branch.span,
                            ));
                        }

                        chain.ok_or_else(|| {
                            CompileError::unhandled(STAGE, span, "when expression without branches")
                        })?
                    }
                }
            }
            ExpressionKind::Is(operand, target, negated) => {
                let negated = *negated;
                let operand = self.lower_expr(operand)?;
                let target = self.lower_declared_type(target);
                HirExpr::new(
                    HirExprKind::TypeCheck(HirTypeCheck {
                        operand,
                        target,
                        negated,
                    }),
                    ty,
                    span,
                )
            }
            ExpressionKind::As(operand, target, safe) => {
                let safe = *safe;
                let operand = self.lower_expr(operand)?;
                let target = self.lower_declared_type(target);
                HirExpr::new(
                    HirExprKind::TypeCast(HirTypeCast {
                        operand,
                        target,
                        safe,
                    }),
                    ty,
                    span,
                )
            }
            ExpressionKind::ClassReference(target) => {
                let target = self.lower_declared_type(target);
                HirExpr::new(HirExprKind::ClassRef(target), ty, span)
            }
            ExpressionKind::Parenthesized(inner) => {
                let inner = self.lower_expr(inner)?;
                // Parentheses carry no semantics of their own
                inner
            }
        };

        self.finish(expr, lowered)
    }

    /// Record the lowered type on the AST node's second annotation slot.
    fn finish(
        &mut self,
        expr: &mut Expression,
        lowered: Rc<HirExpr>,
    ) -> Result<Rc<HirExpr>, CompileError> {
        expr.set_hir_type(lowered.ty.clone())?;
        Ok(lowered)
    }

    fn lower_assignment(
        &mut self,
        target: &mut Expression,
        value: &mut Expression,
        ty: HirType,
        span: Span,
    ) -> Result<Rc<HirExpr>, CompileError> {
        let value_hir = self.lower_expr(value)?;

        match &mut target.kind {
            ExpressionKind::Identifier(name) => {
                let name = name.clone();
                let target_resolved = target.resolved_type().cloned().ok_or_else(|| {
                    CompileError::internal(STAGE, span, "un-annotated assignment target")
                })?;
                target.set_hir_type(lower_nova_type(&target_resolved))?;

                if !self.is_local(&name) && self.module_accessors.contains(name.as_str()) {
                    return Ok(HirExpr::new(
                        HirExprKind::Call(HirCall {
                            callee: HirCallee::Function(format!("set_{}", name)),
                            args: vec![value_hir],
                            type_args: Vec::new(),
                        }),
                        ty,
                        span,
                    ));
                }

                let target_hir = HirExpr::new(
                    HirExprKind::Local(name),
                    lower_nova_type(&target_resolved),
                    target.span,
                );
                Ok(HirExpr::new(
                    HirExprKind::Assign(HirAssign {
                        target: target_hir,
                        value: value_hir,
                    }),
                    ty,
                    span,
                ))
            }
            ExpressionKind::Member(receiver, member) => {
                let member_name = member.node.clone();
                let receiver_class = receiver.resolved_type().cloned();
                let receiver_hir = self.lower_expr(receiver)?;
                let target_resolved = target.resolved_type().cloned().ok_or_else(|| {
                    CompileError::internal(STAGE, span, "un-annotated assignment target")
                })?;
                target.set_hir_type(lower_nova_type(&target_resolved))?;

                if let Some(class_name) = receiver_class.as_ref().and_then(class_of_receiver) {
                    if self
                        .custom_accessors
                        .contains(&(class_name.clone(), member_name.clone()))
                    {
                        return Ok(HirExpr::new(
                            HirExprKind::Call(HirCall {
                                callee: HirCallee::Method {
                                    receiver: receiver_hir,
                                    name: format!("set_{}", member_name),
                                },
                                args: vec![value_hir],
                                type_args: Vec::new(),
                            }),
                            ty,
                            span,
                        ));
                    }
                }

                let target_hir = HirExpr::new(
                    HirExprKind::Member(HirMember {
                        receiver: receiver_hir,
                        name: member_name,
                    }),
                    lower_nova_type(&target_resolved),
                    target.span,
                );
                Ok(HirExpr::new(
                    HirExprKind::Assign(HirAssign {
                        target: target_hir,
                        value: value_hir,
                    }),
                    ty,
                    span,
                ))
            }
            ExpressionKind::Index(receiver, index) => {
                let receiver_hir = self.lower_expr(receiver)?;
                let index_hir = self.lower_expr(index)?;
                let target_resolved = target.resolved_type().cloned().ok_or_else(|| {
                    CompileError::internal(STAGE, span, "un-annotated assignment target")
                })?;
                target.set_hir_type(lower_nova_type(&target_resolved))?;

                let target_hir = HirExpr::new(
                    HirExprKind::Index(HirIndex {
                        receiver: receiver_hir,
                        index: index_hir,
                    }),
                    lower_nova_type(&target_resolved),
                    target.span,
                );
                Ok(HirExpr::new(
                    HirExprKind::Assign(HirAssign {
                        target: target_hir,
                        value: value_hir,
                    }),
                    ty,
                    span,
                ))
            }
            other => Err(CompileError::unhandled(
                STAGE,
                span,
                format!("assignment target {:?}", std::mem::discriminant(other)),
            )),
        }
    }

    fn lower_call(
        &mut self,
        callee: &mut Expression,
        args: &mut Vec<Expression>,
        ty: HirType,
        span: Span,
    ) -> Result<Rc<HirExpr>, CompileError> {
        let callee_span = callee.span;
        let callee_resolved = callee.resolved_type().cloned().ok_or_else(|| {
            CompileError::internal(STAGE, callee_span, "un-annotated callee")
        })?;

        let type_args: Vec<HirType> = self
            .analysis
            .tables
            .call_bindings
            .get(&span)
            .map(|bindings| bindings.iter().map(|(_, t)| lower_nova_type(t)).collect())
            .unwrap_or_default();

        match &mut callee.kind {
            ExpressionKind::Identifier(name) => {
                let name = name.clone();
                callee.set_hir_type(lower_nova_type(&callee_resolved))?;

                // A local binding shadows factories, classes and functions
                if self.is_local(&name) {
                    let mut lowered_args = Vec::with_capacity(args.len());
                    for arg in args.iter_mut() {
                        lowered_args.push(self.lower_expr(arg)?);
                    }
                    return Ok(HirExpr::new(
                        HirExprKind::Call(HirCall {
                            callee: HirCallee::Value(HirExpr::new(
                                HirExprKind::Local(name),
                                lower_nova_type(&callee_resolved),
                                callee_span,
                            )),
                            args: lowered_args,
                            type_args,
                        }),
                        ty,
                        span,
                    ));
                }

                // Collection factories become collection literals
                if let Some(collection_kind) = factory_kind(&name) {
                    return self.lower_collection_literal(collection_kind, args, ty, span);
                }

                // Constructor invocation
                if self.classes.contains(name.as_str()) {
                    let mut lowered_args = Vec::with_capacity(args.len());
                    for arg in args.iter_mut() {
                        lowered_args.push(self.lower_expr(arg)?);
                    }
                    return Ok(HirExpr::new(
                        HirExprKind::ConstructorCall(HirConstructorCall {
                            class: ty.clone(),
                            args: lowered_args,
                        }),
                        ty,
                        span,
                    ));
                }

                let mut lowered_args = Vec::with_capacity(args.len());
                for arg in args.iter_mut() {
                    lowered_args.push(self.lower_expr(arg)?);
                }

                Ok(HirExpr::new(
                    HirExprKind::Call(HirCall {
                        callee: HirCallee::Function(name),
                        args: lowered_args,
                        type_args,
                    }),
                    ty,
                    span,
                ))
            }
            ExpressionKind::Member(receiver, member) => {
                let member_name = member.node.clone();
                let receiver_hir = self.lower_expr(receiver)?;
                callee.set_hir_type(lower_nova_type(&callee_resolved))?;

                let mut lowered_args = Vec::with_capacity(args.len());
                for arg in args.iter_mut() {
                    lowered_args.push(self.lower_expr(arg)?);
                }

                // `a to b` builds a Pair
                if member_name == "to" && lowered_args.len() == 1 {
                    let mut ctor_args = vec![receiver_hir];
                    ctor_args.append(&mut lowered_args);
                    return Ok(HirExpr::new(
                        HirExprKind::ConstructorCall(HirConstructorCall {
                            class: ty.clone(),
                            args: ctor_args,
                        }),
                        ty,
                        span,
                    ));
                }

                // Extension-function call: receiver becomes the first argument
                if let Some(lowered_name) = self.analysis.tables.extension_calls.get(&span) {
                    let mut full_args = vec![receiver_hir];
                    full_args.append(&mut lowered_args);
                    return Ok(HirExpr::new(
                        HirExprKind::Call(HirCall {
                            callee: HirCallee::Function(lowered_name.clone()),
                            args: full_args,
                            type_args,
                        }),
                        ty,
                        span,
                    ));
                }

                Ok(HirExpr::new(
                    HirExprKind::Call(HirCall {
                        callee: HirCallee::Method {
                            receiver: receiver_hir,
                            name: member_name,
                        },
                        args: lowered_args,
                        type_args,
                    }),
                    ty,
                    span,
                ))
            }
            ExpressionKind::SafeMember(receiver, member) => {
                // `a?.f(x)` short-circuits on a null receiver
                let member_name = member.node.clone();
                let receiver_hir = self.lower_expr(receiver)?;
                callee.set_hir_type(lower_nova_type(&callee_resolved))?;

                let mut lowered_args = Vec::with_capacity(args.len());
                for arg in args.iter_mut() {
                    lowered_args.push(self.lower_expr(arg)?);
                }

                let call = if let Some(lowered_name) =
                    self.analysis.tables.extension_calls.get(&span)
                {
                    let mut full_args = vec![receiver_hir.clone()];
                    full_args.append(&mut lowered_args);
                    HirExpr::new(
                        HirExprKind::Call(HirCall {
                            callee: HirCallee::Function(lowered_name.clone()),
                            args: full_args,
                            type_args,
                        }),
                        ty.with_nullability(false),
                        span,
                    )
                } else {
                    HirExpr::new(
                        HirExprKind::Call(HirCall {
                            callee: HirCallee::Method {
                                receiver: receiver_hir.clone(),
                                name: member_name,
                            },
                            args: lowered_args,
                            type_args,
                        }),
                        ty.with_nullability(false),
                        span,
                    )
                };

                Ok(self.null_guard(receiver_hir, call, ty, span))
            }
            _ => {
                // Calling an arbitrary function-typed expression
                let callee_hir = self.lower_expr(callee)?;
                let mut lowered_args = Vec::with_capacity(args.len());
                for arg in args.iter_mut() {
                    lowered_args.push(self.lower_expr(arg)?);
                }
                Ok(HirExpr::new(
                    HirExprKind::Call(HirCall {
                        callee: HirCallee::Value(callee_hir),
                        args: lowered_args,
                        type_args,
                    }),
                    ty,
                    span,
                ))
            }
        }
    }

    fn lower_collection_literal(
        &mut self,
        collection_kind: HirCollectionKind,
        args: &mut Vec<Expression>,
        ty: HirType,
        span: Span,
    ) -> Result<Rc<HirExpr>, CompileError> {
        if collection_kind == HirCollectionKind::Map {
            let mut entries = Vec::new();
            let mut elements = Vec::new();
            for arg in args.iter_mut() {
                // `k to v` arguments contribute direct entries; anything
                // else is a pair value spread into the map at runtime.
                let lowered = self.lower_expr(arg)?;
                match &lowered.kind {
                    HirExprKind::ConstructorCall(ctor)
                        if ctor.class.class_name() == Some("Pair") && ctor.args.len() == 2 =>
                    {
                        entries.push((ctor.args[0].clone(), ctor.args[1].clone()));
                    }
                    _ => elements.push(lowered),
                }
            }
            return Ok(HirExpr::new(
                HirExprKind::CollectionLiteral(HirCollectionLiteral {
                    collection_kind,
                    elements,
                    entries,
                }),
                ty,
                span,
            ));
        }

        let mut elements = Vec::with_capacity(args.len());
        for arg in args.iter_mut() {
            elements.push(self.lower_expr(arg)?);
        }
        Ok(HirExpr::new(
            HirExprKind::CollectionLiteral(HirCollectionLiteral {
                collection_kind,
                elements,
                entries: Vec::new(),
            }),
            ty,
            span,
        ))
    }

    /// String interpolation: parts concatenate left-to-right through
    /// `concat` calls, with non-string parts converted via `toString`.
    fn lower_interpolation(
        &mut self,
        parts: &mut [InterpolationPart],
        span: Span,
    ) -> Result<Rc<HirExpr>, CompileError> {
        let mut accumulator: Option<Rc<HirExpr>> = None;

        for part in parts.iter_mut() {
            let piece = match part {
                InterpolationPart::Literal(text) => HirExpr::literal(
                    HirLiteral::String(text.clone()),
                    HirType::string(),
                    span,
                ),
                InterpolationPart::Expression(expression) => {
                    let lowered = self.lower_expr(expression)?;
                    self.stringify(lowered, span)
                }
            };
            accumulator = Some(match accumulator {
                Some(previous) => self.concat(previous, piece, span),
                None => piece,
            });
        }

        let result = accumulator.unwrap_or_else(|| {
            HirExpr::literal(HirLiteral::String(String::new()), HirType::string(), span)
        });

        // A single non-literal part still yields a String
        if result.ty.class_name() == Some("String") {
            Ok(result)
        } else {
            Ok(self.stringify(result, span))
        }
    }

    fn stringify(&self, expr: Rc<HirExpr>, span: Span) -> Rc<HirExpr> {
        if expr.ty.class_name() == Some("String") && !expr.ty.nullable {
            return expr;
        }
        HirExpr::new(
            HirExprKind::Call(HirCall {
                callee: HirCallee::Method {
                    receiver: expr,
                    name: "toString".to_string(),
                },
                args: Vec::new(),
                type_args: Vec::new(),
            }),
            HirType::string(),
            span,
        )
    }

    fn concat(&self, lhs: Rc<HirExpr>, rhs: Rc<HirExpr>, span: Span) -> Rc<HirExpr> {
        let lhs = self.stringify(lhs, span);
        let rhs = self.stringify(rhs, span);
        HirExpr::new(
            HirExprKind::Call(HirCall {
                callee: HirCallee::Method {
                    receiver: lhs,
                    name: "concat".to_string(),
                },
                args: vec![rhs],
                type_args: Vec::new(),
            }),
            HirType::string(),
            span,
        )
    }

    /// `if (receiver == null) null else <access>` with a nullable result
    fn null_guard(
        &self,
        receiver: Rc<HirExpr>,
        access: Rc<HirExpr>,
        ty: HirType,
        span: Span,
    ) -> Rc<HirExpr> {
        let receiver_ty = receiver.ty.clone();
        let condition = HirExpr::new(
            HirExprKind::Binary(HirBinary {
                op: HirBinaryOp::Eq,
                lhs: HirExpr::new(
                    match &receiver.kind {
                        HirExprKind::Local(name) => HirExprKind::Local(name.clone()),
                        _ => return self.null_guard_with_temp(receiver, access, ty, span),
                    },
                    receiver_ty,
                    span,
                ),
                rhs: null_literal(span),
            }),
            HirType::boolean(),
            span,
        );
        HirExpr::new(
            HirExprKind::If(HirIf {
                condition,
                then_branch: null_literal(span),
                else_branch: Some(access),
            }),
            ty.with_nullability(true),
            span,
        )
    }

    /// Non-trivial receivers share the lowered node between the null test
    /// and the access arm, keeping the specified nested-conditional shape.
    fn null_guard_with_temp(
        &self,
        receiver: Rc<HirExpr>,
        access: Rc<HirExpr>,
        ty: HirType,
        span: Span,
    ) -> Rc<HirExpr> {
        let condition = HirExpr::new(
            HirExprKind::Binary(HirBinary {
                op: HirBinaryOp::Eq,
                lhs: receiver,
                rhs: null_literal(span),
            }),
            HirType::boolean(),
            span,
        );
        HirExpr::new(
            HirExprKind::If(HirIf {
                condition,
                then_branch: null_literal(span),
                else_branch: Some(access),
            }),
            ty.with_nullability(true),
            span,
        )
    }

    /// Lower a block used in expression position into a Block expression.
    fn lower_block_expr(&mut self, block: &mut Block) -> Result<Rc<HirExpr>, CompileError> {
        let span = block.span;
        let (statements, value) = self.lower_block_parts(block)?;
        let ty = value
            .as_ref()
            .map(|v| v.ty.clone())
            .unwrap_or_else(HirType::unit);
        Ok(HirExpr::new(
            HirExprKind::Block(HirBlockExpr { statements, value }),
            ty,
            span,
        ))
    }

    /// Lower a block's statements; the trailing expression statement, if
    /// any, is split off as the block's value.
    fn lower_block_parts(
        &mut self,
        block: &mut Block,
    ) -> Result<(Vec<Rc<HirStmt>>, Option<Rc<HirExpr>>), CompileError> {
        self.enter_scope();
        let mut statements = Vec::new();
        let mut value = None;
        let last = block.statements.len().saturating_sub(1);
        for (i, statement) in block.statements.iter_mut().enumerate() {
            if i == last {
                if let Statement::Expression(expression) = statement {
                    value = Some(self.lower_expr(expression)?);
                    continue;
                }
            }
            self.lower_statement(statement, &mut statements)?;
        }
        self.exit_scope();
        Ok((statements, value))
    }

    // -------------------------------------------------------------------------
    // Declared-type conversion
    // -------------------------------------------------------------------------

    /// The canonical declared-type to HIR-type conversion. Total: builtin
    /// names map to primitive kinds, in-scope type parameters survive as
    /// `Unresolved`, everything else is a nominal class type.
    fn lower_declared_type(&self, ty: &Type) -> HirType {
        self.lower_declared_type_depth(ty, 0)
    }

    fn lower_declared_type_depth(&self, ty: &Type, depth: u32) -> HirType {
        match &ty.kind {
            TypeKind::Nullable(inner) => self
                .lower_declared_type_depth(inner, depth)
                .with_nullability(true),
            TypeKind::Function(function) => {
                let mut args: Vec<HirType> = function
                    .parameters
                    .iter()
                    .map(|p| self.lower_declared_type_depth(p, depth))
                    .collect();
                args.push(self.lower_declared_type_depth(&function.return_type, depth));
                HirType::class(format!("Function{}", function.parameters.len()), args)
            }
            TypeKind::Named(reference) => {
                let name = reference.name.node.as_str();
                if reference.type_arguments.is_empty() {
                    match name {
                        "Int" => return HirType::int(),
                        "Long" => return HirType::long(),
                        "Float" => return HirType::float(),
                        "Double" => return HirType::double(),
                        "Boolean" => return HirType::boolean(),
                        "Char" => return HirType::char(),
                        "Unit" => return HirType::unit(),
                        "Nothing" => return HirType::nothing(),
                        _ => {}
                    }
                    if self.type_params.iter().any(|p| p == name) {
                        return HirType::unresolved(name.to_string());
                    }
                    if let Some(target) = self.aliases.get(name) {
                        if depth < 32 {
                            return self.lower_declared_type_depth(target, depth + 1);
                        }
                    }
                }
                HirType::class(
                    name,
                    reference
                        .type_arguments
                        .iter()
                        .map(|arg| self.lower_declared_type_depth(&arg.ty, depth))
                        .collect(),
                )
            }
        }
    }

    // -------------------------------------------------------------------------
    // Scope helpers
    // -------------------------------------------------------------------------

    fn enter_scope(&mut self) {
        self.locals.push(FxHashSet::default());
    }

    fn exit_scope(&mut self) {
        self.locals.pop();
    }

    fn define_local(&mut self, name: &str) {
        if let Some(scope) = self.locals.last_mut() {
            scope.insert(name.to_string());
        }
    }

    fn is_local(&self, name: &str) -> bool {
        self.locals.iter().any(|scope| scope.contains(name))
    }

    fn fresh_temp(&mut self) -> String {
        self.temp_counter += 1;
        format!("$tmp{}", self.temp_counter)
    }
}

fn lower_literal(literal: &Literal) -> HirLiteral {
    match literal {
        Literal::Null => HirLiteral::Null,
        Literal::Boolean(value) => HirLiteral::Boolean(*value),
        Literal::Char(value) => HirLiteral::Char(*value),
        Literal::Int(value) => HirLiteral::Int(*value),
        Literal::Long(value) => HirLiteral::Long(*value),
        Literal::Float(value) => HirLiteral::Float(*value),
        Literal::Double(value) => HirLiteral::Double(*value),
        Literal::String(value) => HirLiteral::String(value.clone()),
    }
}

fn lower_binary_op(op: crate::ast::expression::BinaryOp) -> HirBinaryOp {
    use crate::ast::expression::BinaryOp;
    match op {
        BinaryOp::Add => HirBinaryOp::Add,
        BinaryOp::Subtract => HirBinaryOp::Sub,
        BinaryOp::Multiply => HirBinaryOp::Mul,
        BinaryOp::Divide => HirBinaryOp::Div,
        BinaryOp::Modulo => HirBinaryOp::Rem,
        BinaryOp::Equal => HirBinaryOp::Eq,
        BinaryOp::NotEqual => HirBinaryOp::Ne,
        BinaryOp::LessThan => HirBinaryOp::Lt,
        BinaryOp::LessThanOrEqual => HirBinaryOp::Le,
        BinaryOp::GreaterThan => HirBinaryOp::Gt,
        BinaryOp::GreaterThanOrEqual => HirBinaryOp::Ge,
        BinaryOp::And => HirBinaryOp::And,
        BinaryOp::Or => HirBinaryOp::Or,
    }
}

fn factory_kind(name: &str) -> Option<HirCollectionKind> {
    match name {
        "listOf" | "emptyList" => Some(HirCollectionKind::List),
        "mutableListOf" => Some(HirCollectionKind::MutableList),
        "setOf" | "emptySet" => Some(HirCollectionKind::Set),
        "mapOf" | "emptyMap" => Some(HirCollectionKind::Map),
        _ => None,
    }
}

fn class_of_receiver(ty: &NovaType) -> Option<String> {
    match ty.non_null() {
        NovaType::Class(class) => Some(class.name.clone()),
        _ => None,
    }
}

fn simple_type_name(ty: &HirType) -> String {
    match &ty.kind {
        HirTypeKind::Int => "Int".to_string(),
        HirTypeKind::Long => "Long".to_string(),
        HirTypeKind::Float => "Float".to_string(),
        HirTypeKind::Double => "Double".to_string(),
        HirTypeKind::Boolean => "Boolean".to_string(),
        HirTypeKind::Char => "Char".to_string(),
        HirTypeKind::Unit => "Unit".to_string(),
        HirTypeKind::Nothing => "Nothing".to_string(),
        HirTypeKind::Class { name, .. } => name.clone(),
        HirTypeKind::Unresolved(name) => name.clone(),
    }
}

fn null_literal(span: Span) -> Rc<HirExpr> {
    HirExpr::literal(HirLiteral::Null, HirType::null(), span)
}

fn hir_element_type(ty: &HirType) -> HirType {
    match &ty.kind {
        HirTypeKind::Class { name, type_args } => match name.as_str() {
            "List" | "MutableList" | "Set" | "Iterator" => type_args
                .first()
                .cloned()
                .unwrap_or_else(HirType::any),
            "Map" => {
                let key = type_args.first().cloned().unwrap_or_else(HirType::any);
                let value = type_args.get(1).cloned().unwrap_or_else(HirType::any);
                HirType::class("Pair", vec![key, value])
            }
            "String" => HirType::char(),
            _ => HirType::any(),
        },
        _ => HirType::any(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::nova_type::NovaType;

    #[test]
    fn test_lower_nova_type_primitives() {
        assert_eq!(lower_nova_type(&NovaType::INT), HirType::int());
        assert_eq!(lower_nova_type(&NovaType::Boolean), HirType::boolean());
        assert_eq!(lower_nova_type(&NovaType::String), HirType::string());
        assert_eq!(lower_nova_type(&NovaType::Any), HirType::any());
    }

    #[test]
    fn test_lower_nova_type_nullable_flag() {
        let lowered = lower_nova_type(&NovaType::nullable(NovaType::INT));
        assert_eq!(lowered.kind, HirTypeKind::Int);
        assert!(lowered.nullable);
    }

    #[test]
    fn test_lower_nova_type_generic_class() {
        let lowered = lower_nova_type(&NovaType::list_of(NovaType::String));
        assert_eq!(
            lowered,
            HirType::class("List", vec![HirType::string()])
        );
    }

    #[test]
    fn test_lower_nova_type_function() {
        let lowered = lower_nova_type(&NovaType::function(
            vec![NovaType::INT],
            NovaType::Boolean,
        ));
        assert_eq!(
            lowered,
            HirType::class("Function1", vec![HirType::int(), HirType::boolean()])
        );
    }

    #[test]
    fn test_lower_nova_type_type_var() {
        let lowered = lower_nova_type(&NovaType::TypeVar("T".to_string()));
        assert_eq!(lowered, HirType::unresolved("T"));
    }
}
