//! Semantic analysis: scoped name resolution, bidirectional type inference
//! and diagnostics.
//!
//! The analyzer annotates every expression's resolved-type slot exactly
//! once and reports all user-facing problems through the diagnostic
//! handler. Type mismatches are warnings; genuinely unresolvable
//! identifiers are errors (they make lowering impossible and gate the rest
//! of the pipeline). Only internal invariant violations surface as
//! `CompileError`.

use crate::ast::expression::{
    BinaryOp, Expression, ExpressionKind, InterpolationPart, Literal, UnaryOp, WhenCondition,
};
use crate::ast::statement::{
    AccessorDeclaration, Block, ClassDeclaration, ClassMember, Declaration, FunctionDeclaration,
    Parameter, PropertyDeclaration, Statement,
};
use crate::ast::types::{Type, TypeKind};
use crate::ast::Module;
use crate::diagnostics::DiagnosticHandler;
use crate::errors::CompileError;
use crate::sema::generics::{bind_type_parameters, substitute};
use crate::sema::nova_type::{common_super_type, NovaType, NumericKind};
use crate::sema::symbol_table::{Symbol, SymbolKind, SymbolTable};
use crate::sema::type_compat::{Compatibility, TypeCompatibility};
use crate::sema::variance::check_class_variance;
use crate::span::Span;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::debug;

/// Maximum type-alias expansion depth before we assume a cycle slipped
/// through the front end.
const MAX_ALIAS_DEPTH: u32 = 32;

/// Analyzer-provided side tables consumed by HIR lowering.
///
/// Keyed by source span; the front end guarantees distinct spans for
/// distinct nodes.
#[derive(Debug, Default)]
pub struct SideTables {
    /// Type-parameter bindings at generic call sites, in declaration order
    pub call_bindings: FxHashMap<Span, Vec<(String, NovaType)>>,
    /// Call sites resolved to extension functions, by lowered static name
    pub extension_calls: FxHashMap<Span, String>,
    /// Component types of destructuring declarations
    pub component_types: FxHashMap<Span, Vec<NovaType>>,
}

/// The result of analyzing one module.
#[derive(Debug, Default)]
pub struct Analysis {
    pub tables: SideTables,
}

#[derive(Debug, Clone)]
struct MethodInfo {
    name: String,
    parameters: Vec<NovaType>,
    return_type: NovaType,
}

#[derive(Debug, Clone)]
struct PropertyInfo {
    name: String,
    ty: NovaType,
    mutable: bool,
}

#[derive(Debug, Clone)]
struct ClassInfo {
    name: String,
    type_params: Vec<String>,
    constructor_params: Vec<NovaType>,
    properties: Vec<PropertyInfo>,
    methods: Vec<MethodInfo>,
    is_enum: bool,
    enum_entries: Vec<String>,
}

#[derive(Debug, Clone)]
struct FunctionInfo {
    name: String,
    type_params: Vec<String>,
    receiver: Option<NovaType>,
    parameters: Vec<NovaType>,
    return_type: NovaType,
    /// The static-style name the call site is rewritten to for extensions
    lowered_name: String,
}

#[derive(Debug, Clone)]
struct ExtensionPropertyInfo {
    receiver: NovaType,
    ty: NovaType,
    getter_name: String,
}

pub struct SemanticAnalyzer {
    handler: Arc<dyn DiagnosticHandler>,
    symbols: SymbolTable,
    classes: FxHashMap<String, ClassInfo>,
    functions: FxHashMap<String, FunctionInfo>,
    /// Extension functions, grouped by simple name
    extensions: FxHashMap<String, Vec<FunctionInfo>>,
    /// Extension properties, grouped by simple name
    extension_properties: FxHashMap<String, Vec<ExtensionPropertyInfo>>,
    aliases: FxHashMap<String, Type>,
    /// Memoized property lookups, owned by this analyzer instance
    accessor_cache: FxHashMap<(String, String), Option<PropertyInfo>>,
    tables: SideTables,
    /// Enclosing function return types, innermost last
    return_types: Vec<NovaType>,
    /// Enclosing receiver types (`this`), innermost last
    receivers: Vec<NovaType>,
    /// Type parameters currently in scope
    type_params: Vec<String>,
    loop_depth: usize,
}

impl SemanticAnalyzer {
    pub fn new(handler: Arc<dyn DiagnosticHandler>) -> Self {
        Self {
            handler,
            symbols: SymbolTable::new(),
            classes: FxHashMap::default(),
            functions: FxHashMap::default(),
            extensions: FxHashMap::default(),
            extension_properties: FxHashMap::default(),
            aliases: FxHashMap::default(),
            accessor_cache: FxHashMap::default(),
            tables: SideTables::default(),
            return_types: Vec::new(),
            receivers: Vec::new(),
            type_params: Vec::new(),
            loop_depth: 0,
        }
    }

    /// Analyze a module, annotating the AST in place.
    pub fn analyze(mut self, module: &mut Module) -> Result<Analysis, CompileError> {
        debug!(module = %module.name, "collecting declarations");
        self.collect_declarations(module)?;

        debug!(module = %module.name, "checking declaration bodies");
        for declaration in &mut module.declarations {
            self.check_declaration(declaration)?;
        }

        Ok(Analysis {
            tables: self.tables,
        })
    }

    // -------------------------------------------------------------------------
    // Collection phase
    // -------------------------------------------------------------------------

    fn collect_declarations(&mut self, module: &mut Module) -> Result<(), CompileError> {
        // Aliases first so later signatures can use them
        for declaration in &module.declarations {
            if let Declaration::TypeAlias(alias) = declaration {
                self.aliases
                    .insert(alias.name.node.clone(), alias.target.clone());
            }
        }

        for declaration in &module.declarations {
            match declaration {
                Declaration::Class(class) => self.collect_class(class)?,
                Declaration::Function(function) => self.collect_function(function)?,
                Declaration::Import(import) => {
                    // Cross-unit references resolve by name at load time; an
                    // import just introduces an opaque binding here.
                    let name = import
                        .alias
                        .as_ref()
                        .map(|a| a.node.clone())
                        .unwrap_or_else(|| {
                            import
                                .path
                                .rsplit('.')
                                .next()
                                .unwrap_or(import.path.as_str())
                                .to_string()
                        });
                    self.declare(Symbol::new(name, SymbolKind::Value, NovaType::Any, import.span))?;
                }
                Declaration::Property(property) => {
                    if let Some(receiver) = &property.receiver {
                        let receiver_ty = self.resolve_type(receiver, &[]);
                        let ty = property
                            .type_annotation
                            .as_ref()
                            .map(|t| self.resolve_type(t, &[]))
                            .unwrap_or(NovaType::Any);
                        let getter_name = format!(
                            "{}$get_{}",
                            receiver_simple_name(&receiver_ty),
                            property.name.node
                        );
                        self.extension_properties
                            .entry(property.name.node.clone())
                            .or_default()
                            .push(ExtensionPropertyInfo {
                                receiver: receiver_ty,
                                ty,
                                getter_name,
                            });
                    }
                }
                Declaration::TypeAlias(_) => {}
            }
        }
        Ok(())
    }

    fn collect_class(&mut self, class: &ClassDeclaration) -> Result<(), CompileError> {
        let type_params: Vec<String> = class
            .type_parameters
            .iter()
            .map(|p| p.name.node.clone())
            .collect();

        let constructor_params: Vec<NovaType> = class
            .primary_constructor
            .iter()
            .map(|p| self.resolve_type(&p.type_annotation, &type_params))
            .collect();

        let mut properties: Vec<PropertyInfo> = class
            .primary_constructor
            .iter()
            .filter(|p| p.is_property)
            .map(|p| PropertyInfo {
                name: p.name.node.clone(),
                ty: self.resolve_type(&p.type_annotation, &type_params),
                mutable: p.mutable,
            })
            .collect();

        let mut methods = Vec::new();
        for member in &class.members {
            match member {
                ClassMember::Function(function) => {
                    let mut fn_type_params = type_params.clone();
                    for tp in &function.type_parameters {
                        fn_type_params.push(tp.name.node.clone());
                    }
                    methods.push(MethodInfo {
                        name: function.name.node.clone(),
                        parameters: function
                            .parameters
                            .iter()
                            .map(|p| self.resolve_parameter_type(p, &fn_type_params))
                            .collect(),
                        return_type: function
                            .return_type
                            .as_ref()
                            .map(|t| self.resolve_type(t, &fn_type_params))
                            .unwrap_or(NovaType::Unit),
                    });
                }
                ClassMember::Property(property) => {
                    let ty = property
                        .type_annotation
                        .as_ref()
                        .map(|t| self.resolve_type(t, &type_params))
                        .unwrap_or(NovaType::Any);
                    properties.push(PropertyInfo {
                        name: property.name.node.clone(),
                        ty,
                        mutable: property.mutable,
                    });
                }
            }
        }

        let info = ClassInfo {
            name: class.name.node.clone(),
            type_params: type_params.clone(),
            constructor_params,
            properties,
            methods,
            is_enum: class.is_enum,
            enum_entries: class.enum_entries.iter().map(|e| e.name.node.clone()).collect(),
        };

        let class_type = NovaType::class(
            info.name.clone(),
            type_params
                .iter()
                .map(|p| NovaType::TypeVar(p.clone()))
                .collect(),
        );
        self.declare(Symbol::new(
            info.name.clone(),
            SymbolKind::Class,
            class_type,
            class.span,
        ))?;
        self.classes.insert(info.name.clone(), info);
        Ok(())
    }

    fn collect_function(&mut self, function: &FunctionDeclaration) -> Result<(), CompileError> {
        let type_params: Vec<String> = function
            .type_parameters
            .iter()
            .map(|p| p.name.node.clone())
            .collect();

        let receiver = function
            .receiver
            .as_ref()
            .map(|t| self.resolve_type(t, &type_params));

        let parameters: Vec<NovaType> = function
            .parameters
            .iter()
            .map(|p| self.resolve_parameter_type(p, &type_params))
            .collect();

        let return_type = function
            .return_type
            .as_ref()
            .map(|t| self.resolve_type(t, &type_params))
            .unwrap_or(NovaType::Unit);

        let name = function.name.node.clone();
        let lowered_name = match &receiver {
            Some(receiver_type) => format!("{}${}", receiver_simple_name(receiver_type), name),
            None => name.clone(),
        };

        let info = FunctionInfo {
            name: name.clone(),
            type_params,
            receiver: receiver.clone(),
            parameters: parameters.clone(),
            return_type: return_type.clone(),
            lowered_name,
        };

        if receiver.is_some() {
            self.extensions.entry(name).or_default().push(info);
        } else {
            self.declare(Symbol::new(
                name.clone(),
                SymbolKind::Function,
                NovaType::function(parameters, return_type),
                function.span,
            ))?;
            self.functions.insert(name, info);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Checking phase
    // -------------------------------------------------------------------------

    fn check_declaration(&mut self, declaration: &mut Declaration) -> Result<(), CompileError> {
        match declaration {
            Declaration::Function(function) => self.check_function(function, None),
            Declaration::Class(class) => self.check_class(class),
            Declaration::Property(property) => self.check_top_level_property(property),
            Declaration::TypeAlias(_) | Declaration::Import(_) => Ok(()),
        }
    }

    fn check_function(
        &mut self,
        function: &mut FunctionDeclaration,
        enclosing_class: Option<&str>,
    ) -> Result<(), CompileError> {
        let outer_params = self.type_params.len();
        for tp in &function.type_parameters {
            self.type_params.push(tp.name.node.clone());
        }
        let type_params = self.type_params.clone();

        let return_type = function
            .return_type
            .as_ref()
            .map(|t| self.resolve_type(t, &type_params))
            .unwrap_or(NovaType::Unit);

        self.symbols.enter_scope();

        let receiver_type = match (&function.receiver, enclosing_class) {
            (Some(receiver), _) => Some(self.resolve_type(receiver, &type_params)),
            (None, Some(class_name)) => self.classes.get(class_name).map(|info| {
                NovaType::class(
                    info.name.clone(),
                    info.type_params
                        .iter()
                        .map(|p| NovaType::TypeVar(p.clone()))
                        .collect(),
                )
            }),
            (None, None) => None,
        };

        if let Some(receiver) = &receiver_type {
            self.receivers.push(receiver.clone());
            // Class properties are in scope as bare names inside methods
            if let Some(name) = class_simple_name(receiver) {
                if let Some(info) = self.classes.get(name).cloned() {
                    for property in &info.properties {
                        let kind = if property.mutable {
                            SymbolKind::Variable
                        } else {
                            SymbolKind::Value
                        };
                        self.declare(Symbol::new(
                            property.name.clone(),
                            kind,
                            property.ty.clone(),
                            function.span,
                        ))?;
                    }
                }
            }
        }

        for parameter in &function.parameters {
            let ty = self.resolve_parameter_type(parameter, &type_params);
            self.declare(Symbol::new(
                parameter.name.node.clone(),
                SymbolKind::Parameter,
                ty,
                parameter.span,
            ))?;
        }

        self.return_types.push(return_type);
        let result = self.check_block_statements(&mut function.body);
        self.return_types.pop();

        if receiver_type.is_some() {
            self.receivers.pop();
        }
        self.exit_scope(function.span)?;
        self.type_params.truncate(outer_params);
        result
    }

    fn check_class(&mut self, class: &mut ClassDeclaration) -> Result<(), CompileError> {
        check_class_variance(class, self.handler.as_ref());

        let outer_params = self.type_params.len();
        for tp in &class.type_parameters {
            self.type_params.push(tp.name.node.clone());
        }
        let class_name = class.name.node.clone();
        let info = self.classes.get(&class_name).cloned();

        // Enum entry arguments are checked against the primary constructor
        if let Some(info) = &info {
            for entry in &mut class.enum_entries {
                let mut arg_types = Vec::with_capacity(entry.arguments.len());
                for argument in &mut entry.arguments {
                    arg_types.push(self.infer_expr(argument, None)?);
                }
                self.check_call_arguments(
                    &info.constructor_params,
                    &arg_types,
                    entry.span,
                    &format!("enum entry '{}'", entry.name.node),
                );
            }
        }

        // Member property initializers and accessor bodies
        self.symbols.enter_scope();
        if let Some(info) = &info {
            let receiver = NovaType::class(
                info.name.clone(),
                info.type_params
                    .iter()
                    .map(|p| NovaType::TypeVar(p.clone()))
                    .collect(),
            );
            self.receivers.push(receiver);

            for parameter in &class.primary_constructor {
                let ty = self.resolve_type(&parameter.type_annotation, &self.type_params.clone());
                let kind = if parameter.mutable {
                    SymbolKind::Variable
                } else {
                    SymbolKind::Value
                };
                self.declare(Symbol::new(
                    parameter.name.node.clone(),
                    kind,
                    ty,
                    parameter.span,
                ))?;
            }

            for member in &mut class.members {
                if let ClassMember::Property(property) = member {
                    self.check_property(property)?;
                }
            }

            self.receivers.pop();
        }
        self.exit_scope(class.span)?;

        for member in &mut class.members {
            if let ClassMember::Function(function) = member {
                self.check_function(function, Some(&class_name))?;
            }
        }

        self.type_params.truncate(outer_params);
        Ok(())
    }

    fn check_top_level_property(
        &mut self,
        property: &mut PropertyDeclaration,
    ) -> Result<(), CompileError> {
        if property.receiver.is_some() {
            // Extension property: accessors only, no backing field
            return self.check_extension_property(property);
        }

        let ty = self.check_property(property)?;
        let kind = if property.mutable {
            SymbolKind::Variable
        } else {
            SymbolKind::Value
        };
        self.declare(Symbol::new(
            property.name.node.clone(),
            kind,
            ty,
            property.span,
        ))?;
        Ok(())
    }

    /// Check a property's initializer and accessors; returns its type.
    fn check_property(&mut self, property: &mut PropertyDeclaration) -> Result<NovaType, CompileError> {
        let type_params = self.type_params.clone();
        let declared = property
            .type_annotation
            .as_ref()
            .map(|t| self.resolve_type(t, &type_params));

        let inferred = match &mut property.initializer {
            Some(initializer) => Some(self.infer_expr(initializer, declared.as_ref())?),
            None => None,
        };

        // An explicit declared type is authoritative; the initializer is
        // only compatibility-checked against it.
        let ty = match (&declared, &inferred) {
            (Some(declared), Some(inferred)) => {
                self.check_assignment(declared, inferred, property.span);
                declared.clone()
            }
            (Some(declared), None) => declared.clone(),
            (None, Some(inferred)) => inferred.clone(),
            (None, None) => {
                self.handler.warning(
                    property.span,
                    &format!(
                        "property '{}' needs a type annotation or an initializer",
                        property.name.node
                    ),
                );
                NovaType::Any
            }
        };

        if let Some(getter) = &mut property.getter {
            self.check_accessor(getter, Some(ty.clone()), None)?;
        }
        let setter_value = ty.clone();
        if let Some(setter) = &mut property.setter {
            self.check_accessor(setter, None, Some(setter_value))?;
        }

        Ok(ty)
    }

    fn check_extension_property(
        &mut self,
        property: &mut PropertyDeclaration,
    ) -> Result<(), CompileError> {
        let type_params = self.type_params.clone();
        let receiver = property
            .receiver
            .as_ref()
            .map(|t| self.resolve_type(t, &type_params))
            .unwrap_or(NovaType::Any);
        let ty = property
            .type_annotation
            .as_ref()
            .map(|t| self.resolve_type(t, &type_params))
            .unwrap_or(NovaType::Any);

        self.receivers.push(receiver);
        if let Some(getter) = &mut property.getter {
            self.check_accessor(getter, Some(ty.clone()), None)?;
        }
        if let Some(setter) = &mut property.setter {
            self.check_accessor(setter, None, Some(ty))?;
        }
        self.receivers.pop();
        Ok(())
    }

    fn check_accessor(
        &mut self,
        accessor: &mut AccessorDeclaration,
        return_type: Option<NovaType>,
        value_type: Option<NovaType>,
    ) -> Result<(), CompileError> {
        self.symbols.enter_scope();
        if let (Some(parameter), Some(value_type)) = (&accessor.parameter, value_type) {
            self.declare(Symbol::new(
                parameter.node.clone(),
                SymbolKind::Parameter,
                value_type,
                parameter.span,
            ))?;
        }
        self.return_types.push(return_type.unwrap_or(NovaType::Unit));
        let result = self.check_block_statements(&mut accessor.body);
        self.return_types.pop();
        self.exit_scope(accessor.span)?;
        result
    }

    // -------------------------------------------------------------------------
    // Statements
    // -------------------------------------------------------------------------

    fn check_block_statements(&mut self, block: &mut Block) -> Result<(), CompileError> {
        for statement in &mut block.statements {
            self.check_statement(statement)?;
        }
        Ok(())
    }

    fn check_statement(&mut self, statement: &mut Statement) -> Result<(), CompileError> {
        match statement {
            Statement::Variable(declaration) => {
                let type_params = self.type_params.clone();
                let declared = declaration
                    .type_annotation
                    .as_ref()
                    .map(|t| self.resolve_type(t, &type_params));
                let inferred = self.infer_expr(&mut declaration.initializer, declared.as_ref())?;

                let ty = match declared {
                    Some(declared) => {
                        self.check_assignment(&declared, &inferred, declaration.span);
                        declared
                    }
                    None => inferred,
                };

                let kind = if declaration.mutable {
                    SymbolKind::Variable
                } else {
                    SymbolKind::Value
                };
                self.declare(Symbol::new(
                    declaration.name.node.clone(),
                    kind,
                    ty,
                    declaration.span,
                ))
            }
            Statement::Destructuring(declaration) => {
                let inferred = self.infer_expr(&mut declaration.initializer, None)?;
                let components = self.component_types(&inferred, declaration.names.len());

                match &components {
                    Some(components) => {
                        for (name, ty) in declaration.names.iter().zip(components.iter()) {
                            let kind = if declaration.mutable {
                                SymbolKind::Variable
                            } else {
                                SymbolKind::Value
                            };
                            self.declare(Symbol::new(
                                name.node.clone(),
                                kind,
                                ty.clone(),
                                name.span,
                            ))?;
                        }
                        self.tables
                            .component_types
                            .insert(declaration.span, components.clone());
                    }
                    None => {
                        self.handler.warning(
                            declaration.span,
                            &format!(
                                "type mismatch: type '{}' cannot be destructured into {} components",
                                inferred,
                                declaration.names.len()
                            ),
                        );
                        let fallback = vec![NovaType::Any; declaration.names.len()];
                        for (name, ty) in declaration.names.iter().zip(fallback.iter()) {
                            self.declare(Symbol::new(
                                name.node.clone(),
                                SymbolKind::Value,
                                ty.clone(),
                                name.span,
                            ))?;
                        }
                        self.tables
                            .component_types
                            .insert(declaration.span, fallback);
                    }
                }
                Ok(())
            }
            Statement::Expression(expression) => {
                self.infer_expr(expression, None)?;
                Ok(())
            }
            Statement::Return(ret) => {
                let expected = self.return_types.last().cloned();
                match (&mut ret.value, expected) {
                    (Some(value), Some(expected)) => {
                        let inferred = self.infer_expr(value, Some(&expected))?;
                        self.check_assignment(&expected, &inferred, ret.span);
                    }
                    (Some(value), None) => {
                        self.infer_expr(value, None)?;
                    }
                    (None, Some(expected)) => {
                        if expected != NovaType::Unit && expected != NovaType::Any {
                            self.handler.warning(
                                ret.span,
                                &format!("type mismatch: expected '{}', found 'Unit'", expected),
                            );
                        }
                    }
                    (None, None) => {}
                }
                Ok(())
            }
            Statement::Throw(throw) => {
                self.infer_expr(&mut throw.value, None)?;
                Ok(())
            }
            Statement::Break(span) | Statement::Continue(span) => {
                if self.loop_depth == 0 {
                    self.handler
                        .warning(*span, "'break'/'continue' outside of a loop");
                }
                Ok(())
            }
            Statement::While(while_stmt) => {
                let condition = self.infer_expr(&mut while_stmt.condition, Some(&NovaType::Boolean))?;
                self.check_condition(&condition, while_stmt.condition.span);
                self.loop_depth += 1;
                self.symbols.enter_scope();
                let result = self.check_block_statements(&mut while_stmt.body);
                self.exit_scope(while_stmt.span)?;
                self.loop_depth -= 1;
                result
            }
            Statement::For(for_stmt) => {
                let iterable = self.infer_expr(&mut for_stmt.iterable, None)?;
                let element = self.element_type(&iterable).unwrap_or_else(|| {
                    self.handler.warning(
                        for_stmt.iterable.span,
                        &format!("type mismatch: type '{}' is not iterable", iterable),
                    );
                    NovaType::Any
                });

                self.loop_depth += 1;
                self.symbols.enter_scope();
                self.declare(Symbol::new(
                    for_stmt.binding.node.clone(),
                    SymbolKind::Value,
                    element,
                    for_stmt.binding.span,
                ))?;
                let result = self.check_block_statements(&mut for_stmt.body);
                self.exit_scope(for_stmt.span)?;
                self.loop_depth -= 1;
                result
            }
            Statement::Guard(guard) => {
                let type_params = self.type_params.clone();
                let declared = guard
                    .type_annotation
                    .as_ref()
                    .map(|t| self.resolve_type(t, &type_params));
                let inferred = self.infer_expr(&mut guard.initializer, declared.as_ref())?;

                self.symbols.enter_scope();
                let result = self.check_block_statements(&mut guard.else_branch);
                self.exit_scope(guard.span)?;
                result?;

                if !block_exits(&guard.else_branch) {
                    self.handler.warning(
                        guard.span,
                        "guard else branch must exit with return, throw, break or continue",
                    );
                }

                // The binding is the non-null view of the initializer
                let ty = declared.unwrap_or_else(|| inferred.non_null().clone());
                self.declare(Symbol::new(
                    guard.name.node.clone(),
                    SymbolKind::Value,
                    ty,
                    guard.span,
                ))
            }
            Statement::Try(try_stmt) => {
                self.symbols.enter_scope();
                let result = self.check_block_statements(&mut try_stmt.body);
                self.exit_scope(try_stmt.span)?;
                result?;

                let type_params = self.type_params.clone();
                for catch in &mut try_stmt.catches {
                    let exception = self.resolve_type(&catch.exception_type, &type_params);
                    self.symbols.enter_scope();
                    self.declare(Symbol::new(
                        catch.binding.node.clone(),
                        SymbolKind::Value,
                        exception,
                        catch.binding.span,
                    ))?;
                    let result = self.check_block_statements(&mut catch.body);
                    self.exit_scope(catch.span)?;
                    result?;
                }

                if let Some(finally) = &mut try_stmt.finally {
                    self.symbols.enter_scope();
                    let result = self.check_block_statements(finally);
                    self.exit_scope(try_stmt.span)?;
                    result?;
                }
                Ok(())
            }
            Statement::Block(block) => {
                self.symbols.enter_scope();
                let result = self.check_block_statements(block);
                self.exit_scope(block.span)?;
                result
            }
        }
    }

    // -------------------------------------------------------------------------
    // Expressions
    // -------------------------------------------------------------------------

    fn infer_expr(
        &mut self,
        expr: &mut Expression,
        expected: Option<&NovaType>,
    ) -> Result<NovaType, CompileError> {
        let span = expr.span;
        let ty = self.infer_kind(&mut expr.kind, span, expected)?;
        expr.set_resolved_type(ty.clone())?;
        Ok(ty)
    }

    fn infer_kind(
        &mut self,
        kind: &mut ExpressionKind,
        span: Span,
        expected: Option<&NovaType>,
    ) -> Result<NovaType, CompileError> {
        match kind {
            ExpressionKind::Literal(literal) => Ok(self.literal_type(literal, expected)),
            ExpressionKind::Identifier(name) => match self.symbols.lookup(name) {
                Some(symbol) => Ok(symbol.ty.clone()),
                None => {
                    self.handler
                        .error(span, &format!("unresolved identifier '{}'", name));
                    Ok(NovaType::Any)
                }
            },
            ExpressionKind::This => match self.receivers.last() {
                Some(receiver) => Ok(receiver.clone()),
                None => {
                    self.handler
                        .error(span, "'this' is not available outside of a member body");
                    Ok(NovaType::Any)
                }
            },
            ExpressionKind::Interpolation(parts) => {
                for part in parts.iter_mut() {
                    if let InterpolationPart::Expression(expression) = part {
                        self.infer_expr(expression, None)?;
                    }
                }
                Ok(NovaType::String)
            }
            ExpressionKind::Binary(op, lhs, rhs) => {
                let op = *op;
                let left = self.infer_expr(lhs, None)?;
                let right = self.infer_expr(rhs, None)?;
                Ok(self.binary_result(op, &left, &right, span))
            }
            ExpressionKind::Unary(op, operand) => {
                let op = *op;
                let operand_ty = self.infer_expr(operand, None)?;
                match op {
                    UnaryOp::Not => {
                        self.check_condition(&operand_ty, span);
                        Ok(NovaType::Boolean)
                    }
                    UnaryOp::Negate => {
                        if operand_ty.is_numeric() || operand_ty == NovaType::Any {
                            Ok(operand_ty)
                        } else {
                            self.handler.warning(
                                span,
                                &format!("type mismatch: cannot negate type '{}'", operand_ty),
                            );
                            Ok(NovaType::Any)
                        }
                    }
                }
            }
            ExpressionKind::Assignment(target, value) => {
                let target_ty = self.infer_expr(target, None)?;
                if let ExpressionKind::Identifier(name) = &target.kind {
                    if let Some(symbol) = self.symbols.lookup(name) {
                        if !symbol.is_mutable() && symbol.kind != SymbolKind::Parameter {
                            self.handler.warning(
                                span,
                                &format!("reassignment of immutable value '{}'", name),
                            );
                        }
                    }
                }
                let value_ty = self.infer_expr(value, Some(&target_ty))?;
                self.check_assignment(&target_ty, &value_ty, span);
                Ok(NovaType::Unit)
            }
            ExpressionKind::Member(receiver, member) => {
                let member_name = member.node.clone();
                // A class name on the left is static access (enum entries)
                if let ExpressionKind::Identifier(name) = &receiver.kind {
                    let name = name.clone();
                    if let Some(info) = self.classes.get(&name).cloned() {
                        if info.enum_entries.iter().any(|e| e == &member_name) {
                            let entry_type = NovaType::class(info.name.clone(), Vec::new());
                            self.infer_expr(receiver, None)?;
                            return Ok(entry_type);
                        }
                    }
                }
                let receiver_ty = self.infer_expr(receiver, None)?;
                Ok(self.member_type(&receiver_ty, &member_name, span))
            }
            ExpressionKind::SafeMember(receiver, member) => {
                let member_name = member.node.clone();
                let receiver_ty = self.infer_expr(receiver, None)?;
                let member_ty = self.member_type(receiver_ty.non_null(), &member_name, span);
                Ok(NovaType::nullable(member_ty))
            }
            ExpressionKind::Index(receiver, index) => {
                let receiver_ty = self.infer_expr(receiver, None)?;
                self.infer_expr(index, None)?;
                Ok(self.index_result(&receiver_ty))
            }
            ExpressionKind::Call(callee, args, type_args) => {
                let type_args = type_args.clone();
                self.infer_call(callee, args, &type_args, span)
            }
            ExpressionKind::Lambda(lambda) => {
                let expected_sig = match expected {
                    Some(NovaType::Function(sig)) => Some(sig.clone()),
                    _ => None,
                };

                self.symbols.enter_scope();
                let mut parameter_types = Vec::with_capacity(lambda.parameters.len());
                let type_params = self.type_params.clone();
                for (i, parameter) in lambda.parameters.iter().enumerate() {
                    let ty = match &parameter.type_annotation {
                        Some(annotation) => self.resolve_type(annotation, &type_params),
                        None => expected_sig
                            .as_ref()
                            .and_then(|sig| sig.parameters.get(i).cloned())
                            .unwrap_or(NovaType::Any),
                    };
                    self.declare(Symbol::new(
                        parameter.name.node.clone(),
                        SymbolKind::Parameter,
                        ty.clone(),
                        parameter.span,
                    ))?;
                    parameter_types.push(ty);
                }

                let return_type = self.infer_block_value(&mut lambda.body.statements)?;
                self.exit_scope(lambda.span)?;
                Ok(NovaType::function(parameter_types, return_type))
            }
            ExpressionKind::If(if_expr) => {
                let condition = self.infer_expr(&mut if_expr.condition, Some(&NovaType::Boolean))?;
                self.check_condition(&condition, if_expr.condition.span);

                self.symbols.enter_scope();
                let then_ty = self.infer_block_value(&mut if_expr.then_branch.statements)?;
                self.exit_scope(if_expr.span)?;

                match &mut if_expr.else_branch {
                    Some(else_branch) => {
                        self.symbols.enter_scope();
                        let else_ty = self.infer_block_value(&mut else_branch.statements)?;
                        self.exit_scope(if_expr.span)?;
                        Ok(common_super_type(&then_ty, &else_ty))
                    }
                    None => Ok(NovaType::Unit),
                }
            }
            ExpressionKind::When(when_expr) => {
                let subject_ty = match &mut when_expr.subject {
                    Some(subject) => Some(self.infer_expr(subject, None)?),
                    None => None,
                };

                let mut result: Option<NovaType> = None;
                let type_params = self.type_params.clone();
                for branch in &mut when_expr.branches {
                    for condition in &mut branch.conditions {
                        match condition {
                            WhenCondition::Expression(expression) => {
                                let ty = self.infer_expr(expression, subject_ty.as_ref())?;
                                if subject_ty.is_none() {
                                    self.check_condition(&ty, expression.span);
                                }
                            }
                            WhenCondition::Is(target) => {
                                self.resolve_type(target, &type_params);
                                if subject_ty.is_none() {
                                    self.handler.warning(
                                        branch.span,
                                        "'is' condition requires a when subject",
                                    );
                                }
                            }
                        }
                    }
                    self.symbols.enter_scope();
                    let branch_ty = self.infer_block_value(&mut branch.body.statements)?;
                    self.exit_scope(branch.span)?;
                    result = Some(match result {
                        Some(previous) => common_super_type(&previous, &branch_ty),
                        None => branch_ty,
                    });
                }

                match &mut when_expr.else_branch {
                    Some(else_branch) => {
                        self.symbols.enter_scope();
                        let else_ty = self.infer_block_value(&mut else_branch.statements)?;
                        self.exit_scope(when_expr.span)?;
                        result = Some(match result {
                            Some(previous) => common_super_type(&previous, &else_ty),
                            None => else_ty,
                        });
                        Ok(result.unwrap_or(NovaType::Unit))
                    }
                    None => Ok(NovaType::Unit),
                }
            }
            ExpressionKind::Is(operand, target, _negated) => {
                self.infer_expr(operand, None)?;
                let type_params = self.type_params.clone();
                self.resolve_type(target, &type_params);
                Ok(NovaType::Boolean)
            }
            ExpressionKind::As(operand, target, safe) => {
                let safe = *safe;
                self.infer_expr(operand, None)?;
                let type_params = self.type_params.clone();
                let target_ty = self.resolve_type(target, &type_params);
                if safe {
                    Ok(NovaType::nullable(target_ty))
                } else {
                    Ok(target_ty)
                }
            }
            ExpressionKind::ClassReference(target) => {
                let type_params = self.type_params.clone();
                let target_ty = self.resolve_type(target, &type_params);
                Ok(NovaType::class("Class", vec![target_ty]))
            }
            ExpressionKind::Parenthesized(inner) => self.infer_expr(inner, expected),
        }
    }

    fn literal_type(&self, literal: &Literal, expected: Option<&NovaType>) -> NovaType {
        match literal {
            Literal::Null => NovaType::nullable(NovaType::Nothing),
            Literal::Boolean(_) => NovaType::Boolean,
            Literal::Char(_) => NovaType::Char,
            Literal::Int(_) => {
                // An integer literal adapts to an expected Long slot
                if matches!(expected, Some(NovaType::Numeric(NumericKind::Long))) {
                    NovaType::LONG
                } else {
                    NovaType::INT
                }
            }
            Literal::Long(_) => NovaType::LONG,
            Literal::Float(_) => NovaType::FLOAT,
            Literal::Double(_) => NovaType::DOUBLE,
            Literal::String(_) => NovaType::String,
        }
    }

    fn binary_result(
        &mut self,
        op: BinaryOp,
        left: &NovaType,
        right: &NovaType,
        span: Span,
    ) -> NovaType {
        // String concatenation is special-cased before operator resolution
        if op == BinaryOp::Add && (*left == NovaType::String || *right == NovaType::String) {
            return NovaType::String;
        }

        if op.is_comparison() {
            if matches!(op, BinaryOp::LessThan | BinaryOp::LessThanOrEqual | BinaryOp::GreaterThan | BinaryOp::GreaterThanOrEqual) {
                let comparable = |t: &NovaType| {
                    t.is_numeric() || *t == NovaType::Char || *t == NovaType::String || *t == NovaType::Any
                };
                if !comparable(left) || !comparable(right) {
                    self.handler.warning(
                        span,
                        &format!(
                            "type mismatch: cannot compare '{}' with '{}'",
                            left, right
                        ),
                    );
                }
            }
            return NovaType::Boolean;
        }

        if op.is_logical() {
            self.check_condition(left, span);
            self.check_condition(right, span);
            return NovaType::Boolean;
        }

        // Arithmetic: promotion along the numeric total order
        match (left.numeric_kind(), right.numeric_kind()) {
            (Some(l), Some(r)) => NovaType::Numeric(NumericKind::promote(l, r)),
            _ => {
                if *left == NovaType::Any || *right == NovaType::Any {
                    NovaType::Any
                } else {
                    self.handler.warning(
                        span,
                        &format!(
                            "type mismatch: arithmetic on '{}' and '{}'",
                            left, right
                        ),
                    );
                    NovaType::Any
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Calls
    // -------------------------------------------------------------------------

    fn infer_call(
        &mut self,
        callee: &mut Expression,
        args: &mut [Expression],
        explicit_type_args: &[Type],
        span: Span,
    ) -> Result<NovaType, CompileError> {
        let mut arg_types = Vec::with_capacity(args.len());
        for arg in args.iter_mut() {
            arg_types.push(self.infer_expr(arg, None)?);
        }

        let callee_span = callee.span;
        match &mut callee.kind {
            ExpressionKind::Identifier(name) => {
                let name = name.clone();
                let result = self.infer_named_call(&name, &arg_types, explicit_type_args, span)?;
                callee.set_resolved_type(result.callee_type)?;
                Ok(result.return_type)
            }
            ExpressionKind::Member(receiver, member) => {
                let member_name = member.node.clone();
                let receiver_ty = self.infer_expr(receiver, None)?;
                if receiver_ty.is_nullable() {
                    self.handler.warning(
                        callee_span,
                        &format!(
                            "type mismatch: call of '{}' on nullable receiver '{}'",
                            member_name, receiver_ty
                        ),
                    );
                }
                let return_type =
                    self.infer_method_call(&receiver_ty, &member_name, &arg_types, span);
                callee.set_resolved_type(NovaType::function(
                    arg_types.clone(),
                    return_type.clone(),
                ))?;
                Ok(return_type)
            }
            ExpressionKind::SafeMember(receiver, member) => {
                let member_name = member.node.clone();
                let receiver_ty = self.infer_expr(receiver, None)?;
                let return_type = self.infer_method_call(
                    receiver_ty.non_null(),
                    &member_name,
                    &arg_types,
                    span,
                );
                callee.set_resolved_type(NovaType::function(
                    arg_types.clone(),
                    return_type.clone(),
                ))?;
                Ok(NovaType::nullable(return_type))
            }
            _ => {
                // Calling an arbitrary expression: it must be function-typed
                let callee_ty = self.infer_expr(callee, None)?;
                match &callee_ty {
                    NovaType::Function(sig) => {
                        self.check_call_arguments(&sig.parameters, &arg_types, span, "call");
                        Ok((*sig.return_type).clone())
                    }
                    NovaType::Any => Ok(NovaType::Any),
                    other => {
                        self.handler.warning(
                            span,
                            &format!("type mismatch: type '{}' is not callable", other),
                        );
                        Ok(NovaType::Any)
                    }
                }
            }
        }
    }

    fn infer_named_call(
        &mut self,
        name: &str,
        arg_types: &[NovaType],
        explicit_type_args: &[Type],
        span: Span,
    ) -> Result<NamedCallResult, CompileError> {
        let type_params = self.type_params.clone();
        let explicit: Vec<NovaType> = explicit_type_args
            .iter()
            .map(|t| self.resolve_type(t, &type_params))
            .collect();

        // A local binding shadows every global resolution
        if let Some(symbol) = self.symbols.lookup(name) {
            if matches!(
                symbol.kind,
                SymbolKind::Variable | SymbolKind::Value | SymbolKind::Parameter
            ) {
                let symbol_type = symbol.ty.clone();
                match &symbol_type {
                    NovaType::Function(sig) => {
                        self.check_call_arguments(&sig.parameters, arg_types, span, name);
                        return Ok(NamedCallResult {
                            return_type: (*sig.return_type).clone(),
                            callee_type: symbol_type.clone(),
                        });
                    }
                    NovaType::Any => {
                        return Ok(NamedCallResult {
                            return_type: NovaType::Any,
                            callee_type: NovaType::Any,
                        });
                    }
                    other => {
                        self.handler.warning(
                            span,
                            &format!("type mismatch: type '{}' is not callable", other),
                        );
                        return Ok(NamedCallResult {
                            return_type: NovaType::Any,
                            callee_type: other.clone(),
                        });
                    }
                }
            }
        }

        // Collection factories
        if let Some(result) = self.infer_factory_call(name, arg_types, &explicit) {
            return Ok(NamedCallResult {
                return_type: result,
                callee_type: NovaType::Any,
            });
        }

        // Built-in top-level functions
        match name {
            "println" | "print" => {
                return Ok(NamedCallResult {
                    return_type: NovaType::Unit,
                    callee_type: NovaType::function(vec![NovaType::Any], NovaType::Unit),
                });
            }
            _ => {}
        }

        // Generic (or plain) constructor invocation
        if let Some(class) = self.classes.get(name).cloned() {
            let bindings = self.bind_call(
                &class.type_params,
                &class.constructor_params,
                arg_types,
                &explicit,
                span,
            );
            let constructor_params: Vec<NovaType> = class
                .constructor_params
                .iter()
                .map(|p| substitute(p, &bindings))
                .collect();
            self.check_call_arguments(
                &constructor_params,
                arg_types,
                span,
                &format!("constructor of '{}'", name),
            );

            let bound: Vec<NovaType> = class
                .type_params
                .iter()
                .map(|p| bindings.get(p).cloned().unwrap_or(NovaType::Any))
                .collect();
            self.tables.call_bindings.insert(
                span,
                class
                    .type_params
                    .iter()
                    .cloned()
                    .zip(bound.iter().cloned())
                    .collect(),
            );

            let class_type = NovaType::class(class.name.clone(), bound);
            return Ok(NamedCallResult {
                callee_type: NovaType::function(constructor_params, class_type.clone()),
                return_type: class_type,
            });
        }

        // Top-level function
        if let Some(function) = self.functions.get(name).cloned() {
            let bindings = self.bind_call(
                &function.type_params,
                &function.parameters,
                arg_types,
                &explicit,
                span,
            );
            let parameters: Vec<NovaType> = function
                .parameters
                .iter()
                .map(|p| substitute(p, &bindings))
                .collect();
            self.check_call_arguments(&parameters, arg_types, span, &format!("'{}'", name));

            if !function.type_params.is_empty() {
                self.tables.call_bindings.insert(
                    span,
                    function
                        .type_params
                        .iter()
                        .map(|p| {
                            (
                                p.clone(),
                                bindings.get(p).cloned().unwrap_or(NovaType::Any),
                            )
                        })
                        .collect(),
                );
            }

            let return_type = substitute(&function.return_type, &bindings);
            return Ok(NamedCallResult {
                callee_type: NovaType::function(parameters, return_type.clone()),
                return_type,
            });
        }

        // A local function value
        if let Some(symbol) = self.symbols.lookup(name) {
            let symbol_type = symbol.ty.clone();
            match &symbol_type {
                NovaType::Function(sig) => {
                    self.check_call_arguments(&sig.parameters, arg_types, span, name);
                    return Ok(NamedCallResult {
                        return_type: (*sig.return_type).clone(),
                        callee_type: symbol_type.clone(),
                    });
                }
                NovaType::Any => {
                    return Ok(NamedCallResult {
                        return_type: NovaType::Any,
                        callee_type: NovaType::Any,
                    });
                }
                other => {
                    self.handler.warning(
                        span,
                        &format!("type mismatch: type '{}' is not callable", other),
                    );
                    return Ok(NamedCallResult {
                        return_type: NovaType::Any,
                        callee_type: other.clone(),
                    });
                }
            }
        }

        self.handler
            .error(span, &format!("unresolved identifier '{}'", name));
        Ok(NamedCallResult {
            return_type: NovaType::Any,
            callee_type: NovaType::Any,
        })
    }

    /// Collection-factory inference: fold the element types pairwise via
    /// `common_super_type`; an empty literal infers `Container<Any>`.
    fn infer_factory_call(
        &mut self,
        name: &str,
        arg_types: &[NovaType],
        explicit: &[NovaType],
    ) -> Option<NovaType> {
        let container = match name {
            "listOf" | "emptyList" => "List",
            "mutableListOf" => "MutableList",
            "setOf" | "emptySet" => "Set",
            "mapOf" | "emptyMap" => "Map",
            _ => return None,
        };

        if container == "Map" {
            if let Some(first) = explicit.first() {
                let value = explicit.get(1).cloned().unwrap_or(NovaType::Any);
                return Some(NovaType::map_of(first.clone(), value));
            }
            if arg_types.is_empty() {
                return Some(NovaType::map_of(NovaType::Any, NovaType::Any));
            }
            let mut key: Option<NovaType> = None;
            let mut value: Option<NovaType> = None;
            for arg in arg_types {
                let (k, v) = match arg {
                    NovaType::Class(class) if class.name == "Pair" && class.type_args.len() == 2 => {
                        (class.type_args[0].clone(), class.type_args[1].clone())
                    }
                    _ => (NovaType::Any, NovaType::Any),
                };
                key = Some(match key {
                    Some(previous) => common_super_type(&previous, &k),
                    None => k,
                });
                value = Some(match value {
                    Some(previous) => common_super_type(&previous, &v),
                    None => v,
                });
            }
            return Some(NovaType::map_of(
                key.unwrap_or(NovaType::Any),
                value.unwrap_or(NovaType::Any),
            ));
        }

        let element = if let Some(explicit_element) = explicit.first() {
            explicit_element.clone()
        } else if arg_types.is_empty() {
            NovaType::Any
        } else {
            let mut folded = arg_types[0].clone();
            for arg in &arg_types[1..] {
                folded = common_super_type(&folded, arg);
            }
            folded
        };

        Some(NovaType::class(container, vec![element]))
    }

    fn infer_method_call(
        &mut self,
        receiver: &NovaType,
        name: &str,
        arg_types: &[NovaType],
        span: Span,
    ) -> NovaType {
        // Class methods first
        if let Some(class_name) = class_simple_name(receiver) {
            if let Some(class) = self.classes.get(class_name).cloned() {
                if let Some(method) = class.methods.iter().find(|m| m.name == name) {
                    let bindings = self.receiver_bindings(&class, receiver);
                    let parameters: Vec<NovaType> = method
                        .parameters
                        .iter()
                        .map(|p| substitute(p, &bindings))
                        .collect();
                    self.check_call_arguments(&parameters, arg_types, span, &format!("'{}'", name));
                    return substitute(&method.return_type, &bindings);
                }
            }
        }

        // Built-in methods on primitives and containers
        if let Some(return_type) = self.builtin_method(receiver, name, arg_types) {
            return return_type;
        }

        // Extension functions
        if let Some(candidates) = self.extensions.get(name).cloned() {
            for candidate in candidates {
                let candidate_receiver = candidate.receiver.clone().unwrap_or(NovaType::Any);
                let bindings = bind_type_parameters(
                    &candidate.type_params,
                    &[candidate_receiver.clone()],
                    std::slice::from_ref(receiver),
                );
                let bound_receiver = substitute(&candidate_receiver, &bindings);
                if !TypeCompatibility::is_assignable(receiver, &bound_receiver) {
                    continue;
                }

                let mut all_bindings = bindings;
                let arg_bindings =
                    bind_type_parameters(&candidate.type_params, &candidate.parameters, arg_types);
                for (k, v) in arg_bindings {
                    all_bindings.entry(k).or_insert(v);
                }

                let parameters: Vec<NovaType> = candidate
                    .parameters
                    .iter()
                    .map(|p| substitute(p, &all_bindings))
                    .collect();
                self.check_call_arguments(&parameters, arg_types, span, &format!("'{}'", name));

                self.tables
                    .extension_calls
                    .insert(span, candidate.lowered_name.clone());
                if !candidate.type_params.is_empty() {
                    self.tables.call_bindings.insert(
                        span,
                        candidate
                            .type_params
                            .iter()
                            .map(|p| {
                                (
                                    p.clone(),
                                    all_bindings.get(p).cloned().unwrap_or(NovaType::Any),
                                )
                            })
                            .collect(),
                    );
                }
                return substitute(&candidate.return_type, &all_bindings);
            }
        }

        if *receiver == NovaType::Any {
            return NovaType::Any;
        }

        self.handler.warning(
            span,
            &format!("unknown method '{}' on type '{}'", name, receiver),
        );
        NovaType::Any
    }

    fn builtin_method(
        &self,
        receiver: &NovaType,
        name: &str,
        arg_types: &[NovaType],
    ) -> Option<NovaType> {
        // Methods available on every value
        match name {
            "toString" if arg_types.is_empty() => return Some(NovaType::String),
            "to" if arg_types.len() == 1 => {
                return Some(NovaType::pair_of(receiver.clone(), arg_types[0].clone()));
            }
            _ => {}
        }

        match receiver {
            NovaType::String => match (name, arg_types.len()) {
                ("uppercase", 0) | ("lowercase", 0) | ("trim", 0) => Some(NovaType::String),
                ("concat", 1) => Some(NovaType::String),
                ("isEmpty", 0) => Some(NovaType::Boolean),
                ("substring", 1) | ("substring", 2) => Some(NovaType::String),
                _ => None,
            },
            NovaType::Class(class) => {
                let element = class.type_args.first().cloned().unwrap_or(NovaType::Any);
                match (class.name.as_str(), name, arg_types.len()) {
                    ("List" | "MutableList" | "Set", "isEmpty", 0) => Some(NovaType::Boolean),
                    ("List" | "MutableList", "get", 1) => Some(element),
                    ("List" | "MutableList" | "Set", "contains", 1) => Some(NovaType::Boolean),
                    ("MutableList", "add", 1) => Some(NovaType::Unit),
                    ("List" | "MutableList" | "Set", "iterator", 0) => {
                        Some(NovaType::class("Iterator", vec![element]))
                    }
                    ("Map", "get", 1) => {
                        let value = class.type_args.get(1).cloned().unwrap_or(NovaType::Any);
                        Some(NovaType::nullable(value))
                    }
                    ("Map", "containsKey", 1) => Some(NovaType::Boolean),
                    ("Map", "isEmpty", 0) => Some(NovaType::Boolean),
                    ("Pair", "component1", 0) => Some(element),
                    ("Pair", "component2", 0) => {
                        Some(class.type_args.get(1).cloned().unwrap_or(NovaType::Any))
                    }
                    ("Iterator", "hasNext", 0) => Some(NovaType::Boolean),
                    ("Iterator", "next", 0) => Some(element),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn member_type(&mut self, receiver: &NovaType, name: &str, span: Span) -> NovaType {
        if receiver.is_nullable() {
            self.handler.warning(
                span,
                &format!(
                    "type mismatch: member access '{}' on nullable receiver '{}'",
                    name, receiver
                ),
            );
        }
        let receiver = receiver.non_null();

        // Built-in properties
        match receiver {
            NovaType::String => {
                if name == "length" {
                    return NovaType::INT;
                }
            }
            NovaType::Class(class) => match (class.name.as_str(), name) {
                ("List" | "MutableList" | "Set" | "Map", "size") => return NovaType::INT,
                ("Pair", "first") => {
                    return class.type_args.first().cloned().unwrap_or(NovaType::Any);
                }
                ("Pair", "second") => {
                    return class.type_args.get(1).cloned().unwrap_or(NovaType::Any);
                }
                _ => {}
            },
            _ => {}
        }

        // Class properties, memoized per (class, member)
        if let Some(class_name) = class_simple_name(receiver) {
            let key = (class_name.to_string(), name.to_string());
            let cached = match self.accessor_cache.get(&key) {
                Some(entry) => entry.clone(),
                None => {
                    let computed = self.classes.get(class_name).and_then(|info| {
                        info.properties.iter().find(|p| p.name == name).cloned()
                    });
                    self.accessor_cache.insert(key, computed.clone());
                    computed
                }
            };
            if let Some(property) = cached {
                if let Some(class) = self.classes.get(class_name).cloned() {
                    let bindings = self.receiver_bindings(&class, receiver);
                    return substitute(&property.ty, &bindings);
                }
                return property.ty;
            }
        }

        // Extension properties
        if let Some(candidates) = self.extension_properties.get(name).cloned() {
            for candidate in candidates {
                if TypeCompatibility::is_assignable(receiver, &candidate.receiver) {
                    self.tables
                        .extension_calls
                        .insert(span, candidate.getter_name.clone());
                    return candidate.ty;
                }
            }
        }

        if *receiver == NovaType::Any {
            return NovaType::Any;
        }

        self.handler.warning(
            span,
            &format!("unknown member '{}' on type '{}'", name, receiver),
        );
        NovaType::Any
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn bind_call(
        &mut self,
        type_params: &[String],
        parameter_types: &[NovaType],
        arg_types: &[NovaType],
        explicit: &[NovaType],
        span: Span,
    ) -> FxHashMap<String, NovaType> {
        if !explicit.is_empty() {
            if explicit.len() != type_params.len() {
                self.handler.warning(
                    span,
                    &format!(
                        "type mismatch: expected {} type arguments, found {}",
                        type_params.len(),
                        explicit.len()
                    ),
                );
            }
            let mut bindings = FxHashMap::default();
            for (param, arg) in type_params.iter().zip(explicit.iter()) {
                bindings.insert(param.clone(), arg.clone());
            }
            return bindings;
        }

        bind_type_parameters(type_params, parameter_types, arg_types)
    }

    fn receiver_bindings(
        &self,
        class: &ClassInfo,
        receiver: &NovaType,
    ) -> FxHashMap<String, NovaType> {
        let mut bindings = FxHashMap::default();
        if let NovaType::Class(class_type) = receiver.non_null() {
            for (param, arg) in class.type_params.iter().zip(class_type.type_args.iter()) {
                bindings.insert(param.clone(), arg.clone());
            }
        }
        bindings
    }

    fn check_call_arguments(
        &mut self,
        parameters: &[NovaType],
        arg_types: &[NovaType],
        span: Span,
        what: &str,
    ) {
        if parameters.len() != arg_types.len() {
            self.handler.warning(
                span,
                &format!(
                    "type mismatch: {} expects {} arguments, found {}",
                    what,
                    parameters.len(),
                    arg_types.len()
                ),
            );
            return;
        }
        for (parameter, arg) in parameters.iter().zip(arg_types.iter()) {
            self.check_assignment(parameter, arg, span);
        }
    }

    fn check_assignment(&mut self, declared: &NovaType, inferred: &NovaType, span: Span) {
        match TypeCompatibility::check(inferred, declared) {
            Compatibility::Ok => {}
            Compatibility::NullToNonNull => {
                self.handler.warning(
                    span,
                    &format!(
                        "type mismatch: null value assigned to non-nullable type '{}'",
                        declared
                    ),
                );
            }
            Compatibility::NumericNarrowing => {
                self.handler.warning(
                    span,
                    &format!(
                        "type mismatch: value of type '{}' narrows declared type '{}'",
                        inferred, declared
                    ),
                );
            }
            Compatibility::Incompatible => {
                self.handler.warning(
                    span,
                    &format!(
                        "type mismatch: expected '{}', found '{}'",
                        declared, inferred
                    ),
                );
            }
        }
    }

    fn check_condition(&mut self, ty: &NovaType, span: Span) {
        if *ty != NovaType::Boolean && *ty != NovaType::Any {
            self.handler.warning(
                span,
                &format!("type mismatch: condition must be 'Boolean', found '{}'", ty),
            );
        }
    }

    /// Infer the statements of a block used in value position; the value is
    /// the trailing expression statement, or `Unit`.
    fn infer_block_value(&mut self, statements: &mut Vec<Statement>) -> Result<NovaType, CompileError> {
        let mut value = NovaType::Unit;
        let last = statements.len().saturating_sub(1);
        for (i, statement) in statements.iter_mut().enumerate() {
            if i == last {
                if let Statement::Expression(expression) = statement {
                    value = self.infer_expr(expression, None)?;
                    continue;
                }
            }
            self.check_statement(statement)?;
        }
        Ok(value)
    }

    fn component_types(&self, ty: &NovaType, count: usize) -> Option<Vec<NovaType>> {
        match ty.non_null() {
            NovaType::Class(class) if class.name == "Pair" && count == 2 => {
                Some(class.type_args.clone())
            }
            NovaType::Class(class)
                if matches!(class.name.as_str(), "List" | "MutableList") =>
            {
                let element = class.type_args.first().cloned().unwrap_or(NovaType::Any);
                Some(vec![element; count])
            }
            NovaType::Class(class) => {
                let info = self.classes.get(&class.name)?;
                if info.properties.len() < count {
                    return None;
                }
                let mut bindings = FxHashMap::default();
                for (param, arg) in info.type_params.iter().zip(class.type_args.iter()) {
                    bindings.insert(param.clone(), arg.clone());
                }
                Some(
                    info.properties[..count]
                        .iter()
                        .map(|p| substitute(&p.ty, &bindings))
                        .collect(),
                )
            }
            _ => None,
        }
    }

    fn element_type(&self, ty: &NovaType) -> Option<NovaType> {
        match ty.non_null() {
            NovaType::String => Some(NovaType::Char),
            NovaType::Class(class) => match class.name.as_str() {
                "List" | "MutableList" | "Set" | "Iterator" => {
                    Some(class.type_args.first().cloned().unwrap_or(NovaType::Any))
                }
                "Map" => {
                    let key = class.type_args.first().cloned().unwrap_or(NovaType::Any);
                    let value = class.type_args.get(1).cloned().unwrap_or(NovaType::Any);
                    Some(NovaType::pair_of(key, value))
                }
                _ => None,
            },
            NovaType::Any => Some(NovaType::Any),
            _ => None,
        }
    }

    fn index_result(&self, receiver: &NovaType) -> NovaType {
        match receiver.non_null() {
            NovaType::String => NovaType::Char,
            NovaType::Class(class) => match class.name.as_str() {
                "List" | "MutableList" => {
                    class.type_args.first().cloned().unwrap_or(NovaType::Any)
                }
                "Map" => NovaType::nullable(
                    class.type_args.get(1).cloned().unwrap_or(NovaType::Any),
                ),
                _ => NovaType::Any,
            },
            _ => NovaType::Any,
        }
    }

    fn resolve_parameter_type(&self, parameter: &Parameter, type_params: &[String]) -> NovaType {
        parameter
            .type_annotation
            .as_ref()
            .map(|t| self.resolve_type(t, type_params))
            .unwrap_or(NovaType::Any)
    }

    /// The canonical declared-type to structural-type conversion.
    ///
    /// Total: unknown names become opaque class types (cross-unit references
    /// resolve by name at load time).
    fn resolve_type(&self, ty: &Type, type_params: &[String]) -> NovaType {
        self.resolve_type_depth(ty, type_params, 0)
    }

    fn resolve_type_depth(&self, ty: &Type, type_params: &[String], depth: u32) -> NovaType {
        match &ty.kind {
            TypeKind::Nullable(inner) => {
                NovaType::nullable(self.resolve_type_depth(inner, type_params, depth))
            }
            TypeKind::Function(function) => NovaType::function(
                function
                    .parameters
                    .iter()
                    .map(|p| self.resolve_type_depth(p, type_params, depth))
                    .collect(),
                self.resolve_type_depth(&function.return_type, type_params, depth),
            ),
            TypeKind::Named(reference) => {
                let name = reference.name.node.as_str();

                if reference.type_arguments.is_empty() {
                    match name {
                        "Int" => return NovaType::INT,
                        "Long" => return NovaType::LONG,
                        "Float" => return NovaType::FLOAT,
                        "Double" => return NovaType::DOUBLE,
                        "Boolean" => return NovaType::Boolean,
                        "Char" => return NovaType::Char,
                        "String" => return NovaType::String,
                        "Unit" => return NovaType::Unit,
                        "Nothing" => return NovaType::Nothing,
                        "Any" => return NovaType::Any,
                        _ => {}
                    }

                    if type_params.iter().any(|p| p == name) {
                        return NovaType::TypeVar(name.to_string());
                    }

                    if let Some(target) = self.aliases.get(name) {
                        if depth >= MAX_ALIAS_DEPTH {
                            return NovaType::Any;
                        }
                        return self.resolve_type_depth(target, type_params, depth + 1);
                    }
                }

                NovaType::class(
                    name,
                    reference
                        .type_arguments
                        .iter()
                        .map(|arg| self.resolve_type_depth(&arg.ty, type_params, depth))
                        .collect(),
                )
            }
        }
    }

    fn declare(&mut self, symbol: Symbol) -> Result<(), CompileError> {
        let span = symbol.span;
        if let Err(message) = self.symbols.declare(symbol) {
            // Redeclaration in one scope is a user problem, not corruption
            self.handler.warning(span, &message);
        }
        Ok(())
    }

    fn exit_scope(&mut self, span: Span) -> Result<(), CompileError> {
        self.symbols
            .exit_scope()
            .map_err(|message| CompileError::internal("sema", span, message))
    }
}

struct NamedCallResult {
    return_type: NovaType,
    callee_type: NovaType,
}

fn class_simple_name(ty: &NovaType) -> Option<&str> {
    match ty.non_null() {
        NovaType::Class(class) => Some(class.name.as_str()),
        _ => None,
    }
}

fn receiver_simple_name(ty: &NovaType) -> String {
    match ty {
        NovaType::Numeric(kind) => kind.name().to_string(),
        NovaType::Boolean => "Boolean".to_string(),
        NovaType::Char => "Char".to_string(),
        NovaType::String => "String".to_string(),
        NovaType::Unit => "Unit".to_string(),
        NovaType::Nothing => "Nothing".to_string(),
        NovaType::Any => "Any".to_string(),
        NovaType::Nullable(inner) => receiver_simple_name(inner),
        NovaType::Class(class) => class.name.clone(),
        NovaType::Function(_) => "Function".to_string(),
        NovaType::TypeVar(name) => name.clone(),
    }
}

/// True when the block's last statement leaves the enclosing scope
fn block_exits(block: &Block) -> bool {
    matches!(
        block.statements.last(),
        Some(
            Statement::Return(_)
                | Statement::Throw(_)
                | Statement::Break(_)
                | Statement::Continue(_)
        )
    )
}
