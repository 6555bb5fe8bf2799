//! HIR to MIR lowering.
//!
//! Flattens the optimized HIR tree into linear stack-machine code. Every
//! expression emission leaves exactly one value on the stack unless the
//! expression's type is `Unit`, in which case it leaves none; `emit_value`
//! pushes the unit constant where a value is syntactically required.
//!
//! Jump targets are patched instruction indices (the encoder converts them
//! to byte offsets). Remaining generic type parameters are erased to the
//! universal top type at this boundary; an unresolved type variable that
//! is not accounted for by an enclosing declaration is a compiler bug and
//! surfaces as a fatal error from the type-mapping table.

use crate::codegen::type_mapping::TypeMapping;
use crate::errors::CompileError;
use crate::hir::{
    HirBinaryOp, HirCallee, HirClass, HirDecl, HirExpr, HirExprKind, HirFunction, HirLiteral,
    HirLoopKind, HirModule, HirStmt, HirType, HirTypeKind, HirUnaryOp,
};
use crate::mir::{
    InvokeKind, MirBinOp, MirClass, MirConst, MirField, MirHandler, MirInst, MirMethod,
    MirModule, MirPrimKind, CLASS_FLAG_ENUM, CLASS_FLAG_SYNTHETIC, FIELD_FLAG_MUTABLE,
    FIELD_FLAG_STATIC, METHOD_FLAG_STATIC, METHOD_FLAG_SYNTHETIC,
};
use crate::span::Span;
use rustc_hash::{FxHashMap, FxHashSet};
use std::rc::Rc;
use tracing::debug;

const STAGE: &str = "mir-lowering";

/// The synthetic container class for a module's top-level members.
pub fn module_class_name(module: &str) -> String {
    format!("{}.Module", module)
}

pub struct MirLowering {
    mapping: TypeMapping,
}

struct ClassShape {
    type_params: FxHashSet<String>,
    /// field name -> descriptor
    fields: FxHashMap<String, String>,
    /// method name -> descriptor
    methods: FxHashMap<String, String>,
    constructor_descriptor: Option<String>,
}

struct ModuleCtx<'a> {
    module_name: &'a str,
    mapping: &'a TypeMapping,
    /// Top-level field name -> descriptor
    module_fields: FxHashMap<String, String>,
    /// Top-level function name -> descriptor
    module_functions: FxHashMap<String, String>,
    /// Imported simple name -> (owner binary name, member name)
    imports: FxHashMap<String, (String, String)>,
    classes: FxHashMap<String, ClassShape>,
}

impl ModuleCtx<'_> {
    fn module_class_binary(&self) -> String {
        module_class_name(self.module_name).replace('.', "/")
    }

    fn class_binary(&self, name: &str) -> String {
        self.mapping.binary_class_name(name, self.module_name)
    }
}

impl MirLowering {
    pub fn new() -> Self {
        Self {
            mapping: TypeMapping::new(),
        }
    }

    pub fn lower_module(&self, module: &Rc<HirModule>) -> Result<MirModule, CompileError> {
        debug!(module = %module.name, "lowering to MIR");
        let ctx = self.collect(module)?;

        let mut classes = Vec::new();
        classes.push(self.lower_module_class(module, &ctx)?);

        for decl in &module.declarations {
            if let HirDecl::Class(class) = decl.as_ref() {
                classes.push(self.lower_class(class, &ctx)?);
            }
        }

        Ok(MirModule {
            name: module.name.clone(),
            classes,
        })
    }

    // -------------------------------------------------------------------------
    // Signature collection
    // -------------------------------------------------------------------------

    fn collect<'a>(&'a self, module: &'a Rc<HirModule>) -> Result<ModuleCtx<'a>, CompileError> {
        let mut ctx = ModuleCtx {
            module_name: &module.name,
            mapping: &self.mapping,
            module_fields: FxHashMap::default(),
            module_functions: FxHashMap::default(),
            imports: FxHashMap::default(),
            classes: FxHashMap::default(),
        };

        for decl in &module.declarations {
            match decl.as_ref() {
                HirDecl::Field(field) => {
                    let descriptor = self.mapping.descriptor(
                        &erase(&field.ty, &FxHashSet::default()),
                        &module.name,
                        field.span,
                    )?;
                    ctx.module_fields.insert(field.name.clone(), descriptor);
                }
                HirDecl::Function(function) => {
                    let scope: FxHashSet<String> = function
                        .type_parameters
                        .iter()
                        .map(|p| p.name.clone())
                        .collect();
                    let descriptor = self.function_descriptor(function, &scope, &module.name)?;
                    ctx.module_functions
                        .insert(function.name.clone(), descriptor);
                }
                HirDecl::Class(class) => {
                    let shape = self.class_shape(class, &module.name)?;
                    ctx.classes.insert(class.name.clone(), shape);
                }
                HirDecl::Import(import) => {
                    let (package, member) = match import.path.rsplit_once('.') {
                        Some((package, member)) => (package.to_string(), member.to_string()),
                        None => (import.path.clone(), import.path.clone()),
                    };
                    let key = import
                        .alias
                        .clone()
                        .unwrap_or_else(|| member.clone());
                    let owner = module_class_name(&package).replace('.', "/");
                    ctx.imports.insert(key, (owner, member));
                }
                HirDecl::TypeAlias(_) => {}
            }
        }

        Ok(ctx)
    }

    fn function_descriptor(
        &self,
        function: &HirFunction,
        scope: &FxHashSet<String>,
        module: &str,
    ) -> Result<String, CompileError> {
        let parameters: Vec<HirType> = function
            .parameters
            .iter()
            .map(|p| erase(&p.ty, scope))
            .collect();
        let return_type = erase(&function.return_type, scope);
        self.mapping
            .method_descriptor(&parameters, &return_type, module, function.span)
    }

    fn class_shape(&self, class: &HirClass, module: &str) -> Result<ClassShape, CompileError> {
        let type_params: FxHashSet<String> = class
            .type_parameters
            .iter()
            .map(|p| p.name.clone())
            .collect();

        let mut fields = FxHashMap::default();
        for field in &class.fields {
            let descriptor =
                self.mapping
                    .descriptor(&erase(&field.ty, &type_params), module, field.span)?;
            fields.insert(field.name.clone(), descriptor);
        }

        let mut methods = FxHashMap::default();
        for method in &class.methods {
            let mut scope = type_params.clone();
            for tp in &method.type_parameters {
                scope.insert(tp.name.clone());
            }
            methods.insert(
                method.name.clone(),
                self.function_descriptor(method, &scope, module)?,
            );
        }

        let constructor_descriptor = match &class.constructor {
            Some(ctor) => {
                let parameters: Vec<HirType> = ctor
                    .parameters
                    .iter()
                    .map(|p| erase(&p.ty, &type_params))
                    .collect();
                Some(self.mapping.method_descriptor(
                    &parameters,
                    &HirType::unit(),
                    module,
                    ctor.span,
                )?)
            }
            None => None,
        };

        Ok(ClassShape {
            type_params,
            fields,
            methods,
            constructor_descriptor,
        })
    }

    // -------------------------------------------------------------------------
    // Module container class
    // -------------------------------------------------------------------------

    fn lower_module_class(
        &self,
        module: &Rc<HirModule>,
        ctx: &ModuleCtx<'_>,
    ) -> Result<MirClass, CompileError> {
        let mut fields = Vec::new();
        let mut methods = Vec::new();

        // Static initializer for the module fields
        let mut clinit = MethodBuilder::new(ctx, None, FxHashSet::default(), "<clinit>");
        let mut has_initializers = false;

        for decl in &module.declarations {
            match decl.as_ref() {
                HirDecl::Field(field) => {
                    let descriptor = ctx
                        .module_fields
                        .get(&field.name)
                        .cloned()
                        .ok_or_else(|| {
                            CompileError::internal(STAGE, field.span, "field signature missing")
                        })?;
                    let mut flags = FIELD_FLAG_STATIC;
                    if field.mutable {
                        flags |= FIELD_FLAG_MUTABLE;
                    }
                    fields.push(MirField {
                        name: field.name.clone(),
                        descriptor: descriptor.clone(),
                        flags,
                    });
                    if let Some(initializer) = &field.initializer {
                        has_initializers = true;
                        clinit.emit_value(initializer)?;
                        clinit.code.push(MirInst::SetStatic {
                            owner: ctx.module_class_binary(),
                            name: field.name.clone(),
                            descriptor,
                        });
                    }
                }
                HirDecl::Function(function) => {
                    let scope: FxHashSet<String> = function
                        .type_parameters
                        .iter()
                        .map(|p| p.name.clone())
                        .collect();
                    let lowered =
                        self.lower_function(ctx, None, function, scope, METHOD_FLAG_STATIC)?;
                    methods.extend(lowered);
                }
                _ => {}
            }
        }

        if has_initializers {
            clinit.code.push(MirInst::Return);
            methods.push(clinit.into_method(
                "<clinit>".to_string(),
                "()V".to_string(),
                METHOD_FLAG_STATIC | METHOD_FLAG_SYNTHETIC,
            ));
        }

        Ok(MirClass {
            name: module_class_name(&module.name),
            superclass: None,
            flags: CLASS_FLAG_SYNTHETIC,
            fields,
            methods,
        })
    }

    // -------------------------------------------------------------------------
    // User classes
    // -------------------------------------------------------------------------

    fn lower_class(&self, class: &HirClass, ctx: &ModuleCtx<'_>) -> Result<MirClass, CompileError> {
        let shape = ctx.classes.get(&class.name).ok_or_else(|| {
            CompileError::internal(STAGE, class.span, "class signature missing")
        })?;
        let class_binary = ctx.class_binary(&class.name);
        let class_descriptor = format!("L{};", class_binary);

        let mut fields = Vec::new();
        for field in &class.fields {
            let descriptor = shape.fields.get(&field.name).cloned().ok_or_else(|| {
                CompileError::internal(STAGE, field.span, "field signature missing")
            })?;
            let flags = if field.mutable { FIELD_FLAG_MUTABLE } else { 0 };
            fields.push(MirField {
                name: field.name.clone(),
                descriptor,
                flags,
            });
        }

        // Enum entries are static fields of the enum's own type
        for entry in &class.enum_entries {
            fields.push(MirField {
                name: entry.name.clone(),
                descriptor: class_descriptor.clone(),
                flags: FIELD_FLAG_STATIC,
            });
        }

        let mut methods = Vec::new();

        // The constructor stores its property parameters, then runs the
        // remaining field initializers.
        let constructor_descriptor = shape
            .constructor_descriptor
            .clone()
            .unwrap_or_else(|| "()V".to_string());
        {
            let mut builder =
                MethodBuilder::new(ctx, Some(&class.name), shape.type_params.clone(), "<init>");
            builder.define_local("self", HirType::class(class.name.clone(), Vec::new()));
            if let Some(ctor) = &class.constructor {
                for parameter in &ctor.parameters {
                    builder.define_local(&parameter.name, parameter.ty.clone());
                }
                for parameter in &ctor.parameters {
                    if let Some(descriptor) = shape.fields.get(&parameter.name) {
                        let self_slot = builder.local_slot("self", parameter.span)?;
                        let param_slot = builder.local_slot(&parameter.name, parameter.span)?;
                        builder.code.push(MirInst::LoadLocal(self_slot));
                        builder.code.push(MirInst::LoadLocal(param_slot));
                        builder.code.push(MirInst::SetField {
                            owner: class_binary.clone(),
                            name: parameter.name.clone(),
                            descriptor: descriptor.clone(),
                        });
                    }
                }
            }
            for field in &class.fields {
                if let Some(initializer) = &field.initializer {
                    let self_slot = builder.local_slot("self", field.span)?;
                    builder.code.push(MirInst::LoadLocal(self_slot));
                    builder.emit_value(initializer)?;
                    builder.code.push(MirInst::SetField {
                        owner: class_binary.clone(),
                        name: field.name.clone(),
                        descriptor: shape.fields.get(&field.name).cloned().ok_or_else(
                            || {
                                CompileError::internal(
                                    STAGE,
                                    field.span,
                                    "field signature missing",
                                )
                            },
                        )?,
                    });
                }
            }
            builder.code.push(MirInst::Return);
            methods.push(builder.into_method(
                "<init>".to_string(),
                constructor_descriptor.clone(),
                0,
            ));
        }

        // Enum entries are constructed in the class initializer
        if class.is_enum && !class.enum_entries.is_empty() {
            let mut builder = MethodBuilder::new(
                ctx,
                Some(&class.name),
                shape.type_params.clone(),
                "<clinit>",
            );
            for entry in &class.enum_entries {
                builder.code.push(MirInst::New {
                    class: class_binary.clone(),
                });
                builder.code.push(MirInst::Dup);
                for argument in &entry.arguments {
                    builder.emit_value(argument)?;
                }
                builder.code.push(MirInst::Invoke {
                    kind: InvokeKind::Constructor,
                    owner: class_binary.clone(),
                    name: "<init>".to_string(),
                    descriptor: constructor_descriptor.clone(),
                });
                builder.code.push(MirInst::SetStatic {
                    owner: class_binary.clone(),
                    name: entry.name.clone(),
                    descriptor: class_descriptor.clone(),
                });
            }
            builder.code.push(MirInst::Return);
            methods.push(builder.into_method(
                "<clinit>".to_string(),
                "()V".to_string(),
                METHOD_FLAG_STATIC | METHOD_FLAG_SYNTHETIC,
            ));
        }

        for method in &class.methods {
            let mut scope = shape.type_params.clone();
            for tp in &method.type_parameters {
                scope.insert(tp.name.clone());
            }
            let lowered = self.lower_function(ctx, Some(&class.name), method, scope, 0)?;
            methods.extend(lowered);
        }

        let flags = if class.is_enum { CLASS_FLAG_ENUM } else { 0 };
        let superclass = match &class.superclass {
            Some(superclass) => match &superclass.kind {
                HirTypeKind::Class { name, .. } => Some(ctx.class_binary(name)),
                _ => {
                    return Err(CompileError::internal(
                        STAGE,
                        class.span,
                        "superclass is not a class type",
                    ))
                }
            },
            None => None,
        };

        Ok(MirClass {
            name: format!("{}.{}", ctx.module_name, class.name),
            superclass,
            flags,
            fields,
            methods,
        })
    }

    /// Lower one function body; the result includes any synthetic lambda
    /// methods it spawned.
    fn lower_function(
        &self,
        ctx: &ModuleCtx<'_>,
        class_name: Option<&str>,
        function: &HirFunction,
        type_scope: FxHashSet<String>,
        extra_flags: u16,
    ) -> Result<Vec<MirMethod>, CompileError> {
        let is_static = extra_flags & METHOD_FLAG_STATIC != 0;
        let mut builder =
            MethodBuilder::new(ctx, class_name, type_scope.clone(), &function.name);

        if !is_static {
            let self_ty = match class_name {
                Some(name) => HirType::class(name.to_string(), Vec::new()),
                None => HirType::any(),
            };
            builder.define_local("self", self_ty);
        }
        for parameter in &function.parameters {
            builder.define_local(&parameter.name, parameter.ty.clone());
        }

        if let Some(body) = &function.body {
            builder.emit_stmt(body)?;
        }

        match builder.code.last() {
            Some(MirInst::Return) | Some(MirInst::ReturnValue) | Some(MirInst::Throw) => {}
            _ => builder.code.push(MirInst::Return),
        }

        let descriptor = self.function_descriptor(function, &type_scope, ctx.module_name)?;
        let mut methods = vec![builder.take_method(function.name.clone(), descriptor, extra_flags)];
        methods.append(&mut builder.lambdas);
        Ok(methods)
    }
}

impl Default for MirLowering {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Erasure
// =============================================================================

/// Erase the type parameters of the enclosing declarations to `Any`.
/// Unknown unresolved names are left in place so the type-mapping table
/// can raise the fatal unmapped-type error.
fn erase(ty: &HirType, scope: &FxHashSet<String>) -> HirType {
    match &ty.kind {
        HirTypeKind::Unresolved(name) if scope.contains(name) => {
            HirType::any().with_nullability(ty.nullable)
        }
        HirTypeKind::Class { name, type_args } => HirType {
            kind: HirTypeKind::Class {
                name: name.clone(),
                type_args: type_args.iter().map(|arg| erase(arg, scope)).collect(),
            },
            nullable: ty.nullable,
        },
        _ => ty.clone(),
    }
}

// =============================================================================
// Method building
// =============================================================================

struct LoopCtx {
    continue_target: usize,
    break_jumps: Vec<usize>,
}

struct MethodBuilder<'a> {
    ctx: &'a ModuleCtx<'a>,
    class_name: Option<&'a str>,
    type_scope: FxHashSet<String>,
    method_name: String,
    code: Vec<MirInst>,
    locals: FxHashMap<String, (u16, HirType)>,
    next_local: u16,
    max_locals: u16,
    loops: Vec<LoopCtx>,
    handlers: Vec<MirHandler>,
    lambdas: Vec<MirMethod>,
    lambda_counter: u32,
}

impl<'a> MethodBuilder<'a> {
    fn new(
        ctx: &'a ModuleCtx<'a>,
        class_name: Option<&'a str>,
        type_scope: FxHashSet<String>,
        method_name: &str,
    ) -> Self {
        Self {
            ctx,
            class_name,
            type_scope,
            method_name: method_name.to_string(),
            code: Vec::new(),
            locals: FxHashMap::default(),
            next_local: 0,
            max_locals: 0,
            loops: Vec::new(),
            handlers: Vec::new(),
            lambdas: Vec::new(),
            lambda_counter: 0,
        }
    }

    fn into_method(self, name: String, descriptor: String, flags: u16) -> MirMethod {
        MirMethod {
            name,
            descriptor,
            flags,
            max_locals: self.max_locals,
            code: self.code,
            handlers: self.handlers,
        }
    }

    fn take_method(&mut self, name: String, descriptor: String, flags: u16) -> MirMethod {
        MirMethod {
            name,
            descriptor,
            flags,
            max_locals: self.max_locals,
            code: std::mem::take(&mut self.code),
            handlers: std::mem::take(&mut self.handlers),
        }
    }

    fn define_local(&mut self, name: &str, ty: HirType) -> u16 {
        let slot = self.next_local;
        self.next_local += 1;
        self.max_locals = self.max_locals.max(self.next_local);
        self.locals.insert(name.to_string(), (slot, ty));
        slot
    }

    fn local_slot(&self, name: &str, span: Span) -> Result<u16, CompileError> {
        self.locals
            .get(name)
            .map(|(slot, _)| *slot)
            .ok_or_else(|| {
                CompileError::internal(STAGE, span, format!("unresolved local '{}'", name))
            })
    }

    fn descriptor(&self, ty: &HirType, span: Span) -> Result<String, CompileError> {
        self.ctx
            .mapping
            .descriptor(&erase(ty, &self.type_scope), self.ctx.module_name, span)
    }

    fn method_descriptor(
        &self,
        parameters: &[HirType],
        return_type: &HirType,
        span: Span,
    ) -> Result<String, CompileError> {
        let parameters: Vec<HirType> = parameters
            .iter()
            .map(|p| erase(p, &self.type_scope))
            .collect();
        self.ctx.mapping.method_descriptor(
            &parameters,
            &erase(return_type, &self.type_scope),
            self.ctx.module_name,
            span,
        )
    }

    /// The binary class name used for checks, casts and dispatch on a type.
    /// Primitives use their boxed names.
    fn runtime_class(&self, ty: &HirType, span: Span) -> Result<String, CompileError> {
        let ty = erase(ty, &self.type_scope);
        match &ty.kind {
            HirTypeKind::Int
            | HirTypeKind::Long
            | HirTypeKind::Float
            | HirTypeKind::Double
            | HirTypeKind::Boolean
            | HirTypeKind::Char
            | HirTypeKind::Unit => {
                let name = match ty.kind {
                    HirTypeKind::Int => "Int",
                    HirTypeKind::Long => "Long",
                    HirTypeKind::Float => "Float",
                    HirTypeKind::Double => "Double",
                    HirTypeKind::Boolean => "Boolean",
                    HirTypeKind::Char => "Char",
                    _ => "Unit",
                };
                self.ctx
                    .mapping
                    .boxed_name(name)
                    .map(|s| s.to_string())
                    .ok_or_else(|| CompileError::UnmappedType {
                        name: name.to_string(),
                        span,
                    })
            }
            HirTypeKind::Nothing => Ok("nova/lang/Nothing".to_string()),
            HirTypeKind::Class { name, .. } => Ok(self.ctx.class_binary(name)),
            HirTypeKind::Unresolved(name) => Err(CompileError::UnmappedType {
                name: name.clone(),
                span,
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Jump plumbing
    // -------------------------------------------------------------------------

    fn here(&self) -> usize {
        self.code.len()
    }

    fn emit_jump(&mut self, inst: MirInst) -> usize {
        let at = self.code.len();
        self.code.push(inst);
        at
    }

    fn patch(&mut self, at: usize, target: usize, span: Span) -> Result<(), CompileError> {
        let target = u16::try_from(target)
            .map_err(|_| CompileError::internal(STAGE, span, "method exceeds jump range"))?;
        match &mut self.code[at] {
            MirInst::Jump(slot) | MirInst::JumpIfFalse(slot) => {
                *slot = target;
                Ok(())
            }
            _ => Err(CompileError::internal(STAGE, span, "patched a non-jump")),
        }
    }

    // -------------------------------------------------------------------------
    // Statements
    // -------------------------------------------------------------------------

    fn emit_stmt(&mut self, stmt: &Rc<HirStmt>) -> Result<(), CompileError> {
        match stmt.as_ref() {
            HirStmt::Block(block) => {
                for statement in &block.statements {
                    self.emit_stmt(statement)?;
                }
                Ok(())
            }
            HirStmt::Local(local) => {
                match &local.initializer {
                    Some(initializer) => {
                        self.emit_value(initializer)?;
                        let slot = self.define_local(&local.name, local.ty.clone());
                        self.code.push(MirInst::StoreLocal(slot));
                    }
                    None => {
                        self.define_local(&local.name, local.ty.clone());
                    }
                }
                Ok(())
            }
            HirStmt::Expr(expr_stmt) => {
                self.emit_expr(&expr_stmt.expr)?;
                if !expr_stmt.expr.ty.is_unit() {
                    self.code.push(MirInst::Pop);
                }
                Ok(())
            }
            HirStmt::Return(ret) => {
                match &ret.value {
                    Some(value) if !value.ty.is_unit() => {
                        self.emit_value(value)?;
                        self.code.push(MirInst::ReturnValue);
                    }
                    Some(value) => {
                        self.emit_expr(value)?;
                        self.code.push(MirInst::Return);
                    }
                    None => self.code.push(MirInst::Return),
                }
                Ok(())
            }
            HirStmt::Throw(throw) => {
                self.emit_value(&throw.value)?;
                self.code.push(MirInst::Throw);
                Ok(())
            }
            HirStmt::Break(span) => {
                let jump = self.emit_jump(MirInst::Jump(0));
                match self.loops.last_mut() {
                    Some(loop_ctx) => {
                        loop_ctx.break_jumps.push(jump);
                        Ok(())
                    }
                    None => Err(CompileError::internal(STAGE, *span, "'break' outside loop")),
                }
            }
            HirStmt::Continue(span) => {
                let target = self
                    .loops
                    .last()
                    .map(|l| l.continue_target)
                    .ok_or_else(|| {
                        CompileError::internal(STAGE, *span, "'continue' outside loop")
                    })?;
                let jump = self.emit_jump(MirInst::Jump(0));
                self.patch(jump, target, *span)
            }
            HirStmt::Loop(hir_loop) => match &hir_loop.kind {
                HirLoopKind::While { condition } => {
                    let head = self.here();
                    self.emit_value(condition)?;
                    let exit = self.emit_jump(MirInst::JumpIfFalse(0));

                    self.loops.push(LoopCtx {
                        continue_target: head,
                        break_jumps: Vec::new(),
                    });
                    self.emit_stmt(&hir_loop.body)?;
                    let back = self.emit_jump(MirInst::Jump(0));
                    self.patch(back, head, hir_loop.span)?;

                    let end = self.here();
                    self.patch(exit, end, hir_loop.span)?;
                    let loop_ctx = self.loops.pop().ok_or_else(|| {
                        CompileError::internal(STAGE, hir_loop.span, "loop stack underflow")
                    })?;
                    for jump in loop_ctx.break_jumps {
                        self.patch(jump, end, hir_loop.span)?;
                    }
                    Ok(())
                }
                HirLoopKind::Iterate {
                    binding,
                    binding_ty,
                    iterable,
                } => {
                    // it = iterable.iterator()
                    let iterable_class = self.runtime_class(&iterable.ty, hir_loop.span)?;
                    self.emit_value(iterable)?;
                    self.code.push(MirInst::Invoke {
                        kind: InvokeKind::Virtual,
                        owner: iterable_class,
                        name: "iterator".to_string(),
                        descriptor: "()Lnova/collections/Iterator;".to_string(),
                    });
                    let iterator_slot = self.define_local(
                        &format!("$it{}", self.lambda_counter),
                        HirType::class("Iterator", Vec::new()),
                    );
                    self.code.push(MirInst::StoreLocal(iterator_slot));

                    let head = self.here();
                    self.code.push(MirInst::LoadLocal(iterator_slot));
                    self.code.push(MirInst::Invoke {
                        kind: InvokeKind::Virtual,
                        owner: "nova/collections/Iterator".to_string(),
                        name: "hasNext".to_string(),
                        descriptor: "()Z".to_string(),
                    });
                    let exit = self.emit_jump(MirInst::JumpIfFalse(0));

                    self.code.push(MirInst::LoadLocal(iterator_slot));
                    self.code.push(MirInst::Invoke {
                        kind: InvokeKind::Virtual,
                        owner: "nova/collections/Iterator".to_string(),
                        name: "next".to_string(),
                        descriptor: "()Lnova/lang/Any;".to_string(),
                    });
                    let binding_slot = self.define_local(binding, binding_ty.clone());
                    self.code.push(MirInst::StoreLocal(binding_slot));

                    self.loops.push(LoopCtx {
                        continue_target: head,
                        break_jumps: Vec::new(),
                    });
                    self.emit_stmt(&hir_loop.body)?;
                    let back = self.emit_jump(MirInst::Jump(0));
                    self.patch(back, head, hir_loop.span)?;

                    let end = self.here();
                    self.patch(exit, end, hir_loop.span)?;
                    let loop_ctx = self.loops.pop().ok_or_else(|| {
                        CompileError::internal(STAGE, hir_loop.span, "loop stack underflow")
                    })?;
                    for jump in loop_ctx.break_jumps {
                        self.patch(jump, end, hir_loop.span)?;
                    }
                    Ok(())
                }
            },
            HirStmt::Try(hir_try) => {
                let start = self.here();
                self.emit_stmt(&hir_try.body)?;
                if let Some(finally) = &hir_try.finally {
                    self.emit_stmt(finally)?;
                }
                let end_of_body = self.here();
                let after_body = self.emit_jump(MirInst::Jump(0));

                let mut exit_jumps = vec![after_body];
                let mut pending_handlers = Vec::new();
                for catch in &hir_try.catches {
                    let handler = self.here();
                    let exception_class =
                        self.runtime_class(&catch.exception_type, catch.span)?;
                    pending_handlers.push((start, end_of_body, handler, exception_class));

                    let slot = self.define_local(&catch.binding, catch.exception_type.clone());
                    self.code.push(MirInst::StoreLocal(slot));
                    self.emit_stmt(&catch.body)?;
                    if let Some(finally) = &hir_try.finally {
                        self.emit_stmt(finally)?;
                    }
                    exit_jumps.push(self.emit_jump(MirInst::Jump(0)));
                }

                let end = self.here();
                for jump in exit_jumps {
                    self.patch(jump, end, hir_try.span)?;
                }
                for (start, end_of_body, handler, exception_class) in pending_handlers {
                    let to_u16 = |value: usize| {
                        u16::try_from(value).map_err(|_| {
                            CompileError::internal(
                                STAGE,
                                hir_try.span,
                                "method exceeds handler range",
                            )
                        })
                    };
                    let handler = MirHandler {
                        start: to_u16(start)?,
                        end: to_u16(end_of_body)?,
                        target: to_u16(handler)?,
                        class_name: exception_class,
                    };
                    self.handlers.push(handler);
                }
                Ok(())
            }
        }
    }

    // -------------------------------------------------------------------------
    // Expressions
    // -------------------------------------------------------------------------

    /// Emit an expression; a value is left on the stack iff the type is
    /// not `Unit`.
    fn emit_expr(&mut self, expr: &Rc<HirExpr>) -> Result<(), CompileError> {
        let span = expr.span;
        match &expr.kind {
            HirExprKind::Literal(literal) => {
                match literal {
                    HirLiteral::Unit => {}
                    HirLiteral::Null => self.code.push(MirInst::Const(MirConst::Null)),
                    HirLiteral::Boolean(v) => {
                        self.code.push(MirInst::Const(MirConst::Bool(*v)))
                    }
                    HirLiteral::Char(v) => self.code.push(MirInst::Const(MirConst::Char(*v))),
                    HirLiteral::Int(v) => self.code.push(MirInst::Const(MirConst::Int(*v))),
                    HirLiteral::Long(v) => self.code.push(MirInst::Const(MirConst::Long(*v))),
                    HirLiteral::Float(v) => {
                        self.code.push(MirInst::Const(MirConst::Float(*v)))
                    }
                    HirLiteral::Double(v) => {
                        self.code.push(MirInst::Const(MirConst::Double(*v)))
                    }
                    HirLiteral::String(v) => {
                        self.code.push(MirInst::Const(MirConst::Str(v.clone())))
                    }
                }
                Ok(())
            }
            HirExprKind::Local(name) => self.emit_name_read(name, &expr.ty, span),
            HirExprKind::ClassRef(target) => {
                // A metaclass reference is its type's name at runtime
                self.code
                    .push(MirInst::Const(MirConst::Str(target.to_string())));
                Ok(())
            }
            HirExprKind::Call(call) => self.emit_call(expr, call, span),
            HirExprKind::ConstructorCall(ctor) => {
                let class_name = ctor.class.class_name().ok_or_else(|| {
                    CompileError::internal(STAGE, span, "constructor of a non-class type")
                })?;
                let owner = self.ctx.class_binary(class_name);
                let descriptor = match self.ctx.classes.get(class_name) {
                    Some(shape) => shape
                        .constructor_descriptor
                        .clone()
                        .unwrap_or_else(|| "()V".to_string()),
                    // Built-in runtime constructors take boxed arguments;
                    // external ones link by the site's erased shape.
                    None if self.ctx.mapping.is_builtin(class_name) => {
                        let parameters = vec![HirType::any(); ctor.args.len()];
                        self.method_descriptor(&parameters, &HirType::unit(), span)?
                    }
                    None => {
                        let parameters: Vec<HirType> =
                            ctor.args.iter().map(|a| a.ty.clone()).collect();
                        self.method_descriptor(&parameters, &HirType::unit(), span)?
                    }
                };
                self.code.push(MirInst::New {
                    class: owner.clone(),
                });
                self.code.push(MirInst::Dup);
                for argument in &ctor.args {
                    self.emit_value(argument)?;
                }
                self.code.push(MirInst::Invoke {
                    kind: InvokeKind::Constructor,
                    owner,
                    name: "<init>".to_string(),
                    descriptor,
                });
                Ok(())
            }
            HirExprKind::CollectionLiteral(collection) => {
                use crate::hir::HirCollectionKind;
                let count = |len: usize| {
                    u16::try_from(len).map_err(|_| {
                        CompileError::internal(STAGE, span, "collection literal too large")
                    })
                };
                match collection.collection_kind {
                    HirCollectionKind::List
                    | HirCollectionKind::MutableList
                    | HirCollectionKind::Set => {
                        for element in &collection.elements {
                            self.emit_value(element)?;
                        }
                        let n = count(collection.elements.len())?;
                        self.code.push(match collection.collection_kind {
                            HirCollectionKind::List => MirInst::NewList(n),
                            HirCollectionKind::MutableList => MirInst::NewMutableList(n),
                            _ => MirInst::NewSet(n),
                        });
                        Ok(())
                    }
                    HirCollectionKind::Map => {
                        if collection.elements.is_empty() {
                            for (key, value) in &collection.entries {
                                self.emit_value(key)?;
                                self.emit_value(value)?;
                            }
                            self.code
                                .push(MirInst::NewMap(count(collection.entries.len())?));
                            return Ok(());
                        }
                        // Mixed shape: everything goes through Pair values
                        for (key, value) in &collection.entries {
                            self.code.push(MirInst::New {
                                class: "nova/collections/Pair".to_string(),
                            });
                            self.code.push(MirInst::Dup);
                            self.emit_value(key)?;
                            self.emit_value(value)?;
                            self.code.push(MirInst::Invoke {
                                kind: InvokeKind::Constructor,
                                owner: "nova/collections/Pair".to_string(),
                                name: "<init>".to_string(),
                                descriptor: "(Lnova/lang/Any;Lnova/lang/Any;)V".to_string(),
                            });
                        }
                        for element in &collection.elements {
                            self.emit_value(element)?;
                        }
                        let total = collection.entries.len() + collection.elements.len();
                        self.code.push(MirInst::NewMapFromPairs(count(total)?));
                        Ok(())
                    }
                }
            }
            HirExprKind::ObjectLiteral(object) => {
                for (name, value) in &object.fields {
                    self.code.push(MirInst::Const(MirConst::Str(name.clone())));
                    self.emit_value(value)?;
                }
                let n = u16::try_from(object.fields.len()).map_err(|_| {
                    CompileError::internal(STAGE, span, "object literal too large")
                })?;
                self.code.push(MirInst::NewMap(n));
                Ok(())
            }
            HirExprKind::Lambda(lambda) => self.emit_lambda(expr, lambda, span),
            HirExprKind::Binary(binary) => self.emit_binary(expr, binary, span),
            HirExprKind::Unary(unary) => {
                self.emit_value(&unary.operand)?;
                match unary.op {
                    HirUnaryOp::Not => self.code.push(MirInst::Not),
                    HirUnaryOp::Neg => {
                        let kind = prim_kind(&expr.ty);
                        self.code.push(MirInst::Neg(kind));
                    }
                }
                Ok(())
            }
            HirExprKind::Assign(assign) => self.emit_assign(assign, span),
            HirExprKind::Member(member) => self.emit_member_read(member, &expr.ty, span),
            HirExprKind::Index(index) => {
                let receiver_class = self.runtime_class(&index.receiver.ty, span)?;
                self.emit_value(&index.receiver)?;
                self.emit_value(&index.index)?;
                let (name, descriptor) = match index.receiver.ty.class_name() {
                    Some("List") | Some("MutableList") => {
                        ("get", "(I)Lnova/lang/Any;".to_string())
                    }
                    Some("Map") => ("get", "(Lnova/lang/Any;)Lnova/lang/Any;".to_string()),
                    Some("String") => ("charAt", "(I)C".to_string()),
                    _ => ("get", "(Lnova/lang/Any;)Lnova/lang/Any;".to_string()),
                };
                self.code.push(MirInst::Invoke {
                    kind: InvokeKind::Virtual,
                    owner: receiver_class,
                    name: name.to_string(),
                    descriptor,
                });
                Ok(())
            }
            HirExprKind::TypeCheck(check) => {
                self.emit_value(&check.operand)?;
                let class = self.runtime_class(&check.target, span)?;
                self.code.push(MirInst::TypeCheck { class });
                if check.negated {
                    self.code.push(MirInst::Not);
                }
                Ok(())
            }
            HirExprKind::TypeCast(cast) => {
                self.emit_value(&cast.operand)?;
                let class = self.runtime_class(&cast.target, span)?;
                self.code.push(MirInst::TypeCast {
                    class,
                    safe: cast.safe,
                });
                Ok(())
            }
            HirExprKind::If(hir_if) => {
                let leaves_value = !expr.ty.is_unit();
                self.emit_value(&hir_if.condition)?;
                let to_else = self.emit_jump(MirInst::JumpIfFalse(0));

                if leaves_value {
                    self.emit_value(&hir_if.then_branch)?;
                } else {
                    self.emit_discarding(&hir_if.then_branch)?;
                }
                let to_end = self.emit_jump(MirInst::Jump(0));

                let else_at = self.here();
                self.patch(to_else, else_at, span)?;
                match &hir_if.else_branch {
                    Some(else_branch) => {
                        if leaves_value {
                            self.emit_value(else_branch)?;
                        } else {
                            self.emit_discarding(else_branch)?;
                        }
                    }
                    None => {
                        if leaves_value {
                            self.code.push(MirInst::Const(MirConst::Unit));
                        }
                    }
                }
                let end = self.here();
                self.patch(to_end, end, span)
            }
            HirExprKind::Block(block) => {
                for statement in &block.statements {
                    self.emit_stmt(statement)?;
                }
                match &block.value {
                    Some(value) => self.emit_expr(value),
                    None => Ok(()),
                }
            }
        }
    }

    /// Emit an expression, guaranteeing one value on the stack.
    fn emit_value(&mut self, expr: &Rc<HirExpr>) -> Result<(), CompileError> {
        self.emit_expr(expr)?;
        if expr.ty.is_unit() {
            self.code.push(MirInst::Const(MirConst::Unit));
        }
        Ok(())
    }

    /// Emit an expression and discard its value if it leaves one.
    fn emit_discarding(&mut self, expr: &Rc<HirExpr>) -> Result<(), CompileError> {
        self.emit_expr(expr)?;
        if !expr.ty.is_unit() {
            self.code.push(MirInst::Pop);
        }
        Ok(())
    }

    fn emit_name_read(
        &mut self,
        name: &str,
        ty: &HirType,
        span: Span,
    ) -> Result<(), CompileError> {
        if let Some((slot, _)) = self.locals.get(name) {
            self.code.push(MirInst::LoadLocal(*slot));
            return Ok(());
        }

        // A bare property name inside a method reads through `self`
        if let Some(class_name) = self.class_name {
            if let Some(shape) = self.ctx.classes.get(class_name) {
                if let Some(descriptor) = shape.fields.get(name) {
                    let self_slot = self.local_slot("self", span)?;
                    self.code.push(MirInst::LoadLocal(self_slot));
                    self.code.push(MirInst::GetField {
                        owner: self.ctx.class_binary(class_name),
                        name: name.to_string(),
                        descriptor: descriptor.clone(),
                    });
                    return Ok(());
                }
            }
        }

        if let Some(descriptor) = self.ctx.module_fields.get(name) {
            self.code.push(MirInst::GetStatic {
                owner: self.ctx.module_class_binary(),
                name: name.to_string(),
                descriptor: descriptor.clone(),
            });
            return Ok(());
        }

        // A top-level function referenced as a value closes over nothing
        if let Some(descriptor) = self.ctx.module_functions.get(name) {
            self.code.push(MirInst::Closure {
                method: format!("{}.{}", module_class_name(self.ctx.module_name), name),
                descriptor: descriptor.clone(),
                captures: 0,
            });
            return Ok(());
        }

        let _ = ty;
        Err(CompileError::internal(
            STAGE,
            span,
            format!("unresolved name '{}'", name),
        ))
    }

    fn emit_member_read(
        &mut self,
        member: &crate::hir::HirMember,
        result_ty: &HirType,
        span: Span,
    ) -> Result<(), CompileError> {
        // Static access (enum entries) goes through a class reference
        if let HirExprKind::ClassRef(class_ty) = &member.receiver.kind {
            let owner = self.runtime_class(class_ty, span)?;
            let descriptor = format!("L{};", owner);
            self.code.push(MirInst::GetStatic {
                owner,
                name: member.name.clone(),
                descriptor,
            });
            return Ok(());
        }

        let receiver_ty = &member.receiver.ty;
        self.emit_value(&member.receiver)?;

        // Built-in members are method invocations on the runtime types
        match (receiver_ty.class_name(), member.name.as_str()) {
            (Some("String"), "length") => {
                self.code.push(MirInst::Invoke {
                    kind: InvokeKind::Virtual,
                    owner: "nova/lang/String".to_string(),
                    name: "length".to_string(),
                    descriptor: "()I".to_string(),
                });
                return Ok(());
            }
            (Some("List") | Some("MutableList") | Some("Set") | Some("Map"), "size") => {
                let owner = self.runtime_class(receiver_ty, span)?;
                self.code.push(MirInst::Invoke {
                    kind: InvokeKind::Virtual,
                    owner,
                    name: "size".to_string(),
                    descriptor: "()I".to_string(),
                });
                return Ok(());
            }
            (Some("Pair"), "first") | (Some("Pair"), "second") => {
                self.code.push(MirInst::GetField {
                    owner: "nova/collections/Pair".to_string(),
                    name: member.name.clone(),
                    descriptor: "Lnova/lang/Any;".to_string(),
                });
                return Ok(());
            }
            _ => {}
        }

        // Declared classes use their recorded (erased) field descriptors;
        // anything else resolves dynamically by name.
        let (owner, descriptor) = match receiver_ty
            .class_name()
            .and_then(|name| self.ctx.classes.get(name).map(|shape| (name, shape)))
        {
            Some((name, shape)) => match shape.fields.get(&member.name) {
                Some(descriptor) => (self.ctx.class_binary(name), descriptor.clone()),
                None => (
                    self.ctx.class_binary(name),
                    self.descriptor(result_ty, span)?,
                ),
            },
            None => (
                "nova/lang/Any".to_string(),
                self.descriptor(result_ty, span)?,
            ),
        };
        self.code.push(MirInst::GetField {
            owner,
            name: member.name.clone(),
            descriptor,
        });
        Ok(())
    }

    fn emit_assign(
        &mut self,
        assign: &crate::hir::HirAssign,
        span: Span,
    ) -> Result<(), CompileError> {
        match &assign.target.kind {
            HirExprKind::Local(name) => {
                if let Some((slot, _)) = self.locals.get(name) {
                    let slot = *slot;
                    self.emit_value(&assign.value)?;
                    self.code.push(MirInst::StoreLocal(slot));
                    return Ok(());
                }
                if let Some(class_name) = self.class_name {
                    let field = self
                        .ctx
                        .classes
                        .get(class_name)
                        .and_then(|shape| shape.fields.get(name))
                        .cloned();
                    if let Some(descriptor) = field {
                        let self_slot = self.local_slot("self", span)?;
                        self.code.push(MirInst::LoadLocal(self_slot));
                        self.emit_value(&assign.value)?;
                        self.code.push(MirInst::SetField {
                            owner: self.ctx.class_binary(class_name),
                            name: name.clone(),
                            descriptor,
                        });
                        return Ok(());
                    }
                }
                if let Some(descriptor) = self.ctx.module_fields.get(name).cloned() {
                    self.emit_value(&assign.value)?;
                    self.code.push(MirInst::SetStatic {
                        owner: self.ctx.module_class_binary(),
                        name: name.clone(),
                        descriptor,
                    });
                    return Ok(());
                }
                Err(CompileError::internal(
                    STAGE,
                    span,
                    format!("unresolved assignment target '{}'", name),
                ))
            }
            HirExprKind::Member(member) => {
                let receiver_ty = &member.receiver.ty;
                self.emit_value(&member.receiver)?;
                self.emit_value(&assign.value)?;
                let (owner, descriptor) = match receiver_ty
                    .class_name()
                    .and_then(|name| self.ctx.classes.get(name).map(|shape| (name, shape)))
                {
                    Some((name, shape)) => match shape.fields.get(&member.name) {
                        Some(descriptor) => (self.ctx.class_binary(name), descriptor.clone()),
                        None => (
                            self.ctx.class_binary(name),
                            self.descriptor(&assign.value.ty, span)?,
                        ),
                    },
                    None => (
                        "nova/lang/Any".to_string(),
                        self.descriptor(&assign.value.ty, span)?,
                    ),
                };
                self.code.push(MirInst::SetField {
                    owner,
                    name: member.name.clone(),
                    descriptor,
                });
                Ok(())
            }
            HirExprKind::Index(index) => {
                let receiver_class = self.runtime_class(&index.receiver.ty, span)?;
                self.emit_value(&index.receiver)?;
                self.emit_value(&index.index)?;
                self.emit_value(&assign.value)?;
                let (name, descriptor) = match index.receiver.ty.class_name() {
                    Some("MutableList") | Some("List") => {
                        ("set", "(ILnova/lang/Any;)V".to_string())
                    }
                    Some("Map") => (
                        "put",
                        "(Lnova/lang/Any;Lnova/lang/Any;)V".to_string(),
                    ),
                    _ => ("set", "(Lnova/lang/Any;Lnova/lang/Any;)V".to_string()),
                };
                self.code.push(MirInst::Invoke {
                    kind: InvokeKind::Virtual,
                    owner: receiver_class,
                    name: name.to_string(),
                    descriptor,
                });
                Ok(())
            }
            _ => Err(CompileError::unhandled(STAGE, span, "assignment target")),
        }
    }

    fn emit_binary(
        &mut self,
        expr: &Rc<HirExpr>,
        binary: &crate::hir::HirBinary,
        span: Span,
    ) -> Result<(), CompileError> {
        match binary.op {
            // Short-circuit forms never evaluate the right operand eagerly
            HirBinaryOp::And => {
                self.emit_value(&binary.lhs)?;
                let to_false = self.emit_jump(MirInst::JumpIfFalse(0));
                self.emit_value(&binary.rhs)?;
                let to_end = self.emit_jump(MirInst::Jump(0));
                let false_at = self.here();
                self.patch(to_false, false_at, span)?;
                self.code.push(MirInst::Const(MirConst::Bool(false)));
                let end = self.here();
                self.patch(to_end, end, span)
            }
            HirBinaryOp::Or => {
                self.emit_value(&binary.lhs)?;
                let to_rhs = self.emit_jump(MirInst::JumpIfFalse(0));
                self.code.push(MirInst::Const(MirConst::Bool(true)));
                let to_end = self.emit_jump(MirInst::Jump(0));
                let rhs_at = self.here();
                self.patch(to_rhs, rhs_at, span)?;
                self.emit_value(&binary.rhs)?;
                let end = self.here();
                self.patch(to_end, end, span)
            }
            op => {
                self.emit_value(&binary.lhs)?;
                self.emit_value(&binary.rhs)?;
                let mir_op = match op {
                    HirBinaryOp::Add => MirBinOp::Add,
                    HirBinaryOp::Sub => MirBinOp::Sub,
                    HirBinaryOp::Mul => MirBinOp::Mul,
                    HirBinaryOp::Div => MirBinOp::Div,
                    HirBinaryOp::Rem => MirBinOp::Rem,
                    HirBinaryOp::Eq => MirBinOp::Eq,
                    HirBinaryOp::Ne => MirBinOp::Ne,
                    HirBinaryOp::Lt => MirBinOp::Lt,
                    HirBinaryOp::Le => MirBinOp::Le,
                    HirBinaryOp::Gt => MirBinOp::Gt,
                    HirBinaryOp::Ge => MirBinOp::Ge,
                    HirBinaryOp::And | HirBinaryOp::Or => unreachable!(),
                };
                let kind = if op.is_arithmetic() {
                    prim_kind(&expr.ty)
                } else {
                    promoted_operand_kind(&binary.lhs.ty, &binary.rhs.ty)
                };
                self.code.push(MirInst::Binary(mir_op, kind));
                Ok(())
            }
        }
    }

    fn emit_call(
        &mut self,
        expr: &Rc<HirExpr>,
        call: &crate::hir::HirCall,
        span: Span,
    ) -> Result<(), CompileError> {
        match &call.callee {
            HirCallee::Function(name) => {
                // Built-in top-level functions
                if name == "println" || name == "print" {
                    for argument in &call.args {
                        self.emit_value(argument)?;
                    }
                    self.code.push(MirInst::Invoke {
                        kind: InvokeKind::Static,
                        owner: "nova/io/Console".to_string(),
                        name: name.clone(),
                        descriptor: "(Lnova/lang/Any;)V".to_string(),
                    });
                    return Ok(());
                }

                if let Some(descriptor) = self.ctx.module_functions.get(name).cloned() {
                    for argument in &call.args {
                        self.emit_value(argument)?;
                    }
                    self.code.push(MirInst::Invoke {
                        kind: InvokeKind::Static,
                        owner: self.ctx.module_class_binary(),
                        name: name.clone(),
                        descriptor,
                    });
                    return Ok(());
                }

                // Imported members link by name across compilation units
                if let Some((owner, member)) = self.ctx.imports.get(name).cloned() {
                    for argument in &call.args {
                        self.emit_value(argument)?;
                    }
                    let parameters: Vec<HirType> =
                        call.args.iter().map(|a| a.ty.clone()).collect();
                    let descriptor = self.method_descriptor(&parameters, &expr.ty, span)?;
                    self.code.push(MirInst::Invoke {
                        kind: InvokeKind::Static,
                        owner,
                        name: member,
                        descriptor,
                    });
                    return Ok(());
                }

                Err(CompileError::internal(
                    STAGE,
                    span,
                    format!("unresolved function '{}'", name),
                ))
            }
            HirCallee::Method { receiver, name } => {
                let receiver_ty = receiver.ty.clone();
                self.emit_value(receiver)?;
                for argument in &call.args {
                    self.emit_value(argument)?;
                }

                let owner_class = receiver_ty.class_name();
                let declared = owner_class
                    .and_then(|class_name| self.ctx.classes.get(class_name))
                    .and_then(|shape| shape.methods.get(name))
                    .cloned();

                let (owner, descriptor) = match declared {
                    Some(descriptor) => (
                        self.ctx
                            .class_binary(owner_class.unwrap_or("Any")),
                        descriptor,
                    ),
                    None => {
                        let owner = self.runtime_class(&receiver_ty, span)?;
                        let parameters: Vec<HirType> =
                            call.args.iter().map(|a| a.ty.clone()).collect();
                        (owner, self.builtin_method_descriptor(name, &parameters, &expr.ty, span)?)
                    }
                };
                self.code.push(MirInst::Invoke {
                    kind: InvokeKind::Virtual,
                    owner,
                    name: name.clone(),
                    descriptor,
                });
                Ok(())
            }
            HirCallee::Value(callee) => {
                self.emit_value(callee)?;
                for argument in &call.args {
                    self.emit_value(argument)?;
                }
                let owner = match callee.ty.class_name() {
                    Some(name) if name.starts_with("Function") => {
                        format!("nova/lang/{}", name)
                    }
                    _ => format!("nova/lang/Function{}", call.args.len()),
                };
                let parameters = vec![HirType::any(); call.args.len()];
                let descriptor =
                    self.method_descriptor(&parameters, &HirType::any(), span)?;
                self.code.push(MirInst::Invoke {
                    kind: InvokeKind::Virtual,
                    owner,
                    name: "invoke".to_string(),
                    descriptor,
                });
                Ok(())
            }
        }
    }

    /// Descriptors for the built-in runtime methods, derived from the
    /// erased call-site types.
    fn builtin_method_descriptor(
        &self,
        name: &str,
        parameters: &[HirType],
        return_type: &HirType,
        span: Span,
    ) -> Result<String, CompileError> {
        match name {
            "toString" => Ok("()Lnova/lang/String;".to_string()),
            "concat" => Ok("(Lnova/lang/String;)Lnova/lang/String;".to_string()),
            "iterator" => Ok("()Lnova/collections/Iterator;".to_string()),
            "hasNext" | "isEmpty" | "contains" | "containsKey" => {
                let parameters: Vec<HirType> =
                    parameters.iter().map(|_| HirType::any()).collect();
                self.method_descriptor(&parameters, &HirType::boolean(), span)
            }
            "next" => Ok("()Lnova/lang/Any;".to_string()),
            "component1" | "component2" => Ok("()Lnova/lang/Any;".to_string()),
            _ => {
                // Erase argument and return types for dynamic dispatch
                let parameters: Vec<HirType> =
                    parameters.iter().map(|_| HirType::any()).collect();
                let return_type = match return_type.kind {
                    HirTypeKind::Unit => HirType::unit(),
                    _ => HirType::any(),
                };
                self.method_descriptor(&parameters, &return_type, span)
            }
        }
    }

    fn emit_lambda(
        &mut self,
        expr: &Rc<HirExpr>,
        lambda: &crate::hir::HirLambda,
        span: Span,
    ) -> Result<(), CompileError> {
        // Captured values become leading parameters of a synthetic method
        let mut defined: FxHashSet<String> = lambda
            .parameters
            .iter()
            .map(|(name, _)| name.clone())
            .collect();
        let mut free = Vec::new();
        for statement in &lambda.body {
            collect_free_stmt(statement, &mut defined, &mut free);
        }

        let mut captures: Vec<(String, HirType)> = Vec::new();
        for name in free {
            if let Some((_, ty)) = self.locals.get(&name) {
                if !captures.iter().any(|(n, _)| *n == name) {
                    captures.push((name, ty.clone()));
                }
            }
        }

        self.lambda_counter += 1;
        let method_name = format!("{}$lambda{}", self.method_name, self.lambda_counter);

        // Build the synthetic method body
        let mut builder = MethodBuilder::new(
            self.ctx,
            self.class_name,
            self.type_scope.clone(),
            &method_name,
        );
        for (name, ty) in &captures {
            builder.define_local(name, ty.clone());
        }
        for (name, ty) in &lambda.parameters {
            builder.define_local(name, ty.clone());
        }
        for statement in &lambda.body {
            builder.emit_stmt(statement)?;
        }
        match builder.code.last() {
            Some(MirInst::Return) | Some(MirInst::ReturnValue) | Some(MirInst::Throw) => {}
            _ => builder.code.push(MirInst::Return),
        }

        let mut parameter_types: Vec<HirType> =
            captures.iter().map(|(_, ty)| ty.clone()).collect();
        parameter_types.extend(lambda.parameters.iter().map(|(_, ty)| ty.clone()));
        let descriptor =
            self.method_descriptor(&parameter_types, &lambda.return_type, span)?;

        let mut nested = std::mem::take(&mut builder.lambdas);
        let method = builder.into_method(
            method_name.clone(),
            descriptor.clone(),
            METHOD_FLAG_STATIC | METHOD_FLAG_SYNTHETIC,
        );
        self.lambdas.push(method);
        self.lambdas.append(&mut nested);

        // Load the captures, then build the closure
        for (name, _) in &captures {
            let slot = self.local_slot(name, span)?;
            self.code.push(MirInst::LoadLocal(slot));
        }
        let owner = match self.class_name {
            Some(class_name) => format!("{}.{}", self.ctx.module_name, class_name),
            None => module_class_name(self.ctx.module_name),
        };
        let captures_len = u16::try_from(captures.len())
            .map_err(|_| CompileError::internal(STAGE, span, "too many captures"))?;
        self.code.push(MirInst::Closure {
            method: format!("{}.{}", owner, method_name),
            descriptor,
            captures: captures_len,
        });
        let _ = expr;
        Ok(())
    }
}

// =============================================================================
// Free-variable analysis for lambda capture
// =============================================================================

fn collect_free_stmt(stmt: &Rc<HirStmt>, defined: &mut FxHashSet<String>, free: &mut Vec<String>) {
    match stmt.as_ref() {
        HirStmt::Block(block) => {
            for statement in &block.statements {
                collect_free_stmt(statement, defined, free);
            }
        }
        HirStmt::Local(local) => {
            if let Some(initializer) = &local.initializer {
                collect_free_expr(initializer, defined, free);
            }
            defined.insert(local.name.clone());
        }
        HirStmt::Expr(expr_stmt) => collect_free_expr(&expr_stmt.expr, defined, free),
        HirStmt::Loop(hir_loop) => {
            match &hir_loop.kind {
                HirLoopKind::While { condition } => collect_free_expr(condition, defined, free),
                HirLoopKind::Iterate {
                    binding, iterable, ..
                } => {
                    collect_free_expr(iterable, defined, free);
                    defined.insert(binding.clone());
                }
            }
            collect_free_stmt(&hir_loop.body, defined, free);
        }
        HirStmt::Try(hir_try) => {
            collect_free_stmt(&hir_try.body, defined, free);
            for catch in &hir_try.catches {
                defined.insert(catch.binding.clone());
                collect_free_stmt(&catch.body, defined, free);
            }
            if let Some(finally) = &hir_try.finally {
                collect_free_stmt(finally, defined, free);
            }
        }
        HirStmt::Return(ret) => {
            if let Some(value) = &ret.value {
                collect_free_expr(value, defined, free);
            }
        }
        HirStmt::Throw(throw) => collect_free_expr(&throw.value, defined, free),
        HirStmt::Break(_) | HirStmt::Continue(_) => {}
    }
}

fn collect_free_expr(expr: &Rc<HirExpr>, defined: &mut FxHashSet<String>, free: &mut Vec<String>) {
    match &expr.kind {
        HirExprKind::Local(name) => {
            if !defined.contains(name) && !free.contains(name) {
                free.push(name.clone());
            }
        }
        HirExprKind::Literal(_) | HirExprKind::ClassRef(_) => {}
        HirExprKind::Call(call) => {
            match &call.callee {
                HirCallee::Function(_) => {}
                HirCallee::Method { receiver, .. } => collect_free_expr(receiver, defined, free),
                HirCallee::Value(value) => collect_free_expr(value, defined, free),
            }
            for argument in &call.args {
                collect_free_expr(argument, defined, free);
            }
        }
        HirExprKind::Lambda(lambda) => {
            let mut inner_defined = defined.clone();
            for (name, _) in &lambda.parameters {
                inner_defined.insert(name.clone());
            }
            for statement in &lambda.body {
                collect_free_stmt(statement, &mut inner_defined, free);
            }
        }
        HirExprKind::CollectionLiteral(collection) => {
            for element in &collection.elements {
                collect_free_expr(element, defined, free);
            }
            for (key, value) in &collection.entries {
                collect_free_expr(key, defined, free);
                collect_free_expr(value, defined, free);
            }
        }
        HirExprKind::ObjectLiteral(object) => {
            for (_, value) in &object.fields {
                collect_free_expr(value, defined, free);
            }
        }
        HirExprKind::ConstructorCall(ctor) => {
            for argument in &ctor.args {
                collect_free_expr(argument, defined, free);
            }
        }
        HirExprKind::Binary(binary) => {
            collect_free_expr(&binary.lhs, defined, free);
            collect_free_expr(&binary.rhs, defined, free);
        }
        HirExprKind::Unary(unary) => collect_free_expr(&unary.operand, defined, free),
        HirExprKind::Assign(assign) => {
            collect_free_expr(&assign.target, defined, free);
            collect_free_expr(&assign.value, defined, free);
        }
        HirExprKind::Member(member) => collect_free_expr(&member.receiver, defined, free),
        HirExprKind::Index(index) => {
            collect_free_expr(&index.receiver, defined, free);
            collect_free_expr(&index.index, defined, free);
        }
        HirExprKind::TypeCheck(check) => collect_free_expr(&check.operand, defined, free),
        HirExprKind::TypeCast(cast) => collect_free_expr(&cast.operand, defined, free),
        HirExprKind::If(hir_if) => {
            collect_free_expr(&hir_if.condition, defined, free);
            collect_free_expr(&hir_if.then_branch, defined, free);
            if let Some(else_branch) = &hir_if.else_branch {
                collect_free_expr(else_branch, defined, free);
            }
        }
        HirExprKind::Block(block) => {
            let mut inner_defined = defined.clone();
            for statement in &block.statements {
                collect_free_stmt(statement, &mut inner_defined, free);
            }
            if let Some(value) = &block.value {
                collect_free_expr(value, &mut inner_defined, free);
            }
        }
    }
}

// =============================================================================
// Operand kinds
// =============================================================================

fn prim_kind(ty: &HirType) -> MirPrimKind {
    if ty.nullable {
        return MirPrimKind::Ref;
    }
    match ty.kind {
        HirTypeKind::Int => MirPrimKind::Int,
        HirTypeKind::Long => MirPrimKind::Long,
        HirTypeKind::Float => MirPrimKind::Float,
        HirTypeKind::Double => MirPrimKind::Double,
        HirTypeKind::Boolean => MirPrimKind::Boolean,
        HirTypeKind::Char => MirPrimKind::Char,
        _ => MirPrimKind::Ref,
    }
}

/// The operand kind of a comparison: numeric operands promote along the
/// rank order, everything else compares as references.
fn promoted_operand_kind(lhs: &HirType, rhs: &HirType) -> MirPrimKind {
    let l = prim_kind(lhs);
    let r = prim_kind(rhs);
    let rank = |kind: MirPrimKind| match kind {
        MirPrimKind::Int => Some(0u8),
        MirPrimKind::Long => Some(1),
        MirPrimKind::Float => Some(2),
        MirPrimKind::Double => Some(3),
        _ => None,
    };
    match (rank(l), rank(r)) {
        (Some(a), Some(b)) => {
            if a >= b {
                l
            } else {
                r
            }
        }
        _ if l == r => l,
        _ => MirPrimKind::Ref,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erase_replaces_scoped_type_vars() {
        let mut scope = FxHashSet::default();
        scope.insert("T".to_string());

        let erased = erase(&HirType::unresolved("T"), &scope);
        assert_eq!(erased, HirType::any());

        let kept = erase(&HirType::unresolved("U"), &scope);
        assert_eq!(kept, HirType::unresolved("U"));
    }

    #[test]
    fn test_erase_recurses_into_arguments() {
        let mut scope = FxHashSet::default();
        scope.insert("T".to_string());

        let list = HirType::class("List", vec![HirType::unresolved("T")]);
        assert_eq!(
            erase(&list, &scope),
            HirType::class("List", vec![HirType::any()])
        );
    }

    #[test]
    fn test_promoted_operand_kind() {
        assert_eq!(
            promoted_operand_kind(&HirType::int(), &HirType::double()),
            MirPrimKind::Double
        );
        assert_eq!(
            promoted_operand_kind(&HirType::int(), &HirType::int()),
            MirPrimKind::Int
        );
        assert_eq!(
            promoted_operand_kind(&HirType::string(), &HirType::string()),
            MirPrimKind::Ref
        );
    }

    #[test]
    fn test_module_class_name() {
        assert_eq!(module_class_name("demo"), "demo.Module");
    }
}
