//! Copy-on-change traversal for HIR trees.
//!
//! Every optimization pass implements [`HirRewriter`] and overrides the
//! hooks it cares about. The default walks rebuild a node only when one of
//! its children (or its type) actually changed, and otherwise return the
//! input `Rc` itself, so unchanged subtrees stay shared between the
//! "before" and "after" snapshots of a pass and `Rc::ptr_eq` detects
//! no-op passes cheaply.

use super::decl::{
    HirClass, HirDecl, HirEnumEntry, HirField, HirFunction, HirModule, HirParameter,
    HirTypeAlias,
};
use super::expr::{
    HirAssign, HirBinary, HirBlockExpr, HirCall, HirCallee, HirCollectionLiteral,
    HirConstructorCall, HirExpr, HirExprKind, HirIf, HirIndex, HirLambda, HirMember,
    HirObjectLiteral, HirTypeCast, HirTypeCheck, HirUnary,
};
use super::stmt::{
    HirBlock, HirCatch, HirExprStmt, HirLocal, HirLoop, HirLoopKind, HirReturn, HirStmt, HirThrow,
    HirTry,
};
use super::types::HirType;
use std::rc::Rc;

pub trait HirRewriter {
    // -------------------------------------------------------------------------
    // Override points
    // -------------------------------------------------------------------------

    fn rewrite_expr(&mut self, expr: &Rc<HirExpr>) -> Rc<HirExpr> {
        self.walk_expr(expr)
    }

    fn rewrite_stmt(&mut self, stmt: &Rc<HirStmt>) -> Rc<HirStmt> {
        self.walk_stmt(stmt)
    }

    /// Rewrites the statements of one block. Dead-code elimination overrides
    /// this to truncate after a terminator.
    fn rewrite_stmt_list(&mut self, stmts: &[Rc<HirStmt>]) -> Vec<Rc<HirStmt>> {
        stmts.iter().map(|s| self.rewrite_stmt(s)).collect()
    }

    fn rewrite_decl(&mut self, decl: &Rc<HirDecl>) -> Rc<HirDecl> {
        self.walk_decl(decl)
    }

    /// Rewrites a type annotation. Only the specialization pass substitutes
    /// here; everything else keeps types as-is.
    fn rewrite_type(&mut self, ty: &HirType) -> HirType {
        ty.clone()
    }

    // -------------------------------------------------------------------------
    // Structural walks
    // -------------------------------------------------------------------------

    fn walk_module(&mut self, module: &Rc<HirModule>) -> Rc<HirModule> {
        let (declarations, changed) = {
            let mut changed = false;
            let mut out = Vec::with_capacity(module.declarations.len());
            for decl in &module.declarations {
                let new = self.rewrite_decl(decl);
                changed |= !Rc::ptr_eq(&new, decl);
                out.push(new);
            }
            (out, changed)
        };

        if changed {
            HirModule::new(module.name.clone(), declarations, module.span)
        } else {
            module.clone()
        }
    }

    fn walk_decl(&mut self, decl: &Rc<HirDecl>) -> Rc<HirDecl> {
        match decl.as_ref() {
            HirDecl::Import(_) => decl.clone(),
            HirDecl::TypeAlias(alias) => {
                let target = self.rewrite_type(&alias.target);
                if target == alias.target {
                    decl.clone()
                } else {
                    Rc::new(HirDecl::TypeAlias(HirTypeAlias {
                        name: alias.name.clone(),
                        target,
                        span: alias.span,
                    }))
                }
            }
            HirDecl::Field(field) => match self.walk_field(field) {
                Some(new_field) => Rc::new(HirDecl::Field(new_field)),
                None => decl.clone(),
            },
            HirDecl::Function(function) => {
                let function_rc = self.walk_function_parts(function);
                match function_rc {
                    Some(new_function) => Rc::new(HirDecl::Function(new_function)),
                    None => decl.clone(),
                }
            }
            HirDecl::Class(class) => match self.walk_class(class) {
                Some(new_class) => Rc::new(HirDecl::Class(new_class)),
                None => decl.clone(),
            },
        }
    }

    /// Returns `Some` only when something inside the class changed.
    fn walk_class(&mut self, class: &HirClass) -> Option<HirClass> {
        let mut changed = false;

        let superclass = class.superclass.as_ref().map(|ty| self.rewrite_type(ty));
        changed |= superclass != class.superclass;

        let mut fields = Vec::with_capacity(class.fields.len());
        for field in &class.fields {
            match self.walk_field(field) {
                Some(new_field) => {
                    changed = true;
                    fields.push(Rc::new(new_field));
                }
                None => fields.push(field.clone()),
            }
        }

        let constructor = match &class.constructor {
            Some(ctor) => match self.walk_function_parts(ctor) {
                Some(new_ctor) => {
                    changed = true;
                    Some(Rc::new(new_ctor))
                }
                None => Some(ctor.clone()),
            },
            None => None,
        };

        let mut methods = Vec::with_capacity(class.methods.len());
        for method in &class.methods {
            match self.walk_function_parts(method) {
                Some(new_method) => {
                    changed = true;
                    methods.push(Rc::new(new_method));
                }
                None => methods.push(method.clone()),
            }
        }

        let mut enum_entries = Vec::with_capacity(class.enum_entries.len());
        for entry in &class.enum_entries {
            let (arguments, args_changed) = self.rewrite_exprs(&entry.arguments);
            changed |= args_changed;
            enum_entries.push(HirEnumEntry {
                name: entry.name.clone(),
                ordinal: entry.ordinal,
                arguments,
                span: entry.span,
            });
        }

        if !changed {
            return None;
        }

        Some(HirClass {
            name: class.name.clone(),
            type_parameters: class.type_parameters.clone(),
            superclass,
            fields,
            constructor,
            methods,
            is_enum: class.is_enum,
            enum_entries,
            span: class.span,
        })
    }

    /// Returns `Some` only when something inside the field changed.
    fn walk_field(&mut self, field: &HirField) -> Option<HirField> {
        let ty = self.rewrite_type(&field.ty);
        let initializer = field.initializer.as_ref().map(|e| self.rewrite_expr(e));

        let init_changed = match (&initializer, &field.initializer) {
            (Some(new), Some(old)) => !Rc::ptr_eq(new, old),
            _ => false,
        };

        if ty == field.ty && !init_changed {
            return None;
        }

        Some(HirField {
            name: field.name.clone(),
            ty,
            mutable: field.mutable,
            initializer,
            span: field.span,
        })
    }

    /// Returns `Some` only when something inside the function changed.
    fn walk_function_parts(&mut self, function: &HirFunction) -> Option<HirFunction> {
        let mut changed = false;

        let mut parameters = Vec::with_capacity(function.parameters.len());
        for param in &function.parameters {
            let ty = self.rewrite_type(&param.ty);
            changed |= ty != param.ty;
            parameters.push(HirParameter {
                name: param.name.clone(),
                ty,
                span: param.span,
            });
        }

        let return_type = self.rewrite_type(&function.return_type);
        changed |= return_type != function.return_type;

        let body = match &function.body {
            Some(body) => {
                let new_body = self.rewrite_stmt(body);
                changed |= !Rc::ptr_eq(&new_body, body);
                Some(new_body)
            }
            None => None,
        };

        if !changed {
            return None;
        }

        Some(HirFunction {
            name: function.name.clone(),
            kind: function.kind,
            type_parameters: function.type_parameters.clone(),
            parameters,
            return_type,
            body,
            is_inline: function.is_inline,
            span: function.span,
        })
    }

    fn walk_stmt(&mut self, stmt: &Rc<HirStmt>) -> Rc<HirStmt> {
        match stmt.as_ref() {
            HirStmt::Block(block) => {
                let statements = self.rewrite_stmt_list(&block.statements);
                if Self::stmt_list_unchanged(&statements, &block.statements) {
                    stmt.clone()
                } else {
                    Rc::new(HirStmt::Block(HirBlock {
                        statements,
                        span: block.span,
                    }))
                }
            }
            HirStmt::Local(local) => {
                let ty = self.rewrite_type(&local.ty);
                let initializer = local.initializer.as_ref().map(|e| self.rewrite_expr(e));
                let init_changed = match (&initializer, &local.initializer) {
                    (Some(new), Some(old)) => !Rc::ptr_eq(new, old),
                    _ => false,
                };
                if ty == local.ty && !init_changed {
                    stmt.clone()
                } else {
                    Rc::new(HirStmt::Local(HirLocal {
                        name: local.name.clone(),
                        ty,
                        mutable: local.mutable,
                        initializer,
                        span: local.span,
                    }))
                }
            }
            HirStmt::Expr(expr_stmt) => {
                let expr = self.rewrite_expr(&expr_stmt.expr);
                if Rc::ptr_eq(&expr, &expr_stmt.expr) {
                    stmt.clone()
                } else {
                    Rc::new(HirStmt::Expr(HirExprStmt {
                        expr,
                        span: expr_stmt.span,
                    }))
                }
            }
            HirStmt::Loop(hir_loop) => {
                let (kind, kind_changed) = match &hir_loop.kind {
                    HirLoopKind::While { condition } => {
                        let new_condition = self.rewrite_expr(condition);
                        let changed = !Rc::ptr_eq(&new_condition, condition);
                        (
                            HirLoopKind::While {
                                condition: new_condition,
                            },
                            changed,
                        )
                    }
                    HirLoopKind::Iterate {
                        binding,
                        binding_ty,
                        iterable,
                    } => {
                        let new_ty = self.rewrite_type(binding_ty);
                        let new_iterable = self.rewrite_expr(iterable);
                        let changed =
                            new_ty != *binding_ty || !Rc::ptr_eq(&new_iterable, iterable);
                        (
                            HirLoopKind::Iterate {
                                binding: binding.clone(),
                                binding_ty: new_ty,
                                iterable: new_iterable,
                            },
                            changed,
                        )
                    }
                };

                let body = self.rewrite_stmt(&hir_loop.body);
                if !kind_changed && Rc::ptr_eq(&body, &hir_loop.body) {
                    stmt.clone()
                } else {
                    Rc::new(HirStmt::Loop(HirLoop {
                        kind,
                        body,
                        span: hir_loop.span,
                    }))
                }
            }
            HirStmt::Try(hir_try) => {
                let body = self.rewrite_stmt(&hir_try.body);
                let mut changed = !Rc::ptr_eq(&body, &hir_try.body);

                let mut catches = Vec::with_capacity(hir_try.catches.len());
                for catch in &hir_try.catches {
                    let exception_type = self.rewrite_type(&catch.exception_type);
                    let catch_body = self.rewrite_stmt(&catch.body);
                    changed |= exception_type != catch.exception_type
                        || !Rc::ptr_eq(&catch_body, &catch.body);
                    catches.push(HirCatch {
                        binding: catch.binding.clone(),
                        exception_type,
                        body: catch_body,
                        span: catch.span,
                    });
                }

                let finally = match &hir_try.finally {
                    Some(finally) => {
                        let new_finally = self.rewrite_stmt(finally);
                        changed |= !Rc::ptr_eq(&new_finally, finally);
                        Some(new_finally)
                    }
                    None => None,
                };

                if !changed {
                    stmt.clone()
                } else {
                    Rc::new(HirStmt::Try(HirTry {
                        body,
                        catches,
                        finally,
                        span: hir_try.span,
                    }))
                }
            }
            HirStmt::Return(ret) => {
                let value = ret.value.as_ref().map(|e| self.rewrite_expr(e));
                let changed = match (&value, &ret.value) {
                    (Some(new), Some(old)) => !Rc::ptr_eq(new, old),
                    _ => false,
                };
                if !changed {
                    stmt.clone()
                } else {
                    Rc::new(HirStmt::Return(HirReturn {
                        value,
                        span: ret.span,
                    }))
                }
            }
            HirStmt::Throw(throw) => {
                let value = self.rewrite_expr(&throw.value);
                if Rc::ptr_eq(&value, &throw.value) {
                    stmt.clone()
                } else {
                    Rc::new(HirStmt::Throw(HirThrow {
                        value,
                        span: throw.span,
                    }))
                }
            }
            HirStmt::Break(_) | HirStmt::Continue(_) => stmt.clone(),
        }
    }

    fn walk_expr(&mut self, expr: &Rc<HirExpr>) -> Rc<HirExpr> {
        let ty = self.rewrite_type(&expr.ty);
        let ty_changed = ty != expr.ty;

        match &expr.kind {
            HirExprKind::Literal(lit) => {
                if ty_changed {
                    HirExpr::new(HirExprKind::Literal(lit.clone()), ty, expr.span)
                } else {
                    expr.clone()
                }
            }
            HirExprKind::Local(name) => {
                if ty_changed {
                    HirExpr::new(HirExprKind::Local(name.clone()), ty, expr.span)
                } else {
                    expr.clone()
                }
            }
            HirExprKind::ClassRef(target) => {
                let new_target = self.rewrite_type(target);
                if ty_changed || new_target != *target {
                    HirExpr::new(HirExprKind::ClassRef(new_target), ty, expr.span)
                } else {
                    expr.clone()
                }
            }
            HirExprKind::Call(call) => {
                let (callee, callee_changed) = match &call.callee {
                    HirCallee::Function(name) => (HirCallee::Function(name.clone()), false),
                    HirCallee::Method { receiver, name } => {
                        let new_receiver = self.rewrite_expr(receiver);
                        let changed = !Rc::ptr_eq(&new_receiver, receiver);
                        (
                            HirCallee::Method {
                                receiver: new_receiver,
                                name: name.clone(),
                            },
                            changed,
                        )
                    }
                    HirCallee::Value(value) => {
                        let new_value = self.rewrite_expr(value);
                        let changed = !Rc::ptr_eq(&new_value, value);
                        (HirCallee::Value(new_value), changed)
                    }
                };

                let (args, args_changed) = self.rewrite_exprs(&call.args);

                let mut type_args_changed = false;
                let type_args: Vec<HirType> = call
                    .type_args
                    .iter()
                    .map(|t| {
                        let new = self.rewrite_type(t);
                        type_args_changed |= new != *t;
                        new
                    })
                    .collect();

                if ty_changed || callee_changed || args_changed || type_args_changed {
                    HirExpr::new(
                        HirExprKind::Call(HirCall {
                            callee,
                            args,
                            type_args,
                        }),
                        ty,
                        expr.span,
                    )
                } else {
                    expr.clone()
                }
            }
            HirExprKind::Lambda(lambda) => {
                let mut params_changed = false;
                let parameters: Vec<(String, HirType)> = lambda
                    .parameters
                    .iter()
                    .map(|(name, pty)| {
                        let new = self.rewrite_type(pty);
                        params_changed |= new != *pty;
                        (name.clone(), new)
                    })
                    .collect();
                let return_type = self.rewrite_type(&lambda.return_type);
                let body = self.rewrite_stmt_list(&lambda.body);
                let body_changed = !Self::stmt_list_unchanged(&body, &lambda.body);

                if ty_changed
                    || params_changed
                    || return_type != lambda.return_type
                    || body_changed
                {
                    HirExpr::new(
                        HirExprKind::Lambda(HirLambda {
                            parameters,
                            body,
                            return_type,
                        }),
                        ty,
                        expr.span,
                    )
                } else {
                    expr.clone()
                }
            }
            HirExprKind::CollectionLiteral(collection) => {
                let (elements, elements_changed) = self.rewrite_exprs(&collection.elements);
                let mut entries_changed = false;
                let entries: Vec<(Rc<HirExpr>, Rc<HirExpr>)> = collection
                    .entries
                    .iter()
                    .map(|(k, v)| {
                        let new_k = self.rewrite_expr(k);
                        let new_v = self.rewrite_expr(v);
                        entries_changed |= !Rc::ptr_eq(&new_k, k) || !Rc::ptr_eq(&new_v, v);
                        (new_k, new_v)
                    })
                    .collect();

                if ty_changed || elements_changed || entries_changed {
                    HirExpr::new(
                        HirExprKind::CollectionLiteral(HirCollectionLiteral {
                            collection_kind: collection.collection_kind,
                            elements,
                            entries,
                        }),
                        ty,
                        expr.span,
                    )
                } else {
                    expr.clone()
                }
            }
            HirExprKind::ObjectLiteral(object) => {
                let mut fields_changed = false;
                let fields: Vec<(String, Rc<HirExpr>)> = object
                    .fields
                    .iter()
                    .map(|(name, value)| {
                        let new_value = self.rewrite_expr(value);
                        fields_changed |= !Rc::ptr_eq(&new_value, value);
                        (name.clone(), new_value)
                    })
                    .collect();

                if ty_changed || fields_changed {
                    HirExpr::new(
                        HirExprKind::ObjectLiteral(HirObjectLiteral { fields }),
                        ty,
                        expr.span,
                    )
                } else {
                    expr.clone()
                }
            }
            HirExprKind::ConstructorCall(ctor) => {
                let class = self.rewrite_type(&ctor.class);
                let (args, args_changed) = self.rewrite_exprs(&ctor.args);

                if ty_changed || class != ctor.class || args_changed {
                    HirExpr::new(
                        HirExprKind::ConstructorCall(HirConstructorCall { class, args }),
                        ty,
                        expr.span,
                    )
                } else {
                    expr.clone()
                }
            }
            HirExprKind::Binary(binary) => {
                let lhs = self.rewrite_expr(&binary.lhs);
                let rhs = self.rewrite_expr(&binary.rhs);
                if ty_changed || !Rc::ptr_eq(&lhs, &binary.lhs) || !Rc::ptr_eq(&rhs, &binary.rhs)
                {
                    HirExpr::new(
                        HirExprKind::Binary(HirBinary {
                            op: binary.op,
                            lhs,
                            rhs,
                        }),
                        ty,
                        expr.span,
                    )
                } else {
                    expr.clone()
                }
            }
            HirExprKind::Unary(unary) => {
                let operand = self.rewrite_expr(&unary.operand);
                if ty_changed || !Rc::ptr_eq(&operand, &unary.operand) {
                    HirExpr::new(
                        HirExprKind::Unary(HirUnary {
                            op: unary.op,
                            operand,
                        }),
                        ty,
                        expr.span,
                    )
                } else {
                    expr.clone()
                }
            }
            HirExprKind::Assign(assign) => {
                let target = self.rewrite_expr(&assign.target);
                let value = self.rewrite_expr(&assign.value);
                if ty_changed
                    || !Rc::ptr_eq(&target, &assign.target)
                    || !Rc::ptr_eq(&value, &assign.value)
                {
                    HirExpr::new(
                        HirExprKind::Assign(HirAssign { target, value }),
                        ty,
                        expr.span,
                    )
                } else {
                    expr.clone()
                }
            }
            HirExprKind::Member(member) => {
                let receiver = self.rewrite_expr(&member.receiver);
                if ty_changed || !Rc::ptr_eq(&receiver, &member.receiver) {
                    HirExpr::new(
                        HirExprKind::Member(HirMember {
                            receiver,
                            name: member.name.clone(),
                        }),
                        ty,
                        expr.span,
                    )
                } else {
                    expr.clone()
                }
            }
            HirExprKind::Index(index) => {
                let receiver = self.rewrite_expr(&index.receiver);
                let index_expr = self.rewrite_expr(&index.index);
                if ty_changed
                    || !Rc::ptr_eq(&receiver, &index.receiver)
                    || !Rc::ptr_eq(&index_expr, &index.index)
                {
                    HirExpr::new(
                        HirExprKind::Index(HirIndex {
                            receiver,
                            index: index_expr,
                        }),
                        ty,
                        expr.span,
                    )
                } else {
                    expr.clone()
                }
            }
            HirExprKind::TypeCheck(check) => {
                let operand = self.rewrite_expr(&check.operand);
                let target = self.rewrite_type(&check.target);
                if ty_changed || !Rc::ptr_eq(&operand, &check.operand) || target != check.target
                {
                    HirExpr::new(
                        HirExprKind::TypeCheck(HirTypeCheck {
                            operand,
                            target,
                            negated: check.negated,
                        }),
                        ty,
                        expr.span,
                    )
                } else {
                    expr.clone()
                }
            }
            HirExprKind::TypeCast(cast) => {
                let operand = self.rewrite_expr(&cast.operand);
                let target = self.rewrite_type(&cast.target);
                if ty_changed || !Rc::ptr_eq(&operand, &cast.operand) || target != cast.target {
                    HirExpr::new(
                        HirExprKind::TypeCast(HirTypeCast {
                            operand,
                            target,
                            safe: cast.safe,
                        }),
                        ty,
                        expr.span,
                    )
                } else {
                    expr.clone()
                }
            }
            HirExprKind::If(hir_if) => {
                let condition = self.rewrite_expr(&hir_if.condition);
                let then_branch = self.rewrite_expr(&hir_if.then_branch);
                let else_branch = hir_if.else_branch.as_ref().map(|e| self.rewrite_expr(e));
                let else_changed = match (&else_branch, &hir_if.else_branch) {
                    (Some(new), Some(old)) => !Rc::ptr_eq(new, old),
                    _ => false,
                };

                if ty_changed
                    || !Rc::ptr_eq(&condition, &hir_if.condition)
                    || !Rc::ptr_eq(&then_branch, &hir_if.then_branch)
                    || else_changed
                {
                    HirExpr::new(
                        HirExprKind::If(HirIf {
                            condition,
                            then_branch,
                            else_branch,
                        }),
                        ty,
                        expr.span,
                    )
                } else {
                    expr.clone()
                }
            }
            HirExprKind::Block(block) => {
                let statements = self.rewrite_stmt_list(&block.statements);
                let stmts_changed = !Self::stmt_list_unchanged(&statements, &block.statements);
                let value = block.value.as_ref().map(|e| self.rewrite_expr(e));
                let value_changed = match (&value, &block.value) {
                    (Some(new), Some(old)) => !Rc::ptr_eq(new, old),
                    _ => false,
                };

                if ty_changed || stmts_changed || value_changed {
                    HirExpr::new(
                        HirExprKind::Block(HirBlockExpr { statements, value }),
                        ty,
                        expr.span,
                    )
                } else {
                    expr.clone()
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn rewrite_exprs(&mut self, exprs: &[Rc<HirExpr>]) -> (Vec<Rc<HirExpr>>, bool) {
        let mut changed = false;
        let out = exprs
            .iter()
            .map(|e| {
                let new = self.rewrite_expr(e);
                changed |= !Rc::ptr_eq(&new, e);
                new
            })
            .collect();
        (out, changed)
    }

    fn stmt_list_unchanged(new: &[Rc<HirStmt>], old: &[Rc<HirStmt>]) -> bool {
        new.len() == old.len()
            && new
                .iter()
                .zip(old.iter())
                .all(|(a, b)| Rc::ptr_eq(a, b))
    }
}
