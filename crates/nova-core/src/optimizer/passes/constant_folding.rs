//! Constant folding and algebraic simplification.
//!
//! Folds binary and unary operations over literal operands using the same
//! numeric promotion order as the analyzer, plus a set of algebraic
//! identities that apply regardless of literal-ness. Division and modulo
//! by a literal zero are left alone for the runtime to raise the
//! appropriate division error, and `x * 0` never folds when the result
//! could be a floating-point NaN or infinity.

use crate::config::OptimizationLevel;
use crate::errors::CompileError;
use crate::hir::{
    HirBinary, HirBinaryOp, HirCall, HirCallee, HirExpr, HirExprKind, HirLiteral, HirModule,
    HirRewriter, HirType, HirTypeKind, HirUnaryOp,
};
use crate::optimizer::HirPass;
use std::rc::Rc;

pub struct ConstantFoldingPass;

impl HirPass for ConstantFoldingPass {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn min_level(&self) -> OptimizationLevel {
        OptimizationLevel::O1
    }

    fn run(&mut self, module: &Rc<HirModule>) -> Result<Rc<HirModule>, CompileError> {
        Ok(self.walk_module(module))
    }
}

impl HirRewriter for ConstantFoldingPass {
    fn rewrite_expr(&mut self, expr: &Rc<HirExpr>) -> Rc<HirExpr> {
        // Children first, so one pass folds bottom-up
        let walked = self.walk_expr(expr);
        fold(&walked).unwrap_or(walked)
    }
}

fn fold(expr: &Rc<HirExpr>) -> Option<Rc<HirExpr>> {
    match &expr.kind {
        HirExprKind::Binary(binary) => fold_binary(expr, binary),
        HirExprKind::Unary(unary) => match (unary.op, unary.operand.as_literal()) {
            (HirUnaryOp::Neg, Some(lit)) => {
                let negated = match lit {
                    HirLiteral::Int(v) => HirLiteral::Int(v.wrapping_neg()),
                    HirLiteral::Long(v) => HirLiteral::Long(v.wrapping_neg()),
                    HirLiteral::Float(v) => HirLiteral::Float(-v),
                    HirLiteral::Double(v) => HirLiteral::Double(-v),
                    _ => return None,
                };
                Some(HirExpr::literal(negated, expr.ty.clone(), expr.span))
            }
            (HirUnaryOp::Not, Some(HirLiteral::Boolean(v))) => Some(HirExpr::literal(
                HirLiteral::Boolean(!v),
                expr.ty.clone(),
                expr.span,
            )),
            _ => None,
        },
        // if (true) A else B -> A;  if (false) A else B -> B (or empty)
        HirExprKind::If(hir_if) => match hir_if.condition.as_literal() {
            Some(HirLiteral::Boolean(true)) => Some(hir_if.then_branch.clone()),
            Some(HirLiteral::Boolean(false)) => Some(match &hir_if.else_branch {
                Some(else_branch) => else_branch.clone(),
                None => HirExpr::literal(HirLiteral::Unit, HirType::unit(), expr.span),
            }),
            _ => None,
        },
        // "a".concat("b") -> "ab", and literal toString()
        HirExprKind::Call(call) => fold_string_call(expr, call),
        _ => None,
    }
}

fn fold_binary(expr: &Rc<HirExpr>, binary: &HirBinary) -> Option<Rc<HirExpr>> {
    let lhs_lit = binary.lhs.as_literal();
    let rhs_lit = binary.rhs.as_literal();

    // Literal-literal folding
    if let (Some(l), Some(r)) = (lhs_lit, rhs_lit) {
        if let Some(folded) = fold_literal_pair(binary.op, l, r, &expr.ty) {
            return Some(HirExpr::literal(folded, expr.ty.clone(), expr.span));
        }
    }

    // Short-circuit identities
    match (binary.op, lhs_lit) {
        (HirBinaryOp::And, Some(HirLiteral::Boolean(false))) => {
            return Some(HirExpr::literal(
                HirLiteral::Boolean(false),
                expr.ty.clone(),
                expr.span,
            ));
        }
        (HirBinaryOp::And, Some(HirLiteral::Boolean(true))) => {
            return Some(binary.rhs.clone());
        }
        (HirBinaryOp::Or, Some(HirLiteral::Boolean(true))) => {
            return Some(HirExpr::literal(
                HirLiteral::Boolean(true),
                expr.ty.clone(),
                expr.span,
            ));
        }
        (HirBinaryOp::Or, Some(HirLiteral::Boolean(false))) => {
            return Some(binary.rhs.clone());
        }
        _ => {}
    }

    // Algebraic identities
    match binary.op {
        HirBinaryOp::Add => {
            if rhs_lit.is_some_and(is_zero) {
                return Some(binary.lhs.clone());
            }
            if lhs_lit.is_some_and(is_zero) {
                return Some(binary.rhs.clone());
            }
        }
        HirBinaryOp::Sub => {
            // x - x -> 0, only for two syntactically identical simple
            // variable references
            if let (Some(l), Some(r)) = (binary.lhs.as_local(), binary.rhs.as_local()) {
                if l == r {
                    if let Some(zero) = zero_of(&expr.ty) {
                        return Some(HirExpr::literal(zero, expr.ty.clone(), expr.span));
                    }
                }
            }
        }
        HirBinaryOp::Mul => {
            if rhs_lit.is_some_and(is_one) {
                return Some(binary.lhs.clone());
            }
            if lhs_lit.is_some_and(is_one) {
                return Some(binary.rhs.clone());
            }
            // x * 0 -> 0 for integer zero only: a floating-point operand
            // could be NaN or infinity, and NaN * 0 must stay NaN.
            if expr.ty.is_integer() {
                if rhs_lit.is_some_and(is_integer_zero) && is_pure(&binary.lhs) {
                    if let Some(zero) = zero_of(&expr.ty) {
                        return Some(HirExpr::literal(zero, expr.ty.clone(), expr.span));
                    }
                }
                if lhs_lit.is_some_and(is_integer_zero) && is_pure(&binary.rhs) {
                    if let Some(zero) = zero_of(&expr.ty) {
                        return Some(HirExpr::literal(zero, expr.ty.clone(), expr.span));
                    }
                }
            }
        }
        HirBinaryOp::Div => {
            if rhs_lit.is_some_and(is_one) {
                return Some(binary.lhs.clone());
            }
        }
        _ => {}
    }

    // Re-association: (a op lit1) op lit2 -> a op fold(lit1, lit2) for
    // associative/commutative + and *, enabling further folding in one pass.
    if matches!(binary.op, HirBinaryOp::Add | HirBinaryOp::Mul) {
        if let (HirExprKind::Binary(inner), Some(outer_lit)) = (&binary.lhs.kind, rhs_lit) {
            if inner.op == binary.op {
                if let Some(inner_lit) = inner.rhs.as_literal() {
                    if numeric_value(inner_lit).is_some() && numeric_value(outer_lit).is_some() {
                        if let Some(folded) =
                            fold_literal_pair(binary.op, inner_lit, outer_lit, &expr.ty)
                        {
                            let folded_rhs =
                                HirExpr::literal(folded, expr.ty.clone(), binary.rhs.span);
                            return Some(HirExpr::new(
                                HirExprKind::Binary(HirBinary {
                                    op: binary.op,
                                    lhs: inner.lhs.clone(),
                                    rhs: folded_rhs,
                                }),
                                expr.ty.clone(),
                                expr.span,
                            ));
                        }
                    }
                }
            }
        }
    }

    None
}

fn fold_string_call(expr: &Rc<HirExpr>, call: &HirCall) -> Option<Rc<HirExpr>> {
    let HirCallee::Method { receiver, name } = &call.callee else {
        return None;
    };

    match (name.as_str(), receiver.as_literal(), call.args.len()) {
        ("concat", Some(HirLiteral::String(l)), 1) => {
            if let Some(HirLiteral::String(r)) = call.args[0].as_literal() {
                let mut folded = l.clone();
                folded.push_str(r);
                return Some(HirExpr::literal(
                    HirLiteral::String(folded),
                    expr.ty.clone(),
                    expr.span,
                ));
            }
            None
        }
        ("toString", Some(lit), 0) => {
            let text = match lit {
                HirLiteral::Int(v) => v.to_string(),
                HirLiteral::Long(v) => v.to_string(),
                HirLiteral::Boolean(v) => v.to_string(),
                HirLiteral::String(v) => v.clone(),
                // Floating-point formatting is the runtime's business
                _ => return None,
            };
            Some(HirExpr::literal(
                HirLiteral::String(text),
                expr.ty.clone(),
                expr.span,
            ))
        }
        _ => None,
    }
}

/// Fold a literal-literal operation, promoting along the numeric rank
/// order. Division and modulo by a literal zero never fold.
fn fold_literal_pair(
    op: HirBinaryOp,
    lhs: &HirLiteral,
    rhs: &HirLiteral,
    result_ty: &HirType,
) -> Option<HirLiteral> {
    // Boolean logic
    if let (HirLiteral::Boolean(l), HirLiteral::Boolean(r)) = (lhs, rhs) {
        return match op {
            HirBinaryOp::And => Some(HirLiteral::Boolean(*l && *r)),
            HirBinaryOp::Or => Some(HirLiteral::Boolean(*l || *r)),
            HirBinaryOp::Eq => Some(HirLiteral::Boolean(l == r)),
            HirBinaryOp::Ne => Some(HirLiteral::Boolean(l != r)),
            _ => None,
        };
    }

    // String / char equality
    match (lhs, rhs) {
        (HirLiteral::String(l), HirLiteral::String(r)) => match op {
            HirBinaryOp::Eq => return Some(HirLiteral::Boolean(l == r)),
            HirBinaryOp::Ne => return Some(HirLiteral::Boolean(l != r)),
            _ => return None,
        },
        (HirLiteral::Char(l), HirLiteral::Char(r)) => match op {
            HirBinaryOp::Eq => return Some(HirLiteral::Boolean(l == r)),
            HirBinaryOp::Ne => return Some(HirLiteral::Boolean(l != r)),
            HirBinaryOp::Lt => return Some(HirLiteral::Boolean(l < r)),
            HirBinaryOp::Le => return Some(HirLiteral::Boolean(l <= r)),
            HirBinaryOp::Gt => return Some(HirLiteral::Boolean(l > r)),
            HirBinaryOp::Ge => return Some(HirLiteral::Boolean(l >= r)),
            _ => return None,
        },
        (HirLiteral::Null, HirLiteral::Null) => match op {
            HirBinaryOp::Eq => return Some(HirLiteral::Boolean(true)),
            HirBinaryOp::Ne => return Some(HirLiteral::Boolean(false)),
            _ => return None,
        },
        _ => {}
    }

    let l = numeric_value(lhs)?;
    let r = numeric_value(rhs)?;

    if op.is_comparison() {
        let (l, r) = (l.as_f64(), r.as_f64());
        let result = match op {
            HirBinaryOp::Eq => l == r,
            HirBinaryOp::Ne => l != r,
            HirBinaryOp::Lt => l < r,
            HirBinaryOp::Le => l <= r,
            HirBinaryOp::Gt => l > r,
            HirBinaryOp::Ge => l >= r,
            _ => unreachable!(),
        };
        return Some(HirLiteral::Boolean(result));
    }

    if !op.is_arithmetic() {
        return None;
    }

    // Division or modulo by a literal zero is the runtime's error to raise
    if matches!(op, HirBinaryOp::Div | HirBinaryOp::Rem) && r.is_zero() {
        return None;
    }

    // Promote to max(rank(l), rank(r)), mirroring the analyzer
    let rank = l.rank().max(r.rank()).max(rank_of(result_ty).unwrap_or(0));
    Some(match rank {
        0 => {
            let (l, r) = (l.as_i64() as i32, r.as_i64() as i32);
            HirLiteral::Int(match op {
                HirBinaryOp::Add => l.wrapping_add(r),
                HirBinaryOp::Sub => l.wrapping_sub(r),
                HirBinaryOp::Mul => l.wrapping_mul(r),
                HirBinaryOp::Div => l.wrapping_div(r),
                HirBinaryOp::Rem => l.wrapping_rem(r),
                _ => unreachable!(),
            })
        }
        1 => {
            let (l, r) = (l.as_i64(), r.as_i64());
            HirLiteral::Long(match op {
                HirBinaryOp::Add => l.wrapping_add(r),
                HirBinaryOp::Sub => l.wrapping_sub(r),
                HirBinaryOp::Mul => l.wrapping_mul(r),
                HirBinaryOp::Div => l.wrapping_div(r),
                HirBinaryOp::Rem => l.wrapping_rem(r),
                _ => unreachable!(),
            })
        }
        2 => {
            let (l, r) = (l.as_f64() as f32, r.as_f64() as f32);
            HirLiteral::Float(match op {
                HirBinaryOp::Add => l + r,
                HirBinaryOp::Sub => l - r,
                HirBinaryOp::Mul => l * r,
                HirBinaryOp::Div => l / r,
                HirBinaryOp::Rem => l % r,
                _ => unreachable!(),
            })
        }
        _ => {
            let (l, r) = (l.as_f64(), r.as_f64());
            HirLiteral::Double(match op {
                HirBinaryOp::Add => l + r,
                HirBinaryOp::Sub => l - r,
                HirBinaryOp::Mul => l * r,
                HirBinaryOp::Div => l / r,
                HirBinaryOp::Rem => l % r,
                _ => unreachable!(),
            })
        }
    })
}

#[derive(Clone, Copy)]
enum NumValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
}

impl NumValue {
    fn rank(self) -> u8 {
        match self {
            NumValue::Int(_) => 0,
            NumValue::Long(_) => 1,
            NumValue::Float(_) => 2,
            NumValue::Double(_) => 3,
        }
    }

    fn as_i64(self) -> i64 {
        match self {
            NumValue::Int(v) => v as i64,
            NumValue::Long(v) => v,
            NumValue::Float(v) => v as i64,
            NumValue::Double(v) => v as i64,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            NumValue::Int(v) => v as f64,
            NumValue::Long(v) => v as f64,
            NumValue::Float(v) => v as f64,
            NumValue::Double(v) => v,
        }
    }

    fn is_zero(self) -> bool {
        match self {
            NumValue::Int(v) => v == 0,
            NumValue::Long(v) => v == 0,
            NumValue::Float(v) => v == 0.0,
            NumValue::Double(v) => v == 0.0,
        }
    }
}

fn numeric_value(lit: &HirLiteral) -> Option<NumValue> {
    match lit {
        HirLiteral::Int(v) => Some(NumValue::Int(*v)),
        HirLiteral::Long(v) => Some(NumValue::Long(*v)),
        HirLiteral::Float(v) => Some(NumValue::Float(*v)),
        HirLiteral::Double(v) => Some(NumValue::Double(*v)),
        _ => None,
    }
}

fn rank_of(ty: &HirType) -> Option<u8> {
    match ty.kind {
        HirTypeKind::Int => Some(0),
        HirTypeKind::Long => Some(1),
        HirTypeKind::Float => Some(2),
        HirTypeKind::Double => Some(3),
        _ => None,
    }
}

fn is_zero(lit: &HirLiteral) -> bool {
    numeric_value(lit).is_some_and(NumValue::is_zero)
}

fn is_integer_zero(lit: &HirLiteral) -> bool {
    matches!(lit, HirLiteral::Int(0) | HirLiteral::Long(0))
}

fn is_one(lit: &HirLiteral) -> bool {
    match lit {
        HirLiteral::Int(v) => *v == 1,
        HirLiteral::Long(v) => *v == 1,
        HirLiteral::Float(v) => *v == 1.0,
        HirLiteral::Double(v) => *v == 1.0,
        _ => false,
    }
}

fn zero_of(ty: &HirType) -> Option<HirLiteral> {
    match ty.kind {
        HirTypeKind::Int => Some(HirLiteral::Int(0)),
        HirTypeKind::Long => Some(HirLiteral::Long(0)),
        HirTypeKind::Float => Some(HirLiteral::Float(0.0)),
        HirTypeKind::Double => Some(HirLiteral::Double(0.0)),
        _ => None,
    }
}

/// Rewrites that discard an operand only apply to expressions that cannot
/// have side effects.
fn is_pure(expr: &Rc<HirExpr>) -> bool {
    matches!(
        expr.kind,
        HirExprKind::Literal(_) | HirExprKind::Local(_)
    )
}
