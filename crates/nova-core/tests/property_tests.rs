//! Property tests for the promotion total order, `common_super_type`
//! algebra, folding and assignability.

use nova_core::hir::{
    HirBinary, HirBinaryOp, HirBlock, HirDecl, HirExpr, HirExprKind, HirFunction,
    HirFunctionKind, HirLiteral, HirModule, HirReturn, HirStmt, HirType,
};
use nova_core::optimizer::{ConstantFoldingPass, HirPass};
use nova_core::sema::{common_super_type, NovaType, NumericKind, TypeCompatibility};
use nova_core::span::Span;
use proptest::prelude::*;
use std::rc::Rc;

fn numeric_kind() -> impl Strategy<Value = NumericKind> {
    prop_oneof![
        Just(NumericKind::Int),
        Just(NumericKind::Long),
        Just(NumericKind::Float),
        Just(NumericKind::Double),
    ]
}

fn simple_type() -> impl Strategy<Value = NovaType> {
    prop_oneof![
        numeric_kind().prop_map(NovaType::Numeric),
        Just(NovaType::Boolean),
        Just(NovaType::Char),
        Just(NovaType::String),
        Just(NovaType::Unit),
        Just(NovaType::Any),
        numeric_kind().prop_map(|k| NovaType::nullable(NovaType::Numeric(k))),
        numeric_kind().prop_map(|k| NovaType::list_of(NovaType::Numeric(k))),
    ]
}

fn fold_return(expr: Rc<HirExpr>) -> Rc<HirExpr> {
    let body = Rc::new(HirStmt::Block(HirBlock {
        statements: vec![Rc::new(HirStmt::Return(HirReturn {
            value: Some(expr),
            span: Span::synthetic(),
        }))],
        span: Span::synthetic(),
    }));
    let module = HirModule::new(
        "prop",
        vec![Rc::new(HirDecl::Function(HirFunction {
            name: "prop".to_string(),
            kind: HirFunctionKind::Function,
            type_parameters: Vec::new(),
            parameters: Vec::new(),
            return_type: HirType::double(),
            body: Some(body),
            is_inline: false,
            span: Span::synthetic(),
        }))],
        Span::synthetic(),
    );
    let folded = ConstantFoldingPass.run(&module).expect("folding failed");
    let HirDecl::Function(function) = folded.declarations[0].as_ref() else {
        panic!();
    };
    let HirStmt::Block(block) = function.body.as_ref().unwrap().as_ref() else {
        panic!();
    };
    let HirStmt::Return(ret) = block.statements[0].as_ref() else {
        panic!();
    };
    ret.value.as_ref().unwrap().clone()
}

proptest! {
    #[test]
    fn promotion_picks_the_higher_rank(a in numeric_kind(), b in numeric_kind()) {
        let expected = if a.rank() >= b.rank() { a } else { b };
        prop_assert_eq!(
            common_super_type(&NovaType::Numeric(a), &NovaType::Numeric(b)),
            NovaType::Numeric(expected)
        );
    }

    #[test]
    fn common_super_type_is_commutative(a in simple_type(), b in simple_type()) {
        prop_assert_eq!(common_super_type(&a, &b), common_super_type(&b, &a));
    }

    #[test]
    fn common_super_type_is_idempotent(t in simple_type()) {
        prop_assert_eq!(common_super_type(&t, &t), t);
    }

    #[test]
    fn common_super_type_is_associative(
        a in simple_type(),
        b in simple_type(),
        c in simple_type(),
    ) {
        prop_assert_eq!(
            common_super_type(&common_super_type(&a, &b), &c),
            common_super_type(&a, &common_super_type(&b, &c))
        );
    }

    #[test]
    fn assignability_is_reflexive(t in simple_type()) {
        prop_assert!(TypeCompatibility::is_assignable(&t, &t));
    }

    #[test]
    fn everything_is_assignable_to_the_top_type(t in simple_type()) {
        prop_assert!(TypeCompatibility::is_assignable(&t, &NovaType::Any));
    }

    #[test]
    fn numeric_widening_follows_the_rank_order(a in numeric_kind(), b in numeric_kind()) {
        let assignable = TypeCompatibility::is_assignable(
            &NovaType::Numeric(a),
            &NovaType::Numeric(b),
        );
        prop_assert_eq!(assignable, a.rank() <= b.rank());
    }

    #[test]
    fn folding_int_double_addition_promotes(a in -1_000i32..1_000, b in -1_000.0f64..1_000.0) {
        let expr = HirExpr::new(
            HirExprKind::Binary(HirBinary {
                op: HirBinaryOp::Add,
                lhs: HirExpr::literal(HirLiteral::Int(a), HirType::int(), Span::synthetic()),
                rhs: HirExpr::literal(HirLiteral::Double(b), HirType::double(), Span::synthetic()),
            }),
            HirType::double(),
            Span::synthetic(),
        );
        let folded = fold_return(expr);
        prop_assert_eq!(
            folded.as_literal(),
            Some(&HirLiteral::Double(a as f64 + b))
        );
    }

    #[test]
    fn adding_zero_to_a_literal_is_the_identity(value in any::<i32>()) {
        let expr = HirExpr::new(
            HirExprKind::Binary(HirBinary {
                op: HirBinaryOp::Add,
                lhs: HirExpr::literal(HirLiteral::Int(value), HirType::int(), Span::synthetic()),
                rhs: HirExpr::literal(HirLiteral::Int(0), HirType::int(), Span::synthetic()),
            }),
            HirType::int(),
            Span::synthetic(),
        );
        let folded = fold_return(expr);
        prop_assert_eq!(folded.as_literal(), Some(&HirLiteral::Int(value)));
    }

    #[test]
    fn folded_integer_arithmetic_matches_wrapping_semantics(
        a in any::<i32>(),
        b in any::<i32>(),
    ) {
        let expr = HirExpr::new(
            HirExprKind::Binary(HirBinary {
                op: HirBinaryOp::Mul,
                lhs: HirExpr::literal(HirLiteral::Int(a), HirType::int(), Span::synthetic()),
                rhs: HirExpr::literal(HirLiteral::Int(b), HirType::int(), Span::synthetic()),
            }),
            HirType::int(),
            Span::synthetic(),
        );
        let folded = fold_return(expr);
        prop_assert_eq!(
            folded.as_literal(),
            Some(&HirLiteral::Int(a.wrapping_mul(b)))
        );
    }
}
