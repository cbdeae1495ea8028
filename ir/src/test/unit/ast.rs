use std::collections::BTreeMap;

use test_case::test_case;
use tessera_poly::{Bound, BoundKind, LinExpr, SymBound, Var};

use crate::{Annotation, AstExpr, AstNode, AstOp, StmtId};

fn env(pairs: &[(&str, i64)]) -> BTreeMap<Var, i64> {
    pairs.iter().map(|(v, x)| (Var::new(v), *x)).collect()
}

#[test]
fn test_folding() {
    let i = AstExpr::id("i");
    assert_eq!(AstExpr::add(i.clone(), AstExpr::Int(0)), i);
    assert_eq!(AstExpr::mul(AstExpr::Int(1), i.clone()), i);
    assert_eq!(AstExpr::mul(AstExpr::Int(3), AstExpr::Int(4)), AstExpr::Int(12));
    assert_eq!(AstExpr::neg(AstExpr::neg(i.clone())), i);
    assert_eq!(AstExpr::fdiv_q(AstExpr::Int(-7), 2), AstExpr::Int(-4));
    assert_eq!(AstExpr::min(vec![AstExpr::Int(3), AstExpr::Int(5)]), AstExpr::Int(3));
}

#[test]
fn test_from_lin_display() {
    let e = LinExpr::from_terms([("i", 2), ("n", -1)], 3);
    let ast = AstExpr::from_lin(&e, &BTreeMap::new());
    assert_eq!(ast.to_string(), "2 * i - n + 3");
    assert_eq!(ast.eval(&env(&[("i", 4), ("n", 1)])), Some(10));
}

#[test]
fn test_from_lin_substitutes() {
    let map = BTreeMap::from([(Var::new("i"), AstExpr::add(AstExpr::id("c0"), AstExpr::Int(1)))]);
    let ast = AstExpr::from_lin(&LinExpr::term("i", 2), &map);
    assert_eq!(ast.to_string(), "2 * (c0 + 1)");
}

#[test_case(BoundKind::Lower, 7, 4 ; "lower rounds up")]
#[test_case(BoundKind::Upper, 7, 3 ; "upper rounds down")]
#[test_case(BoundKind::Lower, -7, -3 ; "negative lower")]
#[test_case(BoundKind::Upper, -7, -4 ; "negative upper")]
fn test_from_bound_rounding(kind: BoundKind, n: i64, expected: i64) {
    let bound = Bound::new(LinExpr::var("n"), 2);
    let ast = AstExpr::from_bound(&bound, kind, &BTreeMap::new());
    assert_eq!(ast.eval(&env(&[("n", n)])), Some(expected));
}

#[test]
fn test_from_sym_bound() {
    let upper = SymBound::new(
        BoundKind::Upper,
        vec![vec![Bound::exact(LinExpr::var("n")), Bound::constant(9)]],
    );
    let ast = AstExpr::from_sym_bound(&upper, &BTreeMap::new()).unwrap();
    assert_eq!(ast.eval(&env(&[("n", 20)])), Some(9));
    assert_eq!(ast.eval(&env(&[("n", 4)])), Some(4));
    assert!(AstExpr::from_sym_bound(&SymBound::unbounded(BoundKind::Upper), &BTreeMap::new()).is_none());
}

#[test]
fn test_comparison_eval() {
    let cond = AstExpr::and_all([
        AstExpr::cmp(AstOp::Ge, AstExpr::id("t"), AstExpr::Int(0)),
        AstExpr::cmp(AstOp::Lt, AstExpr::id("t"), AstExpr::Int(10)),
    ])
    .unwrap();
    assert_eq!(cond.eval(&env(&[("t", 3)])), Some(1));
    assert_eq!(cond.eval(&env(&[("t", 10)])), Some(0));
    assert_eq!(cond.to_string(), "t >= 0 && t < 10");
}

#[test]
fn test_block_flattens_and_collects_annotations() {
    let stmt = AstNode::User {
        expr: AstExpr::id("S"),
        annotation: Annotation::Statement { stmt: StmtId::new("S"), ref2expr: BTreeMap::new() },
    };
    let tree = AstNode::block(vec![AstNode::sync(), AstNode::block(vec![stmt]), AstNode::Block(Vec::new())]);
    let AstNode::Block(nodes) = &tree else { panic!("expected block") };
    assert_eq!(nodes.len(), 2);
    let annotations = tree.annotations();
    assert!(matches!(annotations[0], Annotation::Sync));
    assert!(matches!(annotations[1], Annotation::Statement { .. }));
    assert!(AstNode::block(Vec::new()).is_empty());
}

#[test]
fn test_guarded_skips_trivial_condition() {
    let body = AstNode::sync();
    assert_eq!(AstNode::guarded(None, body.clone()), body);
    assert_eq!(AstNode::guarded(Some(AstExpr::Int(1)), body.clone()), body);
    assert!(matches!(AstNode::guarded(Some(AstExpr::id("p")), body), AstNode::If { .. }));
}
