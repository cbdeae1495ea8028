use std::collections::BTreeMap;

use test_case::test_case;

use crate::arith::{ceil_div, floor_div, pmod};
use crate::{Constraint, LinExpr, Var};

// =============================================================================
// Arithmetic helpers
// =============================================================================

#[test_case(7, 2, 3, 4; "positive")]
#[test_case(-7, 2, -4, -3; "negative")]
#[test_case(-8, 4, -2, -2; "exact")]
#[test_case(0, 5, 0, 0; "zero")]
fn test_floor_ceil_div(n: i64, d: i64, floor: i64, ceil: i64) {
    assert_eq!(floor_div(n, d), floor);
    assert_eq!(ceil_div(n, d), ceil);
}

#[test]
fn test_pmod_is_non_negative() {
    assert_eq!(pmod(-1, 32), 31);
    assert_eq!(pmod(33, 32), 1);
}

// =============================================================================
// LinExpr
// =============================================================================

#[test]
fn test_zero_coefficients_are_dropped() {
    let i = Var::new("i");
    let expr: LinExpr = LinExpr::var(&i) - LinExpr::var(&i) + 3;
    assert_eq!(expr, LinExpr::constant(3));
    assert!(!expr.involves(&i));
}

#[test]
fn test_substitute_scales_replacement() {
    let i = Var::new("i");
    let j = Var::new("j");
    // 2*i + 1 with i := j - 3  ==>  2*j - 5
    let expr: LinExpr = LinExpr::term(&i, 2) + 1;
    let result = expr.substitute(&i, &(LinExpr::var(&j) - 3));
    assert_eq!(result, LinExpr::term(&j, 2) - 5);
}

#[test]
fn test_eval_requires_full_assignment() {
    let expr = LinExpr::from_terms([("i", 3), ("N", -1)], 2);
    let mut env = BTreeMap::new();
    env.insert(Var::new("i"), 4);
    assert_eq!(expr.eval(&env), None);
    env.insert(Var::new("N"), 10);
    assert_eq!(expr.eval(&env), Some(4));
}

#[test]
fn test_display_is_readable() {
    let expr = LinExpr::from_terms([("i", 32), ("j", -1)], -5);
    assert_eq!(expr.to_string(), "32*i - j - 5");
    assert_eq!(LinExpr::zero().to_string(), "0");
    assert_eq!(LinExpr::term("x", -1).to_string(), "-x");
}

#[test]
fn test_exact_div() {
    let expr = LinExpr::from_terms([("i", 4)], 8);
    assert_eq!(expr.exact_div(4), Some(LinExpr::from_terms([("i", 1)], 2)));
    assert_eq!(expr.exact_div(3), None);
}

// =============================================================================
// Constraint normalisation
// =============================================================================

#[test]
fn test_inequality_is_tightened() {
    // 2*i - 3 >= 0  ==>  i - 2 >= 0
    let c = Constraint::ge_zero(LinExpr::term("i", 2) - 3);
    match c.normalize() {
        crate::constraint::Normalized::Constraint(c) => assert_eq!(*c.expr(), LinExpr::var("i") - 2),
        other => panic!("unexpected normalisation {other:?}"),
    }
}

#[test]
fn test_equality_without_integer_solution() {
    let c = Constraint::eq_zero(LinExpr::term("i", 2) - 3);
    assert_eq!(c.normalize(), crate::constraint::Normalized::False);
}
