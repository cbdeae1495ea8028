use std::collections::{BTreeMap, BTreeSet};

use crate::{Bound, BoundKind, Constraint, LinExpr, Polyhedron, Set, SymBound, Var};

#[test]
fn test_bound_reduces_common_factor() {
    let b = Bound::new(LinExpr::from_terms([("N", 4)], -8), 4);
    assert_eq!(b, Bound::exact(LinExpr::var("N") - 2));
}

#[test]
fn test_rounding_direction() {
    let b = Bound::new(LinExpr::constant(7), 2);
    assert_eq!(b.value(BoundKind::Lower), Some(4));
    assert_eq!(b.value(BoundKind::Upper), Some(3));
}

#[test]
fn test_constant_upper_bound_over_union() {
    let a = Var::new("a");
    let left = Polyhedron::from_constraints([Constraint::ge(LinExpr::var(&a), 0), Constraint::le(LinExpr::var(&a), 4)]);
    let right = Polyhedron::from_constraints([Constraint::ge(LinExpr::var(&a), 2), Constraint::le(LinExpr::var(&a), 7)]);
    let set = Set::from_poly(left).union(&Set::from_poly(right));
    let max = set.extremum(BoundKind::Upper, &a, &BTreeSet::new());
    assert_eq!(max.as_constant(), Some(7));
    let min = set.extremum(BoundKind::Lower, &a, &BTreeSet::new());
    assert_eq!(min.as_constant(), Some(0));
}

#[test]
fn test_gist_drops_dominated_candidate() {
    // min(N - 1, N + 5) under any context is N - 1.
    let bound = SymBound::new(
        BoundKind::Upper,
        vec![vec![Bound::exact(LinExpr::var("N") - 1), Bound::exact(LinExpr::var("N") + 5)]],
    );
    let gisted = bound.gist(&Polyhedron::universe());
    assert_eq!(gisted.as_single(), Some(&Bound::exact(LinExpr::var("N") - 1)));
}

#[test]
fn test_gist_uses_context() {
    // min(N - 1, 9) with N <= 5 is N - 1.
    let bound = SymBound::new(BoundKind::Upper, vec![vec![Bound::exact(LinExpr::var("N") - 1), Bound::constant(9)]]);
    let context = Polyhedron::from_constraints([Constraint::le(LinExpr::var("N"), 5)]);
    let gisted = bound.gist(&context);
    assert_eq!(gisted.as_single(), Some(&Bound::exact(LinExpr::var("N") - 1)));
    assert_eq!(gisted.eval(&BTreeMap::from([(Var::new("N"), 3)])), Some(2));
}

#[test]
fn test_unbounded_and_vacuous() {
    assert!(SymBound::unbounded(BoundKind::Upper).is_unbounded());
    assert!(SymBound::new(BoundKind::Upper, Vec::new()).is_vacuous());
    assert_eq!(SymBound::constant(BoundKind::Upper, 3).add_constant(1).as_constant(), Some(4));
}
