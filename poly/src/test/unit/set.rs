use std::collections::BTreeMap;

use crate::{Constraint, LinExpr, Polyhedron, Set, Var};

fn interval(lo: i64, hi: i64) -> Polyhedron {
    Polyhedron::from_constraints([Constraint::ge(LinExpr::var("i"), lo), Constraint::le(LinExpr::var("i"), hi)])
}

fn at(i: i64) -> BTreeMap<Var, i64> {
    BTreeMap::from([(Var::new("i"), i)])
}

#[test]
fn test_subtract_interval() {
    let diff = Set::from_poly(interval(0, 9)).subtract_poly(&interval(3, 5));
    for i in 0..10 {
        assert_eq!(diff.contains(&at(i)), !(3..=5).contains(&i), "point {i}");
    }
}

#[test]
fn test_subtract_equality() {
    let eq = Polyhedron::from_constraints([Constraint::eq(LinExpr::var("i"), 4)]);
    let diff = Set::from_poly(interval(0, 9)).subtract_poly(&eq);
    assert!(!diff.contains(&at(4)));
    assert!(diff.contains(&at(3)));
    assert!(diff.contains(&at(5)));
}

#[test]
fn test_subset_and_emptiness() {
    let small = Set::from_poly(interval(2, 3));
    let big = Set::from_poly(interval(0, 9));
    assert!(small.is_subset(&big));
    assert!(!big.is_subset(&small));
    assert!(Set::from_poly(interval(4, 2)).is_empty());
}

#[test]
fn test_union_dedups_parts() {
    let a = Set::from_poly(interval(0, 1));
    assert_eq!(a.union(&a).parts().len(), 1);
}
