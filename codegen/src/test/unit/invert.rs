use tessera_poly::{Constraint, LinExpr, Polyhedron, Var};
use tessera_ir::Statement;

use crate::error::Error;
use crate::invert::invert_iterators;
use crate::test::helpers::box_domain;

fn stmt(iterators: &[&str]) -> Statement {
    let ranges: Vec<(&str, i64, i64)> = iterators.iter().map(|v| (*v, 0, 100)).collect();
    Statement::new("S", iterators.iter().map(Var::new).collect(), box_domain(&ranges))
}

#[test]
fn test_point_and_tile_give_the_iterator() {
    let relation = Polyhedron::from_constraints([
        Constraint::eq(Var::new("p.0"), LinExpr::var("i") - LinExpr::term("s.0", 32)),
        Constraint::ge(Var::new("p.0"), 0),
    ]);
    let solved = invert_iterators(&stmt(&["i"]), &relation).unwrap();
    assert_eq!(solved[&Var::new("i")], LinExpr::var("p.0") + LinExpr::term("s.0", 32));
}

#[test]
fn test_chained_equalities() {
    let relation = Polyhedron::from_constraints([
        Constraint::eq(Var::new("h.0"), Var::new("i")),
        Constraint::eq(Var::new("d.0"), LinExpr::var("j") - LinExpr::var("i")),
    ]);
    let solved = invert_iterators(&stmt(&["i", "j"]), &relation).unwrap();
    assert_eq!(solved[&Var::new("i")], LinExpr::var("h.0"));
    assert_eq!(solved[&Var::new("j")], LinExpr::var("d.0") + LinExpr::var("h.0"));
}

#[test]
fn test_missing_iterator_is_reported() {
    let relation = Polyhedron::from_constraints([Constraint::eq(Var::new("h.0"), Var::new("i"))]);
    let err = invert_iterators(&stmt(&["i", "j"]), &relation).unwrap_err();
    assert!(matches!(err, Error::NonInvertibleSchedule { ref iterator, .. } if *iterator == Var::new("j")), "{err}");
}

#[test]
fn test_non_unit_coefficient_is_not_inverted() {
    let relation = Polyhedron::from_constraints([Constraint::eq(Var::new("h.0"), LinExpr::term("i", 2))]);
    assert!(invert_iterators(&stmt(&["i"]), &relation).is_err());
}
