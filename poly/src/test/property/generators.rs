//! Generators for property-based testing of the polyhedral layer.

use proptest::prelude::*;

use crate::{Constraint, LinExpr, Polyhedron};

/// Variables used by generated constraints.
pub const VARS: [&str; 3] = ["x", "y", "z"];

/// Small affine expression over [`VARS`].
pub fn arb_expr() -> impl Strategy<Value = LinExpr> {
    (prop::collection::vec(-3i64..=3, VARS.len()), -6i64..=6)
        .prop_map(|(coeffs, constant)| LinExpr::from_terms(VARS.iter().copied().zip(coeffs), constant))
}

pub fn arb_constraint() -> impl Strategy<Value = Constraint> {
    prop_oneof![
        4 => arb_expr().prop_map(Constraint::ge_zero),
        1 => arb_expr().prop_map(Constraint::eq_zero),
    ]
}

/// Polyhedron with a few random constraints intersected with the box `[-4, 4]^3`.
pub fn arb_boxed_polyhedron() -> impl Strategy<Value = Polyhedron> {
    prop::collection::vec(arb_constraint(), 1..4).prop_map(|constraints| {
        let bounds = VARS.iter().flat_map(|v| [Constraint::ge(LinExpr::var(*v), -4), Constraint::le(LinExpr::var(*v), 4)]);
        Polyhedron::from_constraints(constraints.into_iter().chain(bounds))
    })
}
