//! Property tests for projection and normalisation.
//!
//! Every check enumerates the integer points of the `[-4, 4]^3` box, so the
//! properties are exact statements about integer sets.

use std::collections::BTreeMap;

use proptest::prelude::*;

use crate::constraint::Normalized;
use crate::test::property::generators::*;
use crate::{Set, Var};

fn box_points() -> impl Iterator<Item = BTreeMap<Var, i64>> {
    (-4..=4).flat_map(|x| {
        (-4..=4).flat_map(move |y| {
            (-4..=4).map(move |z| BTreeMap::from([(Var::new("x"), x), (Var::new("y"), y), (Var::new("z"), z)]))
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Normalisation never changes the integer points of a constraint.
    #[test]
    fn normalize_preserves_points(c in arb_constraint()) {
        let normalized = c.clone().normalize();
        for point in box_points() {
            let before = c.eval(&point).unwrap_or(false);
            let after = match &normalized {
                Normalized::True => true,
                Normalized::False => false,
                Normalized::Constraint(n) => n.eval(&point).unwrap_or(false),
            };
            prop_assert_eq!(before, after, "constraint {:?} at {:?}", c, point);
        }
    }

    /// The projection of every point of a polyhedron lies in its projection.
    #[test]
    fn projection_is_sound(poly in arb_boxed_polyhedron()) {
        let projected = poly.project_out([Var::new("z")].iter());
        for point in box_points().filter(|p| poly.contains(p)) {
            let mut shadow = point.clone();
            shadow.remove(&Var::new("z"));
            prop_assert!(projected.contains(&shadow), "{:?} lost {:?}", projected, shadow);
        }
    }

    /// A polyhedron proved empty has no integer point.
    #[test]
    fn emptiness_is_sound(poly in arb_boxed_polyhedron()) {
        if poly.is_empty() {
            prop_assert!(box_points().all(|p| !poly.contains(&p)));
        }
    }

    /// Set difference removes exactly the points of the subtrahend.
    #[test]
    fn subtraction_is_exact(a in arb_boxed_polyhedron(), b in arb_boxed_polyhedron()) {
        let diff = Set::from_poly(a.clone()).subtract_poly(&b);
        for point in box_points() {
            let expected = a.contains(&point) && !b.contains(&point);
            prop_assert_eq!(diff.contains(&point), expected);
        }
    }
}
