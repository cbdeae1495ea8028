//! Statement iterators in terms of the generated loop coordinates.

use std::collections::BTreeMap;

use tessera_ir::Statement;
use tessera_poly::{LinExpr, Polyhedron, Var};

use crate::error::*;

/// Solve the equalities of `relation` for every iterator of `stmt`.
///
/// Pivots only on unit coefficients, so each solution stays integral.
/// Fails on the first iterator no equality determines.
pub fn invert_iterators(stmt: &Statement, relation: &Polyhedron) -> Result<BTreeMap<Var, LinExpr>> {
    let mut equalities: Vec<LinExpr> =
        relation.constraints().iter().filter(|c| c.is_equality()).map(|c| c.expr().clone()).collect();
    let mut pending: Vec<&Var> = stmt.iterators.iter().collect();
    let mut solved: BTreeMap<Var, LinExpr> = BTreeMap::new();

    while !pending.is_empty() {
        let pivot = equalities
            .iter()
            .enumerate()
            .find_map(|(row, eq)| pending.iter().position(|v| eq.coeff(v).abs() == 1).map(|pos| (row, pos)));
        let Some((row, pos)) = pivot else {
            break;
        };
        let eq = equalities.swap_remove(row);
        let var = pending.remove(pos);
        // coeff * var + rest = 0 with coeff = +-1
        let value = eq.without(var).scale(-eq.coeff(var));
        for other in &mut equalities {
            *other = other.substitute(var, &value);
        }
        for other in solved.values_mut() {
            *other = other.substitute(var, &value);
        }
        solved.insert(var.clone(), value);
    }

    if let Some(var) = pending.first() {
        return NonInvertibleScheduleSnafu { stmt: stmt.id.clone(), iterator: (*var).clone() }.fail();
    }
    Ok(solved)
}
