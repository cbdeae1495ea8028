//! Conjunctions of affine constraints.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use itertools::Itertools;
use tracing::trace;

use crate::bound::{Bound, VarBounds};
use crate::constraint::{Constraint, ConstraintKind, Normalized};
use crate::expr::LinExpr;
use crate::var::Var;

/// Upper limit on constraints produced by a single elimination step. Beyond
/// it the step keeps only the constraints not involving the variable, which
/// is a sound over-approximation.
const MAX_FM_CONSTRAINTS: usize = 4096;

/// A conjunction of affine constraints over named integer variables.
///
/// Which variables are set dimensions, parameters or existentials is decided
/// by the caller; every operation here is purely syntactic over names.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Polyhedron {
    constraints: Vec<Constraint>,
    infeasible: bool,
}

impl Polyhedron {
    pub fn universe() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self { constraints: Vec::new(), infeasible: true }
    }

    pub fn from_constraints(constraints: impl IntoIterator<Item = Constraint>) -> Self {
        let mut poly = Self::universe();
        for c in constraints {
            poly.add(c);
        }
        poly.simplify();
        poly
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Empty by construction, without running a projection.
    pub fn is_obviously_empty(&self) -> bool {
        self.infeasible
    }

    pub fn is_universe(&self) -> bool {
        !self.infeasible && self.constraints.is_empty()
    }

    pub fn add(&mut self, constraint: Constraint) {
        if self.infeasible {
            return;
        }
        match constraint.normalize() {
            Normalized::True => {}
            Normalized::False => self.set_infeasible(),
            Normalized::Constraint(c) => {
                if !self.constraints.contains(&c) {
                    self.constraints.push(c);
                }
            }
        }
    }

    pub fn with(mut self, constraint: Constraint) -> Self {
        self.add(constraint);
        self
    }

    pub fn with_all(mut self, constraints: impl IntoIterator<Item = Constraint>) -> Self {
        for c in constraints {
            self.add(c);
        }
        self.simplify();
        self
    }

    fn set_infeasible(&mut self) {
        self.infeasible = true;
        self.constraints.clear();
    }

    pub fn intersect(&self, other: &Polyhedron) -> Polyhedron {
        if self.infeasible || other.infeasible {
            return Self::empty();
        }
        self.clone().with_all(other.constraints.iter().cloned())
    }

    pub fn vars(&self) -> BTreeSet<Var> {
        self.constraints.iter().flat_map(|c| c.expr().vars().cloned()).collect()
    }

    pub fn involves(&self, var: &Var) -> bool {
        self.constraints.iter().any(|c| c.involves(var))
    }

    pub fn substitute(&self, var: &Var, by: &LinExpr) -> Polyhedron {
        if self.infeasible {
            return Self::empty();
        }
        Self::from_constraints(self.constraints.iter().map(|c| c.substitute(var, by)))
    }

    pub fn substitute_all(&self, map: &BTreeMap<Var, LinExpr>) -> Polyhedron {
        if self.infeasible {
            return Self::empty();
        }
        Self::from_constraints(self.constraints.iter().map(|c| c.substitute_all(map)))
    }

    pub fn rename(&self, f: impl Fn(&Var) -> Option<Var>) -> Polyhedron {
        if self.infeasible {
            return Self::empty();
        }
        Self::from_constraints(self.constraints.iter().map(|c| c.rename(&f)))
    }

    /// Merge parallel inequalities, detect equalities implied by opposite
    /// inequalities and trivially conflicting bounds.
    fn simplify(&mut self) {
        if self.infeasible {
            return;
        }

        // Canonical linear part: first coefficient positive.
        let canonical = |expr: &LinExpr| -> (LinExpr, i64) {
            let linear = expr.linear_part();
            if linear.terms().next().is_some_and(|(_, c)| c < 0) { (-linear, -1) } else { (linear, 1) }
        };

        let mut eqs: BTreeMap<LinExpr, i64> = BTreeMap::new();
        let mut ranges: BTreeMap<LinExpr, (Option<i64>, Option<i64>)> = BTreeMap::new();

        let constraints = std::mem::take(&mut self.constraints);
        for c in &constraints {
            let (key, sign) = canonical(c.expr());
            let constant = c.expr().constant_term();
            match c.kind() {
                ConstraintKind::Eq => {
                    // sign * key + constant = 0  =>  key = -sign * constant
                    let value = -sign * constant;
                    if let Some(prev) = eqs.insert(key, value)
                        && prev != value
                    {
                        self.set_infeasible();
                        return;
                    }
                }
                ConstraintKind::Ge => {
                    let entry = ranges.entry(key).or_insert((None, None));
                    if sign > 0 {
                        // key + constant >= 0  =>  key >= -constant
                        let lo = -constant;
                        entry.0 = Some(entry.0.map_or(lo, |prev| prev.max(lo)));
                    } else {
                        // -key + constant >= 0  =>  key <= constant
                        entry.1 = Some(entry.1.map_or(constant, |prev| prev.min(constant)));
                    }
                }
            }
        }

        let mut out = Vec::with_capacity(self.constraints.len());
        for (key, (lo, hi)) in ranges {
            if let Some(&value) = eqs.get(&key) {
                if lo.is_some_and(|lo| value < lo) || hi.is_some_and(|hi| value > hi) {
                    self.set_infeasible();
                    return;
                }
                continue;
            }
            match (lo, hi) {
                (Some(lo), Some(hi)) if lo > hi => {
                    self.set_infeasible();
                    return;
                }
                (Some(lo), Some(hi)) if lo == hi => {
                    eqs.insert(key, lo);
                }
                (lo, hi) => {
                    if let Some(lo) = lo {
                        out.push(Constraint::ge_zero(key.clone() - lo));
                    }
                    if let Some(hi) = hi {
                        out.push(Constraint::ge_zero(-key + hi));
                    }
                }
            }
        }
        let mut all: Vec<Constraint> = eqs.into_iter().map(|(key, value)| Constraint::eq_zero(key - value)).collect();
        all.extend(out);
        self.constraints = all;
    }

    /// Eliminate one variable. Returns the projection and whether it is
    /// exact over the integers.
    pub fn eliminate(&self, var: &Var) -> (Polyhedron, bool) {
        if self.infeasible || !self.involves(var) {
            return (self.clone(), true);
        }

        // Prefer an equality, the one with the smallest coefficient.
        let pivot = self
            .constraints
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_equality() && c.involves(var))
            .min_by_key(|(_, c)| c.expr().coeff(var).abs())
            .map(|(i, _)| i);

        if let Some(idx) = pivot {
            let eq = &self.constraints[idx];
            let c = eq.expr().coeff(var);
            let others = self.constraints.iter().enumerate().filter(|(i, _)| *i != idx).map(|(_, k)| k);
            if c.abs() == 1 {
                // var = -c * rest, since 1/c == c for unit c.
                let by = eq.expr().without(var).scale(-c);
                let result = Self::from_constraints(others.map(|k| k.substitute(var, &by)));
                return (result, true);
            }
            let sign = c.signum();
            let result = Self::from_constraints(others.map(|k| {
                let d = k.expr().coeff(var);
                if d == 0 {
                    return k.clone();
                }
                let expr = k.expr().scale(c.abs()) - eq.expr().scale(d * sign);
                match k.kind() {
                    ConstraintKind::Eq => Constraint::eq_zero(expr),
                    ConstraintKind::Ge => Constraint::ge_zero(expr),
                }
            }));
            return (result, false);
        }

        let mut lowers = Vec::new();
        let mut uppers = Vec::new();
        let mut rest = Vec::new();
        for c in &self.constraints {
            match c.expr().coeff(var) {
                0 => rest.push(c.clone()),
                k if k > 0 => lowers.push(c),
                _ => uppers.push(c),
            }
        }

        let mut exact = true;
        if lowers.len() * uppers.len() <= MAX_FM_CONSTRAINTS {
            for (lo, up) in lowers.iter().cartesian_product(uppers.iter()) {
                let cl = lo.expr().coeff(var);
                let cu = -up.expr().coeff(var);
                exact &= cl == 1 || cu == 1;
                rest.push(Constraint::ge_zero(lo.expr().scale(cu) + up.expr().scale(cl)));
            }
        } else {
            trace!(var = %var, pairs = lowers.len() * uppers.len(), "fourier-motzkin pair limit hit");
            exact = false;
        }
        (Self::from_constraints(rest), exact)
    }

    /// Choose the next variable to eliminate: unit equalities first, then
    /// the fewest Fourier–Motzkin pairs.
    fn pick(&self, candidates: &BTreeSet<Var>) -> Option<Var> {
        let unit_eq = self
            .constraints
            .iter()
            .filter(|c| c.is_equality())
            .flat_map(|c| c.expr().terms().filter(|(v, k)| k.abs() == 1 && candidates.contains(*v)).map(|(v, _)| v))
            .next();
        if let Some(var) = unit_eq {
            return Some(var.clone());
        }
        candidates
            .iter()
            .filter(|v| self.involves(v))
            .min_by_key(|v| {
                let (lo, up) = self.constraints.iter().fold((0usize, 0usize), |(lo, up), c| match c.expr().coeff(v) {
                    0 => (lo, up),
                    k if k > 0 => (lo + 1, up),
                    _ => (lo, up + 1),
                });
                lo * up
            })
            .cloned()
    }

    /// Eliminate every variable in `vars`, reporting exactness.
    pub fn project_out_exact<'a>(&self, vars: impl IntoIterator<Item = &'a Var>) -> (Polyhedron, bool) {
        let mut remaining: BTreeSet<Var> = vars.into_iter().cloned().collect();
        let mut poly = self.clone();
        let mut exact = true;
        while let Some(var) = poly.pick(&remaining) {
            let (next, step_exact) = poly.eliminate(&var);
            exact &= step_exact;
            remaining.remove(&var);
            poly = next;
            if poly.infeasible {
                break;
            }
        }
        (poly, exact)
    }

    pub fn project_out<'a>(&self, vars: impl IntoIterator<Item = &'a Var>) -> Polyhedron {
        self.project_out_exact(vars).0
    }

    /// Keep only constraints over `keep`, eliminating every other variable.
    pub fn project_onto(&self, keep: &BTreeSet<Var>) -> Polyhedron {
        let drop: Vec<Var> = self.vars().into_iter().filter(|v| !keep.contains(v)).collect();
        self.project_out(drop.iter())
    }

    /// Proved to contain no integer point.
    pub fn is_empty(&self) -> bool {
        if self.infeasible {
            return true;
        }
        let vars = self.vars();
        self.project_out(vars.iter()).infeasible
    }

    /// Every point satisfies `constraint` (checked by refuting its negation).
    pub fn implies(&self, constraint: &Constraint) -> bool {
        if self.infeasible {
            return true;
        }
        constraint.negate().into_iter().all(|neg| self.clone().with(neg).is_empty())
    }

    /// Drop the constraints of `self` already implied by `context`.
    pub fn gist(&self, context: &Polyhedron) -> Polyhedron {
        if self.infeasible {
            return Self::empty();
        }
        if context.infeasible {
            return Self::universe();
        }
        let mut kept = Vec::new();
        for c in &self.constraints {
            if !context.implies(c) {
                kept.push(c.clone());
            }
        }
        Self::from_constraints(kept)
    }

    /// Lower and upper bound candidates of `var` in terms of `keep`.
    pub fn bounds(&self, var: &Var, keep: &BTreeSet<Var>) -> VarBounds {
        let mut keep = keep.clone();
        keep.insert(var.clone());
        let projected = self.project_onto(&keep);
        let mut bounds = VarBounds::default();
        if projected.infeasible {
            return bounds;
        }
        for c in &projected.constraints {
            let k = c.expr().coeff(var);
            if k == 0 {
                continue;
            }
            let rest = c.expr().without(var);
            // k * var + rest (= | >=) 0
            let (lower, upper) = if k > 0 {
                (Some(Bound::new(-&rest, k)), c.is_equality().then(|| Bound::new(-&rest, k)))
            } else {
                (c.is_equality().then(|| Bound::new(rest.clone(), -k)), Some(Bound::new(rest.clone(), -k)))
            };
            bounds.lower.extend(lower);
            bounds.upper.extend(upper);
        }
        bounds.lower.sort();
        bounds.lower.dedup();
        bounds.upper.sort();
        bounds.upper.dedup();
        bounds
    }

    /// Membership of a point assigning every variable.
    pub fn contains(&self, point: &BTreeMap<Var, i64>) -> bool {
        !self.infeasible && self.constraints.iter().all(|c| c.eval(point).unwrap_or(false))
    }

    /// Fix the given variables to values, keeping the rest symbolic.
    pub fn fix(&self, values: &BTreeMap<Var, i64>) -> Polyhedron {
        let map: BTreeMap<Var, LinExpr> = values.iter().map(|(v, x)| (v.clone(), LinExpr::constant(*x))).collect();
        self.substitute_all(&map)
    }
}

impl fmt::Display for Polyhedron {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.infeasible {
            return f.write_str("{ false }");
        }
        write!(f, "{{ {} }}", self.constraints.iter().join(" and "))
    }
}

impl fmt::Debug for Polyhedron {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
