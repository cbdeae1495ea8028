//! Affine equalities and inequalities.

use std::collections::BTreeMap;
use std::fmt;

use smallvec::{SmallVec, smallvec};

use crate::arith::floor_div;
use crate::expr::LinExpr;
use crate::var::Var;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstraintKind {
    /// `expr = 0`
    Eq,
    /// `expr >= 0`
    Ge,
}

/// A single affine constraint `expr = 0` or `expr >= 0`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Constraint {
    expr: LinExpr,
    kind: ConstraintKind,
}

/// Outcome of normalising a constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// Holds for every assignment.
    True,
    /// Holds for no integer assignment.
    False,
    Constraint(Constraint),
}

impl Constraint {
    pub fn eq_zero(expr: LinExpr) -> Self {
        Self { expr, kind: ConstraintKind::Eq }
    }

    pub fn ge_zero(expr: LinExpr) -> Self {
        Self { expr, kind: ConstraintKind::Ge }
    }

    /// `lhs = rhs`
    pub fn eq(lhs: impl Into<LinExpr>, rhs: impl Into<LinExpr>) -> Self {
        Self::eq_zero(lhs.into() - rhs.into())
    }

    /// `lhs >= rhs`
    pub fn ge(lhs: impl Into<LinExpr>, rhs: impl Into<LinExpr>) -> Self {
        Self::ge_zero(lhs.into() - rhs.into())
    }

    /// `lhs <= rhs`
    pub fn le(lhs: impl Into<LinExpr>, rhs: impl Into<LinExpr>) -> Self {
        Self::ge_zero(rhs.into() - lhs.into())
    }

    /// `lhs < rhs`
    pub fn lt(lhs: impl Into<LinExpr>, rhs: impl Into<LinExpr>) -> Self {
        Self::ge_zero(rhs.into() - lhs.into() - 1)
    }

    /// `lhs > rhs`
    pub fn gt(lhs: impl Into<LinExpr>, rhs: impl Into<LinExpr>) -> Self {
        Self::ge_zero(lhs.into() - rhs.into() - 1)
    }

    pub fn expr(&self) -> &LinExpr {
        &self.expr
    }

    pub fn kind(&self) -> ConstraintKind {
        self.kind
    }

    pub fn is_equality(&self) -> bool {
        self.kind == ConstraintKind::Eq
    }

    pub fn involves(&self, var: &Var) -> bool {
        self.expr.involves(var)
    }

    /// Divide by the coefficient gcd, tightening the constant of an
    /// inequality to the integer hull and detecting trivial outcomes.
    pub fn normalize(self) -> Normalized {
        let g = self.expr.coeff_gcd();
        if g == 0 {
            let c = self.expr.constant_term();
            let holds = match self.kind {
                ConstraintKind::Eq => c == 0,
                ConstraintKind::Ge => c >= 0,
            };
            return if holds { Normalized::True } else { Normalized::False };
        }

        let c = self.expr.constant_term();
        match self.kind {
            ConstraintKind::Eq => {
                if c % g != 0 {
                    return Normalized::False;
                }
                let mut expr = self.expr.exact_div(g).unwrap_or(self.expr);
                if expr.terms().next().is_some_and(|(_, coeff)| coeff < 0) {
                    expr = -expr;
                }
                Normalized::Constraint(Self::eq_zero(expr))
            }
            ConstraintKind::Ge => {
                let linear = self.expr.linear_part();
                let expr = match linear.exact_div(g) {
                    Some(scaled) => scaled.add_constant(floor_div(c, g)),
                    None => self.expr,
                };
                Normalized::Constraint(Self::ge_zero(expr))
            }
        }
    }

    /// Integer complement as a disjunction of constraints.
    pub fn negate(&self) -> SmallVec<[Constraint; 2]> {
        match self.kind {
            ConstraintKind::Ge => smallvec![Self::ge_zero(-&self.expr - LinExpr::constant(1))],
            ConstraintKind::Eq => smallvec![
                Self::ge_zero(self.expr.clone() - 1),
                Self::ge_zero(-&self.expr - LinExpr::constant(1)),
            ],
        }
    }

    pub fn substitute(&self, var: &Var, by: &LinExpr) -> Self {
        Self { expr: self.expr.substitute(var, by), kind: self.kind }
    }

    pub fn substitute_all(&self, map: &BTreeMap<Var, LinExpr>) -> Self {
        Self { expr: self.expr.substitute_all(map), kind: self.kind }
    }

    pub fn rename(&self, f: impl Fn(&Var) -> Option<Var>) -> Self {
        Self { expr: self.expr.rename(f), kind: self.kind }
    }

    /// `None` when a variable is unassigned.
    pub fn eval(&self, env: &BTreeMap<Var, i64>) -> Option<bool> {
        let value = self.expr.eval(env)?;
        Some(match self.kind {
            ConstraintKind::Eq => value == 0,
            ConstraintKind::Ge => value >= 0,
        })
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ConstraintKind::Eq => write!(f, "{} = 0", self.expr),
            ConstraintKind::Ge => write!(f, "{} >= 0", self.expr),
        }
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
