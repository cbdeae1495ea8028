//! Symbolic bounds extracted from polyhedra.

use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;

use crate::arith::{ceil_div, floor_div, gcd};
use crate::constraint::Constraint;
use crate::expr::LinExpr;
use crate::polyhedron::Polyhedron;
use crate::var::Var;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoundKind {
    Lower,
    Upper,
}

/// One bound candidate on a variable: `ceil(expr / denom)` when used as a
/// lower bound, `floor(expr / denom)` when used as an upper bound.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bound {
    pub expr: LinExpr,
    pub denom: i64,
}

impl Bound {
    /// Reduce `expr / denom` by the common divisor. `denom` must be positive.
    pub fn new(expr: LinExpr, denom: i64) -> Self {
        debug_assert!(denom > 0);
        let g = gcd(gcd(expr.coeff_gcd(), expr.constant_term()), denom);
        if g > 1
            && let Some(reduced) = expr.exact_div(g)
        {
            return Self { expr: reduced, denom: denom / g };
        }
        Self { expr, denom }
    }

    pub fn exact(expr: LinExpr) -> Self {
        Self { expr, denom: 1 }
    }

    pub fn constant(value: i64) -> Self {
        Self::exact(LinExpr::constant(value))
    }

    /// The expression when no rounding is involved.
    pub fn as_affine(&self) -> Option<&LinExpr> {
        (self.denom == 1).then_some(&self.expr)
    }

    pub fn value(&self, kind: BoundKind) -> Option<i64> {
        let c = self.expr.as_constant()?;
        Some(match kind {
            BoundKind::Lower => ceil_div(c, self.denom),
            BoundKind::Upper => floor_div(c, self.denom),
        })
    }

    pub fn eval(&self, kind: BoundKind, env: &BTreeMap<Var, i64>) -> Option<i64> {
        let n = self.expr.eval(env)?;
        Some(match kind {
            BoundKind::Lower => ceil_div(n, self.denom),
            BoundKind::Upper => floor_div(n, self.denom),
        })
    }

    /// `var >= self` or `var <= self` as a constraint on `var`.
    pub fn constrain(&self, kind: BoundKind, var: &Var) -> Constraint {
        let scaled = LinExpr::term(var.clone(), self.denom);
        match kind {
            BoundKind::Lower => Constraint::ge(scaled, self.expr.clone()),
            BoundKind::Upper => Constraint::le(scaled, self.expr.clone()),
        }
    }

    pub fn add_constant(&self, value: i64) -> Self {
        Self::new(self.expr.clone() + value * self.denom, self.denom)
    }

    /// `self <= other` (upper) or `self >= other` (lower) for every point of
    /// `context`, checked on the rational relaxation.
    fn dominates(&self, other: &Bound, kind: BoundKind, context: &Polyhedron) -> bool {
        let lhs = self.expr.scale(other.denom);
        let rhs = other.expr.scale(self.denom);
        let constraint = match kind {
            BoundKind::Upper => Constraint::le(lhs, rhs),
            BoundKind::Lower => Constraint::ge(lhs, rhs),
        };
        context.implies(&constraint)
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.denom == 1 { write!(f, "{}", self.expr) } else { write!(f, "({})/{}", self.expr, self.denom) }
    }
}

impl fmt::Debug for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// All lower and upper bound candidates of one variable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarBounds {
    pub lower: Vec<Bound>,
    pub upper: Vec<Bound>,
}

impl VarBounds {
    pub fn is_bounded(&self) -> bool {
        !self.lower.is_empty() && !self.upper.is_empty()
    }

    /// A pair `(lower, upper)` of affine candidates whose difference is a
    /// constant, chosen to minimise that difference.
    pub fn constant_width(&self) -> Option<(LinExpr, i64)> {
        self.lower
            .iter()
            .filter_map(Bound::as_affine)
            .cartesian_product(self.upper.iter().filter_map(Bound::as_affine))
            .filter_map(|(lo, hi)| (hi - lo).as_constant().map(|width| (lo.clone(), width)))
            .min_by_key(|(_, width)| *width)
    }
}

/// Symbolic extremum of a variable over a union of polyhedra.
///
/// An upper bound is the maximum over pieces of the minimum over each
/// piece's candidates; a lower bound is the minimum over pieces of the
/// maximum. A piece without candidates is unbounded; no pieces at all means
/// the underlying set was empty.
#[derive(Clone, PartialEq, Eq)]
pub struct SymBound {
    kind: BoundKind,
    pieces: Vec<Vec<Bound>>,
}

impl SymBound {
    pub fn new(kind: BoundKind, pieces: Vec<Vec<Bound>>) -> Self {
        let mut pieces: Vec<Vec<Bound>> = pieces
            .into_iter()
            .map(|mut piece| {
                piece.sort();
                piece.dedup();
                piece
            })
            .collect();
        pieces.sort();
        pieces.dedup();
        Self { kind, pieces }
    }

    pub fn constant(kind: BoundKind, value: i64) -> Self {
        Self { kind, pieces: vec![vec![Bound::constant(value)]] }
    }

    pub fn unbounded(kind: BoundKind) -> Self {
        Self { kind, pieces: vec![Vec::new()] }
    }

    pub fn kind(&self) -> BoundKind {
        self.kind
    }

    pub fn pieces(&self) -> &[Vec<Bound>] {
        &self.pieces
    }

    pub fn is_unbounded(&self) -> bool {
        self.pieces.iter().any(Vec::is_empty)
    }

    /// No point contributed a bound: the set was empty.
    pub fn is_vacuous(&self) -> bool {
        self.pieces.is_empty()
    }

    /// The single candidate, when there is exactly one.
    pub fn as_single(&self) -> Option<&Bound> {
        match self.pieces.as_slice() {
            [piece] => match piece.as_slice() {
                [bound] => Some(bound),
                _ => None,
            },
            _ => None,
        }
    }

    /// The value, when every candidate is constant.
    pub fn as_constant(&self) -> Option<i64> {
        if self.pieces.is_empty() || self.is_unbounded() {
            return None;
        }
        let values: Option<Vec<i64>> = self
            .pieces
            .iter()
            .map(|piece| {
                let consts: Option<Vec<i64>> = piece.iter().map(|b| b.value(self.kind)).collect();
                let consts = consts?;
                match self.kind {
                    BoundKind::Upper => consts.into_iter().min(),
                    BoundKind::Lower => consts.into_iter().max(),
                }
            })
            .collect();
        let values = values?;
        match self.kind {
            BoundKind::Upper => values.into_iter().max(),
            BoundKind::Lower => values.into_iter().min(),
        }
    }

    /// A constant that is guaranteed to be at least (upper) / at most (lower)
    /// the symbolic value: some candidate of every piece is constant.
    pub fn constant_envelope(&self) -> Option<i64> {
        if self.pieces.is_empty() || self.is_unbounded() {
            return None;
        }
        let per_piece: Option<Vec<i64>> = self
            .pieces
            .iter()
            .map(|piece| {
                let consts = piece.iter().filter_map(|b| b.value(self.kind));
                match self.kind {
                    BoundKind::Upper => consts.min(),
                    BoundKind::Lower => consts.max(),
                }
            })
            .collect();
        let per_piece = per_piece?;
        match self.kind {
            BoundKind::Upper => per_piece.into_iter().max(),
            BoundKind::Lower => per_piece.into_iter().min(),
        }
    }

    pub fn add_constant(&self, value: i64) -> Self {
        Self::new(self.kind, self.pieces.iter().map(|p| p.iter().map(|b| b.add_constant(value)).collect()).collect())
    }

    /// Drop candidates that never decide the extremum under `context`.
    pub fn gist(&self, context: &Polyhedron) -> Self {
        let kind = self.kind;
        let pieces = self
            .pieces
            .iter()
            .map(|piece| {
                let mut kept: Vec<Bound> = Vec::new();
                for (i, bound) in piece.iter().enumerate() {
                    let redundant = piece.iter().enumerate().any(|(j, other)| {
                        j != i && other.dominates(bound, kind, context) && (j < i || !bound.dominates(other, kind, context))
                    });
                    if !redundant {
                        kept.push(bound.clone());
                    }
                }
                kept
            })
            .collect::<Vec<_>>();

        // A single-candidate piece dominated by another piece's single candidate is dropped.
        let mut result: Vec<Vec<Bound>> = Vec::new();
        for (i, piece) in pieces.iter().enumerate() {
            let dominated = match piece.as_slice() {
                [bound] => pieces.iter().enumerate().any(|(j, other)| match other.as_slice() {
                    [other] if j != i => {
                        // For an upper bound the larger piece wins.
                        let flipped = match kind {
                            BoundKind::Upper => BoundKind::Lower,
                            BoundKind::Lower => BoundKind::Upper,
                        };
                        other.dominates(bound, flipped, context) && (j < i || !bound.dominates(other, flipped, context))
                    }
                    _ => false,
                }),
                _ => false,
            };
            if !dominated {
                result.push(piece.clone());
            }
        }
        Self::new(kind, result)
    }

    pub fn eval(&self, env: &BTreeMap<Var, i64>) -> Option<i64> {
        let values: Option<Vec<i64>> = self
            .pieces
            .iter()
            .map(|piece| {
                let vals: Option<Vec<i64>> = piece.iter().map(|b| b.eval(self.kind, env)).collect();
                let vals = vals?;
                match self.kind {
                    BoundKind::Upper => vals.into_iter().min(),
                    BoundKind::Lower => vals.into_iter().max(),
                }
            })
            .collect();
        let values = values?;
        match self.kind {
            BoundKind::Upper => values.into_iter().max(),
            BoundKind::Lower => values.into_iter().min(),
        }
    }
}

impl fmt::Display for SymBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (outer, inner) = match self.kind {
            BoundKind::Upper => ("max", "min"),
            BoundKind::Lower => ("min", "max"),
        };
        let render = |piece: &Vec<Bound>| match piece.as_slice() {
            [] => "inf".to_string(),
            [bound] => bound.to_string(),
            _ => format!("{inner}({})", piece.iter().join(", ")),
        };
        match self.pieces.as_slice() {
            [] => f.write_str("empty"),
            [piece] => f.write_str(&render(piece)),
            _ => write!(f, "{outer}({})", self.pieces.iter().map(render).join(", ")),
        }
    }
}

impl fmt::Debug for SymBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
