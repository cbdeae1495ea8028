//! Loop scanning over statement and copy instances.
//!
//! A [`Scope`] tracks what generated code knows at one nesting point: the
//! instances still executing, the constraints already enforced by the
//! enclosing loops and guards, and the expression each coordinate is
//! spelled as. [`Scope::enter`] turns one coordinate into a loop header
//! (or a single assignment) and returns the scope of its body.

use std::collections::{BTreeMap, BTreeSet};

use snafu::OptionExt;
use tessera_ir::{AstExpr, AstNode, AstOp, InstanceSet, LoopType, StmtId};
use tessera_poly::arith::pmod;
use tessera_poly::{BoundKind, Constraint, ConstraintKind, LinExpr, Polyhedron, Set, SymBound, Var};
use tracing::trace;

use crate::error::*;

/// How a coordinate is distributed over block or thread ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mapping {
    /// Every value runs in every block and thread.
    Plain,
    /// Only values congruent to `id` modulo `size` run.
    Cyclic { id: Var, size: i64, style: Style },
}

/// Shape of a cyclic loop that cannot be collapsed to one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    /// Step the coordinate itself by the id count.
    Wrap,
    /// Iterate over the quotient; `scaled` keeps it multiplied by the id count.
    Quotient { scaled: bool },
}

/// Header produced for one coordinate.
#[derive(Debug, Clone, PartialEq)]
pub enum Header {
    /// At most one value; the body runs under `cond` when there is one.
    Fixed { cond: Option<AstExpr> },
    Loop { iterator: Var, init: AstExpr, cond: AstExpr, stride: i64 },
}

impl Header {
    pub fn wrap(self, body: AstNode, loop_type: LoopType) -> AstNode {
        if body.is_empty() {
            return body;
        }
        match self {
            Self::Fixed { cond } => AstNode::guarded(cond, body),
            Self::Loop { iterator, init, cond, stride } => {
                AstNode::For { iterator, init, cond, stride, body: Box::new(body), loop_type }
            }
        }
    }
}

/// What is known at one point of the generated code.
#[derive(Debug, Clone)]
pub struct Scope {
    /// Instances still executing, per statement.
    pub stmts: BTreeMap<StmtId, Set>,
    /// Constraints enforced by the enclosing code, over `outer`.
    pub known: Polyhedron,
    /// Variables the generated code may refer to.
    pub outer: BTreeSet<Var>,
    /// Spelling of every coordinate in `outer`; parameters are absent and
    /// print as themselves.
    pub names: BTreeMap<Var, AstExpr>,
}

impl Scope {
    pub fn new(params: BTreeSet<Var>, context: Polyhedron) -> Self {
        Self { stmts: BTreeMap::new(), known: context, outer: params, names: BTreeMap::new() }
    }

    pub fn expr(&self, expr: &LinExpr) -> AstExpr {
        AstExpr::from_lin(expr, &self.names)
    }

    pub fn bound_expr(&self, bound: &SymBound) -> Option<AstExpr> {
        AstExpr::from_sym_bound(bound, &self.names)
    }

    pub fn assume(&mut self, constraints: impl IntoIterator<Item = Constraint>) {
        self.known = std::mem::take(&mut self.known).with_all(constraints);
    }

    pub fn introduce(&mut self, var: Var, name: AstExpr) {
        self.outer.insert(var.clone());
        self.names.insert(var, name);
    }

    /// Pin `var` to `value`, spelled through the current names.
    pub fn fix(&mut self, var: &Var, value: LinExpr) {
        let name = self.expr(&value);
        self.assume([Constraint::eq(var.clone(), value)]);
        self.introduce(var.clone(), name);
    }

    /// Scope restricted to the instances of `filter`.
    pub fn narrow(&self, filter: &InstanceSet) -> Scope {
        let stmts = self
            .stmts
            .iter()
            .filter_map(|(stmt, set)| {
                let part = filter.get(stmt)?;
                let narrowed = set.intersect(part);
                (!narrowed.is_empty()).then(|| (stmt.clone(), narrowed))
            })
            .collect();
        Scope { stmts, ..self.clone() }
    }

    /// Union of the instances of every statement.
    pub fn instances(&self) -> Set {
        let mut all = Set::empty();
        for set in self.stmts.values() {
            for part in set.parts() {
                all.add_part(part.clone());
            }
        }
        all
    }

    /// Largest value `var` takes under `known`.
    pub fn upper_value(&self, var: &Var) -> Option<i64> {
        self.known.bounds(var, &BTreeSet::new()).upper.iter().filter_map(|b| b.value(BoundKind::Upper)).min()
    }

    /// Condition selecting `set` among the points `known` allows; `None`
    /// when nothing needs checking.
    pub fn condition(&self, set: &Set) -> Option<AstExpr> {
        let mut disjuncts = Vec::new();
        for part in set.parts().iter().filter(|p| !p.is_empty()) {
            let remaining = part.project_onto(&self.outer).gist(&self.known);
            let conjuncts = remaining.constraints().iter().map(|c| constraint_expr(c, &self.names));
            match AstExpr::and_all(conjuncts) {
                Some(cond) => disjuncts.push(cond),
                None => return None,
            }
        }
        Some(disjuncts.into_iter().reduce(|a, b| AstExpr::op(AstOp::Or, vec![a, b])).unwrap_or(AstExpr::Int(0)))
    }

    /// Largest per-iteration range of `var` over `instances`, when every
    /// part has a constant one, with the lower end when there is a single
    /// part.
    fn width(&self, instances: &Set, var: &Var) -> Option<(i64, Option<LinExpr>)> {
        let params: BTreeSet<Var> = self.outer.iter().filter(|v| !v.is_internal()).cloned().collect();
        let parts: Vec<&Polyhedron> = instances.parts().iter().filter(|p| !p.is_empty()).collect();
        let mut widest: Option<(i64, Option<LinExpr>)> = None;
        for part in &parts {
            let (lo, width) = part.intersect(&self.known).bounds(var, &params).constant_width()?;
            let start = (parts.len() == 1).then_some(lo);
            widest = Some(match widest {
                Some((w, _)) if w >= width => (w, None),
                _ => (width, start),
            });
        }
        widest
    }

    /// Header scanning `coord` over `instances` and the scope of its body;
    /// `None` when there is nothing to scan.
    pub fn enter(&self, instances: &Set, coord: &Var, iterator: Var, mapping: Mapping) -> Result<Option<(Header, Scope)>> {
        let lower = instances.extremum(BoundKind::Lower, coord, &self.outer).gist(&self.known);
        let upper = instances.extremum(BoundKind::Upper, coord, &self.outer).gist(&self.known);
        if lower.is_vacuous() || upper.is_vacuous() {
            return Ok(None);
        }
        let lo = self.bound_expr(&lower).context(UnboundedLoopSnafu { coord: coord.clone() })?;
        let hi = self.bound_expr(&upper).context(UnboundedLoopSnafu { coord: coord.clone() })?;
        let (width, start) = self.width(instances, coord).map_or((None, None), |(w, start)| (Some(w), start));
        trace!(%coord, %lo, %hi, ?width, "scan");

        let mut inner = self.clone();
        let range = || range_constraints(&lower, coord).into_iter().chain(range_constraints(&upper, coord));

        let (id, size, style) = match mapping {
            Mapping::Plain => {
                if width == Some(0)
                    && let Some(value) = start
                {
                    inner.fix(coord, value);
                    return Ok(Some((Header::Fixed { cond: None }, inner)));
                }
                inner.introduce(coord.clone(), AstExpr::Id(iterator.clone()));
                inner.assume(range());
                let cond = AstExpr::cmp(AstOp::Le, AstExpr::Id(iterator.clone()), hi);
                return Ok(Some((Header::Loop { iterator, init: lo, cond, stride: 1 }, inner)));
            }
            Mapping::Cyclic { id, size, style } => (id, size, style),
        };

        let id_expr = self.names.get(&id).cloned().unwrap_or_else(|| AstExpr::Id(id.clone()));
        let aligned =
            lo.as_int().filter(|l| pmod(*l, size) == 0 && self.upper_value(&id).is_some_and(|max| max < size));
        let first = match aligned {
            Some(l) => AstExpr::add(id_expr.clone(), AstExpr::Int(l)),
            None => AstExpr::add(lo.clone(), AstExpr::pdiv_r(AstExpr::sub(id_expr.clone(), lo.clone()), size)),
        };

        if width.is_some_and(|w| w < size) {
            let cond = match aligned {
                Some(l) => {
                    inner.fix(coord, LinExpr::var(&id) + l);
                    let implied = match upper.pieces() {
                        [piece] => piece.iter().all(|b| inner.known.implies(&b.constrain(BoundKind::Upper, coord))),
                        _ => false,
                    };
                    inner.assume(range());
                    (!implied).then(|| AstExpr::cmp(AstOp::Le, first, hi))
                }
                None => {
                    inner.introduce(coord.clone(), first.clone());
                    inner.assume(range());
                    Some(AstExpr::cmp(AstOp::Le, first, hi))
                }
            };
            return Ok(Some((Header::Fixed { cond }, inner)));
        }

        inner.assume(range());
        let it = AstExpr::Id(iterator.clone());
        let header = match style {
            Style::Wrap => {
                inner.introduce(coord.clone(), it.clone());
                Header::Loop { iterator, init: first, cond: AstExpr::cmp(AstOp::Le, it, hi), stride: size }
            }
            Style::Quotient { scaled: false } => {
                inner.introduce(coord.clone(), AstExpr::add(AstExpr::mul(AstExpr::Int(size), it.clone()), id_expr.clone()));
                let init = AstExpr::cdiv_q(AstExpr::sub(lo, id_expr.clone()), size);
                let cond = AstExpr::cmp(AstOp::Le, it, AstExpr::fdiv_q(AstExpr::sub(hi, id_expr), size));
                Header::Loop { iterator, init, cond, stride: 1 }
            }
            Style::Quotient { scaled: true } => {
                inner.introduce(coord.clone(), AstExpr::add(it.clone(), id_expr.clone()));
                let init = AstExpr::mul(AstExpr::Int(size), AstExpr::cdiv_q(AstExpr::sub(lo, id_expr.clone()), size));
                let cond = AstExpr::cmp(AstOp::Le, it, AstExpr::sub(hi, id_expr));
                Header::Loop { iterator, init, cond, stride: size }
            }
        };
        Ok(Some((header, inner)))
    }
}

/// Constraints on `var` implied by a bound with a single piece.
fn range_constraints(bound: &SymBound, var: &Var) -> Vec<Constraint> {
    match bound.pieces() {
        [piece] => piece.iter().map(|b| b.constrain(bound.kind(), var)).collect(),
        _ => Vec::new(),
    }
}

/// `lhs >= rhs` (or `==`) with positive coefficients on both sides.
pub fn constraint_expr(constraint: &Constraint, names: &BTreeMap<Var, AstExpr>) -> AstExpr {
    let expr = constraint.expr();
    let mut pos = LinExpr::zero();
    let mut neg = LinExpr::zero();
    for (var, coeff) in expr.terms() {
        if coeff > 0 {
            pos = pos + LinExpr::term(var.clone(), coeff);
        } else {
            neg = neg + LinExpr::term(var.clone(), -coeff);
        }
    }
    let k = expr.constant_term();
    let (lhs, rhs, op) = match (constraint.kind(), pos.is_zero()) {
        (ConstraintKind::Eq, false) => (pos, neg - k, AstOp::Eq),
        (ConstraintKind::Eq, true) => (neg, pos + k, AstOp::Eq),
        (ConstraintKind::Ge, false) => (pos, neg - k, AstOp::Ge),
        (ConstraintKind::Ge, true) => (neg, pos + k, AstOp::Le),
    };
    AstExpr::cmp(op, AstExpr::from_lin(&lhs, names), AstExpr::from_lin(&rhs, names))
}

/// Loop iterator spelling of schedule dimension `depth`.
pub fn loop_name(depth: usize) -> Var {
    Var::new(format!("c{depth}"))
}

/// Spelling of a block or thread id: the coordinate name without its dot.
pub fn id_name(id: &Var) -> Var {
    Var::new(id.to_string().replace('.', ""))
}
