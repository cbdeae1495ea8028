//! Bounding tiles of reference groups.

use std::collections::BTreeSet;
use std::fmt;

use itertools::Itertools;
use snafu::ResultExt;
use tessera_ir::{RefTag, Scop};
use tessera_poly::arith::{gcd, pmod};
use tessera_poly::{Constraint, LinExpr, Polyhedron, Var};

use crate::error::*;
use crate::kernel::{Coords, Kernel};

/// On-chip storage a tile lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum TileKind {
    Shared,
    Private,
}

impl TileKind {
    /// Coordinates a tile offset may depend on.
    pub fn coords(self) -> Coords {
        match self {
            Self::Shared => Coords::per_block(),
            Self::Private => Coords::per_thread(),
        }
    }
}

/// One dimension of a tile.
///
/// Global index `a` maps to local index `(a - shift) / stride - lo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileBound {
    pub size: i64,
    /// First element in stride units, over the parameters and the
    /// coordinates fixed for the tile.
    pub lo: LinExpr,
    pub stride: i64,
    pub shift: i64,
}

impl TileBound {
    /// Global index divided by the stride, when `index` follows the stride.
    pub fn reduce(&self, index: &LinExpr) -> Option<LinExpr> {
        (index.clone() - self.shift).exact_div(self.stride)
    }

    /// Local index of global `index`.
    pub fn localize(&self, index: &LinExpr) -> Option<LinExpr> {
        self.reduce(index).map(|reduced| reduced - self.lo.clone())
    }

    /// Global index of local coordinate `local`.
    pub fn globalize(&self, local: impl Into<LinExpr>) -> LinExpr {
        let local: LinExpr = local.into();
        (&self.lo + &local).scale(self.stride) + self.shift
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayTile {
    pub kind: TileKind,
    pub bounds: Vec<TileBound>,
}

impl ArrayTile {
    pub fn sizes(&self) -> Vec<i64> {
        self.bounds.iter().map(|b| b.size).collect()
    }

    /// Number of elements.
    pub fn len(&self) -> i64 {
        self.bounds.iter().map(|b| b.size).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Variables the tile offsets depend on.
    pub fn depends_on(&self) -> BTreeSet<Var> {
        self.bounds.iter().flat_map(|b| b.lo.vars().cloned()).collect()
    }
}

impl fmt::Display for ArrayTile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.kind, self.bounds.iter().map(|b| format!("{}: {}", b.lo, b.size)).join(", "))
    }
}

/// Common stride and shift of a set of index expressions: every value is
/// `stride * k + shift`.
pub fn detect_stride<'a>(exprs: impl IntoIterator<Item = &'a LinExpr>) -> (i64, i64) {
    let exprs: Vec<&LinExpr> = exprs.into_iter().collect();
    let stride = exprs.iter().fold(0, |g, e| gcd(g, e.coeff_gcd()));
    let Some(first) = exprs.first() else {
        return (1, 0);
    };
    if stride <= 1 {
        return (1, 0);
    }
    let shift = pmod(first.constant_term(), stride);
    if exprs.iter().all(|e| pmod(e.constant_term(), stride) == shift) { (stride, shift) } else { (1, 0) }
}

/// Rectangular tile covering every access of `refs` for one value of the
/// coordinates in `keep`. `None` when some dimension has no constant width.
pub fn compute_tile(
    kernel: &Kernel,
    scop: &Scop,
    refs: &[RefTag],
    n_index: usize,
    kind: TileKind,
    keep: &BTreeSet<Var>,
) -> Result<Option<ArrayTile>> {
    let mut accesses: Vec<(Polyhedron, &[LinExpr])> = Vec::with_capacity(refs.len());
    for tag in refs {
        let (stmt, reference) = scop.reference(tag).context(IrSnafu)?;
        accesses.push((kernel.relation(scop, &stmt.id, kind.coords())?, &reference.index));
    }

    let mut bounds = Vec::with_capacity(n_index);
    for d in 0..n_index {
        let (stride, shift) = detect_stride(accesses.iter().map(|(_, index)| &index[d]));
        let x = Var::coord("x", d);

        // Offset range relative to the first reference's lower bound.
        let mut range: Option<(LinExpr, i64, i64)> = None;
        for (relation, index) in &accesses {
            let Some(reduced) = (index[d].clone() - shift).exact_div(stride) else {
                return Ok(None);
            };
            let var_bounds = relation.clone().with(Constraint::eq(x.clone(), reduced)).bounds(&x, keep);
            let Some((lo, width)) = var_bounds.constant_width() else {
                return Ok(None);
            };
            range = Some(match range {
                None => (lo, 0, width),
                Some((base, min, max)) => {
                    let Some(offset) = (&lo - &base).as_constant() else {
                        return Ok(None);
                    };
                    (base, min.min(offset), max.max(offset + width))
                }
            });
        }
        let Some((base, min, max)) = range else {
            return Ok(None);
        };
        bounds.push(TileBound { size: max - min + 1, lo: base.add_constant(min), stride, shift });
    }
    Ok(Some(ArrayTile { kind, bounds }))
}
