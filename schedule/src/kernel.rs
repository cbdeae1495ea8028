//! Carved device kernels.

use std::collections::BTreeSet;

use snafu::{OptionExt, ResultExt};
use tessera_ir::error::MissingScheduleSnafu;
use tessera_ir::{BandMember, KernelId, Scop, StmtId};
use tessera_poly::{BoundKind, Constraint, LinExpr, Polyhedron, Set, SymBound, Var};

use crate::coords;
use crate::error::*;
use crate::group::{KernelVar, LocalArrayInfo};

/// Which coordinates a statement relation defines besides the host ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Coords {
    /// `e.k`: the affine value of every tiled member.
    pub values: bool,
    /// `s.k` for every tiled member.
    pub tiles: bool,
    /// `b.k` and `g.k` for the members mapped to blocks.
    pub blocks: bool,
    /// `p.k` for every tiled member.
    pub points: bool,
    /// `t.k` (and `r.k` when needed) for the members mapped to threads.
    pub threads: bool,
    /// `d.j` for the band members below the point band.
    pub deeper: bool,
}

impl Coords {
    pub fn host() -> Self {
        Self::default()
    }

    /// Coordinates fixed by one iteration of the shared tile loops.
    pub fn per_block() -> Self {
        Self { tiles: true, ..Self::default() }
    }

    /// Coordinates fixed for one thread inside one tile iteration.
    pub fn per_thread() -> Self {
        Self { tiles: true, points: true, threads: true, ..Self::default() }
    }

    pub fn all() -> Self {
        Self { values: true, tiles: true, blocks: true, points: true, threads: true, deeper: true }
    }
}

/// Per-value name of a tiled member's affine value.
pub fn value_coord(k: usize) -> Var {
    Var::coord("e", k)
}

#[derive(Debug, Clone)]
pub struct Kernel {
    pub id: KernelId,
    pub stmts: BTreeSet<StmtId>,
    /// Band members enclosing the kernel, executed on the host.
    pub host: Vec<BandMember>,
    /// Tiled members; empty for a kernel carved at a leaf.
    pub tile: Vec<BandMember>,
    pub tile_sizes: Vec<i64>,
    /// Configured grid sizes, one per member mapped to blocks.
    pub grid_sizes: Vec<i64>,
    /// Configured block sizes, one per member mapped to threads.
    pub block_sizes: Vec<i64>,
    /// Effective grid sizes.
    pub grid_dim: Vec<SymBound>,
    /// Effective block sizes.
    pub block_dim: Vec<SymBound>,
    /// Band members inside the kernel below the point band.
    pub deeper: Vec<BandMember>,
    /// Parameter and host values for which the kernel executes.
    pub context: Set,
    /// Launch condition: the grid holds at least one block.
    pub guard: Polyhedron,
    /// Some tiled member is parallel.
    pub parallel: bool,
    pub arrays: Vec<LocalArrayInfo>,
    pub vars: Vec<KernelVar>,
}

impl Kernel {
    pub fn tile_first(&self) -> usize {
        self.host.len()
    }

    pub fn tile_len(&self) -> usize {
        self.tile.len()
    }

    pub fn shared_len(&self) -> usize {
        self.tile_first() + self.tile_len()
    }

    pub fn n_grid(&self) -> usize {
        self.grid_sizes.len()
    }

    pub fn n_block(&self) -> usize {
        self.block_sizes.len()
    }

    pub fn block_ids(&self) -> Vec<Var> {
        (0..self.n_grid()).map(coords::block).collect()
    }

    pub fn thread_ids(&self) -> Vec<Var> {
        (0..self.n_block()).map(coords::thread).collect()
    }

    pub fn host_vars(&self) -> Vec<Var> {
        (0..self.tile_first()).map(coords::host).collect()
    }

    /// Name of the single space grouping the kernel's statements.
    pub fn space_name(&self) -> String {
        match self.stmts.iter().next() {
            Some(stmt) if self.stmts.len() == 1 => stmt.to_string(),
            _ => format!("kernel{}", self.id.0),
        }
    }

    /// Constraints common to every piece of the context.
    pub fn context_hull(&self) -> Polyhedron {
        hull(&self.context)
    }

    /// Thread dimension `k` distributes whole tiles without a quotient loop.
    pub fn thread_covers_tile(&self, k: usize) -> bool {
        self.tile_sizes[k] <= self.block_sizes[k]
    }

    /// Parameters plus host coordinates.
    pub fn outer_vars(&self, scop: &Scop) -> BTreeSet<Var> {
        let mut vars = scop.param_set();
        vars.extend(self.host_vars());
        vars
    }

    fn member_value(member: &BandMember, stmt: &StmtId, index: usize) -> Result<LinExpr> {
        member
            .value(stmt)
            .cloned()
            .context(MissingScheduleSnafu { stmt: stmt.clone(), member: index })
            .context(IrSnafu)
    }

    /// Affine value of tiled member `k` for `stmt`.
    pub fn tile_value(&self, stmt: &StmtId, k: usize) -> Result<LinExpr> {
        Self::member_value(&self.tile[k], stmt, self.tile_first() + k)
    }

    /// Instances of `stmt` related to the requested coordinates, over its
    /// iterators, the parameters and the coordinate variables.
    pub fn relation(&self, scop: &Scop, stmt: &StmtId, with: Coords) -> Result<Polyhedron> {
        let statement = scop.statement(stmt).context(IrSnafu)?;
        let mut constraints: Vec<Constraint> = Vec::new();

        for (j, member) in self.host.iter().enumerate() {
            constraints.push(Constraint::eq(coords::host(j), Self::member_value(member, stmt, j)?));
        }

        for k in 0..self.tile_len() {
            let e = self.tile_value(stmt, k)?;
            let size = self.tile_sizes[k];
            let s = LinExpr::var(coords::tile(k));
            if with.values {
                constraints.push(Constraint::eq(value_coord(k), e.clone()));
            }
            if with.tiles || with.points || with.blocks || with.threads {
                constraints.push(Constraint::ge(e.clone(), s.scale(size)));
                constraints.push(Constraint::le(e.clone(), s.scale(size) + (size - 1)));
            }
            if with.blocks && k < self.n_grid() {
                let grid = self.grid_sizes[k];
                let b = coords::block(k);
                constraints.push(Constraint::eq(s.clone(), LinExpr::term(coords::block_quotient(k), grid) + LinExpr::var(&b)));
                constraints.push(Constraint::ge(b.clone(), 0));
                constraints.push(Constraint::le(b, grid - 1));
            }
            if with.points || with.threads {
                constraints.push(Constraint::eq(coords::point(k), e - s.scale(size)));
            }
            if with.threads && k < self.n_block() {
                let block = self.block_sizes[k];
                let t = coords::thread(k);
                let p = LinExpr::var(coords::point(k));
                if self.thread_covers_tile(k) {
                    constraints.push(Constraint::eq(p, t.clone()));
                } else {
                    constraints.push(Constraint::eq(p, LinExpr::term(coords::thread_quotient(k), block) + LinExpr::var(&t)));
                }
                constraints.push(Constraint::ge(t.clone(), 0));
                constraints.push(Constraint::le(t, block - 1));
            }
        }

        if with.deeper {
            for (j, member) in self.deeper.iter().enumerate() {
                if let Some(value) = member.value(stmt) {
                    constraints.push(Constraint::eq(coords::deeper(j), value.clone()));
                }
            }
        }

        Ok(statement.domain.intersect(&scop.context).with_all(constraints))
    }

    /// [`Kernel::relation`] with the iterators and coordinates primed, for
    /// the second instance of a pair.
    pub fn primed_relation(&self, scop: &Scop, stmt: &StmtId, with: Coords) -> Result<Polyhedron> {
        let statement = scop.statement(stmt).context(IrSnafu)?;
        let relation = self.relation(scop, stmt, with)?;
        Ok(relation.rename(|v| (v.is_internal() || statement.iterators.contains(v)).then(|| v.primed())))
    }

    /// Lower and upper bound of `var` over every statement, in terms of the
    /// parameters and host coordinates.
    pub fn coord_range(&self, scop: &Scop, var: &Var, with: Coords) -> Result<(SymBound, SymBound)> {
        let keep = self.outer_vars(scop);
        let mut set = Set::empty();
        for stmt in &self.stmts {
            set.add_part(self.relation(scop, stmt, with)?);
        }
        Ok((set.extremum(BoundKind::Lower, var, &keep), set.extremum(BoundKind::Upper, var, &keep)))
    }
}

/// Constraints of the first piece implied by every piece.
pub fn hull(set: &Set) -> Polyhedron {
    let parts = set.parts();
    let Some(first) = parts.first() else {
        return Polyhedron::empty();
    };
    Polyhedron::from_constraints(
        first.constraints().iter().filter(|c| parts.iter().all(|p| p.implies(c))).cloned(),
    )
}
