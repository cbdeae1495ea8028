//! Copies between global memory and on-chip tiles.
//!
//! A copy scans the local coordinates `l.d` of the tile it fills or
//! drains. Shared reads load the whole tile clipped to the array; every
//! other copy only touches the elements its retained accesses use. Shared
//! copies spread the innermost tile dimension over `t.0`, the next over
//! `t.1`, and so on; private copies run unrolled in each thread.

use snafu::{OptionExt, ResultExt};
use tessera_ir::error::ArrayNotFoundSnafu;
use tessera_ir::{Annotation, ArrayDecl, AstExpr, AstNode, LoopType};
use tessera_poly::{BoundKind, Constraint, LinExpr, Polyhedron, Set, SymBound, Var};
use tessera_schedule::{ArrayInfo, ArrayTile, Direction, TaggedSets, TileKind, coords};

use crate::access::global_access;
use crate::error::*;
use crate::kernel::KernelGen;
use crate::scan::{Mapping, Scope, Style};

/// One copy being generated.
struct Transfer<'k> {
    direction: Direction,
    info: &'k ArrayInfo,
    bounds: &'k [Option<SymBound>],
    kind: TileKind,
    /// On-chip variable name.
    var: String,
    /// Global index of every local coordinate.
    globals: Vec<LinExpr>,
}

impl KernelGen<'_> {
    pub(crate) fn copy(
        &self,
        direction: Direction,
        array: usize,
        group: usize,
        retained: &TaggedSets,
        scope: &Scope,
    ) -> Result<AstNode> {
        let Some(local) = self.kernel.arrays.get(array) else {
            return Ok(AstNode::block(vec![]));
        };
        let Some(group) = local.groups.get(group) else {
            return Ok(AstNode::block(vec![]));
        };
        let (Some(tile), Some(var)) = (group.tile(), group.var_name(local.groups.len())) else {
            return Ok(AstNode::block(vec![]));
        };
        let info = self.arrays.get(local.array).context(ArrayNotFoundSnafu { name: &local.name }).context(IrSnafu)?;

        let globals = tile.bounds.iter().enumerate().map(|(d, b)| b.globalize(coords::local(d))).collect();
        let transfer = Transfer { direction, info, bounds: &local.bounds, kind: tile.kind, var, globals };

        let instances = if direction == Direction::Read && tile.kind == TileKind::Shared && !tile.bounds.is_empty() {
            Set::from_poly(full_tile(tile, transfer.bounds, &transfer.globals))
        } else {
            self.image(&transfer, retained, scope)?
        };
        if instances.is_empty() {
            return Ok(AstNode::block(vec![]));
        }
        self.copy_loops(&transfer, 0, &instances, scope)
    }

    /// Local coordinates of the elements the retained accesses touch, in
    /// terms of the enclosing loops.
    fn image(&self, transfer: &Transfer<'_>, retained: &TaggedSets, scope: &Scope) -> Result<Set> {
        let mut keep = scope.outer.clone();
        keep.extend((0..transfer.globals.len()).map(coords::local));
        let tie = transfer.globals.iter().enumerate().map(|(d, g)| Constraint::eq(ArrayDecl::dim(d), g.clone()));

        let mut image = Set::empty();
        for (tag, instances) in retained {
            let (_, reference) = self.scop.reference(tag).context(IrSnafu)?;
            let relation = self
                .kernel
                .relation(self.scop, &tag.stmt, transfer.kind.coords())
                .context(ScheduleSnafu)?
                .with_all(reference.access_constraints())
                .with_all(tie.clone());
            for part in instances.parts() {
                let projected = relation.intersect(part).project_onto(&keep);
                if !projected.is_empty() {
                    image.add_part(projected);
                }
            }
        }
        Ok(image.coalesce())
    }

    fn copy_loops(&self, transfer: &Transfer<'_>, d: usize, instances: &Set, scope: &Scope) -> Result<AstNode> {
        let n = transfer.globals.len();
        if d == n {
            return Ok(AstNode::guarded(scope.condition(instances), element_copy(transfer, scope)));
        }

        let (mapping, loop_type) = match transfer.kind {
            TileKind::Private => (Mapping::Plain, LoopType::Unroll),
            TileKind::Shared => (self.thread_mapping(n - 1 - d), LoopType::Default),
        };
        let Some((header, inner)) = scope.enter(instances, &coords::local(d), Var::new(format!("l{d}")), mapping)? else {
            return Ok(AstNode::block(vec![]));
        };
        let body = self.copy_loops(transfer, d + 1, instances, &inner)?;
        Ok(header.wrap(body, loop_type))
    }

    /// Distribution over thread dimension `j`, when the kernel has one of
    /// constant size.
    fn thread_mapping(&self, j: usize) -> Mapping {
        let size = self.kernel.block_dim.get(j).and_then(SymBound::as_constant).filter(|s| *s > 1);
        match size {
            Some(size) => {
                let style = if self.options.wrap { Style::Wrap } else { Style::Quotient { scaled: false } };
                Mapping::Cyclic { id: coords::thread(j), size, style }
            }
            None => Mapping::Plain,
        }
    }
}

/// Every local coordinate of `tile` whose global element lies in the array.
fn full_tile(tile: &ArrayTile, bounds: &[Option<SymBound>], globals: &[LinExpr]) -> Polyhedron {
    let mut constraints = Vec::new();
    for (d, (bound, global)) in tile.bounds.iter().zip(globals).enumerate() {
        let l = coords::local(d);
        constraints.push(Constraint::ge(l.clone(), 0));
        constraints.push(Constraint::le(l, bound.size - 1));
        constraints.push(Constraint::ge(global.clone(), 0));
        if let Some(Some(size)) = bounds.get(d)
            && let [piece] = size.pieces()
        {
            let x = ArrayDecl::dim(d);
            constraints.extend(
                piece.iter().map(|b| b.add_constant(-1).constrain(BoundKind::Upper, &x).substitute(&x, global)),
            );
        }
    }
    Polyhedron::from_constraints(constraints)
}

fn element_copy(transfer: &Transfer<'_>, scope: &Scope) -> AstNode {
    let n = transfer.globals.len();
    let local_index = if n == 0 {
        AstExpr::id(transfer.var.as_str())
    } else {
        AstExpr::access(&transfer.var, (0..n).map(|d| scope.expr(&LinExpr::var(coords::local(d)))).collect())
    };
    let index = transfer.globals.iter().map(|g| scope.expr(g)).collect();
    let global_index = global_access(transfer.info, transfer.bounds, index, scope);
    let expr = AstExpr::id(format!("{}_{}", transfer.direction, transfer.var));
    let annotation = Annotation::Copy {
        read: transfer.direction == Direction::Read,
        array: transfer.info.name.clone(),
        local: transfer.var.clone(),
        global_index,
        local_index,
    };
    AstNode::User { expr, annotation }
}
