//! Band selection and kernel carving.
//!
//! The walk looks for the outermost permutable band with a coincident
//! member on every path of the schedule tree. Each such band becomes one
//! kernel:
//!
//! ```text
//! guard                       grid holds at least one block
//!   mark: kernel[k]
//!     context                 block and thread id bounds
//!       filter: b = s mod G   block ids
//!         band: tile          grid members, then the rest
//!           mark: thread
//!             filter: t = p mod B
//!               band: point   block members, then the rest
//!                 band        members beyond the tile sizes
//!                   ...       original subtree
//! ```
//!
//! Bands above a kernel are marked atomic. A path that reaches a leaf
//! without a tilable band becomes a zero-dimensional kernel.

use std::collections::BTreeSet;
use std::sync::Arc;

use snafu::{OptionExt, ResultExt};
use tessera_ir::error::UnsupportedNodeSnafu;
use tessera_ir::{Band, BandMember, Filter, IdFilter, KernelId, LoopType, Mark, MemberKind, ScheduleNode, Scop, StmtId};
use tessera_poly::arith::pmod;
use tessera_poly::{Bound, BoundKind, Constraint, Polyhedron, Set, SymBound, Var};
use tracing::{debug, instrument, trace};

use crate::config::KernelSizes;
use crate::context::GenContext;
use crate::coords;
use crate::error::*;
use crate::kernel::{Coords, Kernel, value_coord};

/// Result of carving a whole tree.
#[derive(Debug, Clone)]
pub struct Carving {
    pub tree: Arc<ScheduleNode>,
    /// Newly carved kernels in tree order.
    pub kernels: Vec<Kernel>,
    /// Some kernel maps a coincident member to blocks or threads.
    pub parallel: bool,
    /// Largest number of host band members above a kernel.
    pub prefix_len: usize,
}

struct Visited {
    node: Arc<ScheduleNode>,
    kernels: Vec<Kernel>,
    prefix_len: usize,
    parallel: bool,
}

impl Visited {
    fn unchanged(node: &Arc<ScheduleNode>, prefix_len: usize, parallel: bool) -> Self {
        Self { node: node.clone(), kernels: Vec::new(), prefix_len, parallel }
    }

    /// Same result with `node` rebuilt around the visited child.
    fn rewrap(self, node: &Arc<ScheduleNode>) -> Self {
        Self { node: ScheduleNode::with_child(node, self.node), ..self }
    }
}

#[instrument(skip_all)]
pub fn carve_kernels(ctx: &mut GenContext<'_>, tree: &Arc<ScheduleNode>) -> Result<Carving> {
    let stmts: BTreeSet<StmtId> = ctx.scop.statements.iter().map(|s| s.id.clone()).collect();
    let visited = visit(ctx, tree, &[], &stmts)?;
    debug!(kernels = visited.kernels.len(), parallel = visited.parallel, prefix_len = visited.prefix_len, "carved kernels");
    Ok(Carving { tree: visited.node, kernels: visited.kernels, parallel: visited.parallel, prefix_len: visited.prefix_len })
}

fn visit(
    ctx: &mut GenContext<'_>,
    node: &Arc<ScheduleNode>,
    host: &[BandMember],
    stmts: &BTreeSet<StmtId>,
) -> Result<Visited> {
    match node.as_ref() {
        ScheduleNode::Domain { domain, child } => {
            let reached = domain.statements().filter(|s| stmts.contains(*s)).cloned().collect();
            Ok(visit(ctx, child, host, &reached)?.rewrap(node))
        }
        ScheduleNode::Filter { filter: Filter::Instances(set), child } => {
            let reached = set.statements().filter(|s| stmts.contains(*s)).cloned().collect();
            Ok(visit(ctx, child, host, &reached)?.rewrap(node))
        }
        ScheduleNode::Filter { filter: Filter::Modulo(_), .. } => {
            UnsupportedNodeSnafu { kind: "modulo filter", location: "outside a kernel" }.fail().context(IrSnafu)
        }
        ScheduleNode::Context { child, .. } | ScheduleNode::Guard { child, .. } => {
            Ok(visit(ctx, child, host, stmts)?.rewrap(node))
        }
        ScheduleNode::Mark { mark: Mark::Kernel(id), .. } => {
            trace!(kernel.id = %id, "already carved");
            Ok(Visited::unchanged(node, host.len(), true))
        }
        ScheduleNode::Mark { mark: Mark::Thread, .. } => {
            UnsupportedNodeSnafu { kind: "thread mark", location: "outside a kernel" }.fail().context(IrSnafu)
        }
        ScheduleNode::Sequence { children } | ScheduleNode::Set { children } => {
            let mut rebuilt = Vec::with_capacity(children.len());
            let mut kernels = Vec::new();
            let mut prefix_len = host.len();
            let mut parallel = false;
            for child in children {
                let visited = visit(ctx, child, host, stmts)?;
                prefix_len = prefix_len.max(visited.prefix_len);
                parallel |= visited.parallel;
                kernels.extend(visited.kernels);
                rebuilt.push(visited.node);
            }
            Ok(Visited { node: ScheduleNode::with_children(node, rebuilt), kernels, prefix_len, parallel })
        }
        ScheduleNode::Band { band, child } if band.permutable && band.n_coincident() > 0 && !stmts.is_empty() => {
            carve_band(ctx, band, child, host, stmts)
        }
        ScheduleNode::Band { band, child } => {
            let mut outer = host.to_vec();
            outer.extend(band.members.iter().cloned());
            let visited = visit(ctx, child, &outer, stmts)?;
            let atomic = band.members.iter().all(|m| m.loop_type == LoopType::Atomic);
            let node = if atomic && Arc::ptr_eq(&visited.node, child) {
                node.clone()
            } else {
                ScheduleNode::band(band.with_loop_type(LoopType::Atomic), visited.node)
            };
            Ok(Visited { node, ..visited })
        }
        ScheduleNode::Leaf if stmts.is_empty() => Ok(Visited::unchanged(node, host.len(), false)),
        ScheduleNode::Leaf => carve_leaf(ctx, node, host, stmts),
    }
}

// ============================================================================
// KERNEL CONSTRUCTION
// ============================================================================

fn carve_band(
    ctx: &mut GenContext<'_>,
    band: &Band,
    child: &Arc<ScheduleNode>,
    host: &[BandMember],
    stmts: &BTreeSet<StmtId>,
) -> Result<Visited> {
    let id = ctx.next_kernel_id();
    let options = ctx.options;

    let tile_sizes = options.tile_sizes(id, band.len());
    let (tiled, untiled) = band.split(tile_sizes.len()).context(IrSnafu)?;
    let n_coincident = tiled.n_coincident();
    let grid_sizes = options.grid_sizes(id, n_coincident);
    let block_sizes = options.block_sizes(id, n_coincident);

    let mut deeper = untiled.members.clone();
    child.visit(&mut |n| {
        if let ScheduleNode::Band { band, .. } = n {
            deeper.extend(band.members.iter().cloned());
        }
    });

    let mut kernel = Kernel {
        id,
        stmts: stmts.clone(),
        host: host.to_vec(),
        tile: tiled.members.clone(),
        tile_sizes,
        grid_sizes,
        block_sizes,
        grid_dim: Vec::new(),
        block_dim: Vec::new(),
        deeper,
        context: Set::empty(),
        guard: Polyhedron::universe(),
        parallel: true,
        arrays: Vec::new(),
        vars: Vec::new(),
    };
    finish_kernel(ctx, &mut kernel)?;

    let (tile_band, point_band) = tiled.tile(&kernel.tile_sizes);
    let (tile_grid, tile_rest) = tile_band.split(kernel.n_grid()).context(IrSnafu)?;
    let (point_block, point_rest) = point_band.split(kernel.n_block()).context(IrSnafu)?;

    let mut inner = ScheduleNode::band(untiled, child.clone());
    inner = ScheduleNode::band(point_rest, inner);
    inner = ScheduleNode::band(point_block.clone(), inner);
    inner = id_filter(kernel.thread_ids(), kernel.block_sizes.clone(), point_block, inner);
    inner = ScheduleNode::mark(Mark::Thread, inner);
    inner = ScheduleNode::band(tile_rest, inner);
    inner = ScheduleNode::band(tile_grid.clone(), inner);
    inner = id_filter(kernel.block_ids(), kernel.grid_sizes.clone(), tile_grid, inner);
    let node = wrap_kernel(&kernel, inner);

    debug!(
        kernel.id = %kernel.id,
        stmts = kernel.stmts.len(),
        host = kernel.tile_first(),
        tile_sizes = ?kernel.tile_sizes,
        grid = ?kernel.grid_dim,
        block = ?kernel.block_dim,
        "carved kernel"
    );
    Ok(Visited { node, prefix_len: kernel.tile_first(), parallel: true, kernels: vec![kernel] })
}

/// Zero-dimensional kernel around a leaf.
fn carve_leaf(
    ctx: &mut GenContext<'_>,
    node: &Arc<ScheduleNode>,
    host: &[BandMember],
    stmts: &BTreeSet<StmtId>,
) -> Result<Visited> {
    let id = ctx.next_kernel_id();
    let mut kernel = Kernel {
        id,
        stmts: stmts.clone(),
        host: host.to_vec(),
        tile: Vec::new(),
        tile_sizes: Vec::new(),
        grid_sizes: Vec::new(),
        block_sizes: Vec::new(),
        grid_dim: Vec::new(),
        block_dim: Vec::new(),
        deeper: Vec::new(),
        context: Set::empty(),
        guard: Polyhedron::universe(),
        parallel: false,
        arrays: Vec::new(),
        vars: Vec::new(),
    };
    finish_kernel(ctx, &mut kernel)?;

    let inner = ScheduleNode::mark(Mark::Thread, node.clone());
    let node = wrap_kernel(&kernel, inner);
    debug!(kernel.id = %kernel.id, stmts = kernel.stmts.len(), host = kernel.tile_first(), "carved leaf kernel");
    Ok(Visited { node, prefix_len: kernel.tile_first(), parallel: false, kernels: vec![kernel] })
}

fn id_filter(ids: Vec<Var>, sizes: Vec<i64>, band: Band, child: Arc<ScheduleNode>) -> Arc<ScheduleNode> {
    if ids.is_empty() {
        return child;
    }
    ScheduleNode::filter(Filter::Modulo(IdFilter { ids, sizes, members: band.members }), child)
}

fn wrap_kernel(kernel: &Kernel, inner: Arc<ScheduleNode>) -> Arc<ScheduleNode> {
    let inner = ScheduleNode::context(id_bounds(kernel), inner);
    let inner = ScheduleNode::mark(Mark::Kernel(kernel.id), inner);
    ScheduleNode::guard(kernel.guard.clone(), inner)
}

/// Context, effective sizes, guard and the used-sizes entry.
fn finish_kernel(ctx: &mut GenContext<'_>, kernel: &mut Kernel) -> Result<()> {
    let scop = ctx.scop;
    let outer = kernel.outer_vars(scop);

    let mut context = Set::empty();
    for stmt in &kernel.stmts {
        context.add_part(kernel.relation(scop, stmt, Coords::host())?.project_onto(&outer));
    }
    kernel.context = context.coalesce();
    let context_hull = kernel.context_hull();

    let grid_dim = (0..kernel.n_grid())
        .map(|k| effective_grid_size(kernel, scop, k).map(|size| size.gist(&context_hull)))
        .collect::<Result<Vec<_>>>()?;
    let block_dim = (0..kernel.n_block())
        .map(|k| effective_block_size(kernel, scop, k).map(|size| size.gist(&context_hull)))
        .collect::<Result<Vec<_>>>()?;
    kernel.grid_dim = grid_dim;
    kernel.block_dim = block_dim;

    // The kernel only launches when every grid dimension holds a block.
    let non_empty = kernel.grid_dim.iter().filter_map(|size| match size.pieces() {
        [piece] => Some(piece.iter().map(|b| Constraint::ge(b.expr.clone(), b.denom)).collect::<Vec<_>>()),
        _ => None,
    });
    kernel.guard = context_hull.with_all(non_empty.flatten());

    let sizes = KernelSizes {
        tile: (!kernel.tile_sizes.is_empty()).then(|| kernel.tile_sizes.clone()),
        grid: (!kernel.grid_sizes.is_empty()).then(|| kernel.grid_sizes.clone()),
        block: (!kernel.block_sizes.is_empty()).then(|| kernel.block_sizes.clone()),
    };
    ctx.record_sizes(kernel.id, sizes);
    Ok(())
}

/// Upper bound on the number of ids used when `x` in `[lo, hi]` is mapped
/// to id `x - lo + first`, capped by every value in `caps`.
fn used_ids(lo: i64, hi: &SymBound, first: i64, caps: &[i64]) -> SymBound {
    let pieces = hi
        .pieces()
        .iter()
        .map(|piece| {
            let mut candidates: Vec<Bound> = piece.iter().map(|b| b.add_constant(first - lo + 1)).collect();
            candidates.extend(caps.iter().map(|&cap| Bound::constant(cap)));
            candidates
        })
        .collect();
    SymBound::new(BoundKind::Upper, pieces)
}

fn is_bounded(bound: &SymBound) -> bool {
    !bound.is_unbounded() && !bound.is_vacuous()
}

/// Number of block ids used along grid dimension `k`.
///
/// Without a constant first tile the id of the first block is unknown, so
/// the configured grid size is returned even when fewer blocks are used.
fn effective_grid_size(kernel: &Kernel, scop: &Scop, k: usize) -> Result<SymBound> {
    let (lo, hi) = kernel.coord_range(scop, &coords::tile(k), Coords::per_block())?;
    let grid = kernel.grid_sizes[k];
    Ok(match lo.as_constant() {
        Some(lo) if is_bounded(&hi) => used_ids(lo, &hi, pmod(lo, grid), &[grid]),
        _ => SymBound::constant(BoundKind::Upper, grid),
    })
}

/// Number of thread ids used along block dimension `k`.
fn effective_block_size(kernel: &Kernel, scop: &Scop, k: usize) -> Result<SymBound> {
    let (lo, hi) = kernel.coord_range(scop, &value_coord(k), Coords { values: true, ..Coords::default() })?;
    let tile = kernel.tile_sizes[k];
    let block = kernel.block_sizes[k];
    Ok(match lo.as_constant() {
        // The first tile starts at point `lo mod tile`. Later tiles restart at
        // point zero, so past the first tile only the block and tile sizes cap
        // the ids in use.
        Some(lo) if is_bounded(&hi) => {
            let first_thread = pmod(pmod(lo, tile), block);
            used_ids(lo, &hi, first_thread, &[block, tile])
        }
        _ => SymBound::constant(BoundKind::Upper, block.min(tile)),
    })
}

/// Block and thread ids with their effective bounds.
fn id_bounds(kernel: &Kernel) -> Polyhedron {
    let ids = kernel.block_ids().into_iter().zip(&kernel.grid_dim).chain(kernel.thread_ids().into_iter().zip(&kernel.block_dim));
    let mut constraints = Vec::new();
    for (id, size) in ids {
        constraints.push(Constraint::ge(id.clone(), 0));
        match size.pieces() {
            [piece] => constraints.extend(piece.iter().map(|b| b.add_constant(-1).constrain(BoundKind::Upper, &id))),
            _ => {
                if let Some(max) = size.constant_envelope() {
                    constraints.push(Constraint::le(id.clone(), max - 1));
                }
            }
        }
    }
    Polyhedron::from_constraints(constraints)
}

/// The carved kernel rooted at `id` in `tree`.
pub fn kernel_subtree(tree: &Arc<ScheduleNode>, id: KernelId) -> Result<Arc<ScheduleNode>> {
    tree.find_kernel(id).context(KernelNotFoundSnafu { id })
}

// ============================================================================
// UNROLLING
// ============================================================================

/// Moves the point members listed in `unroll` of kernel `id` below the
/// others and marks them for unrolling. Indices count the point members
/// of the kernel from the outermost.
pub fn unroll_point_members(tree: &Arc<ScheduleNode>, id: KernelId, unroll: &BTreeSet<usize>) -> Result<Arc<ScheduleNode>> {
    if unroll.is_empty() {
        return Ok(tree.clone());
    }
    let kernel = kernel_subtree(tree, id)?;
    let rewritten = below_thread_mark(&kernel, unroll);
    trace!(kernel.id = %id, members = ?unroll, "unrolled point members");
    Ok(replace_kernel(tree, id, &rewritten))
}

fn replace_kernel(node: &Arc<ScheduleNode>, id: KernelId, by: &Arc<ScheduleNode>) -> Arc<ScheduleNode> {
    if let ScheduleNode::Mark { mark: Mark::Kernel(k), .. } = node.as_ref()
        && *k == id
    {
        return by.clone();
    }
    let children = node.children().iter().map(|c| replace_kernel(c, id, by)).collect();
    ScheduleNode::with_children(node, children)
}

fn below_thread_mark(node: &Arc<ScheduleNode>, unroll: &BTreeSet<usize>) -> Arc<ScheduleNode> {
    match node.as_ref() {
        ScheduleNode::Mark { mark: Mark::Thread, child } => ScheduleNode::with_child(node, reorder_points(child, 0, unroll)),
        _ => {
            let children = node.children().iter().map(|c| below_thread_mark(c, unroll)).collect();
            ScheduleNode::with_children(node, children)
        }
    }
}

fn reorder_points(node: &Arc<ScheduleNode>, first: usize, unroll: &BTreeSet<usize>) -> Arc<ScheduleNode> {
    match node.as_ref() {
        ScheduleNode::Filter { filter: Filter::Modulo(_), child } => {
            ScheduleNode::with_child(node, reorder_points(child, first, unroll))
        }
        ScheduleNode::Band { band, child } if band.members.iter().all(|m| matches!(m.kind, MemberKind::Point { .. })) => {
            let child = reorder_points(child, first + band.len(), unroll);
            let (unrolled, kept): (Vec<_>, Vec<_>) =
                band.members.iter().enumerate().partition(|(i, _)| unroll.contains(&(first + i)));
            if unrolled.is_empty() {
                return ScheduleNode::with_child(node, child);
            }
            let unrolled = unrolled.into_iter().map(|(_, m)| m.clone().with_loop_type(LoopType::Unroll)).collect();
            let kept = kept.into_iter().map(|(_, m)| m.clone()).collect();
            let inner = ScheduleNode::band(Band::new(unrolled, band.permutable), child);
            ScheduleNode::band(Band::new(kept, band.permutable), inner)
        }
        _ => node.clone(),
    }
}
