//! Reference grouping and tile placement.
//!
//! For every array a kernel touches, references are grouped so that all
//! references that may touch the same element within one block share a
//! tile whenever one of them writes. Each group then gets at most one tile:
//!
//! - private when every thread owns a disjoint, constant-size footprint and
//!   reuses it;
//! - shared when the per-block footprint has a constant-size bounding box;
//! - none otherwise: the group keeps addressing global memory.
//!
//! Shared tiles are then checked against the on-chip budget and private
//! tiles against the loops that would need unrolling.

use std::collections::BTreeSet;

use itertools::Itertools;
use snafu::ResultExt;
use tessera_ir::{ArrayDecl, RefTag, Scop};
use tessera_poly::{Constraint, Polyhedron, Set, SymBound, Var};
use tracing::{debug, instrument, trace};

use crate::array::ArrayInfo;
use crate::context::GenContext;
use crate::coords;
use crate::diagnostic::Diagnostic;
use crate::error::*;
use crate::kernel::{Coords, Kernel};
use crate::tile::{ArrayTile, TileKind, compute_tile};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone)]
pub struct RefGroup {
    pub array: String,
    /// Position among the array's groups in this kernel.
    pub nr: usize,
    pub refs: Vec<RefTag>,
    pub read: bool,
    pub write: bool,
    /// Every write of the group writes all the elements it may write.
    pub exact_write: bool,
    /// Elements accessed for one iteration of the shared loops, over the
    /// array dimensions, parameters, host and tile coordinates.
    pub footprint: Set,
    pub shared_tile: Option<ArrayTile>,
    pub private_tile: Option<ArrayTile>,
    /// Number of leading shared schedule dimensions fixed when the tile is
    /// copied: the host dimensions plus the tile dimensions the tile
    /// offsets depend on.
    pub depth: usize,
    pub forced_private: bool,
}

impl RefGroup {
    fn single(array: &str, tag: RefTag, read: bool, write: bool, exact_write: bool, footprint: Polyhedron) -> Self {
        Self {
            array: array.to_string(),
            nr: 0,
            refs: vec![tag],
            read,
            write,
            exact_write,
            footprint: Set::from_poly(footprint),
            shared_tile: None,
            private_tile: None,
            depth: 0,
            forced_private: false,
        }
    }

    /// The tile accesses go through, private first.
    pub fn tile(&self) -> Option<&ArrayTile> {
        self.private_tile.as_ref().or(self.shared_tile.as_ref())
    }

    pub fn is_private(&self) -> bool {
        self.private_tile.is_some()
    }

    pub fn is_shared(&self) -> bool {
        self.private_tile.is_none() && self.shared_tile.is_some()
    }

    pub fn is_promoted(&self) -> bool {
        self.tile().is_some()
    }

    /// Nesting level among the kernel's tile loops where copies go.
    pub fn copy_level(&self, kernel: &Kernel) -> usize {
        self.depth.saturating_sub(kernel.tile_first())
    }

    /// Index of the last shared schedule dimension fixed at copy time.
    pub fn last_shared(&self) -> Option<usize> {
        self.depth.checked_sub(1)
    }

    /// Name of the on-chip variable, given the number of groups of the array.
    pub fn var_name(&self, n_groups: usize) -> Option<String> {
        let tile = self.tile()?;
        let mut name = format!("{}_{}", tile.kind, self.array);
        if n_groups > 1 {
            name.push_str(&format!("_{}", self.nr));
        }
        Some(name)
    }

    fn merged(self, other: RefGroup, order: &[RefTag]) -> RefGroup {
        let mut refs = self.refs;
        refs.extend(other.refs);
        refs.sort_by_key(|tag| order.iter().position(|t| t == tag));
        RefGroup {
            refs,
            read: self.read || other.read,
            write: self.write || other.write,
            exact_write: self.exact_write && other.exact_write,
            footprint: self.footprint.union(&other.footprint),
            shared_tile: None,
            private_tile: None,
            ..self
        }
    }

    fn overlaps(&self, other: &RefGroup) -> bool {
        !self.footprint.intersect(&other.footprint).is_empty()
    }
}

/// Per-kernel view of an array.
#[derive(Debug, Clone)]
pub struct LocalArrayInfo {
    /// Index into the program's array list.
    pub array: usize,
    pub name: String,
    pub element_size: usize,
    pub groups: Vec<RefGroup>,
    /// Array bounds simplified under the kernel context.
    pub bounds: Vec<Option<SymBound>>,
}

impl LocalArrayInfo {
    /// Group holding `tag`.
    pub fn group_of(&self, tag: &RefTag) -> Option<&RefGroup> {
        self.groups.iter().find(|g| g.refs.contains(tag))
    }
}

/// One on-chip variable declared by a kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelVar {
    pub name: String,
    pub array: String,
    pub kind: TileKind,
    pub sizes: Vec<i64>,
}

// ============================================================================
// GROUPING
// ============================================================================

/// Variables a shared tile may depend on: parameters, host and tile
/// coordinates.
fn shared_keep(kernel: &Kernel, scop: &Scop) -> BTreeSet<Var> {
    let mut keep = kernel.outer_vars(scop);
    keep.extend((0..kernel.tile_len()).map(coords::tile));
    keep
}

/// Variables a private tile may depend on: the shared ones plus thread ids.
fn private_keep(kernel: &Kernel, scop: &Scop) -> BTreeSet<Var> {
    let mut keep = shared_keep(kernel, scop);
    keep.extend(kernel.thread_ids());
    keep
}

/// Elements accessed by `tag` for fixed `keep` coordinates.
fn footprint(kernel: &Kernel, scop: &Scop, tag: &RefTag, with: Coords, keep: &BTreeSet<Var>) -> Result<Polyhedron> {
    let (stmt, reference) = scop.reference(tag).context(IrSnafu)?;
    let mut keep = keep.clone();
    keep.extend((0..reference.index.len()).map(ArrayDecl::dim));
    Ok(kernel.relation(scop, &stmt.id, with)?.with_all(reference.access_constraints()).project_onto(&keep))
}

/// Merge pairs in discovery order until `merge` accepts no pair.
fn merge_groups(
    mut groups: Vec<RefGroup>,
    mut merge: impl FnMut(&RefGroup, &RefGroup) -> Result<Option<RefGroup>>,
) -> Result<Vec<RefGroup>> {
    'restart: loop {
        for (i, j) in (0..groups.len()).tuple_combinations() {
            if let Some(merged) = merge(&groups[i], &groups[j])? {
                groups.remove(j);
                groups[i] = merged;
                continue 'restart;
            }
        }
        return Ok(groups);
    }
}

/// Groups of `array` that may ever be promoted.
fn promotable(array: &ArrayInfo, group: &RefGroup) -> bool {
    group.exact_write && !array.read_only_scalar
}

#[instrument(skip_all, fields(kernel.id = %kernel.id))]
pub fn group_references(ctx: &mut GenContext<'_>, kernel: &mut Kernel, arrays: &[ArrayInfo]) -> Result<BTreeSet<usize>> {
    let scop = ctx.scop;
    let shared = shared_keep(kernel, scop);
    let private = private_keep(kernel, scop);
    let context_hull = kernel.context_hull();

    let mut locals = Vec::new();
    for (index, array) in arrays.iter().enumerate() {
        let refs: Vec<RefTag> = array.refs.iter().filter(|t| kernel.stmts.contains(&t.stmt)).cloned().collect();
        if refs.is_empty() {
            continue;
        }

        let mut groups = Vec::with_capacity(refs.len());
        for tag in &refs {
            let (_, reference) = scop.reference(tag).context(IrSnafu)?;
            let fp = footprint(kernel, scop, tag, Coords::per_block(), &shared)?;
            groups.push(RefGroup::single(&array.name, tag.clone(), reference.read, reference.write, reference.exact_write, fp));
        }

        let order = &array.refs;
        let mut groups = merge_groups(groups, |a, b| {
            Ok(((a.write || b.write) && a.overlaps(b)).then(|| a.clone().merged(b.clone(), order)))
        })?;

        for group in &mut groups {
            if promotable(array, group) {
                group.shared_tile = compute_tile(kernel, scop, &group.refs, array.n_index, TileKind::Shared, &shared)?;
            }
        }

        // Read-only groups share a tile when it is not larger than both.
        let mut groups = merge_groups(groups, |a, b| {
            let (Some(ta), Some(tb)) = (&a.shared_tile, &b.shared_tile) else {
                return Ok(None);
            };
            if a.write || b.write || !a.overlaps(b) {
                return Ok(None);
            }
            let mut merged = a.clone().merged(b.clone(), order);
            merged.shared_tile = compute_tile(kernel, scop, &merged.refs, array.n_index, TileKind::Shared, &shared)?;
            Ok(merged.shared_tile.as_ref().is_some_and(|t| t.len() <= ta.len() + tb.len()).then_some(merged))
        })?;

        let forced = is_forced_private(ctx, kernel, array)?;
        for (nr, group) in groups.iter_mut().enumerate() {
            group.nr = nr;
            if !promotable(array, group) {
                continue;
            }
            if let Some(tile) = private_tile(kernel, scop, array, group, &private, forced)? {
                group.forced_private = forced;
                group.private_tile = Some(tile);
                group.shared_tile = None;
            }
        }

        debug!(
            kernel.id = %kernel.id,
            array = %array.name,
            groups = groups.len(),
            private = groups.iter().filter(|g| g.is_private()).count(),
            shared = groups.iter().filter(|g| g.is_shared()).count(),
            "grouped references"
        );
        locals.push(LocalArrayInfo {
            array: index,
            name: array.name.clone(),
            element_size: array.element_size(),
            groups,
            bounds: array.localized_bounds(&context_hull),
        });
    }
    kernel.arrays = locals;

    check_shared_budget(ctx, kernel);
    let unroll = check_private_unroll(ctx, kernel, &private)?;
    finish_groups(kernel);
    Ok(unroll)
}

// ============================================================================
// PRIVATE TILES
// ============================================================================

fn private_tile(
    kernel: &Kernel,
    scop: &Scop,
    array: &ArrayInfo,
    group: &RefGroup,
    keep: &BTreeSet<Var>,
    forced: bool,
) -> Result<Option<ArrayTile>> {
    let Some(tile) = compute_tile(kernel, scop, &group.refs, array.n_index, TileKind::Private, keep)? else {
        return Ok(None);
    };
    if forced {
        return Ok(Some(tile));
    }
    if !has_reuse(kernel, scop, group, keep)? || !threads_disjoint(kernel, scop, group, keep)? {
        return Ok(None);
    }
    Ok(Some(tile))
}

/// A thread touches the same element in more than one iteration: some
/// loop running inside the thread is not followed by an index, or distinct
/// references meet across such iterations.
fn has_reuse(kernel: &Kernel, scop: &Scop, group: &RefGroup, keep: &BTreeSet<Var>) -> Result<bool> {
    let mut any_free = false;
    for tag in &group.refs {
        let (stmt, reference) = scop.reference(tag).context(IrSnafu)?;
        let relation = kernel.relation(scop, &stmt.id, Coords::per_thread())?;
        for iterator in &stmt.iterators {
            let fixed = relation.bounds(iterator, keep).constant_width().is_some_and(|(_, width)| width == 0);
            if fixed {
                continue;
            }
            any_free = true;
            if !reference.index.iter().any(|e| e.involves(iterator)) {
                return Ok(true);
            }
        }
    }
    if !any_free {
        return Ok(false);
    }
    let mut indices = Vec::with_capacity(group.refs.len());
    for tag in &group.refs {
        indices.push(&scop.reference(tag).context(IrSnafu)?.1.index);
    }
    Ok(indices.iter().any(|index| *index != indices[0]))
}

/// No element is accessed by two different threads of a block.
fn threads_disjoint(kernel: &Kernel, scop: &Scop, group: &RefGroup, keep: &BTreeSet<Var>) -> Result<bool> {
    if kernel.n_block() == 0 {
        return Ok(true);
    }
    let mut mine = Set::empty();
    for tag in &group.refs {
        mine.add_part(footprint(kernel, scop, tag, Coords::per_thread(), keep)?);
    }
    let threads: BTreeSet<Var> = kernel.thread_ids().into_iter().collect();
    let theirs: Vec<Polyhedron> =
        mine.parts().iter().map(|p| p.rename(|v| threads.contains(v).then(|| coords::other(v)))).collect();

    for t in &threads {
        let other = coords::other(t);
        for ordering in [Constraint::lt(t.clone(), other.clone()), Constraint::gt(t.clone(), other.clone())] {
            for (a, b) in mine.parts().iter().cartesian_product(&theirs) {
                if !a.intersect(b).with(ordering.clone()).is_empty() {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

/// Point members a private access index depends on, or `None` when it
/// also depends on a loop that cannot be unrolled in place.
fn private_unroll_members(
    kernel: &Kernel,
    scop: &Scop,
    group: &RefGroup,
    tile: &ArrayTile,
    keep: &BTreeSet<Var>,
) -> Result<Option<BTreeSet<usize>>> {
    let free: Vec<usize> = (kernel.n_block()..kernel.tile_len()).collect();
    let mut with_points = keep.clone();
    with_points.extend(free.iter().map(|&k| coords::point(k)));

    let mut members = BTreeSet::new();
    for tag in &group.refs {
        let (stmt, reference) = scop.reference(tag).context(IrSnafu)?;
        let relation = kernel.relation(scop, &stmt.id, Coords::per_thread())?;
        for (d, bound) in tile.bounds.iter().enumerate() {
            let Some(reduced) = bound.reduce(&reference.index[d]) else {
                return Ok(None);
            };
            let x = Var::coord("x", d);
            let values = relation.clone().with(Constraint::eq(x.clone(), reduced));
            let determined_by = |vars: &BTreeSet<Var>| values.bounds(&x, vars).constant_width().is_some_and(|(_, w)| w == 0);

            if determined_by(keep) {
                continue;
            }
            if !determined_by(&with_points) {
                return Ok(None);
            }
            for &k in &free {
                let mut without = with_points.clone();
                without.remove(&coords::point(k));
                if !determined_by(&without) {
                    members.insert(k);
                }
            }
        }
    }
    Ok(Some(members))
}

fn check_private_unroll(ctx: &mut GenContext<'_>, kernel: &mut Kernel, keep: &BTreeSet<Var>) -> Result<BTreeSet<usize>> {
    let scop = ctx.scop;
    let mut needs = Vec::new();
    let mut discard = Vec::new();
    for (a, local) in kernel.arrays.iter().enumerate() {
        for (g, group) in local.groups.iter().enumerate() {
            let Some(tile) = &group.private_tile else { continue };
            match private_unroll_members(kernel, scop, group, tile, keep)? {
                Some(members) => needs.push((a, g, members)),
                None => discard.push((a, g)),
            }
        }
    }

    let is_forced = |kernel: &Kernel, (a, g): (usize, usize)| kernel.arrays[a].groups[g].forced_private;
    let any_forced = needs.iter().any(|&(a, g, _)| is_forced(kernel, (a, g)));
    let any_unroll = needs.iter().any(|(_, _, m)| !m.is_empty());
    if any_forced && any_unroll {
        // Unrolling would reorder accesses to the forced scalars.
        let (keep_needs, dropped): (Vec<_>, Vec<_>) = needs.into_iter().partition(|&(a, g, _)| is_forced(kernel, (a, g)));
        discard.extend(dropped.into_iter().map(|(a, g, _)| (a, g)));
        needs = keep_needs;
    }

    for (a, g) in discard {
        let group = &mut kernel.arrays[a].groups[g];
        group.private_tile = None;
        ctx.report(Diagnostic::PrivateTileDiscarded { kernel: kernel.id, array: group.array.clone(), group: group.nr });
    }

    let unroll: BTreeSet<usize> = needs.into_iter().flat_map(|(_, _, m)| m).collect();
    if !unroll.is_empty() {
        debug!(kernel.id = %kernel.id, members = ?unroll, "unrolling point members");
    }
    Ok(unroll)
}

// ============================================================================
// FORCED PRIVATIZATION
// ============================================================================

/// A written scalar whose live ranges never cross an iteration of the
/// shared loops can live in a register, or the declaration asks for it.
fn is_forced_private(ctx: &GenContext<'_>, kernel: &Kernel, array: &ArrayInfo) -> Result<bool> {
    if array.force_private {
        return Ok(true);
    }
    if !ctx.options.live_range_reordering || !array.is_scalar() || array.is_record || array.read_only_scalar {
        return Ok(false);
    }
    Ok(!order_crosses_shared_loops(kernel, ctx.scop, array)?)
}

fn order_crosses_shared_loops(kernel: &Kernel, scop: &Scop, array: &ArrayInfo) -> Result<bool> {
    let shared_coords: Vec<Var> = kernel.host_vars().into_iter().chain((0..kernel.tile_len()).map(coords::tile)).collect();

    for (source, sink, relation) in scop.deps.effective_order() {
        let (_, reference) = scop.reference(&source).context(IrSnafu)?;
        if reference.array != array.name {
            continue;
        }
        if !kernel.stmts.contains(&source.stmt) || !kernel.stmts.contains(&sink.stmt) {
            return Ok(true);
        }
        let pairs = kernel
            .relation(scop, &source.stmt, Coords::per_block())?
            .intersect(&kernel.primed_relation(scop, &sink.stmt, Coords::per_block())?);
        for part in relation.parts() {
            let pairs = pairs.intersect(part);
            for var in &shared_coords {
                let other = coords::other(var);
                let crossing = [Constraint::lt(var.clone(), other.clone()), Constraint::gt(var.clone(), other)];
                if crossing.into_iter().any(|c| !pairs.clone().with(c).is_empty()) {
                    trace!(kernel.id = %kernel.id, array = %array.name, coord = %var, "order crosses shared loop");
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

// ============================================================================
// BUDGET AND DECLARATIONS
// ============================================================================

/// Keep shared tiles in discovery order while they fit the budget.
fn check_shared_budget(ctx: &mut GenContext<'_>, kernel: &mut Kernel) {
    let Some(mut left) = ctx.options.shared_memory.bytes() else {
        return;
    };
    let id = kernel.id;
    for local in &mut kernel.arrays {
        for group in &mut local.groups {
            if group.is_private() {
                continue;
            }
            let Some(tile) = &group.shared_tile else { continue };
            let bytes = usize::try_from(tile.len()).unwrap_or(usize::MAX).saturating_mul(local.element_size);
            if bytes <= left {
                left -= bytes;
                trace!(kernel.id = %id, array = %local.name, group = group.nr, bytes, left, "shared tile fits");
            } else {
                ctx.report(Diagnostic::SharedBudgetExceeded {
                    kernel: id,
                    array: local.name.clone(),
                    group: group.nr,
                    bytes,
                    left,
                });
                group.shared_tile = None;
            }
        }
    }
}

/// Copy depths and on-chip declarations of the final tiles.
fn finish_groups(kernel: &mut Kernel) {
    let tile_first = kernel.tile_first();
    let tile_len = kernel.tile_len();
    let shared_len = kernel.shared_len();
    let mut vars = Vec::new();
    for local in &mut kernel.arrays {
        let n_groups = local.groups.len();
        for group in &mut local.groups {
            group.depth = match group.tile() {
                Some(tile) if tile.kind == TileKind::Shared => {
                    let deps = tile.depends_on();
                    (0..tile_len)
                        .filter(|&k| deps.contains(&coords::tile(k)))
                        .map(|k| tile_first + k + 1)
                        .max()
                        .unwrap_or(tile_first)
                }
                _ => shared_len,
            };
            if let (Some(name), Some(tile)) = (group.var_name(n_groups), group.tile()) {
                vars.push(KernelVar { name, array: local.name.clone(), kind: tile.kind, sizes: tile.sizes() });
            }
        }
    }
    kernel.vars = vars;
}
